use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::auth::session::generate_token;

/// Returned to the client: PUT the raw image bytes to `url`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SignedUpload {
    pub path: String,
    pub token: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub bucket: String,
    pub owner: String,
    pub path: String,
    pub expires_at: Instant,
}

/// Single-use upload grants, kept in memory until redeemed or expired.
pub struct UploadTokenStore {
    tokens: HashMap<String, PendingUpload>,
    ttl: Duration,
}

impl UploadTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: HashMap::new(),
            ttl,
        }
    }

    pub fn issue(&mut self, bucket: &str, owner: &str, original_name: &str) -> SignedUpload {
        self.clear_stale();

        let token = generate_token();
        let path = format!(
            "{}/{}-{}.jpg",
            owner,
            chrono::Utc::now().timestamp_millis(),
            safe_base_name(original_name)
        );

        self.tokens.insert(
            token.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                owner: owner.to_string(),
                path: path.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        SignedUpload {
            url: format!("/uploads/signed/{}", token),
            path,
            token,
        }
    }

    /// Consume a token. Returns `None` when unknown, used, or expired.
    pub fn redeem(&mut self, token: &str) -> Option<PendingUpload> {
        let pending = self.tokens.remove(token)?;
        if Instant::now() >= pending.expires_at {
            tracing::warn!("Signed upload for {} expired", pending.path);
            return None;
        }
        Some(pending)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Remove expired tokens
    fn clear_stale(&mut self) {
        let now = Instant::now();
        self.tokens.retain(|_, pending| now < pending.expires_at);
    }
}

/// File stem reduced to `[A-Za-z0-9_-]`; camera captures are always stored as JPEG.
fn safe_base_name(name: &str) -> String {
    let file = name.rsplit(['/', '\\']).next().unwrap_or("");
    let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned
    }
}
