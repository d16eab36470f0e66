mod signed;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::StorageConfig;

pub use self::signed::{PendingUpload, SignedUpload, UploadTokenStore};

pub const AVATARS: &str = "avatars";
pub const VERIFICATION_PHOTOS: &str = "verification-photos";
pub const POST_IMAGES: &str = "post-images";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("File is too large (limit is {} MB)", limit / (1024 * 1024))]
    TooLarge { limit: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found")]
    NotFound,

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Validation failures the uploader can correct.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::TooLarge { .. } | Self::UnsupportedType(_) | Self::InvalidPath(_)
        )
    }
}

/// Raster image formats accepted by the buckets. The stored file extension
/// always comes from this type, never from the client's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageType {
    pub const ALL: [ImageType; 4] = [Self::Jpeg, Self::Png, Self::Gif, Self::Webp];

    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Type implied by the extension of a stored object path.
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// Access and validation rules for one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPolicy {
    pub public: bool,
    pub max_bytes: u64,
    pub allowed_types: Vec<ImageType>,
}

impl BucketPolicy {
    pub fn images(public: bool, max_bytes: u64) -> Self {
        Self {
            public,
            max_bytes,
            allowed_types: ImageType::ALL.to_vec(),
        }
    }

    /// The accepted image type for a declared content type, if any.
    pub fn accepts(&self, content_type: &str) -> Option<ImageType> {
        ImageType::from_mime(content_type).filter(|t| self.allowed_types.contains(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Created,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub path: String,
    pub url: String,
}

/// Filesystem-backed buckets under a single root directory.
pub struct ObjectStore {
    root: PathBuf,
    buckets: HashMap<String, BucketPolicy>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            buckets: HashMap::new(),
        }
    }

    /// Open the store and make sure the avatar, verification and post image
    /// buckets exist.
    pub async fn open(root: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self, StorageError> {
        let mut store = Self::new(root);
        let buckets = [
            (AVATARS, BucketPolicy::images(true, config.avatar_max_bytes)),
            (
                VERIFICATION_PHOTOS,
                BucketPolicy::images(false, config.verification_max_bytes),
            ),
            (POST_IMAGES, BucketPolicy::images(true, config.post_image_max_bytes)),
        ];
        for (name, policy) in buckets {
            let status = store.ensure_bucket(name, policy).await?;
            tracing::info!("Bucket {}: {:?}", name, status);
        }
        Ok(store)
    }

    pub async fn ensure_bucket(
        &mut self,
        name: &str,
        policy: BucketPolicy,
    ) -> Result<BucketStatus, StorageError> {
        validate_segment(name)?;
        let dir = self.root.join(name);
        let status = if tokio::fs::try_exists(&dir).await? {
            BucketStatus::Exists
        } else {
            tokio::fs::create_dir_all(&dir).await?;
            BucketStatus::Created
        };
        self.buckets.insert(name.to_string(), policy);
        Ok(status)
    }

    pub fn policy(&self, bucket: &str) -> Result<&BucketPolicy, StorageError> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StorageError::UnknownBucket(bucket.to_string()))
    }

    /// Store `bytes` at `{owner}/{unix_millis}-{file stem}.{ext}`, where the
    /// extension is derived from the accepted content type.
    pub async fn upload(
        &self,
        bucket: &str,
        owner: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredObject, StorageError> {
        validate_segment(owner)?;
        let image_type = self
            .policy(bucket)?
            .accepts(content_type)
            .ok_or_else(|| StorageError::UnsupportedType(content_type.to_string()))?;
        let path = format!(
            "{}/{}-{}.{}",
            owner,
            chrono::Utc::now().timestamp_millis(),
            file_stem(&sanitize_file_name(file_name)),
            image_type.extension()
        );
        self.put(bucket, &path, content_type, bytes).await
    }

    /// Write a new object at an exact path. Existing objects are never
    /// overwritten. The path extension must name the declared image type.
    pub async fn put(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredObject, StorageError> {
        let policy = self.policy(bucket)?;
        if bytes.len() as u64 > policy.max_bytes {
            return Err(StorageError::TooLarge {
                limit: policy.max_bytes,
            });
        }
        let declared = policy
            .accepts(content_type)
            .ok_or_else(|| StorageError::UnsupportedType(content_type.to_string()))?;
        if ImageType::from_path(path) != Some(declared) {
            return Err(StorageError::UnsupportedType(format!(
                "{} stored as {}",
                content_type, path
            )));
        }

        let full = self.object_path(bucket, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::info!("Stored {}/{} ({} bytes)", bucket, path, bytes.len());

        Ok(StoredObject {
            bucket: bucket.to_string(),
            path: path.to_string(),
            url: public_url(bucket, path),
        })
    }

    pub async fn read(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        self.policy(bucket)?;
        let full = self.object_path(bucket, path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, bucket: &str, path: &str) -> Result<(), StorageError> {
        self.policy(bucket)?;
        let full = self.object_path(bucket, path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Issue a single-use upload URL for a camera capture.
    pub fn create_signed_upload(
        &self,
        tokens: &mut UploadTokenStore,
        bucket: &str,
        owner: &str,
        original_name: &str,
    ) -> Result<SignedUpload, StorageError> {
        self.policy(bucket)?;
        validate_segment(owner)?;
        Ok(tokens.issue(bucket, owner, original_name))
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        validate_segment(bucket)?;
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

pub fn public_url(bucket: &str, path: &str) -> String {
    format!("/uploads/{}/{}", bucket, path)
}

/// Reduce a client-supplied file name to `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn validate_segment(segment: &str) -> Result<(), StorageError> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(segment.to_string()))
    }
}
