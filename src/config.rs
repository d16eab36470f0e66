use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "coffee", about = "A community posting board with admin-gated membership")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Email address that is approved and made admin on first sign-in
    #[arg(long, env = "COFFEE_ADMIN_EMAIL")]
    pub admin_email: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub moderation: ModerationConfig,
    pub debug: DebugConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub avatar_max_bytes: u64,
    pub verification_max_bytes: u64,
    pub post_image_max_bytes: u64,
    pub signed_upload_ttl_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    pub min_password_len: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ModerationConfig {
    pub admin_email: Option<String>,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DebugConfig {
    /// Mounts `/api/debug/*`, which exposes session and permission state.
    pub endpoints: bool,
}

const MIB: u64 = 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            avatar_max_bytes: 5 * MIB,
            verification_max_bytes: 10 * MIB,
            post_image_max_bytes: 5 * MIB,
            signed_upload_ttl_secs: 600,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "coffee_session".to_string(),
            session_hours: 720,
            min_password_len: 8,
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            admin_email: None,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref email) = cli.admin_email {
            config.moderation.admin_email = Some(email.trim().to_string());
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("coffee.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Anything reported here is fatal.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.auth.cookie_name.trim().is_empty() {
            anyhow::bail!("auth.cookie_name must not be empty");
        }
        if self.auth.session_hours == 0 {
            anyhow::bail!("auth.session_hours must be non-zero");
        }
        let limits = [
            ("storage.avatar_max_bytes", self.storage.avatar_max_bytes),
            (
                "storage.verification_max_bytes",
                self.storage.verification_max_bytes,
            ),
            ("storage.post_image_max_bytes", self.storage.post_image_max_bytes),
        ];
        for (name, limit) in limits {
            if limit == 0 {
                anyhow::bail!("{} must be non-zero", name);
            }
        }
        if self.moderation.retry_attempts == 0 {
            anyhow::bail!("moderation.retry_attempts must be at least 1");
        }
        if let Some(ref email) = self.moderation.admin_email {
            if !email.contains('@') {
                anyhow::bail!("moderation.admin_email is not an email address: {}", email);
            }
        }
        Ok(())
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".coffee")
        })
    }

    pub fn db_path(&self) -> Option<&PathBuf> {
        self.database.path.as_ref()
    }

    pub fn uploads_path(&self) -> Option<&PathBuf> {
        self.storage.path.as_ref()
    }

    /// Largest request body any route has to accept: a post with six photos
    /// plus form fields.
    pub fn max_body_bytes(&self) -> usize {
        let largest = self
            .storage
            .post_image_max_bytes
            .saturating_mul(6)
            .max(self.storage.verification_max_bytes)
            .max(self.storage.avatar_max_bytes);
        (largest + MIB) as usize
    }
}
