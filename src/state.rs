use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::Mutex;

use crate::auth::identity::{DynIdentityProvider, SqliteIdentityProvider};
use crate::config::Config;
use crate::moderation::repository::SqliteUserRepository;
use crate::moderation::ModerationService;
use crate::retry::RetryPolicy;
use crate::storage::{ObjectStore, UploadTokenStore};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub identity: DynIdentityProvider,
    pub moderation: Arc<ModerationService>,
    pub storage: Arc<ObjectStore>,
    pub upload_tokens: Arc<Mutex<UploadTokenStore>>,
}

impl AppState {
    /// Wire the SQLite-backed services around an opened pool and store.
    pub fn new(db: DbPool, config: Config, storage: ObjectStore, identity: SqliteIdentityProvider) -> Self {
        let identity: DynIdentityProvider = Arc::new(identity);
        let users = Arc::new(SqliteUserRepository::new(db.clone()));
        let moderation = ModerationService::new(
            users,
            identity.clone(),
            RetryPolicy::from(&config.moderation),
            config.moderation.admin_email.clone(),
        );
        let upload_tokens =
            UploadTokenStore::new(Duration::from_secs(config.storage.signed_upload_ttl_secs));

        Self {
            db,
            identity,
            moderation: Arc::new(moderation),
            storage: Arc::new(storage),
            upload_tokens: Arc::new(Mutex::new(upload_tokens)),
            config,
        }
    }
}
