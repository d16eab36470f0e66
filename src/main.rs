use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use coffee::auth::SqliteIdentityProvider;
use coffee::config::{Cli, Config};
use coffee::db;
use coffee::routes;
use coffee::state::AppState;
use coffee::storage::ObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    let db_path = config.db_path().context("database.path is not set")?;
    let uploads_path = config.uploads_path().context("storage.path is not set")?;

    // Initialize database
    let pool = db::create_pool(db_path)?;
    db::run_migrations(&pool)?;

    // Buckets
    let storage = ObjectStore::open(uploads_path.clone(), &config.storage).await?;

    match config.moderation.admin_email {
        Some(ref email) => tracing::info!("Auto-approving admin account {}", email),
        None => tracing::info!("No admin email configured; approve the first admin by hand"),
    }

    let identity = SqliteIdentityProvider::new(pool.clone(), config.auth.min_password_len);
    let state = AppState::new(pool, config.clone(), storage, identity);
    let app = routes::build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
