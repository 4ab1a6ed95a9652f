//! Key Store Service - Main Application Entry Point
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables (stops on an unsupported log level)
//! 2. Initialize logging
//! 3. Create database connection pool; statements are logged through the severity bridge
//! 4. Build HTTP router
//! 5. Start server on configured bind address and port

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use tsg_key_store::{
    config::Config,
    db::{self, postgres::PgKeyDb},
    handlers, logging,
    services::key_store::KeyStore,
    severity::DbLog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    logging::init_logging(&config.log);
    tracing::info!(db = ?config.db, "Configuration loaded");

    let db_log = DbLog::for_severity(config.log.level);
    let pool = db::create_pool(&config.db).await?;
    tracing::info!(module = "db", client_level = ?db_log.level(), "Database pool created");

    let store = KeyStore::new(Arc::new(PgKeyDb::new(pool, db_log)));

    let app = handlers::router(store).layer(TraceLayer::new_for_http());

    let addr = config.http.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(module = "http", "Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
