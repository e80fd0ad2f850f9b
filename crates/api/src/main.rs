use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use domain::services::MultiStore;
use domain::store::{InMemoryStore, Store};

mod app;
mod config;
mod error;
mod middleware;
mod routes;

async fn build_store(db: &config::DatabaseConfig) -> Result<Arc<dyn Store>> {
    let pool_config = persistence::db::DatabaseConfig {
        url: db.url.clone(),
        max_connections: db.max_connections,
        min_connections: db.min_connections,
        connect_timeout_secs: db.connect_timeout_secs,
        idle_timeout_secs: db.idle_timeout_secs,
    };

    match db.backend.as_str() {
        "postgres" => {
            let pool = persistence::db::create_pg_pool(&pool_config).await?;
            info!("Running PostgreSQL migrations...");
            sqlx::migrate!("../persistence/src/migrations/postgres")
                .run(&pool)
                .await?;
            Ok(Arc::new(persistence::PgStore::new(pool)))
        }
        "mysql" => {
            let pool = persistence::db::create_mysql_pool(&pool_config).await?;
            info!("Running MySQL migrations...");
            sqlx::migrate!("../persistence/src/migrations/mysql")
                .run(&pool)
                .await?;
            Ok(Arc::new(persistence::MySqlStore::new(pool)))
        }
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        other => anyhow::bail!("unknown database backend {other:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = config::Config::load()?;

    // Initialize logging
    middleware::logging::init_logging(&config.logging);

    // Initialize Prometheus metrics
    middleware::metrics::init_metrics();

    info!("Starting Aspen MDM v{}", env!("CARGO_PKG_VERSION"));

    // Build the storage backend, optionally fronted by the migration router
    let mut store = build_store(&config.database).await?;
    if !config.storage_router.backends.is_empty() {
        let mut router = MultiStore::new(config.storage_router.param.clone(), store);
        for (name, named) in &config.storage_router.backends {
            let backend = build_store(&config::DatabaseConfig {
                backend: named.backend.clone(),
                url: named.url.clone(),
                ..config.database.clone()
            })
            .await?;
            info!(name = %name, backend = %named.backend, "Registered secondary storage backend");
            router = router.with_backend(name.clone(), backend);
        }
        store = Arc::new(router);
    }

    // Build application
    let addr = config.socket_addr()?;
    let app = app::create_app(config, store);

    // Start server
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Handle shutdown gracefully
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
