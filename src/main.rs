use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiosko::config::Config;
use kiosko::db::Database;
use kiosko::fetcher::Fetcher;
use kiosko::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiosko=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("KIOSKO_CONFIG").unwrap_or_else(|_| "kiosko.toml".to_string());
    let mut config = Config::load(&config_path)?;
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        config.database_url = database_url;
    }
    info!("Loaded configuration from {}", config_path);

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    let purged = db.delete_expired_tokens().await?;
    info!("Database initialized ({} expired sessions purged)", purged);

    let fetcher = Fetcher::new(&config.data_service)?;
    info!("Data service at {}", config.data_service.url);

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        db: Arc::new(db),
        fetcher: Arc::new(fetcher),
        config,
    });
    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Server starting on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
