use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mpesa_stk::config::{AppConfig, StoreBackend};
use mpesa_stk::database::{mongo::get_db_client, MemoryPaymentStore, MongoPaymentStore, PaymentStore};
use mpesa_stk::services::mpesa_service::MpesaService;
use mpesa_stk::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    tracing::info!("✅ App config loaded: {}", config.get_config_info());

    let store = initialize_store(&config).await?;
    let mpesa_service = MpesaService::new(config.clone()).context("failed to build HTTP client")?;

    // Credentials are checked eagerly so a bad key shows up at boot rather
    // than on the first payment.
    match mpesa_service.get_access_token().await {
        Ok(_) => tracing::info!("✅ M-Pesa access token obtained"),
        Err(e) => tracing::warn!("⚠️ Could not obtain M-Pesa access token yet: {}", e),
    }

    let app_state = AppState::new(
        Arc::new(mpesa_service),
        store,
        config.mpesa_callback_url.clone(),
    );
    let app = build_router(app_state);

    start_server(app, &config).await
}

async fn initialize_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentStore>> {
    match config.store_backend {
        StoreBackend::Mongo => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let db = get_db_client(database_url, &config.database_name)
                .await
                .context("failed to connect to MongoDB")?;
            let store = MongoPaymentStore::new(&db)
                .await
                .context("failed to prepare payments collection")?;
            tracing::info!("🗄️ Using MongoDB payment store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            let store = MemoryPaymentStore::new(config.pending_ttl);
            let sweep_every = (config.pending_ttl / 5).max(Duration::from_secs(1));
            store.spawn_sweeper(sweep_every);
            tracing::info!(
                "🧠 Using in-memory payment store (ttl {}s)",
                config.pending_ttl.as_secs()
            );
            Ok(Arc::new(store))
        }
    }
}

async fn start_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    tracing::info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
