// =============================================================================
// ORDER SERVICE - Main Entry Point
// =============================================================================
// Loads configuration, picks the backing store and serves the API.
//
// STORES:
// - DATABASE_URL set:   PostgreSQL (migrations run at startup)
// - DATABASE_URL unset: in-memory store seeded with sample products; data is
//                       lost on restart
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use order_service::cache::FlashSaleCache;
use order_service::config::Config;
use order_service::metrics::setup_metrics;
use order_service::notify::LogNotifier;
use order_service::store::{MemoryStore, PgStore, Store};
use order_service::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Environment and logging
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,order_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Order Service...");

    let config = Config::from_env()?;
    info!(port = config.port, "Configuration loaded");

    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 2: Store
    // -------------------------------------------------------------------------
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.db_max_connections).await?;
            info!("Connected to PostgreSQL");
            pg.run_migrations().await?;
            info!("Database migrations completed");
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store with sample products");
            let memory = MemoryStore::new();
            let seeded = memory.seed_sample_products()?;
            info!(products = seeded.len(), "Sample products seeded");
            Arc::new(memory)
        }
    };

    // -------------------------------------------------------------------------
    // STEP 3: Optional Redis cache
    // -------------------------------------------------------------------------
    let cache = match &config.redis_url {
        Some(url) => match FlashSaleCache::connect(url, config.flash_sale_cache_ttl_secs).await {
            Ok(cache) => {
                info!("Connected to Redis");
                cache
            }
            Err(err) => {
                warn!(error = %err, "Redis unavailable; flash sale cache disabled");
                FlashSaleCache::disabled()
            }
        },
        None => FlashSaleCache::disabled(),
    };

    // -------------------------------------------------------------------------
    // STEP 4: Serve
    // -------------------------------------------------------------------------
    let state = Arc::new(AppState::new(
        store,
        cache,
        Arc::new(LogNotifier),
        Some(metrics_handle),
    ));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Order Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
