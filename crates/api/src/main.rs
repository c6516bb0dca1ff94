//! Herald API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::{create_pool, run_migrations};
use herald_common::redis_pool::create_redis_pool;
use herald_notifier::expo::ExpoClient;
use herald_notifier::lease::{Lease, ReconcilerLease};
use herald_notifier::reconciler::ReceiptReconciler;
use herald_notifier::store::PgNotificationStore;

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("herald_api=debug,herald_notifier=debug,tower_http=debug")
    });
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Herald API server...");

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let poll_interval = Duration::from_secs(config.receipt_poll_interval_secs.max(1));
    let lease: Option<Box<dyn Lease>> = match &config.redis_url {
        Some(url) => match create_redis_pool(url).await {
            Ok(redis) => {
                let ttl = ReceiptReconciler::lease_ttl(poll_interval);
                Some(Box::new(ReconcilerLease::new(redis, ttl)) as Box<dyn Lease>)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, reconciling receipts without a lease");
                None
            }
        },
        None => None,
    };

    let provider = ExpoClient::new(&config.expo_api_url, config.expo_access_token.clone())?;
    let store = PgNotificationStore::new(pool);
    let http_port = config.http_port;
    let state = AppState::new(Arc::new(store), Arc::new(provider), config);

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let reconciler = state.reconciler.clone();
    let reconciler_task = tokio::spawn(async move {
        let stopped = async move {
            let _ = stop_rx.changed().await;
        };
        reconciler.run(poll_interval, lease, stopped).await;
    });

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the reconciler finish its tick and release the lease
    let _ = stop_tx.send(true);
    if let Err(e) = reconciler_task.await {
        tracing::error!(error = %e, "Receipt reconciler task failed");
    }
    tracing::info!("Herald API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
