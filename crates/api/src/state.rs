//! Shared application state for the Axum API server.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_notifier::dispatcher::{Dispatcher, DispatcherConfig};
use herald_notifier::provider::PushProvider;
use herald_notifier::reconciler::ReceiptReconciler;
use herald_notifier::registry::TokenRegistry;
use herald_notifier::store::NotificationStore;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub registry: TokenRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: ReceiptReconciler,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        provider: Arc<dyn PushProvider>,
        config: AppConfig,
    ) -> Self {
        let reconciler = ReceiptReconciler::new(
            store.clone(),
            provider.clone(),
            Duration::from_secs(config.receipt_check_delay_secs),
        );
        let dispatcher = Dispatcher::new(
            store.clone(),
            provider,
            reconciler.clone(),
            DispatcherConfig::from(&config),
        );

        Self {
            registry: TokenRegistry::new(store.clone()),
            store,
            dispatcher: Arc::new(dispatcher),
            reconciler,
            config,
        }
    }
}
