//! Application state for the Billing API service.

use std::sync::Arc;

use tollgate_core::{LedgerEngine, PaymentProvider, WebhookReconciler};
use tollgate_db::{DbPool, PgLedgerStore};

use crate::config::Config;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Transactional ledger engine
    pub engine: Arc<LedgerEngine<PgLedgerStore>>,
    /// Webhook reconciler for the configured provider
    pub reconciler: Arc<WebhookReconciler<PgLedgerStore>>,
    /// Payment gateway, selected at startup
    pub provider: Arc<dyn PaymentProvider>,
    /// Primary pool (health checks)
    pub pool: DbPool,
    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        engine: Arc<LedgerEngine<PgLedgerStore>>,
        reconciler: WebhookReconciler<PgLedgerStore>,
        provider: Arc<dyn PaymentProvider>,
        pool: DbPool,
        config: Config,
    ) -> Self {
        Self {
            engine,
            reconciler: Arc::new(reconciler),
            provider,
            pool,
            config: Arc::new(config),
        }
    }

    /// Get request timeout from config
    pub fn request_timeout(&self) -> std::time::Duration {
        self.config.request_timeout
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
