//! Configuration for the Billing API service.

use std::time::Duration;

use tollgate_core::{LedgerConfig, ProductConfig};

/// Billing API configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub http_port: u16,
    /// Primary database URL
    pub database_url: String,
    /// Optional read-replica URL
    pub database_read_url: Option<String>,
    /// Ledger engine configuration
    pub ledger: LedgerConfig,
    /// Selected payment gateway
    pub payment_provider: String,
    /// Stripe secret key
    pub stripe_secret_key: String,
    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Metrics enabled
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let database_read_url = std::env::var("DATABASE_READ_URL").ok();

        let http_port = std::env::var("HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("HTTP_PORT"))?;

        let payment_provider =
            std::env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "stripe".to_string());
        if payment_provider != "stripe" {
            return Err(ConfigError::Invalid("PAYMENT_PROVIDER"));
        }

        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?;
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))?;

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("REQUEST_TIMEOUT_SECS"))?;

        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let ledger = LedgerConfig {
            free_uses_per_account: parse_env("FREE_USES_PER_ACCOUNT", 3)?,
            daily_free_uses_limit: parse_env("DAILY_FREE_USES_LIMIT", 0)?,
            paid_uses_per_purchase: parse_env("PAID_USES_PER_PURCHASE", 50)?,
            price_per_purchase_minor: parse_env("PRICE_PER_PURCHASE_MINOR", 500)?,
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string()),
            enforce_minor_balance: std::env::var("ENFORCE_MINOR_BALANCE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            products: Default::default(),
        }
        .with_product(
            "web_search",
            ProductConfig {
                free_initial: parse_env_i32("PRODUCT_WEB_SEARCH_FREE_INITIAL", 0)?,
                free_daily: parse_env_i32("PRODUCT_WEB_SEARCH_FREE_DAILY", 0)?,
                price_minor: parse_env_i32("PRODUCT_WEB_SEARCH_PRICE_MINOR", 100)?,
            },
        );

        Ok(Self {
            http_port,
            database_url,
            database_read_url,
            ledger,
            payment_provider,
            stripe_secret_key,
            stripe_webhook_secret,
            request_timeout: Duration::from_secs(request_timeout_secs),
            metrics_enabled,
        })
    }
}

fn parse_env(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn parse_env_i32(name: &'static str, default: i32) -> Result<i32, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
