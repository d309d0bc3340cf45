//! Ledger configuration

use std::collections::HashMap;

/// Per-product pool seeds and pricing
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductConfig {
    /// Free credits granted when the inventory row is created
    pub free_initial: i32,
    /// Free credits added on each daily refresh
    pub free_daily: i32,
    /// Cost of one paid product use, in minor units
    pub price_minor: i32,
}

/// Ledger engine configuration, read once at startup
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Free uses seeded into new accounts
    pub free_uses_per_account: i64,
    /// Daily free pool size; 0 disables the pool
    pub daily_free_uses_limit: i64,
    /// Credits delivered per successful purchase
    pub paid_uses_per_purchase: i64,
    /// Purchase intent amount in minor units
    pub price_per_purchase_minor: i64,
    /// Currency for new accounts
    pub default_currency: String,
    /// Also verify `balance_minor` is untouched during write verification
    pub enforce_minor_balance: bool,
    /// Product inventory configuration by product type
    pub products: HashMap<String, ProductConfig>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let mut products = HashMap::new();
        products.insert(
            "web_search".to_string(),
            ProductConfig {
                free_initial: 0,
                free_daily: 0,
                price_minor: 100,
            },
        );
        Self {
            free_uses_per_account: 3,
            daily_free_uses_limit: 0,
            paid_uses_per_purchase: 50,
            price_per_purchase_minor: 500,
            default_currency: "USD".to_string(),
            enforce_minor_balance: true,
            products,
        }
    }
}

impl LedgerConfig {
    /// Register a product configuration
    pub fn with_product(mut self, product_type: impl Into<String>, config: ProductConfig) -> Self {
        self.products.insert(product_type.into(), config);
        self
    }

    /// Configuration for a product type
    ///
    /// Product types are free-form; unconfigured ones get no free seeds and
    /// their paid uses are priced at zero.
    pub fn product(&self, product_type: &str) -> ProductConfig {
        self.products
            .get(product_type)
            .copied()
            .unwrap_or_default()
    }

    /// Hint attached to exhaustion denials
    pub fn purchase_hint(&self) -> tollgate_types::PurchaseHint {
        tollgate_types::PurchaseHint {
            price_minor: self.price_per_purchase_minor,
            uses: self.paid_uses_per_purchase,
        }
    }
}
