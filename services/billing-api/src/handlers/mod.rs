//! Request handlers

pub mod accounts;
pub mod charges;
pub mod credits;
pub mod health;
pub mod purchases;
pub mod shared;
pub mod tools;
pub mod webhook;

pub use accounts::{get_account, upsert_account};
pub use charges::create_charge;
pub use credits::{add_credits, check_credit};
pub use health::health;
pub use purchases::{create_purchase, get_purchase_status};
pub use tools::charge_tool;
pub use webhook::provider_webhook;

use serde::Deserialize;
use tollgate_types::{AccountIdentity, AccountProfile};

/// Identity triple present in every request body
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityParams {
    pub oauth_provider: String,
    pub external_id: String,
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl IdentityParams {
    /// Convert to the domain identity
    pub fn into_identity(self) -> AccountIdentity {
        AccountIdentity {
            oauth_provider: self.oauth_provider,
            external_id: self.external_id,
            wa_id: self.wa_id,
            tenant_id: self.tenant_id,
        }
    }
}

/// Optional profile fields callers may attach
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileParams {
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: bool,
    #[serde(default)]
    pub marketing_opt_in_source: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl ProfileParams {
    /// Convert to the domain profile
    pub fn into_profile(self) -> AccountProfile {
        AccountProfile {
            customer_email: self.customer_email,
            display_name: self.display_name,
            marketing_opt_in: self.marketing_opt_in,
            marketing_opt_in_source: self.marketing_opt_in_source,
            user_role: self.user_role,
            agent_id: self.agent_id,
        }
    }
}
