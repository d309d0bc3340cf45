//! Account identity and lifecycle types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Create a new random account ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an account ID from a string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Required prefix on the identity provider string
pub const OAUTH_PROVIDER_PREFIX: &str = "oauth:";

/// Maximum length accepted for any identity component
pub const MAX_IDENTITY_LEN: usize = 255;

/// Composite account identity
///
/// Accounts are keyed by `(oauth_provider, external_id)`; `wa_id` and
/// `tenant_id` are optional qualifiers carried through to the ledger but not
/// used for lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountIdentity {
    /// Identity provider, shaped `oauth:<name>`
    pub oauth_provider: String,
    /// Provider-scoped external user id
    pub external_id: String,
    /// Optional messaging-channel id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wa_id: Option<String>,
    /// Optional tenant qualifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl AccountIdentity {
    /// Create an identity from the required pair
    pub fn new(oauth_provider: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            oauth_provider: oauth_provider.into(),
            external_id: external_id.into(),
            wa_id: None,
            tenant_id: None,
        }
    }

    /// Validate the identity shape
    ///
    /// The provider must carry the `oauth:` prefix with a non-empty suffix,
    /// the external id must be non-empty, and every component must fit the
    /// column bounds.
    pub fn validate(&self) -> Result<(), IdentityError> {
        let suffix = self
            .oauth_provider
            .strip_prefix(OAUTH_PROVIDER_PREFIX)
            .ok_or_else(|| IdentityError::BadProvider(self.oauth_provider.clone()))?;
        if suffix.is_empty() {
            return Err(IdentityError::BadProvider(self.oauth_provider.clone()));
        }
        if self.external_id.is_empty() {
            return Err(IdentityError::EmptyExternalId);
        }
        for (field, value) in [
            ("oauth_provider", Some(&self.oauth_provider)),
            ("external_id", Some(&self.external_id)),
            ("wa_id", self.wa_id.as_ref()),
            ("tenant_id", self.tenant_id.as_ref()),
        ] {
            if let Some(value) = value {
                if value.len() > MAX_IDENTITY_LEN {
                    return Err(IdentityError::TooLong(field));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.oauth_provider, self.external_id)
    }
}

/// Identity shape violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Provider string is not `oauth:<name>`
    #[error("oauth_provider must be shaped \"oauth:<name>\", got {0:?}")]
    BadProvider(String),

    /// External id is empty
    #[error("external_id must be non-empty")]
    EmptyExternalId,

    /// A component exceeds the column bound
    #[error("{0} exceeds {MAX_IDENTITY_LEN} characters")]
    TooLong(&'static str),
}

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Account may be charged
    Active,
    /// Charges refused, credits accepted
    Suspended,
    /// Charges refused, credits accepted
    Closed,
}

impl AccountStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional profile fields propagated from callers
///
/// These carry no behavioural meaning in the ledger; they are persisted when
/// first supplied and never overwritten with absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing_opt_in_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl AccountProfile {
    /// Whether any field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.customer_email.is_none()
            && self.display_name.is_none()
            && !self.marketing_opt_in
            && self.marketing_opt_in_source.is_none()
            && self.user_role.is_none()
            && self.agent_id.is_none()
    }
}
