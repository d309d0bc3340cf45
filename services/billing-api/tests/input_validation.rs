//! Input validation tests
//!
//! Tests for the identity and idempotency-key validation that gates every
//! billing-api request body.

use tollgate_types::{
    validate_idempotency_key, AccountIdentity, IdentityError, MAX_IDEMPOTENCY_KEY_LEN,
    MAX_IDENTITY_LEN,
};

fn identity(provider: &str, external_id: &str) -> AccountIdentity {
    AccountIdentity::new(provider, external_id)
}

// ============================================================================
// Valid Identities
// ============================================================================

#[test]
fn test_valid_simple_identity() {
    assert!(identity("oauth:google", "u1").validate().is_ok());
}

#[test]
fn test_valid_identity_with_optionals() {
    let mut id = identity("oauth:discord", "user-123");
    id.wa_id = Some("wa-9".to_string());
    id.tenant_id = Some("tenant-1".to_string());
    assert!(id.validate().is_ok());
}

#[test]
fn test_valid_max_length_external_id() {
    let id = identity("oauth:google", &"x".repeat(MAX_IDENTITY_LEN));
    assert!(id.validate().is_ok());
}

// ============================================================================
// Invalid Identities - Security Boundary Tests
// ============================================================================

#[test]
fn test_invalid_provider_without_prefix() {
    assert!(matches!(
        identity("google", "u1").validate(),
        Err(IdentityError::BadProvider(_))
    ));
}

#[test]
fn test_invalid_provider_with_empty_suffix() {
    assert!(matches!(
        identity("oauth:", "u1").validate(),
        Err(IdentityError::BadProvider(_))
    ));
}

#[test]
fn test_invalid_provider_case_sensitive_prefix() {
    assert!(identity("OAuth:google", "u1").validate().is_err());
}

#[test]
fn test_invalid_empty_external_id() {
    assert_eq!(
        identity("oauth:google", "").validate(),
        Err(IdentityError::EmptyExternalId)
    );
}

#[test]
fn test_invalid_oversize_external_id() {
    let id = identity("oauth:google", &"x".repeat(MAX_IDENTITY_LEN + 1));
    assert_eq!(id.validate(), Err(IdentityError::TooLong("external_id")));
}

#[test]
fn test_invalid_oversize_tenant_id() {
    let mut id = identity("oauth:google", "u1");
    id.tenant_id = Some("t".repeat(MAX_IDENTITY_LEN + 1));
    assert_eq!(id.validate(), Err(IdentityError::TooLong("tenant_id")));
}

// ============================================================================
// Idempotency Keys
// ============================================================================

#[test]
fn test_valid_idempotency_keys() {
    assert!(validate_idempotency_key("c1").is_ok());
    assert!(validate_idempotency_key("stripe-pi_3OaQ2jK").is_ok());
    assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN)).is_ok());
}

#[test]
fn test_invalid_empty_idempotency_key() {
    assert!(validate_idempotency_key("").is_err());
}

#[test]
fn test_invalid_oversize_idempotency_key() {
    assert!(validate_idempotency_key(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
}
