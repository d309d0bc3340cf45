//! Shared test support

pub mod memory_store;

pub use memory_store::{FaultyStore, MemoryLedgerStore};

use tollgate_types::AccountIdentity;

/// Identity used across scenario tests
pub fn google_identity(external_id: &str) -> AccountIdentity {
    AccountIdentity::new("oauth:google", external_id)
}
