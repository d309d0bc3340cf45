//! Credit-check audit log
//!
//! Every authorisation decision is appended asynchronously. The log is never
//! read by the engine; write failures must not fail the parent operation.

use std::sync::Arc;

use tollgate_db::{LedgerStore, NewCreditCheck};

/// Append an authorisation decision without blocking the caller
pub fn spawn_credit_check_append<S: LedgerStore>(store: Arc<S>, check: NewCreditCheck) {
    tokio::spawn(async move {
        if let Err(err) = store.insert_credit_check(check).await {
            tracing::warn!(error = %err, "credit check audit append failed");
        }
    });
}
