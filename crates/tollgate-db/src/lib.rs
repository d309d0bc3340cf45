//! Tollgate DB - Ledger store
//!
//! Durable persistence for accounts, charges, credits, credit checks,
//! product inventory, and payment records. The store is the single source of
//! truth; CHECK constraints in the migrations are the second line of defence
//! behind the engine's own verification.

pub mod error;
pub mod models;
pub mod pg;
pub mod pool;
pub mod store;

pub use error::{DbError, DbResult};
pub use models::*;
pub use pg::PgLedgerStore;
pub use pool::{create_pool, DbPool, PoolSettings};
pub use store::*;

/// Embedded migrations for the ledger schema
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
