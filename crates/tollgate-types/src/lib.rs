//! Tollgate Types - Shared domain types
//!
//! This crate contains domain types used across Tollgate crates:
//! - Account identity, ids, and lifecycle status
//! - Ledger ids, transaction kinds, and charge metadata
//! - Payment record status

pub mod account;
pub mod ledger;
pub mod payment;

pub use account::*;
pub use ledger::*;
pub use payment::*;
