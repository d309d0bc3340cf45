//! Credit policy
//!
//! Pure decision functions: whether a principal may be served, and which
//! pool absorbs a charge. The engine applies these inside its transactions;
//! keeping them free of I/O makes the pool arithmetic property-testable.

use chrono::{DateTime, Utc};
use tollgate_types::{AccountStatus, PoolKind};

/// Main account pools as read under the row lock
///
/// `daily_free_uses_remaining` is the post-reset value when a reset is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainPools {
    pub daily_free_uses_remaining: i64,
    pub free_uses_remaining: i64,
    pub paid_credits: i64,
}

/// Why an authorisation was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    AccountSuspended,
    AccountClosed,
    NoCreditsRemaining,
}

impl DenialReason {
    /// Caller-facing message
    pub const fn message(&self) -> &'static str {
        match self {
            Self::AccountSuspended => "Account suspended",
            Self::AccountClosed => "Account closed",
            Self::NoCreditsRemaining => "No free uses or credits remaining",
        }
    }
}

/// Authorisation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Pool that would serve the next charge
    pub pool: PoolKind,
    pub reason: Option<DenialReason>,
}

/// Decide whether a principal may be served
pub fn authorize(status: AccountStatus, pools: MainPools) -> Decision {
    match status {
        AccountStatus::Suspended => Decision {
            allowed: false,
            pool: PoolKind::None,
            reason: Some(DenialReason::AccountSuspended),
        },
        AccountStatus::Closed => Decision {
            allowed: false,
            pool: PoolKind::None,
            reason: Some(DenialReason::AccountClosed),
        },
        AccountStatus::Active => {
            if pools.daily_free_uses_remaining > 0 || pools.free_uses_remaining > 0 {
                Decision {
                    allowed: true,
                    pool: PoolKind::Free,
                    reason: None,
                }
            } else if pools.paid_credits > 0 {
                Decision {
                    allowed: true,
                    pool: PoolKind::Paid,
                    reason: None,
                }
            } else {
                Decision {
                    allowed: false,
                    pool: PoolKind::None,
                    reason: Some(DenialReason::NoCreditsRemaining),
                }
            }
        }
    }
}

/// Pool selected for a main-pool charge
///
/// Priority is daily free, then one-time free, then paid. Free pools are
/// consumed one per charge; paid credits by the supplied amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSelection {
    /// Consume one daily free use, other pools untouched
    DailyFree,
    /// Consume one one-time free use, paid credits untouched
    FreeUse,
    /// Deduct `amount_minor` from paid credits
    PaidCredits,
    /// No pool can cover the charge
    Denied,
}

/// Select the pool for a main-pool charge
pub fn select_main_pool(pools: MainPools, amount_minor: i64) -> PoolSelection {
    if pools.daily_free_uses_remaining >= 1 {
        PoolSelection::DailyFree
    } else if pools.free_uses_remaining >= 1 {
        PoolSelection::FreeUse
    } else if pools.paid_credits >= amount_minor {
        PoolSelection::PaidCredits
    } else {
        PoolSelection::Denied
    }
}

/// Whether the account daily pool is due its reset
///
/// A NULL reset instant means the pool has never been reset.
pub fn daily_reset_due(reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match reset_at {
        None => true,
        Some(at) => now >= at,
    }
}

/// The next daily reset instant: midnight UTC after `now`
pub fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + chrono::Days::new(1))
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

/// Product pools plus the main-pool fallback balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductPools {
    pub free_remaining: i32,
    pub paid_credits: i32,
    pub main_paid_credits: i64,
}

/// Pool selected for a product charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductPoolSelection {
    /// Consume one product free credit
    ProductFree,
    /// Consume one product paid credit at the product's price
    ProductPaid,
    /// Fall back to the main pool, deducting the caller's amount
    MainPool,
    /// Nothing can cover the charge
    Denied,
}

/// Select the pool for a product charge
pub fn select_product_pool(pools: ProductPools, amount_minor: i64) -> ProductPoolSelection {
    if pools.free_remaining > 0 {
        ProductPoolSelection::ProductFree
    } else if pools.paid_credits > 0 {
        ProductPoolSelection::ProductPaid
    } else if pools.main_paid_credits >= amount_minor {
        ProductPoolSelection::MainPool
    } else {
        ProductPoolSelection::Denied
    }
}

/// Whether the product free pool is due its daily refresh (UTC date change)
pub fn needs_daily_refresh(last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_refresh {
        None => true,
        Some(last) => now.date_naive() > last.date_naive(),
    }
}

/// Refreshed free balance, capped at one day's worth above the initial grant
pub fn refreshed_free(current: i32, free_daily: i32, free_initial: i32) -> i32 {
    (current + free_daily).min(free_initial + free_daily)
}
