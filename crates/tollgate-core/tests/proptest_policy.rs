//! Property tests for the credit policy
//!
//! The pool arithmetic must never drive a balance negative, free pools must
//! shield paid pools, and the authorisation decision must agree with pool
//! selection.

use proptest::prelude::*;

use tollgate_core::policy::{
    authorize, refreshed_free, select_main_pool, select_product_pool, MainPools, PoolSelection,
    ProductPoolSelection, ProductPools,
};
use tollgate_types::{AccountStatus, PoolKind};

fn apply_main(pools: MainPools, amount: i64) -> Option<MainPools> {
    match select_main_pool(pools, amount) {
        PoolSelection::DailyFree => Some(MainPools {
            daily_free_uses_remaining: pools.daily_free_uses_remaining - 1,
            ..pools
        }),
        PoolSelection::FreeUse => Some(MainPools {
            free_uses_remaining: pools.free_uses_remaining - 1,
            ..pools
        }),
        PoolSelection::PaidCredits => Some(MainPools {
            paid_credits: pools.paid_credits - amount,
            ..pools
        }),
        PoolSelection::Denied => None,
    }
}

proptest! {
    #[test]
    fn main_pool_never_goes_negative(
        daily in 0i64..10,
        free in 0i64..1000,
        paid in 0i64..1_000_000,
        amount in 1i64..1_000_000,
    ) {
        let pools = MainPools {
            daily_free_uses_remaining: daily,
            free_uses_remaining: free,
            paid_credits: paid,
        };
        if let Some(after) = apply_main(pools, amount) {
            prop_assert!(after.daily_free_uses_remaining >= 0);
            prop_assert!(after.free_uses_remaining >= 0);
            prop_assert!(after.paid_credits >= 0);
        }
    }

    #[test]
    fn daily_pool_always_shields_the_other_pools(
        daily in 1i64..10,
        free in 0i64..1000,
        paid in 0i64..1_000_000,
        amount in 1i64..1_000_000,
    ) {
        let pools = MainPools {
            daily_free_uses_remaining: daily,
            free_uses_remaining: free,
            paid_credits: paid,
        };
        let after = apply_main(pools, amount).expect("daily pool must serve");
        prop_assert_eq!(after.daily_free_uses_remaining, daily - 1);
        prop_assert_eq!(after.free_uses_remaining, free);
        prop_assert_eq!(after.paid_credits, paid);
    }

    #[test]
    fn free_pool_always_shields_paid_credits(
        free in 1i64..1000,
        paid in 0i64..1_000_000,
        amount in 1i64..1_000_000,
    ) {
        let pools = MainPools {
            daily_free_uses_remaining: 0,
            free_uses_remaining: free,
            paid_credits: paid,
        };
        let after = apply_main(pools, amount).expect("free pool must serve");
        prop_assert_eq!(after.paid_credits, paid);
        prop_assert_eq!(after.free_uses_remaining, free - 1);
    }

    #[test]
    fn denial_happens_exactly_when_no_pool_covers(
        daily in 0i64..3,
        free in 0i64..3,
        paid in 0i64..200,
        amount in 1i64..200,
    ) {
        let pools = MainPools {
            daily_free_uses_remaining: daily,
            free_uses_remaining: free,
            paid_credits: paid,
        };
        let denied = matches!(select_main_pool(pools, amount), PoolSelection::Denied);
        prop_assert_eq!(denied, daily == 0 && free == 0 && paid < amount);
    }

    #[test]
    fn authorization_agrees_with_pool_availability(
        daily in 0i64..10,
        free in 0i64..10,
        paid in 0i64..10,
    ) {
        let pools = MainPools {
            daily_free_uses_remaining: daily,
            free_uses_remaining: free,
            paid_credits: paid,
        };
        let decision = authorize(AccountStatus::Active, pools);
        prop_assert_eq!(decision.allowed, daily > 0 || free > 0 || paid > 0);
        match decision.pool {
            PoolKind::Free => prop_assert!(daily > 0 || free > 0),
            PoolKind::Paid => prop_assert!(daily == 0 && free == 0 && paid > 0),
            PoolKind::None => prop_assert!(daily == 0 && free == 0 && paid == 0),
        }
    }

    #[test]
    fn non_active_status_is_always_denied(
        free in 0i64..10,
        paid in 0i64..10,
        suspended in proptest::bool::ANY,
    ) {
        let status = if suspended { AccountStatus::Suspended } else { AccountStatus::Closed };
        let pools = MainPools {
            daily_free_uses_remaining: 0,
            free_uses_remaining: free,
            paid_credits: paid,
        };
        let decision = authorize(status, pools);
        prop_assert!(!decision.allowed);
        prop_assert_eq!(decision.pool, PoolKind::None);
    }

    #[test]
    fn product_pools_drain_in_order_and_stay_non_negative(
        free in 0i32..5,
        paid in 0i32..5,
        main in 0i64..100,
        amount in 1i64..100,
    ) {
        let pools = ProductPools {
            free_remaining: free,
            paid_credits: paid,
            main_paid_credits: main,
        };
        match select_product_pool(pools, amount) {
            ProductPoolSelection::ProductFree => {
                prop_assert!(free > 0);
                prop_assert!(free - 1 >= 0);
            }
            ProductPoolSelection::ProductPaid => {
                prop_assert!(free == 0 && paid > 0);
                prop_assert!(paid - 1 >= 0);
            }
            ProductPoolSelection::MainPool => {
                prop_assert!(free == 0 && paid == 0);
                prop_assert!(main - amount >= 0);
            }
            ProductPoolSelection::Denied => {
                prop_assert!(free == 0 && paid == 0 && main < amount);
            }
        }
    }

    #[test]
    fn daily_refresh_is_bounded(
        current in 0i32..100,
        daily in 0i32..10,
        initial in 0i32..100,
    ) {
        let refreshed = refreshed_free(current, daily, initial);
        prop_assert!(refreshed <= initial + daily);
        prop_assert!(refreshed <= current + daily);
        prop_assert!(refreshed >= current.min(initial + daily));
    }
}
