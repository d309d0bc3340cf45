//! Webhook reconciler tests
//!
//! Duplicate deliveries must credit at most once, failures must never touch
//! the ledger, and refunds are logged only.

mod common;

use std::sync::Arc;

use common::{google_identity, MemoryLedgerStore};
use tollgate_core::{
    AccountSeed, LedgerConfig, LedgerEngine, ProviderEvent, ReconcileOutcome, WebhookReconciler,
};
use tollgate_db::{LedgerStore, NewPayment};
use tollgate_types::PaymentStatus;
use uuid::Uuid;

fn setup() -> (
    Arc<MemoryLedgerStore>,
    Arc<LedgerEngine<MemoryLedgerStore>>,
    WebhookReconciler<MemoryLedgerStore>,
) {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = Arc::new(LedgerEngine::new(
        Arc::clone(&store),
        LedgerConfig::default(),
    ));
    let reconciler = WebhookReconciler::new(Arc::clone(&engine), "stripe");
    (store, engine, reconciler)
}

fn succeeded(external_id: &str) -> ProviderEvent {
    ProviderEvent::PaymentSucceeded {
        event_id: format!("evt-{external_id}"),
        external_id: external_id.to_string(),
        amount_minor: Some(500),
        currency: Some("USD".to_string()),
        identity: Some(google_identity("u1")),
    }
}

#[tokio::test]
async fn payment_succeeded_credits_exactly_once() {
    let (store, engine, reconciler) = setup();

    let first = reconciler.process(succeeded("pi_X")).await.unwrap();
    assert!(matches!(first, ReconcileOutcome::Credited { .. }));

    // Byte-identical redelivery.
    let second = reconciler.process(succeeded("pi_X")).await.unwrap();
    assert_eq!(second, ReconcileOutcome::AlreadyFulfilled);

    let account = engine.get_account(&google_identity("u1")).await.unwrap();
    assert_eq!(account.paid_credits, 50);

    let credits = store.credits_with_external_id("pi_X").await;
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount_minor, 50);

    let payments = store.payments_for_provider("stripe");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded.as_str());
    assert!(payments[0].credit_id.is_some());
}

#[tokio::test]
async fn interleaved_event_streams_converge() {
    let (_store, engine, reconciler) = setup();

    // process(E || E) must equal process(E) from the balance's perspective.
    let stream = ["pi_A", "pi_B", "pi_A", "pi_C", "pi_B", "pi_C", "pi_A"];
    for external_id in stream {
        reconciler.process(succeeded(external_id)).await.unwrap();
    }

    let account = engine.get_account(&google_identity("u1")).await.unwrap();
    assert_eq!(account.paid_credits, 3 * 50);
}

#[tokio::test]
async fn payment_succeeded_creates_the_account_when_unknown() {
    let (_store, engine, reconciler) = setup();

    // The webhook can arrive before any credit check has seen the identity.
    let outcome = reconciler.process(succeeded("pi_first")).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Credited { .. }));

    let account = engine.get_account(&google_identity("u1")).await.unwrap();
    assert_eq!(account.paid_credits, 50);
}

#[tokio::test]
async fn success_without_metadata_uses_the_payment_record() {
    let (store, engine, reconciler) = setup();

    let account = engine
        .get_or_create_account(&google_identity("u1"), AccountSeed::default())
        .await
        .unwrap();
    store
        .insert_payment(NewPayment {
            id: Uuid::new_v4(),
            provider: "stripe".to_string(),
            external_id: "pi_meta".to_string(),
            account_id: account.account_id.0,
            amount_minor: 500,
            currency: "USD".to_string(),
            status: PaymentStatus::RequiresPaymentMethod.as_str().to_string(),
        })
        .await
        .unwrap();

    let event = ProviderEvent::PaymentSucceeded {
        event_id: "evt-1".to_string(),
        external_id: "pi_meta".to_string(),
        amount_minor: Some(500),
        currency: Some("USD".to_string()),
        identity: None,
    };
    let outcome = reconciler.process(event).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Credited { .. }));

    let account = engine.get_account(&google_identity("u1")).await.unwrap();
    assert_eq!(account.paid_credits, 50);
}

#[tokio::test]
async fn payment_failed_marks_the_record_without_ledger_effect() {
    let (store, engine, reconciler) = setup();

    let account = engine
        .get_or_create_account(&google_identity("u1"), AccountSeed::default())
        .await
        .unwrap();
    store
        .insert_payment(NewPayment {
            id: Uuid::new_v4(),
            provider: "stripe".to_string(),
            external_id: "pi_bad".to_string(),
            account_id: account.account_id.0,
            amount_minor: 500,
            currency: "USD".to_string(),
            status: PaymentStatus::Processing.as_str().to_string(),
        })
        .await
        .unwrap();

    let outcome = reconciler
        .process(ProviderEvent::PaymentFailed {
            event_id: "evt-1".to_string(),
            external_id: "pi_bad".to_string(),
            reason: Some("card_declined".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::MarkedFailed);

    let payments = store.payments_for_provider("stripe");
    assert_eq!(payments[0].status, PaymentStatus::Failed.as_str());

    let account = engine.get_account(&google_identity("u1")).await.unwrap();
    assert_eq!(account.paid_credits, 0);
}

#[tokio::test]
async fn refunds_and_unknown_events_have_no_ledger_effect() {
    let (store, engine, reconciler) = setup();
    reconciler.process(succeeded("pi_X")).await.unwrap();

    let refund = reconciler
        .process(ProviderEvent::Refund {
            event_id: "evt-r".to_string(),
            external_id: "pi_X".to_string(),
            amount_minor: Some(500),
        })
        .await
        .unwrap();
    assert_eq!(refund, ReconcileOutcome::Ignored);

    let ignored = reconciler
        .process(ProviderEvent::Ignored {
            event_id: "evt-i".to_string(),
            kind: "customer.created".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ignored, ReconcileOutcome::Ignored);

    // Balance and payment state are untouched by either.
    let account = engine.get_account(&google_identity("u1")).await.unwrap();
    assert_eq!(account.paid_credits, 50);
    let payments = store.payments_for_provider("stripe");
    assert_eq!(payments[0].status, PaymentStatus::Succeeded.as_str());
}
