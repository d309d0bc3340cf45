//! Stripe payment provider implementation

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, instrument, warn};

use tollgate_types::AccountIdentity;

use crate::error::LedgerError;
use crate::provider::{PaymentHandle, PaymentIntentSpec, PaymentProvider, ProviderEvent};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Deadline on every outbound Stripe call
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Webhook signatures older than this are rejected
const SIGNATURE_MAX_AGE_SECS: i64 = 300;

/// Stripe payment provider
#[derive(Clone)]
pub struct StripeProvider {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeProvider {
    /// Create a new Stripe provider
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Make an authenticated request to Stripe
    async fn stripe_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        form: Option<&[(&str, &str)]>,
        idempotency_key: Option<&str>,
    ) -> Result<T, LedgerError> {
        let url = format!("{STRIPE_API_BASE}{endpoint}");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.secret_key, Option::<&str>::None);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        if let Some(form_data) = form {
            request = request.form(form_data);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Stripe API request failed");
            LedgerError::Provider(e.to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Stripe API error");
            return Err(LedgerError::Provider(format!("Stripe API error: {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::Provider(format!("failed to parse Stripe response: {e}")))
    }

    /// Verify the `Stripe-Signature` header against the payload
    fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<(), LedgerError> {
        // Header format: t=timestamp,v1=signature
        let mut timestamp: Option<&str> = None;
        let mut sig_v1: Option<&str> = None;

        for part in signature.split(',') {
            if let Some((key, value)) = part.split_once('=') {
                match key {
                    "t" => timestamp = Some(value),
                    "v1" => sig_v1 = Some(value),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            warn!("missing timestamp in webhook signature");
            LedgerError::SignatureInvalid("missing timestamp".into())
        })?;
        let sig_v1 = sig_v1.ok_or_else(|| {
            warn!("missing v1 signature in webhook signature");
            LedgerError::SignatureInvalid("missing signature".into())
        })?;

        let payload_str = std::str::from_utf8(payload)
            .map_err(|_| LedgerError::SignatureInvalid("invalid payload encoding".into()))?;
        let signed_payload = format!("{timestamp}.{payload_str}");

        let mut mac = Hmac::<Sha256>::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| LedgerError::Provider("HMAC error".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if !constant_time_eq(sig_v1.as_bytes(), expected.as_bytes()) {
            error!("webhook signature verification failed");
            return Err(LedgerError::SignatureInvalid(
                "signature verification failed".into(),
            ));
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| LedgerError::SignatureInvalid("invalid timestamp format".into()))?;
        let now = Utc::now().timestamp();
        if (now - ts).abs() > SIGNATURE_MAX_AGE_SECS {
            warn!(timestamp = ts, now = now, "webhook timestamp too old");
            return Err(LedgerError::SignatureInvalid("timestamp too old".into()));
        }

        Ok(())
    }

    fn parse_event(raw: RawStripeEvent) -> ProviderEvent {
        match raw.event_type.as_str() {
            "payment_intent.succeeded" => {
                let object: RawPaymentIntent = match serde_json::from_value(raw.data.object) {
                    Ok(intent) => intent,
                    Err(e) => {
                        warn!(error = %e, event_id = %raw.id, "unparseable payment intent");
                        return ProviderEvent::Ignored {
                            event_id: raw.id,
                            kind: raw.event_type,
                        };
                    }
                };
                let identity = object.identity();
                ProviderEvent::PaymentSucceeded {
                    event_id: raw.id,
                    external_id: object.id,
                    amount_minor: object.amount,
                    currency: object.currency.map(|c| c.to_uppercase()),
                    identity,
                }
            }
            "payment_intent.payment_failed" => {
                let object: RawPaymentIntent = match serde_json::from_value(raw.data.object) {
                    Ok(intent) => intent,
                    Err(e) => {
                        warn!(error = %e, event_id = %raw.id, "unparseable payment intent");
                        return ProviderEvent::Ignored {
                            event_id: raw.id,
                            kind: raw.event_type,
                        };
                    }
                };
                let reason = object
                    .last_payment_error
                    .and_then(|err| err.message);
                ProviderEvent::PaymentFailed {
                    event_id: raw.id,
                    external_id: object.id,
                    reason,
                }
            }
            "charge.refunded" => {
                let object: RawRefundedCharge = match serde_json::from_value(raw.data.object) {
                    Ok(charge) => charge,
                    Err(e) => {
                        warn!(error = %e, event_id = %raw.id, "unparseable refunded charge");
                        return ProviderEvent::Ignored {
                            event_id: raw.id,
                            kind: raw.event_type,
                        };
                    }
                };
                ProviderEvent::Refund {
                    event_id: raw.id,
                    external_id: object.payment_intent.unwrap_or(object.id),
                    amount_minor: object.amount_refunded,
                }
            }
            _ => ProviderEvent::Ignored {
                event_id: raw.id,
                kind: raw.event_type,
            },
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, spec))]
    async fn create_payment_intent(
        &self,
        spec: &PaymentIntentSpec,
    ) -> Result<PaymentHandle, LedgerError> {
        debug!(amount_minor = spec.amount_minor, "creating payment intent");

        let amount = spec.amount_minor.to_string();
        let currency = spec.currency.to_lowercase();
        let account_id = spec.account_id.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("amount", &amount),
            ("currency", &currency),
            ("description", &spec.description),
            ("metadata[account_id]", &account_id),
            ("metadata[oauth_provider]", &spec.oauth_provider),
            ("metadata[external_id]", &spec.external_id),
        ];
        if let Some(email) = spec.customer_email.as_deref() {
            form.push(("receipt_email", email));
        }

        let intent: StripePaymentIntent = self
            .stripe_request(
                reqwest::Method::POST,
                "/payment_intents",
                Some(&form),
                Some(&spec.idempotency_key),
            )
            .await?;

        Ok(intent.into_handle())
    }

    #[instrument(skip(self))]
    async fn get_payment_status(&self, payment_id: &str) -> Result<PaymentHandle, LedgerError> {
        debug!(payment_id = %payment_id, "getting payment status");

        let intent: StripePaymentIntent = self
            .stripe_request(
                reqwest::Method::GET,
                &format!("/payment_intents/{payment_id}"),
                None,
                None,
            )
            .await?;

        Ok(intent.into_handle())
    }

    #[instrument(skip(self))]
    async fn confirm_payment(&self, payment_id: &str) -> Result<bool, LedgerError> {
        let handle = self.get_payment_status(payment_id).await?;
        Ok(handle.status == "succeeded")
    }

    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, LedgerError> {
        self.verify_signature(payload, signature)?;

        let raw: RawStripeEvent = serde_json::from_slice(payload)
            .map_err(|e| LedgerError::Provider(format!("failed to parse webhook event: {e}")))?;

        debug!(event_id = %raw.id, event_type = %raw.event_type, "verified webhook event");

        Ok(Self::parse_event(raw))
    }

    #[instrument(skip(self))]
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<String, LedgerError> {
        debug!(payment_id = %payment_id, amount_minor, "creating refund");

        let amount = amount_minor.map(|a| a.to_string());
        let mut form: Vec<(&str, &str)> = vec![("payment_intent", payment_id)];
        if let Some(amount) = amount.as_deref() {
            form.push(("amount", amount));
        }

        let refund: StripeRefund = self
            .stripe_request(reqwest::Method::POST, "/refunds", Some(&form), None)
            .await?;

        Ok(refund.id)
    }
}

/// Constant-time comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

// Stripe API response types

#[derive(Debug, Clone, Deserialize)]
struct StripePaymentIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: i64,
    currency: String,
}

impl StripePaymentIntent {
    fn into_handle(self) -> PaymentHandle {
        PaymentHandle {
            payment_id: self.id,
            client_secret: self.client_secret.unwrap_or_default(),
            status: self.status,
            amount_minor: self.amount,
            currency: self.currency.to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StripeRefund {
    id: String,
}

// Raw webhook event for parsing

#[derive(Debug, Deserialize)]
struct RawStripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawPaymentIntent {
    id: String,
    amount: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
    last_payment_error: Option<RawPaymentError>,
}

impl RawPaymentIntent {
    fn identity(&self) -> Option<AccountIdentity> {
        let provider = self.metadata.get("oauth_provider")?;
        let external_id = self.metadata.get("external_id")?;
        Some(AccountIdentity::new(provider.clone(), external_id.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRefundedCharge {
    id: String,
    payment_intent: Option<String>,
    amount_refunded: Option<i64>,
}
