//! Card processor adapter (Stripe PaymentIntents).

use super::{IntentRequest, PaymentProvider, ProviderIntent, StatusReport};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::types::{NormalizedOutcome, ProviderKind};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
/// Signed webhooks older than this are rejected as replays.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout())
            .build()
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        Ok(Self {
            http,
            api_base: config.stripe_api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl PaymentIntentStatus {
    pub fn outcome(&self) -> NormalizedOutcome {
        match self {
            PaymentIntentStatus::Succeeded => NormalizedOutcome::Successful,
            PaymentIntentStatus::Canceled => NormalizedOutcome::Failed,
            // A declined card puts the intent back into requires_payment_method;
            // the buyer may still retry, so only the push event marks it failed.
            PaymentIntentStatus::RequiresPaymentMethod
            | PaymentIntentStatus::RequiresConfirmation
            | PaymentIntentStatus::RequiresAction
            | PaymentIntentStatus::Processing
            | PaymentIntentStatus::RequiresCapture => NormalizedOutcome::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub latest_charge: Option<String>,
}

async fn read_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> AppResult<T> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::ProviderUnavailable(format!(
            "stripe returned {status}: {body}"
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AppError::ProviderUnavailable(format!("unreadable stripe response: {e}")))
}

#[async_trait]
impl PaymentProvider for StripeClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<ProviderIntent> {
        let form = [
            ("amount", request.amount.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("description", request.description.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[order_id]", request.order_id.clone()),
            ("metadata[user_id]", request.user_id.clone()),
            ("metadata[product_id]", request.product_id.clone()),
            ("metadata[product_type]", request.product_type.clone()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("order-{}", request.order_id))
            .form(&form)
            .send()
            .await?;

        let intent: PaymentIntent = read_response(response, "payment intent").await?;
        tracing::info!(order_id = %request.order_id, reference = %intent.id, "stripe payment intent created");

        Ok(ProviderIntent {
            reference: intent.id,
            client_secret: intent.client_secret,
        })
    }

    async fn query_status(&self, reference: &str) -> AppResult<StatusReport> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.api_base, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let intent: PaymentIntent = read_response(response, "payment intent").await?;
        Ok(StatusReport {
            outcome: intent.status.outcome(),
            transaction_id: intent.latest_charge,
        })
    }
}

/// Checks a `t=<unix>,v1=<hex>` signature header against the raw body.
///
/// The MAC covers `"{t}.{body}"`, so every field of the event, including its
/// type, is authenticated once this returns `Ok`.
pub fn verify_signature(secret: &str, header: &str, payload: &[u8], now_unix: i64) -> AppResult<()> {
    let mut timestamp: Option<&str> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| AppError::SignatureInvalid("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(AppError::SignatureInvalid("missing v1 signature".into()));
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| AppError::SignatureInvalid("malformed timestamp".into()))?;
    if (now_unix - signed_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::SignatureInvalid("timestamp outside tolerance".into()));
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::SignatureInvalid("signature mismatch".into()))
}

/// Builds a signature header the way the provider does. Used by tests and tooling.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Push event envelope from the card processor.
#[derive(Debug, Deserialize)]
pub struct CardProcessorEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventData {
    Wrapped { object: CardEventData },
    Flat(CardEventData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardEventData {
    /// Id of the event object: a session, or the intent itself.
    #[serde(default)]
    pub id: Option<String>,
    /// Our order id.
    #[serde(alias = "client_reference_id")]
    pub client_reference: Option<String>,
    /// The provider's payment id.
    #[serde(alias = "payment_intent")]
    pub payment_reference: Option<String>,
    #[serde(default, alias = "amount_total")]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    pub product_id: Option<String>,
    pub product_type: Option<String>,
}

impl CardProcessorEvent {
    pub fn data(&self) -> &CardEventData {
        match &self.data {
            EventData::Wrapped { object } => object,
            EventData::Flat(data) => data,
        }
    }

    /// The provider's payment id. Intent events carry it as the object id.
    pub fn payment_reference(&self) -> Option<&str> {
        let data = self.data();
        match data.payment_reference.as_deref() {
            Some(reference) => Some(reference),
            None if self.event_type.starts_with("payment_intent.") => data.id.as_deref(),
            None => None,
        }
    }

    /// Our order id, from the session field or the metadata set at checkout.
    pub fn order_reference(&self) -> Option<&str> {
        let data = self.data();
        data.client_reference
            .as_deref()
            .or(data.metadata.order_id.as_deref())
    }

    /// `None` for event types that carry no payment outcome.
    pub fn outcome(&self) -> Option<NormalizedOutcome> {
        match self.event_type.as_str() {
            "checkout.completed"
            | "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "payment.succeeded"
            | "payment_intent.succeeded" => Some(NormalizedOutcome::Successful),
            "payment.failed"
            | "payment_intent.payment_failed"
            | "payment_intent.canceled"
            | "checkout.session.async_payment_failed" => Some(NormalizedOutcome::Failed),
            "payment.processing" | "payment_intent.processing" => Some(NormalizedOutcome::Pending),
            _ => None,
        }
    }
}
