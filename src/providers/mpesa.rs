//! Mobile-money adapter (M-Pesa STK push).
//!
//! The provider's callbacks are not signed, so every outcome is re-fetched
//! through the STK query endpoint before it reaches the engine.

use super::{IntentRequest, PaymentProvider, ProviderIntent, StatusReport};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::types::{NormalizedOutcome, ProviderKind};
use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

/// Result code the provider returns for a completed payment.
const RESULT_SUCCESS: &str = "0";
/// Error code returned by the query endpoint while the buyer has not answered yet.
const ERROR_STILL_PROCESSING: &str = "500.001.1001";
/// Refresh the cached token this long before the provider expires it.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

pub struct MpesaClient {
    http: reqwest::Client,
    api_base: String,
    consumer_key: String,
    consumer_secret: String,
    shortcode: String,
    passkey: String,
    callback_url: String,
    country_code: String,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    response_code: String,
    #[serde(default)]
    response_description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

/// Body of the STK query endpoint. Success and "still processing" arrive in
/// different shapes; both are captured here.
#[derive(Debug, Default, Deserialize)]
pub struct MpesaQueryResponse {
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

/// The provider's view of an STK payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileMoneyStatus {
    Paid,
    Processing,
    Rejected { code: String, reason: String },
}

impl MobileMoneyStatus {
    pub fn outcome(&self) -> NormalizedOutcome {
        match self {
            MobileMoneyStatus::Paid => NormalizedOutcome::Successful,
            MobileMoneyStatus::Processing => NormalizedOutcome::Pending,
            MobileMoneyStatus::Rejected { .. } => NormalizedOutcome::Failed,
        }
    }
}

impl MpesaQueryResponse {
    pub fn status(&self) -> AppResult<MobileMoneyStatus> {
        if self.error_code.as_deref() == Some(ERROR_STILL_PROCESSING) {
            return Ok(MobileMoneyStatus::Processing);
        }
        match self.result_code.as_deref().map(str::trim) {
            Some(RESULT_SUCCESS) => Ok(MobileMoneyStatus::Paid),
            Some(code) => Ok(MobileMoneyStatus::Rejected {
                code: code.to_string(),
                reason: self.result_desc.clone().unwrap_or_default(),
            }),
            None => Err(AppError::ProviderUnavailable(format!(
                "mpesa query returned no result: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ))),
        }
    }
}

/// Callback delivered by the provider. Its status is advisory only.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum MobileMoneyNotification {
    Simple {
        #[serde(rename = "referenceId")]
        reference_id: String,
        #[serde(default)]
        status: Option<String>,
    },
    StkCallback {
        #[serde(rename = "Body")]
        body: StkCallbackBody,
    },
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode", default)]
    pub result_code: Option<i64>,
}

impl MobileMoneyNotification {
    pub fn reference_id(&self) -> &str {
        match self {
            MobileMoneyNotification::Simple { reference_id, .. } => reference_id,
            MobileMoneyNotification::StkCallback { body } => &body.stk_callback.checkout_request_id,
        }
    }

    pub fn advisory_status(&self) -> Option<String> {
        match self {
            MobileMoneyNotification::Simple { status, .. } => status.clone(),
            MobileMoneyNotification::StkCallback { body } => {
                body.stk_callback.result_code.map(|code| code.to_string())
            }
        }
    }
}

/// Normalizes a subscriber number to `<country code><national number>`:
/// strips separators and a leading `+`, replaces a leading trunk `0` with the
/// country code, and prefixes bare national numbers.
pub fn normalize_msisdn(raw: &str, country_code: &str) -> AppResult<String> {
    let digits: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::BadRequest(format!("Invalid phone number: {raw}")));
    }

    let normalized = if let Some(national) = digits.strip_prefix('0') {
        format!("{country_code}{national}")
    } else if digits.starts_with(country_code) {
        digits
    } else {
        format!("{country_code}{digits}")
    };

    let national_len = normalized.len() - country_code.len();
    if !(7..=10).contains(&national_len) {
        return Err(AppError::BadRequest(format!("Invalid phone number: {raw}")));
    }
    Ok(normalized)
}

/// STK password: base64(shortcode + passkey + timestamp).
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64_STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

fn stk_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Amounts are whole shillings; minor units round up.
fn whole_units(amount_minor: i64) -> i64 {
    (amount_minor + 99) / 100
}

impl MpesaClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout())
            .build()
            .map_err(|e| AppError::InternalError(e.to_string()))?;

        Ok(Self {
            http,
            api_base: config.mpesa_api_base.trim_end_matches('/').to_string(),
            consumer_key: config.mpesa_consumer_key.clone(),
            consumer_secret: config.mpesa_consumer_secret.clone(),
            shortcode: config.mpesa_shortcode.clone(),
            passkey: config.mpesa_passkey.clone(),
            callback_url: config.mpesa_callback_url.clone(),
            country_code: config.mpesa_country_code.clone(),
            token: RwLock::new(None),
        })
    }

    /// Returns the cached bearer token, refreshing it under the write lock
    /// when it is absent or expired. Concurrent callers wait for one refresh.
    async fn access_token(&self) -> AppResult<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *slot = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> AppResult<CachedToken> {
        let response = self
            .http
            .get(format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                self.api_base
            ))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ProviderUnavailable(format!(
                "mpesa oauth returned {}",
                response.status()
            )));
        }

        let body: OAuthResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("unreadable mpesa token: {e}")))?;
        let lifetime: i64 = body.expires_in.parse().unwrap_or(3599);

        tracing::debug!(lifetime, "refreshed mpesa access token");
        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: Utc::now()
                + chrono::Duration::seconds((lifetime - TOKEN_EXPIRY_MARGIN_SECS).max(0)),
        })
    }
}

#[async_trait]
impl PaymentProvider for MpesaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mpesa
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<ProviderIntent> {
        let phone = request
            .phone_number
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("phoneNumber is required for mpesa".into()))?;
        let phone = normalize_msisdn(phone, &self.country_code)?;

        let token = self.access_token().await?;
        let timestamp = stk_timestamp(Utc::now());
        let body = StkPushRequest {
            business_short_code: &self.shortcode,
            password: stk_password(&self.shortcode, &self.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: whole_units(request.amount),
            party_a: &phone,
            party_b: &self.shortcode,
            phone_number: &phone,
            callback_url: &self.callback_url,
            account_reference: &request.order_id,
            transaction_desc: &request.description,
        };

        let response = self
            .http
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.api_base))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderUnavailable(format!(
                "mpesa stk push returned {status}: {text}"
            )));
        }

        let pushed: StkPushResponse = response
            .json()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("unreadable stk push response: {e}")))?;
        if pushed.response_code != RESULT_SUCCESS {
            return Err(AppError::ProviderUnavailable(format!(
                "mpesa rejected stk push: {}",
                pushed.response_description.unwrap_or_default()
            )));
        }

        tracing::info!(order_id = %request.order_id, reference = %pushed.checkout_request_id, "mpesa stk push sent");
        Ok(ProviderIntent {
            reference: pushed.checkout_request_id,
            client_secret: None,
        })
    }

    async fn query_status(&self, reference: &str) -> AppResult<StatusReport> {
        let token = self.access_token().await?;
        let timestamp = stk_timestamp(Utc::now());
        let body = StkQueryRequest {
            business_short_code: &self.shortcode,
            password: stk_password(&self.shortcode, &self.passkey, &timestamp),
            timestamp,
            checkout_request_id: reference,
        };

        let response = self
            .http
            .post(format!("{}/mpesa/stkpushquery/v1/query", self.api_base))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        // "Still processing" comes back as an HTTP 500 with a JSON error body.
        let http_status = response.status();
        let parsed: MpesaQueryResponse = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("mpesa query returned {http_status}: {e}"))
        })?;

        let status = parsed.status()?;
        tracing::debug!(reference, ?status, "mpesa status queried");
        Ok(StatusReport::new(status.outcome()))
    }
}
