//! Payment provider adapters.
//!
//! Each adapter talks to one remote provider and reduces its status vocabulary
//! to a [`NormalizedOutcome`]. Adapters never touch the store.

pub mod mpesa;
pub mod stripe;

use crate::config::Config;
use crate::error::AppResult;
use crate::types::{NormalizedOutcome, ProviderKind};
use async_trait::async_trait;
use std::sync::Arc;

/// What the engine needs to open a payment with a provider.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub order_id: String,
    pub user_id: String,
    pub product_id: String,
    pub product_type: String,
    pub description: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIntent {
    /// Stored as `payments.provider_payment_id`.
    pub reference: String,
    /// Handed to the client to complete the payment, when the provider has one.
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub outcome: NormalizedOutcome,
    /// Provider-side receipt or charge id, once known.
    pub transaction_id: Option<String>,
}

impl StatusReport {
    pub fn new(outcome: NormalizedOutcome) -> Self {
        Self {
            outcome,
            transaction_id: None,
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Opens a payment on the provider side. No local side effects.
    async fn create_intent(&self, request: &IntentRequest) -> AppResult<ProviderIntent>;

    /// Read-only status lookup, safe to repeat.
    async fn query_status(&self, reference: &str) -> AppResult<StatusReport>;
}

/// One adapter per provider, constructed once per process.
#[derive(Clone)]
pub struct Providers {
    stripe: Arc<dyn PaymentProvider>,
    mpesa: Arc<dyn PaymentProvider>,
}

impl Providers {
    pub fn new(stripe: Arc<dyn PaymentProvider>, mpesa: Arc<dyn PaymentProvider>) -> Self {
        Self { stripe, mpesa }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self::new(
            Arc::new(stripe::StripeClient::new(config)?),
            Arc::new(mpesa::MpesaClient::new(config)?),
        ))
    }

    pub fn get(&self, kind: ProviderKind) -> &dyn PaymentProvider {
        match kind {
            ProviderKind::Stripe => self.stripe.as_ref(),
            ProviderKind::Mpesa => self.mpesa.as_ref(),
        }
    }
}
