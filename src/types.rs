use diesel::deserialize::{self, FromSql};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maps a fieldless enum onto a lower-case TEXT column.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("Invalid {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl ToSql<Text, Sqlite> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
                <str as ToSql<Text, Sqlite>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Sqlite> for $name {
            fn from_sql(
                bytes: <Sqlite as diesel::backend::Backend>::RawValue<'_>,
            ) -> deserialize::Result<Self> {
                let value = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
                value.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Course,
    Signal,
    Bot,
}

text_enum!(ProductType {
    Course => "course",
    Signal => "signal",
    Bot => "bot",
});

impl ProductType {
    /// Signal products are sold as recurring plans.
    pub fn is_recurring(&self) -> bool {
        matches!(self, ProductType::Signal)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Weekly,
    Monthly,
}

text_enum!(BillingInterval {
    Weekly => "weekly",
    Monthly => "monthly",
});

impl BillingInterval {
    pub fn period(&self) -> chrono::Duration {
        match self {
            BillingInterval::Weekly => chrono::Duration::days(7),
            BillingInterval::Monthly => chrono::Duration::days(30),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

text_enum!(OrderStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(PaymentStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

impl PaymentStatus {
    /// Completed never moves. A failed payment can still be completed by a
    /// later success report but never reopened as pending.
    pub fn can_become(&self, next: PaymentStatus) -> bool {
        match self {
            PaymentStatus::Completed => next == PaymentStatus::Completed,
            PaymentStatus::Failed => next != PaymentStatus::Pending,
            PaymentStatus::Pending => true,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    Expired,
}

text_enum!(SubscriptionStatus {
    Active => "active",
    Canceled => "canceled",
    Expired => "expired",
});

/// Payment providers wired into the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, AsExpression, FromSqlRow, ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Card processor, push webhooks.
    Stripe,
    /// Mobile money, status must be polled.
    Mpesa,
}

text_enum!(ProviderKind {
    Stripe => "stripe",
    Mpesa => "mpesa",
});

/// Provider-agnostic payment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizedOutcome {
    Successful,
    Failed,
    Pending,
}

impl NormalizedOutcome {
    /// The fixed outcome table shared by every adapter.
    pub fn statuses(&self) -> (PaymentStatus, OrderStatus) {
        match self {
            NormalizedOutcome::Successful => (PaymentStatus::Completed, OrderStatus::Completed),
            NormalizedOutcome::Failed => (PaymentStatus::Failed, OrderStatus::Failed),
            NormalizedOutcome::Pending => (PaymentStatus::Pending, OrderStatus::Processing),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub product_id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub success: bool,
    pub order_id: String,
    pub provider: ProviderKind,
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub reference_id: String,
    pub order_id: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct OrderSummary {
    pub id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub success: bool,
    pub status: PaymentStatus,
    pub order: OrderSummary,
    pub payment: PaymentSummary,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadIssuedResponse {
    pub success: bool,
    pub token: String,
    pub download_url: String,
    pub version: Option<String>,
    pub expires_in: i64,
    pub max_downloads: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone, ToSchema)]
pub struct RedeemRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub success: bool,
    pub download_url: String,
    pub version: Option<String>,
    pub remaining_downloads: i32,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoUrlResponse {
    pub url: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub has_access: bool,
    pub expires_at: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<bool>,
}
