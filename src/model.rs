use crate::types::{
    BillingInterval, OrderStatus, PaymentStatus, ProductType, ProviderKind, SubscriptionStatus,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

/// Lifetime of a download token.
pub const DOWNLOAD_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
/// Redemptions allowed per download token.
pub const MAX_DOWNLOADS: i32 = 3;
/// Source recorded on access granted by a reconciled payment.
pub const GRANT_SOURCE_PAYMENT: &str = "payment";

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Product {
    pub id: String,
    pub name: String,
    pub product_type: ProductType,
    pub price: i64,
    pub currency: String,
    pub is_active: bool,
    pub billing_interval: Option<BillingInterval>,
    pub file_url: Option<String>,
    pub version: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Product {
    /// Expiry of access granted at `granted_at`. `None` means lifetime access.
    pub fn access_expiry(&self, granted_at: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.product_type.is_recurring() {
            return None;
        }
        let interval = self.billing_interval.unwrap_or(BillingInterval::Monthly);
        Some(granted_at + interval.period())
    }
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub product_type: ProductType,
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Order {
    pub fn new(user_id: String, product: &Product, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            product_id: product.id.clone(),
            product_type: product.product_type,
            amount: product.price,
            currency: product.currency.clone(),
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub amount: i64,
    pub currency: String,
    pub provider: ProviderKind,
    pub provider_payment_id: String,
    pub status: PaymentStatus,
    pub metadata: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Payment {
    pub fn new(
        order: &Order,
        provider: ProviderKind,
        provider_payment_id: String,
        metadata: Option<serde_json::Value>,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            provider,
            provider_payment_id,
            status: PaymentStatus::Pending,
            metadata: metadata.map(|m| m.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metadata_json(&self) -> serde_json::Value {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    }

    pub fn transaction_id(&self) -> Option<String> {
        self.metadata_json()
            .get("transaction_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::user_access)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserAccess {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub product_type: ProductType,
    pub is_active: bool,
    pub access_granted_at: NaiveDateTime,
    pub access_expires_at: Option<NaiveDateTime>,
    pub granted_by: String,
    pub order_id: Option<String>,
}

impl UserAccess {
    /// Active and not past its expiry.
    pub fn is_live(&self, now: NaiveDateTime) -> bool {
        self.is_active && self.access_expires_at.map_or(true, |expires| expires > now)
    }
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::subscriptions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: NaiveDateTime,
    pub current_period_end: NaiveDateTime,
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::download_tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DownloadToken {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub max_downloads: i32,
    pub download_count: i32,
}

impl DownloadToken {
    pub fn new(user_id: String, product_id: String, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            product_id,
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(DOWNLOAD_TOKEN_TTL_SECS),
            max_downloads: MAX_DOWNLOADS,
            download_count: 0,
        }
    }

    pub fn remaining(&self) -> i32 {
        (self.max_downloads - self.download_count).max(0)
    }
}

#[derive(Queryable, Selectable, Insertable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::lessons)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Lesson {
    pub id: String,
    pub product_id: String,
    pub title: String,
    pub video_path: String,
    pub is_preview: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn product(product_type: ProductType, interval: Option<BillingInterval>) -> Product {
        Product {
            id: "p".to_string(),
            name: "p".to_string(),
            product_type,
            price: 5000,
            currency: "USD".to_string(),
            is_active: true,
            billing_interval: interval,
            file_url: None,
            version: None,
            created_at: at(0),
        }
    }

    #[test]
    fn lifetime_products_never_expire() {
        assert_eq!(product(ProductType::Course, None).access_expiry(at(9)), None);
        assert_eq!(
            product(ProductType::Bot, Some(BillingInterval::Weekly)).access_expiry(at(9)),
            None
        );
    }

    #[test]
    fn signal_expiry_follows_interval() {
        let weekly = product(ProductType::Signal, Some(BillingInterval::Weekly));
        let monthly = product(ProductType::Signal, Some(BillingInterval::Monthly));
        assert_eq!(
            weekly.access_expiry(at(9)),
            Some(at(9) + chrono::Duration::days(7))
        );
        assert_eq!(
            monthly.access_expiry(at(9)),
            Some(at(9) + chrono::Duration::days(30))
        );
    }

    #[test]
    fn access_liveness() {
        let mut access = UserAccess {
            id: "a".to_string(),
            user_id: "u".to_string(),
            product_id: "p".to_string(),
            product_type: ProductType::Signal,
            is_active: true,
            access_granted_at: at(1),
            access_expires_at: Some(at(5)),
            granted_by: GRANT_SOURCE_PAYMENT.to_string(),
            order_id: None,
        };
        assert!(access.is_live(at(4)));
        assert!(!access.is_live(at(5)));
        access.access_expires_at = None;
        assert!(access.is_live(at(23)));
        access.is_active = false;
        assert!(!access.is_live(at(2)));
    }
}
