#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use entitlement_engine::config::Config;
use entitlement_engine::db::{self, DbConnection, DbPool};
use entitlement_engine::error::{AppError, AppResult};
use entitlement_engine::model::{Lesson, Order, Payment, Product, UserAccess};
use entitlement_engine::providers::{
    IntentRequest, PaymentProvider, ProviderIntent, Providers, StatusReport,
};
use entitlement_engine::store;
use entitlement_engine::types::{BillingInterval, ProductType, ProviderKind};
use entitlement_engine::AppState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test123secret456";

// Helper struct to ensure test database cleanup
pub struct TestDbGuard {
    db_path: String,
    pub pool: DbPool,
}

impl TestDbGuard {
    pub fn new() -> Self {
        let db_path = format!("test_{}.db", uuid::Uuid::new_v4());
        let pool = db::build_pool(&db_path).unwrap();
        db::run_migrations(&pool).unwrap();
        Self { db_path, pool }
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn conn(&self) -> DbConnection {
        self.pool.get().unwrap()
    }
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.db_path, suffix));
        }
    }
}

/// Provider double: intents get sequential references, status answers are scripted.
pub struct FakeProvider {
    kind: ProviderKind,
    statuses: Mutex<HashMap<String, StatusReport>>,
    intents: Mutex<Vec<IntentRequest>>,
    intents_fail: AtomicBool,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            statuses: Mutex::new(HashMap::new()),
            intents: Mutex::new(Vec::new()),
            intents_fail: AtomicBool::new(false),
        })
    }

    pub fn set_status(&self, reference: &str, report: StatusReport) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference.to_string(), report);
    }

    /// Makes every following `create_intent` call fail as unreachable.
    pub fn fail_intents(&self, fail: bool) {
        self.intents_fail.store(fail, Ordering::SeqCst);
    }

    pub fn intents(&self) -> Vec<IntentRequest> {
        self.intents.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_intent(&self, request: &IntentRequest) -> AppResult<ProviderIntent> {
        if self.intents_fail.load(Ordering::SeqCst) {
            return Err(AppError::ProviderUnavailable("provider timed out".to_string()));
        }
        let mut intents = self.intents.lock().unwrap();
        intents.push(request.clone());
        Ok(ProviderIntent {
            reference: format!("{}_ref_{}", self.kind, intents.len()),
            client_secret: (self.kind == ProviderKind::Stripe).then(|| "secret_abc".to_string()),
        })
    }

    async fn query_status(&self, reference: &str) -> AppResult<StatusReport> {
        self.statuses
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| AppError::ProviderUnavailable("provider timed out".to_string()))
    }
}

pub fn test_config(database_url: &str) -> Config {
    let vars = [
        ("DATABASE_URL", database_url),
        ("JWT_SECRET", JWT_SECRET),
        ("STRIPE_SECRET_KEY", "sk_test"),
        ("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("MPESA_CONSUMER_KEY", "key"),
        ("MPESA_CONSUMER_SECRET", "secret"),
        ("MPESA_SHORTCODE", "174379"),
        ("MPESA_PASSKEY", "passkey"),
        ("MPESA_CALLBACK_URL", "https://example.com/webhooks/mpesa"),
        ("VIDEO_SIGNING_SECRET", "video-secret"),
        ("VIDEO_BASE_URL", "https://cdn.example.com"),
    ];
    envy::from_iter(vars.iter().map(|(k, v)| (k.to_string(), v.to_string()))).unwrap()
}

pub struct TestApp {
    pub db: TestDbGuard,
    pub state: AppState,
    pub stripe: Arc<FakeProvider>,
    pub mpesa: Arc<FakeProvider>,
}

impl TestApp {
    pub fn new() -> Self {
        let db = TestDbGuard::new();
        let stripe = FakeProvider::new(ProviderKind::Stripe);
        let mpesa = FakeProvider::new(ProviderKind::Mpesa);
        let state = AppState::new(
            db.pool.clone(),
            test_config(db.db_path()),
            Providers::new(stripe.clone(), mpesa.clone()),
        );
        Self {
            db,
            state,
            stripe,
            mpesa,
        }
    }

    pub fn router(&self) -> axum::Router {
        entitlement_engine::router(self.state.clone())
    }
}

pub fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub fn bearer(user_id: &str) -> String {
    let token =
        entitlement_engine::auth::issue_token(user_id, JWT_SECRET, chrono::Duration::hours(1))
            .unwrap();
    format!("Bearer {token}")
}

pub fn seed_product(
    conn: &mut DbConnection,
    id: &str,
    product_type: ProductType,
    billing_interval: Option<BillingInterval>,
    file_url: Option<&str>,
) -> Product {
    let product = Product {
        id: id.to_string(),
        name: format!("Product {id}"),
        product_type,
        price: 2_500,
        currency: "KES".to_string(),
        is_active: true,
        billing_interval,
        file_url: file_url.map(str::to_string),
        version: file_url.map(|_| "1.2.0".to_string()),
        created_at: now(),
    };
    store::insert_product(conn, &product).unwrap();
    product
}

/// An order with one pending payment under `reference`.
pub fn seed_order_with_payment(
    conn: &mut DbConnection,
    user_id: &str,
    product: &Product,
    provider: ProviderKind,
    reference: &str,
) -> (Order, Payment) {
    let order = Order::new(user_id.to_string(), product, now());
    store::insert_order(conn, &order).unwrap();
    let payment = seed_payment(conn, &order, provider, reference);
    (order, payment)
}

pub fn seed_payment(
    conn: &mut DbConnection,
    order: &Order,
    provider: ProviderKind,
    reference: &str,
) -> Payment {
    let payment = Payment::new(order, provider, reference.to_string(), None, now());
    store::insert_payment(conn, &payment).unwrap();
    payment
}

pub fn seed_access(
    conn: &mut DbConnection,
    user_id: &str,
    product: &Product,
    expires_at: Option<NaiveDateTime>,
) -> UserAccess {
    use diesel::prelude::*;
    use entitlement_engine::schema::user_access;

    let access = UserAccess {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        product_id: product.id.clone(),
        product_type: product.product_type,
        is_active: true,
        access_granted_at: now() - chrono::Duration::days(40),
        access_expires_at: expires_at,
        granted_by: "payment".to_string(),
        order_id: None,
    };
    diesel::insert_into(user_access::table)
        .values(&access)
        .execute(&mut **conn)
        .unwrap();
    access
}

pub fn seed_lesson(conn: &mut DbConnection, id: &str, product: &Product, is_preview: bool) -> Lesson {
    let lesson = Lesson {
        id: id.to_string(),
        product_id: product.id.clone(),
        title: format!("Lesson {id}"),
        video_path: format!("courses/{}/{id}.m3u8", product.id),
        is_preview,
    };
    store::insert_lesson(conn, &lesson).unwrap();
    lesson
}
