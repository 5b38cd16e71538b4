pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod model;
pub mod providers;
pub mod reconcile;
pub mod routes;
pub mod schema;
pub mod store;
pub mod types;

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use config::Config;
use db::{DbConnection, DbPool};
use delivery::UrlSigner;
use error::{AppError, AppResult};
use providers::Providers;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use types::{
    AccessResponse, BillingInterval, CheckoutRequest, CheckoutResponse, DownloadIssuedResponse,
    ErrorBody, OrderStatus, OrderSummary, PaymentStatus, PaymentSummary, ProductType, ProviderKind,
    RedeemRequest, RedeemResponse, VerifyRequest, VerifyResponse, VideoUrlResponse, WebhookAck,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub providers: Arc<Providers>,
    pub signer: Arc<UrlSigner>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config, providers: Providers) -> Self {
        let signer = UrlSigner::new(
            config.video_signing_secret.clone(),
            config.video_base_url.clone(),
        );
        Self {
            pool,
            config: Arc::new(config),
            providers: Arc::new(providers),
            signer: Arc::new(signer),
        }
    }

    /// Get a database connection
    pub fn get_db_connection(&self) -> AppResult<DbConnection> {
        self.pool.get().map_err(|e| {
            tracing::error!(error = %e, "failed to check out database connection");
            AppError::DatabaseConnection
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::checkout::create_checkout,
        routes::verify::verify_payment,
        routes::webhooks::stripe_webhook,
        routes::webhooks::mpesa_webhook,
        routes::videos::stream_video,
        routes::downloads::issue_download,
        routes::downloads::redeem_download,
        routes::access::check_access,
        health_check
    ),
    components(
        schemas(
            ErrorBody, CheckoutRequest, CheckoutResponse, VerifyRequest, VerifyResponse,
            OrderSummary, PaymentSummary, DownloadIssuedResponse, RedeemRequest, RedeemResponse,
            VideoUrlResponse, AccessResponse, WebhookAck, ProviderKind, ProductType,
            BillingInterval, OrderStatus, PaymentStatus
        )
    ),
    tags(
        (name = "Payments", description = "Checkout and verify-now reconciliation"),
        (name = "Webhooks", description = "Provider push notifications"),
        (name = "Delivery", description = "Signed streaming URLs and download tokens"),
        (name = "Health", description = "Health check endpoints")
    ),
    modifiers(&BearerAuth),
    info(
        title = "Entitlement Engine API",
        version = "1.0.0",
        description = "Payment reconciliation and gated content delivery"
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = serde_json::Value)
    ),
    tag = "Health"
)]
async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({"status": "ok"})))
}

async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn swagger_ui() -> impl IntoResponse {
    Html(include_str!("../static/swagger.html"))
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/checkout", post(routes::checkout::create_checkout))
        .route("/payments/verify", post(routes::verify::verify_payment))
        .route("/webhooks/stripe", post(routes::webhooks::stripe_webhook))
        .route("/webhooks/mpesa", post(routes::webhooks::mpesa_webhook))
        .route("/videos/{lesson_id}", get(routes::videos::stream_video))
        .route(
            "/downloads/{product_id}",
            get(routes::downloads::issue_download).post(routes::downloads::redeem_download),
        )
        .route("/access/{product_id}", get(routes::access::check_access))
        .route("/api-doc/openapi.json", get(openapi_spec))
        .route("/explore", get(swagger_ui))
        .with_state(app_state)
}

/// Periodically retires lapsed access rows and subscriptions. Reads already
/// treat an expired row as no access; this keeps `is_active` honest.
async fn expiry_sweeper(pool: DbPool, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let result = pool
            .get()
            .map_err(AppError::from)
            .and_then(|mut conn| store::deactivate_lapsed(&mut conn, chrono::Utc::now().naive_utc()));
        match result {
            Ok((0, 0)) => {}
            Ok((access, subscriptions)) => {
                tracing::info!(access, subscriptions, "expired lapsed entitlements")
            }
            Err(e) => tracing::warn!(error = %e, "expiry sweep failed"),
        }
    }
}

async fn serve(config: Config) -> AppResult<()> {
    let pool = db::build_pool(&config.database_url)?;
    db::run_migrations(&pool)?;

    let providers = Providers::from_config(&config)?;
    let port = config.port;
    let sweep_interval = std::time::Duration::from_secs(config.sweep_interval_secs.max(1));

    tokio::spawn(expiry_sweeper(pool.clone(), sweep_interval));

    let app = router(AppState::new(pool, config, providers));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))
}

pub fn run() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let _sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(config)) {
        tracing::error!(error = %e, "server exited");
        sentry::capture_error(&e);
        std::process::exit(1);
    }
}
