mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::*;
use entitlement_engine::providers::mpesa::MpesaClient;
use entitlement_engine::providers::PaymentProvider;
use entitlement_engine::types::NormalizedOutcome;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Clone)]
struct MockProvider {
    token_requests: Arc<AtomicUsize>,
    /// `expires_in` handed out with each token, in seconds.
    lifetime: &'static str,
}

async fn issue_token(State(mock): State<MockProvider>) -> Json<Value> {
    let n = mock.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    // Slow enough that concurrent callers pile up behind the refresh.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Json(json!({ "access_token": format!("token-{n}"), "expires_in": mock.lifetime }))
}

async fn stk_query(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|h| h.starts_with("Bearer token-"));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "errorCode": "404.001.03", "errorMessage": "Invalid Access Token" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "ResultCode": "0", "ResultDesc": "The service request is processed successfully." })),
    )
}

/// Serves the OAuth and STK query endpoints on an ephemeral port.
async fn spawn_mock(lifetime: &'static str) -> (String, Arc<AtomicUsize>) {
    let token_requests = Arc::new(AtomicUsize::new(0));
    let mock = MockProvider {
        token_requests: token_requests.clone(),
        lifetime,
    };
    let app = Router::new()
        .route("/oauth/v1/generate", get(issue_token))
        .route("/mpesa/stkpushquery/v1/query", post(stk_query))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), token_requests)
}

fn client_for(api_base: String) -> Arc<MpesaClient> {
    let mut config = test_config("unused.db");
    config.mpesa_api_base = api_base;
    Arc::new(MpesaClient::new(&config).unwrap())
}

async fn query_concurrently(client: &Arc<MpesaClient>, calls: usize) {
    let mut set = JoinSet::new();
    for i in 0..calls {
        let client = client.clone();
        set.spawn(async move { client.query_status(&format!("ws_CO_{i}")).await });
    }
    while let Some(joined) = set.join_next().await {
        let report = joined.unwrap().unwrap();
        assert_eq!(report.outcome, NormalizedOutcome::Successful);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_share_one_token_refresh() {
    let (api_base, token_requests) = spawn_mock("3599").await;
    let client = client_for(api_base);

    query_concurrently(&client, 16).await;
    assert_eq!(token_requests.load(Ordering::SeqCst), 1);

    // Warm cache: no further token requests.
    query_concurrently(&client, 8).await;
    assert_eq!(token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_token_is_refreshed_once_after_expiry() {
    // 62s lifetime minus the 60s safety margin leaves it fresh for about 2s.
    let (api_base, token_requests) = spawn_mock("62").await;
    let client = client_for(api_base);

    query_concurrently(&client, 8).await;
    assert_eq!(token_requests.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    query_concurrently(&client, 8).await;
    assert_eq!(token_requests.load(Ordering::SeqCst), 2);
}
