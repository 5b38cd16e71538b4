use crate::error::{AppError, AppResult};
use crate::ingest;
use crate::providers::mpesa::MobileMoneyNotification;
use crate::providers::stripe::{self, CardProcessorEvent, SIGNATURE_HEADER};
use crate::providers::StatusReport;
use crate::types::{ErrorBody, ProviderKind, WebhookAck};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

fn accepted(ignored: bool) -> Response {
    (
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            ignored: ignored.then_some(true),
        }),
    )
        .into_response()
}

fn rejected(provider: ProviderKind, err: AppError) -> Response {
    let status = err.webhook_status_code();
    match &err {
        AppError::NotFound(_) => {
            // No pre-created payment: ordering bug or a webhook for another environment.
            tracing::error!(%provider, error = %err, "webhook references unknown payment");
            sentry::capture_message(
                &format!("{provider} webhook for unknown payment: {err}"),
                sentry::Level::Warning,
            );
        }
        AppError::SignatureInvalid(_) => {
            tracing::warn!(%provider, error = %err, "webhook failed authentication");
        }
        _ if status.is_server_error() => {
            tracing::error!(
                %provider,
                error = %err,
                retryable = err.is_retryable(),
                "webhook processing failed"
            );
            sentry::capture_error(&err);
        }
        _ => tracing::warn!(%provider, error = %err, "webhook rejected"),
    }
    (status, Json(ErrorBody::new(err.to_string()))).into_response()
}

/// Returns `Ok(false)` when the event was authentic but carries no payment outcome.
fn process_card_event(app_state: &AppState, headers: &HeaderMap, body: &[u8]) -> AppResult<bool> {
    // Authenticate the raw bytes before looking at any field.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::SignatureInvalid("missing signature header".to_string()))?;
    stripe::verify_signature(
        &app_state.config.stripe_webhook_secret,
        signature,
        body,
        chrono::Utc::now().timestamp(),
    )?;

    let event: CardProcessorEvent = serde_json::from_slice(body)?;
    let Some(outcome) = event.outcome() else {
        tracing::info!(event_type = %event.event_type, "ignoring card event without outcome");
        return Ok(false);
    };

    let reference = event
        .payment_reference()
        .ok_or_else(|| AppError::BadRequest("event has no payment reference".to_string()))?;
    let order_id = event.order_reference();

    tracing::info!(
        event_id = ?event.id,
        event_type = %event.event_type,
        reference,
        order_id = ?order_id,
        "card event received"
    );

    // The signature covers the whole body, event type included, so the
    // outcome is applied without a second status query.
    ingest::reconcile_outcome(
        app_state,
        ProviderKind::Stripe,
        reference,
        StatusReport::new(outcome),
        order_id,
    )?;
    Ok(true)
}

#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    request_body(
        content = serde_json::Value,
        description = "Signed card processor event, verified against the raw bytes",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Signature verification failed", body = ErrorBody),
        (status = 404, description = "Unknown payment reference", body = ErrorBody),
        (status = 500, description = "Processing failed, provider should retry", body = ErrorBody)
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match process_card_event(&app_state, &headers, &body) {
        Ok(handled) => accepted(!handled),
        Err(err) => rejected(ProviderKind::Stripe, err),
    }
}

/// Mobile-money callbacks are unsigned: only the reference is taken from the
/// body, the outcome is always re-fetched from the provider.
#[utoipa::path(
    post,
    path = "/webhooks/mpesa",
    request_body = MobileMoneyNotification,
    responses(
        (status = 200, description = "Notification reconciled", body = WebhookAck),
        (status = 404, description = "Unknown payment reference", body = ErrorBody),
        (status = 500, description = "Provider or store failure, retry later", body = ErrorBody)
    ),
    tag = "Webhooks"
)]
pub async fn mpesa_webhook(
    State(app_state): State<AppState>,
    Json(notification): Json<MobileMoneyNotification>,
) -> Response {
    let reference = notification.reference_id().to_string();
    tracing::info!(
        reference = %reference,
        advisory_status = ?notification.advisory_status(),
        "mobile money notification received"
    );

    match ingest::query_and_reconcile(&app_state, ProviderKind::Mpesa, &reference, None).await {
        Ok(_) => accepted(false),
        Err(err) => rejected(ProviderKind::Mpesa, err),
    }
}
