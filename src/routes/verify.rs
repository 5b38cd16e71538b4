use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::ingest;
use crate::store;
use crate::types::{ErrorBody, OrderSummary, PaymentStatus, PaymentSummary, VerifyRequest, VerifyResponse};
use crate::AppState;
use axum::extract::State;
use axum::Json;

/// Pull path: the client asks for its payment to be checked with the
/// provider right now instead of waiting for a webhook.
#[utoipa::path(
    post,
    path = "/payments/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Current payment state after reconciliation", body = VerifyResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "Order belongs to another user", body = ErrorBody),
        (status = 404, description = "Order or payment not found", body = ErrorBody),
        (status = 503, description = "Provider could not be reached", body = ErrorBody)
    ),
    tag = "Payments",
    security(("bearer_auth" = []))
)]
pub async fn verify_payment(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<VerifyRequest>,
) -> AppResult<Json<VerifyResponse>> {
    let payment = {
        let mut conn = app_state.get_db_connection()?;
        let order = store::find_order(&mut conn, &payload.order_id)?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;
        if order.user_id != user.user_id {
            return Err(AppError::AuthorizationDenied(
                "order belongs to another user".to_string(),
            ));
        }
        store::find_payment_for_order(&mut conn, &order.id, &payload.reference_id)?
            .ok_or_else(|| AppError::NotFound("Payment".to_string()))?
    };

    let outcome = ingest::query_and_reconcile(
        &app_state,
        payment.provider,
        &payment.provider_payment_id,
        Some(payment.order_id.as_str()),
    )
    .await
    .inspect_err(|e| {
        tracing::warn!(
            order_id = %payload.order_id,
            reference = %payload.reference_id,
            error = %e,
            retryable = e.is_retryable(),
            "verify-now could not reconcile"
        )
    })?;

    Ok(Json(VerifyResponse {
        success: outcome.payment_status == PaymentStatus::Completed,
        status: outcome.payment_status,
        order: OrderSummary {
            id: outcome.order_id,
            status: outcome.order_status,
        },
        payment: PaymentSummary {
            status: outcome.payment_status,
            transaction_id: outcome.transaction_id,
        },
    }))
}
