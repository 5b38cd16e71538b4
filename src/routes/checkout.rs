use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::{Order, Payment};
use crate::providers::IntentRequest;
use crate::store;
use crate::types::{CheckoutRequest, CheckoutResponse, ErrorBody, OrderStatus};
use crate::AppState;
use axum::extract::State;
use axum::Json;

/// Opens an order and a provider payment for it.
///
/// The Payment row is written before the reference is returned, so any
/// webhook the provider sends for it can already be matched.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Payment intent created", body = CheckoutResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 404, description = "Product not found or inactive", body = ErrorBody),
        (status = 503, description = "Provider unavailable", body = ErrorBody)
    ),
    tag = "Payments",
    security(("bearer_auth" = []))
)]
pub async fn create_checkout(
    State(app_state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let now = chrono::Utc::now().naive_utc();

    let (order, product) = {
        let mut conn = app_state.get_db_connection()?;
        let product = store::find_product(&mut conn, &payload.product_id)?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        let order = Order::new(user.user_id.clone(), &product, now);
        store::insert_order(&mut conn, &order)?;
        (order, product)
    };

    let intent = app_state
        .providers
        .get(payload.provider)
        .create_intent(&IntentRequest {
            amount: order.amount,
            currency: order.currency.clone(),
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            product_id: product.id.clone(),
            product_type: product.product_type.to_string(),
            description: product.name.clone(),
            phone_number: payload.phone_number.clone(),
        })
        .await;

    let mut conn = app_state.get_db_connection()?;
    let intent = match intent {
        Ok(intent) => intent,
        Err(err) => {
            // No payment will ever reference this order.
            tracing::warn!(
                order_id = %order.id,
                provider = %payload.provider,
                error = %err,
                "intent creation failed"
            );
            store::update_order_status(&mut conn, &order.id, OrderStatus::Failed, now)?;
            return Err(err);
        }
    };

    let payment = Payment::new(
        &order,
        payload.provider,
        intent.reference.clone(),
        Some(serde_json::json!({ "product_type": product.product_type })),
        now,
    );
    store::insert_payment(&mut conn, &payment)?;

    tracing::info!(
        order_id = %order.id,
        user_id = %order.user_id,
        provider = %payload.provider,
        reference = %intent.reference,
        "checkout opened"
    );

    Ok(Json(CheckoutResponse {
        success: true,
        order_id: order.id,
        provider: payload.provider,
        reference_id: intent.reference,
        client_secret: intent.client_secret,
    }))
}
