use crate::auth::AuthUser;
use crate::delivery;
use crate::error::AppResult;
use crate::model::DOWNLOAD_TOKEN_TTL_SECS;
use crate::types::{DownloadIssuedResponse, ErrorBody, RedeemRequest, RedeemResponse};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;

#[utoipa::path(
    get,
    path = "/downloads/{product_id}",
    params(("product_id" = String, Path, description = "Downloadable product")),
    responses(
        (status = 200, description = "Download token issued", body = DownloadIssuedResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "No live access to the product", body = ErrorBody),
        (status = 404, description = "Product has no downloadable file", body = ErrorBody)
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn issue_download(
    State(app_state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
) -> AppResult<Json<DownloadIssuedResponse>> {
    let mut conn = app_state.get_db_connection()?;
    let (token, product) = delivery::issue_download_token(
        &mut conn,
        &user.user_id,
        &product_id,
        chrono::Utc::now().naive_utc(),
    )?;

    Ok(Json(DownloadIssuedResponse {
        success: true,
        // Redeemed by POSTing the token back to the same path.
        download_url: format!("/downloads/{}", product.id),
        token: token.id,
        version: product.version,
        expires_in: DOWNLOAD_TOKEN_TTL_SECS,
        max_downloads: token.max_downloads,
    }))
}

#[utoipa::path(
    post,
    path = "/downloads/{product_id}",
    params(("product_id" = String, Path, description = "Downloadable product")),
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Download counted", body = RedeemResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "Token expired, exhausted or not owned", body = ErrorBody),
        (status = 404, description = "Unknown token or product", body = ErrorBody)
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn redeem_download(
    State(app_state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
    Json(payload): Json<RedeemRequest>,
) -> AppResult<Json<RedeemResponse>> {
    let mut conn = app_state.get_db_connection()?;
    let redemption = delivery::redeem_download_token(
        &mut conn,
        &user.user_id,
        &payload.token,
        &product_id,
        chrono::Utc::now().naive_utc(),
    )?;

    Ok(Json(RedeemResponse {
        success: true,
        download_url: redemption.download_url,
        version: redemption.version,
        remaining_downloads: redemption.remaining_downloads,
    }))
}
