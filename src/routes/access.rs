use crate::auth::AuthUser;
use crate::delivery::{self, AccessState};
use crate::error::AppResult;
use crate::types::{AccessResponse, ErrorBody};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;

#[utoipa::path(
    get,
    path = "/access/{product_id}",
    params(("product_id" = String, Path, description = "Product to check")),
    responses(
        (status = 200, description = "Whether the caller currently holds access", body = AccessResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    tag = "Delivery",
    security(("bearer_auth" = []))
)]
pub async fn check_access(
    State(app_state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
) -> AppResult<Json<AccessResponse>> {
    let mut conn = app_state.get_db_connection()?;
    let state = delivery::access_state(
        &mut conn,
        &user.user_id,
        &product_id,
        chrono::Utc::now().naive_utc(),
    )?;

    Ok(Json(match state {
        AccessState::Live(access) => AccessResponse {
            has_access: true,
            expires_at: access.access_expires_at,
        },
        AccessState::Expired | AccessState::Inactive | AccessState::Absent => AccessResponse {
            has_access: false,
            expires_at: None,
        },
    }))
}
