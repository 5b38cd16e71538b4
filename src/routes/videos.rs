use crate::auth::MaybeAuthUser;
use crate::delivery::{self, STREAM_URL_TTL_SECS};
use crate::error::AppResult;
use crate::types::{ErrorBody, VideoUrlResponse};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;

/// Preview lessons are served to anyone; the rest need live access to the course.
#[utoipa::path(
    get,
    path = "/videos/{lesson_id}",
    params(("lesson_id" = String, Path, description = "Lesson whose video to stream")),
    responses(
        (status = 200, description = "Signed streaming URL", body = VideoUrlResponse),
        (status = 401, description = "Non-preview lesson requested anonymously", body = ErrorBody),
        (status = 403, description = "No live access to the course", body = ErrorBody),
        (status = 404, description = "Lesson not found", body = ErrorBody)
    ),
    tag = "Delivery"
)]
pub async fn stream_video(
    State(app_state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    Path(lesson_id): Path<String>,
) -> AppResult<Json<VideoUrlResponse>> {
    let mut conn = app_state.get_db_connection()?;
    let signed = delivery::stream_url(
        &mut conn,
        &app_state.signer,
        user.as_ref().map(|u| u.user_id.as_str()),
        &lesson_id,
        chrono::Utc::now().naive_utc(),
    )?;

    Ok(Json(VideoUrlResponse {
        url: signed.url,
        expires_in: STREAM_URL_TTL_SECS,
    }))
}
