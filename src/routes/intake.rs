use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult, JobError};
use crate::models::intake::{PrecheckRequest, PrecheckResponse};
use crate::routes::auth::AuthUser;

/// POST /api/v1/intake/precheck: Advisory routing, ETA and cost for a file
/// the caller has not uploaded yet.
pub async fn precheck(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<PrecheckRequest>, JsonRejection>,
) -> ApiResult<Json<PrecheckResponse>> {
    let rid = user.ctx.request_id.as_str();
    let Json(request) = body
        .map_err(|e| ApiError::new(JobError::validation("INVALID_METADATA", e.body_text()), rid))?;

    let response = state
        .jobs
        .precheck(&user.ctx, &request)
        .map_err(|e| ApiError::new(e, rid))?;
    Ok(Json(response))
}
