use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::app_state::AppState;
use crate::routes::auth::AuthUser;
use crate::services::queue_router::QueueHealth;

/// GET /api/v1/queue/health: Routing mode and depth of every configured queue.
pub async fn queue_health(State(state): State<AppState>, user: AuthUser) -> Json<QueueHealth> {
    let health = state.jobs.queue_health().await;
    info!(
        stage = "QUEUE_HEALTH",
        owner = %user.ctx.owner,
        queue_mode = %health.queue_mode,
        request_id = %user.ctx.request_id,
        "queue health read"
    );
    Json(health)
}
