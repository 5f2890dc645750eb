use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::error::{ApiError, JobError};
use crate::routes::correlation::RequestId;
use crate::services::identity::AuthError;
use crate::services::jobs::RequestContext;

/// Verified caller of an authenticated route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub ctx: RequestContext,
}

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let RequestId(request_id) = RequestId::from_parts(parts);

        let Some(credential) = bearer(parts) else {
            return Err(ApiError::new(
                JobError::Unauthorized(AuthError::MissingCredential),
                &request_id,
            ));
        };
        let identity = state
            .verifier
            .verify(credential)
            .map_err(|e| ApiError::new(e.into(), &request_id))?;

        Ok(Self {
            ctx: RequestContext {
                request_id,
                owner: identity.owner,
            },
        })
    }
}
