//! JWT-based authentication extractors for Axum handlers.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;
use waypoint_core::error::CoreError;
use waypoint_core::types::{DbId, TriggeredBy};

use crate::auth::jwt::{validate_token, JwtConfig};
use crate::error::AppError;
use crate::state::AppState;

/// Authenticated principal extracted from a JWT Bearer token in the
/// `Authorization` header.
///
/// ```ignore
/// async fn my_handler(auth: AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user_id = auth.user_id, role = %auth.role, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The principal's id (from `claims.sub`).
    pub user_id: DbId,
    /// The principal's role name.
    pub role: String,
}

/// Role carried by the job scheduler's tokens.
pub const ROLE_SCHEDULER: &str = "scheduler";

impl AuthUser {
    /// Provenance a submission from this principal is recorded with.
    ///
    /// Scheduler tokens default to `scheduler`, everyone else to `user`.
    /// Only scheduler tokens may claim `scheduler`.
    pub fn trigger(&self, requested: Option<TriggeredBy>) -> Result<TriggeredBy, AppError> {
        let is_scheduler = self.role == ROLE_SCHEDULER;
        let default = if is_scheduler {
            TriggeredBy::Scheduler
        } else {
            TriggeredBy::User
        };

        match requested.unwrap_or(default) {
            TriggeredBy::Scheduler if !is_scheduler => Err(AppError::Core(CoreError::Forbidden(
                "Only the scheduler may submit scheduled jobs".into(),
            ))),
            trigger => Ok(trigger),
        }
    }

    fn from_token(token: &str, config: &JwtConfig) -> Result<Self, AppError> {
        let claims = validate_token(token, config).map_err(|_| {
            AppError::Core(CoreError::Unauthorized("Invalid or expired token".into()))
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <token>".into(),
            ))
        })?;

        AuthUser::from_token(token, &state.config.jwt)
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authenticated principal for WebSocket upgrades.
///
/// Browsers cannot set headers on a WebSocket handshake, so the token is
/// read from the `?token=` query parameter, falling back to the
/// `Authorization` header.
#[derive(Debug, Clone)]
pub struct WsAuthUser(pub AuthUser);

impl FromRequestParts<AppState> for WsAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => Ok(WsAuthUser(AuthUser::from_token(&token, &state.config.jwt)?)),
            None => Ok(WsAuthUser(AuthUser::from_request_parts(parts, state).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn principal(role: &str) -> AuthUser {
        AuthUser {
            user_id: 7,
            role: role.into(),
        }
    }

    #[test]
    fn users_submit_as_user_by_default() {
        assert_eq!(principal("user").trigger(None).unwrap(), TriggeredBy::User);
    }

    #[test]
    fn users_cannot_claim_scheduler_provenance() {
        assert_matches!(
            principal("user").trigger(Some(TriggeredBy::Scheduler)),
            Err(AppError::Core(CoreError::Forbidden(_)))
        );
    }

    #[test]
    fn scheduler_tokens_default_to_scheduler() {
        let scheduler = principal(ROLE_SCHEDULER);
        assert_eq!(scheduler.trigger(None).unwrap(), TriggeredBy::Scheduler);
        assert_eq!(
            scheduler.trigger(Some(TriggeredBy::User)).unwrap(),
            TriggeredBy::User
        );
    }
}
