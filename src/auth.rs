use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::{error::AppError, state::AppState, utils::secrets_match};

pub const AUTH_HEADER: &str = "x-authentication-code";

/// Caller proved knowledge of the configured type-management secret.
///
/// With no secret configured every request is refused.
#[derive(Debug, Clone, Copy)]
pub struct TypeAdmin;

impl FromRequestParts<AppState> for TypeAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config().auth_code.as_deref() else {
            warn!("Type management requested but no authentication code is configured");
            return Err(AppError::PermissionDenied("Type management is disabled".into()));
        };

        let provided = parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::PermissionDenied("Missing authentication code".into()))?;

        if secrets_match(provided, expected) {
            Ok(TypeAdmin)
        } else {
            warn!("Rejected type management request with a wrong authentication code");
            Err(AppError::PermissionDenied("Invalid authentication code".into()))
        }
    }
}
