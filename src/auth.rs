use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::{config::AppConfig, error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|token| !token.is_empty())
}

fn dev_override_user(config: &AppConfig, headers: &HeaderMap) -> Option<Uuid> {
    if !config.auth_dev_overrides_enabled() {
        return None;
    }
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|error| {
            tracing::debug!(%error, "Rejected bearer token");
            AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
        })
}

/// Resolve the calling landlord's user id from the request.
pub fn resolve_user_id(config: &AppConfig, headers: &HeaderMap) -> Result<Uuid, AppError> {
    if let Some(user_id) = dev_override_user(config, headers) {
        return Ok(user_id);
    }

    let Some(token) = bearer_token(headers) else {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing bearer token.".to_string(),
        ));
    };
    let Some(secret) = config.jwt_secret.as_deref() else {
        return Err(AppError::Dependency(
            "Authentication is not configured. Set JWT_SECRET.".to_string(),
        ));
    };

    let claims = verify_token(secret, token)?;
    Uuid::parse_str(claims.sub.trim())
        .map_err(|_| AppError::Unauthorized("Unauthorized: invalid token subject.".to_string()))
}

pub fn require_user_id(state: &AppState, headers: &HeaderMap) -> Result<Uuid, AppError> {
    resolve_user_id(&state.config, headers)
}
