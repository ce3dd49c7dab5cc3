use crate::server::router::CastorState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

/// Bearer key carried through request extensions after authentication, so
/// handlers can attribute usage without re-parsing headers.
#[derive(Debug, Clone)]
pub struct ApiKeyIdentity {
    pub key: String,
    pub is_admin: bool,
}

fn extract_bearer(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

fn is_admin_key(candidate: &str, state: &CastorState) -> bool {
    candidate
        .as_bytes()
        .ct_eq(state.castor_key.as_ref().as_bytes())
        .into()
}

/// Accepts the admin key or any active configured API key. Used on the
/// OpenAI-compatible surface.
#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<CastorState> for RequireKeyAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &CastorState,
    ) -> Result<Self, Self::Rejection> {
        let Some(key) = extract_bearer(&parts.headers) else {
            return Err(AuthError::MissingKey);
        };

        if is_admin_key(&key, state) {
            parts.extensions.insert(ApiKeyIdentity {
                key,
                is_admin: true,
            });
            return Ok(RequireKeyAuth);
        }

        let known = state
            .api_keys
            .list_keys()
            .await
            .map_err(|_| AuthError::InvalidKey)?
            .into_iter()
            .any(|row| row.is_active && row.key.as_bytes().ct_eq(key.as_bytes()).into());
        if known {
            parts.extensions.insert(ApiKeyIdentity {
                key,
                is_admin: false,
            });
            Ok(RequireKeyAuth)
        } else {
            Err(AuthError::InvalidKey)
        }
    }
}

/// Admin surface guard: only the configured service key passes.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdminAuth;

impl FromRequestParts<CastorState> for RequireAdminAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &CastorState,
    ) -> Result<Self, Self::Rejection> {
        match extract_bearer(&parts.headers) {
            Some(key) if is_admin_key(&key, state) => Ok(RequireAdminAuth),
            Some(_) => Err(AuthError::InvalidKey),
            None => Err(AuthError::MissingKey),
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
        };
        (
            status,
            Json(json!({ "error": "unauthorized", "reason": reason })),
        )
            .into_response()
    }
}
