use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::Json,
};

use crate::api::handlers::{ApiError, AppState, ErrorResponse};
use crate::store::traits::Store;

/// Axum extractor guarding mutating endpoints.
///
/// Expects `Authorization: Token token=<api token>` (the value may be quoted).
/// When no token is configured every request passes.
#[derive(Debug, Clone, Copy)]
pub struct RequireToken;

#[async_trait]
impl<S> FromRequestParts<AppState<S>> for RequireToken
where
    S: Store + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.auth_token.as_deref() else {
            return Ok(RequireToken);
        };

        match extract_token(&parts.headers) {
            Some(token) if token == expected => Ok(RequireToken),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("unauthorized", "a valid API token is required")),
            )),
        }
    }
}

/// Pull the token out of an `Authorization: Token token=...` header
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let credentials = value.trim().strip_prefix("Token")?.trim_start();
    let token = credentials.strip_prefix("token=")?.trim();
    let token = token.trim_matches('"');
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static(value),
        );
        headers
    }

    #[test]
    fn test_token_extraction() {
        assert_eq!(
            extract_token(&headers("Token token=secret")),
            Some("secret".to_string())
        );
        assert_eq!(
            extract_token(&headers("Token token=\"secret\"")),
            Some("secret".to_string())
        );
        assert_eq!(extract_token(&headers("Bearer secret")), None);
        assert_eq!(extract_token(&headers("Token token=")), None);
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }
}
