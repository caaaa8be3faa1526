//! Client authentication helpers shared by the REST and websocket surfaces.

use axum::http::{HeaderMap, header::AUTHORIZATION};

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Checks a presented token against the configured API key.
///
/// Without a configured key every caller is accepted.
pub fn is_authorized(api_key: Option<&str>, presented: Option<&str>) -> bool {
    match api_key {
        None => true,
        Some(expected) => presented == Some(expected),
    }
}
