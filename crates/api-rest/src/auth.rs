//! Request authentication.
//!
//! Identity is established upstream; this service only reads the result. Requests carry the
//! authenticated account in `x-owner-id`. When an API key is configured, `x-api-key` must match it
//! as well.

use crate::error::ApiError;
use crate::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use scape_core::NonEmptyText;

pub const OWNER_HEADER: &str = "x-owner-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Checks a provided API key against the configured one. No configured key accepts anything.
pub fn validate_api_key(expected: Option<&str>, provided: Option<&str>) -> Result<(), ApiError> {
    match (expected, provided) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(ApiError::unauthorized("Missing x-api-key header")),
        (Some(expected), Some(provided)) if expected == provided => Ok(()),
        (Some(_), Some(_)) => Err(ApiError::unauthorized("Invalid API key")),
    }
}

/// The account a request acts on behalf of.
#[derive(Debug, Clone)]
pub struct Owner(pub NonEmptyText);

#[async_trait]
impl FromRequestParts<AppState> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        validate_api_key(state.api_key(), header(parts, API_KEY_HEADER))?;

        let owner = header(parts, OWNER_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing x-owner-id header"))?;
        NonEmptyText::new(owner)
            .map(Owner)
            .map_err(|_| ApiError::unauthorized("Empty x-owner-id header"))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}
