//! Extractors that reject with the gateway's error body
//!
//! axum's own `Json` and `Query` rejections answer in plain text; these
//! wrappers turn them into `INVALID_ARGUMENT` so every endpoint shares one
//! error shape.

use std::time::Duration;

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::GatewayError;
use crate::monitoring::window::parse_duration;

/// Header carrying the caller's own deadline for aggregate endpoints
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// JSON body
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(GatewayError::invalid(rejection.body_text())),
        }
    }
}

/// Query string
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => Err(GatewayError::invalid(rejection.body_text())),
        }
    }
}

/// Deadline from `X-Request-Timeout`: whole seconds or a duration like `1500ms`, `10s`
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerDeadline(pub Option<Duration>);

fn parse_deadline(raw: &str) -> Result<Duration, GatewayError> {
    let raw = raw.trim();
    match raw.parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => parse_duration(raw),
    }
}

impl<S> FromRequestParts<S> for CallerDeadline
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(REQUEST_TIMEOUT_HEADER) else {
            return Ok(CallerDeadline(None));
        };
        let raw = value.to_str().map_err(|_| {
            GatewayError::invalid(format!("{} must be ASCII", REQUEST_TIMEOUT_HEADER))
        })?;
        let deadline = parse_deadline(raw).map_err(|_| {
            GatewayError::invalid(format!(
                "{} must be seconds or a duration, got '{}'",
                REQUEST_TIMEOUT_HEADER, raw
            ))
        })?;
        if deadline.is_zero() {
            return Err(GatewayError::invalid(format!(
                "{} must be positive",
                REQUEST_TIMEOUT_HEADER
            )));
        }
        Ok(CallerDeadline(Some(deadline)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deadline() {
        assert_eq!(parse_deadline("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_deadline("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_deadline("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_deadline("soon").is_err());
    }
}
