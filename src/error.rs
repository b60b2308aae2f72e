//! Error taxonomy for acquisition and the HTTP boundary.
//!
//! Tier errors stay inside the orchestrator. Only [`AcquireError`] crosses into the
//! route layer, where [`ApiError`] maps it onto a status code.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Failure of a single acquisition tier. Triggers fallthrough to the next tier.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TierError {
    #[error("not configured for this tier")]
    NotConfigured,
    #[error("http: {0}")]
    Http(String),
    #[error("malformed upstream response: {0}")]
    MalformedUpstream(String),
    #[error("player count not found: {0}")]
    NotFound(String),
    #[error("browser: {0}")]
    Browser(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TierError {
    pub fn is_not_configured(&self) -> bool {
        matches!(self, TierError::NotConfigured)
    }
}

impl From<reqwest::Error> for TierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TierError::Http(format!("request timed out: {e}"))
        } else {
            TierError::Http(e.to_string())
        }
    }
}

/// Everything recorded while every tier failed, surfaced on the 503 body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamFailure {
    pub slug: String,
    pub variant: Option<String>,
    pub via: String,
    pub via_detail: Option<String>,
    pub lobby_error: Option<String>,
    pub plain_error: Option<String>,
    pub browser_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("unknown game {slug} (variant {variant:?})")]
    UnknownGame {
        slug: String,
        variant: Option<String>,
    },
    /// Every tier failed and no stored sample exists. Retryable.
    #[error("upstream unavailable for {}", .0.slug)]
    UpstreamUnavailable(Box<UpstreamFailure>),
}

/// Seconds a client should wait before retrying a 503.
pub const RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureBody<'a> {
    ok: bool,
    error: String,
    #[serde(flatten)]
    failure: &'a UpstreamFailure,
}

#[derive(Serialize)]
struct SimpleErrorBody {
    ok: bool,
    error: String,
}

impl ApiError {
    /// JSON body for this error, also used for per-game entries of the batch route.
    pub fn body(&self) -> serde_json::Value {
        let value = match self {
            ApiError::Acquire(AcquireError::UpstreamUnavailable(failure)) => {
                serde_json::to_value(FailureBody {
                    ok: false,
                    error: self.to_string(),
                    failure,
                })
            }
            _ => serde_json::to_value(SimpleErrorBody {
                ok: false,
                error: self.to_string(),
            }),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Acquire(AcquireError::UpstreamUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Acquire(AcquireError::UnknownGame { .. }) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!(error = %e, "request failed");
        }
        let status = self.status();
        let mut response = (status, Json(self.body())).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_unavailable_maps_to_503_with_retry_after() {
        let err = ApiError::from(AcquireError::UpstreamUnavailable(Box::new(
            UpstreamFailure {
                slug: "crazy-time".into(),
                via: "playwright".into(),
                lobby_error: Some("http: 502".into()),
                ..Default::default()
            },
        )));
        let body = err.body();
        assert_eq!(body["ok"], false);
        assert_eq!(body["slug"], "crazy-time");
        assert_eq!(body["lobbyError"], "http: 502");
        assert!(body["plainError"].is_null());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "60"
        );
    }

    #[test]
    fn unknown_game_is_404() {
        let err = ApiError::from(AcquireError::UnknownGame {
            slug: "nope".into(),
            variant: None,
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
