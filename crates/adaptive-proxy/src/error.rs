//! Error taxonomy.
//!
//! Strategy-level errors keep their identity inside the pipeline for
//! logging; at the pipeline boundary everything collapses into
//! [`ProxyError`], which is all the HTTP layer ever sees.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The target URL is missing, malformed, or not fetchable. Maps to 400.
    #[error("{0}")]
    InvalidInput(String),

    /// A strategy failed. Maps to 500; only the description survives.
    #[error("{0}")]
    Failure(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::InvalidInput(msg) => {
                (StatusCode::BAD_REQUEST, format!("Invalid URL: {msg}")).into_response()
            }
            ProxyError::Failure(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal Server Error: {msg}"),
            )
                .into_response(),
        }
    }
}

/// Headless render failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser protocol error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),
}

/// Failures talking to the upstream origin (structured fetch and stream).
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream responded with status {0}")]
    Status(u16),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

/// An error raised after a stream has started flowing to the client.
///
/// Bytes already delivered cannot be recalled; the transfer is cut short.
#[derive(Debug, thiserror::Error)]
#[error("stream transfer aborted: {0}")]
pub struct StreamTransferError(#[from] pub reqwest::Error);

/// The error raised by whichever strategy the pipeline dispatched to.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
