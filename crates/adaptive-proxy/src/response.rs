//! Response descriptors produced by the pipeline.

use std::fmt;
use std::pin::Pin;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_core::Stream;

use crate::cache::{CacheEntry, CacheKind};
use crate::error::StreamTransferError;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Upstream bytes handed to the client as they arrive.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamTransferError>> + Send>>;

/// What the HTTP layer should send back. The pipeline keeps no reference
/// to it once returned.
pub enum ResponseDescriptor {
    Buffered {
        content_type: &'static str,
        body: String,
    },
    Streamed {
        status: StatusCode,
        /// The forwarded subset of upstream response headers.
        headers: HeaderMap,
        body: ByteStream,
    },
}

impl ResponseDescriptor {
    pub fn html(body: String) -> Self {
        ResponseDescriptor::Buffered {
            content_type: HTML_CONTENT_TYPE,
            body,
        }
    }

    pub fn json(body: String) -> Self {
        ResponseDescriptor::Buffered {
            content_type: JSON_CONTENT_TYPE,
            body,
        }
    }

    pub fn from_cache(entry: CacheEntry) -> Self {
        match entry.kind {
            CacheKind::Html => Self::html(entry.payload),
            CacheKind::Json => Self::json(entry.payload),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            ResponseDescriptor::Buffered { content_type, .. } => Some(*content_type),
            ResponseDescriptor::Streamed { headers, .. } => {
                headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
            }
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, ResponseDescriptor::Streamed { .. })
    }

    /// Body of a buffered descriptor; `None` for streams.
    #[cfg(test)]
    pub fn buffered_body(&self) -> Option<&str> {
        match self {
            ResponseDescriptor::Buffered { body, .. } => Some(body),
            ResponseDescriptor::Streamed { .. } => None,
        }
    }
}

impl fmt::Debug for ResponseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseDescriptor::Buffered { content_type, body } => f
                .debug_struct("Buffered")
                .field("content_type", content_type)
                .field("body_len", &body.len())
                .finish(),
            ResponseDescriptor::Streamed {
                status, headers, ..
            } => f
                .debug_struct("Streamed")
                .field("status", status)
                .field("headers", headers)
                .finish_non_exhaustive(),
        }
    }
}

impl IntoResponse for ResponseDescriptor {
    fn into_response(self) -> Response {
        match self {
            ResponseDescriptor::Buffered { content_type, body } => (
                StatusCode::OK,
                [(CONTENT_TYPE, HeaderValue::from_static(content_type))],
                body,
            )
                .into_response(),
            ResponseDescriptor::Streamed {
                status,
                headers,
                body,
            } => {
                let mut response = Response::new(Body::from_stream(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
        }
    }
}
