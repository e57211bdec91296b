//! Byte-stream passthrough for media and other binary content.
//!
//! The body is never buffered: upstream chunks are handed to the client as
//! they arrive, so backpressure is driven by the client connection. Range
//! requests pass through untouched so media players can seek.
//!
//! A `TransferStream` wrapper logs the outcome of each transfer. If the
//! client goes away, hyper drops the body, the wrapper drops the reqwest
//! stream, and the upstream connection closes with it.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use futures_core::Stream;
use tracing::Instrument;
use url::Url;

use super::StrategyOutput;
use crate::error::{StreamTransferError, UpstreamError};
use crate::headers::SanitizedHeaders;
use crate::response::ResponseDescriptor;

/// Upstream response headers copied to the client. Nothing else is forwarded.
const FORWARDED_RESPONSE_HEADERS: [HeaderName; 5] =
    [CONTENT_TYPE, CONTENT_LENGTH, ACCEPT_RANGES, CONTENT_RANGE, CACHE_CONTROL];

/// Passes upstream chunks through unchanged and logs how the transfer ended:
/// completed, failed mid-way, or abandoned by the client.
struct TransferStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    span: tracing::Span,
    /// When the upstream request was sent.
    start: Instant,
    bytes_sent: u64,
    finished: bool,
}

impl Stream for TransferStream {
    type Item = Result<Bytes, StreamTransferError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                let _enter = self.span.enter();
                tracing::error!(
                    error = %e,
                    bytes_sent = self.bytes_sent,
                    "Stream error, terminating transfer"
                );
                Poll::Ready(Some(Err(StreamTransferError(e))))
            }
            Poll::Ready(None) => {
                self.finished = true;
                let _enter = self.span.enter();
                tracing::info!(
                    bytes_sent = self.bytes_sent,
                    total_duration_ms = self.start.elapsed().as_millis() as u64,
                    "Stream complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TransferStream {
    fn drop(&mut self) {
        if !self.finished {
            let _enter = self.span.enter();
            tracing::info!(
                bytes_sent = self.bytes_sent,
                "Client went away, closing upstream transfer"
            );
        }
    }
}

/// Open a streaming GET and hand back its body without reading it.
///
/// `connect_timeout` bounds the wait for response headers only. `range`, when
/// present, is sent verbatim.
pub async fn stream(
    client: &reqwest::Client,
    connect_timeout: Duration,
    url: &Url,
    headers: &SanitizedHeaders,
    range: Option<&str>,
) -> Result<StrategyOutput, UpstreamError> {
    let span = adaptive_tracing::strategy_span!("stream", url);
    let start = Instant::now();

    async {
        let mut outbound = headers.to_header_map();
        if let Some(value) = range.and_then(|r| HeaderValue::from_str(r).ok()) {
            outbound.insert(RANGE, value);
        }

        let send = client.get(url.as_str()).headers(outbound).send();
        let upstream = match tokio::time::timeout(connect_timeout, send).await {
            Ok(result) => result?,
            Err(_) => return Err(UpstreamError::Timeout(connect_timeout)),
        };

        let status = upstream.status();
        tracing::Span::current().record("status", status.as_u16());
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let mut forwarded = HeaderMap::new();
        for name in FORWARDED_RESPONSE_HEADERS.iter() {
            if let Some(value) = upstream.headers().get(name) {
                forwarded.insert(name.clone(), value.clone());
            }
        }

        let body = TransferStream {
            inner: Box::pin(upstream.bytes_stream()),
            span: tracing::Span::current(),
            start,
            bytes_sent: 0,
            finished: false,
        };

        Ok(StrategyOutput {
            descriptor: ResponseDescriptor::Streamed {
                status,
                headers: forwarded,
                body: Box::pin(body),
            },
            cache_write: None,
        })
    }
    .instrument(span)
    .await
}
