//! Span builder helpers for adaptive-proxy instrumentation.

/// Create a tracing span for the top-level proxy request.
///
/// Usage: `let span = proxy_request_span!(correlation_id, url);`
///
/// Fields recorded later by the pipeline:
/// - `category`: the content category the classifier settled on
/// - `strategy`: `render`, `structured` or `stream`
/// - `cache`: `hit` or `miss`
#[macro_export]
macro_rules! proxy_request_span {
    ($correlation_id:expr, $url:expr) => {
        tracing::info_span!(
            "proxy_request",
            correlation_id = %$correlation_id,
            url = %$url,
            category = tracing::field::Empty,
            strategy = tracing::field::Empty,
            cache = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for a single delivery strategy run.
#[macro_export]
macro_rules! strategy_span {
    ($strategy:expr, $url:expr) => {
        tracing::info_span!(
            "strategy",
            strategy = %$strategy,
            upstream_url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
