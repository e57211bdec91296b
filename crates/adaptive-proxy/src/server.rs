//! Axum HTTP server: router, listener, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use adaptive_tracing::LogTail;
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::cache::ResultCache;
use crate::config::ProxyConfig;
use crate::correlation::{self, CORRELATION_HEADER};
use crate::pipeline::Pipeline;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::request::TargetRequest;
use crate::stats::{ProxyStats, StatsSnapshot};
use crate::strategy::render::PageRenderer;
use crate::strategy::structured::PROXY_ROUTE;
use crate::upstream::UpstreamClients;

/// Shared application state.
pub struct AppState {
    pub config: ProxyConfig,
    pub pipeline: Pipeline,
    pub cache: Arc<dyn ResultCache>,
    pub stats: ProxyStats,
    pub log_tail: LogTail,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the pipeline and its collaborators from configuration.
    pub fn new(
        config: ProxyConfig,
        cache: Arc<dyn ResultCache>,
        renderer: Arc<dyn PageRenderer>,
        log_tail: LogTail,
    ) -> anyhow::Result<Self> {
        let clients = UpstreamClients::from_config(&config.upstream)?;
        let stats = ProxyStats::new();
        let pipeline = Pipeline::new(
            cache.clone(),
            renderer,
            clients,
            stats.clone(),
            config.dispatch.clone(),
        );
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Ok(Self {
            config,
            pipeline,
            cache,
            stats,
            log_tail,
            limiter,
        })
    }
}

/// Build the router with every layer applied.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ACCEPT,
            AUTHORIZATION,
        ]);

    let powered_by = HeaderValue::from_str(&state.config.server.powered_by)
        .unwrap_or_else(|_| HeaderValue::from_static("adaptive-proxy"));

    let mut app = Router::new()
        .route(PROXY_ROUTE, get(handle_proxy))
        .route("/admin", get(handle_admin))
        .route("/health", get(handle_health))
        .fallback(handle_fallback)
        .with_state(state.clone());

    // Innermost, so rejected requests still get CORS and the powered-by header.
    if state.config.rate_limit.enabled {
        app = app.layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));
    }

    app.layer(SetResponseHeaderLayer::overriding(
        HeaderName::from_static("x-powered-by"),
        powered_by,
    ))
    .layer(cors)
    .layer(TraceLayer::new_for_http())
}

/// Build and run the HTTP server.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "adaptive-proxy listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("adaptive-proxy shut down gracefully");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

/// GET /proxy?url=<target>
async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Response {
    let correlation_id = correlation::from_headers(&headers);

    let mut response = match query.url.filter(|u| !u.trim().is_empty()) {
        None => (StatusCode::BAD_REQUEST, "Missing url query parameter").into_response(),
        Some(raw_url) => match TargetRequest::new(&raw_url, headers) {
            Ok(request) => match state.pipeline.handle(&request, &correlation_id).await {
                Ok(descriptor) => descriptor.into_response(),
                Err(e) => e.into_response(),
            },
            Err(e) => {
                tracing::info!(url = %raw_url, error = %e, "Rejected target URL");
                e.into_response()
            }
        },
    };

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[derive(Debug, Serialize)]
struct AdminView {
    total_cached: usize,
    keys: Vec<String>,
    stats: StatsSnapshot,
    logs: Vec<String>,
}

/// GET /admin: cache contents, counters and recent log lines.
async fn handle_admin(State(state): State<Arc<AppState>>) -> Response {
    let mut keys = state.cache.list_keys();
    keys.sort();
    axum::Json(AdminView {
        total_cached: keys.len(),
        keys,
        stats: state.stats.snapshot(),
        logs: state.log_tail.lines(),
    })
    .into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn handle_fallback() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::IntoFuture;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::cache::MemoryCache;
    use crate::test_support::{spawn_upstream, CountingRenderer};

    async fn spawn_proxy(config: ProxyConfig, renderer: CountingRenderer) -> (SocketAddr, Arc<AppState>) {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(config.cache.ttl_secs)));
        let state = Arc::new(
            AppState::new(config, cache, Arc::new(renderer), LogTail::new(10)).unwrap(),
        );
        let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        (addr, state)
    }

    #[tokio::test]
    async fn test_missing_url_is_rejected() {
        let (addr, _) = spawn_proxy(ProxyConfig::default(), CountingRenderer::default()).await;

        for path in ["/proxy", "/proxy?url="] {
            let resp = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert!(resp.headers().contains_key(CORRELATION_HEADER));
            assert_eq!(resp.text().await.unwrap(), "Missing url query parameter");
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let (addr, _) = spawn_proxy(ProxyConfig::default(), CountingRenderer::default()).await;

        let resp = reqwest::get(format!("http://{addr}/proxy?url=not%20a%20url"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.text().await.unwrap().starts_with("Invalid URL: "));
    }

    #[tokio::test]
    async fn test_strategy_failure_is_a_500() {
        let upstream = spawn_upstream(Router::new().route(
            "/page/",
            get(|| async { axum::response::Html("<p>hi</p>") }),
        ))
        .await;
        let (addr, _) = spawn_proxy(ProxyConfig::default(), CountingRenderer::failing()).await;

        let target = format!("http://{upstream}/page/");
        let resp = reqwest::Client::new()
            .get(format!("http://{addr}/proxy"))
            .query(&[("url", target.as_str())])
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp
            .text()
            .await
            .unwrap()
            .starts_with("Internal Server Error: "));
    }

    #[tokio::test]
    async fn test_proxied_json_shows_up_in_admin_view() {
        let upstream = spawn_upstream(Router::new().route(
            "/api/items",
            get(|| async { axum::Json(json!({"items": [1]})) }),
        ))
        .await;
        let (addr, _) = spawn_proxy(ProxyConfig::default(), CountingRenderer::default()).await;
        let client = reqwest::Client::new();
        let target = format!("http://{upstream}/api/items");

        let resp = client
            .get(format!("http://{addr}/proxy"))
            .query(&[("url", target.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(resp.text().await.unwrap(), r#"{"items":[1]}"#);

        let admin: Value = client
            .get(format!("http://{addr}/admin"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(admin["total_cached"], 1);
        assert_eq!(admin["keys"][0], format!("proxy:{target}"));
        assert_eq!(admin["stats"]["structured"], 1);
        assert!(admin["logs"].is_array());
    }

    #[tokio::test]
    async fn test_common_response_headers() {
        let (addr, _) = spawn_proxy(ProxyConfig::default(), CountingRenderer::default()).await;

        let resp = reqwest::Client::new()
            .get(format!("http://{addr}/health"))
            .header("origin", "https://app.example")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-powered-by").unwrap(), "adaptive-proxy");
        assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (addr, _) = spawn_proxy(ProxyConfig::default(), CountingRenderer::default()).await;

        let resp = reqwest::get(format!("http://{addr}/nope")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_per_client() {
        let mut config = ProxyConfig::default();
        config.rate_limit.requests_per_minute = 2;
        let (addr, _) = spawn_proxy(config, CountingRenderer::default()).await;
        let url = format!("http://{addr}/health");

        assert_eq!(reqwest::get(&url).await.unwrap().status(), StatusCode::OK);
        assert_eq!(reqwest::get(&url).await.unwrap().status(), StatusCode::OK);
        let rejected = reqwest::get(&url).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers().get("x-powered-by").unwrap(), "adaptive-proxy");
    }
}
