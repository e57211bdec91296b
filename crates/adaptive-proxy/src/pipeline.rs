//! Request coordinator: cache lookup, probe, classify, dispatch.
//!
//! Exactly one strategy runs per cache miss and there is no fallback to
//! another strategy once one has been chosen. Strategy errors keep their
//! type up to this point and are flattened into [`ProxyError::Failure`] here.

use std::sync::Arc;

use tracing::Instrument;
use url::Url;

use crate::cache::{CacheKind, ResultCache};
use crate::classify::{self, ContentCategory};
use crate::config::DispatchConfig;
use crate::error::{ProxyError, StrategyError};
use crate::headers::{sanitize, SanitizedHeaders};
use crate::request::TargetRequest;
use crate::response::ResponseDescriptor;
use crate::stats::ProxyStats;
use crate::strategy::render::PageRenderer;
use crate::strategy::{stream, structured, StrategyKind, StrategyOutput};
use crate::upstream::UpstreamClients;

/// Pick the strategy for a classified URL.
///
/// HTML, and unknown content at an HTML-looking URL, is rendered. JSON is
/// fetched structurally, as is any JSON-looking URL when
/// `json_url_override` is on, whatever the probe said. Everything else is
/// streamed.
pub fn select_strategy(
    category: ContentCategory,
    url: &Url,
    json_url_override: bool,
) -> StrategyKind {
    match category {
        ContentCategory::Html => StrategyKind::Render,
        ContentCategory::Unknown if classify::is_html_url(url) => StrategyKind::Render,
        ContentCategory::Json => StrategyKind::Structured,
        _ if json_url_override && classify::is_json_url(url) => StrategyKind::Structured,
        _ => StrategyKind::Stream,
    }
}

pub struct Pipeline {
    cache: Arc<dyn ResultCache>,
    renderer: Arc<dyn PageRenderer>,
    clients: UpstreamClients,
    stats: ProxyStats,
    dispatch: DispatchConfig,
}

impl Pipeline {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        renderer: Arc<dyn PageRenderer>,
        clients: UpstreamClients,
        stats: ProxyStats,
        dispatch: DispatchConfig,
    ) -> Self {
        Self {
            cache,
            renderer,
            clients,
            stats,
            dispatch,
        }
    }

    /// Serve one proxied request.
    pub async fn handle(
        &self,
        request: &TargetRequest,
        correlation_id: &str,
    ) -> Result<ResponseDescriptor, ProxyError> {
        let span = adaptive_tracing::proxy_request_span!(correlation_id, request.url());
        self.stats.inc_requests();

        async {
            let key = request.cache_key();
            if let Some(entry) = self.cache.get(&key) {
                tracing::Span::current().record("cache", "hit");
                self.stats.inc_cache_hits();
                tracing::info!(key = %entry.key, kind = ?entry.kind, "Serving from cache");
                return Ok(ResponseDescriptor::from_cache(entry));
            }
            tracing::Span::current().record("cache", "miss");

            let headers = sanitize(request.client_headers());
            let probe = classify::probe(&self.clients.probe, request.url(), &headers).await;
            let category = classify::classify(request.url(), &probe);
            let strategy =
                select_strategy(category, request.url(), self.dispatch.json_url_override);

            let span = tracing::Span::current();
            span.record("category", category.as_str());
            span.record("strategy", strategy.as_str());
            self.stats.inc_strategy(strategy);
            tracing::info!(
                category = %category,
                strategy = %strategy,
                forwarded_headers = headers.len(),
                "Dispatching"
            );

            match self.run(strategy, request, &headers).await {
                Ok(output) => {
                    tracing::debug!(
                        streamed = output.descriptor.is_streamed(),
                        content_type = output.descriptor.content_type().unwrap_or("unknown"),
                        cached = output.cache_write.is_some(),
                        "Strategy complete"
                    );
                    if let Some((kind, payload)) = output.cache_write {
                        self.cache.put(&key, kind, payload);
                    }
                    Ok(output.descriptor)
                }
                Err(e) => {
                    self.stats.inc_failures();
                    tracing::error!(url = %request.url(), error = %e, "Strategy failed");
                    Err(ProxyError::Failure(e.to_string()))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        strategy: StrategyKind,
        request: &TargetRequest,
        headers: &SanitizedHeaders,
    ) -> Result<StrategyOutput, StrategyError> {
        let url = request.url();
        let output = match strategy {
            StrategyKind::Render => {
                let html = self.renderer.render(url, headers).await?;
                StrategyOutput {
                    descriptor: ResponseDescriptor::html(html.clone()),
                    cache_write: Some((CacheKind::Html, html)),
                }
            }
            StrategyKind::Structured => {
                structured::fetch_structured(&self.clients.fetch, url, headers).await?
            }
            StrategyKind::Stream => {
                stream::stream(
                    &self.clients.stream,
                    self.clients.stream_connect_timeout,
                    url,
                    headers,
                    request.range_header(),
                )
                .await?
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::{HeaderMap, Method};
    use axum::response::Html;
    use axum::routing::get;
    use axum::Router;
    use futures_util::StreamExt;
    use serde_json::json;

    use crate::cache::MemoryCache;
    use crate::config::UpstreamConfig;
    use crate::test_support::{spawn_upstream, CountingRenderer};

    fn pipeline(renderer: CountingRenderer, json_url_override: bool) -> (Pipeline, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(300)));
        let clients = UpstreamClients::from_config(&UpstreamConfig::default()).unwrap();
        let pipeline = Pipeline::new(
            cache.clone(),
            Arc::new(renderer),
            clients,
            ProxyStats::new(),
            DispatchConfig { json_url_override },
        );
        (pipeline, cache)
    }

    fn target(url: String) -> TargetRequest {
        TargetRequest::new(&url, HeaderMap::new()).unwrap()
    }

    /// Counts GETs only; axum also answers HEAD on `get` routes.
    fn counting_route(
        counter: Arc<AtomicUsize>,
        content_type: &'static str,
        body: &'static str,
    ) -> axum::routing::MethodRouter {
        get(move |method: Method| {
            let counter = counter.clone();
            async move {
                if method == Method::GET {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                ([("content-type", content_type)], body)
            }
        })
    }

    #[test]
    fn test_strategy_selection_table() {
        let page = Url::parse("https://a.example/docs/").unwrap();
        let api = Url::parse("https://a.example/api/clip").unwrap();
        let blob = Url::parse("https://a.example/download").unwrap();

        assert_eq!(select_strategy(ContentCategory::Html, &blob, true), StrategyKind::Render);
        assert_eq!(select_strategy(ContentCategory::Unknown, &page, true), StrategyKind::Render);
        assert_eq!(select_strategy(ContentCategory::Json, &blob, false), StrategyKind::Structured);
        assert_eq!(select_strategy(ContentCategory::Video, &api, true), StrategyKind::Structured);
        assert_eq!(select_strategy(ContentCategory::Video, &api, false), StrategyKind::Stream);
        assert_eq!(select_strategy(ContentCategory::Unknown, &blob, true), StrategyKind::Stream);
    }

    #[tokio::test]
    async fn test_html_is_rendered_once_then_served_from_cache() {
        let app = Router::new().route("/page/", get(|| async { Html("<p>origin</p>") }));
        let addr = spawn_upstream(app).await;
        let renderer = CountingRenderer::default();
        let (pipeline, cache) = pipeline(renderer.clone(), true);
        let request = target(format!("http://{addr}/page/"));

        let first = pipeline.handle(&request, "c1").await.unwrap();
        let second = pipeline.handle(&request, "c2").await.unwrap();

        assert_eq!(renderer.call_count(), 1);
        assert_eq!(first.buffered_body(), second.buffered_body());
        assert_eq!(second.content_type(), Some(crate::response::HTML_CONTENT_TYPE));
        assert_eq!(cache.list_keys(), vec![request.cache_key()]);

        let stats = pipeline.stats.snapshot();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.rendered, 1);
    }

    #[tokio::test]
    async fn test_json_is_fetched_once_then_served_from_cache() {
        let gets = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/items.json",
            counting_route(gets.clone(), "application/json", r#"{"items": [1, 2]}"#),
        );
        let addr = spawn_upstream(app).await;
        let (pipeline, _cache) = pipeline(CountingRenderer::default(), true);
        let request = target(format!("http://{addr}/items.json"));

        let first = pipeline.handle(&request, "c1").await.unwrap();
        let second = pipeline.handle(&request, "c2").await.unwrap();

        assert_eq!(gets.load(Ordering::SeqCst), 1);
        assert_eq!(first.buffered_body(), Some(r#"{"items":[1,2]}"#));
        assert_eq!(second.buffered_body(), Some(r#"{"items":[1,2]}"#));
        assert_eq!(second.content_type(), Some(crate::response::JSON_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_video_is_streamed_every_time_and_never_cached() {
        let gets = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route("/media/clip.mp4", counting_route(gets.clone(), "video/mp4", "frames"));
        let addr = spawn_upstream(app).await;
        let renderer = CountingRenderer::default();
        let (pipeline, cache) = pipeline(renderer.clone(), true);
        let request = target(format!("http://{addr}/media/clip.mp4"));

        for _ in 0..2 {
            let descriptor = pipeline.handle(&request, "c").await.unwrap();
            let ResponseDescriptor::Streamed { mut body, .. } = descriptor else {
                panic!("expected a stream");
            };
            while body.next().await.is_some() {}
        }

        assert_eq!(gets.load(Ordering::SeqCst), 2);
        assert!(cache.list_keys().is_empty());
        assert_eq!(renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_api_url_with_streaming_link_yields_player_page() {
        let app = Router::new().route(
            "/api/data.json",
            get(|| async { axum::Json(json!({"streamingLink": "https://cdn.example/video.mp4"})) }),
        );
        let addr = spawn_upstream(app).await;
        let (pipeline, cache) = pipeline(CountingRenderer::default(), true);
        let request = target(format!("http://{addr}/api/data.json"));

        let descriptor = pipeline.handle(&request, "c").await.unwrap();

        let page = descriptor.buffered_body().unwrap();
        assert!(page.contains("<title>ProxyVideo</title>"));
        assert!(page.contains("/proxy?url=https%3A%2F%2Fcdn.example%2Fvideo.mp4"));
        let cached = cache.get(&request.cache_key()).unwrap();
        assert_eq!(cached.kind, CacheKind::Json);
    }

    #[tokio::test]
    async fn test_json_url_override_can_be_disabled() {
        let app = Router::new().route(
            "/api/clip",
            get(|| async { ([("content-type", "video/mp4")], r#"{"ok":true}"#) }),
        );
        let addr = spawn_upstream(app).await;
        let url = format!("http://{addr}/api/clip");

        let (with_override, _) = pipeline(CountingRenderer::default(), true);
        let descriptor = with_override.handle(&target(url.clone()), "c1").await.unwrap();
        assert_eq!(descriptor.buffered_body(), Some(r#"{"ok":true}"#));

        let (without_override, cache) = pipeline(CountingRenderer::default(), false);
        let descriptor = without_override.handle(&target(url), "c2").await.unwrap();
        assert!(descriptor.is_streamed());
        assert!(cache.list_keys().is_empty());
    }

    #[tokio::test]
    async fn test_api_url_with_text_body_is_answered_and_cached() {
        let app = Router::new().route(
            "/api/export",
            get(|| async { ([("content-type", "text/csv")], "a,b,c") }),
        );
        let addr = spawn_upstream(app).await;
        let (pipeline, cache) = pipeline(CountingRenderer::default(), true);
        let request = target(format!("http://{addr}/api/export"));

        let descriptor = pipeline.handle(&request, "c").await.unwrap();

        assert_eq!(descriptor.buffered_body(), Some(r#""a,b,c""#));
        assert_eq!(cache.list_keys(), vec![request.cache_key()]);
        assert_eq!(cache.get(&request.cache_key()).unwrap().kind, CacheKind::Json);
    }

    #[tokio::test]
    async fn test_render_failure_is_reported_and_not_cached() {
        let app = Router::new().route("/broken/", get(|| async { Html("<p>x</p>") }));
        let addr = spawn_upstream(app).await;
        let (pipeline, cache) = pipeline(CountingRenderer::failing(), true);
        let request = target(format!("http://{addr}/broken/"));

        let err = pipeline.handle(&request, "c").await.unwrap_err();

        match err {
            ProxyError::Failure(msg) => assert!(msg.contains("ERR_NAME_NOT_RESOLVED"), "{msg}"),
            other => panic!("expected Failure, got {other:?}"),
        }
        assert!(cache.list_keys().is_empty());
        assert_eq!(pipeline.stats.snapshot().failures, 1);
    }

    #[tokio::test]
    async fn test_origin_refusing_head_falls_back_to_url_rules() {
        let app = Router::new().route("/landing/", axum::routing::post(|| async { "nope" }));
        let addr = spawn_upstream(app).await;
        let renderer = CountingRenderer::default();
        let (pipeline, _cache) = pipeline(renderer.clone(), true);

        let descriptor = pipeline
            .handle(&target(format!("http://{addr}/landing/")), "c")
            .await
            .unwrap();

        assert_eq!(renderer.call_count(), 1);
        assert!(descriptor.buffered_body().unwrap().contains("rendered"));
    }
}
