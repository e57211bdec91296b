//! Structured fetch: one buffered GET, parsed as JSON.
//!
//! Payloads that embed a playable stream reference are answered with a small
//! player page whose `<video>` source points back at this proxy, so playback
//! goes through the stream strategy. The cache always receives the original
//! JSON, never the player page.

use std::time::Instant;

use serde_json::Value;
use tracing::Instrument;
use url::form_urlencoded;
use url::Url;

use super::StrategyOutput;
use crate::cache::CacheKind;
use crate::error::UpstreamError;
use crate::headers::SanitizedHeaders;
use crate::response::ResponseDescriptor;

/// Path of the proxy endpoint; player pages reference media through it.
pub const PROXY_ROUTE: &str = "/proxy";

pub async fn fetch_structured(
    client: &reqwest::Client,
    url: &Url,
    headers: &SanitizedHeaders,
) -> Result<StrategyOutput, UpstreamError> {
    let span = adaptive_tracing::strategy_span!("structured", url);
    let start = Instant::now();

    async {
        let resp = client
            .get(url.as_str())
            .headers(headers.to_header_map())
            .send()
            .await?;

        let status = resp.status();
        tracing::Span::current().record("status", status.as_u16());
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);

        let data = parse_payload(&body);
        let compact = data.to_string();

        let descriptor = match streaming_link(&data) {
            Some(link) => {
                tracing::info!(link = %link, "JSON contains streaming link, rendering player");
                ResponseDescriptor::html(player_document(link, &data))
            }
            None => ResponseDescriptor::json(compact.clone()),
        };

        Ok(StrategyOutput {
            descriptor,
            cache_write: Some((CacheKind::Json, compact)),
        })
    }
    .instrument(span)
    .await
}

/// Parse the body as JSON. A body that is not JSON is kept whole as a JSON
/// string, so text and CSV endpoints still answer.
fn parse_payload(body: &[u8]) -> Value {
    match serde_json::from_slice(body) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!(error = %e, "Payload is not JSON, passing it through as a string");
            Value::String(String::from_utf8_lossy(body).into_owned())
        }
    }
}

/// First non-empty string among `data.streamingLink`, `data.stream` and
/// a top-level `streamingLink`.
pub fn streaming_link(data: &Value) -> Option<&str> {
    let nested = data.get("data");
    [
        nested.and_then(|d| d.get("streamingLink")),
        nested.and_then(|d| d.get("stream")),
        data.get("streamingLink"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .find(|link| !link.is_empty())
}

/// `/proxy?url=<link>` with the link percent-encoded.
pub fn proxied_reference(link: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(link.as_bytes()).collect();
    format!("{PROXY_ROUTE}?url={encoded}")
}

fn player_document(link: &str, data: &Value) -> String {
    let pretty = format!("{data:#}");
    format!(
        r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>ProxyVideo</title></head>
  <body style="font-family: sans-serif; padding:20px;">
    <h2>Playing stream</h2>
    <p>Source (proxied): {source}</p>
    <video controls autoplay style="width:100%;max-width:1000px;">
      <source src="{src}" />
      Your browser does not support the video tag.
    </video>
    <hr />
    <h3>Raw JSON</h3>
    <pre>{json}</pre>
  </body>
</html>
"#,
        source = escape_text(link),
        src = proxied_reference(link),
        json = escape_text(&pretty),
    )
}

/// Escape markup-significant characters in text content. Quotes are left
/// alone so the embedded JSON stays readable.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_upstream;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    #[test]
    fn test_streaming_link_precedence() {
        let all = json!({
            "data": {"streamingLink": "https://a/1.mp4", "stream": "https://a/2.mp4"},
            "streamingLink": "https://a/3.mp4"
        });
        assert_eq!(streaming_link(&all), Some("https://a/1.mp4"));

        let nested_stream = json!({"data": {"stream": "https://a/2.mp4"}, "streamingLink": "https://a/3.mp4"});
        assert_eq!(streaming_link(&nested_stream), Some("https://a/2.mp4"));

        let top_level = json!({"data": {"title": "x"}, "streamingLink": "https://a/3.mp4"});
        assert_eq!(streaming_link(&top_level), Some("https://a/3.mp4"));
    }

    #[test]
    fn test_streaming_link_ignores_empty_and_non_string_values() {
        let value = json!({"data": {"streamingLink": "", "stream": 42}, "streamingLink": null});
        assert_eq!(streaming_link(&value), None);
        assert_eq!(streaming_link(&json!([1, 2, 3])), None);
        assert_eq!(streaming_link(&json!("plain string")), None);
    }

    #[test]
    fn test_player_document_escapes_markup_in_payload() {
        let data = json!({"streamingLink": "https://cdn.example/v.mp4", "note": "</pre><script>x()</script>"});
        let page = player_document("https://cdn.example/v.mp4", &data);

        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;/pre&gt;&lt;script&gt;"));
    }

    #[tokio::test]
    async fn test_embedded_link_yields_player_page_and_caches_original_json() {
        let app = Router::new().route(
            "/api/data.json",
            get(|| async {
                axum::Json(json!({"streamingLink": "https://cdn.example/video.mp4"}))
            }),
        );
        let addr = spawn_upstream(app).await;
        let url = Url::parse(&format!("http://{addr}/api/data.json")).unwrap();

        let output = fetch_structured(&reqwest::Client::new(), &url, &SanitizedHeaders::default())
            .await
            .unwrap();

        let page = output.descriptor.buffered_body().unwrap();
        assert_eq!(output.descriptor.content_type(), Some(crate::response::HTML_CONTENT_TYPE));
        assert!(page.contains(r#"<source src="/proxy?url=https%3A%2F%2Fcdn.example%2Fvideo.mp4" />"#));
        assert!(page.contains(r#""streamingLink": "https://cdn.example/video.mp4""#));
        assert_eq!(
            output.cache_write,
            Some((
                CacheKind::Json,
                r#"{"streamingLink":"https://cdn.example/video.mp4"}"#.to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_plain_payload_is_returned_as_json() {
        let app = Router::new().route(
            "/api/items",
            get(|| async { ([("content-type", "application/json")], r#"{ "items" : [1, 2] }"#) }),
        );
        let addr = spawn_upstream(app).await;
        let url = Url::parse(&format!("http://{addr}/api/items")).unwrap();

        let output = fetch_structured(&reqwest::Client::new(), &url, &SanitizedHeaders::default())
            .await
            .unwrap();

        assert_eq!(output.descriptor.content_type(), Some(crate::response::JSON_CONTENT_TYPE));
        assert_eq!(output.descriptor.buffered_body(), Some(r#"{"items":[1,2]}"#));
        assert_eq!(output.cache_write, Some((CacheKind::Json, r#"{"items":[1,2]}"#.to_string())));
    }

    #[tokio::test]
    async fn test_error_status_is_an_upstream_error() {
        let app = Router::new().route("/api/missing", get(|| async { StatusCode::NOT_FOUND }));
        let addr = spawn_upstream(app).await;
        let url = Url::parse(&format!("http://{addr}/api/missing")).unwrap();

        let err = fetch_structured(&reqwest::Client::new(), &url, &SanitizedHeaders::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, UpstreamError::Status(404)));
    }

    #[tokio::test]
    async fn test_non_json_body_passes_through_as_json_string() {
        let app = Router::new().route(
            "/api/export",
            get(|| async { ([("content-type", "text/csv")], "a,b,c") }),
        );
        let addr = spawn_upstream(app).await;
        let url = Url::parse(&format!("http://{addr}/api/export")).unwrap();

        let output = fetch_structured(&reqwest::Client::new(), &url, &SanitizedHeaders::default())
            .await
            .unwrap();

        assert_eq!(output.descriptor.content_type(), Some(crate::response::JSON_CONTENT_TYPE));
        assert_eq!(output.descriptor.buffered_body(), Some(r#""a,b,c""#));
        assert_eq!(output.cache_write, Some((CacheKind::Json, r#""a,b,c""#.to_string())));
    }
}
