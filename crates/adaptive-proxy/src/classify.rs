//! Content classification.
//!
//! The category comes from a cheap HEAD probe when the origin answers it,
//! and from URL shape otherwise. Classification never downloads a body.

use std::fmt;

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use url::Url;

use crate::headers::SanitizedHeaders;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Html,
    Json,
    Video,
    Unknown,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Html => "html",
            ContentCategory::Json => "json",
            ContentCategory::Video => "video",
            ContentCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the metadata probe. `Absent` is the normal result for origins
/// that refuse HEAD, time out, or answer with an error status.
#[derive(Debug, Clone)]
pub enum Probe {
    Headers(HeaderMap),
    Absent,
}

/// Send a HEAD request with the sanitized headers. Never fails: every
/// problem is logged and reported as [`Probe::Absent`].
pub async fn probe(client: &reqwest::Client, url: &Url, headers: &SanitizedHeaders) -> Probe {
    let result = client
        .head(url.as_str())
        .headers(headers.to_header_map())
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => Probe::Headers(resp.headers().clone()),
        Ok(resp) => {
            tracing::info!(
                url = %url,
                status = resp.status().as_u16(),
                "HEAD rejected, falling back to URL heuristics"
            );
            Probe::Absent
        }
        Err(e) => {
            tracing::info!(url = %url, error = %e, "HEAD failed, falling back to URL heuristics");
            Probe::Absent
        }
    }
}

/// Assign a category. Probe headers win when they are conclusive; URL
/// rules decide otherwise.
pub fn classify(url: &Url, probe: &Probe) -> ContentCategory {
    if let Probe::Headers(headers) = probe {
        if let Some(category) = category_from_headers(headers) {
            return category;
        }
    }
    category_from_url(url)
}

fn category_from_headers(headers: &HeaderMap) -> Option<ContentCategory> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())?
        .to_ascii_lowercase();

    if content_type.contains("text/html") {
        Some(ContentCategory::Html)
    } else if content_type.contains("application/json") || content_type.contains("+json") {
        Some(ContentCategory::Json)
    } else if content_type.starts_with("video/")
        || content_type.contains("octet-stream")
        || content_type.contains("mpeg")
    {
        Some(ContentCategory::Video)
    } else {
        None
    }
}

fn category_from_url(url: &Url) -> ContentCategory {
    if is_video_url(url) {
        ContentCategory::Video
    } else if is_json_url(url) {
        ContentCategory::Json
    } else if is_html_url(url) {
        ContentCategory::Html
    } else {
        ContentCategory::Unknown
    }
}

/// Lowercased extension of the last path segment, if any.
fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

pub fn is_video_url(url: &Url) -> bool {
    extension(url).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// `/api/` anywhere in the path, or a `.json` file.
pub fn is_json_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().contains("/api/") || extension(url).as_deref() == Some("json")
}

/// `.html`/`.htm` files and directory-style paths.
pub fn is_html_url(url: &Url) -> bool {
    url.path().ends_with('/') || matches!(extension(url).as_deref(), Some("html" | "htm"))
}
