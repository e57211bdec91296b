//! The validated inbound request handed to the pipeline.

use axum::http::header::RANGE;
use axum::http::HeaderMap;
use url::Url;

use crate::error::ProxyError;

/// Prefix of every result cache key.
const CACHE_KEY_PREFIX: &str = "proxy:";

/// A target URL plus the client headers that came with it. Immutable once built.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    url: Url,
    client_headers: HeaderMap,
    range_header: Option<String>,
}

impl TargetRequest {
    /// Validate `raw_url` and capture the client headers.
    ///
    /// Fails with [`ProxyError::InvalidInput`] when the URL is not an absolute
    /// `http`/`https` URI. No network activity happens here.
    pub fn new(raw_url: &str, client_headers: HeaderMap) -> Result<Self, ProxyError> {
        let url = Url::parse(raw_url.trim()).map_err(|e| ProxyError::InvalidInput(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::InvalidInput(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProxyError::InvalidInput("missing host".to_string()));
        }

        let range_header = client_headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            url,
            client_headers,
            range_header,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn client_headers(&self) -> &HeaderMap {
        &self.client_headers
    }

    pub fn range_header(&self) -> Option<&str> {
        self.range_header.as_deref()
    }

    /// Canonical cache key: `proxy:<normalized url>`.
    pub fn cache_key(&self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.url)
    }
}
