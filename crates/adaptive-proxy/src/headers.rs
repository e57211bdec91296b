//! Client header allow-list.
//!
//! Only a fixed handful of client headers ever reach an upstream origin.
//! Everything else (forwarding chains, hop-by-hop, proxy internals) is dropped.

use axum::http::header::{
    ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, RANGE, REFERER, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Client headers that may be forwarded upstream.
pub const FORWARDED_HEADERS: [HeaderName; 6] =
    [AUTHORIZATION, COOKIE, ACCEPT_LANGUAGE, RANGE, USER_AGENT, REFERER];

/// A header set restricted to [`FORWARDED_HEADERS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedHeaders {
    inner: HeaderMap,
}

/// Reduce `client_headers` to the allow-list. Matching is case-insensitive
/// because `HeaderName` is normalized to lowercase. When a header repeats,
/// the first value wins.
pub fn sanitize(client_headers: &HeaderMap) -> SanitizedHeaders {
    let mut inner = HeaderMap::new();
    for name in FORWARDED_HEADERS.iter() {
        if let Some(value) = client_headers.get(name) {
            inner.insert(name.clone(), value.clone());
        }
    }
    SanitizedHeaders { inner }
}

impl SanitizedHeaders {
    #[cfg(test)]
    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.inner.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Narrow further to `names`. Names outside the allow-list are never present.
    pub fn subset(&self, names: &[HeaderName]) -> SanitizedHeaders {
        let mut inner = HeaderMap::new();
        for name in names {
            if let Some(value) = self.inner.get(name) {
                inner.insert(name.clone(), value.clone());
            }
        }
        SanitizedHeaders { inner }
    }

    /// Outbound header map for an upstream request.
    pub fn to_header_map(&self) -> HeaderMap {
        self.inner.clone()
    }
}
