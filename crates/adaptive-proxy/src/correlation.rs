//! Per-request correlation IDs.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Response header carrying the ID that tags every log line of a request.
pub const CORRELATION_HEADER: &str = "x-proxy-request-id";

/// Reuse a well-formed ID supplied by the client, or mint a new UUID v4.
pub fn from_headers(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| Uuid::parse_str(id).is_ok())
        .map(str::to_string)
        .unwrap_or_else(generate_id)
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_supplied_uuid_is_kept() {
        let id = "6f1c2a0e-4d1b-4b59-9a3e-2f7c1d8b9e10";
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static(id));

        assert_eq!(from_headers(&headers), id);
    }

    #[test]
    fn test_garbage_id_is_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("'; drop table"));

        let id = from_headers(&headers);
        assert_ne!(id, "'; drop table");
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
