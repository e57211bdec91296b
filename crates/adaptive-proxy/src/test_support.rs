//! Shared helpers for tests that need a live upstream or a render double.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::RenderError;
use crate::headers::SanitizedHeaders;
use crate::strategy::render::PageRenderer;

/// Serve `app` on an ephemeral localhost port and return its address.
pub async fn spawn_upstream(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

/// Render double that returns a canned document and counts calls.
#[derive(Clone, Default)]
pub struct CountingRenderer {
    pub calls: Arc<AtomicUsize>,
    pub fail: bool,
}

impl CountingRenderer {
    pub fn failing() -> Self {
        Self {
            calls: Arc::default(),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for CountingRenderer {
    async fn render(&self, url: &Url, _headers: &SanitizedHeaders) -> Result<String, RenderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(RenderError::Navigation("net::ERR_NAME_NOT_RESOLVED".to_string()));
        }
        Ok(format!("<html><body>rendered {url} #{n}</body></html>"))
    }
}
