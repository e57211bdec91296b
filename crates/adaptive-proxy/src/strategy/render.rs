//! Headless rendering through Chromium.
//!
//! Each call launches its own browser with a throwaway profile directory, so
//! no cookies, storage or cache leak between requests. The browser lives in
//! a [`BrowserSession`] guard: the normal path closes it explicitly. On any
//! other exit (error, timeout, cancelled request future) the guard's drop
//! spawns a task that kills the process and then removes the profile.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, REFERER};
use axum::http::HeaderName;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, Headers,
    SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventDomContentEventFired, NavigateParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures_util::StreamExt;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::headers::SanitizedHeaders;

/// Renders a URL to its serialized DOM.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url, headers: &SanitizedHeaders) -> Result<String, RenderError>;
}

#[async_trait]
impl<T: PageRenderer + ?Sized> PageRenderer for Arc<T> {
    async fn render(&self, url: &Url, headers: &SanitizedHeaders) -> Result<String, RenderError> {
        (**self).render(url, headers).await
    }
}

/// Client headers the browsing context may send. User agent and range are
/// deliberately absent: the browser picks its own identity and fetches whole documents.
const BROWSER_HEADERS: [HeaderName; 4] = [AUTHORIZATION, COOKIE, ACCEPT_LANGUAGE, REFERER];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.5735.198 Safari/537.36",
];

const LAUNCH_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--no-first-run",
];

/// Evaluated before any page script on every new document.
const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Extra HTTP headers for the browsing context, as the CDP JSON object.
fn browser_headers(headers: &SanitizedHeaders) -> serde_json::Map<String, serde_json::Value> {
    headers
        .subset(&BROWSER_HEADERS)
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), serde_json::Value::from(value)))
        })
        .collect()
}

/// A launched browser and the task pumping its CDP connection.
///
/// `browser` is `None` once [`BrowserSession::close`] has run. A session
/// dropped while still holding its browser hands teardown to a spawned task.
struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl BrowserSession {
    async fn launch(config: &RenderConfig, profile_root: &Path) -> Result<Self, RenderError> {
        let profile_dir = profile_root.join(format!("adaptive-proxy-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .user_data_dir(&profile_dir)
            .request_timeout(Duration::from_secs(config.navigation_timeout_secs))
            .args(LAUNCH_ARGS.iter().copied());
        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = match Browser::launch(browser_config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile(&profile_dir).await;
                return Err(RenderError::Launch(e.to_string()));
            }
        };
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            browser: Some(browser),
            handler,
            profile_dir,
        })
    }

    async fn close(mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "Browser did not close cleanly, killing it");
            let _ = browser.kill().await;
        }
        let _ = browser.wait().await;
        self.handler.abort();
        remove_profile(&self.profile_dir).await;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        let Some(browser) = self.browser.take() else {
            return;
        };
        tracing::debug!("Browser session dropped before close, tearing down");
        let profile_dir = std::mem::take(&mut self.profile_dir);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(teardown(browser, profile_dir));
            }
            // No runtime left to await on; `Browser`'s own drop kills the process.
            Err(_) => drop(browser),
        }
    }
}

/// Kill the process, reap it, then delete its profile.
async fn teardown(mut browser: Browser, profile_dir: PathBuf) {
    if let Some(Err(e)) = browser.kill().await {
        tracing::debug!(error = %e, "Browser kill failed");
    }
    let _ = browser.wait().await;
    remove_profile(&profile_dir).await;
}

async fn remove_profile(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!(error = %e, dir = %dir.display(), "Could not remove browser profile")
        }
    }
}

/// In-flight request bookkeeping for the network-idle wait.
struct NetworkActivity {
    started: EventStream<EventRequestWillBeSent>,
    finished: EventStream<EventLoadingFinished>,
    failed: EventStream<EventLoadingFailed>,
    in_flight: usize,
}

impl NetworkActivity {
    async fn subscribe(page: &Page) -> Result<Self, RenderError> {
        Ok(Self {
            started: page.event_listener::<EventRequestWillBeSent>().await?,
            finished: page.event_listener::<EventLoadingFinished>().await?,
            failed: page.event_listener::<EventLoadingFailed>().await?,
            in_flight: 0,
        })
    }

    /// Resolve once no request has been outstanding for `window`.
    async fn wait_for_idle(&mut self, window: Duration) {
        loop {
            tokio::select! {
                Some(event) = self.started.next() => {
                    // Redirect hops reuse the original request id.
                    if event.redirect_response.is_none() {
                        self.in_flight += 1;
                    }
                }
                Some(_) = self.finished.next() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                }
                Some(_) = self.failed.next() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                }
                _ = tokio::time::sleep(window), if self.in_flight == 0 => return,
                else => return,
            }
        }
    }
}

/// [`PageRenderer`] backed by a locally launched Chromium.
pub struct ChromeRenderer {
    config: RenderConfig,
    /// Parent of the per-render profile directories.
    profile_root: PathBuf,
}

impl ChromeRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            profile_root: std::env::temp_dir(),
        }
    }

    pub fn with_profile_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.profile_root = root.into();
        self
    }

    async fn render_page(
        &self,
        browser: &Browser,
        url: &Url,
        headers: &SanitizedHeaders,
    ) -> Result<String, RenderError> {
        let page = browser.new_page("about:blank").await?;

        page.execute(SetUserAgentOverrideParams::new(random_user_agent()))
            .await?;
        let extra = browser_headers(headers);
        if !extra.is_empty() {
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(extra),
            )))
            .await?;
        }
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER))
            .await?;

        // Subscribe before navigating so no event is missed.
        let mut dom_ready = page.event_listener::<EventDomContentEventFired>().await?;
        let mut activity = NetworkActivity::subscribe(&page).await?;

        let navigation_timeout = Duration::from_secs(self.config.navigation_timeout_secs);
        let navigate = async {
            let navigation = page.execute(NavigateParams::new(url.as_str())).await?;
            if let Some(error) = navigation.result.error_text.clone() {
                return Err(RenderError::Navigation(error));
            }
            match dom_ready.next().await {
                Some(_) => Ok(()),
                None => Err(RenderError::Navigation(
                    "page closed before DOMContentLoaded".to_string(),
                )),
            }
        };
        match tokio::time::timeout(navigation_timeout, navigate).await {
            Ok(result) => result?,
            Err(_) => return Err(RenderError::Timeout(navigation_timeout)),
        }

        // Challenge pages need a moment to run their scripts.
        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        let idle_timeout = Duration::from_secs(self.config.network_idle_timeout_secs);
        let idle_window = Duration::from_millis(self.config.network_idle_ms);
        if tokio::time::timeout(idle_timeout, activity.wait_for_idle(idle_window))
            .await
            .is_err()
        {
            tracing::debug!(
                in_flight = activity.in_flight,
                "Network never went idle, capturing page anyway"
            );
        }

        Ok(page.content().await?)
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &Url, headers: &SanitizedHeaders) -> Result<String, RenderError> {
        let span = adaptive_tracing::strategy_span!("render", url);
        let start = Instant::now();

        async {
            let session = BrowserSession::launch(&self.config, &self.profile_root).await?;
            let result = match session.browser.as_ref() {
                Some(browser) => self.render_page(browser, url, headers).await,
                None => Err(RenderError::Launch("browser session already closed".to_string())),
            };
            session.close().await;

            tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);
            result
        }
        .instrument(span)
        .await
    }
}
