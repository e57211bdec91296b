//! Configuration types and loading logic.

use adaptive_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level proxy configuration. Every section has defaults, so an absent
/// config file yields a working proxy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Value of the `X-Powered-By` header set on every response.
    #[serde(default = "default_powered_by")]
    pub powered_by: String,
}

/// Timeouts and redirect caps for upstream HTTP traffic.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Time allowed for a stream's response headers to arrive. The body
    /// transfer itself is unbounded.
    #[serde(default = "default_stream_connect_timeout")]
    pub stream_connect_timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Headless browser settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Chromium executable. Auto-detected when unset. `CHROME_PATH` overrides.
    #[serde(default)]
    pub chrome_path: Option<String>,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Fixed pause after DOMContentLoaded so challenge scripts can run.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_network_idle_timeout")]
    pub network_idle_timeout_secs: u64,

    /// How long the network must stay quiet to count as idle.
    #[serde(default = "default_network_idle_ms")]
    pub network_idle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Route URLs that look like API/JSON endpoints to the structured
    /// fetcher even when the probe classified them as something else.
    #[serde(default = "default_true")]
    pub json_url_override: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Number of recent log lines kept for `/admin`.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_listen_address() -> String {
    "0.0.0.0:3002".to_string()
}

fn default_powered_by() -> String {
    "adaptive-proxy".to_string()
}

fn default_probe_timeout() -> u64 {
    15
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_stream_connect_timeout() -> u64 {
    120
}

fn default_max_redirects() -> usize {
    5
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_navigation_timeout() -> u64 {
    120
}

fn default_settle_ms() -> u64 {
    4000
}

fn default_network_idle_timeout() -> u64 {
    20
}

fn default_network_idle_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_log_tail_lines() -> usize {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            powered_by: default_powered_by(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            stream_connect_timeout_secs: default_stream_connect_timeout(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            navigation_timeout_secs: default_navigation_timeout(),
            settle_ms: default_settle_ms(),
            network_idle_timeout_secs: default_network_idle_timeout(),
            network_idle_ms: default_network_idle_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            json_url_override: default_true(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. `PORT` and `CHROME_PATH`
    /// 2. Environment variables (ADAPTIVE_ prefix, __ for nesting)
    /// 3. TOML config file (optional)
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: ProxyConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("ADAPTIVE_").split("__"))
            .extract()?;

        if let Ok(port) = std::env::var("PORT") {
            config.server.listen_address = format!("0.0.0.0:{port}");
        }
        if let Ok(path) = std::env::var("CHROME_PATH") {
            config.render.chrome_path = Some(path);
        }

        Ok(config)
    }
}
