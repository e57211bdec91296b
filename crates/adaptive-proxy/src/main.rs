//! adaptive-proxy: reverse proxy that renders documents, fetches API payloads and streams media.

mod cache;
mod classify;
mod config;
mod correlation;
mod error;
mod headers;
mod pipeline;
mod rate_limit;
mod request;
mod response;
mod server;
mod stats;
mod strategy;
mod upstream;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use adaptive_tracing::LogTail;
use cache::{MemoryCache, ResultCache};
use config::ProxyConfig;
use rate_limit::RateLimiter;
use server::AppState;
use strategy::render::ChromeRenderer;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("ADAPTIVE_PROXY_CONFIG").ok())
        .unwrap_or_else(|| "adaptive-proxy.toml".to_string());

    let config = ProxyConfig::load(&config_path)?;

    // Build the tokio runtime first; the gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let log_tail = LogTail::new(config.admin.log_tail_lines);
        let _tracing_guard = adaptive_tracing::init_tracing(&config.tracing, log_tail.clone());

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            chrome_path = ?config.render.chrome_path,
            cache_ttl_secs = config.cache.ttl_secs,
            "Starting adaptive-proxy"
        );

        run(config, log_tail).await
    })
}

async fn run(config: ProxyConfig, log_tail: LogTail) -> anyhow::Result<()> {
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(config.cache.ttl_secs)));
    let renderer = Arc::new(ChromeRenderer::new(config.render.clone()));

    let state = Arc::new(AppState::new(
        config,
        cache.clone(),
        renderer,
        log_tail,
    )?);

    let sweep_interval = Duration::from_secs(state.config.cache.sweep_interval_secs.max(1));
    let sweeper = tokio::spawn(sweep(cache, state.limiter.clone(), sweep_interval));

    let result = server::run(state).await;
    sweeper.abort();
    result
}

/// Periodically drop expired cache entries and idle rate-limit buckets.
async fn sweep(cache: Arc<MemoryCache>, limiter: Arc<RateLimiter>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let expired = cache.purge_expired();
        let idle_clients = limiter.prune_idle();
        if expired > 0 || idle_clients > 0 {
            tracing::debug!(expired, idle_clients, cached = cache.len(), "Sweep complete");
        }
    }
}
