//! HTTP clients for upstream traffic.
//!
//! One client per access pattern so each carries its own timeout: the
//! metadata probe, the buffered structured fetch, and the stream. The stream
//! client has no total timeout; only the wait for response headers is
//! bounded, by the stream strategy itself.

use std::time::Duration;

use reqwest::redirect::Policy;

use crate::config::UpstreamConfig;

#[derive(Clone)]
pub struct UpstreamClients {
    pub probe: reqwest::Client,
    pub fetch: reqwest::Client,
    pub stream: reqwest::Client,
    pub stream_connect_timeout: Duration,
}

impl UpstreamClients {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let stream_connect_timeout = Duration::from_secs(config.stream_connect_timeout_secs);

        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .redirect(Policy::limited(config.max_redirects))
            .build()?;

        let fetch = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .redirect(Policy::limited(config.max_redirects))
            .build()?;

        let stream = reqwest::Client::builder()
            .connect_timeout(stream_connect_timeout)
            .redirect(Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            probe,
            fetch,
            stream,
            stream_connect_timeout,
        })
    }
}
