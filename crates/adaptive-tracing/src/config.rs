//! Tracing configuration types.

use serde::Deserialize;

/// The `[tracing]` section of the proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Collector endpoint, e.g. `http://jaeger:4317`. Export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// `EnvFilter` directives, e.g. `adaptive_proxy=debug,info`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format of the stderr layer. The log tail and file are always plain text.
    #[serde(default)]
    pub format: LogFormat,

    /// Directory that receives `proxy.log`. File logging is off when unset.
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_service_name() -> String {
    "adaptive-proxy".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> Option<String> {
    Some("logs".to_string())
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::default(),
            log_level: default_log_level(),
            format: LogFormat::default(),
            log_dir: default_log_dir(),
        }
    }
}
