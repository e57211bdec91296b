//! Reusable tracing setup for adaptive-proxy.

pub mod config;
pub mod log_tail;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use log_tail::LogTail;
pub use otlp::{init_tracing, TracingGuard, LOG_FILE_NAME};
