//! Subscriber assembly, OTLP exporter setup and TracingGuard.

use std::path::Path;

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, OtlpProtocol, TracingConfig};
use crate::log_tail::LogTail;

/// Name of the persistent log file inside `log_dir`.
pub const LOG_FILE_NAME: &str = "proxy.log";

/// RAII guard that shuts down the tracer provider and flushes the log file on drop.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
    _file_guard: Option<WorkerGuard>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(ref mut provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {e}");
            }
        }
    }
}

/// Initialize the tracing subsystem.
///
/// Always installs a stderr layer (pretty or JSON, per `format`) and a
/// plain-text layer feeding `tail`. Adds a non-blocking file layer when `log_dir` is set and an OTLP
/// layer when `otlp_endpoint` is set. If the OTLP exporter fails to build,
/// the proxy starts without it and logs a warning.
///
/// Returns a [`TracingGuard`] that must be held for the lifetime of the application.
pub fn init_tracing(config: &TracingConfig, tail: LogTail) -> TracingGuard {
    let env_filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (provider, otlp_error) = match &config.otlp_endpoint {
        Some(endpoint) => match build_provider(config, endpoint) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some((endpoint.clone(), e))),
        },
        None => (None, None),
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let (file_layer, file_guard, file_error) = match config.log_dir.as_deref() {
        Some(dir) => match open_log_file(dir) {
            Ok((writer, guard)) => (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
                None,
            ),
            Err(e) => (None, None, Some((dir.to_string(), e))),
        },
        None => (None, None, None),
    };

    let (pretty_layer, json_layer) = match config.format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(pretty_layer)
        .with(json_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(tail),
        )
        .with(file_layer)
        .with(env_filter)
        .init();

    if provider.is_some() {
        tracing::info!(
            endpoint = ?config.otlp_endpoint,
            service = %config.service_name,
            protocol = ?config.protocol,
            "OpenTelemetry OTLP tracing initialized"
        );
    }
    if let Some((endpoint, e)) = otlp_error {
        tracing::warn!(
            error = %e,
            endpoint = %endpoint,
            "OTLP exporter failed to initialize, running with fmt-only tracing"
        );
    }
    if let Some((dir, e)) = file_error {
        tracing::warn!(error = %e, log_dir = %dir, "Log directory unavailable, file logging disabled");
    }

    TracingGuard {
        provider,
        _file_guard: file_guard,
    }
}

/// Build a batch-exporting tracer provider. Returns Err if the exporter
/// cannot be built.
fn build_provider(config: &TracingConfig, endpoint: &str) -> Result<SdkTracerProvider> {
    let otlp_exporter = match config.protocol {
        OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?,
        OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?,
    };

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}

fn open_log_file(
    dir: &str,
) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(Path::new(dir))?;
    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}
