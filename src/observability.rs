//! 日志与追踪初始化
//!
//! 控制台输出直接写 stdout；文件输出经 tracing-appender 的非阻塞写入器，
//! 轮转与否只是 [`Rotation`] 的不同取值。

use crate::error::{Error, Result};
use janus_common::config::{JanusRoomConfig, LogConfig};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[cfg(feature = "opentelemetry")]
use opentelemetry_sdk::trace::SdkTracerProvider;

const LOG_FILE_NAME: &str = "janus-room.log";

/// Flushes the file writer and shuts the tracer provider down on drop
#[derive(Default)]
pub struct ObservabilityGuard {
    #[cfg(feature = "opentelemetry")]
    tracer_provider: Option<SdkTracerProvider>,
    _log_guard: Option<WorkerGuard>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        #[cfg(feature = "opentelemetry")]
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown tracer provider: {e:?}");
        }
    }
}

/// Install the global subscriber. A subscriber that is already set is kept.
pub fn init_observability(config: &JanusRoomConfig) -> Result<ObservabilityGuard> {
    let mut guard = ObservabilityGuard::default();

    let (writer, ansi) = if config.is_console_logging() {
        (BoxMakeWriter::new(std::io::stdout), true)
    } else {
        let appender = log_file_appender(config.log_config(), config.should_rotate_logs())?;
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(appender);
        guard._log_guard = Some(worker_guard);
        (BoxMakeWriter::new(non_blocking), false)
    };

    let fmt_layer = fmt::layer()
        .with_thread_names(true)
        .with_line_number(true)
        .with_ansi(ansi)
        .with_writer(writer);
    let registry = tracing_subscriber::registry()
        .with(env_filter(&config.get_filter_level()))
        .with(fmt_layer);

    #[cfg(feature = "opentelemetry")]
    let registry = {
        use opentelemetry::trace::TracerProvider as _;

        let provider = otel::build_provider(config)?;
        let layer = provider.as_ref().map(|p| {
            let tracer = p.tracer(config.tracing_config().service_name().to_string());
            tracing_opentelemetry::layer().with_tracer(tracer)
        });
        guard.tracer_provider = provider;
        registry.with(layer)
    };

    if registry.try_init().is_ok() && !config.is_console_logging() {
        info!(
            "📝 日志写入 {}/{} (轮转={})",
            config.log_config().path,
            LOG_FILE_NAME,
            config.should_rotate_logs()
        );
    }

    Ok(guard)
}

/// An unparsable directive falls back to `info`
fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| {
        eprintln!("Failed to parse filter directive: {directive}. Falling back to default: info");
        EnvFilter::new("info")
    })
}

fn log_file_appender(log_config: &LogConfig, rotate: bool) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(&log_config.path)?;
    let rotation = if rotate {
        Rotation::DAILY
    } else {
        Rotation::NEVER
    };
    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(LOG_FILE_NAME)
        .build(&log_config.path)
        .map_err(|e| Error::custom(format!("无法创建日志文件 {}: {e}", log_config.path)))
}

#[cfg(feature = "opentelemetry")]
mod otel {
    use crate::error::{Error, Result};
    use janus_common::config::JanusRoomConfig;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};

    /// `None` when tracing is disabled in the config
    pub(super) fn build_provider(config: &JanusRoomConfig) -> Result<Option<SdkTracerProvider>> {
        let tracing_cfg = config.tracing_config();
        if !tracing_cfg.is_enabled() {
            return Ok(None);
        }
        tracing_cfg.validate().map_err(Error::custom)?;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(tracing_cfg.endpoint())
            .build()
            .map_err(|e| Error::custom(format!("Failed to build OTLP exporter: {e}")))?;

        let gateway = config.gateway_config();
        let resource = Resource::builder()
            .with_service_name(tracing_cfg.service_name().to_string())
            .with_attributes([
                KeyValue::new("janus.client", config.name.clone()),
                KeyValue::new("janus.env", config.env.clone()),
                KeyValue::new("janus.plugin", gateway.plugin.package_name()),
                KeyValue::new("janus.room", gateway.room as i64),
            ])
            .build();

        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();
        opentelemetry::global::set_tracer_provider(provider.clone());
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        Ok(Some(provider))
    }
}
