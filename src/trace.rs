//! Tracing setup. See [`init_tracing`].

use crate::{Config, InitError};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{Compression, SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Targets whose events come from the export pipeline itself. Feeding them
/// back into the OTLP span layer would loop exporter activity into exports.
const EXPORT_PIPELINE_TARGETS: &[&str] = &[
    "opentelemetry",
    "opentelemetry_sdk",
    "opentelemetry_otlp",
    "tonic",
    "h2",
    "hyper",
    "hyper_util",
    "tower",
];

/// Install the global tracing subscriber.
///
/// Events are written to stdout as JSON, filtered by `RUST_LOG` (default
/// `info`). When `config.export_traces` is set, spans are also exported over
/// OTLP to the same collector the metrics go to, and the returned provider
/// must be shut down before exit so buffered spans are flushed.
///
/// Must be called from within a tokio runtime when exporting traces.
pub fn init_tracing(config: &Config) -> Result<Option<SdkTracerProvider>, InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer().json().with_target(true);

    if !config.export_traces {
        tracing_subscriber::registry().with(filter).with(fmt).init();
        return Ok(None);
    }

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.clone())
        .with_timeout(config.setup_timeout)
        .with_compression(Compression::Gzip)
        .build()
        .map_err(|err| InitError::Connection(err.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_resource(crate::emitter::build_resource(&config.service_name)?)
        .with_batch_exporter(exporter)
        .build();

    let tracer = provider.tracer(crate::emitter::METER_NAME);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_filter(export_filter()),
        )
        .init();

    Ok(Some(provider))
}

/// Filter for the OTLP span layer: `info` and up, minus the export pipeline.
fn export_filter() -> EnvFilter {
    let directives = EXPORT_PIPELINE_TARGETS
        .iter()
        .map(|target| format!("{target}=off"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("info,{directives}"))
}
