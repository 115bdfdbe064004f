//! The OpenTelemetry metrics sink. Check the docs for [`MetricsEmitter`].

use crate::{Config, EmitterError, InitError, MemorySample, MemorySampler, SinkError, TickSink};
use opentelemetry::{
    KeyValue,
    metrics::{Counter, MeterProvider as _, ObservableGauge},
};
use opentelemetry_otlp::{Compression, MetricExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider, exporter::PushMetricExporter},
};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    resource::{HOST_NAME, OS_TYPE},
};
use std::{fmt::Display, future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, instrument};

/// Instrumentation scope name for every instrument this process registers.
pub const METER_NAME: &str = "otel_sla";

const GAUGE_DESC: &str = "Allocated memory in MB";
const COUNTER_DESC: &str = "Total allocated memory in MB";
const UNIT_MB: &str = "MB";

const GENERATION_TIME: &str = "metric_generation_time";
const COLLECTION_TIME: &str = "metric_collection_time";

/// Reports memory through an explicitly owned [`SdkMeterProvider`].
///
/// Two instruments are registered:
/// - a gauge (default `otel.sla.metric`) that is *pulled*. The periodic reader
///   invokes its callback once per export cycle, on its own thread and its
///   own clock, and the callback takes a fresh sample every time. It never
///   sees the samples taken by the sampling loop.
/// - a counter (default `allocated_memory_in_mb`) that is *pushed*. Every tick
///   of the sampling loop adds the tick's whole MB via
///   [`MetricsEmitter::record_tick`].
///
/// Neither path touches the network. The reader exports accumulated state
/// through the injected exporter every `export_interval`, and export failures
/// are reported by the SDK's own internal logging and never reach the loop.
///
/// The emitter is cheap to clone. Clones share the provider, so shutting down
/// one shuts down all of them.
#[derive(Clone)]
pub struct MetricsEmitter {
    provider: SdkMeterProvider,
    counter: Counter<u64>,
    _gauge: ObservableGauge<f64>,
}

impl std::fmt::Debug for MetricsEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEmitter").finish_non_exhaustive()
    }
}

impl MetricsEmitter {
    /// Connect to the OTLP collector at `config.endpoint` over plaintext
    /// gRPC with gzip compression, and register both instruments.
    pub async fn initialize(
        config: &Config,
        sampler: Arc<dyn MemorySampler>,
    ) -> Result<Self, InitError> {
        let endpoint = config.endpoint.clone();
        let timeout = config.setup_timeout;
        Self::initialize_with(config, sampler, async move {
            otlp_exporter(&endpoint, timeout)
        })
        .await
    }

    /// Like [`MetricsEmitter::initialize`], but with the exporter produced by
    /// `connect`. `connect` must resolve within `config.setup_timeout`.
    #[instrument(skip_all, fields(endpoint = %config.endpoint))]
    pub async fn initialize_with<E, BuildErr, F>(
        config: &Config,
        sampler: Arc<dyn MemorySampler>,
        connect: F,
    ) -> Result<Self, InitError>
    where
        E: PushMetricExporter,
        BuildErr: Display,
        F: Future<Output = Result<E, BuildErr>>,
    {
        config.validate()?;
        let resource = build_resource(&config.service_name)?;

        let exporter = tokio::time::timeout(config.setup_timeout, connect)
            .await
            .map_err(|_| {
                InitError::Connection(format!(
                    "setup timed out after {:?} connecting to {}",
                    config.setup_timeout, config.endpoint
                ))
            })?
            .map_err(|err| InitError::Connection(err.to_string()))?;
        debug!("metric exporter constructed");

        let reader = PeriodicReader::builder(exporter)
            .with_interval(config.export_interval)
            .build();

        let provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(reader)
            .build();

        let emitter = Self::register(provider, config, sampler);
        info!(
            export_interval = ?config.export_interval,
            gauge = %config.gauge_name,
            counter = %config.counter_name,
            "metrics emitter ready"
        );
        Ok(emitter)
    }

    fn register(
        provider: SdkMeterProvider,
        config: &Config,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        let meter = provider.meter(METER_NAME);

        let gauge = meter
            .f64_observable_gauge(config.gauge_name.clone())
            .with_description(GAUGE_DESC)
            .with_unit(UNIT_MB)
            .with_callback(move |observer| {
                let sample = sampler.sample();
                observer.observe(
                    sample.mb(),
                    &[KeyValue::new(GENERATION_TIME, sample.timestamp())],
                );
            })
            .build();

        let counter = meter
            .u64_counter(config.counter_name.clone())
            .with_description(COUNTER_DESC)
            .with_unit(UNIT_MB)
            .build();

        Self {
            provider,
            counter,
            _gauge: gauge,
        }
    }

    /// Add this tick's whole MB to the counter.
    pub fn record_tick(&self, sample: &MemorySample) {
        self.counter.add(
            sample.whole_mb(),
            &[KeyValue::new(COLLECTION_TIME, sample.timestamp())],
        );
    }

    /// Collect and export immediately, outside the periodic schedule.
    pub fn force_flush(&self) -> Result<(), EmitterError> {
        self.provider
            .force_flush()
            .map_err(|err| EmitterError::new("flush", err))
    }

    /// Flush and stop the periodic reader. Recording after this is a no-op.
    pub fn shutdown(&self) -> Result<(), EmitterError> {
        self.provider
            .shutdown()
            .map_err(|err| EmitterError::new("shutdown", err))
    }
}

impl TickSink for MetricsEmitter {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn accept(&mut self, sample: &MemorySample) -> Result<(), SinkError> {
        self.record_tick(sample);
        Ok(())
    }
}

fn otlp_exporter(
    endpoint: &str,
    timeout: Duration,
) -> Result<MetricExporter, opentelemetry_otlp::ExporterBuildError> {
    MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(timeout)
        .with_compression(Compression::Gzip)
        .build()
}

/// Service name, host name and OS type, under the semantic conventions
/// schema.
pub(crate) fn build_resource(service_name: &str) -> Result<Resource, InitError> {
    let service_name = service_name.trim();
    if service_name.is_empty() {
        return Err(InitError::Configuration("service name is empty".into()));
    }

    let mut attributes = vec![KeyValue::new(OS_TYPE, std::env::consts::OS)];
    if let Some(host) = sysinfo::System::host_name() {
        attributes.push(KeyValue::new(HOST_NAME, host));
    }

    Ok(Resource::builder()
        .with_service_name(service_name.to_owned())
        .with_schema_url(attributes, SCHEMA_URL)
        .build())
}
