//! Self-metrics about the sampling loop. Check the docs for
//! [`init_prometheus`].

use crate::MemorySample;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::LazyLock;

const TICKS: &str = "otel_sla.ticks";
const TICKS_DESC: &str = "The total number of sampling loop ticks";

const SINK_FAILURES: &str = "otel_sla.sink_failures";
const SINK_FAILURES_DESC: &str = "The total number of samples a sink failed to accept";

const LAST_SAMPLE_BYTES: &str = "otel_sla.last_sample_bytes";
const LAST_SAMPLE_BYTES_DESC: &str = "Process memory at the most recent tick";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    metrics::describe_counter!(TICKS, TICKS_DESC);
    metrics::describe_counter!(SINK_FAILURES, SINK_FAILURES_DESC);
    metrics::describe_gauge!(
        LAST_SAMPLE_BYTES,
        metrics::Unit::Bytes,
        LAST_SAMPLE_BYTES_DESC
    );
});

pub(crate) fn record_sample(sample: &MemorySample) {
    counter!(TICKS).increment(1);
    gauge!(LAST_SAMPLE_BYTES).set(sample.bytes_allocated() as f64);
}

pub(crate) fn record_sink_failure(sink: &'static str) {
    counter!(SINK_FAILURES, "sink" => sink).increment(1);
}

/// Serve self-metrics in the Prometheus exposition format on `port`.
///
/// These are metrics *about* this process's own loop, separate from the
/// memory instruments exported over OTLP:
/// - `otel_sla.ticks` (counter): ticks run since startup.
/// - `otel_sla.sink_failures` (counter): samples a sink failed to accept,
///   labeled by `sink` (`metrics` or `file_log`).
/// - `otel_sla.last_sample_bytes` (gauge): memory at the latest tick.
///
/// A steadily climbing `sink_failures{sink="file_log"}` usually means the
/// log path has become unwritable. The loop keeps going regardless.
///
/// When this is never called, the [`metrics`] macros record into the no-op
/// recorder and cost next to nothing.
pub fn init_prometheus(port: u16) -> eyre::Result<()> {
    LazyLock::force(&DESCRIBE);
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    Ok(())
}
