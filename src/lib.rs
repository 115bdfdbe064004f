//! Memory usage telemetry.
//!
//! This crate samples the memory held by its own process and reports it two
//! ways: over OTLP as a pulled gauge and a pushed counter, and as one JSON
//! line per sample in a local append-only file.
//!
//! The main pieces are the [`ProcessSampler`], which reads memory on demand,
//! the two sinks, [`MetricsEmitter`] and [`FileLogger`], and the
//! [`SamplingLoop`], which ticks on a fixed interval, takes one
//! [`MemorySample`] per tick and hands it to every sink. Sinks are isolated
//! from each other: if the log file can't be written, the counter is still
//! incremented, and vice versa. Failures are logged and the loop carries on
//! to the next tick. Nothing is retried.
//!
//! The gauge is not driven by the loop. The OpenTelemetry periodic reader
//! invokes its callback on its own export interval, and every invocation
//! takes a fresh sample from the same shared sampler. The two clocks are
//! independent.
//!
//! [`run`] wires everything together from a [`Config`] and returns a
//! [`Telemetry`] that runs until its [`CancellationToken`] fires.

mod config;
pub use config::Config;

mod emitter;
pub use emitter::{METER_NAME, MetricsEmitter};

mod error;
pub use error::{EmitterError, InitError, SinkError};

mod file_log;
pub use file_log::{FileLogger, LogRecord};

pub(crate) mod metrics;
pub use metrics::init_prometheus;

mod monitor;
pub use monitor::{LoopHandle, LoopState, SamplingLoop, TickSink};

mod obs;
pub use obs::{BYTES_PER_MB, MemorySample};

mod sampler;
pub use sampler::{MemorySampler, ProcessSampler};

mod trace;
pub use trace::init_tracing;

use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use std::{fmt::Display, future::Future, sync::Arc};
pub use tokio_util::sync::CancellationToken;

/// A running sampling loop together with the emitter it reports through.
#[derive(Debug)]
pub struct Telemetry {
    pub emitter: MetricsEmitter,
    pub handle: LoopHandle,
}

impl Telemetry {
    /// Run until `shutdown` resolves, then shut down cleanly.
    ///
    /// If the loop task exits first, whether it returned or panicked, the
    /// meter provider is still shut down and an error is returned.
    pub async fn run_until<S>(mut self, shutdown: S) -> eyre::Result<()>
    where
        S: Future<Output = ()>,
    {
        let joined = tokio::select! {
            _ = shutdown => None,
            joined = self.handle.task_mut() => Some(joined),
        };
        let Some(joined) = joined else {
            return self.shutdown().await;
        };

        let flushed = self.emitter.shutdown();
        let reason = match joined {
            Ok(()) => eyre::eyre!("sampling loop exited unexpectedly"),
            Err(err) => eyre::eyre!("sampling loop failed: {err}"),
        };
        tracing::error!(%reason, "sampling loop stopped before shutdown");
        flushed?;
        Err(reason)
    }

    /// Stop the loop, wait for it to exit, then flush and shut down the
    /// meter provider.
    pub async fn shutdown(self) -> eyre::Result<()> {
        self.handle.cancel();
        self.handle.join().await?;
        self.emitter.shutdown()?;
        Ok(())
    }
}

/// Build the emitter and file logger from `config`, and start sampling with
/// the given sampler.
///
/// Fails without starting the loop if the emitter cannot be initialized.
pub async fn run(
    config: &Config,
    sampler: Arc<dyn MemorySampler>,
    cancel: CancellationToken,
) -> Result<Telemetry, InitError> {
    let emitter = MetricsEmitter::initialize(config, sampler.clone()).await?;
    Ok(start(config, sampler, emitter, cancel))
}

/// Like [`run`], but with the metric exporter produced by `connect`. See
/// [`MetricsEmitter::initialize_with`].
pub async fn run_with<E, BuildErr, F>(
    config: &Config,
    sampler: Arc<dyn MemorySampler>,
    cancel: CancellationToken,
    connect: F,
) -> Result<Telemetry, InitError>
where
    E: PushMetricExporter,
    BuildErr: Display,
    F: Future<Output = Result<E, BuildErr>>,
{
    let emitter = MetricsEmitter::initialize_with(config, sampler.clone(), connect).await?;
    Ok(start(config, sampler, emitter, cancel))
}

fn start(
    config: &Config,
    sampler: Arc<dyn MemorySampler>,
    emitter: MetricsEmitter,
    cancel: CancellationToken,
) -> Telemetry {
    let logger = FileLogger::new(config.log_path.clone(), config.log_message.clone());

    let handle = SamplingLoop::new(
        sampler,
        config.tick_interval,
        vec![Box::new(emitter.clone()), Box::new(logger)],
    )
    .spawn(cancel);

    Telemetry { emitter, handle }
}
