//! The sampling loop. This module contains the [`SamplingLoop`] struct.

use crate::{MemorySample, MemorySampler, SinkError};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

/// A destination for samples taken by the [`SamplingLoop`].
///
/// Sinks must not block for long: they run inline on the loop's task. A sink
/// that fails only loses its own record for that tick.
pub trait TickSink: Send {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Deliver one sample.
    fn accept(&mut self, sample: &MemorySample) -> Result<(), SinkError>;
}

/// Lifecycle of a [`SamplingLoop`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Cancelled,
}

/// Samples memory at a fixed interval, and hands every sample to each of its
/// sinks.
pub struct SamplingLoop {
    sampler: Arc<dyn MemorySampler>,
    interval: Duration,
    sinks: Vec<Box<dyn TickSink>>,
    tick: u64,

    state: watch::Sender<LoopState>,
}

impl SamplingLoop {
    /// Create a new, idle loop that will tick every `interval`.
    pub fn new(
        sampler: Arc<dyn MemorySampler>,
        interval: Duration,
        sinks: Vec<Box<dyn TickSink>>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            sampler,
            interval,
            sinks,
            tick: 0,
            state,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Run one tick: take a single sample and offer it to every sink. Each
    /// sink is attempted even if an earlier one failed.
    fn run_tick(&mut self) {
        let sample = self.sampler.sample();
        crate::metrics::record_sample(&sample);

        trace!(bytes = sample.bytes_allocated(), "dispatching sample");

        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.accept(&sample) {
                crate::metrics::record_sink_failure(sink.name());
                warn!(sink = sink.name(), %err, "sink rejected sample, skipping");
            }
        }

        self.tick = self.tick.wrapping_add(1);
    }

    /// Spawn the loop in a new task. The first tick happens immediately, the
    /// rest every `interval` after it.
    ///
    /// `cancel` is checked at every tick boundary. Once it fires, no further
    /// sink is called and the task exits, publishing
    /// [`LoopState::Cancelled`].
    pub fn spawn(mut self, cancel: CancellationToken) -> LoopHandle {
        let state = self.state.subscribe();
        self.state.send_replace(LoopState::Running);
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now(), self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval = ?self.interval, sinks = self.sinks.len(), "sampling loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let span = info_span!("tick", tick = self.tick);
                span.in_scope(|| self.run_tick());
            }

            self.state.send_replace(LoopState::Cancelled);
            debug!(ticks = self.tick, "sampling loop cancelled");
        }
        .instrument(info_span!("sampling_loop")));

        LoopHandle {
            task,
            cancel,
            state,
        }
    }
}

/// Handle to a running [`SamplingLoop`].
#[derive(Debug)]
pub struct LoopHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
    state: watch::Receiver<LoopState>,
}

impl LoopHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Signal the loop to stop at its next tick boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolve once the loop has observed cancellation.
    pub async fn wait_cancelled(&mut self) {
        // An Err means the task dropped its sender, which it only does after
        // publishing Cancelled or panicking.
        let _ = self
            .state
            .wait_for(|state| *state == LoopState::Cancelled)
            .await;
    }

    /// Wait for the loop task to exit.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }

    /// Mutable access to the task, for use in `select!`.
    pub fn task_mut(&mut self) -> &mut JoinHandle<()> {
        &mut self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    };

    struct CountingSampler(AtomicU64);

    impl MemorySampler for CountingSampler {
        fn sample(&self) -> MemorySample {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            MemorySample::now(n * 1_048_576)
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u64>>>);

    impl Recorder {
        fn seen(&self) -> Vec<u64> {
            self.0.lock().unwrap().clone()
        }
    }

    impl TickSink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn accept(&mut self, sample: &MemorySample) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(sample.whole_mb());
            Ok(())
        }
    }

    fn sampler() -> Arc<dyn MemorySampler> {
        Arc::new(CountingSampler(AtomicU64::new(0)))
    }

    #[tokio::test(start_paused = true)]
    async fn idle_until_spawned() {
        let recorder = Recorder::default();
        let sampling = SamplingLoop::new(
            sampler(),
            Duration::from_secs(5),
            vec![Box::new(recorder.clone())],
        );
        assert_eq!(sampling.state(), LoopState::Idle);

        let handle = sampling.spawn(CancellationToken::new());
        assert_eq!(handle.state(), LoopState::Running);

        handle.cancel();
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_on_interval() {
        let recorder = Recorder::default();
        let handle = SamplingLoop::new(
            sampler(),
            Duration::from_secs(5),
            vec![Box::new(recorder.clone())],
        )
        .spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(recorder.seen(), vec![0]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.seen(), vec![0, 1, 2]);

        handle.cancel();
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn every_sink_gets_the_same_sample() {
        let first = Recorder::default();
        let second = Recorder::default();
        let handle = SamplingLoop::new(
            sampler(),
            Duration::from_secs(5),
            vec![Box::new(first.clone()), Box::new(second.clone())],
        )
        .spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.cancel();
        handle.join().await.unwrap();

        assert_eq!(first.seen(), vec![0, 1, 2]);
        assert_eq!(first.seen(), second.seen());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_further_ticks() {
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let mut handle = SamplingLoop::new(
            sampler(),
            Duration::from_secs(5),
            vec![Box::new(recorder.clone())],
        )
        .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(recorder.seen().len(), 2);

        let cancelled_at = Instant::now();
        cancel.cancel();
        handle.wait_cancelled().await;
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.state(), LoopState::Cancelled);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(recorder.seen().len(), 2);
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_tick_never_samples() {
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let handle = SamplingLoop::new(
            sampler(),
            Duration::from_secs(5),
            vec![Box::new(recorder.clone())],
        )
        .spawn(cancel);

        handle.join().await.unwrap();
        assert!(recorder.seen().is_empty());
    }
}
