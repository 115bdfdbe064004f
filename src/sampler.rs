//! Process memory sampling. This module contains the [`ProcessSampler`].

use crate::MemorySample;
use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{trace, warn};

/// Something that can report how much memory this process holds.
///
/// Samplers are shared between the sampling loop and the gauge callback,
/// which run on different clocks and threads, so `sample` takes `&self`.
/// Implementations must not fail: if the underlying stat is unavailable they
/// return a best-effort value instead.
pub trait MemorySampler: Send + Sync {
    /// Take a fresh sample.
    fn sample(&self) -> MemorySample;
}

/// Samples the resident set size of the current process using [`sysinfo`].
#[derive(Debug)]
pub struct ProcessSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
    last_bytes: AtomicU64,
}

impl ProcessSampler {
    /// Create a sampler for the current process.
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|err| warn!(%err, "could not determine current pid, memory reads as 0"))
            .ok();

        Self {
            system: Mutex::new(System::new()),
            pid,
            last_bytes: AtomicU64::new(0),
        }
    }

    fn read_rss(&self, pid: Pid) -> Option<u64> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|process| process.memory())
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessSampler {
    fn sample(&self) -> MemorySample {
        let bytes = match self.pid.and_then(|pid| self.read_rss(pid)) {
            Some(bytes) => {
                self.last_bytes.store(bytes, Ordering::Relaxed);
                bytes
            }
            None => {
                let previous = self.last_bytes.load(Ordering::Relaxed);
                warn!(previous, "process memory unavailable, reusing previous value");
                previous
            }
        };

        trace!(bytes, "sampled process memory");
        MemorySample::now(bytes)
    }
}
