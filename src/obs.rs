//! Just the [`MemorySample`] struct.

use chrono::{DateTime, SecondsFormat, Utc};

/// Bytes per MB, as reported on every instrument and log line.
pub const BYTES_PER_MB: u64 = 1 << 20;

/// The memory allocated by this process at a point in time.
///
/// A `MemorySample` is the unit of work of this program. The sampling loop
/// takes exactly one per tick and hands the same sample to every sink, and
/// the gauge callback takes its own each time the exporter collects. Samples
/// are never cached: once every sink has seen one it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    bytes_allocated: u64,
    captured_at: DateTime<Utc>,
}

impl MemorySample {
    /// Create a sample captured now.
    pub fn now(bytes_allocated: u64) -> Self {
        Self::at(bytes_allocated, Utc::now())
    }

    /// Create a sample captured at the given instant.
    pub const fn at(bytes_allocated: u64, captured_at: DateTime<Utc>) -> Self {
        Self {
            bytes_allocated,
            captured_at,
        }
    }

    pub const fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }

    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Whole MB, rounded down. This is the counter delta for a tick.
    pub const fn whole_mb(&self) -> u64 {
        self.bytes_allocated / BYTES_PER_MB
    }

    /// Fractional MB. This is the gauge observation.
    pub fn mb(&self) -> f64 {
        self.bytes_allocated as f64 / BYTES_PER_MB as f64
    }

    /// RFC 3339 timestamp with second precision and an explicit `Z` offset.
    pub fn timestamp(&self) -> String {
        self.captured_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
