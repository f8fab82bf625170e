//! Pipeline statistics
//!
//! Plain atomic counters shared between the audio thread, the worker and the
//! controller. Writers use Relaxed increments; nothing else synchronises on them.

use hushline_common::StatsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_processed: AtomicU64,
    frames_submitted: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
    dropped_samples: AtomicU64,
    declick_events: AtomicU64,
    processing_failures: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Overrun that discarded `samples` buffered samples
    #[inline]
    pub fn record_drop(&self, samples: usize) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        self.dropped_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_declick(&self) {
        self.declick_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.processing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            declick_events: self.declick_events.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter (explicit controller reset only)
    pub fn reset(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.frames_submitted.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.dropped_samples.store(0, Ordering::Relaxed);
        self.declick_events.store(0, Ordering::Relaxed);
        self.processing_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = PipelineStats::new();
        stats.record_processed();
        stats.record_processed();
        stats.record_underrun();
        stats.record_drop(480);
        stats.record_declick();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_processed, 2);
        assert_eq!(snap.underruns, 1);
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.dropped_samples, 480);
        assert_eq!(snap.declick_events, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
