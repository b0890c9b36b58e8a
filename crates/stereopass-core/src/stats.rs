//! Pipeline counters with an injectable sink.
//!
//! Purely observational: the scheduler increments counters as ticks
//! progress and periodically hands a snapshot to the sink. Nothing in
//! the pipeline branches on these values.

use tracing::info;

/// Counters accumulated over the life of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    /// Frames successfully read from the camera.
    pub captured: u64,
    /// Eye images staged and copied into their GPU texture.
    pub uploaded: u64,
    /// Frames submitted to the compositor with a projection layer.
    pub rendered: u64,
    /// Ticks that lost camera data (failed read).
    pub dropped: u64,
}

/// Destination for periodic counter snapshots.
pub trait MetricsSink: Send {
    fn record(&mut self, counters: &PipelineCounters);
}

/// Default sink: one structured log line per snapshot.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&mut self, counters: &PipelineCounters) {
        info!(
            captured = counters.captured,
            uploaded = counters.uploaded,
            rendered = counters.rendered,
            dropped = counters.dropped,
            "pipeline counters"
        );
    }
}

/// Rate limiter for the camera-failure warning: at most one log line
/// per 60 consecutive failed reads.
pub fn should_log_capture_failure(failed_attempts: u64) -> bool {
    failed_attempts % 60 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_log_is_rate_limited() {
        // N consecutive failures produce at most ceil(N / 60) lines.
        for n in [1u64, 59, 60, 61, 120, 121, 599] {
            let lines = (1..=n).filter(|a| should_log_capture_failure(*a)).count() as u64;
            assert_eq!(lines, n.div_ceil(60), "n={n}");
        }
    }

    #[test]
    fn first_failure_logs_immediately() {
        assert!(should_log_capture_failure(1));
        assert!(!should_log_capture_failure(2));
    }

    #[test]
    fn sink_receives_snapshot() {
        struct Capture(Vec<PipelineCounters>);
        impl MetricsSink for Capture {
            fn record(&mut self, counters: &PipelineCounters) {
                self.0.push(*counters);
            }
        }

        let mut sink = Capture(Vec::new());
        let counters = PipelineCounters {
            captured: 3,
            uploaded: 6,
            rendered: 3,
            dropped: 1,
        };
        sink.record(&counters);
        assert_eq!(sink.0, vec![counters]);
    }
}
