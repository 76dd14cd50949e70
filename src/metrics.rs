use crate::dedup::{DedupVerdict, SweepReport};
use tracing::trace;

// Counters are emitted as trace events; the Prometheus handle only renders what a recorder saw.

pub fn inc_requests(route: &'static str) {
    trace!(target = "watchfeed.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "watchfeed.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn dedup_verdict(verdict: DedupVerdict) {
    if verdict.is_duplicate() {
        trace!(
            target = "watchfeed.metrics",
            verdict = ?verdict,
            "duplicates_suppressed_inc"
        );
    }
}

pub fn dedup_swept(report: SweepReport) {
    trace!(
        target = "watchfeed.metrics",
        expired = report.expired as u64,
        evicted = report.evicted as u64,
        "dedup_sweep"
    );
}
