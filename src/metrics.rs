//! Process-wide observability counters. Lifecycle is the process lifetime:
//! initialized at startup, never torn down.

use std::sync::atomic::{AtomicU64, Ordering};

static CHUNKS_CREATED_TOTAL: AtomicU64 = AtomicU64::new(0);
static DISCARDED_DUPLICATE_TIMESTAMP: AtomicU64 = AtomicU64::new(0);
static DISCARDED_OUT_OF_ORDER: AtomicU64 = AtomicU64::new(0);
static STORE_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);
static REJECTED_SERIES_PER_USER: AtomicU64 = AtomicU64::new(0);
static REJECTED_SERIES_PER_METRIC: AtomicU64 = AtomicU64::new(0);

pub fn inc_chunks_created() {
    CHUNKS_CREATED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_discarded_duplicate_timestamp() {
    DISCARDED_DUPLICATE_TIMESTAMP.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_discarded_out_of_order() {
    DISCARDED_OUT_OF_ORDER.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_store_failures() {
    STORE_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_rejected_series_per_user() {
    REJECTED_SERIES_PER_USER.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_rejected_series_per_metric() {
    REJECTED_SERIES_PER_METRIC.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub chunks_created_total: u64,
    pub discarded_duplicate_timestamp: u64,
    pub discarded_out_of_order: u64,
    pub store_failures_total: u64,
    pub rejected_series_per_user: u64,
    pub rejected_series_per_metric: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        chunks_created_total: CHUNKS_CREATED_TOTAL.load(Ordering::Relaxed),
        discarded_duplicate_timestamp: DISCARDED_DUPLICATE_TIMESTAMP.load(Ordering::Relaxed),
        discarded_out_of_order: DISCARDED_OUT_OF_ORDER.load(Ordering::Relaxed),
        store_failures_total: STORE_FAILURES_TOTAL.load(Ordering::Relaxed),
        rejected_series_per_user: REJECTED_SERIES_PER_USER.load(Ordering::Relaxed),
        rejected_series_per_metric: REJECTED_SERIES_PER_METRIC.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let before = snapshot();
        inc_chunks_created();
        inc_discarded_out_of_order();
        let after = snapshot();
        assert_eq!(after.chunks_created_total, before.chunks_created_total + 1);
        assert_eq!(
            after.discarded_out_of_order,
            before.discarded_out_of_order + 1
        );
    }
}
