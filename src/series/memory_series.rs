use crate::chunk::{ChunkAddOutcome, ChunkDesc, ChunkEncoder};
use crate::common::time::current_time_millis;
use crate::common::{Sample, Timestamp};
use crate::error::{BadSample, IngestError, IngestResult};
use crate::labels::Label;
use crate::metrics;
use std::time::Duration;

/// Ordered sequence of chunk descriptors for one series. Mutation requires
/// the caller to hold the series' fingerprint stripe lock (see
/// [`crate::tenant::stripe_lock`]); `MemorySeries` itself performs no
/// locking.
///
/// Invariants upheld by this type:
/// - `chunk_descs` is non-empty once any sample has been accepted (I1).
/// - descriptor time ranges are strictly non-overlapping and ordered (I2).
/// - `last_time == chunk_descs.last().last_time()` whenever a sample has been
///   accepted (I3).
/// - once `head_chunk_closed`, `add` opens a fresh head before mutating (I4).
pub struct MemorySeries {
    pub labels: Vec<Label>,
    pub fingerprint: u64,
    chunk_descs: Vec<ChunkDesc>,
    head_chunk_closed: bool,
    last_time: Timestamp,
    last_sample_value: f64,
    last_sample_value_set: bool,
    chunk_capacity: usize,
    last_write_millis: i64,
}

impl MemorySeries {
    pub fn new(labels: Vec<Label>, fingerprint: u64, chunk_capacity: usize) -> Self {
        Self {
            labels,
            fingerprint,
            chunk_descs: Vec::new(),
            head_chunk_closed: false,
            last_time: Timestamp::MIN,
            last_sample_value: 0.0,
            last_sample_value_set: false,
            chunk_capacity,
            last_write_millis: current_time_millis(),
        }
    }

    /// Wall-clock milliseconds since the last accepted (or rejected — both
    /// indicate a live client) write attempt. Used by idle eviction.
    pub fn idle_millis(&self) -> i64 {
        current_time_millis() - self.last_write_millis
    }

    pub fn metric_name(&self) -> Option<&str> {
        crate::labels::metric_name_of(&self.labels)
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_descs.is_empty()
    }

    pub fn first_time(&self) -> Option<Timestamp> {
        self.chunk_descs.first().map(|d| d.first_time())
    }

    pub fn head(&self) -> Option<&ChunkDesc> {
        self.chunk_descs.last()
    }

    pub fn chunk_descs(&self) -> &[ChunkDesc] {
        &self.chunk_descs
    }

    /// Bulk initializer used during recovery. Fails if the series already has
    /// chunks.
    pub fn set_chunks(&mut self, descs: Vec<ChunkDesc>) -> IngestResult<()> {
        if !self.chunk_descs.is_empty() {
            return Err(IngestError::Internal(
                "set_chunks called on a non-empty series".to_string(),
            ));
        }
        if let Some(last) = descs.last() {
            self.last_time = last.last_time();
            self.last_sample_value_set = false;
        }
        self.chunk_descs = descs;
        Ok(())
    }

    /// The append state machine. See module docs for the invariants this
    /// maintains.
    pub fn add(&mut self, sample: Sample) -> IngestResult<()> {
        self.last_write_millis = current_time_millis();
        if self.last_sample_value_set && sample.timestamp == self.last_time {
            if sample.value == self.last_sample_value {
                return Ok(());
            }
            metrics::inc_discarded_duplicate_timestamp();
            return Err(IngestError::BadSample(BadSample::DuplicateTimestamp));
        }
        if sample.timestamp < self.last_time {
            metrics::inc_discarded_out_of_order();
            return Err(IngestError::BadSample(BadSample::OutOfOrder));
        }

        if self.chunk_descs.is_empty() || self.head_chunk_closed {
            let chunk = ChunkEncoder::new(self.chunk_capacity);
            self.chunk_descs.push(ChunkDesc::new(chunk, sample.timestamp));
            self.head_chunk_closed = false;
            metrics::inc_chunks_created();
        }

        let head = self
            .chunk_descs
            .last_mut()
            .expect("head chunk was just ensured to exist");

        match head.chunk.add(sample) {
            ChunkAddOutcome::Appended => {
                head.touch(sample.timestamp);
            }
            ChunkAddOutcome::Split(next) => {
                let first = next
                    .first_timestamp()
                    .expect("split always carries the overflow sample");
                self.chunk_descs.push(ChunkDesc::new(next, first));
                metrics::inc_chunks_created();
            }
        }

        self.last_time = sample.timestamp;
        self.last_sample_value = sample.value;
        self.last_sample_value_set = true;
        Ok(())
    }

    /// Returns all samples with `from <= t <= through`: locate the
    /// descriptor window that can possibly overlap `[from, through]` (a
    /// chunk's first-time may be below `from` while its tail still falls
    /// inside the window), then let each selected chunk extract its own
    /// sub-range.
    pub fn samples_for_range(&self, from: Timestamp, through: Timestamp) -> Vec<Sample> {
        if self.chunk_descs.is_empty() {
            return Vec::new();
        }
        if self.chunk_descs.last().unwrap().last_time() < from {
            return Vec::new();
        }

        let mut start_idx = self.chunk_descs.partition_point(|d| d.first_time() <= from);
        if start_idx > 0 {
            start_idx -= 1;
        }

        let mut end_idx = self.chunk_descs.partition_point(|d| d.first_time() <= through);
        if end_idx == 0 {
            return Vec::new();
        }
        end_idx -= 1;

        if start_idx > end_idx {
            return Vec::new();
        }

        let mut out = Vec::new();
        for desc in &self.chunk_descs[start_idx..=end_idx] {
            out.extend(desc.chunk.range_values(from, through));
        }
        out
    }

    /// Marks the head chunk closed; the next `add` opens a fresh head.
    pub fn close_head(&mut self) {
        self.head_chunk_closed = true;
    }

    pub fn head_chunk_closed(&self) -> bool {
        self.head_chunk_closed
    }

    /// Flush-loop hook: if the head chunk is old enough or already closed,
    /// seals it and returns every descriptor that is not the (possibly new)
    /// head, for the caller to hand to the chunk store.
    pub fn take_flushable(&mut self, max_chunk_age: Duration) -> Vec<ChunkDesc> {
        let should_close = match self.chunk_descs.last() {
            Some(head) => {
                !self.head_chunk_closed
                    && head.age_millis() as u128 >= max_chunk_age.as_millis()
            }
            None => false,
        };
        if should_close {
            self.close_head();
        }

        if !self.head_chunk_closed || self.chunk_descs.is_empty() {
            return Vec::new();
        }

        // Every descriptor is closed (the head included) — flush all of them
        // and leave the series with no resident chunks. A subsequent `add`
        // opens a brand-new head, per the single chunk state machine path
        // back to `Open`.
        std::mem::take(&mut self.chunk_descs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(chunk_capacity: usize) -> MemorySeries {
        MemorySeries::new(
            vec![Label::new("__name__", "m"), Label::new("job", "j")],
            42,
            chunk_capacity,
        )
    }

    #[test]
    fn accepts_monotonically_increasing_samples() {
        let mut s = series(16);
        s.add(Sample::new(1, 1.0)).unwrap();
        s.add(Sample::new(2, 2.0)).unwrap();
        s.add(Sample::new(3, 3.0)).unwrap();
        assert_eq!(
            s.samples_for_range(0, 10),
            vec![Sample::new(1, 1.0), Sample::new(2, 2.0), Sample::new(3, 3.0)]
        );
    }

    #[test]
    fn duplicate_same_value_is_a_silent_noop() {
        let mut s = series(16);
        s.add(Sample::new(1, 0.0)).unwrap();
        s.add(Sample::new(1, 0.0)).unwrap();
        assert_eq!(s.samples_for_range(0, 10), vec![Sample::new(1, 0.0)]);
    }

    #[test]
    fn out_of_order_sample_is_rejected() {
        let mut s = series(16);
        s.add(Sample::new(1, 0.0)).unwrap();
        let err = s.add(Sample::new(0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            IngestError::BadSample(BadSample::OutOfOrder)
        ));
    }

    #[test]
    fn duplicate_timestamp_different_value_is_rejected() {
        let mut s = series(16);
        s.add(Sample::new(1, 0.0)).unwrap();
        let err = s.add(Sample::new(1, 1.0)).unwrap_err();
        assert!(matches!(
            err,
            IngestError::BadSample(BadSample::DuplicateTimestamp)
        ));
        // the offending sample is dropped, nothing else changes
        assert_eq!(s.samples_for_range(0, 10), vec![Sample::new(1, 0.0)]);
    }

    #[test]
    fn scenario_two_duplicate_and_out_of_order() {
        let mut s = series(16);
        s.add(Sample::new(1, 0.0)).unwrap();
        s.add(Sample::new(1, 0.0)).unwrap();
        assert!(s.add(Sample::new(0, 0.0)).is_err());
        assert!(s.add(Sample::new(1, 1.0)).is_err());
        assert_eq!(s.samples_for_range(0, 10), vec![Sample::new(1, 0.0)]);
    }

    #[test_case::test_case(2, 5, 3; "capacity 2, five samples -> three chunks")]
    #[test_case::test_case(4, 5, 2; "capacity 4, five samples -> two chunks")]
    #[test_case::test_case(16, 5, 1; "capacity 16, five samples -> one chunk")]
    fn chunk_split_at_capacity_boundary_both_halves_queryable(
        chunk_capacity: usize,
        sample_count: i64,
        expected_chunks: usize,
    ) {
        let mut s = series(chunk_capacity);
        for t in 1..=sample_count {
            s.add(Sample::new(t, t as f64)).unwrap();
        }
        assert_eq!(s.chunk_descs().len(), expected_chunks);
        let all = s.samples_for_range(1, sample_count);
        assert_eq!(all.len(), sample_count as usize);
        assert_eq!(all[0].timestamp, 1);
        assert_eq!(all[all.len() - 1].timestamp, sample_count);
    }

    #[test]
    fn range_query_before_first_chunk_is_empty() {
        let mut s = series(16);
        s.add(Sample::new(100, 1.0)).unwrap();
        assert!(s.samples_for_range(0, 50).is_empty());
    }

    #[test]
    fn range_query_after_last_chunk_is_empty() {
        let mut s = series(16);
        s.add(Sample::new(1, 1.0)).unwrap();
        assert!(s.samples_for_range(100, 200).is_empty());
    }

    #[test]
    fn take_flushable_closes_and_drains_aged_head() {
        let mut s = series(16);
        s.add(Sample::new(1, 1.0)).unwrap();
        let flushed = s.take_flushable(Duration::from_millis(0));
        assert_eq!(flushed.len(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn take_flushable_leaves_fresh_head_alone() {
        let mut s = series(16);
        s.add(Sample::new(1, 1.0)).unwrap();
        let flushed = s.take_flushable(Duration::from_secs(3600));
        assert!(flushed.is_empty());
        assert!(!s.is_empty());
    }
}
