use crate::common::encoding::{try_read_f64_le, try_read_uvarint, write_f64_le, write_uvarint};
use crate::common::{Sample, Timestamp};
use crate::error::IngestError;

/// Result of appending a sample to a [`ChunkEncoder`].
pub enum ChunkAddOutcome {
    /// The sample was appended to the receiver in place.
    Appended,
    /// The receiver was at capacity: it is now sealed (read-only, unchanged)
    /// and the returned chunk is the new open successor holding `sample`.
    Split(ChunkEncoder),
}

/// Append-only byte-oriented encoder for a contiguous, monotonically
/// timestamped run of samples, bounded by a soft capacity.
///
/// Encoding is a flat `uvarint timestamp` + `LE f64 value` sequence per
/// sample, matching the source's uncompressed chunk layout: the only
/// contract this component owes the rest of the system is deterministic
/// round-trip (`to_bytes` then `from_bytes` then `iter` reproduces the
/// original sequence), so no compression codec is required.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEncoder {
    capacity: usize,
    samples: Vec<Sample>,
}

impl ChunkEncoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: Vec::new(),
        }
    }

    pub fn with_sample(capacity: usize, sample: Sample) -> Self {
        let mut chunk = Self::new(capacity);
        chunk.samples.push(sample);
        chunk
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.samples.first().map(|s| s.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.samples.last().map(|s| s.timestamp)
    }

    /// Appends `sample` (assumed to carry a strictly greater timestamp than
    /// any sample already in this chunk — the caller, `MemorySeries`, owns
    /// monotonicity enforcement). Returns [`ChunkAddOutcome::Split`] with a
    /// fresh successor chunk if this chunk is at capacity.
    pub fn add(&mut self, sample: Sample) -> ChunkAddOutcome {
        if self.is_full() {
            return ChunkAddOutcome::Split(Self::with_sample(self.capacity, sample));
        }
        self.samples.push(sample);
        ChunkAddOutcome::Appended
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.samples.iter().copied()
    }

    /// Returns all samples with `from <= t <= through`.
    pub fn range_values(&self, from: Timestamp, through: Timestamp) -> Vec<Sample> {
        match index_bounds(&self.samples, from, through) {
            Some((start, end)) => self.samples[start..=end].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.samples.len() * 12 + 16);
        write_uvarint(&mut buf, self.capacity as u64);
        write_uvarint(&mut buf, self.samples.len() as u64);
        for sample in &self.samples {
            write_uvarint(&mut buf, sample.timestamp as u64);
            write_f64_le(&mut buf, sample.value);
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, IngestError> {
        let mut cursor = buf;
        let capacity = read_usize(&mut cursor)?;
        let len = read_usize(&mut cursor)?;
        let mut samples = Vec::with_capacity(len);
        for _ in 0..len {
            let ts = try_read_uvarint(&mut cursor)
                .map_err(|_| IngestError::EncodingError("truncated timestamp".into()))?
                as Timestamp;
            let value = try_read_f64_le(&mut cursor)
                .map_err(|_| IngestError::EncodingError("truncated value".into()))?;
            samples.push(Sample::new(ts, value));
        }
        Ok(Self { capacity, samples })
    }
}

fn read_usize(buf: &mut &[u8]) -> Result<usize, IngestError> {
    try_read_uvarint(buf)
        .map(|v| v as usize)
        .map_err(|_| IngestError::EncodingError("truncated length".into()))
}

/// Finds the inclusive `[start, end]` sample-index bounds for `[from, through]`,
/// binary-searching on timestamp. Handles the boundary case where `from ==
/// through` lands between two samples by returning `None` rather than an
/// index whose sample falls outside the window.
fn index_bounds(samples: &[Sample], from: Timestamp, through: Timestamp) -> Option<(usize, usize)> {
    let len = samples.len();
    if len == 0 {
        return None;
    }
    if through < samples[0].timestamp || from > samples[len - 1].timestamp {
        return None;
    }

    let start_idx = samples.partition_point(|s| s.timestamp < from);
    if start_idx >= len {
        return None;
    }

    let mut end_idx = samples.partition_point(|s| s.timestamp <= through);
    if end_idx == 0 {
        return None;
    }
    end_idx -= 1;

    if start_idx > end_idx {
        return None;
    }
    Some((start_idx, end_idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_until_capacity_then_splits() {
        let mut chunk = ChunkEncoder::new(2);
        assert!(matches!(
            chunk.add(Sample::new(1, 1.0)),
            ChunkAddOutcome::Appended
        ));
        assert!(matches!(
            chunk.add(Sample::new(2, 2.0)),
            ChunkAddOutcome::Appended
        ));
        assert!(chunk.is_full());
        match chunk.add(Sample::new(3, 3.0)) {
            ChunkAddOutcome::Split(next) => {
                assert_eq!(chunk.len(), 2);
                assert_eq!(next.len(), 1);
                assert_eq!(next.first_timestamp(), Some(3));
            }
            ChunkAddOutcome::Appended => panic!("expected split"),
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut chunk = ChunkEncoder::new(16);
        for i in 1..=5 {
            chunk.add(Sample::new(i, i as f64 * 1.5));
        }
        let bytes = chunk.to_bytes();
        let restored = ChunkEncoder::from_bytes(&bytes).unwrap();
        assert_eq!(restored.iter().collect::<Vec<_>>(), chunk.iter().collect::<Vec<_>>());
    }

    #[test]
    fn range_values_is_inclusive_both_ends() {
        let mut chunk = ChunkEncoder::new(16);
        for t in [10, 20, 30, 40, 50] {
            chunk.add(Sample::new(t, t as f64));
        }
        let got = chunk.range_values(20, 40);
        assert_eq!(
            got.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![20, 30, 40]
        );
    }

    #[test]
    fn range_values_start_equals_end() {
        let mut chunk = ChunkEncoder::new(16);
        for t in [10, 20, 30] {
            chunk.add(Sample::new(t, t as f64));
        }
        let got = chunk.range_values(20, 20);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, 20);
    }

    #[test]
    fn range_values_out_of_bounds_is_empty() {
        let mut chunk = ChunkEncoder::new(16);
        chunk.add(Sample::new(10, 1.0));
        assert!(chunk.range_values(100, 200).is_empty());
    }
}
