use crate::chunk::encoder::ChunkEncoder;
use crate::common::time::current_time_millis;
use crate::common::Timestamp;

/// Metadata envelope around a [`ChunkEncoder`]: tracks the time range it
/// covers and when it was last mutated, without requiring callers to decode
/// the chunk to answer range-overlap questions.
#[derive(Debug, Clone)]
pub struct ChunkDesc {
    pub chunk: ChunkEncoder,
    first_time: Timestamp,
    last_time: Timestamp,
    /// Wall-clock time of the last mutation. Read only by the flush loop as
    /// an advisory hint for idle/age decisions — never a correctness input.
    pub last_update: i64,
}

impl ChunkDesc {
    pub fn new(chunk: ChunkEncoder, first_time: Timestamp) -> Self {
        Self {
            chunk,
            first_time,
            last_time: first_time,
            last_update: current_time_millis(),
        }
    }

    pub fn first_time(&self) -> Timestamp {
        self.first_time
    }

    pub fn last_time(&self) -> Timestamp {
        self.last_time
    }

    /// Records that `timestamp` was just appended to `self.chunk`.
    pub fn touch(&mut self, timestamp: Timestamp) {
        self.last_time = timestamp;
        self.last_update = current_time_millis();
    }

    pub fn age_millis(&self) -> i64 {
        current_time_millis() - self.last_update
    }
}
