pub mod constants;
pub mod encoding;
pub mod hash;
pub mod logging;
pub mod time;

pub type Timestamp = i64;

pub const SAMPLE_SIZE: usize = size_of::<Sample>();

/// A single (timestamp, value) data point.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}
