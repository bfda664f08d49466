pub const METRIC_NAME_LABEL: &str = "__name__";

/// Soft capacity of a single chunk, in samples. The encoder splits once a chunk
/// would exceed this many samples.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1024;

/// Number of stripes in the per-fingerprint lock array.
pub const DEFAULT_STRIPE_COUNT: usize = 512;
