use crate::common::constants::{DEFAULT_CHUNK_CAPACITY, DEFAULT_STRIPE_COUNT};
use std::time::Duration;

pub const CHUNK_CAPACITY_MIN: usize = 16;
pub const CHUNK_CAPACITY_MAX: usize = 1 << 20;

pub const DEFAULT_MAX_SERIES_PER_USER: usize = 1_000_000;
pub const DEFAULT_MAX_SERIES_PER_METRIC: usize = 100_000;
pub const DEFAULT_MAX_CHUNK_AGE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_SERIES_IDLE: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_FLUSH_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Tunable limits and timing knobs for an [`Ingester`](crate::ingester::Ingester).
///
/// Replaces the source's Valkey `ConfigurationContext` registration: this crate
/// is not hosted inside Valkey, so there is no module-level config store to
/// register against. Callers construct one directly (e.g. parsed from a TOML
/// file or environment by the daemon wrapper, which is out of scope here).
#[derive(Debug, Clone, bon::Builder)]
pub struct IngesterConfig {
    #[builder(default = DEFAULT_MAX_SERIES_PER_USER)]
    pub max_series_per_user: usize,

    #[builder(default = DEFAULT_MAX_SERIES_PER_METRIC)]
    pub max_series_per_metric: usize,

    #[builder(default = DEFAULT_MAX_CHUNK_AGE)]
    pub max_chunk_age: Duration,

    #[builder(default = DEFAULT_MAX_SERIES_IDLE)]
    pub max_series_idle: Duration,

    #[builder(default = DEFAULT_CHUNK_CAPACITY)]
    pub chunk_capacity: usize,

    #[builder(default = DEFAULT_STRIPE_COUNT)]
    pub stripe_count: usize,

    #[builder(default = DEFAULT_FLUSH_TICK_INTERVAL)]
    pub flush_tick_interval: Duration,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        IngesterConfig::builder().build()
    }
}

impl IngesterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(CHUNK_CAPACITY_MIN..=CHUNK_CAPACITY_MAX).contains(&self.chunk_capacity) {
            return Err(format!(
                "chunk_capacity must be between {CHUNK_CAPACITY_MIN} and {CHUNK_CAPACITY_MAX}, got {}",
                self.chunk_capacity
            ));
        }
        if self.stripe_count == 0 {
            return Err("stripe_count must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(IngesterConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = IngesterConfig::builder()
            .max_series_per_user(1)
            .max_series_per_metric(1)
            .build();
        assert_eq!(cfg.max_series_per_user, 1);
        assert_eq!(cfg.max_series_per_metric, 1);
        assert_eq!(cfg.chunk_capacity, DEFAULT_CHUNK_CAPACITY);
    }

    #[test]
    fn rejects_oversized_chunk_capacity() {
        let cfg = IngesterConfig::builder()
            .chunk_capacity(CHUNK_CAPACITY_MAX + 1)
            .build();
        assert!(cfg.validate().is_err());
    }
}
