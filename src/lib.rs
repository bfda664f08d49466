pub mod chunk;
pub mod common;
pub mod config;
pub mod error;
pub mod ingester;
pub mod labels;
pub mod metrics;
pub mod series;
pub mod store;
pub mod tenant;

pub use config::IngesterConfig;
pub use error::{IngestError, IngestResult};
pub use ingester::{Ingester, ServiceState};

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`
/// (falling back to `info`), writing to stdout. Call once at process
/// startup; calling it twice is a harmless no-op for the second call.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
