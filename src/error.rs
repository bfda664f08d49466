use thiserror::Error;

/// Per-sample rejection reasons. Reported and counted, never abort a batch.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum BadSample {
    #[error("duplicate timestamp")]
    DuplicateTimestamp,
    #[error("out of order")]
    OutOfOrder,
}

/// Tenant admission-limit breaches. Abort the remainder of the current batch.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum AdmissionLimit {
    #[error("too many series for user")]
    TooManySeriesPerUser,
    #[error("too many series for metric")]
    TooManySeriesPerMetric,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IngestError {
    #[error("bad sample: {0}")]
    BadSample(#[from] BadSample),

    #[error("admission limit: {0}")]
    AdmissionLimit(#[from] AdmissionLimit),

    #[error("no tenant in request context")]
    TenantMissing,

    #[error("ingester is not running")]
    ServiceNotRunning,

    #[error("chunk encoding error: {0}")]
    EncodingError(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// HTTP-equivalent status code for this error, per the taxonomy.
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::BadSample(_) => 400,
            IngestError::AdmissionLimit(_) => 429,
            IngestError::TenantMissing => 401,
            IngestError::ServiceNotRunning => 503,
            IngestError::EncodingError(_) | IngestError::Internal(_) => 500,
            IngestError::Cancelled => 499,
        }
    }
}

pub type IngestResult<T = ()> = Result<T, IngestError>;

/// Errors reported by the external chunk store. Contained within the flush
/// loop: logged, counted, retried on the next tick, never surfaced to the
/// write path.
#[derive(Clone, Debug, Error)]
#[error("chunk store failure: {0}")]
pub struct StoreFailure(pub String);
