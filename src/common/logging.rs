//! Naming-compatible wrappers over `tracing`, kept so call sites read the same
//! regardless of which logging backend the crate is built against.

pub fn log_notice<T: AsRef<str>>(message: T) {
    tracing::info!("{}", message.as_ref());
}

pub fn log_debug<T: AsRef<str>>(message: T) {
    tracing::debug!("{}", message.as_ref());
}

pub fn log_warning<T: AsRef<str>>(message: T) {
    tracing::warn!("{}", message.as_ref());
}

pub fn log_error<T: AsRef<str>>(message: T) {
    tracing::error!("{}", message.as_ref());
}
