//! Grepable error codes shared by services, backends, and routes.

/// Errors that surface to API clients carry a stable code alongside their
/// human-readable message.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
