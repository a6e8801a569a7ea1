//! Shared error types for the trace and metrics halves of the SDK.

use std::{result::Result, time::Duration};

use thiserror::Error;

/// Errors returned by SDK lifecycle operations (`force_flush`, `shutdown`)
/// and by exporters.
///
/// Recording paths (span mutation, instrument measurements) never surface
/// errors to the caller; misuse is logged and the measurement dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OTelSdkError {
    /// Shutdown was already invoked on this component.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// The operation did not complete within the allotted time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation failed for the contained reason.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

/// A specialized `Result` for SDK operations.
pub type OTelSdkResult = Result<(), OTelSdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause() {
        let err = OTelSdkError::InternalFailure("channel closed".into());
        assert_eq!(err.to_string(), "Operation failed: channel closed");

        let err = OTelSdkError::Timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
    }
}
