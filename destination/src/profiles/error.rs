//! Profile error types

use thiserror::Error;

/// Error type for per-stream profile delivery
///
/// Returned by the stream workers; an overflow resets the stream while
/// a closed subscriber just ends it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    /// The stream's bounded profile queue saturated
    #[error("profile queue overflowed")]
    QueueOverflow,

    /// The subscriber side of the stream has gone away
    #[error("profile stream closed")]
    StreamClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProfileError::QueueOverflow.to_string(),
            "profile queue overflowed"
        );
        assert_eq!(
            ProfileError::StreamClosed.to_string(),
            "profile stream closed"
        );
    }
}
