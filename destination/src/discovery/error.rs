//! Discovery error types

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

/// Error type for discovery operations
///
/// Variants map onto the gRPC codes the proxy sees; everything that is
/// not an argument problem surfaces as `Internal`.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Authority path or port failed to parse
    #[error("invalid authority: {0}")]
    InvalidAuthority(String),

    /// Authority parsed but nothing owns it
    #[error("no service or endpoint owns {0}")]
    InvalidService(String),

    /// More than one service claims the cluster IP
    #[error("cluster IP {0} is claimed by multiple services")]
    ConflictingServiceIp(IpAddr),

    /// A dispatcher enqueue exceeded the stream send timeout
    #[error("update enqueue exceeded the send timeout of {0:?}")]
    BackpressureTimeout(Duration),

    /// Topic or dispatcher was already closed
    #[error("subscribed after close")]
    ShuttingDown,

    /// The underlying transport rejected a send
    #[error("transport send failed: {0}")]
    SendFailure(String),
}

impl From<DiscoveryError> for tonic::Status {
    fn from(err: DiscoveryError) -> Self {
        match &err {
            DiscoveryError::InvalidAuthority(_) | DiscoveryError::InvalidService(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            DiscoveryError::ConflictingServiceIp(_) => {
                tonic::Status::failed_precondition(err.to_string())
            }
            DiscoveryError::BackpressureTimeout(_)
            | DiscoveryError::ShuttingDown
            | DiscoveryError::SendFailure(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_errors_map_to_invalid_argument() {
        let status = tonic::Status::from(DiscoveryError::InvalidAuthority("web:http".into()));
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = tonic::Status::from(DiscoveryError::InvalidService("web.ns".into()));
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_ip_conflict_maps_to_failed_precondition() {
        let ip: IpAddr = "10.8.0.7".parse().unwrap();
        let status = tonic::Status::from(DiscoveryError::ConflictingServiceIp(ip));
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(status.message().contains("10.8.0.7"));
    }

    #[test]
    fn test_stream_errors_map_to_internal() {
        let status =
            tonic::Status::from(DiscoveryError::BackpressureTimeout(Duration::from_secs(5)));
        assert_eq!(status.code(), tonic::Code::Internal);

        let status = tonic::Status::from(DiscoveryError::ShuttingDown);
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
