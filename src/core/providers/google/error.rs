//! Google Cloud provider error types.
//!
//! These errors describe failures of the shared Google Cloud plumbing
//! (credentials, channels, raw gRPC statuses). The Dialogflow session layer
//! converts them into its own error type.

/// Error types for Google Cloud API operations.
#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    /// Authentication failed (invalid credentials, expired token, etc.)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Configuration error (bad endpoint, unreadable credentials, etc.)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The channel to the endpoint could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Network-level error (timeout, unavailable service)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// gRPC-specific error with status code
    #[error("gRPC error ({code}): {message}")]
    GrpcError { code: String, message: String },
}

impl GoogleError {
    /// Creates a gRPC error from a tonic Status.
    pub fn from_grpc_status(status: &tonic::Status) -> Self {
        Self::GrpcError {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }

    /// Categorizes a gRPC error based on the status code.
    pub fn categorize_grpc_error(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => {
                Self::AuthenticationFailed(status.message().to_string())
            }
            tonic::Code::InvalidArgument => Self::ConfigurationError(status.message().to_string()),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                Self::NetworkError(status.message().to_string())
            }
            _ => Self::from_grpc_status(&status),
        }
    }
}
