/// Final status of a failed RPC, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("RPC failed ({code}): {message}")]
pub struct RpcStatus {
    /// Numeric gRPC status code.
    pub code: i32,
    pub message: String,
    pub details: String,
}

impl RpcStatus {
    pub fn new(code: i32, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn from_grpc(status: &tonic::Status) -> Self {
        Self {
            code: status.code() as i32,
            message: status.message().to_string(),
            details: String::from_utf8_lossy(status.details()).into_owned(),
        }
    }
}

/// Error types for session, streaming and synthesis operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DialogflowError {
    /// The channel to the service could not be constructed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The service answered with a non-OK status.
    #[error(transparent)]
    Rpc(#[from] RpcStatus),

    /// A frame could not be written to the request stream.
    #[error("Stream write failed")]
    WriteFailed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DialogflowError {
    fn from(e: std::io::Error) -> Self {
        DialogflowError::Io(e.to_string())
    }
}
