use thiserror::Error;

#[derive(Debug, Error)]
pub enum StabilityError {
    /// Malformed caller input, always reported before any I/O or network call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("gRPC status: {0}")]
    Status(#[from] tonic::Status),
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl StabilityError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        StabilityError::InvalidArgument(msg.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, StabilityError::InvalidArgument(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StabilityError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, StabilityError>;
