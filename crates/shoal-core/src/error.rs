//! Error types shared across the Shoal gateway.
//!
//! [`ShoalError`] is a closed taxonomy: every failure the core can produce
//! maps to exactly one variant, and the HTTP layer derives status codes from
//! the variant alone. Backend failures keep their underlying cause attached
//! so operators see the real S3 error in logs.

/// Boxed error type carried by [`ShoalError::BackendFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Gateway error type.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    /// A malformed request or an unknown configuration value (e.g. an
    /// unrecognized balancer strategy name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named bucket or object key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry reported zero eligible buckets.
    #[error("no available backend bucket")]
    NoAvailableBackend,

    /// Every eligible bucket lacks the requested free space.
    #[error("no bucket has enough space for {requested} bytes")]
    InsufficientCapacity {
        /// The number of bytes the caller asked to place.
        requested: u64,
    },

    /// A call against a backend S3 endpoint failed.
    #[error("backend failure: {source}")]
    BackendFailure {
        /// The underlying SDK or transport error.
        #[source]
        source: BoxError,
    },

    /// The operation's cancellation token fired before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// An invariant violation or unexpected I/O error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ShoalError {
    /// Wrap a backend S3 error, keeping it as the source cause.
    pub fn backend(source: impl Into<BoxError>) -> Self {
        Self::BackendFailure {
            source: source.into(),
        }
    }

    /// Build an [`ShoalError::Internal`] from anything displayable.
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal(message.to_string())
    }

    /// Build an [`ShoalError::InvalidArgument`] from anything displayable.
    pub fn invalid(message: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(message.to_string())
    }
}

impl From<std::io::Error> for ShoalError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Convenience result type for gateway operations.
pub type ShoalResult<T> = Result<T, ShoalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_render_capacity_error_with_requested_size() {
        let err = ShoalError::InsufficientCapacity { requested: 1024 };
        assert_eq!(err.to_string(), "no bucket has enough space for 1024 bytes");
    }

    #[test]
    fn test_should_keep_backend_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ShoalError::backend(io);
        assert!(err.to_string().contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
