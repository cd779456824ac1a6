//! Fleet Telemetry Error System
//!
//! Error handling for the ingestion, routing and persistence pipeline.
//! Row-level problems are not errors here: they are reported as
//! [`SkipReason`](crate::types::SkipReason) values and never abort a file.

use thiserror::Error;

/// Result type for all pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Metadata cache backing-store errors
    #[error("Cache operation failed: {operation} - {reason}")]
    Cache {
        /// Operation that failed
        operation: String,
        /// Reason for failure
        reason: String,
    },

    /// A routed record could not be handed to its channel
    #[error("Dispatch to channel '{channel}' failed: {reason}")]
    Dispatch {
        /// Channel name
        channel: String,
        /// Reason for failure
        reason: String,
    },

    /// Persistent store errors
    #[error("Store operation failed: {operation} - {reason}")]
    Store {
        /// Operation that failed
        operation: String,
        /// Reason for failure
        reason: String,
    },

    /// The input file itself cannot be read or decoded
    #[error("File fault: {reason}")]
    FileFault {
        /// Reason for failure
        reason: String,
    },

    /// The consumer batch envelope is malformed
    #[error("Malformed batch: {reason}")]
    MalformedBatch {
        /// Reason for failure
        reason: String,
    },

    /// Validation errors
    #[error("Validation failed for field '{field}': {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration source errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Redis errors
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Generic internal error (use sparingly)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl PipelineError {
    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create cache error
    pub fn cache(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cache {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create dispatch error
    pub fn dispatch(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create store error
    pub fn store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create file fault
    pub fn file_fault(reason: impl Into<String>) -> Self {
        Self::FileFault {
            reason: reason.into(),
        }
    }

    /// Create malformed batch error
    pub fn malformed_batch(reason: impl Into<String>) -> Self {
        Self::MalformedBatch {
            reason: reason.into(),
        }
    }

    /// Create validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create internal error (use sparingly)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create connection error (alias for cache error)
    pub fn connection(message: impl Into<String>) -> Self {
        Self::cache("connection", message)
    }

    /// Check if the whole file must be abandoned
    #[must_use]
    pub const fn is_file_fault(&self) -> bool {
        matches!(self, Self::FileFault { .. })
    }

    /// Check if error is retryable by an outer orchestrator
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration { .. } => false,
            Self::Validation { .. } => false,
            Self::MalformedBatch { .. } => false,
            Self::Cache { .. } => true,
            Self::Dispatch { .. } => true,
            Self::Store { .. } => true,
            Self::FileFault { .. } => true,
            Self::Serialization(_) => false,
            Self::Io(_) => true,
            Self::ConfigSource(_) => false,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            Self::Internal { .. } => false,
        }
    }

    /// Monitoring code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Cache { .. } => ErrorCode::CacheRead,
            #[cfg(feature = "redis")]
            Self::Redis(_) => ErrorCode::CacheConnection,
            Self::Dispatch { .. } => ErrorCode::DispatchSend,
            Self::Store { .. } => ErrorCode::StoreWrite,
            Self::FileFault { .. } | Self::Io(_) => ErrorCode::FileRead,
            Self::MalformedBatch { .. } => ErrorCode::ConsumerEnvelope,
            Self::Serialization(_) => ErrorCode::ConsumerMessage,
            Self::Validation { .. } => ErrorCode::RowValidation,
            Self::Configuration { .. } | Self::ConfigSource(_) | Self::Internal { .. } => {
                ErrorCode::Internal
            }
        }
    }
}

/// Pipeline error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Row errors (1000-1099)
    RowValidation = 1001,
    RowSpeedLimit = 1002,
    RowCoordinates = 1003,

    /// Cache errors (1100-1199)
    CacheConnection = 1101,
    CacheRead = 1102,
    CacheWrite = 1103,

    /// Dispatch errors (1200-1299)
    DispatchSend = 1201,
    StoreWrite = 1202,

    /// File errors (1300-1399)
    FileRead = 1301,

    /// Consumer errors (1400-1499)
    ConsumerEnvelope = 1401,
    ConsumerMessage = 1402,

    /// Everything else
    Internal = 1900,
}

impl ErrorCode {
    /// Get error code as u16
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get error category
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match *self as u16 {
            1000..=1099 => "row",
            1100..=1199 => "cache",
            1200..=1299 => "dispatch",
            1300..=1399 => "file",
            1400..=1499 => "consumer",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let fault = PipelineError::file_fault("header unreadable");
        assert!(fault.is_file_fault());
        assert!(fault.is_retryable());
        assert_eq!(fault.code().category(), "file");

        let batch = PipelineError::malformed_batch("missing Records");
        assert!(!batch.is_file_fault());
        assert!(!batch.is_retryable());
        assert_eq!(batch.code(), ErrorCode::ConsumerEnvelope);

        let dispatch = PipelineError::dispatch("high", "receiver dropped");
        assert_eq!(dispatch.code().as_u16(), 1201);
        assert_eq!(
            dispatch.to_string(),
            "Dispatch to channel 'high' failed: receiver dropped"
        );
    }

    #[test]
    fn test_row_codes_are_in_row_category() {
        for code in [
            ErrorCode::RowValidation,
            ErrorCode::RowSpeedLimit,
            ErrorCode::RowCoordinates,
        ] {
            assert_eq!(code.category(), "row");
        }
    }
}
