//! Error types for Sieve core operations.
//!
//! Most failure modes in the indexing subsystem fail closed (an empty result,
//! never an error). The variants below are the intentional exceptions: caller
//! construction errors and key coercions that would otherwise corrupt a bucket.

use crate::value::ValueType;
use thiserror::Error;

/// Result type alias using SieveError
pub type Result<T> = std::result::Result<T, SieveError>;

/// Core error types for Sieve operations.
#[derive(Error, Debug)]
pub enum SieveError {
    // === Value Errors ===
    /// A value could not be converted to the declared type of a property
    #[error("cannot convert {value} to {target}")]
    Conversion { value: String, target: ValueType },

    /// A comparison argument has the wrong shape for its operator
    #[error("invalid argument for {operation}: {reason}")]
    InvalidArgument { operation: String, reason: String },

    // === Property Errors ===
    /// No invoker is registered under this property name
    #[error("unknown property: {property}")]
    UnknownProperty { property: String },

    /// The invoker for this property cannot write values
    #[error("property is read-only: {property}")]
    ReadOnlyProperty { property: String },

    // === Column Store Errors ===
    /// Block size can only be changed before any value is written
    #[error("block size is locked at {current} once values are written")]
    BlockSizeLocked { current: u32 },

    /// Block size must be at least one slot
    #[error("invalid block size: {size}")]
    InvalidBlockSize { size: u32 },

    // === Enumeration Errors ===
    /// The collection changed structurally while being enumerated
    #[error("collection modified during enumeration (generation {expected} -> {found})")]
    ConcurrentModification { expected: u64, found: u64 },

    // === Search Errors ===
    /// Invalid match pattern
    #[error("invalid pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === Configuration Errors ===
    /// Configuration file parsing failed
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SieveError {
    /// Returns true if this error was caused by how the caller built a request,
    /// as opposed to the data being queried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SieveError::InvalidArgument { .. }
                | SieveError::UnknownProperty { .. }
                | SieveError::ReadOnlyProperty { .. }
                | SieveError::BlockSizeLocked { .. }
                | SieveError::InvalidBlockSize { .. }
                | SieveError::InvalidPattern { .. }
        )
    }

    /// Returns true if retrying the operation on a stable snapshot can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SieveError::ConcurrentModification { .. } | SieveError::Io(_)
        )
    }

    /// Create a conversion error
    pub fn conversion(value: impl std::fmt::Display, target: ValueType) -> Self {
        SieveError::Conversion {
            value: value.to_string(),
            target,
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SieveError::InvalidArgument {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown property error
    pub fn unknown_property(property: impl Into<String>) -> Self {
        SieveError::UnknownProperty {
            property: property.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        let err = SieveError::invalid_argument("between", "expected a range");
        assert!(err.is_caller_error());
        assert!(!err.is_recoverable());

        let err = SieveError::ConcurrentModification {
            expected: 1,
            found: 2,
        };
        assert!(!err.is_caller_error());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_conversion_message() {
        let err = SieveError::conversion("abc", ValueType::Int);
        assert_eq!(err.to_string(), "cannot convert abc to int");
    }
}
