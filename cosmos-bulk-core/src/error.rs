//! Error types for core validation.
//!
//! All errors must be handled explicitly. No silent failures.

use std::fmt;

/// The result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating core values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A limit was exceeded.
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// An unrecognized wire value was supplied for an enum.
    UnknownValue {
        /// The enum being decoded.
        kind: &'static str,
        /// The raw value.
        value: i64,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded { limit, max, actual } => {
                write!(f, "limit exceeded: {limit} (max={max}, actual={actual})")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::UnknownValue { kind, value } => {
                write!(f, "unknown {kind} value: {value}")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::InvalidArgument {
            name: "max_body_length",
            reason: "must be positive",
        };
        assert_eq!(
            format!("{err}"),
            "invalid argument 'max_body_length': must be positive"
        );
    }

    #[test]
    fn test_limit_exceeded_display() {
        let err = Error::LimitExceeded {
            limit: "max_operation_count",
            max: 100,
            actual: 101,
        };
        let msg = format!("{err}");
        assert!(msg.contains("max_operation_count"));
        assert!(msg.contains("100"));
        assert!(msg.contains("101"));
    }
}
