//! Batch size limits.
//!
//! Every batch is bounded twice: by serialized body length and by operation
//! count. A builder admits an operation only while both bounds hold, with one
//! exception: an empty builder always admits its first operation so that a
//! single oversized operation is never starved.

/// Default maximum request body length for a batch, in bytes.
pub const MAX_BODY_LENGTH_DEFAULT: u32 = 220_201;

/// Default maximum number of operations in a batch.
pub const MAX_OPERATION_COUNT_DEFAULT: u32 = 100;

/// Hard ceiling on the configurable body length (2 MiB service limit).
pub const MAX_BODY_LENGTH_CEILING: u32 = 2 * 1024 * 1024;

/// Size and count bounds for one batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum serialized body length in bytes.
    pub max_body_length: u32,
    /// Maximum number of operations.
    pub max_operation_count: u32,
}

impl BatchLimits {
    /// Creates limits with the service defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_body_length: MAX_BODY_LENGTH_DEFAULT,
            max_operation_count: MAX_OPERATION_COUNT_DEFAULT,
        }
    }

    /// Creates limits with explicit bounds.
    #[must_use]
    pub const fn with_bounds(max_body_length: u32, max_operation_count: u32) -> Self {
        Self {
            max_body_length,
            max_operation_count,
        }
    }

    /// Validates that the limits are usable.
    ///
    /// # Errors
    /// Returns an error if either bound is zero or the body length exceeds
    /// the service ceiling.
    pub const fn validate(&self) -> crate::Result<()> {
        if self.max_body_length == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_body_length",
                reason: "must be positive",
            });
        }

        if self.max_body_length > MAX_BODY_LENGTH_CEILING {
            return Err(crate::Error::LimitExceeded {
                limit: "max_body_length",
                max: MAX_BODY_LENGTH_CEILING as u64,
                actual: self.max_body_length as u64,
            });
        }

        if self.max_operation_count == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_operation_count",
                reason: "must be positive",
            });
        }

        Ok(())
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(BatchLimits::new().validate().is_ok());
    }

    #[test]
    fn test_zero_body_length_rejected() {
        let limits = BatchLimits::with_bounds(0, 10);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_zero_operation_count_rejected() {
        let limits = BatchLimits::with_bounds(1000, 0);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_body_length_above_ceiling_rejected() {
        let limits = BatchLimits::with_bounds(MAX_BODY_LENGTH_CEILING + 1, 10);
        assert!(matches!(
            limits.validate(),
            Err(crate::Error::LimitExceeded { .. })
        ));
    }
}
