//! Query Execution Module
//!
//! Provides the cooperative evaluation budget of a top-level query:
//! - Step ceiling counted per joined row and per write
//! - Memory ceiling checked every few thousand steps

mod limits;

pub use limits::{Budget, ResourceError, ResourceLimits, StepOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_resource_error_display() {
        let err = ResourceError::StepLimitExceeded { limit: 42 };
        assert_eq!(format!("{err}"), "Step limit exceeded: limit 42 steps");

        let engine: EngineError = err.into();
        assert_eq!(format!("{engine}"), "Step limit exceeded: limit 42 steps");
    }
}
