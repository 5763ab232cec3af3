//! # Engine Errors
//!
//! One taxonomy covers compile-time binding errors, recursion errors,
//! evaluation limits and extern failures. None of them is fatal: compile
//! errors degrade the offending sub-plan to an empty one, limits abort the
//! current query, extern failures produce no rows. Every error is recorded
//! in a [`Diagnostics`] accumulator so a session can report whether it ran
//! cleanly.

use crate::ast::Location;
use crate::execution::ResourceError;
use tracing::warn;

/// Engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A variable that must be bound at this point is not
    #[error("Unbound variable '{name}' at {location}")]
    UnboundVariable { name: String, location: Location },

    /// Recursion through negation or aggregation
    #[error("Parity error: '{relation}' depends on itself through negation or aggregation")]
    Parity { relation: String },

    /// The same attribute named twice in one clause
    #[error("Duplicate attribute '{attribute}' at {location}")]
    DuplicateAttribute { attribute: String, location: Location },

    /// A clause that cannot be asserted used as a rule head or fact
    #[error("Invalid left-hand side at {location}: {kind} cannot be asserted")]
    InvalidLhs { kind: String, location: Location },

    #[error("Step limit exceeded: limit {limit} steps")]
    StepLimitExceeded { limit: u64 },

    #[error("Memory limit exceeded: used {used} bytes, limit {limit} bytes")]
    MemoryLimitExceeded { limit: usize, used: usize },

    /// An extern predicate reported failure or panicked
    #[error("Extern '{name}' failed: {message}")]
    ExternCall { name: String, message: String },

    #[error("Module '{module}' failed to load: {message}")]
    ModuleLoad { module: String, message: String },

    /// Facts or rules added to a relation that has already been evaluated
    #[error("Relation '{relation}' is already evaluated and cannot change")]
    RelationSealed { relation: String },

    #[error("Arity {arity} exceeds the supported maximum of 64 columns")]
    ArityTooLarge { arity: usize },
}

impl EngineError {
    /// Whether the error aborts the running query.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            EngineError::StepLimitExceeded { .. } | EngineError::MemoryLimitExceeded { .. }
        )
    }
}

impl From<ResourceError> for EngineError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::StepLimitExceeded { limit } => EngineError::StepLimitExceeded { limit },
            ResourceError::MemoryLimitExceeded { limit, used } => {
                EngineError::MemoryLimitExceeded { limit, used }
            }
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error list and counter for one session.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    errors: Vec<EngineError>,
    count: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, error: EngineError) {
        warn!(error = %error, "engine_error");
        self.errors.push(error);
        self.count += 1;
    }

    /// Errors reported since the session began, drained or not.
    pub fn error_count(&self) -> usize {
        self.count
    }

    pub fn is_successful(&self) -> bool {
        self.count == 0
    }

    pub fn errors(&self) -> &[EngineError] {
        &self.errors
    }

    /// Drain the collected errors; the session count is kept.
    pub fn take(&mut self) -> Vec<EngineError> {
        std::mem::take(&mut self.errors)
    }

    pub fn clear(&mut self) {
        self.errors.clear();
        self.count = 0;
    }
}
