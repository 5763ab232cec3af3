//! Resource Limits Module
//!
//! Provides resource limit enforcement for query evaluation:
//! - Evaluation step ceiling
//! - Memory ceiling over the estimated size of every table
//!
//! ## Design
//!
//! Uses cooperative checking. The executor calls [`Budget::step`] once per
//! joined row and per write; every `memory_check_interval` steps the
//! caller is asked to supply a fresh memory estimate.

use crate::config::EngineConfig;

/// Resource limit error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// Evaluation step ceiling reached
    #[error("Step limit exceeded: limit {limit} steps")]
    StepLimitExceeded { limit: u64 },

    /// Memory limit exceeded
    #[error("Memory limit exceeded: used {used} bytes, limit {limit} bytes")]
    MemoryLimitExceeded { limit: usize, used: usize },
}

/// Resource limits configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum evaluation steps per top-level query (None = unlimited)
    pub max_steps: Option<u64>,

    /// Maximum estimated table memory in bytes (None = unlimited)
    pub max_memory_bytes: Option<usize>,

    /// Steps between two memory estimates
    pub memory_check_interval: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_steps: None,
            max_memory_bytes: None,
            memory_check_interval: 10_000,
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_memory_check_interval(mut self, steps: u64) -> Self {
        self.memory_check_interval = steps.max(1);
        self
    }

    /// Check a memory estimate against the ceiling.
    pub fn check_memory(&self, used: usize) -> Result<(), ResourceError> {
        match self.max_memory_bytes {
            Some(limit) if used > limit => Err(ResourceError::MemoryLimitExceeded { limit, used }),
            _ => Ok(()),
        }
    }
}

impl From<&EngineConfig> for ResourceLimits {
    fn from(config: &EngineConfig) -> Self {
        ResourceLimits {
            max_steps: (config.max_steps > 0).then_some(config.max_steps),
            max_memory_bytes: (config.max_memory_bytes > 0).then_some(config.max_memory_bytes),
            memory_check_interval: config.memory_check_interval.max(1),
        }
    }
}

/// Running step counter of one top-level query.
#[derive(Debug, Clone)]
pub struct Budget {
    limits: ResourceLimits,
    steps: u64,
}

/// What the executor must do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// A memory estimate is due; pass it to [`Budget::check_memory`].
    CheckMemory,
}

impl Budget {
    pub fn new(limits: ResourceLimits) -> Self {
        Budget { limits, steps: 0 }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Count one step.
    pub fn step(&mut self) -> Result<StepOutcome, ResourceError> {
        self.steps += 1;
        if let Some(limit) = self.limits.max_steps {
            if self.steps > limit {
                return Err(ResourceError::StepLimitExceeded { limit });
            }
        }
        if self.limits.max_memory_bytes.is_some()
            && self.steps % self.limits.memory_check_interval == 0
        {
            return Ok(StepOutcome::CheckMemory);
        }
        Ok(StepOutcome::Continue)
    }

    pub fn check_memory(&self, used: usize) -> Result<(), ResourceError> {
        self.limits.check_memory(used)
    }

    /// Start counting a new query from zero.
    pub fn reset(&mut self) {
        self.steps = 0;
    }
}
