//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - deductive.toml (default configuration)
//! - deductive.local.toml (git-ignored local overrides)
//! - Environment variables (DEDUCTIVE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # deductive.toml
//! [engine]
//! max_steps = 50000000
//! evaluation = "semi_naive"
//!
//! [optimizer]
//! decompose_clauses = false
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! DEDUCTIVE_ENGINE__MAX_STEPS=1000000
//! DEDUCTIVE_LOGGING__LEVEL=debug
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fixpoint strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Recursive reads only see the rows added in the previous round
    #[default]
    SemiNaive,
    /// Every rule re-reads every relation in full each round
    Naive,
}

/// Evaluation limits and strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Step ceiling per top-level query (0 = unlimited)
    #[serde(default)]
    pub max_steps: u64,

    /// Ceiling on the estimated size of all tables in bytes (0 = unlimited)
    #[serde(default)]
    pub max_memory_bytes: usize,

    /// Steps between two memory estimates
    #[serde(default = "default_memory_check_interval")]
    pub memory_check_interval: u64,

    #[serde(default)]
    pub evaluation: EvaluationMode,
}

/// Plan rewrite switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Mark reads of relations in the same recursive group
    #[serde(default = "default_true")]
    pub delta_reads: bool,

    /// Split rules into base rules and one delta variant per recursive read
    #[serde(default = "default_true")]
    pub split_recursive: bool,

    /// Choose access paths and pre-declare secondary indexes
    #[serde(default = "default_true")]
    pub binding_patterns: bool,

    /// Rewrite multi-attribute clauses into single-attribute joins
    #[serde(default)]
    pub decompose_clauses: bool,

    /// Deduplicate on live variables after joins that bind unused ones
    #[serde(default = "default_true")]
    pub eliminate_dead_bindings: bool,
}

/// Table and snapshot settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Minimum number of cells of a new primary index
    #[serde(default)]
    pub initial_index_capacity: usize,

    /// Write and verify a CRC32 trailer on snapshots
    #[serde(default = "default_true")]
    pub snapshot_checksums: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_memory_check_interval() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: 0,
            max_memory_bytes: 0,
            memory_check_interval: default_memory_check_interval(),
            evaluation: EvaluationMode::SemiNaive,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            delta_reads: true,
            split_recursive: true,
            binding_patterns: true,
            decompose_clauses: false,
            eliminate_dead_bindings: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            initial_index_capacity: 0,
            snapshot_checksums: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. deductive.toml (base configuration)
    /// 2. deductive.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (DEDUCTIVE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("deductive.toml"))
            .merge(Toml::file("deductive.local.toml"))
            .merge(Env::prefixed("DEDUCTIVE_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DEDUCTIVE_").split("__"))
            .extract()
    }
}
