//! # Deductive Database Engine
//!
//! Assert facts and rules over named relations; the engine derives every
//! tuple that follows, recursive relations included, and answers pattern
//! queries over the result.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! AST (Clause / Rule)
//!     ↓
//! [Compiler]            → plan tree per rule head (slots, joins, writes)
//!     ↓
//! [Registry]            → relations, projection and closure rules
//!     ↓
//! [Recursion Analyzer]  → execution units, parity check
//!     ↓
//! [Optimizer]           → delta reads, recursive split, access paths
//!     ↓
//! [Fixpoint]            → semi-naive rounds over the tuple store
//!     ↓
//! Rows
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use deductive::ast::builders::{atom, RuleBuilder};
//! use deductive::{Database, Value};
//!
//! let mut db = Database::new();
//! for (a, b) in [(1, 2), (2, 3), (3, 4)] {
//!     db.insert("edge", &[Value::Integer(a), Value::Integer(b)]).unwrap();
//! }
//! db.add_rule(&RuleBuilder::new("path").head_vars(["x", "y"]).body_atom("edge", ["x", "y"]).build())
//!     .unwrap();
//! db.add_rule(
//!     &RuleBuilder::new("path")
//!         .head_vars(["x", "z"])
//!         .body_atom("path", ["x", "y"])
//!         .body_atom("edge", ["y", "z"])
//!         .build(),
//! )
//! .unwrap();
//!
//! let result = db.query(&atom("path", ["x", "y"]).into()).unwrap();
//! assert_eq!(result.len(), 6);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Syntax tree consumed from a parser, fluent builders |
//! | `compiler` | AST → plan tree with binding analysis |
//! | `eval` | Plan operators and the executor |
//! | `relation` | Relation registry |
//! | `recursion` | Execution units and parity |
//! | `optimizer` | Per-unit plan rewrites |
//! | `table` | Tuple store with lazy secondary indexes |
//! | `externs` | Host-implemented predicates |
//! | `storage` | Relation snapshots |

pub mod ast;
pub mod compiler;
pub mod config;
pub mod database;
pub mod error;
pub mod eval;
pub mod execution;
pub mod externs;
pub mod interner;
pub mod logging;
pub mod name;
pub mod optimizer;
pub mod recursion;
pub mod relation;
pub mod storage;
pub mod table;
pub mod value;

// Re-export public types
pub use config::{Config, EvaluationMode};
pub use database::{Database, QueryResult};
pub use error::{Diagnostics, EngineError, EngineResult};
pub use execution::ResourceLimits;
pub use externs::{ArgMode, CallContext, ExternModule, ExternRegistry, StandardModule};
pub use interner::{Interner, StrId};
pub use name::{CompoundName, PredicateName};
pub use relation::{RelationId, RelationState};
pub use storage::SnapshotError;
pub use value::{Row, Value};
