//! Database - Session Context of the Engine
//!
//! Owns the interner, the relation registry, the extern registry, the
//! execution units formed so far and the error accumulator. Everything a
//! caller does goes through it:
//! - Assert facts and add rules (compiled on arrival)
//! - Query: compile the clause, evaluate every relation it reads, run it
//! - Inspect: rows of a relation, rendered plans, diagnostics
//! - Persist: relation snapshots (see [`crate::storage`])
//!
//! ## Example
//!
//! ```rust
//! use deductive::ast::builders::{atom, PredicateBuilder, RuleBuilder};
//! use deductive::Database;
//!
//! let mut db = Database::new();
//! db.assert_fact(&PredicateBuilder::new("edge").atom("a").atom("b").clause()).unwrap();
//! db.assert_fact(&PredicateBuilder::new("edge").atom("b").atom("c").clause()).unwrap();
//! db.add_rule(&RuleBuilder::new("path").head_vars(["X", "Y"]).body_atom("edge", ["X", "Y"]).build()).unwrap();
//! db.add_rule(
//!     &RuleBuilder::new("path")
//!         .head_vars(["X", "Z"])
//!         .body_atom("path", ["X", "Y"])
//!         .body_atom("edge", ["Y", "Z"])
//!         .build(),
//! )
//! .unwrap();
//!
//! let result = db.query(&atom("path", ["X", "Y"]).into()).unwrap();
//! assert_eq!(result.len(), 3);
//! ```
//!
//! ## Evaluation
//!
//! A relation is evaluated on first read. The analyzer groups everything
//! reachable from it into execution units, emitted dependencies first; each
//! unit is optimized once and run to its fixpoint, after which its members
//! are sealed. A resource limit hit mid-way aborts the top-level call:
//! relations analyzed but not finished go back to unanalyzed (their rows
//! stay) and the error is returned.

use crate::ast::{positional_attribute, Clause, Program, Rule, Statement};
use crate::compiler::{CompileOptions, Compiler};
use crate::config::Config;
use crate::error::{Diagnostics, EngineError, EngineResult};
use crate::eval::{execute, ExecCtx};
use crate::execution::{Budget, ResourceLimits};
use crate::externs::{ArgMode, CallContext, ExternId, ExternModule, ExternRegistry};
use crate::interner::{Interner, StrId};
use crate::name::{CompoundName, PredicateName};
use crate::optimizer::Optimizer;
use crate::recursion::{ExecutionUnit, RecursionAnalyzer};
use crate::relation::{Registry, Relation, RelationId, RelationState};
use crate::storage::{self, SnapshotError};
use crate::value::{Row, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Rows produced by a query, one per distinct binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, in the order the query binds them
    pub variables: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values bound to `variable`, one per row.
    pub fn column(&self, variable: &str) -> Option<Vec<Value>> {
        let index = self.variables.iter().position(|v| v == variable)?;
        Some(self.rows.iter().map(|row| row[index]).collect())
    }
}

/// Deductive database session
#[derive(Debug)]
pub struct Database {
    config: Config,
    strings: Interner,
    registry: Registry,
    units: Vec<ExecutionUnit>,
    analyzer: RecursionAnalyzer,
    externs: ExternRegistry,
    diagnostics: Diagnostics,
    limits: ResourceLimits,
    optimizer: Optimizer,
    compile_options: CompileOptions,
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Database {
            strings: Interner::new(),
            registry: Registry::new(config.storage.initial_index_capacity),
            units: Vec::new(),
            analyzer: RecursionAnalyzer::new(),
            externs: ExternRegistry::new(),
            diagnostics: Diagnostics::new(),
            limits: ResourceLimits::from(&config.engine),
            optimizer: Optimizer::from_config(&config.optimizer, config.engine.evaluation),
            compile_options: CompileOptions::from(&config.optimizer),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn strings(&self) -> &Interner {
        &self.strings
    }

    pub fn intern(&mut self, text: &str) -> StrId {
        self.strings.intern(text)
    }

    /// `Value::String` for `text`.
    pub fn string(&mut self, text: &str) -> Value {
        Value::string(&mut self.strings, text)
    }

    /// `Value::Atom` for `text`.
    pub fn atom(&mut self, text: &str) -> Value {
        Value::atom(&mut self.strings, text)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Replace the ceilings applied to subsequent top-level calls.
    pub fn set_limits(&mut self, limits: ResourceLimits) {
        self.limits = limits;
    }

    /// Canonical name of the positional predicate `name/arity`.
    pub fn predicate(&mut self, name: &str, arity: usize) -> PredicateName {
        let objects = CompoundName::new([self.strings.intern(name)]);
        if arity == 0 {
            return PredicateName::nullary(objects);
        }
        let attributes: Vec<StrId> = (1..arity)
            .map(|i| self.strings.intern(&positional_attribute(i)))
            .collect();
        PredicateName::new(objects, CompoundName::new(attributes))
    }

    pub fn relation(&self, name: &PredicateName) -> Option<&Relation> {
        self.registry.get(name).map(|id| self.registry.relation(id))
    }

    pub fn register_extern<F>(&mut self, name: &str, args: &[(&str, ArgMode)], callback: F) -> ExternId
    where
        F: Fn(&mut CallContext<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.externs.register(name, args, callback)
    }

    pub fn load_module(&mut self, module: &dyn ExternModule) -> EngineResult<()> {
        self.externs.load_module(module).map_err(|e| self.fail(e))
    }

    fn compiler(&mut self) -> Compiler<'_> {
        Compiler {
            registry: &mut self.registry,
            strings: &mut self.strings,
            externs: &self.externs,
            diagnostics: &mut self.diagnostics,
            options: self.compile_options,
        }
    }

    fn budget(&self) -> Budget {
        Budget::new(self.limits.clone())
    }

    /// Record `error` and hand it back for propagation.
    fn fail(&mut self, error: EngineError) -> EngineError {
        self.diagnostics.report(error.clone());
        error
    }

    /// Assert a fact clause. Returns the number of rows that were new.
    pub fn assert_fact(&mut self, clause: &Clause) -> EngineResult<usize> {
        let Some(fact) = self.compiler().compile_fact(clause) else {
            return Ok(0);
        };
        for &target in &fact.targets {
            self.registry.check_mutable(target).map_err(|e| self.fail(e))?;
        }
        let mut budget = self.budget();
        for &read in &fact.reads {
            self.ensure_evaluated(read, &mut budget)?;
        }
        let before: Vec<usize> = fact.targets.iter().map(|&t| self.registry.table(t).len()).collect();
        let mut ctx = ExecCtx {
            registry: &mut self.registry,
            strings: &mut self.strings,
            externs: &self.externs,
            diagnostics: &mut self.diagnostics,
            budget: &mut budget,
        };
        if let Err(error) = execute(&fact.evaluation, &mut ctx) {
            return Err(self.abort(self.units.len(), error));
        }

        let mut added = 0;
        for (&target, before) in fact.targets.iter().zip(before) {
            let new_rows = self.registry.table(target).len() - before;
            self.registry.relation_mut(target).facts_count += new_rows;
            added += new_rows;
        }
        Ok(added)
    }

    /// Insert one row into the positional relation `name`.
    pub fn insert(&mut self, name: &str, row: &[Value]) -> EngineResult<bool> {
        let predicate = self.predicate(name, row.len());
        let id = self
            .registry
            .get_or_create(&predicate, &self.strings)
            .map_err(|e| self.fail(e))?;
        self.registry.insert_fact(id, row).map_err(|e| self.fail(e))
    }

    /// Compile and attach a rule. Returns the number of heads attached.
    pub fn add_rule(&mut self, rule: &Rule) -> EngineResult<usize> {
        let compiled = self.compiler().compile_rule(rule);
        for rule in &compiled {
            self.registry.check_mutable(rule.head).map_err(|e| self.fail(e))?;
        }
        let count = compiled.len();
        for rule in compiled {
            self.registry.add_rule(rule).map_err(|e| self.fail(e))?;
        }
        Ok(count)
    }

    /// Facts and rules of `program`, in order.
    pub fn load(&mut self, program: &Program) -> EngineResult<()> {
        for statement in &program.statements {
            match statement {
                Statement::Fact(clause) => {
                    self.assert_fact(clause)?;
                }
                Statement::Rule(rule) => {
                    self.add_rule(rule)?;
                }
            }
        }
        Ok(())
    }

    /// Every distinct binding of the variables of `clause`.
    pub fn query(&mut self, clause: &Clause) -> EngineResult<QueryResult> {
        let query = self.compiler().compile_query(clause);
        let mut budget = self.budget();
        for &read in &query.reads {
            self.ensure_evaluated(read, &mut budget)?;
        }
        let mut ctx = ExecCtx {
            registry: &mut self.registry,
            strings: &mut self.strings,
            externs: &self.externs,
            diagnostics: &mut self.diagnostics,
            budget: &mut budget,
        };
        let rows = match execute(&query.evaluation, &mut ctx) {
            Ok(rows) => rows,
            Err(error) => return Err(self.abort(self.units.len(), error)),
        };
        let mut seen = HashSet::with_capacity(rows.len());
        let rows = rows.into_iter().filter(|row| seen.insert(row.clone())).collect();
        Ok(QueryResult {
            variables: query.variables,
            rows,
        })
    }

    /// Every row of the positional relation `name/arity`, evaluated.
    pub fn rows(&mut self, name: &str, arity: usize) -> EngineResult<Vec<Row>> {
        let predicate = self.predicate(name, arity);
        self.relation_rows(&predicate)
    }

    /// Every row of `name`, evaluated. An unknown name has no rows.
    pub fn relation_rows(&mut self, name: &PredicateName) -> EngineResult<Vec<Row>> {
        let Some(id) = self.registry.get(name) else {
            return Ok(Vec::new());
        };
        let mut budget = self.budget();
        self.ensure_evaluated(id, &mut budget)?;
        Ok(self.registry.table(id).rows().map(<[Value]>::to_vec).collect())
    }

    /// Evaluate every relation known so far.
    pub fn evaluate(&mut self) -> EngineResult<()> {
        let mut budget = self.budget();
        for index in 0..self.registry.len() {
            self.ensure_evaluated(RelationId(index as u32), &mut budget)?;
        }
        Ok(())
    }

    /// Rendered plans of the rules deriving `name`.
    pub fn explain(&self, name: &PredicateName) -> Option<String> {
        let id = self.registry.get(name)?;
        let relation = self.registry.relation(id);
        let names = |r: RelationId| self.registry.display_name(r).to_string();
        let mut out = String::new();
        for (i, rule) in relation.rules().iter().enumerate() {
            out.push_str(&format!("rule {i} ({:?}):\n", rule.origin));
            out.push_str(&rule.evaluation.plan.render(&names));
        }
        Some(out)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.error_count()
    }

    /// `false` once any error was reported this session.
    pub fn is_successful(&self) -> bool {
        self.diagnostics.is_successful()
    }

    /// Start a new session: forget the errors reported so far.
    pub fn begin_session(&mut self) {
        self.diagnostics.clear();
    }

    /// Bring `id` and everything it reads to a fixpoint.
    fn ensure_evaluated(&mut self, id: RelationId, budget: &mut Budget) -> EngineResult<()> {
        if self.registry.relation(id).is_sealed() {
            return Ok(());
        }
        let first = self.units.len();
        self.analyzer
            .analyze(id, &mut self.registry, &mut self.units, &mut self.diagnostics);
        match self.evaluate_units(first, budget) {
            Ok(()) => Ok(()),
            Err(error) => Err(self.abort(first, error)),
        }
    }

    /// Run the units formed from index `first` on. The analyzer emits a
    /// unit only after every unit it depends on.
    fn evaluate_units(&mut self, first: usize, budget: &mut Budget) -> EngineResult<()> {
        for index in first..self.units.len() {
            let unit = &mut self.units[index];
            if unit
                .members
                .iter()
                .all(|&m| self.registry.relation(m).is_sealed())
            {
                continue;
            }
            for &member in &unit.members {
                self.registry.relation_mut(member).state = RelationState::Evaluating;
            }
            let plan = self.optimizer.optimize(unit, &mut self.registry);
            let mut ctx = ExecCtx {
                registry: &mut self.registry,
                strings: &mut self.strings,
                externs: &self.externs,
                diagnostics: &mut self.diagnostics,
                budget: &mut *budget,
            };
            unit.run_fixpoint(&plan, &mut ctx)?;
            let mut rows = 0;
            for &member in &unit.members {
                let relation = self.registry.relation_mut(member);
                relation.state = RelationState::Evaluated;
                rows += relation.table.len();
            }
            info!(
                unit = %unit.id,
                iterations = unit.iterations,
                rows,
                steps = budget.steps(),
                "fixpoint_reached"
            );
        }
        Ok(())
    }

    /// Undo the analysis of everything not yet evaluated and report `error`.
    fn abort(&mut self, first_unit: usize, error: EngineError) -> EngineError {
        let unfinished = (first_unit..self.units.len())
            .find(|&i| {
                !self.units[i]
                    .members
                    .iter()
                    .all(|&m| self.registry.relation(m).is_sealed())
            })
            .unwrap_or(self.units.len());
        self.units.truncate(unfinished);
        let mut reset = 0;
        for relation in self.registry.iter_mut() {
            if matches!(relation.state(), RelationState::Analyzed | RelationState::Evaluating) {
                relation.reset_analysis();
                reset += 1;
            }
        }
        warn!(error = %error, reset, "query_aborted");
        self.fail(error)
    }

    /// Write every relation's rows to `path`.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        storage::save_snapshot(
            path.as_ref(),
            &self.registry,
            &self.strings,
            self.config.storage.snapshot_checksums,
        )
    }

    /// Insert the rows stored at `path` as facts. Returns the number of rows
    /// that were new.
    pub fn load_snapshot(&mut self, path: impl AsRef<Path>) -> Result<usize, SnapshotError> {
        let snapshot = storage::read_snapshot(path.as_ref(), self.config.storage.snapshot_checksums)?;
        let mut added = 0;
        for (name, rows) in snapshot.relations(&mut self.strings)? {
            let id = self
                .registry
                .get_or_create(&name, &self.strings)
                .map_err(|e| self.fail(e))?;
            for row in rows {
                if self.registry.insert_fact(id, &row).map_err(|e| self.fail(e))? {
                    added += 1;
                }
            }
        }
        info!(path = %path.as_ref().display(), rows = added, "snapshot_loaded");
        Ok(added)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
