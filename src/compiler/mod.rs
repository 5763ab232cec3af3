//! # Rule Compiler
//!
//! Translates rule bodies, rule heads, facts and queries into plan trees.
//!
//! ## Pipeline
//!
//! ```text
//! Clause --bind (left to right)--> Vec<Step> --assemble (right to left)--> Arc<Node>
//! ```
//!
//! The binding pass decides, for every variable occurrence, whether it reads
//! a slot bound earlier or binds it; that is what makes a join column an
//! `Input` or an `Output`. Disjunction branches and negated sub-clauses
//! bind in isolation (see [`context`]). After a disjunction only the
//! variables bound by every branch remain bound.
//!
//! ## Errors
//!
//! `UnboundVariable`, `DuplicateAttribute` and `InvalidLhs` are reported to
//! the diagnostics and the offending clause compiles to an empty plan, so
//! one pass surfaces every error of a rule.

pub mod context;
mod steps;

use crate::ast::{AggregateFunc, Clause, CompareOp, Entity, Literal, Location, Predicate, Rule};
use crate::config::OptimizerConfig;
use crate::error::{Diagnostics, EngineError};
use crate::eval::{input_mask, Column, JoinId, Node, RuleEvaluation};
use crate::externs::ExternRegistry;
use crate::interner::{Interner, StrId};
use crate::name::{CompoundName, PredicateName};
use crate::recursion::DependencyType;
use crate::relation::{CompiledRule, Read, Registry, RelationId, RuleOrigin};
use crate::value::Value;
use context::CompilationContext;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use steps::{Assembler, Step};
use tracing::{debug, warn};

/// Translation switches taken from the optimizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub decompose_clauses: bool,
    pub eliminate_dead_bindings: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            decompose_clauses: false,
            eliminate_dead_bindings: true,
        }
    }
}

impl From<&OptimizerConfig> for CompileOptions {
    fn from(config: &OptimizerConfig) -> Self {
        CompileOptions {
            decompose_clauses: config.decompose_clauses,
            eliminate_dead_bindings: config.eliminate_dead_bindings,
        }
    }
}

/// Head-alone plan of a fact.
#[derive(Debug, Clone)]
pub struct CompiledFact {
    pub evaluation: RuleEvaluation,
    pub targets: Vec<RelationId>,
    /// Relations read by aggregates in the head
    pub reads: Vec<RelationId>,
}

/// Plan of a query, yielding one row per distinct binding.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub evaluation: RuleEvaluation,
    /// Names of the yielded columns, in binding order
    pub variables: Vec<String>,
    pub reads: Vec<RelationId>,
}

#[derive(Debug, Default)]
struct Scope {
    ctx: CompilationContext,
    reads: Vec<Read>,
    /// Slots given to anonymous columns while binding a keyless sum
    captured: Option<Vec<usize>>,
}

impl Scope {
    fn read(&mut self, relation: RelationId, dependency: DependencyType) {
        let read = Read {
            relation,
            dependency,
        };
        if !self.reads.contains(&read) {
            self.reads.push(read);
        }
    }

    fn read_relations(&self) -> Vec<RelationId> {
        let mut ids: Vec<RelationId> = Vec::new();
        for read in &self.reads {
            if !ids.contains(&read.relation) {
                ids.push(read.relation);
            }
        }
        ids
    }
}

/// Where each entity of a predicate lands: `(column, entity)`, `None` for
/// a missing subject.
type Placements<'p> = Vec<(usize, Option<&'p Entity>)>;

pub struct Compiler<'a> {
    pub registry: &'a mut Registry,
    pub strings: &'a mut Interner,
    pub externs: &'a ExternRegistry,
    pub diagnostics: &'a mut Diagnostics,
    pub options: CompileOptions,
}

impl Compiler<'_> {
    /// One compiled rule per head predicate.
    pub fn compile_rule(&mut self, rule: &Rule) -> Vec<CompiledRule> {
        let mut scope = Scope::default();
        let mut body = Vec::new();
        self.bind_clause(&rule.body, &mut scope, &mut body, DependencyType::Positive);

        let mut compiled = Vec::new();
        for head in self.head_predicates(&rule.head) {
            let point = scope.ctx.branch();
            let mut steps = body.clone();
            let Some((relation, slots)) = self.bind_head(head, &mut scope, &mut steps) else {
                continue;
            };
            let plan = match slots {
                Some(slots) => {
                    let live: BTreeSet<usize> = slots.iter().copied().collect();
                    let terminal = Arc::new(Node::Write {
                        relation,
                        slots,
                        next: None,
                    });
                    self.assemble(&mut scope.ctx, &steps, terminal, live)
                }
                None => Arc::new(Node::Empty),
            };
            debug!(head = %self.registry.display_name(relation), nodes = plan.size(), "rule_compiled");
            compiled.push(CompiledRule {
                head: relation,
                evaluation: Arc::new(scope.ctx.evaluation(plan)),
                reads: scope.reads.clone(),
                origin: RuleOrigin::User,
            });
            scope.ctx.rewind(point);
        }
        compiled
    }

    /// A fact is a head evaluated against an empty body. `None` if nothing
    /// in it can be written.
    pub fn compile_fact(&mut self, clause: &Clause) -> Option<CompiledFact> {
        let mut scope = Scope::default();
        let mut steps = Vec::new();
        let mut writes = Vec::new();
        for head in self.head_predicates(clause) {
            if let Some((relation, Some(slots))) = self.bind_head(head, &mut scope, &mut steps) {
                writes.push((relation, slots));
            }
        }
        let live: BTreeSet<usize> = writes.iter().flat_map(|(_, s)| s.iter().copied()).collect();
        let targets = writes.iter().map(|(r, _)| *r).collect();
        let terminal = writes.into_iter().rev().fold(None, |next, (relation, slots)| {
            Some(Arc::new(Node::Write {
                relation,
                slots,
                next,
            }))
        })?;
        let plan = self.assemble(&mut scope.ctx, &steps, terminal, live);
        Some(CompiledFact {
            evaluation: scope.ctx.evaluation(plan),
            targets,
            reads: scope.read_relations(),
        })
    }

    pub fn compile_query(&mut self, clause: &Clause) -> CompiledQuery {
        let mut scope = Scope::default();
        let mut steps = Vec::new();
        self.bind_clause(clause, &mut scope, &mut steps, DependencyType::Positive);
        let bound: Vec<StrId> = scope.ctx.bound().to_vec();
        let slots: Vec<usize> = bound.iter().filter_map(|v| scope.ctx.slot_of(*v)).collect();
        let variables = bound.iter().map(|v| self.strings.display(*v)).collect();
        let live = slots.iter().copied().collect();
        let plan = self.assemble(&mut scope.ctx, &steps, Arc::new(Node::Yield { slots }), live);
        CompiledQuery {
            evaluation: scope.ctx.evaluation(plan),
            variables,
            reads: scope.read_relations(),
        }
    }

    fn assemble(
        &self,
        ctx: &mut CompilationContext,
        steps: &[Step],
        terminal: Arc<Node>,
        live: BTreeSet<usize>,
    ) -> Arc<Node> {
        Assembler {
            ctx,
            eliminate_dead_bindings: self.options.eliminate_dead_bindings,
        }
        .assemble(steps, terminal, live)
    }

    fn report(&mut self, error: EngineError) {
        self.diagnostics.report(error);
    }

    /// Predicates a head or fact asserts; anything else is reported.
    fn head_predicates<'c>(&mut self, clause: &'c Clause) -> Vec<&'c Predicate> {
        match clause {
            Clause::Predicate(p) => vec![p],
            Clause::And(clauses) => clauses
                .iter()
                .flat_map(|c| self.head_predicates(c))
                .collect(),
            Clause::True => Vec::new(),
            other => {
                self.report(EngineError::InvalidLhs {
                    kind: other.kind().to_string(),
                    location: other.location(),
                });
                Vec::new()
            }
        }
    }

    fn bind_clause(&mut self, clause: &Clause, scope: &mut Scope, steps: &mut Vec<Step>, dep: DependencyType) {
        match clause {
            Clause::And(clauses) => {
                for c in clauses {
                    self.bind_clause(c, scope, steps, dep);
                }
            }
            Clause::Or(clauses) => self.bind_or(clauses, scope, steps, dep),
            Clause::Not(inner) => {
                let point = scope.ctx.branch();
                let flag = scope.ctx.fresh_flag();
                let mut inner_steps = Vec::new();
                let captured = scope.captured.take();
                self.bind_clause(inner, scope, &mut inner_steps, DependencyType::Negative);
                scope.captured = captured;
                scope.ctx.rewind(point);
                steps.push(negation(flag, inner_steps));
            }
            Clause::Compare {
                op,
                left,
                right,
                location,
            } => self.bind_compare(*op, left, right, *location, scope, steps, dep),
            Clause::Predicate(p) => self.bind_predicate(p, scope, steps, dep),
            Clause::True => {}
        }
    }

    /// Variables every branch binds stay bound; the ones only some branches
    /// bind become partial.
    fn bind_or(&mut self, clauses: &[Clause], scope: &mut Scope, steps: &mut Vec<Step>, dep: DependencyType) {
        if clauses.is_empty() {
            steps.push(Step::Empty);
            return;
        }
        let point = scope.ctx.branch();
        let captured = scope.captured.take();
        let mut branches = Vec::with_capacity(clauses.len());
        let mut common: Option<Vec<StrId>> = None;
        let mut any: Vec<StrId> = Vec::new();
        for clause in clauses {
            scope.ctx.rewind(point);
            let mut branch = Vec::new();
            self.bind_clause(clause, scope, &mut branch, dep);
            let bound = scope.ctx.bound_since(point);
            for var in bound.iter().chain(&scope.ctx.partial_since(point)) {
                if !any.contains(var) {
                    any.push(*var);
                }
            }
            common = Some(match common {
                None => bound,
                Some(prev) => prev.into_iter().filter(|v| bound.contains(v)).collect(),
            });
            branches.push(branch);
        }
        scope.ctx.rewind(point);
        scope.captured = captured;
        let common = common.unwrap_or_default();
        for var in any {
            if common.contains(&var) {
                scope.ctx.mark_bound(var);
            } else {
                scope.ctx.mark_partial(var);
            }
        }
        steps.push(Step::Or(branches));
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_compare(
        &mut self,
        op: CompareOp,
        left: &Entity,
        right: &Entity,
        location: Location,
        scope: &mut Scope,
        steps: &mut Vec<Step>,
        dep: DependencyType,
    ) {
        if op == CompareOp::Eq {
            let left_free = self.free_variable(left, &scope.ctx);
            let right_free = self.free_variable(right, &scope.ctx);
            let assignment = match (left_free, right_free) {
                (Some(var), None) => Some((var, right)),
                (None, Some(var)) => Some((var, left)),
                _ => None,
            };
            if let Some((var, source)) = assignment {
                match self.bind_value(source, scope, steps, dep) {
                    Some(from) => {
                        let (to, _) = scope.ctx.bind_variable(var);
                        steps.push(Step::Copy { from, to });
                    }
                    None => steps.push(Step::Empty),
                }
                return;
            }
        }
        let l = self.bind_value(left, scope, steps, dep);
        let r = self.bind_value(right, scope, steps, dep);
        match (l, r) {
            (Some(left), Some(right)) => steps.push(Step::Compare { op, left, right }),
            _ => {
                debug!(%location, "comparison_dropped");
                steps.push(Step::Empty);
            }
        }
    }

    /// The variable `entity` names if it is not yet bound. A partial
    /// variable is neither bound nor free.
    fn free_variable(&mut self, entity: &Entity, ctx: &CompilationContext) -> Option<StrId> {
        let name = entity.var_name()?;
        let id = self.strings.intern(name);
        (!ctx.is_bound(id) && !ctx.is_partial(id)).then_some(id)
    }

    /// Slot holding the value of `entity`, emitting the steps computing it.
    fn bind_value(&mut self, entity: &Entity, scope: &mut Scope, steps: &mut Vec<Step>, dep: DependencyType) -> Option<usize> {
        match entity {
            Entity::Var { name, location } => {
                let id = self.strings.intern(name);
                if scope.ctx.is_bound(id) {
                    scope.ctx.slot_of(id)
                } else {
                    self.report(EngineError::UnboundVariable {
                        name: name.clone(),
                        location: *location,
                    });
                    None
                }
            }
            Entity::Anonymous => {
                self.report(EngineError::UnboundVariable {
                    name: "_".to_string(),
                    location: Location::default(),
                });
                None
            }
            Entity::Value(literal) => {
                let value = self.literal(literal);
                Some(scope.ctx.constant(value))
            }
            Entity::Arith { op, left, right } => {
                let l = self.bind_value(left, scope, steps, dep);
                let r = self.bind_value(right, scope, steps, dep);
                let (left, right) = (l?, r?);
                let out = scope.ctx.fresh_slot();
                steps.push(Step::Arith {
                    op: *op,
                    left,
                    right,
                    out,
                });
                Some(out)
            }
            Entity::Aggregate {
                func,
                value,
                key,
                clause,
            } => self.bind_aggregate(*func, value, key.as_deref(), clause, scope, steps),
        }
    }

    fn bind_aggregate(
        &mut self,
        func: AggregateFunc,
        value: &Entity,
        key: Option<&Entity>,
        clause: &Clause,
        scope: &mut Scope,
        steps: &mut Vec<Step>,
    ) -> Option<usize> {
        let point = scope.ctx.branch();
        let mut inner = Vec::new();
        let dep = DependencyType::Negative;
        // A keyless sum deduplicates whole source rows, so anonymous columns
        // get slots of their own.
        let keyless_sum = key.is_none() && func == AggregateFunc::Sum;
        let outer_captured = scope.captured.take();
        scope.captured = keyless_sum.then(Vec::new);
        self.bind_clause(clause, scope, &mut inner, dep);
        let value = self.bind_value(value, scope, &mut inner, dep);
        let keys = match key {
            Some(key) => self.bind_value(key, scope, &mut inner, dep).map(|k| vec![k]),
            None if keyless_sum => {
                let mut keys: Vec<usize> = scope
                    .ctx
                    .bound_since(point)
                    .into_iter()
                    .filter_map(|var| scope.ctx.slot_of(var))
                    .collect();
                keys.extend(scope.captured.take().unwrap_or_default());
                keys.sort_unstable();
                keys.dedup();
                Some(keys)
            }
            None => value.map(|v| vec![v]),
        };
        scope.captured = outer_captured;
        scope.ctx.rewind(point);
        let (value, keys) = (value?, keys?);
        let collector = scope.ctx.fresh_collector();
        let out = scope.ctx.fresh_slot();
        steps.push(Step::Aggregate {
            collector,
            func,
            value,
            keys,
            out,
            inner,
        });
        Some(out)
    }

    fn literal(&mut self, literal: &Literal) -> Value {
        match literal {
            Literal::Integer(v) => Value::Integer(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::String(s) => Value::string(self.strings, s),
            Literal::Atom(s) => Value::atom(self.strings, s),
            Literal::Char(c) => Value::from(*c),
            Literal::Byte(b) => Value::Byte(*b),
        }
    }

    /// Canonical name of `p` and the column of each of its entities.
    fn resolve<'p>(&mut self, p: &'p Predicate) -> Option<(PredicateName, Placements<'p>)> {
        let objects = CompoundName::new(p.objects.iter().map(|o| self.strings.intern(o)));
        let mut seen = HashSet::new();
        let mut attributes = Vec::with_capacity(p.attributes.len());
        for (name, entity) in &p.attributes {
            let id = self.strings.intern(name);
            if !seen.insert(id) {
                self.report(EngineError::DuplicateAttribute {
                    attribute: name.clone(),
                    location: p.location,
                });
                return None;
            }
            attributes.push((id, entity));
        }

        if p.subject.is_none() && attributes.is_empty() {
            return Some((PredicateName::nullary(objects), Vec::new()));
        }
        let mut name = PredicateName::new(objects, CompoundName::new(attributes.iter().map(|(id, _)| *id)));
        if p.reaches {
            match PredicateName::closure_of(&name) {
                Some(closure) => name = closure,
                None => {
                    warn!(arity = name.arity(), location = %p.location, "closure_requires_binary_relation");
                    return None;
                }
            }
        }
        let mut placements = vec![(0, p.subject.as_ref())];
        for (id, entity) in attributes {
            if let Some(column) = name.column_of(id) {
                placements.push((column, Some(entity)));
            }
        }
        Some((name, placements))
    }

    fn relation_for(&mut self, name: &PredicateName) -> Option<RelationId> {
        match self.registry.get_or_create(name, self.strings) {
            Ok(id) => Some(id),
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    /// Relation and slots (`None` on a binding error) written by a head.
    fn bind_head(&mut self, head: &Predicate, scope: &mut Scope, steps: &mut Vec<Step>) -> Option<(RelationId, Option<Vec<usize>>)> {
        let (name, placements) = self.resolve(head)?;
        let relation = self.relation_for(&name)?;
        let mut slots = vec![None; name.arity()];
        let mut ok = true;
        for (column, entity) in placements {
            let slot = match entity {
                Some(entity) => self.bind_value(entity, scope, steps, DependencyType::Positive),
                None => self.bind_value(&Entity::Anonymous, scope, steps, DependencyType::Positive),
            };
            ok &= slot.is_some();
            slots[column] = slot;
        }
        let slots = ok.then(|| slots.into_iter().flatten().collect());
        Some((relation, slots))
    }

    fn bind_predicate(&mut self, p: &Predicate, scope: &mut Scope, steps: &mut Vec<Step>, dep: DependencyType) {
        if !p.reaches && p.objects.len() == 1 && p.subject.is_some() && p.is_positional() {
            let arity = 1 + p.attributes.len();
            if self.externs.has(&p.objects[0], arity) {
                self.bind_extern(p, arity, scope, steps, dep);
                return;
            }
        }
        if self.should_decompose(p, dep) {
            if let Some(attributes) = self.distinct_attributes(p) {
                for (name, entity) in attributes {
                    let single = Predicate {
                        subject: p.subject.clone(),
                        objects: p.objects.clone(),
                        attributes: vec![(name, entity)],
                        reaches: false,
                        location: p.location,
                    };
                    self.bind_predicate(&single, scope, steps, dep);
                }
            } else {
                steps.push(Step::Empty);
            }
            return;
        }

        let Some((name, placements)) = self.resolve(p) else {
            steps.push(Step::Empty);
            return;
        };
        let Some(relation) = self.relation_for(&name) else {
            steps.push(Step::Empty);
            return;
        };
        match self.columns(&placements, name.arity(), scope, steps, dep) {
            Some(columns) => {
                let id = JoinId(scope.ctx.fresh_join());
                steps.push(Step::Join {
                    id,
                    relation,
                    columns,
                });
                scope.read(relation, dep);
            }
            None => steps.push(Step::Empty),
        }
    }

    fn should_decompose(&self, p: &Predicate, dep: DependencyType) -> bool {
        self.options.decompose_clauses
            && dep == DependencyType::Positive
            && !p.reaches
            && p.attributes.len() >= 2
            && p.subject.as_ref().is_some_and(|s| !s.is_anonymous())
    }

    /// Attributes of `p`, reporting a duplicate.
    fn distinct_attributes(&mut self, p: &Predicate) -> Option<Vec<(String, Entity)>> {
        let mut seen = HashSet::new();
        for (name, _) in &p.attributes {
            if !seen.insert(name.as_str()) {
                self.report(EngineError::DuplicateAttribute {
                    attribute: name.clone(),
                    location: p.location,
                });
                return None;
            }
        }
        Some(p.attributes.clone())
    }

    /// Join columns for `placements`; `None` if an entity failed to bind.
    fn columns(
        &mut self,
        placements: &Placements<'_>,
        arity: usize,
        scope: &mut Scope,
        steps: &mut Vec<Step>,
        dep: DependencyType,
    ) -> Option<Vec<Column>> {
        let mut columns = vec![Column::Ignore; arity];
        let mut first_seen: HashMap<StrId, usize> = HashMap::new();
        let mut ok = true;
        for &(column, entity) in placements {
            columns[column] = match entity {
                None => Column::Ignore,
                Some(Entity::Anonymous) => match scope.captured.as_mut() {
                    Some(captured) => {
                        let slot = scope.ctx.fresh_slot();
                        captured.push(slot);
                        Column::Output(slot)
                    }
                    None => Column::Ignore,
                },
                Some(Entity::Var { name, location }) => {
                    let id = self.strings.intern(name);
                    if scope.ctx.is_partial(id) {
                        self.report(EngineError::UnboundVariable {
                            name: name.clone(),
                            location: *location,
                        });
                        ok = false;
                        Column::Ignore
                    } else if let Some(&first) = first_seen.get(&id) {
                        Column::Same(first)
                    } else {
                        let (slot, was_bound) = scope.ctx.bind_variable(id);
                        if was_bound {
                            Column::Input(slot)
                        } else {
                            first_seen.insert(id, column);
                            Column::Output(slot)
                        }
                    }
                }
                Some(other) => match self.bind_value(other, scope, steps, dep) {
                    Some(slot) => Column::Input(slot),
                    None => {
                        ok = false;
                        Column::Ignore
                    }
                },
            };
        }
        ok.then_some(columns)
    }

    fn bind_extern(&mut self, p: &Predicate, arity: usize, scope: &mut Scope, steps: &mut Vec<Step>, dep: DependencyType) {
        let name = p.objects[0].clone();
        let placements: Placements<'_> = p.entities().enumerate().map(|(i, e)| (i, Some(e))).collect();
        let Some(columns) = self.columns(&placements, arity, scope, steps, dep) else {
            steps.push(Step::Empty);
            return;
        };
        let mask = input_mask(&columns);
        match self.externs.resolve(&name, arity, mask) {
            Some(function) => steps.push(Step::Extern {
                name,
                function,
                columns,
            }),
            None => {
                self.report(EngineError::ExternCall {
                    message: format!("no registration accepts bound arguments {mask}"),
                    name,
                });
                steps.push(Step::Empty);
            }
        }
    }
}

/// `NotIn` when the negated clause is one fully bound join.
fn negation(flag: usize, inner: Vec<Step>) -> Step {
    if let [Step::Join {
        relation, columns, ..
    }] = inner.as_slice()
    {
        let slots: Option<Vec<usize>> = columns
            .iter()
            .map(|c| match c {
                Column::Input(s) => Some(*s),
                _ => None,
            })
            .collect();
        if let Some(slots) = slots {
            return Step::NotIn {
                relation: *relation,
                slots,
            };
        }
    }
    Step::Negate { flag, inner }
}
