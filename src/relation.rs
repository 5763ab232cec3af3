//! # Relation Registry
//!
//! Owns every relation of a database: its canonical name, its table, the
//! rules that derive it and its evaluation state.
//!
//! Relations are created lazily the first time a name is mentioned. At
//! creation the registry links the newcomer to every existing relation by
//! containment:
//!
//! ```text
//! person{age,name}  --projection-->  {name}
//!       (new rows of the wider relation are visible through the narrower)
//! ```
//!
//! A closure name `edge*` gets two rules on creation: the base rule
//! `edge*(X, Y) :- edge(X, Y)` and the step rule
//! `edge*(X, Z) :- edge*(X, Y), edge(Y, Z)`.
//!
//! ## Sealing
//!
//! Once evaluated a relation is immutable. Asserting into it, or adding a
//! rule to it or to a relation it reads, fails with
//! [`EngineError::RelationSealed`].

use crate::error::{EngineError, EngineResult};
use crate::eval::{Column, JoinId, Node, RuleEvaluation};
use crate::interner::Interner;
use crate::name::PredicateName;
use crate::recursion::{DependencyType, RecursionTags, UnitId};
use crate::table::{Table, Window};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Dense index of a relation in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub u32);

impl RelationId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Lifecycle of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelationState {
    #[default]
    Unanalyzed,
    /// Assigned to an execution unit
    Analyzed,
    Evaluating,
    /// Fixpoint reached; the relation is sealed
    Evaluated,
}

/// Where a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    User,
    /// Derived from attribute containment
    Projection { source: RelationId },
    /// Base or step rule of a transitive closure
    Closure,
}

/// A relation read by a rule body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Read {
    pub relation: RelationId,
    /// `Negative` for reads under negation or aggregation
    pub dependency: DependencyType,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub head: RelationId,
    pub evaluation: Arc<RuleEvaluation>,
    pub reads: Vec<Read>,
    pub origin: RuleOrigin,
}

#[derive(Debug)]
pub struct Relation {
    id: RelationId,
    name: PredicateName,
    display: String,
    pub(crate) table: Table,
    rules: Vec<Arc<CompiledRule>>,
    /// Rows inserted by assertion rather than derivation
    pub(crate) facts_count: usize,
    pub(crate) state: RelationState,
    pub(crate) tags: RecursionTags,
    pub(crate) unit: Option<UnitId>,
    /// Relations with a rule reading this one
    readers: Vec<RelationId>,
}

impl Relation {
    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn name(&self) -> &PredicateName {
        &self.name
    }

    /// Human-readable name, rendered once at creation.
    pub fn display_name(&self) -> &str {
        &self.display
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    pub fn facts_count(&self) -> usize {
        self.facts_count
    }

    pub fn state(&self) -> RelationState {
        self.state
    }

    pub fn unit(&self) -> Option<UnitId> {
        self.unit
    }

    pub fn readers(&self) -> &[RelationId] {
        &self.readers
    }

    pub fn is_sealed(&self) -> bool {
        self.state == RelationState::Evaluated
    }

    /// Every relation read by this relation's rules, deduplicated.
    pub fn dependencies(&self) -> Vec<Read> {
        let mut reads: Vec<Read> = Vec::new();
        for rule in &self.rules {
            for read in &rule.reads {
                if !reads.contains(read) {
                    reads.push(*read);
                }
            }
        }
        reads
    }

    /// Return to the state of a never-analyzed relation, keeping its rows.
    pub(crate) fn reset_analysis(&mut self) {
        self.state = RelationState::Unanalyzed;
        self.tags = RecursionTags::default();
        self.unit = None;
        self.table.rewind_delta();
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    relations: Vec<Relation>,
    by_name: HashMap<PredicateName, RelationId>,
    initial_capacity: usize,
}

impl Registry {
    pub fn new(initial_capacity: usize) -> Self {
        Registry {
            relations: Vec::new(),
            by_name: HashMap::new(),
            initial_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn get(&self, name: &PredicateName) -> Option<RelationId> {
        self.by_name.get(name).copied()
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.index()]
    }

    pub(crate) fn relation_mut(&mut self, id: RelationId) -> &mut Relation {
        &mut self.relations[id.index()]
    }

    pub fn table(&self, id: RelationId) -> &Table {
        &self.relations[id.index()].table
    }

    pub(crate) fn table_mut(&mut self, id: RelationId) -> &mut Table {
        &mut self.relations[id.index()].table
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Relation> {
        self.relations.iter_mut()
    }

    pub fn display_name(&self, id: RelationId) -> &str {
        &self.relations[id.index()].display
    }

    /// Estimated bytes held by all tables.
    pub fn approx_bytes(&self) -> usize {
        self.relations.iter().map(|r| r.table.approx_bytes()).sum()
    }

    /// Find the relation for `name`, creating it (with its projection and
    /// closure rules) if this is its first mention.
    pub fn get_or_create(&mut self, name: &PredicateName, strings: &Interner) -> EngineResult<RelationId> {
        if let Some(id) = self.get(name) {
            return Ok(id);
        }
        let base = match name.closure_base() {
            Some(base) => Some(self.get_or_create(&base, strings)?),
            None => None,
        };

        let table = Table::new(name.arity(), self.initial_capacity)?;
        let id = RelationId(self.relations.len() as u32);
        let rendered = name.render(strings);
        info!(relation = %rendered, arity = name.arity(), "relation_created");
        self.relations.push(Relation {
            id,
            name: name.clone(),
            display: rendered,
            table,
            rules: Vec::new(),
            facts_count: 0,
            state: RelationState::Unanalyzed,
            tags: RecursionTags::default(),
            unit: None,
            readers: Vec::new(),
        });
        self.by_name.insert(name.clone(), id);

        if let Some(base) = base {
            self.add_closure_rules(id, base);
        } else {
            self.link_projections(id);
        }
        Ok(id)
    }

    fn link_projections(&mut self, id: RelationId) {
        let name = self.relations[id.index()].name.clone();
        let mut links = Vec::new();
        for other in &self.relations {
            if other.id == id {
                continue;
            }
            if name.is_projection_of(&other.name) {
                links.push((other.id, id));
            } else if other.name.is_projection_of(&name) {
                links.push((id, other.id));
            }
        }
        for (source, target) in links {
            let rule = self.projection_rule(source, target);
            debug!(
                source = %self.display_name(source),
                target = %self.display_name(target),
                "projection_rule_added"
            );
            self.install(rule);
        }
    }

    /// `target(subject, attrs...) :- source(subject, attrs..., rest...)`
    fn projection_rule(&self, source: RelationId, target: RelationId) -> CompiledRule {
        let source_name = &self.relations[source.index()].name;
        let target_name = &self.relations[target.index()].name;
        let arity = source_name.arity();
        let write = Arc::new(Node::Write {
            relation: target,
            slots: target_name.projection_columns(source_name),
            next: None,
        });
        let plan = Arc::new(Node::Join {
            id: JoinId(0),
            relation: source,
            columns: (0..arity).map(Column::Output).collect(),
            read: Window::Full,
            recursive: false,
            access: None,
            next: write,
        });
        CompiledRule {
            head: target,
            evaluation: Arc::new(RuleEvaluation::new(plan, arity)),
            reads: vec![Read {
                relation: source,
                dependency: DependencyType::Positive,
            }],
            origin: RuleOrigin::Projection { source },
        }
    }

    fn add_closure_rules(&mut self, closure: RelationId, base: RelationId) {
        let join = |id, relation, columns, next| {
            Arc::new(Node::Join {
                id: JoinId(id),
                relation,
                columns,
                read: Window::Full,
                recursive: false,
                access: None,
                next,
            })
        };
        let write = |a, b| {
            Arc::new(Node::Write {
                relation: closure,
                slots: vec![a, b],
                next: None,
            })
        };
        let positive = |relation| Read {
            relation,
            dependency: DependencyType::Positive,
        };

        let base_plan = join(0, base, vec![Column::Output(0), Column::Output(1)], write(0, 1));
        let step_plan = join(
            0,
            closure,
            vec![Column::Output(0), Column::Output(1)],
            join(1, base, vec![Column::Input(1), Column::Output(2)], write(0, 2)),
        );
        self.install(CompiledRule {
            head: closure,
            evaluation: Arc::new(RuleEvaluation::new(base_plan, 2)),
            reads: vec![positive(base)],
            origin: RuleOrigin::Closure,
        });
        self.install(CompiledRule {
            head: closure,
            evaluation: Arc::new(RuleEvaluation::new(step_plan, 3)),
            reads: vec![positive(closure), positive(base)],
            origin: RuleOrigin::Closure,
        });
    }

    /// Fail if `id` can no longer change.
    pub fn check_mutable(&self, id: RelationId) -> EngineResult<()> {
        let relation = &self.relations[id.index()];
        let sealed = relation.is_sealed()
            || relation
                .readers
                .iter()
                .any(|r| self.relations[r.index()].is_sealed());
        if sealed {
            return Err(EngineError::RelationSealed {
                relation: relation.display.clone(),
            });
        }
        Ok(())
    }

    /// Attach a user rule to its head relation.
    pub fn add_rule(&mut self, rule: CompiledRule) -> EngineResult<()> {
        self.check_mutable(rule.head)?;
        self.install(rule);
        Ok(())
    }

    fn install(&mut self, rule: CompiledRule) {
        let head = rule.head;
        for read in &rule.reads {
            let readers = &mut self.relations[read.relation.index()].readers;
            if !readers.contains(&head) {
                readers.push(head);
            }
        }
        self.relations[head.index()].rules.push(Arc::new(rule));
    }

    /// Insert one asserted row.
    pub fn insert_fact(&mut self, id: RelationId, row: &[Value]) -> EngineResult<bool> {
        self.check_mutable(id)?;
        let relation = &mut self.relations[id.index()];
        let added = relation.table.add(row);
        if added {
            relation.facts_count += 1;
        }
        Ok(added)
    }
}
