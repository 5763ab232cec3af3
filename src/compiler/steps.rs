//! Linear plan steps and their assembly into a node tree.
//!
//! The binding pass emits steps left to right; assembly folds them right to
//! left so each node is built with its successor in hand. While folding,
//! the set of slots still needed downstream is tracked: after a top-level
//! join that binds a slot nobody reads, a `Distinct` on the live slots
//! stops duplicate downstream work.

use super::context::CompilationContext;
use crate::ast::{AggregateFunc, ArithOp, CompareOp};
use crate::eval::{Column, JoinId, Node};
use crate::externs::ExternId;
use crate::relation::RelationId;
use crate::table::Window;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Most keys a dead-binding `Distinct` is inserted for.
const MAX_DISTINCT_KEYS: usize = 2;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Join {
        id: JoinId,
        relation: RelationId,
        columns: Vec<Column>,
    },
    Extern {
        name: String,
        function: ExternId,
        columns: Vec<Column>,
    },
    Or(Vec<Vec<Step>>),
    Negate {
        flag: usize,
        inner: Vec<Step>,
    },
    NotIn {
        relation: RelationId,
        slots: Vec<usize>,
    },
    Compare {
        op: CompareOp,
        left: usize,
        right: usize,
    },
    Arith {
        op: ArithOp,
        left: usize,
        right: usize,
        out: usize,
    },
    Copy {
        from: usize,
        to: usize,
    },
    Aggregate {
        collector: usize,
        func: AggregateFunc,
        value: usize,
        keys: Vec<usize>,
        out: usize,
        inner: Vec<Step>,
    },
    /// A sub-plan that can never produce a binding
    Empty,
}

fn column_slots(columns: &[Column], inputs: bool) -> impl Iterator<Item = usize> + '_ {
    columns.iter().filter_map(move |c| match *c {
        Column::Input(s) if inputs => Some(s),
        Column::Output(s) if !inputs => Some(s),
        _ => None,
    })
}

impl Step {
    /// Slots this step reads. Composite steps report every slot they
    /// mention.
    fn uses(&self) -> BTreeSet<usize> {
        match self {
            Step::Join { columns, .. } | Step::Extern { columns, .. } => {
                column_slots(columns, true).collect()
            }
            Step::NotIn { slots, .. } => slots.iter().copied().collect(),
            Step::Compare { left, right, .. } | Step::Arith { left, right, .. } => {
                [*left, *right].into_iter().collect()
            }
            Step::Copy { from, .. } => [*from].into_iter().collect(),
            Step::Or(branches) => branches.iter().flat_map(|b| mentioned(b)).collect(),
            Step::Negate { inner, .. } => mentioned(inner),
            Step::Aggregate {
                inner, value, keys, ..
            } => {
                let mut slots = mentioned(inner);
                slots.insert(*value);
                slots.extend(keys.iter().copied());
                slots
            }
            Step::Empty => BTreeSet::new(),
        }
    }

    /// Slots this step definitely binds for its successor.
    fn defs(&self) -> BTreeSet<usize> {
        match self {
            Step::Join { columns, .. } | Step::Extern { columns, .. } => {
                column_slots(columns, false).collect()
            }
            Step::Arith { out, .. } | Step::Aggregate { out, .. } => [*out].into_iter().collect(),
            Step::Copy { to, .. } => [*to].into_iter().collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Slots possibly bound by this step, including inside branches.
    fn binds(&self) -> BTreeSet<usize> {
        match self {
            Step::Or(branches) => branches
                .iter()
                .flat_map(|b| b.iter().flat_map(Step::binds))
                .collect(),
            other => other.defs(),
        }
    }
}

/// Every slot mentioned by `steps`, recursively.
fn mentioned(steps: &[Step]) -> BTreeSet<usize> {
    let mut slots = BTreeSet::new();
    for step in steps {
        slots.extend(step.uses());
        slots.extend(step.defs());
    }
    slots
}

pub(crate) struct Assembler<'c> {
    pub ctx: &'c mut CompilationContext,
    pub eliminate_dead_bindings: bool,
}

impl Assembler<'_> {
    /// Fold `steps` into a tree ending in `terminal`, which reads `live`.
    pub fn assemble(&mut self, steps: &[Step], terminal: Arc<Node>, live: BTreeSet<usize>) -> Arc<Node> {
        self.fold(steps, terminal, live, true)
    }

    fn fold(&mut self, steps: &[Step], terminal: Arc<Node>, mut live: BTreeSet<usize>, top: bool) -> Arc<Node> {
        // Slots bound once step `i` has run.
        let mut defined = Vec::with_capacity(steps.len());
        let mut acc = BTreeSet::new();
        for step in steps {
            acc.extend(step.binds());
            defined.push(acc.clone());
        }

        let mut next = terminal;
        for (i, step) in steps.iter().enumerate().rev() {
            if top && self.eliminate_dead_bindings {
                if let Step::Join { columns, .. } = step {
                    let dead = column_slots(columns, false).any(|s| !live.contains(&s));
                    if dead {
                        let keys: Vec<usize> = live
                            .iter()
                            .copied()
                            .filter(|s| !self.ctx.is_constant(*s))
                            .collect();
                        let bound = keys.iter().all(|s| defined[i].contains(s));
                        if bound && (1..=MAX_DISTINCT_KEYS).contains(&keys.len()) {
                            next = Arc::new(Node::Distinct {
                                state: self.ctx.fresh_distinct(),
                                keys,
                                next,
                            });
                        }
                    }
                }
            }
            next = self.node(step, next, &live);
            for slot in step.defs() {
                live.remove(&slot);
            }
            live.extend(step.uses());
        }
        next
    }

    fn node(&mut self, step: &Step, next: Arc<Node>, live: &BTreeSet<usize>) -> Arc<Node> {
        let node = match step {
            Step::Join {
                id,
                relation,
                columns,
            } => Node::Join {
                id: *id,
                relation: *relation,
                columns: columns.clone(),
                read: Window::Full,
                recursive: false,
                access: None,
                next,
            },
            Step::Extern {
                name,
                function,
                columns,
            } => Node::Extern {
                name: name.clone(),
                function: *function,
                columns: columns.clone(),
                next,
            },
            Step::Or(branches) => Node::Or {
                branches: branches
                    .iter()
                    .map(|b| self.fold(b, Arc::clone(&next), live.clone(), false))
                    .collect(),
            },
            Step::Negate { flag, inner } => {
                let terminator = Arc::new(Node::NotTerminator { flag: *flag });
                Node::Negate {
                    flag: *flag,
                    inner: self.fold(inner, terminator, BTreeSet::new(), false),
                    next,
                }
            }
            Step::NotIn { relation, slots } => Node::NotIn {
                relation: *relation,
                slots: slots.clone(),
                next,
            },
            Step::Compare { op, left, right } => Node::Compare {
                op: *op,
                left: *left,
                right: *right,
                next,
            },
            Step::Arith {
                op,
                left,
                right,
                out,
            } => Node::Arith {
                op: *op,
                left: *left,
                right: *right,
                out: *out,
                next,
            },
            Step::Copy { from, to } => Node::Copy {
                from: *from,
                to: *to,
                next,
            },
            Step::Aggregate {
                collector,
                func,
                value,
                keys,
                out,
                inner,
            } => {
                let collect = Arc::new(Node::Collect {
                    collector: *collector,
                    value: *value,
                    keys: keys.clone(),
                });
                let live = keys.iter().copied().chain([*value]).collect();
                Node::Aggregate {
                    collector: *collector,
                    func: *func,
                    out: *out,
                    inner: self.fold(inner, collect, live, false),
                    next,
                }
            }
            Step::Empty => Node::Empty,
        };
        Arc::new(node)
    }
}
