//! # Plan Optimizer
//!
//! Rewrites the compiled rules of one execution unit into the plans its
//! fixpoint loop runs. Passes apply in order:
//!
//! - Delta reads: mark joins over relations of the unit itself (outside
//!   negation and aggregation) as recursive
//! - Recursive split: rules without recursive joins become base rules; every
//!   other rule yields one variant per recursive join, that join reading
//!   only the previous round's delta
//! - Binding patterns: fix the access path of every join from its bound
//!   columns and declare the secondary indexes it will probe
//!
//! ```text
//! path(X,Z) :- path(X,Y), edge(Y,Z)
//!   base:      (none)
//!   recursive: join path[delta] -> join edge[index 0] -> write path
//! ```
//!
//! A recursive unit without both of the first two passes is evaluated
//! naively. Rewrites copy the nodes on the path to a changed join and keep
//! every other subtree shared.

use crate::config::{EvaluationMode, OptimizerConfig};
use crate::eval::{input_mask, JoinId, Node, RuleEvaluation};
use crate::recursion::ExecutionUnit;
use crate::relation::Registry;
use crate::table::{AccessPath, Window};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Plans of one execution unit, ready for its fixpoint loop.
#[derive(Debug, Clone, Default)]
pub struct UnitPlan {
    /// Run once before the first round (every rule when `naive`)
    pub base: Vec<RuleEvaluation>,
    /// Delta variants, run every round
    pub recursive: Vec<RuleEvaluation>,
    /// Re-run `base` over full relations until nothing changes
    pub naive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    DeltaReads,
    RecursiveSplit,
    BindingPatterns,
}

/// Unit plan builder
#[derive(Debug, Clone)]
pub struct Optimizer {
    passes: Vec<Pass>,
    naive: bool,
}

impl Optimizer {
    /// All passes, semi-naive evaluation.
    pub fn new() -> Self {
        Optimizer {
            passes: vec![Pass::DeltaReads, Pass::RecursiveSplit, Pass::BindingPatterns],
            naive: false,
        }
    }

    pub fn from_config(config: &OptimizerConfig, mode: EvaluationMode) -> Self {
        let mut passes = Vec::new();
        if config.delta_reads {
            passes.push(Pass::DeltaReads);
        }
        if config.split_recursive {
            passes.push(Pass::RecursiveSplit);
        }
        if config.binding_patterns {
            passes.push(Pass::BindingPatterns);
        }
        Optimizer {
            passes,
            naive: mode == EvaluationMode::Naive,
        }
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    fn enabled(&self, pass: Pass) -> bool {
        self.passes.contains(&pass)
    }

    /// Build the plan of `unit` from its members' rules.
    pub fn optimize(&self, unit: &ExecutionUnit, registry: &mut Registry) -> UnitPlan {
        let mut plans: Vec<RuleEvaluation> = unit
            .members
            .iter()
            .flat_map(|&m| registry.relation(m).rules().to_vec())
            .map(|rule| (*rule.evaluation).clone())
            .collect();

        let semi_naive = !self.naive
            && self.enabled(Pass::DeltaReads)
            && self.enabled(Pass::RecursiveSplit);
        let naive = unit.recursive && !semi_naive;

        if self.enabled(Pass::DeltaReads) {
            plans = plans
                .into_iter()
                .map(|plan| mark_recursive_reads(plan, unit))
                .collect();
        }

        let (mut base, mut recursive) = if !naive && self.enabled(Pass::RecursiveSplit) {
            split_recursive(plans)
        } else {
            (clear_recursive_reads(plans), Vec::new())
        };

        if self.enabled(Pass::BindingPatterns) {
            for plan in base.iter_mut().chain(recursive.iter_mut()) {
                *plan = choose_access_paths(plan, registry);
            }
        }

        debug!(
            unit = %unit.id,
            base = base.len(),
            recursive = recursive.len(),
            naive,
            "unit_plan_built"
        );
        UnitPlan {
            base,
            recursive,
            naive,
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

type Memo = HashMap<(usize, bool), Arc<Node>>;

/// Copy `node`, applying `edit` to every node (children first). `positive`
/// tells the edit whether the node runs outside negation and aggregation.
fn rewrite(node: &Arc<Node>, positive: bool, edit: &mut dyn FnMut(&mut Node, bool), memo: &mut Memo) -> Arc<Node> {
    let key = (Arc::as_ptr(node) as usize, positive);
    if let Some(done) = memo.get(&key) {
        return Arc::clone(done);
    }
    let mut copy = (**node).clone();
    for (child, child_positive) in copy.children_mut() {
        *child = rewrite(child, positive && child_positive, edit, memo);
    }
    edit(&mut copy, positive);
    let out = Arc::new(copy);
    memo.insert(key, Arc::clone(&out));
    out
}

fn rewrite_plan(plan: &RuleEvaluation, edit: &mut dyn FnMut(&mut Node, bool)) -> RuleEvaluation {
    let mut memo = Memo::new();
    plan.with_plan(rewrite(&plan.plan, true, edit, &mut memo))
}

fn mark_recursive_reads(plan: RuleEvaluation, unit: &ExecutionUnit) -> RuleEvaluation {
    rewrite_plan(&plan, &mut |node, positive| {
        if let Node::Join {
            relation, recursive, ..
        } = node
        {
            *recursive = positive && unit.contains(*relation);
        }
    })
}

fn clear_recursive_reads(plans: Vec<RuleEvaluation>) -> Vec<RuleEvaluation> {
    plans
        .iter()
        .map(|plan| {
            rewrite_plan(plan, &mut |node, _| {
                if let Node::Join { read, .. } = node {
                    *read = Window::Full;
                }
            })
        })
        .collect()
}

fn recursive_joins(node: &Node) -> Vec<JoinId> {
    let mut ids = Vec::new();
    node.for_each_join(&mut |join| {
        if let Node::Join {
            id, recursive: true, ..
        } = join
        {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
    });
    ids
}

fn split_recursive(plans: Vec<RuleEvaluation>) -> (Vec<RuleEvaluation>, Vec<RuleEvaluation>) {
    let mut base = Vec::new();
    let mut recursive = Vec::new();
    for plan in plans {
        let joins = recursive_joins(&plan.plan);
        if joins.is_empty() {
            base.push(plan);
            continue;
        }
        for delta_join in joins {
            recursive.push(rewrite_plan(&plan, &mut |node, _| {
                if let Node::Join { id, read, .. } = node {
                    *read = if *id == delta_join {
                        Window::Delta
                    } else {
                        Window::Full
                    };
                }
            }));
        }
    }
    (base, recursive)
}

fn choose_access_paths(plan: &RuleEvaluation, registry: &mut Registry) -> RuleEvaluation {
    rewrite_plan(plan, &mut |node, _| {
        if let Node::Join {
            relation,
            columns,
            access,
            ..
        } = node
        {
            let path = AccessPath::for_mask(input_mask(columns), columns.len());
            if let AccessPath::Index(mask) = path {
                registry.table_mut(*relation).declare_index(mask);
            }
            *access = Some(path);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Column;
    use crate::relation::RelationId;
    use crate::recursion::UnitId;

    fn join(id: u32, relation: u32, columns: Vec<Column>, next: Arc<Node>) -> Arc<Node> {
        Arc::new(Node::Join {
            id: JoinId(id),
            relation: RelationId(relation),
            columns,
            read: Window::Full,
            recursive: false,
            access: None,
            next,
        })
    }

    fn unit(members: Vec<u32>) -> ExecutionUnit {
        ExecutionUnit {
            id: UnitId(0),
            members: members.into_iter().map(RelationId).collect(),
            recursive: true,
            unreliable: false,
            iterations: 0,
        }
    }

    /// path(X, Z) :- path(X, Y), path(Y, Z)
    fn doubling() -> RuleEvaluation {
        let write = Arc::new(Node::Write {
            relation: RelationId(0),
            slots: vec![0, 2],
            next: None,
        });
        let second = join(1, 0, vec![Column::Input(1), Column::Output(2)], write);
        let first = join(0, 0, vec![Column::Output(0), Column::Output(1)], second);
        RuleEvaluation::new(first, 3)
    }

    fn windows(plan: &RuleEvaluation) -> Vec<Window> {
        let mut out = Vec::new();
        plan.plan.for_each_join(&mut |j| {
            if let Node::Join { read, .. } = j {
                out.push(*read);
            }
        });
        out
    }

    #[test]
    fn test_split_one_variant_per_recursive_read() {
        let marked = mark_recursive_reads(doubling(), &unit(vec![0]));
        assert_eq!(recursive_joins(&marked.plan), vec![JoinId(0), JoinId(1)]);
        let (base, recursive) = split_recursive(vec![marked]);
        assert!(base.is_empty());
        assert_eq!(recursive.len(), 2);
        assert_eq!(windows(&recursive[0]), vec![Window::Delta, Window::Full]);
        assert_eq!(windows(&recursive[1]), vec![Window::Full, Window::Delta]);
    }

    #[test]
    fn test_reads_outside_unit_stay_base() {
        let marked = mark_recursive_reads(doubling(), &unit(vec![5]));
        let (base, recursive) = split_recursive(vec![marked]);
        assert_eq!(base.len(), 1);
        assert!(recursive.is_empty());
    }

    #[test]
    fn test_negated_reads_are_not_recursive() {
        let write = Arc::new(Node::Write {
            relation: RelationId(0),
            slots: vec![0],
            next: None,
        });
        let inner = join(1, 0, vec![Column::Input(0)], Arc::new(Node::NotTerminator { flag: 0 }));
        let negate = Arc::new(Node::Negate {
            flag: 0,
            inner,
            next: write,
        });
        let plan = RuleEvaluation::new(join(0, 1, vec![Column::Output(0)], negate), 1);
        let marked = mark_recursive_reads(plan, &unit(vec![0, 1]));
        assert_eq!(recursive_joins(&marked.plan), vec![JoinId(0)]);
    }

    #[test]
    fn test_rewrite_keeps_shared_successor() {
        let write = Arc::new(Node::Write {
            relation: RelationId(2),
            slots: vec![0],
            next: None,
        });
        let tail = join(2, 0, vec![Column::Input(0)], write);
        let or = Arc::new(Node::Or {
            branches: vec![
                join(0, 1, vec![Column::Output(0)], Arc::clone(&tail)),
                join(1, 3, vec![Column::Output(0)], Arc::clone(&tail)),
            ],
        });
        let plan = RuleEvaluation::new(or, 1);
        let marked = mark_recursive_reads(plan, &unit(vec![1]));
        let Node::Or { branches } = &*marked.plan else {
            panic!("expected or");
        };
        let nexts: Vec<&Arc<Node>> = branches.iter().map(|b| b.children()[0]).collect();
        assert!(Arc::ptr_eq(nexts[0], nexts[1]));
    }

    #[test]
    fn test_from_config() {
        let config = OptimizerConfig {
            split_recursive: false,
            ..OptimizerConfig::default()
        };
        let optimizer = Optimizer::from_config(&config, EvaluationMode::SemiNaive);
        assert_eq!(optimizer.passes(), &[Pass::DeltaReads, Pass::BindingPatterns]);
    }
}
