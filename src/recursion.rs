//! # Recursion Support
//!
//! Groups relations into execution units and drives each unit to its
//! fixpoint.
//!
//! Analysis is a depth-first walk over the rule dependency graph starting
//! at the relation a query needs. Each relation visited gets a depth, the
//! id of the walk, the smallest depth reachable through a back edge, and
//! the parity of negations on the path that reached it. A relation whose
//! back-edge depth equals its own depth closes a strongly connected
//! component and becomes an [`ExecutionUnit`] with every relation above it
//! on the walk stack. A back edge whose accumulated parity differs from the
//! parity its target was entered with closes a cycle through negation:
//!
//! ```text
//! path --> path        one recursive unit {path}
//!   `----> edge        one non-recursive unit {edge}
//! ```
//!
//! A recursive unit is evaluated semi-naively: base rules once, then
//! delta variants until no member gains a row. A negated or aggregated
//! dependency inside a unit cannot be stratified; it is reported as a
//! parity error and the unit is evaluated anyway, its result unreliable.

use crate::error::{Diagnostics, EngineError, EngineResult};
use crate::eval::{execute, ExecCtx};
use crate::optimizer::UnitPlan;
use crate::relation::{Read, Registry, RelationId, RelationState};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

// Dependency Types for Stratification
/// Type of dependency between relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// Positive dependency: head depends on relation via positive atom
    Positive,
    /// Negative dependency: head reads the relation under negation or
    /// aggregation; must not be part of the head's own unit
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Per-relation bookkeeping of the analysis walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionTags {
    /// Visit order within all walks; `-1` before the first visit
    pub depth: i32,
    /// Walk that visited the relation
    pub run: u32,
    /// Smallest depth reachable through a back edge
    pub back_edge: i32,
    /// Odd number of negations on the path from the walk's root
    pub parity: bool,
    pub in_recursive_loop: bool,
}

impl Default for RecursionTags {
    fn default() -> Self {
        RecursionTags {
            depth: -1,
            run: 0,
            back_edge: -1,
            parity: false,
            in_recursive_loop: false,
        }
    }
}

/// Relations evaluated together to a common fixpoint.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub id: UnitId,
    /// Members in relation-id order
    pub members: Vec<RelationId>,
    pub recursive: bool,
    /// Recursion through negation or aggregation was detected
    pub unreliable: bool,
    /// Rounds run by the last fixpoint
    pub iterations: usize,
}

impl ExecutionUnit {
    pub fn contains(&self, relation: RelationId) -> bool {
        self.members.binary_search(&relation).is_ok()
    }

    /// Evaluate every member to its fixpoint.
    pub fn run_fixpoint(&mut self, plan: &UnitPlan, ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
        self.iterations = 0;
        if plan.naive {
            self.run_naive(plan, ctx)
        } else {
            self.run_semi_naive(plan, ctx)
        }
    }

    fn run_semi_naive(&mut self, plan: &UnitPlan, ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
        for rule in &plan.base {
            execute(rule, ctx)?;
        }
        loop {
            for &member in &self.members {
                ctx.registry.table_mut(member).next_iteration();
            }
            let delta: usize = self
                .members
                .iter()
                .map(|&m| ctx.registry.table(m).delta_len())
                .sum();
            debug!(unit = %self.id, round = self.iterations, delta, "fixpoint_round");
            if delta == 0 || plan.recursive.is_empty() {
                break;
            }
            for rule in &plan.recursive {
                execute(rule, ctx)?;
            }
            self.iterations += 1;
        }
        Ok(())
    }

    fn run_naive(&mut self, plan: &UnitPlan, ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
        for &member in &self.members {
            ctx.registry.table_mut(member).next_iteration();
        }
        loop {
            let before = self.total_rows(ctx.registry);
            for rule in &plan.base {
                execute(rule, ctx)?;
            }
            for &member in &self.members {
                ctx.registry.table_mut(member).next_iteration();
            }
            self.iterations += 1;
            let after = self.total_rows(ctx.registry);
            debug!(unit = %self.id, round = self.iterations, added = after - before, "fixpoint_round");
            if after == before || !self.recursive {
                break;
            }
        }
        Ok(())
    }

    fn total_rows(&self, registry: &Registry) -> usize {
        self.members.iter().map(|&m| registry.table(m).len()).sum()
    }
}

struct Visit {
    relation: RelationId,
    edges: Vec<Read>,
    next: usize,
}

/// Assigns relations to execution units.
#[derive(Debug, Default)]
pub struct RecursionAnalyzer {
    next_run: u32,
    next_depth: i32,
}

impl RecursionAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze every unanalyzed relation reachable from `start`, appending
    /// the units formed to `units`.
    pub fn analyze(
        &mut self,
        start: RelationId,
        registry: &mut Registry,
        units: &mut Vec<ExecutionUnit>,
        diagnostics: &mut Diagnostics,
    ) {
        if registry.relation(start).state() != RelationState::Unanalyzed {
            return;
        }
        self.next_run += 1;
        let run = self.next_run;
        let mut stack: Vec<RelationId> = Vec::new();
        let mut on_stack: HashSet<RelationId> = HashSet::new();
        let mut walk: Vec<Visit> = Vec::new();
        let mut conflicts: HashSet<RelationId> = HashSet::new();

        self.enter(start, false, run, registry, &mut stack, &mut on_stack, &mut walk);

        while let Some(top) = walk.last_mut() {
            if top.next < top.edges.len() {
                let edge = top.edges[top.next];
                top.next += 1;
                let from = top.relation;
                let negated = edge.dependency == DependencyType::Negative;
                let parity = registry.relation(from).tags.parity ^ negated;
                let target = registry.relation(edge.relation);

                if target.state() != RelationState::Unanalyzed {
                    continue;
                }
                if target.tags.depth < 0 {
                    self.enter(edge.relation, parity, run, registry, &mut stack, &mut on_stack, &mut walk);
                } else if target.tags.run == run && on_stack.contains(&edge.relation) {
                    let depth = target.tags.depth;
                    if target.tags.parity != parity {
                        debug!(relation = %registry.display_name(edge.relation), "parity_mismatch");
                        conflicts.insert(edge.relation);
                    }
                    let tags = &mut registry.relation_mut(from).tags;
                    tags.back_edge = tags.back_edge.min(depth);
                }
                continue;
            }

            let Some(done) = walk.pop() else { break };
            let tags = registry.relation(done.relation).tags;
            if let Some(parent) = walk.last() {
                let parent_tags = &mut registry.relation_mut(parent.relation).tags;
                parent_tags.back_edge = parent_tags.back_edge.min(tags.back_edge);
            }
            if tags.back_edge == tags.depth {
                let mut members = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack.remove(&member);
                    members.push(member);
                    if member == done.relation {
                        break;
                    }
                }
                let conflicted = members.iter().any(|m| conflicts.contains(m));
                let unit = form_unit(done.relation, members, conflicted, registry, units.len(), diagnostics);
                units.push(unit);
            }
        }
    }

    fn enter(
        &mut self,
        relation: RelationId,
        parity: bool,
        run: u32,
        registry: &mut Registry,
        stack: &mut Vec<RelationId>,
        on_stack: &mut HashSet<RelationId>,
        walk: &mut Vec<Visit>,
    ) {
        let depth = self.next_depth;
        self.next_depth += 1;
        let entry = registry.relation_mut(relation);
        entry.tags = RecursionTags {
            depth,
            run,
            back_edge: depth,
            parity,
            in_recursive_loop: false,
        };
        stack.push(relation);
        on_stack.insert(relation);
        let edges = entry.dependencies();
        walk.push(Visit {
            relation,
            edges,
            next: 0,
        });
    }
}

fn form_unit(
    root: RelationId,
    mut members: Vec<RelationId>,
    conflicted: bool,
    registry: &mut Registry,
    index: usize,
    diagnostics: &mut Diagnostics,
) -> ExecutionUnit {
    members.sort_unstable();
    let id = UnitId(index as u32);
    let mut recursive = members.len() > 1;
    let mut unreliable = conflicted;
    for &member in &members {
        for read in registry.relation(member).dependencies() {
            if members.binary_search(&read.relation).is_ok() {
                recursive = true;
                if read.dependency == DependencyType::Negative {
                    unreliable = true;
                }
            }
        }
    }
    for &member in &members {
        let relation = registry.relation_mut(member);
        relation.state = RelationState::Analyzed;
        relation.unit = Some(id);
        relation.tags.in_recursive_loop = recursive;
    }
    let names: Vec<&str> = members.iter().map(|&m| registry.display_name(m)).collect();
    info!(unit = %id, members = ?names, recursive, "execution_unit_formed");
    if unreliable {
        let relation = registry.display_name(root).to_string();
        warn!(unit = %id, relation = %relation, "parity_error");
        diagnostics.report(EngineError::Parity { relation });
    }
    ExecutionUnit {
        id,
        members,
        recursive,
        unreliable,
        iterations: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{Column, JoinId, Node, RuleEvaluation};
    use crate::interner::Interner;
    use crate::name::{CompoundName, PredicateName};
    use crate::relation::{CompiledRule, RuleOrigin};
    use crate::table::Window;
    use std::sync::Arc;

    fn registry_with(count: usize, strings: &mut Interner) -> (Registry, Vec<RelationId>) {
        let mut registry = Registry::new(0);
        let ids = (0..count)
            .map(|i| {
                let name = PredicateName::new(
                    CompoundName::new([strings.intern(&format!("p{i}"))]),
                    CompoundName::empty(),
                );
                registry.get_or_create(&name, strings).unwrap()
            })
            .collect();
        (registry, ids)
    }

    fn link(registry: &mut Registry, head: RelationId, body: RelationId, dependency: DependencyType) {
        let plan = Arc::new(Node::Join {
            id: JoinId(0),
            relation: body,
            columns: vec![Column::Output(0)],
            read: Window::Full,
            recursive: false,
            access: None,
            next: Arc::new(Node::Write {
                relation: head,
                slots: vec![0],
                next: None,
            }),
        });
        registry
            .add_rule(CompiledRule {
                head,
                evaluation: Arc::new(RuleEvaluation::new(plan, 1)),
                reads: vec![Read {
                    relation: body,
                    dependency,
                }],
                origin: RuleOrigin::User,
            })
            .unwrap();
    }

    #[test]
    fn test_chain_forms_singleton_units() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(3, &mut strings);
        link(&mut registry, ids[0], ids[1], DependencyType::Positive);
        link(&mut registry, ids[1], ids[2], DependencyType::Positive);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|u| !u.recursive && u.members.len() == 1));
        // Dependencies close first.
        assert_eq!(units[0].members, vec![ids[2]]);
        assert!(diagnostics.is_successful());
    }

    #[test]
    fn test_cycle_forms_one_unit() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(3, &mut strings);
        link(&mut registry, ids[0], ids[1], DependencyType::Positive);
        link(&mut registry, ids[1], ids[0], DependencyType::Positive);
        link(&mut registry, ids[1], ids[2], DependencyType::Positive);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].members, vec![ids[0], ids[1]]);
        assert!(units[1].recursive);
        assert_eq!(registry.relation(ids[0]).unit(), registry.relation(ids[1]).unit());
    }

    #[test]
    fn test_self_loop_is_recursive() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(1, &mut strings);
        link(&mut registry, ids[0], ids[0], DependencyType::Positive);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 1);
        assert!(units[0].recursive);
    }

    #[test]
    fn test_negation_in_cycle_is_parity_error() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(2, &mut strings);
        link(&mut registry, ids[0], ids[1], DependencyType::Negative);
        link(&mut registry, ids[1], ids[0], DependencyType::Positive);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 1);
        assert!(units[0].unreliable);
        assert_eq!(diagnostics.error_count(), 1);
        assert!(matches!(diagnostics.errors()[0], EngineError::Parity { .. }));
    }

    #[test]
    fn test_negated_path_flips_parity() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(3, &mut strings);
        link(&mut registry, ids[0], ids[1], DependencyType::Negative);
        link(&mut registry, ids[1], ids[2], DependencyType::Positive);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert!(!registry.relation(ids[0]).tags.parity);
        assert!(registry.relation(ids[1]).tags.parity);
        assert!(registry.relation(ids[2]).tags.parity);
        assert!(diagnostics.is_successful());
    }

    #[test]
    fn test_negated_self_loop_reported_once() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(1, &mut strings);
        link(&mut registry, ids[0], ids[0], DependencyType::Negative);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 1);
        assert!(units[0].recursive && units[0].unreliable);
        assert_eq!(diagnostics.error_count(), 1);
    }

    #[test]
    fn test_negation_across_units_is_fine() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(2, &mut strings);
        link(&mut registry, ids[0], ids[1], DependencyType::Negative);
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        RecursionAnalyzer::new().analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 2);
        assert!(diagnostics.is_successful());
    }

    #[test]
    fn test_analyzed_relations_are_not_revisited() {
        let mut strings = Interner::new();
        let (mut registry, ids) = registry_with(2, &mut strings);
        link(&mut registry, ids[0], ids[1], DependencyType::Positive);
        let mut analyzer = RecursionAnalyzer::new();
        let mut units = Vec::new();
        let mut diagnostics = Diagnostics::new();
        analyzer.analyze(ids[1], &mut registry, &mut units, &mut diagnostics);
        analyzer.analyze(ids[0], &mut registry, &mut units, &mut diagnostics);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].members, vec![ids[0]]);
    }
}
