//! Compilation context: variable slots and the bound-variable stack.
//!
//! Slots are allocated monotonically and never reused within one rule, so a
//! variable keeps its slot across every branch it appears in. Whether it is
//! *bound* is tracked separately by a stack that branches rewind, which is
//! what keeps a binding made on one side of a disjunction (or inside a
//! negation) from leaking into its siblings. A variable bound by some but
//! not all branches of a disjunction is *partial* afterwards: its slot may
//! or may not hold a value, so nothing downstream may use it.

use crate::eval::RuleEvaluation;
use crate::eval::Node;
use crate::interner::StrId;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Depths of the bound and partial stacks at the time a branch was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchPoint {
    bound: usize,
    partial: usize,
}

#[derive(Debug, Default, Clone)]
pub struct CompilationContext {
    slot_of: HashMap<StrId, usize>,
    bound: Vec<StrId>,
    partial: Vec<StrId>,
    slot_count: usize,
    constants: Vec<(usize, Value)>,
    constant_slots: HashMap<Value, usize>,
    distinct_count: usize,
    collector_count: usize,
    flag_count: usize,
    join_count: u32,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or allocate the slot of `name` and report whether it was
    /// already bound. Afterwards the variable counts as bound: the operator
    /// receiving an unbound slot is the one that binds it.
    pub fn bind_variable(&mut self, name: StrId) -> (usize, bool) {
        let slot = self.slot_for(name);
        let was_bound = self.is_bound(name);
        if !was_bound {
            self.bound.push(name);
        }
        (slot, was_bound)
    }

    /// Slot of `name`, allocating one without marking it bound.
    pub fn slot_for(&mut self, name: StrId) -> usize {
        if let Some(&slot) = self.slot_of.get(&name) {
            return slot;
        }
        let slot = self.fresh_slot();
        self.slot_of.insert(name, slot);
        slot
    }

    pub fn slot_of(&self, name: StrId) -> Option<usize> {
        self.slot_of.get(&name).copied()
    }

    pub fn is_bound(&self, name: StrId) -> bool {
        self.bound.contains(&name)
    }

    /// Mark `name` bound (used after a disjunction for the variables every
    /// branch bound).
    pub fn mark_bound(&mut self, name: StrId) {
        self.slot_for(name);
        if !self.is_bound(name) {
            self.bound.push(name);
        }
    }

    /// Whether `name` was bound by only some branches of a disjunction.
    pub fn is_partial(&self, name: StrId) -> bool {
        !self.is_bound(name) && self.partial.contains(&name)
    }

    pub fn mark_partial(&mut self, name: StrId) {
        if !self.partial.contains(&name) {
            self.partial.push(name);
        }
    }

    pub fn branch(&self) -> BranchPoint {
        BranchPoint {
            bound: self.bound.len(),
            partial: self.partial.len(),
        }
    }

    pub fn rewind(&mut self, point: BranchPoint) {
        self.bound.truncate(point.bound);
        self.partial.truncate(point.partial);
    }

    /// Variables bound since `point`, in binding order.
    pub fn bound_since(&self, point: BranchPoint) -> Vec<StrId> {
        self.bound[point.bound.min(self.bound.len())..].to_vec()
    }

    /// Variables marked partial since `point`.
    pub fn partial_since(&self, point: BranchPoint) -> Vec<StrId> {
        self.partial[point.partial.min(self.partial.len())..].to_vec()
    }

    /// Currently bound variables, in binding order.
    pub fn bound(&self) -> &[StrId] {
        &self.bound
    }

    /// Slot holding `value` for the whole evaluation.
    pub fn constant(&mut self, value: Value) -> usize {
        if let Some(&slot) = self.constant_slots.get(&value) {
            return slot;
        }
        let slot = self.fresh_slot();
        self.constants.push((slot, value));
        self.constant_slots.insert(value, slot);
        slot
    }

    pub fn is_constant(&self, slot: usize) -> bool {
        self.constants.iter().any(|(s, _)| *s == slot)
    }

    pub fn fresh_slot(&mut self) -> usize {
        let slot = self.slot_count;
        self.slot_count += 1;
        slot
    }

    pub fn fresh_distinct(&mut self) -> usize {
        self.distinct_count += 1;
        self.distinct_count - 1
    }

    pub fn fresh_collector(&mut self) -> usize {
        self.collector_count += 1;
        self.collector_count - 1
    }

    pub fn fresh_flag(&mut self) -> usize {
        self.flag_count += 1;
        self.flag_count - 1
    }

    pub fn fresh_join(&mut self) -> u32 {
        self.join_count += 1;
        self.join_count - 1
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Evaluation template for `plan` sized by this context.
    pub fn evaluation(&self, plan: Arc<Node>) -> RuleEvaluation {
        RuleEvaluation {
            plan,
            slot_count: self.slot_count,
            constants: self.constants.clone(),
            distinct_count: self.distinct_count,
            collector_count: self.collector_count,
            flag_count: self.flag_count,
        }
    }
}
