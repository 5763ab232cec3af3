//! # Plan Execution
//!
//! Depth-first interpretation of a [`Node`] tree. Each evaluation gets a
//! [`Frame`] sized by its [`RuleEvaluation`]: the slot vector, one
//! deduplicating set per `Distinct`, one collector per aggregate and one
//! flag per negation.
//!
//! Every row a join visits and every row written costs one step against the
//! query's [`Budget`]; exceeding it aborts the evaluation with an error that
//! unwinds straight out of the plan.

mod arith;
mod node;

pub use arith::{arith, compare};
pub use node::{input_mask, Column, JoinId, Node};

use crate::ast::AggregateFunc;
use crate::error::{Diagnostics, EngineResult};
use crate::execution::{Budget, StepOutcome};
use crate::externs::ExternRegistry;
use crate::interner::Interner;
use crate::relation::Registry;
use crate::table::ColumnMask;
use crate::value::{Row, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

/// A plan plus everything needed to size its frame.
#[derive(Debug, Clone)]
pub struct RuleEvaluation {
    pub plan: Arc<Node>,
    pub slot_count: usize,
    /// Slots preloaded before evaluation starts
    pub constants: Vec<(usize, Value)>,
    pub distinct_count: usize,
    pub collector_count: usize,
    pub flag_count: usize,
}

impl RuleEvaluation {
    pub fn new(plan: Arc<Node>, slot_count: usize) -> Self {
        RuleEvaluation {
            plan,
            slot_count,
            constants: Vec::new(),
            distinct_count: 0,
            collector_count: 0,
            flag_count: 0,
        }
    }

    /// Same frame layout, different plan.
    pub fn with_plan(&self, plan: Arc<Node>) -> Self {
        RuleEvaluation {
            plan,
            ..self.clone()
        }
    }

    pub fn frame(&self) -> Frame {
        let mut slots = vec![Value::None; self.slot_count];
        for &(slot, value) in &self.constants {
            slots[slot] = value;
        }
        Frame {
            slots,
            distinct: vec![HashSet::new(); self.distinct_count],
            collectors: vec![Collector::default(); self.collector_count],
            flags: vec![false; self.flag_count],
            results: Vec::new(),
        }
    }
}

/// Distinct `(key, value)` pairs gathered by an aggregate. A key is one
/// value per key slot.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    seen: HashSet<(Row, Value)>,
}

impl Collector {
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn insert(&mut self, key: Row, value: Value) {
        self.seen.insert((key, value));
    }

    /// `None` when integer summation overflows.
    pub fn finish(&self, func: AggregateFunc) -> Option<Value> {
        match func {
            AggregateFunc::Count => Some(Value::Integer(self.seen.len() as i64)),
            AggregateFunc::Sum => {
                let mut int_sum: i64 = 0;
                let mut float_sum: f64 = 0.0;
                let mut any_float = false;
                for (_, value) in &self.seen {
                    match *value {
                        Value::Integer(v) => int_sum = int_sum.checked_add(v)?,
                        Value::Float(v) => {
                            any_float = true;
                            float_sum += v;
                        }
                        _ => {}
                    }
                }
                Some(if any_float {
                    Value::Float(float_sum + int_sum as f64)
                } else {
                    Value::Integer(int_sum)
                })
            }
        }
    }
}

/// Per-invocation evaluation state.
#[derive(Debug, Clone)]
pub struct Frame {
    pub slots: Vec<Value>,
    distinct: Vec<HashSet<(Value, Value)>>,
    collectors: Vec<Collector>,
    flags: Vec<bool>,
    /// Rows produced by `Yield`
    pub results: Vec<Row>,
}

impl Frame {
    fn template(&self, columns: &[Column]) -> (Vec<Value>, ColumnMask) {
        let mut mask = ColumnMask::EMPTY;
        let template = columns
            .iter()
            .enumerate()
            .map(|(i, c)| match *c {
                Column::Input(slot) => {
                    mask = mask.with(i);
                    self.slots[slot]
                }
                _ => Value::None,
            })
            .collect();
        (template, mask)
    }

    /// Bind the output columns of `row`; `false` if a constraint fails.
    fn accept(&mut self, columns: &[Column], row: &[Value]) -> bool {
        for (i, column) in columns.iter().enumerate() {
            match *column {
                Column::Output(slot) => self.slots[slot] = row[i],
                Column::Same(other) if row[i] != row[other] => return false,
                Column::Input(slot) if row[i] != self.slots[slot] => return false,
                _ => {}
            }
        }
        true
    }

    fn gather(&self, slots: &[usize]) -> Row {
        slots.iter().map(|&s| self.slots[s]).collect()
    }
}

/// Everything a running plan touches outside its frame.
pub struct ExecCtx<'a> {
    pub registry: &'a mut Registry,
    pub strings: &'a mut Interner,
    pub externs: &'a ExternRegistry,
    pub diagnostics: &'a mut Diagnostics,
    pub budget: &'a mut Budget,
}

impl ExecCtx<'_> {
    fn step(&mut self) -> EngineResult<()> {
        if self.budget.step()? == StepOutcome::CheckMemory {
            let used = self.registry.approx_bytes() + self.strings.approx_bytes();
            self.budget.check_memory(used)?;
        }
        Ok(())
    }
}

/// Run `evaluation` once and return the rows it yielded.
pub fn execute(evaluation: &RuleEvaluation, ctx: &mut ExecCtx<'_>) -> EngineResult<Vec<Row>> {
    let mut frame = evaluation.frame();
    run(&evaluation.plan, &mut frame, ctx)?;
    Ok(frame.results)
}

fn run(node: &Node, frame: &mut Frame, ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    match node {
        Node::Join {
            relation,
            columns,
            read,
            next,
            ..
        } => {
            let (template, mask) = frame.template(columns);
            let offsets = ctx
                .registry
                .table_mut(*relation)
                .matching(&template, mask, *read);
            for offset in offsets {
                ctx.step()?;
                let accepted = {
                    let row = ctx.registry.table(*relation).row(offset as usize);
                    frame.accept(columns, row)
                };
                if accepted {
                    run(next, frame, ctx)?;
                }
            }
        }
        Node::Write {
            relation,
            slots,
            next,
        } => {
            ctx.step()?;
            let row = frame.gather(slots);
            ctx.registry.table_mut(*relation).add(&row);
            if let Some(next) = next {
                run(next, frame, ctx)?;
            }
        }
        Node::Or { branches } => {
            for branch in branches {
                run(branch, frame, ctx)?;
            }
        }
        Node::Compare {
            op,
            left,
            right,
            next,
        } => {
            if compare(*op, frame.slots[*left], frame.slots[*right], ctx.strings) {
                run(next, frame, ctx)?;
            }
        }
        Node::Arith {
            op,
            left,
            right,
            out,
            next,
        } => {
            if let Some(value) = arith(*op, frame.slots[*left], frame.slots[*right], ctx.strings) {
                frame.slots[*out] = value;
                run(next, frame, ctx)?;
            }
        }
        Node::Copy { from, to, next } => {
            frame.slots[*to] = frame.slots[*from];
            run(next, frame, ctx)?;
        }
        Node::Distinct { state, keys, next } => {
            let first = keys.first().map_or(Value::None, |&s| frame.slots[s]);
            let second = keys.get(1).map_or(Value::None, |&s| frame.slots[s]);
            if frame.distinct[*state].insert((first, second)) {
                run(next, frame, ctx)?;
            }
        }
        Node::Aggregate {
            collector,
            func,
            out,
            inner,
            next,
        } => {
            frame.collectors[*collector].clear();
            run(inner, frame, ctx)?;
            match frame.collectors[*collector].finish(*func) {
                Some(value) => {
                    frame.slots[*out] = value;
                    run(next, frame, ctx)?;
                }
                None => trace!(%func, "aggregate_overflow"),
            }
        }
        Node::Collect {
            collector,
            value,
            keys,
        } => {
            let key = frame.gather(keys);
            let value = frame.slots[*value];
            frame.collectors[*collector].insert(key, value);
        }
        Node::Negate { flag, inner, next } => {
            frame.flags[*flag] = false;
            run(inner, frame, ctx)?;
            if !frame.flags[*flag] {
                run(next, frame, ctx)?;
            }
        }
        Node::NotTerminator { flag } => frame.flags[*flag] = true,
        Node::NotIn {
            relation,
            slots,
            next,
        } => {
            let row = frame.gather(slots);
            let mask = ColumnMask::full(row.len());
            let present = !ctx
                .registry
                .table_mut(*relation)
                .matching(&row, mask, crate::table::Window::Full)
                .is_empty();
            if !present {
                run(next, frame, ctx)?;
            }
        }
        Node::Extern {
            name,
            function,
            columns,
            next,
        } => {
            let (args, _) = frame.template(columns);
            let rows = match ctx.externs.call(*function, &args, ctx.strings) {
                Ok(rows) => rows,
                Err(error) => {
                    warn!(name = %name, error = %error, "extern_failed");
                    ctx.diagnostics.report(error);
                    return Ok(());
                }
            };
            for row in rows {
                ctx.step()?;
                if frame.accept(columns, &row) {
                    run(next, frame, ctx)?;
                }
            }
        }
        Node::Yield { slots } => {
            let row = frame.gather(slots);
            frame.results.push(row);
        }
        Node::Empty => {}
    }
    Ok(())
}
