//! # Plan Nodes
//!
//! A compiled rule is a tree of nodes evaluated depth-first against one
//! frame of slots. Every node except the terminals has a `next` successor it
//! invokes once per binding it produces; disjunction branches share the same
//! successor (`Arc` clones of one subtree).
//!
//! ```text
//! Join(edge, [out 0, out 1])
//!   `-- Join(path, [in 1, out 2])
//!         `-- Write(path, [0, 2])
//! ```

use crate::ast::{AggregateFunc, ArithOp, CompareOp};
use crate::externs::ExternId;
use crate::relation::RelationId;
use crate::table::{AccessPath, ColumnMask, Window};
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// How one column of a join participates in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Must equal the value in this slot
    Input(usize),
    /// Binds this slot
    Output(usize),
    /// Must equal another column of the same row
    Same(usize),
    /// Matches anything
    Ignore,
}

impl Column {
    pub fn is_input(&self) -> bool {
        matches!(self, Column::Input(_))
    }

    /// Slot read or written by this column.
    pub fn slot(&self) -> Option<usize> {
        match *self {
            Column::Input(s) | Column::Output(s) => Some(s),
            _ => None,
        }
    }
}

/// Mask of the columns bound on entry.
pub fn input_mask(columns: &[Column]) -> ColumnMask {
    columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_input())
        .fold(ColumnMask::EMPTY, |mask, (i, _)| mask.with(i))
}

/// Identifier of a join within one rule, stable across plan rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinId(pub u32);

#[derive(Debug, Clone)]
pub enum Node {
    /// Iterate the rows of `relation` matching the bound columns
    Join {
        id: JoinId,
        relation: RelationId,
        columns: Vec<Column>,
        read: Window,
        /// Reads a relation of the rule's own recursive group
        recursive: bool,
        /// Chosen by the optimizer; `None` means decide at run time
        access: Option<AccessPath>,
        next: Arc<Node>,
    },
    /// Insert the slot values as one row
    Write {
        relation: RelationId,
        slots: Vec<usize>,
        next: Option<Arc<Node>>,
    },
    Or {
        branches: Vec<Arc<Node>>,
    },
    Compare {
        op: CompareOp,
        left: usize,
        right: usize,
        next: Arc<Node>,
    },
    /// `out = left op right`; no successor call when the operation is undefined
    Arith {
        op: ArithOp,
        left: usize,
        right: usize,
        out: usize,
        next: Arc<Node>,
    },
    Copy {
        from: usize,
        to: usize,
        next: Arc<Node>,
    },
    /// Forward only key combinations not seen before in this invocation
    Distinct {
        state: usize,
        keys: Vec<usize>,
        next: Arc<Node>,
    },
    /// Run `inner` into a fresh collector, then call `next` with the result
    Aggregate {
        collector: usize,
        func: AggregateFunc,
        out: usize,
        inner: Arc<Node>,
        next: Arc<Node>,
    },
    /// Terminal of an aggregate's inner plan
    Collect {
        collector: usize,
        value: usize,
        keys: Vec<usize>,
    },
    /// Call `next` only if `inner` never reaches its terminator
    Negate {
        flag: usize,
        inner: Arc<Node>,
        next: Arc<Node>,
    },
    NotTerminator {
        flag: usize,
    },
    /// Fully bound negated membership test
    NotIn {
        relation: RelationId,
        slots: Vec<usize>,
        next: Arc<Node>,
    },
    Extern {
        name: String,
        function: ExternId,
        columns: Vec<Column>,
        next: Arc<Node>,
    },
    /// Emit the slot values as a query result
    Yield {
        slots: Vec<usize>,
    },
    /// Produces nothing
    Empty,
}

impl Node {
    /// Successor subtrees paired with whether they run in positive context
    /// (outside negation and aggregation relative to this node).
    pub(crate) fn children_mut(&mut self) -> Vec<(&mut Arc<Node>, bool)> {
        match self {
            Node::Join { next, .. }
            | Node::Compare { next, .. }
            | Node::Arith { next, .. }
            | Node::Copy { next, .. }
            | Node::Distinct { next, .. }
            | Node::NotIn { next, .. }
            | Node::Extern { next, .. } => vec![(next, true)],
            Node::Write { next, .. } => next.iter_mut().map(|n| (n, true)).collect(),
            Node::Or { branches } => branches.iter_mut().map(|b| (b, true)).collect(),
            Node::Aggregate { inner, next, .. } | Node::Negate { inner, next, .. } => {
                vec![(inner, false), (next, true)]
            }
            Node::Collect { .. } | Node::NotTerminator { .. } | Node::Yield { .. } | Node::Empty => {
                Vec::new()
            }
        }
    }

    pub fn children(&self) -> Vec<&Arc<Node>> {
        match self {
            Node::Join { next, .. }
            | Node::Compare { next, .. }
            | Node::Arith { next, .. }
            | Node::Copy { next, .. }
            | Node::Distinct { next, .. }
            | Node::NotIn { next, .. }
            | Node::Extern { next, .. } => vec![next],
            Node::Write { next, .. } => next.iter().collect(),
            Node::Or { branches } => branches.iter().collect(),
            Node::Aggregate { inner, next, .. } | Node::Negate { inner, next, .. } => {
                vec![inner, next]
            }
            Node::Collect { .. } | Node::NotTerminator { .. } | Node::Yield { .. } | Node::Empty => {
                Vec::new()
            }
        }
    }

    /// Count nodes of the tree (shared subtrees once per path).
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(|c| c.size()).sum::<usize>()
    }

    /// Visit every join of the tree.
    pub fn for_each_join(&self, f: &mut impl FnMut(&Node)) {
        if matches!(self, Node::Join { .. }) {
            f(self);
        }
        for child in self.children() {
            child.for_each_join(f);
        }
    }

    /// Indented rendering with relation names supplied by `names`.
    pub fn render(&self, names: &dyn Fn(RelationId) -> String) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0, names);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize, names: &dyn Fn(RelationId) -> String) {
        let pad = "  ".repeat(depth);
        let line = match self {
            Node::Join {
                id,
                relation,
                columns,
                read,
                recursive,
                access,
                ..
            } => {
                let mut s = format!("join#{} {}{}", id.0, names(*relation), render_columns(columns));
                if *read == Window::Delta {
                    s.push_str(" delta");
                }
                if *recursive {
                    s.push_str(" recursive");
                }
                match access {
                    Some(AccessPath::Scan) => s.push_str(" scan"),
                    Some(AccessPath::Probe) => s.push_str(" probe"),
                    Some(AccessPath::Index(mask)) => {
                        let _ = write!(s, " index{mask}");
                    }
                    None => {}
                }
                s
            }
            Node::Write { relation, slots, .. } => {
                format!("write {}{}", names(*relation), render_slots(slots))
            }
            Node::Or { branches } => format!("or ({} branches)", branches.len()),
            Node::Compare { op, left, right, .. } => format!("compare ${left} {op} ${right}"),
            Node::Arith {
                op, left, right, out, ..
            } => format!("arith ${out} = ${left} {op} ${right}"),
            Node::Copy { from, to, .. } => format!("copy ${to} = ${from}"),
            Node::Distinct { state, keys, .. } => format!("distinct#{state}{}", render_slots(keys)),
            Node::Aggregate {
                collector, func, out, ..
            } => format!("aggregate#{collector} ${out} = {func}"),
            Node::Collect {
                collector,
                value,
                keys,
            } => format!("collect#{collector} value ${value} key{}", render_slots(keys)),
            Node::Negate { flag, .. } => format!("not#{flag}"),
            Node::NotTerminator { flag } => format!("found#{flag}"),
            Node::NotIn { relation, slots, .. } => {
                format!("not-in {}{}", names(*relation), render_slots(slots))
            }
            Node::Extern { name, columns, .. } => format!("extern {name}{}", render_columns(columns)),
            Node::Yield { slots } => format!("yield{}", render_slots(slots)),
            Node::Empty => "empty".to_string(),
        };
        let _ = writeln!(out, "{pad}{line}");
        for child in self.children() {
            child.render_into(out, depth + 1, names);
        }
    }
}

fn render_columns(columns: &[Column]) -> String {
    let parts: Vec<String> = columns
        .iter()
        .map(|c| match c {
            Column::Input(s) => format!("in ${s}"),
            Column::Output(s) => format!("out ${s}"),
            Column::Same(c) => format!("same @{c}"),
            Column::Ignore => "_".to_string(),
        })
        .collect();
    format!("({})", parts.join(", "))
}

fn render_slots(slots: &[usize]) -> String {
    let parts: Vec<String> = slots.iter().map(|s| format!("${s}")).collect();
    format!("({})", parts.join(", "))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&|id| id.to_string()))
    }
}
