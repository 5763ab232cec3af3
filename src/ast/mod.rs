//! # Rule Syntax Tree
//!
//! The tree a parser hands to the [`Compiler`](crate::compiler::Compiler).
//! Names are plain strings; the compiler interns them.
//!
//! ## Shape
//!
//! ```text
//! Program
//!   `-- Statement::Fact(Clause) | Statement::Rule(Rule { head, body })
//!
//! Clause  = And | Or | Not | Compare | Predicate | True
//! Entity  = Var | Anonymous | Value | Arith | Aggregate
//! ```
//!
//! A predicate clause reads `subject is o1, o2 has a1: e1, a2: e2`. The
//! positional form `p(X, Y, Z)` is sugar for `X is p has #1: Y, #2: Z` and
//! `p()` is a nullary predicate without a subject.
//!
//! ## Builders
//!
//! For programmatic construction of AST nodes, see the [`builders`] module
//! which provides fluent APIs like `PredicateBuilder` and `RuleBuilder`.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod builders;

// Core AST Types

/// Source position of a node (1-based; `0:0` when unknown)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Location { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Constant written in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Atom(String),
    Char(char),
    Byte(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    /// Number of distinct keys
    Count,
    /// Sum of values over distinct `(key, value)` pairs; without a key, over
    /// distinct source rows
    Sum,
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunc::Count => f.write_str("count"),
            AggregateFunc::Sum => f.write_str("sum"),
        }
    }
}

/// A term that denotes a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Var {
        name: String,
        location: Location,
    },
    /// `_`: matches anything, binds nothing
    Anonymous,
    Value(Literal),
    Arith {
        op: ArithOp,
        left: Box<Entity>,
        right: Box<Entity>,
    },
    /// `count X in clause`, `sum V over K in clause`
    Aggregate {
        func: AggregateFunc,
        value: Box<Entity>,
        /// Grouping key of the collector; defaults to `value`
        key: Option<Box<Entity>>,
        clause: Box<Clause>,
    },
}

impl Entity {
    pub fn var(name: impl Into<String>) -> Self {
        Entity::Var {
            name: name.into(),
            location: Location::default(),
        }
    }

    pub fn int(v: i64) -> Self {
        Entity::Value(Literal::Integer(v))
    }

    pub fn float(v: f64) -> Self {
        Entity::Value(Literal::Float(v))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Entity::Value(Literal::String(s.into()))
    }

    pub fn atom(s: impl Into<String>) -> Self {
        Entity::Value(Literal::Atom(s.into()))
    }

    pub fn arith(op: ArithOp, left: Entity, right: Entity) -> Self {
        Entity::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn count(value: Entity, clause: Clause) -> Self {
        Entity::Aggregate {
            func: AggregateFunc::Count,
            value: Box::new(value),
            key: None,
            clause: Box::new(clause),
        }
    }

    pub fn sum(value: Entity, key: Option<Entity>, clause: Clause) -> Self {
        Entity::Aggregate {
            func: AggregateFunc::Sum,
            value: Box::new(value),
            key: key.map(Box::new),
            clause: Box::new(clause),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Entity::Anonymous)
    }

    pub fn var_name(&self) -> Option<&str> {
        match self {
            Entity::Var { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// `subject is objects has attr: entity, ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// `None` for a nullary predicate
    pub subject: Option<Entity>,
    pub objects: Vec<String>,
    pub attributes: Vec<(String, Entity)>,
    /// Transitive closure of the named binary relation
    pub reaches: bool,
    pub location: Location,
}

impl Predicate {
    /// Positional form `name(args...)`.
    pub fn positional(name: impl Into<String>, args: Vec<Entity>) -> Self {
        let mut args = args.into_iter();
        let subject = args.next();
        let attributes = args
            .enumerate()
            .map(|(i, e)| (positional_attribute(i + 1), e))
            .collect();
        Predicate {
            subject,
            objects: vec![name.into()],
            attributes,
            reaches: false,
            location: Location::default(),
        }
    }

    /// Values this predicate mentions, subject first.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.subject
            .iter()
            .chain(self.attributes.iter().map(|(_, e)| e))
    }

    /// Whether the attributes are exactly `#1..#n` in order.
    pub fn is_positional(&self) -> bool {
        self.attributes
            .iter()
            .enumerate()
            .all(|(i, (name, _))| *name == positional_attribute(i + 1))
    }
}

/// Name of the `n`th positional attribute.
pub fn positional_attribute(n: usize) -> String {
    format!("#{n}")
}

/// A condition over entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Not(Box<Clause>),
    Compare {
        op: CompareOp,
        left: Entity,
        right: Entity,
        location: Location,
    },
    Predicate(Predicate),
    /// Always holds; the body of a fact
    True,
}

impl Clause {
    pub fn and(clauses: Vec<Clause>) -> Self {
        Clause::And(clauses)
    }

    pub fn or(clauses: Vec<Clause>) -> Self {
        Clause::Or(clauses)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(clause: Clause) -> Self {
        Clause::Not(Box::new(clause))
    }

    pub fn compare(op: CompareOp, left: Entity, right: Entity) -> Self {
        Clause::Compare {
            op,
            left,
            right,
            location: Location::default(),
        }
    }

    /// Short description used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Clause::And(_) => "conjunction",
            Clause::Or(_) => "disjunction",
            Clause::Not(_) => "negation",
            Clause::Compare { .. } => "comparison",
            Clause::Predicate(_) => "predicate",
            Clause::True => "true",
        }
    }

    pub fn location(&self) -> Location {
        match self {
            Clause::Compare { location, .. } => *location,
            Clause::Predicate(p) => p.location,
            Clause::Not(inner) => inner.location(),
            Clause::And(cs) | Clause::Or(cs) => {
                cs.first().map(Clause::location).unwrap_or_default()
            }
            Clause::True => Location::default(),
        }
    }
}

impl From<Predicate> for Clause {
    fn from(p: Predicate) -> Self {
        Clause::Predicate(p)
    }
}

/// `head :- body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub head: Clause,
    pub body: Clause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Fact(Clause),
    Rule(Rule),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fact(mut self, clause: impl Into<Clause>) -> Self {
        self.statements.push(Statement::Fact(clause.into()));
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.statements.push(Statement::Rule(rule));
        self
    }
}
