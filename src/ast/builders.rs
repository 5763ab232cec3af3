//! Builder Patterns for AST Construction
//!
//! Provides fluent APIs for constructing AST nodes, particularly useful for tests.
//!
//! ## Example
//!
//! ```rust
//! use deductive::ast::builders::{PredicateBuilder, RuleBuilder};
//!
//! // Build a predicate: path(x, y)
//! let atom = PredicateBuilder::new("path")
//!     .var("x")
//!     .var("y")
//!     .build();
//!
//! // Build a rule: path(x, y) :- edge(x, y).
//! let rule = RuleBuilder::new("path")
//!     .head_vars(["x", "y"])
//!     .body_atom("edge", ["x", "y"])
//!     .build();
//!
//! // Build a recursive rule: path(x, z) :- path(x, y), edge(y, z).
//! let recursive = RuleBuilder::new("path")
//!     .head_vars(["x", "z"])
//!     .body_atom("path", ["x", "y"])
//!     .body_atom("edge", ["y", "z"])
//!     .build();
//! ```

use super::{positional_attribute, Clause, CompareOp, Entity, Location, Predicate, Rule};

// PredicateBuilder
/// Builder for positional or attribute-style predicates
#[derive(Debug, Clone)]
pub struct PredicateBuilder {
    objects: Vec<String>,
    subject: Option<Entity>,
    positional: Vec<Entity>,
    attributes: Vec<(String, Entity)>,
    reaches: bool,
    location: Location,
}

impl PredicateBuilder {
    /// Positional predicate `name(...)`
    pub fn new(name: impl Into<String>) -> Self {
        PredicateBuilder {
            objects: vec![name.into()],
            subject: None,
            positional: Vec::new(),
            attributes: Vec::new(),
            reaches: false,
            location: Location::default(),
        }
    }

    /// Attribute clause `subject has ...` with no object names
    pub fn entity(subject: Entity) -> Self {
        PredicateBuilder {
            objects: Vec::new(),
            subject: Some(subject),
            positional: Vec::new(),
            attributes: Vec::new(),
            reaches: false,
            location: Location::default(),
        }
    }

    /// Add an object name (`subject is name`)
    pub fn is(mut self, object: impl Into<String>) -> Self {
        self.objects.push(object.into());
        self
    }

    /// Next positional argument
    pub fn arg(mut self, entity: Entity) -> Self {
        self.positional.push(entity);
        self
    }

    pub fn var(self, name: &str) -> Self {
        self.arg(Entity::var(name))
    }

    pub fn int(self, value: i64) -> Self {
        self.arg(Entity::int(value))
    }

    pub fn atom(self, value: &str) -> Self {
        self.arg(Entity::atom(value))
    }

    pub fn string(self, value: &str) -> Self {
        self.arg(Entity::string(value))
    }

    pub fn anonymous(self) -> Self {
        self.arg(Entity::Anonymous)
    }

    /// Named attribute `name: entity`
    pub fn has(mut self, name: impl Into<String>, entity: Entity) -> Self {
        self.attributes.push((name.into(), entity));
        self
    }

    /// Read the transitive closure of this binary relation
    pub fn reaches(mut self) -> Self {
        self.reaches = true;
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Location::new(line, column);
        self
    }

    pub fn build(self) -> Predicate {
        let mut positional = self.positional.into_iter();
        let subject = self.subject.or_else(|| positional.next());
        let mut attributes: Vec<(String, Entity)> = positional
            .enumerate()
            .map(|(i, e)| (positional_attribute(i + 1), e))
            .collect();
        attributes.extend(self.attributes);
        Predicate {
            subject,
            objects: self.objects,
            attributes,
            reaches: self.reaches,
            location: self.location,
        }
    }

    pub fn clause(self) -> Clause {
        Clause::Predicate(self.build())
    }
}

/// Positional predicate over variable names
pub fn atom<'a, I: IntoIterator<Item = &'a str>>(name: &str, vars: I) -> Predicate {
    vars.into_iter()
        .fold(PredicateBuilder::new(name), |b, v| {
            if v == "_" {
                b.anonymous()
            } else {
                b.var(v)
            }
        })
        .build()
}

// RuleBuilder
/// Builder for rules with a single head predicate and a conjunctive body
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    head: PredicateBuilder,
    body: Vec<Clause>,
}

impl RuleBuilder {
    pub fn new(head: impl Into<String>) -> Self {
        RuleBuilder {
            head: PredicateBuilder::new(head),
            body: Vec::new(),
        }
    }

    pub fn head_vars<'a, I: IntoIterator<Item = &'a str>>(mut self, vars: I) -> Self {
        for v in vars {
            self.head = self.head.var(v);
        }
        self
    }

    pub fn head_arg(mut self, entity: Entity) -> Self {
        self.head = self.head.arg(entity);
        self
    }

    pub fn body_atom<'a, I: IntoIterator<Item = &'a str>>(mut self, name: &str, vars: I) -> Self {
        self.body.push(Clause::Predicate(atom(name, vars)));
        self
    }

    pub fn body_not<'a, I: IntoIterator<Item = &'a str>>(mut self, name: &str, vars: I) -> Self {
        self.body.push(Clause::not(Clause::Predicate(atom(name, vars))));
        self
    }

    pub fn body_compare(mut self, op: CompareOp, left: Entity, right: Entity) -> Self {
        self.body.push(Clause::compare(op, left, right));
        self
    }

    pub fn body(mut self, clause: Clause) -> Self {
        self.body.push(clause);
        self
    }

    pub fn build(self) -> Rule {
        let body = match self.body.len() {
            0 => Clause::True,
            1 => self.body.into_iter().next().unwrap_or(Clause::True),
            _ => Clause::And(self.body),
        };
        Rule {
            head: self.head.clause(),
            body,
        }
    }
}
