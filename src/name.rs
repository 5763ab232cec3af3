//! # Relation Names
//!
//! A relation is identified by *what* its subject is (`E is person`) and
//! *which* attributes it carries (`E has name: N, age: A`). Both parts are
//! kept as sorted, de-duplicated sets of interned ids so that
//! `E has age: A, name: N` and `E has name: N, age: A` name the same
//! relation.
//!
//! ## Column layout
//!
//! ```text
//! column 0        subject entity (absent for nullary predicates)
//! column 1..n     one column per attribute, in ascending id order
//! ```
//!
//! ## Containment
//!
//! `A <= B` holds when every attribute of `A` is also an attribute of `B`.
//! The registry uses containment to derive projection rules so that a row
//! asserted into `B` is also visible through `A`.

use crate::interner::{Interner, StrId};
use std::fmt;

/// Sorted, de-duplicated set of name ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompoundName {
    parts: Vec<StrId>,
}

impl CompoundName {
    pub fn new<I: IntoIterator<Item = StrId>>(parts: I) -> Self {
        let mut parts: Vec<StrId> = parts.into_iter().collect();
        parts.sort_unstable();
        parts.dedup();
        CompoundName { parts }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[StrId] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn contains(&self, id: StrId) -> bool {
        self.parts.binary_search(&id).is_ok()
    }

    /// Position of `id` within the sorted set.
    pub fn position(&self, id: StrId) -> Option<usize> {
        self.parts.binary_search(&id).ok()
    }

    /// Subset test over two sorted sets (linear merge).
    pub fn is_subset_of(&self, other: &CompoundName) -> bool {
        let mut theirs = other.parts.iter();
        'outer: for mine in &self.parts {
            for candidate in theirs.by_ref() {
                if candidate == mine {
                    continue 'outer;
                }
                if candidate > mine {
                    return false;
                }
            }
            return false;
        }
        true
    }

    /// Render as `a+b+c` through the interner.
    pub fn render(&self, strings: &Interner) -> String {
        self.parts
            .iter()
            .map(|id| strings.display(*id))
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Canonical identity of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredicateName {
    object_parts: CompoundName,
    attribute_parts: CompoundName,
    arity: usize,
    /// Transitive closure of the binary relation with the same parts
    reaches: bool,
}

impl PredicateName {
    /// Name of a relation with a subject column.
    pub fn new(objects: CompoundName, attributes: CompoundName) -> Self {
        let arity = 1 + attributes.len();
        PredicateName {
            object_parts: objects,
            attribute_parts: attributes,
            arity,
            reaches: false,
        }
    }

    /// Zero-arity predicate such as `ready()`.
    pub fn nullary(objects: CompoundName) -> Self {
        PredicateName {
            object_parts: objects,
            attribute_parts: CompoundName::empty(),
            arity: 0,
            reaches: false,
        }
    }

    /// Closure of a binary relation. Returns `None` unless the name has
    /// exactly one attribute.
    pub fn closure_of(base: &PredicateName) -> Option<Self> {
        if base.arity != 2 || base.reaches {
            return None;
        }
        Some(PredicateName {
            reaches: true,
            ..base.clone()
        })
    }

    /// The relation a closure name is computed from.
    pub fn closure_base(&self) -> Option<Self> {
        self.reaches.then(|| PredicateName {
            reaches: false,
            ..self.clone()
        })
    }

    pub fn objects(&self) -> &CompoundName {
        &self.object_parts
    }

    pub fn attributes(&self) -> &CompoundName {
        &self.attribute_parts
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_nullary(&self) -> bool {
        self.arity == 0
    }

    pub fn reaches(&self) -> bool {
        self.reaches
    }

    /// Column holding attribute `id`.
    pub fn column_of(&self, id: StrId) -> Option<usize> {
        if self.is_nullary() {
            return None;
        }
        self.attribute_parts.position(id).map(|p| p + 1)
    }

    /// Containment `self <= other` over attribute parts.
    pub fn le(&self, other: &PredicateName) -> bool {
        self.attribute_parts.is_subset_of(&other.attribute_parts)
    }

    /// Whether rows of `source` project onto `self`: attribute and object
    /// containment, distinct names, both have a subject and neither is a
    /// closure.
    pub fn is_projection_of(&self, source: &PredicateName) -> bool {
        self != source
            && !self.is_nullary()
            && !source.is_nullary()
            && !self.reaches
            && !source.reaches
            && self.le(source)
            && self.object_parts.is_subset_of(&source.object_parts)
    }

    /// For each column of `self`, the column of `source` carrying the same
    /// attribute. Only meaningful when [`is_projection_of`] holds.
    ///
    /// [`is_projection_of`]: PredicateName::is_projection_of
    pub fn projection_columns(&self, source: &PredicateName) -> Vec<usize> {
        let mut columns = vec![0];
        for attr in self.attribute_parts.parts() {
            if let Some(col) = source.column_of(*attr) {
                columns.push(col);
            }
        }
        columns
    }

    pub fn render(&self, strings: &Interner) -> String {
        let objects = self.object_parts.render(strings);
        let attrs = self.attribute_parts.render(strings);
        let base = match (objects.is_empty(), attrs.is_empty()) {
            (false, true) => objects,
            (true, false) => format!("{{{attrs}}}"),
            (true, true) => "{}".to_string(),
            (false, false) => format!("{objects}{{{attrs}}}"),
        };
        if self.reaches {
            format!("{base}*")
        } else if self.is_nullary() {
            format!("{base}()")
        } else {
            base
        }
    }
}

impl fmt::Display for PredicateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |c: &CompoundName| {
            c.parts()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("+")
        };
        write!(
            f,
            "{}{{{}}}/{}",
            ids(&self.object_parts),
            ids(&self.attribute_parts),
            self.arity
        )?;
        if self.reaches {
            write!(f, "*")?;
        }
        Ok(())
    }
}
