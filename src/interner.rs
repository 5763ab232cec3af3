//! String Table
//!
//! Bidirectional mapping between text and small dense integer ids. Every
//! relation name, attribute name, variable name and string-valued datum
//! passes through here, so the rest of the engine only ever compares `u32`s.
//!
//! ```
//! use deductive::interner::Interner;
//!
//! let mut strings = Interner::new();
//! let a = strings.intern("edge");
//! let b = strings.intern("edge");
//! assert_eq!(a, b);
//! assert_eq!(strings.resolve(a), Some("edge"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Dense id of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(pub u32);

impl StrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interned string table. Ids are handed out densely starting at 0 and are
/// never recycled.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    ids: HashMap<Arc<str>, StrId>,
    strings: Vec<Arc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, returning the existing id when already present.
    pub fn intern(&mut self, text: &str) -> StrId {
        if let Some(&id) = self.ids.get(text) {
            return id;
        }
        let id = StrId(self.strings.len() as u32);
        let shared: Arc<str> = Arc::from(text);
        self.strings.push(Arc::clone(&shared));
        self.ids.insert(shared, id);
        id
    }

    /// Look up an id without interning.
    pub fn lookup(&self, text: &str) -> Option<StrId> {
        self.ids.get(text).copied()
    }

    pub fn resolve(&self, id: StrId) -> Option<&str> {
        self.strings.get(id.index()).map(AsRef::as_ref)
    }

    /// Resolve for display purposes; unknown ids render as `#n`.
    pub fn display(&self, id: StrId) -> String {
        self.resolve(id)
            .map_or_else(|| id.to_string(), ToString::to_string)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// All strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = (StrId, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StrId(i as u32), s.as_ref()))
    }

    /// Approximate heap usage, used by the memory ceiling.
    pub fn approx_bytes(&self) -> usize {
        self.strings.iter().map(|s| s.len() + 32).sum::<usize>() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense_and_stable() {
        let mut strings = Interner::new();
        assert_eq!(strings.intern("a"), StrId(0));
        assert_eq!(strings.intern("b"), StrId(1));
        assert_eq!(strings.intern("a"), StrId(0));
        assert_eq!(strings.len(), 2);
    }

    #[test]
    fn test_lookup_does_not_intern() {
        let mut strings = Interner::new();
        strings.intern("present");
        assert!(strings.lookup("absent").is_none());
        assert_eq!(strings.len(), 1);
    }

    #[test]
    fn test_display_unknown_id() {
        let strings = Interner::new();
        assert_eq!(strings.display(StrId(7)), "#7");
    }
}
