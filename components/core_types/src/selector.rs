//! Interned message selectors.

use std::collections::HashMap;
use std::fmt;

/// An interned selector.
///
/// Selectors are compared and hashed by their interned index, so two
/// selectors with the same spelling are always `==` once interned through the
/// same [`SelectorTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selector(u32);

impl Selector {
    /// Raw interned index, usable as a table key.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Intern table mapping selector spellings to [`Selector`] handles.
///
/// # Examples
///
/// ```
/// use core_types::SelectorTable;
///
/// let mut table = SelectorTable::new();
/// let at_put = table.intern("at:put:");
/// assert_eq!(table.intern("at:put:"), at_put);
/// assert_eq!(table.name(at_put), "at:put:");
/// assert_eq!(table.arg_count(at_put), 2);
/// ```
#[derive(Debug, Default)]
pub struct SelectorTable {
    names: Vec<String>,
    index: HashMap<String, Selector>,
}

impl SelectorTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a spelling, returning the existing handle when already known.
    pub fn intern(&mut self, name: &str) -> Selector {
        if let Some(sel) = self.index.get(name) {
            return *sel;
        }
        let sel = Selector(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), sel);
        sel
    }

    /// The spelling of an interned selector.
    pub fn name(&self, selector: Selector) -> &str {
        &self.names[selector.0 as usize]
    }

    /// Number of arguments implied by the selector's spelling.
    ///
    /// Keyword selectors take one argument per colon, binary selectors take
    /// exactly one, unary selectors take none.
    pub fn arg_count(&self, selector: Selector) -> usize {
        let name = self.name(selector);
        let colons = name.bytes().filter(|b| *b == b':').count();
        if colons > 0 {
            colons
        } else if name
            .chars()
            .next()
            .is_some_and(|c| !c.is_alphanumeric() && c != '_')
        {
            1
        } else {
            0
        }
    }

    /// Number of interned selectors.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no selector has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "selector#{}", self.0)
    }
}
