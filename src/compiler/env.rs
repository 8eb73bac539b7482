//! Lexically scoped symbol environment
//!
//! A single ordered table of entries plus a stack of scope marks ("tags").
//! Opening a scope records the current table length; closing it truncates
//! the table back to that length, so scopes nest last-in-first-out exactly
//! like procedure bodies do.
//!
//! The same structure holds compile-time symbol descriptors
//! ([`Symbol`](super::symbols::Symbol)) and the allocator's per-name storage
//! locations ([`Loc`](super::symbols::Loc)).

use std::fmt;

/// Separator of compiler-mangled names (`clone_x` resolves as `x`)
pub const MANGLE_SEPARATOR: char = '_';

/// Anything that can live in a [`ScopedEnv`]
pub trait Named {
    /// Lookup key
    fn name(&self) -> &str;

    /// Does this entry answer a lookup for `query`? Defaults to
    /// [`name_matches`].
    fn matches(&self, query: &str) -> bool {
        name_matches(self.name(), query)
    }
}

/// Does a stored name answer a lookup for `query`?
///
/// Besides the exact name, the text after the last `_` of a mangled name is
/// accepted. This also means a lookup for `x` matches any unrelated `foo_x`.
pub fn name_matches(stored: &str, query: &str) -> bool {
    stored == query
        || stored
            .rfind(MANGLE_SEPARATOR)
            .is_some_and(|i| &stored[i + MANGLE_SEPARATOR.len_utf8()..] == query)
}

/// Ordered table of named entries with block-scope boundaries
#[derive(Debug, Clone)]
pub struct ScopedEnv<T> {
    /// Entries in push order
    entries: Vec<T>,
    /// Table length at each open scope; never empty
    tags: Vec<usize>,
}

impl<T: Named> ScopedEnv<T> {
    /// Creates an environment with the implicit top-level scope open
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            tags: vec![0],
        }
    }

    /// True if no entry is visible
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries in all open scopes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Adds an entry to the innermost scope
    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    /// Removes the most recent entry, regardless of scope boundaries
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop()
    }

    /// Opens a new scope
    pub fn tag(&mut self) {
        self.tags.push(self.entries.len());
        tracing::trace!(depth = self.depth(), "scope opened");
    }

    /// Closes the innermost scope, dropping every entry pushed since its tag
    ///
    /// Precondition: a matching [`tag`](Self::tag) was called. The top-level
    /// scope is never closed.
    pub fn detag(&mut self) {
        debug_assert!(self.tags.len() > 1, "detag without a matching tag");
        if self.tags.len() > 1 {
            if let Some(mark) = self.tags.pop() {
                self.entries.truncate(mark);
            }
        }
        tracing::trace!(depth = self.depth(), "scope closed");
    }

    /// Number of open scopes below the top level (0 at top level)
    pub fn depth(&self) -> usize {
        self.tags.len() - 1
    }

    /// Index of the first entry belonging to the innermost scope
    fn local_start(&self) -> usize {
        self.tags.last().copied().unwrap_or(0)
    }

    /// Position of the most recent entry matching `name`
    fn position(&self, name: &str, cross: bool) -> Option<usize> {
        let floor = if cross { 0 } else { self.local_start() };
        (floor..self.entries.len())
            .rev()
            .find(|&i| self.entries[i].matches(name))
    }

    /// Looks `name` up, innermost first
    ///
    /// A local lookup (`cross == false`) stops at the innermost scope
    /// boundary; a cross-scope lookup continues into enclosing scopes.
    pub fn find(&self, name: &str, cross: bool) -> Option<&T> {
        self.position(name, cross).map(|i| &self.entries[i])
    }

    /// Mutable variant of [`find`](Self::find)
    pub fn find_mut(&mut self, name: &str, cross: bool) -> Option<&mut T> {
        self.position(name, cross).map(move |i| &mut self.entries[i])
    }

    /// True if [`find`](Self::find) would succeed
    pub fn contains(&self, name: &str, cross: bool) -> bool {
        self.position(name, cross).is_some()
    }

    /// Scope index at which `name` resolves
    ///
    /// Returns the innermost tag whose start covers the matching entry, or
    /// `None` if nothing matches in any open scope.
    pub fn depth_of(&self, name: &str) -> Option<usize> {
        let pos = self.position(name, true)?;
        self.tags.iter().rposition(|&mark| pos >= mark)
    }

    /// Visible entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Named + fmt::Display> ScopedEnv<T> {
    /// Render the table as assembly comments
    pub fn dump(&self) -> String {
        let mut out = String::from(";; -----------------  Symbol Table  -------------------\n");
        for entry in &self.entries {
            out.push_str(&format!(";; {}\n", entry));
        }
        out.push_str(";; -----------------------------------------------------\n");
        out
    }
}

impl<T: Named> Default for ScopedEnv<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        name: String,
        id: u32,
    }

    impl Named for Entry {
        fn name(&self) -> &str {
            &self.name
        }
    }

    impl fmt::Display for Entry {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}#{}", self.name, self.id)
        }
    }

    fn entry(name: &str, id: u32) -> Entry {
        Entry {
            name: name.to_string(),
            id,
        }
    }

    #[test]
    fn test_empty_lookup_is_not_found() {
        let env: ScopedEnv<Entry> = ScopedEnv::new();
        assert!(env.find("x", true).is_none());
        assert!(!env.contains("x", false));
        assert_eq!(env.depth_of("x"), None);
        assert_eq!(env.depth(), 0);
    }

    #[test]
    fn test_shadowing_and_detag() {
        let mut env = ScopedEnv::new();
        env.push(entry("x", 1));
        env.tag();
        env.push(entry("x", 2));

        assert_eq!(env.find("x", false).map(|e| e.id), Some(2));
        env.detag();
        assert_eq!(env.find("x", true).map(|e| e.id), Some(1));
    }

    #[test]
    fn test_local_lookup_stops_at_tag() {
        let mut env = ScopedEnv::new();
        env.push(entry("y", 1));
        env.tag();

        assert!(!env.contains("y", false));
        assert!(env.contains("y", true));
    }

    #[test]
    fn test_suffix_match() {
        let mut env = ScopedEnv::new();
        env.push(entry("foo_x", 1));

        assert!(env.contains("x", false));
        assert!(env.contains("foo_x", false));
        assert!(!env.contains("foo", true));

        env.push(entry("foo", 2));
        assert_eq!(env.find("foo", true).map(|e| e.id), Some(2));
    }

    #[test]
    fn test_suffix_uses_last_separator() {
        assert!(name_matches("a_b_c", "c"));
        assert!(!name_matches("a_b_c", "b_c"));
        assert!(!name_matches("x_", "x"));
        assert!(name_matches("x_", ""));
    }

    #[test]
    fn test_depth_queries() {
        let mut env = ScopedEnv::new();
        env.push(entry("g", 0));
        env.tag();
        env.push(entry("p", 1));
        env.tag();
        env.tag();
        env.push(entry("q", 3));

        assert_eq!(env.depth(), 3);
        assert_eq!(env.depth_of("g"), Some(0));
        assert_eq!(env.depth_of("p"), Some(1));
        assert_eq!(env.depth_of("q"), Some(3));
        assert_eq!(env.depth_of("r"), None);
    }

    #[test]
    fn test_depth_of_empty_scopes_resolves_innermost_cover() {
        let mut env = ScopedEnv::new();
        env.push(entry("a", 0));
        env.tag();
        env.tag();
        // tags = [0, 1, 1]; `a` sits before both empty scopes
        assert_eq!(env.depth_of("a"), Some(0));
        env.push(entry("b", 2));
        assert_eq!(env.depth_of("b"), Some(2));
    }

    #[test]
    fn test_pop_ignores_scopes() {
        let mut env = ScopedEnv::new();
        env.push(entry("a", 0));
        env.tag();
        assert_eq!(env.pop().map(|e| e.id), Some(0));
        assert!(env.is_empty());
        env.detag();
        assert_eq!(env.depth(), 0);
    }

    #[test]
    fn test_find_mut_updates_entry() {
        let mut env = ScopedEnv::new();
        env.push(entry("a", 0));
        if let Some(e) = env.find_mut("a", false) {
            e.id = 7;
        }
        assert_eq!(env.find("a", false).map(|e| e.id), Some(7));
    }

    #[test]
    fn test_dump_lists_entries() {
        let mut env = ScopedEnv::new();
        env.push(entry("a", 0));
        env.push(entry("b", 1));
        let dump = env.dump();
        assert!(dump.contains(";; a#0\n;; b#1\n"));
        assert_eq!(dump.lines().count(), 4);
    }
}
