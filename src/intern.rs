//! Symbol interning table
//!
//! Deduplicating storage for names the scanner sees repeatedly (element and
//! pseudo-attribute names, fixed keywords). Interning the same bytes twice
//! yields the same `Symbol`, so downstream comparisons are identity
//! comparisons instead of content comparisons.
//!
//! Uses hash-based lookup to avoid storing duplicate string data.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Identity of an interned string
///
/// Symbol 0 is reserved for the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

impl Symbol {
    /// The reserved empty-string symbol
    pub const EMPTY: Symbol = Symbol(0);
}

/// Interning pool mapping byte strings to `Symbol` ids
///
/// Memory layout:
/// - `entries`: (offset, length) into `data` for each symbol id
/// - `data`: concatenated string bytes
/// - `hash_index`: hash -> list of ids (handles rare collisions)
#[derive(Debug)]
pub struct SymbolTable {
    entries: Vec<(u32, u32)>,
    data: Vec<u8>,
    hash_index: HashMap<u64, Vec<u32>>,
}

impl SymbolTable {
    /// Create a new table with only the empty string interned
    pub fn new() -> Self {
        SymbolTable {
            entries: vec![(0, 0)],
            data: Vec::with_capacity(1024),
            hash_index: HashMap::new(),
        }
    }

    #[inline]
    fn compute_hash(s: &[u8]) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Intern a byte string, returning its symbol
    ///
    /// Interning equal content always returns the same symbol.
    pub fn intern(&mut self, s: &[u8]) -> Symbol {
        if s.is_empty() {
            return Symbol::EMPTY;
        }

        let hash = Self::compute_hash(s);

        if let Some(ids) = self.hash_index.get(&hash) {
            for &id in ids {
                if self.get(Symbol(id)) == s {
                    return Symbol(id);
                }
            }
        }

        let offset = self.data.len() as u32;
        let len = s.len() as u32;
        self.data.extend_from_slice(s);

        let id = self.entries.len() as u32;
        self.entries.push((offset, len));
        self.hash_index.entry(hash).or_default().push(id);

        Symbol(id)
    }

    /// Get the bytes of an interned symbol
    pub fn get(&self, sym: Symbol) -> &[u8] {
        match self.entries.get(sym.0 as usize) {
            Some(&(offset, len)) => {
                let start = offset as usize;
                let end = start + len as usize;
                &self.data[start..end]
            }
            None => &[],
        }
    }

    /// Get an interned symbol as UTF-8
    pub fn get_str(&self, sym: Symbol) -> Option<&str> {
        std::str::from_utf8(self.get(sym)).ok()
    }

    /// Number of interned strings (including the reserved empty string)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing beyond the reserved empty string is interned
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_get() {
        let mut table = SymbolTable::new();
        let sym = table.intern(b"version");
        assert_eq!(table.get(sym), b"version");
        assert_eq!(table.get_str(sym), Some("version"));
    }

    #[test]
    fn test_intern_duplicate() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"encoding");
        let b = table.intern(b"encoding");
        assert_eq!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_intern_different() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"yes");
        let b = table.intern(b"no");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_string_reserved() {
        let mut table = SymbolTable::new();
        assert_eq!(table.intern(b""), Symbol::EMPTY);
        assert_eq!(table.get(Symbol::EMPTY), b"");
        assert!(table.is_empty());
    }
}
