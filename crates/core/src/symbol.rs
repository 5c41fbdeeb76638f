//! The VM-global method-name symbol table.
//!
//! Every method signature (`foo(_)`, `[_]=(_)`, `init new(_,_)`, ...) is
//! interned exactly once into a single append-only table shared by every
//! class in the VM. A class's method table is then just a `Vec<MethodSlot>`
//! indexed by this symbol, with `MethodSlot::None` standing in for "this
//! class does not implement that signature" (never a shorter table).

use std::collections::HashMap;

/// An index into the global method-name symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSymbol(pub u16);

impl MethodSymbol {
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Append-only interning table from method signature string to
/// [`MethodSymbol`]. Shared for the lifetime of one VM; compilation and
/// primitive binding both insert into it, never remove from it, per
/// spec §5 ("Shared resource policy").
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    by_name: HashMap<String, MethodSymbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the symbol for `signature`, interning it if this is the
    /// first time it has been seen in this VM.
    pub fn intern(&mut self, signature: &str) -> MethodSymbol {
        if let Some(&sym) = self.by_name.get(signature) {
            return sym;
        }
        let sym = MethodSymbol(self.names.len() as u16);
        self.names.push(signature.to_string());
        self.by_name.insert(signature.to_string(), sym);
        sym
    }

    /// Look up an already-interned symbol without creating a new one.
    #[must_use]
    pub fn find(&self, signature: &str) -> Option<MethodSymbol> {
        self.by_name.get(signature).copied()
    }

    #[must_use]
    pub fn name(&self, sym: MethodSymbol) -> &str {
        &self.names[sym.as_usize()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo(_)");
        let b = table.intern("foo(_)");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_signatures_get_distinct_symbols() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo()");
        let b = table.intern("foo(_)");
        assert_ne!(a, b);
        assert_eq!(table.name(a), "foo()");
        assert_eq!(table.name(b), "foo(_)");
    }
}
