use std::{collections::HashMap, fmt, num::NonZeroU32};

/// A handle to an identifier stored in an [`Interner`]. Two symbols are
/// equal exactly when they were interned from equal text.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(NonZeroU32);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl From<&Symbol> for Symbol {
    fn from(value: &Symbol) -> Self {
        *value
    }
}

/// Identifier storage for one compilation.
///
/// The text of every symbol lives back to back in a single buffer; symbol
/// `n` spans from the end of symbol `n - 1` to `ends[n - 1]`.
#[derive(Default)]
pub struct Interner {
    text: String,
    ends: Vec<u32>,
    lookup: HashMap<Box<str>, Symbol>,
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter().map(|(s, text)| (s.0, text))).finish()
    }
}

impl Interner {
    pub fn with_capacity(capacity: usize) -> Interner {
        Interner {
            text: String::with_capacity(capacity * 8),
            ends: Vec::with_capacity(capacity),
            lookup: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// Returns the symbol of `text`, storing it on first sight.
    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(&symbol) = self.lookup.get(text) {
            return symbol;
        }
        self.text.push_str(text);
        let end = u32::try_from(self.text.len()).expect("identifier storage out of capacity");
        self.ends.push(end);
        let handle = u32::try_from(self.ends.len())
            .ok()
            .and_then(NonZeroU32::new)
            .expect("identifier storage out of capacity");
        let symbol = Symbol(handle);
        self.lookup.insert(text.into(), symbol);
        symbol
    }

    /// The symbol of `text`, if it was ever interned.
    pub fn lookup(&self, text: &str) -> Option<Symbol> {
        self.lookup.get(text).copied()
    }

    /// The text of a symbol. Panics on a symbol from another interner.
    pub fn get(&self, symbol: impl Into<Symbol>) -> &str {
        let index = symbol.into().0.get() as usize - 1;
        let start = match index {
            0 => 0,
            _ => self.ends[index - 1] as usize,
        };
        &self.text[start..self.ends[index] as usize]
    }

    /// Every symbol with its text, in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &str)> {
        (1..=self.ends.len() as u32)
            .filter_map(NonZeroU32::new)
            .map(|handle| (Symbol(handle), self.get(Symbol(handle))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_text_shares_a_symbol() {
        let mut i = Interner::with_capacity(3);
        let main = i.intern("main");
        let args = i.intern("args");
        assert_eq!(i.intern("main"), main);
        assert_ne!(main, args);
        assert_eq!(i.get(main), "main");
        assert_eq!(i.get(&args), "args");
        assert_eq!(i.len(), 2);
    }

    #[test]
    fn empty_and_adjacent_texts() {
        let mut i = Interner::default();
        assert!(i.is_empty());
        let a = i.intern("ab");
        let empty = i.intern("");
        let b = i.intern("c");
        assert_eq!(i.get(a), "ab");
        assert_eq!(i.get(empty), "");
        assert_eq!(i.get(b), "c");
        assert_eq!(i.lookup("c"), Some(b));
        assert_eq!(i.lookup("abc"), None);
        let all: Vec<_> = i.iter().map(|(_, text)| text).collect();
        assert_eq!(all, ["ab", "", "c"]);
    }
}
