//! Keys and symbols.
//!
//! A [`Key`] is an opaque integer naming one unknown. Estimation problems
//! usually group unknowns by kind (poses `x0, x1, ...`, landmarks `l0, ...`),
//! so a [`Symbol`] packs a character into the top byte of the key and an
//! index into the remaining 56 bits.

use std::fmt;

/// Integer identifier for an unknown.
pub type Key = u64;

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = Key::BITS - CHR_BITS;
const INDEX_MASK: Key = (1 << INDEX_BITS) - 1;

/// A character-plus-index view of a [`Key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    chr: u8,
    index: u64,
}

impl Symbol {
    /// Creates a symbol from an ASCII character and an index.
    ///
    /// # Panics
    ///
    /// Panics if `chr` is not ASCII or `index` does not fit in 56 bits.
    pub fn new(chr: char, index: u64) -> Self {
        assert!(chr.is_ascii(), "Symbol character must be ASCII, got {chr:?}");
        assert!(
            index <= INDEX_MASK,
            "Symbol index {index} does not fit in {INDEX_BITS} bits"
        );
        Self {
            chr: chr as u8,
            index,
        }
    }

    /// Returns the symbol character.
    pub fn chr(&self) -> char {
        self.chr as char
    }

    /// Returns the symbol index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Returns the packed key.
    pub fn key(&self) -> Key {
        ((self.chr as Key) << INDEX_BITS) | self.index
    }
}

impl From<Key> for Symbol {
    fn from(key: Key) -> Self {
        Self {
            chr: (key >> INDEX_BITS) as u8,
            index: key & INDEX_MASK,
        }
    }
}

impl From<Symbol> for Key {
    fn from(symbol: Symbol) -> Self {
        symbol.key()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.chr(), self.index)
    }
}

/// Shorthand for `Symbol::new(chr, index).key()`.
pub fn symbol(chr: char, index: u64) -> Key {
    Symbol::new(chr, index).key()
}
