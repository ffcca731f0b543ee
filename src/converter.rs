//! Converters for converting into numerical representation.
//!
//! The text searched by this engine is always over the 4-letter DNA
//! alphabet, so this fixes the range once rather than offering a family of
//! general-purpose range converters.

use crate::character::{Base, Character};

/// If we know a [Character] data type can only consists of particular
/// values, they can be restricted to a smaller alphabet. This helps both
/// speed of search and memory usage.
///
/// A converter can be used to restrict a character of a type to a certain
/// alphabet.
pub trait Converter {
    /// The character type used by this converter.
    type Char;

    /// Convert a u64 into a character of this type.
    #[allow(clippy::wrong_self_convention)]
    fn from_u64(&self, c: u64) -> Self::Char;

    /// Convert a character of this type into a u64.
    fn to_u64(&self, c: Self::Char) -> u64;

    /// Convert a usize into a character of this type.
    #[allow(clippy::wrong_self_convention)]
    fn from_usize(&self, c: usize) -> Self::Char {
        self.from_u64(c as u64)
    }

    /// Convert a character of this type into a usize.
    fn to_usize(&self, c: Self::Char) -> usize {
        self.to_u64(c) as usize
    }

    /// Returns the maximum value of this character type.
    fn max_value(&self) -> Self::Char;
}

/// The converter for the packed-DNA alphabet: `A=0, C=1, G=2, T=3`.
#[derive(Default, Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct DnaConverter;

impl Converter for DnaConverter {
    type Char = Base;

    fn from_u64(&self, c: u64) -> Base {
        Base::from_u64(c)
    }

    fn to_u64(&self, c: Base) -> u64 {
        c.into_u64()
    }

    fn max_value(&self) -> Base {
        Base::T
    }
}

/// An identity converter over dense `usize` ranks, with a caller-supplied
/// maximum. Used only internally, to recurse the suffix-array construction
/// over the reduced alphabet of LMS-substring names — never over the DNA
/// alphabet itself.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RankConverter {
    max: usize,
}

impl RankConverter {
    pub(crate) fn new(max: usize) -> Self {
        RankConverter { max }
    }
}

impl Converter for RankConverter {
    type Char = usize;

    fn from_u64(&self, c: u64) -> usize {
        c as usize
    }

    fn to_u64(&self, c: usize) -> u64 {
        c as u64
    }

    fn max_value(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dna_converter_round_trips() {
        let conv = DnaConverter;
        for &b in &Base::ALPHABET {
            assert_eq!(conv.from_u64(conv.to_u64(b)), b);
        }
    }
}
