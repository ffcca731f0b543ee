//! Suffix arrays: construction (used only to build index fixtures, since
//! the offline index builder itself is out of scope) and
//! the suffix-order sampling strategy used by the loaded index (C1/C2).

pub mod sais;
pub mod sample;

pub use sample::SuffixOrderSampledArray;
