//! The FM-Index primitive (C2): backward-search extension, rank/occ via a
//! wavelet-matrix BWT, and SA-range to text-position decoding.

use crate::character::Base;
use crate::converter::{Converter, DnaConverter};
use crate::error::ArenaOverflow;
use crate::suffix_array::sais;
use crate::suffix_array::sample::SuffixOrderSampledArray;
use crate::util;

use serde::{Deserialize, Serialize};
use vers_vecs::WaveletMatrix;

/// A closed SA interval `[lo, hi]`. Empty when `hi < lo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaRange {
    pub lo: usize,
    pub hi: usize,
}

impl SaRange {
    pub fn full(n: usize) -> SaRange {
        if n == 0 {
            SaRange::empty()
        } else {
            SaRange { lo: 0, hi: n - 1 }
        }
    }

    pub fn empty() -> SaRange {
        SaRange { lo: 1, hi: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.hi < self.lo
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.hi - self.lo + 1
        }
    }
}

/// An FM-Index over the packed-DNA alphabet.
#[derive(Serialize, Deserialize)]
pub struct FmIndex<C = DnaConverter> {
    bw: WaveletMatrix,
    cs: Vec<usize>,
    converter: C,
    suffix_array: SuffixOrderSampledArray,
}

impl<C> FmIndex<C>
where
    C: Converter<Char = Base>,
{
    /// Build an index from `text` (which must end with a single sentinel
    /// position, conventionally `Base::A`, excluded from scoring) and a
    /// suffix-array sampling level. The production path loads a pre-built
    /// index (C1); this entrypoint exists for test fixtures and for the
    /// (out-of-scope) offline builder to target.
    pub fn build(text: &[Base], converter: C, sampling_level: usize) -> Self {
        let cs = sais::get_bucket_start_pos(&sais::count_chars(text, &converter));
        let sa = sais::build_suffix_array(text, &converter);
        let bw = Self::wavelet_matrix(text, &sa, &converter);
        let suffix_array = SuffixOrderSampledArray::sample(&sa, sampling_level);

        FmIndex {
            cs,
            bw,
            converter,
            suffix_array,
        }
    }

    fn wavelet_matrix(text: &[Base], sa: &[usize], converter: &C) -> WaveletMatrix {
        let n = text.len();
        let mut bw = vec![0; n];
        for (i, &k) in sa.iter().enumerate() {
            bw[i] = converter.to_u64(text[util::modular_sub(k, 1, n)]);
        }

        WaveletMatrix::from_slice(
            &bw,
            (util::log2(converter.to_u64(converter.max_value())) + 1) as u16,
        )
    }

    /// Length of the indexed text, including the sentinel.
    pub fn len(&self) -> usize {
        self.bw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bw.len() == 0
    }

    fn get_l(&self, i: usize) -> Base {
        self.converter.from_u64(self.bw.get_u64_unchecked(i))
    }

    fn lf_map(&self, i: usize) -> usize {
        let c = self.get_l(i);
        self.lf_map2(c, i)
    }

    fn lf_map2(&self, c: Base, i: usize) -> usize {
        self.cs[self.converter.to_usize(c)] + self.bw.rank_u64_unchecked(i, self.converter.to_u64(c))
    }

    /// `extend(range, c)`: the backward-search step. Given the SA interval
    /// for a substring `w`, returns the SA interval for `cw`.
    pub fn extend(&self, range: SaRange, c: Base) -> SaRange {
        if range.is_empty() {
            return SaRange::empty();
        }
        let s = self.lf_map2(c, range.lo);
        let e = self.lf_map2(c, range.hi + 1);
        if e > s {
            SaRange { lo: s, hi: e - 1 }
        } else {
            SaRange::empty()
        }
    }

    /// `sa_of(i)`: follow the LF-mapping until a sampled SA entry is
    /// reached, recovering the text position of SA row `i`.
    pub fn sa_of(&self, mut i: usize) -> usize {
        let mut steps = 0;
        loop {
            match self.suffix_array.get(i) {
                Some(sa) => return (sa + steps) % self.bw.len(),
                None => {
                    i = self.lf_map(i);
                    steps += 1;
                }
            }
        }
    }

    /// `decode_range(range, out)`: enumerate every text position in
    /// `range` into `out`. Bounded by `out`'s capacity; on overflow
    /// returns the shortfall so the caller can retry with a larger arena.
    pub fn decode_range(&self, range: SaRange, out: &mut [usize]) -> Result<usize, ArenaOverflow> {
        let n = range.len();
        if n > out.len() {
            return Err(ArenaOverflow {
                needed_at_least: n,
            });
        }
        for (k, i) in (range.lo..=range.hi).enumerate() {
            out[k] = self.sa_of(i);
        }
        Ok(n)
    }

    pub fn heap_size(&self) -> usize {
        self.bw.heap_size()
            + self.cs.capacity() * std::mem::size_of::<usize>()
            + self.suffix_array.heap_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::DnaConverter;

    fn encode(s: &str) -> Vec<Base> {
        s.bytes().map(|b| Base::from_ascii(b).unwrap()).collect()
    }

    /// `sais` requires a text ending in a single "lowest" sentinel; tests
    /// use `A` (code 0) as the sentinel and never embed it elsewhere.
    fn fixture(s: &str) -> FmIndex<DnaConverter> {
        let mut text = encode(s);
        text.push(Base::A);
        FmIndex::build(&text, DnaConverter, 0)
    }

    #[test]
    fn extend_finds_known_substring() {
        let index = fixture("GATTACA");
        let mut range = SaRange::full(index.len());
        for &c in encode("ATTAC").iter().rev() {
            range = index.extend(range, c);
            assert!(!range.is_empty());
        }
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn extend_rejects_absent_substring() {
        let index = fixture("GATTACA");
        let mut range = SaRange::full(index.len());
        for &c in encode("GGGG").iter().rev() {
            range = index.extend(range, c);
        }
        assert!(range.is_empty());
    }

    #[test]
    fn sa_of_matches_naive_positions() {
        let text = "GATTACAGATCACA";
        let index = fixture(text);
        let mut full_text = encode(text);
        full_text.push(Base::A);

        let mut range = SaRange::full(index.len());
        for &c in encode("ATCACA").iter().rev() {
            range = index.extend(range, c);
        }
        assert!(!range.is_empty());

        let mut out = vec![0usize; range.len()];
        let n = index.decode_range(range, &mut out).unwrap();
        assert_eq!(n, out.len());

        for &pos in &out {
            assert_eq!(&full_text[pos..pos + 6], encode("ATCACA").as_slice());
        }
    }

    #[test]
    fn decode_range_signals_overflow() {
        let index = fixture("GATTACA");
        let range = SaRange::full(index.len());
        let mut out = vec![0usize; 1];
        let err = index.decode_range(range, &mut out).unwrap_err();
        assert_eq!(err.needed_at_least, range.len());
    }
}
