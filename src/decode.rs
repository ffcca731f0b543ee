//! The Hit Decoder (C4): turns every SA range emitted by the BWT-DP engine
//! (C3) into concrete text positions, adjusts each for the matched
//! substring's depth, and orders them for the gapped extender.

use crate::dp::SaHit;
use crate::error::ArenaOverflow;
use crate::fm_index::FmIndex;
use crate::util;

/// One decoded match: a concrete database position paired with the query
/// coordinate and info word it was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub text_pos: usize,
    pub query_pos: usize,
    pub depth: u32,
    pub group: u32,
}

/// Decode every [`SaHit`] in `hits` into [`Hit`]s, one per `(text position,
/// DP point)` pair, and sort the result by descending text position (the
/// order the gapped extender expects so adjacent hits share packed-DNA
/// cache lines).
///
/// `scratch` is reused across calls as the caller-owned working buffer for
/// [`FmIndex::decode_range`]; on overflow the caller is expected to grow it
/// and retry, per the working-memory-exhaustion contract shared with C3.
pub fn decode_hits(
    index: &FmIndex,
    hits: &[SaHit],
    depth_bits: u32,
    scratch: &mut Vec<usize>,
) -> Result<Vec<Hit>, ArenaOverflow> {
    let mut out = Vec::new();
    for sa_hit in hits {
        let (depth, group) = util::unpack_depth_group(sa_hit.info, depth_bits);
        debug_assert_eq!(depth, sa_hit.depth);

        let n = sa_hit.range.len();
        if scratch.len() < n {
            scratch.resize(n, 0);
        }
        let decoded = index.decode_range(sa_hit.range, &mut scratch[..n])?;
        debug_assert_eq!(decoded, n);

        for &text_pos in &scratch[..n] {
            // `FmIndex::sa_of` already resolves to the canonical start of
            // the matched substring in forward-text coordinates (verified
            // in `fm_index`'s own tests), so no further depth adjustment is
            // needed here; `depth` is only carried through for diagnostics
            // and for `group` recovery.
            for &query_pos in &sa_hit.dp_points {
                out.push(Hit {
                    text_pos,
                    query_pos,
                    depth,
                    group,
                });
            }
        }
    }

    out.sort_unstable_by(|a, b| b.text_pos.cmp(&a.text_pos));
    Ok(out)
}
