//! The BWT-DP engine (C3): a depth-first traversal of the implicit suffix
//! trie of the database, carrying an affine-gap DP column over the query
//! at every node, pruned by a score upper bound.
//!
//! This is the novel part of the algorithm: rather than scanning the
//! database, each trie node is an SA range (a set of database positions
//! sharing a common suffix read backwards) and each step prepends one of
//! the four bases, refining both the SA range (via [`FmIndex::extend`])
//! and the DP column in lockstep.

use crate::character::Base;
use crate::error::ArenaOverflow;
use crate::fm_index::{FmIndex, SaRange};
use crate::util;

const NEG_INF: i64 = i64::MIN / 4;

/// Default ceiling on matched-substring depth (`BWTDP_MAX_SUBSTRING_LENGTH`),
/// bounding both recursion depth and the info word's depth field.
pub const DEFAULT_MAX_SUBSTRING_LENGTH: u32 = 64;

/// Affine-gap scoring parameters. Gap costs are stored positive and
/// subtracted, matching the convention in the specification this engine
/// implements.
#[derive(Debug, Clone, Copy)]
pub struct DpParams {
    pub match_reward: i64,
    pub mismatch_penalty: i64,
    pub gap_open: i64,
    pub gap_extend: i64,
    /// The minimum raw score a traversal leaf must reach to be emitted.
    pub cutoff: i64,
    /// `BWTDP_MAX_SUBSTRING_LENGTH`: the maximum matched-substring depth.
    pub max_substring_length: u32,
}

impl DpParams {
    /// Match/mismatch score for one aligned column. Shared with the gapped
    /// extender (C5), which reuses the same affine scoring scheme against
    /// the packed database text.
    pub(crate) fn score(&self, a: Base, b: Base) -> i64 {
        if a == b {
            self.match_reward
        } else {
            self.mismatch_penalty
        }
    }

    /// Query-side masking hook: a masked query position (soft-masked under
    /// `-U`, or flagged by DUST under `-F`) can never register as a match,
    /// matching the original tool's treatment of masked regions as
    /// non-contributing during the search phase.
    pub(crate) fn score_query_masked(&self, a: Base, b: Base, masked: bool) -> i64 {
        if masked {
            self.mismatch_penalty
        } else {
            self.score(a, b)
        }
    }

    pub(crate) fn depth_bits(&self) -> u32 {
        util::ceil_log2_usize(self.max_substring_length as usize).max(1)
    }
}

/// One emitted leaf: an SA range whose best local alignment to the query
/// reached the cutoff, plus the query positions ("DP points") that
/// achieved the maximum and will seed gapped extension.
///
/// `dp_points` are forward-query coordinates: the leftmost query position
/// covered by a maximal-scoring alignment that uses (a prefix of) this
/// node's matched substring. They are seeds only — the gapped extender
/// (C5) re-derives the exact alignment boundary against the real packed
/// database text.
#[derive(Debug, Clone)]
pub struct SaHit {
    pub range: SaRange,
    pub depth: u32,
    pub info: u32,
    pub best_score: i64,
    pub dp_points: Vec<usize>,
}

/// Per-traversal counters, published for diagnostics; they never affect
/// correctness.
#[derive(Debug, Clone, Copy, Default)]
pub struct DpStatistics {
    pub nodes_visited: u64,
    pub nodes_pruned: u64,
    pub leaves_emitted: u64,
}

/// Run the BWT-DP traversal over `index` for `rev_query` (the query,
/// already reversed by the caller), appending every surviving leaf to
/// `out`. `out` has a fixed capacity; once exhausted the traversal stops
/// and returns [`ArenaOverflow`] so the caller can retry with more room.
pub fn traverse(
    index: &FmIndex,
    rev_query: &[Base],
    rev_mask: &[bool],
    params: &DpParams,
    out: &mut Vec<SaHit>,
    out_capacity: usize,
    stats: &mut DpStatistics,
) -> Result<(), ArenaOverflow> {
    let n = rev_query.len();
    debug_assert_eq!(n, rev_mask.len());
    let depth_bits = params.depth_bits();

    // h_arena/e_arena hold one (n+1)-length column per stack frame,
    // stacked so entering a child pushes and leaving pops (per the
    // traversal's arena-stacked scratch-memory requirement).
    let mut h_arena: Vec<i64> = Vec::with_capacity((n + 1) * 8);
    let mut e_arena: Vec<i64> = Vec::with_capacity((n + 1) * 8);

    h_arena.extend(std::iter::repeat_n(0i64, n + 1));
    e_arena.extend(std::iter::repeat_n(NEG_INF, n + 1));

    struct Frame {
        range: SaRange,
        depth: u32,
        h_base: usize,
        // Index into `children()` of the next child to visit (0..4).
        next_child: u8,
    }

    let mut group_counter: u32 = 0;
    let mut stack = vec![Frame {
        range: SaRange::full(index.len()),
        depth: 0,
        h_base: 0,
        next_child: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next_child == 0 {
            stats.nodes_visited += 1;
        }

        if frame.next_child == Base::ALPHABET.len() as u8 || frame.depth >= params.max_substring_length
        {
            // Leaf: either every child has been explored, or the depth
            // budget is exhausted. Emit if this node's best score reached
            // the cutoff.
            let h = &h_arena[frame.h_base..frame.h_base + n + 1];
            let best_score = *h.iter().max().unwrap_or(&0);
            if best_score >= params.cutoff && !frame.range.is_empty() {
                // `k` indexes `rev_query` (a prefix length); converted here
                // to the corresponding forward-query coordinate so callers
                // never need to know about the engine's reversed traversal
                // order. `k == 0` (the trivial all-gap column) never beats
                // a positive cutoff and is naturally excluded.
                let dp_points: Vec<usize> = h
                    .iter()
                    .enumerate()
                    .filter(|&(k, &v)| v == best_score && k > 0)
                    .map(|(k, _)| n - k)
                    .collect();
                let info = util::pack_depth_group(frame.depth, group_counter, depth_bits);
                group_counter = group_counter.wrapping_add(1);
                if out.len() >= out_capacity {
                    return Err(ArenaOverflow {
                        needed_at_least: out.len() + 1,
                    });
                }
                out.push(SaHit {
                    range: frame.range,
                    depth: frame.depth,
                    info,
                    best_score,
                    dp_points,
                });
                stats.leaves_emitted += 1;
            }
            h_arena.truncate(frame.h_base);
            e_arena.truncate(frame.h_base);
            stack.pop();
            continue;
        }

        let c = Base::ALPHABET[frame.next_child as usize];
        frame.next_child += 1;

        let child_range = index.extend(frame.range, c);
        if child_range.is_empty() {
            continue;
        }

        let child_depth = frame.depth + 1;
        let parent_h_base = frame.h_base;

        // Prune before doing any DP work for this child: the upper bound
        // only needs the parent's column, not the child's.
        if is_pruned(&h_arena[parent_h_base..parent_h_base + n + 1], child_depth, params) {
            stats.nodes_pruned += 1;
            continue;
        }

        let child_h_base = h_arena.len();
        h_arena.extend(std::iter::repeat_n(0i64, n + 1));
        e_arena.extend(std::iter::repeat_n(NEG_INF, n + 1));

        compute_column(
            rev_query,
            rev_mask,
            c,
            params,
            &h_arena[parent_h_base..parent_h_base + n + 1].to_vec(),
            &e_arena[parent_h_base..parent_h_base + n + 1].to_vec(),
            &mut h_arena[child_h_base..child_h_base + n + 1],
            &mut e_arena[child_h_base..child_h_base + n + 1],
        );

        stack.push(Frame {
            range: child_range,
            depth: child_depth,
            h_base: child_h_base,
            next_child: 0,
        });
    }

    Ok(())
}

/// Gotoh's affine-gap column recurrence for one extension step: `f` is
/// the gap-in-database term (moves along the query without advancing the
/// database), `e` is the gap-in-query term (carried from the parent
/// column, same query position, one more database character).
fn compute_column(
    rev_query: &[Base],
    rev_mask: &[bool],
    c: Base,
    params: &DpParams,
    parent_h: &[i64],
    parent_e: &[i64],
    h: &mut [i64],
    e: &mut [i64],
) {
    h[0] = 0;
    e[0] = NEG_INF;
    let mut f_prev = NEG_INF;
    for k in 1..=rev_query.len() {
        let diag = parent_h[k - 1]
            .saturating_add(params.score_query_masked(c, rev_query[k - 1], rev_mask[k - 1]));
        let e_k = (parent_h[k] - params.gap_open).max(parent_e[k] - params.gap_extend);
        let f_k = (h[k - 1] - params.gap_open).max(f_prev - params.gap_extend);
        let h_k = diag.max(e_k).max(f_k).max(0);
        h[k] = h_k;
        e[k] = e_k;
        f_prev = f_k;
    }
}

/// `S* + B(d,q) <= cutoff` for every alive cell: the node cannot possibly
/// reach the cutoff by extending further, so its subtree is skipped.
fn is_pruned(parent_h: &[i64], depth: u32, params: &DpParams) -> bool {
    let n = parent_h.len() - 1;
    let remaining_depth = params.max_substring_length.saturating_sub(depth) as usize;
    for (k, &h) in parent_h.iter().enumerate() {
        let remaining_query = n - k;
        let reach = remaining_depth.min(remaining_query);
        let bound = params.match_reward * reach as i64;
        if h + bound > params.cutoff {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::DnaConverter;

    fn encode(s: &str) -> Vec<Base> {
        s.bytes().map(|b| Base::from_ascii(b).unwrap()).collect()
    }

    fn fixture(s: &str) -> FmIndex<DnaConverter> {
        let mut text = encode(s);
        text.push(Base::A);
        FmIndex::build(&text, DnaConverter, 0)
    }

    fn default_params(cutoff: i64) -> DpParams {
        DpParams {
            match_reward: 1,
            mismatch_penalty: -3,
            gap_open: 5,
            gap_extend: 2,
            cutoff,
            max_substring_length: 32,
        }
    }

    #[test]
    fn finds_exact_match_as_a_leaf() {
        let index = fixture("ACGTACGTACGT");
        let query: Vec<Base> = encode("ACGT");
        let rev_query: Vec<Base> = query.iter().rev().copied().collect();
        let rev_mask = vec![false; rev_query.len()];
        let params = default_params(4);

        let mut out = Vec::new();
        let mut stats = DpStatistics::default();
        traverse(&index, &rev_query, &rev_mask, &params, &mut out, 1024, &mut stats).unwrap();

        assert!(out.iter().any(|hit| hit.best_score >= 4));
        assert!(stats.nodes_visited > 0);
    }

    #[test]
    fn high_cutoff_prunes_everything() {
        let index = fixture("ACGTACGTACGT");
        let query: Vec<Base> = encode("ACGT");
        let rev_query: Vec<Base> = query.iter().rev().copied().collect();
        let rev_mask = vec![false; rev_query.len()];
        let params = default_params(1000);

        let mut out = Vec::new();
        let mut stats = DpStatistics::default();
        traverse(&index, &rev_query, &rev_mask, &params, &mut out, 1024, &mut stats).unwrap();

        assert!(out.is_empty());
        assert!(stats.nodes_pruned > 0);
    }

    #[test]
    fn overflow_signals_needed_capacity() {
        let index = fixture("ACGTACGTACGTACGTACGTACGT");
        let query: Vec<Base> = encode("ACGT");
        let rev_query: Vec<Base> = query.iter().rev().copied().collect();
        let rev_mask = vec![false; rev_query.len()];
        let params = default_params(1);

        let mut out = Vec::new();
        let mut stats = DpStatistics::default();
        let err = traverse(&index, &rev_query, &rev_mask, &params, &mut out, 0, &mut stats).unwrap_err();
        assert!(err.needed_at_least >= 1);
    }

    #[test]
    fn masked_query_position_never_scores_as_a_match() {
        let index = fixture("ACGTACGTACGT");
        let query: Vec<Base> = encode("ACGT");
        let rev_query: Vec<Base> = query.iter().rev().copied().collect();
        // Mask every query position: even a perfect database match can no
        // longer reach a positive-cutoff score.
        let rev_mask = vec![true; rev_query.len()];
        let params = default_params(1);

        let mut out = Vec::new();
        let mut stats = DpStatistics::default();
        traverse(&index, &rev_query, &rev_mask, &params, &mut out, 1024, &mut stats).unwrap();

        assert!(out.is_empty());
    }
}
