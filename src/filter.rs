//! The Filter & Ranker (C6): deduplicates overlapping gapped hits, ranks
//! subjects by their best surviving score, and produces the final emission
//! order for one query.

use crate::annotation::AnnotationTable;
use crate::extend::GappedHit;
use crate::query::Context;
use crate::util;

/// Fraction of the shorter interval that two alignments must share, on
/// both the query and the text axis, to be considered the same hit for
/// dedup purposes. `spec.md` §4.6 leaves the exact criterion
/// implementation-defined; see `DESIGN.md` for the rationale.
const OVERLAP_FRACTION: f64 = 0.5;

/// A [`GappedHit`] tagged with the context it was found in, carried
/// through filtering and ranking so the final composite sort key can
/// incorporate strand.
#[derive(Debug, Clone)]
pub struct ContextHit {
    pub hit: GappedHit,
    pub context: Context,
    /// `rank | (context_tag << (32 - CONTEXT_BIT_WIDTH))`, per §6's bit
    /// layout; filled in by [`rank_and_sort`].
    pub sort_key: u32,
}

const CONTEXT_BIT_WIDTH: u32 = 1;

/// Run the full C6 pipeline over every gapped hit surviving C5 for one
/// query: overlap dedup per (subject, context), best-per-subject ranking,
/// and the final composite-key sort.
pub fn filter_and_rank(
    hits: Vec<(GappedHit, Context)>,
    annotation: &AnnotationTable,
) -> Vec<ContextHit> {
    let deduped = overlap_dedup(hits);
    rank_and_sort(deduped, annotation)
}

/// Stage 1: among hits sharing a (subject, context), discard any hit whose
/// alignment interval overlaps, on both query and text axes, a
/// higher-scoring hit already kept by at least [`OVERLAP_FRACTION`] of the
/// shorter interval's length.
fn overlap_dedup(mut hits: Vec<(GappedHit, Context)>) -> Vec<(GappedHit, Context)> {
    hits.sort_by(|a, b| b.0.raw_score.cmp(&a.0.raw_score));

    let mut kept: Vec<(GappedHit, Context)> = Vec::with_capacity(hits.len());
    'next_hit: for (hit, ctx) in hits {
        for (kept_hit, kept_ctx) in &kept {
            if kept_hit.db_seq_index != hit.db_seq_index || *kept_ctx != ctx {
                continue;
            }
            let text_overlap = interval_overlap_fraction(
                kept_hit.text_start,
                kept_hit.text_end,
                hit.text_start,
                hit.text_end,
            );
            let query_overlap = interval_overlap_fraction(
                kept_hit.query_start,
                kept_hit.query_end,
                hit.query_start,
                hit.query_end,
            );
            if text_overlap >= OVERLAP_FRACTION && query_overlap >= OVERLAP_FRACTION {
                continue 'next_hit;
            }
        }
        kept.push((hit, ctx));
    }
    kept
}

/// Fraction of the shorter of the two intervals covered by their
/// intersection.
fn interval_overlap_fraction(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> f64 {
    let lo = a_start.max(b_start);
    let hi = a_end.min(b_end);
    if hi <= lo {
        return 0.0;
    }
    let overlap = (hi - lo) as f64;
    let shorter = (a_end - a_start).min(b_end - b_start).max(1) as f64;
    overlap / shorter
}

/// Stage 2+3: best-per-subject aggregation, dense subject ranking by
/// descending best score, and the final (rank+context, -score, text_pos)
/// sort.
fn rank_and_sort(
    hits: Vec<(GappedHit, Context)>,
    annotation: &AnnotationTable,
) -> Vec<ContextHit> {
    let num_subjects = annotation.subjects().len();
    let mut best_score_per_subject = vec![i64::MIN; num_subjects];
    for (hit, _) in &hits {
        let slot = &mut best_score_per_subject[hit.db_seq_index];
        if hit.raw_score > *slot {
            *slot = hit.raw_score;
        }
    }

    // Dense rank: subject index -> rank, 0 = best.
    let mut subject_order: Vec<usize> = (0..num_subjects)
        .filter(|&i| best_score_per_subject[i] != i64::MIN)
        .collect();
    subject_order.sort_by(|&a, &b| best_score_per_subject[b].cmp(&best_score_per_subject[a]));

    let mut rank_of = vec![0u32; num_subjects];
    for (rank, &subject_idx) in subject_order.iter().enumerate() {
        rank_of[subject_idx] = rank as u32;
    }

    let mut out: Vec<ContextHit> = hits
        .into_iter()
        .map(|(hit, context)| {
            let rank = rank_of[hit.db_seq_index];
            let sort_key = util::pack_rank_context(rank, context.tag(), CONTEXT_BIT_WIDTH);
            ContextHit {
                hit,
                context,
                sort_key,
            }
        })
        .collect();

    out.sort_by(|a, b| {
        a.sort_key
            .cmp(&b.sort_key)
            .then_with(|| b.hit.raw_score.cmp(&a.hit.raw_score))
            .then_with(|| a.hit.text_start.cmp(&b.hit.text_start))
    });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Subject;

    fn subject_table() -> AnnotationTable {
        AnnotationTable::new(vec![
            Subject {
                name: "s1".into(),
                offset: 0,
                length: 100,
            },
            Subject {
                name: "s2".into(),
                offset: 100,
                length: 100,
            },
        ])
    }

    fn hit(db_seq_index: usize, text_range: (usize, usize), query_range: (usize, usize), score: i64) -> GappedHit {
        GappedHit {
            text_start: text_range.0,
            text_end: text_range.1,
            query_start: query_range.0,
            query_end: query_range.1,
            raw_score: score,
            bit_score: score as f64,
            e_value: 1e-10,
            db_seq_index,
            edits: vec![],
        }
    }

    #[test]
    fn overlapping_hits_keep_only_the_best() {
        let hits = vec![
            (hit(0, (0, 20), (0, 20), 20), Context::Forward),
            (hit(0, (2, 22), (2, 22), 15), Context::Forward),
        ];
        let deduped = overlap_dedup(hits);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].0.raw_score, 20);
    }

    #[test]
    fn non_overlapping_hits_are_both_kept() {
        let hits = vec![
            (hit(0, (0, 10), (0, 10), 10), Context::Forward),
            (hit(0, (50, 60), (50, 60), 8), Context::Forward),
        ];
        let deduped = overlap_dedup(hits);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn different_contexts_do_not_dedup_against_each_other() {
        let hits = vec![
            (hit(0, (0, 20), (0, 20), 20), Context::Forward),
            (hit(0, (0, 20), (0, 20), 18), Context::ReverseComplement),
        ];
        let deduped = overlap_dedup(hits);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn subjects_are_ranked_by_best_score_descending() {
        let annotation = subject_table();
        let hits = vec![
            (hit(1, (100, 120), (0, 20), 10), Context::Forward),
            (hit(0, (0, 30), (0, 30), 30), Context::Forward),
        ];
        let ranked = filter_and_rank(hits, &annotation);
        assert_eq!(ranked[0].hit.db_seq_index, 0);
        assert_eq!(ranked[1].hit.db_seq_index, 1);
    }

    #[test]
    fn final_order_breaks_ties_by_score_then_text_pos() {
        let annotation = subject_table();
        let hits = vec![
            (hit(0, (40, 60), (0, 20), 20), Context::Forward),
            (hit(0, (0, 20), (30, 50), 20), Context::Forward),
        ];
        let ranked = filter_and_rank(hits, &annotation);
        assert_eq!(ranked[0].hit.text_start, 0);
        assert_eq!(ranked[1].hit.text_start, 40);
    }
}
