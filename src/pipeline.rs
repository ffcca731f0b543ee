//! Per-query orchestration (`spec.md` §4.8): the state machine that drives
//! one query FASTA record through masking, the BWT-DP engine (C3), hit
//! decoding (C4), gapped extension (C5), and filtering/ranking (C6), then
//! hands the result to the output formatter (C7).
//!
//! A [`Pipeline`] owns the two private working arenas named in §5's
//! shared-resource policy (`sa_hits`, `decode_scratch`); their *contents*
//! are reset at every query boundary, though the backing allocation is kept
//! around across queries as a straightforward capacity optimization.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::time::Instant;

use log::{debug, info};

use crate::character::Base;
use crate::config::Parameters;
use crate::decode;
use crate::dp::{self, DpParams, DpStatistics};
use crate::error::{Error, Result};
use crate::extend;
use crate::filter;
use crate::index::Index;
use crate::mask;
use crate::output;
use crate::query::{Context, FastaReader, QueryRecord};
use crate::stats::{EvalueHistogram, StatParams};
use crate::util;

const INITIAL_SA_HIT_CAPACITY: usize = 1024;
const MAX_SA_HIT_CAPACITY: usize = 1 << 20;

/// DUST window/level: the masker's own interface takes these as plain
/// parameters (`src/mask.rs`); the original tool's defaults are out of
/// scope, so these are this crate's own choice, recorded in `DESIGN.md`.
const DUST_WINDOW: usize = 64;
const DUST_LEVEL: f64 = 20.0;

/// Aggregate counters accumulated across every query in a run, standing in
/// for the original driver's performance-statistics block
/// (`totalSaIndexRange`, `totalHitGenerated`, `totalUniqueGappedHit`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStatistics {
    pub queries_processed: u64,
    pub total_sa_index_range: u64,
    pub total_hit_generated: u64,
    pub total_unique_gapped_hit: u64,
    pub total_nodes_visited: u64,
    pub total_nodes_pruned: u64,
    pub elapsed_secs: f64,
}

impl RunStatistics {
    fn accumulate(&mut self, dp_stats: &DpStatistics) {
        self.total_nodes_visited += dp_stats.nodes_visited;
        self.total_nodes_pruned += dp_stats.nodes_pruned;
    }

    /// A short human-readable report, printed at end of run when requested.
    pub fn summary(&self) -> String {
        format!(
            "queries: {}\nSA index ranges decoded: {}\nhits generated: {}\nunique gapped hits: {}\nnodes visited: {}\nnodes pruned: {}\nelapsed: {:.3}s",
            self.queries_processed,
            self.total_sa_index_range,
            self.total_hit_generated,
            self.total_unique_gapped_hit,
            self.total_nodes_visited,
            self.total_nodes_pruned,
            self.elapsed_secs,
        )
    }
}

/// Drives one or many queries against a loaded [`Index`] under one
/// [`Parameters`] configuration. Not `Sync`: a server handles one
/// connection to completion before accepting the next (`spec.md` §5), so a
/// fresh `Pipeline` (or a reused one) is only ever touched by one thread at
/// a time.
pub struct Pipeline<'a> {
    index: &'a Index,
    params: &'a Parameters,
    stat_params: StatParams,
    histogram: Option<EvalueHistogram>,
    sa_hits: Vec<dp::SaHit>,
    decode_scratch: Vec<usize>,
    sa_hit_capacity: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(index: &'a Index, params: &'a Parameters) -> Pipeline<'a> {
        Pipeline {
            index,
            params,
            stat_params: StatParams::for_scores(params.match_reward, params.mismatch_penalty),
            histogram: None,
            sa_hits: Vec::new(),
            decode_scratch: Vec::new(),
            sa_hit_capacity: INITIAL_SA_HIT_CAPACITY,
        }
    }

    /// Enable the end-of-run E-value histogram (supplemented feature).
    pub fn with_histogram(mut self, e_min: f64, num_buckets: usize) -> Pipeline<'a> {
        self.histogram = Some(EvalueHistogram::new(e_min, self.params.evalue, num_buckets));
        self
    }

    pub fn histogram(&self) -> Option<&EvalueHistogram> {
        self.histogram.as_ref()
    }

    /// Run every record read from `query_reader` through the full pipeline,
    /// writing the primary report to `primary_out`, the secondary pairwise
    /// alignment block (always pairwise format, per `spec.md` §4.7) to
    /// `align_out` when present, and one timing line per query to
    /// `time_log` when present. Terminal on EOF, matching the per-query
    /// state machine in `spec.md` §4.8.
    pub fn run<R: BufRead>(
        &mut self,
        query_reader: R,
        primary_out: &mut dyn Write,
        mut align_out: Option<&mut dyn Write>,
        mut time_log: Option<&mut dyn Write>,
    ) -> Result<RunStatistics> {
        let mut run_stats = RunStatistics::default();

        for record in FastaReader::new(query_reader) {
            let mut record = record?;
            let start = Instant::now();
            let unmasked = self.run_record(
                &mut record,
                primary_out,
                align_out.as_deref_mut(),
                &mut run_stats,
            )?;
            let elapsed = start.elapsed();
            run_stats.queries_processed += 1;
            run_stats.elapsed_secs += elapsed.as_secs_f64();

            if let Some(w) = time_log.as_deref_mut() {
                writeln!(
                    w,
                    "bwtsw\t{}\t{:.3}\t{}",
                    record.name,
                    elapsed.as_secs_f64(),
                    unmasked
                )
                .map_err(|e| Error::io("time log", e))?;
            }
        }

        Ok(run_stats)
    }

    /// `parse-header → parse-sequence` already happened in the caller's
    /// `FastaReader`; this runs the rest of one query's state machine:
    /// `mask → encode → for each context {setup → BWT-DP → decode → extend
    /// → filter} → rank → emit → reset arenas`. Returns the query's
    /// unmasked character count, for the timing log.
    fn run_record(
        &mut self,
        record: &mut QueryRecord,
        primary_out: &mut dyn Write,
        align_out: Option<&mut dyn Write>,
        run_stats: &mut RunStatistics,
    ) -> Result<usize> {
        let db_len = self.index.annotation.total_length();
        let query_len = record.len();

        let mut context_hits: Vec<(extend::GappedHit, Context)> = Vec::new();
        let mut bases_forward: Option<Vec<Base>> = None;
        let mut bases_reverse: Option<Vec<Base>> = None;
        let mut masked_count = 0usize;

        for &context in self.params.strand.contexts() {
            if context == Context::ReverseComplement {
                record.reverse_complement_in_place();
            }

            let dust = if self.params.dust {
                mask::dust_mask(&record.bases, DUST_WINDOW, DUST_LEVEL)
            } else {
                vec![false; record.len()]
            };
            // Non-ACGT query positions (`N`, IUPAC codes) were parsed as a
            // `Base::A` placeholder and must never score as a real match,
            // regardless of `-U`/`-F` — otherwise an all-`N` query collapses
            // to an all-`A` query and hits A-runs in the database.
            let combined_mask: Vec<bool> = (0..record.len())
                .map(|i| {
                    (self.params.soft_mask && record.soft_mask[i]) || dust[i] || record.ambiguous[i]
                })
                .collect();
            masked_count += combined_mask.iter().filter(|&&m| m).count();

            let cutoff = self
                .stat_params
                .cutoff_score(self.params.evalue, db_len, query_len)?;
            let dp_params = DpParams {
                match_reward: self.params.match_reward as i64,
                mismatch_penalty: self.params.mismatch_penalty as i64,
                gap_open: self.params.gap_open as i64,
                gap_extend: self.params.gap_extend as i64,
                cutoff,
                max_substring_length: dp::DEFAULT_MAX_SUBSTRING_LENGTH,
            };
            let depth_bits = dp_params.depth_bits();

            let rev_query: Vec<Base> = record.bases.iter().rev().copied().collect();
            let rev_mask: Vec<bool> = combined_mask.iter().rev().copied().collect();

            let mut dp_stats = DpStatistics::default();
            self.sa_hits.clear();
            loop {
                self.sa_hits.clear();
                match dp::traverse(
                    &self.index.fm_index,
                    &rev_query,
                    &rev_mask,
                    &dp_params,
                    &mut self.sa_hits,
                    self.sa_hit_capacity,
                    &mut dp_stats,
                ) {
                    Ok(()) => break,
                    Err(overflow) => {
                        if self.sa_hit_capacity >= MAX_SA_HIT_CAPACITY {
                            return Err(Error::WorkingMemoryExhausted {
                                needed: overflow.needed_at_least,
                                cap: MAX_SA_HIT_CAPACITY,
                            });
                        }
                        self.sa_hit_capacity = (overflow.needed_at_least * 2)
                            .max(self.sa_hit_capacity * 2)
                            .min(MAX_SA_HIT_CAPACITY);
                    }
                }
            }
            run_stats.accumulate(&dp_stats);
            run_stats.total_sa_index_range +=
                self.sa_hits.iter().map(|h| h.range.len() as u64).sum::<u64>();

            let score_by_info: HashMap<u32, i64> = self
                .sa_hits
                .iter()
                .map(|h| (h.info, h.best_score))
                .collect();

            let decoded = loop {
                match decode::decode_hits(
                    &self.index.fm_index,
                    &self.sa_hits,
                    depth_bits,
                    &mut self.decode_scratch,
                ) {
                    Ok(hits) => break hits,
                    Err(overflow) => {
                        self.decode_scratch.resize(overflow.needed_at_least, 0);
                    }
                }
            };
            run_stats.total_hit_generated += decoded.len() as u64;

            for hit in &decoded {
                let info = util::pack_depth_group(hit.depth, hit.group, depth_bits);
                let seed_score = score_by_info.get(&info).copied().unwrap_or(0);
                if let Some(gapped) = extend::extend_hit(
                    hit,
                    seed_score,
                    &record.bases,
                    &self.index.packed_dna,
                    &self.index.annotation,
                    &dp_params,
                    &self.stat_params,
                    db_len,
                    self.params.evalue,
                ) {
                    context_hits.push((gapped, context));
                }
            }

            match context {
                Context::Forward => bases_forward = Some(record.bases.clone()),
                Context::ReverseComplement => bases_reverse = Some(record.bases.clone()),
            }

            if context == Context::ReverseComplement {
                // Restore forward orientation so a later context (or the
                // caller, once this record is done) sees the original read.
                record.reverse_complement_in_place();
            }
        }

        let ranked = filter::filter_and_rank(context_hits, &self.index.annotation);
        run_stats.total_unique_gapped_hit += ranked.len() as u64;

        if let Some(hist) = &mut self.histogram {
            for ch in &ranked {
                hist.record(ch.hit.e_value);
            }
        }

        output::write_query_hits(
            primary_out,
            self.params.format,
            &record.name,
            &ranked,
            &self.index.annotation,
        )?;

        if let Some(align_out) = align_out {
            for ch in &ranked {
                let subject = &self.index.annotation.subjects()[ch.hit.db_seq_index];
                let bases = match ch.context {
                    Context::Forward => bases_forward.as_ref(),
                    Context::ReverseComplement => bases_reverse.as_ref(),
                }
                .expect("context bases recorded during search");
                output::write_pairwise_alignment(
                    align_out,
                    &record.name,
                    bases,
                    &self.index.packed_dna,
                    ch,
                    &subject.name,
                )?;
            }
        }

        debug!(
            "query '{}': {} bases, {} masked, {} hits",
            record.name,
            query_len,
            masked_count,
            ranked.len()
        );
        info!(
            "query '{}' done: {} hits reported",
            record.name,
            ranked.len()
        );

        // `reset arenas`, the state machine's final step: the last
        // context's SA hits must not linger as "outstanding" once this
        // query is done, even though the backing allocation is kept.
        self.sa_hits.clear();

        Ok(query_len - masked_count.min(query_len))
    }
}
