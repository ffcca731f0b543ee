//! Significance statistics: raw score to bit score and E-value, and the
//! inverse (target E-value to cutoff raw score) that seeds the BWT-DP
//! engine's pruning bound.
//!
//! The real Karlin-Altschul parameter tables are out of scope (they are a
//! black-box library per the specification this crate implements); this
//! module is a from-scratch stand-in that honors the same interface:
//! ungapped-alignment statistics under a two-parameter (lambda, k) model,
//! computed from the scoring scheme and the uniform base composition
//! DUST and the extender assume.

use crate::error::Error;

/// The two Karlin-Altschul parameters for a given scoring scheme, plus the
/// relative entropy `h` used for the edge-effect length correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatParams {
    pub lambda: f64,
    pub k: f64,
    pub h: f64,
}

impl StatParams {
    /// Derive (lambda, k, h) for a uniform 4-letter alphabet under the
    /// given match/mismatch scores, by solving `sum_{a,b} p(a) p(b)
    /// exp(lambda * s(a,b)) = 1` numerically (bisection). `k` is fixed at
    /// a conventional 0.1, matching the range BLAST-family tools observe
    /// for DNA scoring schemes; an exact `k` requires the sum over
    /// alignment length that the excluded statistics library would supply.
    pub fn for_scores(match_reward: i32, mismatch_penalty: i32) -> StatParams {
        let p = 0.25_f64;
        let f = |lambda: f64| -> f64 {
            // 4 match pairs (prob p*p each) + 12 mismatch pairs.
            4.0 * p * p * (lambda * match_reward as f64).exp()
                + 12.0 * p * p * (lambda * mismatch_penalty as f64).exp()
        };

        let mut lo = 1e-6_f64;
        let mut hi = 2.0_f64;
        // f is monotonically increasing in lambda, and f(0) < 1 < f(hi)
        // for any valid scoring scheme (positive match, negative mismatch).
        for _ in 0..100 {
            let mid = (lo + hi) / 2.0;
            if f(mid) < 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let lambda = (lo + hi) / 2.0;

        let expected_score = 4.0 * p * p * match_reward as f64 + 12.0 * p * p * mismatch_penalty as f64;
        let h = lambda * expected_score;

        StatParams {
            lambda,
            k: 0.1,
            h: h.abs().max(1e-6),
        }
    }

    /// Convert a raw alignment score into a bit score.
    pub fn bit_score(&self, raw_score: i64) -> f64 {
        (self.lambda * raw_score as f64 - self.k.ln()) / std::f64::consts::LN_2
    }

    /// Expected number of equal-or-better scoring alignments by chance,
    /// given effective database and query lengths.
    pub fn e_value(&self, raw_score: i64, db_len: usize, query_len: usize) -> f64 {
        let effective_query_len = (query_len as f64 - (raw_score as f64) / self.h).max(1.0);
        let effective_db_len = (db_len as f64 - (raw_score as f64) / self.h).max(1.0);
        self.k * effective_query_len * effective_db_len * (-self.lambda * raw_score as f64).exp()
    }

    /// The smallest raw score whose E-value is at most `e_cutoff`, given
    /// effective search-space lengths. This seeds the BWT-DP pruning bound.
    pub fn cutoff_score(&self, e_cutoff: f64, db_len: usize, query_len: usize) -> Result<i64, Error> {
        if e_cutoff <= 0.0 {
            return Err(Error::Statistics(format!(
                "E-value cutoff must be positive, got {}",
                e_cutoff
            )));
        }
        // E(S) is monotonically decreasing in S; bisect for the crossing point.
        let mut lo = 0i64;
        let mut hi = 1i64;
        while self.e_value(hi, db_len, query_len) > e_cutoff && hi < (1 << 30) {
            hi *= 2;
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.e_value(mid, db_len, query_len) > e_cutoff {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(hi)
    }
}

/// A log-spaced histogram of E-values in `[e_min, e_cutoff]`, used to report
/// the score distribution of a run's final hits.
#[derive(Debug, Clone)]
pub struct EvalueHistogram {
    e_min: f64,
    e_cutoff: f64,
    buckets: Vec<u64>,
}

impl EvalueHistogram {
    pub fn new(e_min: f64, e_cutoff: f64, num_buckets: usize) -> EvalueHistogram {
        debug_assert!(e_min > 0.0 && e_min < e_cutoff);
        EvalueHistogram {
            e_min,
            e_cutoff,
            buckets: vec![0; num_buckets.max(1)],
        }
    }

    pub fn record(&mut self, e_value: f64) {
        let e_value = e_value.clamp(self.e_min, self.e_cutoff);
        let log_span = self.e_cutoff.ln() - self.e_min.ln();
        let frac = if log_span > 0.0 {
            (e_value.ln() - self.e_min.ln()) / log_span
        } else {
            0.0
        };
        let idx = ((frac * self.buckets.len() as f64) as usize).min(self.buckets.len() - 1);
        self.buckets[idx] += 1;
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_solves_moment_condition() {
        let params = StatParams::for_scores(1, -3);
        let p = 0.25_f64;
        let sum = 4.0 * p * p * params.lambda.exp() + 12.0 * p * p * (-3.0 * params.lambda).exp();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn e_value_decreases_with_score() {
        let params = StatParams::for_scores(1, -3);
        let e_low = params.e_value(10, 1000, 100);
        let e_high = params.e_value(50, 1000, 100);
        assert!(e_high < e_low);
    }

    #[test]
    fn cutoff_score_round_trips_to_target_evalue() {
        let params = StatParams::for_scores(1, -3);
        let cutoff = params.cutoff_score(10.0, 50_000, 1000).unwrap();
        assert!(params.e_value(cutoff, 50_000, 1000) <= 10.0);
        assert!(params.e_value(cutoff - 1, 50_000, 1000) > 10.0 || cutoff == 0);
    }

    #[test]
    fn rejects_non_positive_evalue() {
        let params = StatParams::for_scores(1, -3);
        assert!(params.cutoff_score(0.0, 1000, 100).is_err());
    }

    #[test]
    fn histogram_counts_all_records() {
        let mut hist = EvalueHistogram::new(1e-10, 10.0, 8);
        for e in [1e-9, 1e-5, 1.0, 9.0] {
            hist.record(e);
        }
        assert_eq!(hist.buckets().iter().sum::<u64>(), 4);
    }
}
