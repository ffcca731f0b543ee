//! Query FASTA parsing and per-query context handling: streaming record
//! parsing that preserves case for `-U` soft-masking, reverse-complement
//! generation by in-place reversal, and base-composition tables feeding
//! the statistics module.

use std::io::BufRead;

use crate::character::Base;
use crate::error::{Error, Result};

/// One strand orientation a query is searched in. `spec.md` §6 packs this
/// into the high bits of the sorted db-seq-index word as `tag()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Forward,
    ReverseComplement,
}

impl Context {
    pub fn tag(self) -> u32 {
        match self {
            Context::Forward => 0,
            Context::ReverseComplement => 1,
        }
    }
}

/// Which strands a run searches, from `-S {1|2|3}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    ReverseComplement,
    Both,
}

impl Strand {
    /// The [`Context`] values this run searches, in emission order.
    pub fn contexts(self) -> &'static [Context] {
        match self {
            Strand::Forward => &[Context::Forward],
            Strand::ReverseComplement => &[Context::ReverseComplement],
            Strand::Both => &[Context::Forward, Context::ReverseComplement],
        }
    }
}

/// Upper bound on one query record, past which the engine rejects rather
/// than silently truncating (`spec.md` §9 Open Questions).
pub const MAX_QUERY_LENGTH: usize = 256 * 1024 * 1024;

/// One parsed FASTA record. `soft_mask[i]` is true when the original
/// character at position `i` was lower-case; under `-U` those positions
/// are treated as a hard mask during the search. `ambiguous[i]` is true
/// when the original character wasn't one of `{A,C,G,T}` (case-insensitive)
/// — `N` or an IUPAC ambiguity code — and is always a hard mask, independent
/// of `-U`/`-F`, since the position was never really the `Base::A`
/// placeholder it was parsed into.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub name: String,
    pub bases: Vec<Base>,
    pub soft_mask: Vec<bool>,
    pub ambiguous: Vec<bool>,
}

impl QueryRecord {
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Reverse-complement this record's bases and soft-mask flags in
    /// place, for context generation; call again to restore the forward
    /// orientation, per the "reversed, then restored" lifecycle in
    /// `spec.md` §3.
    pub fn reverse_complement_in_place(&mut self) {
        self.bases.reverse();
        for b in &mut self.bases {
            *b = b.complement();
        }
        self.soft_mask.reverse();
        self.ambiguous.reverse();
    }

    /// Fraction of bases in `{A,C,G,T}`, used by the statistics module as
    /// a uniform-composition stand-in when the exact base frequencies are
    /// not otherwise needed.
    pub fn base_composition(&self) -> [f64; 4] {
        let mut counts = [0u64; 4];
        for &b in &self.bases {
            counts[b as usize] += 1;
        }
        let total = self.bases.len().max(1) as f64;
        [
            counts[0] as f64 / total,
            counts[1] as f64 / total,
            counts[2] as f64 / total,
            counts[3] as f64 / total,
        ]
    }
}

/// A streaming FASTA reader yielding one [`QueryRecord`] per `>`-delimited
/// entry. Non-ACGT characters (ambiguity codes, `N`) are recorded as
/// `Base::A` placeholders and flagged in `ambiguous` so the pipeline hard-masks
/// them unconditionally, matching the packed-DNA convention (C1) of masking
/// rather than rejecting ambiguity.
pub struct FastaReader<R> {
    lines: std::io::Lines<R>,
    pending_header: Option<String>,
    exhausted: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> FastaReader<R> {
        FastaReader {
            lines: reader.lines(),
            pending_header: None,
            exhausted: false,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        match self.lines.next() {
            Some(line) => line.map(Some).map_err(|e| Error::io("query", e)),
            None => Ok(None),
        }
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<QueryRecord>;

    fn next(&mut self) -> Option<Result<QueryRecord>> {
        if self.exhausted {
            return None;
        }

        let mut name = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                match self.next_line() {
                    Ok(Some(line)) => {
                        if let Some(stripped) = line.strip_prefix('>') {
                            break stripped.trim().to_string();
                        }
                        // Leading garbage before the first header is ignored.
                    }
                    Ok(None) => {
                        self.exhausted = true;
                        return None;
                    }
                    Err(e) => return Some(Err(e)),
                }
            },
        };
        if let Some(sp) = name.find(char::is_whitespace) {
            name.truncate(sp);
        }

        let mut bases = Vec::new();
        let mut soft_mask = Vec::new();
        let mut ambiguous = Vec::new();

        loop {
            match self.next_line() {
                Ok(Some(line)) => {
                    if let Some(stripped) = line.strip_prefix('>') {
                        self.pending_header = Some(stripped.trim().to_string());
                        break;
                    }
                    for c in line.trim_end().bytes() {
                        if c.is_ascii_whitespace() {
                            continue;
                        }
                        let parsed = Base::from_ascii(c);
                        bases.push(parsed.unwrap_or(Base::A));
                        soft_mask.push(c.is_ascii_lowercase());
                        ambiguous.push(parsed.is_none());
                    }
                }
                Ok(None) => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => return Some(Err(e)),
            }
        }

        if bases.len() > MAX_QUERY_LENGTH {
            return Some(Err(Error::InvalidConfig(format!(
                "query '{name}' exceeds the maximum query length of {MAX_QUERY_LENGTH} bases",
            ))));
        }

        Some(Ok(QueryRecord {
            name,
            bases,
            soft_mask,
            ambiguous,
        }))
    }
}
