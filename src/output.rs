//! The Output Formatter (C7): pairwise, tabular, and tabular-with-comment
//! alignment reports, BLAST `-m 0/8/9`-compatible.

use std::io::Write;

use crate::annotation::AnnotationTable;
use crate::character::Base;
use crate::error::{Error, Result};
use crate::extend::{EditOp, GappedHit};
use crate::filter::ContextHit;
use crate::packed_dna::PackedDna;
use crate::query::Context;

/// Primary output mode, from `-m {0|8|9}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `-m 0`: human-readable pairwise alignment.
    Pairwise,
    /// `-m 8`: 12-column tab-separated, no header.
    Tabular,
    /// `-m 9`: tabular preceded by `#`-prefixed comment headers.
    TabularWithComment,
}

impl OutputFormat {
    pub fn from_flag(flag: u32) -> Result<OutputFormat> {
        match flag {
            0 => Ok(OutputFormat::Pairwise),
            8 => Ok(OutputFormat::Tabular),
            9 => Ok(OutputFormat::TabularWithComment),
            other => Err(Error::InvalidConfig(format!(
                "unknown output format -m {other}, expected 0, 8 or 9"
            ))),
        }
    }
}

const TABULAR_HEADER: &str = "# query_id\tsubject_id\t% identity\talignment length\tmismatches\tgap opens\tq. start\tq. end\ts. start\ts. end\tevalue\tbit score";

/// Write every hit for one query, in `format`. Output is expected to be
/// wrapped in a line-buffered writer by the caller (pipeline), matching
/// the original tool's line-buffered stdout convention.
pub fn write_query_hits<W: Write>(
    w: &mut W,
    format: OutputFormat,
    query_name: &str,
    hits: &[ContextHit],
    annotation: &AnnotationTable,
) -> Result<()> {
    match format {
        OutputFormat::Pairwise => write_pairwise_summary(w, query_name, hits, annotation),
        OutputFormat::Tabular => write_tabular(w, query_name, hits, annotation, false),
        OutputFormat::TabularWithComment => {
            write_tabular(w, query_name, hits, annotation, true)
        }
    }
}

fn write_pairwise_summary<W: Write>(
    w: &mut W,
    query_name: &str,
    hits: &[ContextHit],
    annotation: &AnnotationTable,
) -> Result<()> {
    writeln!(w, "Query= {query_name}").map_err(|e| Error::io("output", e))?;
    writeln!(w).map_err(|e| Error::io("output", e))?;
    if hits.is_empty() {
        writeln!(w, "***** No hits found *****").map_err(|e| Error::io("output", e))?;
        writeln!(w).map_err(|e| Error::io("output", e))?;
        return Ok(());
    }

    writeln!(w, "{:<40}\tScore\tE-value", "Sequences producing significant alignments:")
        .map_err(|e| Error::io("output", e))?;
    for ch in hits {
        let subject = &annotation.subjects()[ch.hit.db_seq_index];
        writeln!(
            w,
            "{:<40}\t{}\t{:.1e}",
            subject.name, ch.hit.raw_score, ch.hit.e_value
        )
        .map_err(|e| Error::io("output", e))?;
    }
    writeln!(w).map_err(|e| Error::io("output", e))?;
    Ok(())
}

fn write_tabular<W: Write>(
    w: &mut W,
    query_name: &str,
    hits: &[ContextHit],
    annotation: &AnnotationTable,
    with_comment: bool,
) -> Result<()> {
    if with_comment {
        writeln!(w, "# BWTSW").map_err(|e| Error::io("output", e))?;
        writeln!(w, "# Query: {query_name}").map_err(|e| Error::io("output", e))?;
        writeln!(w, "{TABULAR_HEADER}").map_err(|e| Error::io("output", e))?;
    }

    for ch in hits {
        let subject = &annotation.subjects()[ch.hit.db_seq_index];
        let (matches, mismatches, gap_opens, aln_len) = edit_counts(&ch.hit.edits);
        let pct_identity = if aln_len > 0 {
            100.0 * matches as f64 / aln_len as f64
        } else {
            0.0
        };
        let (s_start, s_end) = subject_coordinates(ch, subject.offset);

        writeln!(
            w,
            "{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.1e}\t{:.1}",
            query_name,
            subject.name,
            pct_identity,
            aln_len,
            mismatches,
            gap_opens,
            ch.hit.query_start + 1,
            ch.hit.query_end,
            s_start,
            s_end,
            ch.hit.e_value,
            ch.hit.bit_score,
        )
        .map_err(|e| Error::io("output", e))?;
    }
    Ok(())
}

/// 1-based, strand-aware subject coordinates: reverse-complement hits are
/// reported with `s_start > s_end`, per BLAST convention.
fn subject_coordinates(ch: &ContextHit, subject_offset: usize) -> (usize, usize) {
    let local_start = ch.hit.text_start - subject_offset + 1;
    let local_end = ch.hit.text_end - subject_offset;
    match ch.context {
        Context::Forward => (local_start, local_end),
        Context::ReverseComplement => (local_end, local_start),
    }
}

fn edit_counts(edits: &[EditOp]) -> (u32, u32, u32, u32) {
    let mut matches = 0u32;
    let mut mismatches = 0u32;
    let mut gap_opens = 0u32;
    let mut aln_len = 0u32;
    for e in edits {
        match *e {
            EditOp::Match(n) => {
                matches += n;
                aln_len += n;
            }
            EditOp::Mismatch(n) => {
                mismatches += n;
                aln_len += n;
            }
            EditOp::Insertion(n) => {
                gap_opens += 1;
                aln_len += n;
            }
            EditOp::Deletion(n) => {
                gap_opens += 1;
                aln_len += n;
            }
        }
    }
    (matches, mismatches, gap_opens, aln_len)
}

/// Write one full BLAST-style pairwise alignment block for `hit`,
/// reconstructing the aligned query/match/subject lines from its edit
/// string. Used both for the primary pairwise format and for the
/// secondary alignment file, which always receives this format regardless
/// of the primary output mode (`spec.md` §4.7).
pub fn write_pairwise_alignment<W: Write>(
    w: &mut W,
    query_name: &str,
    query_bases: &[Base],
    dna: &PackedDna,
    ch: &ContextHit,
    subject_name: &str,
) -> Result<()> {
    let hit = &ch.hit;
    writeln!(
        w,
        ">{subject_name}\nLength = {}\n Score = {:.1} bits, Expect = {:.1e}",
        hit.text_end - hit.text_start,
        hit.bit_score,
        hit.e_value
    )
    .map_err(|e| Error::io("output", e))?;

    let (query_line, match_line, subject_line) =
        render_alignment_blocks(query_bases, dna, hit);

    const WRAP: usize = 60;
    let mut q_pos = hit.query_start;
    let mut s_pos = hit.text_start;
    for chunk_start in (0..query_line.len()).step_by(WRAP) {
        let chunk_end = (chunk_start + WRAP).min(query_line.len());
        let q_chunk = &query_line[chunk_start..chunk_end];
        let m_chunk = &match_line[chunk_start..chunk_end];
        let s_chunk = &subject_line[chunk_start..chunk_end];

        let q_advance = q_chunk.bytes().filter(|&b| b != b'-').count();
        let s_advance = s_chunk.bytes().filter(|&b| b != b'-').count();

        writeln!(w, "Query  {:<5} {} {}", q_pos + 1, q_chunk, q_pos + q_advance)
            .map_err(|e| Error::io("output", e))?;
        writeln!(w, "              {m_chunk}").map_err(|e| Error::io("output", e))?;
        writeln!(w, "Sbjct  {:<5} {} {}", s_pos + 1, s_chunk, s_pos + s_advance)
            .map_err(|e| Error::io("output", e))?;
        writeln!(w).map_err(|e| Error::io("output", e))?;

        q_pos += q_advance;
        s_pos += s_advance;
    }

    let _ = query_name;
    Ok(())
}

/// Walk `hit`'s edit string, pulling characters from `query_bases` and
/// `dna` to produce the three display lines (query, match symbols,
/// subject).
fn render_alignment_blocks(
    query_bases: &[Base],
    dna: &PackedDna,
    hit: &GappedHit,
) -> (String, String, String) {
    let mut query_line = String::new();
    let mut match_line = String::new();
    let mut subject_line = String::new();

    let mut q = hit.query_start;
    let mut s = hit.text_start;

    for edit in &hit.edits {
        match *edit {
            EditOp::Match(n) | EditOp::Mismatch(n) => {
                for _ in 0..n {
                    let qc = query_bases[q].to_ascii() as char;
                    let sc = dna.get(s).to_ascii() as char;
                    query_line.push(qc);
                    subject_line.push(sc);
                    match_line.push(if qc == sc { '|' } else { ' ' });
                    q += 1;
                    s += 1;
                }
            }
            EditOp::Insertion(n) => {
                for _ in 0..n {
                    query_line.push(query_bases[q].to_ascii() as char);
                    subject_line.push('-');
                    match_line.push(' ');
                    q += 1;
                }
            }
            EditOp::Deletion(n) => {
                for _ in 0..n {
                    query_line.push('-');
                    subject_line.push(dna.get(s).to_ascii() as char);
                    match_line.push(' ');
                    s += 1;
                }
            }
        }
    }

    (query_line, match_line, subject_line)
}

/// The run-end trailer: database metadata, written once per output file
/// after all queries have been processed.
pub fn write_trailer<W: Write>(
    w: &mut W,
    db_name: &str,
    db_total_length: usize,
    num_subjects: usize,
) -> Result<()> {
    writeln!(
        w,
        "Database: {db_name}\n  {num_subjects} sequences; {db_total_length} total bases"
    )
    .map_err(|e| Error::io("output", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Subject;
    use crate::extend::GappedHit;
    use crate::query::Context;

    fn annotation() -> AnnotationTable {
        AnnotationTable::new(vec![Subject {
            name: "s1".into(),
            offset: 0,
            length: 20,
        }])
    }

    fn sample_hit() -> GappedHit {
        GappedHit {
            text_start: 0,
            text_end: 8,
            query_start: 0,
            query_end: 8,
            raw_score: 8,
            bit_score: 12.3,
            e_value: 1e-5,
            db_seq_index: 0,
            edits: vec![EditOp::Match(7), EditOp::Mismatch(1)],
        }
    }

    #[test]
    fn tabular_has_twelve_columns() {
        let mut buf = Vec::new();
        let ch = ContextHit {
            hit: sample_hit(),
            context: Context::Forward,
            sort_key: 0,
        };
        write_tabular(&mut buf, "q1", &[ch], &annotation(), false).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert_eq!(line.trim_end().split('\t').count(), 12);
    }

    #[test]
    fn tabular_with_comment_includes_header() {
        let mut buf = Vec::new();
        write_tabular(&mut buf, "q1", &[], &annotation(), true).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("# query_id"));
    }

    #[test]
    fn reverse_complement_swaps_subject_coordinates() {
        let ch = ContextHit {
            hit: sample_hit(),
            context: Context::ReverseComplement,
            sort_key: 0,
        };
        let (s_start, s_end) = subject_coordinates(&ch, 0);
        assert!(s_start > s_end);
    }

    #[test]
    fn pairwise_summary_reports_no_hits() {
        let mut buf = Vec::new();
        write_pairwise_summary(&mut buf, "q1", &[], &annotation()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("No hits found"));
    }

    #[test]
    fn output_format_rejects_unknown_flag() {
        assert!(OutputFormat::from_flag(3).is_err());
    }
}
