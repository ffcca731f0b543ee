//! CLI surface and parameter resolution: the score block, I/O file names,
//! and strand/mask flags are bundled into one `Parameters` value
//! constructed once per run and passed explicitly — never a process
//! global (`spec.md` §9 Design Notes).

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::{Error, Result};
use crate::output::OutputFormat;
use crate::query::Strand;

/// `-m {0|8|9}` output format, `-S {1|2|3}` strand, and the rest of the
/// CLI surface from `spec.md` §6. Flag spellings are kept close to the
/// original tool; semantics are unchanged.
#[derive(Parser, Debug, Clone)]
#[command(name = "bwtsw", about = "Local DNA alignment over a BWT/FM-index")]
pub struct Cli {
    /// Database name (index files resolved by substituting this into the
    /// six artifact patterns).
    #[arg(short = 'd', long = "database")]
    pub database: String,

    /// Query FASTA file; positional.
    #[arg(short = 'i', long = "query")]
    pub query: PathBuf,

    /// Primary output file; stdout if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Secondary pairwise-alignment output file.
    #[arg(long = "align")]
    pub align: Option<PathBuf>,

    /// Append-only timing log.
    #[arg(long = "time")]
    pub time_log: Option<PathBuf>,

    /// Alternate query-parameter (`.parm`) file.
    #[arg(short = 'p', long = "parm")]
    pub parm: Option<PathBuf>,

    /// Query strand: 1 = forward, 2 = reverse-complement, 3 = both.
    #[arg(short = 'S', long = "strand", default_value_t = 3)]
    pub strand: u8,

    /// Keep lower-case bases as a hard mask.
    #[arg(short = 'U', long = "soft-mask")]
    pub soft_mask: bool,

    /// Enable DUST low-complexity masking.
    #[arg(short = 'F', long = "dust", default_value_t = false)]
    pub dust: bool,

    /// E-value cutoff.
    #[arg(short = 'e', long = "evalue", default_value_t = 10.0)]
    pub evalue: f64,

    /// Match reward (> 0).
    #[arg(short = 'r', long = "reward", default_value_t = 1)]
    pub match_reward: i32,

    /// Mismatch penalty (< 0, with -q >= 3*r).
    #[arg(short = 'q', long = "penalty", default_value_t = -3)]
    pub mismatch_penalty: i32,

    /// Gap-open cost (> 0).
    #[arg(short = 'G', long = "gap-open", default_value_t = 5)]
    pub gap_open: i32,

    /// Gap-extend cost (> 0, with 2*E >= -q).
    #[arg(short = 'E', long = "gap-extend", default_value_t = 2)]
    pub gap_extend: i32,

    /// Output format: 0 pairwise, 8 tabular, 9 tabular-with-comment.
    #[arg(short = 'm', long = "format", default_value_t = 0)]
    pub format: u32,

    /// Ask for interactive confirmation before running.
    #[arg(short = 'c', long = "confirm")]
    pub confirm: bool,

    /// Load as a persistent server.
    #[arg(short = 'L', long = "load-server")]
    pub load_server: bool,

    /// Unload the persistent server.
    #[arg(short = 'X', long = "unload-server")]
    pub unload_server: bool,
}

/// The fully-resolved run configuration: score block, strand/mask flags,
/// E-value cutoff, and file names, merged from `.parm` files and CLI
/// flags in the order documented in `spec.md` §9's supplemented
/// resolution order.
#[derive(Debug, Clone)]
pub struct Parameters {
    pub database: String,
    pub query: PathBuf,
    pub output: Option<PathBuf>,
    pub align: Option<PathBuf>,
    pub time_log: Option<PathBuf>,
    pub strand: Strand,
    pub soft_mask: bool,
    pub dust: bool,
    pub evalue: f64,
    pub match_reward: i32,
    pub mismatch_penalty: i32,
    pub gap_open: i32,
    pub gap_extend: i32,
    pub format: OutputFormat,
    pub confirm: bool,
}

impl Parameters {
    /// Resolve the final parameter set: start from CLI defaults, merge
    /// `<program>.parm`, then `<database>.parm`, then a user-supplied `-p`
    /// alternate (each overriding the previous), and finally apply
    /// whatever flags were explicitly given on the command line.
    pub fn resolve(cli: &Cli) -> Result<Parameters> {
        let mut overrides = ParmOverrides::default();
        for candidate in parm_search_order(cli) {
            if candidate.exists() {
                overrides.merge(ParmOverrides::parse_file(&candidate)?);
            }
        }

        let strand = match cli.strand {
            1 => Strand::Forward,
            2 => Strand::ReverseComplement,
            3 => Strand::Both,
            other => {
                return Err(Error::InvalidConfig(format!(
                    "invalid -S {other}, expected 1, 2 or 3"
                )))
            }
        };

        let match_reward = overrides.match_reward.unwrap_or(cli.match_reward);
        let mismatch_penalty = overrides.mismatch_penalty.unwrap_or(cli.mismatch_penalty);
        let gap_open = overrides.gap_open.unwrap_or(cli.gap_open);
        let gap_extend = overrides.gap_extend.unwrap_or(cli.gap_extend);
        let evalue = overrides.evalue.unwrap_or(cli.evalue);

        validate_scores(match_reward, mismatch_penalty, gap_open, gap_extend)?;
        if evalue <= 0.0 {
            return Err(Error::Statistics(format!(
                "E-value cutoff must be positive, got {evalue}"
            )));
        }

        Ok(Parameters {
            database: cli.database.clone(),
            query: cli.query.clone(),
            output: cli.output.clone(),
            align: cli.align.clone(),
            time_log: cli.time_log.clone(),
            strand,
            soft_mask: cli.soft_mask,
            dust: cli.dust,
            evalue,
            match_reward,
            mismatch_penalty,
            gap_open,
            gap_extend,
            format: OutputFormat::from_flag(cli.format)?,
            confirm: cli.confirm,
        })
    }
}

fn validate_scores(reward: i32, penalty: i32, gap_open: i32, gap_extend: i32) -> Result<()> {
    if reward <= 0 {
        return Err(Error::InvalidConfig(format!(
            "match reward must be > 0, got {reward}"
        )));
    }
    if penalty >= 0 {
        return Err(Error::InvalidConfig(format!(
            "mismatch penalty must be < 0, got {penalty}"
        )));
    }
    if -penalty < 3 * reward {
        return Err(Error::InvalidConfig(format!(
            "mismatch penalty {penalty} must satisfy -q >= 3*r (r={reward})"
        )));
    }
    if gap_open <= 0 {
        return Err(Error::InvalidConfig(format!(
            "gap-open cost must be > 0, got {gap_open}"
        )));
    }
    if gap_extend <= 0 {
        return Err(Error::InvalidConfig(format!(
            "gap-extend cost must be > 0, got {gap_extend}"
        )));
    }
    if 2 * gap_extend < -penalty {
        return Err(Error::InvalidConfig(format!(
            "gap-extend cost {gap_extend} must satisfy 2*E >= -q (q={penalty})"
        )));
    }
    Ok(())
}

fn parm_search_order(cli: &Cli) -> Vec<PathBuf> {
    let mut order = vec![
        PathBuf::from("bwtsw.parm"),
        PathBuf::from(format!("{}.parm", cli.database)),
    ];
    if let Some(p) = &cli.parm {
        order.push(p.clone());
    }
    order
}

/// Key=value overrides parsed from a `.parm` file, standing in for the
/// out-of-scope ini parser at its documented interface (`spec.md` §1).
#[derive(Debug, Clone, Default)]
struct ParmOverrides {
    match_reward: Option<i32>,
    mismatch_penalty: Option<i32>,
    gap_open: Option<i32>,
    gap_extend: Option<i32>,
    evalue: Option<f64>,
}

impl ParmOverrides {
    fn merge(&mut self, other: ParmOverrides) {
        if other.match_reward.is_some() {
            self.match_reward = other.match_reward;
        }
        if other.mismatch_penalty.is_some() {
            self.mismatch_penalty = other.mismatch_penalty;
        }
        if other.gap_open.is_some() {
            self.gap_open = other.gap_open;
        }
        if other.gap_extend.is_some() {
            self.gap_extend = other.gap_extend;
        }
        if other.evalue.is_some() {
            self.evalue = other.evalue;
        }
    }

    fn parse_file(path: &Path) -> Result<ParmOverrides> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        let mut overrides = ParmOverrides::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "r" | "match_reward" => overrides.match_reward = value.parse().ok(),
                "q" | "mismatch_penalty" => overrides.mismatch_penalty = value.parse().ok(),
                "G" | "gap_open" => overrides.gap_open = value.parse().ok(),
                "E" | "gap_extend" => overrides.gap_extend = value.parse().ok(),
                "e" | "evalue" => overrides.evalue = value.parse().ok(),
                _ => {}
            }
        }
        Ok(overrides)
    }
}
