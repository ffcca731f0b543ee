//! CLI entry point: a thin wrapper that resolves `Cli`/`Parameters`
//! (`src/config.rs`), loads an `Index` (C1), drives a `Pipeline` (per-query
//! orchestration), and otherwise dispatches to the persistent server
//! (`-L`/`-X`).

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bwtsw::{output, Cli, Index, Parameters, Pipeline};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.unload_server {
        return unload_server();
    }
    if cli.load_server {
        return run_server();
    }

    let params = Parameters::resolve(&cli).context("invalid configuration")?;

    if params.confirm && !confirm_prompt(&params)? {
        eprintln!("aborted");
        return Ok(());
    }

    let index = Index::load(&params.database)
        .with_context(|| format!("failed to load index '{}'", params.database))?;

    let query_file = File::open(&params.query)
        .with_context(|| format!("cannot open query file {}", params.query.display()))?;
    let reader = BufReader::new(query_file);

    let mut pipeline = Pipeline::new(&index, &params).with_histogram(1e-10, 20);

    let mut output_file;
    let mut primary_out: Box<dyn Write> = match &params.output {
        Some(path) => {
            output_file =
                File::create(path).with_context(|| format!("cannot open output file {}", path.display()))?;
            Box::new(&mut output_file)
        }
        None => Box::new(io::stdout()),
    };

    let mut align_file;
    let mut align_out: Option<Box<dyn Write>> = match &params.align {
        Some(path) => {
            align_file =
                File::create(path).with_context(|| format!("cannot open align file {}", path.display()))?;
            Some(Box::new(&mut align_file))
        }
        None => None,
    };

    let mut time_file;
    let mut time_out: Option<Box<dyn Write>> = match &params.time_log {
        Some(path) => {
            time_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open timing log {}", path.display()))?;
            Some(Box::new(&mut time_file))
        }
        None => None,
    };

    let stats = pipeline
        .run(
            reader,
            primary_out.as_mut(),
            align_out.as_deref_mut(),
            time_out.as_deref_mut(),
        )
        .context("query processing failed")?;

    output::write_trailer(
        &mut primary_out,
        &params.database,
        index.annotation.total_length(),
        index.annotation.subjects().len(),
    )
    .context("failed to write trailer")?;

    log::info!("run complete:\n{}", stats.summary());
    if let Some(hist) = pipeline.histogram() {
        log::debug!("E-value histogram: {:?}", hist.buckets());
    }

    Ok(())
}

/// `-c`: ask for interactive confirmation before running, per the original
/// driver's confirmation prompt.
fn confirm_prompt(params: &Parameters) -> Result<bool> {
    eprint!(
        "About to search '{}' with query '{}' (e-value <= {}); continue? [y/N] ",
        params.database,
        params.query.display(),
        params.evalue
    );
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "Yes"))
}

#[cfg(unix)]
fn run_server() -> Result<()> {
    let socket_path = PathBuf::from(bwtsw::server::DEFAULT_SOCKET_NAME);
    bwtsw::server::serve(&socket_path).context("server loop failed")
}

#[cfg(not(unix))]
fn run_server() -> Result<()> {
    anyhow::bail!("the persistent server is only available on unix platforms")
}

#[cfg(unix)]
fn unload_server() -> Result<()> {
    use std::os::unix::net::UnixStream;

    let socket_path = PathBuf::from(bwtsw::server::DEFAULT_SOCKET_NAME);
    let mut stream = UnixStream::connect(&socket_path)
        .with_context(|| format!("no server listening on {}", socket_path.display()))?;

    let shutdown = bwtsw::server::QueryInput {
        database: String::new(),
        query: PathBuf::new(),
        output: None,
        align: None,
        time_log: None,
        strand: 3,
        soft_mask: false,
        dust: false,
        evalue: 10.0,
        match_reward: 1,
        mismatch_penalty: -3,
        gap_open: 5,
        gap_extend: 2,
        format: 8,
    };
    let (_, reply) = bwtsw::server::send_request(&mut stream, &shutdown)?;
    if !reply.success {
        anyhow::bail!("server reported an error while shutting down: {}", reply.message);
    }
    Ok(())
}

#[cfg(not(unix))]
fn unload_server() -> Result<()> {
    anyhow::bail!("the persistent server is only available on unix platforms")
}
