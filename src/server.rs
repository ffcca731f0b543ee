//! The persistent server (`spec.md` §5/§6): a long-lived process listening
//! on a local UNIX-domain socket, serving one connection to completion
//! before accepting the next, caching loaded indices across requests so a
//! client never pays index-load cost more than once per database.
//!
//! Wire protocol, length-prefixed `bincode` frames on each connection:
//! 1. client → server: one [`QueryInput`] frame (a database name of `""`
//!    is the shutdown signal, per `spec.md` §6).
//! 2. server → client: if the request's `output` path was `None`, one
//!    frame carrying the primary report body verbatim — this crate's
//!    concrete reading of "the server redirects subsequent stdout/stderr
//!    through the socket" (see `DESIGN.md`).
//! 3. server → client: one [`ServerReply`] frame; an empty `message` on
//!    `success: true` is the protocol's completion marker.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{Cli, Parameters};
use crate::error::{Error, Result};
use crate::index::Index;
use crate::pipeline::{Pipeline, RunStatistics};

/// The default socket name clients and servers agree on, per `spec.md` §6.
pub const DEFAULT_SOCKET_NAME: &str = "BWTSW_SOCKET";

/// One client request: everything [`crate::config::Cli`] carries for a
/// single-shot run, sent as one frame per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryInput {
    pub database: String,
    pub query: PathBuf,
    pub output: Option<PathBuf>,
    pub align: Option<PathBuf>,
    pub time_log: Option<PathBuf>,
    pub strand: u8,
    pub soft_mask: bool,
    pub dust: bool,
    pub evalue: f64,
    pub match_reward: i32,
    pub mismatch_penalty: i32,
    pub gap_open: i32,
    pub gap_extend: i32,
    pub format: u32,
}

impl QueryInput {
    /// True for the reserved shutdown request (`spec.md` §6: "a
    /// database-name of empty string is the shutdown signal").
    pub fn is_shutdown(&self) -> bool {
        self.database.is_empty()
    }

    fn to_cli(&self) -> Cli {
        Cli {
            database: self.database.clone(),
            query: self.query.clone(),
            output: self.output.clone(),
            align: self.align.clone(),
            time_log: self.time_log.clone(),
            parm: None,
            strand: self.strand,
            soft_mask: self.soft_mask,
            dust: self.dust,
            evalue: self.evalue,
            match_reward: self.match_reward,
            mismatch_penalty: self.mismatch_penalty,
            gap_open: self.gap_open,
            gap_extend: self.gap_extend,
            format: self.format,
            confirm: false,
            load_server: false,
            unload_server: false,
        }
    }
}

/// The per-request acknowledgment. An empty `message` with `success: true`
/// is the protocol's "successful completion" marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerReply {
    pub success: bool,
    pub message: String,
}

enum ConnectionOutcome {
    Continue,
    Shutdown,
}

/// Bind `socket_path` and serve connections until a shutdown request
/// arrives. Each connection is processed to completion before the next is
/// accepted (`spec.md` §5's request-level scheduling model): there is no
/// shared-mutable-state concern inside the engine because only one
/// connection is ever live at a time.
pub fn serve(socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        fs::remove_file(socket_path).map_err(|e| Error::io(socket_path.display().to_string(), e))?;
    }
    let listener =
        UnixListener::bind(socket_path).map_err(|e| Error::io(socket_path.display().to_string(), e))?;
    info!("bwtsw server listening on {}", socket_path.display());

    let mut indices: HashMap<String, Arc<Index>> = HashMap::new();

    for incoming in listener.incoming() {
        let mut stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to accept connection: {e}");
                continue;
            }
        };

        match handle_connection(&mut stream, &mut indices) {
            Ok(ConnectionOutcome::Continue) => {}
            Ok(ConnectionOutcome::Shutdown) => {
                info!("shutdown request received, stopping server");
                break;
            }
            Err(e) => {
                // Malformed QueryInput or a reset connection: logged, loop
                // continues (`spec.md` §7, error taxonomy item 5).
                warn!("connection error: {e}");
            }
        }
    }

    let _ = fs::remove_file(socket_path);
    Ok(())
}

fn handle_connection(
    stream: &mut UnixStream,
    indices: &mut HashMap<String, Arc<Index>>,
) -> Result<ConnectionOutcome> {
    let frame = read_frame(stream)?;
    let input: QueryInput = bincode::deserialize(&frame)
        .map_err(|e| Error::Protocol(format!("malformed QueryInput: {e}")))?;

    if input.is_shutdown() {
        send_reply(stream, true, "")?;
        return Ok(ConnectionOutcome::Shutdown);
    }

    debug!(
        "server request: database='{}' query='{}'",
        input.database,
        input.query.display()
    );

    match run_query_input(stream, &input, indices) {
        Ok(stats) => {
            info!(
                "server request for '{}' complete: {} queries, {} hits",
                input.database, stats.queries_processed, stats.total_unique_gapped_hit
            );
            send_reply(stream, true, "")?;
        }
        Err(e) => {
            warn!("request failed: {e}");
            send_reply(stream, false, &e.to_string())?;
        }
    }
    Ok(ConnectionOutcome::Continue)
}

/// Load (or reuse a cached) index, resolve parameters, and run the full
/// pipeline for one request. On success, if the client asked for stdout
/// (`output: None`), the rendered report is sent back over `stream` as one
/// frame before the final [`ServerReply`].
fn run_query_input(
    stream: &mut UnixStream,
    input: &QueryInput,
    indices: &mut HashMap<String, Arc<Index>>,
) -> Result<RunStatistics> {
    let index = match indices.get(&input.database) {
        Some(cached) => Arc::clone(cached),
        None => {
            let loaded = Arc::new(Index::load(&input.database)?);
            indices.insert(input.database.clone(), Arc::clone(&loaded));
            loaded
        }
    };

    let cli = input.to_cli();
    let params = Parameters::resolve(&cli)?;

    let query_file =
        fs::File::open(&params.query).map_err(|e| Error::io(params.query.display().to_string(), e))?;
    let reader = BufReader::new(query_file);

    let mut pipeline = Pipeline::new(&index, &params);

    let mut output_file: Option<fs::File> = None;
    let mut output_buf: Vec<u8> = Vec::new();
    let mut align_file: Option<fs::File> = None;
    let mut time_file: Option<fs::File> = None;

    if let Some(path) = &params.align {
        align_file =
            Some(fs::File::create(path).map_err(|e| Error::io(path.display().to_string(), e))?);
    }
    if let Some(path) = &params.time_log {
        time_file = Some(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::io(path.display().to_string(), e))?,
        );
    }

    let stats = {
        let primary_out: &mut dyn Write = if let Some(path) = &params.output {
            output_file =
                Some(fs::File::create(path).map_err(|e| Error::io(path.display().to_string(), e))?);
            output_file.as_mut().unwrap()
        } else {
            &mut output_buf
        };
        let align_out: Option<&mut dyn Write> =
            align_file.as_mut().map(|f| f as &mut dyn Write);
        let time_out: Option<&mut dyn Write> = time_file.as_mut().map(|f| f as &mut dyn Write);

        pipeline.run(reader, primary_out, align_out, time_out)?
    };

    if params.output.is_none() {
        write_frame(stream, &output_buf)?;
    }

    Ok(stats)
}

fn send_reply(stream: &mut UnixStream, success: bool, message: &str) -> Result<()> {
    let reply = ServerReply {
        success,
        message: message.to_string(),
    };
    let bytes = bincode::serialize(&reply)
        .map_err(|e| Error::Protocol(format!("failed to encode reply: {e}")))?;
    write_frame(stream, &bytes)
}

fn read_frame(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .map_err(|e| Error::Protocol(format!("connection reset while reading frame length: {e}")))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .map_err(|e| Error::Protocol(format!("connection reset while reading frame body: {e}")))?;
    Ok(buf)
}

fn write_frame(stream: &mut UnixStream, payload: &[u8]) -> Result<()> {
    let len = (payload.len() as u32).to_le_bytes();
    stream
        .write_all(&len)
        .map_err(|e| Error::Protocol(format!("connection reset while writing frame: {e}")))?;
    stream
        .write_all(payload)
        .map_err(|e| Error::Protocol(format!("connection reset while writing frame: {e}")))?;
    Ok(())
}

/// Send one [`QueryInput`] over an already-connected client socket and
/// read back the optional stdout frame plus the final [`ServerReply`].
/// A thin client helper, exercised by this module's own tests and
/// available to the CLI binary's `-L`/non-`-L` dispatch.
pub fn send_request(stream: &mut UnixStream, input: &QueryInput) -> Result<(Option<Vec<u8>>, ServerReply)> {
    let bytes = bincode::serialize(input)
        .map_err(|e| Error::Protocol(format!("failed to encode request: {e}")))?;
    write_frame(stream, &bytes)?;

    if input.is_shutdown() {
        let reply_bytes = read_frame(stream)?;
        let reply: ServerReply = bincode::deserialize(&reply_bytes)
            .map_err(|e| Error::Protocol(format!("malformed reply: {e}")))?;
        return Ok((None, reply));
    }

    // The client only receives a stdout frame when it asked for one (no
    // `output` path); callers that set `output` should not call this path
    // expecting one, but reading the mandatory reply frame always works
    // because the server always sends a reply last. Peek by reading a
    // frame and disambiguating is not possible without a tag, so the
    // caller is expected to pass `output: None` only when it wants this
    // first frame interpreted as the report body.
    if input.output.is_none() {
        let body = read_frame(stream)?;
        let reply_bytes = read_frame(stream)?;
        let reply: ServerReply = bincode::deserialize(&reply_bytes)
            .map_err(|e| Error::Protocol(format!("malformed reply: {e}")))?;
        Ok((Some(body), reply))
    } else {
        let reply_bytes = read_frame(stream)?;
        let reply: ServerReply = bincode::deserialize(&reply_bytes)
            .map_err(|e| Error::Protocol(format!("malformed reply: {e}")))?;
        Ok((None, reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn shutdown_request_stops_the_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bwtsw.sock");
        let server_path = path.clone();
        let handle = thread::spawn(move || serve(&server_path));

        // Give the listener a moment to bind.
        let mut attempts = 0;
        let mut stream = loop {
            match UnixStream::connect(&path) {
                Ok(s) => break s,
                Err(_) if attempts < 50 => {
                    attempts += 1;
                    thread::sleep(std::time::Duration::from_millis(20));
                }
                Err(e) => panic!("could not connect to test server: {e}"),
            }
        };

        let shutdown = QueryInput {
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
        let (_, reply) = send_request(&mut stream, &shutdown).unwrap();
        assert!(reply.success);

        handle.join().unwrap().unwrap();
    }

    #[test]
    fn query_input_shutdown_detection() {
        let mut input = QueryInput {
            database: "db".into(),
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
        assert!(!input.is_shutdown());
        input.database = String::new();
        assert!(input.is_shutdown());
    }
}
