// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Chess flavour demo consumer.
//!
//! Embeds its own [`ChessNode`] and [`LoopbackFace`] (the real named-data
//! transport is out of scope, see `ecn-transport`), issues one `chess`
//! interest, polls by re-expressing it until a non-CTT reply arrives, and
//! appends the result to `log_file`.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ecn_cache::chess::OPENING_FENS;
use ecn_name::ParsedRequest;
use ecn_session::ChessNode;
use ecn_transport::{Data, Face, Interest, InterestOutcome, LoopbackFace};
use ecn_workloads::DeterministicChessEngine;
use tracing_subscriber::EnvFilter;

/// `<id> <start_prob> <depth> <log_file> [<fen_input_file> <line_no>]` per
/// the wire CLI grammar. `--log-level`/`--config` are ambient flags and do
/// not count against that positional arity.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chess flavour edge-compute-node consumer")]
struct Args {
    /// Requester identifier this session is keyed by.
    id: u64,
    /// Admission probability for non-opening FENs on the embedded node.
    start_prob: f64,
    /// Search depth to request.
    depth: u32,
    /// File the final result is appended to.
    log_file: PathBuf,
    /// Optional file to read the FEN from instead of an opening position.
    fen_input_file: Option<PathBuf>,
    /// 1-based line number within `fen_input_file`. Required together with it.
    line_no: Option<u32>,
    /// Minimum level logged; overridden by the `ECN_LOG` environment variable.
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Unused by this consumer; accepted for CLI symmetry with the CN binaries.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return Ok(ExitCode::FAILURE);
        }
    };
    if args.fen_input_file.is_some() != args.line_no.is_some() {
        eprintln!("fen_input_file and line_no must both be given or both omitted");
        return Ok(ExitCode::FAILURE);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ECN_LOG").unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let fen = match (&args.fen_input_file, args.line_no) {
        (Some(path), Some(line_no)) => read_fen_line(path, line_no)?,
        _ => OPENING_FENS[(args.id as usize) % OPENING_FENS.len()].to_string(),
    };

    let face = Arc::new(LoopbackFace::new());
    let node = Arc::new(ChessNode::new(args.start_prob, Arc::new(DeterministicChessEngine)));
    register_computer_filter(&face, node);

    let name = ecn_name::build_chess_name(args.id, args.depth, &fen);
    let result = poll_until_ready(&face, &name).await?;

    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;
    writeln!(log, "id={} depth={} fen={} result={}", args.id, args.depth, fen, result)?;

    tracing::info!(id = args.id, %result, "chess consumer finished");
    Ok(ExitCode::SUCCESS)
}

fn read_fen_line(path: &std::path::Path, line_no: u32) -> Result<String> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let target = line_no.max(1) as usize;
    for (i, line) in reader.lines().enumerate() {
        if i + 1 == target {
            return line.with_context(|| format!("reading line {line_no} of {}", path.display()));
        }
    }
    anyhow::bail!("{} has fewer than {line_no} lines", path.display());
}

async fn poll_until_ready(face: &Arc<LoopbackFace>, name: &str) -> Result<String> {
    loop {
        let outcome = face
            .express_interest(Interest {
                name: name.to_string(),
                lifetime: Duration::from_secs(2),
                must_be_fresh: true,
            })
            .await;
        match outcome {
            InterestOutcome::Data(data) => {
                let reply = String::from_utf8_lossy(&data.content).into_owned();
                if !reply.starts_with("CTT") {
                    return Ok(reply);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            InterestOutcome::Nack(reason) => anyhow::bail!("request nacked: {reason:?}"),
            InterestOutcome::Timeout => anyhow::bail!("request timed out"),
        }
    }
}

fn register_computer_filter(face: &Arc<LoopbackFace>, node: Arc<ChessNode>) {
    let producer = face.clone();
    let face = face.clone();
    tokio::spawn(async move {
        let result = face
            .publish_interest_filter(
                "/edge-compute/computer",
                Arc::new(move |interest: Interest| {
                    let producer = producer.clone();
                    let node = node.clone();
                    tokio::spawn(async move {
                        let name = interest.name.clone();
                        let reply = match ecn_name::parse_request(&name) {
                            Ok(ParsedRequest::Chess { requester_id, depth, fen }) => {
                                node.handle_request(requester_id, fen, depth).await
                            }
                            Ok(_) => "error: wrong verb for chess CN".to_string(),
                            Err(err) => format!("error: {err}"),
                        };
                        let _ = producer
                            .put_data(Data {
                                name,
                                content: reply.into_bytes(),
                                freshness: Duration::from_secs(1),
                            })
                            .await;
                    });
                }),
            )
            .await;
        if let Err(err) = result {
            tracing::error!(%err, "failed to register chess CN interest filter");
        }
    });
}
