// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Matrix flavour demo consumer.
//!
//! Embeds its own [`MatrixNode`] and [`LoopbackFace`], answers the node's
//! bulk-staging pull-back itself (playing both requester and producer in
//! one process, since the real named-data transport is out of scope), and
//! appends the final `Done`/error reply to `log_file`.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ecn_cache::matrix::{content_hash, encode_matrix, Matrix};
use ecn_name::ParsedRequest;
use ecn_session::MatrixNode;
use ecn_transport::{Data, Face, Interest, InterestOutcome, LoopbackFace};
use ecn_workloads::NaiveMatrixKernel;
use tracing_subscriber::EnvFilter;

/// `<id> <dim> <exp> <fill_value> <log_file> <use_cache>` per the wire CLI
/// grammar. `--log-level`/`--config` are ambient flags and do not count
/// against that positional arity.
#[derive(Parser, Debug)]
#[command(author, version, about = "Matrix flavour edge-compute-node consumer")]
struct Args {
    /// Requester identifier this session is keyed by.
    id: u64,
    /// Square matrix dimension.
    dim: u32,
    /// Exponent to raise the matrix to.
    exp: u32,
    /// Every cell of the requested matrix is filled with this value.
    fill_value: i64,
    /// File the final result is appended to.
    log_file: PathBuf,
    /// Whether the request carries a content-hash fingerprint (`0` or `1`).
    use_cache: u8,
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

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ECN_LOG").unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let matrix: Matrix = (0..args.dim as usize)
        .map(|_| vec![args.fill_value; args.dim as usize])
        .collect();
    let use_cache = args.use_cache != 0;
    let matrix_hash = use_cache.then(|| content_hash(&encode_matrix(&matrix)));

    let reusables_dir = std::env::temp_dir().join(format!("ecn-matrix-consumer-{}", args.id));
    let face = Arc::new(LoopbackFace::new());
    let node = Arc::new(MatrixNode::new(
        reusables_dir,
        Arc::new(NaiveMatrixKernel),
        face.clone(),
        use_cache,
        Duration::from_secs(30),
    ));
    register_computer_filter(&face, node);
    register_matrix_responder(&face, matrix);

    let name = ecn_name::build_multiply_name(args.id, args.dim, args.exp, matrix_hash);
    let result = poll_until_done(&face, &name).await?;

    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;
    writeln!(
        log,
        "id={} dim={} exp={} fill_value={} use_cache={} result={}",
        args.id, args.dim, args.exp, args.fill_value, use_cache, result
    )?;

    tracing::info!(id = args.id, %result, "matrix consumer finished");
    Ok(ExitCode::SUCCESS)
}

async fn poll_until_done(face: &Arc<LoopbackFace>, name: &str) -> Result<String> {
    loop {
        let outcome = face
            .express_interest(Interest {
                name: name.to_string(),
                lifetime: Duration::from_secs(5),
                must_be_fresh: true,
            })
            .await;
        match outcome {
            InterestOutcome::Data(data) => {
                let reply = String::from_utf8_lossy(&data.content).into_owned();
                if reply == "Done" || reply.starts_with("error") {
                    return Ok(reply);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            InterestOutcome::Nack(reason) => anyhow::bail!("request nacked: {reason:?}"),
            InterestOutcome::Timeout => anyhow::bail!("request timed out"),
        }
    }
}

fn register_computer_filter(face: &Arc<LoopbackFace>, node: Arc<MatrixNode>) {
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
                            Ok(ParsedRequest::Multiply { requester_id, dim, exponent, matrix_hash }) => {
                                node.handle_request(requester_id, dim, exponent, matrix_hash).await
                            }
                            Ok(_) => "error: wrong verb for matrix CN".to_string(),
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
            tracing::error!(%err, "failed to register matrix CN interest filter");
        }
    });
}

/// Answers the node's own bulk-staging pull-back by serving row ranges of
/// `matrix` encoded the same way `ecn_cache::matrix` spills it to disk.
fn register_matrix_responder(face: &Arc<LoopbackFace>, matrix: Matrix) {
    let producer = face.clone();
    let face = face.clone();
    tokio::spawn(async move {
        let result = face
            .publish_interest_filter(
                "/edge-compute/requester",
                Arc::new(move |interest: Interest| {
                    let producer = producer.clone();
                    let matrix = matrix.clone();
                    let name = interest.name.clone();
                    tokio::spawn(async move {
                        let Ok(parsed) = ecn_name::parse_staging(&name) else {
                            return;
                        };
                        let encoded = encode_matrix(&matrix);
                        let rows: Vec<&str> = encoded.split_inclusive('|').collect();
                        let begin = (parsed.begin as usize).min(rows.len());
                        let end = (parsed.end as usize).min(rows.len());
                        let content = rows[begin..end].concat().into_bytes();
                        let _ = producer
                            .put_data(Data { name, content, freshness: Duration::from_secs(1) })
                            .await;
                    });
                }),
            )
            .await;
        if let Err(err) = result {
            tracing::error!(%err, "failed to register matrix staging responder");
        }
    });
}
