// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Camera flavour demo consumer.
//!
//! Embeds its own [`CameraNode`] and [`LoopbackFace`], answers the node's
//! snapshot pull-back with the bytes of `image_file`, and runs a short
//! sliding-window trial against that one capture: a bootstrap cycle
//! (`first`) followed by two steady-state cycles, appending each cycle's
//! face count to `log_file`.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ecn_name::ParsedRequest;
use ecn_session::CameraNode;
use ecn_transport::{Data, Face, Interest, InterestOutcome, LoopbackFace};
use ecn_workloads::DeterministicFaceDetector;
use tracing_subscriber::EnvFilter;

const TRIAL_CYCLES: usize = 3;

/// `<id> <overlap> <sub_width> <image_file> <log_file>` per the wire CLI
/// grammar. `--log-level`/`--config` are ambient flags and do not count
/// against that positional arity.
#[derive(Parser, Debug)]
#[command(author, version, about = "Camera flavour edge-compute-node consumer")]
struct Args {
    /// Requester identifier this session is keyed by.
    id: u64,
    /// Fractional overlap between successive snapshots, in `[0, 1)`.
    overlap: f64,
    /// Width, in pixels, of each snapshot (the capture's height is derived
    /// from `image_file`'s length divided by this width).
    sub_width: u32,
    /// Grayscale snapshot bytes pulled back on every staging round.
    image_file: PathBuf,
    /// File each cycle's detection count is appended to.
    log_file: PathBuf,
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

    let snapshot = std::fs::read(&args.image_file)
        .with_context(|| format!("reading {}", args.image_file.display()))?;
    if args.sub_width == 0 {
        anyhow::bail!("sub_width must be > 0");
    }
    let height = (snapshot.len() / args.sub_width as usize) as u32;
    if height == 0 {
        anyhow::bail!("{} is too small for sub_width {}", args.image_file.display(), args.sub_width);
    }

    let face = Arc::new(LoopbackFace::new());
    let node = Arc::new(CameraNode::new(Arc::new(DeterministicFaceDetector), face.clone(), Duration::from_secs(10)));
    register_computer_filter(&face, node);
    register_snapshot_responder(&face, snapshot, args.sub_width as usize);

    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;

    for cycle in 0..TRIAL_CYCLES {
        let first = cycle == 0;
        let name = ecn_name::build_detectfaces_name(args.id, args.overlap, height, args.sub_width, first);
        let count = poll_until_ready(&face, &name).await?;
        writeln!(
            log,
            "id={} cycle={} first={} overlap={} width={} height={} faces={}",
            args.id, cycle, first, args.overlap, args.sub_width, height, count
        )?;
        tracing::info!(id = args.id, cycle, %count, "camera consumer cycle finished");
    }

    Ok(ExitCode::SUCCESS)
}

async fn poll_until_ready(face: &Arc<LoopbackFace>, name: &str) -> Result<String> {
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

fn register_computer_filter(face: &Arc<LoopbackFace>, node: Arc<CameraNode>) {
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
                            Ok(ParsedRequest::DetectFaces { requester_id, overlap, height, width, first }) => {
                                node.handle_request(requester_id, overlap, height, width, first).await
                            }
                            Ok(_) => "error: wrong verb for camera CN".to_string(),
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
            tracing::error!(%err, "failed to register camera CN interest filter");
        }
    });
}

/// Answers the node's own snapshot pull-back with a byte range of
/// `snapshot`; `parse_staging` yields row (scanline) indices, so they are
/// scaled by `width` bytes-per-row before slicing the flat buffer.
fn register_snapshot_responder(face: &Arc<LoopbackFace>, snapshot: Vec<u8>, width: usize) {
    let producer = face.clone();
    let face = face.clone();
    tokio::spawn(async move {
        let result = face
            .publish_interest_filter(
                "/edge-compute/requester",
                Arc::new(move |interest: Interest| {
                    let producer = producer.clone();
                    let snapshot = snapshot.clone();
                    let name = interest.name.clone();
                    tokio::spawn(async move {
                        let Ok(parsed) = ecn_name::parse_staging(&name) else {
                            return;
                        };
                        let len = snapshot.len();
                        let begin = (parsed.begin as usize * width).min(len);
                        let end = (parsed.end as usize * width).min(len);
                        let content = snapshot[begin..end].to_vec();
                        let _ = producer
                            .put_data(Data { name, content, freshness: Duration::from_secs(1) })
                            .await;
                    });
                }),
            )
            .await;
        if let Err(err) = result {
            tracing::error!(%err, "failed to register camera staging responder");
        }
    });
}
