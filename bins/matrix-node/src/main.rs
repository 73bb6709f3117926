// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Matrix flavour edge-compute-node.
//!
//! Registers the `/edge-compute/computer` interest filter, parses the
//! `multiply` verb out of every matching interest, and routes it to a
//! [`MatrixNode`]. Bulk matrix input is pulled back from the requester over
//! the same [`Face`] via `ecn-staging`; in this standalone binary nothing
//! answers `/edge-compute/requester`, so a request NACKs with `NoRoute`
//! unless run against the same face as a requester (see the consumer
//! binary, which embeds both sides for a runnable demo).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use ecn_app_core::config::ConfigService;
use ecn_app_core::node::NodeConfig;
use ecn_config_fs::FsConfigStore;
use ecn_name::ParsedRequest;
use ecn_session::MatrixNode;
use ecn_transport::{Data, Face, Interest, LoopbackFace};
use ecn_workloads::NaiveMatrixKernel;
use tracing_subscriber::EnvFilter;

/// `<use_cache>` per the wire CLI grammar. `--log-level`/`--config` are
/// ambient flags and do not count against that positional arity.
#[derive(Parser, Debug)]
#[command(author, version, about = "Matrix flavour edge-compute-node")]
struct Args {
    /// Whether the reuse cache is consulted at all (`0` or `1`).
    use_cache: u8,
    /// Minimum level logged; overridden by the `ECN_LOG` environment
    /// variable when set.
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Directory a persisted config file is loaded from and saved to,
    /// overriding the platform config directory.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
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

    let store = match &args.config {
        Some(path) => FsConfigStore::at(path),
        None => FsConfigStore::new(),
    };
    let config_service = store.map(ConfigService::new).ok();

    let mut config: NodeConfig = config_service
        .as_ref()
        .and_then(|c| c.load::<NodeConfig>("matrix_node").ok().flatten())
        .unwrap_or_default();
    config.use_cache = args.use_cache != 0;

    if let Some(service) = &config_service {
        let _ = service.save("matrix_node", &config);
    }

    let face = Arc::new(LoopbackFace::new());
    let node = Arc::new(MatrixNode::new(
        config.reusables_dir.clone(),
        Arc::new(NaiveMatrixKernel),
        face.clone(),
        config.use_cache,
        Duration::from_millis(config.stage_deadline_ms),
    ));
    register_computer_filter(&face, node);

    tracing::info!(use_cache = config.use_cache, reusables_dir = %config.reusables_dir, "matrix CN listening");
    tokio::signal::ctrl_c().await?;
    Ok(ExitCode::SUCCESS)
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
