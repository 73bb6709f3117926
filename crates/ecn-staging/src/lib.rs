// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bulk-input staging: the CN reverses roles and pulls large payloads
//! (matrices, camera snapshots) from the requester in row-range chunks,
//! pacing issuance and retrying on timeout with a bumped version component.
//!
//! This crate only handles protocol mechanics — naming, pacing, matching,
//! reassembly order, and the overall stage deadline. Decoding the
//! concatenated bytes into a matrix or an image is the session layer's job,
//! since the row encoding differs per flavour.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(clippy::must_use_candidate, clippy::missing_const_for_fn)]

use std::sync::Arc;
use std::time::Duration;

use ecn_name::StagingKind;
use ecn_transport::{Face, Interest, InterestOutcome, NackReason};
use tokio::time::timeout;

/// `ndn-cxx`'s published maximum packet size; payloads budget against this
/// minus a fixed header allowance.
pub const MAX_NDN_PACKET_SIZE: usize = 8800;

/// Usable payload budget per data packet.
pub const APP_OCTET_LIMIT: usize = MAX_NDN_PACKET_SIZE - 400;

/// Minimum spacing between issuing successive staging interests, a
/// constant derived from downstream hardware pacing requirements.
pub const PACING: Duration = Duration::from_millis(30);

/// Default overall deadline for a staging round before it is abandoned.
pub const DEFAULT_STAGE_DEADLINE: Duration = Duration::from_secs(30);

/// How many matrix rows fit in one packet for a `dim`-by-`dim` integer
/// matrix encoded at 4 bytes per cell.
pub fn rows_per_packet_matrix(dim: u32) -> u32 {
    (APP_OCTET_LIMIT as u32 / (dim * 4)).max(1)
}

/// How many image rows of `width` bytes fit in one packet.
pub fn rows_per_packet_camera(width: u32) -> u32 {
    (APP_OCTET_LIMIT as u32 / width).max(1)
}

/// Errors from a staging round.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// The round did not complete within its deadline.
    #[error("bulk staging timed out after {0:?}")]
    TimedOut(Duration),
    /// The requester declined a staging interest.
    #[error("requester declined staging interest: {0:?}")]
    Nacked(NackReason),
}

/// Describes one bulk-staging round.
#[derive(Debug, Clone, Copy)]
pub struct StagingRequest {
    /// Session this staging round belongs to.
    pub requester_id: u64,
    /// Payload kind (selects the staging name's verb token).
    pub kind: StagingKind,
    /// Total number of rows to pull.
    pub total_rows: u32,
    /// Rows requested per packet (see `rows_per_packet_*`).
    pub rows_per_packet: u32,
    /// Per-interest lifetime: 1s for matrix rounds, 2s for camera rounds.
    pub lifetime: Duration,
    /// Overall deadline for the round; defaults to
    /// [`DEFAULT_STAGE_DEADLINE`] when unset.
    pub stage_deadline: Option<Duration>,
}

fn chunk_count(total_rows: u32, rows_per_packet: u32) -> u32 {
    total_rows.div_ceil(rows_per_packet.max(1))
}

/// Run a full staging round over `face`, returning the concatenated bytes
/// of every row-range reply in row order.
pub async fn stage(face: Arc<dyn Face>, request: StagingRequest) -> Result<Vec<u8>, StagingError> {
    let deadline = request.stage_deadline.unwrap_or(DEFAULT_STAGE_DEADLINE);
    let total_chunks = chunk_count(request.total_rows, request.rows_per_packet);

    let attempt = async move {
        let mut handles = Vec::with_capacity(total_chunks as usize);
        for i in 0..total_chunks {
            let face = face.clone();
            let begin = i * request.rows_per_packet;
            let end = (begin + request.rows_per_packet).min(request.total_rows);
            let kind = request.kind;
            let requester_id = request.requester_id;
            let lifetime = request.lifetime;
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(PACING * i).await;
                fetch_chunk(&*face, requester_id, kind, begin, end, lifetime).await
            }));
        }

        let mut rows = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => rows.push(result?),
                Err(_join_error) => return Err(StagingError::TimedOut(deadline)),
            }
        }
        Ok(rows.concat())
    };

    match timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StagingError::TimedOut(deadline)),
    }
}

async fn fetch_chunk(
    face: &dyn Face,
    requester_id: u64,
    kind: StagingKind,
    begin: u32,
    end: u32,
    lifetime: Duration,
) -> Result<Vec<u8>, StagingError> {
    let mut version = 0u64;
    loop {
        let name = ecn_name::build_staging_name(kind, requester_id, begin, end, version);
        let outcome = face
            .express_interest(Interest {
                name,
                lifetime,
                must_be_fresh: true,
            })
            .await;
        match outcome {
            InterestOutcome::Data(data) => return Ok(data.content),
            InterestOutcome::Nack(reason) => return Err(StagingError::Nacked(reason)),
            InterestOutcome::Timeout => {
                tracing::warn!(requester_id, begin, end, version, "staging interest timed out, retrying");
                version += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use ecn_transport::{Data, LoopbackFace};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(32, 10), 4);
        assert_eq!(chunk_count(30, 10), 3);
        assert_eq!(chunk_count(1, 10), 1);
    }

    #[test]
    fn row_budgets_are_positive_for_small_and_large_dims() {
        assert!(rows_per_packet_matrix(1) > 0);
        assert!(rows_per_packet_matrix(4096) > 0);
        assert!(rows_per_packet_camera(1) > 0);
    }

    #[tokio::test]
    async fn stages_and_reassembles_in_row_order() {
        let face = Arc::new(LoopbackFace::new());
        let producer = face.clone();
        face.publish_interest_filter(
            "/edge-compute/requester",
            Arc::new(move |interest: Interest| {
                let producer = producer.clone();
                let name = interest.name.clone();
                tokio::spawn(async move {
                    let parsed = ecn_name::parse_staging(&name).unwrap();
                    let content = format!("{}-{}", parsed.begin, parsed.end).into_bytes();
                    let _ = producer
                        .put_data(Data {
                            name,
                            content,
                            freshness: Duration::from_secs(1),
                        })
                        .await;
                });
            }),
        )
        .await
        .unwrap();

        let bytes = stage(
            face,
            StagingRequest {
                requester_id: 1,
                kind: StagingKind::Matrix,
                total_rows: 25,
                rows_per_packet: 10,
                lifetime: Duration::from_secs(1),
                stage_deadline: Some(Duration::from_secs(2)),
            },
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8(bytes).unwrap(), "0-10".to_string() + "10-20" + "20-25");
    }

    #[tokio::test]
    async fn retries_on_timeout_with_bumped_version() {
        let face = Arc::new(LoopbackFace::new());
        let producer = face.clone();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_cb = attempts.clone();
        face.publish_interest_filter(
            "/edge-compute/requester",
            Arc::new(move |interest: Interest| {
                let producer = producer.clone();
                let attempts_cb = attempts_cb.clone();
                let name = interest.name.clone();
                tokio::spawn(async move {
                    let n = attempts_cb.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        // drop the first attempt on the floor to force a timeout
                        return;
                    }
                    let _ = producer
                        .put_data(Data {
                            name,
                            content: b"ok".to_vec(),
                            freshness: Duration::from_secs(1),
                        })
                        .await;
                });
            }),
        )
        .await
        .unwrap();

        let bytes = stage(
            face,
            StagingRequest {
                requester_id: 2,
                kind: StagingKind::DetectFaces,
                total_rows: 5,
                rows_per_packet: 5,
                lifetime: Duration::from_millis(50),
                stage_deadline: Some(Duration::from_secs(2)),
            },
        )
        .await
        .unwrap();

        assert_eq!(bytes, b"ok".to_vec());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unrouted_staging_request_surfaces_nack() {
        let face = Arc::new(LoopbackFace::new());
        let err = stage(
            face,
            StagingRequest {
                requester_id: 3,
                kind: StagingKind::Matrix,
                total_rows: 1,
                rows_per_packet: 1,
                lifetime: Duration::from_millis(50),
                stage_deadline: Some(Duration::from_secs(1)),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StagingError::Nacked(NackReason::NoRoute)));
    }
}
