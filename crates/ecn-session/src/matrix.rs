// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Matrix flavour session dispatch.
//!
//! Unlike chess, a matrix request may or may not carry a fingerprint: the
//! wire name only appends `matrix_hash` when the caller has reuse enabled
//! (§6). Without a hash, every request is staged and computed independently
//! — no cache, no single-flight, no sharing. With a hash, the first sighting
//! of a matrix stages it once, registers it in the reuse index, and every
//! later request for the same hash multiplies forward from the closest
//! cached power instead of from scratch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ecn_cache::matrix::{decode_matrix, Matrix};
use ecn_cache::MatrixCache;
use ecn_name::StagingKind;
use ecn_singleflight::{Claim, Registry, ReleaseGuard};
use ecn_staging::{rows_per_packet_matrix, stage, StagingRequest};
use ecn_transport::Face;
use ecn_workloads::MatrixKernel;
use tokio::sync::RwLock;

use crate::core::{PollOutcome, SessionCore};

const MATRIX_STAGE_LIFETIME: Duration = Duration::from_secs(1);

/// Dispatches `multiply` requests for one CN instance.
pub struct MatrixNode {
    cache: Arc<MatrixCache>,
    registry: Arc<Registry<u64>>,
    kernel: Arc<dyn MatrixKernel>,
    face: Arc<dyn Face>,
    sessions: RwLock<HashMap<u64, Arc<SessionCore>>>,
    use_cache: bool,
    stage_deadline: Duration,
}

impl MatrixNode {
    /// Build a node spilling its reuse index under `reusables_dir`.
    ///
    /// `use_cache` mirrors the CN's `<use_cache:0|1>` CLI flag: when
    /// `false`, every request is staged and computed independently
    /// regardless of whether the wire name carries a `matrix_hash`.
    pub fn new(
        reusables_dir: impl Into<std::path::PathBuf>,
        kernel: Arc<dyn MatrixKernel>,
        face: Arc<dyn Face>,
        use_cache: bool,
        stage_deadline: Duration,
    ) -> Self {
        Self {
            cache: Arc::new(MatrixCache::new(reusables_dir)),
            registry: Arc::new(Registry::new()),
            kernel,
            face,
            sessions: RwLock::new(HashMap::new()),
            use_cache,
            stage_deadline,
        }
    }

    async fn session_for(&self, requester_id: u64) -> (Arc<SessionCore>, bool) {
        if let Some(session) = self.sessions.read().await.get(&requester_id) {
            let is_idle = session.is_idle().await;
            return (session.clone(), is_idle);
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(requester_id)
            .or_insert_with(|| Arc::new(SessionCore::new()))
            .clone();
        let is_idle = session.is_idle().await;
        (session, is_idle)
    }

    /// Handle one interest for `requester_id`. Returns the reply payload —
    /// a CTT estimate (possibly `, found`) while a worker is in flight, or
    /// the literal `"Done"` once the exponentiation is ready.
    pub async fn handle_request(
        &self,
        requester_id: u64,
        dim: u32,
        exponent: u32,
        matrix_hash: Option<u64>,
    ) -> String {
        let (session, is_idle) = self.session_for(requester_id).await;
        if !is_idle {
            return match session.poll().await {
                PollOutcome::Computing(ctt) | PollOutcome::Ready(ctt) => ctt,
            };
        }

        let hash = matrix_hash.filter(|_| self.use_cache);
        match hash {
            Some(hash) => self.handle_cached(session, requester_id, dim, exponent, hash).await,
            None => self.handle_uncached(session, requester_id, dim, exponent).await,
        }
    }

    async fn handle_cached(
        &self,
        session: Arc<SessionCore>,
        requester_id: u64,
        dim: u32,
        exponent: u32,
        hash: u64,
    ) -> String {
        let found = self.cache.contains(hash).await;
        let claim = self.registry.try_claim(hash).await;
        let is_waiter = matches!(claim, Claim::Waiter(_));
        let reply = session.start(found).await;

        let registry = self.registry.clone();
        let cache = self.cache.clone();
        let kernel = self.kernel.clone();
        let face = self.face.clone();
        let stage_deadline = self.stage_deadline;

        tokio::spawn(async move {
            // Only the claimer owns a registry entry to release. A waiter's
            // gate is a one-shot notification, not a handle on "its" entry —
            // by the time it wakes, a later requester may already have
            // claimed the same hash, and releasing here would tear down
            // that unrelated claim (Registry::release only knows the
            // current occupant of the key, not which gate woke us).
            let guard = match &claim {
                Claim::Claimed => Some(ReleaseGuard::new(registry, hash)),
                Claim::Waiter(gate) => {
                    gate.wait().await;
                    None
                }
            };

            if !is_waiter && !cache.contains(hash).await {
                if let Err(err) = stage_and_register(
                    &cache,
                    &face,
                    requester_id,
                    dim,
                    hash,
                    stage_deadline,
                )
                .await
                {
                    tracing::warn!(%hash, error = %err, "matrix staging failed, degrading to no-cache path");
                    let base = match stage_matrix(&face, requester_id, dim, stage_deadline).await {
                        Ok(base) => base,
                        Err(err) => {
                            session.finish(format!("error: {err}")).await;
                            if let Some(guard) = guard {
                                guard.release().await;
                            }
                            return;
                        }
                    };
                    let result = multiply_forward(&kernel, &base, &base, 1, exponent);
                    session.finish(result.1).await;
                    if let Some(guard) = guard {
                        guard.release().await;
                    }
                    return;
                }
            }

            match cache.cursor_for(hash, dim as usize, exponent).await {
                Ok(Some(cursor)) => {
                    let (powers, _) = multiply_forward_from(
                        &kernel,
                        &cursor.base,
                        &cursor.start,
                        cursor.start_exponent,
                        exponent,
                    );
                    cache.spawn_cache_batch(hash, cursor.start_exponent, powers).await;
                }
                Ok(None) | Err(_) => {
                    tracing::warn!(%hash, "matrix cache entry vanished after staging");
                }
            }

            session.finish("Done".to_string()).await;
            if let Some(guard) = guard {
                guard.release().await;
            }
        });

        reply
    }

    async fn handle_uncached(
        &self,
        session: Arc<SessionCore>,
        requester_id: u64,
        dim: u32,
        exponent: u32,
    ) -> String {
        let reply = session.start(false).await;
        let kernel = self.kernel.clone();
        let face = self.face.clone();
        let stage_deadline = self.stage_deadline;

        tokio::spawn(async move {
            match stage_matrix(&face, requester_id, dim, stage_deadline).await {
                Ok(base) => {
                    let (_, result) = multiply_forward(&kernel, &base, &base, 1, exponent);
                    session.finish(result).await;
                }
                Err(err) => session.finish(format!("error: {err}")).await,
            }
        });

        reply
    }
}

async fn stage_matrix(
    face: &Arc<dyn Face>,
    requester_id: u64,
    dim: u32,
    stage_deadline: Duration,
) -> Result<Matrix, ecn_staging::StagingError> {
    let bytes = stage(
        face.clone(),
        StagingRequest {
            requester_id,
            kind: StagingKind::Matrix,
            total_rows: dim,
            rows_per_packet: rows_per_packet_matrix(dim),
            lifetime: MATRIX_STAGE_LIFETIME,
            stage_deadline: Some(stage_deadline),
        },
    )
    .await?;
    let encoded = String::from_utf8_lossy(&bytes).into_owned();
    decode_matrix(&encoded, dim as usize)
        .map_err(|_| ecn_staging::StagingError::TimedOut(stage_deadline))
}

async fn stage_and_register(
    cache: &Arc<MatrixCache>,
    face: &Arc<dyn Face>,
    requester_id: u64,
    dim: u32,
    hash: u64,
    stage_deadline: Duration,
) -> Result<(), ecn_staging::StagingError> {
    let base = stage_matrix(face, requester_id, dim, stage_deadline).await?;
    cache
        .register_base(hash, &base)
        .await
        .map_err(|_| ecn_staging::StagingError::TimedOut(stage_deadline))
}

/// Multiply `base` by itself, folding `start` forward from `start_exponent`
/// to `target_exponent`. Returns every newly computed power (for the cacher
/// queue) and the final power reached.
fn multiply_forward_from(
    kernel: &Arc<dyn MatrixKernel>,
    base: &Matrix,
    start: &Matrix,
    start_exponent: u32,
    target_exponent: u32,
) -> (Vec<Matrix>, Matrix) {
    let mut powers = Vec::new();
    let mut running = start.clone();
    for _ in start_exponent..target_exponent {
        running = kernel.multiply(&running, base);
        powers.push(running.clone());
    }
    (powers, running)
}

fn multiply_forward(
    kernel: &Arc<dyn MatrixKernel>,
    base: &Matrix,
    start: &Matrix,
    start_exponent: u32,
    target_exponent: u32,
) -> (Vec<Matrix>, String) {
    let (powers, _) = multiply_forward_from(kernel, base, start, start_exponent, target_exponent);
    (powers, "Done".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use ecn_cache::matrix::{content_hash, encode_matrix};
    use ecn_transport::{Data, LoopbackFace};
    use ecn_workloads::NaiveMatrixKernel;
    use std::time::Duration as StdDuration;

    fn identity(dim: usize) -> Matrix {
        (0..dim).map(|r| (0..dim).map(|c| i64::from(r == c)).collect()).collect()
    }

    fn scale2(dim: usize) -> Matrix {
        (0..dim)
            .map(|r| (0..dim).map(|c| if r == c { 2 } else { 0 }).collect())
            .collect()
    }

    fn publish_matrix_responder(face: &Arc<LoopbackFace>, matrix: Matrix) {
        let producer = face.clone();
        face_publish(face, move |interest| {
            let producer = producer.clone();
            let name = interest.name.clone();
            let matrix = matrix.clone();
            tokio::spawn(async move {
                let parsed = ecn_name::parse_staging(&name).expect("valid staging name");
                let encoded = encode_matrix(&matrix);
                let row_chars: Vec<&str> = encoded.split_inclusive('|').collect();
                let begin = parsed.begin as usize;
                let end = parsed.end as usize;
                let content = row_chars[begin..end].concat().into_bytes();
                let _ = producer
                    .put_data(Data {
                        name,
                        content,
                        freshness: StdDuration::from_secs(1),
                    })
                    .await;
            });
        });
    }

    fn face_publish(
        face: &Arc<LoopbackFace>,
        callback: impl Fn(ecn_transport::Interest) + Send + Sync + 'static,
    ) {
        let face = face.clone();
        tokio::spawn(async move {
            face.publish_interest_filter("/edge-compute/requester", Arc::new(callback))
                .await
                .expect("register filter");
        });
    }

    async fn poll_until_done(node: &MatrixNode, requester_id: u64, dim: u32, exp: u32, hash: Option<u64>) -> String {
        loop {
            let reply = node.handle_request(requester_id, dim, exp, hash).await;
            if reply == "Done" || reply.starts_with("error") {
                return reply;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn uncached_request_stages_and_computes() {
        let dir = tempfile::tempdir().unwrap();
        let face = Arc::new(LoopbackFace::new());
        let base = scale2(2);
        publish_matrix_responder(&face, base.clone());
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let node = MatrixNode::new(
            dir.path(),
            Arc::new(NaiveMatrixKernel),
            face,
            true,
            StdDuration::from_secs(2),
        );
        let first = node.handle_request(1, 2, 3, None).await;
        assert!(first.starts_with("CTT: "));
        let result = poll_until_done(&node, 1, 2, 3, None).await;
        assert_eq!(result, "Done");
    }

    #[tokio::test]
    async fn second_consumer_reuses_first_consumers_cached_power() {
        let dir = tempfile::tempdir().unwrap();
        let face = Arc::new(LoopbackFace::new());
        let base = identity(2);
        let hash = content_hash(&encode_matrix(&base));
        publish_matrix_responder(&face, base.clone());
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let node = MatrixNode::new(
            dir.path(),
            Arc::new(NaiveMatrixKernel),
            face,
            true,
            StdDuration::from_secs(2),
        );

        let first = node.handle_request(1, 2, 5, Some(hash)).await;
        assert!(!first.ends_with(", found"));
        poll_until_done(&node, 1, 2, 5, Some(hash)).await;

        let second = node.handle_request(2, 2, 7, Some(hash)).await;
        assert!(second.ends_with(", found"));
        let result = poll_until_done(&node, 2, 2, 7, Some(hash)).await;
        assert_eq!(result, "Done");
    }
}
