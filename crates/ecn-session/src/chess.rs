// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Chess flavour session dispatch.
//!
//! Every worker — whether it won `try_claim` or is a concurrent waiter for
//! the same FEN — runs the same lookup-or-compute body before releasing the
//! single-flight gate, mirroring the original engine's `optimalMove`: there
//! is no "only the claimer computes" shortcut, since a waiter that wakes up
//! still needs to read the now-populated cache entry itself.

use std::collections::HashMap;
use std::sync::Arc;

use ecn_cache::ChessCache;
use ecn_singleflight::{Claim, Registry, ReleaseGuard};
use ecn_workloads::ChessEngine;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{Mutex, RwLock};

use crate::core::{PollOutcome, SessionCore};

/// Dispatches chess requests for one CN instance: one reuse cache, one
/// single-flight registry keyed by FEN, and one session per `requester_id`.
pub struct ChessNode {
    cache: Arc<ChessCache>,
    registry: Arc<Registry<String>>,
    engine: Arc<dyn ChessEngine>,
    sessions: RwLock<HashMap<u64, Arc<SessionCore>>>,
    rng: Arc<Mutex<StdRng>>,
}

impl ChessNode {
    /// Build a node with a closed-admission cache tuned by `non_first_frac`
    /// and the given search collaborator.
    pub fn new(non_first_frac: f64, engine: Arc<dyn ChessEngine>) -> Self {
        Self {
            cache: Arc::new(ChessCache::new(non_first_frac)),
            registry: Arc::new(Registry::new()),
            engine,
            sessions: RwLock::new(HashMap::new()),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
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
    /// a CTT estimate while a worker is in flight, or the engine's response
    /// string once it is ready.
    pub async fn handle_request(&self, requester_id: u64, fen: String, depth: u32) -> String {
        let (session, is_idle) = self.session_for(requester_id).await;
        if !is_idle {
            return match session.poll().await {
                PollOutcome::Computing(ctt) | PollOutcome::Ready(ctt) => ctt,
            };
        }

        let claim = self.registry.try_claim(fen.clone()).await;
        let reply = session.start(false).await;

        let session = session.clone();
        let registry = self.registry.clone();
        let cache = self.cache.clone();
        let engine = self.engine.clone();
        let rng = self.rng.clone();
        let fen_for_worker = fen.clone();

        tokio::spawn(async move {
            // Only the claimer owns a registry entry to release. A waiter's
            // gate is a one-shot notification, not a handle on "its" entry —
            // by the time it wakes, a later requester may already have
            // claimed the same fingerprint, and releasing here would tear
            // down that unrelated claim (Registry::release only knows the
            // current occupant of the key, not which gate woke us).
            let guard = match &claim {
                Claim::Claimed => Some(ReleaseGuard::new(registry, fen_for_worker.clone())),
                Claim::Waiter(gate) => {
                    gate.wait().await;
                    None
                }
            };

            let result = match cache.lookup(&fen_for_worker, depth).await {
                Some(cached) => cached,
                None => {
                    let admitted = {
                        let mut rng = rng.lock().await;
                        cache.admit_if_needed(&fen_for_worker, &mut *rng).await
                    };
                    let computed = engine.search(&fen_for_worker, depth).await;
                    if admitted {
                        cache.store(&fen_for_worker, depth, computed.clone()).await;
                    }
                    computed
                }
            };

            session.finish(result).await;
            if let Some(guard) = guard {
                guard.release().await;
            }
        });

        reply
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use ecn_cache::chess::OPENING_FENS;
    use ecn_workloads::DeterministicChessEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn poll_until_ready(node: &ChessNode, requester_id: u64, fen: &str, depth: u32) -> String {
        loop {
            let reply = node
                .handle_request(requester_id, fen.to_string(), depth)
                .await;
            if !reply.starts_with("CTT") {
                return reply;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn opening_hit_returns_engines_deterministic_output() {
        let node = ChessNode::new(0.0, Arc::new(DeterministicChessEngine));
        let fen = OPENING_FENS[0];
        let first = node.handle_request(1, fen.to_string(), 3).await;
        assert!(first.starts_with("CTT: "));
        let result = poll_until_ready(&node, 1, fen, 3).await;

        let engine = DeterministicChessEngine;
        let expected = engine.search(fen, 3).await;
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn second_requester_hits_cache_for_same_opening() {
        let node = ChessNode::new(0.0, Arc::new(DeterministicChessEngine));
        let fen = OPENING_FENS[1];
        node.handle_request(1, fen.to_string(), 2).await;
        let first_result = poll_until_ready(&node, 1, fen, 2).await;

        // a distinct requester_id gets its own session, but the underlying
        // reuse cache is shared: this second caller's worker should find the
        // (fen, depth) pair already populated and skip the engine entirely.
        node.handle_request(2, fen.to_string(), 2).await;
        let second_result = poll_until_ready(&node, 2, fen, 2).await;
        assert_eq!(first_result, second_result);
    }

    #[tokio::test]
    async fn non_opening_fen_never_admitted_when_frac_is_zero() {
        let node = ChessNode::new(0.0, Arc::new(DeterministicChessEngine));
        let fen = "8/8/8/8/8/8/8/8 w - - 0 1";
        node.handle_request(1, fen.to_string(), 4).await;
        poll_until_ready(&node, 1, fen, 4).await;
        assert!(!node.cache.is_admitted(fen).await);
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_fen_share_one_computation() {
        // the deterministic engine sleeps proportional to depth, so two
        // requests issued within microseconds of each other race for the
        // single-flight gate; exactly one of them should be the claimer.
        let calls = Arc::new(AtomicUsize::new(0));

        struct CountingEngine {
            calls: Arc<AtomicUsize>,
            inner: DeterministicChessEngine,
        }

        #[async_trait::async_trait]
        impl ChessEngine for CountingEngine {
            async fn search(&self, fen: &str, depth: u32) -> String {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.search(fen, depth).await
            }
        }

        let engine = Arc::new(CountingEngine {
            calls: calls.clone(),
            inner: DeterministicChessEngine,
        });
        let node = Arc::new(ChessNode::new(1.0, engine));
        let fen = "8/8/8/8/8/8/8/8 w - - 0 5";

        let a = {
            let node = node.clone();
            let fen = fen.to_string();
            tokio::spawn(async move { node.handle_request(1, fen, 5).await })
        };
        let b = {
            let node = node.clone();
            let fen = fen.to_string();
            tokio::spawn(async move { node.handle_request(2, fen, 5).await })
        };
        timeout(Duration::from_secs(1), a).await.unwrap().unwrap();
        timeout(Duration::from_secs(1), b).await.unwrap().unwrap();

        let first = poll_until_ready(&node, 1, fen, 5).await;
        let second = poll_until_ready(&node, 2, fen, 5).await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
