// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named-data transport shim.
//!
//! The real deployment target is a named-data networking face (interests
//! in, data or NACKs out, timeouts on the side) backed by a library such as
//! `ndn-cxx`. That library is out of scope here, so this crate defines the
//! [`Face`] trait the rest of the node programs against, and ships
//! [`LoopbackFace`], an in-process channel-backed implementation sufficient
//! to drive every session/staging test without a real network stack.
//! Production deployments supply a different `Face` adapter; wiring one up
//! is outside this crate's job.

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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// An outbound or inbound named-data packet. The payload is treated as
/// opaque bytes by the transport; every encoding/decoding concern lives in
/// `ecn-name` and the workload crates.
#[derive(Debug, Clone)]
pub struct Interest {
    /// Full interest name, e.g. `/edge-compute/computer/7/chess/3/<fen>`.
    pub name: String,
    /// How long the producer side should wait before giving up.
    pub lifetime: Duration,
    /// If `true`, a stale cached reply must not satisfy this interest.
    pub must_be_fresh: bool,
}

/// A named-data reply to some interest.
#[derive(Debug, Clone)]
pub struct Data {
    /// Name this data satisfies (matched against outstanding interests by
    /// the caller, per the bulk-staging matching rule in `ecn-staging`).
    pub name: String,
    /// Reply payload, UTF-8 text by convention for every flavour here.
    pub content: Vec<u8>,
    /// How long downstream caches may consider this data fresh.
    pub freshness: Duration,
}

/// Why an interest was not satisfied with data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// No producer claims a matching prefix.
    NoRoute,
    /// A producer exists but declined to answer (e.g. malformed name).
    Rejected,
    /// Local congestion; the consumer should back off and retry.
    Congestion,
}

/// Errors a [`Face`] implementation can report synchronously (as opposed to
/// `Nack`/timeout, which are asynchronous outcomes of `express_interest`).
#[derive(Debug, thiserror::Error)]
pub enum FaceError {
    /// The face has been closed and can no longer register filters or send.
    #[error("transport face is closed")]
    Closed,
    /// Registering an interest filter failed (e.g. prefix already taken).
    #[error("failed to register interest filter {prefix:?}: {reason}")]
    FilterRegistration {
        /// The prefix that could not be registered.
        prefix: String,
        /// Human-readable cause, forwarded from the underlying transport.
        reason: String,
    },
}

/// Outcome of [`Face::express_interest`].
#[derive(Debug, Clone)]
pub enum InterestOutcome {
    /// Matching data arrived before the interest's lifetime elapsed.
    Data(Data),
    /// A producer explicitly declined.
    Nack(NackReason),
    /// No reply arrived before the interest's lifetime elapsed.
    Timeout,
}

/// The named-data transport handle: producers register interest filters and
/// publish data; consumers express interests and await a reply.
#[async_trait]
pub trait Face: Send + Sync {
    /// Register this face as the producer for `prefix`; every subsequent
    /// interest with a matching name is delivered to `on_interest`.
    async fn publish_interest_filter(
        &self,
        prefix: &str,
        on_interest: Arc<dyn Fn(Interest) + Send + Sync>,
    ) -> Result<(), FaceError>;

    /// Express an interest and wait for data, a NACK, or the interest's own
    /// lifetime to elapse, whichever comes first.
    async fn express_interest(&self, interest: Interest) -> InterestOutcome;

    /// Reply to a previously delivered interest with `data`.
    async fn put_data(&self, data: Data) -> Result<(), FaceError>;
}

struct Filter {
    prefix: String,
    callback: Arc<dyn Fn(Interest) + Send + Sync>,
}

/// An in-process [`Face`] backed by channels: `express_interest` delivers
/// the interest to whichever registered filter's prefix matches, and
/// `put_data` delivers to whichever pending `express_interest` call is
/// waiting on a name match. No real network I/O occurs; this is the harness
/// every test and the demo binary runs against.
#[derive(Default)]
pub struct LoopbackFace {
    filters: Mutex<Vec<Filter>>,
    pending: Mutex<HashMap<String, mpsc::Sender<Data>>>,
}

impl LoopbackFace {
    /// Build an empty loopback face.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Face for LoopbackFace {
    async fn publish_interest_filter(
        &self,
        prefix: &str,
        on_interest: Arc<dyn Fn(Interest) + Send + Sync>,
    ) -> Result<(), FaceError> {
        self.filters.lock().await.push(Filter {
            prefix: prefix.to_string(),
            callback: on_interest,
        });
        Ok(())
    }

    async fn express_interest(&self, interest: Interest) -> InterestOutcome {
        let matched = {
            let filters = self.filters.lock().await;
            filters
                .iter()
                .find(|f| interest.name.starts_with(&f.prefix))
                .map(|f| f.callback.clone())
        };
        let Some(callback) = matched else {
            return InterestOutcome::Nack(NackReason::NoRoute);
        };

        let (tx, mut rx) = mpsc::channel(1);
        self.pending.lock().await.insert(interest.name.clone(), tx);
        callback(interest.clone());

        match timeout(interest.lifetime, rx.recv()).await {
            Ok(Some(data)) => InterestOutcome::Data(data),
            Ok(None) => InterestOutcome::Nack(NackReason::Rejected),
            Err(_) => {
                self.pending.lock().await.remove(&interest.name);
                InterestOutcome::Timeout
            }
        }
    }

    async fn put_data(&self, data: Data) -> Result<(), FaceError> {
        let sender = self.pending.lock().await.remove(&data.name);
        if let Some(sender) = sender {
            let _ = sender.send(data).await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_prefix_yields_no_route_nack() {
        let face = LoopbackFace::new();
        let outcome = face
            .express_interest(Interest {
                name: "/edge-compute/computer/1/chess/3/x".to_string(),
                lifetime: Duration::from_millis(50),
                must_be_fresh: true,
            })
            .await;
        assert!(matches!(outcome, InterestOutcome::Nack(NackReason::NoRoute)));
    }

    #[tokio::test]
    async fn registered_producer_can_reply() {
        let face = Arc::new(LoopbackFace::new());
        let producer = face.clone();
        face.publish_interest_filter(
            "/edge-compute/computer",
            Arc::new(move |interest: Interest| {
                let producer = producer.clone();
                let name = interest.name.clone();
                tokio::spawn(async move {
                    let _ = producer
                        .put_data(Data {
                            name,
                            content: b"CTT: 100".to_vec(),
                            freshness: Duration::from_secs(10),
                        })
                        .await;
                });
            }),
        )
        .await
        .unwrap();

        let outcome = face
            .express_interest(Interest {
                name: "/edge-compute/computer/1/chess/3/x".to_string(),
                lifetime: Duration::from_millis(200),
                must_be_fresh: true,
            })
            .await;
        match outcome {
            InterestOutcome::Data(data) => assert_eq!(data.content, b"CTT: 100"),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_reply_times_out() {
        let face = Arc::new(LoopbackFace::new());
        face.publish_interest_filter("/edge-compute/computer", Arc::new(|_interest| {}))
            .await
            .unwrap();
        let outcome = face
            .express_interest(Interest {
                name: "/edge-compute/computer/1/chess/3/x".to_string(),
                lifetime: Duration::from_millis(20),
                must_be_fresh: true,
            })
            .await;
        assert!(matches!(outcome, InterestOutcome::Timeout));
    }
}
