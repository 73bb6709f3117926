// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-fingerprint single-flight coordination.
//!
//! A [`Registry`] maps a content fingerprint (a FEN, a matrix hash, ...) to a
//! binary [`Gate`]. Exactly one caller per fingerprint is told it won the
//! race ([`Claim::Claimed`]); every other concurrent caller for the same
//! fingerprint gets back a handle on the same gate ([`Claim::Waiter`]) and
//! blocks in [`Gate::wait`] until the winner releases it.
//!
//! The gate is a plain armed/fired flip-flop guarded by its own mutex, with
//! a [`tokio::sync::Notify`] for wakeups — the async analogue of the binary
//! semaphore + condition variable this design descends from.

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
#![allow(
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A binary gate: `armed` means free to claim, `fired` means a computation
/// currently holds it.
#[derive(Debug, Default)]
pub struct Gate {
    armed: Mutex<bool>,
    notify: Notify,
}

impl Gate {
    fn new_armed() -> Self {
        Self {
            armed: Mutex::new(true),
            notify: Notify::new(),
        }
    }

    /// Block until the gate is armed, then flip it to fired and return.
    ///
    /// Used both by the winner of `try_claim` (returns immediately, since a
    /// freshly inserted gate starts armed) and by a waiter that wants to be
    /// woken exactly once the current holder releases.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            {
                let mut armed = self.armed.lock().await;
                if *armed {
                    *armed = false;
                    return;
                }
            }
            notified.await;
        }
    }

    /// Flip the gate back to armed and wake every waiter.
    pub async fn release(&self) {
        let mut armed = self.armed.lock().await;
        *armed = true;
        self.notify.notify_waiters();
    }
}

/// Outcome of [`Registry::try_claim`].
pub enum Claim {
    /// This caller is the sole owner of the computation for the fingerprint;
    /// no one else was in flight.
    Claimed,
    /// Someone else already holds the gate for this fingerprint. The caller
    /// should record `wait_to_grab = true` and later await [`Gate::wait`] on
    /// the returned handle before reading the reuse cache.
    Waiter(Arc<Gate>),
}

/// Per-fingerprint single-flight registry.
///
/// An entry exists only while a computation for that fingerprint is in
/// flight; [`Registry::release`] removes it.
pub struct Registry<K> {
    gates: Mutex<HashMap<K, Arc<Gate>>>,
}

impl<K> Default for Registry<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> Registry<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim exclusive computation rights for `fingerprint`.
    ///
    /// If no one else holds the gate, inserts a fresh one, claims it, and
    /// returns [`Claim::Claimed`]. Otherwise returns the existing gate as
    /// [`Claim::Waiter`] so the caller can wait for the current holder to
    /// release it.
    pub async fn try_claim(&self, fingerprint: K) -> Claim {
        let mut gates = self.gates.lock().await;
        match gates.get(&fingerprint) {
            Some(existing) => Claim::Waiter(existing.clone()),
            None => {
                let gate = Arc::new(Gate::new_armed());
                gate.wait().await; // uncontended: flips armed -> fired immediately
                gates.insert(fingerprint, gate);
                Claim::Claimed
            }
        }
    }

    /// Release the gate for `fingerprint`, waking every waiter, and remove
    /// the entry. A no-op if no gate is registered for that fingerprint.
    pub async fn release(&self, fingerprint: &K) {
        let gate = { self.gates.lock().await.remove(fingerprint) };
        if let Some(gate) = gate {
            gate.release().await;
        }
    }
}

/// RAII guard that releases a fingerprint's gate on drop if it has not
/// already been released explicitly.
///
/// Workers should arm one of these immediately after `try_claim` returns
/// `Claimed`, and call [`ReleaseGuard::release`] on every exit path
/// (success, compute failure, cancellation). The `Drop` impl is a backstop
/// for paths that skip the explicit call (e.g. a panic unwinding past it);
/// it spawns a task to perform the release since `Drop` cannot be async.
pub struct ReleaseGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    registry: Arc<Registry<K>>,
    fingerprint: Option<K>,
}

impl<K> ReleaseGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Arm a guard for `fingerprint` against `registry`.
    pub fn new(registry: Arc<Registry<K>>, fingerprint: K) -> Self {
        Self {
            registry,
            fingerprint: Some(fingerprint),
        }
    }

    /// Release the gate now, disarming the guard so `Drop` is a no-op.
    pub async fn release(mut self) {
        if let Some(fp) = self.fingerprint.take() {
            self.registry.release(&fp).await;
        }
    }
}

impl<K> Drop for ReleaseGuard<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(fp) = self.fingerprint.take() {
            let registry = self.registry.clone();
            tracing::warn!("single-flight guard dropped without explicit release; releasing from Drop");
            tokio::spawn(async move {
                registry.release(&fp).await;
            });
        }
    }
}
