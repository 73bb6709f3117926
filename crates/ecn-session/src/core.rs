// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The per-session state machine shared by all three flavours: idle ->
//! computing -> ready -> idle, driven entirely by [`SessionCore::start`],
//! [`SessionCore::poll`], and [`SessionCore::finish`]. Everything
//! flavour-specific (what gets computed, what the final payload looks like)
//! lives one layer up in `chess`/`matrix`/`camera`.

use tokio::sync::Mutex;

/// Where a session currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No computation in flight; the next interest starts a fresh one.
    Idle,
    /// A worker is running; polls return a CTT estimate.
    Computing,
    /// The worker has published its result; the next poll delivers it and
    /// resets the session to `Idle`.
    Ready,
}

/// What a poll against a session should reply with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still running; carries the CTT wire string for this poll.
    Computing(String),
    /// Done; carries the final reply payload. The session has already been
    /// reset to `Idle` by the time this is returned.
    Ready(String),
}

struct Inner {
    phase: Phase,
    iteration: u64,
    content: Option<String>,
    found: bool,
}

/// Shared per-`requester_id` state: an iteration counter, a found flag (used
/// by the matrix flavour's CTT `, found` suffix), and a result cell.
pub struct SessionCore {
    inner: Mutex<Inner>,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCore {
    /// Build a fresh, idle session.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                iteration: 0,
                content: None,
                found: false,
            }),
        }
    }

    /// `true` if the session is not currently computing or holding a ready
    /// result, i.e. the next interest for this `requester_id` should start a
    /// fresh worker.
    pub async fn is_idle(&self) -> bool {
        self.inner.lock().await.phase == Phase::Idle
    }

    /// Transition `Idle -> Computing` for the first interest of a cycle and
    /// return its CTT wire string. `found_in_cache` is only meaningful for
    /// the matrix flavour; every other caller passes `false`.
    pub async fn start(&self, found_in_cache: bool) -> String {
        let mut inner = self.inner.lock().await;
        inner.phase = Phase::Computing;
        inner.iteration = 1;
        inner.content = None;
        inner.found = found_in_cache;
        ecn_ctt::render(inner.iteration, inner.found)
    }

    /// Handle a subsequent interest: if the worker has finished, deliver the
    /// result and reset to `Idle`; otherwise bump the iteration count and
    /// return the next CTT estimate.
    pub async fn poll(&self) -> PollOutcome {
        let mut inner = self.inner.lock().await;
        if inner.phase == Phase::Ready {
            let content = inner.content.take().unwrap_or_default();
            inner.phase = Phase::Idle;
            inner.iteration = 0;
            inner.found = false;
            return PollOutcome::Ready(content);
        }
        inner.iteration += 1;
        PollOutcome::Computing(ecn_ctt::render(inner.iteration, inner.found))
    }

    /// Record the worker's final payload and transition `Computing -> Ready`.
    pub async fn finish(&self, content: String) {
        let mut inner = self.inner.lock().await;
        inner.content = Some(content);
        inner.phase = Phase::Ready;
    }
}
