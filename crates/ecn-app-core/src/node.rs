// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted node configuration shared by every CN binary.
//!
//! Resolution order matches [`crate::config::ConfigService`]'s existing
//! `HostPrefs` pattern in `echo-session-service`: built-in defaults, then a
//! value loaded from the config store, then CLI flags override whatever
//! the store produced. The binary persists the resolved value back to the
//! store on first run so a later invocation without flags reuses it.

use serde::{Deserialize, Serialize};

/// Config shared by the chess, matrix, and camera CN binaries. Only the
/// fields a given flavour uses are meaningful to it; unused fields are
/// still persisted so one config file can be shared across flavours run
/// from the same host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Admission probability for non-opening FENs (chess only).
    pub non_first_frac: f64,
    /// Whether the reuse cache is consulted at all.
    pub use_cache: bool,
    /// Directory the matrix flavour spills base matrices and cached powers
    /// to (`reusables/` by default, per the wire spec).
    pub reusables_dir: String,
    /// Overall deadline, in milliseconds, before a stalled bulk-staging
    /// round is abandoned and surfaced as an error to the session.
    pub stage_deadline_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            non_first_frac: 0.0,
            use_cache: true,
            reusables_dir: "reusables".to_string(),
            stage_deadline_ms: 30_000,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.reusables_dir, "reusables");
        assert_eq!(config.stage_deadline_ms, 30_000);
        assert!(config.use_cache);
    }

    #[test]
    fn round_trips_through_json() {
        let config = NodeConfig {
            non_first_frac: 0.25,
            use_cache: false,
            reusables_dir: "/tmp/reusables".to_string(),
            stage_deadline_ms: 5_000,
        };
        let json = serde_json::to_vec(&config).expect("serialize");
        let back: NodeConfig = serde_json::from_slice(&json).expect("deserialize");
        assert_eq!(config, back);
    }
}
