//! Chess reuse table: a closed admission set of opening positions plus a
//! probabilistic top-up, keyed by FEN, storing results per search depth.

use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// The twenty opening positions the original engine operator pre-seeded the
/// reuse table with: eight single-pawn advances (files a-h, one square and
/// two squares) and four knight developments. These always get admitted,
/// regardless of `non_first_frac`.
pub const OPENING_FENS: [&str; 20] = [
    "rnbqkbnr/pppppppp/8/8/8/P7/1PPPPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/1P6/P1PPPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/2P5/PP1PPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/3P4/PPP1PPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/4P3/PPPP1PPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/5P2/PPPPP1PP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/6P1/PPPPPP1P/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/7P/PPPPPPP1/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/P7/8/1PPPPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/1P6/8/P1PPPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/2P5/8/PP1PPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/5P2/8/PPPPP1PP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/6P1/8/PPPPPP1P/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/7P/8/PPPPPPP1/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/N7/PPPPPPPP/R1BQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/2N5/PPPPPPPP/R1BQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/5N2/PPPPPPPP/RNBQKB1R w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/8/7N/PPPPPPPP/RNBQKB1R w KQkq - 0 1",
];

/// Reuse table for the chess flavour: FEN -> (depth -> rendered best move).
///
/// Every one of the twenty opening FENs is admitted unconditionally the
/// first time it is seen; any other FEN is admitted with probability
/// `non_first_frac`, sampled once per first-sighting. The table is
/// otherwise unbounded — admission beyond the openings is a policy choice,
/// not a capacity limit.
pub struct ChessCache {
    table: RwLock<HashMap<String, BTreeMap<u32, String>>>,
    non_first_frac: f64,
}

impl ChessCache {
    /// Build an empty cache. `non_first_frac` is the admission probability
    /// (in `[0.0, 1.0]`) for FENs outside the opening set.
    pub fn new(non_first_frac: f64) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            non_first_frac,
        }
    }

    /// Look up a memoized result for `fen` at `depth`, if the position is
    /// admitted and that depth has already been computed.
    pub async fn lookup(&self, fen: &str, depth: u32) -> Option<String> {
        let table = self.table.read().await;
        table.get(fen).and_then(|depths| depths.get(&depth)).cloned()
    }

    /// `true` if `fen` already has a reserved slot in the table (admitted,
    /// whether or not any depth has been computed for it yet).
    pub async fn is_admitted(&self, fen: &str) -> bool {
        self.table.read().await.contains_key(fen)
    }

    /// Decide whether `fen` should be admitted, applying the closed-set rule
    /// above, and reserve its slot if so. Returns `true` if the FEN is (now,
    /// or already) in the table.
    ///
    /// Mirrors the original's double-checked pattern: a position already in
    /// the table is reported admitted without consuming randomness; a new
    /// position only rolls the dice while the table has room.
    pub async fn admit_if_needed(&self, fen: &str, rng: &mut impl Rng) -> bool {
        if self.table.read().await.contains_key(fen) {
            return true;
        }
        let mut table = self.table.write().await;
        if table.contains_key(fen) {
            return true;
        }
        let admit = OPENING_FENS.contains(&fen) || rng.gen_range(0.0..1.0) < self.non_first_frac;
        if admit {
            table.insert(fen.to_string(), BTreeMap::new());
        }
        admit
    }

    /// Record a computed result for an admitted FEN. A no-op if `fen` was
    /// never admitted (the caller should still deliver the result to the
    /// requester; it just won't be memoized).
    pub async fn store(&self, fen: &str, depth: u32, result: String) {
        let mut table = self.table.write().await;
        if let Some(depths) = table.get_mut(fen) {
            depths.insert(depth, result);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[tokio::test]
    async fn opening_fens_are_always_admitted() {
        let cache = ChessCache::new(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        for fen in OPENING_FENS {
            assert!(cache.admit_if_needed(fen, &mut rng).await);
        }
    }

    #[tokio::test]
    async fn non_opening_fen_admitted_when_probability_is_one() {
        let cache = ChessCache::new(1.0);
        let mut rng = StdRng::seed_from_u64(2);
        for fen in OPENING_FENS {
            assert!(cache.admit_if_needed(fen, &mut rng).await);
        }
        // the table is not capped at the twenty openings: a further
        // distinct FEN is still admitted when non_first_frac = 1.0
        let extra = "8/8/8/8/8/8/8/8 w - - 0 1";
        assert!(cache.admit_if_needed(extra, &mut rng).await);
        assert!(cache.is_admitted(extra).await);
    }

    #[tokio::test]
    async fn zero_probability_rejects_non_opening_fens() {
        let cache = ChessCache::new(0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let other = "8/8/8/8/8/8/8/8 w - - 0 1";
        assert!(!cache.admit_if_needed(other, &mut rng).await);
    }

    #[tokio::test]
    async fn store_is_noop_for_unadmitted_fen() {
        let cache = ChessCache::new(0.0);
        let fen = "8/8/8/8/8/8/8/8 w - - 0 1";
        cache.store(fen, 3, "e2e4".to_string()).await;
        assert_eq!(cache.lookup(fen, 3).await, None);
    }

    #[tokio::test]
    async fn admitted_results_round_trip_per_depth() {
        let cache = ChessCache::new(0.0);
        let mut rng = StdRng::seed_from_u64(4);
        let fen = OPENING_FENS[0];
        assert!(cache.admit_if_needed(fen, &mut rng).await);
        cache.store(fen, 3, "e2e4".to_string()).await;
        cache.store(fen, 5, "d2d4".to_string()).await;
        assert_eq!(cache.lookup(fen, 3).await.as_deref(), Some("e2e4"));
        assert_eq!(cache.lookup(fen, 5).await.as_deref(), Some("d2d4"));
        assert_eq!(cache.lookup(fen, 7).await, None);
    }
}
