//! Per-session face-detection reuse table: for each overlap ratio the
//! session has been asked to detect at, an ordered set of already-detected
//! rectangles in absolute frame coordinates.
//!
//! Unlike the chess and matrix flavours this cache is not shared across the
//! node; the session manager owns one instance per client and it only ever
//! grows for the lifetime of that session (or is explicitly reset by a
//! `first` request).

use std::collections::{BTreeSet, HashMap};

/// A detected face rectangle in absolute frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rect {
    /// Left edge, absolute.
    pub x0: i64,
    /// Top edge, absolute.
    pub y0: i64,
    /// Right edge, absolute.
    pub x1: i64,
    /// Bottom edge, absolute.
    pub y1: i64,
}

impl Rect {
    /// Build a rectangle from its four edges.
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Translate this rectangle by `(dx, dy)`, producing absolute
    /// coordinates from ones relative to a detection strip.
    pub fn translated(self, dx: i64, dy: i64) -> Self {
        Self {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }
}

/// Overlap ratios key the table by bit pattern rather than by `f64`
/// directly, since `f64` is not `Eq`/`Hash`; callers always pass the same
/// literal ratio back for a given session stream so this never needs
/// approximate comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OverlapKey(u64);

impl From<f64> for OverlapKey {
    fn from(value: f64) -> Self {
        Self(value.to_bits())
    }
}

/// Reuse table for one session's face-detection requests.
#[derive(Debug, Default)]
pub struct CameraCache {
    table: HashMap<OverlapKey, BTreeSet<Rect>>,
}

impl CameraCache {
    /// Build an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if no detections have been recorded yet for `overlap` (either
    /// never seen, or explicitly reset by [`CameraCache::invalidate`]).
    pub fn is_empty(&self, overlap: f64) -> bool {
        self.table
            .get(&OverlapKey::from(overlap))
            .is_none_or(BTreeSet::is_empty)
    }

    /// Reset the table for `overlap`, as a `first`-flagged request does: the
    /// caller is declaring this is a fresh detection run, so prior
    /// rectangles should not be reused as strip-overlap context.
    pub fn invalidate(&mut self, overlap: f64) {
        self.table.remove(&OverlapKey::from(overlap));
    }

    /// Recover previously detected rectangles whose left edge is at or past
    /// `threshold_x`, i.e. the ones a new strip detection at this overlap
    /// still needs to account for.
    pub fn recover(&self, overlap: f64, threshold_x: i64) -> Vec<Rect> {
        self.table
            .get(&OverlapKey::from(overlap))
            .map(|rects| rects.iter().filter(|r| r.x0 >= threshold_x).copied().collect())
            .unwrap_or_default()
    }

    /// Merge newly detected (already absolute-coordinate) rectangles into
    /// the ordered set for `overlap`.
    pub fn insert_all(&mut self, overlap: f64, rects: impl IntoIterator<Item = Rect>) {
        self.table.entry(OverlapKey::from(overlap)).or_default().extend(rects);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn fresh_overlap_is_empty() {
        let cache = CameraCache::new();
        assert!(cache.is_empty(0.5));
        assert!(cache.recover(0.5, 0).is_empty());
    }

    #[test]
    fn insert_and_recover_by_threshold() {
        let mut cache = CameraCache::new();
        cache.insert_all(
            0.5,
            [Rect::new(0, 0, 10, 10), Rect::new(20, 0, 30, 10), Rect::new(50, 0, 60, 10)],
        );
        assert!(!cache.is_empty(0.5));
        let recovered = cache.recover(0.5, 25);
        assert_eq!(recovered, vec![Rect::new(50, 0, 60, 10)]);
    }

    #[test]
    fn invalidate_resets_overlap_independently() {
        let mut cache = CameraCache::new();
        cache.insert_all(0.5, [Rect::new(0, 0, 10, 10)]);
        cache.insert_all(0.75, [Rect::new(0, 0, 10, 10)]);
        cache.invalidate(0.5);
        assert!(cache.is_empty(0.5));
        assert!(!cache.is_empty(0.75));
    }

    #[test]
    fn translated_shifts_all_edges() {
        let rect = Rect::new(1, 2, 3, 4).translated(10, -1);
        assert_eq!(rect, Rect::new(11, 1, 13, 3));
    }
}
