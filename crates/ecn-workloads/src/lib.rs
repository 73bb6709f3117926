// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Compute collaborators for the three flavours the session manager
//! dispatches to.
//!
//! The actual search engine, linear-algebra kernel, and face detector are
//! each treated as an opaque external collaborator by the rest of this
//! crate family — only their call shape matters. This crate defines that
//! shape as a trait per flavour, and ships one deterministic reference
//! implementation of each, sufficient to drive the session state machine
//! and reuse caches end to end without a real chess engine, optimized BLAS
//! kernel, or vision pipeline.

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

use async_trait::async_trait;
use ecn_cache::matrix::Matrix;
use ecn_cache::Rect;
use std::time::Duration;

/// A search collaborator: given a position and a search depth, produce the
/// engine's response string (conventionally its chosen best move).
#[async_trait]
pub trait ChessEngine: Send + Sync {
    /// Run a full position/depth search and return the engine's response.
    async fn search(&self, fen: &str, depth: u32) -> String;
}

/// Deterministic stand-in chess engine: derives a plausible-looking UCI
/// move from a content hash of `(fen, depth)`, so the same input always
/// produces the same output without needing an actual move generator or
/// evaluation function. A short sleep proportional to depth simulates the
/// engine doing real work, which is what makes the single-flight race in
/// scenario 6 of the testable-properties section observable in tests.
#[derive(Debug, Default)]
pub struct DeterministicChessEngine;

#[async_trait]
impl ChessEngine for DeterministicChessEngine {
    async fn search(&self, fen: &str, depth: u32) -> String {
        tokio::time::sleep(Duration::from_millis(u64::from(depth) * 5)).await;
        let digest = blake3::hash(format!("{fen}|{depth}").as_bytes());
        let bytes = digest.as_bytes();
        let files = [b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h'];
        let from_file = files[usize::from(bytes[0]) % 8] as char;
        let from_rank = bytes[1] % 8 + 1;
        let to_file = files[usize::from(bytes[2]) % 8] as char;
        let to_rank = bytes[3] % 8 + 1;
        format!("{from_file}{from_rank}{to_file}{to_rank}")
    }
}

/// A linear-algebra collaborator: multiply two same-dimension integer
/// matrices. Synchronous and CPU-bound, unlike the other two flavours.
pub trait MatrixKernel: Send + Sync {
    /// Compute `a * b` for two `dim`-by-`dim` matrices.
    fn multiply(&self, a: &Matrix, b: &Matrix) -> Matrix;
}

/// Schoolbook O(n^3) multiply. Correct for any dimension; no attempt at
/// blocking or SIMD, since the point here is reuse-cache behaviour, not
/// kernel throughput.
#[derive(Debug, Default)]
pub struct NaiveMatrixKernel;

impl MatrixKernel for NaiveMatrixKernel {
    fn multiply(&self, a: &Matrix, b: &Matrix) -> Matrix {
        let dim = a.len();
        let mut out = vec![vec![0i64; dim]; dim];
        for (i, row) in a.iter().enumerate() {
            for (k, &a_ik) in row.iter().enumerate() {
                if a_ik == 0 {
                    continue;
                }
                for (j, &b_kj) in b[k].iter().enumerate() {
                    out[i][j] += a_ik * b_kj;
                }
            }
        }
        out
    }
}

/// The sub-region of a snapshot a detection pass should run over, in pixel
/// coordinates relative to the snapshot's own origin.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRegion {
    /// Left edge of the region to scan.
    pub x0: i64,
    /// Top edge of the region to scan.
    pub y0: i64,
    /// Right edge of the region to scan.
    pub x1: i64,
    /// Bottom edge of the region to scan.
    pub y1: i64,
}

/// A vision collaborator: detect faces within a region of a snapshot,
/// returning rectangles already offset by the region's own origin (i.e. in
/// the snapshot's own coordinate frame, not the caller's sliding-window
/// absolute frame). The session layer only has to add the sliding-window
/// shift on top of that, not the region's origin again.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detect faces in `region` of `snapshot`.
    async fn detect(&self, snapshot: &[u8], region: DetectionRegion) -> Vec<Rect>;
}

/// Deterministic stand-in detector: hashes the snapshot bytes together with
/// the scanned region and derives a small, reproducible set of rectangles
/// from the digest, so repeated calls against the same snapshot/region
/// always report the same detections.
#[derive(Debug, Default)]
pub struct DeterministicFaceDetector;

#[async_trait]
impl FaceDetector for DeterministicFaceDetector {
    async fn detect(&self, snapshot: &[u8], region: DetectionRegion) -> Vec<Rect> {
        let width = region.x1 - region.x0;
        let height = region.y1 - region.y0;
        if width <= 0 || height <= 0 {
            return Vec::new();
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(snapshot);
        hasher.update(&region.x0.to_be_bytes());
        hasher.update(&region.y0.to_be_bytes());
        hasher.update(&region.x1.to_be_bytes());
        hasher.update(&region.y1.to_be_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        // one face whenever the region is at least a 20x20 box; the exact
        // byte controls its size so repeated runs stay deterministic.
        if width < 20 || height < 20 {
            return Vec::new();
        }
        let size = 10 + i64::from(bytes[0] % 10);
        let x0 = region.x0 + i64::from(bytes[1]) % (width - size).max(1);
        let y0 = region.y0 + i64::from(bytes[2]) % (height - size).max(1);
        vec![Rect::new(x0, y0, x0 + size, y0 + size)]
    }
}
