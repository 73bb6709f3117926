// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reuse caches for the three compute flavours.
//!
//! Each flavour keeps the original design's admission and eviction quirks
//! rather than normalizing them into one generic cache: the chess table
//! admits the twenty enumerated openings unconditionally plus other
//! positions probabilistically, the matrix index spills to an append-only
//! file keyed by content hash, and the camera table lives one-per-session
//! and only ever grows within a session's lifetime.

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
    clippy::multiple_crate_versions,
    clippy::similar_names
)]

pub mod camera;
pub mod chess;
pub mod matrix;

pub use camera::{CameraCache, Rect};
pub use chess::ChessCache;
pub use matrix::{MatrixCache, MatrixCacheError};
