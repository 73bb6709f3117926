// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-client session state machine for the edge compute node.
//!
//! [`core::SessionCore`] is the flavour-agnostic idle/computing/ready state
//! machine every request type drives. `chess`, `matrix`, and `camera` each
//! wire that core up to their own reuse cache, single-flight registry (or
//! lack of one, for camera), and compute collaborator, per the dispatch
//! rules in the design's session-manager section.

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
    clippy::similar_names,
    clippy::multiple_crate_versions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod camera;
pub mod chess;
pub mod core;
pub mod matrix;

pub use camera::CameraNode;
pub use chess::ChessNode;
pub use core::{Phase, PollOutcome, SessionCore};
pub use matrix::MatrixNode;
