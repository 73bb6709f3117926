// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for edge-compute-node tools (config loading).
//! Keeps the node binaries thin and storage-backend-agnostic.

pub mod config;
pub mod node;
