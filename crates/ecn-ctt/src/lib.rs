// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Completion-time-to-completion (CTT) estimator.
//!
//! Stateless by design: given the current poll count for a session, returns
//! a monotonically non-decreasing estimate of remaining milliseconds. The
//! session manager owns the poll counter; this crate only owns the formula
//! and its wire rendering.

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
    clippy::suboptimal_flops,
    clippy::multiple_crate_versions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

/// Estimate remaining milliseconds for poll count `n` (1 for the first
/// request in a session's lifecycle).
///
/// `CTT_ms(n) = log(50n) / log(1.005) - 750`, truncated toward zero to match
/// the integer-returning estimator this design descends from.
pub fn estimate_ms(n: u64) -> i64 {
    let n = n.max(1) as f64;
    (f64::ln(50.0 * n) / f64::ln(1.005) - 750.0) as i64
}

/// Render the CTT wire payload: `CTT: <integer_ms>`, optionally suffixed
/// `, found` when the fingerprint was already present in the reuse table at
/// first poll (matrix flavour only).
pub fn render(n: u64, found: bool) -> String {
    let estimate = estimate_ms(n);
    if found {
        format!("CTT: {estimate}, found")
    } else {
        format!("CTT: {estimate}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_for_increasing_poll_counts() {
        let mut prev = estimate_ms(1);
        for n in 2..500 {
            let cur = estimate_ms(n);
            assert!(cur >= prev, "CTT regressed at n={n}: {prev} -> {cur}");
            prev = cur;
        }
    }

    #[test]
    fn renders_expected_wire_format() {
        assert_eq!(render(1, false), format!("CTT: {}", estimate_ms(1)));
        assert_eq!(
            render(1, true),
            format!("CTT: {}, found", estimate_ms(1))
        );
    }

    #[test]
    fn zero_poll_count_treated_as_first() {
        assert_eq!(estimate_ms(0), estimate_ms(1));
    }
}
