// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Structured request/staging name codec for the edge compute node.
//!
//! Request names have the fixed shape
//! `/edge-compute/computer/{requester_id}/{verb}/{params...}` and staging
//! names (the CN pulling bulk input back from a requester) have the shape
//! `/edge-compute/requester/{requester_id}/{kind}/{begin}/{end}/{version}`.
//! Parsing never panics: malformed input becomes a [`NameError`], which the
//! caller turns into a NACK rather than propagating across the transport
//! boundary.

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
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::multiple_crate_versions
)]

use std::fmt;

/// Errors produced while parsing a wire name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// The name did not match the expected structure for any known verb.
    #[error("malformed-name: {0}")]
    Malformed(String),
    /// A numeric field failed to parse as the expected integer type.
    #[error("malformed-name: invalid number in {field}: {value:?}")]
    InvalidNumber {
        /// Name of the offending field, for diagnostics.
        field: &'static str,
        /// The raw text that failed to parse.
        value: String,
    },
}

/// The computation verb carried by a request name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Chess position search.
    Chess,
    /// Integer matrix exponentiation.
    Multiply,
    /// Face detection over a sliding image capture.
    DetectFaces,
}

impl Verb {
    /// The literal verb token used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Chess => "chess",
            Verb::Multiply => "multiply",
            Verb::DetectFaces => "detectfaces",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully parsed request name, verb-specific fields included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRequest {
    /// `/edge-compute/computer/{rid}/chess/{depth}/{fen}`
    Chess {
        /// Requester identifier.
        requester_id: u64,
        /// Search depth, at least 1.
        depth: u32,
        /// Forsyth-Edwards Notation position, spaces restored.
        fen: String,
    },
    /// `/edge-compute/computer/{rid}/multiply/{dim}/{exp}[/{matrix_hash}]`
    Multiply {
        /// Requester identifier.
        requester_id: u64,
        /// Matrix dimension (square matrices only).
        dim: u32,
        /// Exponent to raise the matrix to.
        exponent: u32,
        /// Content hash of the matrix, present only when reuse is enabled.
        matrix_hash: Option<u64>,
    },
    /// `/edge-compute/computer/{rid}/detectfaces/{overlap}/{height}x{width}[/first]`
    DetectFaces {
        /// Requester identifier.
        requester_id: u64,
        /// Fractional overlap between successive snapshots, in `[0, 1)`.
        overlap: f64,
        /// Capture height in pixels.
        height: u32,
        /// Capture width in pixels.
        width: u32,
        /// Whether this is the first snapshot of a trial (invalidates the
        /// per-session cache for this overlap).
        first: bool,
    },
}

impl ParsedRequest {
    /// The requester identifier common to every verb.
    pub fn requester_id(&self) -> u64 {
        match *self {
            ParsedRequest::Chess { requester_id, .. }
            | ParsedRequest::Multiply { requester_id, .. }
            | ParsedRequest::DetectFaces { requester_id, .. } => requester_id,
        }
    }

    /// The verb this request carries.
    pub fn verb(&self) -> Verb {
        match self {
            ParsedRequest::Chess { .. } => Verb::Chess,
            ParsedRequest::Multiply { .. } => Verb::Multiply,
            ParsedRequest::DetectFaces { .. } => Verb::DetectFaces,
        }
    }
}

/// The kind of bulk payload a staging name carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingKind {
    /// Rows of an integer matrix.
    Matrix,
    /// Rows of a grayscale image capture.
    DetectFaces,
}

impl StagingKind {
    /// The literal token used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            StagingKind::Matrix => "matrix",
            StagingKind::DetectFaces => "detectfaces",
        }
    }
}

/// A parsed staging name: `/edge-compute/requester/{rid}/{kind}/{begin}/{end}/{version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStaging {
    /// Requester identifier the staging round belongs to.
    pub requester_id: u64,
    /// Payload kind.
    pub kind: StagingKind,
    /// First row index, inclusive.
    pub begin: u32,
    /// Last row index, exclusive.
    pub end: u32,
    /// Monotonic version component, used to evade duplicate-interest suppression.
    pub version: u64,
}

impl ParsedStaging {
    /// The first 7 path components, excluding `version`, used to match an
    /// incoming data packet to the outstanding interest that requested it.
    pub fn match_key(&self) -> (u64, StagingKind, u32, u32) {
        (self.requester_id, self.kind, self.begin, self.end)
    }
}

fn restore_spaces(raw: &str) -> String {
    raw.replace("%20", " ")
}

fn split_components(name: &str) -> Vec<&str> {
    name.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, NameError> {
    value.parse().map_err(|_| NameError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, NameError> {
    value.parse().map_err(|_| NameError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, NameError> {
    value.parse().map_err(|_| NameError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Parse a request name of the form
/// `/edge-compute/computer/{rid}/{verb}/{params...}`.
///
/// # Errors
///
/// Returns [`NameError`] if the name does not start with the expected
/// prefix, names an unknown verb, or a verb-specific field fails to parse.
pub fn parse_request(name: &str) -> Result<ParsedRequest, NameError> {
    let parts = split_components(name);
    if parts.len() < 4 || parts[0] != "edge-compute" || parts[1] != "computer" {
        return Err(NameError::Malformed(name.to_string()));
    }
    let requester_id = parse_u64("requester_id", parts[2])?;
    match parts[3] {
        "chess" => {
            if parts.len() < 6 {
                return Err(NameError::Malformed(name.to_string()));
            }
            let depth = parse_u32("depth", parts[4])?;
            if depth < 1 {
                return Err(NameError::Malformed(
                    "chess depth must be >= 1".to_string(),
                ));
            }
            let fen = restore_spaces(&parts[5..].join("/"));
            Ok(ParsedRequest::Chess {
                requester_id,
                depth,
                fen,
            })
        }
        "multiply" => {
            if parts.len() < 6 {
                return Err(NameError::Malformed(name.to_string()));
            }
            let dim = parse_u32("dim", parts[4])?;
            let exponent = parse_u32("exponent", parts[5])?;
            let matrix_hash = match parts.get(6) {
                Some(h) => Some(parse_u64("matrix_hash", h)?),
                None => None,
            };
            Ok(ParsedRequest::Multiply {
                requester_id,
                dim,
                exponent,
                matrix_hash,
            })
        }
        "detectfaces" => {
            if parts.len() < 6 {
                return Err(NameError::Malformed(name.to_string()));
            }
            let overlap = parse_f64("overlap", parts[4])?;
            let (height_s, width_s) = parts[5]
                .split_once('x')
                .ok_or_else(|| NameError::Malformed(name.to_string()))?;
            let height = parse_u32("height", height_s)?;
            let width = parse_u32("width", width_s)?;
            let first = parts.get(6).map(|s| *s == "first").unwrap_or(false);
            Ok(ParsedRequest::DetectFaces {
                requester_id,
                overlap,
                height,
                width,
                first,
            })
        }
        other => Err(NameError::Malformed(format!("unknown verb {other}"))),
    }
}

/// Parse a staging name of the form
/// `/edge-compute/requester/{rid}/{kind}/{begin}/{end}/{version}`.
///
/// # Errors
///
/// Returns [`NameError`] if the name does not match that shape.
pub fn parse_staging(name: &str) -> Result<ParsedStaging, NameError> {
    let parts = split_components(name);
    if parts.len() != 7 || parts[0] != "edge-compute" || parts[1] != "requester" {
        return Err(NameError::Malformed(name.to_string()));
    }
    let requester_id = parse_u64("requester_id", parts[2])?;
    let kind = match parts[3] {
        "matrix" => StagingKind::Matrix,
        "detectfaces" => StagingKind::DetectFaces,
        other => return Err(NameError::Malformed(format!("unknown staging kind {other}"))),
    };
    let begin = parse_u32("begin", parts[4])?;
    let end = parse_u32("end", parts[5])?;
    let version = parse_u64("version", parts[6])?;
    Ok(ParsedStaging {
        requester_id,
        kind,
        begin,
        end,
        version,
    })
}

/// Build a chess request name, escaping spaces in the FEN as the wire requires.
pub fn build_chess_name(requester_id: u64, depth: u32, fen: &str) -> String {
    format!(
        "/edge-compute/computer/{requester_id}/chess/{depth}/{}",
        fen.replace(' ', "%20")
    )
}

/// Build a multiply request name; `matrix_hash` is appended only when reuse is enabled.
pub fn build_multiply_name(
    requester_id: u64,
    dim: u32,
    exponent: u32,
    matrix_hash: Option<u64>,
) -> String {
    let mut name = format!("/edge-compute/computer/{requester_id}/multiply/{dim}/{exponent}");
    if let Some(hash) = matrix_hash {
        name.push('/');
        name.push_str(&hash.to_string());
    }
    name
}

/// Build a detectfaces request name.
pub fn build_detectfaces_name(
    requester_id: u64,
    overlap: f64,
    height: u32,
    width: u32,
    first: bool,
) -> String {
    let mut name =
        format!("/edge-compute/computer/{requester_id}/detectfaces/{overlap}/{height}x{width}");
    if first {
        name.push_str("/first");
    }
    name
}

/// Build a staging name the CN issues toward the requester to pull bulk input.
pub fn build_staging_name(
    kind: StagingKind,
    requester_id: u64,
    begin: u32,
    end: u32,
    version: u64,
) -> String {
    format!(
        "/edge-compute/requester/{requester_id}/{}/{begin}/{end}/{version}",
        kind.as_str()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_chess_request_and_restores_spaces() {
        // a real FEN's internal '/' rank separators split into extra path
        // components on the wire; the codec rejoins them from position 5 on.
        let fen = "rnbqkbnr/pppppppp/8/8/8/P7/1PPPPPPP/RNBQKBNR w KQkq - 0 1";
        let name = build_chess_name(7, 3, fen);
        let parsed = parse_request(&name).expect("parses");
        match parsed {
            ParsedRequest::Chess {
                requester_id,
                depth,
                fen: parsed_fen,
            } => {
                assert_eq!(requester_id, 7);
                assert_eq!(depth, 3);
                assert_eq!(parsed_fen, fen);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_multiply_without_hash() {
        let parsed = parse_request("/edge-compute/computer/1/multiply/4/5").expect("parses");
        assert_eq!(
            parsed,
            ParsedRequest::Multiply {
                requester_id: 1,
                dim: 4,
                exponent: 5,
                matrix_hash: None,
            }
        );
    }

    #[test]
    fn parses_multiply_with_hash() {
        let parsed =
            parse_request("/edge-compute/computer/1/multiply/4/5/99").expect("parses");
        assert_eq!(
            parsed,
            ParsedRequest::Multiply {
                requester_id: 1,
                dim: 4,
                exponent: 5,
                matrix_hash: Some(99),
            }
        );
    }

    #[test]
    fn parses_detectfaces_first_flag() {
        let parsed =
            parse_request("/edge-compute/computer/2/detectfaces/0.5/100x200/first").expect("ok");
        assert_eq!(
            parsed,
            ParsedRequest::DetectFaces {
                requester_id: 2,
                overlap: 0.5,
                height: 100,
                width: 200,
                first: true,
            }
        );
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(parse_request("/not-edge-compute/computer/1/chess/3/x").is_err());
        assert!(parse_request("/edge-compute/computer/1/unknownverb/3").is_err());
        assert!(parse_request("/edge-compute/computer/notanumber/chess/3/x").is_err());
        assert!(parse_request("/edge-compute/computer/1/chess/0/x").is_err());
    }

    #[test]
    fn round_trips_staging_names() {
        let built = build_staging_name(StagingKind::Matrix, 1, 0, 8, 42);
        let parsed = parse_staging(&built).expect("parses");
        assert_eq!(parsed.requester_id, 1);
        assert_eq!(parsed.kind, StagingKind::Matrix);
        assert_eq!(parsed.begin, 0);
        assert_eq!(parsed.end, 8);
        assert_eq!(parsed.version, 42);
    }

    #[test]
    fn match_key_ignores_version() {
        let a = parse_staging(&build_staging_name(StagingKind::Matrix, 1, 0, 8, 1)).expect("ok");
        let b = parse_staging(&build_staging_name(StagingKind::Matrix, 1, 0, 8, 2)).expect("ok");
        assert_eq!(a.match_key(), b.match_key());
    }
}
