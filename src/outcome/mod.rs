//! Execution outcomes and response normalization
//!
//! A closed outcome taxonomy produced by the engine, mapped onto the stable
//! externally visible response shape.

pub mod normalize;

pub use normalize::{
    normalize, normalize_fault, normalize_rejection, ErrorKind, NormalizedResponse, ResponseError,
};

/// Raw outcome of one sandboxed execution. Exactly one outcome is produced
/// per submission; a rejected submission never produces one at all.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    /// Entry point returned a serializable value; stdout captured verbatim
    /// up to the output ceiling
    Success {
        return_value: serde_json::Value,
        stdout: Vec<u8>,
        stdout_truncated: bool,
    },
    /// Forcibly terminated at a time ceiling; no partial value survives
    Timeout,
    /// The script itself failed: non-zero exit, fatal signal, or an
    /// unserializable return value
    Crashed {
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },
    /// Terminated by the enforcement layer itself, distinguished from an
    /// ordinary crash
    PolicyViolation { reason: String },
}
