//! Static validation
//!
//! AST-level rejection of dangerous constructs before any execution.

pub mod validator;

pub use validator::{validate, ValidationOutcome, Violation, ViolationKind};
