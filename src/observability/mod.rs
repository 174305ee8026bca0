//! Observability
//!
//! Structured security event logging.

pub mod audit;
