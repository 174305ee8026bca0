//! Configuration and policy
//!
//! Policy definition, loading, and shared type definitions.

pub mod policy;
pub mod types;
