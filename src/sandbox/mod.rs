//! Sandbox policy building and scratch-space management
//!
//! Translates the process-wide security policy into a concrete, per-request
//! isolation configuration.

pub mod config;
pub mod scratch;

pub use config::{MountAccess, MountBinding, NamespaceFlags, SandboxConfig, SyscallPolicy};
pub use scratch::ScratchDir;
