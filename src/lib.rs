//! scriptbox
//!
//! Validated, sandboxed execution of untrusted Python scripts.
//!
//! A submission flows through four stages:
//!
//! 1. **Validation** ([`validate`]): the script is parsed into an AST and
//!    checked against the security policy's denylists. It must also define
//!    a zero-argument entry point. Rejections carry every violation found.
//! 2. **Sandbox planning** ([`sandbox`]): a per-request [`sandbox::SandboxConfig`]
//!    is derived from the policy: a private scratch directory, resource
//!    ceilings, namespace and mount plans, and a minimal environment.
//! 3. **Execution** ([`exec`]): the script runs under the strongest
//!    strategy the host supports. OS-level isolation (namespaces, a
//!    read-only root, rlimits) is primary; an in-process restricted mode
//!    built on the interpreter's audit hooks is the fallback. A watchdog
//!    enforces the wall-clock ceiling and output is collected with hard
//!    byte bounds.
//! 4. **Normalization** ([`outcome`]): the raw outcome becomes a stable
//!    response shape, `{result, stdout}` on success or
//!    `{error: {kind, message}}` otherwise, with enforcement internals
//!    kept out of user-facing messages.
//!
//! [`pipeline::Pipeline`] drives the stages end to end and never lets a
//! rejected script reach an interpreter. [`cli`] wraps the pipeline for
//! the `scriptbox` binary.

pub mod cli;
pub mod config;
pub mod exec;
pub mod observability;
pub mod outcome;
pub mod pipeline;
pub mod sandbox;
pub mod validate;

pub use config::policy::SecurityPolicy;
pub use config::types::{ResourceCeilings, Result, SandboxError};
pub use exec::{ExecutionEngine, ScriptExecutor, Strategy};
pub use outcome::{ErrorKind, ExecutionOutcome, NormalizedResponse};
pub use pipeline::{Pipeline, ScriptSubmission};
pub use validate::{validate, ValidationOutcome, Violation, ViolationKind};
