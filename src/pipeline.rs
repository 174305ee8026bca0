/// Pipeline driver: validate, build the sandbox config, execute, normalize.
///
/// Holds the process-wide policy and the engine; everything else is
/// request-scoped. The driver enforces the two pipeline invariants: a
/// rejected submission never reaches the engine, and every submission
/// yields exactly one normalized response.
use crate::config::policy::SecurityPolicy;
use crate::exec::{ExecutionEngine, ScriptExecutor};
use crate::observability::audit::events;
use crate::outcome::{self, ExecutionOutcome, NormalizedResponse};
use crate::sandbox::SandboxConfig;
use crate::validate::{validate, ValidationOutcome};

/// One inbound request: the raw script and its correlation identifier.
/// Owned by a single pipeline invocation and discarded afterwards.
#[derive(Clone, Debug)]
pub struct ScriptSubmission {
    pub request_id: String,
    pub script: String,
}

/// The validation-and-execution pipeline. Blocking and synchronous at this
/// boundary; an asynchronous caller wraps it in its own concurrency
/// primitive. No state is shared between invocations.
pub struct Pipeline<E = ExecutionEngine> {
    policy: SecurityPolicy,
    engine: E,
    strategy_name: &'static str,
}

impl Pipeline<ExecutionEngine> {
    /// Pipeline with the execution strategy probed from the host.
    pub fn new(policy: SecurityPolicy) -> Self {
        let engine = ExecutionEngine::probe();
        let strategy_name = engine.strategy().name();
        Self {
            policy,
            engine,
            strategy_name,
        }
    }
}

impl<E: ScriptExecutor> Pipeline<E> {
    /// Pipeline with an explicit engine, for tests and embedders.
    pub fn with_engine(policy: SecurityPolicy, engine: E) -> Self {
        Self {
            policy,
            engine,
            strategy_name: "custom",
        }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Run one submission end to end. Never panics or escapes an error to
    /// the caller; every failure mode is a structured response.
    pub fn run(&self, submission: &ScriptSubmission) -> NormalizedResponse {
        let request_id = submission.request_id.as_str();

        match validate(&submission.script, &self.policy) {
            ValidationOutcome::Rejected(violations) => {
                events::validation_rejected(request_id, violations.len());
                return outcome::normalize_rejection(&violations);
            }
            ValidationOutcome::Accepted => {}
        }

        let config = SandboxConfig::build(&self.policy);
        events::execution_start(request_id, self.strategy_name);

        let response = match self.engine.execute(&submission.script, &config) {
            Ok(outcome) => {
                match &outcome {
                    ExecutionOutcome::Timeout => events::watchdog_kill(request_id),
                    ExecutionOutcome::PolicyViolation { reason } => {
                        events::runtime_policy_violation(request_id, reason)
                    }
                    _ => {}
                }
                events::execution_end(request_id, outcome_name(&outcome));
                outcome::normalize(outcome)
            }
            Err(err) => {
                events::infrastructure_fault(request_id, &err.to_string());
                outcome::normalize_fault(&err)
            }
        };

        response
    }
}

fn outcome_name(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Success { .. } => "success",
        ExecutionOutcome::Timeout => "timeout",
        ExecutionOutcome::Crashed { .. } => "crashed",
        ExecutionOutcome::PolicyViolation { .. } => "policy_violation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Result, SandboxError};
    use crate::outcome::ErrorKind;
    use serde_json::json;
    use std::cell::RefCell;

    /// Engine stub that counts invocations and replays a canned outcome.
    struct StubEngine {
        calls: RefCell<usize>,
        outcome: fn() -> Result<ExecutionOutcome>,
    }

    impl StubEngine {
        fn new(outcome: fn() -> Result<ExecutionOutcome>) -> Self {
            Self {
                calls: RefCell::new(0),
                outcome,
            }
        }

        fn calls(&self) -> usize {
            *self.calls.borrow()
        }
    }

    impl ScriptExecutor for StubEngine {
        fn execute(&self, _script: &str, _config: &SandboxConfig) -> Result<ExecutionOutcome> {
            *self.calls.borrow_mut() += 1;
            (self.outcome)()
        }
    }

    fn submission(script: &str) -> ScriptSubmission {
        ScriptSubmission {
            request_id: "req-test".to_string(),
            script: script.to_string(),
        }
    }

    #[test]
    fn rejected_script_never_reaches_the_engine() {
        let pipeline = Pipeline::with_engine(
            SecurityPolicy::default(),
            StubEngine::new(|| {
                Ok(ExecutionOutcome::Success {
                    return_value: json!(1),
                    stdout: Vec::new(),
                    stdout_truncated: false,
                })
            }),
        );

        let response = pipeline.run(&submission("import subprocess\ndef main():\n    return 1\n"));
        assert_eq!(response.error_kind(), Some(ErrorKind::InvalidScript));
        assert_eq!(pipeline.engine.calls(), 0);
    }

    #[test]
    fn accepted_script_executes_exactly_once() {
        let pipeline = Pipeline::with_engine(
            SecurityPolicy::default(),
            StubEngine::new(|| {
                Ok(ExecutionOutcome::Success {
                    return_value: json!({"message": "hi"}),
                    stdout: Vec::new(),
                    stdout_truncated: false,
                })
            }),
        );

        let response = pipeline.run(&submission("def main():\n    return {\"message\": \"hi\"}\n"));
        assert!(response.is_success());
        assert_eq!(pipeline.engine.calls(), 1);
    }

    #[test]
    fn infrastructure_fault_becomes_internal_error() {
        let pipeline = Pipeline::with_engine(
            SecurityPolicy::default(),
            StubEngine::new(|| Err(SandboxError::Spawn("interpreter missing".to_string()))),
        );

        let response = pipeline.run(&submission("def main():\n    return 1\n"));
        assert_eq!(response.error_kind(), Some(ErrorKind::InternalError));
    }

    #[test]
    fn timeout_outcome_normalizes_to_timeout_kind() {
        let pipeline = Pipeline::with_engine(
            SecurityPolicy::default(),
            StubEngine::new(|| Ok(ExecutionOutcome::Timeout)),
        );

        let response = pipeline.run(&submission("def main():\n    return 1\n"));
        assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn rejection_message_names_the_module() {
        let pipeline = Pipeline::with_engine(
            SecurityPolicy::default(),
            StubEngine::new(|| Ok(ExecutionOutcome::Timeout)),
        );

        let response = pipeline.run(&submission("import subprocess\ndef main():\n    return 1\n"));
        match response {
            NormalizedResponse::Failure { error } => {
                assert!(error.message.contains("subprocess"))
            }
            _ => panic!("expected failure"),
        }
    }
}
