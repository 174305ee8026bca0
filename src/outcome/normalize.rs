/// Result normalization: raw execution outcomes to the stable response
/// shape consumed by the transport layer.
use crate::config::types::SandboxError;
use crate::outcome::ExecutionOutcome;
use crate::validate::Violation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of user-facing error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "invalid script")]
    InvalidScript,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "execution error")]
    ExecutionError,
    #[serde(rename = "sandbox violation")]
    SandboxViolation,
    #[serde(rename = "internal error")]
    InternalError,
}

/// Structured failure body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
}

/// The externally visible response shape: `{result, stdout}` on success,
/// `{error: {kind, message}}` otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedResponse {
    Success { result: Value, stdout: String },
    Failure { error: ResponseError },
}

impl NormalizedResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, NormalizedResponse::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            NormalizedResponse::Failure { error } => Some(error.kind),
            NormalizedResponse::Success { .. } => None,
        }
    }
}

/// Map an execution outcome onto the response shape.
pub fn normalize(outcome: ExecutionOutcome) -> NormalizedResponse {
    match outcome {
        ExecutionOutcome::Success {
            return_value,
            stdout,
            ..
        } => NormalizedResponse::Success {
            result: return_value,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
        },
        ExecutionOutcome::Timeout => NormalizedResponse::Failure {
            error: ResponseError {
                kind: ErrorKind::Timeout,
                message: "script exceeded the execution time limit".to_string(),
            },
        },
        ExecutionOutcome::Crashed {
            exit_code,
            stderr_excerpt,
        } => {
            let message = if stderr_excerpt.is_empty() {
                match exit_code {
                    Some(code) => format!("script failed with exit code {}", code),
                    None => "script terminated abnormally".to_string(),
                }
            } else {
                format!("script failed: {}", stderr_excerpt)
            };
            NormalizedResponse::Failure {
                error: ResponseError {
                    kind: ErrorKind::ExecutionError,
                    message,
                },
            }
        }
        // Intentionally generic: enforcement internals (filter rules, hook
        // names) must not leak to the submitter.
        ExecutionOutcome::PolicyViolation { reason } => {
            log::warn!("policy violation during execution: {}", reason);
            NormalizedResponse::Failure {
                error: ResponseError {
                    kind: ErrorKind::SandboxViolation,
                    message: "script attempted an operation that is not permitted".to_string(),
                },
            }
        }
    }
}

/// Map a static rejection onto the response shape. Rejections bypass
/// execution entirely; the message enumerates every collected violation.
pub fn normalize_rejection(violations: &[Violation]) -> NormalizedResponse {
    let message = violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    NormalizedResponse::Failure {
        error: ResponseError {
            kind: ErrorKind::InvalidScript,
            message,
        },
    }
}

/// Map an infrastructure fault onto the response shape. The detail goes to
/// the operator log; the caller sees a generic message.
pub fn normalize_fault(err: &SandboxError) -> NormalizedResponse {
    log::error!("sandbox infrastructure fault: {}", err);
    NormalizedResponse::Failure {
        error: ResponseError {
            kind: ErrorKind::InternalError,
            message: "the execution service encountered an internal error".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{Violation, ViolationKind};
    use serde_json::json;

    #[test]
    fn success_carries_result_and_stdout() {
        let response = normalize(ExecutionOutcome::Success {
            return_value: json!({"message": "hi"}),
            stdout: b"out\n".to_vec(),
            stdout_truncated: false,
        });
        assert_eq!(
            response,
            NormalizedResponse::Success {
                result: json!({"message": "hi"}),
                stdout: "out\n".to_string(),
            }
        );
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded, json!({"result": {"message": "hi"}, "stdout": "out\n"}));
    }

    #[test]
    fn timeout_has_stable_message_and_no_result() {
        let response = normalize(ExecutionOutcome::Timeout);
        assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
        let encoded = serde_json::to_value(&response).unwrap();
        assert!(encoded.get("result").is_none());
    }

    #[test]
    fn crash_message_uses_bounded_excerpt() {
        let response = normalize(ExecutionOutcome::Crashed {
            exit_code: Some(1),
            stderr_excerpt: "ZeroDivisionError: division by zero".to_string(),
        });
        match response {
            NormalizedResponse::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::ExecutionError);
                assert!(error.message.contains("ZeroDivisionError"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn violation_message_never_leaks_enforcement_internals() {
        let response = normalize(ExecutionOutcome::PolicyViolation {
            reason: "sandbox denied: import of module subprocess (audit hook)".to_string(),
        });
        match response {
            NormalizedResponse::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::SandboxViolation);
                assert!(!error.message.contains("audit"));
                assert!(!error.message.contains("subprocess"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn rejection_enumerates_all_violations() {
        let violations = vec![
            Violation {
                kind: ViolationKind::DeniedImport,
                description: "import of denied module `subprocess`".to_string(),
                line: 1,
            },
            Violation {
                kind: ViolationKind::DeniedCall,
                description: "call to denied function `eval`".to_string(),
                line: 3,
            },
        ];
        let response = normalize_rejection(&violations);
        match response {
            NormalizedResponse::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::InvalidScript);
                assert!(error.message.contains("subprocess"));
                assert!(error.message.contains("eval"));
                assert!(error.message.contains("line 3"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn fault_message_is_generic() {
        let response = normalize_fault(&SandboxError::Spawn("python3: not found".to_string()));
        match response {
            NormalizedResponse::Failure { error } => {
                assert_eq!(error.kind, ErrorKind::InternalError);
                assert!(!error.message.contains("python3"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn error_kinds_serialize_with_stable_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::InvalidScript).unwrap(),
            "\"invalid script\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::SandboxViolation).unwrap(),
            "\"sandbox violation\""
        );
    }
}
