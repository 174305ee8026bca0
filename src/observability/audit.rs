/// Security event logging for the execution pipeline.
///
/// Structured records of security-relevant events, keyed by the request
/// identifier so one submission can be followed across validation,
/// execution, and cleanup. Infrastructure faults are the only events meant
/// for operator alerting; everything else is informational.
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// Types of security events we track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    ExecutionStart,
    ExecutionEnd,
    ValidationRejected,
    RuntimePolicyViolation,
    WatchdogKill,
    InfrastructureFault,
}

impl SecurityEventType {
    fn severity(self) -> Severity {
        match self {
            SecurityEventType::ExecutionStart | SecurityEventType::ExecutionEnd => Severity::Low,
            SecurityEventType::ValidationRejected | SecurityEventType::WatchdogKill => {
                Severity::Medium
            }
            SecurityEventType::RuntimePolicyViolation
            | SecurityEventType::InfrastructureFault => Severity::High,
        }
    }
}

/// One structured security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: SystemTime,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub request_id: String,
    pub details: String,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, request_id: &str, details: String) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            severity: event_type.severity(),
            request_id: request_id.to_string(),
            details,
        }
    }
}

/// Emit an event through the process logger as a JSON record.
pub fn record(event: SecurityEvent) {
    let payload = serde_json::to_string(&event).unwrap_or_else(|_| {
        format!(
            "{{\"request_id\":\"{}\",\"details\":\"unserializable event\"}}",
            event.request_id
        )
    });
    match event.severity {
        Severity::High => error!("security_event {}", payload),
        Severity::Medium => warn!("security_event {}", payload),
        Severity::Low => info!("security_event {}", payload),
    }
}

/// Convenience constructors for the pipeline's event sites.
pub mod events {
    use super::*;

    pub fn execution_start(request_id: &str, strategy: &str) {
        record(SecurityEvent::new(
            SecurityEventType::ExecutionStart,
            request_id,
            format!("strategy={}", strategy),
        ));
    }

    pub fn execution_end(request_id: &str, outcome: &str) {
        record(SecurityEvent::new(
            SecurityEventType::ExecutionEnd,
            request_id,
            format!("outcome={}", outcome),
        ));
    }

    pub fn validation_rejected(request_id: &str, violation_count: usize) {
        record(SecurityEvent::new(
            SecurityEventType::ValidationRejected,
            request_id,
            format!("violations={}", violation_count),
        ));
    }

    pub fn runtime_policy_violation(request_id: &str, reason: &str) {
        record(SecurityEvent::new(
            SecurityEventType::RuntimePolicyViolation,
            request_id,
            reason.to_string(),
        ));
    }

    pub fn watchdog_kill(request_id: &str) {
        record(SecurityEvent::new(
            SecurityEventType::WatchdogKill,
            request_id,
            "wall-clock ceiling exceeded".to_string(),
        ));
    }

    pub fn infrastructure_fault(request_id: &str, detail: &str) {
        record(SecurityEvent::new(
            SecurityEventType::InfrastructureFault,
            request_id,
            detail.to_string(),
        ));
    }
}
