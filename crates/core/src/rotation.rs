//! Rate-limit events, rotation log entries, and the rotation decision policy.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};
use crate::worker_pool::{Worker, WorkerStatus};

/// Orchestrator log action for a completed identity rotation.
pub const ACTION_WORKER_ROTATE: &str = "worker_rotate";

/// Rotation reason when the event threshold was crossed.
pub const REASON_RATE_LIMIT_THRESHOLD: &str = "rate_limit_threshold";

/// Rotation reason for an operator request.
pub const REASON_OPERATOR_REQUEST: &str = "operator_request";

/// Rotation reason when a previously failed rotation is retried.
pub const REASON_ROTATION_RETRY: &str = "rotation_retry";

/// Stored when a worker reports a rejection without an error code.
pub const UNKNOWN_ERROR_CODE: &str = "unknown";

const MAX_ERROR_CODE_LEN: usize = 64;
const MAX_IP_ADDRESS_LEN: usize = 64;
const MAX_ERROR_MESSAGE_LEN: usize = 2_000;
const MAX_SUBJECT_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Rate-limit events
// ---------------------------------------------------------------------------

/// Immutable fact: a worker observed a platform rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub id: DbId,
    pub worker_id: DbId,
    pub ip_address: String,
    pub error_code: String,
    pub error_message: Option<String>,
    pub subject_handle: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRateLimitEvent {
    pub worker_id: DbId,
    pub ip_address: String,
    pub error_code: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub subject_handle: Option<String>,
}

impl NewRateLimitEvent {
    /// Bound free-text fields. Events are facts and are never rejected:
    /// over-long values are truncated, a missing code is stored as
    /// [`UNKNOWN_ERROR_CODE`], and the address is kept as reported.
    pub fn sanitized(mut self) -> Self {
        self.error_code = truncate_chars(self.error_code.trim(), MAX_ERROR_CODE_LEN);
        if self.error_code.is_empty() {
            self.error_code = UNKNOWN_ERROR_CODE.to_string();
        }
        self.ip_address = truncate_chars(self.ip_address.trim(), MAX_IP_ADDRESS_LEN);
        self.error_message = self
            .error_message
            .map(|m| truncate_chars(&m, MAX_ERROR_MESSAGE_LEN));
        self.subject_handle = self
            .subject_handle
            .map(|s| truncate_chars(s.trim(), MAX_SUBJECT_LEN))
            .filter(|s| !s.is_empty());
        self
    }
}

/// A rate-limit event joined with its worker's name, for the operator feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitFeedItem {
    #[serde(flatten)]
    pub event: RateLimitEvent,
    pub worker_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Orchestrator log
// ---------------------------------------------------------------------------

/// Immutable audit record of a rotation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorLogEntry {
    pub id: DbId,
    pub action: String,
    pub worker_id: Option<DbId>,
    pub worker_name: Option<String>,
    pub old_instance_id: Option<String>,
    pub new_instance_id: Option<String>,
    pub old_ip: Option<String>,
    pub new_ip: Option<String>,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrchestratorLogEntry {
    pub action: String,
    pub worker_id: Option<DbId>,
    pub worker_name: Option<String>,
    pub old_instance_id: Option<String>,
    pub new_instance_id: Option<String>,
    pub old_ip: Option<String>,
    pub new_ip: Option<String>,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Decision policy
// ---------------------------------------------------------------------------

/// Rotation trigger: `threshold` events on the current IP within `window`.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub threshold: i64,
    pub window: chrono::TimeDelta,
}

/// Why an event did not count toward a rotation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Worker is rotating or offline; events are logged but not acted on.
    NotActive(WorkerStatus),
    /// Event was observed on an identity the worker no longer holds.
    StaleIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitVerdict {
    Ignore(IgnoreReason),
    BelowThreshold { count: i64 },
    Rotate { count: i64 },
}

impl RotationPolicy {
    /// Start of the sliding window ending at `now`.
    pub fn window_start(&self, now: Timestamp) -> Timestamp {
        now - self.window
    }

    /// Whether an event on `event_ip` is eligible to count for `worker`.
    pub fn screen(&self, worker: &Worker, event_ip: &str) -> Option<IgnoreReason> {
        if worker.status != WorkerStatus::Active {
            return Some(IgnoreReason::NotActive(worker.status));
        }
        if worker.ip_address != event_ip {
            return Some(IgnoreReason::StaleIdentity);
        }
        None
    }

    /// Decide given the number of in-window events on the worker's current IP.
    pub fn decide(&self, worker: &Worker, event_ip: &str, in_window: i64) -> RateLimitVerdict {
        if let Some(reason) = self.screen(worker, event_ip) {
            return RateLimitVerdict::Ignore(reason);
        }
        if in_window >= self.threshold {
            RateLimitVerdict::Rotate { count: in_window }
        } else {
            RateLimitVerdict::BelowThreshold { count: in_window }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn policy() -> RotationPolicy {
        RotationPolicy {
            threshold: 5,
            window: TimeDelta::minutes(10),
        }
    }

    fn worker(status: WorkerStatus) -> Worker {
        let now = Utc::now();
        Worker {
            id: 7,
            name: "worker-07".to_string(),
            status,
            instance_id: "i-7".to_string(),
            ip_address: "1.2.3.4".to_string(),
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rotates_at_threshold() {
        let verdict = policy().decide(&worker(WorkerStatus::Active), "1.2.3.4", 5);
        assert_eq!(verdict, RateLimitVerdict::Rotate { count: 5 });
    }

    #[test]
    fn below_threshold_waits() {
        let verdict = policy().decide(&worker(WorkerStatus::Active), "1.2.3.4", 4);
        assert_eq!(verdict, RateLimitVerdict::BelowThreshold { count: 4 });
    }

    #[test]
    fn rotating_worker_ignores_events() {
        let verdict = policy().decide(&worker(WorkerStatus::Rotating), "1.2.3.4", 50);
        assert_eq!(
            verdict,
            RateLimitVerdict::Ignore(IgnoreReason::NotActive(WorkerStatus::Rotating))
        );
    }

    #[test]
    fn event_on_old_ip_ignored() {
        let verdict = policy().decide(&worker(WorkerStatus::Active), "9.9.9.9", 50);
        assert_eq!(verdict, RateLimitVerdict::Ignore(IgnoreReason::StaleIdentity));
    }

    #[test]
    fn window_start_is_now_minus_window() {
        let now = Utc::now();
        assert_eq!(policy().window_start(now), now - TimeDelta::minutes(10));
    }

    #[test]
    fn sanitize_truncates_message_and_drops_blank_subject() {
        let event = NewRateLimitEvent {
            worker_id: 1,
            ip_address: " 1.2.3.4 ".to_string(),
            error_code: "429".to_string(),
            error_message: Some("x".repeat(MAX_ERROR_MESSAGE_LEN + 10)),
            subject_handle: Some("  ".to_string()),
        }
        .sanitized();
        assert_eq!(event.ip_address, "1.2.3.4");
        assert_eq!(
            event.error_message.map(|m| m.len()),
            Some(MAX_ERROR_MESSAGE_LEN)
        );
        assert!(event.subject_handle.is_none());
    }

    #[test]
    fn sanitize_keeps_malformed_events() {
        let event = NewRateLimitEvent {
            worker_id: 1,
            ip_address: "1.2.3.4:8080".to_string(),
            error_code: " ".to_string(),
            error_message: None,
            subject_handle: None,
        }
        .sanitized();
        assert_eq!(event.error_code, UNKNOWN_ERROR_CODE);
        assert_eq!(event.ip_address, "1.2.3.4:8080");

        let long_code = NewRateLimitEvent {
            error_code: "E".repeat(MAX_ERROR_CODE_LEN * 2),
            ..event
        }
        .sanitized();
        assert_eq!(long_code.error_code.len(), MAX_ERROR_CODE_LEN);
    }
}
