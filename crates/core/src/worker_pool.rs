//! Worker fleet model, registration validation, and naming.
//!
//! A worker is a logical scraping agent bound to one network identity
//! (instance + IP) at a time. Status transitions are owned by the rotation
//! engine and the offline sweep; everything here is pure.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a worker name.
const MAX_NAME_LEN: usize = 128;

/// Maximum length of an instance identifier.
const MAX_INSTANCE_ID_LEN: usize = 128;

/// Highest numbered name handed out by [`generate_worker_name`] before it
/// falls back to a timestamp suffix.
const MAX_NUMBERED_WORKERS: u32 = 99;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

define_text_enum! {
    WorkerStatus ("worker status") {
        Active => "active",
        /// Waiting for a fresh identity. Never assignable.
        Rotating => "rotating",
        Offline => "offline",
    }
}

impl WorkerStatus {
    /// Only active workers may receive new tasks.
    pub fn is_assignable(self) -> bool {
        matches!(self, WorkerStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: DbId,
    pub name: String,
    pub status: WorkerStatus,
    pub instance_id: String,
    pub ip_address: String,
    pub last_seen_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Worker {
    pub fn identity(&self) -> WorkerIdentity {
        WorkerIdentity {
            instance_id: self.instance_id.clone(),
            ip_address: self.ip_address.clone(),
        }
    }

    /// Whether the worker has been silent longer than `threshold` at `now`.
    pub fn is_silent(&self, now: Timestamp, threshold: chrono::TimeDelta) -> bool {
        now - self.last_seen_at > threshold
    }
}

/// A network identity: the instance a worker runs on and its public IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub instance_id: String,
    pub ip_address: String,
}

/// Registration payload sent by a worker agent on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorker {
    #[serde(default)]
    pub name: Option<String>,
    pub instance_id: String,
    pub ip_address: String,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_worker_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Worker name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Worker name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Worker name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate an identity pair. The IP is normalized to its canonical form.
pub fn validate_identity(identity: &WorkerIdentity) -> Result<WorkerIdentity, CoreError> {
    let instance_id = identity.instance_id.trim();
    if instance_id.is_empty() {
        return Err(CoreError::Validation(
            "Instance id must not be empty".to_string(),
        ));
    }
    if instance_id.len() > MAX_INSTANCE_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Instance id must not exceed {MAX_INSTANCE_ID_LEN} characters"
        )));
    }
    let ip: IpAddr = identity.ip_address.trim().parse().map_err(|_| {
        CoreError::Validation(format!(
            "'{}' is not a valid IP address",
            identity.ip_address
        ))
    })?;
    Ok(WorkerIdentity {
        instance_id: instance_id.to_string(),
        ip_address: ip.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Pick the first free `worker-NN` name, or `worker-<unix-ts>` once all
/// numbered slots are taken.
pub fn generate_worker_name(existing: &[String], now: Timestamp) -> String {
    (1..=MAX_NUMBERED_WORKERS)
        .map(|n| format!("worker-{n:02}"))
        .find(|candidate| !existing.iter().any(|name| name == candidate))
        .unwrap_or_else(|| format!("worker-{}", now.timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeDelta, TimeZone, Utc};

    // -- validate_worker_name -----------------------------------------------

    #[test]
    fn valid_worker_name() {
        assert!(validate_worker_name("worker-01").is_ok());
        assert!(validate_worker_name("scraper_eu.2").is_ok());
    }

    #[test]
    fn empty_worker_name() {
        assert_matches!(validate_worker_name(""), Err(CoreError::Validation(_)));
    }

    #[test]
    fn worker_name_too_long() {
        let name = "a".repeat(MAX_NAME_LEN + 1);
        assert_matches!(validate_worker_name(&name), Err(CoreError::Validation(_)));
    }

    #[test]
    fn worker_name_invalid_chars() {
        assert!(validate_worker_name("worker 01").is_err());
        assert!(validate_worker_name("worker/01").is_err());
    }

    // -- validate_identity --------------------------------------------------

    #[test]
    fn identity_is_trimmed_and_normalized() {
        let identity = validate_identity(&WorkerIdentity {
            instance_id: "  i-abc  ".to_string(),
            ip_address: " 10.0.0.7 ".to_string(),
        })
        .unwrap();
        assert_eq!(identity.instance_id, "i-abc");
        assert_eq!(identity.ip_address, "10.0.0.7");
    }

    #[test]
    fn identity_rejects_bad_ip() {
        let result = validate_identity(&WorkerIdentity {
            instance_id: "i-abc".to_string(),
            ip_address: "1.2.3".to_string(),
        });
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn identity_rejects_blank_instance() {
        let result = validate_identity(&WorkerIdentity {
            instance_id: " ".to_string(),
            ip_address: "1.2.3.4".to_string(),
        });
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    // -- generate_worker_name -----------------------------------------------

    #[test]
    fn first_name_is_worker_01() {
        assert_eq!(generate_worker_name(&[], Utc::now()), "worker-01");
    }

    #[test]
    fn fills_first_gap() {
        let existing = vec!["worker-01".to_string(), "worker-03".to_string()];
        assert_eq!(generate_worker_name(&existing, Utc::now()), "worker-02");
    }

    #[test]
    fn falls_back_to_timestamp_when_full() {
        let existing: Vec<String> = (1..=99).map(|n| format!("worker-{n:02}")).collect();
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            generate_worker_name(&existing, now),
            format!("worker-{}", now.timestamp())
        );
    }

    // -- status -------------------------------------------------------------

    #[test]
    fn only_active_is_assignable() {
        assert!(WorkerStatus::Active.is_assignable());
        assert!(!WorkerStatus::Rotating.is_assignable());
        assert!(!WorkerStatus::Offline.is_assignable());
    }

    #[test]
    fn silence_is_strictly_greater_than_threshold() {
        let now = Utc::now();
        let worker = Worker {
            id: 1,
            name: "worker-01".to_string(),
            status: WorkerStatus::Active,
            instance_id: "i-1".to_string(),
            ip_address: "1.2.3.4".to_string(),
            last_seen_at: now - TimeDelta::seconds(120),
            created_at: now,
            updated_at: now,
        };
        assert!(!worker.is_silent(now, TimeDelta::seconds(120)));
        assert!(worker.is_silent(now, TimeDelta::seconds(119)));
    }
}
