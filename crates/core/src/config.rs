//! Orchestration tuning constants.
//!
//! These are operational knobs, not invariants. The API binary loads them
//! from the environment; tests construct them directly.

use std::time::Duration;

use crate::rotation::RotationPolicy;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rate-limit events on one IP that trigger a rotation.
    pub rate_limit_threshold: i64,
    /// Sliding window the threshold is counted over.
    pub rate_limit_window: Duration,
    /// Silence after which a worker is marked offline.
    pub worker_offline_after: Duration,
    /// Silence after which an active job is considered stuck.
    pub stuck_job_threshold: Duration,
    pub reaper_interval: Duration,
    pub rotation_retry_interval: Duration,
    pub offline_sweep_interval: Duration,
    /// Hard cap on a launched job process before it is signalled.
    pub max_job_runtime: Duration,
    /// Delay between SIGTERM and SIGKILL for an overrunning process.
    pub kill_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rate_limit_threshold: 5,
            rate_limit_window: Duration::from_secs(600),
            worker_offline_after: Duration::from_secs(120),
            stuck_job_threshold: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(300),
            rotation_retry_interval: Duration::from_secs(60),
            offline_sweep_interval: Duration::from_secs(30),
            max_job_runtime: Duration::from_secs(2 * 3600),
            kill_grace: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            threshold: self.rate_limit_threshold.max(1),
            window: to_time_delta(self.rate_limit_window),
        }
    }

    pub fn stuck_job_delta(&self) -> chrono::TimeDelta {
        to_time_delta(self.stuck_job_threshold)
    }

    pub fn worker_offline_delta(&self) -> chrono::TimeDelta {
        to_time_delta(self.worker_offline_after)
    }
}

/// Convert a std duration, saturating instead of failing on overflow.
pub fn to_time_delta(d: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX)
}
