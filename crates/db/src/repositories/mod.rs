//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or an executor) as the first argument.

pub mod audit_repo;
pub mod job_repo;
pub mod orchestrator_log_repo;
pub mod queue_stats_repo;
pub mod rate_limit_event_repo;
pub mod worker_repo;

pub use audit_repo::AuditRepo;
pub use job_repo::JobRepo;
pub use orchestrator_log_repo::OrchestratorLogRepo;
pub use queue_stats_repo::QueueStatsRepo;
pub use rate_limit_event_repo::RateLimitEventRepo;
pub use worker_repo::WorkerRepo;
