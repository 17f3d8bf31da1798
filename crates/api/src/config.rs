use std::time::Duration;

use inkdex_core::config::OrchestratorConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background tasks get to stop after shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL connection string. Unset means the in-memory store.
    pub database_url: Option<String>,
    /// Callers allowed to trigger jobs. Empty allows every identified caller.
    pub trigger_allowlist: Vec<String>,
    /// Trigger attempts allowed per caller per window (default: `5`).
    pub trigger_rate_limit: usize,
    /// Trigger rate window in seconds (default: `3600`).
    pub trigger_rate_window_secs: u64,
    /// Endpoint of the identity provisioning service, if any.
    pub identity_provider_url: Option<String>,
    /// Working directory for spawned job processes.
    pub job_workdir: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                 |
    /// |----------------------------|-------------------------|
    /// | `HOST`                     | `0.0.0.0`               |
    /// | `PORT`                     | `3000`                  |
    /// | `CORS_ORIGINS`             | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`                    |
    /// | `DATABASE_URL`             | unset                   |
    /// | `TRIGGER_ALLOWLIST`        | empty                   |
    /// | `TRIGGER_RATE_LIMIT`       | `5`                     |
    /// | `TRIGGER_RATE_WINDOW_SECS` | `3600`                  |
    /// | `IDENTITY_PROVIDER_URL`    | unset                   |
    /// | `JOB_WORKDIR`              | unset                   |
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("PORT", 3000),
            cors_origins: env_list("CORS_ORIGINS", "http://localhost:5173"),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", 30),
            database_url: env_opt("DATABASE_URL"),
            trigger_allowlist: env_list("TRIGGER_ALLOWLIST", ""),
            trigger_rate_limit: env_parse("TRIGGER_RATE_LIMIT", 5),
            trigger_rate_window_secs: env_parse("TRIGGER_RATE_WINDOW_SECS", 3600),
            identity_provider_url: env_opt("IDENTITY_PROVIDER_URL"),
            job_workdir: env_opt("JOB_WORKDIR"),
        }
    }

    pub fn trigger_rate_window(&self) -> Duration {
        Duration::from_secs(self.trigger_rate_window_secs)
    }
}

/// Orchestration tuning from the environment, defaulting field by field.
///
/// | Env Var                        | Default |
/// |--------------------------------|---------|
/// | `RATE_LIMIT_THRESHOLD`         | `5`     |
/// | `RATE_LIMIT_WINDOW_SECS`       | `600`   |
/// | `WORKER_OFFLINE_SECS`          | `120`   |
/// | `STUCK_JOB_THRESHOLD_SECS`     | `3600`  |
/// | `REAPER_INTERVAL_SECS`         | `300`   |
/// | `ROTATION_RETRY_INTERVAL_SECS` | `60`    |
/// | `OFFLINE_SWEEP_INTERVAL_SECS`  | `30`    |
/// | `MAX_JOB_RUNTIME_SECS`         | `7200`  |
/// | `KILL_GRACE_SECS`              | `10`    |
pub fn orchestrator_config_from_env() -> OrchestratorConfig {
    let d = OrchestratorConfig::default();
    let secs = |name: &str, default: Duration| {
        Duration::from_secs(env_parse(name, default.as_secs()))
    };
    OrchestratorConfig {
        rate_limit_threshold: env_parse("RATE_LIMIT_THRESHOLD", d.rate_limit_threshold),
        rate_limit_window: secs("RATE_LIMIT_WINDOW_SECS", d.rate_limit_window),
        worker_offline_after: secs("WORKER_OFFLINE_SECS", d.worker_offline_after),
        stuck_job_threshold: secs("STUCK_JOB_THRESHOLD_SECS", d.stuck_job_threshold),
        reaper_interval: secs("REAPER_INTERVAL_SECS", d.reaper_interval),
        rotation_retry_interval: secs("ROTATION_RETRY_INTERVAL_SECS", d.rotation_retry_interval),
        offline_sweep_interval: secs("OFFLINE_SWEEP_INTERVAL_SECS", d.offline_sweep_interval),
        max_job_runtime: secs("MAX_JOB_RUNTIME_SECS", d.max_job_runtime),
        kill_grace: secs("KILL_GRACE_SECS", d.kill_grace),
    }
}

/// Parse `name` or fall back to `default` when unset. A value that does not
/// parse is a startup error.
fn env_parse<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be valid: {e}")),
        Err(_) => default,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
