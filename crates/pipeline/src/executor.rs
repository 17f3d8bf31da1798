//! Runs admitted jobs as child processes.
//!
//! [`ProcessLauncher::launch`] spawns the category's command, records the
//! child pid as the job's process handle (`pending -> running`), and hands
//! the child to a supervisor task. The supervisor enforces the maximum
//! runtime and writes the terminal status when the child exits, unless the
//! job already left `running` (cancelled or reaped) in the meantime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use inkdex_core::capability::JobLauncher;
use inkdex_core::error::CoreError;
use inkdex_core::job::{JobCategory, JobCompletion, JobStatus, PipelineJob};
use inkdex_core::types::{DbId, ProcessHandle};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::lifecycle::JobLifecycle;

/// Bytes of stderr kept for the failure message.
pub const STDERR_TAIL_BYTES: usize = 1_000;

/// How long to keep reading output after the child has exited.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Variables copied from the orchestrator's environment into every child.
/// Everything else is withheld.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "NODE_ENV",
    "DATABASE_URL",
    "RUST_LOG",
    "ORCHESTRATOR_URL",
];

/// Program plus arguments for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split a whitespace-separated command line. `None` when blank.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// Which command runs for each category.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: HashMap<JobCategory, CommandSpec>,
}

impl CommandTable {
    /// The stock pipeline scripts. `single-item` has no default; it must be
    /// configured explicitly.
    pub fn defaults() -> Self {
        let mut table = Self::default();
        table.set(JobCategory::Scrape, CommandSpec::new("npm", &["run", "scrape-instagram"]));
        table.set(JobCategory::Process, CommandSpec::new("npm", &["run", "process-images"]));
        table.set(
            JobCategory::Embed,
            CommandSpec::new("python3", &["scripts/embeddings/dual_gpu_embeddings.py"]),
        );
        table.set(
            JobCategory::IndexRebuild,
            CommandSpec::new("npx", &["tsx", "scripts/embeddings/create-vector-index.ts"]),
        );
        table
    }

    /// Defaults overridden by `JOB_COMMAND_<CATEGORY>` variables, e.g.
    /// `JOB_COMMAND_INDEX_REBUILD="npx tsx rebuild.ts"`.
    pub fn from_env() -> Self {
        let mut table = Self::defaults();
        for category in JobCategory::ALL {
            let var = format!(
                "JOB_COMMAND_{}",
                category.as_str().replace('-', "_").to_uppercase()
            );
            if let Some(spec) = std::env::var(&var).ok().as_deref().and_then(CommandSpec::parse) {
                table.set(*category, spec);
            }
        }
        table
    }

    pub fn set(&mut self, category: JobCategory, spec: CommandSpec) {
        self.commands.insert(category, spec);
    }

    pub fn get(&self, category: JobCategory) -> Option<&CommandSpec> {
        self.commands.get(&category)
    }
}

/// Runtime bounds for job processes.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub max_runtime: Duration,
    pub kill_grace: Duration,
}

/// [`JobLauncher`] that runs each job as a local child process.
pub struct ProcessLauncher {
    lifecycle: JobLifecycle,
    commands: CommandTable,
    limits: ExecutionLimits,
    working_dir: Option<PathBuf>,
    env_allowlist: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(lifecycle: JobLifecycle, commands: CommandTable, limits: ExecutionLimits) -> Self {
        Self {
            lifecycle,
            commands,
            limits,
            working_dir: None,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Pass additional variables through to children.
    pub fn with_env_passthrough<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_allowlist.extend(names.into_iter().map(Into::into));
        self
    }

    fn build_command(&self, job: &PipelineJob, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for name in &self.env_allowlist {
            if let Ok(value) = std::env::var(name) {
                cmd.env(name, value);
            }
        }
        for (key, value) in job_env(job) {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Job parameters exposed to the child process.
pub fn job_env(job: &PipelineJob) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("PIPELINE_RUN_ID", job.id.to_string()),
        ("PIPELINE_CATEGORY", job.category.to_string()),
        ("PIPELINE_SCOPE", job.scope.to_string()),
    ];
    if let Some(limit) = job.limit {
        env.push(("PIPELINE_LIMIT", limit.to_string()));
    }
    if let Some(city) = &job.target_city {
        env.push(("PIPELINE_CITY", city.clone()));
    }
    if let Some(ids) = &job.target_ids {
        let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        env.push(("PIPELINE_TARGET_IDS", joined));
    }
    env
}

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, job: &PipelineJob) -> Result<(), CoreError> {
        let spec = self.commands.get(job.category).ok_or_else(|| {
            CoreError::Internal(format!("no command configured for category {}", job.category))
        })?;

        let mut child = self
            .build_command(job, spec)
            .spawn()
            .map_err(|e| CoreError::Internal(format!("failed to spawn {}: {e}", spec.program)))?;
        let pid = child.id().map(ProcessHandle::from);

        if let Err(e) = self.lifecycle.start(job.id, pid).await {
            // The job left `pending` before the child attached; nothing may run.
            let _ = child.start_kill();
            return Err(e);
        }

        tracing::info!(job_id = job.id, program = %spec.program, ?pid, "Job process spawned");
        tokio::spawn(supervise(self.lifecycle.clone(), job.id, child, self.limits));
        Ok(())
    }
}

struct ProcessReport {
    status: Option<ExitStatus>,
    timed_out: bool,
    stdout_bytes: u64,
    stderr_bytes: u64,
    stderr_tail: String,
    elapsed: Duration,
}

/// Wait for the child, enforcing the runtime limit, then record the result.
async fn supervise(lifecycle: JobLifecycle, job_id: DbId, child: Child, limits: ExecutionLimits) {
    let report = run_to_exit(job_id, child, limits).await;

    // A cancelled or reaped job keeps its terminal state.
    match lifecycle.get(job_id).await {
        Ok(job) if job.status == JobStatus::Running => {}
        Ok(job) => {
            tracing::debug!(job_id, status = %job.status, "Job no longer running, skipping result");
            return;
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Could not load job after process exit");
            return;
        }
    }

    let exit_code = report.status.and_then(|s| s.code());
    let succeeded = !report.timed_out && report.status.is_some_and(|s| s.success());

    let result = if succeeded {
        let completion = JobCompletion {
            total_items: None,
            result_summary: Some(json!({
                "exit_code": exit_code,
                "timed_out": report.timed_out,
                "stdout_bytes": report.stdout_bytes,
                "stderr_bytes": report.stderr_bytes,
                "elapsed_secs": report.elapsed.as_secs(),
            })),
        };
        lifecycle.complete(job_id, &completion).await.map(|_| ())
    } else {
        let message = failure_message(&report, limits.max_runtime);
        lifecycle.fail(job_id, &message).await.map(|_| ())
    };

    if let Err(e) = result {
        // Usually a cancel that landed after the status check above.
        tracing::warn!(job_id, error = %e, "Could not record job result");
    }
}

async fn run_to_exit(job_id: DbId, mut child: Child, limits: ExecutionLimits) -> ProcessReport {
    let start = Instant::now();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(count_stream(stdout));
    let stderr_task = tokio::spawn(tail_stream(stderr, STDERR_TAIL_BYTES));

    let mut timed_out = false;
    let status = match tokio::time::timeout(limits.max_runtime, child.wait()).await {
        Ok(result) => result,
        Err(_elapsed) => {
            timed_out = true;
            tracing::warn!(
                job_id,
                max_runtime_secs = limits.max_runtime.as_secs(),
                "Job exceeded maximum runtime, terminating",
            );
            request_stop(&mut child);
            match tokio::time::timeout(limits.kill_grace, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(job_id, "Job ignored SIGTERM, killing");
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    let status = match status {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed waiting for job process");
            None
        }
    };

    // Grandchildren may hold the pipes open after the child itself exits.
    let stdout_bytes = tokio::time::timeout(STREAM_DRAIN_TIMEOUT, stdout_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();
    let (stderr_bytes, stderr_tail) = tokio::time::timeout(STREAM_DRAIN_TIMEOUT, stderr_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();

    ProcessReport {
        status,
        timed_out,
        stdout_bytes,
        stderr_bytes,
        stderr_tail,
        elapsed: start.elapsed(),
    }
}

fn failure_message(report: &ProcessReport, max_runtime: Duration) -> String {
    if report.timed_out {
        return format!("Job timed out after {}s", max_runtime.as_secs());
    }
    let tail = report.stderr_tail.trim();
    if !tail.is_empty() {
        return tail.to_string();
    }
    match report.status {
        Some(status) => format!("Job process exited with {status}"),
        None => "Job process could not be awaited".to_string(),
    }
}

/// Polite stop: SIGTERM, falling back to an immediate kill.
#[cfg(unix)]
fn request_stop(child: &mut Child) {
    let signalled = child
        .id()
        .is_some_and(|pid| crate::terminator::send_signal(ProcessHandle::from(pid), libc::SIGTERM));
    if !signalled {
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}

async fn count_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> u64 {
    match handle {
        Some(mut h) => tokio::io::copy(&mut h, &mut tokio::io::sink()).await.unwrap_or(0),
        None => 0,
    }
}

/// Total byte count plus the last `keep` bytes, lossily decoded.
async fn tail_stream<R: AsyncRead + Unpin>(handle: Option<R>, keep: usize) -> (u64, String) {
    let Some(mut h) = handle else {
        return (0, String::new());
    };
    let mut total = 0u64;
    let mut tail: Vec<u8> = Vec::with_capacity(keep * 2);
    let mut buf = [0u8; 4096];
    loop {
        match h.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n as u64;
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > keep * 2 {
                    tail.drain(..tail.len() - keep);
                }
            }
        }
    }
    if tail.len() > keep {
        tail.drain(..tail.len() - keep);
    }
    (total, String::from_utf8_lossy(&tail).into_owned())
}
