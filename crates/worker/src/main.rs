use std::time::Duration;

use anyhow::Context;
use inkdex_core::worker_pool::RegisterWorker;
use inkdex_worker::agent;
use inkdex_worker::client::OrchestratorClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Worker agent settings.
///
/// | Env Var                  | Default                 |
/// |--------------------------|-------------------------|
/// | `ORCHESTRATOR_URL`       | `http://localhost:3000` |
/// | `WORKER_NAME`            | assigned by server      |
/// | `INSTANCE_ID`            | required                |
/// | `IP_ADDRESS`             | required                |
/// | `CHECK_IN_INTERVAL_SECS` | `30`                    |
struct AgentConfig {
    orchestrator_url: String,
    registration: RegisterWorker,
    check_in_interval: Duration,
}

impl AgentConfig {
    fn from_env() -> anyhow::Result<Self> {
        let check_in_secs: u64 = match std::env::var("CHECK_IN_INTERVAL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .context("CHECK_IN_INTERVAL_SECS must be a whole number of seconds")?,
            Err(_) => 30,
        };
        Ok(Self {
            orchestrator_url: std::env::var("ORCHESTRATOR_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            registration: RegisterWorker {
                name: std::env::var("WORKER_NAME").ok().filter(|n| !n.trim().is_empty()),
                instance_id: std::env::var("INSTANCE_ID").context("INSTANCE_ID must be set")?,
                ip_address: std::env::var("IP_ADDRESS").context("IP_ADDRESS must be set")?,
            },
            check_in_interval: Duration::from_secs(check_in_secs.max(1)),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "inkdex_worker=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = AgentConfig::from_env()?;
    let client = OrchestratorClient::new(&config.orchestrator_url);

    let worker = agent::register(&client, &config.registration)
        .await
        .with_context(|| format!("Failed to register with {}", config.orchestrator_url))?;

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        stop.cancel();
    });

    agent::check_in_loop(&client, worker.id, config.check_in_interval, cancel).await;
    tracing::info!(worker_id = worker.id, "Worker agent stopped");
    Ok(())
}
