use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use inkdex_core::capability::{AllowAll, AllowlistAuthorizer, IdentityProvider, TriggerAuthorizer};
use inkdex_pipeline::executor::CommandTable;
use inkdex_pipeline::identity::{HttpIdentityProvider, UnavailableIdentityProvider};
use inkdex_pipeline::terminator::SignalTerminator;
use inkdex_pipeline::{MemoryStore, Orchestrator, SharedStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkdex_api::background;
use inkdex_api::config::{orchestrator_config_from_env, ServerConfig};
use inkdex_api::router::build_app_router;
use inkdex_api::state::AppState;

/// Upper bound on one identity provisioning call.
const IDENTITY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often idle callers are dropped from the trigger limiter.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "inkdex_api=debug,inkdex_pipeline=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let orchestrator_config = orchestrator_config_from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        threshold = orchestrator_config.rate_limit_threshold,
        window_secs = orchestrator_config.rate_limit_window.as_secs(),
        stuck_after_secs = orchestrator_config.stuck_job_threshold.as_secs(),
        "Loaded orchestrator configuration",
    );

    // --- Store ---
    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let pool = inkdex_db::create_pool(url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            inkdex_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            inkdex_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(inkdex_db::PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; using the in-memory store (state is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Capabilities ---
    let authorizer: Arc<dyn TriggerAuthorizer> = if config.trigger_allowlist.is_empty() {
        Arc::new(AllowAll)
    } else {
        tracing::info!(callers = config.trigger_allowlist.len(), "Trigger allowlist enabled");
        Arc::new(AllowlistAuthorizer::new(config.trigger_allowlist.iter()))
    };

    let identity: Arc<dyn IdentityProvider> = match &config.identity_provider_url {
        Some(url) => Arc::new(
            HttpIdentityProvider::new(url.as_str(), IDENTITY_REQUEST_TIMEOUT)
                .expect("Failed to build identity provider client"),
        ),
        None => {
            tracing::warn!("IDENTITY_PROVIDER_URL is not set; rotations will stay pending");
            Arc::new(UnavailableIdentityProvider)
        }
    };

    let workdir = config.job_workdir.clone();
    let orchestrator = Orchestrator::with_configured_launcher(
        store,
        orchestrator_config.clone(),
        authorizer,
        Arc::new(SignalTerminator),
        identity,
        CommandTable::from_env(),
        |launcher| match workdir {
            Some(dir) => launcher.with_working_dir(dir),
            None => launcher,
        },
    );

    let state = AppState::new(orchestrator, config.clone());
    let orchestrator = &state.orchestrator;

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let tasks = [
        tokio::spawn(background::reaper::run(
            Arc::clone(&orchestrator.reaper),
            orchestrator_config.reaper_interval,
            cancel.clone(),
        )),
        tokio::spawn(background::rotation_retry::run(
            Arc::clone(&orchestrator.rotation),
            orchestrator_config.rotation_retry_interval,
            cancel.clone(),
        )),
        tokio::spawn(background::offline_sweep::run(
            Arc::clone(&orchestrator.fleet),
            orchestrator_config.offline_sweep_interval,
            cancel.clone(),
        )),
        tokio::spawn(background::limiter_prune::run(
            Arc::clone(&state.trigger_limiter),
            LIMITER_PRUNE_INTERVAL,
            cancel.clone(),
        )),
    ];
    tracing::info!("Background tasks started (reaper, rotation retry, offline sweep, limiter pruning)");

    // --- Router ---
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let app = build_app_router(state, &config);

    // --- Start server ---
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping background tasks");
    cancel.cancel();
    for task in tasks {
        if tokio::time::timeout(shutdown_timeout, task).await.is_err() {
            tracing::warn!("Background task did not stop in time");
        }
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
