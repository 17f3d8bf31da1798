//! Orchestration engine: admission, job lifecycle, worker rotation, the
//! stuck-job reaper, and operator read models, over any
//! [`OrchestratorStore`].

use std::sync::Arc;

use inkdex_core::capability::{IdentityProvider, JobLauncher, ProcessTerminator, TriggerAuthorizer};
use inkdex_core::config::OrchestratorConfig;
use inkdex_core::store::OrchestratorStore;

pub mod admission;
pub mod executor;
pub mod fleet;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod reaper;
pub mod rotation;
pub mod status;
pub mod terminator;

pub use memory::MemoryStore;

/// The store handle every component shares.
pub type SharedStore = Arc<dyn OrchestratorStore>;

/// Effects the engine delegates to its environment.
#[derive(Clone)]
pub struct Capabilities {
    pub authorizer: Arc<dyn TriggerAuthorizer>,
    pub launcher: Arc<dyn JobLauncher>,
    pub terminator: Arc<dyn ProcessTerminator>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// All engine components wired to one store.
#[derive(Clone)]
pub struct Orchestrator {
    pub store: SharedStore,
    pub config: OrchestratorConfig,
    pub admission: Arc<admission::AdmissionController>,
    pub lifecycle: lifecycle::JobLifecycle,
    pub rotation: Arc<rotation::RotationEngine>,
    pub fleet: Arc<fleet::WorkerFleet>,
    pub reaper: Arc<reaper::StuckJobReaper>,
    pub status: Arc<status::StatusAggregator>,
}

impl Orchestrator {
    pub fn new(store: SharedStore, config: OrchestratorConfig, caps: Capabilities) -> Self {
        let lifecycle = lifecycle::JobLifecycle::new(store.clone(), caps.terminator);
        Self::assemble(store, config, lifecycle, caps.authorizer, caps.launcher, caps.identity)
    }

    /// Wire the engine with a [`executor::ProcessLauncher`] that shares the
    /// engine's own lifecycle, so spawned jobs report through it.
    pub fn with_process_launcher(
        store: SharedStore,
        config: OrchestratorConfig,
        authorizer: Arc<dyn TriggerAuthorizer>,
        terminator: Arc<dyn ProcessTerminator>,
        identity: Arc<dyn IdentityProvider>,
        commands: executor::CommandTable,
    ) -> Self {
        Self::with_configured_launcher(store, config, authorizer, terminator, identity, commands, |l| l)
    }

    /// Like [`Orchestrator::with_process_launcher`], with a hook to adjust
    /// the launcher (working directory, extra environment) before use.
    pub fn with_configured_launcher<F>(
        store: SharedStore,
        config: OrchestratorConfig,
        authorizer: Arc<dyn TriggerAuthorizer>,
        terminator: Arc<dyn ProcessTerminator>,
        identity: Arc<dyn IdentityProvider>,
        commands: executor::CommandTable,
        configure: F,
    ) -> Self
    where
        F: FnOnce(executor::ProcessLauncher) -> executor::ProcessLauncher,
    {
        let lifecycle = lifecycle::JobLifecycle::new(store.clone(), terminator);
        let limits = executor::ExecutionLimits {
            max_runtime: config.max_job_runtime,
            kill_grace: config.kill_grace,
        };
        let launcher: Arc<dyn JobLauncher> = Arc::new(configure(
            executor::ProcessLauncher::new(lifecycle.clone(), commands, limits),
        ));
        Self::assemble(store, config, lifecycle, authorizer, launcher, identity)
    }

    fn assemble(
        store: SharedStore,
        config: OrchestratorConfig,
        lifecycle: lifecycle::JobLifecycle,
        authorizer: Arc<dyn TriggerAuthorizer>,
        launcher: Arc<dyn JobLauncher>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let stale_after = config.stuck_job_delta();
        Self {
            admission: Arc::new(admission::AdmissionController::new(
                store.clone(),
                authorizer,
                launcher,
            )),
            rotation: Arc::new(rotation::RotationEngine::new(
                store.clone(),
                identity,
                config.rotation_policy(),
            )),
            fleet: Arc::new(fleet::WorkerFleet::new(
                store.clone(),
                config.worker_offline_delta(),
            )),
            reaper: Arc::new(reaper::StuckJobReaper::new(
                store.clone(),
                lifecycle.clone(),
                stale_after,
            )),
            status: Arc::new(status::StatusAggregator::new(store.clone(), stale_after)),
            lifecycle,
            store,
            config,
        }
    }
}
