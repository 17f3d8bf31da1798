#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use inkdex_core::capability::{
    AllowAll, IdentityProvider, JobLauncher, ProcessTerminator, TriggerAuthorizer,
};
use inkdex_core::config::OrchestratorConfig;
use inkdex_core::error::CoreError;
use inkdex_core::job::PipelineJob;
use inkdex_core::trigger::TriggerRequest;
use inkdex_core::types::{DbId, ProcessHandle};
use inkdex_core::worker_pool::{Worker, WorkerIdentity};
use inkdex_pipeline::{Capabilities, MemoryStore, Orchestrator, SharedStore};

/// Records launches; fails them when `fail` is set.
#[derive(Default)]
pub struct FakeLauncher {
    pub launched: Mutex<Vec<DbId>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl JobLauncher for FakeLauncher {
    async fn launch(&self, job: &PipelineJob) -> Result<(), CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("spawn refused".to_string()));
        }
        self.launched.lock().unwrap().push(job.id);
        Ok(())
    }
}

/// Records every handle it is asked to terminate.
pub struct FakeTerminator {
    pub signalled: Mutex<Vec<ProcessHandle>>,
    pub succeed: bool,
}

impl FakeTerminator {
    pub fn new(succeed: bool) -> Self {
        Self {
            signalled: Mutex::new(Vec::new()),
            succeed,
        }
    }
}

impl ProcessTerminator for FakeTerminator {
    fn terminate(&self, handle: ProcessHandle) -> bool {
        self.signalled.lock().unwrap().push(handle);
        self.succeed
    }
}

/// Hands out scripted identities; an exhausted script or a queued `Err`
/// fails the request.
#[derive(Default)]
pub struct FakeIdentity {
    pub script: Mutex<VecDeque<Result<WorkerIdentity, String>>>,
    pub requests: Mutex<Vec<DbId>>,
}

impl FakeIdentity {
    pub fn push_ok(&self, instance_id: &str, ip: &str) {
        self.script.lock().unwrap().push_back(Ok(WorkerIdentity {
            instance_id: instance_id.to_string(),
            ip_address: ip.to_string(),
        }));
    }

    pub fn push_err(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn fresh_identity(&self, worker: &Worker) -> Result<WorkerIdentity, CoreError> {
        self.requests.lock().unwrap().push(worker.id);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(identity)) => Ok(identity),
            Some(Err(msg)) => Err(CoreError::IdentityRotation(msg)),
            None => Err(CoreError::IdentityRotation("no identity available".to_string())),
        }
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub launcher: Arc<FakeLauncher>,
    pub terminator: Arc<FakeTerminator>,
    pub identity: Arc<FakeIdentity>,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(AllowAll), true)
}

pub fn harness_with(authorizer: Arc<dyn TriggerAuthorizer>, terminate_succeeds: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let launcher = Arc::new(FakeLauncher::default());
    let terminator = Arc::new(FakeTerminator::new(terminate_succeeds));
    let identity = Arc::new(FakeIdentity::default());

    let shared: SharedStore = store.clone();
    let orchestrator = Orchestrator::new(
        shared,
        OrchestratorConfig::default(),
        Capabilities {
            authorizer,
            launcher: launcher.clone(),
            terminator: terminator.clone(),
            identity: identity.clone(),
        },
    );

    Harness {
        orchestrator,
        store,
        launcher,
        terminator,
        identity,
    }
}

pub fn trigger(category: &str, scope: &str) -> TriggerRequest {
    TriggerRequest {
        category: category.to_string(),
        scope: scope.to_string(),
        ..Default::default()
    }
}
