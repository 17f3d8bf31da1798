//! Worker-side runtime for the pipeline orchestrator.
//!
//! [`client::OrchestratorClient`] speaks the agent and execution-signal
//! endpoints. [`session::JobSession`] wraps one running job: it reports
//! progress on an interval and flips a cancellation token as soon as the
//! orchestrator says the job is no longer running. [`agent`] holds the
//! fleet check-in loop.

pub mod agent;
pub mod client;
pub mod session;
