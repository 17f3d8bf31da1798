//! Request extractors and guards.
//!
//! - [`caller::Caller`] -- the operator identity set by the upstream auth layer.
//! - [`trigger_limit::TriggerRateLimiter`] -- per-caller cap on job triggers.

pub mod caller;
pub mod trigger_limit;
