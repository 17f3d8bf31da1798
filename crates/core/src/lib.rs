//! Domain types, validation rules, and policies for pipeline job
//! orchestration and worker fleet management.
//!
//! Everything here is pure: no I/O, no runtime. Storage and external
//! effects are expressed as traits in [`store`] and [`capability`] and
//! implemented by the `db` and `pipeline` crates.

#[macro_use]
mod macros;

pub mod audit;
pub mod capability;
pub mod config;
pub mod error;
pub mod job;
pub mod reaper;
pub mod rotation;
pub mod status;
pub mod store;
pub mod trigger;
pub mod types;
pub mod worker_pool;
