//! Row structs as stored in PostgreSQL.
//!
//! Enum columns are TEXT; each row converts into its `inkdex_core` type via
//! `TryFrom`, failing with `CoreError::Internal` on an unknown value.

pub mod audit;
pub mod job;
pub mod orchestrator_log;
pub mod queue;
pub mod rate_limit_event;
pub mod worker;

use inkdex_core::error::CoreError;

/// Parse a TEXT enum column, reporting corrupt data as an internal error.
pub(crate) fn parse_column<T>(column: &'static str, value: &str) -> Result<T, CoreError>
where
    T: std::str::FromStr<Err = CoreError>,
{
    value
        .parse()
        .map_err(|e| CoreError::Internal(format!("Corrupt {column} column: {e}")))
}
