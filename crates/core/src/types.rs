/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// OS-level identifier of a running job process (a pid on unix).
pub type ProcessHandle = i64;
