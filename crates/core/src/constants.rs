use std::time::Duration;

pub const SQLITE_SCHEMA_TABLE: &str = "main.sqlite_schema";

// Public APIs
pub const API_PATH: &str = "api";

pub const DEFAULT_ADDRESS: &str = "localhost:5000";
pub const DEFAULT_DB_PATH: &str = "./data/main.db";

/// How long a batch may wait for the writer before giving up.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for executing a batch's statements. The final commit is not interrupted.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

pub const MAX_IDENTIFIER_LENGTH: usize = 64;

// Default is only 2MB, increase to 10MB.
pub(crate) const REQUEST_BODY_LIMIT: usize = 10 * 1024 * 1024;
