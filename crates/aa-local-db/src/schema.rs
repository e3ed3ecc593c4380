//! Database schema definitions and constants.

// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Upper bound of the recent-logs query.
pub const RECENT_LOGS_LIMIT: usize = 100;
