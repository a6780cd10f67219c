//! Default constants for identirust configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Network Defaults
// =============================================================================

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

// =============================================================================
// Storage Defaults
// =============================================================================

/// Default data directory for the RocksDB backend
pub const DEFAULT_DATA_DIR: &str = "./identirust-data";

// =============================================================================
// Retry Defaults
// =============================================================================

/// Attempts per identify call before a conflict is reported to the caller.
/// Each attempt re-runs the whole resolution from candidate lookup.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff before the second attempt (milliseconds). Doubles per attempt.
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 2;

/// Upper bound for a single backoff (milliseconds).
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 50;

// =============================================================================
// Logging Defaults
// =============================================================================

/// Filter used when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "info";
