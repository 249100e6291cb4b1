//! Centralized default constants for stowage.
//!
//! All crates and the CLI reference these constants instead of defining
//! their own magic numbers.

// =============================================================================
// BATCH JOBS
// =============================================================================

/// Default number of records selected per pass by each batch job.
pub const BATCH_LIMIT: i64 = 512;

/// Limit used by the one-shot bulk mover run from `init`.
pub const LEGACY_BULK_MOVE_LIMIT: i64 = 10_000;

/// Progress is logged every this many records (and on the last one).
pub const PROGRESS_INTERVAL: usize = 64;

// =============================================================================
// CONTENT
// =============================================================================

/// Number of hex characters of the digest used as the shard directory.
pub const SHARD_PREFIX_LEN: usize = 3;

/// Length of a hex-encoded SHA-1 digest.
pub const DIGEST_HEX_LEN: usize = 40;

/// Number of leading bytes inspected when sniffing for base64.
pub const BASE64_SNIFF_WINDOW: usize = 64;

/// Placeholder stored when extraction yields no text.
pub const INDEX_NOT_APPLICABLE: &str = "--n/a--";

// =============================================================================
// STORAGE
// =============================================================================

/// The only supported scheme for `storage.rootLocation`.
pub const FILE_SCHEME: &str = "file://";

/// Directory under the storage root used by the startup health check.
pub const HEALTH_CHECK_DIR: &str = ".health-check";

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL when `DATABASE_URL` is not set.
pub const DATABASE_URL: &str = "postgres://localhost/stowage";
