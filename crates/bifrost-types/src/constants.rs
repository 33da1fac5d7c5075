//! Process-wide defaults. Every duration here can be overridden through the
//! node configuration; tests shrink them to keep paused-clock runs fast.

use std::time::Duration;

/// Sentinel `ttl_ms` meaning the record never expires.
pub const TTL_INFINITY: i64 = i32::MIN as i64;

/// Area used when the configuration names none.
pub const DEFAULT_AREA: &str = "0";

/// TTL attached to locally originated records.
pub const DEFAULT_KEY_TTL_MS: i64 = 300_000;

/// Self-originated records are refreshed every `key_ttl / TTL_REFRESH_DIVISOR`.
pub const TTL_REFRESH_DIVISOR: u32 = 4;

/// Subtracted from finite TTLs before a record is sent to a peer, so a value
/// bouncing between nodes cannot live forever.
pub const DEFAULT_TTL_DECREMENT_MS: i64 = 1;

/// First retry delay after a failed full sync.
pub const SYNC_INITIAL_BACKOFF: Duration = Duration::from_millis(64);

/// Retry delay ceiling.
pub const SYNC_MAX_BACKOFF: Duration = Duration::from_millis(8_192);

/// Deadline for one complete three-way full sync.
pub const FULL_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request read timeout on peer RPCs.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Flood token-bucket defaults.
pub const DEFAULT_FLOOD_MSG_PER_SEC: u32 = 1_024;
pub const DEFAULT_FLOOD_BURST_SIZE: u32 = 2_048;

/// Well-known key marker for prefix-allocation records, admitted by the
/// derived leaf-node filter.
pub const PREFIX_ALLOC_MARKER: &str = "allocprefix:";

/// Well-known key marker for node-label range records, admitted by the
/// derived leaf-node filter.
pub const NODE_LABEL_RANGE_PREFIX: &str = "nodeLabel:";
