//! Timeouts, retry policy, and cache tuning for broker traffic.

/// Per-request timeout for provision/deprovision calls, in seconds.
pub const DISPATCH_TIMEOUT_SECS: u64 = 10;

/// Broker-side callback delivery: attempts and per-attempt timeout.
/// Retries back off 1s, 2s, 4s between attempts.
pub const CALLBACK_MAX_ATTEMPTS: u32 = 3;
pub const CALLBACK_TIMEOUT_SECS: u64 = 5;

/// Broker registry cache time-to-live, in seconds.
pub const REGISTRY_CACHE_TTL_SECS: u64 = 30;

/// Health probe defaults (per-broker overrides live in the broker spec).
pub const HEALTH_INTERVAL_SECS: u32 = 30;
pub const HEALTH_MIN_INTERVAL_SECS: u32 = 5;
pub const HEALTH_TIMEOUT_SECS: u32 = 5;
pub const HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Heartbeat recency bonuses used when scoring broker candidates.
pub const HEARTBEAT_FRESH_SECS: i64 = 60;
pub const HEARTBEAT_RECENT_SECS: i64 = 300;

/// Work queue retry backoff: base 1s, capped at 5 minutes.
pub const QUEUE_BASE_BACKOFF_MS: u64 = 1_000;
pub const QUEUE_MAX_BACKOFF_SECS: u64 = 300;

/// Wall-clock budget for a single reconcile invocation, in seconds.
pub const RECONCILE_TIMEOUT_SECS: u64 = 60;
