//! State store / leader election constants.

/// How long a leader lease is valid, in seconds.
pub const LEADER_LEASE_TTL_SECS: u64 = 15;

/// The lease is renewed every `TTL / LEADER_RENEW_INTERVAL_DIVISOR` seconds.
pub const LEADER_RENEW_INTERVAL_DIVISOR: u64 = 3;

/// Capacity of the watch event ring buffer.
pub const WATCH_BUFFER_EVENTS: usize = 10_000;
