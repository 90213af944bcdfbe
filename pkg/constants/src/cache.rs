//! Refreshing cache constants.

/// Lower bound for every refreshing-cache TTL, in seconds.
pub const MIN_CACHE_TTL_SECS: u64 = 60;

/// Default TTL of the per-cluster namespace list.
pub const DEFAULT_NAMESPACES_TTL_SECS: u64 = 5 * 60;

/// Default TTL of the global application topology.
pub const DEFAULT_TOPOLOGY_TTL_SECS: u64 = 5 * 60;

/// Default TTL of the teams index.
pub const DEFAULT_TEAMS_TTL_SECS: u64 = 5 * 60;

/// Default TTL of the application tags index.
pub const DEFAULT_TAGS_TTL_SECS: u64 = 5 * 60;

/// Upper bound on merged users kept in the session keyspace.
pub const MAX_CACHED_USERS: usize = 10_000;
