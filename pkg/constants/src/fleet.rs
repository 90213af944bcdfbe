//! Fleet aggregator constants.

/// Hard upper bound on concurrently running per-cluster tasks.
pub const MAX_PARALLELISM: usize = 32;

/// Default timeout for a single cluster's part of an aggregation.
pub const DEFAULT_PER_CLUSTER_TIMEOUT_SECS: u64 = 30;
