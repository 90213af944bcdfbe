use pkg_constants::fleet::{DEFAULT_PER_CLUSTER_TIMEOUT_SECS, MAX_PARALLELISM};
use pkg_types::config::AggregatorConfig;
pub use pkg_types::config::{FailureMode, Ordering};
use std::time::Duration;

/// How one aggregation fans out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Concurrently running cluster tasks. Defaults to the number of
    /// clusters; never above [`MAX_PARALLELISM`].
    pub max_parallelism: Option<usize>,
    pub per_cluster_timeout: Duration,
    pub failure_mode: FailureMode,
    pub ordering: Ordering,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            per_cluster_timeout: Duration::from_secs(DEFAULT_PER_CLUSTER_TIMEOUT_SECS),
            failure_mode: FailureMode::default(),
            ordering: Ordering::default(),
        }
    }
}

impl Policy {
    pub fn all_or_nothing(&self) -> Self {
        self.with_failure_mode(FailureMode::AllOrNothing)
    }

    pub fn with_failure_mode(&self, failure_mode: FailureMode) -> Self {
        Self {
            failure_mode,
            ..self.clone()
        }
    }

    pub(crate) fn parallelism(&self, clusters: usize) -> usize {
        self.max_parallelism
            .unwrap_or(clusters)
            .clamp(1, MAX_PARALLELISM)
    }
}

impl From<&AggregatorConfig> for Policy {
    fn from(config: &AggregatorConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism,
            per_cluster_timeout: Duration::from_secs(config.per_cluster_timeout),
            failure_mode: config.failure_mode,
            ordering: config.ordering,
        }
    }
}
