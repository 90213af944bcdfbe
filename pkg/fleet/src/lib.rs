//! Fan-out of one operation across the fleet.
//!
//! [`Fleet::aggregate`] runs an operation against every selected cluster on
//! its own task, bounded by the policy's parallelism and per-cluster timeout,
//! and merges the results in a deterministic order. Failing clusters are
//! either reported next to the successful subset or abort the whole call,
//! depending on the [`FailureMode`].

mod policy;

pub use policy::{FailureMode, Ordering, Policy};

use pkg_cluster::{Cluster, ClusterError, Clusters};
use pkg_metrics::metrics;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Why one cluster did not contribute to an aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Failed(String),
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerClusterError {
    pub cluster: String,
    pub kind: ErrorKind,
}

impl PerClusterError {
    fn label(&self) -> &'static str {
        match self.kind {
            ErrorKind::Failed(_) => "failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PerClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Failed(msg) => write!(f, "cluster {}: {}", self.cluster, msg),
            ErrorKind::Timeout => write!(f, "cluster {}: timed out", self.cluster),
            ErrorKind::Cancelled => write!(f, "cluster {}: cancelled", self.cluster),
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("upstream failure: {}", first_error(.0))]
    UpstreamFailure(Vec<PerClusterError>),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl AggregateError {
    /// True when every failing cluster timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AggregateError::UpstreamFailure(errors)
            if !errors.is_empty() && errors.iter().all(|e| e.kind == ErrorKind::Timeout))
    }
}

fn first_error(errors: &[PerClusterError]) -> String {
    match errors.first() {
        Some(e) if errors.len() > 1 => format!("{} (and {} more)", e, errors.len() - 1),
        Some(e) => e.to_string(),
        None => "no clusters answered".to_string(),
    }
}

/// Result of a completed aggregation.
#[derive(Debug)]
pub struct Aggregated<T> {
    pub items: Vec<T>,
    pub errors: Vec<PerClusterError>,
}

/// The cluster registry plus the default aggregation policy.
#[derive(Clone)]
pub struct Fleet {
    clusters: Arc<Clusters>,
    policy: Policy,
}

impl Fleet {
    pub fn new(clusters: Clusters, policy: Policy) -> Self {
        Self {
            clusters: Arc::new(clusters),
            policy,
        }
    }

    pub fn clusters(&self) -> &Clusters {
        &self.clusters
    }

    /// Default policy for best-effort reads.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Run `op` against every cluster.
    pub async fn aggregate<T, F, Fut>(
        &self,
        op: F,
        filter: impl Fn(&T) -> bool,
        policy: &Policy,
    ) -> Result<Aggregated<T>, AggregateError>
    where
        T: Send + 'static,
        F: Fn(Arc<Cluster>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ClusterError>> + Send + 'static,
    {
        self.aggregate_over(self.clusters.all(), op, filter, policy)
            .await
    }

    /// Run `op` against the named clusters. Unknown names are an error.
    pub async fn aggregate_selected<T, F, Fut>(
        &self,
        names: &[String],
        op: F,
        filter: impl Fn(&T) -> bool,
        policy: &Policy,
    ) -> Result<Aggregated<T>, AggregateError>
    where
        T: Send + 'static,
        F: Fn(Arc<Cluster>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ClusterError>> + Send + 'static,
    {
        let clusters = self.clusters.select(names)?;
        self.aggregate_over(clusters, op, filter, policy).await
    }

    async fn aggregate_over<T, F, Fut>(
        &self,
        mut clusters: Vec<Arc<Cluster>>,
        op: F,
        filter: impl Fn(&T) -> bool,
        policy: &Policy,
    ) -> Result<Aggregated<T>, AggregateError>
    where
        T: Send + 'static,
        F: Fn(Arc<Cluster>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, ClusterError>> + Send + 'static,
    {
        if policy.ordering == Ordering::StableByClusterName {
            clusters.sort_by(|a, b| a.name().cmp(b.name()));
        }

        let permits = Arc::new(Semaphore::new(policy.parallelism(clusters.len())));
        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();
        let mut names = Vec::with_capacity(clusters.len());

        for (index, cluster) in clusters.into_iter().enumerate() {
            names.push(cluster.name().to_string());
            let work = op(cluster);
            let permits = permits.clone();
            let timeout = policy.per_cluster_timeout;
            let handle = tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Err(ErrorKind::Cancelled);
                };
                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(items)) => Ok(items),
                    Ok(Err(e)) => Err(ErrorKind::Failed(e.to_string())),
                    Err(_) => Err(ErrorKind::Timeout),
                }
            });
            owners.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<Vec<T>>> = (0..names.len()).map(|_| None).collect();
        let mut failures: Vec<(usize, PerClusterError)> = Vec::new();

        while let Some(joined) = tasks.join_next_with_id().await {
            let (index, outcome) = match joined {
                Ok((id, outcome)) => (owners[&id], outcome),
                Err(e) if e.is_cancelled() => (owners[&e.id()], Err(ErrorKind::Cancelled)),
                Err(e) => (owners[&e.id()], Err(ErrorKind::Failed(format!("task panicked: {e}")))),
            };

            match outcome {
                Ok(items) => slots[index] = Some(items),
                Err(kind) => {
                    let error = PerClusterError {
                        cluster: names[index].clone(),
                        kind,
                    };
                    warn!(cluster = %error.cluster, error = %error, "cluster failed during aggregation");
                    metrics().counter_inc_with(
                        "kobs_aggregator_cluster_errors_total",
                        &[("cluster", &error.cluster), ("kind", error.label())],
                    );
                    if policy.failure_mode == FailureMode::AllOrNothing {
                        tasks.abort_all();
                        return Err(AggregateError::UpstreamFailure(vec![error]));
                    }
                    failures.push((index, error));
                }
            }
        }

        failures.sort_by_key(|(index, _)| *index);
        let items: Vec<T> = slots
            .into_iter()
            .flatten()
            .flatten()
            .filter(|item| filter(item))
            .collect();
        debug!(
            clusters = names.len(),
            items = items.len(),
            errors = failures.len(),
            "aggregation finished"
        );

        Ok(Aggregated {
            items,
            errors: failures.into_iter().map(|(_, e)| e).collect(),
        })
    }
}

#[cfg(test)]
mod tests;
