//! Global application topology, teams index and tags index.
//!
//! All three artefacts are derived from one best-effort aggregation of every
//! application in the fleet and live in their own cache keyspace. Requests
//! are answered from the cached global graph; a per-cluster failure is only
//! visible to a caller when nothing is cached yet and every cluster failed.

mod build;
mod serve;

pub use build::{TeamsIndex, build_tags, build_teams_index, build_topology};
pub use serve::{Selection, filter_topology};

use pkg_cache::RefreshingCache;
use pkg_fleet::{AggregateError, Fleet};
use pkg_metrics::metrics;
use pkg_types::application::ApplicationSpec;
use pkg_types::config::CacheConfig;
use pkg_types::reference::Reference;
use pkg_types::topology::Topology;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct TopologyEngine {
    fleet: Fleet,
    topology: RefreshingCache<(), Arc<Topology>>,
    teams: RefreshingCache<(), Arc<TeamsIndex>>,
    tags: RefreshingCache<(), Arc<Vec<String>>>,
}

impl TopologyEngine {
    pub fn new(fleet: Fleet, config: &CacheConfig) -> Self {
        Self {
            fleet,
            topology: RefreshingCache::new("topology", Duration::from_secs(config.topology)),
            teams: RefreshingCache::new("teams", Duration::from_secs(config.teams)),
            tags: RefreshingCache::new("tags", Duration::from_secs(config.tags)),
        }
    }

    /// The unfiltered graph.
    pub async fn global(&self) -> Result<Arc<Topology>, AggregateError> {
        let fleet = self.fleet.clone();
        let (topology, _) = self
            .topology
            .get_with((), move || async move {
                let apps = all_applications(&fleet).await?;
                let topology = build_topology(&apps);
                metrics().counter_inc("kobs_topology_builds_total");
                info!(
                    nodes = topology.nodes.len(),
                    edges = topology.edges.len(),
                    "built topology"
                );
                Ok::<_, AggregateError>(Arc::new(topology))
            })
            .await?;
        Ok(topology)
    }

    /// The subgraph for `selection`. An empty cluster selection never
    /// touches the cache or the fleet.
    pub async fn serve(&self, selection: &Selection) -> Result<Topology, AggregateError> {
        if selection.clusters.is_empty() {
            return Ok(Topology::default());
        }
        let global = self.global().await?;
        Ok(filter_topology(&global, selection))
    }

    /// Applications referencing `team`.
    pub async fn team_applications(
        &self,
        team: &Reference,
    ) -> Result<Vec<ApplicationSpec>, AggregateError> {
        let fleet = self.fleet.clone();
        let (index, _) = self
            .teams
            .get_with((), move || async move {
                let apps = all_applications(&fleet).await?;
                Ok::<_, AggregateError>(Arc::new(build_teams_index(&apps)))
            })
            .await?;
        Ok(index.get(team).cloned().unwrap_or_default())
    }

    pub async fn tags(&self) -> Result<Vec<String>, AggregateError> {
        let fleet = self.fleet.clone();
        let (tags, _) = self
            .tags
            .get_with((), move || async move {
                let apps = all_applications(&fleet).await?;
                Ok::<_, AggregateError>(Arc::new(build_tags(&apps)))
            })
            .await?;
        Ok(tags.as_ref().clone())
    }
}

/// Every application of the fleet, best effort. Fails only when no cluster
/// answered.
async fn all_applications(fleet: &Fleet) -> Result<Vec<ApplicationSpec>, AggregateError> {
    let result = fleet
        .aggregate(
            |cluster| async move { cluster.applications("").await },
            |_| true,
            fleet.policy(),
        )
        .await?;
    if !result.errors.is_empty() && result.errors.len() == fleet.clusters().len() {
        return Err(AggregateError::UpstreamFailure(result.errors));
    }
    Ok(result.items)
}
