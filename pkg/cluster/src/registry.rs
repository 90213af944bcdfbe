use kube::config::{KubeConfigOptions, Kubeconfig};
use pkg_metrics::metrics;
use pkg_types::config::ProviderConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::client::ClusterClient;
use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use crate::kube_client::KubeClient;

/// All clusters of the fleet, ordered by name.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct Clusters {
    clusters: BTreeMap<String, Arc<Cluster>>,
}

impl Clusters {
    /// Build the registry from the configured providers.
    pub async fn load(providers: &[ProviderConfig]) -> Result<Self> {
        let mut clients: Vec<(String, Arc<dyn ClusterClient>)> = Vec::new();

        for provider in providers {
            match provider {
                ProviderConfig::Incluster { name } => {
                    let config = kube::Config::incluster()
                        .map_err(|e| ClusterError::Config(e.to_string()))?;
                    clients.push((name.clone(), Arc::new(KubeClient::try_from_config(config)?)));
                    info!(cluster = %name, "loaded in-cluster configuration");
                }
                ProviderConfig::Kubeconfig { path, context } => {
                    let path = expand_home(path);
                    let kubeconfig = Kubeconfig::read_from(&path)
                        .map_err(|e| ClusterError::Config(format!("{path}: {e}")))?;
                    for name in select_contexts(&kubeconfig, context)? {
                        let options = KubeConfigOptions {
                            context: Some(name.clone()),
                            ..Default::default()
                        };
                        let config = kube::Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
                            .await
                            .map_err(|e| ClusterError::Config(format!("context {name}: {e}")))?;
                        clients.push((name.clone(), Arc::new(KubeClient::try_from_config(config)?)));
                        info!(cluster = %name, kubeconfig = %path, "loaded kubeconfig context");
                    }
                }
            }
        }

        Self::from_clients(clients)
    }

    /// Build the registry from ready clients. Duplicate names are rejected.
    pub fn from_clients(
        clients: impl IntoIterator<Item = (String, Arc<dyn ClusterClient>)>,
    ) -> Result<Self> {
        let mut clusters = BTreeMap::new();
        for (name, client) in clients {
            if name.is_empty() {
                return Err(ClusterError::Config("cluster name must not be empty".to_string()));
            }
            if clusters.contains_key(&name) {
                return Err(ClusterError::Config(format!("duplicate cluster name {name}")));
            }
            clusters.insert(name.clone(), Arc::new(Cluster::new(name, client)));
        }
        metrics().gauge_set("kobs_clusters", clusters.len() as i64);
        Ok(Self { clusters })
    }

    pub fn get(&self, name: &str) -> Result<Arc<Cluster>> {
        self.clusters
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownCluster(name.to_string()))
    }

    /// Every cluster, ascending by name.
    pub fn all(&self) -> Vec<Arc<Cluster>> {
        self.clusters.values().cloned().collect()
    }

    /// Cluster names, ascending.
    pub fn names(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    /// The named clusters in registry order. Unknown names are an error.
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<Cluster>>> {
        for name in names {
            if !self.clusters.contains_key(name) {
                return Err(ClusterError::UnknownCluster(name.clone()));
            }
        }
        Ok(self
            .clusters
            .iter()
            .filter(|(name, _)| names.contains(name))
            .map(|(_, cluster)| cluster.clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

fn select_contexts(kubeconfig: &Kubeconfig, context: &str) -> Result<Vec<String>> {
    let available: Vec<String> = kubeconfig.contexts.iter().map(|c| c.name.clone()).collect();
    if context.is_empty() || context == pkg_constants::auth::WILDCARD {
        return Ok(available);
    }
    if available.iter().any(|c| c == context) {
        Ok(vec![context.to_string()])
    } else {
        Err(ClusterError::Config(format!("context {context} not found in kubeconfig")))
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}
