use axum::{Json, extract::State};
use pkg_types::crd::Crd;
use std::collections::HashSet;

use super::Params;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// GET /api/clusters — names of the clusters the user may access, ascending.
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<Vec<String>> {
    let names = state
        .fleet
        .clusters()
        .names()
        .into_iter()
        .filter(|c| user.has_cluster_access(c))
        .collect();
    Json(names)
}

/// GET /api/clusters/namespaces?cluster=… — sorted union of the namespaces
/// of the selected clusters, or of every accessible cluster.
pub async fn namespaces(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut clusters = params.all("cluster");
    if clusters.is_empty() {
        clusters = state.fleet.clusters().names();
    }
    clusters.retain(|c| user.has_cluster_access(c));

    let ttl = state.namespaces_ttl;
    let result = state
        .fleet
        .aggregate_selected(
            &clusters,
            move |cluster| async move {
                let names = cluster.namespaces(ttl).await?;
                Ok(names
                    .into_iter()
                    .map(|n| (cluster.name().to_string(), n))
                    .collect())
            },
            |(cluster, namespace): &(String, String)| user.has_namespace_access(cluster, namespace),
            &params.policy(state.fleet.policy())?,
        )
        .await?;

    let mut namespaces: Vec<String> = result.items.into_iter().map(|(_, n)| n).collect();
    namespaces.sort();
    namespaces.dedup();
    Ok(Json(namespaces))
}

/// GET /api/clusters/crds — CRD descriptors of all clusters, one per id.
pub async fn crds(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<Crd>>, ApiError> {
    let result = state
        .fleet
        .aggregate(
            |cluster| async move { cluster.crds().await },
            |_| true,
            &params.policy(state.fleet.policy())?,
        )
        .await?;

    let mut seen = HashSet::new();
    let mut crds: Vec<Crd> = result
        .items
        .into_iter()
        .filter(|crd| seen.insert(crd.id.clone()))
        .collect();
    crds.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(crds))
}
