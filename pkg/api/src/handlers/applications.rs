use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use pkg_topology::Selection;
use pkg_types::application::ApplicationSpec;
use pkg_types::reference::Reference;
use tracing::debug;

use super::Params;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// GET /api/applications — gallery or topology view.
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Response, ApiError> {
    match params.one("view").unwrap_or("gallery") {
        "topology" => {
            let selection = Selection {
                clusters: params
                    .all("cluster")
                    .into_iter()
                    .filter(|c| user.has_cluster_access(c))
                    .collect(),
                namespaces: params.all("namespace"),
                tags: params.all("tag"),
            };
            let topology = state.topology.serve(&selection).await?;
            Ok(Json(topology).into_response())
        }
        "gallery" => {
            if let Some(team) = params.one("teamName") {
                let team = Reference::new(
                    params.one("teamCluster").unwrap_or_default(),
                    params.one("teamNamespace").unwrap_or_default(),
                    team,
                );
                let apps: Vec<ApplicationSpec> = state
                    .topology
                    .team_applications(&team)
                    .await?
                    .into_iter()
                    .filter(|a| user.has_namespace_access(&a.cluster, &a.namespace))
                    .collect();
                return Ok(Json(apps).into_response());
            }

            let clusters = params.all("cluster");
            if clusters.is_empty() {
                return Ok(Json(Vec::<ApplicationSpec>::new()).into_response());
            }
            let namespaces = params.all("namespace");
            let tags = params.all("tag");
            debug!(?clusters, ?namespaces, ?tags, "listing applications");

            let result = state
                .fleet
                .aggregate_selected(
                    &clusters,
                    move |cluster| {
                        let namespaces = namespaces.clone();
                        async move {
                            if namespaces.is_empty() {
                                return cluster.applications("").await;
                            }
                            let mut apps = Vec::new();
                            for namespace in &namespaces {
                                apps.extend(cluster.applications(namespace).await?);
                            }
                            Ok(apps)
                        }
                    },
                    |a: &ApplicationSpec| {
                        user.has_namespace_access(&a.cluster, &a.namespace)
                            && (tags.is_empty() || a.has_any_tag(&tags))
                    },
                    &params.policy(state.fleet.policy())?,
                )
                .await?;
            Ok(Json(result.items).into_response())
        }
        other => Err(ApiError::InvalidInput(format!("unknown view {other}"))),
    }
}

/// GET /api/application?cluster=&namespace=&name=
pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<ApplicationSpec>, ApiError> {
    let reference = params.reference()?;
    if !user.has_namespace_access(&reference.cluster, &reference.namespace) {
        return Err(ApiError::Forbidden(format!(
            "access to namespace {}/{} denied",
            reference.cluster, reference.namespace
        )));
    }
    let cluster = state.fleet.clusters().get(&reference.cluster)?;
    let app = cluster
        .application(&reference.namespace, &reference.name)
        .await?;
    Ok(Json(app))
}

/// GET /api/applications/tags
pub async fn tags(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.topology.tags().await?))
}
