use axum::{Json, extract::State};
use futures::future::try_join_all;
use pkg_types::dashboard::{DashboardReference, DashboardSpec};
use pkg_types::resolve::{Origin, Resolve};
use serde::Deserialize;

use super::Params;
use crate::AppState;
use crate::error::ApiError;

/// GET /api/dashboards
pub async fn list(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<DashboardSpec>>, ApiError> {
    let result = state
        .fleet
        .aggregate(
            |cluster| async move { cluster.dashboards("").await },
            |_| true,
            &params.policy(state.fleet.policy())?,
        )
        .await?;
    Ok(Json(result.items))
}

/// GET /api/dashboard?cluster=&namespace=&name=
pub async fn get(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<DashboardSpec>, ApiError> {
    let reference = params.reference()?;
    let cluster = state.fleet.clusters().get(&reference.cluster)?;
    Ok(Json(
        cluster
            .dashboard(&reference.namespace, &reference.name)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct DashboardsRequest {
    #[serde(default)]
    pub references: Vec<DashboardReference>,
}

/// POST /api/dashboards?defaultCluster=&defaultNamespace=
///
/// Turns dashboard references into dashboards. Inline references carry the
/// dashboard body and are not looked up. The title and description of a
/// reference take precedence over the dashboard's own.
pub async fn expand(
    State(state): State<AppState>,
    params: Params,
    Json(body): Json<DashboardsRequest>,
) -> Result<Json<Vec<DashboardSpec>>, ApiError> {
    let default_cluster = params.one("defaultCluster").unwrap_or_default().to_string();
    let default_namespace = params.one("defaultNamespace").unwrap_or_default().to_string();

    let lookups = body.references.into_iter().map(|reference| {
        let state = &state;
        let default_cluster = &default_cluster;
        let default_namespace = &default_namespace;
        async move {
            let mut dashboard = match &reference.inline {
                Some(inline) => {
                    let spec: DashboardSpec = serde_json::from_value(inline.clone())
                        .map_err(|e| ApiError::InvalidInput(format!("invalid inline dashboard: {e}")))?;
                    let name = if reference.name.is_empty() {
                        reference.title.clone()
                    } else {
                        reference.name.clone()
                    };
                    spec.resolve(Origin::new(default_cluster, default_namespace, &name))
                }
                None => {
                    let target = reference
                        .reference()
                        .defaulted(default_cluster, default_namespace);
                    if !target.is_complete() {
                        return Err(ApiError::InvalidInput(format!(
                            "incomplete dashboard reference {target}"
                        )));
                    }
                    let cluster = state.fleet.clusters().get(&target.cluster)?;
                    cluster.dashboard(&target.namespace, &target.name).await?
                }
            };
            if !reference.title.is_empty() {
                dashboard.title = reference.title.clone();
            }
            if !reference.description.is_empty() {
                dashboard.description = reference.description.clone();
            }
            Ok::<_, ApiError>(dashboard)
        }
    });

    Ok(Json(try_join_all(lookups).await?))
}
