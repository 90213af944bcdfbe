use axum::{Json, extract::State};
use pkg_types::team::TeamSpec;

use super::Params;
use crate::AppState;
use crate::error::ApiError;

/// GET /api/teams
pub async fn list(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<TeamSpec>>, ApiError> {
    let result = state
        .fleet
        .aggregate(
            |cluster| async move { cluster.teams("").await },
            |_| true,
            &params.policy(state.fleet.policy())?,
        )
        .await?;
    Ok(Json(result.items))
}

/// GET /api/team?cluster=&namespace=&name=
pub async fn get(State(state): State<AppState>, params: Params) -> Result<Json<TeamSpec>, ApiError> {
    let reference = params.reference()?;
    let cluster = state.fleet.clusters().get(&reference.cluster)?;
    Ok(Json(cluster.team(&reference.namespace, &reference.name).await?))
}
