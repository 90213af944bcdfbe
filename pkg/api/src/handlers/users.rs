use axum::{Json, extract::State};
use futures::future::try_join_all;
use pkg_types::reference::Reference;
use pkg_types::team::TeamSpec;
use pkg_types::user::UserSpec;
use serde::Deserialize;
use tracing::debug;

use super::Params;
use crate::AppState;
use crate::error::ApiError;

/// GET /api/users
pub async fn list(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<UserSpec>>, ApiError> {
    let result = state
        .fleet
        .aggregate(
            |cluster| async move { cluster.users("").await },
            |_| true,
            &params.policy(state.fleet.policy())?,
        )
        .await?;
    Ok(Json(result.items))
}

/// GET /api/user?cluster=&namespace=&name=
pub async fn get(State(state): State<AppState>, params: Params) -> Result<Json<UserSpec>, ApiError> {
    let reference = params.reference()?;
    let cluster = state.fleet.clusters().get(&reference.cluster)?;
    Ok(Json(cluster.user(&reference.namespace, &reference.name).await?))
}

#[derive(Debug, Deserialize)]
pub struct TeamsRequest {
    #[serde(default)]
    pub teams: Vec<Reference>,
}

/// POST /api/users/teams?defaultCluster=&defaultNamespace=
///
/// Expands team references, usually those of a user, into teams. Any unknown
/// team fails the whole request.
pub async fn teams(
    State(state): State<AppState>,
    params: Params,
    Json(body): Json<TeamsRequest>,
) -> Result<Json<Vec<TeamSpec>>, ApiError> {
    let default_cluster = params.one("defaultCluster").unwrap_or_default();
    let default_namespace = params.one("defaultNamespace").unwrap_or_default();

    let references: Vec<Reference> = body
        .teams
        .into_iter()
        .map(|r| r.defaulted(default_cluster, default_namespace))
        .collect();
    if let Some(incomplete) = references.iter().find(|r| !r.is_complete()) {
        return Err(ApiError::InvalidInput(format!("incomplete team reference {incomplete}")));
    }

    let lookups = references.iter().map(|reference| {
        let state = &state;
        async move {
            let cluster = state.fleet.clusters().get(&reference.cluster)?;
            cluster
                .team(&reference.namespace, &reference.name)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        ApiError::InvalidInput(format!("unknown team {reference}"))
                    } else {
                        ApiError::from(e)
                    }
                })
        }
    });
    let teams = try_join_all(lookups).await?;
    debug!(count = teams.len(), "expanded team references");
    Ok(Json(teams))
}

/// GET /api/users/team?cluster=&namespace=&name= — members of a team.
pub async fn team_members(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<UserSpec>>, ApiError> {
    let team = params.reference()?;
    let result = state
        .fleet
        .aggregate(
            |cluster| async move { cluster.users("").await },
            |_| true,
            &params.policy(state.fleet.policy())?,
        )
        .await?;
    let members = result
        .items
        .into_iter()
        .filter(|u| u.is_member_of(&team))
        .collect();
    Ok(Json(members))
}
