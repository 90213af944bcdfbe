use axum::{Json, extract::State};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::plugins::PluginInfo;

/// GET /api/plugins — plugin instances the user may access.
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<Vec<PluginInfo>> {
    Json(state.plugins.visible_to(&user))
}
