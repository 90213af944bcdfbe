use axum::Json;
use pkg_auth::User;

use crate::auth::CurrentUser;

/// GET /api/auth/user — the effective user of the request.
pub async fn user(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user.as_ref().clone())
}
