use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pkg_auth::User;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;

/// Middleware: resolves the effective user of the request and stores it in
/// the request extensions. Requests below `/api/plugins/<name>` additionally
/// require access to that plugin.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let authenticated = match state.auth.authenticate(req.headers()).await {
        Ok(a) => a,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if let Some(plugin) = plugin_from_path(req.uri().path()) {
        if !authenticated.user.has_plugin_access(plugin) {
            warn!(user = %authenticated.user.id, plugin, "plugin access denied");
            return ApiError::Forbidden(format!("access to plugin {plugin} denied")).into_response();
        }
    }

    debug!(user = %authenticated.user.id, "authenticated request");
    req.extensions_mut().insert(authenticated.user);
    let mut response = next.run(req).await;

    if let Some(cookie) = authenticated.set_cookie {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "session cookie is not a valid header value"),
        }
    }
    response
}

/// Plugin instance addressed by a request path, e.g. `opsgenie` for
/// `/api/plugins/opsgenie/alerts`.
fn plugin_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/api/plugins/")
        .and_then(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
}

/// The effective user attached by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Arc<User>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<User>>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Unauthorized("request is not authenticated".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_names_from_paths() {
        assert_eq!(plugin_from_path("/api/plugins/opsgenie/alerts"), Some("opsgenie"));
        assert_eq!(plugin_from_path("/api/plugins/opsgenie"), Some("opsgenie"));
        assert_eq!(plugin_from_path("/api/plugins"), None);
        assert_eq!(plugin_from_path("/api/plugins/"), None);
        assert_eq!(plugin_from_path("/api/applications"), None);
    }
}
