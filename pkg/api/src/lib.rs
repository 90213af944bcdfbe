pub mod auth;
pub mod error;
pub mod handlers;
pub mod plugins;
pub mod request_id;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use pkg_auth::AuthResolver;
use pkg_fleet::Fleet;
use pkg_topology::TopologyEngine;

use crate::plugins::Plugins;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub fleet: Fleet,
    pub topology: TopologyEngine,
    pub auth: AuthResolver,
    pub plugins: Arc<Plugins>,
    /// How long a cluster's namespace list is reused. Zero disables reuse.
    pub namespaces_ttl: Duration,
}
