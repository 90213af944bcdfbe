use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{
    applications, auth, clusters, dashboards, metrics, plugins, resources, teams, users,
};
use crate::request_id::request_id_middleware;

/// Server configuration passed from the binary's CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// How long in-flight requests may run after shutdown was requested.
    pub shutdown_deadline: Duration,
}

/// All routes of the dashboard API. Everything below `/api` requires an
/// authenticated user; `/metrics` is public.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/applications", get(applications::list))
        .route("/api/applications/tags", get(applications::tags))
        .route("/api/application", get(applications::get))
        .route("/api/teams", get(teams::list))
        .route("/api/team", get(teams::get))
        .route("/api/users", get(users::list))
        .route("/api/user", get(users::get))
        .route("/api/users/teams", post(users::teams))
        .route("/api/users/team", get(users::team_members))
        .route(
            "/api/dashboards",
            get(dashboards::list).post(dashboards::expand),
        )
        .route("/api/dashboard", get(dashboards::get))
        .route("/api/clusters", get(clusters::list))
        .route("/api/clusters/namespaces", get(clusters::namespaces))
        .route("/api/clusters/crds", get(clusters::crds))
        .route(
            "/api/resources",
            get(resources::list)
                .post(resources::create)
                .put(resources::patch)
                .delete(resources::delete),
        )
        .route("/api/resources/logs", get(resources::logs))
        .route("/api/resources/logs/stream", get(resources::stream_logs))
        .route("/api/resources/terminal", get(resources::terminal))
        .route(
            "/api/resources/file",
            get(resources::download).post(resources::upload),
        )
        .route("/api/auth/user", get(auth::user))
        .route("/api/plugins", get(plugins::list));

    let api = state
        .plugins
        .mount(api)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/metrics", get(metrics::render))
        .merge(api)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop accepting connections and give
/// in-flight requests up to `shutdown_deadline` to finish.
pub async fn start_server(
    config: ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "Starting API server");

    let (draining_tx, mut draining) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = draining_tx.send(true);
            })
            .await
    });

    tokio::select! {
        result = &mut server => return Ok(result??),
        _ = draining.changed() => {}
    }

    info!(
        deadline_secs = config.shutdown_deadline.as_secs(),
        "Shutdown requested, draining in-flight requests"
    );
    match tokio::time::timeout(config.shutdown_deadline, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            warn!("Drain deadline exceeded, dropping remaining connections");
            server.abort();
        }
    }
    info!("API server stopped");
    Ok(())
}
