use kube::api::ObjectMeta;
use pkg_types::application::ApplicationSpec;
use pkg_types::crd::Crd;
use pkg_types::dashboard::DashboardSpec;
use pkg_types::resolve::{Origin, Resolve};
use pkg_types::team::TeamSpec;
use pkg_types::user::UserSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::Result;

/// A named cluster of the fleet.
///
/// Every custom resource read through a `Cluster` is resolved against the
/// cluster name and its own namespace and name, so nested references are
/// always fully qualified.
pub struct Cluster {
    name: String,
    client: Arc<dyn ClusterClient>,
    namespaces: Mutex<Option<(Instant, Vec<String>)>>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, client: Arc<dyn ClusterClient>) -> Self {
        Self {
            name: name.into(),
            client,
            namespaces: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw client for operations that need no resolving.
    pub fn client(&self) -> &dyn ClusterClient {
        self.client.as_ref()
    }

    /// Sorted namespace names. The last successful fetch is reused while it
    /// is younger than `ttl`; a zero `ttl` always hits the API server.
    pub async fn namespaces(&self, ttl: Duration) -> Result<Vec<String>> {
        if ttl.is_zero() {
            return self.fetch_namespaces().await;
        }

        let mut memo = self.namespaces.lock().await;
        if let Some((fetched, names)) = memo.as_ref() {
            if fetched.elapsed() < ttl {
                return Ok(names.clone());
            }
        }
        let names = self.fetch_namespaces().await?;
        *memo = Some((Instant::now(), names.clone()));
        Ok(names)
    }

    async fn fetch_namespaces(&self) -> Result<Vec<String>> {
        let mut names = self.client.namespaces().await?;
        names.sort();
        names.dedup();
        debug!(cluster = %self.name, count = names.len(), "fetched namespaces");
        Ok(names)
    }

    pub async fn applications(&self, namespace: &str) -> Result<Vec<ApplicationSpec>> {
        let items = self.client.applications(namespace).await?;
        Ok(items
            .into_iter()
            .map(|a| self.resolve(&a.metadata, a.spec))
            .collect())
    }

    pub async fn application(&self, namespace: &str, name: &str) -> Result<ApplicationSpec> {
        let a = self.client.application(namespace, name).await?;
        Ok(self.resolve(&a.metadata, a.spec))
    }

    pub async fn teams(&self, namespace: &str) -> Result<Vec<TeamSpec>> {
        let items = self.client.teams(namespace).await?;
        Ok(items
            .into_iter()
            .map(|t| self.resolve(&t.metadata, t.spec))
            .collect())
    }

    pub async fn team(&self, namespace: &str, name: &str) -> Result<TeamSpec> {
        let t = self.client.team(namespace, name).await?;
        Ok(self.resolve(&t.metadata, t.spec))
    }

    pub async fn users(&self, namespace: &str) -> Result<Vec<UserSpec>> {
        let items = self.client.users(namespace).await?;
        Ok(items
            .into_iter()
            .map(|u| self.resolve(&u.metadata, u.spec))
            .collect())
    }

    pub async fn user(&self, namespace: &str, name: &str) -> Result<UserSpec> {
        let u = self.client.user(namespace, name).await?;
        Ok(self.resolve(&u.metadata, u.spec))
    }

    pub async fn dashboards(&self, namespace: &str) -> Result<Vec<DashboardSpec>> {
        let items = self.client.dashboards(namespace).await?;
        Ok(items
            .into_iter()
            .map(|d| self.resolve(&d.metadata, d.spec))
            .collect())
    }

    pub async fn dashboard(&self, namespace: &str, name: &str) -> Result<DashboardSpec> {
        let d = self.client.dashboard(namespace, name).await?;
        Ok(self.resolve(&d.metadata, d.spec))
    }

    pub async fn crds(&self) -> Result<Vec<Crd>> {
        self.client.crds().await
    }

    fn resolve<S: Resolve>(&self, meta: &ObjectMeta, spec: S) -> S {
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();
        spec.resolve(Origin::new(&self.name, namespace, name))
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeClient, application};
    use pkg_types::reference::Reference;

    #[tokio::test]
    async fn applications_are_resolved_against_their_origin() {
        let mut app = application("n1", "a1");
        app.spec.cluster = "elsewhere".to_string();
        app.spec.teams = vec![Reference::new("", "", "t1")];
        let cluster = Cluster::new("c1", Arc::new(FakeClient::new().with_application(app)));

        let apps = cluster.applications("").await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].reference(), Reference::new("c1", "n1", "a1"));
        assert_eq!(apps[0].teams, vec![Reference::new("c1", "n1", "t1")]);
    }

    #[tokio::test]
    async fn missing_application_is_not_found() {
        let cluster = Cluster::new("c1", Arc::new(FakeClient::new()));
        let err = cluster.application("n1", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn namespaces_are_memoised_for_ttl() {
        let fake = Arc::new(FakeClient::new().with_namespaces(["web", "default", "web"]));
        let cluster = Cluster::new("c1", fake.clone());
        let ttl = Duration::from_secs(60);

        assert_eq!(cluster.namespaces(ttl).await.unwrap(), vec!["default", "web"]);
        cluster.namespaces(ttl).await.unwrap();
        assert_eq!(fake.calls("namespaces"), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cluster.namespaces(ttl).await.unwrap();
        assert_eq!(fake.calls("namespaces"), 2);
    }

    #[tokio::test]
    async fn zero_ttl_disables_namespace_memo() {
        let fake = Arc::new(FakeClient::new().with_namespaces(["default"]));
        let cluster = Cluster::new("c1", fake.clone());

        for _ in 0..3 {
            cluster.namespaces(Duration::ZERO).await.unwrap();
        }
        assert_eq!(fake.calls("namespaces"), 3);
    }
}
