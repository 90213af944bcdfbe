//! In-memory [`ClusterClient`] for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use pkg_types::application::{Application, ApplicationSpec};
use pkg_types::crd::Crd;
use pkg_types::dashboard::{Dashboard, DashboardSpec};
use pkg_types::team::{Team, TeamSpec};
use pkg_types::user::{User, UserSpec};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::client::{ClusterClient, ExecSession, LogOptions, MutateVerb, ResourceRequest};
use crate::error::{ClusterError, Result};

/// Application CR stored in `namespace`.
pub fn application(namespace: &str, name: &str) -> Application {
    let mut app = Application::new(name, ApplicationSpec::default());
    app.metadata.namespace = Some(namespace.to_string());
    app
}

pub fn team(namespace: &str, name: &str, id: &str) -> Team {
    let mut team = Team::new(
        name,
        TeamSpec {
            id: id.to_string(),
            ..Default::default()
        },
    );
    team.metadata.namespace = Some(namespace.to_string());
    team
}

pub fn user(namespace: &str, name: &str, id: &str) -> User {
    let mut user = User::new(
        name,
        UserSpec {
            id: id.to_string(),
            ..Default::default()
        },
    );
    user.metadata.namespace = Some(namespace.to_string());
    user
}

pub fn dashboard(namespace: &str, name: &str) -> Dashboard {
    let mut dashboard = Dashboard::new(name, DashboardSpec::default());
    dashboard.metadata.namespace = Some(namespace.to_string());
    dashboard
}

/// Serves fixed custom resources and counts calls per operation.
#[derive(Default)]
pub struct FakeClient {
    namespaces: Vec<String>,
    applications: Vec<Application>,
    teams: Vec<Team>,
    users: Vec<User>,
    dashboards: Vec<Dashboard>,
    crds: Vec<Crd>,
    logs: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    resource: Vec<u8>,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
    mutations: Mutex<Vec<(MutateVerb, String, Vec<u8>)>>,
    uploads: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_application(mut self, app: Application) -> Self {
        self.applications.push(app);
        self
    }

    pub fn with_applications(mut self, apps: impl IntoIterator<Item = Application>) -> Self {
        self.applications.extend(apps);
        self
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.teams.push(team);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_dashboard(mut self, dashboard: Dashboard) -> Self {
        self.dashboards.push(dashboard);
        self
    }

    pub fn with_crd(mut self, crd: Crd) -> Self {
        self.crds.push(crd);
        self
    }

    pub fn with_logs<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.logs = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.insert(path.to_string(), contents.to_vec());
        self
    }

    pub fn with_resource(mut self, body: &[u8]) -> Self {
        self.resource = body.to_vec();
        self
    }

    /// Every operation fails with an upstream error.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Every operation sleeps before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn mutations(&self) -> Vec<(MutateVerb, String, Vec<u8>)> {
        self.mutations.lock().clone()
    }

    pub fn uploads(&self) -> BTreeMap<String, Vec<u8>> {
        self.uploads.lock().clone()
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        *self.calls.lock().entry(operation).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(ClusterError::Upstream(message.clone())),
            None => Ok(()),
        }
    }

    fn filter_lines(&self, options: &LogOptions) -> Result<Vec<String>> {
        let filter = match options.regex.as_deref() {
            Some(p) if !p.is_empty() => Some(Regex::new(p)?),
            _ => None,
        };
        Ok(self
            .logs
            .iter()
            .filter(|l| filter.as_ref().is_none_or(|re| re.is_match(l)))
            .cloned()
            .collect())
    }
}

fn in_namespace(meta: &kube::api::ObjectMeta, namespace: &str) -> bool {
    namespace.is_empty() || meta.namespace.as_deref() == Some(namespace)
}

fn is_named(meta: &kube::api::ObjectMeta, namespace: &str, name: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace) && meta.name.as_deref() == Some(name)
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterClient for FakeClient {
    async fn namespaces(&self) -> Result<Vec<String>> {
        self.enter("namespaces").await?;
        Ok(self.namespaces.clone())
    }

    async fn applications(&self, namespace: &str) -> Result<Vec<Application>> {
        self.enter("applications").await?;
        Ok(self
            .applications
            .iter()
            .filter(|a| in_namespace(&a.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn application(&self, namespace: &str, name: &str) -> Result<Application> {
        self.enter("application").await?;
        self.applications
            .iter()
            .find(|a| is_named(&a.metadata, namespace, name))
            .cloned()
            .ok_or_else(|| not_found("application", namespace, name))
    }

    async fn teams(&self, namespace: &str) -> Result<Vec<Team>> {
        self.enter("teams").await?;
        Ok(self
            .teams
            .iter()
            .filter(|t| in_namespace(&t.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn team(&self, namespace: &str, name: &str) -> Result<Team> {
        self.enter("team").await?;
        self.teams
            .iter()
            .find(|t| is_named(&t.metadata, namespace, name))
            .cloned()
            .ok_or_else(|| not_found("team", namespace, name))
    }

    async fn users(&self, namespace: &str) -> Result<Vec<User>> {
        self.enter("users").await?;
        Ok(self
            .users
            .iter()
            .filter(|u| in_namespace(&u.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn user(&self, namespace: &str, name: &str) -> Result<User> {
        self.enter("user").await?;
        self.users
            .iter()
            .find(|u| is_named(&u.metadata, namespace, name))
            .cloned()
            .ok_or_else(|| not_found("user", namespace, name))
    }

    async fn dashboards(&self, namespace: &str) -> Result<Vec<Dashboard>> {
        self.enter("dashboards").await?;
        Ok(self
            .dashboards
            .iter()
            .filter(|d| in_namespace(&d.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn dashboard(&self, namespace: &str, name: &str) -> Result<Dashboard> {
        self.enter("dashboard").await?;
        self.dashboards
            .iter()
            .find(|d| is_named(&d.metadata, namespace, name))
            .cloned()
            .ok_or_else(|| not_found("dashboard", namespace, name))
    }

    async fn crds(&self) -> Result<Vec<Crd>> {
        self.enter("crds").await?;
        Ok(self.crds.clone())
    }

    async fn resource(&self, _request: &ResourceRequest) -> Result<Vec<u8>> {
        self.enter("resource").await?;
        Ok(self.resource.clone())
    }

    async fn mutate(
        &self,
        request: &ResourceRequest,
        verb: MutateVerb,
        body: Vec<u8>,
    ) -> Result<()> {
        self.enter("mutate").await?;
        self.mutations.lock().push((verb, request.url(), body));
        Ok(())
    }

    async fn logs(&self, _namespace: &str, _pod: &str, options: &LogOptions) -> Result<String> {
        self.enter("logs").await?;
        Ok(self.filter_lines(options)?.join("\n"))
    }

    async fn stream_logs(
        &self,
        _namespace: &str,
        _pod: &str,
        options: &LogOptions,
        lines: mpsc::Sender<String>,
    ) -> Result<()> {
        self.enter("stream_logs").await?;
        for line in self.filter_lines(options)? {
            if lines.send(line).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Echoes stdin back on stdout.
    async fn exec(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        _command: Vec<String>,
    ) -> Result<ExecSession> {
        self.enter("exec").await?;
        let (local, remote) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(remote);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        let (stdout, stdin) = tokio::io::split(local);
        Ok(ExecSession::new(stdin, stdout))
    }

    async fn copy_from(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        path: &str,
    ) -> Result<Vec<u8>> {
        self.enter("copy_from").await?;
        let contents = self
            .files
            .get(path)
            .ok_or_else(|| not_found("file", "", path))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, path.trim_start_matches('/'), contents.as_slice())?;
        Ok(builder.into_inner()?)
    }

    async fn copy_to(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        directory: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<()> {
        self.enter("copy_to").await?;
        let path = format!("{}/{}", directory.trim_end_matches('/'), file_name);
        self.uploads.lock().insert(path, contents);
        Ok(())
    }
}
