use async_trait::async_trait;
use pkg_types::application::Application;
use pkg_types::crd::Crd;
use pkg_types::dashboard::Dashboard;
use pkg_types::team::Team;
use pkg_types::user::User;
use pkg_types::validate::validate_namespace;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::{ClusterError, Result};

/// Typed access to one Kubernetes API server.
///
/// Custom resources are returned as stored; resolving their references is
/// done by [`crate::Cluster`]. An empty namespace means all namespaces.
/// Implementations never retry.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn namespaces(&self) -> Result<Vec<String>>;

    async fn applications(&self, namespace: &str) -> Result<Vec<Application>>;
    async fn application(&self, namespace: &str, name: &str) -> Result<Application>;

    async fn teams(&self, namespace: &str) -> Result<Vec<Team>>;
    async fn team(&self, namespace: &str, name: &str) -> Result<Team>;

    async fn users(&self, namespace: &str) -> Result<Vec<User>>;
    async fn user(&self, namespace: &str, name: &str) -> Result<User>;

    async fn dashboards(&self, namespace: &str) -> Result<Vec<Dashboard>>;
    async fn dashboard(&self, namespace: &str, name: &str) -> Result<Dashboard>;

    /// Every served version of every CRD in the cluster.
    async fn crds(&self) -> Result<Vec<Crd>>;

    /// Raw GET against an arbitrary resource path.
    async fn resource(&self, request: &ResourceRequest) -> Result<Vec<u8>>;

    async fn mutate(
        &self,
        request: &ResourceRequest,
        verb: MutateVerb,
        body: Vec<u8>,
    ) -> Result<()>;

    async fn logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<String>;

    /// Follow the logs of a container, sending one line per message until
    /// the upstream stream ends or the receiver is dropped.
    async fn stream_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
        lines: mpsc::Sender<String>,
    ) -> Result<()>;

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession>;

    /// Tar archive of `path` inside the container.
    async fn copy_from(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        path: &str,
    ) -> Result<Vec<u8>>;

    /// Write `contents` to `directory/file_name` inside the container.
    async fn copy_to(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        directory: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<()>;
}

/// Generic resource address used by the resource passthrough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    /// Empty for cluster scoped resources.
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
    /// API path, e.g. `/api/v1` or `/apis/apps/v1`.
    pub path: String,
    /// Plural resource name, e.g. `pods`.
    pub resource: String,
    #[serde(default)]
    pub param_name: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
}

impl ResourceRequest {
    /// Check that every component addresses exactly one path segment, so
    /// the resulting URL matches the namespace and resource that were
    /// authorized.
    pub fn validate(&self) -> Result<()> {
        let invalid = |what: &str, value: &str| -> Result<()> {
            Err(ClusterError::InvalidInput(format!("invalid {what}: {value:?}")))
        };

        let segments: Vec<&str> = self.path.trim_end_matches('/').split('/').collect();
        let path_ok = match segments.as_slice() {
            ["", "api", version] => is_label(version),
            ["", "apis", group, version] => is_group(group) && is_label(version),
            _ => false,
        };
        if !path_ok {
            return invalid("api path", &self.path);
        }

        if !self.namespace.is_empty() && validate_namespace(&self.namespace).is_err() {
            return invalid("namespace", &self.namespace);
        }

        let mut parts = self.resource.split('/');
        let resource_ok = parts.next().is_some_and(is_label)
            && parts.next().is_none_or(is_label)
            && parts.next().is_none();
        if !resource_ok {
            return invalid("resource", &self.resource);
        }

        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            if !is_segment(name) {
                return invalid("name", name);
            }
        }
        Ok(())
    }

    /// Request path with the optional query parameter.
    pub fn url(&self) -> String {
        let mut url = self.path.trim_end_matches('/').to_string();
        if !self.namespace.is_empty() {
            url.push_str("/namespaces/");
            url.push_str(&self.namespace);
        }
        url.push('/');
        url.push_str(&self.resource);
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            url.push('/');
            url.push_str(name);
        }
        if let (Some(key), Some(value)) = (self.param_name.as_deref(), self.param.as_deref()) {
            if !key.is_empty() {
                url.push('?');
                url.push_str(&encode_query(key));
                url.push('=');
                url.push_str(&encode_query(value));
            }
        }
        url
    }
}

/// Resource plural or API version: `[a-z0-9-]`, alphanumeric first.
fn is_label(value: &str) -> bool {
    value.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_group(value: &str) -> bool {
    value.split('.').all(is_label)
}

/// Object names are used verbatim as a single segment.
fn is_segment(value: &str) -> bool {
    value != "."
        && value != ".."
        && !value
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control())
}

/// Percent-encode a query component, keeping RFC 3986 unreserved characters.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutateVerb {
    Create,
    Patch,
    Delete,
}

impl MutateVerb {
    /// Verb as used in resource permissions.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutateVerb::Create => "create",
            MutateVerb::Patch => "patch",
            MutateVerb::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogOptions {
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub since_seconds: Option<i64>,
    #[serde(default)]
    pub tail_lines: Option<i64>,
    #[serde(default)]
    pub previous: bool,
    /// Only lines matching this regular expression are returned.
    #[serde(default)]
    pub regex: Option<String>,
}

/// An attached process inside a container.
pub struct ExecSession {
    pub stdin: Pin<Box<dyn AsyncWrite + Send>>,
    pub stdout: Pin<Box<dyn AsyncRead + Send>>,
    _process: Option<kube::api::AttachedProcess>,
}

impl ExecSession {
    pub fn new(
        stdin: impl AsyncWrite + Send + 'static,
        stdout: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            _process: None,
        }
    }

    pub(crate) fn attached(
        stdin: impl AsyncWrite + Send + 'static,
        stdout: impl AsyncRead + Send + 'static,
        process: kube::api::AttachedProcess,
    ) -> Self {
        Self {
            _process: Some(process),
            ..Self::new(stdin, stdout)
        }
    }
}
