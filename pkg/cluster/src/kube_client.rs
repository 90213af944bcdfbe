use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, AttachParams, ListParams, LogParams};
use k8s_openapi::NamespaceResourceScope;
use kube::{Client, Resource};
use pkg_types::application::Application;
use pkg_types::crd::Crd;
use pkg_types::dashboard::Dashboard;
use pkg_types::team::Team;
use pkg_types::user::User;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::{ClusterClient, ExecSession, LogOptions, MutateVerb, ResourceRequest};
use crate::error::{ClusterError, Result};

/// [`ClusterClient`] backed by a `kube` client.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn try_from_config(config: kube::Config) -> Result<Self> {
        Ok(Self::new(Client::try_from(config)?))
    }

    async fn list<K>(&self, namespace: &str) -> Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get<K>(&self, kind: &'static str, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await?.ok_or_else(|| ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Run `command` to completion and return its stdout.
    async fn run(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        let params = AttachParams::default()
            .container(container)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(false);
        let mut process = self.pods(namespace).exec(pod, command, &params).await?;

        if let Some(input) = stdin {
            let mut writer = process
                .stdin()
                .ok_or_else(|| ClusterError::Exec("stdin not attached".to_string()))?;
            writer.write_all(&input).await?;
            writer.shutdown().await?;
        }

        let mut output = Vec::new();
        if let Some(mut reader) = process.stdout() {
            reader.read_to_end(&mut output).await?;
        }

        let status = match process.take_status() {
            Some(status) => status.await,
            None => None,
        };
        process
            .join()
            .await
            .map_err(|e| ClusterError::Exec(e.to_string()))?;
        match status {
            Some(s) if s.status.as_deref() == Some("Failure") => {
                Err(ClusterError::Exec(s.message.unwrap_or_default()))
            }
            _ => Ok(output),
        }
    }
}

fn log_params(options: &LogOptions, follow: bool) -> LogParams {
    LogParams {
        container: (!options.container.is_empty()).then(|| options.container.clone()),
        since_seconds: options.since_seconds.filter(|s| *s > 0),
        tail_lines: options.tail_lines.filter(|t| *t > 0),
        previous: options.previous,
        follow,
        ..LogParams::default()
    }
}

fn log_filter(options: &LogOptions) -> Result<Option<Regex>> {
    match options.regex.as_deref() {
        Some(pattern) if !pattern.is_empty() => Ok(Some(Regex::new(pattern)?)),
        _ => Ok(None),
    }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn applications(&self, namespace: &str) -> Result<Vec<Application>> {
        self.list(namespace).await
    }

    async fn application(&self, namespace: &str, name: &str) -> Result<Application> {
        self.get("application", namespace, name).await
    }

    async fn teams(&self, namespace: &str) -> Result<Vec<Team>> {
        self.list(namespace).await
    }

    async fn team(&self, namespace: &str, name: &str) -> Result<Team> {
        self.get("team", namespace, name).await
    }

    async fn users(&self, namespace: &str) -> Result<Vec<User>> {
        self.list(namespace).await
    }

    async fn user(&self, namespace: &str, name: &str) -> Result<User> {
        self.get("user", namespace, name).await
    }

    async fn dashboards(&self, namespace: &str) -> Result<Vec<Dashboard>> {
        self.list(namespace).await
    }

    async fn dashboard(&self, namespace: &str, name: &str) -> Result<Dashboard> {
        self.get("dashboard", namespace, name).await
    }

    async fn crds(&self) -> Result<Vec<Crd>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().flat_map(Crd::from_definition).collect())
    }

    async fn resource(&self, request: &ResourceRequest) -> Result<Vec<u8>> {
        request.validate()?;
        let req = http::Request::get(request.url())
            .body(Vec::new())
            .map_err(|e| ClusterError::InvalidInput(e.to_string()))?;
        let body = self.client.request_text(req).await?;
        Ok(body.into_bytes())
    }

    async fn mutate(
        &self,
        request: &ResourceRequest,
        verb: MutateVerb,
        body: Vec<u8>,
    ) -> Result<()> {
        request.validate()?;
        let req = match verb {
            MutateVerb::Create => {
                let collection = ResourceRequest {
                    name: None,
                    ..request.clone()
                };
                http::Request::post(collection.url())
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(body)
            }
            MutateVerb::Patch => http::Request::patch(request.url())
                .header(http::header::CONTENT_TYPE, "application/json-patch+json")
                .body(body),
            MutateVerb::Delete => http::Request::delete(request.url())
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body),
        }
        .map_err(|e| ClusterError::InvalidInput(e.to_string()))?;

        debug!(url = %request.url(), verb = verb.as_str(), "mutating resource");
        self.client.request_text(req).await?;
        Ok(())
    }

    async fn logs(&self, namespace: &str, pod: &str, options: &LogOptions) -> Result<String> {
        let filter = log_filter(options)?;
        let logs = self
            .pods(namespace)
            .logs(pod, &log_params(options, false))
            .await?;
        Ok(match filter {
            Some(re) => logs
                .lines()
                .filter(|line| re.is_match(line))
                .collect::<Vec<_>>()
                .join("\n"),
            None => logs,
        })
    }

    async fn stream_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
        lines: mpsc::Sender<String>,
    ) -> Result<()> {
        let filter = log_filter(options)?;
        let stream = self
            .pods(namespace)
            .log_stream(pod, &log_params(options, true))
            .await?;
        let mut stream = stream.lines();
        while let Some(line) = stream.try_next().await? {
            if filter.as_ref().is_some_and(|re| !re.is_match(&line)) {
                continue;
            }
            if lines.send(line).await.is_err() {
                debug!(pod, "log receiver closed");
                break;
            }
        }
        Ok(())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession> {
        let params = AttachParams::interactive_tty().container(container);
        let mut process = self.pods(namespace).exec(pod, command, &params).await?;
        let stdin = process
            .stdin()
            .ok_or_else(|| ClusterError::Exec("stdin not attached".to_string()))?;
        let stdout = process
            .stdout()
            .ok_or_else(|| ClusterError::Exec("stdout not attached".to_string()))?;
        Ok(ExecSession::attached(stdin, stdout, process))
    }

    async fn copy_from(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        path: &str,
    ) -> Result<Vec<u8>> {
        let command = ["tar", "cf", "-", path].map(String::from).to_vec();
        self.run(namespace, pod, container, command, None).await
    }

    async fn copy_to(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        directory: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<()> {
        let archive = tar_single_file(file_name, &contents)?;
        let command = ["tar", "xf", "-", "-C", directory].map(String::from).to_vec();
        self.run(namespace, pod, container, command, Some(archive))
            .await?;
        Ok(())
    }
}

/// Tar archive holding one regular file.
fn tar_single_file(file_name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    if file_name.is_empty() || file_name.contains('/') {
        return Err(ClusterError::InvalidInput(format!(
            "invalid file name {file_name:?}"
        )));
    }
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, file_name, contents)?;
    Ok(builder.into_inner()?)
}
