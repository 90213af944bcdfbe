use axum::{
    Json,
    body::Bytes,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocketUpgrade, close_code},
    },
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use pkg_auth::User;
use pkg_cluster::{Cluster, ClusterError, ExecSession, LogOptions, MutateVerb, ResourceRequest};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Params;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

const LOGS_RESOURCE: &str = "pods/log";
const EXEC_RESOURCE: &str = "pods/exec";
const DEFAULT_SHELL: &str = "sh";

/// Raw resource list of one cluster and namespace.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub cluster: String,
    pub namespace: String,
    pub list: serde_json::Value,
}

/// Cluster scoped requests are checked against the wildcard namespace.
fn authorize(
    user: &User,
    cluster: &str,
    namespace: &str,
    resource: &str,
    verb: &str,
) -> Result<(), ApiError> {
    let scope = if namespace.is_empty() { "*" } else { namespace };
    if user.has_resource_access(cluster, scope, resource, verb) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "{verb} {resource} in {cluster}/{scope} denied"
        )))
    }
}

/// Rejects components that would make the upstream URL address anything
/// other than the authorized namespace and resource.
fn resource_request(params: &Params, namespace: &str) -> Result<ResourceRequest, ApiError> {
    let request = ResourceRequest {
        namespace: namespace.to_string(),
        name: params.one("name").map(String::from),
        path: params.required("path")?.to_string(),
        resource: params.required("resource")?.to_string(),
        param_name: params.one("paramName").map(String::from),
        param: params.one("param").map(String::from),
    };
    request.validate()?;
    Ok(request)
}

/// GET /api/resources — one raw list per selected cluster and namespace
/// the user may read.
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<Vec<ResourceList>>, ApiError> {
    let clusters = params.all("cluster");
    let mut namespaces = params.all("namespace");
    if namespaces.is_empty() {
        namespaces.push(String::new());
    }
    let resource = params.required("resource")?.to_string();

    let mut requests = Vec::new();
    for namespace in &namespaces {
        requests.push(resource_request(&params, namespace)?);
    }

    let result = state
        .fleet
        .aggregate_selected(
            &clusters,
            move |cluster| {
                let requests = requests.clone();
                let user = user.clone();
                let resource = resource.clone();
                async move {
                    let mut lists = Vec::new();
                    for request in &requests {
                        if authorize(&user, cluster.name(), &request.namespace, &resource, "get")
                            .is_err()
                        {
                            continue;
                        }
                        let body = cluster.client().resource(request).await?;
                        lists.push(ResourceList {
                            cluster: cluster.name().to_string(),
                            namespace: request.namespace.clone(),
                            list: serde_json::from_slice(&body)?,
                        });
                    }
                    Ok::<_, ClusterError>(lists)
                }
            },
            |_| true,
            &params.policy(state.fleet.policy())?,
        )
        .await?;
    Ok(Json(result.items))
}

async fn mutate(
    state: AppState,
    user: Arc<User>,
    params: Params,
    verb: MutateVerb,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cluster = params.required("cluster")?;
    let namespace = params.one("namespace").unwrap_or_default();
    let request = resource_request(&params, namespace)?;
    authorize(&user, cluster, namespace, &request.resource, verb.as_str())?;
    if verb != MutateVerb::Create && request.name.is_none() {
        return Err(ApiError::missing("name"));
    }

    state
        .fleet
        .clusters()
        .get(cluster)?
        .client()
        .mutate(&request, verb, body.to_vec())
        .await?;
    info!(user = %user.id, cluster, url = %request.url(), verb = verb.as_str(), "mutated resource");
    Ok(Json(serde_json::json!({})))
}

/// POST /api/resources
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    mutate(state, user, params, MutateVerb::Create, body).await
}

/// PUT /api/resources — JSON patch.
pub async fn patch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    mutate(state, user, params, MutateVerb::Patch, body).await
}

/// DELETE /api/resources
pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    mutate(state, user, params, MutateVerb::Delete, body).await
}

/// The pod a logs, terminal or file request is about, after the
/// permission check.
struct PodTarget {
    cluster: Arc<Cluster>,
    namespace: String,
    pod: String,
    container: String,
}

fn pod_target(
    state: &AppState,
    user: &User,
    params: &Params,
    resource: &str,
    verb: &str,
) -> Result<PodTarget, ApiError> {
    let pod = params.reference()?;
    authorize(user, &pod.cluster, &pod.namespace, resource, verb)?;
    Ok(PodTarget {
        cluster: state.fleet.clusters().get(&pod.cluster)?,
        namespace: pod.namespace,
        pod: pod.name,
        container: params.one("container").unwrap_or_default().to_string(),
    })
}

fn log_options(params: &Params, container: &str) -> Result<LogOptions, ApiError> {
    Ok(LogOptions {
        container: container.to_string(),
        since_seconds: params.parse("since")?,
        tail_lines: params.parse("tail")?,
        previous: params.flag("previous")?,
        regex: params.one("regex").map(String::from),
    })
}

/// GET /api/resources/logs
pub async fn logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = pod_target(&state, &user, &params, LOGS_RESOURCE, "get")?;
    let options = log_options(&params, &target.container)?;
    let logs = target
        .cluster
        .client()
        .logs(&target.namespace, &target.pod, &options)
        .await?;
    Ok(Json(serde_json::json!({ "logs": logs })))
}

/// GET /api/resources/logs/stream — websocket, one message per log line.
pub async fn stream_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let target = pod_target(&state, &user, &params, LOGS_RESOURCE, "get")?;
    let options = log_options(&params, &target.container)?;
    Ok(ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        follow_logs(sender, receiver, target, options)
    }))
}

async fn follow_logs<Tx, Rx, E>(mut sender: Tx, mut receiver: Rx, target: PodTarget, options: LogOptions)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    let (lines_tx, mut lines) = mpsc::channel::<String>(1);

    let PodTarget {
        cluster,
        namespace,
        pod,
        ..
    } = target;
    let mut upstream = tokio::spawn(async move {
        cluster
            .client()
            .stream_logs(&namespace, &pod, &options, lines_tx)
            .await
    });

    let outcome: Result<(), String> = loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    if sender.send(Message::Text(line.into())).await.is_err() {
                        break Ok(());
                    }
                }
                None => break match (&mut upstream).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
            },
            message = receiver.next() => match message {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break Ok(()),
                Some(Ok(_)) => {}
            },
        }
    };
    upstream.abort();
    close(&mut sender, outcome).await;
}

/// GET /api/resources/terminal — websocket attached to a shell in the
/// container. Client messages go to stdin, stdout comes back as binary
/// messages.
pub async fn terminal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let target = pod_target(&state, &user, &params, EXEC_RESOURCE, "create")?;
    let shell = params.one("shell").unwrap_or(DEFAULT_SHELL).to_string();
    let session = target
        .cluster
        .client()
        .exec(&target.namespace, &target.pod, &target.container, vec![shell])
        .await?;
    info!(user = %user.id, cluster = target.cluster.name(), pod = %target.pod, "terminal attached");
    Ok(ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        attach_terminal(sender, receiver, session)
    }))
}

async fn attach_terminal<Tx, Rx, E>(mut sender: Tx, mut receiver: Rx, mut session: ExecSession)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut buf = vec![0u8; 4096];

    let outcome: Result<(), String> = loop {
        tokio::select! {
            read = session.stdout.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if sender.send(Message::Binary(buf[..n].to_vec().into())).await.is_err() {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e.to_string()),
            },
            message = receiver.next() => {
                let input = match message {
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Ok(()),
                    Some(Ok(_)) => continue,
                };
                if let Err(e) = session.stdin.write_all(&input).await {
                    break Err(e.to_string());
                }
            },
        }
    };
    debug!(ok = outcome.is_ok(), "terminal detached");
    close(&mut sender, outcome).await;
}

/// Close a websocket, carrying the error as the close reason.
async fn close<S>(sender: &mut S, outcome: Result<(), String>)
where
    S: Sink<Message> + Unpin,
{
    let frame = match outcome {
        Ok(()) => CloseFrame {
            code: close_code::NORMAL,
            reason: String::new().into(),
        },
        Err(reason) => {
            warn!(reason = %reason, "closing websocket after error");
            // Close reasons are limited to 123 bytes.
            let mut end = reason.len().min(123);
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            CloseFrame {
                code: close_code::ERROR,
                reason: reason[..end].to_string().into(),
            }
        }
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}

/// GET /api/resources/file — tar archive of a path inside a container.
pub async fn download(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Response, ApiError> {
    let target = pod_target(&state, &user, &params, EXEC_RESOURCE, "create")?;
    let path = params.required("path")?;
    let archive = target
        .cluster
        .client()
        .copy_from(&target.namespace, &target.pod, &target.container, path)
        .await?;

    let file_name = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("download");
    Ok((
        [
            (header::CONTENT_TYPE, "application/x-tar".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}.tar\""),
            ),
        ],
        archive,
    )
        .into_response())
}

/// POST /api/resources/file?…&path=<directory>&fileName=<name> — the body
/// is written to the container.
pub async fn upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = pod_target(&state, &user, &params, EXEC_RESOURCE, "create")?;
    let directory = params.required("path")?;
    let file_name = params.required("fileName")?;
    target
        .cluster
        .client()
        .copy_to(
            &target.namespace,
            &target.pod,
            &target.container,
            directory,
            file_name,
            body.to_vec(),
        )
        .await?;
    info!(user = %user.id, pod = %target.pod, directory, file_name, "uploaded file");
    Ok(Json(serde_json::json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as channel;
    use futures::stream;
    use pkg_cluster::fake::FakeClient;
    use pkg_cluster::{ClusterClient, Clusters};

    type Incoming = Result<Message, axum::Error>;

    fn target(client: FakeClient) -> PodTarget {
        let clusters = Clusters::from_clients([(
            "c1".to_string(),
            Arc::new(client) as Arc<dyn ClusterClient>,
        )])
        .unwrap();
        PodTarget {
            cluster: clusters.get("c1").unwrap(),
            namespace: "n1".to_string(),
            pod: "web-0".to_string(),
            container: String::new(),
        }
    }

    fn close_frame(message: &Message) -> &CloseFrame {
        match message {
            Message::Close(Some(frame)) => frame,
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_reasons_fit_a_control_frame() {
        let (mut tx, mut rx) = channel::channel::<Message>(4);

        close(&mut tx, Ok(())).await;
        let message = rx.next().await.unwrap();
        assert_eq!(close_frame(&message).code, close_code::NORMAL);
        assert!(close_frame(&message).reason.is_empty());

        let reason = format!("{}é", "x".repeat(122));
        close(&mut tx, Err(reason)).await;
        let message = rx.next().await.unwrap();
        let frame = close_frame(&message);
        assert_eq!(frame.code, close_code::ERROR);
        assert_eq!(frame.reason.as_str(), "x".repeat(122));
    }

    #[tokio::test]
    async fn log_lines_are_followed_until_the_stream_ends() {
        let (tx, rx) = channel::channel::<Message>(8);
        let client = FakeClient::new().with_logs(["starting", "ready"]);
        follow_logs(tx, stream::pending::<Incoming>(), target(client), LogOptions::default()).await;

        let messages: Vec<Message> = rx.collect().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::Text("starting".into()));
        assert_eq!(messages[1], Message::Text("ready".into()));
        assert_eq!(close_frame(&messages[2]).code, close_code::NORMAL);
    }

    #[tokio::test]
    async fn failed_log_streams_close_with_the_error() {
        let (tx, rx) = channel::channel::<Message>(8);
        let client = FakeClient::new().failing("pod is gone");
        follow_logs(tx, stream::pending::<Incoming>(), target(client), LogOptions::default()).await;

        let messages: Vec<Message> = rx.collect().await;
        assert_eq!(messages.len(), 1);
        let frame = close_frame(&messages[0]);
        assert_eq!(frame.code, close_code::ERROR);
        assert!(frame.reason.as_str().contains("pod is gone"));
    }

    #[tokio::test]
    async fn terminal_relays_input_and_closes_when_the_client_leaves() {
        let target = target(FakeClient::new());
        let session = target
            .cluster
            .client()
            .exec("n1", "web-0", "", vec!["sh".to_string()])
            .await
            .unwrap();

        let (tx, mut rx) = channel::channel::<Message>(8);
        let (input, incoming) = channel::unbounded::<Incoming>();
        let attached = tokio::spawn(attach_terminal(tx, incoming, session));

        input.unbounded_send(Ok(Message::Text("ls\n".into()))).unwrap();
        let mut echoed = Vec::new();
        while echoed.len() < 3 {
            match rx.next().await.unwrap() {
                Message::Binary(bytes) => echoed.extend_from_slice(&bytes),
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(echoed, b"ls\n");

        drop(input);
        attached.await.unwrap();
        let message = rx.next().await.unwrap();
        assert_eq!(close_frame(&message).code, close_code::NORMAL);
    }
}
