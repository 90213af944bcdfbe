use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("cluster {0} not found")]
    UnknownCluster(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid log filter: {0}")]
    Filter(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("failed to load cluster configuration: {0}")]
    Config(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Kube(kube::Error::Api(status)) => status.code == 404,
            _ => false,
        }
    }
}

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;
