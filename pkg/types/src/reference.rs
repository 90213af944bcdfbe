use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A possibly partial `(cluster, namespace, name)` triple pointing at another
/// custom resource. Empty cluster/namespace are completed against the
/// document containing the reference.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

impl Reference {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Fill empty cluster and namespace from the containing document.
    pub fn defaulted(mut self, cluster: &str, namespace: &str) -> Self {
        if self.cluster.is_empty() {
            self.cluster = cluster.to_string();
        }
        if self.namespace.is_empty() {
            self.namespace = namespace.to_string();
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        !self.cluster.is_empty() && !self.namespace.is_empty() && !self.name.is_empty()
    }

    /// Id of the application node this reference points to.
    pub fn node_id(&self) -> String {
        format!("{}-{}-{}", self.cluster, self.namespace, self.name)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}
