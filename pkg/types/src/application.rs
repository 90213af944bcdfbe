use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dashboard::DashboardReference;
use crate::reference::Reference;

/// Rendering kind of an application node when the CR does not set one.
pub const DEFAULT_TOPOLOGY_TYPE: &str = "application";

/// An application and its place in the dependency topology.
///
/// `cluster`, `namespace` and `name` are owned by the server: whatever the
/// user writes there is overwritten with the storage identity on read.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kobs.io",
    version = "v1",
    kind = "Application",
    plural = "applications",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub teams: Vec<Reference>,
    #[serde(default)]
    pub topology: ApplicationTopology,
    #[serde(default)]
    pub dashboards: Vec<DashboardReference>,
}

impl ApplicationSpec {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.cluster, &self.namespace, &self.name)
    }

    /// Id of this application's node in the topology graph.
    pub fn node_id(&self) -> String {
        self.reference().node_id()
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTopology {
    /// Rendering kind of the node, `application` unless set.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// External applications are drawn outside of any namespace.
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// An edge from the containing application to another application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dashboards: Vec<DashboardReference>,
}

impl Dependency {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.cluster, &self.namespace, &self.name)
    }
}
