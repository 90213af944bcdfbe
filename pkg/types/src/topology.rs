use serde::{Deserialize, Serialize};

use crate::application::ApplicationSpec;
use crate::dashboard::DashboardReference;
use crate::reference::Reference;

/// Suffix appended to an application's kind when it is outside the selection.
pub const NOT_SELECTED_SUFFIX: &str = "-not-selected";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub edges: Vec<Edge>,
    pub nodes: Vec<Node>,
}

impl Topology {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    /// `cluster`, `namespace`, or for applications the topology type,
    /// possibly with the not-selected suffix.
    pub kind: String,
    pub label: String,
    pub parent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationSpec>,
}

impl Node {
    pub fn cluster(name: &str) -> Self {
        Self {
            id: name.to_string(),
            kind: "cluster".to_string(),
            label: name.to_string(),
            parent: String::new(),
            application: None,
        }
    }

    pub fn namespace(cluster: &str, namespace: &str) -> Self {
        Self {
            id: namespace_node_id(cluster, namespace),
            kind: "namespace".to_string(),
            label: namespace.to_string(),
            parent: cluster.to_string(),
            application: None,
        }
    }

    pub fn is_application(&self) -> bool {
        self.application.is_some()
    }

    pub fn application(app: &ApplicationSpec) -> Self {
        let parent = if app.topology.external {
            String::new()
        } else {
            namespace_node_id(&app.cluster, &app.namespace)
        };
        Self {
            id: app.node_id(),
            kind: app.topology.kind.clone(),
            label: app.name.clone(),
            parent,
            application: Some(app.clone()),
        }
    }
}

pub fn namespace_node_id(cluster: &str, namespace: &str) -> String {
    format!("{}-{}", cluster, namespace)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_ref: Reference,
    pub target_ref: Reference,
    pub description: String,
    pub dashboards: Vec<DashboardReference>,
}
