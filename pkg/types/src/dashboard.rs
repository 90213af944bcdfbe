use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::reference::Reference;

/// A dashboard. Rows, panels and variables are interpreted by the UI only.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kobs.io",
    version = "v1",
    kind = "Dashboard",
    plural = "dashboards",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub placeholders: Vec<Placeholder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<serde_json::Value>,
}

impl DashboardSpec {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.cluster, &self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: String,
}

/// Points at a dashboard from an application, dependency or team.
///
/// An `inline` reference carries the dashboard body itself and is never
/// looked up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardReference {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<serde_json::Value>,
}

impl DashboardReference {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.cluster, &self.namespace, &self.name)
    }

    pub fn is_inline(&self) -> bool {
        self.inline.is_some()
    }
}
