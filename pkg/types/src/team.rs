use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::application::Link;
use crate::dashboard::DashboardReference;
use crate::permissions::Permissions;
use crate::reference::Reference;

/// A team. `id` is unique across the fleet and is what the teams header and
/// user memberships refer to.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kobs.io",
    version = "v1",
    kind = "Team",
    plural = "teams",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub dashboards: Vec<DashboardReference>,
}

impl TeamSpec {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.cluster, &self.namespace, &self.name)
    }
}
