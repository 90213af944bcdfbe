use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;
use crate::reference::Reference;

/// A user. `id` is matched against the user header of incoming requests.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kobs.io",
    version = "v1",
    kind = "User",
    plural = "users",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub teams: Vec<Reference>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl UserSpec {
    pub fn reference(&self) -> Reference {
        Reference::new(&self.cluster, &self.namespace, &self.name)
    }

    pub fn is_member_of(&self, team: &Reference) -> bool {
        self.teams.iter().any(|t| t == team)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub bio: String,
}
