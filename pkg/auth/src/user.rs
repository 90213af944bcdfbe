//! The effective user of a request and the decisions made on it.

use pkg_constants::auth::{SUPERUSER_ID, WILDCARD};
use pkg_types::config::PluginInstance;
use pkg_types::permissions::{Permissions, PluginRule, ResourceRule, matches};
use pkg_types::reference::Reference;
use pkg_types::team::TeamSpec;
use pkg_types::user::{Profile, UserSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user merged with the teams it belongs to.
///
/// `permissions` is the union of the user's own permissions and those of
/// every team; custom plugin permissions of all contributors are kept side
/// by side in `custom`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub teams: Vec<Reference>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub custom: BTreeMap<String, Vec<serde_json::Value>>,
}

/// What a plugin may assume about the user.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginPermissions {
    /// The plugin instance does not enforce its own permissions.
    AllowAll,
    /// Custom permission documents of the user and its teams.
    Custom(Vec<serde_json::Value>),
}

impl PluginPermissions {
    pub fn is_allow_all(&self) -> bool {
        matches!(self, PluginPermissions::AllowAll)
    }
}

impl User {
    /// Identity used when authentication is disabled.
    pub fn superuser() -> Self {
        Self {
            id: SUPERUSER_ID.to_string(),
            permissions: Permissions {
                plugins: vec![PluginRule {
                    name: WILDCARD.to_string(),
                }],
                resources: vec![ResourceRule::all()],
                custom: BTreeMap::new(),
            },
            ..Default::default()
        }
    }

    pub fn merge(id: &str, spec: Option<&UserSpec>, teams: &[TeamSpec]) -> Self {
        let mut user = User {
            id: id.to_string(),
            ..Default::default()
        };
        if let Some(spec) = spec {
            user.profile = spec.profile.clone();
            user.add(&spec.permissions);
        }
        for team in teams {
            user.teams.push(team.reference());
            user.add(&team.permissions);
        }
        user
    }

    fn add(&mut self, permissions: &Permissions) {
        for plugin in &permissions.plugins {
            if !self.permissions.plugins.contains(plugin) {
                self.permissions.plugins.push(plugin.clone());
            }
        }
        for rule in &permissions.resources {
            if !self.permissions.resources.contains(rule) {
                self.permissions.resources.push(rule.clone());
            }
        }
        for (plugin, value) in &permissions.custom {
            self.custom
                .entry(plugin.clone())
                .or_default()
                .push(value.clone());
        }
    }

    pub fn has_plugin_access(&self, plugin: &str) -> bool {
        self.permissions
            .plugins
            .iter()
            .any(|p| matches(std::slice::from_ref(&p.name), plugin))
    }

    pub fn has_cluster_access(&self, cluster: &str) -> bool {
        self.permissions
            .resources
            .iter()
            .any(|r| matches(&r.clusters, cluster))
    }

    pub fn has_namespace_access(&self, cluster: &str, namespace: &str) -> bool {
        self.permissions
            .resources
            .iter()
            .any(|r| matches(&r.clusters, cluster) && matches(&r.namespaces, namespace))
    }

    pub fn has_resource_access(
        &self,
        cluster: &str,
        namespace: &str,
        resource: &str,
        verb: &str,
    ) -> bool {
        self.permissions.resources.iter().any(|r| {
            matches(&r.clusters, cluster)
                && matches(&r.namespaces, namespace)
                && matches(&r.resources, resource)
                && matches(&r.verbs, verb)
        })
    }

    pub fn plugin_custom(&self, instance: &PluginInstance) -> PluginPermissions {
        if !instance.permissions_enabled {
            return PluginPermissions::AllowAll;
        }
        PluginPermissions::Custom(self.custom.get(&instance.name).cloned().unwrap_or_default())
    }
}
