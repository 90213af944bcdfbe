use pkg_constants::auth::WILDCARD;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Permissions carried by a user or a team. Every list means "any of" and may
/// contain the `*` wildcard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default)]
    pub plugins: Vec<PluginRule>,
    #[serde(default)]
    pub resources: Vec<ResourceRule>,
    /// Plugin specific permissions, keyed by plugin instance name. Opaque to
    /// the core; each plugin owns the schema.
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

// --- Rules ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginRule {
    /// Plugin instance name or `*`.
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Resource types (e.g. "pods", "deployments", "*" for all)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Allowed verbs (e.g. "get", "create", "patch", "delete", "*" for all)
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl ResourceRule {
    /// A rule granting everything.
    pub fn all() -> Self {
        let any = || vec![WILDCARD.to_string()];
        Self {
            clusters: any(),
            namespaces: any(),
            resources: any(),
            verbs: any(),
        }
    }
}

/// `true` if `value` is listed in `allowed` or `allowed` contains the
/// wildcard. Empty values never match, not even the wildcard.
pub fn matches(allowed: &[String], value: &str) -> bool {
    !value.is_empty() && allowed.iter().any(|a| a == WILDCARD || a == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_matches_non_empty_values() {
        assert!(matches(&list(&["*"]), "prod"));
        assert!(!matches(&list(&["*"]), ""));
    }

    #[test]
    fn literal_match() {
        assert!(matches(&list(&["dev", "prod"]), "prod"));
        assert!(!matches(&list(&["dev"]), "prod"));
        assert!(!matches(&[], "prod"));
    }

    #[test]
    fn custom_permissions_deserialize_as_raw_json() {
        let p: Permissions = serde_json::from_str(
            r#"{"plugins":[{"name":"*"}],"custom":{"opsgenie":["acknowledgeAlert"]}}"#,
        )
        .unwrap();
        assert_eq!(p.plugins[0].name, "*");
        assert_eq!(p.custom["opsgenie"], serde_json::json!(["acknowledgeAlert"]));
        assert!(p.resources.is_empty());
    }
}
