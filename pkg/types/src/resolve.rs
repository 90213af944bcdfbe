//! Defaulting of partially qualified references.
//!
//! Every custom resource is resolved against the `(cluster, namespace, name)`
//! it was loaded from: its own identity is overwritten and every nested
//! reference with an empty cluster or namespace inherits the containing
//! document's. Resolution is pure and idempotent.

use tracing::warn;

use crate::application::{ApplicationSpec, DEFAULT_TOPOLOGY_TYPE};
use crate::dashboard::{DashboardReference, DashboardSpec};
use crate::reference::Reference;
use crate::team::TeamSpec;
use crate::user::UserSpec;

/// Storage identity of a custom resource.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub cluster: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl<'a> Origin<'a> {
    pub fn new(cluster: &'a str, namespace: &'a str, name: &'a str) -> Self {
        Self {
            cluster,
            namespace,
            name,
        }
    }
}

pub trait Resolve: Sized {
    fn resolve(self, origin: Origin<'_>) -> Self;
}

impl Resolve for ApplicationSpec {
    fn resolve(mut self, origin: Origin<'_>) -> Self {
        self.cluster = origin.cluster.to_string();
        self.namespace = origin.namespace.to_string();
        self.name = origin.name.to_string();

        self.teams = resolve_references(self.teams, &origin, "application team");

        self.topology.dependencies.retain(|dependency| {
            if dependency.name.is_empty() {
                warn!(
                    cluster = origin.cluster,
                    namespace = origin.namespace,
                    name = origin.name,
                    "dropping dependency without a name"
                );
            }
            !dependency.name.is_empty()
        });
        for dependency in &mut self.topology.dependencies {
            if dependency.cluster.is_empty() {
                dependency.cluster = origin.cluster.to_string();
            }
            if dependency.namespace.is_empty() {
                dependency.namespace = origin.namespace.to_string();
            }
            resolve_dashboards(&mut dependency.dashboards, &origin);
        }
        resolve_dashboards(&mut self.dashboards, &origin);

        if self.topology.kind.is_empty() {
            self.topology.kind = DEFAULT_TOPOLOGY_TYPE.to_string();
        }

        let mut seen = Vec::with_capacity(self.tags.len());
        self.tags.retain(|tag| {
            if seen.contains(tag) {
                false
            } else {
                seen.push(tag.clone());
                true
            }
        });

        self
    }
}

impl Resolve for TeamSpec {
    fn resolve(mut self, origin: Origin<'_>) -> Self {
        self.cluster = origin.cluster.to_string();
        self.namespace = origin.namespace.to_string();
        self.name = origin.name.to_string();
        resolve_dashboards(&mut self.dashboards, &origin);
        self
    }
}

impl Resolve for UserSpec {
    fn resolve(mut self, origin: Origin<'_>) -> Self {
        self.cluster = origin.cluster.to_string();
        self.namespace = origin.namespace.to_string();
        self.name = origin.name.to_string();
        self.teams = resolve_references(self.teams, &origin, "user team");
        self
    }
}

impl Resolve for DashboardSpec {
    fn resolve(mut self, origin: Origin<'_>) -> Self {
        self.cluster = origin.cluster.to_string();
        self.namespace = origin.namespace.to_string();
        self.name = origin.name.to_string();
        if self.title.is_empty() {
            self.title = self.name.clone();
        }
        self
    }
}

/// Default every reference against `origin`, dropping the ones without a name.
fn resolve_references(refs: Vec<Reference>, origin: &Origin<'_>, what: &str) -> Vec<Reference> {
    refs.into_iter()
        .filter_map(|r| {
            if r.name.is_empty() {
                warn!(
                    cluster = origin.cluster,
                    namespace = origin.namespace,
                    name = origin.name,
                    "dropping {} reference without a name",
                    what
                );
                return None;
            }
            Some(r.defaulted(origin.cluster, origin.namespace))
        })
        .collect()
}

fn resolve_dashboards(dashboards: &mut [DashboardReference], origin: &Origin<'_>) {
    for dashboard in dashboards {
        if dashboard.cluster.is_empty() {
            dashboard.cluster = origin.cluster.to_string();
        }
        if dashboard.namespace.is_empty() {
            dashboard.namespace = origin.namespace.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{ApplicationTopology, Dependency};

    fn cross_cluster_application() -> ApplicationSpec {
        serde_json::from_value(serde_json::json!({
            "name": "user-supplied",
            "teams": [{"name": "t1"}, {"cluster": "c2", "name": "t2"}],
            "topology": {
                "dependencies": [
                    {"name": "a2"},
                    {"cluster": "c2", "namespace": "n3", "name": "a3"}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn application_references_are_defaulted() {
        let app = cross_cluster_application().resolve(Origin::new("c1", "n1", "a1"));

        assert_eq!(app.reference(), Reference::new("c1", "n1", "a1"));
        assert_eq!(
            app.teams,
            vec![
                Reference::new("c1", "n1", "t1"),
                Reference::new("c2", "n1", "t2")
            ]
        );
        let deps: Vec<Reference> = app
            .topology
            .dependencies
            .iter()
            .map(Dependency::reference)
            .collect();
        assert_eq!(
            deps,
            vec![
                Reference::new("c1", "n1", "a2"),
                Reference::new("c2", "n3", "a3")
            ]
        );
        assert_eq!(app.topology.kind, "application");
    }

    #[test]
    fn resolution_is_idempotent() {
        let origin = Origin::new("c1", "n1", "a1");
        let once = cross_cluster_application().resolve(origin);
        let twice = once.clone().resolve(origin);
        assert_eq!(once, twice);
    }

    #[test]
    fn explicit_topology_type_is_kept() {
        let app = ApplicationSpec {
            topology: ApplicationTopology {
                kind: "database".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
        .resolve(Origin::new("c1", "n1", "db"));
        assert_eq!(app.topology.kind, "database");
    }

    #[test]
    fn nested_dashboards_are_defaulted() {
        let app: ApplicationSpec = serde_json::from_value(serde_json::json!({
            "dashboards": [{"name": "d1"}],
            "topology": {"dependencies": [{"name": "a2", "dashboards": [{"namespace": "n9", "name": "d2"}]}]}
        }))
        .unwrap();
        let app = app.resolve(Origin::new("c1", "n1", "a1"));
        assert_eq!(app.dashboards[0].reference(), Reference::new("c1", "n1", "d1"));
        assert_eq!(
            app.topology.dependencies[0].dashboards[0].reference(),
            Reference::new("c1", "n9", "d2")
        );
    }

    #[test]
    fn user_teams_without_name_are_dropped() {
        let user: UserSpec = serde_json::from_value(serde_json::json!({
            "id": "jane@example.com",
            "teams": [{"cluster": "c2"}, {"name": "t1"}]
        }))
        .unwrap();
        let user = user.resolve(Origin::new("c1", "n1", "jane"));
        assert_eq!(user.teams, vec![Reference::new("c1", "n1", "t1")]);
    }

    #[test]
    fn dashboard_title_defaults_to_name() {
        let dashboard = DashboardSpec::default().resolve(Origin::new("c1", "n1", "overview"));
        assert_eq!(dashboard.title, "overview");
        assert_eq!(dashboard.reference(), Reference::new("c1", "n1", "overview"));
    }
}
