use pkg_types::application::ApplicationSpec;
use pkg_types::reference::Reference;
use pkg_types::topology::{Edge, Node, Topology};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

/// Applications grouped by the teams they reference.
pub type TeamsIndex = BTreeMap<Reference, Vec<ApplicationSpec>>;

/// The unfiltered graph of all applications.
///
/// Nodes follow the order of `apps`. Duplicate edges keep the first
/// occurrence and edges with a missing endpoint are dropped.
pub fn build_topology(apps: &[ApplicationSpec]) -> Topology {
    let mut nodes = Vec::with_capacity(apps.len());
    let mut node_ids = HashSet::new();
    for app in apps {
        let node = Node::application(app);
        if node_ids.insert(node.id.clone()) {
            nodes.push(node);
        }
    }

    let mut edges = Vec::new();
    let mut edge_ids = HashSet::new();
    let mut dangling = HashSet::new();
    for app in apps {
        let source = app.node_id();
        for dependency in &app.topology.dependencies {
            let target_ref = dependency.reference();
            let target = target_ref.node_id();
            let id = format!("{source}-{target}");

            if !node_ids.contains(&target) {
                if dangling.insert(id) {
                    warn!(
                        application = %app.reference(),
                        dependency = %target_ref,
                        "dropping dependency on unknown application"
                    );
                }
                continue;
            }
            if !edge_ids.insert(id.clone()) {
                continue;
            }
            edges.push(Edge {
                id,
                source: source.clone(),
                target,
                source_ref: app.reference(),
                target_ref,
                description: dependency.description.clone(),
                dashboards: dependency.dashboards.clone(),
            });
        }
    }

    Topology { edges, nodes }
}

pub fn build_teams_index(apps: &[ApplicationSpec]) -> TeamsIndex {
    let mut index = TeamsIndex::new();
    for app in apps {
        let teams: BTreeSet<&Reference> = app.teams.iter().collect();
        for team in teams {
            index.entry(team.clone()).or_default().push(app.clone());
        }
    }
    index
}

/// Sorted union of all application tags.
pub fn build_tags(apps: &[ApplicationSpec]) -> Vec<String> {
    let tags: BTreeSet<&String> = apps.iter().flat_map(|a| a.tags.iter()).collect();
    tags.into_iter().cloned().collect()
}
