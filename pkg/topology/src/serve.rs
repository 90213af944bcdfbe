use pkg_types::reference::Reference;
use pkg_types::topology::{NOT_SELECTED_SUFFIX, Node, Topology};
use std::collections::{BTreeSet, HashSet};

/// What a topology request asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub clusters: Vec<String>,
    pub namespaces: Vec<String>,
    pub tags: Vec<String>,
}

impl Selection {
    fn contains(&self, reference: &Reference) -> bool {
        self.clusters.contains(&reference.cluster)
            && (self.namespaces.is_empty() || self.namespaces.contains(&reference.namespace))
    }

    fn in_selected_namespace(&self, reference: &Reference) -> bool {
        self.clusters.contains(&reference.cluster) && self.namespaces.contains(&reference.namespace)
    }

    /// Rendering kind of an application node under this selection.
    fn highlight(&self, node: &mut Node) {
        let Some(app) = node.application.as_ref() else {
            return;
        };
        let selected = (self.namespaces.is_empty() && self.tags.is_empty())
            || app.has_any_tag(&self.tags)
            || (self.tags.is_empty() && self.in_selected_namespace(&app.reference()));
        node.kind = if selected {
            app.topology.kind.clone()
        } else {
            format!("{}{}", app.topology.kind, NOT_SELECTED_SUFFIX)
        };
    }
}

/// Cut the part of `global` whose edges start in the selected clusters and
/// namespaces. Nodes are the endpoints of the kept edges.
///
/// Cluster and namespace nodes are added for every non-external application
/// node, so every `parent` in the result points at a node of the result.
pub fn filter_topology(global: &Topology, selection: &Selection) -> Topology {
    if selection.clusters.is_empty() {
        return Topology::default();
    }

    let edges: Vec<_> = global
        .edges
        .iter()
        .filter(|e| selection.contains(&e.source_ref))
        .cloned()
        .collect();

    let endpoints: HashSet<&str> = edges
        .iter()
        .flat_map(|e| [e.source.as_str(), e.target.as_str()])
        .collect();

    let mut clusters = BTreeSet::new();
    let mut namespaces = BTreeSet::new();
    let mut applications = Vec::new();
    for node in global.nodes.iter().filter(|n| endpoints.contains(n.id.as_str())) {
        let mut node = node.clone();
        if let Some(app) = node.application.as_ref() {
            if !app.topology.external {
                clusters.insert(app.cluster.clone());
                namespaces.insert((app.cluster.clone(), app.namespace.clone()));
            }
        }
        selection.highlight(&mut node);
        applications.push(node);
    }

    let mut nodes: Vec<Node> = clusters.iter().map(|c| Node::cluster(c)).collect();
    nodes.extend(namespaces.iter().map(|(c, n)| Node::namespace(c, n)));
    nodes.extend(applications);

    Topology { edges, nodes }
}
