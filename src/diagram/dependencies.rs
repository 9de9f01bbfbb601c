//! Kustomization dependency synthesizer.
//!
//! Reduces the declared dependency graph to its transitive core, classifies
//! every deployment into a layer from its repository path, and augments the
//! graph with cross-cluster edges inferred from MESH_EXTERNAL service
//! entries. Output is a flow payload for the web front-end.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::models::{DiagramArtifact, DiagramKind, Snapshot};

#[derive(Debug, Clone, Serialize)]
pub struct FlowNode {
    pub id: String,
    pub label: String,
    pub cluster: String,
    pub layer: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "crossCluster", skip_serializing_if = "is_false")]
    pub cross_cluster: bool,
}

#[derive(Debug, Serialize)]
pub struct FlowData {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Layer of a deployment: the third path segment after stripping a leading
/// `./` (`./kubernetes/<cluster>/<layer>/...`), falling back to the first
/// non-empty segment, then `unknown`.
pub fn extract_layer(path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() >= 3 {
        return parts[2].to_string();
    }
    if !parts.is_empty() && !parts[0].is_empty() {
        return parts[0].to_string();
    }
    "unknown".to_string()
}

type Graph = BTreeMap<String, BTreeSet<String>>;

/// Remove every edge `a → b` for which an alternative path `a → … → b`
/// exists through other edges of the same graph.
///
/// The reachability walk uses an explicit stack with a visited set, so a
/// cyclic input terminates; surplus back-edges may survive but no true
/// dependency is ever disconnected.
pub fn transitive_reduce(graph: &Graph) -> Graph {
    let mut reduced = graph.clone();

    for (node, deps) in graph {
        for dep in deps {
            // DFS: is dep reachable from node without the direct edge?
            let mut visited: HashSet<&str> = HashSet::new();
            let mut stack: Vec<&str> = deps
                .iter()
                .filter(|other| *other != dep)
                .map(String::as_str)
                .collect();

            let mut found = false;
            while let Some(current) = stack.pop() {
                if current == dep {
                    found = true;
                    break;
                }
                if visited.insert(current) {
                    if let Some(next) = graph.get(current) {
                        stack.extend(next.iter().map(String::as_str));
                    }
                }
            }

            if found {
                if let Some(edges) = reduced.get_mut(node) {
                    edges.remove(dep);
                }
            }
        }
    }

    reduced
}

/// Discover implicit dependencies between clusters from MESH_EXTERNAL
/// service entries carrying a network label.
///
/// The network label resolves to the provider cluster (strip `-network`,
/// match cluster names case-insensitively); the entry name minus the
/// provider prefix resolves to a deployment on both sides. The resulting
/// edge points provider → consumer.
fn discover_cross_cluster_edges(data: &Snapshot, id_set: &HashSet<String>) -> Vec<FlowEdge> {
    let cluster_names: BTreeSet<&str> = data
        .kustomizations
        .iter()
        .map(|k| k.cluster.as_str())
        .collect();

    let network_to_cluster: BTreeMap<String, &str> = cluster_names
        .iter()
        .map(|name| (format!("{}-network", name.to_lowercase()), *name))
        .collect();

    // Best matching deployment in a cluster for a service name: shortest
    // containing name wins, any "platform" deployment as a fallback.
    let find_best = |cluster: &str, svc_name: &str| -> Option<String> {
        let svc_lower = svc_name.to_lowercase();
        let mut best_id: Option<String> = None;
        let mut best_score = 0i64;
        for k in &data.kustomizations {
            if k.cluster != cluster {
                continue;
            }
            let name_lower = k.name.to_lowercase();
            if name_lower.contains(&svc_lower) {
                let score = 100 - name_lower.len() as i64;
                if score > best_score || best_id.is_none() {
                    best_score = score;
                    best_id = Some(format!("{}/{}", k.cluster, k.name));
                }
            }
        }
        if best_id.is_none() {
            for k in &data.kustomizations {
                if k.cluster == cluster && k.name.to_lowercase().contains("platform") {
                    best_id = Some(format!("{}/{}", k.cluster, k.name));
                    break;
                }
            }
        }
        best_id
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut edges = Vec::new();

    for se in &data.service_entries {
        if se.location != "MESH_EXTERNAL" || se.network.is_empty() {
            continue;
        }

        let Some(target_cluster) = network_to_cluster.get(&se.network.to_lowercase()) else {
            continue;
        };
        let source_cluster = se.cluster.as_str();
        if source_cluster == *target_cluster {
            continue;
        }

        // Service name: entry name minus the provider-cluster prefix.
        let prefix = format!("{}-", target_cluster.to_lowercase());
        let svc_name = if se.name.to_lowercase().starts_with(&prefix) {
            &se.name[prefix.len()..]
        } else {
            se.name.as_str()
        };

        let Some(source_kust) = find_best(source_cluster, svc_name) else {
            continue;
        };
        let Some(target_kust) = find_best(target_cluster, svc_name) else {
            continue;
        };
        if !id_set.contains(&source_kust) || !id_set.contains(&target_kust) {
            continue;
        }

        // Deduplicate by unordered endpoint pair.
        let pair_key = if target_kust <= source_kust {
            format!("{target_kust}->{source_kust}")
        } else {
            format!("{source_kust}->{target_kust}")
        };
        if !seen.insert(pair_key) {
            continue;
        }

        edges.push(FlowEdge {
            id: format!("xc:{target_kust}->{source_kust}"),
            source: target_kust,
            target: source_kust,
            cross_cluster: true,
        });
    }

    edges
}

/// Produce the flow diagram of Kustomization dependencies.
pub fn generate(data: &Snapshot) -> DiagramArtifact {
    if data.kustomizations.is_empty() {
        let empty = FlowData {
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        return artifact(serde_json::to_string(&empty).expect("serializing flow data"));
    }

    // Node ids are cluster-qualified to disambiguate across clusters.
    let id_set: HashSet<String> = data
        .kustomizations
        .iter()
        .map(|k| format!("{}/{}", k.cluster, k.name))
        .collect();

    let mut graph: Graph = Graph::new();
    for k in &data.kustomizations {
        let id = format!("{}/{}", k.cluster, k.name);
        let deps: BTreeSet<String> = k
            .depends_on
            .iter()
            .map(|d| format!("{}/{d}", k.cluster))
            // dependsOn names without a matching sibling are dropped
            .filter(|dep| id_set.contains(dep))
            .collect();
        graph.insert(id, deps);
    }

    let reduced = transitive_reduce(&graph);

    let mut nodes: Vec<FlowNode> = data
        .kustomizations
        .iter()
        .map(|k| FlowNode {
            id: format!("{}/{}", k.cluster, k.name),
            label: k.name.clone(),
            cluster: k.cluster.clone(),
            layer: extract_layer(&k.path),
        })
        .collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    nodes.dedup_by(|a, b| a.id == b.id);

    let mut edges = Vec::new();
    for (id, deps) in &reduced {
        for dep in deps {
            edges.push(FlowEdge {
                id: format!("{dep}->{id}"),
                source: dep.clone(),
                target: id.clone(),
                cross_cluster: false,
            });
        }
    }

    // Cross-cluster edges bypass the reduction: they are discovered, not
    // declared.
    edges.extend(discover_cross_cluster_edges(data, &id_set));
    edges.sort_by(|a, b| {
        a.source
            .cmp(&b.source)
            .then_with(|| a.target.cmp(&b.target))
            .then_with(|| a.id.cmp(&b.id))
    });

    let flow = FlowData { nodes, edges };
    artifact(serde_json::to_string(&flow).expect("serializing flow data"))
}

fn artifact(content: String) -> DiagramArtifact {
    DiagramArtifact {
        id: "dependencies".to_string(),
        title: "Flux Dependencies".to_string(),
        kind: DiagramKind::Flow,
        content,
    }
}
