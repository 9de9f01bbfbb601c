//! Physical topology sections.
//!
//! One Mermaid diagram per infrastructure source (Terraform VMs or Compose
//! services), an "Other Nodes" diagram for Kubernetes nodes not described by
//! any Terraform source, and a mesh diagram connecting east-west gateways to
//! cross-cluster service entries grouped by network.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::diagram::sanitize_id;
use crate::models::{DiagramArtifact, DiagramKind, InfraSource, NodeInfo, Snapshot};

pub fn generate_sections(data: &Snapshot) -> Vec<DiagramArtifact> {
    let mut diagrams = Vec::new();

    let mut covered: HashSet<&str> = HashSet::new();
    let mut has_terraform = false;

    for src in &data.infra_sources {
        if !src.terraform_nodes.is_empty() {
            has_terraform = true;
            covered.extend(src.terraform_nodes.iter().map(|n| n.name.as_str()));
            diagrams.push(render_terraform_source(src));
        } else if src.docker_compose.is_some() {
            diagrams.push(render_compose_source(src));
        }
    }

    if has_terraform {
        let extra: Vec<&NodeInfo> = data
            .nodes
            .iter()
            .filter(|n| !covered.contains(n.name.as_str()))
            .collect();
        if !extra.is_empty() {
            diagrams.push(render_other_nodes(&extra));
        }
    } else if !data.nodes.is_empty() {
        // No Terraform data at all: fall back to one diagram over the
        // Kubernetes node list.
        let all: Vec<&NodeInfo> = data.nodes.iter().collect();
        diagrams.push(DiagramArtifact {
            id: "topology".to_string(),
            title: "Physical Topology".to_string(),
            kind: DiagramKind::Mermaid,
            content: kubernetes_nodes_graph(&all),
        });
    }

    if !data.east_west_gateways.is_empty() {
        diagrams.push(render_mesh(data));
    }

    if diagrams.is_empty() {
        diagrams.push(DiagramArtifact {
            id: "topology".to_string(),
            title: "Physical Topology".to_string(),
            kind: DiagramKind::Markdown,
            content: "*No node information available.*".to_string(),
        });
    }

    diagrams
}

fn render_terraform_source(src: &InfraSource) -> DiagramArtifact {
    let mut b = String::new();
    b.push_str("graph TB\n");
    let _ = writeln!(b, "  subgraph {}[\"{}\"]", sanitize_id(&src.name), src.name);
    b.push_str("    direction TB\n");

    for node in &src.terraform_nodes {
        let mem_gb = node.memory_mb as f64 / 1024.0;

        let mut details = Vec::new();
        if node.cores > 0 {
            details.push(format!("{} cores", node.cores));
        }
        if mem_gb > 0.0 {
            details.push(format!("{mem_gb:.1} GB RAM"));
        }
        if node.os_disk_gb > 0 {
            details.push(format!("OS: {} GB", node.os_disk_gb));
        }
        if node.data_disk_gb > 0 {
            details.push(format!("Data: {} GB", node.data_disk_gb));
        }
        if !node.gpu.is_empty() {
            details.push(format!("GPU: {}", node.gpu));
        }

        let role = if node.role.is_empty() {
            "worker"
        } else {
            node.role.as_str()
        };

        let mut label = format!("{}<br/>{}<br/>{}", node.name, capitalize(role), details.join(" / "));
        if !node.ip.is_empty() {
            label.push_str("<br/>");
            label.push_str(&node.ip);
        }

        let _ = writeln!(b, "    {}[\"{}\"]", sanitize_id(&node.name), label);
    }

    b.push_str("  end\n");

    DiagramArtifact {
        id: format!("topology-{}", sanitize_id(&src.name.to_lowercase())),
        title: src.name.clone(),
        kind: DiagramKind::Mermaid,
        content: b,
    }
}

fn render_compose_source(src: &InfraSource) -> DiagramArtifact {
    let mut b = String::new();
    b.push_str("graph TB\n");
    let _ = writeln!(b, "  subgraph {}[\"{}\"]", sanitize_id(&src.name), src.name);
    b.push_str("    direction TB\n");

    if let Some(compose) = &src.docker_compose {
        for svc in &compose.services {
            let mut label = svc.name.clone();
            if !svc.image.is_empty() {
                label.push_str("<br/>");
                label.push_str(&svc.image);
            }
            if !svc.ip.is_empty() {
                label.push_str("<br/>");
                label.push_str(&svc.ip);
            }
            if !svc.ports.is_empty() {
                label.push_str("<br/>");
                label.push_str(&svc.ports.join(", "));
            }
            let _ = writeln!(b, "    {}[\"{}\"]", sanitize_id(&svc.name), label);
        }
    }

    b.push_str("  end\n");

    DiagramArtifact {
        id: format!("topology-{}", sanitize_id(&src.name.to_lowercase())),
        title: src.name.clone(),
        kind: DiagramKind::Mermaid,
        content: b,
    }
}

fn render_other_nodes(nodes: &[&NodeInfo]) -> DiagramArtifact {
    DiagramArtifact {
        id: "topology-other".to_string(),
        title: "Other Nodes".to_string(),
        kind: DiagramKind::Mermaid,
        content: kubernetes_nodes_graph(nodes),
    }
}

fn kubernetes_nodes_graph(nodes: &[&NodeInfo]) -> String {
    let mut sorted = nodes.to_vec();
    sorted.sort_by(|a, b| (&a.cluster, &a.name).cmp(&(&b.cluster, &b.name)));

    let mut b = String::new();
    b.push_str("graph TB\n");
    b.push_str("  subgraph cluster[\"Kubernetes Cluster\"]\n");
    b.push_str("    direction TB\n");

    for node in sorted {
        let role = if node
            .roles
            .iter()
            .any(|r| r == "control-plane" || r == "master")
        {
            "Control Plane"
        } else {
            "Worker"
        };

        let mut label = format!(
            "{}<br/>{}<br/>CPU: {} / Mem: {}<br/>{}",
            node.name, role, node.cpu, node.memory, node.ip
        );

        for (key, value) in &node.labels {
            if key.to_lowercase().contains("gpu") {
                let _ = write!(label, "<br/>GPU: {value}");
            }
        }

        let _ = writeln!(b, "    {}[\"{}\"]", sanitize_id(&node.name), label);
    }

    b.push_str("  end\n");
    b
}

/// Mesh connectivity: east-west gateways on one side, MESH_EXTERNAL service
/// entries grouped by their network label on the other.
fn render_mesh(data: &Snapshot) -> DiagramArtifact {
    let mut gateways: Vec<_> = data.east_west_gateways.iter().collect();
    gateways.sort_by(|a, b| a.name.cmp(&b.name));

    let mut by_network: BTreeMap<&str, Vec<&crate::models::ServiceEntryInfo>> = BTreeMap::new();
    for se in &data.service_entries {
        if se.location == "MESH_EXTERNAL" && !se.network.is_empty() {
            by_network.entry(se.network.as_str()).or_default().push(se);
        }
    }
    for entries in by_network.values_mut() {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
    }

    let mut b = String::new();
    b.push_str("graph LR\n");

    for gw in &gateways {
        let _ = writeln!(
            b,
            "  {}{{\"{}<br/>{}:{}<br/>{}\"}}",
            sanitize_id(&gw.name),
            gw.name,
            gw.ip,
            gw.port,
            gw.network
        );
    }

    for (network, entries) in &by_network {
        let net_id = format!("net_{}", sanitize_id(network));
        let _ = writeln!(b, "  subgraph {net_id}[\"{network}\"]");
        for se in entries {
            let mut label = se.name.clone();
            if !se.endpoint_address.is_empty() {
                label.push_str("<br/>");
                label.push_str(&se.endpoint_address);
            }
            let _ = writeln!(b, "    {}[\"{}\"]", sanitize_id(&se.name), label);
        }
        b.push_str("  end\n");
    }

    for gw in &gateways {
        for network in by_network.keys() {
            if *network == gw.network {
                continue;
            }
            let _ = writeln!(
                b,
                "  {} -->|\"mTLS :15443\"| net_{}",
                sanitize_id(&gw.name),
                sanitize_id(network)
            );
        }
    }

    DiagramArtifact {
        id: "topology-mesh".to_string(),
        title: "Mesh Connectivity".to_string(),
        kind: DiagramKind::Mermaid,
        content: b,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
