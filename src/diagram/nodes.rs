//! Cluster node table with version freshness and Terraform enrichment.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{DiagramArtifact, DiagramKind, Snapshot, TerraformNode};
use crate::versions::{NodeChecker, parse_os_image};

#[derive(Debug, Serialize)]
struct NodeRow {
    name: String,
    cluster: String,
    #[serde(rename = "type")]
    kind: String,
    roles: String,
    ip: String,
    os: String,
    #[serde(rename = "osVersion")]
    os_version: String,
    #[serde(rename = "latestOS")]
    latest_os: String,
    #[serde(rename = "osOutdated")]
    os_outdated: bool,
    kubelet: String,
    #[serde(rename = "latestKubelet")]
    latest_kubelet: String,
    #[serde(rename = "kubeletOutdated")]
    kubelet_outdated: bool,
    #[serde(rename = "containerRuntime")]
    container_runtime: String,
    kernel: String,
    cpu: String,
    memory: String,
    arch: String,
    provider: String,
    gpu: String,
    #[serde(rename = "osDisk")]
    os_disk: String,
    #[serde(rename = "dataDisk")]
    data_disk: String,
}

fn format_disk_gb(gb: i64) -> String {
    if gb == 0 {
        String::new()
    } else {
        format!("{gb} GB")
    }
}

/// Produce the node table, merging Kubernetes node info with Terraform data
/// by exact node name and appending east-west gateways as load-balancer
/// rows.
pub fn generate(data: &Snapshot, checker: &NodeChecker) -> DiagramArtifact {
    if data.nodes.is_empty() && data.east_west_gateways.is_empty() {
        return DiagramArtifact {
            id: "nodes".to_string(),
            title: "Cluster Nodes".to_string(),
            kind: DiagramKind::Markdown,
            content: "*No node data available.*".to_string(),
        };
    }

    let tf_by_name: HashMap<&str, &TerraformNode> = data
        .infra_sources
        .iter()
        .flat_map(|src| src.terraform_nodes.iter())
        .map(|tfn| (tfn.name.as_str(), tfn))
        .collect();

    let mut rows = Vec::new();
    for node in &data.nodes {
        let (distro, os_version) = parse_os_image(&node.os_image).unwrap_or_default();

        let mut latest_os = String::new();
        let mut os_outdated = false;
        if let Some(latest) = checker.latest_os(&node.os_image) {
            latest_os = latest;
            // TODO: compare as semver; this string comparison misclassifies
            // 1.10 vs 1.9.
            let clean_latest = latest_os.strip_prefix('v').unwrap_or(latest_os.as_str());
            let clean_current = os_version.strip_prefix('v').unwrap_or(os_version.as_str());
            if !clean_latest.is_empty() && !clean_current.is_empty() && clean_latest != clean_current
            {
                os_outdated = true;
            }
        }

        let mut latest_kubelet = String::new();
        let mut kubelet_outdated = false;
        if let Some(latest) = checker.latest_kubelet(&node.kubelet_version) {
            latest_kubelet = latest;
            if latest_kubelet != node.kubelet_version {
                kubelet_outdated = true;
            }
        }

        let os = if distro.is_empty() {
            node.os_image.clone()
        } else {
            distro
        };

        let mut row = NodeRow {
            name: node.name.clone(),
            cluster: node.cluster.clone(),
            kind: "node".to_string(),
            roles: node.roles.join(", "),
            ip: node.ip.clone(),
            os,
            os_version,
            latest_os,
            os_outdated,
            kubelet: node.kubelet_version.clone(),
            latest_kubelet,
            kubelet_outdated,
            container_runtime: node.container_runtime.clone(),
            kernel: node.kernel_version.clone(),
            cpu: node.cpu.clone(),
            memory: node.memory.clone(),
            arch: node.architecture.clone(),
            provider: String::new(),
            gpu: String::new(),
            os_disk: String::new(),
            data_disk: String::new(),
        };

        if let Some(tfn) = tf_by_name.get(node.name.as_str()) {
            row.provider = tfn.provider.clone();
            row.gpu = tfn.gpu.clone();
            row.os_disk = format_disk_gb(tfn.os_disk_gb);
            row.data_disk = format_disk_gb(tfn.data_disk_gb);
        }

        // GPU fallback from node labels
        if row.gpu.is_empty() {
            if let Some(gpu) = node.labels.get("gpu") {
                row.gpu = gpu.clone();
            }
        }

        rows.push(row);
    }

    for gw in &data.east_west_gateways {
        rows.push(NodeRow {
            name: gw.name.clone(),
            cluster: data.primary_cluster.clone(),
            kind: "load-balancer".to_string(),
            roles: "load-balancer".to_string(),
            ip: gw.ip.clone(),
            os: String::new(),
            os_version: String::new(),
            latest_os: String::new(),
            os_outdated: false,
            kubelet: String::new(),
            latest_kubelet: String::new(),
            kubelet_outdated: false,
            container_runtime: String::new(),
            kernel: String::new(),
            cpu: String::new(),
            memory: String::new(),
            arch: String::new(),
            provider: String::new(),
            gpu: String::new(),
            os_disk: String::new(),
            data_disk: String::new(),
        });
    }

    rows.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.cluster.cmp(&b.cluster))
            .then_with(|| a.name.cmp(&b.name))
    });

    DiagramArtifact {
        id: "nodes".to_string(),
        title: "Cluster Nodes".to_string(),
        kind: DiagramKind::Table,
        content: serde_json::to_string(&rows).expect("serializing node rows"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EastWestGateway, InfraSource, NodeInfo};

    #[test]
    fn test_empty_placeholder() {
        let checker = NodeChecker::new();
        let diagram = generate(&Snapshot::default(), &checker);
        assert_eq!(diagram.kind, DiagramKind::Markdown);
    }

    #[test]
    fn test_terraform_merge_and_gateway_rows() {
        let data = Snapshot {
            primary_cluster: "Homelab".to_string(),
            nodes: vec![NodeInfo {
                name: "talos-cp-1".to_string(),
                cluster: "Homelab".to_string(),
                ip: "192.168.1.10".to_string(),
                roles: vec!["control-plane".to_string()],
                os_image: "Talos (v1.9.0)".to_string(),
                kubelet_version: "v1.32.0".to_string(),
                ..Default::default()
            }],
            infra_sources: vec![InfraSource {
                name: "Proxmox".to_string(),
                source_type: "tfstate".to_string(),
                terraform_nodes: vec![TerraformNode {
                    name: "talos-cp-1".to_string(),
                    provider: "proxmox".to_string(),
                    gpu: "nvidia".to_string(),
                    os_disk_gb: 32,
                    data_disk_gb: 100,
                    ..Default::default()
                }],
                docker_compose: None,
            }],
            east_west_gateways: vec![EastWestGateway {
                name: "istio-eastwest".to_string(),
                ip: "192.168.1.240".to_string(),
                port: 15443,
                network: "homelab-network".to_string(),
            }],
            ..Default::default()
        };

        let checker = NodeChecker::new();
        let diagram = generate(&data, &checker);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&diagram.content).unwrap();
        assert_eq!(rows.len(), 2);

        // load-balancer sorts before node
        assert_eq!(rows[0]["type"], "load-balancer");
        assert_eq!(rows[0]["name"], "istio-eastwest");
        assert_eq!(rows[0]["cluster"], "Homelab");

        let node = &rows[1];
        assert_eq!(node["os"], "talos");
        assert_eq!(node["osVersion"], "1.9.0");
        assert_eq!(node["provider"], "proxmox");
        assert_eq!(node["gpu"], "nvidia");
        assert_eq!(node["osDisk"], "32 GB");
        assert_eq!(node["dataDisk"], "100 GB");
        // No freshness data yet
        assert_eq!(node["latestOS"], "");
        assert_eq!(node["osOutdated"], false);
    }
}
