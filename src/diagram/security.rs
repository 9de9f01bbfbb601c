//! Security matrix and coverage chart.
//!
//! Cross-references namespaces with external-auth policies, HTTPRoutes and
//! client traffic policies. A namespace's client-mTLS cell is `yes` when any
//! of its routes targets a section with a required client validation,
//! `optional` when only optional validations match, `no` otherwise.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use serde::Serialize;

use crate::diagram::bool_icon;
use crate::models::{DiagramArtifact, DiagramKind, Snapshot};

#[derive(Debug, Serialize)]
struct SecurityRow {
    cluster: String,
    namespace: String,
    ingress: String,
    ambient: String,
    mtls: String,
    #[serde(rename = "mtlsClient")]
    mtls_client: String,
    #[serde(rename = "extAuth")]
    ext_auth: String,
    backup: String,
    #[serde(rename = "podSecurity")]
    pod_security: String,
}

/// Produce the security table and the coverage pie. Both artifacts are
/// always emitted; the table degrades to a placeholder when no namespace
/// data exists.
pub fn generate(data: &Snapshot) -> Vec<DiagramArtifact> {
    let ext_auth_ns: HashSet<String> = data
        .security_policies
        .iter()
        .map(|sp| format!("{}/{}", sp.cluster, sp.namespace))
        .collect();

    let ctp_by_section: HashMap<&str, bool> = data
        .client_traffic_policies
        .iter()
        .map(|ctp| (ctp.section_name.as_str(), ctp.optional))
        .collect();

    // HTTPRoutes exist only in the primary cluster.
    let mut ingress_ns: HashSet<String> = HashSet::new();
    let mut client_mtls: HashMap<String, &'static str> = HashMap::new();
    for route in &data.http_routes {
        let key = format!("{}/{}", data.primary_cluster, route.namespace);
        ingress_ns.insert(key.clone());

        if route.section_name.is_empty() {
            continue;
        }
        let Some(optional) = ctp_by_section.get(route.section_name.as_str()) else {
            continue;
        };
        if !*optional {
            client_mtls.insert(key, "yes");
        } else if client_mtls.get(&key) != Some(&"yes") {
            client_mtls.insert(key, "optional");
        }
    }

    let mut sorted: Vec<_> = data.namespaces.iter().collect();
    sorted.sort_by(|a, b| (&a.cluster, &a.name).cmp(&(&b.cluster, &b.name)));

    let mut rows = Vec::new();
    let mut ingress_count = 0;
    let mut ambient_count = 0;
    let mut mtls_count = 0;
    let mut client_mtls_count = 0;
    let mut auth_count = 0;
    let mut backup_count = 0;

    for ns in sorted {
        let ns_key = format!("{}/{}", ns.cluster, ns.name);
        let cmtls = client_mtls.get(&ns_key).copied().unwrap_or("no");
        let pod_security = if ns.pod_security.is_empty() {
            "-"
        } else {
            ns.pod_security.as_str()
        };

        let has_ingress = ingress_ns.contains(&ns_key);
        let has_auth = ext_auth_ns.contains(&ns_key);

        if has_ingress {
            ingress_count += 1;
        }
        if ns.ambient {
            ambient_count += 1;
        }
        if ns.mtls {
            mtls_count += 1;
        }
        if cmtls == "yes" {
            client_mtls_count += 1;
        }
        if has_auth {
            auth_count += 1;
        }
        if ns.backup {
            backup_count += 1;
        }

        rows.push(SecurityRow {
            cluster: ns.cluster.clone(),
            namespace: ns.name.clone(),
            ingress: bool_icon(has_ingress).to_string(),
            ambient: bool_icon(ns.ambient).to_string(),
            mtls: bool_icon(ns.mtls).to_string(),
            mtls_client: cmtls.to_string(),
            ext_auth: bool_icon(has_auth).to_string(),
            backup: bool_icon(ns.backup).to_string(),
            pod_security: pod_security.to_string(),
        });
    }

    let table = if rows.is_empty() {
        DiagramArtifact {
            id: "security".to_string(),
            title: "Security Matrix".to_string(),
            kind: DiagramKind::Markdown,
            content: "*No namespace data available.*".to_string(),
        }
    } else {
        DiagramArtifact {
            id: "security".to_string(),
            title: "Security Matrix".to_string(),
            kind: DiagramKind::Table,
            content: serde_json::to_string(&rows).expect("serializing security rows"),
        }
    };

    let mut pie = String::new();
    pie.push_str("pie title Security Coverage\n");
    let _ = writeln!(pie, "  \"Ingress\" : {ingress_count}");
    let _ = writeln!(pie, "  \"Istio Ambient\" : {ambient_count}");
    let _ = writeln!(pie, "  \"Velero Backup\" : {backup_count}");
    let _ = writeln!(pie, "  \"Ext Auth\" : {auth_count}");
    let _ = writeln!(pie, "  \"mTLS Mesh\" : {mtls_count}");
    let _ = writeln!(pie, "  \"mTLS Client\" : {client_mtls_count}");

    vec![
        table,
        DiagramArtifact {
            id: "security-chart".to_string(),
            title: "Security Coverage".to_string(),
            kind: DiagramKind::Mermaid,
            content: pie,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ClientTrafficPolicyInfo, HttpRouteInfo, NamespaceInfo, SecurityPolicyInfo,
    };

    fn namespace(name: &str, cluster: &str) -> NamespaceInfo {
        NamespaceInfo {
            name: name.to_string(),
            cluster: cluster.to_string(),
            ..Default::default()
        }
    }

    fn route(namespace: &str, section: &str) -> HttpRouteInfo {
        HttpRouteInfo {
            name: format!("{namespace}-route"),
            namespace: namespace.to_string(),
            section_name: section.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_emits_placeholder_and_pie() {
        let diagrams = generate(&Snapshot::default());
        assert_eq!(diagrams.len(), 2);
        assert_eq!(diagrams[0].id, "security");
        assert_eq!(diagrams[0].kind, DiagramKind::Markdown);
        assert_eq!(diagrams[1].id, "security-chart");
        assert!(diagrams[1].content.starts_with("pie title Security Coverage"));
    }

    #[test]
    fn test_client_mtls_cells() {
        let data = Snapshot {
            primary_cluster: "Homelab".to_string(),
            namespaces: vec![
                namespace("strict", "Homelab"),
                namespace("relaxed", "Homelab"),
                namespace("plain", "Homelab"),
            ],
            http_routes: vec![
                route("strict", "https-mtls"),
                route("strict", "https-open"),
                route("relaxed", "https-open"),
                route("plain", ""),
            ],
            client_traffic_policies: vec![
                ClientTrafficPolicyInfo {
                    name: "mtls-required".to_string(),
                    section_name: "https-mtls".to_string(),
                    optional: false,
                },
                ClientTrafficPolicyInfo {
                    name: "mtls-optional".to_string(),
                    section_name: "https-open".to_string(),
                    optional: true,
                },
            ],
            ..Default::default()
        };

        let diagrams = generate(&data);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&diagrams[0].content).unwrap();
        assert_eq!(rows.len(), 3);

        let cell = |ns: &str, field: &str| -> String {
            rows.iter()
                .find(|r| r["namespace"] == ns)
                .unwrap()[field]
                .as_str()
                .unwrap()
                .to_string()
        };

        // A required CTP wins even when an optional one also matches.
        assert_eq!(cell("strict", "mtlsClient"), "yes");
        assert_eq!(cell("relaxed", "mtlsClient"), "optional");
        assert_eq!(cell("plain", "mtlsClient"), "no");
        assert_eq!(cell("plain", "ingress"), "yes");
    }

    #[test]
    fn test_ext_auth_and_counts() {
        let data = Snapshot {
            primary_cluster: "Homelab".to_string(),
            namespaces: vec![
                NamespaceInfo {
                    name: "apps".to_string(),
                    cluster: "Homelab".to_string(),
                    ambient: true,
                    backup: true,
                    ..Default::default()
                },
                namespace("media", "Homelab"),
            ],
            security_policies: vec![SecurityPolicyInfo {
                name: "oidc".to_string(),
                namespace: "apps".to_string(),
                cluster: "Homelab".to_string(),
            }],
            ..Default::default()
        };

        let diagrams = generate(&data);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&diagrams[0].content).unwrap();
        assert_eq!(rows[0]["extAuth"], "yes");
        assert_eq!(rows[1]["extAuth"], "no");
        assert!(diagrams[1].content.contains("\"Istio Ambient\" : 1"));
        assert!(diagrams[1].content.contains("\"Velero Backup\" : 1"));
        assert!(diagrams[1].content.contains("\"Ext Auth\" : 1"));
    }
}
