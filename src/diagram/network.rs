//! External ingress routing diagram.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use crate::diagram::sanitize_id;
use crate::models::{DiagramArtifact, DiagramKind, HttpRouteInfo, Snapshot};

/// Produce a Mermaid diagram of gateways and the HTTPRoutes attached to
/// their listeners.
pub fn generate(data: &Snapshot) -> DiagramArtifact {
    if data.gateways.is_empty() && data.http_routes.is_empty() {
        return artifact(
            "graph LR\n  empty[\"No Gateway or HTTPRoute resources found\"]\n".to_string(),
        );
    }

    let mut routes: Vec<&HttpRouteInfo> = data.http_routes.iter().collect();
    routes.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

    let mut gateways: Vec<_> = data.gateways.iter().collect();
    gateways.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

    let mut b = String::new();
    b.push_str("graph LR\n");
    b.push_str("  internet((\"Internet\"))\n");

    for gw in &gateways {
        let gw_id = sanitize_id(&format!("{}_{}", gw.namespace, gw.name));
        let _ = writeln!(b, "  {gw_id}{{\"{}<br/>{}\"}}", gw.name, gw.namespace);
        let _ = writeln!(b, "  internet -->|HTTPS| {gw_id}\n");

        let host_to_listener: HashMap<&str, &str> = gw
            .listeners
            .iter()
            .filter(|l| !l.hostname.is_empty())
            .map(|l| (l.hostname.as_str(), l.name.as_str()))
            .collect();

        // Routes whose hostnames match one of this gateway's listeners
        let matched = routes
            .iter()
            .filter(|r| r.hostnames.iter().any(|h| host_to_listener.contains_key(h.as_str())));

        let mut seen: HashSet<String> = HashSet::new();
        for route in matched {
            let route_id = sanitize_id(&format!("{}_{}", route.namespace, route.name));
            if !seen.insert(route_id.clone()) {
                continue;
            }

            let hostname = route.hostnames.first().map(String::as_str).unwrap_or_default();
            let label = if hostname.is_empty() {
                route.name.clone()
            } else {
                format!("{}<br/><small>{}</small>", route.name, hostname)
            };
            let _ = writeln!(b, "  {route_id}[\"{label}\"]");

            let edge_label = if hostname.is_empty() {
                route.name.as_str()
            } else {
                hostname
            };
            let _ = writeln!(b, "  {gw_id} -->|\"{edge_label}\"| {route_id}");
        }
    }

    // Standalone routes when no gateway exists at all
    if gateways.is_empty() {
        for route in &routes {
            let route_id = sanitize_id(&format!("{}_{}", route.namespace, route.name));
            let hostname = route.hostnames.first().map(String::as_str).unwrap_or_default();
            let _ = writeln!(
                b,
                "  {route_id}[\"{}<br/><small>{}</small>\"]",
                route.name, hostname
            );
        }
    }

    artifact(b)
}

fn artifact(content: String) -> DiagramArtifact {
    DiagramArtifact {
        id: "network".to_string(),
        title: "Network & Ingress".to_string(),
        kind: DiagramKind::Mermaid,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GatewayInfo, ListenerInfo};

    #[test]
    fn test_empty_network() {
        let diagram = generate(&Snapshot::default());
        assert_eq!(diagram.id, "network");
        assert!(diagram.content.contains("No Gateway or HTTPRoute"));
    }

    #[test]
    fn test_route_matched_to_gateway_listener() {
        let data = Snapshot {
            gateways: vec![GatewayInfo {
                name: "envoy".to_string(),
                namespace: "gateway".to_string(),
                listeners: vec![ListenerInfo {
                    name: "https-apps".to_string(),
                    hostname: "app.example.com".to_string(),
                    protocol: "HTTPS".to_string(),
                    port: 443,
                }],
            }],
            http_routes: vec![
                HttpRouteInfo {
                    name: "app".to_string(),
                    namespace: "apps".to_string(),
                    hostnames: vec!["app.example.com".to_string()],
                    section_name: "https-apps".to_string(),
                    backends: Vec::new(),
                },
                HttpRouteInfo {
                    name: "internal".to_string(),
                    namespace: "apps".to_string(),
                    hostnames: vec!["other.internal".to_string()],
                    section_name: String::new(),
                    backends: Vec::new(),
                },
            ],
            ..Default::default()
        };

        let diagram = generate(&data);
        assert!(diagram.content.contains("gateway_envoy"));
        assert!(diagram.content.contains("apps_app"));
        assert!(diagram.content.contains("app.example.com"));
        // Unmatched route is not attached to the gateway
        assert!(!diagram.content.contains("apps_internal"));
    }
}
