//! Core data model shared by collectors, freshness checkers and diagram
//! generators.
//!
//! A [`Snapshot`] is the result of one refresh cycle. It is assembled by the
//! orchestrator, handed read-only to the generators, and never mutated after
//! publication.

use std::collections::BTreeMap;

use serde::Serialize;

/// All cluster and infrastructure state gathered during one refresh.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Name tag of the primary cluster (secondary rows carry their own).
    pub primary_cluster: String,
    pub nodes: Vec<NodeInfo>,
    pub kustomizations: Vec<Kustomization>,
    pub gateways: Vec<GatewayInfo>,
    pub http_routes: Vec<HttpRouteInfo>,
    pub namespaces: Vec<NamespaceInfo>,
    pub security_policies: Vec<SecurityPolicyInfo>,
    pub client_traffic_policies: Vec<ClientTrafficPolicyInfo>,
    pub service_entries: Vec<ServiceEntryInfo>,
    pub east_west_gateways: Vec<EastWestGateway>,
    pub load_balancers: Vec<LoadBalancerService>,
    pub helm_releases: Vec<HelmReleaseInfo>,
    pub helm_repositories: Vec<HelmRepositoryInfo>,
    pub pods: Vec<PodImageInfo>,
    pub infra_sources: Vec<InfraSource>,
}

/// A Kubernetes node with the fields the node table and topology need.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub name: String,
    pub cluster: String,
    pub ip: String,
    pub roles: Vec<String>,
    pub cpu: String,
    pub memory: String,
    pub labels: BTreeMap<String, String>,
    pub os_image: String,
    pub kubelet_version: String,
    pub container_runtime: String,
    pub kernel_version: String,
    pub architecture: String,
}

/// A Flux Kustomization: a declaratively managed deployment unit with an
/// explicit dependency list. `(cluster, name)` is unique.
#[derive(Debug, Clone, Default)]
pub struct Kustomization {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub path: String,
    pub depends_on: Vec<String>,
}

/// A Gateway API Gateway and its listeners.
#[derive(Debug, Clone, Default)]
pub struct GatewayInfo {
    pub name: String,
    pub namespace: String,
    pub listeners: Vec<ListenerInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct ListenerInfo {
    pub name: String,
    pub hostname: String,
    pub protocol: String,
    pub port: i32,
}

/// A Gateway API HTTPRoute.
#[derive(Debug, Clone, Default)]
pub struct HttpRouteInfo {
    pub name: String,
    pub namespace: String,
    pub hostnames: Vec<String>,
    /// Section name of the first parent ref, used to match client traffic
    /// policies.
    pub section_name: String,
    pub backends: Vec<BackendRef>,
}

#[derive(Debug, Clone, Default)]
pub struct BackendRef {
    pub name: String,
    pub port: i32,
}

/// Security-relevant labels of an application namespace.
#[derive(Debug, Clone, Default)]
pub struct NamespaceInfo {
    pub name: String,
    pub cluster: String,
    pub ambient: bool,
    pub waypoint: bool,
    pub backup: bool,
    pub mtls: bool,
    pub pod_security: String,
}

/// An Envoy Gateway SecurityPolicy that configures external auth.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicyInfo {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
}

/// An Envoy Gateway ClientTrafficPolicy targeting a gateway section.
#[derive(Debug, Clone, Default)]
pub struct ClientTrafficPolicyInfo {
    pub name: String,
    pub section_name: String,
    pub optional: bool,
}

/// An Istio ServiceEntry describing an endpoint outside the local mesh.
#[derive(Debug, Clone, Default)]
pub struct ServiceEntryInfo {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub hosts: Vec<String>,
    pub location: String,
    pub endpoint_address: String,
    /// `topology.istio.io/network` label of the first endpoint.
    pub network: String,
}

/// An in-mesh gateway service exposing port 15443 for cross-cluster mTLS.
#[derive(Debug, Clone, Default)]
pub struct EastWestGateway {
    pub name: String,
    pub ip: String,
    pub port: i32,
    pub network: String,
}

/// A Service of type LoadBalancer with an assigned address.
#[derive(Debug, Clone, Default)]
pub struct LoadBalancerService {
    pub name: String,
    pub namespace: String,
    pub ip: String,
    pub ports: Vec<i32>,
}

/// A Flux HelmRelease with its chart reference.
#[derive(Debug, Clone, Default)]
pub struct HelmReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub chart_name: String,
    pub version: String,
    pub app_version: String,
    pub repo_name: String,
    pub repo_ns: String,
}

/// A Flux HelmRepository (chart source).
#[derive(Debug, Clone, Default)]
pub struct HelmRepositoryInfo {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    /// `oci` or `default` (HTTP index).
    pub repo_type: String,
    pub url: String,
}

/// One container image reference observed on a running pod.
#[derive(Debug, Clone, Default)]
pub struct PodImageInfo {
    pub namespace: String,
    pub pod_name: String,
    pub container: String,
    pub image: String,
    pub image_id: String,
    pub init_container: bool,
}

/// Parsed infrastructure data from one configured data source.
#[derive(Debug, Clone, Default)]
pub struct InfraSource {
    pub name: String,
    /// `tfstate` or `docker-compose`.
    pub source_type: String,
    pub terraform_nodes: Vec<TerraformNode>,
    pub docker_compose: Option<DockerCompose>,
}

/// A VM extracted from Terraform state.
#[derive(Debug, Clone, Default)]
pub struct TerraformNode {
    pub name: String,
    pub ip: String,
    pub cores: i64,
    pub memory_mb: i64,
    pub os_disk_gb: i64,
    pub data_disk_gb: i64,
    pub gpu: String,
    pub role: String,
    pub provider: String,
}

/// A parsed docker-compose file.
#[derive(Debug, Clone, Default)]
pub struct DockerCompose {
    pub services: Vec<DockerService>,
}

#[derive(Debug, Clone, Default)]
pub struct DockerService {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub ip: String,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
    pub command: String,
    pub privileged: bool,
}

/// A pre-rendered diagram served over the read API.
#[derive(Debug, Clone, Serialize)]
pub struct DiagramArtifact {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: DiagramKind,
    pub content: String,
}

/// How a diagram's `content` payload is to be interpreted by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramKind {
    Mermaid,
    Markdown,
    Table,
    Flow,
}

/// A canonicalized container image reference.
///
/// Splits `registry/repository:tag` handling digests, registry ports and
/// Docker Hub shorthand (`nginx` becomes `docker.io/library/nginx:latest`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Self {
        let mut rest = reference;
        let mut tag = String::new();

        // Digest references keep everything after '@' as the tag.
        if let Some(idx) = rest.find('@') {
            tag = rest[idx + 1..].to_string();
            rest = &rest[..idx];
        }

        if tag.is_empty() {
            if let Some(idx) = rest.rfind(':') {
                // A colon only separates a tag when it comes after the last
                // slash; otherwise it is a registry port.
                let slash_idx = rest.rfind('/').map(|i| i as isize).unwrap_or(-1);
                if idx as isize > slash_idx {
                    tag = rest[idx + 1..].to_string();
                    rest = &rest[..idx];
                }
            }
            if tag.is_empty() {
                tag = "latest".to_string();
            }
        }

        match rest.split_once('/') {
            None => Self {
                registry: "docker.io".to_string(),
                repository: format!("library/{rest}"),
                tag,
            },
            Some((first, remainder)) => {
                if first.contains('.') || first.contains(':') || first == "localhost" {
                    Self {
                        registry: first.to_string(),
                        repository: remainder.to_string(),
                        tag,
                    }
                } else {
                    Self {
                        registry: "docker.io".to_string(),
                        repository: rest.to_string(),
                        tag,
                    }
                }
            }
        }
    }

    /// `registry/repository` without the tag, the aggregation key used by the
    /// image table and the image freshness cache.
    pub fn image(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(reference: &str) -> (String, String, String) {
        let r = ImageRef::parse(reference);
        (r.registry, r.repository, r.tag)
    }

    #[test]
    fn test_image_ref_with_registry() {
        assert_eq!(
            parts("ghcr.io/foo/bar:v1.2"),
            ("ghcr.io".into(), "foo/bar".into(), "v1.2".into())
        );
    }

    #[test]
    fn test_image_ref_official_image() {
        assert_eq!(
            parts("nginx:latest"),
            ("docker.io".into(), "library/nginx".into(), "latest".into())
        );
        assert_eq!(
            parts("nginx"),
            ("docker.io".into(), "library/nginx".into(), "latest".into())
        );
    }

    #[test]
    fn test_image_ref_user_image() {
        assert_eq!(
            parts("grafana/grafana:10.0.0"),
            ("docker.io".into(), "grafana/grafana".into(), "10.0.0".into())
        );
    }

    #[test]
    fn test_image_ref_registry_port() {
        assert_eq!(
            parts("myregistry:5000/app:v1"),
            ("myregistry:5000".into(), "app".into(), "v1".into())
        );
        // No tag after the port colon
        assert_eq!(
            parts("myregistry:5000/app"),
            ("myregistry:5000".into(), "app".into(), "latest".into())
        );
    }

    #[test]
    fn test_image_ref_digest() {
        let r = ImageRef::parse("ghcr.io/foo/bar@sha256:abc123");
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "foo/bar");
        assert_eq!(r.tag, "sha256:abc123");
    }

    #[test]
    fn test_image_key() {
        let r = ImageRef::parse("quay.io/ceph/ceph:v18");
        assert_eq!(r.image(), "quay.io/ceph/ceph");
    }
}
