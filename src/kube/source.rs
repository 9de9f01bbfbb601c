//! Read-only access to one cluster's resources of interest.
//!
//! Core resources come through typed `k8s-openapi` APIs; CRDs (Flux, Gateway
//! API, Istio, Envoy Gateway) are listed dynamically so that an uninstalled
//! kind degrades to an empty list instead of a hard dependency. List
//! responses are loosely-typed trees; the extraction helpers treat a missing
//! or wrongly-typed field as a zero value, never a crash.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::ApiResource;
use serde_json::Value;

use crate::models::{
    BackendRef, ClientTrafficPolicyInfo, EastWestGateway, GatewayInfo, HelmReleaseInfo,
    HelmRepositoryInfo, HttpRouteInfo, Kustomization, ListenerInfo, LoadBalancerService,
    NamespaceInfo, NodeInfo, PodImageInfo, SecurityPolicyInfo, ServiceEntryInfo,
};

/// Namespaces excluded from snapshots by exact name.
const SYSTEM_NAMESPACES: &[&str] = &[
    "default",
    "kube-system",
    "kube-public",
    "kube-node-lease",
    "flux-system",
    "local-path-storage",
];

/// Namespaces excluded from snapshots by prefix.
const SYSTEM_NAMESPACE_PREFIXES: &[&str] = &[
    "kube-",
    "flux-",
    "cert-manager",
    "envoy-gateway",
    "istio-",
    "cnpg-",
    "rook-",
    "ot-operators",
];

/// Whether a namespace is reserved for system components.
pub fn is_system_namespace(name: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&name)
        || SYSTEM_NAMESPACE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// An authenticated connection to one cluster, tagged with its display name.
pub struct ClusterSource {
    client: kube::Client,
    cluster: String,
}

impl ClusterSource {
    /// Connect to a cluster. An empty kubeconfig path selects in-cluster
    /// credentials.
    pub async fn connect(kubeconfig: &str, cluster: &str) -> Result<Self> {
        let client = super::create_client(kubeconfig)
            .await
            .with_context(|| format!("connecting to cluster {cluster:?}"))?;
        Ok(Self {
            client,
            cluster: cluster.to_string(),
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster
    }

    /// List a custom resource kind across all namespaces. An uninstalled
    /// CRD yields an empty list.
    async fn list_dynamic(
        &self,
        group: &str,
        version: &str,
        kind: &str,
        plural: &str,
    ) -> Result<Vec<DynamicObject>> {
        let resource = ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: format!("{group}/{version}"),
            kind: kind.to_string(),
            plural: plural.to_string(),
        };
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                tracing::debug!(kind, "resource kind not installed");
                Ok(Vec::new())
            }
            Err(err) => Err(err).with_context(|| format!("listing {plural}")),
        }
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("listing nodes")?;

        let mut nodes = Vec::new();
        for node in list.items {
            let name = node.metadata.name.clone().unwrap_or_default();
            let labels = node.metadata.labels.clone().unwrap_or_default();
            let status = node.status.unwrap_or_default();

            let ip = status
                .addresses
                .as_deref()
                .unwrap_or_default()
                .iter()
                .find(|a| a.type_ == "InternalIP")
                .map(|a| a.address.clone())
                .unwrap_or_default();

            let mut roles: Vec<String> = labels
                .keys()
                .filter_map(|l| l.strip_prefix("node-role.kubernetes.io/"))
                .map(str::to_string)
                .collect();
            roles.sort();

            let capacity = status.capacity.unwrap_or_default();
            let cpu = capacity.get("cpu").map(|q| q.0.clone()).unwrap_or_default();
            let memory = capacity
                .get("memory")
                .and_then(|q| quantity_to_bytes(&q.0))
                .map(|bytes| format!("{:.1} Gi", bytes / (1024.0 * 1024.0 * 1024.0)))
                .unwrap_or_default();

            let info = status.node_info.unwrap_or_default();

            nodes.push(NodeInfo {
                name,
                cluster: self.cluster.clone(),
                ip,
                roles,
                cpu,
                memory,
                labels,
                os_image: info.os_image,
                kubelet_version: info.kubelet_version,
                container_runtime: info.container_runtime_version,
                kernel_version: info.kernel_version,
                architecture: info.architecture,
            });
        }
        Ok(nodes)
    }

    pub async fn list_kustomizations(&self) -> Result<Vec<Kustomization>> {
        let items = self
            .list_dynamic("kustomize.toolkit.fluxcd.io", "v1", "Kustomization", "kustomizations")
            .await?;

        Ok(items
            .iter()
            .map(|obj| {
                let spec = spec_of(obj);
                Kustomization {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    namespace: obj.metadata.namespace.clone().unwrap_or_default(),
                    cluster: self.cluster.clone(),
                    path: str_field(spec, "path").to_string(),
                    depends_on: depends_on_names(spec),
                }
            })
            .collect())
    }

    pub async fn list_gateways(&self) -> Result<Vec<GatewayInfo>> {
        let items = self
            .list_dynamic("gateway.networking.k8s.io", "v1", "Gateway", "gateways")
            .await?;

        Ok(items
            .iter()
            .map(|obj| {
                let spec = spec_of(obj);
                let listeners = spec
                    .get("listeners")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|l| ListenerInfo {
                                name: str_field(l, "name").to_string(),
                                hostname: str_field(l, "hostname").to_string(),
                                protocol: str_field(l, "protocol").to_string(),
                                port: int_field(l, "port"),
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                GatewayInfo {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    namespace: obj.metadata.namespace.clone().unwrap_or_default(),
                    listeners,
                }
            })
            .collect())
    }

    pub async fn list_http_routes(&self) -> Result<Vec<HttpRouteInfo>> {
        let items = self
            .list_dynamic("gateway.networking.k8s.io", "v1", "HTTPRoute", "httproutes")
            .await?;

        Ok(items
            .iter()
            .map(|obj| {
                let spec = spec_of(obj);

                let hostnames = string_list(spec, "hostnames");

                let section_name = spec
                    .get("parentRefs")
                    .and_then(Value::as_array)
                    .and_then(|refs| refs.first())
                    .map(|r| str_field(r, "sectionName").to_string())
                    .unwrap_or_default();

                let mut backends = Vec::new();
                if let Some(rules) = spec.get("rules").and_then(Value::as_array) {
                    for rule in rules {
                        if let Some(refs) = rule.get("backendRefs").and_then(Value::as_array) {
                            for backend in refs {
                                backends.push(BackendRef {
                                    name: str_field(backend, "name").to_string(),
                                    port: int_field(backend, "port"),
                                });
                            }
                        }
                    }
                }

                HttpRouteInfo {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    namespace: obj.metadata.namespace.clone().unwrap_or_default(),
                    hostnames,
                    section_name,
                    backends,
                }
            })
            .collect())
    }

    pub async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("listing namespaces")?;

        Ok(list
            .items
            .iter()
            .filter_map(|ns| {
                let name = ns.metadata.name.clone().unwrap_or_default();
                let labels = ns.metadata.labels.clone().unwrap_or_default();
                namespace_row(&name, &labels, &self.cluster)
            })
            .collect())
    }

    pub async fn list_security_policies(&self) -> Result<Vec<SecurityPolicyInfo>> {
        let items = self
            .list_dynamic("gateway.envoyproxy.io", "v1alpha1", "SecurityPolicy", "securitypolicies")
            .await?;

        Ok(items
            .iter()
            .filter(|obj| spec_of(obj).get("extAuth").is_some())
            .map(|obj| SecurityPolicyInfo {
                name: obj.metadata.name.clone().unwrap_or_default(),
                namespace: obj.metadata.namespace.clone().unwrap_or_default(),
                cluster: self.cluster.clone(),
            })
            .collect())
    }

    pub async fn list_client_traffic_policies(&self) -> Result<Vec<ClientTrafficPolicyInfo>> {
        let items = self
            .list_dynamic(
                "gateway.envoyproxy.io",
                "v1alpha1",
                "ClientTrafficPolicy",
                "clienttrafficpolicies",
            )
            .await?;

        Ok(items
            .iter()
            .filter_map(|obj| {
                let spec = spec_of(obj);
                let section_name = spec
                    .get("targetRef")
                    .map(|r| str_field(r, "sectionName"))
                    .unwrap_or_default();
                if section_name.is_empty() {
                    return None;
                }

                let optional = spec
                    .get("tls")
                    .and_then(|tls| tls.get("clientValidation"))
                    .and_then(|cv| cv.get("optional"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                Some(ClientTrafficPolicyInfo {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    section_name: section_name.to_string(),
                    optional,
                })
            })
            .collect())
    }

    pub async fn list_service_entries(&self) -> Result<Vec<ServiceEntryInfo>> {
        let items = self
            .list_dynamic("networking.istio.io", "v1", "ServiceEntry", "serviceentries")
            .await?;

        Ok(items
            .iter()
            .map(|obj| {
                let spec = spec_of(obj);

                let (endpoint_address, network) = spec
                    .get("endpoints")
                    .and_then(Value::as_array)
                    .and_then(|eps| eps.first())
                    .map(|ep| {
                        let network = ep
                            .get("labels")
                            .map(|l| str_field(l, "topology.istio.io/network"))
                            .unwrap_or_default();
                        (str_field(ep, "address").to_string(), network.to_string())
                    })
                    .unwrap_or_default();

                ServiceEntryInfo {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    namespace: obj.metadata.namespace.clone().unwrap_or_default(),
                    cluster: self.cluster.clone(),
                    hosts: string_list(spec, "hosts"),
                    location: str_field(spec, "location").to_string(),
                    endpoint_address,
                    network,
                }
            })
            .collect())
    }

    /// East-west gateways are the istio-system services labelled with a mesh
    /// network.
    pub async fn list_east_west_gateways(&self) -> Result<Vec<EastWestGateway>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), "istio-system");
        let params = ListParams::default().labels("topology.istio.io/network");
        let list = api
            .list(&params)
            .await
            .context("listing east-west gateway services")?;

        Ok(list
            .items
            .iter()
            .map(|svc| {
                let network = svc
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get("topology.istio.io/network"))
                    .cloned()
                    .unwrap_or_default();

                EastWestGateway {
                    name: svc.metadata.name.clone().unwrap_or_default(),
                    ip: service_ip(svc),
                    port: 15443,
                    network,
                }
            })
            .collect())
    }

    pub async fn list_load_balancers(&self) -> Result<Vec<LoadBalancerService>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("listing services")?;

        Ok(list
            .items
            .iter()
            .filter(|svc| {
                svc.spec
                    .as_ref()
                    .and_then(|s| s.type_.as_deref())
                    .is_some_and(|t| t == "LoadBalancer")
            })
            .filter_map(|svc| {
                let ip = service_ip(svc);
                if ip.is_empty() {
                    return None;
                }
                let ports = svc
                    .spec
                    .as_ref()
                    .and_then(|s| s.ports.as_ref())
                    .map(|ports| ports.iter().map(|p| p.port).collect())
                    .unwrap_or_default();

                Some(LoadBalancerService {
                    name: svc.metadata.name.clone().unwrap_or_default(),
                    namespace: svc.metadata.namespace.clone().unwrap_or_default(),
                    ip,
                    ports,
                })
            })
            .collect())
    }

    pub async fn list_helm_releases(&self) -> Result<Vec<HelmReleaseInfo>> {
        let items = self
            .list_dynamic("helm.toolkit.fluxcd.io", "v2", "HelmRelease", "helmreleases")
            .await?;

        Ok(items
            .iter()
            .map(|obj| {
                let namespace = obj.metadata.namespace.clone().unwrap_or_default();
                let spec = spec_of(obj);
                let chart_spec = spec
                    .get("chart")
                    .and_then(|c| c.get("spec"))
                    .cloned()
                    .unwrap_or(Value::Null);

                let (repo_name, mut repo_ns) = chart_spec
                    .get("sourceRef")
                    .map(|r| {
                        (
                            str_field(r, "name").to_string(),
                            str_field(r, "namespace").to_string(),
                        )
                    })
                    .unwrap_or_default();
                if repo_ns.is_empty() {
                    repo_ns = namespace.clone();
                }

                // App version comes from the most recent history entry.
                let app_version = obj
                    .data
                    .get("status")
                    .and_then(|s| s.get("history"))
                    .and_then(Value::as_array)
                    .and_then(|h| h.first())
                    .map(|latest| str_field(latest, "appVersion").to_string())
                    .unwrap_or_default();

                HelmReleaseInfo {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    namespace,
                    cluster: self.cluster.clone(),
                    chart_name: str_field(&chart_spec, "chart").to_string(),
                    version: str_field(&chart_spec, "version").to_string(),
                    app_version,
                    repo_name,
                    repo_ns,
                }
            })
            .collect())
    }

    pub async fn list_helm_repositories(&self) -> Result<Vec<HelmRepositoryInfo>> {
        let items = self
            .list_dynamic("source.toolkit.fluxcd.io", "v1", "HelmRepository", "helmrepositories")
            .await?;

        Ok(items
            .iter()
            .map(|obj| {
                let spec = spec_of(obj);
                let mut repo_type = str_field(spec, "type").to_string();
                if repo_type.is_empty() {
                    repo_type = "default".to_string();
                }

                HelmRepositoryInfo {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    namespace: obj.metadata.namespace.clone().unwrap_or_default(),
                    cluster: self.cluster.clone(),
                    repo_type,
                    url: str_field(spec, "url").to_string(),
                }
            })
            .collect())
    }

    /// Container images of all running pods. Terminated pods are excluded;
    /// image references are resolved from container statuses when available.
    pub async fn list_pods(&self) -> Result<Vec<PodImageInfo>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .context("listing pods")?;

        let mut result = Vec::new();
        for pod in &list.items {
            let status = pod.status.clone().unwrap_or_default();
            let phase = status.phase.as_deref().unwrap_or_default();
            if phase == "Succeeded" || phase == "Failed" {
                continue;
            }

            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let pod_name = pod.metadata.name.clone().unwrap_or_default();

            let mut status_images: BTreeMap<String, String> = BTreeMap::new();
            let mut image_ids: BTreeMap<String, String> = BTreeMap::new();
            for cs in status
                .container_statuses
                .iter()
                .flatten()
                .chain(status.init_container_statuses.iter().flatten())
            {
                status_images.insert(cs.name.clone(), cs.image.clone());
                image_ids.insert(cs.name.clone(), cs.image_id.clone());
            }

            let Some(spec) = &pod.spec else { continue };

            for (containers, init) in [
                (Some(&spec.containers), false),
                (spec.init_containers.as_ref(), true),
            ] {
                let Some(containers) = containers else { continue };
                for container in containers {
                    let mut image = container.image.clone().unwrap_or_default();
                    if let Some(resolved) = status_images.get(&container.name) {
                        if !resolved.is_empty() {
                            image = resolved.clone();
                        }
                    }
                    result.push(PodImageInfo {
                        namespace: namespace.clone(),
                        pod_name: pod_name.clone(),
                        container: container.name.clone(),
                        image,
                        image_id: image_ids.get(&container.name).cloned().unwrap_or_default(),
                        init_container: init,
                    });
                }
            }
        }
        Ok(result)
    }
}

/// Build a namespace row, filtering system namespaces and deriving the
/// security-relevant flags from labels.
fn namespace_row(
    name: &str,
    labels: &BTreeMap<String, String>,
    cluster: &str,
) -> Option<NamespaceInfo> {
    if name.is_empty() || is_system_namespace(name) {
        return None;
    }

    let label = |key: &str| labels.get(key).map(String::as_str).unwrap_or_default();

    Some(NamespaceInfo {
        name: name.to_string(),
        cluster: cluster.to_string(),
        ambient: label("istio.io/dataplane-mode") == "ambient",
        waypoint: !label("istio.io/use-waypoint").is_empty(),
        backup: label("backup") == "velero",
        mtls: label("mtls.enabled") == "true",
        pod_security: label("pod-security.kubernetes.io/enforce").to_string(),
    })
}

fn spec_of(obj: &DynamicObject) -> &Value {
    obj.data.get("spec").unwrap_or(&Value::Null)
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn int_field(value: &Value, key: &str) -> i32 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0) as i32,
        _ => 0,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Names referenced by a Kustomization's `dependsOn` list.
fn depends_on_names(spec: &Value) -> Vec<String> {
    spec.get("dependsOn")
        .and_then(Value::as_array)
        .map(|deps| {
            deps.iter()
                .filter_map(|d| d.get("name"))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// External address of a service: load-balancer ingress first, then the
/// requested load-balancer IP.
fn service_ip(svc: &Service) -> String {
    let ingress_ip = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|i| i.ip.clone());

    if let Some(ip) = ingress_ip {
        if !ip.is_empty() {
            return ip;
        }
    }

    svc.spec
        .as_ref()
        .and_then(|s| s.load_balancer_ip.clone())
        .unwrap_or_default()
}

/// Parse a Kubernetes resource quantity into bytes.
fn quantity_to_bytes(quantity: &str) -> Option<f64> {
    const BINARY: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
    ];
    const DECIMAL: &[(&str, f64)] = &[
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
    ];

    for (suffix, factor) in BINARY {
        if let Some(num) = quantity.strip_suffix(suffix) {
            return num.parse::<f64>().ok().map(|n| n * factor);
        }
    }
    for (suffix, factor) in DECIMAL {
        if let Some(num) = quantity.strip_suffix(suffix) {
            return num.parse::<f64>().ok().map(|n| n * factor);
        }
    }
    quantity.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_system_namespace() {
        for name in [
            "default",
            "kube-system",
            "kube-node-lease",
            "flux-system",
            "local-path-storage",
            "kube-anything",
            "flux-operators",
            "cert-manager",
            "envoy-gateway-system",
            "istio-system",
            "cnpg-system",
            "rook-ceph",
            "ot-operators",
        ] {
            assert!(is_system_namespace(name), "{name} should be filtered");
        }
        for name in ["apps", "media", "vault", "nextcloud", "certsync"] {
            assert!(!is_system_namespace(name), "{name} should pass");
        }
    }

    #[test]
    fn test_namespace_row_labels() {
        let labels: BTreeMap<String, String> = [
            ("istio.io/dataplane-mode", "ambient"),
            ("istio.io/use-waypoint", "waypoint"),
            ("backup", "velero"),
            ("mtls.enabled", "true"),
            ("pod-security.kubernetes.io/enforce", "restricted"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let row = namespace_row("apps", &labels, "Homelab").unwrap();
        assert!(row.ambient && row.waypoint && row.backup && row.mtls);
        assert_eq!(row.pod_security, "restricted");

        let bare = namespace_row("media", &BTreeMap::new(), "Homelab").unwrap();
        assert!(!bare.ambient && !bare.waypoint && !bare.backup && !bare.mtls);
        assert!(bare.pod_security.is_empty());

        assert!(namespace_row("kube-system", &BTreeMap::new(), "Homelab").is_none());
    }

    #[test]
    fn test_depends_on_names() {
        let spec = json!({
            "path": "./kubernetes/homelab/apps",
            "dependsOn": [
                {"name": "crds"},
                {"name": "platform"},
                {"notName": "ignored"}
            ]
        });
        assert_eq!(depends_on_names(&spec), vec!["crds", "platform"]);
        assert!(depends_on_names(&json!({})).is_empty());
    }

    #[test]
    fn test_quantity_to_bytes() {
        assert_eq!(quantity_to_bytes("1024"), Some(1024.0));
        assert_eq!(quantity_to_bytes("16Gi"), Some(16.0 * 1073741824.0));
        assert_eq!(quantity_to_bytes("16384Mi"), Some(16384.0 * 1048576.0));
        assert_eq!(quantity_to_bytes("8000000Ki"), Some(8000000.0 * 1024.0));
        assert_eq!(quantity_to_bytes("2G"), Some(2e9));
        assert_eq!(quantity_to_bytes("bogus"), None);
    }

    #[test]
    fn test_int_field_shapes() {
        let v = json!({"port": 15443, "fraction": 80.0});
        assert_eq!(int_field(&v, "port"), 15443);
        assert_eq!(int_field(&v, "fraction"), 80);
        assert_eq!(int_field(&v, "missing"), 0);
    }
}
