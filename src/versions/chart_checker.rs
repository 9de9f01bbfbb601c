//! Chart freshness cache.
//!
//! Resolves the latest published version for every `(repository, chart)`
//! pair referenced by a HelmRelease, querying OCI registries and HTTP chart
//! indexes. Runs once per refresh cycle; the orchestrator's interval is the
//! cadence, so the gate only enforces single-flight.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::{HelmReleaseInfo, HelmRepositoryInfo};
use crate::versions::gate::CheckGate;
use crate::versions::registry::{RegistryClient, RegistryError};
use crate::versions::semver::highest_semver;

/// Response-size cap for HTTP chart indexes, which run much larger than tag
/// lists.
const INDEX_BODY_LIMIT: usize = 10 << 20;

/// Delay between per-repository queries; shorter spacing trips upstream
/// rate limits.
const PACING: Duration = Duration::from_secs(1);

pub struct ChartChecker {
    latest: RwLock<HashMap<String, String>>,
    gate: CheckGate,
    registry: RegistryClient,
    http: reqwest::Client,
    registry_proxy: String,
}

#[derive(Debug, serde::Deserialize)]
struct HelmIndex {
    #[serde(default)]
    entries: HashMap<String, Vec<HelmEntry>>,
}

#[derive(Debug, serde::Deserialize)]
struct HelmEntry {
    #[serde(default)]
    version: String,
}

struct ChartRef {
    repo_url: String,
    repo_type: String,
    chart_name: String,
}

impl ChartChecker {
    pub fn new(registry_proxy: &str) -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            gate: CheckGate::new(),
            registry: RegistryClient::new(Duration::from_secs(10)),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("building chart index client"),
            registry_proxy: registry_proxy.to_string(),
        }
    }

    /// Latest known version for a repository + chart pair.
    pub fn latest(&self, repo_url: &str, chart_name: &str) -> Option<String> {
        self.latest
            .read()
            .expect("chart cache")
            .get(&format!("{repo_url}/{chart_name}"))
            .cloned()
    }

    /// Resolve latest versions for every unique repo + chart combination.
    /// Single-flight: a concurrent call returns immediately.
    pub async fn check(&self, repos: &[HelmRepositoryInfo], releases: &[HelmReleaseInfo]) {
        let Some(permit) = self.gate.try_begin(Duration::ZERO) else {
            tracing::debug!("chart check already running, skipping");
            return;
        };

        let repo_by_key: HashMap<String, &HelmRepositoryInfo> = repos
            .iter()
            .map(|r| (format!("{}/{}", r.namespace, r.name), r))
            .collect();

        let mut seen = HashSet::new();
        let mut checks = Vec::new();
        for rel in releases {
            let Some(repo) = repo_by_key.get(&format!("{}/{}", rel.repo_ns, rel.repo_name)) else {
                continue;
            };
            let key = format!("{}/{}", repo.url, rel.chart_name);
            if !seen.insert(key) {
                continue;
            }
            checks.push(ChartRef {
                repo_url: repo.url.clone(),
                repo_type: repo.repo_type.clone(),
                chart_name: rel.chart_name.clone(),
            });
        }

        let mut results = HashMap::new();
        let mut skip_hosts: HashSet<String> = HashSet::new();

        for check in &checks {
            let key = format!("{}/{}", check.repo_url, check.chart_name);

            let version = if check.repo_type == "oci" {
                let (host, path) = split_oci_url(&check.repo_url);
                let (host, path) =
                    rewrite_registry_proxy(&self.registry_proxy, &host, &path);
                if skip_hosts.contains(&host) {
                    tracing::debug!(host, chart = check.chart_name, "registry skipped this cycle");
                    continue;
                }
                match self.check_oci(&host, &path, &check.chart_name).await {
                    Ok(v) => v,
                    Err(RegistryError::RateLimited) => {
                        tracing::warn!(host, "chart check: rate limited, skipping registry");
                        skip_hosts.insert(host);
                        tokio::time::sleep(PACING).await;
                        continue;
                    }
                    Err(err) => {
                        tracing::debug!(
                            repo = check.repo_url,
                            chart = check.chart_name,
                            error = %err,
                            "chart version check failed"
                        );
                        tokio::time::sleep(PACING).await;
                        continue;
                    }
                }
            } else {
                match self.check_http(&check.repo_url, &check.chart_name).await {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::debug!(
                            repo = check.repo_url,
                            chart = check.chart_name,
                            error = %err,
                            "chart version check failed"
                        );
                        tokio::time::sleep(PACING).await;
                        continue;
                    }
                }
            };

            if let Some(version) = version {
                results.insert(key, version);
            }

            tokio::time::sleep(PACING).await;
        }

        let resolved = results.len();
        {
            let mut latest = self.latest.write().expect("chart cache");
            latest.extend(results);
        }
        permit.complete();

        tracing::info!(charts = checks.len(), resolved, "chart check complete");
    }

    /// Query an OCI registry for the highest semver tag of a chart.
    async fn check_oci(
        &self,
        host: &str,
        path: &str,
        chart_name: &str,
    ) -> Result<Option<String>, RegistryError> {
        let image_path = if path.is_empty() {
            chart_name.to_string()
        } else {
            format!("{path}/{chart_name}")
        };
        let tags = self.registry.list_tags(host, &image_path).await?;
        Ok(highest_semver(&tags))
    }

    /// Fetch a Helm HTTP repository's index.yaml and pick the highest chart
    /// version.
    async fn check_http(&self, repo_url: &str, chart_name: &str) -> Result<Option<String>> {
        let url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        if !resp.status().is_success() {
            anyhow::bail!("index returned {}", resp.status().as_u16());
        }

        let body = resp.bytes().await.context("reading index")?;
        if body.len() > INDEX_BODY_LIMIT {
            anyhow::bail!("index body exceeds {} bytes", INDEX_BODY_LIMIT);
        }

        let index: HelmIndex = serde_yaml::from_slice(&body).context("parsing index")?;
        let entries = index
            .entries
            .get(chart_name)
            .filter(|e| !e.is_empty())
            .with_context(|| format!("chart {chart_name:?} not found in index"))?;

        let versions: Vec<String> = entries
            .iter()
            .filter(|e| !e.version.is_empty())
            .map(|e| e.version.clone())
            .collect();
        Ok(highest_semver(&versions))
    }
}

/// Split an `oci://host/path` repository URL into host and path.
pub fn split_oci_url(repo_url: &str) -> (String, String) {
    let addr = repo_url.strip_prefix("oci://").unwrap_or(repo_url);
    match addr.split_once('/') {
        Some((host, path)) => (host.to_string(), path.to_string()),
        None => (addr.to_string(), String::new()),
    }
}

/// Rewrite a pull-through proxy URL to target the upstream registry
/// directly: when the host matches the configured proxy and the first path
/// segment contains a dot, that segment is the upstream host.
pub fn rewrite_registry_proxy(proxy: &str, host: &str, path: &str) -> (String, String) {
    if proxy.is_empty() || host != proxy {
        return (host.to_string(), path.to_string());
    }
    match path.split_once('/') {
        Some((first, rest)) if first.contains('.') => (first.to_string(), rest.to_string()),
        None if path.contains('.') => (path.to_string(), String::new()),
        _ => (host.to_string(), path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_oci_url() {
        assert_eq!(
            split_oci_url("oci://ghcr.io/grafana/helm-charts"),
            ("ghcr.io".into(), "grafana/helm-charts".into())
        );
        assert_eq!(split_oci_url("oci://ghcr.io"), ("ghcr.io".into(), "".into()));
    }

    #[test]
    fn test_rewrite_registry_proxy() {
        // First segment is an upstream host
        assert_eq!(
            rewrite_registry_proxy("zot.example:5000", "zot.example:5000", "ghcr.io/grafana/helm-charts"),
            ("ghcr.io".into(), "grafana/helm-charts".into())
        );
        // First segment is a plain path component: no rewrite
        assert_eq!(
            rewrite_registry_proxy("zot.example:5000", "zot.example:5000", "charts/app"),
            ("zot.example:5000".into(), "charts/app".into())
        );
        // Host does not match the proxy: no rewrite
        assert_eq!(
            rewrite_registry_proxy("zot.example:5000", "ghcr.io", "grafana/helm-charts"),
            ("ghcr.io".into(), "grafana/helm-charts".into())
        );
        // No proxy configured
        assert_eq!(
            rewrite_registry_proxy("", "ghcr.io", "grafana/helm-charts"),
            ("ghcr.io".into(), "grafana/helm-charts".into())
        );
    }

    #[test]
    fn test_parse_helm_index() {
        let yaml = r#"
apiVersion: v1
entries:
  traefik:
    - version: 28.0.0
    - version: 27.0.2
    - version: 28.0.1
"#;
        let index: HelmIndex = serde_yaml::from_str(yaml).unwrap();
        let versions: Vec<String> = index.entries["traefik"]
            .iter()
            .map(|e| e.version.clone())
            .collect();
        assert_eq!(highest_semver(&versions).as_deref(), Some("28.0.1"));
    }
}
