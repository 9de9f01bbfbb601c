//! Node OS and kubelet freshness cache.
//!
//! Resolves the latest OS release for known distros and the latest patch
//! release of each deployed kubelet minor series from the GitHub releases
//! API.

use std::collections::{BTreeSet, HashMap};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

use crate::models::NodeInfo;
use crate::versions::gate::CheckGate;
use crate::versions::semver::SemVer;

/// Minimum wall-clock time between completed checks.
const CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

const PACING: Duration = Duration::from_secs(1);

const RELEASE_BODY_LIMIT: usize = 1 << 20;
const RELEASE_LIST_BODY_LIMIT: usize = 2 << 20;

/// OS distros with a known GitHub repository for release checking.
const KNOWN_DISTROS: &[(&str, &str)] = &[("talos", "siderolabs/talos"), ("k3s", "k3s-io/k3s")];

/// Extracts the distro name and version from an OS image string, e.g.
/// `Talos (v1.9.0)` or `Ubuntu 22.04`.
static OS_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\S+)\s*\(?v?([0-9]+\.[0-9]+(?:\.[0-9]+)?)\)?").unwrap()
});

/// Parse an OS image string into a lowercased distro name and version.
pub fn parse_os_image(os_image: &str) -> Option<(String, String)> {
    let caps = OS_IMAGE_RE.captures(os_image)?;
    Some((caps[1].to_lowercase(), caps[2].to_string()))
}

/// Extract `major.minor` from a kubelet version string (`v1.32.0` → `1.32`).
fn kubelet_minor(version: &str) -> Option<String> {
    let v = version.strip_prefix('v').unwrap_or(version);
    let mut parts = v.splitn(3, '.');
    let major = parts.next()?;
    let minor = parts.next()?;
    Some(format!("{major}.{minor}"))
}

pub struct NodeChecker {
    latest_os: RwLock<HashMap<String, String>>,
    latest_k8s: RwLock<HashMap<String, String>>,
    gate: CheckGate,
    client: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
}

impl NodeChecker {
    pub fn new() -> Self {
        Self {
            latest_os: RwLock::new(HashMap::new()),
            latest_k8s: RwLock::new(HashMap::new()),
            gate: CheckGate::new(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .user_agent("cluster-atlas")
                .build()
                .expect("building github client"),
        }
    }

    /// Latest known release for the distro embedded in an OS image string.
    pub fn latest_os(&self, os_image: &str) -> Option<String> {
        let (distro, _) = parse_os_image(os_image)?;
        self.latest_os.read().expect("os cache").get(&distro).cloned()
    }

    /// Latest known patch release in a kubelet version's minor series.
    pub fn latest_kubelet(&self, kubelet_version: &str) -> Option<String> {
        let minor = kubelet_minor(kubelet_version)?;
        self.latest_k8s.read().expect("k8s cache").get(&minor).cloned()
    }

    /// Fetch latest OS and kubelet versions for the given nodes.
    /// Single-flight with a fifteen-minute gate.
    pub async fn check(&self, nodes: &[NodeInfo]) {
        let Some(permit) = self.gate.try_begin(CHECK_INTERVAL) else {
            return;
        };

        let mut distros = BTreeSet::new();
        let mut minors = BTreeSet::new();
        for node in nodes {
            if let Some((distro, _)) = parse_os_image(&node.os_image) {
                distros.insert(distro);
            }
            if let Some(minor) = kubelet_minor(&node.kubelet_version) {
                minors.insert(minor);
            }
        }

        for distro in &distros {
            let Some((_, repo)) = KNOWN_DISTROS.iter().find(|(name, _)| *name == distro.as_str())
            else {
                continue;
            };
            match self.fetch_latest_release(repo).await {
                Ok(tag) => {
                    self.latest_os
                        .write()
                        .expect("os cache")
                        .insert(distro.clone(), tag);
                }
                Err(err) => {
                    tracing::warn!(distro, error = %err, "node check: failed to get latest OS release");
                }
            }
            tokio::time::sleep(PACING).await;
        }

        for minor in &minors {
            match self.fetch_latest_k8s_patch(minor).await {
                Ok(tag) => {
                    self.latest_k8s
                        .write()
                        .expect("k8s cache")
                        .insert(minor.clone(), tag);
                }
                Err(err) => {
                    tracing::warn!(minor, error = %err, "node check: failed to get latest k8s patch");
                }
            }
            tokio::time::sleep(PACING).await;
        }

        permit.complete();
        tracing::info!(
            distros = distros.len(),
            k8s_minors = minors.len(),
            "node version check complete"
        );
    }

    /// Latest release tag of a GitHub repository.
    async fn fetch_latest_release(&self, repo: &str) -> Result<String> {
        let url = format!("https://api.github.com/repos/{repo}/releases/latest");
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("GitHub API returned {} for {}", resp.status().as_u16(), repo);
        }

        let body = resp.bytes().await?;
        if body.len() > RELEASE_BODY_LIMIT {
            anyhow::bail!("release body exceeds {} bytes", RELEASE_BODY_LIMIT);
        }

        let release: GitHubRelease = serde_json::from_slice(&body).context("parsing release")?;
        if release.tag_name.is_empty() {
            anyhow::bail!("release has no tag name");
        }
        Ok(release.tag_name)
    }

    /// Latest stable patch release for a Kubernetes minor series.
    async fn fetch_latest_k8s_patch(&self, minor: &str) -> Result<String> {
        let url = "https://api.github.com/repos/kubernetes/kubernetes/releases?per_page=100";
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("fetching k8s releases")?;

        if !resp.status().is_success() {
            anyhow::bail!("GitHub API returned {}", resp.status().as_u16());
        }

        let body = resp.bytes().await?;
        if body.len() > RELEASE_LIST_BODY_LIMIT {
            anyhow::bail!("release list exceeds {} bytes", RELEASE_LIST_BODY_LIMIT);
        }

        let releases: Vec<GitHubRelease> =
            serde_json::from_slice(&body).context("parsing releases")?;

        let prefix = format!("v{minor}.");
        let best = releases
            .iter()
            .filter(|r| !r.prerelease && !r.draft && r.tag_name.starts_with(&prefix))
            .filter_map(|r| SemVer::parse(&r.tag_name))
            .filter(|sv| sv.pre.is_empty())
            .max();

        best.map(|sv| sv.original)
            .with_context(|| format!("no stable release found for v{minor}.x"))
    }
}

impl Default for NodeChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_image() {
        assert_eq!(
            parse_os_image("Talos (v1.9.0)"),
            Some(("talos".into(), "1.9.0".into()))
        );
        assert_eq!(
            parse_os_image("Ubuntu 22.04"),
            Some(("ubuntu".into(), "22.04".into()))
        );
        assert_eq!(
            parse_os_image("K3s v1.31.2+k3s1"),
            Some(("k3s".into(), "1.31.2".into()))
        );
        assert_eq!(parse_os_image(""), None);
        assert_eq!(parse_os_image("CustomOS"), None);
    }

    #[test]
    fn test_kubelet_minor() {
        assert_eq!(kubelet_minor("v1.32.0").as_deref(), Some("1.32"));
        assert_eq!(kubelet_minor("1.28.11").as_deref(), Some("1.28"));
        assert_eq!(kubelet_minor("v1").as_deref(), None);
    }

    #[test]
    fn test_lookup_without_data() {
        let checker = NodeChecker::new();
        assert!(checker.latest_os("Talos (v1.9.0)").is_none());
        assert!(checker.latest_kubelet("v1.32.0").is_none());
    }
}
