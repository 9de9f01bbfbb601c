//! Service configuration.
//!
//! Configuration is assembled from CLI flags and environment variables in
//! `main.rs`; this module holds the schema and the helpers shared by both.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration for the whole service.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// Path to the primary cluster kubeconfig; empty means in-cluster.
    pub kubeconfig: String,
    /// Name tag for the primary cluster.
    pub cluster_name: String,
    /// Base refresh interval.
    pub refresh_interval: Duration,
    /// `host:port` of a local OCI pull-through proxy (e.g. Zot). When set,
    /// OCI chart URLs pointing at this host are rewritten to the upstream
    /// registry encoded as the first path segment.
    pub registry_proxy: String,
    /// Additional data sources: secondary clusters and infrastructure files.
    pub data_sources: Vec<DataSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            kubeconfig: String::new(),
            cluster_name: "Homelab".to_string(),
            refresh_interval: Duration::from_secs(300),
            registry_proxy: String::new(),
            data_sources: Vec::new(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Where to fetch additional infrastructure data from.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSource {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Local file path (kubeconfig for `kubernetes` sources, state or
    /// compose file otherwise).
    #[serde(default)]
    pub path: String,
    /// Fetch the file from GitHub instead of the local filesystem.
    #[serde(default)]
    pub github: Option<GitHubSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SourceType {
    #[serde(rename = "kubernetes")]
    Kubernetes,
    #[serde(rename = "tfstate")]
    Tfstate,
    #[serde(rename = "docker-compose")]
    DockerCompose,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Kubernetes => "kubernetes",
            SourceType::Tfstate => "tfstate",
            SourceType::DockerCompose => "docker-compose",
        }
    }
}

/// A file hosted in a GitHub repository.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubSource {
    /// `owner/repo`.
    pub repo: String,
    pub file_path: String,
    /// Branch or tag, defaults to `main`.
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    /// Path to a file containing a personal access token.
    #[serde(default)]
    pub token_file: String,
}

/// Parse the `DATA_SOURCES` environment value (a JSON array).
pub fn parse_data_sources(raw: &str) -> Result<Vec<DataSource>> {
    serde_json::from_str(raw).context("parsing DATA_SOURCES JSON")
}

/// Parse a human-readable duration string (e.g. "30s", "5m", "1h", "500ms").
pub fn parse_duration(s: &str) -> Result<Duration> {
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().context("invalid duration")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().context("invalid duration")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().context("invalid duration")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().context("invalid duration")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        anyhow::bail!("invalid duration format: {}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5").is_err());
    }

    #[test]
    fn test_parse_data_sources() {
        let raw = r#"[
            {"name": "Terraform", "type": "tfstate", "path": "/data/terraform.tfstate"},
            {"name": "NAS", "type": "kubernetes", "path": "/data/nas-kubeconfig"},
            {"name": "Compose", "type": "docker-compose",
             "github": {"repo": "me/homelab", "filePath": "nas/docker-compose.yaml", "ref": "main"}}
        ]"#;
        let sources = parse_data_sources(raw).unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].source_type, SourceType::Tfstate);
        assert_eq!(sources[1].source_type, SourceType::Kubernetes);
        let gh = sources[2].github.as_ref().unwrap();
        assert_eq!(gh.repo, "me/homelab");
        assert_eq!(gh.file_path, "nas/docker-compose.yaml");
    }

    #[test]
    fn test_parse_data_sources_invalid() {
        assert!(parse_data_sources("not json").is_err());
        assert!(parse_data_sources(r#"[{"name": "x", "type": "unknown"}]"#).is_err());
    }
}
