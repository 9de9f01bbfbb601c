//! Deployed chart version table.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{DiagramArtifact, DiagramKind, HelmRepositoryInfo, Snapshot};
use crate::versions::ChartChecker;

#[derive(Debug, Serialize)]
struct VersionRow {
    cluster: String,
    release: String,
    namespace: String,
    chart: String,
    version: String,
    latest: String,
    outdated: bool,
    #[serde(rename = "repoType")]
    repo_type: String,
    #[serde(rename = "repoUrl")]
    repo_url: String,
}

/// Produce a table of deployed HelmRelease versions with freshness columns.
pub fn generate(data: &Snapshot, checker: &ChartChecker) -> DiagramArtifact {
    if data.helm_releases.is_empty() {
        return DiagramArtifact {
            id: "versions".to_string(),
            title: "Component Versions".to_string(),
            kind: DiagramKind::Markdown,
            content: "*No HelmRelease data available.*".to_string(),
        };
    }

    let repo_by_key: HashMap<String, &HelmRepositoryInfo> = data
        .helm_repositories
        .iter()
        .map(|r| (format!("{}/{}/{}", r.cluster, r.namespace, r.name), r))
        .collect();

    let mut sorted: Vec<_> = data.helm_releases.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.cluster, &a.namespace, &a.name).cmp(&(&b.cluster, &b.namespace, &b.name))
    });

    let mut rows = Vec::new();
    for rel in sorted {
        let repo = repo_by_key
            .get(&format!("{}/{}/{}", rel.cluster, rel.repo_ns, rel.repo_name))
            .copied();

        let repo_type = match repo.map(|r| r.repo_type.as_str()) {
            Some("oci") => "OCI",
            Some(t) if !t.is_empty() => "HTTP",
            _ => "-",
        };

        let repo_url = repo
            .map(|r| r.url.as_str())
            .filter(|url| !url.is_empty())
            .unwrap_or("-");

        let mut latest = "-".to_string();
        let mut outdated = false;
        if let Some(repo) = repo {
            if let Some(found) = checker.latest(&repo.url, &rel.chart_name) {
                latest = found;
                if latest != rel.version && !rel.version.is_empty() {
                    outdated = true;
                }
            }
        }

        let version = if rel.version.is_empty() {
            "-"
        } else {
            rel.version.as_str()
        };

        rows.push(VersionRow {
            cluster: rel.cluster.clone(),
            release: rel.name.clone(),
            namespace: rel.namespace.clone(),
            chart: rel.chart_name.clone(),
            version: version.to_string(),
            latest,
            outdated,
            repo_type: repo_type.to_string(),
            repo_url: repo_url.to_string(),
        });
    }

    DiagramArtifact {
        id: "versions".to_string(),
        title: "Component Versions".to_string(),
        kind: DiagramKind::Table,
        content: serde_json::to_string(&rows).expect("serializing version rows"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HelmReleaseInfo;

    #[test]
    fn test_empty_placeholder() {
        let checker = ChartChecker::new("");
        let diagram = generate(&Snapshot::default(), &checker);
        assert_eq!(diagram.kind, DiagramKind::Markdown);
        assert!(diagram.content.contains("No HelmRelease"));
    }

    #[test]
    fn test_rows_without_freshness_data() {
        let data = Snapshot {
            helm_releases: vec![HelmReleaseInfo {
                name: "traefik".to_string(),
                namespace: "ingress".to_string(),
                cluster: "Homelab".to_string(),
                chart_name: "traefik".to_string(),
                version: "28.0.0".to_string(),
                repo_name: "traefik-charts".to_string(),
                repo_ns: "flux-system".to_string(),
                ..Default::default()
            }],
            helm_repositories: vec![HelmRepositoryInfo {
                name: "traefik-charts".to_string(),
                namespace: "flux-system".to_string(),
                cluster: "Homelab".to_string(),
                repo_type: "oci".to_string(),
                url: "oci://ghcr.io/traefik/helm".to_string(),
            }],
            ..Default::default()
        };

        let checker = ChartChecker::new("");
        let diagram = generate(&data, &checker);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&diagram.content).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["repoType"], "OCI");
        assert_eq!(rows[0]["repoUrl"], "oci://ghcr.io/traefik/helm");
        assert_eq!(rows[0]["latest"], "-");
        assert_eq!(rows[0]["outdated"], false);
        assert_eq!(rows[0]["version"], "28.0.0");
    }

    #[test]
    fn test_release_without_repository() {
        let data = Snapshot {
            helm_releases: vec![HelmReleaseInfo {
                name: "orphan".to_string(),
                namespace: "apps".to_string(),
                cluster: "Homelab".to_string(),
                chart_name: "orphan".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let checker = ChartChecker::new("");
        let diagram = generate(&data, &checker);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&diagram.content).unwrap();
        assert_eq!(rows[0]["repoType"], "-");
        assert_eq!(rows[0]["repoUrl"], "-");
        assert_eq!(rows[0]["version"], "-");
    }
}
