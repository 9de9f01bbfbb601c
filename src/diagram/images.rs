//! Container image inventory table.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::{DiagramArtifact, DiagramKind, ImageRef, Snapshot};
use crate::versions::ImageChecker;

#[derive(Debug, Serialize)]
struct ImageRow {
    image: String,
    tag: String,
    #[serde(rename = "type")]
    kind: String,
    namespaces: String,
    pods: usize,
    registry: String,
    latest: String,
    outdated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ImageKey {
    image: String,
    tag: String,
    init_container: bool,
}

#[derive(Default)]
struct ImageAgg {
    namespaces: BTreeSet<String>,
    pods: BTreeSet<String>,
    registry: String,
}

/// Aggregate pod images by `(image, tag, container type)` with distinct
/// namespace and pod counts.
pub fn generate(data: &Snapshot, checker: &ImageChecker) -> DiagramArtifact {
    if data.pods.is_empty() {
        return DiagramArtifact {
            id: "images".to_string(),
            title: "Container Images".to_string(),
            kind: DiagramKind::Markdown,
            content: "*No pod data available.*".to_string(),
        };
    }

    let mut agg: BTreeMap<ImageKey, ImageAgg> = BTreeMap::new();
    for pod in &data.pods {
        let image_ref = ImageRef::parse(&pod.image);
        let key = ImageKey {
            image: image_ref.image(),
            tag: image_ref.tag.clone(),
            init_container: pod.init_container,
        };
        let entry = agg.entry(key).or_default();
        entry.registry = image_ref.registry;
        entry.namespaces.insert(pod.namespace.clone());
        entry.pods.insert(format!("{}/{}", pod.namespace, pod.pod_name));
    }

    let mut rows = Vec::new();
    for (key, a) in &agg {
        let (latest, outdated) = match checker.latest(&key.image, &key.tag) {
            Some(latest) if latest != "-" => {
                let outdated = latest != key.tag;
                (latest, outdated)
            }
            Some(latest) => (latest, false),
            None => ("-".to_string(), false),
        };

        rows.push(ImageRow {
            image: key.image.clone(),
            tag: key.tag.clone(),
            kind: if key.init_container { "init" } else { "app" }.to_string(),
            namespaces: a.namespaces.iter().cloned().collect::<Vec<_>>().join(", "),
            pods: a.pods.len(),
            registry: a.registry.clone(),
            latest,
            outdated,
        });
    }

    rows.sort_by(|a, b| {
        a.registry
            .cmp(&b.registry)
            .then_with(|| a.image.cmp(&b.image))
            .then_with(|| a.tag.cmp(&b.tag))
            .then_with(|| a.kind.cmp(&b.kind))
    });

    DiagramArtifact {
        id: "images".to_string(),
        title: "Container Images".to_string(),
        kind: DiagramKind::Table,
        content: serde_json::to_string(&rows).expect("serializing image rows"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodImageInfo;

    fn pod(namespace: &str, pod_name: &str, image: &str, init: bool) -> PodImageInfo {
        PodImageInfo {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            container: "main".to_string(),
            image: image.to_string(),
            image_id: String::new(),
            init_container: init,
        }
    }

    #[test]
    fn test_empty_placeholder() {
        let checker = ImageChecker::new();
        let diagram = generate(&Snapshot::default(), &checker);
        assert_eq!(diagram.kind, DiagramKind::Markdown);
    }

    #[test]
    fn test_aggregation() {
        let data = Snapshot {
            pods: vec![
                pod("apps", "web-1", "ghcr.io/foo/web:1.0", false),
                pod("apps", "web-2", "ghcr.io/foo/web:1.0", false),
                pod("media", "web-3", "ghcr.io/foo/web:1.0", false),
                // Same pod seen twice (two containers) counts once
                pod("apps", "web-1", "ghcr.io/foo/web:1.0", false),
                // Init container aggregates separately
                pod("apps", "web-1", "ghcr.io/foo/web:1.0", true),
                pod("apps", "db-1", "postgres:16", false),
            ],
            ..Default::default()
        };

        let checker = ImageChecker::new();
        let diagram = generate(&data, &checker);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&diagram.content).unwrap();
        assert_eq!(rows.len(), 3);

        // docker.io sorts before ghcr.io
        assert_eq!(rows[0]["image"], "docker.io/library/postgres");
        assert_eq!(rows[0]["tag"], "16");
        assert_eq!(rows[0]["latest"], "-");
        assert_eq!(rows[0]["outdated"], false);

        let app = rows
            .iter()
            .find(|r| r["image"] == "ghcr.io/foo/web" && r["type"] == "app")
            .unwrap();
        assert_eq!(app["pods"], 3);
        assert_eq!(app["namespaces"], "apps, media");

        let init = rows
            .iter()
            .find(|r| r["image"] == "ghcr.io/foo/web" && r["type"] == "init")
            .unwrap();
        assert_eq!(init["pods"], 1);
    }
}
