//! Diagram generators.
//!
//! Each generator is a pure function from a snapshot (plus freshness caches)
//! to one or more artifacts with stable ids. Generators sort their inputs
//! before rendering: identical snapshots must produce byte-identical
//! content.

pub mod dependencies;
pub mod images;
pub mod network;
pub mod nodes;
pub mod security;
pub mod topology;
pub mod versions;

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{DiagramArtifact, Snapshot};
use crate::versions::{ChartChecker, ImageChecker, NodeChecker};

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

/// Convert a logical name to a stable Mermaid node id.
pub(crate) fn sanitize_id(name: &str) -> String {
    NON_ALPHANUMERIC.replace_all(name, "_").into_owned()
}

pub(crate) fn bool_icon(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

/// Run every generator in fixed order and collect the artifacts.
pub fn generate_all(
    snapshot: &Snapshot,
    charts: &ChartChecker,
    images: &ImageChecker,
    node_versions: &NodeChecker,
) -> Vec<DiagramArtifact> {
    let mut diagrams = topology::generate_sections(snapshot);
    diagrams.push(dependencies::generate(snapshot));
    diagrams.push(network::generate(snapshot));
    diagrams.extend(security::generate(snapshot));
    diagrams.push(nodes::generate(snapshot, node_versions));
    diagrams.push(images::generate(snapshot, images));
    diagrams.push(versions::generate(snapshot, charts));
    diagrams
}
