//! cluster-atlas — multi-cluster infrastructure observability service
//!
//! Periodically ingests live state from one primary Kubernetes cluster plus
//! optional secondary clusters and infrastructure files (Terraform state,
//! Compose manifests), enriches it with version freshness from upstream
//! registries, and publishes pre-rendered diagrams over a small HTTP read
//! API.
//!
//! The pipeline is `server::Orchestrator` driving `kube::ClusterSource` and
//! `sources` collectors into a `models::Snapshot`, `versions` checkers in
//! the background, and `diagram` generators into the published
//! `server::DiagramStore`.

pub mod config;
pub mod diagram;
pub mod kube;
pub mod models;
pub mod server;
pub mod sources;
pub mod versions;

// Re-export the commonly used entry points
pub use config::{Config, DataSource, SourceType};
pub use kube::ClusterSource;
pub use models::{DiagramArtifact, DiagramKind, Snapshot};
pub use server::{DiagramStore, Orchestrator};
pub use versions::{ChartChecker, CheckGate, ImageChecker, NodeChecker};
