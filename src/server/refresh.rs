//! Refresh orchestrator.
//!
//! Drives the whole ingest-enrich-render pipeline on a fixed interval:
//! reads the primary cluster in full, the secondary clusters for their
//! reduced contribution, resolves file sources, hands the snapshot to the
//! freshness checkers on background tasks, runs the generators in fixed
//! order and publishes the result atomically. Single-flight: an overlapping
//! invocation is dropped, not queued.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::config::{Config, SourceType};
use crate::diagram;
use crate::kube::ClusterSource;
use crate::models::Snapshot;
use crate::server::store::DiagramStore;
use crate::sources;
use crate::versions::{ChartChecker, CheckGate, ImageChecker, NodeChecker};

pub struct Orchestrator {
    refresh_interval: Duration,
    primary: ClusterSource,
    secondaries: Vec<ClusterSource>,
    file_sources: Vec<crate::config::DataSource>,
    charts: Arc<ChartChecker>,
    images: Arc<ImageChecker>,
    node_versions: Arc<NodeChecker>,
    store: Arc<DiagramStore>,
    flight: CheckGate,
    http: reqwest::Client,
}

impl Orchestrator {
    pub async fn new(cfg: &Config) -> Result<Self> {
        let primary = ClusterSource::connect(&cfg.kubeconfig, &cfg.cluster_name)
            .await
            .context("connecting to primary cluster")?;

        let mut secondaries = Vec::new();
        for ds in &cfg.data_sources {
            if ds.source_type != SourceType::Kubernetes {
                continue;
            }
            if !Path::new(&ds.path).is_file() {
                tracing::warn!(
                    name = ds.name,
                    path = ds.path,
                    "skipping kubernetes data source: kubeconfig not readable"
                );
                continue;
            }
            match ClusterSource::connect(&ds.path, &ds.name).await {
                Ok(source) => {
                    tracing::info!(name = ds.name, "added kubernetes data source");
                    secondaries.push(source);
                }
                Err(err) => {
                    tracing::warn!(
                        name = ds.name,
                        error = %err,
                        "skipping kubernetes data source: failed to connect"
                    );
                }
            }
        }

        let file_sources = cfg
            .data_sources
            .iter()
            .filter(|ds| ds.source_type != SourceType::Kubernetes)
            .cloned()
            .collect();

        Ok(Self {
            refresh_interval: cfg.refresh_interval,
            primary,
            secondaries,
            file_sources,
            charts: Arc::new(ChartChecker::new(&cfg.registry_proxy)),
            images: Arc::new(ImageChecker::new()),
            node_versions: Arc::new(NodeChecker::new()),
            store: Arc::new(DiagramStore::new()),
            flight: CheckGate::new(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("building file source client"),
        })
    }

    pub fn store(&self) -> Arc<DiagramStore> {
        self.store.clone()
    }

    /// Run the refresh loop until the shutdown signal fires. One refresh is
    /// executed immediately at startup.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        self.refresh(&mut shutdown).await;

        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    tracing::info!("refresh loop shutting down");
                    return;
                }
            }
            self.refresh(&mut shutdown).await;
        }
    }

    /// Execute one refresh. Concurrent invocations are discarded; a
    /// shutdown signal during collection aborts without publishing.
    pub async fn refresh(&self, shutdown: &mut watch::Receiver<()>) {
        let Some(permit) = self.flight.try_begin(Duration::ZERO) else {
            tracing::debug!("refresh already in progress, skipping");
            return;
        };

        tracing::info!("refreshing cluster data");
        let start = Instant::now();

        let snapshot = tokio::select! {
            snapshot = self.collect() => snapshot,
            _ = shutdown.changed() => {
                tracing::info!("refresh cancelled");
                return;
            }
        };

        // Freshness checks run on their own workers; each enforces its own
        // single-flight and interval gate.
        {
            let charts = self.charts.clone();
            let repos = snapshot.helm_repositories.clone();
            let releases = snapshot.helm_releases.clone();
            tokio::spawn(async move { charts.check(&repos, &releases).await });

            let images = self.images.clone();
            let pods = snapshot.pods.clone();
            tokio::spawn(async move { images.check(&pods).await });

            let node_versions = self.node_versions.clone();
            let nodes = snapshot.nodes.clone();
            tokio::spawn(async move { node_versions.check(&nodes).await });
        }

        let diagrams =
            diagram::generate_all(&snapshot, &self.charts, &self.images, &self.node_versions);
        self.store.publish(diagrams);
        permit.complete();

        tracing::info!(duration = ?start.elapsed(), "refresh complete");
    }

    /// Gather the full snapshot: all primary-cluster resources, the reduced
    /// secondary contribution, and the file sources. Per-source failures
    /// degrade the snapshot but never abort it.
    async fn collect(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            primary_cluster: self.primary.cluster_name().to_string(),
            ..Default::default()
        };

        macro_rules! collect_into {
            ($target:expr, $fut:expr, $what:literal) => {
                match $fut.await {
                    Ok(items) => $target = items,
                    Err(err) => {
                        tracing::warn!(source = $what, error = %err, "primary cluster list failed")
                    }
                }
            };
        }

        collect_into!(snapshot.nodes, self.primary.list_nodes(), "nodes");
        collect_into!(
            snapshot.kustomizations,
            self.primary.list_kustomizations(),
            "kustomizations"
        );
        collect_into!(snapshot.gateways, self.primary.list_gateways(), "gateways");
        collect_into!(
            snapshot.http_routes,
            self.primary.list_http_routes(),
            "httproutes"
        );
        collect_into!(
            snapshot.namespaces,
            self.primary.list_namespaces(),
            "namespaces"
        );
        collect_into!(
            snapshot.security_policies,
            self.primary.list_security_policies(),
            "securitypolicies"
        );
        collect_into!(
            snapshot.client_traffic_policies,
            self.primary.list_client_traffic_policies(),
            "clienttrafficpolicies"
        );
        collect_into!(
            snapshot.service_entries,
            self.primary.list_service_entries(),
            "serviceentries"
        );
        collect_into!(
            snapshot.east_west_gateways,
            self.primary.list_east_west_gateways(),
            "eastwestgateways"
        );
        collect_into!(
            snapshot.load_balancers,
            self.primary.list_load_balancers(),
            "loadbalancers"
        );
        collect_into!(
            snapshot.helm_releases,
            self.primary.list_helm_releases(),
            "helmreleases"
        );
        collect_into!(
            snapshot.helm_repositories,
            self.primary.list_helm_repositories(),
            "helmrepositories"
        );
        collect_into!(snapshot.pods, self.primary.list_pods(), "pods");

        // Secondary clusters contribute namespaces, security policies,
        // kustomizations and service entries only.
        for secondary in &self.secondaries {
            let cluster = secondary.cluster_name();
            match secondary.list_namespaces().await {
                Ok(items) => snapshot.namespaces.extend(items),
                Err(err) => tracing::warn!(cluster, error = %err, "secondary namespaces failed"),
            }
            match secondary.list_security_policies().await {
                Ok(items) => snapshot.security_policies.extend(items),
                Err(err) => {
                    tracing::warn!(cluster, error = %err, "secondary security policies failed")
                }
            }
            match secondary.list_kustomizations().await {
                Ok(items) => snapshot.kustomizations.extend(items),
                Err(err) => {
                    tracing::warn!(cluster, error = %err, "secondary kustomizations failed")
                }
            }
            match secondary.list_service_entries().await {
                Ok(items) => snapshot.service_entries.extend(items),
                Err(err) => {
                    tracing::warn!(cluster, error = %err, "secondary service entries failed")
                }
            }
        }

        // Appended rows are re-sorted so snapshot-equivalent inputs render
        // byte-identically.
        snapshot
            .namespaces
            .sort_by(|a, b| (&a.cluster, &a.name).cmp(&(&b.cluster, &b.name)));
        snapshot.security_policies.sort_by(|a, b| {
            (&a.cluster, &a.namespace, &a.name).cmp(&(&b.cluster, &b.namespace, &b.name))
        });
        snapshot
            .kustomizations
            .sort_by(|a, b| (&a.cluster, &a.name).cmp(&(&b.cluster, &b.name)));
        snapshot.service_entries.sort_by(|a, b| {
            (&a.cluster, &a.namespace, &a.name).cmp(&(&b.cluster, &b.namespace, &b.name))
        });

        for ds in &self.file_sources {
            match sources::resolve(ds, &self.http).await {
                Ok(Some(src)) => snapshot.infra_sources.push(src),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(name = ds.name, error = %err, "failed to resolve data source")
                }
            }
        }

        snapshot
    }
}
