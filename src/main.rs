//! cluster-atlas — serves pre-rendered infrastructure diagrams from live
//! Kubernetes cluster state.

use clap::Parser;

use cluster_atlas::config::{self, Config, DataSource, SourceType};
use cluster_atlas::server;

#[derive(Parser, Debug)]
#[command(name = "cluster-atlas")]
#[command(about = "Multi-cluster infrastructure observability service", long_about = None)]
struct Args {
    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to kubeconfig (empty for in-cluster)
    #[arg(long, default_value = "")]
    kubeconfig: String,

    /// Name tag for the primary cluster
    #[arg(long, default_value = "Homelab")]
    cluster_name: String,

    /// Data refresh interval (e.g. "5m", "90s")
    #[arg(long, default_value = "5m")]
    refresh: String,

    /// host:port of a local OCI proxy for upstream resolution
    #[arg(long, default_value = "")]
    registry_proxy: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cluster_atlas=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let refresh_interval = config::parse_duration(&args.refresh).unwrap_or_else(|err| {
        eprintln!("invalid --refresh value {:?}: {}", args.refresh, err);
        std::process::exit(1);
    });

    let mut cfg = Config {
        port: args.port,
        kubeconfig: args.kubeconfig,
        cluster_name: args.cluster_name,
        refresh_interval,
        registry_proxy: args.registry_proxy,
        data_sources: Vec::new(),
    };

    // Environment overrides
    if cfg.kubeconfig.is_empty() {
        if let Ok(v) = std::env::var("KUBECONFIG") {
            cfg.kubeconfig = v;
        }
    }
    if let Ok(v) = std::env::var("CLUSTER_NAME") {
        if !v.is_empty() {
            cfg.cluster_name = v;
        }
    }
    if cfg.registry_proxy.is_empty() {
        if let Ok(v) = std::env::var("REGISTRY_PROXY") {
            cfg.registry_proxy = v;
        }
    }
    if let Ok(v) = std::env::var("DATA_SOURCES") {
        if !v.is_empty() {
            cfg.data_sources = config::parse_data_sources(&v).unwrap_or_else(|err| {
                tracing::error!(error = %err, "failed to parse DATA_SOURCES");
                std::process::exit(1);
            });
        }
    }

    // Backward compat: TFSTATE_PATH creates a single tfstate source
    if let Ok(v) = std::env::var("TFSTATE_PATH") {
        if !v.is_empty() && cfg.data_sources.is_empty() {
            cfg.data_sources = vec![DataSource {
                name: "Terraform".to_string(),
                source_type: SourceType::Tfstate,
                path: v,
                github: None,
            }];
        }
    }

    tracing::info!(
        port = cfg.port,
        kubeconfig = cfg.kubeconfig,
        data_sources = cfg.data_sources.len(),
        refresh = ?cfg.refresh_interval,
        "cluster-atlas starting"
    );

    if let Err(err) = server::serve(cfg).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}
