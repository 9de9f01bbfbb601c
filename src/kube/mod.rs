//! Kubernetes client construction.
//!
//! The primary cluster uses in-cluster credentials (or the ambient
//! kubeconfig when running outside a pod); secondary clusters are configured
//! with explicit kubeconfig paths.

pub mod source;

pub use source::ClusterSource;

use std::path::Path;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

/// Create a client for the given kubeconfig path; an empty path means
/// in-cluster (or ambient) configuration.
pub async fn create_client(kubeconfig: &str) -> Result<Client> {
    if kubeconfig.is_empty() {
        let config = Config::infer()
            .await
            .context("inferring Kubernetes configuration")?;
        tracing::debug!(cluster_url = %config.cluster_url, "Kubernetes client configured");
        return Client::try_from(config).context("creating Kubernetes client");
    }
    create_client_from_kubeconfig_path(Path::new(kubeconfig)).await
}

/// Create a client from a specific kubeconfig file.
///
/// Fails when the file is missing, empty or not a valid kubeconfig, so that
/// a misconfigured cluster connection surfaces at startup instead of as an
/// endless stream of refresh warnings.
pub async fn create_client_from_kubeconfig_path(path: &Path) -> Result<Client> {
    if !path.is_file() {
        anyhow::bail!("kubeconfig is not a readable file: {}", path.display());
    }

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("parsing kubeconfig {}", path.display()))?;

    if kubeconfig.contexts.is_empty() {
        anyhow::bail!("kubeconfig {} contains no contexts", path.display());
    }

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("building config from kubeconfig {}", path.display()))?;

    let client = Client::try_from(config)
        .with_context(|| format!("creating client from kubeconfig {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Kubernetes client created from kubeconfig");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_create_client_missing_file() {
        let err = match create_client_from_kubeconfig_path(Path::new("/nonexistent/kubeconfig"))
            .await
        {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("not a readable file"));
    }

    #[tokio::test]
    async fn test_create_client_invalid_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid yaml: [").unwrap();
        file.flush().unwrap();

        let err = match create_client_from_kubeconfig_path(file.path()).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("parsing kubeconfig"));
    }

    #[tokio::test]
    async fn test_create_client_no_contexts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apiVersion: v1").unwrap();
        writeln!(file, "kind: Config").unwrap();
        writeln!(file, "contexts: []").unwrap();
        file.flush().unwrap();

        let err = match create_client_from_kubeconfig_path(file.path()).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("no contexts"));
    }
}
