//! File-backed infrastructure data sources.
//!
//! Each configured source resolves to at most one [`InfraSource`] record per
//! refresh. Missing or empty files are not errors: the source simply
//! contributes nothing this cycle.

pub mod compose;
pub mod github;
pub mod terraform;

use anyhow::{Context, Result};

use crate::config::{DataSource, SourceType};
use crate::models::InfraSource;

/// Fetch and parse a single non-kubernetes data source.
///
/// Returns `Ok(None)` when the file is missing, empty, or yields no usable
/// records.
pub async fn resolve(ds: &DataSource, http: &reqwest::Client) -> Result<Option<InfraSource>> {
    let Some(data) = fetch_source_data(ds, http).await? else {
        return Ok(None);
    };

    let mut src = InfraSource {
        name: ds.name.clone(),
        source_type: ds.source_type.as_str().to_string(),
        ..Default::default()
    };

    match ds.source_type {
        SourceType::Tfstate => {
            let nodes = terraform::parse_terraform_state(&data)?;
            if nodes.is_empty() {
                return Ok(None);
            }
            src.terraform_nodes = nodes;
        }
        SourceType::DockerCompose => {
            let Some(compose) = compose::parse_docker_compose(&data)? else {
                return Ok(None);
            };
            src.docker_compose = Some(compose);
        }
        SourceType::Kubernetes => {
            anyhow::bail!("kubernetes sources are handled as cluster connections");
        }
    }

    Ok(Some(src))
}

/// Read raw bytes from the source's file or GitHub location.
async fn fetch_source_data(ds: &DataSource, http: &reqwest::Client) -> Result<Option<Vec<u8>>> {
    if let Some(github) = &ds.github {
        let data = github::fetch_github_file(github, http).await?;
        if data.is_empty() {
            return Ok(None);
        }
        return Ok(Some(data));
    }

    if ds.path.is_empty() {
        anyhow::bail!("data source {:?} has no path configured", ds.name);
    }

    match tokio::fs::read(&ds.path).await {
        Ok(data) if data.is_empty() => {
            tracing::info!(name = ds.name, path = ds.path, "data source file is empty");
            Ok(None)
        }
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(name = ds.name, path = ds.path, "data source file not found");
            Ok(None)
        }
        Err(err) => Err(err).with_context(|| format!("reading {}", ds.path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_source(name: &str, source_type: SourceType, path: &str) -> DataSource {
        DataSource {
            name: name.to_string(),
            source_type,
            path: path.to_string(),
            github: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_file_is_none() {
        let ds = file_source("tf", SourceType::Tfstate, "/nonexistent/terraform.tfstate");
        let http = reqwest::Client::new();
        assert!(resolve(&ds, &http).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_empty_path_is_error() {
        let ds = file_source("tf", SourceType::Tfstate, "");
        let http = reqwest::Client::new();
        assert!(resolve(&ds, &http).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_tfstate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": 4, "resources": [{{
                "mode": "managed", "type": "proxmox_vm_qemu", "name": "cp",
                "instances": [{{"attributes": {{"name": "vm-1", "cores": 2, "memory": 4096}}}}]
            }}]}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let ds = file_source("Terraform", SourceType::Tfstate, file.path().to_str().unwrap());
        let http = reqwest::Client::new();
        let src = resolve(&ds, &http).await.unwrap().unwrap();
        assert_eq!(src.source_type, "tfstate");
        assert_eq!(src.terraform_nodes.len(), 1);
        assert_eq!(src.terraform_nodes[0].name, "vm-1");
    }

    #[tokio::test]
    async fn test_resolve_compose_without_services_is_none() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "services: {{}}").unwrap();
        file.flush().unwrap();

        let ds = file_source("dc", SourceType::DockerCompose, file.path().to_str().unwrap());
        let http = reqwest::Client::new();
        assert!(resolve(&ds, &http).await.unwrap().is_none());
    }
}
