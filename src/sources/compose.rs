//! Docker-Compose manifest parsing.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::Value;

use crate::models::{DockerCompose, DockerService};

#[derive(Debug, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceDef>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceDef {
    #[serde(default)]
    image: String,
    #[serde(default)]
    container_name: String,
    #[serde(default)]
    hostname: String,
    /// String or list form.
    #[serde(default)]
    command: Value,
    #[serde(default)]
    privileged: bool,
    #[serde(default)]
    ports: Vec<String>,
    #[serde(default)]
    volumes: Vec<String>,
    #[serde(default)]
    networks: BTreeMap<String, NetworkDef>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkDef {
    #[serde(default)]
    ipv4_address: String,
}

/// Parse docker-compose YAML. Returns `None` when the file defines no
/// services.
pub fn parse_docker_compose(data: &[u8]) -> Result<Option<DockerCompose>> {
    let file: ComposeFile = serde_yaml::from_slice(data).context("parsing docker-compose")?;

    if file.services.is_empty() {
        tracing::warn!("docker-compose file has no services");
        return Ok(None);
    }

    // BTreeMap iteration keeps service order deterministic.
    let mut services = Vec::new();
    for (name, def) in &file.services {
        let mut svc = DockerService {
            name: name.clone(),
            image: def.image.clone(),
            hostname: def.hostname.clone(),
            ports: def.ports.clone(),
            volumes: def.volumes.clone(),
            privileged: def.privileged,
            ..Default::default()
        };

        if svc.hostname.is_empty() {
            svc.hostname = def.container_name.clone();
        }

        svc.command = match &def.command {
            Value::String(s) => s.clone(),
            Value::Sequence(items) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        };

        for (net_name, net) in &def.networks {
            svc.networks.push(net_name.clone());
            if !net.ipv4_address.is_empty() {
                svc.ip = net.ipv4_address.clone();
            }
        }

        services.push(svc);
    }

    Ok(Some(DockerCompose { services }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compose() {
        let yaml = r#"
services:
  minio:
    image: minio/minio:RELEASE.2024-01-01
    hostname: minio
    command: server /data
    ports:
      - "9000:9000"
    volumes:
      - /srv/minio:/data
    networks:
      storage:
        ipv4_address: 10.0.0.5
  vault:
    image: hashicorp/vault:1.15
    container_name: vault-main
    privileged: true
    command: ["vault", "server", "-config=/vault/config"]
    networks:
      storage: {}
"#;
        let compose = parse_docker_compose(yaml.as_bytes()).unwrap().unwrap();
        assert_eq!(compose.services.len(), 2);

        let minio = &compose.services[0];
        assert_eq!(minio.name, "minio");
        assert_eq!(minio.hostname, "minio");
        assert_eq!(minio.ip, "10.0.0.5");
        assert_eq!(minio.command, "server /data");
        assert_eq!(minio.networks, vec!["storage"]);

        let vault = &compose.services[1];
        assert_eq!(vault.hostname, "vault-main");
        assert!(vault.privileged);
        assert_eq!(vault.command, "vault server -config=/vault/config");
        assert!(vault.ip.is_empty());
    }

    #[test]
    fn test_parse_compose_no_services() {
        assert!(parse_docker_compose(b"services: {}").unwrap().is_none());
    }

    #[test]
    fn test_parse_compose_invalid() {
        assert!(parse_docker_compose(b"services: [not a map").is_err());
    }
}
