//! Terraform state parsing.
//!
//! Extracts VM definitions from a state v4 file. Two Proxmox provider
//! flavors are recognized, with different attribute shapes: telmate/proxmox
//! (`proxmox_vm_qemu`) and bpg/proxmox (`proxmox_virtual_environment_vm`).

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::models::TerraformNode;

#[derive(Debug, Deserialize)]
struct TfState {
    #[serde(default)]
    resources: Vec<TfResource>,
}

#[derive(Debug, Deserialize)]
struct TfResource {
    #[serde(default)]
    mode: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    instances: Vec<TfInstance>,
}

#[derive(Debug, Deserialize)]
struct TfInstance {
    #[serde(default)]
    attributes: Value,
}

/// Parse raw terraform.tfstate bytes into VM nodes.
pub fn parse_terraform_state(data: &[u8]) -> Result<Vec<TerraformNode>> {
    let state: TfState = serde_json::from_slice(data).context("parsing terraform state")?;

    let mut nodes = Vec::new();
    for res in &state.resources {
        if res.mode != "managed" {
            continue;
        }
        match res.kind.as_str() {
            "proxmox_vm_qemu" => nodes.extend(parse_proxmox_telmate(res)),
            "proxmox_virtual_environment_vm" => nodes.extend(parse_proxmox_bpg(res)),
            _ => {}
        }
    }
    Ok(nodes)
}

/// VMs from the telmate/proxmox provider: flat attributes, disks in a list,
/// GPU in hostpci devices or semicolon-separated tags.
fn parse_proxmox_telmate(res: &TfResource) -> Vec<TerraformNode> {
    let mut nodes = Vec::new();
    for inst in &res.instances {
        let a = &inst.attributes;
        let mut node = TerraformNode {
            name: str_attr(a, "name"),
            ip: str_attr(a, "default_ipv4_address"),
            cores: int_attr(a, "cores"),
            memory_mb: int_attr(a, "memory"),
            provider: "proxmox".to_string(),
            ..Default::default()
        };
        node.role = infer_role(&res.name, &node.name);

        if let Some(disks) = a.get("disk").and_then(Value::as_array) {
            for (i, disk) in disks.iter().enumerate() {
                let size = int_attr(disk, "size");
                match i {
                    0 => node.os_disk_gb = size,
                    1 => node.data_disk_gb = size,
                    _ => {}
                }
            }
        }

        if let Some(hostpci) = a.get("hostpci").and_then(Value::as_array) {
            for device in hostpci {
                let id = str_attr(device, "device");
                if !id.is_empty() {
                    node.gpu = id;
                }
            }
        }

        let tags = str_attr(a, "tags");
        for tag in tags.split(';') {
            if let Some(gpu) = tag.strip_prefix("gpu=") {
                node.gpu = gpu.to_string();
            }
        }

        nodes.push(node);
    }
    nodes
}

/// VMs from the bpg/proxmox provider: cpu/memory as single-element blocks,
/// IPs as a nested address list.
fn parse_proxmox_bpg(res: &TfResource) -> Vec<TerraformNode> {
    let mut nodes = Vec::new();
    for inst in &res.instances {
        let a = &inst.attributes;
        let mut node = TerraformNode {
            name: str_attr(a, "name"),
            provider: "proxmox".to_string(),
            ..Default::default()
        };
        node.role = infer_role(&res.name, &node.name);

        if let Some(cpu) = a.get("cpu").and_then(Value::as_array).and_then(|l| l.first()) {
            node.cores = int_attr(cpu, "cores");
        }
        if let Some(mem) = a
            .get("memory")
            .and_then(Value::as_array)
            .and_then(|l| l.first())
        {
            node.memory_mb = int_attr(mem, "dedicated");
        }

        // First non-loopback IPv4 across all interfaces
        if let Some(addr_lists) = a.get("ipv4_addresses").and_then(Value::as_array) {
            'outer: for list in addr_lists {
                let Some(addrs) = list.as_array() else { continue };
                for addr in addrs {
                    if let Some(s) = addr.as_str() {
                        if !s.is_empty() && s != "127.0.0.1" {
                            node.ip = s.to_string();
                            break 'outer;
                        }
                    }
                }
            }
        }

        if let Some(disks) = a.get("disk").and_then(Value::as_array) {
            for (i, disk) in disks.iter().enumerate() {
                let size = int_attr(disk, "size");
                match i {
                    0 => node.os_disk_gb = size,
                    1 => node.data_disk_gb = size,
                    _ => {}
                }
            }
        }

        nodes.push(node);
    }
    nodes
}

/// Infer a node role from the resource and VM names.
pub fn infer_role(resource_name: &str, vm_name: &str) -> String {
    let lower = format!("{resource_name} {vm_name}").to_lowercase();
    if lower.contains("controlplane")
        || lower.contains("control-plane")
        || lower.contains("master")
        || lower.contains("-cp-")
    {
        "controlplane".to_string()
    } else {
        "worker".to_string()
    }
}

fn str_attr(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int_attr(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
