//! Docker compose target.
//!
//! Every node (AS routers and hosts, exchange route servers) becomes one
//! directory keyed by its identifier, holding:
//!
//! - `Dockerfile`: base image, packages, build commands, copied files
//! - `start.sh`: renames interfaces after the networks they attach to,
//!   brings up the loopback, runs the node's start commands, then idles
//! - `node.json`: node metadata, including hosted virtual nodes
//! - `files/`: every file layers and services placed on the node
//!
//! Node directories are independent and are written in parallel. The
//! compose manifest is written last, once every directory it references
//! is complete.

use super::compose::{ComposeFile, ComposeNetwork, ComposeService, Ipam, IpamConfig, ServiceNetwork};
use super::state::{create_state_directory, StateDirPolicy};
use super::{CompileOptions, Compiler};
use crate::error::{EmuError, Result};
use crate::registry::{HostedVirtualNode, NetworkId, Node, NodeRole, Registry};
use crate::utils::{sanitize_identifier, write_executable};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Component, Path};

pub const MANIFEST_FILE: &str = "docker-compose.yml";
pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:20.04";

#[derive(Debug, Clone)]
pub struct Docker {
    base_image: String,
}

impl Default for Docker {
    fn default() -> Self {
        Docker {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
        }
    }
}

/// Contents of `node.json`.
#[derive(Debug, Serialize)]
struct NodeMetadata<'a> {
    identifier: String,
    asn: u32,
    name: &'a str,
    role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    interfaces: Vec<InterfaceMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loopback: Option<String>,
    virtual_nodes: &'a BTreeMap<String, HostedVirtualNode>,
}

#[derive(Debug, Serialize)]
struct InterfaceMetadata {
    name: String,
    network: String,
    address: Option<String>,
}

/// Compose network key of a registry network.
pub fn network_key(id: &NetworkId) -> String {
    match id {
        NetworkId::Local { asn, name } => format!("net_{}_{}", asn, sanitize_identifier(name)),
        NetworkId::Exchange(id) => format!("ix{}", id),
    }
}

impl Docker {
    pub fn new(base_image: impl Into<String>) -> Self {
        Docker {
            base_image: base_image.into(),
        }
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    fn dockerfile(&self, node: &Node) -> String {
        let mut packages: BTreeSet<&str> = node.software().iter().map(String::as_str).collect();
        packages.insert("iproute2");

        let mut dockerfile = format!(
            "FROM {}\nARG DEBIAN_FRONTEND=noninteractive\nRUN apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*\n",
            self.base_image,
            packages.into_iter().collect::<Vec<_>>().join(" ")
        );
        for command in node.build_commands() {
            dockerfile.push_str(&format!("RUN {}\n", command));
        }
        if !node.files().is_empty() {
            dockerfile.push_str("COPY files/ /\n");
        }
        dockerfile.push_str("COPY start.sh /start.sh\nCMD [\"/start.sh\"]\n");
        dockerfile
    }

    fn compose_service(&self, node: &Node) -> ComposeService {
        let identifier = node.identifier();
        let mut labels = BTreeMap::new();
        labels.insert("asemu.asn".to_string(), node.asn().to_string());
        labels.insert("asemu.name".to_string(), node.name().to_string());
        labels.insert("asemu.role".to_string(), node.role().to_string());
        if let Some(display_name) = node.display_name() {
            labels.insert("asemu.display_name".to_string(), display_name.to_string());
        }
        if !node.virtual_nodes().is_empty() {
            labels.insert(
                "asemu.virtual_nodes".to_string(),
                node.virtual_nodes().keys().cloned().collect::<Vec<_>>().join(","),
            );
        }

        ComposeService {
            build: format!("./{}", identifier),
            container_name: identifier,
            cap_add: vec!["ALL".to_string()],
            privileged: true,
            sysctls: [
                ("net.ipv4.ip_forward", "1"),
                ("net.ipv4.conf.all.rp_filter", "0"),
                ("net.ipv4.conf.default.rp_filter", "0"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            networks: node
                .interfaces()
                .iter()
                .filter_map(|iface| {
                    iface.address.map(|addr| {
                        (
                            network_key(&iface.network),
                            ServiceNetwork {
                                ipv4_address: addr.to_string(),
                            },
                        )
                    })
                })
                .collect(),
            ports: node
                .ports()
                .iter()
                .map(|port| format!("{}:{}", port.host, port.container))
                .collect(),
            volumes: node
                .volumes()
                .iter()
                .map(|volume| format!("./{}:{}", volume.host_subpath, volume.container_path))
                .collect(),
            labels,
        }
    }

    /// Build the whole manifest; fails on any network without a prefix.
    pub fn manifest(&self, registry: &Registry) -> Result<ComposeFile> {
        let services = registry
            .nodes()
            .map(|node| (node.identifier(), self.compose_service(node)))
            .collect();

        let mut networks = BTreeMap::new();
        for network in registry.networks() {
            let prefix = network.prefix().ok_or_else(|| {
                EmuError::InvalidTopology(format!("network {} has no prefix; was it rendered?", network.id()))
            })?;
            let mut labels = BTreeMap::new();
            labels.insert("asemu.network".to_string(), network.id().to_string());
            if let Some(display_name) = network.display_name() {
                labels.insert("asemu.display_name".to_string(), display_name.to_string());
            }
            networks.insert(
                network_key(network.id()),
                ComposeNetwork {
                    driver: "bridge".to_string(),
                    ipam: Ipam {
                        config: vec![IpamConfig {
                            subnet: prefix.to_string(),
                        }],
                    },
                    labels,
                },
            );
        }

        Ok(ComposeFile {
            version: "3.4".to_string(),
            services,
            networks,
        })
    }

    fn write_node(&self, output: &Path, node: &Node) -> Result<()> {
        let dir = output.join(node.identifier());
        std::fs::create_dir_all(&dir).map_err(|e| EmuError::artifact(&dir, e))?;

        let dockerfile = dir.join("Dockerfile");
        std::fs::write(&dockerfile, self.dockerfile(node)).map_err(|e| EmuError::artifact(&dockerfile, e))?;
        write_executable(&dir.join("start.sh"), &start_script(node))?;

        let metadata = NodeMetadata {
            identifier: node.identifier(),
            asn: node.asn(),
            name: node.name(),
            role: node.role(),
            display_name: node.display_name(),
            interfaces: node
                .interfaces()
                .iter()
                .map(|iface| InterfaceMetadata {
                    name: iface.network.interface_name(),
                    network: iface.network.to_string(),
                    address: iface.address.map(|addr| addr.to_string()),
                })
                .collect(),
            loopback: node.loopback().map(|addr| addr.to_string()),
            virtual_nodes: node.virtual_nodes(),
        };
        let json_path = dir.join("node.json");
        std::fs::write(&json_path, serde_json::to_string_pretty(&metadata)?)
            .map_err(|e| EmuError::artifact(&json_path, e))?;

        for (path, file) in node.files() {
            let relative = Path::new(path.trim_start_matches('/'));
            if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
                return Err(EmuError::InvalidTopology(format!(
                    "file '{}' on {} escapes the container root",
                    path,
                    node.identifier()
                )));
            }
            let target = dir.join("files").join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EmuError::artifact(parent, e))?;
            }
            if file.executable {
                write_executable(&target, &file.content)?;
            } else {
                std::fs::write(&target, &file.content).map_err(|e| EmuError::artifact(&target, e))?;
            }
        }

        log::debug!("Wrote artifacts for {} to {}", node.identifier(), dir.display());
        Ok(())
    }
}

fn start_script(node: &Node) -> String {
    let mut script = String::from(
        "#!/bin/bash\n\
         rename_iface() {\n    \
             local current\n    \
             current=$(ip -o -4 addr show | awk -v addr=\"$1/\" 'index($4, addr) == 1 { print $2 }' | cut -d@ -f1)\n    \
             if [ -n \"$current\" ] && [ \"$current\" != \"$2\" ]; then\n        \
                 ip link set \"$current\" down\n        \
                 ip link set \"$current\" name \"$2\"\n        \
                 ip link set \"$2\" up\n    \
             fi\n\
         }\n",
    );
    for iface in node.interfaces() {
        if let Some(addr) = iface.address {
            script.push_str(&format!("rename_iface {} {}\n", addr, iface.network.interface_name()));
        }
    }
    if let Some(loopback) = node.loopback() {
        script.push_str(&format!(
            "ip link add dummy0 type dummy\nip addr add {}/32 dev dummy0\nip link set dummy0 up\n",
            loopback
        ));
    }
    for command in node.start_commands() {
        if command.fork {
            script.push_str(&format!("{} &\n", command.command));
        } else {
            script.push_str(&format!("{}\n", command.command));
        }
    }
    script.push_str(&format!("echo \"ready: {}\"\ntail -f /dev/null\n", node.identifier()));
    script
}

/// Top-level directory names that hold state volumes.
fn state_roots(registry: &Registry) -> BTreeSet<String> {
    registry
        .nodes()
        .flat_map(|node| node.volumes())
        .filter_map(|volume| {
            Path::new(&volume.host_subpath)
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
        })
        .collect()
}

fn prepare_output_dir(output: &Path, options: CompileOptions, keep: &BTreeSet<String>) -> Result<()> {
    if output.exists() {
        if !options.override_existing {
            return Err(EmuError::artifact(
                output,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "output directory already exists; enable override to replace it",
                ),
            ));
        }

        log::warn!("Overriding existing output directory {}", output.display());
        let entries = std::fs::read_dir(output).map_err(|e| EmuError::artifact(output, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EmuError::artifact(output, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if options.state_policy == StateDirPolicy::Reuse && keep.contains(&name) {
                log::info!("Keeping state directory {}", path.display());
                continue;
            }
            let file_type = entry.file_type().map_err(|e| EmuError::artifact(&path, e))?;
            let removed = if file_type.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed.map_err(|e| EmuError::artifact(&path, e))?;
        }
    }
    std::fs::create_dir_all(output).map_err(|e| EmuError::artifact(output, e))
}

impl Compiler for Docker {
    fn name(&self) -> &str {
        "Docker"
    }

    fn compile(&self, registry: &Registry, output: &Path, options: CompileOptions) -> Result<()> {
        let manifest = self.manifest(registry)?;
        prepare_output_dir(output, options, &state_roots(registry))?;

        let nodes: Vec<&Node> = registry.nodes().collect();
        log::info!("Writing artifacts for {} nodes to {}", nodes.len(), output.display());
        nodes
            .par_iter()
            .try_for_each(|node| self.write_node(output, node))?;

        for node in &nodes {
            for volume in node.volumes() {
                create_state_directory(output, &volume.host_subpath, options.state_policy)?;
            }
        }

        let manifest_path = output.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, serde_yaml::to_string(&manifest)?)
            .map_err(|e| EmuError::artifact(&manifest_path, e))?;
        log::info!("Wrote compose manifest {}", manifest_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Base, Layer, RenderContext, Routing};
    use tempfile::TempDir;

    fn rendered() -> Registry {
        let mut registry = Registry::new();
        registry.create_internet_exchange(100).unwrap();
        let asys = registry.create_autonomous_system(2).unwrap();
        asys.create_network("net0").unwrap();
        asys.create_router("router0")
            .unwrap()
            .join_network("net0")
            .join_exchange(100);
        asys.create_host("host0")
            .unwrap()
            .join_network("net0")
            .add_state_volume("eth-states/1", "/root/.ethereum")
            .add_port_forwarding(8545, 8545);
        Base.materialize(&mut RenderContext::new(&mut registry, &[])).unwrap();
        Routing.materialize(&mut RenderContext::new(&mut registry, &[])).unwrap();
        registry
    }

    #[test]
    fn test_layout_and_manifest() {
        let registry = rendered();
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("output");
        Docker::default()
            .compile(&registry, &output, CompileOptions::default())
            .unwrap();

        for dir in ["as2_router0", "as2_host0", "ix100_rs"] {
            assert!(output.join(dir).join("Dockerfile").exists(), "{dir}");
            assert!(output.join(dir).join("start.sh").exists(), "{dir}");
            assert!(output.join(dir).join("node.json").exists(), "{dir}");
        }
        assert!(output.join("as2_router0/files/etc/bird/bird.conf").exists());
        assert!(output.join("eth-states/1").is_dir());

        let manifest = std::fs::read_to_string(output.join(MANIFEST_FILE)).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&manifest).unwrap();
        assert_eq!(parsed["services"].as_mapping().unwrap().len(), 3);
        assert_eq!(parsed["networks"].as_mapping().unwrap().len(), 2);
        assert_eq!(
            parsed["services"]["as2_router0"]["networks"]["ix100"]["ipv4_address"],
            serde_yaml::Value::from("10.0.100.2")
        );
        assert_eq!(
            parsed["networks"]["net_2_net0"]["ipam"]["config"][0]["subnet"],
            serde_yaml::Value::from("10.2.0.0/24")
        );
        assert_eq!(
            parsed["services"]["as2_host0"]["ports"][0],
            serde_yaml::Value::from("8545:8545")
        );
    }

    #[test]
    fn test_start_script_renames_interfaces() {
        let registry = rendered();
        let router = registry
            .node(&crate::registry::NodeRef::as_node(2, "router0"))
            .unwrap();
        let script = start_script(router);
        assert!(script.contains("rename_iface 10.2.0.254 net0"));
        assert!(script.contains("rename_iface 10.0.100.2 ix100"));
        assert!(script.contains("ip addr add 172.16.2.1/32 dev dummy0"));
        assert!(script.contains("bird -d &"));
        assert!(script.ends_with("tail -f /dev/null\n"));
    }

    #[test]
    fn test_existing_output_requires_override() {
        let registry = rendered();
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("output");
        let docker = Docker::default();
        docker.compile(&registry, &output, CompileOptions::default()).unwrap();

        let err = docker
            .compile(&registry, &output, CompileOptions::default())
            .unwrap_err();
        match err {
            EmuError::ArtifactWrite { path, source } => {
                assert_eq!(path, output);
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_override_replaces_artifacts_and_keeps_state() {
        let registry = rendered();
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("output");
        let docker = Docker::default();
        docker.compile(&registry, &output, CompileOptions::default()).unwrap();
        std::fs::write(output.join("stale.txt"), "old").unwrap();
        std::fs::write(output.join("eth-states/1/chaindata"), "blocks").unwrap();

        docker.compile(&registry, &output, CompileOptions::overriding()).unwrap();
        assert!(!output.join("stale.txt").exists());
        assert!(output.join("eth-states/1/chaindata").exists());
        assert!(output.join(MANIFEST_FILE).exists());

        let recreate = CompileOptions {
            override_existing: true,
            state_policy: StateDirPolicy::Recreate,
        };
        docker.compile(&registry, &output, recreate).unwrap();
        assert!(!output.join("eth-states/1/chaindata").exists());
        assert!(output.join("eth-states/1").is_dir());
    }

    #[test]
    fn test_unrendered_registry_is_rejected_before_writing() {
        let mut registry = Registry::new();
        registry.create_autonomous_system(3).unwrap().create_network("net0").unwrap();
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("output");
        assert!(Docker::default()
            .compile(&registry, &output, CompileOptions::default())
            .is_err());
        assert!(!output.exists());
    }
}
