//! Registry type definitions.
//!
//! This module contains the data held by the registry: autonomous systems,
//! internet exchanges, networks, nodes and the per-node artifacts that
//! layers and services attach to them before compilation.

use crate::error::{EmuError, Result};
use crate::ip::{AddressPool, Ipv4Prefix};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

// ============================================================================
// Identifiers
// ============================================================================

/// Role of a node inside the emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Router,
    Host,
    /// Exchange route server; owned by an internet exchange, not by an AS
    RouteServer,
}

impl NodeRole {
    /// Routers and route servers draw addresses from the top of a pool.
    pub fn is_router(&self) -> bool {
        matches!(self, NodeRole::Router | NodeRole::RouteServer)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Router => "router",
            NodeRole::Host => "host",
            NodeRole::RouteServer => "route_server",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Internal network of one autonomous system
    Local,
    /// Shared LAN of an internet exchange
    Peering,
}

/// Stable key of a network across the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NetworkId {
    Local { asn: u32, name: String },
    Exchange(u32),
}

impl NetworkId {
    pub fn local(asn: u32, name: impl Into<String>) -> Self {
        NetworkId::Local {
            asn,
            name: name.into(),
        }
    }

    pub fn exchange(id: u32) -> Self {
        NetworkId::Exchange(id)
    }

    /// Interface name used inside containers attached to this network.
    pub fn interface_name(&self) -> String {
        match self {
            NetworkId::Local { name, .. } => name.clone(),
            NetworkId::Exchange(id) => format!("ix{}", id),
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkId::Local { asn, name } => write!(f, "AS{}/{}", asn, name),
            NetworkId::Exchange(id) => write!(f, "IX{}", id),
        }
    }
}

/// Stable key of a node across the whole registry.
///
/// The `Display` form (`as{asn}_{name}`, `ix{id}_rs`) is the human-readable
/// identifier used for artifact directories and compose services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeRef {
    As { asn: u32, name: String },
    RouteServer { exchange: u32 },
}

impl NodeRef {
    pub fn as_node(asn: u32, name: impl Into<String>) -> Self {
        NodeRef::As {
            asn,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::As { asn, name } => write!(f, "as{}_{}", asn, name),
            NodeRef::RouteServer { exchange } => write!(f, "ix{}_rs", exchange),
        }
    }
}

// ============================================================================
// Networks
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    id: NetworkId,
    network_type: NetworkType,
    prefix: Option<Ipv4Prefix>,
    /// Cosmetic only; never used as a key
    display_name: Option<String>,
    pool: Option<AddressPool>,
}

impl Network {
    pub(crate) fn new(id: NetworkId, network_type: NetworkType) -> Self {
        Network {
            id,
            network_type,
            prefix: None,
            display_name: None,
            pool: None,
        }
    }

    pub fn id(&self) -> &NetworkId {
        &self.id
    }

    pub fn name(&self) -> String {
        self.id.interface_name()
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    /// Explicit or base-assigned prefix; `None` before rendering unless set.
    pub fn prefix(&self) -> Option<Ipv4Prefix> {
        self.prefix
    }

    pub fn set_prefix(&mut self, prefix: Ipv4Prefix) -> &mut Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn pool(&self) -> Option<&AddressPool> {
        self.pool.as_ref()
    }

    pub(crate) fn pool_mut(&mut self) -> Option<&mut AddressPool> {
        self.pool.as_mut()
    }

    /// Fix the prefix and open an empty address pool for it.
    pub(crate) fn open_pool(&mut self, prefix: Ipv4Prefix) {
        self.prefix = Some(prefix);
        self.pool = Some(AddressPool::new(prefix));
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub network: NetworkId,
    /// Assigned by the base layer
    pub address: Option<Ipv4Addr>,
}

/// Host-to-container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub host: u16,
    pub container: u16,
}

/// Directory under the output tree mounted into the container to keep
/// service state across container rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateVolume {
    /// Relative to the compile output directory
    pub host_subpath: String,
    pub container_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    pub command: String,
    /// Run in the background
    pub fork: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFile {
    pub content: String,
    pub executable: bool,
}

/// A virtual node bound onto this physical node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostedVirtualNode {
    pub service: String,
    /// Opaque service-specific configuration
    pub config: serde_json::Value,
    /// Opaque caller-supplied attributes
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    name: String,
    asn: u32,
    role: NodeRole,
    interfaces: Vec<NetworkInterface>,
    loopback: Option<Ipv4Addr>,
    display_name: Option<String>,
    software: BTreeSet<String>,
    build_commands: Vec<String>,
    files: BTreeMap<String, NodeFile>,
    start_commands: Vec<StartCommand>,
    ports: Vec<PortForward>,
    volumes: Vec<StateVolume>,
    virtual_nodes: BTreeMap<String, HostedVirtualNode>,
}

impl Node {
    pub(crate) fn new(name: impl Into<String>, asn: u32, role: NodeRole) -> Self {
        Node {
            name: name.into(),
            asn,
            role,
            interfaces: Vec::new(),
            loopback: None,
            display_name: None,
            software: BTreeSet::new(),
            build_commands: Vec::new(),
            files: BTreeMap::new(),
            start_commands: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            virtual_nodes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn asn(&self) -> u32 {
        self.asn
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn node_ref(&self) -> NodeRef {
        match self.role {
            NodeRole::RouteServer => NodeRef::RouteServer { exchange: self.asn },
            _ => NodeRef::as_node(self.asn, self.name.clone()),
        }
    }

    pub fn identifier(&self) -> String {
        self.node_ref().to_string()
    }

    /// Attach to a local network of the node's own AS.
    pub fn join_network(&mut self, name: impl Into<String>) -> &mut Self {
        let network = NetworkId::local(self.asn, name);
        self.join(network)
    }

    /// Attach to the peering LAN of an internet exchange.
    pub fn join_exchange(&mut self, id: u32) -> &mut Self {
        self.join(NetworkId::exchange(id))
    }

    fn join(&mut self, network: NetworkId) -> &mut Self {
        if !self.interfaces.iter().any(|iface| iface.network == network) {
            self.interfaces.push(NetworkInterface {
                network,
                address: None,
            });
        }
        self
    }

    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.interfaces
    }

    pub(crate) fn interfaces_mut(&mut self) -> &mut [NetworkInterface] {
        &mut self.interfaces
    }

    pub fn address_on(&self, network: &NetworkId) -> Option<Ipv4Addr> {
        self.interfaces
            .iter()
            .find(|iface| &iface.network == network)
            .and_then(|iface| iface.address)
    }

    /// Address of the first attached network.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.interfaces.iter().find_map(|iface| iface.address)
    }

    pub fn loopback(&self) -> Option<Ipv4Addr> {
        self.loopback
    }

    pub(crate) fn set_loopback(&mut self, addr: Ipv4Addr) {
        self.loopback = Some(addr);
    }

    /// Loopback if present, otherwise the first interface address.
    pub fn router_id(&self) -> Option<Ipv4Addr> {
        self.loopback.or_else(|| self.primary_address())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn software(&self) -> &BTreeSet<String> {
        &self.software
    }

    pub fn add_software(&mut self, package: impl Into<String>) -> &mut Self {
        self.software.insert(package.into());
        self
    }

    pub fn build_commands(&self) -> &[String] {
        &self.build_commands
    }

    pub fn add_build_command(&mut self, command: impl Into<String>) -> &mut Self {
        let command = command.into();
        if !self.build_commands.contains(&command) {
            self.build_commands.push(command);
        }
        self
    }

    pub fn files(&self) -> &BTreeMap<String, NodeFile> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&NodeFile> {
        self.files.get(path)
    }

    /// Create or replace a file inside the node's container image.
    pub fn set_file(&mut self, path: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.files.insert(
            path.into(),
            NodeFile {
                content: content.into(),
                executable: false,
            },
        );
        self
    }

    pub fn set_executable(&mut self, path: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.files.insert(
            path.into(),
            NodeFile {
                content: content.into(),
                executable: true,
            },
        );
        self
    }

    /// Append to a file, creating it when missing.
    pub fn append_file(&mut self, path: impl Into<String>, content: &str) -> &mut Self {
        let file = self.files.entry(path.into()).or_insert_with(|| NodeFile {
            content: String::new(),
            executable: false,
        });
        file.content.push_str(content);
        self
    }

    pub fn start_commands(&self) -> &[StartCommand] {
        &self.start_commands
    }

    pub fn append_start_command(&mut self, command: impl Into<String>, fork: bool) -> &mut Self {
        self.start_commands.push(StartCommand {
            command: command.into(),
            fork,
        });
        self
    }

    pub fn ports(&self) -> &[PortForward] {
        &self.ports
    }

    pub fn add_port_forwarding(&mut self, host: u16, container: u16) -> &mut Self {
        let forward = PortForward { host, container };
        if !self.ports.contains(&forward) {
            self.ports.push(forward);
        }
        self
    }

    pub fn volumes(&self) -> &[StateVolume] {
        &self.volumes
    }

    pub fn add_state_volume(&mut self, host_subpath: impl Into<String>, container_path: impl Into<String>) -> &mut Self {
        let volume = StateVolume {
            host_subpath: host_subpath.into(),
            container_path: container_path.into(),
        };
        if !self.volumes.contains(&volume) {
            self.volumes.push(volume);
        }
        self
    }

    pub fn virtual_nodes(&self) -> &BTreeMap<String, HostedVirtualNode> {
        &self.virtual_nodes
    }

    pub(crate) fn host_virtual_node(&mut self, name: impl Into<String>, hosted: HostedVirtualNode) {
        self.virtual_nodes.insert(name.into(), hosted);
    }
}

// ============================================================================
// Autonomous systems and exchanges
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AutonomousSystem {
    asn: u32,
    /// Creation order matters: it drives the default address plan
    networks: Vec<Network>,
    nodes: Vec<Node>,
}

impl AutonomousSystem {
    pub(crate) fn new(asn: u32) -> Self {
        AutonomousSystem {
            asn,
            networks: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn asn(&self) -> u32 {
        self.asn
    }

    pub fn create_network(&mut self, name: impl Into<String>) -> Result<&mut Network> {
        let name = name.into();
        if self.network(&name).is_some() {
            return Err(EmuError::duplicate("network", NetworkId::local(self.asn, name)));
        }
        let index = self.networks.len();
        self.networks
            .push(Network::new(NetworkId::local(self.asn, name), NetworkType::Local));
        Ok(&mut self.networks[index])
    }

    pub fn create_router(&mut self, name: impl Into<String>) -> Result<&mut Node> {
        self.create_node(name.into(), NodeRole::Router)
    }

    pub fn create_host(&mut self, name: impl Into<String>) -> Result<&mut Node> {
        self.create_node(name.into(), NodeRole::Host)
    }

    fn create_node(&mut self, name: String, role: NodeRole) -> Result<&mut Node> {
        if self.node(&name).is_some() {
            return Err(EmuError::duplicate("node", NodeRef::as_node(self.asn, name)));
        }
        let index = self.nodes.len();
        self.nodes.push(Node::new(name, self.asn, role));
        Ok(&mut self.nodes[index])
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id.interface_name() == name)
    }

    pub fn network_mut(&mut self, name: &str) -> Option<&mut Network> {
        self.networks.iter_mut().find(|n| n.id.interface_name() == name)
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn routers(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter(|n| n.role == NodeRole::Router)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter(|n| n.role == NodeRole::Host)
    }

    /// Disjoint mutable views used while wiring addresses.
    pub(crate) fn split_mut(&mut self) -> (&mut [Network], &mut [Node]) {
        (&mut self.networks, &mut self.nodes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternetExchange {
    id: u32,
    lan: Network,
    route_server: Node,
}

impl InternetExchange {
    pub(crate) fn new(id: u32) -> Self {
        let mut route_server = Node::new("rs", id, NodeRole::RouteServer);
        route_server.join_exchange(id);
        InternetExchange {
            id,
            lan: Network::new(NetworkId::exchange(id), NetworkType::Peering),
            route_server,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peering_lan(&self) -> &Network {
        &self.lan
    }

    pub fn peering_lan_mut(&mut self) -> &mut Network {
        &mut self.lan
    }

    pub fn route_server(&self) -> &Node {
        &self.route_server
    }

    pub fn route_server_mut(&mut self) -> &mut Node {
        &mut self.route_server
    }

    pub(crate) fn split_mut(&mut self) -> (&mut Network, &mut Node) {
        (&mut self.lan, &mut self.route_server)
    }
}
