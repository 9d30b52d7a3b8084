//! # Services
//!
//! A service is a layer that declares virtual nodes. Rendering treats it
//! like any other layer (its [`Layer::materialize`] runs in dependency
//! order), and once bindings are resolved the emulator calls
//! [`Service::configure`] so the service can write software, files, start
//! commands and state volumes onto the nodes hosting each virtual node.
//!
//! ## Virtual node metadata
//!
//! Cosmetic data that belongs to the placement rather than to the service
//! (display name, port forwards, free-form attributes) lives in
//! [`VirtualNode`], held by the emulator and copied onto the hosting node
//! during rendering.
//!
//! [`Layer::materialize`]: crate::layer::Layer::materialize

pub mod ethereum;

use crate::binding::BoundNodes;
use crate::error::Result;
use crate::registry::{NodeRef, PortForward, Registry};
use serde::Serialize;
use std::collections::BTreeMap;

pub use ethereum::{
    AccountProvider, AccountRequest, ConsensusMechanism, EthAccount, EthereumServer, EthereumService,
};

pub trait Service {
    fn service_name(&self) -> &str;

    /// Names of every virtual node this service declares, in install order.
    fn virtual_nodes(&self) -> Vec<String>;

    /// Opaque per-virtual-node configuration, recorded on the hosting node.
    fn virtual_node_config(&self, name: &str) -> Option<serde_json::Value>;

    /// Write the service onto the nodes bound to its virtual nodes.
    fn configure(&self, ctx: &mut ServiceContext<'_>) -> Result<()>;
}

/// What a service sees while it configures its bound nodes.
pub struct ServiceContext<'a> {
    pub registry: &'a mut Registry,
    bindings: &'a BoundNodes,
    virtual_nodes: &'a BTreeMap<String, VirtualNode>,
}

impl<'a> ServiceContext<'a> {
    pub fn new(
        registry: &'a mut Registry,
        bindings: &'a BoundNodes,
        virtual_nodes: &'a BTreeMap<String, VirtualNode>,
    ) -> Self {
        ServiceContext {
            registry,
            bindings,
            virtual_nodes,
        }
    }

    /// Nodes hosting `virtual_node`; empty when it is unbound.
    pub fn hosts_of(&self, virtual_node: &str) -> &[NodeRef] {
        self.bindings
            .get(virtual_node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn virtual_node(&self, name: &str) -> Option<&VirtualNode> {
        self.virtual_nodes.get(name)
    }
}

/// Placement metadata for one virtual node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VirtualNode {
    name: String,
    display_name: Option<String>,
    ports: Vec<PortForward>,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl VirtualNode {
    pub fn new(name: impl Into<String>) -> Self {
        VirtualNode {
            name: name.into(),
            ..VirtualNode::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn ports(&self) -> &[PortForward] {
        &self.ports
    }

    pub fn add_port_forwarding(&mut self, host: u16, container: u16) -> &mut Self {
        self.ports.push(PortForward { host, container });
        self
    }

    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) -> &mut Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
