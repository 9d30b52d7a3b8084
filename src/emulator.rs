//! # Emulator
//!
//! The composition root of one emulation. An [`Emulator`] owns the
//! [`Registry`], the installed layers, the bindings and the virtual node
//! metadata, and drives them through a one-shot lifecycle:
//!
//! ```text
//! Unrendered --render()--> Rendering --+--> Rendered --compile()--> artifacts
//!                                      |
//!                                      +--> Failed
//! ```
//!
//! ## Rendering
//!
//! 1. resolve the layer order (stable topological sort)
//! 2. check that every binding names a declared virtual node
//! 3. materialize each layer once, in order; a failure is reported with
//!    the layer name and leaves earlier mutations in place
//! 4. apply bindings; every declared virtual node must end up bound
//! 5. let each service configure the nodes hosting its virtual nodes
//!
//! After rendering the emulator is frozen: layers, bindings and the
//! registry can no longer be changed.
//!
//! ## Merging
//!
//! [`Emulator::merge`] builds a new, unrendered emulator from two
//! unrendered ones. Everything is validated before anything is copied, so
//! a failed merge leaves both inputs untouched.

use crate::binding::{apply_binding, Binding, BoundNodes};
use crate::compiler::{CompileOptions, Compiler};
use crate::error::{Conflict, EmuError, Result};
use crate::layer::{resolve_order, Layer, RenderContext};
use crate::registry::{HostedVirtualNode, NodeRef, Registry};
use crate::service::{ServiceContext, VirtualNode};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Unrendered,
    Rendering,
    Rendered,
    Failed,
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderState::Unrendered => "unrendered",
            RenderState::Rendering => "rendering",
            RenderState::Rendered => "rendered",
            RenderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct Emulator {
    registry: Registry,
    layers: Vec<Rc<dyn Layer>>,
    bindings: Vec<Binding>,
    virtual_nodes: BTreeMap<String, VirtualNode>,
    bound: BoundNodes,
    state: RenderState,
    applied_order: Vec<String>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Emulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emulator")
            .field("state", &self.state)
            .field("layers", &self.layer_names())
            .field("bindings", &self.bindings.len())
            .field("autonomous_systems", &self.registry.asns())
            .field("exchanges", &self.registry.exchange_ids())
            .finish()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Emulator {
            registry: Registry::new(),
            layers: Vec::new(),
            bindings: Vec::new(),
            virtual_nodes: BTreeMap::new(),
            bound: BoundNodes::new(),
            state: RenderState::Unrendered,
            applied_order: Vec::new(),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> Result<&mut Registry> {
        self.ensure_mutable("modify the registry")?;
        Ok(&mut self.registry)
    }

    fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            RenderState::Unrendered => Ok(()),
            RenderState::Rendered => Err(EmuError::FrozenState { operation }),
            state => Err(EmuError::InvalidState { operation, state }),
        }
    }

    /// Install a layer. Names are unique per emulator.
    pub fn add_layer<L: Layer + 'static>(&mut self, layer: L) -> Result<&mut Self> {
        self.install_layer(Rc::new(layer))
    }

    fn install_layer(&mut self, layer: Rc<dyn Layer>) -> Result<&mut Self> {
        self.ensure_mutable("install a layer")?;
        if self.layer(layer.name()).is_some() {
            return Err(EmuError::duplicate("layer", layer.name()));
        }
        log::debug!("Installed layer {}", layer.name());
        self.layers.push(layer);
        Ok(self)
    }

    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        self.layers
            .iter()
            .find(|layer| layer.name() == name)
            .map(|layer| layer.as_ref())
    }

    /// Installed layer of a concrete type, by name.
    pub fn layer_as<L: Layer>(&self, name: &str) -> Option<&L> {
        self.layer(name).and_then(|layer| layer.as_any().downcast_ref::<L>())
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn add_binding(&mut self, binding: Binding) -> Result<&mut Self> {
        self.ensure_mutable("add a binding")?;
        self.bindings.push(binding);
        Ok(self)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Placement metadata of a virtual node, created on first access.
    pub fn virtual_node_mut(&mut self, name: &str) -> Result<&mut VirtualNode> {
        self.ensure_mutable("change virtual node metadata")?;
        Ok(self
            .virtual_nodes
            .entry(name.to_string())
            .or_insert_with(|| VirtualNode::new(name)))
    }

    pub fn virtual_node(&self, name: &str) -> Option<&VirtualNode> {
        self.virtual_nodes.get(name)
    }

    /// Layer names in the order they were materialized.
    pub fn applied_order(&self) -> &[String] {
        &self.applied_order
    }

    /// Nodes hosting each virtual node after rendering.
    pub fn bound_nodes(&self) -> &BoundNodes {
        &self.bound
    }

    /// Virtual node name -> name of the service declaring it.
    fn declared_virtual_nodes(&self) -> Result<BTreeMap<String, String>> {
        let mut declared = BTreeMap::new();
        for layer in &self.layers {
            let Some(service) = layer.as_service() else { continue };
            for vnode in service.virtual_nodes() {
                if declared.insert(vnode.clone(), service.service_name().to_string()).is_some() {
                    return Err(EmuError::duplicate("virtual node", vnode));
                }
            }
        }
        Ok(declared)
    }

    /// Resolve the emulation. One-shot: only an unrendered emulator renders.
    pub fn render(&mut self) -> Result<()> {
        if self.state != RenderState::Unrendered {
            return Err(EmuError::InvalidState {
                operation: "render",
                state: self.state,
            });
        }
        self.state = RenderState::Rendering;
        log::info!("Rendering emulation with {} layers", self.layers.len());

        match self.render_inner() {
            Ok(()) => {
                self.state = RenderState::Rendered;
                log::info!(
                    "Rendered {} nodes; layer order: {}",
                    self.registry.node_count(),
                    self.applied_order.join(", ")
                );
                Ok(())
            }
            Err(err) => {
                self.state = RenderState::Failed;
                log::warn!("Render failed: {}", err);
                Err(err)
            }
        }
    }

    fn render_inner(&mut self) -> Result<()> {
        let order = resolve_order(&self.layers)?;

        let declared = self.declared_virtual_nodes()?;
        for name in self
            .bindings
            .iter()
            .map(Binding::virtual_node)
            .chain(self.virtual_nodes.keys().map(String::as_str))
        {
            if !declared.contains_key(name) {
                return Err(EmuError::UnknownVirtualNode {
                    virtual_node: name.to_string(),
                });
            }
        }

        let mut applied: Vec<Rc<dyn Layer>> = Vec::with_capacity(order.len());
        for index in order {
            let layer = Rc::clone(&self.layers[index]);
            log::info!("Materializing layer {}", layer.name());
            {
                let mut ctx = RenderContext::new(&mut self.registry, &applied);
                layer.materialize(&mut ctx).map_err(|source| EmuError::LayerFailed {
                    layer: layer.name().to_string(),
                    source: Box::new(source),
                })?;
            }
            self.applied_order.push(layer.name().to_string());
            applied.push(layer);
        }

        for binding in &self.bindings {
            apply_binding(&self.registry, binding, &mut self.bound)?;
        }
        for vnode in declared.keys() {
            if !self.bound.contains_key(vnode) {
                return Err(EmuError::BindingUnsatisfied {
                    virtual_node: vnode.clone(),
                    filter: "no binding".to_string(),
                });
            }
        }

        for layer in &applied {
            let Some(service) = layer.as_service() else { continue };
            self.host_virtual_nodes(layer.name(), service)?;
            let mut ctx = ServiceContext::new(&mut self.registry, &self.bound, &self.virtual_nodes);
            service.configure(&mut ctx).map_err(|source| EmuError::LayerFailed {
                layer: layer.name().to_string(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Record each of a service's virtual nodes on its hosting nodes.
    fn host_virtual_nodes(&mut self, layer: &str, service: &dyn crate::service::Service) -> Result<()> {
        for vnode in service.virtual_nodes() {
            let hosts: Vec<NodeRef> = self.bound.get(&vnode).cloned().unwrap_or_default();
            let metadata = self.virtual_nodes.get(&vnode);
            for host in &hosts {
                let node = self.registry.node_mut(host)?;
                node.host_virtual_node(
                    vnode.clone(),
                    HostedVirtualNode {
                        service: layer.to_string(),
                        config: service.virtual_node_config(&vnode).unwrap_or_default(),
                        attributes: metadata.map(|m| m.attributes().clone()).unwrap_or_default(),
                    },
                );
                if let Some(metadata) = metadata {
                    if let Some(display_name) = metadata.display_name() {
                        node.set_display_name(display_name);
                    }
                    for port in metadata.ports() {
                        node.add_port_forwarding(port.host, port.container);
                    }
                }
            }
        }
        Ok(())
    }

    /// Combine two unrendered emulators into a new one.
    ///
    /// The registry is the disjoint union of both; layers and bindings are
    /// concatenated with `self` first, and same-named layers are combined
    /// through [`Layer::merge_with`].
    pub fn merge(&self, other: &Emulator) -> Result<Emulator> {
        for emu in [self, other] {
            if emu.state != RenderState::Unrendered {
                return Err(EmuError::InvalidState {
                    operation: "merge",
                    state: emu.state,
                });
            }
        }

        let mut conflicts = self.registry.conflicts_with(&other.registry);
        conflicts.extend(
            self.virtual_nodes
                .keys()
                .filter(|name| other.virtual_nodes.contains_key(*name))
                .map(|name| Conflict::VirtualNode(name.clone())),
        );
        if !conflicts.is_empty() {
            return Err(EmuError::MergeConflict { conflicts });
        }

        let mut layers: Vec<Rc<dyn Layer>> = Vec::with_capacity(self.layers.len() + other.layers.len());
        for layer in &self.layers {
            match other.layer(layer.name()) {
                Some(theirs) => layers.push(layer.merge_with(theirs)?),
                None => layers.push(Rc::clone(layer)),
            }
        }
        for layer in &other.layers {
            if self.layer(layer.name()).is_none() {
                layers.push(Rc::clone(layer));
            }
        }

        let registry = self.registry.disjoint_union(&other.registry)?;
        let mut virtual_nodes = self.virtual_nodes.clone();
        virtual_nodes.extend(other.virtual_nodes.iter().map(|(k, v)| (k.clone(), v.clone())));

        log::info!(
            "Merged emulations: {} layers, {} bindings, {} autonomous systems",
            layers.len(),
            self.bindings.len() + other.bindings.len(),
            registry.asns().len()
        );

        Ok(Emulator {
            registry,
            layers,
            bindings: self.bindings.iter().chain(&other.bindings).cloned().collect(),
            virtual_nodes,
            ..Emulator::new()
        })
    }

    /// Write the rendered emulation to `output` with `compiler`.
    pub fn compile(&self, compiler: &dyn Compiler, output: &Path, options: CompileOptions) -> Result<()> {
        if self.state != RenderState::Rendered {
            return Err(EmuError::InvalidState {
                operation: "compile",
                state: self.state,
            });
        }
        compiler.compile(&self.registry, output, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Filter;
    use crate::layer::{Base, Ebgp, Ibgp, Ospf, Routing};
    use crate::makers::make_stub_as;
    use crate::service::EthereumService;

    fn routed(asns: &[u32], exchange: u32) -> Emulator {
        let mut emu = Emulator::new();
        emu.registry_mut()
            .unwrap()
            .create_internet_exchange(exchange)
            .unwrap();
        for asn in asns {
            make_stub_as(&mut emu, *asn, exchange, 1).unwrap();
        }
        let mut ebgp = Ebgp::new();
        ebgp.add_rs_peers(exchange, asns);
        emu.add_layer(Base).unwrap();
        emu.add_layer(Routing).unwrap();
        emu.add_layer(ebgp).unwrap();
        emu.add_layer(Ibgp::new()).unwrap();
        emu.add_layer(Ospf::new()).unwrap();
        emu
    }

    #[test]
    fn test_render_applies_layers_in_dependency_order() {
        let mut emu = routed(&[99, 100, 101], 100);
        emu.render().unwrap();
        assert_eq!(emu.state(), RenderState::Rendered);
        assert_eq!(emu.applied_order(), &["Base", "Routing", "Ebgp", "Ibgp", "Ospf"]);
        assert_eq!(emu.registry().asns(), vec![99, 100, 101]);
    }

    #[test]
    fn test_rendered_emulator_is_frozen() {
        let mut emu = routed(&[2], 1);
        emu.render().unwrap();
        assert!(matches!(emu.add_layer(Base), Err(EmuError::FrozenState { .. })));
        assert!(matches!(emu.registry_mut(), Err(EmuError::FrozenState { .. })));
        assert!(matches!(emu.render(), Err(EmuError::InvalidState { .. })));
    }

    #[test]
    fn test_layer_failure_names_layer_and_fails_state() {
        let mut emu = routed(&[2], 1);
        let mut extra = Ebgp::new();
        extra.add_rs_peer(9, 2);
        let merged = emu.merge(&{
            let mut other = Emulator::new();
            other.add_layer(extra).unwrap();
            other
        });
        let mut merged = merged.unwrap();
        let err = merged.render().unwrap_err();
        match &err {
            EmuError::LayerFailed { layer, .. } => assert_eq!(layer, "Ebgp"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root_cause(), EmuError::UnknownEntity { .. }));
        assert_eq!(merged.state(), RenderState::Failed);

        let out = tempfile::TempDir::new().unwrap();
        let compiled = merged.compile(
            &crate::compiler::Docker::default(),
            &out.path().join("output"),
            CompileOptions::default(),
        );
        assert!(matches!(compiled, Err(EmuError::InvalidState { .. })));
        emu.render().unwrap();
    }

    #[test]
    fn test_duplicate_layer_rejected() {
        let mut emu = Emulator::new();
        emu.add_layer(Base).unwrap();
        assert!(matches!(
            emu.add_layer(Base),
            Err(EmuError::DuplicateEntity { kind: "layer", .. })
        ));
    }

    #[test]
    fn test_merge_conflicting_asn_leaves_inputs_untouched() {
        let a = routed(&[2, 3], 1);
        let b = routed(&[3, 4], 5);
        let before_a = a.registry().clone();
        let before_b = b.registry().clone();

        let err = a.merge(&b).unwrap_err();
        match err {
            EmuError::MergeConflict { conflicts } => assert_eq!(conflicts, vec![Conflict::Asn(3)]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(a.registry(), &before_a);
        assert_eq!(b.registry(), &before_b);
    }

    #[test]
    fn test_merge_rendered_is_invalid_state() {
        let mut a = routed(&[2], 1);
        let b = Emulator::new();
        a.render().unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(EmuError::InvalidState { operation: "merge", .. })
        ));
        assert!(matches!(
            b.merge(&a),
            Err(EmuError::InvalidState { operation: "merge", .. })
        ));
    }

    #[test]
    fn test_merge_combines_same_named_layers() {
        let a = routed(&[2], 1);
        let b = routed(&[3], 4);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.layer_names(), vec!["Base", "Routing", "Ebgp", "Ibgp", "Ospf"]);
        let ebgp = merged.layer_as::<Ebgp>("Ebgp").unwrap();
        assert_eq!(ebgp.rs_peers(), &[(1, 2), (4, 3)]);
        assert_eq!(merged.state(), RenderState::Unrendered);
    }

    #[test]
    fn test_binding_to_undeclared_virtual_node() {
        let mut emu = routed(&[2], 1);
        emu.add_binding(Binding::new("ghost", Filter::asn(2))).unwrap();
        let err = emu.render().unwrap_err();
        assert!(matches!(err, EmuError::UnknownVirtualNode { .. }));
        assert_eq!(emu.state(), RenderState::Failed);
    }

    #[test]
    fn test_service_nodes_are_hosted_and_configured() {
        let mut emu = routed(&[2, 3], 1);
        let mut eth = EthereumService::new(true, false);
        eth.install("eth1").set_boot_node(true);
        eth.install("eth2").start_miner();
        emu.add_layer(eth).unwrap();
        emu.virtual_node_mut("eth2")
            .unwrap()
            .set_display_name("Ethereum-2")
            .add_port_forwarding(8545, 8545);
        emu.add_binding(Binding::new("eth1", Filter::asn(2).and(Filter::node_name("host0"))))
            .unwrap();
        emu.add_binding(Binding::new("eth2", Filter::asn(3).and(Filter::node_name("host0"))))
            .unwrap();
        emu.render().unwrap();

        let host = emu.registry().node(&NodeRef::as_node(3, "host0")).unwrap();
        assert!(host.virtual_nodes().contains_key("eth2"));
        assert_eq!(host.display_name(), Some("Ethereum-2"));
        assert_eq!(host.ports().len(), 1);
        assert!(host.file("/tmp/run.sh").unwrap().content.contains("10.2.0.71"));
        assert_eq!(host.volumes()[0].host_subpath, "eth-states/2");
    }

    #[test]
    fn test_two_servers_on_one_host_fail_render() {
        let mut emu = routed(&[2, 3], 1);
        let mut eth = EthereumService::new(true, false);
        eth.install("eth1").set_boot_node(true);
        eth.install("eth2").start_miner();
        emu.add_layer(eth).unwrap();
        let host0 = Filter::asn(2).and(Filter::node_name("host0"));
        emu.add_binding(Binding::new("eth1", host0.clone())).unwrap();
        emu.add_binding(Binding::new("eth2", host0)).unwrap();

        let err = emu.render().unwrap_err();
        match err {
            EmuError::NodeAlreadyHosting { virtual_node, node, hosted } => {
                assert_eq!(virtual_node, "eth2");
                assert_eq!(node, "as2_host0");
                assert_eq!(hosted, "eth1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(emu.state(), RenderState::Failed);
        let host = emu.registry().node(&NodeRef::as_node(2, "host0")).unwrap();
        assert!(host.file("/tmp/run.sh").is_none());
        assert!(host.volumes().is_empty());
    }

    #[test]
    fn test_servers_sharing_a_state_directory_fail_render() {
        let mut emu = routed(&[2, 3], 1);
        let mut eth = EthereumService::new(true, false);
        eth.install("eth1").set_boot_node(true);
        eth.install("miner1").start_miner();
        emu.add_layer(eth).unwrap();
        emu.add_binding(Binding::new("eth1", Filter::asn(2).and(Filter::node_name("host0"))))
            .unwrap();
        emu.add_binding(Binding::new("miner1", Filter::asn(3).and(Filter::node_name("host0"))))
            .unwrap();

        let err = emu.render().unwrap_err();
        assert!(matches!(err, EmuError::LayerFailed { ref layer, .. } if layer == "EthereumService"));
        match err.root_cause() {
            EmuError::InvalidTopology(message) => {
                assert!(message.contains("eth1"));
                assert!(message.contains("miner1"));
                assert!(message.contains("eth-states/1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_broadcast_server_gets_a_state_directory_per_host() {
        let mut emu = Emulator::new();
        emu.registry_mut().unwrap().create_internet_exchange(1).unwrap();
        make_stub_as(&mut emu, 2, 1, 2).unwrap();
        emu.add_layer(Base).unwrap();
        let mut eth = EthereumService::new(true, false);
        eth.install("eth7").set_boot_node(true);
        emu.add_layer(eth).unwrap();
        emu.add_binding(Binding::broadcast(
            "eth7",
            Filter::asn(2).and(Filter::role(crate::registry::NodeRole::Host)),
        ))
        .unwrap();
        emu.render().unwrap();

        for name in ["host0", "host1"] {
            let host = emu.registry().node(&NodeRef::as_node(2, name)).unwrap();
            assert_eq!(host.volumes().len(), 1);
            assert_eq!(host.volumes()[0].host_subpath, format!("eth-states/7/as2_{}", name));
        }
    }

    #[test]
    fn test_declared_but_unbound_virtual_node_fails() {
        let mut emu = routed(&[2], 1);
        let mut eth = EthereumService::new(false, false);
        eth.install("eth1");
        emu.add_layer(eth).unwrap();
        let err = emu.render().unwrap_err();
        assert!(matches!(err, EmuError::BindingUnsatisfied { .. }));
    }
}
