//! Intra-AS OSPF on every router.
//!
//! All routers of an AS share area 0. Router loopbacks and exchange
//! interfaces are always stub. Local networks are active unless marked
//! stub, and masked networks are left out of OSPF entirely.

use super::{Layer, RenderContext, BIRD_CONFIG_PATH};
use crate::error::{Conflict, EmuError, Result};
use crate::registry::{NetworkId, Node, NodeRole};
use std::any::Any;
use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct Ospf {
    stub_networks: BTreeSet<NetworkId>,
    masked_networks: BTreeSet<NetworkId>,
    masked_asns: BTreeSet<u32>,
}

impl Ospf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise the network but never form adjacencies on it.
    pub fn mark_as_stub(&mut self, asn: u32, network: &str) -> &mut Self {
        self.stub_networks.insert(NetworkId::local(asn, network));
        self
    }

    /// Keep the network out of OSPF.
    pub fn mask_network(&mut self, asn: u32, network: &str) -> &mut Self {
        self.masked_networks.insert(NetworkId::local(asn, network));
        self
    }

    pub fn mask_asn(&mut self, asn: u32) -> &mut Self {
        self.masked_asns.insert(asn);
        self
    }

    fn area(&self, router: &Node) -> String {
        let mut area = String::new();
        if router.loopback().is_some() {
            area.push_str("        interface \"dummy0\" { stub; };\n");
        }
        for iface in router.interfaces() {
            let name = iface.network.interface_name();
            match &iface.network {
                NetworkId::Exchange(_) => {
                    area.push_str(&format!("        interface \"{}\" {{ stub; }};\n", name));
                }
                local if self.masked_networks.contains(local) => {}
                local if self.stub_networks.contains(local) => {
                    area.push_str(&format!("        interface \"{}\" {{ stub; }};\n", name));
                }
                _ => {
                    area.push_str(&format!(
                        "        interface \"{}\" {{ hello 1; dead count 2; }};\n",
                        name
                    ));
                }
            }
        }
        area
    }
}

impl Layer for Ospf {
    fn name(&self) -> &str {
        "Ospf"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Routing".to_string()]
    }

    fn materialize(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let mut routers = 0usize;
        for asys in ctx.registry.autonomous_systems_mut() {
            if self.masked_asns.contains(&asys.asn()) {
                continue;
            }
            for node in asys.nodes_mut().iter_mut().filter(|n| n.role() == NodeRole::Router) {
                let conf = format!(
                    "\nprotocol ospf ospf1 {{\n    ipv4 {{\n        import all;\n        export none;\n    }};\n    area 0 {{\n{}    }};\n}}\n",
                    self.area(node)
                );
                node.append_file(BIRD_CONFIG_PATH, &conf);
                routers += 1;
            }
        }
        log::info!("Ospf layer configured {} routers", routers);
        Ok(())
    }

    fn merge_with(&self, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
        let other = other
            .as_any()
            .downcast_ref::<Ospf>()
            .ok_or_else(|| EmuError::MergeConflict {
                conflicts: vec![Conflict::Layer(self.name().to_string())],
            })?;
        let mut merged = self.clone();
        merged.stub_networks.extend(other.stub_networks.iter().cloned());
        merged.masked_networks.extend(other.masked_networks.iter().cloned());
        merged.masked_asns.extend(other.masked_asns.iter().copied());
        Ok(Rc::new(merged))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Base, Routing};
    use crate::registry::{NodeRef, Registry};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.create_internet_exchange(50).unwrap();
        let asys = registry.create_autonomous_system(3).unwrap();
        for net in ["net0", "net1", "net2"] {
            asys.create_network(net).unwrap();
        }
        asys.create_router("r0")
            .unwrap()
            .join_network("net0")
            .join_network("net1")
            .join_network("net2")
            .join_exchange(50);
        registry
    }

    #[test]
    fn test_interface_modes() {
        let mut registry = registry();
        let mut ospf = Ospf::new();
        ospf.mark_as_stub(3, "net1").mask_network(3, "net2");

        Base.materialize(&mut RenderContext::new(&mut registry, &[])).unwrap();
        Routing.materialize(&mut RenderContext::new(&mut registry, &[])).unwrap();
        ospf.materialize(&mut RenderContext::new(&mut registry, &[])).unwrap();

        let conf = &registry
            .node(&NodeRef::as_node(3, "r0"))
            .unwrap()
            .file(BIRD_CONFIG_PATH)
            .unwrap()
            .content;
        assert!(conf.contains("protocol ospf ospf1"));
        assert!(conf.contains("interface \"dummy0\" { stub; };"));
        assert!(conf.contains("interface \"net0\" { hello 1; dead count 2; };"));
        assert!(conf.contains("interface \"net1\" { stub; };"));
        assert!(!conf.contains("interface \"net2\""));
        assert!(conf.contains("interface \"ix50\" { stub; };"));
    }

    #[test]
    fn test_merge_keeps_both_sides() {
        let mut left = Ospf::new();
        left.mark_as_stub(1, "net0");
        let mut right = Ospf::new();
        right.mask_network(2, "net0");
        let merged = left.merge_with(&right).unwrap();
        let merged = merged.as_any().downcast_ref::<Ospf>().unwrap();
        assert!(merged.stub_networks.contains(&NetworkId::local(1, "net0")));
        assert!(merged.masked_networks.contains(&NetworkId::local(2, "net0")));
    }
}
