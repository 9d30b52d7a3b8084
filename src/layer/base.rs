//! Base layer: address plan and interface wiring.
//!
//! The base layer turns the declared topology into an addressed one:
//!
//! 1. every network without an explicit prefix gets one from the default
//!    plan and an address pool is opened for it
//! 2. overlapping prefixes anywhere in the registry are rejected
//! 3. each exchange route server takes the top address of its LAN
//! 4. every node interface receives an address; exchange members prefer
//!    `.{asn}` on the peering LAN, routers receive a loopback
//!
//! Hosts must join exactly one network.

use super::{merge_stateless, Layer, RenderContext};
use crate::error::{EmuError, Result};
use crate::ip::{plan, AddressPool, Ipv4Prefix};
use crate::registry::{Network, NetworkId, Node, NodeRole, Registry};
use std::any::Any;
use std::net::Ipv4Addr;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, Default)]
pub struct Base;

impl Layer for Base {
    fn name(&self) -> &str {
        "Base"
    }

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn materialize(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let registry = &mut *ctx.registry;
        assign_prefixes(registry)?;
        check_overlaps(registry)?;
        wire_route_servers(registry)?;
        wire_autonomous_systems(registry)?;

        log::info!(
            "Base layer addressed {} nodes across {} autonomous systems and {} exchanges",
            registry.node_count(),
            registry.asns().len(),
            registry.exchange_ids().len()
        );
        Ok(())
    }

    fn merge_with(&self, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
        merge_stateless::<Base>(self.name(), other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn assign_prefixes(registry: &mut Registry) -> Result<()> {
    for asys in registry.autonomous_systems_mut() {
        let asn = asys.asn();
        let (networks, _) = asys.split_mut();
        for (index, network) in networks.iter_mut().enumerate() {
            let prefix = match network.prefix() {
                Some(prefix) => prefix,
                None => plan::local_network_prefix(asn, index)?,
            };
            network.open_pool(prefix);
        }
    }

    for ix in registry.exchanges_mut() {
        let id = ix.id();
        let lan = ix.peering_lan_mut();
        let prefix = match lan.prefix() {
            Some(prefix) => prefix,
            None => plan::exchange_prefix(id)?,
        };
        lan.open_pool(prefix);
    }
    Ok(())
}

fn check_overlaps(registry: &Registry) -> Result<()> {
    let prefixed: Vec<(&NetworkId, Ipv4Prefix)> = registry
        .networks()
        .filter_map(|network| network.prefix().map(|prefix| (network.id(), prefix)))
        .collect();

    for (i, (a_id, a)) in prefixed.iter().enumerate() {
        for (b_id, b) in &prefixed[i + 1..] {
            if a.overlaps(b) {
                return Err(EmuError::InvalidTopology(format!(
                    "network {} ({}) overlaps network {} ({})",
                    a_id, a, b_id, b
                )));
            }
        }
    }
    Ok(())
}

fn open_pool(network: &mut Network) -> Result<&mut AddressPool> {
    let id = network.id().clone();
    network
        .pool_mut()
        .ok_or_else(|| EmuError::InvalidTopology(format!("network {} has no prefix", id)))
}

fn set_address(node: &mut Node, network: &NetworkId, addr: Ipv4Addr) {
    if let Some(iface) = node
        .interfaces_mut()
        .iter_mut()
        .find(|iface| &iface.network == network)
    {
        iface.address = Some(addr);
    }
}

fn wire_route_servers(registry: &mut Registry) -> Result<()> {
    for ix in registry.exchanges_mut() {
        let network = NetworkId::exchange(ix.id());
        let (lan, route_server) = ix.split_mut();
        let owner = route_server.identifier();
        let addr = open_pool(lan)?.assign(NodeRole::RouteServer, &owner)?;
        set_address(route_server, &network, addr);
    }
    Ok(())
}

fn wire_autonomous_systems(registry: &mut Registry) -> Result<()> {
    let (autonomous_systems, exchanges) = registry.parts_mut();

    for asys in autonomous_systems.values_mut() {
        let asn = asys.asn();
        let (networks, nodes) = asys.split_mut();
        let mut router_index = 0;

        for node in nodes.iter_mut() {
            let owner = node.identifier();
            let role = node.role();

            if role == NodeRole::Host && node.interfaces().len() != 1 {
                return Err(EmuError::InvalidTopology(format!(
                    "host {} must join exactly one network, joined {}",
                    owner,
                    node.interfaces().len()
                )));
            }
            if role == NodeRole::Router {
                router_index += 1;
                node.set_loopback(plan::loopback_address(asn, router_index)?);
            }

            for iface in node.interfaces_mut() {
                let addr = match &iface.network {
                    NetworkId::Local { name, .. } => {
                        let network = networks
                            .iter_mut()
                            .find(|network| network.name() == *name)
                            .ok_or_else(|| EmuError::unknown("network", &iface.network))?;
                        open_pool(network)?.assign(role, &owner)?
                    }
                    NetworkId::Exchange(id) => {
                        let ix = exchanges
                            .get_mut(id)
                            .ok_or_else(|| EmuError::unknown("internet exchange", id))?;
                        let pool = open_pool(ix.peering_lan_mut())?;
                        match plan::exchange_member_offset(asn).filter(|offset| pool.is_free(*offset)) {
                            Some(offset) => pool.assign_fixed(offset, &owner)?,
                            None => pool.assign(role, &owner)?,
                        }
                    }
                };
                iface.address = Some(addr);
            }
        }
    }
    Ok(())
}
