//! Routing baseline.
//!
//! Routers and route servers get BIRD with its device, kernel and direct
//! protocols, and start the daemon. Hosts get a default route through a
//! router on their network.

use super::{merge_stateless, Layer, RenderContext, BIRD_CONFIG_PATH};
use crate::error::{EmuError, Result};
use crate::registry::{NetworkId, Node, NodeRole};
use std::any::Any;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::rc::Rc;

pub const ROUTING_DAEMON: &str = "bird2";

#[derive(Debug, Clone, Copy, Default)]
pub struct Routing;

impl Layer for Routing {
    fn name(&self) -> &str {
        "Routing"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Base".to_string()]
    }

    fn materialize(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let mut routers = 0usize;
        let mut hosts = 0usize;

        for asys in ctx.registry.autonomous_systems_mut() {
            let gateways = gateways(asys.routers());
            for node in asys.nodes_mut() {
                match node.role() {
                    NodeRole::Router => {
                        configure_router(node, true)?;
                        routers += 1;
                    }
                    NodeRole::Host => {
                        configure_host(node, &gateways);
                        hosts += 1;
                    }
                    NodeRole::RouteServer => {}
                }
            }
        }

        for ix in ctx.registry.exchanges_mut() {
            configure_router(ix.route_server_mut(), false)?;
        }

        log::info!(
            "Routing layer configured {} routers and {} hosts",
            routers,
            hosts
        );
        Ok(())
    }

    fn merge_with(&self, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
        merge_stateless::<Routing>(self.name(), other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// First router address seen on each local network.
fn gateways<'a>(routers: impl Iterator<Item = &'a Node>) -> HashMap<NetworkId, Ipv4Addr> {
    let mut gateways = HashMap::new();
    for router in routers {
        for iface in router.interfaces() {
            if let (NetworkId::Local { .. }, Some(addr)) = (&iface.network, iface.address) {
                gateways.entry(iface.network.clone()).or_insert(addr);
            }
        }
    }
    gateways
}

fn configure_router(node: &mut Node, install_kernel_routes: bool) -> Result<()> {
    let router_id = node.router_id().ok_or_else(|| {
        EmuError::InvalidTopology(format!("router {} has no address", node.identifier()))
    })?;

    let mut conf = format!(
        "router id {};\n\nprotocol device {{\n    scan time 10;\n}}\n",
        router_id
    );
    if install_kernel_routes {
        conf.push_str(
            "\nprotocol kernel {\n    ipv4 {\n        import all;\n        export all;\n    };\n    learn;\n}\n",
        );
    }

    let mut direct: Vec<String> = node
        .interfaces()
        .iter()
        .filter(|iface| matches!(iface.network, NetworkId::Local { .. }))
        .map(|iface| format!("\"{}\"", iface.network.interface_name()))
        .collect();
    if node.loopback().is_some() {
        direct.push("\"dummy0\"".to_string());
    }
    if !direct.is_empty() {
        conf.push_str(&format!(
            "\nprotocol direct local_nets {{\n    ipv4;\n    interface {};\n}}\n",
            direct.join(", ")
        ));
    }

    node.add_software(ROUTING_DAEMON)
        .append_file(BIRD_CONFIG_PATH, &conf)
        .append_start_command("mkdir -p /run/bird", false)
        .append_start_command("bird -d", true);
    Ok(())
}

fn configure_host(node: &mut Node, gateways: &HashMap<NetworkId, Ipv4Addr>) {
    let route = node.interfaces().iter().find_map(|iface| {
        gateways
            .get(&iface.network)
            .map(|gw| (*gw, iface.network.interface_name()))
    });

    match route {
        Some((gateway, dev)) => {
            node.append_start_command(
                format!(
                    "ip route del default 2> /dev/null; ip route add default via {} dev {}",
                    gateway, dev
                ),
                false,
            );
        }
        None => log::warn!(
            "Host {} has no router on its network; leaving default route unchanged",
            node.identifier()
        ),
    }
}
