//! eBGP peering at internet exchanges.
//!
//! Two kinds of sessions are supported:
//!
//! - **Route-server peering**: an AS router peers with the exchange route
//!   server, which runs in `rs client` mode and reflects routes between
//!   all of its clients.
//! - **Private peering**: two AS routers on the same exchange LAN peer
//!   directly, with a business relationship that decides local preference
//!   and export policy.
//!
//! ## Local preference
//!
//! | learned from | `bgp_local_pref` |
//! |--------------|------------------|
//! | customer     | 30               |
//! | peer         | 20               |
//! | provider     | 10               |
//!
//! Routes are exported to peers and providers only when they are local or
//! learned from a customer. Customers and unfiltered peers receive
//! everything.

use super::{Layer, RenderContext, BIRD_CONFIG_PATH};
use crate::error::{Conflict, EmuError, Result};
use crate::registry::{NetworkId, NodeRef, Registry};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::Ipv4Addr;
use std::rc::Rc;

pub const CUSTOMER_LOCAL_PREF: u32 = 30;
pub const PEER_LOCAL_PREF: u32 = 20;
pub const PROVIDER_LOCAL_PREF: u32 = 10;

/// Relationship of the first AS of a private peering towards the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRelationship {
    /// First AS provides transit to the second
    Provider,
    /// Settlement-free peering
    Peer,
    /// Exchange everything in both directions
    Unfiltered,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrivatePeering {
    pub exchange: u32,
    pub a: u32,
    pub b: u32,
    pub relationship: PeerRelationship,
}

/// One BIRD `protocol bgp` block.
#[derive(Debug, Clone)]
pub(crate) struct BgpSession {
    pub name: String,
    pub local: Ipv4Addr,
    pub local_as: u32,
    pub neighbor: Ipv4Addr,
    pub neighbor_as: u32,
    /// `None` imports unchanged
    pub import_pref: Option<u32>,
    pub export_all: bool,
    pub next_hop_self: bool,
    pub route_server_client: bool,
}

impl BgpSession {
    pub(crate) fn render(&self) -> String {
        let import = match self.import_pref {
            Some(pref) => format!(
                "import filter {{\n            bgp_local_pref = {};\n            accept;\n        }};",
                pref
            ),
            None => "import all;".to_string(),
        };
        let export = if self.export_all {
            "export all;".to_string()
        } else {
            format!(
                "export where source != RTS_BGP || bgp_local_pref = {};",
                CUSTOMER_LOCAL_PREF
            )
        };

        let mut block = format!(
            "\nprotocol bgp {} {{\n    ipv4 {{\n        {}\n        {}\n",
            self.name, import, export
        );
        if self.next_hop_self {
            block.push_str("        next hop self;\n");
        }
        block.push_str("    };\n");
        if self.route_server_client {
            block.push_str("    rs client;\n");
        }
        block.push_str(&format!(
            "    local {} as {};\n    neighbor {} as {};\n}}\n",
            self.local, self.local_as, self.neighbor, self.neighbor_as
        ));
        block
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ebgp {
    rs_peers: Vec<(u32, u32)>,
    private_peerings: Vec<PrivatePeering>,
}

impl Ebgp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peer `asn` with the route server of exchange `exchange`.
    pub fn add_rs_peer(&mut self, exchange: u32, asn: u32) -> &mut Self {
        if !self.rs_peers.contains(&(exchange, asn)) {
            self.rs_peers.push((exchange, asn));
        }
        self
    }

    pub fn add_rs_peers(&mut self, exchange: u32, asns: &[u32]) -> &mut Self {
        for asn in asns {
            self.add_rs_peer(exchange, *asn);
        }
        self
    }

    pub fn add_private_peering(
        &mut self,
        exchange: u32,
        a: u32,
        b: u32,
        relationship: PeerRelationship,
    ) -> &mut Self {
        let peering = PrivatePeering {
            exchange,
            a,
            b,
            relationship,
        };
        if !self.private_peerings.contains(&peering) {
            self.private_peerings.push(peering);
        }
        self
    }

    pub fn rs_peers(&self) -> &[(u32, u32)] {
        &self.rs_peers
    }

    pub fn private_peerings(&self) -> &[PrivatePeering] {
        &self.private_peerings
    }
}

/// Router of `asn` attached to the peering LAN of `exchange`, and its address there.
fn exchange_router(registry: &Registry, asn: u32, exchange: u32) -> Result<(NodeRef, Ipv4Addr)> {
    let lan = NetworkId::exchange(exchange);
    registry
        .autonomous_system(asn)?
        .routers()
        .find_map(|router| router.address_on(&lan).map(|addr| (router.node_ref(), addr)))
        .ok_or_else(|| {
            EmuError::InvalidTopology(format!(
                "AS{} has no router on the peering LAN of IX{}",
                asn, exchange
            ))
        })
}

fn route_server_address(registry: &Registry, exchange: u32) -> Result<Ipv4Addr> {
    registry
        .exchange(exchange)?
        .route_server()
        .address_on(&NetworkId::exchange(exchange))
        .ok_or_else(|| {
            EmuError::InvalidTopology(format!("route server of IX{} has no address", exchange))
        })
}

fn append_session(registry: &mut Registry, node: &NodeRef, session: &BgpSession) -> Result<()> {
    registry
        .node_mut(node)?
        .append_file(BIRD_CONFIG_PATH, &session.render());
    Ok(())
}

impl Ebgp {
    fn peer_with_route_server(&self, registry: &mut Registry, exchange: u32, asn: u32) -> Result<()> {
        let rs_addr = route_server_address(registry, exchange)?;
        let (router, router_addr) = exchange_router(registry, asn, exchange)?;
        if asn == exchange {
            log::warn!(
                "AS{} shares its number with IX{}; the route-server session will behave as iBGP",
                asn,
                exchange
            );
        }

        append_session(
            registry,
            &router,
            &BgpSession {
                name: format!("rs_ix{}", exchange),
                local: router_addr,
                local_as: asn,
                neighbor: rs_addr,
                neighbor_as: exchange,
                import_pref: Some(PEER_LOCAL_PREF),
                export_all: false,
                next_hop_self: true,
                route_server_client: false,
            },
        )?;
        append_session(
            registry,
            &NodeRef::RouteServer { exchange },
            &BgpSession {
                name: format!("client_as{}", asn),
                local: rs_addr,
                local_as: exchange,
                neighbor: router_addr,
                neighbor_as: asn,
                import_pref: None,
                export_all: true,
                next_hop_self: false,
                route_server_client: true,
            },
        )
    }

    fn peer_privately(&self, registry: &mut Registry, peering: &PrivatePeering) -> Result<()> {
        let (a_router, a_addr) = exchange_router(registry, peering.a, peering.exchange)?;
        let (b_router, b_addr) = exchange_router(registry, peering.b, peering.exchange)?;

        // (a's import pref, a exports all, b's import pref, b exports all)
        let (a_pref, a_all, b_pref, b_all) = match peering.relationship {
            PeerRelationship::Provider => (CUSTOMER_LOCAL_PREF, true, PROVIDER_LOCAL_PREF, false),
            PeerRelationship::Peer => (PEER_LOCAL_PREF, false, PEER_LOCAL_PREF, false),
            PeerRelationship::Unfiltered => (PEER_LOCAL_PREF, true, PEER_LOCAL_PREF, true),
        };

        append_session(
            registry,
            &a_router,
            &BgpSession {
                name: format!("peer_as{}_ix{}", peering.b, peering.exchange),
                local: a_addr,
                local_as: peering.a,
                neighbor: b_addr,
                neighbor_as: peering.b,
                import_pref: Some(a_pref),
                export_all: a_all,
                next_hop_self: true,
                route_server_client: false,
            },
        )?;
        append_session(
            registry,
            &b_router,
            &BgpSession {
                name: format!("peer_as{}_ix{}", peering.a, peering.exchange),
                local: b_addr,
                local_as: peering.b,
                neighbor: a_addr,
                neighbor_as: peering.a,
                import_pref: Some(b_pref),
                export_all: b_all,
                next_hop_self: true,
                route_server_client: false,
            },
        )
    }
}

impl Layer for Ebgp {
    fn name(&self) -> &str {
        "Ebgp"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Routing".to_string()]
    }

    fn materialize(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        for (exchange, asn) in &self.rs_peers {
            self.peer_with_route_server(ctx.registry, *exchange, *asn)?;
        }
        for peering in &self.private_peerings {
            self.peer_privately(ctx.registry, peering)?;
        }

        log::info!(
            "Ebgp layer configured {} route-server sessions and {} private peerings",
            self.rs_peers.len(),
            self.private_peerings.len()
        );
        Ok(())
    }

    fn merge_with(&self, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
        let other = other
            .as_any()
            .downcast_ref::<Ebgp>()
            .ok_or_else(|| EmuError::MergeConflict {
                conflicts: vec![Conflict::Layer(self.name().to_string())],
            })?;

        let mut merged = self.clone();
        for (exchange, asn) in &other.rs_peers {
            merged.add_rs_peer(*exchange, *asn);
        }
        for peering in &other.private_peerings {
            merged.add_private_peering(peering.exchange, peering.a, peering.b, peering.relationship);
        }
        Ok(Rc::new(merged))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
