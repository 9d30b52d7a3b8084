//! # Node/AS Registry
//!
//! The registry holds every autonomous system, internet exchange, network
//! and node of one emulation. It is pure data plus the invariants that keep
//! it consistent:
//!
//! - ASNs are unique within a registry
//! - exchange IDs are unique within a registry
//! - network names are unique within their AS, node names likewise
//!
//! ## Lifecycle
//!
//! 1. **Construction**: topology helpers (see `makers`) create ASes,
//!    networks, routers and hosts, and declare which networks each node
//!    joins.
//! 2. **Rendering**: layers mutate the registry in dependency order. The
//!    base layer assigns prefixes and addresses, routing layers append
//!    BIRD configuration, services attach software and start commands.
//! 3. **Compilation**: the compiler walks the finished registry read-only.
//!
//! ## Merging
//!
//! Two registries built independently can be combined with
//! [`Registry::disjoint_union`]. The union is refused, and neither input is
//! touched, when both sides define the same ASN or exchange ID.
//!
//! The registry is not thread-safe; share it behind external
//! synchronisation if you must.

pub mod types;

use crate::error::{Conflict, EmuError, Result};
use std::collections::BTreeMap;

pub use types::{
    AutonomousSystem, HostedVirtualNode, InternetExchange, Network, NetworkId, NetworkInterface,
    NetworkType, Node, NodeFile, NodeRef, NodeRole, PortForward, StartCommand, StateVolume,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    autonomous_systems: BTreeMap<u32, AutonomousSystem>,
    exchanges: BTreeMap<u32, InternetExchange>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_autonomous_system(&mut self, asn: u32) -> Result<&mut AutonomousSystem> {
        if asn == 0 {
            return Err(EmuError::InvalidTopology("ASN 0 is reserved".to_string()));
        }
        if self.autonomous_systems.contains_key(&asn) {
            return Err(EmuError::duplicate("autonomous system", asn));
        }
        log::debug!("Creating AS{}", asn);
        Ok(self
            .autonomous_systems
            .entry(asn)
            .or_insert_with(|| AutonomousSystem::new(asn)))
    }

    pub fn create_internet_exchange(&mut self, id: u32) -> Result<&mut InternetExchange> {
        if id == 0 {
            return Err(EmuError::InvalidTopology("exchange id 0 is reserved".to_string()));
        }
        if self.exchanges.contains_key(&id) {
            return Err(EmuError::duplicate("internet exchange", id));
        }
        log::debug!("Creating IX{}", id);
        Ok(self
            .exchanges
            .entry(id)
            .or_insert_with(|| InternetExchange::new(id)))
    }

    pub fn autonomous_system(&self, asn: u32) -> Result<&AutonomousSystem> {
        self.autonomous_systems
            .get(&asn)
            .ok_or_else(|| EmuError::unknown("autonomous system", asn))
    }

    pub fn autonomous_system_mut(&mut self, asn: u32) -> Result<&mut AutonomousSystem> {
        self.autonomous_systems
            .get_mut(&asn)
            .ok_or_else(|| EmuError::unknown("autonomous system", asn))
    }

    pub fn exchange(&self, id: u32) -> Result<&InternetExchange> {
        self.exchanges
            .get(&id)
            .ok_or_else(|| EmuError::unknown("internet exchange", id))
    }

    pub fn exchange_mut(&mut self, id: u32) -> Result<&mut InternetExchange> {
        self.exchanges
            .get_mut(&id)
            .ok_or_else(|| EmuError::unknown("internet exchange", id))
    }

    pub fn has_autonomous_system(&self, asn: u32) -> bool {
        self.autonomous_systems.contains_key(&asn)
    }

    pub fn has_exchange(&self, id: u32) -> bool {
        self.exchanges.contains_key(&id)
    }

    pub fn autonomous_systems(&self) -> impl Iterator<Item = &AutonomousSystem> + '_ {
        self.autonomous_systems.values()
    }

    pub fn autonomous_systems_mut(&mut self) -> impl Iterator<Item = &mut AutonomousSystem> + '_ {
        self.autonomous_systems.values_mut()
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &InternetExchange> + '_ {
        self.exchanges.values()
    }

    pub fn exchanges_mut(&mut self) -> impl Iterator<Item = &mut InternetExchange> + '_ {
        self.exchanges.values_mut()
    }

    pub fn asns(&self) -> Vec<u32> {
        self.autonomous_systems.keys().copied().collect()
    }

    pub fn exchange_ids(&self) -> Vec<u32> {
        self.exchanges.keys().copied().collect()
    }

    /// Nodes owned by autonomous systems, ordered by ASN then creation.
    pub fn as_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.autonomous_systems.values().flat_map(|asys| asys.nodes().iter())
    }

    /// Every node: AS nodes first, then exchange route servers.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.as_nodes()
            .chain(self.exchanges.values().map(|ix| ix.route_server()))
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Every network: AS-local networks first, then peering LANs.
    pub fn networks(&self) -> impl Iterator<Item = &Network> + '_ {
        self.autonomous_systems
            .values()
            .flat_map(|asys| asys.networks().iter())
            .chain(self.exchanges.values().map(|ix| ix.peering_lan()))
    }

    pub fn network(&self, id: &NetworkId) -> Option<&Network> {
        match id {
            NetworkId::Local { asn, name } => self.autonomous_systems.get(asn)?.network(name),
            NetworkId::Exchange(ix) => self.exchanges.get(ix).map(|ix| ix.peering_lan()),
        }
    }

    pub fn node(&self, node: &NodeRef) -> Option<&Node> {
        match node {
            NodeRef::As { asn, name } => self.autonomous_systems.get(asn)?.node(name),
            NodeRef::RouteServer { exchange } => {
                self.exchanges.get(exchange).map(|ix| ix.route_server())
            }
        }
    }

    pub fn node_mut(&mut self, node: &NodeRef) -> Result<&mut Node> {
        let found = match node {
            NodeRef::As { asn, name } => self
                .autonomous_systems
                .get_mut(asn)
                .and_then(|asys| asys.node_mut(name)),
            NodeRef::RouteServer { exchange } => self
                .exchanges
                .get_mut(exchange)
                .map(|ix| ix.route_server_mut()),
        };
        found.ok_or_else(|| EmuError::unknown("node", node))
    }

    /// Disjoint mutable views used while wiring exchange addresses.
    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut BTreeMap<u32, AutonomousSystem>,
        &mut BTreeMap<u32, InternetExchange>,
    ) {
        (&mut self.autonomous_systems, &mut self.exchanges)
    }

    /// Everything that would collide if `other` were merged into `self`.
    pub fn conflicts_with(&self, other: &Registry) -> Vec<Conflict> {
        let asns = self
            .autonomous_systems
            .keys()
            .filter(|asn| other.autonomous_systems.contains_key(asn))
            .map(|asn| Conflict::Asn(*asn));
        let exchanges = self
            .exchanges
            .keys()
            .filter(|id| other.exchanges.contains_key(id))
            .map(|id| Conflict::Exchange(*id));
        asns.chain(exchanges).collect()
    }

    /// Union of two registries that share no ASN and no exchange ID.
    ///
    /// Validation happens before anything is copied, so on failure both
    /// inputs are exactly as they were.
    pub fn disjoint_union(&self, other: &Registry) -> Result<Registry> {
        let conflicts = self.conflicts_with(other);
        if !conflicts.is_empty() {
            return Err(EmuError::MergeConflict { conflicts });
        }
        let mut merged = self.clone();
        merged.autonomous_systems.extend(
            other
                .autonomous_systems
                .iter()
                .map(|(asn, asys)| (*asn, asys.clone())),
        );
        merged
            .exchanges
            .extend(other.exchanges.iter().map(|(id, ix)| (*id, ix.clone())));
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(asns: &[u32], exchanges: &[u32]) -> Registry {
        let mut registry = Registry::new();
        for ix in exchanges {
            registry.create_internet_exchange(*ix).unwrap();
        }
        for asn in asns {
            let asys = registry.create_autonomous_system(*asn).unwrap();
            asys.create_network("net0").unwrap();
            asys.create_router("router0").unwrap().join_network("net0");
        }
        registry
    }

    #[test]
    fn test_duplicate_asn_and_exchange_rejected() {
        let mut registry = registry_with(&[100], &[100]);
        assert!(matches!(
            registry.create_autonomous_system(100),
            Err(EmuError::DuplicateEntity { .. })
        ));
        assert!(matches!(
            registry.create_internet_exchange(100),
            Err(EmuError::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn test_as_and_exchange_may_share_a_number() {
        let registry = registry_with(&[99, 100, 101], &[100]);
        assert_eq!(registry.asns(), vec![99, 100, 101]);
        assert_eq!(registry.exchange_ids(), vec![100]);
        // three routers plus one route server
        assert_eq!(registry.node_count(), 4);
    }

    #[test]
    fn test_duplicate_nodes_and_networks_rejected() {
        let mut registry = registry_with(&[10], &[]);
        let asys = registry.autonomous_system_mut(10).unwrap();
        assert!(asys.create_network("net0").is_err());
        assert!(asys.create_host("router0").is_err());
    }

    #[test]
    fn test_lookup_by_reference() {
        let registry = registry_with(&[10], &[20]);
        let router = registry.node(&NodeRef::as_node(10, "router0")).unwrap();
        assert_eq!(router.identifier(), "as10_router0");
        let rs = registry.node(&NodeRef::RouteServer { exchange: 20 }).unwrap();
        assert_eq!(rs.identifier(), "ix20_rs");
        assert!(registry.network(&NetworkId::exchange(20)).is_some());
        assert!(registry.network(&NetworkId::local(10, "net1")).is_none());
    }

    #[test]
    fn test_disjoint_union_conflict_leaves_inputs_untouched() {
        let a = registry_with(&[1, 2], &[20]);
        let b = registry_with(&[2, 3], &[20]);
        let (a_before, b_before) = (a.clone(), b.clone());

        match a.disjoint_union(&b) {
            Err(EmuError::MergeConflict { conflicts }) => {
                assert_eq!(conflicts, vec![Conflict::Asn(2), Conflict::Exchange(20)]);
            }
            other => panic!("expected merge conflict, got {:?}", other.map(|_| ())),
        }
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn test_disjoint_union_is_associative() {
        let a = registry_with(&[1], &[10]);
        let b = registry_with(&[2], &[20]);
        let c = registry_with(&[3], &[30]);

        let left = a.disjoint_union(&b).unwrap().disjoint_union(&c).unwrap();
        let right = a.disjoint_union(&b.disjoint_union(&c).unwrap()).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.asns(), vec![1, 2, 3]);
        assert_eq!(left.exchange_ids(), vec![10, 20, 30]);
    }
}
