//! Full iBGP mesh between the routers of each AS, over loopbacks.

use super::ebgp::BgpSession;
use super::{Layer, RenderContext, BIRD_CONFIG_PATH};
use crate::error::{Conflict, EmuError, Result};
use crate::registry::NodeRole;
use crate::utils::naming::sanitize_identifier;
use std::any::Any;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct Ibgp {
    masked: BTreeSet<u32>,
}

impl Ibgp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave `asn` without an iBGP mesh.
    pub fn mask_asn(&mut self, asn: u32) -> &mut Self {
        self.masked.insert(asn);
        self
    }

    pub fn masked_asns(&self) -> &BTreeSet<u32> {
        &self.masked
    }
}

impl Layer for Ibgp {
    fn name(&self) -> &str {
        "Ibgp"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["Routing".to_string()]
    }

    fn materialize(&self, ctx: &mut RenderContext<'_>) -> Result<()> {
        let mut sessions = 0usize;

        for asys in ctx.registry.autonomous_systems_mut() {
            let asn = asys.asn();
            if self.masked.contains(&asn) {
                log::debug!("Ibgp: AS{} masked", asn);
                continue;
            }

            let mut loopbacks: Vec<(String, Ipv4Addr)> = Vec::new();
            for router in asys.routers() {
                let loopback = router.loopback().ok_or_else(|| {
                    EmuError::InvalidTopology(format!("router {} has no loopback", router.identifier()))
                })?;
                loopbacks.push((router.name().to_string(), loopback));
            }
            if loopbacks.len() < 2 {
                continue;
            }

            for node in asys.nodes_mut().iter_mut().filter(|n| n.role() == NodeRole::Router) {
                let Some(local) = node.loopback() else { continue };
                let own_name = node.name().to_string();
                for (peer, peer_loopback) in loopbacks.iter().filter(|(name, _)| *name != own_name) {
                    let session = BgpSession {
                        name: format!("ibgp_{}_{}", sanitize_identifier(peer), peer_loopback.octets()[3]),
                        local,
                        local_as: asn,
                        neighbor: *peer_loopback,
                        neighbor_as: asn,
                        import_pref: None,
                        export_all: true,
                        next_hop_self: true,
                        route_server_client: false,
                    };
                    node.append_file(BIRD_CONFIG_PATH, &session.render());
                    sessions += 1;
                }
            }
        }

        log::info!("Ibgp layer configured {} sessions", sessions);
        Ok(())
    }

    fn merge_with(&self, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
        let other = other
            .as_any()
            .downcast_ref::<Ibgp>()
            .ok_or_else(|| EmuError::MergeConflict {
                conflicts: vec![Conflict::Layer(self.name().to_string())],
            })?;
        let mut merged = self.clone();
        merged.masked.extend(other.masked.iter().copied());
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

    fn transit(registry: &mut Registry, asn: u32, routers: usize) {
        let asys = registry.create_autonomous_system(asn).unwrap();
        asys.create_network("net0").unwrap();
        for i in 0..routers {
            asys.create_router(format!("r{}", i)).unwrap().join_network("net0");
        }
    }

    fn render(registry: &mut Registry, ibgp: &Ibgp) {
        Base.materialize(&mut RenderContext::new(registry, &[])).unwrap();
        Routing.materialize(&mut RenderContext::new(registry, &[])).unwrap();
        ibgp.materialize(&mut RenderContext::new(registry, &[])).unwrap();
    }

    fn session_count(registry: &Registry, asn: u32, name: &str) -> usize {
        registry
            .node(&NodeRef::as_node(asn, name))
            .and_then(|n| n.file(BIRD_CONFIG_PATH))
            .map(|f| f.content.matches("protocol bgp ibgp_").count())
            .unwrap_or(0)
    }

    #[test]
    fn test_full_mesh_over_loopbacks() {
        let mut registry = Registry::new();
        transit(&mut registry, 5, 3);
        render(&mut registry, &Ibgp::new());

        for name in ["r0", "r1", "r2"] {
            assert_eq!(session_count(&registry, 5, name), 2);
        }
        let conf = &registry
            .node(&NodeRef::as_node(5, "r0"))
            .unwrap()
            .file(BIRD_CONFIG_PATH)
            .unwrap()
            .content;
        assert!(conf.contains("local 172.16.5.1 as 5;"));
        assert!(conf.contains("neighbor 172.16.5.2 as 5;"));
        assert!(conf.contains("neighbor 172.16.5.3 as 5;"));
    }

    #[test]
    fn test_single_router_and_masked_as_skipped() {
        let mut registry = Registry::new();
        transit(&mut registry, 6, 1);
        transit(&mut registry, 7, 2);
        let mut ibgp = Ibgp::new();
        ibgp.mask_asn(7);
        render(&mut registry, &ibgp);

        assert_eq!(session_count(&registry, 6, "r0"), 0);
        assert_eq!(session_count(&registry, 7, "r0"), 0);
        assert_eq!(session_count(&registry, 7, "r1"), 0);
    }

    #[test]
    fn test_protocol_names_distinct_for_similar_router_names() {
        let mut registry = Registry::new();
        let asys = registry.create_autonomous_system(8).unwrap();
        asys.create_network("net0").unwrap();
        for name in ["r0", "r-1", "r_1"] {
            asys.create_router(name).unwrap().join_network("net0");
        }
        render(&mut registry, &Ibgp::new());

        let conf = &registry
            .node(&NodeRef::as_node(8, "r0"))
            .unwrap()
            .file(BIRD_CONFIG_PATH)
            .unwrap()
            .content;
        let names: Vec<&str> = conf
            .lines()
            .filter_map(|line| line.strip_prefix("protocol bgp "))
            .filter(|rest| rest.starts_with("ibgp_"))
            .collect();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn test_merge_unions_masks() {
        let mut left = Ibgp::new();
        left.mask_asn(1);
        let mut right = Ibgp::new();
        right.mask_asn(2);
        let merged = left.merge_with(&right).unwrap();
        let merged = merged.as_any().downcast_ref::<Ibgp>().unwrap();
        assert_eq!(merged.masked_asns().iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }
}
