//! Topology construction helpers.
//!
//! These build the common AS shapes directly into an emulator's registry:
//!
//! - **Stub AS**: one local network `net0`, one router `router0` on `net0`
//!   and on an exchange, and hosts `host0..hostN` on `net0`
//! - **Transit AS**: one router per exchange (`r{ix}`), chained by internal
//!   links `net_{a}_{b}` between consecutive exchanges

use crate::emulator::Emulator;
use crate::error::{EmuError, Result};

/// Add a stub AS with `hosts` hosts, attached to `exchange`.
pub fn make_stub_as(emu: &mut Emulator, asn: u32, exchange: u32, hosts: usize) -> Result<()> {
    let registry = emu.registry_mut()?;
    if !registry.has_exchange(exchange) {
        return Err(EmuError::unknown("internet exchange", exchange));
    }

    let asys = registry.create_autonomous_system(asn)?;
    asys.create_network("net0")?;
    asys.create_router("router0")?
        .join_network("net0")
        .join_exchange(exchange);
    for i in 0..hosts {
        asys.create_host(format!("host{}", i))?.join_network("net0");
    }

    log::debug!("Created stub AS{} on IX{} with {} hosts", asn, exchange, hosts);
    Ok(())
}

/// Add a transit AS present at every exchange in `exchanges`.
///
/// `links` lists pairs of exchanges whose routers get an internal network;
/// when empty, consecutive exchanges are chained.
pub fn make_transit_as(
    emu: &mut Emulator,
    asn: u32,
    exchanges: &[u32],
    links: &[(u32, u32)],
) -> Result<()> {
    let registry = emu.registry_mut()?;
    for exchange in exchanges {
        if !registry.has_exchange(*exchange) {
            return Err(EmuError::unknown("internet exchange", exchange));
        }
    }
    if exchanges.is_empty() {
        return Err(EmuError::InvalidTopology(format!(
            "transit AS{} needs at least one exchange",
            asn
        )));
    }

    let chain: Vec<(u32, u32)> = if links.is_empty() {
        exchanges.windows(2).map(|pair| (pair[0], pair[1])).collect()
    } else {
        links.to_vec()
    };
    for (a, b) in &chain {
        if !exchanges.contains(a) || !exchanges.contains(b) {
            return Err(EmuError::InvalidTopology(format!(
                "transit AS{} links IX{} and IX{}, but is not present at both",
                asn, a, b
            )));
        }
    }

    let asys = registry.create_autonomous_system(asn)?;
    for exchange in exchanges {
        asys.create_router(format!("r{}", exchange))?
            .join_exchange(*exchange);
    }
    for (a, b) in &chain {
        let name = format!("net_{}_{}", a, b);
        asys.create_network(name.as_str())?;
        for exchange in [a, b] {
            asys.node_mut(&format!("r{}", exchange))
                .ok_or_else(|| EmuError::unknown("node", format!("as{}_r{}", asn, exchange)))?
                .join_network(name.as_str());
        }
    }

    log::debug!(
        "Created transit AS{} at {} exchanges with {} internal links",
        asn,
        exchanges.len(),
        chain.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRole;

    fn with_exchanges(ids: &[u32]) -> Emulator {
        let mut emu = Emulator::new();
        for id in ids {
            emu.registry_mut().unwrap().create_internet_exchange(*id).unwrap();
        }
        emu
    }

    #[test]
    fn test_stub_as_shape() {
        let mut emu = with_exchanges(&[100]);
        make_stub_as(&mut emu, 99, 100, 2).unwrap();

        let asys = emu.registry().autonomous_system(99).unwrap();
        assert_eq!(asys.networks().len(), 1);
        assert_eq!(asys.routers().count(), 1);
        let hosts: Vec<&str> = asys.hosts().map(|h| h.name()).collect();
        assert_eq!(hosts, vec!["host0", "host1"]);
        assert_eq!(asys.node("router0").unwrap().interfaces().len(), 2);
    }

    #[test]
    fn test_stub_as_requires_exchange() {
        let mut emu = Emulator::new();
        assert!(make_stub_as(&mut emu, 5, 1, 0).is_err());
        assert!(!emu.registry().has_autonomous_system(5));
    }

    #[test]
    fn test_transit_as_chains_exchanges() {
        let mut emu = with_exchanges(&[1, 2, 3]);
        make_transit_as(&mut emu, 2, &[1, 2, 3], &[]).unwrap();

        let asys = emu.registry().autonomous_system(2).unwrap();
        assert_eq!(asys.routers().count(), 3);
        assert!(asys.nodes().iter().all(|n| n.role() == NodeRole::Router));
        let names: Vec<String> = asys.networks().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["net_1_2", "net_2_3"]);
        assert_eq!(asys.node("r2").unwrap().interfaces().len(), 3);
    }

    #[test]
    fn test_transit_link_outside_presence_fails() {
        let mut emu = with_exchanges(&[1, 2]);
        assert!(make_transit_as(&mut emu, 7, &[1], &[(1, 2)]).is_err());
    }
}
