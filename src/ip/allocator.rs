//! Per-network address pools.
//!
//! Each network owns one pool. Hosts are handed addresses counting up from
//! `.71`, routers and route servers counting down from `.254`, and callers
//! may pin a specific offset (exchange members use their ASN). Offset `.1`
//! is never handed out; it belongs to the container bridge gateway. The pool
//! records who owns every address so a second claim is reported instead of
//! silently producing a duplicate.

use super::prefix::Ipv4Prefix;
use crate::error::{EmuError, Result};
use crate::registry::NodeRole;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// First host offset handed out on a /24.
pub const HOST_OFFSET_START: u32 = 71;
/// First router offset handed out on a /24 (counting down).
pub const ROUTER_OFFSET_START: u32 = 254;
/// Reserved for the bridge gateway of the container runtime.
pub const GATEWAY_OFFSET: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPool {
    prefix: Ipv4Prefix,
    /// Address -> owning node identifier
    assigned: BTreeMap<Ipv4Addr, String>,
}

impl AddressPool {
    pub fn new(prefix: Ipv4Prefix) -> Self {
        AddressPool {
            prefix,
            assigned: BTreeMap::new(),
        }
    }

    pub fn prefix(&self) -> Ipv4Prefix {
        self.prefix
    }

    /// Assign the next free address for a node of the given role.
    pub fn assign(&mut self, role: NodeRole, owner: &str) -> Result<Ipv4Addr> {
        let last = self.prefix.last_host_offset();
        let candidate = if role.is_router() {
            let start = ROUTER_OFFSET_START.min(last);
            (1..=start).rev().find_map(|offset| self.free_at(offset))
        } else {
            let start = if HOST_OFFSET_START <= last { HOST_OFFSET_START } else { 1 };
            (start..=last)
                .chain(1..start)
                .find_map(|offset| self.free_at(offset))
        };

        let addr = candidate.ok_or_else(|| {
            EmuError::InvalidTopology(format!(
                "network {} has no free address left for {}",
                self.prefix, owner
            ))
        })?;
        self.assigned.insert(addr, owner.to_string());
        log::debug!("Assigned {} to {} on {}", addr, owner, self.prefix);
        Ok(addr)
    }

    /// Claim the address at a fixed offset. Claiming an address the same
    /// owner already holds is a no-op.
    pub fn assign_fixed(&mut self, offset: u32, owner: &str) -> Result<Ipv4Addr> {
        if offset == GATEWAY_OFFSET {
            return Err(EmuError::InvalidTopology(format!(
                "offset {} of {} is reserved for the gateway",
                offset, self.prefix
            )));
        }
        let addr = self.prefix.host(offset).ok_or_else(|| {
            EmuError::InvalidTopology(format!(
                "offset {} is outside the usable range of {}",
                offset, self.prefix
            ))
        })?;
        match self.assigned.get(&addr) {
            Some(existing) if existing == owner => Ok(addr),
            Some(existing) => Err(EmuError::InvalidTopology(format!(
                "address {} requested by {} is already assigned to {}",
                addr, owner, existing
            ))),
            None => {
                self.assigned.insert(addr, owner.to_string());
                Ok(addr)
            }
        }
    }

    pub fn is_free(&self, offset: u32) -> bool {
        self.free_at(offset).is_some()
    }

    fn free_at(&self, offset: u32) -> Option<Ipv4Addr> {
        if offset == GATEWAY_OFFSET {
            return None;
        }
        self.prefix
            .host(offset)
            .filter(|addr| !self.assigned.contains_key(addr))
    }

    pub fn owner_of(&self, addr: Ipv4Addr) -> Option<&str> {
        self.assigned.get(&addr).map(String::as_str)
    }

    pub fn assigned(&self) -> &BTreeMap<Ipv4Addr, String> {
        &self.assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(prefix: &str) -> AddressPool {
        AddressPool::new(prefix.parse().unwrap())
    }

    #[test]
    fn test_hosts_count_up_routers_count_down() {
        let mut pool = pool("10.150.0.0/24");
        assert_eq!(pool.assign(NodeRole::Host, "h0").unwrap(), Ipv4Addr::new(10, 150, 0, 71));
        assert_eq!(pool.assign(NodeRole::Host, "h1").unwrap(), Ipv4Addr::new(10, 150, 0, 72));
        assert_eq!(pool.assign(NodeRole::Router, "r0").unwrap(), Ipv4Addr::new(10, 150, 0, 254));
        assert_eq!(pool.assign(NodeRole::RouteServer, "rs").unwrap(), Ipv4Addr::new(10, 150, 0, 253));
        assert_eq!(pool.owner_of(Ipv4Addr::new(10, 150, 0, 72)), Some("h1"));
    }

    #[test]
    fn test_fixed_assignment_conflicts() {
        let mut pool = pool("10.0.20.0/24");
        let addr = pool.assign_fixed(31, "as31_router0").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 20, 31));
        // same owner again is fine
        assert_eq!(pool.assign_fixed(31, "as31_router0").unwrap(), addr);
        assert!(pool.assign_fixed(31, "as32_router0").is_err());
        assert!(pool.assign_fixed(255, "x").is_err());
        assert!(!pool.is_free(31));
    }

    #[test]
    fn test_router_pool_skips_fixed_addresses() {
        let mut pool = pool("10.0.20.0/24");
        pool.assign_fixed(254, "rs").unwrap();
        assert_eq!(pool.assign(NodeRole::Router, "r").unwrap(), Ipv4Addr::new(10, 0, 20, 253));
    }

    #[test]
    fn test_small_prefix_exhaustion() {
        let mut pool = pool("10.9.9.0/29");
        assert_eq!(pool.assign(NodeRole::Host, "a").unwrap(), Ipv4Addr::new(10, 9, 9, 2));
        assert_eq!(pool.assign(NodeRole::Router, "b").unwrap(), Ipv4Addr::new(10, 9, 9, 6));
        for owner in ["c", "d", "e"] {
            pool.assign(NodeRole::Host, owner).unwrap();
        }
        assert!(pool.assign(NodeRole::Host, "f").is_err());
    }

    #[test]
    fn test_gateway_offset_is_reserved() {
        let mut pool = pool("10.0.20.0/24");
        assert!(!pool.is_free(GATEWAY_OFFSET));
        assert!(pool.assign_fixed(GATEWAY_OFFSET, "as1_router0").is_err());
    }
}
