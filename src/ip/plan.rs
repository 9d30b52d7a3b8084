//! Default address plan.
//!
//! AS-local networks live in `10.{asn}.{index}.0/24`, exchange peering LANs
//! in `10.0.{id}.0/24` and router loopbacks in `172.16.{asn}.{k}/32`. Since
//! ASN 0 is never valid, exchange LANs can not collide with AS networks
//! even when an exchange shares its number with an AS.

use super::prefix::Ipv4Prefix;
use crate::error::{EmuError, Result};
use std::net::Ipv4Addr;

fn octet(value: u32, what: &str) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            EmuError::InvalidTopology(format!(
                "{} {} does not fit the default address plan (1..=255); give the network an explicit prefix",
                what, value
            ))
        })
}

/// Prefix of the `index`-th local network (0-based) of an AS.
pub fn local_network_prefix(asn: u32, index: usize) -> Result<Ipv4Prefix> {
    let asn_octet = octet(asn, "ASN")?;
    let index = u8::try_from(index).map_err(|_| {
        EmuError::InvalidTopology(format!("AS{} has more than 256 local networks", asn))
    })?;
    Ipv4Prefix::new(Ipv4Addr::new(10, asn_octet, index, 0), 24).map_err(EmuError::InvalidTopology)
}

/// Prefix of an exchange's peering LAN.
pub fn exchange_prefix(id: u32) -> Result<Ipv4Prefix> {
    let id_octet = octet(id, "exchange id")?;
    Ipv4Prefix::new(Ipv4Addr::new(10, 0, id_octet, 0), 24).map_err(EmuError::InvalidTopology)
}

/// Loopback of the `k`-th router (1-based) of an AS.
pub fn loopback_address(asn: u32, k: usize) -> Result<Ipv4Addr> {
    let asn_octet = octet(asn, "ASN")?;
    let k = u8::try_from(k)
        .ok()
        .filter(|k| *k > 0 && *k < 255)
        .ok_or_else(|| EmuError::InvalidTopology(format!("AS{} has too many routers", asn)))?;
    Ok(Ipv4Addr::new(172, 16, asn_octet, k))
}

/// Offset an exchange member router prefers on the peering LAN.
pub fn exchange_member_offset(asn: u32) -> Option<u32> {
    (2..=253).contains(&asn).then_some(asn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_and_as_prefixes_never_overlap() {
        let ix = exchange_prefix(100).unwrap();
        let asn = local_network_prefix(100, 0).unwrap();
        assert_eq!(ix.to_string(), "10.0.100.0/24");
        assert_eq!(asn.to_string(), "10.100.0.0/24");
        assert!(!ix.overlaps(&asn));
    }

    #[test]
    fn test_out_of_plan_numbers_are_rejected() {
        assert!(local_network_prefix(256, 0).is_err());
        assert!(local_network_prefix(0, 0).is_err());
        assert!(exchange_prefix(300).is_err());
        assert!(loopback_address(65000, 1).is_err());
    }

    #[test]
    fn test_member_offsets() {
        assert_eq!(exchange_member_offset(31), Some(31));
        assert_eq!(exchange_member_offset(254), None);
        assert_eq!(exchange_member_offset(0), None);
        assert_eq!(exchange_member_offset(1), None);
    }
}
