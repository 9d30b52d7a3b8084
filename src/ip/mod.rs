//! IP address allocation and management module.
//!
//! This module handles address assignment for emulated networks: the
//! prefix type, the default address plan that maps AS numbers and exchange
//! IDs onto private ranges, and the per-network pools that hand out host
//! and router addresses.

pub mod allocator;
pub mod plan;
pub mod prefix;

// Re-export commonly used types
pub use allocator::AddressPool;
pub use prefix::Ipv4Prefix;
