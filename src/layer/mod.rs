//! # Layers
//!
//! A layer is a named, independently-constructed contribution to an
//! emulation: the base topology, the routing daemons, eBGP peering, the
//! iBGP mesh, OSPF, or a service such as a blockchain network. Layers
//! declare the layers they depend on by name; rendering runs each layer's
//! [`Layer::materialize`] exactly once, after all of its dependencies.
//!
//! ## Key Components
//!
//! - `order.rs`: dependency resolution (stable topological sort)
//! - `base.rs`: address plan and interface wiring
//! - `routing.rs`: BIRD baseline on routers, default routes on hosts
//! - `ebgp.rs`: route-server and private peering at exchanges
//! - `ibgp.rs`: full iBGP mesh inside each AS
//! - `ospf.rs`: intra-AS OSPF
//!
//! ## Render Context
//!
//! During materialization a layer gets read/write access to the shared
//! [`Registry`] and read access to every layer that has already been
//! applied, so a routing layer can rely on the addresses the base layer
//! assigned.

pub mod base;
pub mod ebgp;
pub mod ibgp;
pub mod order;
pub mod ospf;
pub mod routing;

use crate::error::{Conflict, EmuError, Result};
use crate::registry::Registry;
use crate::service::Service;
use std::any::Any;
use std::rc::Rc;

pub use base::Base;
pub use ebgp::{Ebgp, PeerRelationship, PrivatePeering};
pub use ibgp::Ibgp;
pub use order::resolve_order;
pub use ospf::Ospf;
pub use routing::Routing;

/// Path of the BIRD configuration that routing layers append to.
pub const BIRD_CONFIG_PATH: &str = "/etc/bird/bird.conf";

pub trait Layer: Any {
    /// Unique name inside one emulator.
    fn name(&self) -> &str;

    /// Names of layers that must be materialized first.
    fn dependencies(&self) -> Vec<String>;

    /// Apply this layer's effect to the shared registry.
    fn materialize(&self, ctx: &mut RenderContext<'_>) -> Result<()>;

    /// Combine with a same-named layer from another emulator during merge.
    fn merge_with(&self, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
        Err(EmuError::MergeConflict {
            conflicts: vec![Conflict::Layer(other.name().to_string())],
        })
    }

    fn as_any(&self) -> &dyn Any;

    /// Service capability, for layers that declare virtual nodes.
    fn as_service(&self) -> Option<&dyn Service> {
        None
    }
}

/// What a layer sees while it materializes.
pub struct RenderContext<'a> {
    pub registry: &'a mut Registry,
    applied: &'a [Rc<dyn Layer>],
}

impl<'a> RenderContext<'a> {
    pub fn new(registry: &'a mut Registry, applied: &'a [Rc<dyn Layer>]) -> Self {
        RenderContext { registry, applied }
    }

    /// Names of the layers already materialized, in order.
    pub fn applied_layers(&self) -> impl Iterator<Item = &str> + '_ {
        self.applied.iter().map(|layer| layer.name())
    }

    pub fn is_applied(&self, name: &str) -> bool {
        self.applied.iter().any(|layer| layer.name() == name)
    }

    /// An already-applied layer, by name.
    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        self.applied
            .iter()
            .find(|layer| layer.name() == name)
            .map(|layer| layer.as_ref())
    }
}

/// Combine two layers of the same concrete type that carry no state.
pub(crate) fn merge_stateless<L: Layer + Default>(name: &str, other: &dyn Layer) -> Result<Rc<dyn Layer>> {
    if other.as_any().is::<L>() {
        Ok(Rc::new(L::default()))
    } else {
        Err(EmuError::MergeConflict {
            conflicts: vec![Conflict::Layer(name.to_string())],
        })
    }
}
