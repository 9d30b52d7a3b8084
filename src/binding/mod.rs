//! # Binding Resolver
//!
//! Service layers declare *virtual nodes*: named placeholders such as
//! `eth7` that are not yet tied to a machine. A [`Binding`] pairs a virtual
//! node with a [`Filter`], and resolution picks the concrete registry
//! node(s) that will host it.
//!
//! ## Filters
//!
//! A filter is a closed predicate tree. Leaves test one property of a node
//! (ASN, exact name, anchored name pattern, role, address inside a prefix),
//! and [`Filter::All`] / [`Filter::Any`] combine them.
//!
//! ## Binding kinds
//!
//! - [`BindingKind::Single`]: exactly one node must match; more than one is
//!   [`EmuError::BindingAmbiguous`]
//! - [`BindingKind::Broadcast`]: the virtual node is hosted on every match
//!
//! Zero matches is always [`EmuError::BindingUnsatisfied`]. Route servers
//! belong to exchanges, not to ASes, and are never candidates. A node hosts
//! at most one virtual node: a binding that selects a node already taken by
//! another virtual node fails with [`EmuError::NodeAlreadyHosting`].
//!
//! Applying bindings is idempotent: a virtual node that is already bound is
//! skipped on every later application.

use crate::error::{EmuError, Result};
use crate::ip::Ipv4Prefix;
use crate::registry::{Node, NodeRef, NodeRole, Registry};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// Virtual node name -> nodes hosting it.
pub type BoundNodes = BTreeMap<String, Vec<NodeRef>>;

#[derive(Debug, Clone)]
pub enum Filter {
    Asn(u32),
    NodeName(String),
    /// Anchored: must match the whole node name
    NamePattern(Regex),
    Role(NodeRole),
    /// Some interface address lies inside the prefix
    InPrefix(Ipv4Prefix),
    All(Vec<Filter>),
    Any(Vec<Filter>),
}

impl Filter {
    pub fn asn(asn: u32) -> Self {
        Filter::Asn(asn)
    }

    pub fn node_name(name: impl Into<String>) -> Self {
        Filter::NodeName(name.into())
    }

    pub fn name_pattern(pattern: &str) -> Result<Self> {
        Ok(Filter::NamePattern(Regex::new(&format!("^(?:{})$", pattern))?))
    }

    pub fn role(role: NodeRole) -> Self {
        Filter::Role(role)
    }

    pub fn in_prefix(prefix: Ipv4Prefix) -> Self {
        Filter::InPrefix(prefix)
    }

    /// Both predicates must hold.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All(mut filters) => {
                filters.push(other);
                Filter::All(filters)
            }
            first => Filter::All(vec![first, other]),
        }
    }

    /// Either predicate may hold.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Any(mut filters) => {
                filters.push(other);
                Filter::Any(filters)
            }
            first => Filter::Any(vec![first, other]),
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Filter::Asn(asn) => node.asn() == *asn,
            Filter::NodeName(name) => node.name() == name,
            Filter::NamePattern(pattern) => pattern.is_match(node.name()),
            Filter::Role(role) => node.role() == *role,
            Filter::InPrefix(prefix) => node
                .interfaces()
                .iter()
                .filter_map(|iface| iface.address)
                .any(|addr| prefix.contains(addr)),
            Filter::All(filters) => filters.iter().all(|f| f.matches(node)),
            Filter::Any(filters) => filters.iter().any(|f| f.matches(node)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |filters: &[Filter], sep: &str| {
            filters
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Filter::Asn(asn) => write!(f, "asn={}", asn),
            Filter::NodeName(name) => write!(f, "name={}", name),
            Filter::NamePattern(pattern) => write!(f, "name~{}", pattern.as_str()),
            Filter::Role(role) => write!(f, "role={}", role),
            Filter::InPrefix(prefix) => write!(f, "prefix={}", prefix),
            Filter::All(filters) => write!(f, "{}", join(filters, " and ")),
            Filter::Any(filters) => write!(f, "({})", join(filters, " or ")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    #[default]
    Single,
    Broadcast,
}

#[derive(Debug, Clone)]
pub struct Binding {
    virtual_node: String,
    filter: Filter,
    kind: BindingKind,
}

impl Binding {
    pub fn new(virtual_node: impl Into<String>, filter: Filter) -> Self {
        Binding {
            virtual_node: virtual_node.into(),
            filter,
            kind: BindingKind::Single,
        }
    }

    pub fn broadcast(virtual_node: impl Into<String>, filter: Filter) -> Self {
        Binding {
            kind: BindingKind::Broadcast,
            ..Binding::new(virtual_node, filter)
        }
    }

    pub fn virtual_node(&self) -> &str {
        &self.virtual_node
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }
}

/// Every AS node matching `filter`, in registry order.
pub fn resolve_binding(registry: &Registry, virtual_node: &str, filter: &Filter) -> Result<Vec<NodeRef>> {
    let matches: Vec<NodeRef> = registry
        .as_nodes()
        .filter(|node| filter.matches(node))
        .map(Node::node_ref)
        .collect();

    if matches.is_empty() {
        return Err(EmuError::BindingUnsatisfied {
            virtual_node: virtual_node.to_string(),
            filter: filter.to_string(),
        });
    }
    Ok(matches)
}

/// Resolve one binding into `bound`, unless its virtual node is already bound.
///
/// Returns `true` when this call bound the virtual node.
pub fn apply_binding(registry: &Registry, binding: &Binding, bound: &mut BoundNodes) -> Result<bool> {
    if bound.contains_key(binding.virtual_node()) {
        log::debug!("Virtual node {} already bound; skipping", binding.virtual_node());
        return Ok(false);
    }

    let matches = resolve_binding(registry, binding.virtual_node(), binding.filter())?;
    if binding.kind() == BindingKind::Single && matches.len() > 1 {
        return Err(EmuError::BindingAmbiguous {
            virtual_node: binding.virtual_node().to_string(),
            candidates: matches.iter().map(ToString::to_string).collect(),
        });
    }

    for node in &matches {
        if let Some((hosted, _)) = bound.iter().find(|(_, hosts)| hosts.contains(node)) {
            return Err(EmuError::NodeAlreadyHosting {
                virtual_node: binding.virtual_node().to_string(),
                node: node.to_string(),
                hosted: hosted.clone(),
            });
        }
    }

    log::debug!(
        "Bound virtual node {} to {}",
        binding.virtual_node(),
        matches
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    bound.insert(binding.virtual_node().to_string(), matches);
    Ok(true)
}
