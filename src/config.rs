//! Scenario configuration.
//!
//! A scenario file describes a whole emulation in YAML: exchanges, the ASes
//! attached to them, which layers to install, eBGP peerings, an optional
//! Ethereum service and the bindings that place its virtual nodes.
//!
//! ```yaml
//! general:
//!   output: ./output
//!   log_level: info
//! exchanges:
//!   - id: 100
//!     display_name: New York-100
//! stub_ases:
//!   - { asn: 99, exchange: 100, hosts: 2 }
//! layers: [base, routing, ebgp, ibgp, ospf]
//! ebgp:
//!   rs_peers:
//!     - { exchange: 100, asns: [99] }
//! ```

use crate::compiler::StateDirPolicy;
use crate::layer::PeerRelationship;
use crate::service::ConsensusMechanism;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub stub_ases: Vec<StubAsConfig>,
    #[serde(default)]
    pub transit_ases: Vec<TransitAsConfig>,
    pub layers: Vec<LayerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebgp: Option<EbgpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethereum: Option<EthereumConfig>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Replace an existing output directory
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    #[serde(default)]
    pub state_policy: StateDirPolicy,
}

fn default_output() -> PathBuf {
    PathBuf::from("output")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            output: default_output(),
            override_existing: false,
            log_level: Some("info".to_string()),
            base_image: None,
            state_policy: StateDirPolicy::Reuse,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubAsConfig {
    pub asn: u32,
    pub exchange: u32,
    #[serde(default = "default_hosts")]
    pub hosts: usize,
}

fn default_hosts() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitAsConfig {
    pub asn: u32,
    pub exchanges: Vec<u32>,
    #[serde(default)]
    pub links: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Base,
    Routing,
    Ebgp,
    Ibgp,
    Ospf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EbgpConfig {
    #[serde(default)]
    pub rs_peers: Vec<RsPeersConfig>,
    #[serde(default)]
    pub private_peerings: Vec<PrivatePeeringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsPeersConfig {
    pub exchange: u32,
    pub asns: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivatePeeringConfig {
    pub exchange: u32,
    pub a: u32,
    pub b: u32,
    pub relationship: PeerRelationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    #[serde(default)]
    pub consensus: ConsensusMechanism,
    #[serde(default)]
    pub save_state: bool,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub servers: Vec<EthereumServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumServerConfig {
    pub name: String,
    #[serde(default)]
    pub boot_node: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<AccountsConfig>,
    #[serde(default)]
    pub unlock_accounts: bool,
    #[serde(default)]
    pub start_miner: bool,
    #[serde(default)]
    pub external_connection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub port_forwarding: Vec<PortForwardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Wei
    pub balance: u64,
    pub count: u32,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortForwardConfig {
    pub host: u16,
    pub container: u16,
}

/// Filter fields are combined with AND; at least one is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingConfig {
    pub virtual_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<crate::registry::NodeRole>,
    #[serde(default)]
    pub broadcast: bool,
}

impl BindingConfig {
    fn has_filter(&self) -> bool {
        self.asn.is_some() || self.node_name.is_some() || self.name_pattern.is_some() || self.role.is_some()
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid topology configuration: {0}")]
    InvalidTopology(String),
    #[error("Invalid layer configuration: {0}")]
    InvalidLayers(String),
    #[error("Invalid service configuration: {0}")]
    InvalidService(String),
    #[error("Invalid binding configuration: {0}")]
    InvalidBinding(String),
}

impl Config {
    /// Check the scenario for problems that do not need rendering to find.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.general.output.as_os_str().is_empty() {
            return Err(ValidationError::InvalidGeneral("output cannot be empty".to_string()));
        }

        let mut exchanges = BTreeSet::new();
        for ix in &self.exchanges {
            if ix.id == 0 {
                return Err(ValidationError::InvalidTopology("exchange id 0 is not allowed".to_string()));
            }
            if !exchanges.insert(ix.id) {
                return Err(ValidationError::InvalidTopology(format!("exchange {} defined twice", ix.id)));
            }
        }

        let mut asns = BTreeSet::new();
        for stub in &self.stub_ases {
            if !asns.insert(stub.asn) {
                return Err(ValidationError::InvalidTopology(format!("AS{} defined twice", stub.asn)));
            }
            if !exchanges.contains(&stub.exchange) {
                return Err(ValidationError::InvalidTopology(format!(
                    "AS{} joins undefined exchange {}",
                    stub.asn, stub.exchange
                )));
            }
        }
        for transit in &self.transit_ases {
            if !asns.insert(transit.asn) {
                return Err(ValidationError::InvalidTopology(format!("AS{} defined twice", transit.asn)));
            }
            if let Some(missing) = transit.exchanges.iter().find(|id| !exchanges.contains(*id)) {
                return Err(ValidationError::InvalidTopology(format!(
                    "AS{} joins undefined exchange {}",
                    transit.asn, missing
                )));
            }
        }

        if self.layers.is_empty() {
            return Err(ValidationError::InvalidLayers("at least one layer is required".to_string()));
        }
        let mut layers = BTreeSet::new();
        for layer in &self.layers {
            if !layers.insert(*layer) {
                return Err(ValidationError::InvalidLayers(format!("layer {:?} listed twice", layer)));
            }
        }
        if self.ebgp.is_some() && !layers.contains(&LayerKind::Ebgp) {
            return Err(ValidationError::InvalidLayers(
                "ebgp peerings are configured but the ebgp layer is not listed".to_string(),
            ));
        }

        let mut virtual_nodes = BTreeSet::new();
        if let Some(eth) = &self.ethereum {
            for server in &eth.servers {
                if server.name.is_empty() {
                    return Err(ValidationError::InvalidService("server name cannot be empty".to_string()));
                }
                if !virtual_nodes.insert(server.name.as_str()) {
                    return Err(ValidationError::InvalidService(format!(
                        "virtual node {} defined twice",
                        server.name
                    )));
                }
            }
        }

        for binding in &self.bindings {
            if !binding.has_filter() {
                return Err(ValidationError::InvalidBinding(format!(
                    "binding for {} has no filter field",
                    binding.virtual_node
                )));
            }
            if !virtual_nodes.contains(binding.virtual_node.as_str()) {
                return Err(ValidationError::InvalidBinding(format!(
                    "binding names undeclared virtual node {}",
                    binding.virtual_node
                )));
            }
        }

        Ok(())
    }
}
