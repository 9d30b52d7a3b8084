//! Compose manifest types.
//!
//! Plain serde structs for the subset of the compose format the Docker
//! target emits. Maps are `BTreeMap` so the manifest is byte-for-byte
//! reproducible.

use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================================
// Manifest
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeService {
    /// Build context, relative to the manifest
    pub build: String,
    pub container_name: String,
    pub cap_add: Vec<String>,
    pub privileged: bool,
    pub sysctls: BTreeMap<String, String>,
    pub networks: BTreeMap<String, ServiceNetwork>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceNetwork {
    pub ipv4_address: String,
}

// ============================================================================
// Networks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeNetwork {
    pub driver: String,
    pub ipam: Ipam,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ipam {
    pub config: Vec<IpamConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpamConfig {
    pub subnet: String,
}
