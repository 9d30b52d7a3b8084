//! Error taxonomy for rendering, binding, merging and compiling.
//!
//! Every variant carries the identifiers needed to act on it (layer name,
//! node identifier, ASN, exchange ID or path) so that a failure can be
//! fixed without re-running with extra logging.

use crate::emulator::RenderState;
use std::fmt;
use std::path::PathBuf;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, EmuError>;

/// Something present on both sides of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Asn(u32),
    Exchange(u32),
    Layer(String),
    VirtualNode(String),
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Asn(asn) => write!(f, "AS{} defined on both sides", asn),
            Conflict::Exchange(id) => write!(f, "exchange {} defined on both sides", id),
            Conflict::Layer(name) => write!(f, "layer '{}' cannot be combined", name),
            Conflict::VirtualNode(name) => write!(f, "virtual node '{}' defined on both sides", name),
        }
    }
}

fn join_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("layer dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("layer '{layer}' depends on '{dependency}', which is not installed")]
    UnknownDependency { layer: String, dependency: String },

    #[error("binding for virtual node '{virtual_node}' matched no node ({filter})")]
    BindingUnsatisfied { virtual_node: String, filter: String },

    #[error("binding for virtual node '{virtual_node}' matched {} nodes: {}", .candidates.len(), .candidates.join(", "))]
    BindingAmbiguous {
        virtual_node: String,
        candidates: Vec<String>,
    },

    #[error("binding for virtual node '{virtual_node}' selected {node}, which already hosts '{hosted}'")]
    NodeAlreadyHosting {
        virtual_node: String,
        node: String,
        hosted: String,
    },

    #[error("virtual node '{virtual_node}' is not declared by any installed service")]
    UnknownVirtualNode { virtual_node: String },

    #[error("merge conflict: {}", join_conflicts(.conflicts))]
    MergeConflict { conflicts: Vec<Conflict> },

    #[error("cannot {operation} while emulator is {state}")]
    InvalidState {
        operation: &'static str,
        state: RenderState,
    },

    #[error("emulator is frozen after rendering; cannot {operation}")]
    FrozenState { operation: &'static str },

    #[error("failed to write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("layer '{layer}' failed: {source}")]
    LayerFailed {
        layer: String,
        #[source]
        source: Box<EmuError>,
    },

    #[error("{kind} '{id}' already exists")]
    DuplicateEntity { kind: &'static str, id: String },

    #[error("{kind} '{id}' does not exist")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid node name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("failed to serialize YAML artifact: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to serialize JSON artifact: {0}")]
    Json(#[from] serde_json::Error),
}

impl EmuError {
    pub(crate) fn duplicate(kind: &'static str, id: impl ToString) -> Self {
        EmuError::DuplicateEntity {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn unknown(kind: &'static str, id: impl ToString) -> Self {
        EmuError::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EmuError::ArtifactWrite {
            path: path.into(),
            source,
        }
    }

    /// Unwrap `LayerFailed` to the error that actually caused it.
    pub fn root_cause(&self) -> &EmuError {
        match self {
            EmuError::LayerFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_every_layer() {
        let err = EmuError::CyclicDependency {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "layer dependency cycle: A -> B -> A");
    }

    #[test]
    fn test_merge_conflict_lists_all_conflicts() {
        let err = EmuError::MergeConflict {
            conflicts: vec![Conflict::Asn(100), Conflict::Exchange(20)],
        };
        let message = err.to_string();
        assert!(message.contains("AS100"));
        assert!(message.contains("exchange 20"));
    }

    #[test]
    fn test_root_cause_unwraps_layer_failures() {
        let err = EmuError::LayerFailed {
            layer: "Ebgp".to_string(),
            source: Box::new(EmuError::unknown("exchange", 7)),
        };
        assert!(matches!(err.root_cause(), EmuError::UnknownEntity { kind: "exchange", .. }));
        assert!(err.to_string().contains("Ebgp"));
    }
}
