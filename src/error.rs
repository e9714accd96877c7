//! Error types for the subgraph engine

use thiserror::Error;

use crate::types::{DefinitionId, NodeId, SlotType};

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the subgraph engine
///
/// Per-link resolution failures during flattening are deliberately absent:
/// they degrade gracefully and are reported as diagnostics on the flatten
/// result instead of aborting the pass.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A definition transitively contains an instance of itself
    #[error("Subgraph definition '{definition}' transitively contains an instance of itself")]
    Recursion { definition: DefinitionId },

    /// Flatten traversal exceeded the configured depth limit
    #[error("Flatten traversal exceeded the depth limit of {limit}")]
    DepthLimitExceeded { limit: usize },

    /// A port operation referenced an index not present on the definition
    #[error("Port index {index} is not present on definition '{definition}'")]
    InvalidPort {
        definition: DefinitionId,
        index: usize,
    },

    /// An attempted connection between incompatible slot types
    #[error("Incompatible slot types: {origin:?} -> {target:?}")]
    TypeMismatch { origin: SlotType, target: SlotType },

    /// A referenced definition does not exist in the arena
    #[error("Unknown subgraph definition '{0}'")]
    UnknownDefinition(DefinitionId),

    /// A referenced node does not exist in the graph store
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// A slot index was out of range for the referenced node
    #[error("Slot {slot} is out of range on node {node}")]
    SlotOutOfRange { node: NodeId, slot: usize },

    /// Boundary pseudo-nodes are owned by their definition and cannot be removed
    #[error("Node {0} is a boundary node and cannot be removed")]
    BoundaryNodeRemoval(NodeId),

    /// A definition still has live instances and cannot be destroyed
    #[error("Definition '{definition}' still has {instances} live instance(s)")]
    DefinitionInUse {
        definition: DefinitionId,
        instances: usize,
    },

    /// Promotion was attempted on an empty selection
    #[error("Cannot promote an empty selection to a subgraph")]
    EmptySelection,

    /// A builder wire referenced a node key that was never declared
    #[error("Wire references unknown node key '{0}'")]
    UnknownNodeKey(String),

    /// A node type was requested from the registry but never registered
    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),
}
