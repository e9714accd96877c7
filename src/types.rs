//! Core types for subgraph documents
//!
//! These types define the structure of one graph scope: nodes, typed
//! slots, links, and the `GraphStore` that owns them. A store is either
//! the top-level document graph or the internal graph of a
//! `SubgraphDefinition`.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node, local to its owning `GraphStore`
///
/// Identifiers are allocated monotonically and never reused while the
/// store lives, so a path of node ids stays unambiguous.
pub type NodeId = u64;

/// Globally unique, stable identifier for a `SubgraphDefinition`
pub type DefinitionId = String;

/// Identifier for a listener registration on a `ChangePropagator`
pub type SubscriptionId = u64;

/// Host-supplied slot type compatibility predicate
///
/// Used at connection time and during bypass resolution. Defaults to
/// [`SlotType::is_compatible_with`].
pub type CompatFn = fn(&SlotType, &SlotType) -> bool;

/// The data type of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// Accepts any type
    Any,
    /// Numeric value
    Number,
    /// Text string
    String,
    /// Boolean value
    Boolean,
    /// JSON object
    Json,
    /// Image data
    Image,
    /// Audio data
    Audio,
}

impl SlotType {
    /// Check if this type can connect to another type
    pub fn is_compatible_with(&self, other: &SlotType) -> bool {
        if matches!(self, SlotType::Any) || matches!(other, SlotType::Any) {
            return true;
        }
        self == other
    }
}

/// The default [`CompatFn`]
pub fn default_compat(origin: &SlotType, target: &SlotType) -> bool {
    origin.is_compatible_with(target)
}

pub(crate) fn default_compat_fn() -> CompatFn {
    default_compat
}

/// One named, typed input or output slot on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDefinition {
    /// Human-readable slot name (mutable, need not be unique)
    pub name: String,
    /// Data type used for connection validation
    pub slot_type: SlotType,
}

impl SlotDefinition {
    /// Create a new slot definition
    pub fn new(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
        }
    }
}

/// Where a `GraphStore` lives inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphRef {
    /// The top-level document graph
    Root,
    /// The internal graph of a subgraph definition
    Definition(DefinitionId),
}

/// What a node is, beyond its slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeKind {
    /// An ordinary leaf node, opaque to the engine
    Leaf,
    /// A placed instance of a subgraph definition
    #[serde(rename_all = "camelCase")]
    Subgraph {
        /// Non-owning reference into the definition arena
        definition_id: DefinitionId,
        /// Live mirror subscription on the definition's propagator.
        /// Rebuilt by `Document::rebind` after deserialization.
        #[serde(skip)]
        subscription: Option<SubscriptionId>,
    },
    /// Pseudo-node whose output slots mirror the definition's input ports
    BoundaryInputs,
    /// Pseudo-node whose input slots mirror the definition's output ports
    BoundaryOutputs,
}

/// A node in a graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Identifier, unique within the owning store
    pub id: NodeId,
    /// Node type tag (e.g. "constant", "subgraph")
    pub node_type: String,
    /// What this node is
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Ordered input slots
    pub inputs: Vec<SlotDefinition>,
    /// Ordered output slots
    pub outputs: Vec<SlotDefinition>,
    /// Pass-through mode: when set, the node forwards a compatible
    /// input directly to its output instead of computing
    #[serde(default)]
    pub bypassed: bool,
    /// Custom configuration, opaque to the engine
    #[serde(default)]
    pub data: serde_json::Value,
    /// Canvas position, passed through for the renderer. Other display
    /// geometry such as size travels in `data`.
    #[serde(default)]
    pub position: (f64, f64),
}

impl Node {
    /// Whether this node is one of the two boundary pseudo-nodes
    pub fn is_boundary(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::BoundaryInputs | NodeKind::BoundaryOutputs
        )
    }

    /// The referenced definition id, if this node is a subgraph instance
    pub fn definition_id(&self) -> Option<&DefinitionId> {
        match &self.kind {
            NodeKind::Subgraph { definition_id, .. } => Some(definition_id),
            _ => None,
        }
    }
}

type LinkTuple = (NodeId, usize, NodeId, usize);

/// A directed link between an output slot and an input slot
///
/// At most one link may terminate on any given input slot; an output
/// slot may feed any number of links. Both endpoints always belong to
/// the same `GraphStore`. Serializes as a 4-tuple of origin id/slot,
/// target id/slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LinkTuple", into = "LinkTuple")]
pub struct Link {
    pub origin_id: NodeId,
    pub origin_slot: usize,
    pub target_id: NodeId,
    pub target_slot: usize,
}

impl From<LinkTuple> for Link {
    fn from((origin_id, origin_slot, target_id, target_slot): LinkTuple) -> Self {
        Self {
            origin_id,
            origin_slot,
            target_id,
            target_slot,
        }
    }
}

impl From<Link> for LinkTuple {
    fn from(link: Link) -> Self {
        (
            link.origin_id,
            link.origin_slot,
            link.target_id,
            link.target_slot,
        )
    }
}

/// Flat node and link collections for one graph scope
///
/// Nodes iterate in insertion order, which is also the flatten
/// traversal order for this scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStore {
    nodes: Vec<Node>,
    links: Vec<Link>,
    next_node_id: NodeId,
}

impl GraphStore {
    /// Create a new empty graph store
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            next_node_id: 1,
        }
    }

    /// Add a leaf node with the given slots, returning its id
    pub fn add_leaf(
        &mut self,
        node_type: impl Into<String>,
        inputs: Vec<SlotDefinition>,
        outputs: Vec<SlotDefinition>,
    ) -> NodeId {
        self.add_node_of_kind(node_type, NodeKind::Leaf, inputs, outputs)
    }

    pub(crate) fn add_node_of_kind(
        &mut self,
        node_type: impl Into<String>,
        kind: NodeKind,
        inputs: Vec<SlotDefinition>,
        outputs: Vec<SlotDefinition>,
    ) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.push(Node {
            id,
            node_type: node_type.into(),
            kind,
            inputs,
            outputs,
            bypassed: false,
            data: serde_json::Value::Null,
            position: (0.0, 0.0),
        });
        id
    }

    /// Re-insert a node moved from another store, assigning a fresh id
    pub(crate) fn adopt_node(&mut self, mut node: Node) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        node.id = id;
        self.nodes.push(node);
        id
    }

    /// Remove a node and disconnect all of its links
    ///
    /// Boundary pseudo-nodes are owned by their definition and are
    /// rejected. Subgraph instances must be removed through
    /// `Document::remove_node` so their mirror subscription is released;
    /// this method only detaches the node structurally.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> crate::error::Result<Node> {
        let pos = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or(crate::error::EngineError::UnknownNode(id))?;
        if self.nodes[pos].is_boundary() {
            return Err(crate::error::EngineError::BoundaryNodeRemoval(id));
        }
        self.links
            .retain(|l| l.origin_id != id && l.target_id != id);
        Ok(self.nodes.remove(pos))
    }

    /// Find a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by id (mutable)
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Iterate nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Number of nodes in this store
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All links in this store
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Connect an output slot to an input slot
    ///
    /// Validates that both endpoints exist, both slot indices are in
    /// range, and the slot types are compatible under `compat`. An
    /// existing link on the target slot is replaced.
    pub fn connect(
        &mut self,
        origin_id: NodeId,
        origin_slot: usize,
        target_id: NodeId,
        target_slot: usize,
        compat: CompatFn,
    ) -> crate::error::Result<()> {
        use crate::error::EngineError;

        let origin = self
            .node(origin_id)
            .ok_or(EngineError::UnknownNode(origin_id))?;
        let origin_type = origin
            .outputs
            .get(origin_slot)
            .ok_or(EngineError::SlotOutOfRange {
                node: origin_id,
                slot: origin_slot,
            })?
            .slot_type;
        let target = self
            .node(target_id)
            .ok_or(EngineError::UnknownNode(target_id))?;
        let target_type = target
            .inputs
            .get(target_slot)
            .ok_or(EngineError::SlotOutOfRange {
                node: target_id,
                slot: target_slot,
            })?
            .slot_type;

        if !compat(&origin_type, &target_type) {
            return Err(EngineError::TypeMismatch {
                origin: origin_type,
                target: target_type,
            });
        }

        self.disconnect_input(target_id, target_slot);
        self.links.push(Link {
            origin_id,
            origin_slot,
            target_id,
            target_slot,
        });
        log::trace!(
            "connected ({origin_id},{origin_slot}) -> ({target_id},{target_slot})"
        );
        Ok(())
    }

    pub(crate) fn insert_link(&mut self, link: Link) {
        self.disconnect_input(link.target_id, link.target_slot);
        self.links.push(link);
    }

    /// Remove the link terminating on the given input slot, if any
    pub fn disconnect_input(&mut self, target_id: NodeId, target_slot: usize) -> bool {
        let before = self.links.len();
        self.links
            .retain(|l| !(l.target_id == target_id && l.target_slot == target_slot));
        before != self.links.len()
    }

    /// The link terminating on the given input slot, if any
    pub fn link_to(&self, target_id: NodeId, target_slot: usize) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.target_id == target_id && l.target_slot == target_slot)
    }

    /// Links originating at the given output slot
    pub fn links_from(
        &self,
        origin_id: NodeId,
        origin_slot: usize,
    ) -> impl Iterator<Item = &Link> {
        self.links
            .iter()
            .filter(move |l| l.origin_id == origin_id && l.origin_slot == origin_slot)
    }

    /// Remove an input slot from a node, disconnecting its link and
    /// shifting links bound to higher input slots down by one.
    pub(crate) fn remove_input_slot(&mut self, node_id: NodeId, index: usize) -> bool {
        let Some(node) = self.node_mut(node_id) else {
            return false;
        };
        if index >= node.inputs.len() {
            return false;
        }
        node.inputs.remove(index);
        self.links
            .retain(|l| !(l.target_id == node_id && l.target_slot == index));
        for link in &mut self.links {
            if link.target_id == node_id && link.target_slot > index {
                link.target_slot -= 1;
            }
        }
        true
    }

    /// Remove an output slot from a node, disconnecting links that
    /// originate at it and shifting higher output slots down by one.
    pub(crate) fn remove_output_slot(&mut self, node_id: NodeId, index: usize) -> bool {
        let Some(node) = self.node_mut(node_id) else {
            return false;
        };
        if index >= node.outputs.len() {
            return false;
        }
        node.outputs.remove(index);
        self.links
            .retain(|l| !(l.origin_id == node_id && l.origin_slot == index));
        for link in &mut self.links {
            if link.origin_id == node_id && link.origin_slot > index {
                link.origin_slot -= 1;
            }
        }
        true
    }
}
