//! Subgraph definitions and their boundary ports
//!
//! A `SubgraphDefinition` is a named, reusable graph template: an
//! internal `GraphStore` plus ordered lists of `BoundaryPort`s. A
//! boundary port is dual-natured: a definition *input* is an output to
//! nodes inside the body (exposed as an output slot on the
//! `BoundaryInputs` pseudo-node) and an input as seen from the parent
//! graph through any instance's mirrored slot list. Output ports mirror
//! this symmetrically.
//!
//! The pure slot mutations live here; event dispatch and instance
//! fan-out are orchestrated by [`crate::document::Document`] so a port
//! change can reach instances placed in any graph of the document.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::events::ChangePropagator;
use crate::types::{DefinitionId, GraphStore, NodeId, NodeKind, SlotDefinition, SlotType};

/// A declared input or output of a subgraph definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryPort {
    /// Display name; mutable and not required to be unique
    pub name: String,
    /// Type tag used for connection validation
    pub slot_type: SlotType,
    /// Position in the owning list; renumbered contiguously on removal
    pub index: usize,
}

impl BoundaryPort {
    pub fn new(name: impl Into<String>, slot_type: SlotType, index: usize) -> Self {
        Self {
            name: name.into(),
            slot_type,
            index,
        }
    }

    /// The slot this port projects onto mirrored slot lists
    pub fn slot(&self) -> SlotDefinition {
        SlotDefinition::new(self.name.clone(), self.slot_type)
    }
}

/// A named, reusable graph template referenced by subgraph instances
///
/// Edited once, reflected everywhere: every live instance subscribes to
/// the definition's propagator and mirrors its current port lists.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphDefinition {
    /// Globally unique, stable identifier
    pub id: DefinitionId,
    /// Human-readable name
    pub name: String,
    graph: GraphStore,
    inputs: Vec<BoundaryPort>,
    outputs: Vec<BoundaryPort>,
    input_node: NodeId,
    output_node: NodeId,
    #[serde(skip)]
    pub(crate) propagator: ChangePropagator,
}

impl SubgraphDefinition {
    /// Create an empty definition with its two boundary pseudo-nodes
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = GraphStore::new();
        let input_node =
            graph.add_node_of_kind("subgraph-inputs", NodeKind::BoundaryInputs, vec![], vec![]);
        let output_node =
            graph.add_node_of_kind("subgraph-outputs", NodeKind::BoundaryOutputs, vec![], vec![]);
        Self {
            id: format!("def-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            graph,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_node,
            output_node,
            propagator: ChangePropagator::new(),
        }
    }

    /// The internal graph
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// The internal graph (mutable)
    ///
    /// Boundary pseudo-node slot lists are managed by the port
    /// operations; edit ports through `Document`, not through this.
    pub fn graph_mut(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    /// Ordered input ports
    pub fn inputs(&self) -> &[BoundaryPort] {
        &self.inputs
    }

    /// Ordered output ports
    pub fn outputs(&self) -> &[BoundaryPort] {
        &self.outputs
    }

    /// Id of the pseudo-node whose output slots mirror the input ports
    pub fn input_node(&self) -> NodeId {
        self.input_node
    }

    /// Id of the pseudo-node whose input slots mirror the output ports
    pub fn output_node(&self) -> NodeId {
        self.output_node
    }

    /// The definition's event channel
    pub fn propagator(&self) -> &ChangePropagator {
        &self.propagator
    }

    /// The definition's event channel (mutable, for observer subscription)
    pub fn propagator_mut(&mut self) -> &mut ChangePropagator {
        &mut self.propagator
    }

    /// Input port at `index`, or `InvalidPort`
    pub fn input(&self, index: usize) -> Result<&BoundaryPort> {
        self.inputs.get(index).ok_or_else(|| EngineError::InvalidPort {
            definition: self.id.clone(),
            index,
        })
    }

    /// Output port at `index`, or `InvalidPort`
    pub fn output(&self, index: usize) -> Result<&BoundaryPort> {
        self.outputs
            .get(index)
            .ok_or_else(|| EngineError::InvalidPort {
                definition: self.id.clone(),
                index,
            })
    }

    /// The slot lists an instance of this definition mirrors
    pub fn instance_slots(&self) -> (Vec<SlotDefinition>, Vec<SlotDefinition>) {
        (
            self.inputs.iter().map(BoundaryPort::slot).collect(),
            self.outputs.iter().map(BoundaryPort::slot).collect(),
        )
    }

    /// Number of live instances mirroring this definition
    pub fn live_instances(&self) -> usize {
        self.propagator.mirror_count()
    }

    pub(crate) fn push_input(&mut self, name: impl Into<String>, slot_type: SlotType) -> BoundaryPort {
        let port = BoundaryPort::new(name, slot_type, self.inputs.len());
        self.inputs.push(port.clone());
        if let Some(node) = self.graph.node_mut(self.input_node) {
            node.outputs.push(port.slot());
        }
        port
    }

    pub(crate) fn push_output(&mut self, name: impl Into<String>, slot_type: SlotType) -> BoundaryPort {
        let port = BoundaryPort::new(name, slot_type, self.outputs.len());
        self.outputs.push(port.clone());
        if let Some(node) = self.graph.node_mut(self.output_node) {
            node.inputs.push(port.slot());
        }
        port
    }

    /// Remove the input port at `index`: disconnect internal links fed by
    /// its boundary slot, splice it out, renumber the remaining ports.
    pub(crate) fn splice_input(&mut self, index: usize) -> Result<BoundaryPort> {
        if index >= self.inputs.len() {
            return Err(EngineError::InvalidPort {
                definition: self.id.clone(),
                index,
            });
        }
        self.graph.remove_output_slot(self.input_node, index);
        let port = self.inputs.remove(index);
        self.renumber();
        Ok(port)
    }

    /// Remove the output port at `index`: disconnect the internal link
    /// driving its boundary slot, splice it out, renumber.
    pub(crate) fn splice_output(&mut self, index: usize) -> Result<BoundaryPort> {
        if index >= self.outputs.len() {
            return Err(EngineError::InvalidPort {
                definition: self.id.clone(),
                index,
            });
        }
        self.graph.remove_input_slot(self.output_node, index);
        let port = self.outputs.remove(index);
        self.renumber();
        Ok(port)
    }

    pub(crate) fn rename_input_at(&mut self, index: usize, new_name: &str) -> Result<String> {
        let port = self
            .inputs
            .get_mut(index)
            .ok_or_else(|| EngineError::InvalidPort {
                definition: self.id.clone(),
                index,
            })?;
        let old_name = std::mem::replace(&mut port.name, new_name.to_string());
        if let Some(node) = self.graph.node_mut(self.input_node) {
            if let Some(slot) = node.outputs.get_mut(index) {
                slot.name = new_name.to_string();
            }
        }
        Ok(old_name)
    }

    pub(crate) fn rename_output_at(&mut self, index: usize, new_name: &str) -> Result<String> {
        let port = self
            .outputs
            .get_mut(index)
            .ok_or_else(|| EngineError::InvalidPort {
                definition: self.id.clone(),
                index,
            })?;
        let old_name = std::mem::replace(&mut port.name, new_name.to_string());
        if let Some(node) = self.graph.node_mut(self.output_node) {
            if let Some(slot) = node.inputs.get_mut(index) {
                slot.name = new_name.to_string();
            }
        }
        Ok(old_name)
    }

    /// Keep port indices contiguous from 0 after a removal
    fn renumber(&mut self) {
        for (i, port) in self.inputs.iter_mut().enumerate() {
            port.index = i;
        }
        for (i, port) in self.outputs.iter_mut().enumerate() {
            port.index = i;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::default_compat;

    #[test]
    fn test_new_definition_has_boundary_nodes() {
        let def = SubgraphDefinition::new("D");
        assert!(def.graph().node(def.input_node()).unwrap().is_boundary());
        assert!(def.graph().node(def.output_node()).unwrap().is_boundary());
        assert!(def.inputs().is_empty());
        assert!(def.outputs().is_empty());
    }

    #[test]
    fn test_push_input_mirrors_boundary_slot() {
        let mut def = SubgraphDefinition::new("D");
        let port = def.push_input("a", SlotType::Number);
        assert_eq!(port.index, 0);

        let boundary = def.graph().node(def.input_node()).unwrap();
        assert_eq!(boundary.outputs.len(), 1);
        assert_eq!(boundary.outputs[0].name, "a");
        assert_eq!(boundary.outputs[0].slot_type, SlotType::Number);
    }

    #[test]
    fn test_splice_input_disconnects_and_renumbers() {
        let mut def = SubgraphDefinition::new("D");
        def.push_input("a", SlotType::Number);
        def.push_input("b", SlotType::String);
        let input_node = def.input_node();

        let consumer = def.graph_mut().add_leaf(
            "consumer",
            vec![SlotDefinition::new("in", SlotType::Number)],
            vec![],
        );
        def.graph_mut()
            .connect(input_node, 0, consumer, 0, default_compat)
            .unwrap();

        let removed = def.splice_input(0).unwrap();
        assert_eq!(removed.name, "a");
        assert!(def.graph().links().is_empty());
        assert_eq!(def.inputs().len(), 1);
        assert_eq!(def.inputs()[0].name, "b");
        assert_eq!(def.inputs()[0].index, 0);
        assert_eq!(def.graph().node(input_node).unwrap().outputs.len(), 1);
    }

    #[test]
    fn test_splice_invalid_port() {
        let mut def = SubgraphDefinition::new("D");
        let err = def.splice_input(0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPort { index: 0, .. }));
    }

    #[test]
    fn test_rename_updates_boundary_slot() {
        let mut def = SubgraphDefinition::new("D");
        def.push_output("result", SlotType::Number);

        let old = def.rename_output_at(0, "sum").unwrap();
        assert_eq!(old, "result");
        assert_eq!(def.outputs()[0].name, "sum");
        let boundary = def.graph().node(def.output_node()).unwrap();
        assert_eq!(boundary.inputs[0].name, "sum");
    }

    #[test]
    fn test_definition_serde_skips_propagator() {
        let mut def = SubgraphDefinition::new("D");
        def.push_input("a", SlotType::Number);
        def.propagator_mut()
            .subscribe_observer(Box::new(|_| Ok(crate::events::EventDecision::Continue)));

        let json = serde_json::to_string(&def).unwrap();
        let restored: SubgraphDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, def.id);
        assert_eq!(restored.inputs().len(), 1);
        assert_eq!(restored.propagator().listener_count(), 0);
    }
}
