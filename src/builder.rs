//! Fluent construction of leaf nodes and definitions
//!
//! `LeafSpec` describes one leaf node for [`Document::add_leaf`];
//! `DefinitionBuilder` assembles a whole definition — ports, leaves and
//! wiring — in one declarative pass, which is how tests and host setup
//! code build fixtures without juggling node ids.

use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::types::{DefinitionId, GraphRef, NodeId, SlotDefinition, SlotType};

/// Everything needed to place one leaf node
#[derive(Debug, Clone, Default)]
pub struct LeafSpec {
    pub node_type: String,
    pub inputs: Vec<SlotDefinition>,
    pub outputs: Vec<SlotDefinition>,
    pub data: serde_json::Value,
    pub position: (f64, f64),
    pub bypassed: bool,
}

impl LeafSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    /// Append an input slot
    pub fn input(mut self, name: impl Into<String>, slot_type: SlotType) -> Self {
        self.inputs.push(SlotDefinition::new(name, slot_type));
        self
    }

    /// Append an output slot
    pub fn output(mut self, name: impl Into<String>, slot_type: SlotType) -> Self {
        self.outputs.push(SlotDefinition::new(name, slot_type));
        self
    }

    /// Attach opaque configuration data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Set the canvas position
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }

    /// Place the node in pass-through mode
    pub fn bypassed(mut self) -> Self {
        self.bypassed = true;
        self
    }
}

/// Pseudo-key addressing the definition's `BoundaryInputs` node in
/// [`DefinitionBuilder::wire`]
pub const INPUTS_KEY: &str = "@inputs";
/// Pseudo-key addressing the definition's `BoundaryOutputs` node
pub const OUTPUTS_KEY: &str = "@outputs";

/// Declarative builder for a complete subgraph definition
///
/// Leaves are addressed by caller-chosen string keys until `build`
/// assigns real node ids; the `@inputs`/`@outputs` pseudo-keys address
/// the boundary pseudo-nodes. Wires are validated in declaration order
/// by the document's usual connection rules.
#[derive(Debug, Default)]
pub struct DefinitionBuilder {
    name: String,
    inputs: Vec<(String, SlotType)>,
    outputs: Vec<(String, SlotType)>,
    leaves: Vec<(String, LeafSpec)>,
    wires: Vec<(String, usize, String, usize)>,
}

impl DefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare an input port
    pub fn input(mut self, name: impl Into<String>, slot_type: SlotType) -> Self {
        self.inputs.push((name.into(), slot_type));
        self
    }

    /// Declare an output port
    pub fn output(mut self, name: impl Into<String>, slot_type: SlotType) -> Self {
        self.outputs.push((name.into(), slot_type));
        self
    }

    /// Declare a leaf node under a key for later wiring
    pub fn leaf(mut self, key: impl Into<String>, spec: LeafSpec) -> Self {
        self.leaves.push((key.into(), spec));
        self
    }

    /// Declare a wire between two declared keys
    pub fn wire(
        mut self,
        origin: impl Into<String>,
        origin_slot: usize,
        target: impl Into<String>,
        target_slot: usize,
    ) -> Self {
        self.wires
            .push((origin.into(), origin_slot, target.into(), target_slot));
        self
    }

    /// Materialize the definition inside `document`, returning its id
    pub fn build(self, document: &mut Document) -> Result<DefinitionId> {
        let id = document.create_definition(self.name);
        for (name, slot_type) in self.inputs {
            document.add_input(&id, name, slot_type)?;
        }
        for (name, slot_type) in self.outputs {
            document.add_output(&id, name, slot_type)?;
        }

        let at = GraphRef::Definition(id.clone());
        let mut keyed: std::collections::HashMap<String, NodeId> =
            std::collections::HashMap::new();
        {
            let def = document.definition(&id)?;
            keyed.insert(INPUTS_KEY.to_string(), def.input_node());
            keyed.insert(OUTPUTS_KEY.to_string(), def.output_node());
        }
        for (key, spec) in self.leaves {
            let node = document.add_leaf(&at, spec)?;
            keyed.insert(key, node);
        }

        for (origin, origin_slot, target, target_slot) in self.wires {
            let origin_id = *keyed
                .get(&origin)
                .ok_or(EngineError::UnknownNodeKey(origin))?;
            let target_id = *keyed
                .get(&target)
                .ok_or(EngineError::UnknownNodeKey(target))?;
            document.connect(&at, origin_id, origin_slot, target_id, target_slot)?;
        }
        Ok(id)
    }
}
