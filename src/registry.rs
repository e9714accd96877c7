//! Node blueprint registry
//!
//! The engine treats leaf nodes as opaque, but hosts usually draw them
//! from a palette of known node types. A `NodeBlueprint` describes one
//! such type; the `NodeRegistry` indexes blueprints by type tag and
//! stamps out [`LeafSpec`]s from them.

use std::collections::HashMap;

use crate::builder::LeafSpec;
use crate::error::{EngineError, Result};
use crate::types::{SlotDefinition, SlotType};

/// A registered description of one leaf node type
pub trait NodeBlueprint {
    /// The type tag placed nodes will carry
    fn node_type(&self) -> &str;
    /// Input slots a fresh node starts with
    fn inputs(&self) -> Vec<SlotDefinition>;
    /// Output slots a fresh node starts with
    fn outputs(&self) -> Vec<SlotDefinition>;
}

/// Data-driven blueprint, sufficient for most node types
#[derive(Debug, Clone)]
pub struct SimpleBlueprint {
    node_type: String,
    inputs: Vec<SlotDefinition>,
    outputs: Vec<SlotDefinition>,
}

impl SimpleBlueprint {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, slot_type: SlotType) -> Self {
        self.inputs.push(SlotDefinition::new(name, slot_type));
        self
    }

    pub fn output(mut self, name: impl Into<String>, slot_type: SlotType) -> Self {
        self.outputs.push(SlotDefinition::new(name, slot_type));
        self
    }
}

impl NodeBlueprint for SimpleBlueprint {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn inputs(&self) -> Vec<SlotDefinition> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<SlotDefinition> {
        self.outputs.clone()
    }
}

/// Blueprint index keyed by node type tag
#[derive(Default)]
pub struct NodeRegistry {
    blueprints: HashMap<String, Box<dyn NodeBlueprint>>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.blueprints.len())
            .finish()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blueprint, replacing any previous one for its type
    pub fn register(&mut self, blueprint: Box<dyn NodeBlueprint>) {
        let node_type = blueprint.node_type().to_string();
        if self.blueprints.insert(node_type.clone(), blueprint).is_some() {
            log::debug!("replaced blueprint for node type '{node_type}'");
        }
    }

    /// Whether a blueprint exists for the given type tag
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.blueprints.contains_key(node_type)
    }

    /// Look up a blueprint by type tag
    pub fn get(&self, node_type: &str) -> Option<&dyn NodeBlueprint> {
        self.blueprints.get(node_type).map(|b| b.as_ref())
    }

    /// Registered type tags, in no particular order
    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.blueprints.keys().map(String::as_str)
    }

    /// Stamp a [`LeafSpec`] from the registered blueprint
    pub fn spec(&self, node_type: &str) -> Result<LeafSpec> {
        let blueprint = self
            .get(node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))?;
        let mut spec = LeafSpec::new(blueprint.node_type());
        spec.inputs = blueprint.inputs();
        spec.outputs = blueprint.outputs();
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::types::GraphRef;

    fn sample_registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(Box::new(
            SimpleBlueprint::new("constant").output("value", SlotType::Number),
        ));
        registry.register(Box::new(
            SimpleBlueprint::new("double")
                .input("value", SlotType::Number)
                .output("result", SlotType::Number),
        ));
        registry
    }

    #[test]
    fn test_lookup() {
        let registry = sample_registry();
        assert!(registry.has_node_type("constant"));
        assert!(!registry.has_node_type("missing"));
        assert_eq!(registry.get("double").unwrap().inputs().len(), 1);
        assert_eq!(registry.node_types().count(), 2);
    }

    #[test]
    fn test_spec_from_blueprint() {
        let registry = sample_registry();
        let spec = registry.spec("double").unwrap();
        assert_eq!(spec.node_type, "double");
        assert_eq!(spec.inputs[0].name, "value");
        assert_eq!(spec.outputs[0].name, "result");

        let err = registry.spec("missing").unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType(t) if t == "missing"));
    }

    #[test]
    fn test_spec_places_into_document() {
        let registry = sample_registry();
        let mut doc = Document::new();
        let node = doc
            .add_leaf(&GraphRef::Root, registry.spec("constant").unwrap())
            .unwrap();
        assert_eq!(doc.root().node(node).unwrap().node_type, "constant");
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = sample_registry();
        registry.register(Box::new(
            SimpleBlueprint::new("constant").output("value", SlotType::String),
        ));
        assert_eq!(
            registry.spec("constant").unwrap().outputs[0].slot_type,
            SlotType::String
        );
    }
}
