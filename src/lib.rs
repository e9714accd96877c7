//! Subgraph Engine - Hierarchical graph composition and flattening
//!
//! This crate provides the document model behind a node-based editor
//! with reusable subgraphs. It supports:
//!
//! - Named subgraph definitions with typed boundary ports
//! - Instances that mirror their definition's ports automatically
//! - Cancelable, synchronous port-change events
//! - Promotion of a node selection into a fresh definition
//! - Flattening the nested document into one executable node list,
//!   resolving links across boundaries and through bypassed nodes
//!
//! # Architecture
//!
//! A `Document` owns the root `GraphStore` plus an id-keyed arena of
//! `SubgraphDefinition`s; instances reference definitions by id only.
//! Flattening walks the nesting depth-first and gives every emitted
//! node a path of instance ids as its identity, so sibling instances
//! of the same definition never collide.
//!
//! # Example
//!
//! ```
//! use subgraph_engine::{
//!     DefinitionBuilder, Document, GraphRef, LeafSpec, SlotType, INPUTS_KEY, OUTPUTS_KEY,
//! };
//!
//! let mut doc = Document::new();
//! let doubler = DefinitionBuilder::new("Doubler")
//!     .input("value", SlotType::Number)
//!     .output("result", SlotType::Number)
//!     .leaf(
//!         "double",
//!         LeafSpec::new("double")
//!             .input("value", SlotType::Number)
//!             .output("result", SlotType::Number),
//!     )
//!     .wire(INPUTS_KEY, 0, "double", 0)
//!     .wire("double", 0, OUTPUTS_KEY, 0)
//!     .build(&mut doc)
//!     .unwrap();
//!
//! let instance = doc.instantiate(&doubler, &GraphRef::Root).unwrap();
//! let constant = doc
//!     .add_leaf(
//!         &GraphRef::Root,
//!         LeafSpec::new("constant").output("value", SlotType::Number),
//!     )
//!     .unwrap();
//! doc.connect(&GraphRef::Root, constant, 0, instance, 0).unwrap();
//!
//! let flat = doc.flatten().unwrap();
//! assert_eq!(flat.len(), 2);
//! ```

pub mod builder;
pub mod definition;
pub mod document;
pub mod error;
pub mod events;
pub mod flatten;
pub mod registry;
pub mod resolve;
pub mod types;

// Re-export key types
pub use builder::{DefinitionBuilder, LeafSpec, INPUTS_KEY, OUTPUTS_KEY};
pub use definition::{BoundaryPort, SubgraphDefinition};
pub use document::Document;
pub use error::{EngineError, Result};
pub use events::{ChangePropagator, EventDecision, EventLog, ObserverError, ObserverFn, PortEvent};
pub use flatten::{
    ExecPath, ExecutableNode, FlattenDiagnostic, FlattenOptions, FlattenedGraph, Flattener,
    InputBinding,
};
pub use registry::{NodeBlueprint, NodeRegistry, SimpleBlueprint};
pub use resolve::UnresolvedReason;
pub use types::{
    default_compat, CompatFn, DefinitionId, GraphRef, GraphStore, Link, Node, NodeId, NodeKind,
    SlotDefinition, SlotType, SubscriptionId,
};
