//! Link resolution across subgraph boundaries
//!
//! Answers one question: for a given input slot, seen from a given
//! nesting scope, which executable node's output actually feeds it?
//! The trace walks links backwards, crossing `BoundaryInputs` upward
//! into the parent scope, descending through subgraph instances into
//! the slot feeding the matching `BoundaryOutputs` slot, and skipping
//! over bypassed nodes onto a compatible input. Pure pseudo-node hops
//! never surface in the result.
//!
//! Resolutions are memoized per flatten pass, keyed by the instance
//! path of the scope plus the consuming slot, so shared upstream
//! chains are traced once.

use std::collections::HashMap;

use serde::Serialize;

use crate::document::Document;
use crate::flatten::{ExecPath, InputBinding};
use crate::types::{CompatFn, DefinitionId, GraphRef, NodeId, NodeKind, SlotType};

/// Step ceiling for a single trace; generous, a legitimate trace is
/// bounded by graph size times nesting depth
const DEFAULT_STEP_LIMIT: usize = 10_000;

/// One level of instance nesting during resolution
///
/// Records which instance node was entered and which graph it sits in,
/// so an upward boundary crossing can return to the exact parent slot.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// The subgraph instance node in the parent graph
    pub instance: NodeId,
    /// The graph containing that instance
    pub parent: GraphRef,
}

/// Why an input could not be resolved to a producer
///
/// Carried in flatten diagnostics; the affected input stays unbound.
/// An input with no link at all is not an error and produces no reason.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "type", content = "detail", rename_all = "camelCase")]
pub enum UnresolvedReason {
    /// A link's origin node does not exist
    #[error("link origin node {0} does not exist")]
    DanglingOrigin(NodeId),
    /// A link's origin slot index is out of range on its node
    #[error("origin slot {slot} out of range on node {node}")]
    #[serde(rename_all = "camelCase")]
    OriginSlotOutOfRange { node: NodeId, slot: usize },
    /// A bypassed node has no input compatible with the requested output
    #[error("bypassed node {node} has no input compatible with {requested:?}")]
    #[serde(rename_all = "camelCase")]
    IncompatibleBypass { node: NodeId, requested: SlotType },
    /// An instance on the trace references a missing definition
    #[error("definition {0} does not exist")]
    MissingDefinition(DefinitionId),
    /// A boundary crossing walked above the execution root
    #[error("boundary crossing escaped the execution root")]
    EscapedRoot,
    /// A link originates at a slot that can never produce a value
    #[error("link origin can never produce a value")]
    InvalidOrigin,
    /// The trace exceeded its step ceiling
    #[error("resolution exceeded {0} steps")]
    StepLimit(usize),
}

/// Outcome of one resolution: a producer binding, nothing connected,
/// or a reason the trace failed
pub(crate) type Resolution = Result<Option<InputBinding>, UnresolvedReason>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: Vec<NodeId>,
    node: NodeId,
    slot: usize,
}

/// Backward link tracer over one document, with memoization
///
/// Scoped to a single flatten pass: the cache assumes the document does
/// not change underneath it.
pub(crate) struct LinkResolver<'a> {
    document: &'a Document,
    compat: CompatFn,
    cache: HashMap<CacheKey, Resolution>,
    step_limit: usize,
}

impl<'a> LinkResolver<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            compat: document.compat(),
            cache: HashMap::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Resolve the producer of `node`'s input `slot` within `scope`
    ///
    /// `at` is the graph `node` lives in: the definition entered by the
    /// innermost frame, or the root when `scope` is empty.
    pub fn resolve(
        &mut self,
        scope: &[Frame],
        at: &GraphRef,
        node: NodeId,
        slot: usize,
    ) -> Resolution {
        let mut frames: Vec<Frame> = scope.to_vec();
        let mut graph_ref = at.clone();
        let mut target = (node, slot);
        // Every key visited on the way shares the final outcome.
        let mut pending: Vec<CacheKey> = Vec::new();
        let mut steps = 0;

        let result: Resolution = loop {
            let key = CacheKey {
                scope: frames.iter().map(|f| f.instance).collect(),
                node: target.0,
                slot: target.1,
            };
            if let Some(cached) = self.cache.get(&key) {
                break cached.clone();
            }
            pending.push(key);
            steps += 1;
            if steps > self.step_limit {
                break Err(UnresolvedReason::StepLimit(self.step_limit));
            }

            let graph = match self.document.graph(&graph_ref) {
                Ok(graph) => graph,
                Err(_) => {
                    let id = match &graph_ref {
                        GraphRef::Definition(id) => id.clone(),
                        GraphRef::Root => String::new(),
                    };
                    break Err(UnresolvedReason::MissingDefinition(id));
                }
            };
            let Some(link) = graph.link_to(target.0, target.1) else {
                break Ok(None);
            };
            let (origin_id, origin_slot) = (link.origin_id, link.origin_slot);
            let Some(origin) = graph.node(origin_id) else {
                break Err(UnresolvedReason::DanglingOrigin(origin_id));
            };

            match &origin.kind {
                NodeKind::Leaf if !origin.bypassed => {
                    if origin_slot >= origin.outputs.len() {
                        break Err(UnresolvedReason::OriginSlotOutOfRange {
                            node: origin_id,
                            slot: origin_slot,
                        });
                    }
                    let mut segments: Vec<NodeId> =
                        frames.iter().map(|f| f.instance).collect();
                    segments.push(origin_id);
                    break Ok(Some(InputBinding {
                        producer: ExecPath::new(segments),
                        output_slot: origin_slot,
                    }));
                }
                NodeKind::Leaf => {
                    // Bypassed: continue the trace from whichever of the
                    // node's inputs feeds the requested output. The
                    // same-index input wins when compatible, otherwise
                    // the first compatible one.
                    let Some(requested) = origin.outputs.get(origin_slot) else {
                        break Err(UnresolvedReason::OriginSlotOutOfRange {
                            node: origin_id,
                            slot: origin_slot,
                        });
                    };
                    let requested = requested.slot_type;
                    let same_index = origin
                        .inputs
                        .get(origin_slot)
                        .is_some_and(|s| (self.compat)(&s.slot_type, &requested));
                    let picked = if same_index {
                        Some(origin_slot)
                    } else {
                        origin
                            .inputs
                            .iter()
                            .position(|s| (self.compat)(&s.slot_type, &requested))
                    };
                    match picked {
                        Some(input_slot) => target = (origin_id, input_slot),
                        None => {
                            break Err(UnresolvedReason::IncompatibleBypass {
                                node: origin_id,
                                requested,
                            })
                        }
                    }
                }
                NodeKind::BoundaryInputs => {
                    // Cross upward: the boundary slot maps 1:1 onto the
                    // instance's input slot in the parent graph.
                    let Some(frame) = frames.pop() else {
                        break Err(UnresolvedReason::EscapedRoot);
                    };
                    graph_ref = frame.parent;
                    target = (frame.instance, origin_slot);
                }
                NodeKind::Subgraph { definition_id, .. } => {
                    // Cross downward: the instance's output slot is fed
                    // by whatever drives the matching BoundaryOutputs
                    // slot inside the definition.
                    let Ok(def) = self.document.definition(definition_id) else {
                        break Err(UnresolvedReason::MissingDefinition(
                            definition_id.clone(),
                        ));
                    };
                    frames.push(Frame {
                        instance: origin_id,
                        parent: graph_ref.clone(),
                    });
                    graph_ref = GraphRef::Definition(definition_id.clone());
                    target = (def.output_node(), origin_slot);
                }
                NodeKind::BoundaryOutputs => break Err(UnresolvedReason::InvalidOrigin),
            }
        };

        for key in pending {
            self.cache.insert(key, result.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LeafSpec;
    use crate::types::SlotType;

    fn resolve_root(doc: &Document, node: NodeId, slot: usize) -> Resolution {
        LinkResolver::new(doc).resolve(&[], &GraphRef::Root, node, slot)
    }

    #[test]
    fn test_direct_link_resolves() {
        let mut doc = Document::new();
        let source = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("constant").output("value", SlotType::Number),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("value", SlotType::Number),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, source, 0, sink, 0).unwrap();

        let binding = resolve_root(&doc, sink, 0).unwrap().unwrap();
        assert_eq!(binding.producer.segments(), &[source]);
        assert_eq!(binding.output_slot, 0);
    }

    #[test]
    fn test_unconnected_input_resolves_to_none() {
        let mut doc = Document::new();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("value", SlotType::Number),
            )
            .unwrap();
        assert_eq!(resolve_root(&doc, sink, 0), Ok(None));
    }

    #[test]
    fn test_bypass_chain_is_traced_through() {
        let mut doc = Document::new();
        let source = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("constant").output("value", SlotType::Number),
            )
            .unwrap();
        let pass = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("double")
                    .input("value", SlotType::Number)
                    .output("result", SlotType::Number)
                    .bypassed(),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("value", SlotType::Number),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, source, 0, pass, 0).unwrap();
        doc.connect(&GraphRef::Root, pass, 0, sink, 0).unwrap();

        let binding = resolve_root(&doc, sink, 0).unwrap().unwrap();
        assert_eq!(binding.producer.segments(), &[source]);
    }

    #[test]
    fn test_bypass_prefers_same_index_then_first_compatible() {
        let mut doc = Document::new();
        let number_src = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("number-src").output("n", SlotType::Number),
            )
            .unwrap();
        let string_src = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("string-src").output("s", SlotType::String),
            )
            .unwrap();
        // Mixed-type node with matching input/output pairs.
        let mixer = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("mixer")
                    .input("n", SlotType::Number)
                    .input("s", SlotType::String)
                    .output("n", SlotType::Number)
                    .output("s", SlotType::String)
                    .bypassed(),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("s", SlotType::String),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, number_src, 0, mixer, 0).unwrap();
        doc.connect(&GraphRef::Root, string_src, 0, mixer, 1).unwrap();
        doc.connect(&GraphRef::Root, mixer, 1, sink, 0).unwrap();

        // Output slot 1 is a string; the same-index input (also string)
        // is followed, landing on the string source.
        let binding = resolve_root(&doc, sink, 0).unwrap().unwrap();
        assert_eq!(binding.producer.segments(), &[string_src]);
    }

    #[test]
    fn test_bypass_falls_through_when_same_index_mismatches() {
        let mut doc = Document::new();
        let number_src = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("number-src").output("n", SlotType::Number),
            )
            .unwrap();
        let string_src = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("string-src").output("s", SlotType::String),
            )
            .unwrap();
        // The string output sits at index 0, above a number input at the
        // same index; only the input at index 1 can feed it.
        let formatter = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("formatter")
                    .input("n", SlotType::Number)
                    .input("s", SlotType::String)
                    .output("s", SlotType::String)
                    .bypassed(),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("s", SlotType::String),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, number_src, 0, formatter, 0).unwrap();
        doc.connect(&GraphRef::Root, string_src, 0, formatter, 1).unwrap();
        doc.connect(&GraphRef::Root, formatter, 0, sink, 0).unwrap();

        let binding = resolve_root(&doc, sink, 0).unwrap().unwrap();
        assert_eq!(binding.producer.segments(), &[string_src]);
        assert_eq!(binding.output_slot, 0);
    }

    #[test]
    fn test_bypass_with_no_compatible_input_fails() {
        // A bypassed node whose only input (number) cannot feed its
        // string output.
        let mut doc = Document::new();
        let pass = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("stringify")
                    .input("n", SlotType::Number)
                    .output("s", SlotType::String)
                    .bypassed(),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("s", SlotType::String),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, pass, 0, sink, 0).unwrap();

        let reason = resolve_root(&doc, sink, 0).unwrap_err();
        assert_eq!(
            reason,
            UnresolvedReason::IncompatibleBypass {
                node: pass,
                requested: SlotType::String,
            }
        );
    }

    #[test]
    fn test_boundary_crossings_both_directions() {
        // Root: constant -> instance(D) -> sink, where D simply forwards
        // its input port to its output port.
        let mut doc = Document::new();
        let d = doc.create_definition("forward");
        doc.add_input(&d, "in", SlotType::Number).unwrap();
        doc.add_output(&d, "out", SlotType::Number).unwrap();
        let at = GraphRef::Definition(d.clone());
        let inner = doc
            .add_leaf(
                &at,
                LeafSpec::new("double")
                    .input("value", SlotType::Number)
                    .output("result", SlotType::Number),
            )
            .unwrap();
        let (input_node, output_node) = {
            let def = doc.definition(&d).unwrap();
            (def.input_node(), def.output_node())
        };
        doc.connect(&at, input_node, 0, inner, 0).unwrap();
        doc.connect(&at, inner, 0, output_node, 0).unwrap();

        let instance = doc.instantiate(&d, &GraphRef::Root).unwrap();
        let constant = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("constant").output("value", SlotType::Number),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("value", SlotType::Number),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, constant, 0, instance, 0).unwrap();
        doc.connect(&GraphRef::Root, instance, 0, sink, 0).unwrap();

        // Downward crossing: the sink's input is fed by the inner node.
        let binding = resolve_root(&doc, sink, 0).unwrap().unwrap();
        assert_eq!(binding.producer.segments(), &[instance, inner]);

        // Upward crossing: from inside the instance's scope, the inner
        // node's input is fed by the root constant.
        let scope = [Frame {
            instance,
            parent: GraphRef::Root,
        }];
        let binding = LinkResolver::new(&doc)
            .resolve(&scope, &at, inner, 0)
            .unwrap()
            .unwrap();
        assert_eq!(binding.producer.segments(), &[constant]);
    }

    #[test]
    fn test_unconnected_definition_input_escapes_nothing() {
        // An instance input left unconnected in the parent resolves to
        // None from inside the definition.
        let mut doc = Document::new();
        let d = doc.create_definition("forward");
        doc.add_input(&d, "in", SlotType::Number).unwrap();
        let at = GraphRef::Definition(d.clone());
        let inner = doc
            .add_leaf(&at, LeafSpec::new("sink").input("value", SlotType::Number))
            .unwrap();
        let input_node = doc.definition(&d).unwrap().input_node();
        doc.connect(&at, input_node, 0, inner, 0).unwrap();
        let instance = doc.instantiate(&d, &GraphRef::Root).unwrap();

        let scope = [Frame {
            instance,
            parent: GraphRef::Root,
        }];
        let result = LinkResolver::new(&doc).resolve(&scope, &at, inner, 0);
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_memoized_result_is_stable() {
        let mut doc = Document::new();
        let source = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("constant").output("value", SlotType::Number),
            )
            .unwrap();
        let sink = doc
            .add_leaf(
                &GraphRef::Root,
                LeafSpec::new("sink").input("value", SlotType::Number),
            )
            .unwrap();
        doc.connect(&GraphRef::Root, source, 0, sink, 0).unwrap();

        let mut resolver = LinkResolver::new(&doc);
        let first = resolver.resolve(&[], &GraphRef::Root, sink, 0);
        let second = resolver.resolve(&[], &GraphRef::Root, sink, 0);
        assert_eq!(first, second);
        assert!(first.unwrap().is_some());
    }
}
