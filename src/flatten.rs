//! Execution flattening
//!
//! Converts a document's root graph, possibly containing subgraph
//! instances whose definitions contain further instances, into a single
//! ordered list of [`ExecutableNode`] records with path-qualified
//! identity. The list is ephemeral: it is rebuilt on every flatten and
//! never persisted.
//!
//! Traversal is depth-first in node insertion order. An ancestry set of
//! definition ids catches self-reference (`Recursion`); a configurable
//! depth limit bounds runaway nesting before the call stack does
//! (`DepthLimitExceeded`). Either aborts the pass with no partial
//! result. Per-link resolution failures do not: the affected input is
//! left unresolved and recorded as a diagnostic.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::resolve::{Frame, LinkResolver, UnresolvedReason};
use crate::types::{DefinitionId, GraphRef, NodeId, NodeKind, SlotDefinition};

/// Default flatten depth limit; far beyond any reasonably authored graph
pub const DEFAULT_DEPTH_LIMIT: usize = 1000;

/// Path-qualified identity of an executable node
///
/// The ordered sequence of ancestor subgraph instance ids from the
/// execution root down to, and including, the leaf node's own id. This
/// structured form is the canonical key; the colon-joined decimal
/// `Display` form exists for diagnostics only and is never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExecPath(Vec<NodeId>);

impl ExecPath {
    pub fn new(segments: Vec<NodeId>) -> Self {
        Self(segments)
    }

    /// The path entries, root-most first
    pub fn segments(&self) -> &[NodeId] {
        &self.0
    }
}

impl std::fmt::Display for ExecPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(":");
        write!(f, "{joined}")
    }
}

/// The resolved origin of one input slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBinding {
    /// Path of the producing executable node
    pub producer: ExecPath,
    /// Output slot index on the producer
    pub output_slot: usize,
}

/// A flattening-time projection of one leaf node
///
/// Read-mostly and ephemeral; recreated on every flatten pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableNode {
    /// Globally unique path within this flatten pass
    pub path: ExecPath,
    /// The underlying node's type tag
    pub node_type: String,
    /// Pass-through of the underlying node's input slots
    pub inputs: Vec<SlotDefinition>,
    /// Pass-through of the underlying node's output slots
    pub outputs: Vec<SlotDefinition>,
    /// Per input slot: the true upstream producer, if any
    pub bindings: Vec<Option<InputBinding>>,
    /// The underlying node's configuration, passed through
    pub data: serde_json::Value,
}

/// Options for one flatten pass
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    /// Maximum nesting depth before the pass is aborted
    pub depth_limit: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }
}

/// A non-fatal finding recorded during flattening
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlattenDiagnostic {
    /// A link could not be resolved; the input was left unbound
    UnresolvedInput {
        consumer: ExecPath,
        slot: usize,
        reason: UnresolvedReason,
    },
    /// An instance references a definition that no longer exists; its
    /// body contributed no executable nodes
    MissingDefinition {
        instance: ExecPath,
        definition: DefinitionId,
    },
}

/// The ordered result of one flatten pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedGraph {
    nodes: Vec<ExecutableNode>,
    #[serde(skip)]
    index: HashMap<ExecPath, usize>,
    diagnostics: Vec<FlattenDiagnostic>,
}

impl FlattenedGraph {
    /// Executable nodes in execution order
    pub fn nodes(&self) -> &[ExecutableNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up an executable node by path
    pub fn get(&self, path: &ExecPath) -> Option<&ExecutableNode> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    /// Non-fatal findings recorded during the pass
    pub fn diagnostics(&self) -> &[FlattenDiagnostic] {
        &self.diagnostics
    }

    /// The true producer of a node's input slot, if one was resolved
    pub fn resolve_input(
        &self,
        node: &ExecutableNode,
        slot: usize,
    ) -> Option<(&ExecutableNode, usize)> {
        let binding = node.bindings.get(slot)?.as_ref()?;
        let producer = self.get(&binding.producer)?;
        Some((producer, binding.output_slot))
    }
}

/// Depth-first execution flattener over one document
pub struct Flattener<'a> {
    document: &'a Document,
    options: FlattenOptions,
}

impl<'a> Flattener<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            options: FlattenOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FlattenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
        self.options.depth_limit = depth_limit;
        self
    }

    /// Run the pass, returning a complete list or one fatal error
    pub fn run(&self) -> Result<FlattenedGraph> {
        let mut resolver = LinkResolver::new(self.document);
        let mut nodes = Vec::new();
        let mut diagnostics = Vec::new();
        let mut visited = HashSet::new();
        let mut scope = Vec::new();

        self.walk(
            &GraphRef::Root,
            &mut scope,
            &mut visited,
            &mut resolver,
            &mut nodes,
            &mut diagnostics,
        )?;

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.path.clone(), i))
            .collect();
        log::debug!(
            "flattened {} node(s), {} diagnostic(s)",
            nodes.len(),
            diagnostics.len()
        );
        Ok(FlattenedGraph {
            nodes,
            index,
            diagnostics,
        })
    }

    fn walk(
        &self,
        at: &GraphRef,
        scope: &mut Vec<Frame>,
        visited: &mut HashSet<DefinitionId>,
        resolver: &mut LinkResolver<'a>,
        nodes: &mut Vec<ExecutableNode>,
        diagnostics: &mut Vec<FlattenDiagnostic>,
    ) -> Result<()> {
        let graph = self.document.graph(at)?;
        for node in graph.nodes() {
            match &node.kind {
                NodeKind::Leaf => {
                    let path = path_of(scope, node.id);
                    let mut bindings = Vec::with_capacity(node.inputs.len());
                    for slot in 0..node.inputs.len() {
                        match resolver.resolve(scope, at, node.id, slot) {
                            Ok(binding) => bindings.push(binding),
                            Err(reason) => {
                                log::warn!("input {slot} of {path} left unresolved: {reason}");
                                diagnostics.push(FlattenDiagnostic::UnresolvedInput {
                                    consumer: path.clone(),
                                    slot,
                                    reason,
                                });
                                bindings.push(None);
                            }
                        }
                    }
                    nodes.push(ExecutableNode {
                        path,
                        node_type: node.node_type.clone(),
                        inputs: node.inputs.clone(),
                        outputs: node.outputs.clone(),
                        bindings,
                        data: node.data.clone(),
                    });
                }
                NodeKind::Subgraph { definition_id, .. } => {
                    // The ancestry set models the current descent, not
                    // global usage: ids are removed on return so sibling
                    // branches may instantiate the same definition.
                    if visited.contains(definition_id) {
                        return Err(EngineError::Recursion {
                            definition: definition_id.clone(),
                        });
                    }
                    if scope.len() + 1 > self.options.depth_limit {
                        return Err(EngineError::DepthLimitExceeded {
                            limit: self.options.depth_limit,
                        });
                    }
                    if self.document.definition(definition_id).is_err() {
                        diagnostics.push(FlattenDiagnostic::MissingDefinition {
                            instance: path_of(scope, node.id),
                            definition: definition_id.clone(),
                        });
                        continue;
                    }
                    visited.insert(definition_id.clone());
                    scope.push(Frame {
                        instance: node.id,
                        parent: at.clone(),
                    });
                    let result = self.walk(
                        &GraphRef::Definition(definition_id.clone()),
                        scope,
                        visited,
                        resolver,
                        nodes,
                        diagnostics,
                    );
                    scope.pop();
                    visited.remove(definition_id);
                    result?;
                }
                NodeKind::BoundaryInputs | NodeKind::BoundaryOutputs => {}
            }
        }
        Ok(())
    }
}

fn path_of(scope: &[Frame], leaf: NodeId) -> ExecPath {
    let mut segments: Vec<NodeId> = scope.iter().map(|f| f.instance).collect();
    segments.push(leaf);
    ExecPath::new(segments)
}
