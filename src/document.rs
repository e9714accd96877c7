//! The document: definition arena plus top-level graph
//!
//! A `Document` owns every `GraphStore` reachable from the execution
//! root: the root store itself and one per subgraph definition, held in
//! an id-keyed arena. Instances reference definitions by id, never by
//! pointer, so a definition's liveness can be checked before use.
//!
//! All structural mutation goes through the document so that port
//! changes on a definition fan out to every live instance, wherever it
//! is placed, and so instance destruction releases its mirror
//! subscription exactly once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::builder::LeafSpec;
use crate::definition::{BoundaryPort, SubgraphDefinition};
use crate::error::{EngineError, Result};
use crate::events::{run_observer, Listener, ObserverFn, PortEvent};
use crate::flatten::{FlattenOptions, FlattenedGraph, Flattener};
use crate::types::{
    default_compat_fn, CompatFn, DefinitionId, GraphRef, GraphStore, Link, Node, NodeId, NodeKind,
    SlotType, SubscriptionId,
};

/// A complete subgraph document
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    definitions: HashMap<DefinitionId, SubgraphDefinition>,
    root: GraphStore,
    #[serde(skip, default = "default_compat_fn")]
    compat: CompatFn,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
            root: GraphStore::new(),
            compat: default_compat_fn(),
        }
    }

    /// Replace the slot compatibility predicate
    ///
    /// Consulted at connection time and during bypass resolution.
    pub fn with_compat(mut self, compat: CompatFn) -> Self {
        self.compat = compat;
        self
    }

    pub(crate) fn compat(&self) -> CompatFn {
        self.compat
    }

    /// The top-level graph
    pub fn root(&self) -> &GraphStore {
        &self.root
    }

    /// Resolve a graph reference to its store
    pub fn graph(&self, at: &GraphRef) -> Result<&GraphStore> {
        match at {
            GraphRef::Root => Ok(&self.root),
            GraphRef::Definition(id) => Ok(self.definition(id)?.graph()),
        }
    }

    /// Resolve a graph reference to its store (mutable)
    pub fn graph_mut(&mut self, at: &GraphRef) -> Result<&mut GraphStore> {
        match at {
            GraphRef::Root => Ok(&mut self.root),
            GraphRef::Definition(id) => Ok(self.definition_mut(id)?.graph_mut()),
        }
    }

    // ---- definitions ----------------------------------------------------

    /// Create an empty definition, returning its id
    pub fn create_definition(&mut self, name: impl Into<String>) -> DefinitionId {
        let def = SubgraphDefinition::new(name);
        let id = def.id.clone();
        log::debug!("created definition '{}' ({id})", def.name);
        self.definitions.insert(id.clone(), def);
        id
    }

    /// Look up a definition by id
    pub fn definition(&self, id: &DefinitionId) -> Result<&SubgraphDefinition> {
        self.definitions
            .get(id)
            .ok_or_else(|| EngineError::UnknownDefinition(id.clone()))
    }

    /// Look up a definition by id (mutable)
    pub fn definition_mut(&mut self, id: &DefinitionId) -> Result<&mut SubgraphDefinition> {
        self.definitions
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownDefinition(id.clone()))
    }

    /// Iterate all definitions
    pub fn definitions(&self) -> impl Iterator<Item = &SubgraphDefinition> {
        self.definitions.values()
    }

    /// Destroy a definition
    ///
    /// Refused while any live instance still references it. Instances
    /// contained in the removed definition's own graph are detached from
    /// their definitions first.
    pub fn remove_definition(&mut self, id: &DefinitionId) -> Result<SubgraphDefinition> {
        let def = self.definition(id)?;
        let instances = def.live_instances();
        if instances > 0 {
            return Err(EngineError::DefinitionInUse {
                definition: id.clone(),
                instances,
            });
        }
        let def = self
            .definitions
            .remove(id)
            .ok_or_else(|| EngineError::UnknownDefinition(id.clone()))?;

        // Release subscriptions held by instances inside the removed body.
        let contained: Vec<(DefinitionId, SubscriptionId)> = def
            .graph()
            .nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::Subgraph {
                    definition_id,
                    subscription: Some(sub),
                } => Some((definition_id.clone(), *sub)),
                _ => None,
            })
            .collect();
        for (def_id, sub) in contained {
            if let Some(inner) = self.definitions.get_mut(&def_id) {
                inner.propagator.unsubscribe(sub);
            }
        }
        log::debug!("removed definition '{}' ({id})", def.name);
        Ok(def)
    }

    /// Subscribe an external observer to a definition's port events
    pub fn observe(&mut self, id: &DefinitionId, observer: ObserverFn) -> Result<SubscriptionId> {
        Ok(self
            .definition_mut(id)?
            .propagator_mut()
            .subscribe_observer(observer))
    }

    /// Release an observer subscription
    pub fn unobserve(&mut self, id: &DefinitionId, subscription: SubscriptionId) -> Result<bool> {
        Ok(self
            .definition_mut(id)?
            .propagator_mut()
            .unsubscribe(subscription))
    }

    // ---- nodes and links ------------------------------------------------

    /// Add a leaf node described by `spec` to a graph
    pub fn add_leaf(&mut self, at: &GraphRef, spec: LeafSpec) -> Result<NodeId> {
        let graph = self.graph_mut(at)?;
        let id = graph.add_leaf(spec.node_type, spec.inputs, spec.outputs);
        if let Some(node) = graph.node_mut(id) {
            node.data = spec.data;
            node.position = spec.position;
            node.bypassed = spec.bypassed;
        }
        Ok(id)
    }

    /// Connect two slots in a graph, validating slot types
    pub fn connect(
        &mut self,
        at: &GraphRef,
        origin_id: NodeId,
        origin_slot: usize,
        target_id: NodeId,
        target_slot: usize,
    ) -> Result<()> {
        let compat = self.compat;
        self.graph_mut(at)?
            .connect(origin_id, origin_slot, target_id, target_slot, compat)
    }

    /// Remove the link terminating on an input slot, if any
    pub fn disconnect_input(
        &mut self,
        at: &GraphRef,
        target_id: NodeId,
        target_slot: usize,
    ) -> Result<bool> {
        Ok(self.graph_mut(at)?.disconnect_input(target_id, target_slot))
    }

    /// Place an instance of a definition into a graph
    ///
    /// The instance copies the definition's current port lists into its
    /// mirrored slots and registers a mirror subscription so later port
    /// changes reach it without manual synchronization.
    pub fn instantiate(&mut self, definition_id: &DefinitionId, into: &GraphRef) -> Result<NodeId> {
        let (inputs, outputs) = self.definition(definition_id)?.instance_slots();

        let graph = self.graph_mut(into)?;
        let node_id = graph.add_node_of_kind(
            "subgraph",
            NodeKind::Subgraph {
                definition_id: definition_id.clone(),
                subscription: None,
            },
            inputs,
            outputs,
        );

        let subscription = self
            .definition_mut(definition_id)?
            .propagator_mut()
            .subscribe_mirror(into.clone(), node_id);
        if let Some(node) = self.graph_mut(into)?.node_mut(node_id) {
            if let NodeKind::Subgraph { subscription: slot, .. } = &mut node.kind {
                *slot = Some(subscription);
            }
        }
        log::debug!("instantiated definition {definition_id} as node {node_id}");
        Ok(node_id)
    }

    /// Remove a node from a graph, disconnecting its links
    ///
    /// For subgraph instances this also releases the mirror subscription
    /// on the definition's propagator, exactly once.
    pub fn remove_node(&mut self, at: &GraphRef, node_id: NodeId) -> Result<Node> {
        let mut node = self.graph_mut(at)?.remove_node(node_id)?;
        if let NodeKind::Subgraph {
            definition_id,
            subscription,
        } = &mut node.kind
        {
            if let Some(sub) = subscription.take() {
                if let Some(def) = self.definitions.get_mut(definition_id) {
                    def.propagator.unsubscribe(sub);
                }
            }
        }
        Ok(node)
    }

    // ---- port operations ------------------------------------------------

    /// Append an input port to a definition
    pub fn add_input(
        &mut self,
        definition_id: &DefinitionId,
        name: impl Into<String>,
        slot_type: SlotType,
    ) -> Result<BoundaryPort> {
        let name = name.into();
        self.definition(definition_id)?;
        self.dispatch(
            definition_id,
            &PortEvent::AddingInput {
                name: name.clone(),
                slot_type,
            },
        );
        let port = self
            .definition_mut(definition_id)?
            .push_input(name, slot_type);
        self.dispatch(definition_id, &PortEvent::InputAdded { port: port.clone() });
        Ok(port)
    }

    /// Append an output port to a definition
    pub fn add_output(
        &mut self,
        definition_id: &DefinitionId,
        name: impl Into<String>,
        slot_type: SlotType,
    ) -> Result<BoundaryPort> {
        let name = name.into();
        self.definition(definition_id)?;
        self.dispatch(
            definition_id,
            &PortEvent::AddingOutput {
                name: name.clone(),
                slot_type,
            },
        );
        let port = self
            .definition_mut(definition_id)?
            .push_output(name, slot_type);
        self.dispatch(definition_id, &PortEvent::OutputAdded { port: port.clone() });
        Ok(port)
    }

    /// Remove a definition input port
    ///
    /// Dispatches the cancelable `RemovingInput` event first; a veto
    /// aborts with no mutation and no further events, returning
    /// `Ok(false)`. On success every link bound to the corresponding
    /// mirrored slot — inside the definition body and on every instance —
    /// is disconnected and remaining ports are renumbered.
    pub fn remove_input(&mut self, definition_id: &DefinitionId, index: usize) -> Result<bool> {
        let port = self.definition(definition_id)?.input(index)?.clone();
        let proceed = self.dispatch(
            definition_id,
            &PortEvent::RemovingInput {
                index,
                port: port.clone(),
            },
        );
        if !proceed {
            log::debug!("input removal vetoed on definition {definition_id}");
            return Ok(false);
        }
        let port = self.definition_mut(definition_id)?.splice_input(index)?;
        self.dispatch(definition_id, &PortEvent::InputRemoved { index, port });
        Ok(true)
    }

    /// Remove a definition output port (cancelable, see [`Self::remove_input`])
    pub fn remove_output(&mut self, definition_id: &DefinitionId, index: usize) -> Result<bool> {
        let port = self.definition(definition_id)?.output(index)?.clone();
        let proceed = self.dispatch(
            definition_id,
            &PortEvent::RemovingOutput {
                index,
                port: port.clone(),
            },
        );
        if !proceed {
            log::debug!("output removal vetoed on definition {definition_id}");
            return Ok(false);
        }
        let port = self.definition_mut(definition_id)?.splice_output(index)?;
        self.dispatch(definition_id, &PortEvent::OutputRemoved { index, port });
        Ok(true)
    }

    /// Rename a definition input port in place
    pub fn rename_input(
        &mut self,
        definition_id: &DefinitionId,
        index: usize,
        new_name: impl Into<String>,
    ) -> Result<()> {
        let new_name = new_name.into();
        let old_name = self
            .definition_mut(definition_id)?
            .rename_input_at(index, &new_name)?;
        self.dispatch(
            definition_id,
            &PortEvent::RenamingInput {
                index,
                old_name,
                new_name,
            },
        );
        Ok(())
    }

    /// Rename a definition output port in place
    pub fn rename_output(
        &mut self,
        definition_id: &DefinitionId,
        index: usize,
        new_name: impl Into<String>,
    ) -> Result<()> {
        let new_name = new_name.into();
        let old_name = self
            .definition_mut(definition_id)?
            .rename_output_at(index, &new_name)?;
        self.dispatch(
            definition_id,
            &PortEvent::RenamingOutput {
                index,
                old_name,
                new_name,
            },
        );
        Ok(())
    }

    /// Dispatch an event to a definition's listeners in registration
    /// order, applying mirrored slot operations to instances inline.
    /// Returns `false` when a listener vetoed a cancelable event.
    fn dispatch(&mut self, definition_id: &DefinitionId, event: &PortEvent) -> bool {
        let Some(def) = self.definitions.get_mut(definition_id) else {
            return true;
        };
        // Entries are taken for the pass so mirror application can borrow
        // sibling graphs while the listener list stays intact logically.
        let mut entries = def.propagator.take_entries();
        let mut proceed = true;
        for entry in &mut entries {
            match &mut entry.listener {
                Listener::Observer(observer) => {
                    if !run_observer(observer, event) {
                        proceed = false;
                    }
                }
                Listener::InstanceMirror { graph, node } => {
                    let graph = graph.clone();
                    let node = *node;
                    self.apply_mirror(&graph, node, event);
                }
            }
        }
        if let Some(def) = self.definitions.get_mut(definition_id) {
            def.propagator.restore_entries(entries);
        }
        proceed
    }

    /// Apply the mirrored equivalent of a confirmed port change to one
    /// instance's slot list (and, for removals, its parent-graph links).
    fn apply_mirror(&mut self, at: &GraphRef, node_id: NodeId, event: &PortEvent) {
        let Ok(graph) = self.graph_mut(at) else {
            log::warn!("mirror target graph {at:?} no longer exists");
            return;
        };
        match event {
            PortEvent::InputAdded { port } => {
                if let Some(node) = graph.node_mut(node_id) {
                    node.inputs.push(port.slot());
                }
            }
            PortEvent::OutputAdded { port } => {
                if let Some(node) = graph.node_mut(node_id) {
                    node.outputs.push(port.slot());
                }
            }
            PortEvent::InputRemoved { index, .. } => {
                graph.remove_input_slot(node_id, *index);
            }
            PortEvent::OutputRemoved { index, .. } => {
                graph.remove_output_slot(node_id, *index);
            }
            PortEvent::RenamingInput {
                index, new_name, ..
            } => {
                if let Some(slot) = graph
                    .node_mut(node_id)
                    .and_then(|n| n.inputs.get_mut(*index))
                {
                    slot.name = new_name.clone();
                }
            }
            PortEvent::RenamingOutput {
                index, new_name, ..
            } => {
                if let Some(slot) = graph
                    .node_mut(node_id)
                    .and_then(|n| n.outputs.get_mut(*index))
                {
                    slot.name = new_name.clone();
                }
            }
            // Pre-events carry no mirrored mutation.
            PortEvent::AddingInput { .. }
            | PortEvent::AddingOutput { .. }
            | PortEvent::RemovingInput { .. }
            | PortEvent::RemovingOutput { .. } => {}
        }
    }

    // ---- promotion ------------------------------------------------------

    /// Promote a node selection to a new subgraph definition
    ///
    /// Selected nodes and the links between them move into a fresh
    /// definition. Links crossing the selection boundary become boundary
    /// ports (inputs for inbound links, one output per distinct internal
    /// origin slot for outbound links) and are rewired through a new
    /// instance that replaces the selection in the parent graph.
    pub fn promote_to_subgraph(
        &mut self,
        at: &GraphRef,
        selection: &[NodeId],
        name: impl Into<String>,
    ) -> Result<(DefinitionId, NodeId)> {
        if selection.is_empty() {
            return Err(EngineError::EmptySelection);
        }
        let selected: std::collections::HashSet<NodeId> = selection.iter().copied().collect();

        // Validate and classify against the parent graph before moving
        // anything, capturing link data that removal would destroy.
        let graph = self.graph(at)?;
        for &id in selection {
            let node = graph.node(id).ok_or(EngineError::UnknownNode(id))?;
            if node.is_boundary() {
                return Err(EngineError::BoundaryNodeRemoval(id));
            }
        }
        let ordered: Vec<NodeId> = graph
            .nodes()
            .filter(|n| selected.contains(&n.id))
            .map(|n| n.id)
            .collect();

        let mut internal = Vec::new();
        let mut inbound = Vec::new();
        let mut outbound = Vec::new();
        for link in graph.links() {
            let origin_inside = selected.contains(&link.origin_id);
            let target_inside = selected.contains(&link.target_id);
            match (origin_inside, target_inside) {
                (true, true) => internal.push(*link),
                (false, true) => inbound.push(*link),
                (true, false) => outbound.push(*link),
                (false, false) => {}
            }
        }

        let mut def = SubgraphDefinition::new(name);
        let def_id = def.id.clone();

        // Move the nodes, remapping ids and re-homing instance mirrors.
        let mut id_map: HashMap<NodeId, NodeId> = HashMap::new();
        let mut sum = (0.0, 0.0);
        for old_id in &ordered {
            let node = self.graph_mut(at)?.remove_node(*old_id)?;
            sum.0 += node.position.0;
            sum.1 += node.position.1;
            let new_id = def.graph_mut().adopt_node(node);
            id_map.insert(*old_id, new_id);

            let mirror = match def.graph().node(new_id).map(|n| &n.kind) {
                Some(NodeKind::Subgraph {
                    definition_id,
                    subscription,
                }) => Some((definition_id.clone(), *subscription)),
                _ => None,
            };
            if let Some((inner_id, old_sub)) = mirror {
                let new_sub = self.definitions.get_mut(&inner_id).map(|inner| {
                    if let Some(sub) = old_sub {
                        inner.propagator.unsubscribe(sub);
                    }
                    inner
                        .propagator
                        .subscribe_mirror(GraphRef::Definition(def_id.clone()), new_id)
                });
                if let Some(node) = def.graph_mut().node_mut(new_id) {
                    if let NodeKind::Subgraph { subscription, .. } = &mut node.kind {
                        *subscription = new_sub;
                    }
                }
            }
        }
        let count = ordered.len() as f64;
        let centroid = (sum.0 / count, sum.1 / count);

        for link in internal {
            def.graph_mut().insert_link(Link {
                origin_id: id_map[&link.origin_id],
                origin_slot: link.origin_slot,
                target_id: id_map[&link.target_id],
                target_slot: link.target_slot,
            });
        }

        // One input port per inbound link (input slots are unique link
        // targets), wired through the BoundaryInputs pseudo-node.
        let input_node = def.input_node();
        let mut input_rewires = Vec::new();
        for link in inbound {
            let target_id = id_map[&link.target_id];
            let slot = def
                .graph()
                .node(target_id)
                .and_then(|n| n.inputs.get(link.target_slot).cloned())
                .ok_or(EngineError::SlotOutOfRange {
                    node: target_id,
                    slot: link.target_slot,
                })?;
            let port = def.push_input(slot.name, slot.slot_type);
            def.graph_mut().insert_link(Link {
                origin_id: input_node,
                origin_slot: port.index,
                target_id,
                target_slot: link.target_slot,
            });
            input_rewires.push((link.origin_id, link.origin_slot, port.index));
        }

        // One output port per distinct internal origin slot, shared by
        // every external consumer of that slot.
        let output_node = def.output_node();
        let mut output_ports: HashMap<(NodeId, usize), usize> = HashMap::new();
        let mut output_rewires = Vec::new();
        for link in outbound {
            let origin_id = id_map[&link.origin_id];
            let key = (origin_id, link.origin_slot);
            let port_index = match output_ports.get(&key) {
                Some(index) => *index,
                None => {
                    let slot = def
                        .graph()
                        .node(origin_id)
                        .and_then(|n| n.outputs.get(link.origin_slot).cloned())
                        .ok_or(EngineError::SlotOutOfRange {
                            node: origin_id,
                            slot: link.origin_slot,
                        })?;
                    let port = def.push_output(slot.name, slot.slot_type);
                    def.graph_mut().insert_link(Link {
                        origin_id,
                        origin_slot: link.origin_slot,
                        target_id: output_node,
                        target_slot: port.index,
                    });
                    output_ports.insert(key, port.index);
                    port.index
                }
            };
            output_rewires.push((port_index, link.target_id, link.target_slot));
        }

        self.definitions.insert(def_id.clone(), def);
        let instance_id = self.instantiate(&def_id, at)?;

        let graph = self.graph_mut(at)?;
        if let Some(node) = graph.node_mut(instance_id) {
            node.position = centroid;
        }
        for (origin_id, origin_slot, port_index) in input_rewires {
            graph.insert_link(Link {
                origin_id,
                origin_slot,
                target_id: instance_id,
                target_slot: port_index,
            });
        }
        for (port_index, target_id, target_slot) in output_rewires {
            graph.insert_link(Link {
                origin_id: instance_id,
                origin_slot: port_index,
                target_id,
                target_slot,
            });
        }

        log::debug!(
            "promoted {} node(s) into definition {def_id} as instance {instance_id}",
            ordered.len()
        );
        Ok((def_id, instance_id))
    }

    // ---- flattening -----------------------------------------------------

    /// Flatten the document from the root graph with default options
    pub fn flatten(&self) -> Result<FlattenedGraph> {
        Flattener::new(self).run()
    }

    /// Flatten with explicit options
    pub fn flatten_with(&self, options: FlattenOptions) -> Result<FlattenedGraph> {
        Flattener::new(self).with_options(options).run()
    }

    // ---- persistence ----------------------------------------------------

    /// Rebuild mirror subscriptions after deserialization
    ///
    /// Propagators are not persisted. This re-subscribes every subgraph
    /// instance to its definition and refreshes mirrored slot lists from
    /// the definition's current ports. Call exactly once on a freshly
    /// deserialized document.
    pub fn rebind(&mut self) {
        let mut targets: Vec<(GraphRef, NodeId, DefinitionId)> = Vec::new();
        let mut scan = |at: GraphRef, graph: &GraphStore| {
            for node in graph.nodes() {
                if let Some(def_id) = node.definition_id() {
                    targets.push((at.clone(), node.id, def_id.clone()));
                }
            }
        };
        scan(GraphRef::Root, &self.root);
        for def in self.definitions.values() {
            scan(GraphRef::Definition(def.id.clone()), def.graph());
        }

        for (at, node_id, def_id) in targets {
            let Some(def) = self.definitions.get_mut(&def_id) else {
                log::warn!("instance {node_id} references missing definition {def_id}");
                continue;
            };
            let (inputs, outputs) = def.instance_slots();
            let sub = def.propagator.subscribe_mirror(at.clone(), node_id);
            if let Ok(graph) = self.graph_mut(&at) {
                if let Some(node) = graph.node_mut(node_id) {
                    node.inputs = inputs;
                    node.outputs = outputs;
                    if let NodeKind::Subgraph { subscription, .. } = &mut node.kind {
                        *subscription = Some(sub);
                    }
                }
            }
        }
    }
}
