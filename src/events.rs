//! Typed, synchronous, cancelable port-change events
//!
//! Every `SubgraphDefinition` owns a `ChangePropagator`. Live instances
//! subscribe a mirror entry so port additions, removals and renames are
//! reflected on their slot lists immediately; external observers (UI
//! panels, tests) subscribe callbacks. Dispatch runs in listener
//! registration order and a failing observer never stops the remaining
//! listeners from running.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::definition::BoundaryPort;
use crate::types::{GraphRef, NodeId, SlotType, SubscriptionId};

/// Events emitted when a definition's boundary ports change
///
/// Removal dispatches the cancelable `Removing*` form first; the
/// confirming `*Removed` form carries the removed index so listeners can
/// re-index their own mirrored lists.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PortEvent {
    /// An input port is about to be appended
    #[serde(rename_all = "camelCase")]
    AddingInput { name: String, slot_type: SlotType },
    /// An input port was appended
    InputAdded { port: BoundaryPort },
    /// An input port is about to be removed (cancelable)
    RemovingInput { index: usize, port: BoundaryPort },
    /// An input port was removed; remaining ports were renumbered
    InputRemoved { index: usize, port: BoundaryPort },
    /// An input port is being renamed
    #[serde(rename_all = "camelCase")]
    RenamingInput {
        index: usize,
        old_name: String,
        new_name: String,
    },
    /// An output port is about to be appended
    #[serde(rename_all = "camelCase")]
    AddingOutput { name: String, slot_type: SlotType },
    /// An output port was appended
    OutputAdded { port: BoundaryPort },
    /// An output port is about to be removed (cancelable)
    RemovingOutput { index: usize, port: BoundaryPort },
    /// An output port was removed; remaining ports were renumbered
    OutputRemoved { index: usize, port: BoundaryPort },
    /// An output port is being renamed
    #[serde(rename_all = "camelCase")]
    RenamingOutput {
        index: usize,
        old_name: String,
        new_name: String,
    },
}

impl PortEvent {
    /// Whether listeners may veto this event
    pub fn cancelable(&self) -> bool {
        matches!(
            self,
            PortEvent::RemovingInput { .. } | PortEvent::RemovingOutput { .. }
        )
    }
}

/// An observer's verdict on a dispatched event
///
/// `Veto` only has an effect on cancelable events; any single veto
/// cancels the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDecision {
    Continue,
    Veto,
}

/// Error returned by a failing observer
///
/// Logged by the dispatcher and isolated: subsequent listeners still run.
#[derive(Debug, Clone)]
pub struct ObserverError {
    pub message: String,
}

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ObserverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Observer error: {}", self.message)
    }
}

impl std::error::Error for ObserverError {}

/// Callback signature for external observers
pub type ObserverFn =
    Box<dyn FnMut(&PortEvent) -> std::result::Result<EventDecision, ObserverError>>;

/// A registered listener
pub enum Listener {
    /// External callback; may veto cancelable events
    Observer(ObserverFn),
    /// A live subgraph instance, addressed by arena index rather than by
    /// reference. The document applies the mirrored slot operation.
    InstanceMirror { graph: GraphRef, node: NodeId },
}

pub(crate) struct ListenerEntry {
    pub id: SubscriptionId,
    pub listener: Listener,
}

/// Ordered listener list for one definition's port events
///
/// Subscriptions are explicit handles: `subscribe_*` returns a
/// `SubscriptionId` the subscriber owns and releases with
/// [`ChangePropagator::unsubscribe`]. There is no implicit cleanup; a
/// forgotten handle is a leaked listener.
#[derive(Default)]
pub struct ChangePropagator {
    entries: Vec<ListenerEntry>,
    next_id: SubscriptionId,
}

impl std::fmt::Debug for ChangePropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePropagator")
            .field("listeners", &self.entries.len())
            .finish()
    }
}

impl ChangePropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an external observer callback
    pub fn subscribe_observer(&mut self, observer: ObserverFn) -> SubscriptionId {
        self.push(Listener::Observer(observer))
    }

    /// Register a live instance as a mirror target
    pub(crate) fn subscribe_mirror(&mut self, graph: GraphRef, node: NodeId) -> SubscriptionId {
        self.push(Listener::InstanceMirror { graph, node })
    }

    fn push(&mut self, listener: Listener) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(ListenerEntry { id, listener });
        id
    }

    /// Remove a listener by subscription id
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    /// Total number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of live instance mirrors
    pub(crate) fn mirror_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.listener, Listener::InstanceMirror { .. }))
            .count()
    }

    /// Dispatch an event to observer listeners only
    ///
    /// Returns the aggregated may-continue result: `false` when any
    /// observer vetoed a cancelable event. Mirror entries are skipped;
    /// the document applies those while driving a full dispatch.
    pub fn dispatch_observers(&mut self, event: &PortEvent) -> bool {
        let mut proceed = true;
        for entry in &mut self.entries {
            if let Listener::Observer(observer) = &mut entry.listener {
                if !run_observer(observer, event) {
                    proceed = false;
                }
            }
        }
        proceed
    }

    /// Take the listener list for a re-entrancy-safe dispatch pass.
    /// Must be paired with [`ChangePropagator::restore_entries`].
    pub(crate) fn take_entries(&mut self) -> Vec<ListenerEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Restore a taken listener list, keeping any listeners that were
    /// registered while the list was out in registration order after it.
    pub(crate) fn restore_entries(&mut self, mut entries: Vec<ListenerEntry>) {
        entries.append(&mut self.entries);
        self.entries = entries;
    }
}

/// Run one observer, logging and isolating failures.
/// Returns `false` only for an effective veto.
pub(crate) fn run_observer(observer: &mut ObserverFn, event: &PortEvent) -> bool {
    match observer(event) {
        Ok(EventDecision::Veto) if event.cancelable() => false,
        Ok(_) => true,
        Err(err) => {
            log::warn!("port event observer failed: {err}");
            true
        }
    }
}

/// Shared event collector for tests and diagnostics panels
#[derive(Default, Clone)]
pub struct EventLog {
    events: Rc<RefCell<Vec<PortEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer that records every event and never vetoes
    pub fn observer(&self) -> ObserverFn {
        let events = Rc::clone(&self.events);
        Box::new(move |event| {
            events.borrow_mut().push(event.clone());
            Ok(EventDecision::Continue)
        })
    }

    /// All recorded events
    pub fn events(&self) -> Vec<PortEvent> {
        self.events.borrow().clone()
    }

    /// Clear recorded events
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_port() -> BoundaryPort {
        BoundaryPort::new("a", SlotType::Number, 0)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let mut propagator = ChangePropagator::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            propagator.subscribe_observer(Box::new(move |_| {
                order.borrow_mut().push(tag);
                Ok(EventDecision::Continue)
            }));
        }

        propagator.dispatch_observers(&PortEvent::InputAdded {
            port: sample_port(),
        });
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_veto_aggregation() {
        let mut propagator = ChangePropagator::new();
        propagator.subscribe_observer(Box::new(|_| Ok(EventDecision::Continue)));
        propagator.subscribe_observer(Box::new(|_| Ok(EventDecision::Veto)));

        let cancelable = PortEvent::RemovingInput {
            index: 0,
            port: sample_port(),
        };
        assert!(!propagator.dispatch_observers(&cancelable));

        // Veto has no effect on non-cancelable events.
        let plain = PortEvent::InputAdded {
            port: sample_port(),
        };
        assert!(propagator.dispatch_observers(&plain));
    }

    #[test]
    fn test_failing_observer_is_isolated() {
        let mut propagator = ChangePropagator::new();
        let reached = Rc::new(RefCell::new(false));

        propagator.subscribe_observer(Box::new(|_| Err(ObserverError::new("boom"))));
        let flag = Rc::clone(&reached);
        propagator.subscribe_observer(Box::new(move |_| {
            *flag.borrow_mut() = true;
            Ok(EventDecision::Continue)
        }));

        let proceed = propagator.dispatch_observers(&PortEvent::InputAdded {
            port: sample_port(),
        });
        assert!(proceed);
        assert!(*reached.borrow());
    }

    #[test]
    fn test_unsubscribe() {
        let mut propagator = ChangePropagator::new();
        let id = propagator.subscribe_observer(Box::new(|_| Ok(EventDecision::Continue)));
        assert_eq!(propagator.listener_count(), 1);
        assert!(propagator.unsubscribe(id));
        assert!(!propagator.unsubscribe(id));
        assert_eq!(propagator.listener_count(), 0);
    }

    #[test]
    fn test_event_log_collects() {
        let mut propagator = ChangePropagator::new();
        let event_log = EventLog::new();
        propagator.subscribe_observer(event_log.observer());

        propagator.dispatch_observers(&PortEvent::RenamingInput {
            index: 0,
            old_name: "a".to_string(),
            new_name: "b".to_string(),
        });

        let events = event_log.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            PortEvent::RenamingInput {
                old_name, new_name, ..
            } => {
                assert_eq!(old_name, "a");
                assert_eq!(new_name, "b");
            }
            _ => panic!("Expected RenamingInput event"),
        }
    }
}
