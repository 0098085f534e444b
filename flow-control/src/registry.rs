use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::{
    execution::{Completion, FlowExecution},
    flow::{Flow, FlowId},
};

/// A registered flow plus the worker running it, if a command launched one.
#[derive(Clone)]
struct RegisteredFlow {
    flow: Arc<dyn Flow>,
    execution: Option<FlowExecution>,
}

#[derive(Default)]
struct Inner {
    next_id: FlowId,
    entries: BTreeMap<FlowId, RegisteredFlow>,
}

impl Inner {
    fn insert(&mut self, entry: RegisteredFlow) -> FlowId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }

    fn id_of(&self, flow: &Arc<dyn Flow>) -> Option<FlowId> {
        self.entries
            .iter()
            .find(|(_, entry)| same_flow(&entry.flow, flow))
            .map(|(id, _)| *id)
    }
}

/// Compares flows by identity, ignoring vtable pointers.
pub(crate) fn same_flow(a: &Arc<dyn Flow>, b: &Arc<dyn Flow>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Table of the flows that are currently running and addressable by id.
///
/// Ids are handed out monotonically and never reused within one registry.
/// All reads return snapshots taken under the lock, never live views. The
/// registry never calls lifecycle methods on the flows it holds, except for
/// [`RunningFlowRegistry::stop_all`].
#[derive(Clone, Default)]
pub struct RunningFlowRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl RunningFlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `flow` under a fresh id.
    pub fn add(&self, flow: Arc<dyn Flow>) -> FlowId {
        let id = self.write().insert(RegisteredFlow {
            flow,
            execution: None,
        });
        debug!(flow_id = id, "Registered flow");
        id
    }

    /// Registers `flow` together with the worker executing it.
    ///
    /// Returns `None` without registering if the worker already finished, so a
    /// flow that completed before it could be registered does not linger.
    pub fn add_with_execution(
        &self,
        flow: Arc<dyn Flow>,
        execution: FlowExecution,
    ) -> Option<FlowId> {
        let mut inner = self.write();
        if execution.is_finished() {
            debug!("Flow finished before registration, not registering");
            return None;
        }
        let id = inner.insert(RegisteredFlow {
            flow,
            execution: Some(execution),
        });
        debug!(flow_id = id, "Registered running flow");
        Some(id)
    }

    /// Registers `flow` unless this very instance is already registered, in which
    /// case its existing id is returned.
    pub fn ensure_registered(&self, flow: Arc<dyn Flow>) -> FlowId {
        let mut inner = self.write();
        if let Some(id) = inner.id_of(&flow) {
            return id;
        }
        let id = inner.insert(RegisteredFlow {
            flow,
            execution: None,
        });
        debug!(flow_id = id, "Re-registered flow");
        id
    }

    /// Removes the entry for `id`; no-op if absent.
    pub fn remove(&self, id: FlowId) -> Option<Arc<dyn Flow>> {
        let removed = self.write().entries.remove(&id).map(|entry| entry.flow);
        if removed.is_some() {
            debug!(flow_id = id, "Deregistered flow");
        }
        removed
    }

    /// Removes the entry holding this very flow instance.
    pub fn remove_flow(&self, flow: &Arc<dyn Flow>) -> Option<FlowId> {
        let mut inner = self.write();
        let id = inner.id_of(flow)?;
        inner.entries.remove(&id);
        Some(id)
    }

    /// Worker-side deregistration: removes the flow and marks the execution
    /// finished in one critical section, so `add_with_execution` can never
    /// register a flow whose worker has already released it.
    pub(crate) fn release(&self, flow: &Arc<dyn Flow>, completion: &Completion) -> Option<FlowId> {
        let mut inner = self.write();
        let id = inner.id_of(flow);
        if let Some(id) = id {
            inner.entries.remove(&id);
        }
        completion.mark_finished();
        id
    }

    pub fn get(&self, id: FlowId) -> Option<Arc<dyn Flow>> {
        self.read().entries.get(&id).map(|entry| entry.flow.clone())
    }

    /// The sole registered flow, or `None` when zero or several are registered.
    pub fn get_only_if_single(&self) -> Option<(FlowId, Arc<dyn Flow>)> {
        let inner = self.read();
        if inner.entries.len() != 1 {
            return None;
        }
        inner
            .entries
            .iter()
            .next()
            .map(|(id, entry)| (*id, entry.flow.clone()))
    }

    pub fn id_of(&self, flow: &Arc<dyn Flow>) -> Option<FlowId> {
        self.read().id_of(flow)
    }

    /// The worker executing the flow registered under `id`, if known.
    pub fn execution(&self, id: FlowId) -> Option<FlowExecution> {
        self.read()
            .entries
            .get(&id)
            .and_then(|entry| entry.execution.clone())
    }

    pub fn list(&self) -> Vec<FlowId> {
        self.read().entries.keys().copied().collect()
    }

    pub fn list_flows(&self) -> Vec<Arc<dyn Flow>> {
        self.read()
            .entries
            .values()
            .map(|entry| entry.flow.clone())
            .collect()
    }

    /// Ids and flows taken together under one lock.
    pub fn snapshot(&self) -> Vec<(FlowId, Arc<dyn Flow>)> {
        self.read()
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.flow.clone()))
            .collect()
    }

    pub fn size(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Requests a stop on every registered flow and hands back the workers to
    /// wait on. Entries stay registered until their workers release them.
    pub fn stop_all(&self) -> Vec<FlowExecution> {
        let entries: Vec<RegisteredFlow> = self.read().entries.values().cloned().collect();
        entries
            .into_iter()
            .filter_map(|entry| {
                entry.flow.stop_execution();
                entry.execution
            })
            .collect()
    }
}
