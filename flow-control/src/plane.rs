use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::{
    error::{CommandError, Result},
    flow::{FLOW_DIR, FLOW_FILENAME_LONG, FLOW_FILENAME_SHORT, Flow, FlowId, FlowSelector},
    loader::FlowLoader,
    registry::RunningFlowRegistry,
};

/// Everything a command handler may touch on the receiving side.
#[derive(Clone)]
pub struct ControlPlane {
    registry: RunningFlowRegistry,
    loader: Arc<dyn FlowLoader>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ControlPlane {
    pub fn new(registry: RunningFlowRegistry, loader: Arc<dyn FlowLoader>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            loader,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn registry(&self) -> &RunningFlowRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &dyn FlowLoader {
        self.loader.as_ref()
    }

    /// Signals shutdown; pending grace waits return early.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits `duration` unless shutdown is signalled first. Returns false if interrupted.
    pub async fn grace_wait(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.wait_for(|stopping| *stopping) => false,
        }
    }

    /// Looks up the target flow, treating every miss (including an ambiguous
    /// `-1`) as "no flow".
    pub fn lookup_flow(&self, selector: FlowSelector) -> Option<(FlowId, Arc<dyn Flow>)> {
        match selector {
            FlowSelector::Only => self.registry.get_only_if_single(),
            FlowSelector::Id(id) => self.registry.get(id).map(|flow| (id, flow)),
        }
    }

    /// Looks up the target flow, reporting misses and an ambiguous `-1` as errors.
    pub fn resolve_flow(&self, selector: FlowSelector) -> Result<(FlowId, Arc<dyn Flow>)> {
        match selector {
            FlowSelector::Only => self
                .registry
                .get_only_if_single()
                .ok_or_else(|| CommandError::AmbiguousFlow(self.registry.size())),
            FlowSelector::Id(id) => self
                .registry
                .get(id)
                .map(|flow| (id, flow))
                .ok_or(CommandError::FlowNotFound(id as i64)),
        }
    }

    /// Retrieves the target flow. With `fresh`, returns a newly loaded instance
    /// of the same definition (carrying over the file variables) instead of the
    /// running one.
    pub fn retrieve_flow(
        &self,
        selector: FlowSelector,
        fresh: bool,
    ) -> Result<(FlowId, Arc<dyn Flow>)> {
        let (id, running) = self.resolve_flow(selector)?;
        if !fresh {
            return Ok((id, running));
        }
        let copy = self.loader.load_definition(&running.definition())?;
        copy_file_variables(running.as_ref(), copy.as_ref());
        Ok((id, copy))
    }
}

pub(crate) fn copy_file_variables(from: &dyn Flow, to: &dyn Flow) {
    for name in [FLOW_FILENAME_LONG, FLOW_FILENAME_SHORT, FLOW_DIR] {
        if let Some(value) = from.variable(name) {
            to.set_variable(name, &value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFlow, ScriptedLoader};

    fn plane() -> (ControlPlane, Arc<ScriptedLoader>) {
        let loader = Arc::new(ScriptedLoader::new());
        (
            ControlPlane::new(RunningFlowRegistry::new(), loader.clone()),
            loader,
        )
    }

    #[test]
    fn lenient_and_strict_lookup_disagree_on_ambiguity() {
        let (plane, _) = plane();
        plane.registry().add(Arc::new(ScriptedFlow::new("a")));
        plane.registry().add(Arc::new(ScriptedFlow::new("b")));

        assert!(plane.lookup_flow(FlowSelector::Only).is_none());
        assert_eq!(
            plane.resolve_flow(FlowSelector::Only).err(),
            Some(CommandError::AmbiguousFlow(2))
        );
        assert_eq!(
            plane.resolve_flow(FlowSelector::Id(9)).err(),
            Some(CommandError::FlowNotFound(9))
        );
    }

    #[test]
    fn fresh_retrieval_reloads_definition() {
        let (plane, loader) = plane();
        let running = Arc::new(ScriptedFlow::new("etl"));
        running.set_variable(FLOW_FILENAME_LONG, "/flows/etl.yaml");
        let id = plane.registry().add(running.clone());

        let (live_id, live) = plane.retrieve_flow(FlowSelector::Id(id), false).unwrap();
        assert_eq!(live_id, id);
        assert_eq!(live.name(), "etl");
        assert!(loader.created().is_empty());

        let (_, fresh) = plane.retrieve_flow(FlowSelector::Only, true).unwrap();
        assert_eq!(loader.created().len(), 1);
        assert_eq!(fresh.name(), "etl");
        assert_eq!(
            fresh.variable(FLOW_FILENAME_LONG).as_deref(),
            Some("/flows/etl.yaml")
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_grace_wait() {
        let (plane, _) = plane();
        assert!(plane.grace_wait(Duration::from_millis(1)).await);

        let waiter = {
            let plane = plane.clone();
            tokio::spawn(async move { plane.grace_wait(Duration::from_secs(60)).await })
        };
        plane.shutdown();
        let completed = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("grace wait was not interrupted")
            .unwrap();
        assert!(!completed);
        assert!(plane.is_shutting_down());
    }
}
