//! Worker launch for flow executions.
//!
//! Every launched flow gets its own tokio task that runs `execute()` followed by
//! `clean_up()`. The launching command does not wait for it: failures after
//! launch are logged here and never reach the caller. The returned
//! [`FlowExecution`] is the handle for anyone who does want to observe
//! completion (the RESTART and STOP verbs, shutdown).

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::{flow::Flow, registry::RunningFlowRegistry};

/// Handle on a launched flow execution. Cloning shares the same execution.
#[derive(Clone, Debug)]
pub struct FlowExecution {
    finished: watch::Receiver<bool>,
}

/// Worker side of a [`FlowExecution`].
pub(crate) struct Completion {
    finished: watch::Sender<bool>,
}

impl Completion {
    pub(crate) fn mark_finished(&self) {
        self.finished.send_replace(true);
    }
}

impl FlowExecution {
    /// Spawns the worker for `flow`.
    ///
    /// When `registry` is given, the flow is deregistered (by identity) as soon
    /// as the worker is done, so the registry never outlives the execution by
    /// more than the clean-up.
    pub fn launch(flow: Arc<dyn Flow>, registry: Option<RunningFlowRegistry>) -> Self {
        let (finished, receiver) = watch::channel(false);
        let completion = Completion { finished };

        tokio::spawn(async move {
            let name = flow.name();
            debug!(flow = %name, "Flow execution started");

            match flow.execute().await {
                Ok(()) => debug!(flow = %name, "Flow execution finished"),
                Err(e) => error!(flow = %name, error = %e, "Flow execution failed"),
            }
            flow.clean_up().await;

            match registry {
                Some(registry) => {
                    if let Some(id) = registry.release(&flow, &completion) {
                        debug!(flow = %name, flow_id = id, "Deregistered finished flow");
                    }
                }
                None => completion.mark_finished(),
            }
        });

        Self { finished: receiver }
    }

    /// True once the worker has executed, cleaned up and deregistered the flow.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow() || self.finished.has_changed().is_err()
    }

    /// Waits for the worker to finish. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut finished = self.finished.clone();
        // An Err means the worker is gone without reporting (it panicked); either way it is done.
        let _ = finished.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFlow;
    use std::time::Duration;

    #[tokio::test]
    async fn worker_runs_execute_then_clean_up() {
        let flow = Arc::new(ScriptedFlow::new("worker"));
        let execution = FlowExecution::launch(flow.clone(), None);
        execution.wait().await;

        assert!(execution.is_finished());
        assert_eq!(flow.calls(), vec!["execute", "clean_up"]);
    }

    #[tokio::test]
    async fn failed_execution_still_cleans_up() {
        let flow = Arc::new(ScriptedFlow::new("broken").failing_execute("boom"));
        let execution = FlowExecution::launch(flow.clone(), None);
        execution.wait().await;

        assert_eq!(flow.calls(), vec!["execute", "clean_up"]);
    }

    #[tokio::test]
    async fn launch_does_not_wait_for_completion() {
        let flow = Arc::new(ScriptedFlow::new("long").runs_until_stopped());
        let registry = RunningFlowRegistry::new();
        let execution = FlowExecution::launch(flow.clone(), Some(registry.clone()));
        let id = registry.add_with_execution(flow.clone(), execution.clone());
        assert!(id.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!execution.is_finished());

        flow.stop_execution();
        execution.wait().await;
        assert!(registry.is_empty());
    }
}
