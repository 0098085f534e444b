use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use super::{Command, CommandWithResponse, encode_parameters};
use crate::{
    error::{CommandError, Result},
    execution::FlowExecution,
    flow::{Flow, FlowId, FlowSelector},
    plane::{ControlPlane, copy_file_variables},
};

/// Stops a registered flow and hands over to a freshly loaded instance of the
/// same definition after an optional grace period.
///
/// The replacement is launched in the background and registered under a new
/// id. If its set-up fails, nothing is launched and nothing is registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartFlow {
    #[serde(default)]
    pub id: FlowSelector,
    /// Grace period between stopping the old instance and setting up the new one.
    #[serde(default, rename = "interval")]
    pub interval_ms: u64,
    #[serde(skip)]
    restarted_id: Option<FlowId>,
}

impl RestartFlow {
    pub const NAME: &'static str = "RestartFlow";

    pub fn new(id: FlowSelector, interval_ms: u64) -> Self {
        Self {
            id,
            interval_ms,
            restarted_id: None,
        }
    }

    /// Registry id of the replacement, once launched.
    pub fn restarted_id(&self) -> Option<FlowId> {
        self.restarted_id
    }
}

#[async_trait]
impl Command for RestartFlow {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        encode_parameters(Self::NAME, self)
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        let (id, running) = plane.retrieve_flow(self.id, false)?;
        let (_, fresh) = plane.retrieve_flow(FlowSelector::Id(id), true)?;

        info!(flow_id = id, flow = %running.name(), interval_ms = self.interval_ms, "Restarting flow");
        running.stop_execution();
        if let Some(execution) = plane.registry().execution(id) {
            execution.wait().await;
        }
        running.clean_up().await;
        plane.registry().remove(id);

        if self.interval_ms > 0
            && !plane
                .grace_wait(Duration::from_millis(self.interval_ms))
                .await
        {
            warn!(flow_id = id, "Restart interrupted by shutdown");
            return Err(CommandError::Failed(format!(
                "Restart of flow {id} interrupted by shutdown"
            )));
        }

        copy_file_variables(running.as_ref(), fresh.as_ref());
        if let Err(e) = fresh.set_up().await {
            warn!(flow_id = id, error = %e, "Replacement flow failed to set up");
            return Err(e.into());
        }
        copy_file_variables(running.as_ref(), fresh.as_ref());

        let execution = FlowExecution::launch(fresh.clone(), Some(plane.registry().clone()));
        self.restarted_id = plane.registry().add_with_execution(fresh, execution);
        match self.restarted_id {
            Some(new_id) => info!(flow_id = id, new_flow_id = new_id, "Replacement flow launched"),
            None => info!(flow_id = id, "Replacement flow finished before registration"),
        }
        Ok(())
    }

    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        Some(self)
    }
}

impl CommandWithResponse for RestartFlow {
    fn response_payload(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn set_response_payload(&mut self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
