use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{Command, CommandWithResponse, encode_parameters};
use crate::{
    error::{CommandError, Result},
    execution::FlowExecution,
    flow::{Flow, FlowId, apply_file_variables},
    loader::check_flow_file,
    plane::ControlPlane,
};

/// Loads a pipeline from a file on the receiving side, sets it up and starts
/// it in the background.
///
/// Every precondition is checked before anything runs. Once the worker is
/// launched the command returns; later execution failures are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRemoteFlow {
    pub flow_file: PathBuf,
    /// Make the running flow addressable by the other commands.
    #[serde(default)]
    pub register_flow: bool,
    #[serde(skip)]
    registered_id: Option<FlowId>,
}

impl RunRemoteFlow {
    pub const NAME: &'static str = "RunRemoteFlow";

    pub fn new(flow_file: impl Into<PathBuf>, register_flow: bool) -> Self {
        Self {
            flow_file: flow_file.into(),
            register_flow,
            registered_id: None,
        }
    }

    pub fn registered_id(&self) -> Option<FlowId> {
        self.registered_id
    }
}

#[async_trait]
impl Command for RunRemoteFlow {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        encode_parameters(Self::NAME, self)
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        let path = self.flow_file.as_path();
        check_flow_file(path)?;
        let flow = plane.loader().load_file(path)?;
        if !flow.is_pipeline() {
            return Err(CommandError::NotAPipeline(flow.name()));
        }

        // Set-up may rebind variables, so the file-derived ones are applied again afterwards.
        apply_file_variables(flow.as_ref(), path);
        if let Err(e) = flow.set_up().await {
            warn!(path = %path.display(), error = %e, "Flow failed to set up");
            return Err(e.into());
        }
        apply_file_variables(flow.as_ref(), path);

        let registry = self.register_flow.then(|| plane.registry().clone());
        let execution = FlowExecution::launch(flow.clone(), registry);
        if self.register_flow {
            self.registered_id = plane.registry().add_with_execution(flow.clone(), execution);
        }
        info!(
            path = %path.display(),
            flow = %flow.name(),
            flow_id = ?self.registered_id,
            "Flow launched"
        );
        Ok(())
    }

    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        Some(self)
    }
}

impl CommandWithResponse for RunRemoteFlow {
    fn response_payload(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn set_response_payload(&mut self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
