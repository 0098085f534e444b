use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{Command, CommandWithResponse, encode_parameters};
use crate::{
    error::Result,
    flow::{Flow, FlowSelector},
    plane::ControlPlane,
};

/// Requests a cooperative stop of a registered flow.
///
/// Unlike [`super::GetFlow`], `-1` with anything but exactly one registered
/// flow is an error. The flow stays registered; its worker deregisters it once
/// execution actually ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopFlow {
    #[serde(default)]
    pub id: FlowSelector,
}

impl StopFlow {
    pub const NAME: &'static str = "StopFlow";

    pub fn new(id: FlowSelector) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Command for StopFlow {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        encode_parameters(Self::NAME, self)
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        let (id, flow) = plane.resolve_flow(self.id)?;
        info!(flow_id = id, flow = %flow.name(), "Stopping flow");
        flow.stop_execution();
        Ok(())
    }

    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        Some(self)
    }
}

impl CommandWithResponse for StopFlow {
    fn response_payload(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn set_response_payload(&mut self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
