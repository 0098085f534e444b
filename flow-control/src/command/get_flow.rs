use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{Command, CommandWithResponse, encode_parameters, utf8_payload};
use crate::{
    error::Result,
    flow::{Flow, FlowSelector},
    plane::ControlPlane,
};

/// Returns the serialized definition of a registered flow.
///
/// A miss, including `-1` with zero or several flows registered, is not an
/// error: the response simply carries no flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetFlow {
    #[serde(default)]
    pub id: FlowSelector,
    #[serde(skip)]
    flow: Option<String>,
}

impl GetFlow {
    pub const NAME: &'static str = "GetFlow";

    pub fn new(id: FlowSelector) -> Self {
        Self {
            id,
            flow: None,
        }
    }

    /// The located flow's definition, if any.
    pub fn flow_definition(&self) -> Option<&str> {
        self.flow.as_deref()
    }
}

#[async_trait]
impl Command for GetFlow {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        encode_parameters(Self::NAME, self)
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        self.flow = plane
            .lookup_flow(self.id)
            .map(|(_, flow)| flow.definition());
        if self.flow.is_none() {
            debug!(id = self.id.to_wire(), "No flow found");
        }
        Ok(())
    }

    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        Some(self)
    }
}

impl CommandWithResponse for GetFlow {
    fn response_payload(&self) -> Result<Vec<u8>> {
        Ok(self
            .flow
            .as_ref()
            .map(|definition| definition.as_bytes().to_vec())
            .unwrap_or_default())
    }

    fn set_response_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.flow = if payload.is_empty() {
            None
        } else {
            Some(utf8_payload(payload)?)
        };
        Ok(())
    }
}
