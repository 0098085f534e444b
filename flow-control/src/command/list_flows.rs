use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Command, CommandWithResponse};
use crate::{
    error::{CommandError, Result},
    flow::{FLOW_FILENAME_LONG, Flow, FlowId},
    plane::ControlPlane,
};

/// One row of the running-flows table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRow {
    pub id: FlowId,
    pub paused: bool,
    pub stopped: bool,
    pub name: String,
    pub annotation: String,
    pub path: Option<String>,
}

/// Lists every registered flow with its live status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFlows {
    #[serde(skip)]
    rows: Vec<FlowRow>,
}

impl ListFlows {
    pub const NAME: &'static str = "ListFlows";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[FlowRow] {
        &self.rows
    }
}

#[async_trait]
impl Command for ListFlows {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        Ok(json!({}))
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        let registry = plane.registry();
        // Flows removed between listing and lookup are skipped.
        self.rows = registry
            .list()
            .into_iter()
            .filter_map(|id| registry.get(id).map(|flow| (id, flow)))
            .map(|(id, flow)| FlowRow {
                id,
                paused: flow.is_paused(),
                stopped: flow.is_stopped(),
                name: flow.name(),
                annotation: flow.annotation(),
                path: flow.variable(FLOW_FILENAME_LONG),
            })
            .collect();
        Ok(())
    }

    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        Some(self)
    }
}

impl CommandWithResponse for ListFlows {
    fn response_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.rows).map_err(|e| CommandError::Failed(e.to_string()))
    }

    fn set_response_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.rows = if payload.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(payload)
                .map_err(|e| CommandError::InvalidPayload(e.to_string()))?
        };
        Ok(())
    }
}
