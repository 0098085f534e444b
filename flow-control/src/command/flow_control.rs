use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Command, CommandWithResponse, encode_parameters, utf8_payload};
use crate::{
    error::{CommandError, Result},
    flow::{Flow, FlowId, FlowSelector},
    plane::ControlPlane,
};

/// Verbs understood by [`SendFlowControlCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    Pause,
    Resume,
    Stop,
    Restart,
}

impl ControlVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Stop => "STOP",
            Self::Restart => "RESTART",
        }
    }
}

impl FromStr for ControlVerb {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PAUSE" => Ok(Self::Pause),
            "RESUME" => Ok(Self::Resume),
            "STOP" => Ok(Self::Stop),
            "RESTART" => Ok(Self::Restart),
            other => Err(other.to_string()),
        }
    }
}

/// Fixed response sentinels callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    Success,
    Failed,
    NotSupported,
    AlreadyPaused,
    AlreadyRunning,
    NotAPipeline,
}

impl ControlResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::NotSupported => "Command not supported",
            Self::AlreadyPaused => "Already paused",
            Self::AlreadyRunning => "Already running",
            Self::NotAPipeline => "Root is not a pipeline",
        }
    }
}

impl fmt::Display for ControlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlResponse {
    type Err = CommandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            Self::Success,
            Self::Failed,
            Self::NotSupported,
            Self::AlreadyPaused,
            Self::AlreadyRunning,
            Self::NotAPipeline,
        ]
        .into_iter()
        .find(|response| response.as_str() == s)
        .ok_or_else(|| CommandError::InvalidPayload(format!("unknown control response '{s}'")))
    }
}

/// Pauses, resumes, stops or restarts a registered pipeline.
///
/// PAUSE and RESUME only flip flags and return at once. STOP requests a stop,
/// waits for the flow's worker, then runs the wrap-up and clean-up hooks.
/// RESTART stops, sets up and executes the flow on the calling task, so the
/// caller only hears back once the new run has finished or failed. The flow is
/// registered again before that run starts, so it stays addressable (and
/// stoppable) while it executes.
///
/// There is no per-flow lock: two commands racing on the same flow may both
/// observe the same state before acting on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendFlowControlCommand {
    #[serde(default)]
    pub id: FlowSelector,
    /// Verb as sent; unknown verbs yield `Command not supported`.
    pub command: String,
    #[serde(skip)]
    response: Option<ControlResponse>,
}

impl SendFlowControlCommand {
    pub const NAME: &'static str = "SendFlowControlCommand";

    pub fn new(id: FlowSelector, verb: ControlVerb) -> Self {
        Self {
            id,
            command: verb.as_str().to_string(),
            response: None,
        }
    }

    pub fn response(&self) -> Option<ControlResponse> {
        self.response
    }

    async fn apply(
        &self,
        plane: &ControlPlane,
        id: FlowId,
        flow: &Arc<dyn Flow>,
        verb: ControlVerb,
    ) -> Result<ControlResponse> {
        match verb {
            ControlVerb::Pause => {
                if flow.is_paused() {
                    return Ok(ControlResponse::AlreadyPaused);
                }
                flow.pause_execution();
                Ok(ControlResponse::Success)
            }
            ControlVerb::Resume => {
                if !flow.is_paused() {
                    return Ok(ControlResponse::AlreadyRunning);
                }
                flow.resume_execution();
                Ok(ControlResponse::Success)
            }
            ControlVerb::Stop => {
                flow.stop_execution();
                if let Some(execution) = plane.registry().execution(id) {
                    execution.wait().await;
                }
                flow.wrap_up().await;
                flow.clean_up().await;
                Ok(ControlResponse::Success)
            }
            ControlVerb::Restart => {
                if !flow.is_stopped() {
                    flow.stop_execution();
                }
                if let Some(execution) = plane.registry().execution(id) {
                    execution.wait().await;
                }
                flow.set_up().await?;
                let new_id = plane.registry().ensure_registered(flow.clone());
                info!(flow_id = new_id, flow = %flow.name(), "Restarting flow");
                if let Err(e) = flow.execute().await {
                    plane.registry().remove_flow(flow);
                    return Err(e.into());
                }
                info!(flow_id = new_id, flow = %flow.name(), "Restarted flow");
                Ok(ControlResponse::Success)
            }
        }
    }
}

#[async_trait]
impl Command for SendFlowControlCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        encode_parameters(Self::NAME, self)
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        let (id, flow) = plane.resolve_flow(self.id)?;
        if !flow.is_pipeline() {
            self.response = Some(ControlResponse::NotAPipeline);
            return Ok(());
        }
        let verb = match self.command.parse::<ControlVerb>() {
            Ok(verb) => verb,
            Err(verb) => {
                warn!(flow_id = id, verb = %verb, "Unsupported control command");
                self.response = Some(ControlResponse::NotSupported);
                return Ok(());
            }
        };

        info!(flow_id = id, verb = verb.as_str(), "Sending control command");
        match self.apply(plane, id, &flow, verb).await {
            Ok(response) => {
                self.response = Some(response);
                Ok(())
            }
            Err(e) => {
                // The sentinel says "Failed"; the error carries the reason.
                self.response = Some(ControlResponse::Failed);
                Err(e)
            }
        }
    }

    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        Some(self)
    }
}

impl CommandWithResponse for SendFlowControlCommand {
    fn response_payload(&self) -> Result<Vec<u8>> {
        Ok(self
            .response
            .map(|response| response.as_str().as_bytes().to_vec())
            .unwrap_or_default())
    }

    fn set_response_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.response = if payload.is_empty() {
            None
        } else {
            Some(utf8_payload(payload)?.parse()?)
        };
        Ok(())
    }
}
