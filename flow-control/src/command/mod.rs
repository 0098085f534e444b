//! The flow-control command set.
//!
//! A command is used for exactly one request/response cycle. On the caller
//! side its parameters are set, `prepare_request_payload` snapshots whatever
//! in-memory state must travel with it, and `request_payload` encodes it. On
//! the receiving side the dispatcher decodes the parameters and payload and
//! calls `handle_request`. Commands implementing [`CommandWithResponse`] then
//! encode their result with `response_payload`, which the caller decodes with
//! `set_response_payload`.
//!
//! Handlers report failure by returning a [`CommandError`]; its text becomes
//! the response's error message and the payload must then be ignored.

mod flow_control;
mod get_flow;
mod list_flows;
mod remote_execution;
mod restart_flow;
mod run_remote_flow;
mod stop_flow;

pub use flow_control::{ControlResponse, ControlVerb, SendFlowControlCommand};
pub use get_flow::GetFlow;
pub use list_flows::{FlowRow, ListFlows};
pub use remote_execution::{RemoteFlowExecution, RemoteFlowPayload};
pub use restart_flow::RestartFlow;
pub use run_remote_flow::RunRemoteFlow;
pub use stop_flow::StopFlow;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{CommandError, Result},
    plane::ControlPlane,
};

/// A control-protocol operation.
#[async_trait]
pub trait Command: Send + Sync {
    /// Wire name of the command.
    fn name(&self) -> &'static str;

    /// Encodes the command's parameters.
    fn parameters(&self) -> Result<Value>;

    /// Caller side: snapshots in-process state into the request payload.
    async fn prepare_request_payload(&mut self) -> Result<()> {
        Ok(())
    }

    fn request_payload(&self) -> Vec<u8> {
        Vec::new()
    }

    fn set_request_payload(&mut self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Receiving side: performs the operation.
    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()>;

    /// The response half, for commands that have one.
    fn as_with_response(&mut self) -> Option<&mut dyn CommandWithResponse> {
        None
    }
}

/// A command whose handler produces a response for the caller.
pub trait CommandWithResponse: Command {
    /// Receiving side: hook run after `handle_request`, before encoding.
    fn prepare_response_payload(&mut self) -> Result<()> {
        Ok(())
    }

    fn response_payload(&self) -> Result<Vec<u8>>;

    /// Caller side: decodes a response payload produced by `response_payload`.
    fn set_response_payload(&mut self, payload: &[u8]) -> Result<()>;
}

pub(crate) fn encode_parameters<T: Serialize>(name: &str, parameters: &T) -> Result<Value> {
    serde_json::to_value(parameters).map_err(|e| CommandError::InvalidParameters {
        command: name.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn utf8_payload(payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec()).map_err(|e| CommandError::InvalidPayload(e.to_string()))
}
