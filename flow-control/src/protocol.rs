//! Transport-agnostic request/response frames and the receiving-side dispatcher.
//!
//! A frame is one JSON document. Binary payloads are carried base64-encoded.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    command::{
        Command, GetFlow, ListFlows, RemoteFlowExecution, RestartFlow, RunRemoteFlow,
        SendFlowControlCommand, StopFlow,
    },
    error::{CommandError, ProtocolError, Result},
    plane::ControlPlane,
};

/// Command invocation as sent by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub command: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

/// Outcome of a command. When `error` is set the payload must be ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl RequestFrame {
    pub fn to_json(&self) -> std::result::Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ResponseFrame {
    pub fn success(command: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            error: None,
            payload,
        }
    }

    pub fn failure(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            error: Some(error.into()),
            payload: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_json(&self) -> std::result::Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Receiving side: turns request frames into command invocations.
#[derive(Clone)]
pub struct Dispatcher {
    plane: ControlPlane,
}

impl Dispatcher {
    pub fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    pub fn plane(&self) -> &ControlPlane {
        &self.plane
    }

    /// Rebuilds the command named by `frame`, with its parameters and request payload.
    pub fn decode(&self, frame: &RequestFrame) -> Result<Box<dyn Command>> {
        let parameters = if frame.parameters.is_null() {
            json!({})
        } else {
            frame.parameters.clone()
        };

        let mut command: Box<dyn Command> = match frame.command.as_str() {
            GetFlow::NAME => Box::new(parse::<GetFlow>(GetFlow::NAME, parameters)?),
            ListFlows::NAME => Box::new(parse::<ListFlows>(ListFlows::NAME, parameters)?),
            RunRemoteFlow::NAME => {
                Box::new(parse::<RunRemoteFlow>(RunRemoteFlow::NAME, parameters)?)
            }
            StopFlow::NAME => Box::new(parse::<StopFlow>(StopFlow::NAME, parameters)?),
            SendFlowControlCommand::NAME => Box::new(parse::<SendFlowControlCommand>(
                SendFlowControlCommand::NAME,
                parameters,
            )?),
            RestartFlow::NAME => Box::new(parse::<RestartFlow>(RestartFlow::NAME, parameters)?),
            RemoteFlowExecution::NAME => Box::new(parse::<RemoteFlowExecution>(
                RemoteFlowExecution::NAME,
                parameters,
            )?),
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };

        if !frame.payload.is_empty() {
            command.set_request_payload(&frame.payload)?;
        }
        Ok(command)
    }

    /// Runs an already decoded command and encodes its outcome.
    pub async fn invoke(&self, command: &mut dyn Command) -> ResponseFrame {
        let name = command.name();
        if let Err(e) = command.handle_request(&self.plane).await {
            warn!(command = name, error = %e, "Command failed");
            return ResponseFrame::failure(name, e.to_string());
        }

        let payload = match command.as_with_response() {
            Some(with_response) => with_response
                .prepare_response_payload()
                .and_then(|()| with_response.response_payload()),
            None => Ok(Vec::new()),
        };
        match payload {
            Ok(payload) => {
                debug!(command = name, bytes = payload.len(), "Command succeeded");
                ResponseFrame::success(name, payload)
            }
            Err(e) => {
                warn!(command = name, error = %e, "Failed to encode response");
                ResponseFrame::failure(name, e.to_string())
            }
        }
    }

    /// Decodes, runs and answers one request. Never fails: every problem ends
    /// up in the response's error field.
    pub async fn dispatch(&self, frame: RequestFrame) -> ResponseFrame {
        info!(command = %frame.command, "Dispatching control request");
        match self.decode(&frame) {
            Ok(mut command) => self.invoke(command.as_mut()).await,
            Err(e) => {
                warn!(command = %frame.command, error = %e, "Rejected control request");
                ResponseFrame::failure(frame.command, e.to_string())
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(name: &str, parameters: Value) -> Result<T> {
    serde_json::from_value(parameters).map_err(|e| CommandError::InvalidParameters {
        command: name.to_string(),
        reason: e.to_string(),
    })
}

/// Caller side: prepares `command` and encodes it as a request frame.
pub async fn encode_request(command: &mut dyn Command) -> Result<RequestFrame> {
    command.prepare_request_payload().await?;
    Ok(RequestFrame {
        command: command.name().to_string(),
        parameters: command.parameters()?,
        payload: command.request_payload(),
    })
}

/// Caller side: feeds a response frame back into the command that produced the request.
pub fn decode_response(
    command: &mut dyn Command,
    frame: &ResponseFrame,
) -> std::result::Result<(), ProtocolError> {
    if frame.command != command.name() {
        return Err(ProtocolError::CommandMismatch {
            expected: command.name().to_string(),
            actual: frame.command.clone(),
        });
    }
    if let Some(error) = &frame.error {
        return Err(ProtocolError::Remote(error.clone()));
    }
    if let Some(with_response) = command.as_with_response() {
        with_response.set_response_payload(&frame.payload)?;
    }
    Ok(())
}
