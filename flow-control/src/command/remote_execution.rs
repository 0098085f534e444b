use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{Command, encode_parameters};
use crate::{
    context::{Context, StorageMap, StorageName},
    error::{CommandError, LoadError, Result},
    execution::FlowExecution,
    flow::Flow,
    loader::check_flow_file,
    plane::ControlPlane,
};

/// What travels in a [`RemoteFlowExecution`] request: the flow definition and
/// the storage items to seed it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFlowPayload {
    pub flow: String,
    #[serde(default)]
    pub storage: StorageMap,
}

/// Hands a flow, together with part of the caller's own storage, to the
/// receiving side for execution.
///
/// The caller names the storage items to carry over; their current values are
/// copied out of the caller's storage when the request payload is prepared. The
/// receiver seeds the new flow's storage with them before it starts. Nothing
/// is sent back: once launched, the flow's fate is only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFlowExecution {
    /// Caller-side path of the flow definition.
    pub flow_file: PathBuf,
    #[serde(default)]
    pub storage_names: Vec<String>,
    #[serde(default)]
    pub register_flow: bool,
    #[serde(skip)]
    caller_storage: Option<Context>,
    #[serde(skip)]
    payload: Option<RemoteFlowPayload>,
    /// Wire form of `payload`, encoded once it is prepared.
    #[serde(skip)]
    encoded: Vec<u8>,
}

impl RemoteFlowExecution {
    pub const NAME: &'static str = "RemoteFlowExecution";

    pub fn new(flow_file: impl Into<PathBuf>, storage_names: Vec<String>) -> Self {
        Self {
            flow_file: flow_file.into(),
            storage_names,
            register_flow: false,
            caller_storage: None,
            payload: None,
            encoded: Vec::new(),
        }
    }

    /// Storage the named items are copied from when the request is prepared.
    pub fn with_caller_storage(mut self, storage: Context) -> Self {
        self.caller_storage = Some(storage);
        self
    }

    pub fn with_registration(mut self, register_flow: bool) -> Self {
        self.register_flow = register_flow;
        self
    }

    pub fn payload(&self) -> Option<&RemoteFlowPayload> {
        self.payload.as_ref()
    }
}

#[async_trait]
impl Command for RemoteFlowExecution {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parameters(&self) -> Result<Value> {
        encode_parameters(Self::NAME, self)
    }

    async fn prepare_request_payload(&mut self) -> Result<()> {
        self.encoded.clear();
        let path = self.flow_file.as_path();
        check_flow_file(path)?;
        let flow = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LoadError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let names = self
            .storage_names
            .iter()
            .map(|name| StorageName::new(name.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let storage = match &self.caller_storage {
            Some(storage) => storage.snapshot(&names)?,
            None if names.is_empty() => StorageMap::new(),
            None => {
                return Err(CommandError::Failed(
                    "No caller storage to copy storage items from".to_string(),
                ));
            }
        };

        let payload = RemoteFlowPayload { flow, storage };
        let encoded = serde_json::to_vec(&payload).map_err(|e| {
            CommandError::Failed(format!("Failed to encode remote flow payload: {e}"))
        })?;
        debug!(
            path = %path.display(),
            items = payload.storage.len(),
            bytes = encoded.len(),
            "Prepared remote flow payload"
        );
        self.payload = Some(payload);
        self.encoded = encoded;
        Ok(())
    }

    fn request_payload(&self) -> Vec<u8> {
        self.encoded.clone()
    }

    fn set_request_payload(&mut self, payload: &[u8]) -> Result<()> {
        let decoded: RemoteFlowPayload = serde_json::from_slice(payload)
            .map_err(|e| CommandError::InvalidPayload(e.to_string()))?;
        self.payload = Some(decoded);
        Ok(())
    }

    async fn handle_request(&mut self, plane: &ControlPlane) -> Result<()> {
        let payload = self
            .payload
            .take()
            .ok_or_else(|| CommandError::NoActorToExecute("request carried no flow".to_string()))?;

        let flow = plane.loader().load_definition(&payload.flow)?;
        if let Err(e) = flow.set_up().await {
            warn!(flow = %flow.name(), error = %e, "Received flow failed to set up");
            return Err(CommandError::NoActorToExecute(e.to_string()));
        }
        let items = payload.storage.len();
        flow.storage().extend(payload.storage)?;

        let registry = self.register_flow.then(|| plane.registry().clone());
        let execution = FlowExecution::launch(flow.clone(), registry);
        let flow_id = if self.register_flow {
            plane.registry().add_with_execution(flow.clone(), execution)
        } else {
            None
        };
        info!(flow = %flow.name(), items, flow_id = ?flow_id, "Remote flow launched");
        Ok(())
    }
}
