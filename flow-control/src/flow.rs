use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

use crate::{
    context::Context,
    error::{CommandError, FlowError},
};

/// Registry-assigned identifier of a running flow.
pub type FlowId = u64;

/// Absolute path of the file the flow was loaded from.
pub const FLOW_FILENAME_LONG: &str = "flow_filename_long";
/// File name (without directory) the flow was loaded from.
pub const FLOW_FILENAME_SHORT: &str = "flow_filename_short";
/// Directory containing the flow file.
pub const FLOW_DIR: &str = "flow_dir";

/// An executable pipeline as seen by the control plane.
///
/// Implementations must make the pause/stop flags safe to flip from a control
/// thread while `execute` runs on a worker. `execute` is never invoked on
/// more than one worker at a time for the same instance.
#[async_trait]
pub trait Flow: Send + Sync {
    /// Display name of the root actor.
    fn name(&self) -> String;

    /// Free-text annotation of the root actor.
    fn annotation(&self) -> String {
        String::new()
    }

    /// Whether the root actor is a pipeline (as opposed to a standalone actor).
    fn is_pipeline(&self) -> bool {
        true
    }

    /// Serialized definition, loadable again through a `FlowLoader`.
    fn definition(&self) -> String;

    /// Flow-local storage.
    fn storage(&self) -> Context;

    fn set_variable(&self, name: &str, value: &str);

    fn variable(&self, name: &str) -> Option<String>;

    /// Prepares the flow for execution. An error means the flow must not be executed.
    async fn set_up(&self) -> Result<(), FlowError>;

    /// Runs the flow to completion or until stopped.
    async fn execute(&self) -> Result<(), FlowError>;

    /// Finishes up after execution, before `clean_up`.
    async fn wrap_up(&self) {}

    /// Releases resources acquired in `set_up`/`execute`.
    async fn clean_up(&self);

    fn stop_execution(&self);

    fn pause_execution(&self);

    fn resume_execution(&self);

    fn is_paused(&self) -> bool;

    fn is_stopped(&self) -> bool;
}

/// Sets the programmatic variables derived from the flow's originating file.
pub fn apply_file_variables(flow: &dyn Flow, path: &Path) {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    flow.set_variable(FLOW_FILENAME_LONG, &absolute.to_string_lossy());
    if let Some(file_name) = absolute.file_name() {
        flow.set_variable(FLOW_FILENAME_SHORT, &file_name.to_string_lossy());
    }
    if let Some(dir) = absolute.parent() {
        flow.set_variable(FLOW_DIR, &dir.to_string_lossy());
    }
}

/// Which registered flow a command targets. On the wire `-1` selects the only
/// registered flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowSelector {
    #[default]
    Only,
    Id(FlowId),
}

impl FlowSelector {
    pub const ONLY: i64 = -1;

    pub fn from_wire(value: i64) -> Result<Self, CommandError> {
        match value {
            Self::ONLY => Ok(Self::Only),
            v if v >= 0 => Ok(Self::Id(v as FlowId)),
            v => Err(CommandError::InvalidId(v)),
        }
    }

    pub fn to_wire(self) -> i64 {
        match self {
            Self::Only => Self::ONLY,
            Self::Id(id) => id as i64,
        }
    }
}

impl From<FlowId> for FlowSelector {
    fn from(id: FlowId) -> Self {
        Self::Id(id)
    }
}

impl Serialize for FlowSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_wire())
    }
}

impl<'de> Deserialize<'de> for FlowSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Self::from_wire(value).map_err(serde::de::Error::custom)
    }
}
