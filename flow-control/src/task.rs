use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{
    context::StorageName,
    error::FlowError,
    pipeline::TaskContext,
};

/// Core trait that every pipeline task implements
#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier used in logs and error messages
    fn id(&self) -> &str;

    /// Runs the task. Long-running tasks should sleep through
    /// [`TaskContext::sleep`] so pause and stop requests are honored.
    async fn run(&self, context: &mut TaskContext<'_>) -> Result<(), FlowError>;
}

/// Serialized form of a built-in task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskDefinition {
    /// Logs a message; `@{name}` placeholders are replaced with flow variables
    Log { message: String },
    /// Waits, interruptible by a stop request
    Sleep { millis: u64 },
    /// Stores a value under a storage name
    SetStorage { name: String, value: Value },
    /// Fails unless the storage holds the given name
    RequireStorage { name: String },
    /// Always fails with the given message
    Fail { message: String },
}

impl TaskDefinition {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Sleep { .. } => "sleep",
            Self::SetStorage { .. } => "set_storage",
            Self::RequireStorage { .. } => "require_storage",
            Self::Fail { .. } => "fail",
        }
    }

    /// Collects every problem with this definition instead of stopping at the first.
    pub fn validate(&self, position: usize, errors: &mut Vec<String>) {
        match self {
            Self::SetStorage { name, .. } | Self::RequireStorage { name } => {
                if let Err(e) = StorageName::new(name.as_str()) {
                    errors.push(format!("task #{position} ({}): {e}", self.type_name()));
                }
            }
            _ => {}
        }
    }

    /// Instantiates the task. The definition must have passed validation.
    pub fn build(&self, position: usize) -> Result<Arc<dyn Task>, FlowError> {
        let id = format!("{}#{position}", self.type_name());
        let task: Arc<dyn Task> = match self.clone() {
            Self::Log { message } => Arc::new(LogTask { id, message }),
            Self::Sleep { millis } => Arc::new(SleepTask {
                id,
                duration: Duration::from_millis(millis),
            }),
            Self::SetStorage { name, value } => Arc::new(SetStorageTask {
                id,
                name: StorageName::new(name)?,
                value,
            }),
            Self::RequireStorage { name } => Arc::new(RequireStorageTask {
                id,
                name: StorageName::new(name)?,
            }),
            Self::Fail { message } => Arc::new(FailTask { id, message }),
        };
        Ok(task)
    }
}

struct LogTask {
    id: String,
    message: String,
}

#[async_trait]
impl Task for LogTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: &mut TaskContext<'_>) -> Result<(), FlowError> {
        info!(task = %self.id, "{}", context.expand(&self.message));
        Ok(())
    }
}

struct SleepTask {
    id: String,
    duration: Duration,
}

#[async_trait]
impl Task for SleepTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: &mut TaskContext<'_>) -> Result<(), FlowError> {
        context.sleep(self.duration).await
    }
}

struct SetStorageTask {
    id: String,
    name: StorageName,
    value: Value,
}

#[async_trait]
impl Task for SetStorageTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: &mut TaskContext<'_>) -> Result<(), FlowError> {
        context.storage().set_value(&self.name, self.value.clone());
        Ok(())
    }
}

struct RequireStorageTask {
    id: String,
    name: StorageName,
}

#[async_trait]
impl Task for RequireStorageTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: &mut TaskContext<'_>) -> Result<(), FlowError> {
        if context.storage().contains(self.name.as_str()) {
            Ok(())
        } else {
            Err(FlowError::ExecutionFailed(format!(
                "{}: storage item '{}' not available",
                self.id, self.name
            )))
        }
    }
}

struct FailTask {
    id: String,
    message: String,
}

#[async_trait]
impl Task for FailTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: &mut TaskContext<'_>) -> Result<(), FlowError> {
        Err(FlowError::ExecutionFailed(format!(
            "{}: {}",
            self.id,
            context.expand(&self.message)
        )))
    }
}
