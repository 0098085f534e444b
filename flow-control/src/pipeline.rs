use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::{
    context::Context,
    error::FlowError,
    flow::Flow,
    task::{Task, TaskDefinition},
};

/// Lifecycle state of a pipeline, observed by the running tasks at their
/// checkpoints. Pausing is a separate flag so it can be requested at any time,
/// including before the worker has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Running,
    Stopped,
}

/// Serialized form of a pipeline root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation: String,
    /// How many times the task list runs; 0 repeats until stopped
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Variables bound during set-up
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    pub steps: Vec<TaskDefinition>,
}

fn default_iterations() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq)]
enum Root {
    Pipeline(PipelineDefinition),
    Standalone(TaskDefinition),
}

/// What a running task gets to see of its pipeline.
pub struct TaskContext<'a> {
    storage: &'a Context,
    variables: &'a DashMap<String, String>,
    state: watch::Receiver<FlowState>,
    paused: watch::Receiver<bool>,
}

impl TaskContext<'_> {
    pub fn storage(&self) -> &Context {
        self.storage
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables.get(name).map(|v| v.clone())
    }

    /// Replaces `@{name}` placeholders with variable values; unknown names stay as-is.
    pub fn expand(&self, text: &str) -> String {
        expand_variables(text, self.variables)
    }

    /// Blocks while paused; errors once a stop was requested.
    pub async fn checkpoint(&mut self) -> Result<(), FlowError> {
        loop {
            if *self.state.borrow_and_update() == FlowState::Stopped {
                return Err(FlowError::Stopped);
            }
            if !*self.paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                changed = self.state.changed() => changed.map_err(|_| FlowError::Stopped)?,
                changed = self.paused.changed() => changed.map_err(|_| FlowError::Stopped)?,
            }
        }
    }

    /// Sleeps for `duration` unless a stop request arrives first.
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), FlowError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.state.wait_for(|s| *s == FlowState::Stopped) => Err(FlowError::Stopped),
        }
    }
}

fn expand_variables(text: &str, variables: &DashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("@{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(value) => out.push_str(value.value()),
                    None => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Reference [`Flow`] implementation: an ordered list of tasks with its own
/// storage and variables.
pub struct Pipeline {
    root: Root,
    tasks: Vec<Arc<dyn Task>>,
    iterations: u64,
    storage: Context,
    variables: DashMap<String, String>,
    state: watch::Sender<FlowState>,
    paused: watch::Sender<bool>,
    executing: Mutex<()>,
}

impl Pipeline {
    pub fn new(definition: PipelineDefinition) -> Result<Self, FlowError> {
        let tasks = definition
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| step.build(i + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_root(
            Root::Pipeline(definition.clone()),
            tasks,
            definition.iterations,
        ))
    }

    /// A root that is a single task rather than a pipeline.
    pub fn standalone(task: TaskDefinition) -> Result<Self, FlowError> {
        let built = task.build(1)?;
        Ok(Self::with_root(Root::Standalone(task), vec![built], 1))
    }

    fn with_root(root: Root, tasks: Vec<Arc<dyn Task>>, iterations: u64) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        let (paused, _) = watch::channel(false);
        Self {
            root,
            tasks,
            iterations,
            storage: Context::new(),
            variables: DashMap::new(),
            state,
            paused,
            executing: Mutex::new(()),
        }
    }

    pub fn state(&self) -> FlowState {
        *self.state.borrow()
    }

    async fn run_tasks(&self) -> Result<(), FlowError> {
        let mut context = TaskContext {
            storage: &self.storage,
            variables: &self.variables,
            state: self.state.subscribe(),
            paused: self.paused.subscribe(),
        };
        let mut iteration = 0u64;
        while self.iterations == 0 || iteration < self.iterations {
            for task in &self.tasks {
                context.checkpoint().await?;
                debug!(task = task.id(), iteration, "Running task");
                task.run(&mut context).await?;
            }
            iteration += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Flow for Pipeline {
    fn name(&self) -> String {
        match &self.root {
            Root::Pipeline(definition) => definition.name.clone(),
            Root::Standalone(task) => task.type_name().to_string(),
        }
    }

    fn annotation(&self) -> String {
        match &self.root {
            Root::Pipeline(definition) => definition.annotation.clone(),
            Root::Standalone(_) => String::new(),
        }
    }

    fn is_pipeline(&self) -> bool {
        matches!(self.root, Root::Pipeline(_))
    }

    fn definition(&self) -> String {
        let value = match &self.root {
            Root::Pipeline(definition) => serde_yaml::to_value(definition).map(|mut value| {
                if let serde_yaml::Value::Mapping(mapping) = &mut value {
                    mapping.insert("type".into(), "pipeline".into());
                }
                value
            }),
            Root::Standalone(task) => serde_yaml::to_value(task),
        };
        value
            .and_then(|value| serde_yaml::to_string(&value))
            .unwrap_or_default()
    }

    fn storage(&self) -> Context {
        self.storage.clone()
    }

    fn set_variable(&self, name: &str, value: &str) {
        self.variables.insert(name.to_string(), value.to_string());
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.variables.get(name).map(|v| v.clone())
    }

    async fn set_up(&self) -> Result<(), FlowError> {
        let _guard = self
            .executing
            .try_lock()
            .map_err(|_| FlowError::SetupFailed(format!("{} is still executing", self.name())))?;
        if self.tasks.is_empty() {
            return Err(FlowError::SetupFailed(format!(
                "{} has no tasks to execute",
                self.name()
            )));
        }
        if let Root::Pipeline(definition) = &self.root {
            for (name, value) in &definition.variables {
                self.variables.insert(name.clone(), value.clone());
            }
        }
        self.state.send_replace(FlowState::Idle);
        self.paused.send_replace(false);
        debug!(flow = %self.name(), "Set up");
        Ok(())
    }

    async fn execute(&self) -> Result<(), FlowError> {
        let _guard = self.executing.try_lock().map_err(|_| {
            FlowError::ExecutionFailed(format!("{} is already executing", self.name()))
        })?;
        let started = self.state.send_if_modified(|state| {
            if *state == FlowState::Idle {
                *state = FlowState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(flow = %self.name(), state = ?self.state(), "Not set up, nothing to execute");
            return Ok(());
        }

        info!(flow = %self.name(), "Executing");
        let result = self.run_tasks().await;
        self.state.send_if_modified(|state| {
            if *state == FlowState::Running {
                *state = FlowState::Idle;
                true
            } else {
                false
            }
        });

        match result {
            Err(FlowError::Stopped) => {
                info!(flow = %self.name(), "Execution stopped");
                Ok(())
            }
            other => other,
        }
    }

    async fn wrap_up(&self) {
        debug!(flow = %self.name(), "Wrapped up");
    }

    async fn clean_up(&self) {
        debug!(flow = %self.name(), "Cleaned up");
    }

    fn stop_execution(&self) {
        self.state.send_replace(FlowState::Stopped);
    }

    fn pause_execution(&self) {
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true));
    }

    fn resume_execution(&self) {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false));
    }

    fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    fn is_stopped(&self) -> bool {
        self.state() == FlowState::Stopped
    }
}
