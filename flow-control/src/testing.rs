//! Scripted flows and loaders for unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    context::{Context, StorageMap},
    error::{FlowError, LoadError},
    flow::Flow,
    loader::FlowLoader,
};

/// A flow whose behavior is configured up front and whose lifecycle calls are recorded.
///
/// Pause and stop follow [`Pipeline`](crate::pipeline::Pipeline): either can be
/// requested at any time, and `set_up` clears both.
pub struct ScriptedFlow {
    name: String,
    pipeline: bool,
    set_up_error: Mutex<Option<String>>,
    execute_error: Option<String>,
    blocking_executions: AtomicUsize,
    paused: AtomicBool,
    stopped: AtomicBool,
    storage: Context,
    variables: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<&'static str>>,
    storage_at_execute: Mutex<Option<StorageMap>>,
}

impl ScriptedFlow {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pipeline: true,
            set_up_error: Mutex::new(None),
            execute_error: None,
            blocking_executions: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            storage: Context::new(),
            variables: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            storage_at_execute: Mutex::new(None),
        }
    }

    /// Every execution blocks until a stop is requested.
    pub fn runs_until_stopped(self) -> Self {
        self.blocking_executions.store(usize::MAX, Ordering::SeqCst);
        self
    }

    /// Only the first execution blocks until stopped; later ones return at once.
    pub fn blocks_first_execution(self) -> Self {
        self.blocking_executions.store(1, Ordering::SeqCst);
        self
    }

    pub fn failing_set_up(self, message: &str) -> Self {
        *self.set_up_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn failing_execute(mut self, message: &str) -> Self {
        self.execute_error = Some(message.to_string());
        self
    }

    pub fn standalone(mut self) -> Self {
        self.pipeline = false;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    /// Storage contents observed at the start of the most recent execution.
    pub fn storage_at_execute(&self) -> Option<StorageMap> {
        self.storage_at_execute.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Flow for ScriptedFlow {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn annotation(&self) -> String {
        format!("scripted {}", self.name)
    }

    fn is_pipeline(&self) -> bool {
        self.pipeline
    }

    fn definition(&self) -> String {
        format!("scripted:{}", self.name)
    }

    fn storage(&self) -> Context {
        self.storage.clone()
    }

    fn set_variable(&self, name: &str, value: &str) {
        self.variables
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.variables.lock().unwrap().get(name).cloned()
    }

    async fn set_up(&self) -> Result<(), FlowError> {
        self.record("set_up");
        if let Some(message) = self.set_up_error.lock().unwrap().clone() {
            return Err(FlowError::SetupFailed(message));
        }
        self.stopped.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self) -> Result<(), FlowError> {
        self.record("execute");
        let snapshot: StorageMap = self
            .storage
            .keys()
            .into_iter()
            .filter_map(|key| self.storage.get_value(&key).map(|value| (key, value)))
            .collect();
        *self.storage_at_execute.lock().unwrap() = Some(snapshot);

        let blocks = self
            .blocking_executions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if blocks {
            while !self.stopped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        match &self.execute_error {
            Some(message) => Err(FlowError::ExecutionFailed(message.clone())),
            None => Ok(()),
        }
    }

    async fn wrap_up(&self) {
        self.record("wrap_up");
    }

    async fn clean_up(&self) {
        self.record("clean_up");
    }

    fn stop_execution(&self) {
        self.record("stop");
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn pause_execution(&self) {
        self.record("pause");
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume_execution(&self) {
        self.record("resume");
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

type FlowFactory = Box<dyn Fn(&str) -> ScriptedFlow + Send + Sync>;

/// Loader that builds scripted flows and remembers every instance it created.
pub struct ScriptedLoader {
    factory: FlowFactory,
    created: Mutex<Vec<Arc<ScriptedFlow>>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::with_factory(ScriptedFlow::new)
    }

    pub fn with_factory(factory: impl Fn(&str) -> ScriptedFlow + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<ScriptedFlow>> {
        self.created.lock().unwrap().clone()
    }

    fn build(&self, name: &str) -> Arc<dyn Flow> {
        let flow = Arc::new((self.factory)(name));
        self.created.lock().unwrap().push(flow.clone());
        flow
    }
}

impl FlowLoader for ScriptedLoader {
    fn load_file(&self, path: &Path) -> Result<Arc<dyn Flow>, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.load_definition(&text)
    }

    fn load_definition(&self, text: &str) -> Result<Arc<dyn Flow>, LoadError> {
        let name = text
            .trim()
            .strip_prefix("scripted:")
            .ok_or_else(|| LoadError::Invalid {
                errors: vec![format!("not a scripted flow: {}", text.trim())],
            })?;
        Ok(self.build(name))
    }
}
