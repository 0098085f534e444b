use thiserror::Error;

/// Failure reported by a flow's own lifecycle methods.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Execution stopped")]
    Stopped,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage name validation and value conversion errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Invalid storage name '{name}': only [A-Za-z0-9_:.-] allowed")]
    InvalidName { name: String },

    #[error("Storage name must not be empty")]
    EmptyName,

    #[error("Storage item '{0}' not available")]
    Missing(String),

    #[error("Failed to serialize storage item '{name}': {reason}")]
    Serialization { name: String, reason: String },
}

/// Loading a flow definition from a file or text failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Flow file does not exist: {0}")]
    FileNotFound(String),

    #[error("Flow file points to a directory: {0}")]
    IsDirectory(String),

    #[error("Failed to read flow file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse flow definition{}", format_sub_errors(.errors))]
    Invalid { errors: Vec<String> },
}

fn format_sub_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(":\n{}", errors.join("\n"))
    }
}

/// Command-level failure. The `Display` text travels back to the caller as the
/// response's error message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid flow id: {0}")]
    InvalidId(i64),

    #[error("Failed to retrieve flow for id: {0}")]
    FlowNotFound(i64),

    #[error(
        "Using ID '-1' is only allowed if exactly one flow is registered, currently registered: {0}"
    )]
    AmbiguousFlow(usize),

    #[error("Root actor is not a pipeline: {0}")]
    NotAPipeline(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("No actor to execute: {0}")]
    NoActorToExecute(String),

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid parameters for command '{command}': {reason}")]
    InvalidParameters { command: String, reason: String },

    #[error("Command failed: {0}")]
    Failed(String),
}

/// Encoding or decoding of request/response frames failed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Command '{expected}' cannot decode a response for '{actual}'")]
    CommandMismatch { expected: String, actual: String },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

pub type Result<T> = std::result::Result<T, CommandError>;
