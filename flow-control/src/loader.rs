use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::LoadError,
    flow::Flow,
    pipeline::{Pipeline, PipelineDefinition},
    task::TaskDefinition,
};

/// Turns serialized flow definitions into executable flows.
pub trait FlowLoader: Send + Sync {
    fn load_file(&self, path: &Path) -> Result<Arc<dyn Flow>, LoadError>;

    fn load_definition(&self, text: &str) -> Result<Arc<dyn Flow>, LoadError>;
}

/// Checks that `path` names an existing regular file.
pub fn check_flow_file(path: &Path) -> Result<(), LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound(path.display().to_string()));
    }
    if path.is_dir() {
        return Err(LoadError::IsDirectory(path.display().to_string()));
    }
    Ok(())
}

/// Loads [`Pipeline`]s from YAML. The root's `type` is either `pipeline` or the
/// type of a single built-in task, which yields a standalone (non-pipeline) root.
#[derive(Debug, Default, Clone)]
pub struct PipelineLoader;

impl PipelineLoader {
    pub fn new() -> Self {
        Self
    }

    fn parse(&self, text: &str) -> Result<Pipeline, LoadError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text).map_err(invalid)?;
        let root_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| LoadError::Invalid {
                errors: vec!["root has no 'type'".to_string()],
            })?;

        if root_type == "pipeline" {
            let mut mapping = value.clone();
            if let serde_yaml::Value::Mapping(m) = &mut mapping {
                m.remove("type");
            }
            let definition: PipelineDefinition = serde_yaml::from_value(mapping).map_err(invalid)?;

            let mut errors = Vec::new();
            if definition.name.trim().is_empty() {
                errors.push("pipeline name must not be empty".to_string());
            }
            for (i, step) in definition.steps.iter().enumerate() {
                step.validate(i + 1, &mut errors);
            }
            if !errors.is_empty() {
                return Err(LoadError::Invalid { errors });
            }
            Pipeline::new(definition).map_err(|e| LoadError::Invalid {
                errors: vec![e.to_string()],
            })
        } else {
            let task: TaskDefinition = serde_yaml::from_value(value).map_err(invalid)?;
            let mut errors = Vec::new();
            task.validate(1, &mut errors);
            if !errors.is_empty() {
                return Err(LoadError::Invalid { errors });
            }
            Pipeline::standalone(task).map_err(|e| LoadError::Invalid {
                errors: vec![e.to_string()],
            })
        }
    }
}

fn invalid(e: serde_yaml::Error) -> LoadError {
    LoadError::Invalid {
        errors: vec![e.to_string()],
    }
}

impl FlowLoader for PipelineLoader {
    fn load_file(&self, path: &Path) -> Result<Arc<dyn Flow>, LoadError> {
        check_flow_file(path)?;
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let pipeline = self.parse(&text)?;
        debug!(path = %path.display(), flow = %pipeline.name(), "Loaded flow file");
        Ok(Arc::new(pipeline))
    }

    fn load_definition(&self, text: &str) -> Result<Arc<dyn Flow>, LoadError> {
        Ok(Arc::new(self.parse(text)?))
    }
}
