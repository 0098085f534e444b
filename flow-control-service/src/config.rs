use anyhow::Context as _;
use std::path::PathBuf;
use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON logging for production
    #[default]
    Json,
    /// Human-readable logging for development
    Pretty,
}

impl LogFormat {
    /// `pretty` selects human-readable output; anything else is JSON.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "pretty" => Self::Pretty,
            _ => Self::Json,
        }
    }
}

/// Service settings taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub log_format: LogFormat,
    /// Flow files run and registered at startup.
    pub startup_flows: Vec<PathBuf>,
    /// How long shutdown waits for registered flows to stop.
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let log_format = lookup("LOG_FORMAT")
            .map(|value| LogFormat::parse(&value))
            .unwrap_or_default();

        let startup_flows = lookup("FLOW_CONTROL_STARTUP_FLOWS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let grace_ms = match lookup("FLOW_CONTROL_SHUTDOWN_GRACE_MS") {
            Some(raw) => raw.trim().parse::<u64>().with_context(|| {
                format!("FLOW_CONTROL_SHUTDOWN_GRACE_MS must be a number of milliseconds, got '{raw}'")
            })?,
            None => Self::DEFAULT_SHUTDOWN_GRACE_MS,
        };

        Ok(Self {
            log_format,
            startup_flows,
            shutdown_grace: Duration::from_millis(grace_ms),
        })
    }
}
