pub mod config;
pub mod telemetry;

pub use config::{LogFormat, ServiceConfig};
pub use telemetry::init_tracing;
