use tracing_subscriber::EnvFilter;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

pub fn init(config: &OrchestratorConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| OrchestratorError::Telemetry(err.to_string()))
}
