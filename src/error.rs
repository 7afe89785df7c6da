use std::io;

use serde_json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("intent parsing error: {0}")]
    Parse(String),

    #[error("cannot split intent: {0}")]
    Split(String),

    #[error("GraphDB unavailable: {0}")]
    Graph(String),

    #[error("DataCenter {0} not found in infrastructure data")]
    DatacenterNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("telemetry initialization error: {0}")]
    Telemetry(String),

    #[error("tool '{binary}' missing on PATH. Install it or disable the Kubernetes branch via ENABLE_K8S=false.")]
    ToolMissing { binary: &'static str },

    #[error("tool '{tool}' command '{step}' failed (exit {status:?}): {stderr}")]
    Tool {
        tool: String,
        step: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("NodePort assignment failed: {0}")]
    NodePort(String),

    #[error("deployment failed: {0}")]
    Deploy(String),

    #[error("unexpected error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
