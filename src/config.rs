use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{OrchestratorError, Result};

/// Top-level CLI structure.
#[derive(Debug, Parser)]
#[command(
    name = "data5g-orchestrator",
    version,
    about = "Intent-driven workload and network-slice orchestration for 5G/edge clusters.",
    long_about = "Receives TM Forum intents over HTTP, classifies and split-routes them, deploys \
                  workloads via Helm with per-cluster NodePort arbitration, and reports KPI \
                  observations back to the knowledge graph."
)]
pub struct CliArgs {
    /// Address the TMF-921 intent endpoint listens on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8088")]
    pub listen: String,

    /// GraphDB base URL (e.g. http://graphdb:7200). Empty disables graph persistence.
    #[arg(long, env = "GRAPHDB_URL", default_value = "")]
    pub graphdb_url: String,

    /// GraphDB repository holding intents, reports and observations.
    #[arg(long, env = "GRAPHDB_REPOSITORY", default_value = "intents")]
    pub graphdb_repository: String,

    /// Prometheus base URL used when a KPIProfile does not pin an endpoint.
    #[arg(long, env = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Base URL of the inNet network-slice handler.
    #[arg(long, env = "INNET_URL", default_value = "http://intend.eu/inNet")]
    pub innet_url: String,

    /// Whether the inNet handler is ready to receive intents. When false the
    /// router persists network intents locally and acknowledges on its behalf.
    #[arg(long, env = "INNET_READY", default_value_t = true, action = clap::ArgAction::Set)]
    pub innet_ready: bool,

    /// Enable the Helm/Kubernetes deployment branch.
    #[arg(long, env = "ENABLE_K8S", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_k8s: bool,

    /// External hostname advertised in access URLs.
    #[arg(long, env = "INGRESS_HOST")]
    pub ingress_host: Option<String>,

    /// Name of the image pull secret copied into deployment namespaces.
    #[arg(long, env = "IMAGE_PULL_SECRET", default_value = "ghcr-secret")]
    pub image_pull_secret: String,

    /// Namespace the controller runs in and copies the image pull secret from.
    #[arg(long, env = "SOURCE_NAMESPACE", default_value = "inorch-tmf-proxy")]
    pub source_namespace: String,

    /// Optional directory where stored intents are mirrored as .ttl files.
    #[arg(long, env = "INTENTS_DIR")]
    pub intents_dir: Option<PathBuf>,

    /// Default observation reporting frequency in seconds (clamped to 5-300 per task).
    #[arg(long, env = "OBSERVATION_FREQUENCY", default_value_t = 30)]
    pub observation_frequency: u64,

    /// In-cluster service URL substituted for well-known external chart hosts.
    #[arg(long, env = "CHART_SERVICE_URL")]
    pub chart_service_url: Option<String>,

    /// Log filter when RUST_LOG is not set (e.g. info, data5g_orchestrator=debug).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log and classify intents without forwarding them to any handler.
    #[arg(long, default_value_t = false)]
    pub test_mode: bool,
}

/// Complete configuration used by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub listen: String,
    pub graphdb_url: Option<String>,
    pub graphdb_repository: String,
    pub prometheus_url: Option<String>,
    pub innet_url: String,
    pub innet_ready: bool,
    pub enable_k8s: bool,
    pub ingress_host: Option<String>,
    pub image_pull_secret: String,
    pub source_namespace: String,
    pub intents_dir: Option<PathBuf>,
    pub observation_frequency: u64,
    pub chart_service_url: Option<String>,
    pub log_level: String,
    pub test_mode: bool,
    pub downstream_timeout: Duration,
    pub graph_timeout: Duration,
    pub prometheus_timeout: Duration,
    pub prometheus_retries: usize,
    pub helm_timeout: Duration,
    pub helm_hard_cap: Duration,
    pub kubectl_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_env_and_args(cli: CliArgs) -> Result<Self> {
        let graphdb_url = match cli.graphdb_url.trim() {
            "" => None,
            url => Some(url.trim_end_matches('/').to_string()),
        };

        if graphdb_url.is_some() && cli.graphdb_repository.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "GRAPHDB_REPOSITORY must not be empty when GRAPHDB_URL is set".into(),
            ));
        }

        if cli.observation_frequency == 0 {
            return Err(OrchestratorError::Config(
                "observation frequency must be greater than zero".into(),
            ));
        }

        Ok(Self {
            listen: cli.listen,
            graphdb_url,
            graphdb_repository: cli.graphdb_repository,
            prometheus_url: cli.prometheus_url,
            innet_url: cli.innet_url.trim_end_matches('/').to_string(),
            innet_ready: cli.innet_ready,
            enable_k8s: cli.enable_k8s,
            ingress_host: cli.ingress_host,
            image_pull_secret: cli.image_pull_secret,
            source_namespace: cli.source_namespace,
            intents_dir: cli.intents_dir,
            observation_frequency: cli.observation_frequency,
            chart_service_url: cli.chart_service_url,
            log_level: cli.log_level,
            test_mode: cli.test_mode,
            downstream_timeout: Duration::from_secs(30),
            graph_timeout: Duration::from_secs(30),
            prometheus_timeout: Duration::from_secs(10),
            prometheus_retries: 3,
            helm_timeout: Duration::from_secs(300),
            helm_hard_cap: Duration::from_secs(600),
            kubectl_timeout: Duration::from_secs(30),
        })
    }

    /// Whether graph persistence is configured at all.
    pub fn graphdb_enabled(&self) -> bool {
        self.graphdb_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["data5g-orchestrator"]
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        if std::env::var("GRAPHDB_URL").is_ok() {
            eprintln!("GRAPHDB_URL set; skipping defaults test");
            return;
        }

        let cli = CliArgs::parse_from(base_args());
        let config = OrchestratorConfig::from_env_and_args(cli).expect("config builds");
        assert_eq!(config.graphdb_repository, "intents");
        assert_eq!(config.image_pull_secret, "ghcr-secret");
        assert_eq!(config.observation_frequency, 30);
        assert!(config.innet_ready);
        assert!(!config.graphdb_enabled());
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let mut args = base_args();
        args.extend(["--graphdb-url", "http://graphdb:7200/"]);
        args.extend(["--innet-url", "http://innet:9000/"]);
        let cli = CliArgs::parse_from(args);
        let config = OrchestratorConfig::from_env_and_args(cli).expect("config builds");
        assert_eq!(config.graphdb_url.as_deref(), Some("http://graphdb:7200"));
        assert_eq!(config.innet_url, "http://innet:9000");
        assert!(config.graphdb_enabled());
    }

    #[test]
    fn rejects_empty_repository_with_graphdb() {
        let mut args = base_args();
        args.extend(["--graphdb-url", "http://graphdb:7200"]);
        args.extend(["--graphdb-repository", " "]);
        let cli = CliArgs::parse_from(args);
        let err = OrchestratorConfig::from_env_and_args(cli).unwrap_err();
        assert!(format!("{err}").contains("GRAPHDB_REPOSITORY"));
    }

    #[test]
    fn rejects_zero_observation_frequency() {
        let mut args = base_args();
        args.extend(["--observation-frequency", "0"]);
        let cli = CliArgs::parse_from(args);
        assert!(OrchestratorConfig::from_env_and_args(cli).is_err());
    }
}
