use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use data5g_orchestrator::api::{self, AppState};
use data5g_orchestrator::command::{ProcessCommandRunner, probe};
use data5g_orchestrator::config::{CliArgs, OrchestratorConfig};
use data5g_orchestrator::deploy::HelmDeployer;
use data5g_orchestrator::graph::GraphDbClient;
use data5g_orchestrator::infra::InfrastructureResolver;
use data5g_orchestrator::report::ObservationReporter;
use data5g_orchestrator::router::IntentRouter;
use data5g_orchestrator::telemetry;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = match OrchestratorConfig::from_env_and_args(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = telemetry::init(&config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(config).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(config: OrchestratorConfig) -> data5g_orchestrator::Result<()> {
    let graphdb = GraphDbClient::from_config(&config).map(Arc::new);
    if graphdb.is_none() {
        info!("GRAPHDB_URL not set; intents and reports will not be persisted");
    }
    let infrastructure = graphdb
        .clone()
        .map(|graphdb| Arc::new(InfrastructureResolver::new(graphdb)));

    if config.enable_k8s {
        for binary in ["helm", "kubectl"] {
            if let Err(err) = probe(binary) {
                warn!("{err}");
            }
        }
    }

    let runner = Arc::new(ProcessCommandRunner);
    let deployer = Arc::new(HelmDeployer::new(config.clone(), runner));
    let reporter = ObservationReporter::new(&config, graphdb.clone());
    let router = Arc::new(IntentRouter::new(
        config.clone(),
        graphdb.clone(),
        infrastructure,
    ));

    let state = AppState {
        config: config.clone(),
        router,
        deployer,
        reporter,
        graphdb,
    };

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "intent endpoint listening");
    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
