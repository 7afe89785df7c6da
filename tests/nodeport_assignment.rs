use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::json;

use data5g_orchestrator::command::{CommandOutput, CommandRunner};
use data5g_orchestrator::config::{CliArgs, OrchestratorConfig};
use data5g_orchestrator::deploy::HelmDeployer;
use data5g_orchestrator::error::{OrchestratorError, Result};

/// Scripted cluster: answers helm and kubectl calls from canned state and
/// records every invocation.
struct ClusterStub {
    node_name: String,
    chart_values: String,
    used_nodeports: Vec<u16>,
    existing_releases: Vec<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ClusterStub {
    fn new(node_name: &str, chart_values: &str) -> Arc<Self> {
        Arc::new(Self {
            node_name: node_name.to_string(),
            chart_values: chart_values.to_string(),
            used_nodeports: Vec::new(),
            existing_releases: Vec::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn with_used_ports(node_name: &str, chart_values: &str, ports: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            node_name: node_name.to_string(),
            chart_values: chart_values.to_string(),
            used_nodeports: ports.to_vec(),
            existing_releases: Vec::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn ok(stdout: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn fail(stderr: &str) -> Result<CommandOutput> {
        Ok(CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    fn helm_commands(&self, verb: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.first().map(String::as_str) == Some("helm") && call.get(1).map(String::as_str) == Some(verb))
            .cloned()
            .collect()
    }

    fn services_json(&self) -> String {
        let items: Vec<serde_json::Value> = self
            .used_nodeports
            .iter()
            .map(|port| {
                json!({
                    "metadata": { "name": format!("svc-{port}") },
                    "spec": {
                        "type": "NodePort",
                        "ports": [{ "nodePort": port }],
                    },
                })
            })
            .collect();
        json!({ "items": items }).to_string()
    }
}

#[async_trait]
impl CommandRunner for ClusterStub {
    async fn run(
        &self,
        binary: &'static str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut call = vec![binary.to_string()];
        call.extend(args.iter().map(|arg| arg.to_string()));
        self.calls.lock().unwrap().push(call);

        match binary {
            "helm" => match args.first().copied() {
                Some("version") => Self::ok("v3.14.0"),
                Some("list") => Self::ok(&self.existing_releases.join("\n")),
                Some("show") => Self::ok(&self.chart_values),
                Some("install") | Some("upgrade") | Some("uninstall") => Self::ok(""),
                _ => Self::fail("unknown helm command"),
            },
            "kubectl" => match (args.first().copied(), args.get(1).copied()) {
                (Some("version"), _) => Self::ok("client"),
                (Some("get"), Some("namespace")) => Self::ok("active"),
                (Some("get"), Some("secret")) => Self::fail("NotFound"),
                (Some("get"), Some("pod")) => Self::ok(&self.node_name),
                (Some("get"), Some("pods")) => Self::ok(&json!({ "items": [] }).to_string()),
                (Some("get"), Some("serviceaccount")) => {
                    Self::ok(&json!({ "items": [] }).to_string())
                }
                (Some("get"), Some("deployments")) => Self::ok(&json!({ "items": [] }).to_string()),
                (Some("get"), Some("services")) => {
                    if args.contains(&"--all-namespaces") {
                        Self::ok(&self.services_json())
                    } else {
                        Self::ok(&json!({ "items": [] }).to_string())
                    }
                }
                (Some("get"), Some("nodes")) => Self::ok(&json!({ "items": [] }).to_string()),
                _ => Self::fail("unknown kubectl command"),
            },
            "hostname" => Self::ok(&self.node_name),
            _ => Err(OrchestratorError::ToolMissing { binary }),
        }
    }

    async fn run_with_stdin(
        &self,
        binary: &'static str,
        args: &[&str],
        _stdin: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        self.run(binary, args, timeout).await
    }
}

fn test_config() -> OrchestratorConfig {
    use clap::Parser;
    let cli = CliArgs::parse_from(["data5g-orchestrator", "--enable-k8s", "true"]);
    OrchestratorConfig::from_env_and_args(cli).expect("config builds")
}

fn chart_file() -> tempfile::NamedTempFile {
    tempfile::Builder::new()
        .suffix(".tgz")
        .tempfile()
        .expect("temp chart")
}

const SINGLE_SLOT_VALUES: &str = "service:\n  type: NodePort\n  nodePort: 30020\n";
const TWO_SLOT_VALUES: &str = concat!(
    "services:\n",
    "  web:\n",
    "    nodePort: 30020\n",
    "  api:\n",
    "    nodePort: 30021\n",
);

#[tokio::test(start_paused = true)]
async fn empty_cluster_gets_the_first_port_of_the_range() {
    let stub = ClusterStub::new("ec21-inorch-tmf-proxy", SINGLE_SLOT_VALUES);
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let outcome = deployer
        .deploy_chart(
            chart.path().to_str().unwrap(),
            "hello",
            None,
            Some("abc123"),
            &IndexMap::new(),
        )
        .await
        .expect("deploy succeeds");

    assert!(!outcome.upgraded);
    assert_eq!(outcome.assigned_nodeports.get("service.nodePort"), Some(&30301));

    let installs = stub.helm_commands("install");
    assert_eq!(installs.len(), 1);
    let args = &installs[0];
    assert!(args.contains(&"--set".to_string()));
    assert!(args.contains(&"service.nodePort=30301".to_string()));
    assert!(args.contains(&"--namespace".to_string()));
    assert!(args.contains(&"hello".to_string()));
}

#[tokio::test(start_paused = true)]
async fn two_slots_get_consecutive_ports_skipping_used_ones() {
    let stub = ClusterStub::with_used_ports("ec31-inorch-tmf-proxy", TWO_SLOT_VALUES, &[30411]);
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let outcome = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "hello", None, None, &IndexMap::new())
        .await
        .expect("deploy succeeds");

    // Cluster 31 reserves 30411-30420; 30411 is taken by a live service.
    assert_eq!(
        outcome.assigned_nodeports.get("services.web.nodePort"),
        Some(&30412)
    );
    assert_eq!(
        outcome.assigned_nodeports.get("services.api.nodePort"),
        Some(&30413)
    );
}

#[tokio::test(start_paused = true)]
async fn session_assignments_survive_across_deployments() {
    let stub = ClusterStub::new("ec21-inorch-tmf-proxy", SINGLE_SLOT_VALUES);
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let first = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "hello", None, None, &IndexMap::new())
        .await
        .expect("first deploy succeeds");
    let second = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "world", None, None, &IndexMap::new())
        .await
        .expect("second deploy succeeds");

    assert_eq!(first.assigned_nodeports.get("service.nodePort"), Some(&30301));
    assert_eq!(second.assigned_nodeports.get("service.nodePort"), Some(&30302));
}

#[tokio::test(start_paused = true)]
async fn unknown_node_hostname_refuses_to_deploy() {
    let stub = ClusterStub::new("worker-7", SINGLE_SLOT_VALUES);
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let err = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "hello", None, None, &IndexMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NodePort(_)));
    assert!(stub.helm_commands("install").is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_range_aborts_without_partial_assignment() {
    // All ten ports of cluster 21 are already bound in the cluster.
    let used: Vec<u16> = (30301..=30310).collect();
    let stub = ClusterStub::with_used_ports("ec21-inorch-tmf-proxy", TWO_SLOT_VALUES, &used);
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let err = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "hello", None, None, &IndexMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NodePort(_)));
    assert!(stub.helm_commands("install").is_empty());
}

#[tokio::test(start_paused = true)]
async fn charts_without_slots_deploy_without_overrides() {
    let stub = ClusterStub::new("ec21-inorch-tmf-proxy", "replicas: 2\n");
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let outcome = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "hello", None, None, &IndexMap::new())
        .await
        .expect("deploy succeeds");
    assert!(outcome.assigned_nodeports.is_empty());

    let installs = stub.helm_commands("install");
    assert!(!installs[0].contains(&"--set".to_string()));
}

#[tokio::test(start_paused = true)]
async fn existing_release_is_upgraded() {
    let stub = Arc::new(ClusterStub {
        node_name: "ec21-inorch-tmf-proxy".to_string(),
        chart_values: SINGLE_SLOT_VALUES.to_string(),
        used_nodeports: Vec::new(),
        existing_releases: vec!["hello".to_string()],
        calls: Mutex::new(Vec::new()),
    });
    let deployer = HelmDeployer::new(test_config(), stub.clone());
    let chart = chart_file();

    let outcome = deployer
        .deploy_chart(chart.path().to_str().unwrap(), "hello", None, None, &IndexMap::new())
        .await
        .expect("upgrade succeeds");
    assert!(outcome.upgraded);
    assert_eq!(stub.helm_commands("upgrade").len(), 1);
    assert!(stub.helm_commands("install").is_empty());
}
