//! Deployment engine: resolves Helm charts from intents, arbitrates
//! per-cluster NodePorts, installs or upgrades releases, propagates the image
//! pull secret, and derives the IDO custom resources that drive KPI
//! observation.

pub mod chart;
pub mod helm;
pub mod ido;
pub mod kube;
pub mod nodeport;

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::command::CommandRunner;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::icm::ObjectiveTarget;
use chart::{ChartSource, nodeport_slots, resolve_chart};
use helm::HelmCli;
use ido::{KpiProfile, KpiType, ido_intent_crd, kpi_profile_crd, kpi_profile_name};
use kube::KubeCli;
use nodeport::{NodePortAllocator, cluster_number_from_hostname, cluster_range};

const SETTLE_DELAY: Duration = Duration::from_secs(3);
const READINESS_DEADLINE: Duration = Duration::from_secs(300);
const READINESS_POLL: Duration = Duration::from_secs(2);
const POD_DELETE_GRACE_SECONDS: u32 = 5;

static EXTERNAL_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"inet\s+(129\.242\.\d+\.\d+)").expect("valid regex"));

/// Result of a successful install or upgrade.
#[derive(Debug)]
pub struct DeployOutcome {
    pub release_name: String,
    pub namespace: String,
    pub upgraded: bool,
    pub assigned_nodeports: IndexMap<String, u16>,
    pub kpi_profiles: Vec<KpiProfile>,
    pub ido_intent: Option<Value>,
}

/// Helm chart deployment engine.
pub struct HelmDeployer {
    config: OrchestratorConfig,
    runner: Arc<dyn CommandRunner>,
    helm: HelmCli,
    kube: KubeCli,
    http: reqwest::Client,
    allocator: NodePortAllocator,
    tools_checked: tokio::sync::OnceCell<()>,
}

impl HelmDeployer {
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        if !config.enable_k8s {
            warn!("Helm deployment disabled (ENABLE_K8S set to false)");
        }
        let helm = HelmCli::new(runner.clone(), config.helm_timeout, config.helm_hard_cap);
        let kube = KubeCli::new(runner.clone(), config.kubectl_timeout);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            config,
            runner,
            helm,
            kube,
            http,
            allocator: NodePortAllocator::new(),
            tools_checked: tokio::sync::OnceCell::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enable_k8s
    }

    /// Verify helm and kubectl respond, once per process.
    async fn ensure_tools(&self) -> Result<()> {
        self.tools_checked
            .get_or_try_init(|| async {
                self.helm.version().await?.expect_success("helm", "version")?;
                self.runner
                    .run("kubectl", &["version", "--client"], Duration::from_secs(10))
                    .await?
                    .expect_success("kubectl", "version")?;
                Ok::<(), OrchestratorError>(())
            })
            .await?;
        Ok(())
    }

    /// Deploy a chart for an intent: install when the release is new, upgrade
    /// when it already exists in the namespace.
    pub async fn deploy_chart(
        &self,
        chart_url: &str,
        namespace: &str,
        release_name: Option<&str>,
        intent_id: Option<&str>,
        objectives: &IndexMap<String, ObjectiveTarget>,
    ) -> Result<DeployOutcome> {
        if !self.config.enable_k8s {
            return Err(OrchestratorError::Deploy(
                "Helm deployment disabled, skipping chart deployment".into(),
            ));
        }
        self.ensure_tools().await?;
        let release = release_name.unwrap_or(namespace).to_string();

        let chart = resolve_chart(
            &self.http,
            chart_url,
            self.config.chart_service_url.as_deref(),
        )
        .await?;

        self.ensure_namespace(namespace).await;

        let upgraded = self.helm.release_exists(&release, namespace).await?;
        let (set_flags, assigned) = self.resolve_nodeports(&chart).await?;

        let deploy_result = if upgraded {
            info!(release, namespace, intent_id, "release exists, upgrading");
            self.helm.upgrade(&release, chart.path(), namespace, &set_flags).await
        } else {
            info!(release, namespace, intent_id, "installing new release");
            self.helm.install(&release, chart.path(), namespace, &set_flags).await
        };
        if let Err(err) = deploy_result {
            let ports: Vec<u16> = assigned.values().copied().collect();
            self.allocator.release(&ports);
            return Err(err);
        }

        // The release was installed without --wait so the ServiceAccount
        // patch lands before pods start pulling images.
        sleep(SETTLE_DELAY).await;
        self.patch_service_accounts(namespace).await;
        self.delete_pods_for_recreation(namespace).await;
        self.wait_for_release_ready(&release, namespace).await;
        self.create_ingress_for_loadbalancer_services(namespace).await;

        let (kpi_profiles, ido_intent) = if objectives.is_empty() {
            (Vec::new(), None)
        } else {
            self.create_ido_resources(namespace, objectives).await
        };

        self.log_service_access_info(namespace, &release).await;

        info!(release, namespace, intent_id, "deployment complete");
        Ok(DeployOutcome {
            release_name: release,
            namespace: namespace.to_string(),
            upgraded,
            assigned_nodeports: assigned,
            kpi_profiles,
            ido_intent,
        })
    }

    /// Uninstall a release. An absent release is a successful no-op.
    pub async fn delete_release(&self, release: &str, namespace: &str) -> Result<bool> {
        if !self.config.enable_k8s {
            return Err(OrchestratorError::Deploy("Helm deployment disabled".into()));
        }
        self.ensure_tools().await?;
        if !self.helm.release_exists(release, namespace).await? {
            debug!(release, namespace, "release does not exist, skipping deletion");
            return Ok(true);
        }
        self.helm.uninstall(release, namespace).await?;
        info!(release, namespace, "uninstalled release");
        Ok(true)
    }

    /// Create the namespace if needed and make sure the image pull secret is
    /// present. Secret problems are warnings, not deployment failures.
    async fn ensure_namespace(&self, namespace: &str) {
        match self.kube.namespace_exists(namespace).await {
            Ok(true) => debug!(namespace, "namespace already exists"),
            Ok(false) => {
                info!(namespace, "creating namespace");
                if let Err(err) = self.kube.create_namespace(namespace).await {
                    warn!(namespace, "failed to create namespace: {err}");
                }
            }
            Err(err) => warn!(namespace, "failed to check namespace: {err}"),
        }
        if let Err(err) = self.copy_image_pull_secret(namespace).await {
            warn!(namespace, "failed to ensure image pull secret: {err}");
        }
    }

    /// Copy the image pull secret from the controller namespace, leaving an
    /// existing secret in place.
    async fn copy_image_pull_secret(&self, namespace: &str) -> Result<()> {
        let secret_name = &self.config.image_pull_secret;
        if self.kube.get_secret(secret_name, namespace).await?.is_some() {
            debug!(secret = %secret_name, namespace, "image pull secret already present");
            return Ok(());
        }
        let Some(source) = self
            .kube
            .get_secret(secret_name, &self.config.source_namespace)
            .await?
        else {
            debug!(
                secret = %secret_name,
                source = %self.config.source_namespace,
                "image pull secret not found in source namespace, skipping copy"
            );
            return Ok(());
        };
        self.kube.apply_secret(source, namespace).await?;
        info!(
            secret = %secret_name,
            from = %self.config.source_namespace,
            to = namespace,
            "copied image pull secret"
        );
        Ok(())
    }

    /// The NodePort range reserved for this cluster, derived from the node
    /// hostname. Failing to determine it is a configuration failure.
    async fn cluster_nodeport_range(&self) -> Result<(u16, u16)> {
        let node = self
            .kube
            .node_name(&self.config.source_namespace)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NodePort(
                    "cannot determine node hostname for NodePort range derivation".into(),
                )
            })?;
        let cluster = cluster_number_from_hostname(&node).ok_or_else(|| {
            OrchestratorError::NodePort(format!(
                "node hostname '{node}' does not match pattern 'ec<NUMBER>-inorch-tmf-proxy'; \
                 cannot proceed with NodePort assignment"
            ))
        })?;
        cluster_range(cluster)
    }

    /// Scan the chart for NodePort slots and assign each one a fresh port
    /// from the cluster range, ignoring the values the chart declares.
    async fn resolve_nodeports(
        &self,
        chart: &ChartSource,
    ) -> Result<(Vec<String>, IndexMap<String, u16>)> {
        let values = self.helm.show_values(chart.path()).await?;
        let slots = nodeport_slots(&values)?;
        if slots.is_empty() {
            debug!("no NodePort configurations found in chart");
            return Ok((Vec::new(), IndexMap::new()));
        }

        let range = self.cluster_nodeport_range().await?;
        let in_use = self.kube.nodeports_in_use().await?;

        let mut set_flags = Vec::new();
        let mut assigned = IndexMap::new();
        for (path, declared) in &slots {
            let port = match self.allocator.assign(range, &in_use) {
                Ok(port) => port,
                Err(err) => {
                    let granted: Vec<u16> = assigned.values().copied().collect();
                    self.allocator.release(&granted);
                    return Err(err);
                }
            };
            debug!(path = %path, declared, port, "overriding chart NodePort");
            set_flags.push("--set".to_string());
            set_flags.push(format!("{path}={port}"));
            assigned.insert(path.clone(), port);
        }
        Ok((set_flags, assigned))
    }

    /// Patch every ServiceAccount in the namespace so new pods can pull from
    /// the private registry.
    async fn patch_service_accounts(&self, namespace: &str) {
        let accounts = match self.kube.service_accounts(namespace).await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(namespace, "failed to list ServiceAccounts: {err}");
                return;
            }
        };
        for account in accounts {
            if let Err(err) = self
                .kube
                .patch_service_account_pull_secret(
                    &account,
                    namespace,
                    &self.config.image_pull_secret,
                )
                .await
            {
                warn!(namespace, "failed to patch ServiceAccount: {err}");
            }
        }
    }

    /// Delete all pods so that anything scheduled before the ServiceAccount
    /// patch is recreated with the pull credential.
    async fn delete_pods_for_recreation(&self, namespace: &str) {
        let pods = match self.kube.pod_names(namespace).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!(namespace, "failed to list pods: {err}");
                return;
            }
        };
        for pod in pods {
            debug!(pod = %pod, namespace, "deleting pod to pick up patched ServiceAccount");
            if let Err(err) = self
                .kube
                .delete_pod(&pod, namespace, POD_DELETE_GRACE_SECONDS)
                .await
            {
                warn!(pod = %pod, namespace, "failed to delete pod: {err}");
            }
        }
    }

    /// Wait for each release deployment to reach its requested replica count.
    /// Missed readiness is logged, not fatal.
    async fn wait_for_release_ready(&self, release: &str, namespace: &str) {
        let deployments = match self.kube.deployments_for_release(namespace, release).await {
            Ok(deployments) => deployments,
            Err(err) => {
                warn!(release, namespace, "failed to list release deployments: {err}");
                return;
            }
        };
        if deployments.is_empty() {
            debug!(release, namespace, "no deployments found, letting resources settle");
            sleep(Duration::from_secs(5)).await;
            return;
        }

        for deployment in deployments {
            let deadline = tokio::time::Instant::now() + READINESS_DEADLINE;
            loop {
                match self.kube.deployment_ready(&deployment, namespace).await {
                    Ok(true) => {
                        debug!(deployment = %deployment, namespace, "deployment is ready");
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        debug!(deployment = %deployment, namespace, "readiness check failed: {err}")
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        deployment = %deployment,
                        namespace,
                        "deployment did not become ready within timeout"
                    );
                    break;
                }
                sleep(READINESS_POLL).await;
            }
        }
    }

    /// Create a path-based Ingress for each LoadBalancer service. Existing
    /// Ingresses are left alone.
    async fn create_ingress_for_loadbalancer_services(&self, namespace: &str) {
        let services = match self.kube.services(namespace).await {
            Ok(services) => services,
            Err(err) => {
                warn!(namespace, "failed to list services for ingress creation: {err}");
                return;
            }
        };
        for service in services {
            if service.pointer("/spec/type").and_then(Value::as_str) != Some("LoadBalancer") {
                continue;
            }
            let Some(name) = service.pointer("/metadata/name").and_then(Value::as_str) else {
                continue;
            };
            let Some(port) = service
                .pointer("/spec/ports/0/port")
                .and_then(Value::as_i64)
            else {
                continue;
            };
            match self.kube.ingress_exists(name, namespace).await {
                Ok(true) => {
                    debug!(service = name, namespace, "ingress already exists, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(service = name, namespace, "failed to check ingress: {err}");
                    continue;
                }
            }
            let body = ingress_body(namespace, name, port);
            match self.kube.create_object(namespace, &body).await {
                Ok(true) => info!(service = name, namespace, port, "created ingress"),
                Ok(false) => {}
                Err(err) => warn!(service = name, namespace, "failed to create ingress: {err}"),
            }
        }
    }

    /// Derive the KPIProfile and IDO Intent resources from the parsed
    /// objectives. Failures here are warnings: the workload is already up.
    async fn create_ido_resources(
        &self,
        namespace: &str,
        objectives: &IndexMap<String, ObjectiveTarget>,
    ) -> (Vec<KpiProfile>, Option<Value>) {
        let endpoint = ido::resolve_prometheus_endpoint(&self.config);

        let deployment_name = match self.kube.deployments_for_release(namespace, namespace).await {
            Ok(deployments) => deployments.into_iter().next(),
            Err(_) => None,
        }
        .unwrap_or_else(|| namespace.to_string());

        let mut profiles = Vec::new();
        let mut intent_objectives = Vec::new();
        for (objective, target) in objectives {
            let kpi_type = KpiType::from_objective(objective);
            let profile = KpiProfile {
                name: kpi_profile_name(objective, namespace),
                kpi_type: kpi_type.as_str().to_string(),
                description: kpi_type.description().to_string(),
                query: kpi_type.promql().to_string(),
                endpoint: endpoint.clone(),
                reporting_frequency: None,
            };

            let crd = kpi_profile_crd(namespace, &profile);
            match serde_yaml_bw::to_string(&crd) {
                Ok(rendered) => info!(namespace, "creating KPIProfile:\n{rendered}"),
                Err(_) => info!(namespace, profile = %profile.name, "creating KPIProfile"),
            }
            match self.kube.create_object(namespace, &crd).await {
                Ok(_) => {}
                Err(err) => warn!(namespace, profile = %profile.name, "failed to create KPIProfile: {err}"),
            }

            intent_objectives.push((
                objective.clone(),
                target.value,
                format!("{namespace}/{}", profile.name),
            ));
            profiles.push(profile);
        }

        let intent_crd = ido_intent_crd(namespace, &deployment_name, &intent_objectives);
        match serde_yaml_bw::to_string(&intent_crd) {
            Ok(rendered) => info!(namespace, "creating IDO Intent:\n{rendered}"),
            Err(_) => info!(namespace, "creating IDO Intent"),
        }
        if let Err(err) = self.kube.create_object(namespace, &intent_crd).await {
            warn!(namespace, "failed to create IDO Intent: {err}");
        }

        (profiles, Some(intent_crd))
    }

    /// Log how NodePort services of the release can be reached from outside
    /// the cluster.
    async fn log_service_access_info(&self, namespace: &str, release: &str) {
        let services = match self.kube.services(namespace).await {
            Ok(services) => services,
            Err(_) => return,
        };
        let mut nodeport_services = Vec::new();
        for service in &services {
            if service.pointer("/spec/type").and_then(Value::as_str) != Some("NodePort") {
                continue;
            }
            let name = service
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            for port in service
                .pointer("/spec/ports")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(node_port) = port.pointer("/nodePort").and_then(Value::as_u64) {
                    nodeport_services.push((name.clone(), node_port));
                }
            }
        }
        if nodeport_services.is_empty() {
            debug!(release, namespace, "no NodePort services to report");
            return;
        }

        let host = self.external_host().await;
        for (service, node_port) in nodeport_services {
            info!(
                release,
                namespace,
                service = %service,
                node_port,
                url = %format!("http://{host}:{node_port}/"),
                "NodePort service reachable"
            );
        }
    }

    /// Best external host guess: configured ingress host, then the node's
    /// FQDN, then a public address, then the node InternalIP, finally the
    /// minikube address.
    async fn external_host(&self) -> String {
        if let Some(host) = &self.config.ingress_host {
            return host.clone();
        }
        if let Ok(output) = self
            .kube_runner_probe("hostname", &["-f"])
            .await
        {
            let hostname = output.trim();
            if hostname.contains('.') && hostname != "localhost" {
                return hostname.to_string();
            }
        }
        if let Ok(output) = self.kube_runner_probe("ip", &["-o", "addr", "show"]).await {
            if let Some(captures) = EXTERNAL_IP.captures(&output) {
                return captures[1].to_string();
            }
        }
        if let Ok(Some(ip)) = self.kube.node_internal_ip().await {
            return ip;
        }
        if let Ok(output) = self.kube_runner_probe("minikube", &["ip"]).await {
            let ip = output.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
        "192.168.49.2".to_string()
    }

    async fn kube_runner_probe(&self, binary: &'static str, args: &[&str]) -> Result<String> {
        let output = self.runner.run(binary, args, Duration::from_secs(5)).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(OrchestratorError::Other(format!("{binary} probe failed")))
        }
    }
}

fn ingress_body(namespace: &str, service: &str, port: i64) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": service,
            "namespace": namespace,
            "annotations": {
                "nginx.ingress.kubernetes.io/rewrite-target": "/$2",
                "nginx.ingress.kubernetes.io/use-regex": "true",
            },
        },
        "spec": {
            "ingressClassName": "nginx",
            "rules": [{
                "http": {
                    "paths": [{
                        "path": format!("/{service}(/|$)(.*)"),
                        "pathType": "ImplementationSpecific",
                        "backend": {
                            "service": {
                                "name": service,
                                "port": { "number": port },
                            },
                        },
                    }],
                },
            }],
        },
    })
}
