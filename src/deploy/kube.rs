use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::command::CommandRunner;
use crate::error::Result;

const KUBECTL: &str = "kubectl";

/// Thin wrapper over the kubectl CLI, used for everything the deployer needs
/// from the cluster: namespaces, secrets, service accounts, pods, services,
/// ingresses and the IDO custom resources.
pub struct KubeCli {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl KubeCli {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let output = self
            .runner
            .run(KUBECTL, &["get", "namespace", namespace], self.timeout)
            .await?;
        Ok(output.success())
    }

    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let output = self
            .runner
            .run(KUBECTL, &["create", "namespace", namespace], self.timeout)
            .await?;
        if output.success() || output.stderr.to_lowercase().contains("already exists") {
            Ok(())
        } else {
            output.expect_success(KUBECTL, "create namespace").map(|_| ())
        }
    }

    /// Fetch an object as JSON; `None` when it does not exist.
    async fn get_json(&self, args: &[&str]) -> Result<Option<Value>> {
        let mut full = vec!["get"];
        full.extend_from_slice(args);
        full.extend_from_slice(&["-o", "json"]);
        let output = self.runner.run(KUBECTL, &full, self.timeout).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(serde_json::from_str(&output.stdout).ok())
    }

    pub async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Value>> {
        self.get_json(&["secret", name, "-n", namespace]).await
    }

    /// Copy a secret document into a namespace, stripping the metadata the
    /// cluster owns.
    pub async fn apply_secret(&self, mut secret: Value, namespace: &str) -> Result<()> {
        if let Some(metadata) = secret.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("namespace");
            metadata.remove("uid");
            metadata.remove("resourceVersion");
            metadata.remove("creationTimestamp");
        }
        let body = serde_json::to_string(&secret)?;
        self.runner
            .run_with_stdin(
                KUBECTL,
                &["apply", "-f", "-", "-n", namespace],
                &body,
                self.timeout,
            )
            .await?
            .expect_success(KUBECTL, "apply secret")?;
        Ok(())
    }

    pub async fn service_accounts(&self, namespace: &str) -> Result<Vec<Value>> {
        let Some(list) = self.get_json(&["serviceaccount", "-n", namespace]).await? else {
            return Ok(Vec::new());
        };
        Ok(list
            .pointer("/items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Add the image pull secret to a ServiceAccount's `imagePullSecrets`.
    /// A reference that is already present is left alone.
    pub async fn patch_service_account_pull_secret(
        &self,
        account: &Value,
        namespace: &str,
        secret_name: &str,
    ) -> Result<bool> {
        let Some(name) = account.pointer("/metadata/name").and_then(Value::as_str) else {
            return Ok(false);
        };

        let mut secrets: Vec<Value> = account
            .pointer("/imagePullSecrets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let already = secrets
            .iter()
            .any(|entry| entry.pointer("/name").and_then(Value::as_str) == Some(secret_name));
        if already {
            debug!(account = name, namespace, "ServiceAccount already references pull secret");
            return Ok(false);
        }
        secrets.push(json!({ "name": secret_name }));

        let patch = serde_json::to_string(&json!({ "imagePullSecrets": secrets }))?;
        let output = self
            .runner
            .run(
                KUBECTL,
                &[
                    "patch",
                    "serviceaccount",
                    name,
                    "-n",
                    namespace,
                    "--type",
                    "merge",
                    "-p",
                    &patch,
                ],
                self.timeout,
            )
            .await?;
        if output.success() {
            info!(account = name, namespace, secret = secret_name, "added imagePullSecret to ServiceAccount");
            Ok(true)
        } else if output.stderr.to_lowercase().contains("already exists") {
            Ok(false)
        } else {
            warn!(account = name, namespace, stderr = %output.stderr.trim(), "failed to patch ServiceAccount");
            Ok(false)
        }
    }

    pub async fn pod_names(&self, namespace: &str) -> Result<Vec<String>> {
        let Some(list) = self.get_json(&["pods", "-n", namespace]).await? else {
            return Ok(Vec::new());
        };
        Ok(item_names(&list))
    }

    pub async fn delete_pod(&self, name: &str, namespace: &str, grace_seconds: u32) -> Result<()> {
        let grace = format!("--grace-period={grace_seconds}");
        let output = self
            .runner
            .run(
                KUBECTL,
                &[
                    "delete",
                    "pod",
                    name,
                    "-n",
                    namespace,
                    &grace,
                    "--ignore-not-found=true",
                ],
                self.timeout,
            )
            .await?;
        if !output.success() {
            warn!(pod = name, namespace, stderr = %output.stderr.trim(), "failed to delete pod");
        }
        Ok(())
    }

    /// Deployments created by a Helm release, located via the instance label.
    pub async fn deployments_for_release(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<String>> {
        let selector = format!("app.kubernetes.io/instance={release}");
        let Some(list) = self
            .get_json(&["deployments", "-n", namespace, "-l", &selector])
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(item_names(&list))
    }

    /// Whether a deployment has all requested replicas ready.
    pub async fn deployment_ready(&self, name: &str, namespace: &str) -> Result<bool> {
        let Some(deployment) = self.get_json(&["deployment", name, "-n", namespace]).await? else {
            return Ok(false);
        };
        let requested = deployment
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let ready = deployment
            .pointer("/status/readyReplicas")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(ready >= requested)
    }

    pub async fn services(&self, namespace: &str) -> Result<Vec<Value>> {
        let Some(list) = self.get_json(&["services", "-n", namespace]).await? else {
            return Ok(Vec::new());
        };
        Ok(list
            .pointer("/items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Every NodePort currently bound by any service in the cluster.
    pub async fn nodeports_in_use(&self) -> Result<HashSet<u16>> {
        let mut used = HashSet::new();
        let Some(list) = self.get_json(&["services", "--all-namespaces"]).await? else {
            debug!("could not list services cluster-wide; relying on session-assigned ports only");
            return Ok(used);
        };
        for service in list
            .pointer("/items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if service.pointer("/spec/type").and_then(Value::as_str) != Some("NodePort") {
                continue;
            }
            for port in service
                .pointer("/spec/ports")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(node_port) = port.pointer("/nodePort").and_then(Value::as_u64) {
                    if let Ok(node_port) = u16::try_from(node_port) {
                        used.insert(node_port);
                    }
                }
            }
        }
        debug!(count = used.len(), "NodePorts in use in cluster");
        Ok(used)
    }

    pub async fn ingress_exists(&self, name: &str, namespace: &str) -> Result<bool> {
        let output = self
            .runner
            .run(KUBECTL, &["get", "ingress", name, "-n", namespace], self.timeout)
            .await?;
        Ok(output.success())
    }

    /// Create an object from a JSON document; "already exists" is benign.
    pub async fn create_object(&self, namespace: &str, body: &Value) -> Result<bool> {
        let payload = serde_json::to_string(body)?;
        let output = self
            .runner
            .run_with_stdin(
                KUBECTL,
                &["create", "-f", "-", "-n", namespace],
                &payload,
                self.timeout,
            )
            .await?;
        if output.success() {
            Ok(true)
        } else if output.stderr.to_lowercase().contains("already exists") {
            debug!(namespace, "object already exists, leaving it in place");
            Ok(false)
        } else {
            warn!(namespace, stderr = %output.stderr.trim(), "failed to create object");
            Ok(false)
        }
    }

    /// Node the controller pod is scheduled on, falling back to the local
    /// hostname when the pod cannot be introspected.
    pub async fn node_name(&self, source_namespace: &str) -> Result<Option<String>> {
        if let Ok(pod_name) = std::env::var("HOSTNAME") {
            let output = self
                .runner
                .run(
                    KUBECTL,
                    &[
                        "get",
                        "pod",
                        &pod_name,
                        "-n",
                        source_namespace,
                        "-o",
                        "jsonpath={.spec.nodeName}",
                    ],
                    self.timeout,
                )
                .await?;
            if output.success() && !output.stdout.trim().is_empty() {
                return Ok(Some(output.stdout.trim().to_string()));
            }
        }

        let output = self
            .runner
            .run("hostname", &[], Duration::from_secs(2))
            .await?;
        if output.success() && !output.stdout.trim().is_empty() {
            return Ok(Some(output.stdout.trim().to_string()));
        }
        Ok(None)
    }

    /// InternalIP of the first cluster node.
    pub async fn node_internal_ip(&self) -> Result<Option<String>> {
        let Some(nodes) = self.get_json(&["nodes"]).await? else {
            return Ok(None);
        };
        let ip = nodes
            .pointer("/items/0/status/addresses")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|address| address.pointer("/type").and_then(Value::as_str) == Some("InternalIP"))
            .and_then(|address| address.pointer("/address").and_then(Value::as_str))
            .map(str::to_string);
        Ok(ip)
    }
}

fn item_names(list: &Value) -> Vec<String> {
    list.pointer("/items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.pointer("/metadata/name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
