use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::command::{CommandOutput, CommandRunner};
use crate::error::Result;

const HELM: &str = "helm";

/// Thin wrapper over the helm CLI. All invocations go through the shared
/// [`CommandRunner`] so tests can substitute a recording mock.
pub struct HelmCli {
    runner: Arc<dyn CommandRunner>,
    op_timeout: Duration,
    hard_cap: Duration,
}

impl HelmCli {
    pub fn new(runner: Arc<dyn CommandRunner>, op_timeout: Duration, hard_cap: Duration) -> Self {
        Self {
            runner,
            op_timeout,
            hard_cap,
        }
    }

    pub async fn version(&self) -> Result<CommandOutput> {
        self.runner
            .run(HELM, &["version"], Duration::from_secs(10))
            .await
    }

    /// Whether a release is present in the namespace's release list.
    pub async fn release_exists(&self, release: &str, namespace: &str) -> Result<bool> {
        let output = self
            .runner
            .run(
                HELM,
                &[
                    "list",
                    "--namespace",
                    namespace,
                    "--filter",
                    release,
                    "--short",
                ],
                Duration::from_secs(10),
            )
            .await?;
        if !output.success() {
            debug!(release, namespace, stderr = %output.stderr.trim(), "helm list failed");
            return Ok(false);
        }
        Ok(output.stdout.lines().any(|line| line.trim() == release))
    }

    /// Default values of a chart, as YAML.
    pub async fn show_values(&self, chart: &Path) -> Result<String> {
        let chart = chart.to_string_lossy();
        let output = self
            .runner
            .run(
                HELM,
                &["show", "values", chart.as_ref()],
                Duration::from_secs(30),
            )
            .await?;
        if !output.success() {
            debug!(stderr = %output.stderr.trim(), "could not read chart values");
            return Ok(String::new());
        }
        Ok(output.stdout)
    }

    /// Install a release without waiting. Waiting is deliberate: the
    /// ServiceAccount patch must land before pods start pulling images.
    pub async fn install(
        &self,
        release: &str,
        chart: &Path,
        namespace: &str,
        set_flags: &[String],
    ) -> Result<()> {
        self.run_deploy("install", release, chart, namespace, set_flags)
            .await
    }

    pub async fn upgrade(
        &self,
        release: &str,
        chart: &Path,
        namespace: &str,
        set_flags: &[String],
    ) -> Result<()> {
        self.run_deploy("upgrade", release, chart, namespace, set_flags)
            .await
    }

    async fn run_deploy(
        &self,
        verb: &str,
        release: &str,
        chart: &Path,
        namespace: &str,
        set_flags: &[String],
    ) -> Result<()> {
        let chart = chart.to_string_lossy();
        let timeout_flag = format!("{}s", self.op_timeout.as_secs());
        let mut args: Vec<&str> = vec![
            verb,
            release,
            chart.as_ref(),
            "--namespace",
            namespace,
            "--timeout",
            timeout_flag.as_str(),
        ];
        for flag in set_flags {
            args.push(flag);
        }
        info!(verb, release, namespace, "running helm");
        self.runner
            .run(HELM, &args, self.hard_cap)
            .await?
            .expect_success(HELM, verb)?;
        Ok(())
    }

    pub async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.runner
            .run(
                HELM,
                &["uninstall", release, "--namespace", namespace],
                self.op_timeout,
            )
            .await?
            .expect_success(HELM, "uninstall")?;
        Ok(())
    }
}
