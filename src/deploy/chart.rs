use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use reqwest::Url;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

/// External chart hosts rewritten to the in-cluster chart service so pods can
/// reach charts published on the host machine.
const REWRITTEN_HOSTS: [&str; 2] = ["start5g-1.cs.uit.no", "129.242.22.51"];
const REWRITTEN_PORT: u16 = 3040;
const DEFAULT_CHART_SERVICE: &str = "http://chart-server.default.svc.cluster.local:3040";

/// A resolved chart location. Downloaded archives live in a temporary file
/// that is removed when the source is dropped.
pub struct ChartSource {
    path: PathBuf,
    _download: Option<NamedTempFile>,
}

impl ChartSource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rewrite well-known external chart hosts to the in-cluster service URL.
pub fn rewrite_chart_url(chart_url: &str, service_url: Option<&str>) -> String {
    let Ok(parsed) = Url::parse(chart_url) else {
        return chart_url.to_string();
    };
    let host_matches = parsed
        .host_str()
        .is_some_and(|host| REWRITTEN_HOSTS.contains(&host));
    if !host_matches || parsed.port() != Some(REWRITTEN_PORT) {
        return chart_url.to_string();
    }

    let base = service_url.unwrap_or(DEFAULT_CHART_SERVICE).trim_end_matches('/');
    let mut rewritten = format!("{}{}", base, parsed.path());
    if let Some(query) = parsed.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    info!(from = %chart_url, to = %rewritten, "rewriting chart URL to in-cluster service");
    rewritten
}

/// Resolve a chart reference to a local path, downloading http(s) archives.
pub async fn resolve_chart(
    http: &reqwest::Client,
    chart_url: &str,
    service_url: Option<&str>,
) -> Result<ChartSource> {
    match Url::parse(chart_url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
            let effective = rewrite_chart_url(chart_url, service_url);
            debug!(url = %effective, "downloading Helm chart");
            let response = http
                .get(&effective)
                .send()
                .await
                .map_err(|err| OrchestratorError::Deploy(format!(
                    "failed to download chart from {effective}: {err}"
                )))?;
            if !response.status().is_success() {
                return Err(OrchestratorError::Deploy(format!(
                    "failed to download chart from {effective}: HTTP {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| OrchestratorError::Deploy(format!(
                    "failed to read chart body from {effective}: {err}"
                )))?;

            let file = tempfile::Builder::new().suffix(".tgz").tempfile()?;
            std::fs::write(file.path(), &bytes)?;
            debug!(path = %file.path().display(), "downloaded chart archive");
            Ok(ChartSource {
                path: file.path().to_path_buf(),
                _download: Some(file),
            })
        }
        Ok(parsed) if parsed.scheme() == "file" => {
            let path = PathBuf::from(parsed.path());
            local_chart(path)
        }
        Ok(parsed) => Err(OrchestratorError::Deploy(format!(
            "unsupported chart URL scheme: {}",
            parsed.scheme()
        ))),
        Err(_) => local_chart(PathBuf::from(chart_url)),
    }
}

fn local_chart(path: PathBuf) -> Result<ChartSource> {
    if !path.exists() {
        return Err(OrchestratorError::Deploy(format!(
            "chart file not found: {}",
            path.display()
        )));
    }
    Ok(ChartSource {
        path,
        _download: None,
    })
}

/// Collect NodePort slots declared in a chart's default values, in
/// declaration order. A slot is an integer `nodePort` reachable under
/// `service.nodePort` or `services.<name>.nodePort`.
pub fn nodeport_slots(values_yaml: &str) -> Result<IndexMap<String, i64>> {
    let mut slots = IndexMap::new();
    if values_yaml.trim().is_empty() {
        return Ok(slots);
    }
    let values: serde_yaml_bw::Value = serde_yaml_bw::from_str(values_yaml)?;
    scan_for_nodeports(&values, "", &mut slots);
    Ok(slots)
}

fn scan_for_nodeports(value: &serde_yaml_bw::Value, path: &str, slots: &mut IndexMap<String, i64>) {
    let serde_yaml_bw::Value::Mapping(mapping) = value else {
        return;
    };
    for (key, entry) in mapping {
        let Some(key) = key.as_str() else {
            continue;
        };
        let current = if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        };

        if key == "nodePort" {
            if let Some(port) = entry.as_i64() {
                if path.to_lowercase().contains("service") {
                    debug!(path = %current, port, "found NodePort slot in chart values");
                    slots.insert(current.clone(), port);
                } else {
                    debug!(path = %current, "ignoring nodePort outside a service block");
                }
                continue;
            }
        }

        scan_for_nodeports(entry, &current, slots);
    }
}
