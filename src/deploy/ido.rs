use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::OrchestratorConfig;

pub const IDO_API_VERSION: &str = "ido.intel.com/v1alpha1";
const DEFAULT_EXTERNAL_PROMETHEUS: &str = "http://start5g-1.cs.uit.no:9090";
const IN_CLUSTER_PROMETHEUS: &str = "http://prometheus.default.svc.cluster.local:9090";

/// KPI class driving the PromQL template and the fallback observation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KpiType {
    Latency,
    Bandwidth,
}

impl KpiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KpiType::Latency => "latency",
            KpiType::Bandwidth => "bandwidth",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "latency" => Some(KpiType::Latency),
            "bandwidth" => Some(KpiType::Bandwidth),
            _ => None,
        }
    }

    /// Classify an objective by its name.
    pub fn from_objective(objective: &str) -> Self {
        if objective.to_ascii_lowercase().contains("bandwidth") {
            KpiType::Bandwidth
        } else {
            KpiType::Latency
        }
    }

    pub fn promql(&self) -> &'static str {
        match self {
            KpiType::Latency => {
                "histogram_quantile(0.99, sum(rate(token_creation_duration_bucket[30s])) by (le))"
            }
            KpiType::Bandwidth => {
                "sum(rate(container_network_transmit_bytes_total[30s])) * 8 / 1000000"
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            KpiType::Latency => "token creation time (p99 percentile)",
            KpiType::Bandwidth => "network throughput",
        }
    }
}

/// Flat view of a KPIProfile, shared between the deployer (which creates the
/// custom resource) and the observation reporter (which polls its query).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub kpi_type: String,
    pub description: String,
    pub query: String,
    pub endpoint: String,
    #[serde(rename = "reportingFrequency", skip_serializing_if = "Option::is_none")]
    pub reporting_frequency: Option<u64>,
}

/// KPIProfile resource name for an objective: the objective without its
/// `-target` suffix and dashes, scoped to the namespace
/// (`p99-token-target` in `hello` → `p99token-hello`).
pub fn kpi_profile_name(objective: &str, namespace: &str) -> String {
    let base: String = objective
        .trim_end_matches("-target")
        .chars()
        .filter(|c| *c != '-')
        .collect();
    format!("{base}-{namespace}")
}

/// Prometheus query endpoint: in-cluster service when running inside a pod,
/// then the configured URL, then the external default. The path always ends
/// in `/api/v1/query`.
pub fn resolve_prometheus_endpoint(config: &OrchestratorConfig) -> String {
    let base = if in_cluster() {
        IN_CLUSTER_PROMETHEUS.to_string()
    } else if let Some(url) = &config.prometheus_url {
        url.clone()
    } else {
        DEFAULT_EXTERNAL_PROMETHEUS.to_string()
    };
    ensure_query_path(&base)
}

pub fn ensure_query_path(url: &str) -> String {
    if url.ends_with("/api/v1/query") {
        url.to_string()
    } else {
        format!("{}/api/v1/query", url.trim_end_matches('/'))
    }
}

fn in_cluster() -> bool {
    Path::new("/var/run/secrets/kubernetes.io/serviceaccount/token").exists()
}

/// KPIProfile custom resource body.
pub fn kpi_profile_crd(namespace: &str, profile: &KpiProfile) -> Value {
    json!({
        "apiVersion": IDO_API_VERSION,
        "kind": "KPIProfile",
        "metadata": {
            "name": profile.name,
            "namespace": namespace,
        },
        "spec": {
            "type": profile.kpi_type,
            "description": profile.description,
            "query": profile.query,
            "props": {
                "endpoint": profile.endpoint,
            },
        },
    })
}

/// IDO Intent custom resource body mapping each TMF objective to the
/// KPIProfile that measures it.
pub fn ido_intent_crd(
    namespace: &str,
    deployment_name: &str,
    objectives: &[(String, f64, String)],
) -> Value {
    let objectives: Vec<Value> = objectives
        .iter()
        .map(|(name, value, measured_by)| {
            json!({
                "name": name,
                "value": value,
                "measuredBy": measured_by,
            })
        })
        .collect();
    json!({
        "apiVersion": IDO_API_VERSION,
        "kind": "Intent",
        "metadata": {
            "name": format!("llm-intent-{namespace}"),
            "namespace": namespace,
        },
        "spec": {
            "targetRef": {
                "kind": "Deployment",
                "name": format!("{namespace}/{deployment_name}"),
            },
            "priority": 1.0,
            "objectives": objectives,
        },
    })
}
