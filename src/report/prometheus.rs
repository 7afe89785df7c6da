use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::deploy::ido::ensure_query_path;
use crate::error::{OrchestratorError, Result};

/// One sample taken from a Prometheus instant-vector response.
#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusSample {
    pub value: f64,
    /// Unix time attached to the sample, when Prometheus provided one.
    pub timestamp: Option<f64>,
}

/// Result of a query attempt: an empty vector is not an error, just the
/// absence of a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Sample(PrometheusSample),
    Empty,
}

/// Prometheus HTTP client with fallback endpoints: the declared KPIProfile
/// endpoint first, then the namespace-local service, then the `default`
/// namespace service.
pub struct PrometheusClient {
    http: reqwest::Client,
    retries: usize,
}

impl PrometheusClient {
    pub fn new(timeout: Duration, retries: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            retries: retries.max(1),
        }
    }

    pub async fn query(&self, query: &str, endpoint: &str, namespace: &str) -> Result<QueryOutcome> {
        let mut last_error = String::from("no endpoints to try");
        for candidate in candidate_endpoints(endpoint, namespace)
            .into_iter()
            .take(self.retries)
        {
            let url = ensure_query_path(&candidate);
            let response = match self
                .http
                .get(&url)
                .query(&[("query", query)])
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_error = format!("failed to connect to {url}: {err}");
                    continue;
                }
            };
            if !response.status().is_success() {
                last_error = format!("{url} returned HTTP {}", response.status());
                continue;
            }
            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    last_error = format!("invalid JSON from {url}: {err}");
                    continue;
                }
            };
            match parse_response(&body) {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    last_error = format!("{url}: {err}");
                    continue;
                }
            }
        }
        Err(OrchestratorError::Other(format!(
            "all Prometheus endpoints failed; last error: {last_error}"
        )))
    }
}

fn candidate_endpoints(declared: &str, namespace: &str) -> Vec<String> {
    let mut endpoints = Vec::new();
    if !declared.trim().is_empty() {
        endpoints.push(declared.trim().to_string());
    }
    if !namespace.is_empty() {
        endpoints.push(format!(
            "http://prometheus.{namespace}.svc.cluster.local:9090/api/v1/query"
        ));
    }
    endpoints.push("http://prometheus.default.svc.cluster.local:9090/api/v1/query".to_string());
    endpoints
}

/// Parse the standard Prometheus query response. Only instant vectors are
/// handled; anything else is reported as having no sample.
pub(crate) fn parse_response(body: &Value) -> Result<QueryOutcome> {
    if body.pointer("/status").and_then(Value::as_str) != Some("success") {
        let reason = body
            .pointer("/error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(OrchestratorError::Other(format!(
            "Prometheus query failed: {reason}"
        )));
    }

    let result_type = body.pointer("/data/resultType").and_then(Value::as_str);
    let results = body
        .pointer("/data/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if results.is_empty() {
        return Ok(QueryOutcome::Empty);
    }
    if result_type != Some("vector") {
        debug!(result_type, "unhandled Prometheus result type");
        return Ok(QueryOutcome::Empty);
    }

    let first = &results[0];
    let value = first
        .pointer("/value/1")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<f64>().ok())
        .ok_or_else(|| OrchestratorError::Other("could not parse metric value".into()))?;
    let timestamp = first.pointer("/value/0").and_then(Value::as_f64);
    Ok(QueryOutcome::Sample(PrometheusSample { value, timestamp }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_vector_samples() {
        let body = json!({
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [{ "metric": {}, "value": [1717243200.0, "42.37"] }],
            },
        });
        let outcome = parse_response(&body).unwrap();
        assert_eq!(
            outcome,
            QueryOutcome::Sample(PrometheusSample {
                value: 42.37,
                timestamp: Some(1717243200.0),
            })
        );
    }

    #[test]
    fn empty_vector_is_not_an_error() {
        let body = json!({
            "status": "success",
            "data": { "resultType": "vector", "result": [] },
        });
        assert_eq!(parse_response(&body).unwrap(), QueryOutcome::Empty);
    }

    #[test]
    fn failed_status_is_an_error() {
        let body = json!({ "status": "error", "error": "query timed out" });
        let err = parse_response(&body).unwrap_err();
        assert!(format!("{err}").contains("query timed out"));
    }

    #[test]
    fn declared_endpoint_is_tried_first() {
        let endpoints = candidate_endpoints("http://kpi-prom:9090/api/v1/query", "hello");
        assert_eq!(endpoints[0], "http://kpi-prom:9090/api/v1/query");
        assert_eq!(
            endpoints[1],
            "http://prometheus.hello.svc.cluster.local:9090/api/v1/query"
        );
        assert_eq!(
            endpoints[2],
            "http://prometheus.default.svc.cluster.local:9090/api/v1/query"
        );
    }

    #[test]
    fn blank_endpoint_falls_back_to_services() {
        let endpoints = candidate_endpoints("", "hello");
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints[0].contains("prometheus.hello"));
    }
}
