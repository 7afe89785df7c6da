use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::graph::GraphDbClient;
use crate::icm::report::IntentReport;
use crate::icm::turtle::IntentGraph;
use crate::icm::{Expectations, HandlingState};
use crate::infra::InfrastructureResolver;

/// Result of routing one intent: the HTTP material handed back to the caller.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub body: Option<Value>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl RouteOutcome {
    fn of(body: Value, status: u16) -> Self {
        Self {
            body: Some(body),
            status,
            headers: Vec::new(),
        }
    }

    fn error(status: u16, reason: String) -> Self {
        Self::of(
            json!({ "code": status.to_string(), "reason": reason }),
            status,
        )
    }
}

/// Extract the Turtle expression from a TMF-921 intent payload.
pub fn turtle_expression(intent_data: &Value) -> Option<String> {
    let expression = intent_data.get("expression")?;
    expression
        .get("expressionValue")
        .or_else(|| expression.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Routes intents to the appropriate handler: network expectations to inNet,
/// deployment expectations to the DataCenter's inOrch proxy, combined
/// intents to both after splitting.
pub struct IntentRouter {
    config: OrchestratorConfig,
    http: reqwest::Client,
    graphdb: Option<Arc<GraphDbClient>>,
    infrastructure: Option<Arc<InfrastructureResolver>>,
}

impl IntentRouter {
    pub fn new(
        config: OrchestratorConfig,
        graphdb: Option<Arc<GraphDbClient>>,
        infrastructure: Option<Arc<InfrastructureResolver>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.downstream_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            graphdb,
            infrastructure,
        }
    }

    pub async fn route_intent(&self, intent_data: &Value, datacenter: &str) -> RouteOutcome {
        let Some(turtle) = turtle_expression(intent_data) else {
            warn!("no turtle expression found in intent, falling back to inOrch routing");
            return self.route_to_inorch(intent_data, datacenter).await;
        };

        let graph = match IntentGraph::parse(&turtle) {
            Ok(graph) => graph,
            Err(err) => {
                warn!("intent expression does not parse: {err}");
                return RouteOutcome::error(400, format!("Malformed intent expression: {err}"));
            }
        };
        let expectations = graph.find_all_expectations();
        log_classification(&expectations);

        if self.config.test_mode {
            return self.test_mode_outcome(intent_data, datacenter, &expectations);
        }

        match (expectations.has_network(), expectations.has_deployment()) {
            (true, true) => self.split_and_route(intent_data, datacenter, &graph, &turtle).await,
            (true, false) => self.route_to_innet(intent_data, &turtle).await,
            (false, true) => self.route_to_inorch(intent_data, datacenter).await,
            (false, false) => {
                warn!("no expectations detected, falling back to inOrch routing");
                self.route_to_inorch(intent_data, datacenter).await
            }
        }
    }

    /// Forward a deployment intent to the DataCenter's inOrch handler.
    async fn route_to_inorch(&self, intent_data: &Value, datacenter: &str) -> RouteOutcome {
        let Some(infrastructure) = &self.infrastructure else {
            return RouteOutcome::error(
                503,
                "GraphDB unavailable: no infrastructure resolver configured".into(),
            );
        };
        let target = match infrastructure.datacenter_url(datacenter).await {
            Ok(url) => url,
            Err(OrchestratorError::DatacenterNotFound(datacenter)) => {
                error!(datacenter = %datacenter, "DataCenter not found in GraphDB");
                return RouteOutcome {
                    body: Some(json!({
                        "code": "500",
                        "reason": format!("DataCenter {datacenter} not found in GraphDB"),
                        "message": "DataCenter not found in infrastructure data",
                    })),
                    status: 500,
                    headers: Vec::new(),
                };
            }
            Err(err) => {
                error!(datacenter, "failed to resolve DataCenter URL: {err}");
                return RouteOutcome {
                    body: Some(json!({
                        "code": "503",
                        "reason": format!("GraphDB unavailable: {err}"),
                        "message": "Cannot route intent - GraphDB is not responding",
                    })),
                    status: 503,
                    headers: Vec::new(),
                };
            }
        };

        let target = normalize_intent_url(&target);
        info!(datacenter, url = %target, "sending DE intent to inOrch");
        self.send_request(&target, intent_data, Some(datacenter), "inOrch")
            .await
    }

    /// Forward a network intent to inNet, or absorb it when inNet is not
    /// ready: the intent is persisted and acknowledged on its behalf.
    async fn route_to_innet(&self, intent_data: &Value, turtle: &str) -> RouteOutcome {
        let target = format!("{}/intent", self.config.innet_url);
        info!(url = %target, "sending NE intent to inNet");

        if !self.config.innet_ready {
            let intent_id = self.store_intent(turtle).await;
            match &intent_id {
                Some(id) => {
                    info!("inNet not ready; absorbed intent {id} with a StateIntentReceived report");
                    self.store_intent_received_report(id).await;
                }
                None => warn!("inNet not ready and intent could not be persisted"),
            }
            return RouteOutcome::of(
                json!({
                    "@type": "Intent",
                    "id": intent_id,
                    "description": "Intent accepted by inNet",
                }),
                200,
            );
        }

        self.send_request(&target, intent_data, None, "inNet").await
    }

    /// Split a combined intent, store the original for provenance, dispatch
    /// network first then deployment, and assemble the bundle response with
    /// the worst of the two statuses.
    async fn split_and_route(
        &self,
        intent_data: &Value,
        datacenter: &str,
        graph: &IntentGraph,
        turtle: &str,
    ) -> RouteOutcome {
        match self.store_intent(turtle).await {
            Some(id) => info!("stored original combined intent with ID {id}"),
            None => warn!("failed to store original combined intent"),
        }

        let (ne_turtle, de_turtle) = match graph.split_combined_intent() {
            Ok(halves) => halves,
            Err(err) => {
                error!("failed to split intent: {err}");
                return RouteOutcome::error(400, format!("Cannot split intent: {err}"));
            }
        };

        let ne_intent = with_expression(intent_data, &ne_turtle);
        let de_intent = with_expression(intent_data, &de_turtle);

        debug!(datacenter, "split intent: routing NE to inNet and DE to inOrch");
        let ne_outcome = self.route_to_innet(&ne_intent, &ne_turtle).await;
        let de_outcome = self.route_to_inorch(&de_intent, datacenter).await;

        let mut intents = Vec::new();
        for outcome in [&ne_outcome, &de_outcome] {
            if let Some(body) = &outcome.body {
                let mut child = body.clone();
                if child.get("@type").is_none() {
                    if let Some(object) = child.as_object_mut() {
                        object.insert("@type".into(), json!("Intent"));
                    }
                }
                intents.push(child);
            }
        }

        let status = ne_outcome.status.max(de_outcome.status);
        // On header conflicts the deployment branch wins.
        let mut headers = ne_outcome.headers;
        headers.extend(de_outcome.headers);

        info!(
            innet_status = ne_outcome.status,
            inorch_status = de_outcome.status,
            "split routing complete"
        );
        RouteOutcome {
            body: Some(json!({
                "@type": "Intent",
                "isBundle": true,
                "description": "Intent split and routed to inNet and inOrch",
                "intents": intents,
            })),
            status,
            headers,
        }
    }

    async fn send_request(
        &self,
        url: &str,
        intent_data: &Value,
        datacenter: Option<&str>,
        handler: &str,
    ) -> RouteOutcome {
        let response = self.http.post(url).json(intent_data).send().await;
        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                error!(url, handler, datacenter, "timeout while routing intent");
                return RouteOutcome::error(504, format!("Timeout connecting to {handler}"));
            }
            Err(err) if err.is_connect() => {
                error!(url, handler, datacenter, "connection error while routing intent: {err}");
                return RouteOutcome::error(503, format!("Cannot connect to {handler}"));
            }
            Err(err) => {
                error!(url, handler, datacenter, "error routing intent: {err}");
                return RouteOutcome::error(500, format!("Internal error routing to {handler}: {err}"));
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| {
                !matches!(
                    name.as_str(),
                    "transfer-encoding" | "content-length" | "connection"
                )
            })
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        let text = response.text().await.unwrap_or_default();
        let body = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok().or(Some(json!({ "message": text })))
        };

        if (200..300).contains(&status) {
            info!(handler, status, "successfully routed intent");
        } else {
            warn!(handler, status, body = ?body, "downstream handler rejected intent");
        }
        RouteOutcome {
            body,
            status,
            headers,
        }
    }

    async fn store_intent(&self, turtle: &str) -> Option<String> {
        let graphdb = match &self.graphdb {
            Some(graphdb) => graphdb,
            None => {
                warn!("GraphDB client not available, cannot store intent");
                return None;
            }
        };
        match graphdb.store_intent(turtle).await {
            Ok(id) => id,
            Err(err) => {
                error!("failed to store intent in GraphDB: {err}");
                None
            }
        }
    }

    /// Persist the StateIntentReceived report that stands in for the absent
    /// inNet handler. The report number continues the intent's chain.
    async fn store_intent_received_report(&self, intent_id: &str) {
        let Some(graphdb) = &self.graphdb else {
            warn!("GraphDB client not available, cannot store intent report");
            return;
        };
        let next_number = match graphdb.get_highest_report_number(intent_id).await {
            Ok(highest) => highest + 1,
            Err(err) => {
                warn!(intent_id, "could not read report numbers, assuming first: {err}");
                1
            }
        };
        let report = IntentReport {
            intent_id,
            report_number: next_number,
            handler: "inNet",
            owner: "inServ",
            handling_state: HandlingState::Received,
            reason: Some("Intent received and being processed"),
            generated_at: Utc::now(),
        };
        match graphdb.store_intent_report(&report.to_turtle()).await {
            Ok(true) => debug!(intent_id, next_number, "stored StateIntentReceived report"),
            Ok(false) | Err(_) => warn!(intent_id, "failed to store StateIntentReceived report"),
        }
    }

    fn test_mode_outcome(
        &self,
        intent_data: &Value,
        datacenter: &str,
        expectations: &Expectations,
    ) -> RouteOutcome {
        let handlers = match (expectations.has_network(), expectations.has_deployment()) {
            (true, true) => "inNet, inOrch",
            (true, false) => "inNet",
            (false, true) => "inOrch",
            (false, false) => "inOrch (fallback)",
        };
        info!(
            datacenter,
            handlers, "test mode enabled - intent classified but not forwarded"
        );
        if expectations.has_network() && expectations.has_deployment() {
            RouteOutcome::of(
                json!({
                    "@type": "Intent",
                    "isBundle": true,
                    "description": format!(
                        "Test mode: Intent would be split and forwarded to {handlers}"
                    ),
                }),
                200,
            )
        } else {
            RouteOutcome::of(intent_data.clone(), 200)
        }
    }
}

fn log_classification(expectations: &Expectations) {
    match (expectations.has_network(), expectations.has_deployment()) {
        (true, true) => info!("detected both network (NE) and deployment (DE) expectations"),
        (true, false) => info!("detected network (NE) expectation only"),
        (false, true) => info!("detected deployment (DE) expectation only"),
        (false, false) => info!("no expectations detected, using fallback routing"),
    }
}

/// Replace the expression value of a TMF intent payload, leaving the rest of
/// the resource untouched.
fn with_expression(intent_data: &Value, turtle: &str) -> Value {
    let mut copy = intent_data.clone();
    if let Some(expression) = copy.get_mut("expression").and_then(Value::as_object_mut) {
        expression.insert("expressionValue".into(), json!(turtle));
    }
    copy
}

/// Downstream handlers accept intents on `<base>/intent`.
fn normalize_intent_url(base: &str) -> String {
    if base.ends_with("/intent") {
        base.to_string()
    } else {
        format!("{}/intent", base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_urls_are_normalised() {
        assert_eq!(normalize_intent_url("http://ec21:8080"), "http://ec21:8080/intent");
        assert_eq!(normalize_intent_url("http://ec21:8080/"), "http://ec21:8080/intent");
        assert_eq!(
            normalize_intent_url("http://ec21:8080/intent"),
            "http://ec21:8080/intent"
        );
    }

    #[test]
    fn expression_replacement_preserves_metadata() {
        let payload = json!({
            "@type": "Intent",
            "name": "combined",
            "expression": {
                "@type": "TurtleExpression",
                "expressionValue": "original",
            },
        });
        let replaced = with_expression(&payload, "split-half");
        assert_eq!(
            replaced.pointer("/expression/expressionValue").and_then(Value::as_str),
            Some("split-half")
        );
        assert_eq!(replaced.pointer("/name").and_then(Value::as_str), Some("combined"));
    }

    #[test]
    fn turtle_expression_reads_both_field_names() {
        let payload = json!({ "expression": { "expressionValue": "ttl-a" } });
        assert_eq!(turtle_expression(&payload).as_deref(), Some("ttl-a"));
        let payload = json!({ "expression": { "value": "ttl-b" } });
        assert_eq!(turtle_expression(&payload).as_deref(), Some("ttl-b"));
        assert_eq!(turtle_expression(&json!({})), None);
    }
}
