use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::deploy::HelmDeployer;
use crate::graph::GraphDbClient;
use crate::icm::report::IntentReport;
use crate::icm::turtle::IntentGraph;
use crate::icm::{HandlingState, extract_intent_id};
use crate::report::ObservationReporter;
use crate::router::{IntentRouter, RouteOutcome, turtle_expression};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: OrchestratorConfig,
    pub router: Arc<IntentRouter>,
    pub deployer: Arc<HelmDeployer>,
    pub reporter: Arc<ObservationReporter>,
    pub graphdb: Option<Arc<GraphDbClient>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tmf-api/intentManagement/v5/intent", post(create_intent))
        .route(
            "/tmf-api/intentManagement/v5/intent/:id",
            get(get_intent).delete(delete_intent),
        )
        .route(
            "/tmf-api/intentManagement/v5/intent/:id/report",
            get(get_latest_report),
        )
        .route(
            "/tmf-api/intentManagement/v5/intent/:id/report/:number",
            get(get_report_by_number),
        )
        .route("/intent", post(handle_deployment_intent))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok" }))
}

/// TMF-921 intent creation: classify the intent expression and route it to
/// the responsible handler(s).
async fn create_intent(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<Value>,
) -> Response {
    let datacenter = turtle_expression(&payload)
        .and_then(|turtle| IntentGraph::parse(&turtle).ok())
        .and_then(|graph| graph.datacenter())
        .unwrap_or_default();

    let outcome = state.router.route_intent(&payload, &datacenter).await;
    outcome_response(outcome)
}

/// Proxy-side intent endpoint: receives a deployment-concern intent, deploys
/// the referenced chart, and starts observation reporting for its KPIs.
async fn handle_deployment_intent(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<Value>,
) -> Response {
    let Some(turtle) = turtle_expression(&payload) else {
        return error_response(StatusCode::BAD_REQUEST, "No intent expression in payload");
    };
    let graph = match IntentGraph::parse(&turtle) {
        Ok(graph) => graph,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Malformed intent expression: {err}"),
            );
        }
    };
    let Some(info) = graph.find_deployment_info() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Intent carries no deployment expectation",
        );
    };
    let objectives = match graph.deployment_objectives() {
        Ok(objectives) => objectives,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Malformed objective condition: {err}"),
            );
        }
    };

    let intent_id = graph.intent_id().or_else(|| extract_intent_id(&turtle));

    if let Some(graphdb) = &state.graphdb {
        match graphdb.store_intent(&turtle).await {
            Ok(Some(id)) => info!(intent_id = %id, "stored deployment intent"),
            Ok(None) => warn!("stored deployment intent but could not infer its ID"),
            Err(err) => warn!("failed to store deployment intent: {err}"),
        }
    }

    if !state.deployer.enabled() {
        info!(
            application = %info.application,
            "Kubernetes branch disabled, acknowledging intent without deploying"
        );
        return accepted_response(&payload, intent_id.as_deref(), StatusCode::OK);
    }

    let namespace = info.application.clone();
    let outcome = state
        .deployer
        .deploy_chart(
            &info.chart_url,
            &namespace,
            None,
            intent_id.as_deref(),
            &objectives,
        )
        .await;

    match outcome {
        Ok(outcome) => {
            if let Some(id) = &intent_id {
                store_accepted_report(&state, id).await;
                state.reporter.start_reporting(
                    id,
                    &outcome.namespace,
                    &outcome.kpi_profiles,
                    &turtle,
                    outcome.ido_intent.as_ref(),
                );
            }
            accepted_response(&payload, intent_id.as_deref(), StatusCode::CREATED)
        }
        Err(err) => {
            error!(application = %info.application, "deployment failed: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Deployment failed: {err}"),
            )
        }
    }
}

/// Fetch everything reachable from an intent as Turtle.
async fn get_intent(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    let Some(graphdb) = &state.graphdb else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "GraphDB unavailable");
    };
    match graphdb.get_intent(&id).await {
        Ok(ttl) if document_has_statements(&ttl) => turtle_response(ttl),
        Ok(_) => error_response(StatusCode::NOT_FOUND, &format!("No intent with ID {id}")),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &format!("{err}")),
    }
}

/// Remove an intent from the graph and stop its observation reporting.
async fn delete_intent(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    let Some(graphdb) = &state.graphdb else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "GraphDB unavailable");
    };
    state.reporter.stop_reporting(&id);
    match graphdb.delete_intent(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &format!("{err}")),
    }
}

/// Latest report of an intent, by generation time.
async fn get_latest_report(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Response {
    let Some(graphdb) = &state.graphdb else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "GraphDB unavailable");
    };
    match graphdb.get_last_intent_report(&id).await {
        Ok(ttl) if document_has_statements(&ttl) => turtle_response(ttl),
        Ok(_) => error_response(StatusCode::NOT_FOUND, &format!("No reports for intent {id}")),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &format!("{err}")),
    }
}

/// One report of an intent, by its report number.
async fn get_report_by_number(
    State(state): State<AppState>,
    axum::extract::Path((id, number)): axum::extract::Path<(String, i64)>,
) -> Response {
    let Some(graphdb) = &state.graphdb else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "GraphDB unavailable");
    };
    match graphdb.get_intent_report_by_number(&id, number).await {
        Ok(Some(ttl)) => turtle_response(ttl),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &format!("Intent {id} has no report {number}"),
        ),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, &format!("{err}")),
    }
}

/// A re-serialized CONSTRUCT response with no statements is just prefix
/// headers and whitespace.
fn document_has_statements(ttl: &str) -> bool {
    ttl.lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("@prefix") && !line.starts_with("PREFIX"))
}

fn turtle_response(ttl: String) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/turtle")],
        ttl,
    )
        .into_response()
}

/// Record that the deployment branch accepted the intent, continuing the
/// intent's report-number chain.
async fn store_accepted_report(state: &AppState, intent_id: &str) {
    let Some(graphdb) = &state.graphdb else {
        return;
    };
    let next_number = match graphdb.get_highest_report_number(intent_id).await {
        Ok(highest) => highest + 1,
        Err(err) => {
            warn!(intent_id, "could not read report numbers: {err}");
            return;
        }
    };
    let report = IntentReport {
        intent_id,
        report_number: next_number,
        handler: "inOrch",
        owner: "inServ",
        handling_state: HandlingState::Accepted,
        reason: Some("Deployment completed"),
        generated_at: Utc::now(),
    };
    if !matches!(graphdb.store_intent_report(&report.to_turtle()).await, Ok(true)) {
        warn!(intent_id, "failed to store StateIntentAccepted report");
    }
}

fn accepted_response(payload: &Value, intent_id: Option<&str>, status: StatusCode) -> Response {
    let mut body = payload.clone();
    if let Some(object) = body.as_object_mut() {
        object.insert("@type".into(), json!("Intent"));
        if let Some(id) = intent_id {
            object.insert("id".into(), json!(id));
        }
    }
    (status, axum::Json(body)).into_response()
}

fn error_response(status: StatusCode, reason: &str) -> Response {
    let body = json!({ "code": status.as_u16().to_string(), "reason": reason });
    (status, axum::Json(body)).into_response()
}

fn outcome_response(outcome: RouteOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match outcome.body {
        Some(body) => (status, axum::Json(body)).into_response(),
        None => status.into_response(),
    };
    for (name, value) in outcome.headers {
        let Ok(name) = name.parse::<HeaderName>() else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(&value) else {
            continue;
        };
        // Downstream framing headers must not override the response body we set.
        if name == axum::http::header::CONTENT_TYPE || name == axum::http::header::CONTENT_LENGTH {
            continue;
        }
        response.headers_mut().insert(name, value);
    }
    response
}
