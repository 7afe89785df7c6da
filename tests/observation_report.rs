use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{Value, json};

use data5g_orchestrator::config::{CliArgs, OrchestratorConfig};
use data5g_orchestrator::deploy::ido::KpiProfile;
use data5g_orchestrator::graph::GraphDbClient;
use data5g_orchestrator::report::ObservationReporter;

const INTENT_TTL: &str = r#"
@prefix data5g: <http://5g4data.eu/5g4data#> .
@prefix icm: <http://tio.models.tmforum.org/tio/v3.6.0/IntentCommonModel/> .
@prefix log: <http://tio.models.tmforum.org/tio/v3.6.0/LogicalOperators/> .
@prefix quan: <http://tio.models.tmforum.org/tio/v3.6.0/QuantityOntology/> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix set: <http://tio.models.tmforum.org/tio/v3.6.0/SetOperators/> .

data5g:I0123456789abcdef0123456789abcdef a icm:Intent ;
    log:allOf data5g:DEaaaa0000bbbb1111cccc2222dddd3333 .

data5g:DEaaaa0000bbbb1111cccc2222dddd3333 a data5g:DeploymentExpectation ;
    icm:target data5g:deployment ;
    log:allOf data5g:COaaaa0000bbbb1111cccc2222dddd3333 .

data5g:COaaaa0000bbbb1111cccc2222dddd3333 a icm:Condition ;
    set:forAll [ icm:valuesOfTargetProperty data5g:p99-token-target ;
            quan:smaller [ quan:unit "ms" ; rdf:value 400.0 ] ] .
"#;

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

async fn fake_graphdb(statements: Arc<Mutex<Vec<String>>>) -> String {
    let router = Router::new()
        .route("/rest/repositories", get(|| async { Json(json!(["intents"])) }))
        .route(
            "/repositories/intents/statements",
            post(|State(statements): State<Arc<Mutex<Vec<String>>>>, body: String| async move {
                statements.lock().unwrap().push(body);
                axum::http::StatusCode::NO_CONTENT
            }),
        )
        .with_state(statements);
    spawn(router).await
}

async fn fake_prometheus(response: Value) -> String {
    let router = Router::new().route(
        "/api/v1/query",
        get(move || {
            let response = response.clone();
            async move { Json(response) }
        }),
    );
    spawn(router).await
}

fn reporter_with(graphdb_url: &str) -> Arc<ObservationReporter> {
    let cli = CliArgs::parse_from(["data5g-orchestrator", "--graphdb-url", graphdb_url]);
    let config = OrchestratorConfig::from_env_and_args(cli).expect("config builds");
    let graphdb = GraphDbClient::from_config(&config).map(Arc::new);
    ObservationReporter::new(&config, graphdb)
}

fn kpi_profile(endpoint: &str) -> KpiProfile {
    KpiProfile {
        name: "p99token-hello".to_string(),
        kpi_type: "latency".to_string(),
        description: "token creation time (p99 percentile)".to_string(),
        query: "histogram_quantile(0.99, sum(rate(token_creation_duration_bucket[30s])) by (le))"
            .to_string(),
        endpoint: endpoint.to_string(),
        reporting_frequency: None,
    }
}

fn ido_intent() -> Value {
    json!({
        "apiVersion": "ido.intel.com/v1alpha1",
        "kind": "Intent",
        "spec": {
            "objectives": [{
                "name": "p99-token-target",
                "value": 0.4,
                "measuredBy": "hello/p99token-hello",
            }],
        },
    })
}

async fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
    for _ in 0..100 {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn observations(statements: &Mutex<Vec<String>>) -> Vec<String> {
    statements
        .lock()
        .unwrap()
        .iter()
        .filter(|body| body.contains("met:Observation"))
        .cloned()
        .collect()
}

#[tokio::test]
async fn first_tick_emits_a_converted_observation() {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let graphdb = fake_graphdb(statements.clone()).await;
    let prometheus = fake_prometheus(json!({
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [{ "metric": {}, "value": [1717243200.0, "42.37"] }],
        },
    }))
    .await;

    let reporter = reporter_with(&graphdb);
    let intent_id = "0123456789abcdef0123456789abcdef";
    reporter.start_reporting(
        intent_id,
        "hello",
        &[kpi_profile(&format!("{prometheus}/api/v1/query"))],
        INTENT_TTL,
        Some(&ido_intent()),
    );

    assert!(
        wait_for(|| !observations(&statements).is_empty()).await,
        "an observation should be stored after the first tick"
    );
    reporter.stop_reporting(intent_id);

    let stored = observations(&statements);
    let observation = &stored[0];
    // The intent declared 400 ms, parsed to seconds, so the unit is "s".
    assert!(observation.contains("quan:unit \"s\""));
    assert!(observation.contains("rdf:value 42.370"));
    assert!(observation.contains(
        "met:observedMetric data5g:p99-token-target_COaaaa0000bbbb1111cccc2222dddd3333"
    ));
    // The Prometheus sample time is rendered, not the wall clock.
    assert!(observation.contains("\"2024-06-01T12:00:00Z\"^^xsd:dateTime"));
}

#[tokio::test]
async fn empty_vectors_emit_no_observations() {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let graphdb = fake_graphdb(statements.clone()).await;
    let prometheus = fake_prometheus(json!({
        "status": "success",
        "data": { "resultType": "vector", "result": [] },
    }))
    .await;

    let reporter = reporter_with(&graphdb);
    let intent_id = "0123456789abcdef0123456789abcdef";
    reporter.start_reporting(
        intent_id,
        "hello",
        &[kpi_profile(&format!("{prometheus}/api/v1/query"))],
        INTENT_TTL,
        Some(&ido_intent()),
    );

    // Give the loop time for its first tick, then check nothing was emitted.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(observations(&statements).is_empty());
    reporter.stop_reporting(intent_id);
}

#[tokio::test]
async fn metadata_is_registered_once_per_metric() {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let graphdb = fake_graphdb(statements.clone()).await;
    let prometheus = fake_prometheus(json!({
        "status": "success",
        "data": { "resultType": "vector", "result": [] },
    }))
    .await;

    let reporter = reporter_with(&graphdb);
    let endpoint = format!("{prometheus}/api/v1/query");
    let intent_id = "0123456789abcdef0123456789abcdef";
    reporter.start_reporting(intent_id, "hello", &[kpi_profile(&endpoint)], INTENT_TTL, Some(&ido_intent()));

    assert!(
        wait_for(|| {
            statements
                .lock()
                .unwrap()
                .iter()
                .any(|body| body.contains("hasQuery"))
        })
        .await
    );

    // Restarting does not register the metadata a second time.
    reporter.start_reporting(intent_id, "hello", &[kpi_profile(&endpoint)], INTENT_TTL, Some(&ido_intent()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    let metadata_inserts = statements
        .lock()
        .unwrap()
        .iter()
        .filter(|body| body.contains("hasQuery"))
        .count();
    assert_eq!(metadata_inserts, 1);
    reporter.stop_reporting(intent_id);

    let registered = statements
        .lock()
        .unwrap()
        .iter()
        .find(|body| body.contains("hasQuery"))
        .cloned()
        .unwrap();
    assert!(registered.contains("GRAPH <http://intent-reports-metadata>"));
    assert!(registered.contains("p99-token-target_COaaaa0000bbbb1111cccc2222dddd3333"));
}

#[tokio::test]
async fn restart_replaces_the_previous_task() {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let graphdb = fake_graphdb(statements.clone()).await;
    let prometheus = fake_prometheus(json!({
        "status": "success",
        "data": { "resultType": "vector", "result": [] },
    }))
    .await;

    let reporter = reporter_with(&graphdb);
    let endpoint = format!("{prometheus}/api/v1/query");
    let intent_id = "0123456789abcdef0123456789abcdef";

    reporter.start_reporting(intent_id, "hello", &[kpi_profile(&endpoint)], INTENT_TTL, Some(&ido_intent()));
    assert_eq!(reporter.active_kpis(intent_id), vec!["p99token-hello"]);
    assert_eq!(
        reporter.condition_for(intent_id, "p99token-hello").as_deref(),
        Some("COaaaa0000bbbb1111cccc2222dddd3333")
    );

    reporter.start_reporting(intent_id, "hello", &[kpi_profile(&endpoint)], INTENT_TTL, Some(&ido_intent()));
    assert_eq!(reporter.active_kpis(intent_id).len(), 1);

    reporter.stop_reporting(intent_id);
    assert!(reporter.active_kpis(intent_id).is_empty());
}

#[tokio::test]
async fn unmappable_kpis_are_skipped() {
    let statements = Arc::new(Mutex::new(Vec::new()));
    let graphdb = fake_graphdb(statements.clone()).await;

    let reporter = reporter_with(&graphdb);
    let intent_id = "0123456789abcdef0123456789abcdef";

    // No IDO intent: nothing to map the KPI through.
    reporter.start_reporting(
        intent_id,
        "hello",
        &[kpi_profile("http://127.0.0.1:1")],
        INTENT_TTL,
        None,
    );
    assert!(reporter.active_kpis(intent_id).is_empty());

    // A profile without a query is rejected up front.
    let mut profile = kpi_profile("http://127.0.0.1:1");
    profile.query = String::new();
    reporter.start_reporting(intent_id, "hello", &[profile], INTENT_TTL, Some(&ido_intent()));
    assert!(reporter.active_kpis(intent_id).is_empty());
}
