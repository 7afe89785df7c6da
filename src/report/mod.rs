//! Observation reporting: one cancellable task per (intent, KPIProfile) that
//! polls Prometheus on a schedule and writes ICM Observations to the graph.

pub mod prometheus;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::deploy::ido::{KpiProfile, KpiType};
use crate::graph::GraphDbClient;
use crate::icm::ObjectiveTarget;
use crate::icm::report::Observation;
use crate::icm::turtle::IntentGraph;
use prometheus::{PrometheusClient, QueryOutcome};

const MIN_FREQUENCY_SECONDS: u64 = 5;
const MAX_FREQUENCY_SECONDS: u64 = 300;

struct TaskHandle {
    running: Arc<AtomicBool>,
    condition_id: String,
}

/// Supervises the per-KPI observation loops. One value owns all task state;
/// request handlers hold it behind an `Arc` for the process lifetime.
pub struct ObservationReporter {
    graphdb: Option<Arc<GraphDbClient>>,
    prometheus: PrometheusClient,
    default_frequency: u64,
    active_tasks: Mutex<HashMap<String, HashMap<String, TaskHandle>>>,
    metadata_stored: Mutex<HashSet<String>>,
}

impl ObservationReporter {
    pub fn new(config: &OrchestratorConfig, graphdb: Option<Arc<GraphDbClient>>) -> Arc<Self> {
        Arc::new(Self {
            graphdb,
            prometheus: PrometheusClient::new(config.prometheus_timeout, config.prometheus_retries),
            default_frequency: config.observation_frequency,
            active_tasks: Mutex::new(HashMap::new()),
            metadata_stored: Mutex::new(HashSet::new()),
        })
    }

    /// Start one reporting task per KPIProfile that can be mapped to a
    /// Condition of the intent. Unmappable profiles are skipped with a
    /// warning. Restarting a (intent, KPI) pair replaces its previous task.
    pub fn start_reporting(
        self: &Arc<Self>,
        intent_id: &str,
        namespace: &str,
        kpi_profiles: &[KpiProfile],
        ttl: &str,
        ido_intent: Option<&Value>,
    ) {
        if self.graphdb.is_none() {
            debug!("GraphDB not configured, skipping observation reporting");
            return;
        }
        if kpi_profiles.is_empty() {
            debug!(intent_id, "no KPIProfiles provided");
            return;
        }
        let graph = match IntentGraph::parse(ttl) {
            Ok(graph) => Arc::new(graph),
            Err(err) => {
                warn!(intent_id, "cannot parse intent for observation reporting: {err}");
                return;
            }
        };
        let objectives = graph.deployment_objectives().unwrap_or_default();

        info!(
            intent_id,
            profiles = kpi_profiles.len(),
            "starting observation reporting"
        );

        for kpi in kpi_profiles {
            if kpi.query.trim().is_empty() {
                warn!(intent_id, kpi = %kpi.name, "KPIProfile has no query, rejecting");
                continue;
            }
            let Some(objective_name) = map_kpi_to_objective(&kpi.name, ido_intent) else {
                warn!(
                    intent_id,
                    kpi = %kpi.name,
                    "could not map KPIProfile to an IDO objective, skipping"
                );
                continue;
            };
            let Some(condition_id) = graph.condition_for_objective(&objective_name) else {
                warn!(
                    intent_id,
                    kpi = %kpi.name,
                    objective = %objective_name,
                    "no Condition matches the objective, skipping"
                );
                continue;
            };

            // The metric name uses the objective declared by the Condition
            // itself, which may differ from the IDO objective lookup key.
            let metric_objective = graph
                .objective_name_of_condition(&condition_id)
                .unwrap_or_else(|| objective_name.clone());

            let frequency = clamp_frequency(kpi.reporting_frequency, self.default_frequency);
            let unit = determine_unit(
                KpiType::from_str(&kpi.kpi_type),
                objectives.get(&metric_objective),
                graph.declared_unit_of_condition(&condition_id).as_deref(),
            );

            let running = Arc::new(AtomicBool::new(true));
            {
                let mut active = self.active_tasks.lock().expect("reporter lock poisoned");
                let tasks = active.entry(intent_id.to_string()).or_default();
                if let Some(previous) = tasks.insert(
                    kpi.name.clone(),
                    TaskHandle {
                        running: running.clone(),
                        condition_id: condition_id.clone(),
                    },
                ) {
                    previous.running.store(false, Ordering::Relaxed);
                    debug!(intent_id, kpi = %kpi.name, "replaced previous reporting task");
                }
            }

            let metric_name = format!("{metric_objective}_{condition_id}");
            let reporter = self.clone();
            tokio::spawn(async move {
                reporter.register_metadata(&metric_name).await;
            });

            info!(
                intent_id,
                kpi = %kpi.name,
                condition = %condition_id,
                frequency,
                unit = %unit,
                "started observation reporting task"
            );
            let reporter = self.clone();
            let task = ReportingTask {
                intent_id: intent_id.to_string(),
                kpi: kpi.clone(),
                objective_name: metric_objective,
                condition_id,
                namespace: namespace.to_string(),
                frequency,
                unit,
                running,
            };
            tokio::spawn(async move { reporter.run_loop(task).await });
        }
    }

    /// Mark every task of an intent as not-running. Each loop observes the
    /// flag at its next iteration and exits cleanly.
    pub fn stop_reporting(&self, intent_id: &str) {
        let mut active = self.active_tasks.lock().expect("reporter lock poisoned");
        let Some(tasks) = active.remove(intent_id) else {
            debug!(intent_id, "no active reporting tasks");
            return;
        };
        for (kpi_name, handle) in &tasks {
            handle.running.store(false, Ordering::Relaxed);
            debug!(intent_id, kpi = %kpi_name, "stopped reporting task");
        }
        info!(intent_id, "stopped all observation reporting");
    }

    /// KPI names with a live task for an intent.
    pub fn active_kpis(&self, intent_id: &str) -> Vec<String> {
        let active = self.active_tasks.lock().expect("reporter lock poisoned");
        active
            .get(intent_id)
            .map(|tasks| tasks.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Condition a KPI reports against, if its task is live.
    pub fn condition_for(&self, intent_id: &str, kpi_name: &str) -> Option<String> {
        let active = self.active_tasks.lock().expect("reporter lock poisoned");
        active
            .get(intent_id)
            .and_then(|tasks| tasks.get(kpi_name))
            .map(|handle| handle.condition_id.clone())
    }

    /// Register the federated observation query for a metric, once per
    /// process. A failed registration is forgotten so it can be retried.
    async fn register_metadata(&self, metric_name: &str) {
        let Some(graphdb) = &self.graphdb else {
            return;
        };
        {
            let mut stored = self.metadata_stored.lock().expect("metadata lock poisoned");
            if stored.contains(metric_name) {
                debug!(metric = metric_name, "query metadata already registered");
                return;
            }
            stored.insert(metric_name.to_string());
        }
        match graphdb.store_graphdb_metadata(metric_name).await {
            Ok(()) => info!(metric = metric_name, "registered observation query metadata"),
            Err(err) => {
                warn!(metric = metric_name, "failed to register query metadata: {err}");
                let mut stored = self.metadata_stored.lock().expect("metadata lock poisoned");
                stored.remove(metric_name);
            }
        }
    }

    async fn run_loop(self: Arc<Self>, task: ReportingTask) {
        let Some(graphdb) = self.graphdb.clone() else {
            return;
        };
        while task.running.load(Ordering::Relaxed) {
            match self
                .prometheus
                .query(&task.kpi.query, &task.kpi.endpoint, &task.namespace)
                .await
            {
                Ok(QueryOutcome::Sample(sample)) => {
                    let obtained_at = sample
                        .timestamp
                        .and_then(unix_to_datetime)
                        .unwrap_or_else(Utc::now);
                    let observation = Observation {
                        objective_name: &task.objective_name,
                        condition_id: &task.condition_id,
                        value: sample.value,
                        unit: &task.unit,
                        obtained_at,
                    };
                    match graphdb.store_intent_report(&observation.to_turtle()).await {
                        Ok(true) => debug!(
                            intent_id = %task.intent_id,
                            kpi = %task.kpi.name,
                            value = sample.value,
                            unit = %task.unit,
                            "stored observation"
                        ),
                        Ok(false) | Err(_) => warn!(
                            intent_id = %task.intent_id,
                            kpi = %task.kpi.name,
                            "failed to store observation"
                        ),
                    }
                }
                Ok(QueryOutcome::Empty) => debug!(
                    intent_id = %task.intent_id,
                    kpi = %task.kpi.name,
                    "no sample available yet"
                ),
                Err(err) => warn!(
                    intent_id = %task.intent_id,
                    kpi = %task.kpi.name,
                    "Prometheus query failed: {err}"
                ),
            }
            tokio::time::sleep(Duration::from_secs(task.frequency)).await;
        }
        info!(
            intent_id = %task.intent_id,
            kpi = %task.kpi.name,
            "observation reporting loop exited"
        );
    }
}

struct ReportingTask {
    intent_id: String,
    kpi: KpiProfile,
    objective_name: String,
    condition_id: String,
    namespace: String,
    frequency: u64,
    unit: String,
    running: Arc<AtomicBool>,
}

/// IDO objective measured by a KPIProfile: the objective whose `measuredBy`
/// is `intend/<kpi>` or ends in `/<kpi>`.
fn map_kpi_to_objective(kpi_name: &str, ido_intent: Option<&Value>) -> Option<String> {
    let objectives = ido_intent?
        .pointer("/spec/objectives")
        .and_then(Value::as_array)?;
    for objective in objectives {
        let measured_by = objective
            .pointer("/measuredBy")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if measured_by == format!("intend/{kpi_name}")
            || measured_by.ends_with(&format!("/{kpi_name}"))
        {
            return objective
                .pointer("/name")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }
    None
}

fn clamp_frequency(requested: Option<u64>, default: u64) -> u64 {
    let frequency = requested.unwrap_or(default);
    if frequency < MIN_FREQUENCY_SECONDS {
        warn!(frequency, "reporting frequency too low, using minimum");
        MIN_FREQUENCY_SECONDS
    } else if frequency > MAX_FREQUENCY_SECONDS {
        warn!(frequency, "reporting frequency too high, using maximum");
        MAX_FREQUENCY_SECONDS
    } else {
        frequency
    }
}

/// Unit emitted in observations, honoring the parser's ms → s rewrite.
fn determine_unit(
    kpi_type: Option<KpiType>,
    objective: Option<&ObjectiveTarget>,
    declared_unit: Option<&str>,
) -> String {
    if let Some(objective) = objective {
        let unit = objective.unit.as_str();
        if unit == "ms" && (objective.value - objective.original_value / 1000.0).abs() < 0.001 {
            return "s".to_string();
        }
        match unit {
            "s" | "sec" | "seconds" => return "s".to_string(),
            "mbps" | "mb/s" => return "Mbps".to_string(),
            "" => {}
            other => return other.to_lowercase(),
        }
    }
    if let Some(unit) = declared_unit {
        let unit = unit.to_lowercase();
        return match unit.as_str() {
            "ms" | "s" | "sec" | "seconds" => "s".to_string(),
            "mbps" | "mb/s" => "Mbps".to_string(),
            other => other.to_string(),
        };
    }
    match kpi_type {
        Some(KpiType::Bandwidth) => "Mbps".to_string(),
        _ => "ms".to_string(),
    }
}

fn unix_to_datetime(timestamp: f64) -> Option<DateTime<Utc>> {
    let seconds = timestamp.trunc() as i64;
    let nanos = ((timestamp - timestamp.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(seconds, nanos)
}
