use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::icm::turtle::IntentGraph;
use crate::icm::{extract_intent_id, ns};

const TURTLE: &str = "application/x-turtle";
const SPARQL_QUERY: &str = "application/sparql-query";
const SPARQL_UPDATE: &str = "application/sparql-update";
const SPARQL_JSON: &str = "application/sparql-results+json";

/// The named graph reserved for KPI metric → query metadata.
pub const METADATA_GRAPH: &str = "http://intent-reports-metadata";

/// Client for the SPARQL triplestore holding intents, reports and observations.
pub struct GraphDbClient {
    http: reqwest::Client,
    base_url: String,
    repository: String,
    intents_dir: Option<PathBuf>,
}

impl GraphDbClient {
    pub fn from_config(config: &OrchestratorConfig) -> Option<Self> {
        let base_url = config.graphdb_url.clone()?;
        Some(Self::new(
            base_url,
            config.graphdb_repository.clone(),
            config.intents_dir.clone(),
            config.graph_timeout,
        ))
    }

    pub fn new(
        base_url: String,
        repository: String,
        intents_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            repository,
            intents_dir,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn statements_endpoint(&self) -> String {
        format!("{}/repositories/{}/statements", self.base_url, self.repository)
    }

    fn query_endpoint(&self) -> String {
        format!("{}/repositories/{}", self.base_url, self.repository)
    }

    async fn post(
        &self,
        url: String,
        content_type: &'static str,
        accept: Option<&'static str>,
        body: String,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        request
            .send()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))
    }

    /// Store an intent document and return the intent ID inferred from it.
    pub async fn store_intent(&self, ttl: &str) -> Result<Option<String>> {
        self.ensure_repository().await?;
        let response = self
            .post(self.statements_endpoint(), TURTLE, None, ttl.to_string())
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Graph(format!(
                "storing intent failed: HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let intent_id = extract_intent_id(ttl);
        if let (Some(id), Some(dir)) = (&intent_id, &self.intents_dir) {
            let path = dir.join(format!("{id}.ttl"));
            if let Err(err) = std::fs::write(&path, ttl) {
                warn!(path = %path.display(), "failed to mirror intent to file: {err}");
            }
        }
        Ok(intent_id)
    }

    /// Store an intent report or observation document.
    pub async fn store_intent_report(&self, ttl: &str) -> Result<bool> {
        self.ensure_repository().await?;

        let mut document = ttl.to_string();
        if !document.contains("@prefix imo:") && document.contains("imo:") {
            document = format!("@prefix imo: <{}> .\n{document}", ns::IMO);
        }

        let response = self
            .post(self.statements_endpoint(), TURTLE, None, document)
            .await?;
        if response.status() == StatusCode::NO_CONTENT || response.status().is_success() {
            debug!("stored intent report in GraphDB");
            Ok(true)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "failed to store intent report: HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            );
            Ok(false)
        }
    }

    /// Fetch everything reachable from an intent, re-serialized with the
    /// well-known prefixes bound.
    pub async fn get_intent(&self, intent_id: &str) -> Result<String> {
        let query = construct_intent_query(intent_id);
        let response = self
            .post(self.query_endpoint(), SPARQL_QUERY, Some("text/turtle"), query)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Graph(format!(
                "intent CONSTRUCT failed: HTTP {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))?;
        IntentGraph::parse(&body)?.to_turtle()
    }

    /// Latest report for an intent, ordered by generation time.
    pub async fn get_last_intent_report(&self, intent_id: &str) -> Result<String> {
        let query = last_report_query(intent_id);
        let response = self
            .post(self.query_endpoint(), SPARQL_QUERY, Some("text/turtle"), query)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Graph(format!(
                "last report CONSTRUCT failed: HTTP {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))?;
        IntentGraph::parse(&body)?.to_turtle()
    }

    /// Highest report number already allocated for an intent; 0 when none.
    pub async fn get_highest_report_number(&self, intent_id: &str) -> Result<i64> {
        let results = self.select(highest_report_number_query(intent_id)).await?;
        let value = results
            .pointer("/results/bindings/0/maxReportNum/value")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(value)
    }

    /// Fetch one report of an intent by its report number.
    pub async fn get_intent_report_by_number(
        &self,
        intent_id: &str,
        report_number: i64,
    ) -> Result<Option<String>> {
        let results = self
            .select(report_by_number_query(intent_id, report_number))
            .await?;
        let Some(binding) = results
            .pointer("/results/bindings/0")
            .filter(|binding| !binding.is_null())
            .cloned()
        else {
            return Ok(None);
        };

        let field = |name: &str| -> Option<String> {
            binding
                .pointer(&format!("/{name}/value"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let Some(report_uri) = field("report") else {
            return Ok(None);
        };
        let report_id = report_uri.rsplit('/').next().unwrap_or(&report_uri);

        let mut ttl = format!(
            "@prefix icm: <{icm}> .\n@prefix data5g: <{data5g}> .\n\
             @prefix rdf: <{rdf}> .\n@prefix xsd: <{xsd}> .\n@prefix imo: <{imo}> .\n\n",
            icm = ns::ICM,
            data5g = ns::DATA5G,
            rdf = ns::RDF,
            xsd = ns::XSD,
            imo = ns::IMO,
        );
        ttl.push_str(&format!("icm:{report_id} rdf:type icm:IntentReport ;\n"));
        ttl.push_str(&format!("    icm:about data5g:I{intent_id} ;\n"));
        if let Some(number) = field("number") {
            ttl.push_str(&format!("    icm:reportNumber \"{number}\"^^xsd:integer ;\n"));
        }
        if let Some(at) = field("timestamp") {
            ttl.push_str(&format!("    icm:reportGenerated \"{at}\"^^xsd:dateTime"));
        }
        if let Some(state) = field("state") {
            let state_name = state.rsplit('/').next().unwrap_or(&state);
            ttl.push_str(&format!(" ;\n    icm:intentHandlingState imo:{state_name}"));
        }
        if let Some(handler) = field("handler") {
            ttl.push_str(&format!(" ;\n    imo:handler \"{handler}\""));
        }
        if let Some(owner) = field("owner") {
            ttl.push_str(&format!(" ;\n    imo:owner \"{owner}\""));
        }
        if let Some(reason) = field("reason") {
            ttl.push_str(&format!(" ;\n    icm:reason \"{reason}\""));
        }
        ttl.push_str(" .");
        Ok(Some(ttl))
    }

    /// Run an arbitrary SPARQL SELECT and return the JSON result set.
    pub async fn query_intents(&self, sparql: &str) -> Result<Value> {
        self.select(sparql.to_string()).await
    }

    async fn select(&self, query: String) -> Result<Value> {
        let response = self
            .post(self.query_endpoint(), SPARQL_QUERY, Some(SPARQL_JSON), query)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Graph(format!(
                "SPARQL SELECT failed: HTTP {status}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))
    }

    async fn update(&self, update: String) -> Result<()> {
        let response = self
            .post(self.statements_endpoint(), SPARQL_UPDATE, None, update)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Graph(format!(
                "SPARQL UPDATE failed: HTTP {status}"
            )));
        }
        Ok(())
    }

    /// Remove every triple in the repository and any mirrored intent files.
    pub async fn delete_all_intents(&self) -> Result<()> {
        self.update("DELETE { ?s ?p ?o } WHERE { ?s ?p ?o }".to_string())
            .await?;
        if let Some(dir) = &self.intents_dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if entry.path().extension().is_some_and(|ext| ext == "ttl") {
                        let _ = std::fs::remove_file(entry.path());
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove one intent (everything reachable from it) and its mirrored file.
    pub async fn delete_intent(&self, intent_id: &str) -> Result<()> {
        if let Some(dir) = &self.intents_dir {
            let path = dir.join(format!("{intent_id}.ttl"));
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
        self.update(delete_intent_query(intent_id)).await
    }

    pub async fn repository_exists(&self) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/rest/repositories", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let repositories: Value = response
            .json()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))?;
        let found = repositories
            .as_array()
            .map(|entries| {
                entries.iter().any(|entry| {
                    entry.as_str() == Some(self.repository.as_str())
                        || entry.pointer("/id").and_then(Value::as_str)
                            == Some(self.repository.as_str())
                })
            })
            .unwrap_or(false);
        Ok(found)
    }

    pub async fn create_repository(&self) -> Result<()> {
        let config = json!({
            "id": self.repository,
            "type": "free",
            "title": format!("{} Repository", self.repository),
            "ruleset": "owl-horst-optimized",
        });
        let response = self
            .http
            .post(format!("{}/rest/repositories", self.base_url))
            .json(&config)
            .send()
            .await
            .map_err(|err| OrchestratorError::Graph(err.to_string()))?;
        if response.status() == StatusCode::CREATED || response.status().is_success() {
            info!(repository = %self.repository, "created GraphDB repository");
            Ok(())
        } else {
            Err(OrchestratorError::Graph(format!(
                "repository creation failed: HTTP {}",
                response.status()
            )))
        }
    }

    async fn ensure_repository(&self) -> Result<()> {
        if self.repository_exists().await? {
            return Ok(());
        }
        self.create_repository().await
    }

    /// The URL-encoded federated SELECT registered for a metric.
    pub fn metadata_query_url(&self, metric_name: &str) -> String {
        let query = federated_metric_query(&self.repository, metric_name);
        format!(
            "{}/repositories/{}?query={}",
            self.base_url,
            self.repository,
            urlencoding::encode(&query)
        )
    }

    /// Register the reusable observation query for a metric in the metadata
    /// graph. Inserting an identical triple twice is benign.
    pub async fn store_graphdb_metadata(&self, metric_name: &str) -> Result<()> {
        let query_url = self.metadata_query_url(metric_name);
        let insert = format!(
            "PREFIX data5g: <{data5g}>\n\n\
             INSERT DATA {{\n\
             \x20 GRAPH <{graph}> {{\n\
             \x20   <{data5g}{metric}>\n\
             \x20     data5g:hasQuery <{url}> .\n\
             \x20 }}\n\
             }}",
            data5g = ns::DATA5G,
            graph = METADATA_GRAPH,
            metric = metric_name,
            url = query_url,
        );
        self.update(insert).await
    }
}

fn sparql_prefixes() -> String {
    format!(
        "PREFIX rdf: <{rdf}>\nPREFIX data5g: <{data5g}>\nPREFIX icm: <{icm}>\n\
         PREFIX imo: <{imo}>\nPREFIX xsd: <{xsd}>\n",
        rdf = ns::RDF,
        data5g = ns::DATA5G,
        icm = ns::ICM,
        imo = ns::IMO,
        xsd = ns::XSD,
    )
}

/// CONSTRUCT of everything reachable from an intent via any predicate in
/// either direction, except typing edges.
fn construct_intent_query(intent_id: &str) -> String {
    format!(
        "{prefixes}\n\
         CONSTRUCT {{ ?s ?p ?o }}\n\
         WHERE {{\n\
         \x20 ?s ?p ?o .\n\
         \x20 <{data5g}I{intent_id}> (^!rdf:type|!rdf:type)* ?s .\n\
         }}",
        prefixes = sparql_prefixes(),
        data5g = ns::DATA5G,
    )
}

fn last_report_query(intent_id: &str) -> String {
    format!(
        "{prefixes}\n\
         CONSTRUCT {{\n\
         \x20 ?report rdf:type icm:IntentReport ;\n\
         \x20         icm:about data5g:I{intent_id} ;\n\
         \x20         icm:reportNumber ?number ;\n\
         \x20         icm:reportGenerated ?timestamp ;\n\
         \x20         icm:intentHandlingState ?state ;\n\
         \x20         icm:reason ?reason ;\n\
         \x20         imo:handler ?handler ;\n\
         \x20         imo:owner ?owner .\n\
         }}\n\
         WHERE {{\n\
         \x20 ?report rdf:type icm:IntentReport ;\n\
         \x20         icm:about data5g:I{intent_id} ;\n\
         \x20         icm:reportNumber ?number ;\n\
         \x20         icm:reportGenerated ?timestamp .\n\
         \x20 OPTIONAL {{ ?report icm:intentHandlingState ?state }}\n\
         \x20 OPTIONAL {{ ?report icm:reason ?reason }}\n\
         \x20 OPTIONAL {{ ?report imo:handler ?handler }}\n\
         \x20 OPTIONAL {{ ?report imo:owner ?owner }}\n\
         }}\n\
         ORDER BY DESC(?timestamp)\n\
         LIMIT 1",
        prefixes = sparql_prefixes(),
    )
}

fn highest_report_number_query(intent_id: &str) -> String {
    format!(
        "{prefixes}\n\
         SELECT (MAX(xsd:integer(?reportNum)) as ?maxReportNum)\n\
         WHERE {{\n\
         \x20 ?report rdf:type icm:IntentReport ;\n\
         \x20         icm:about data5g:I{intent_id} ;\n\
         \x20         icm:reportNumber ?reportNum .\n\
         }}",
        prefixes = sparql_prefixes(),
    )
}

fn report_by_number_query(intent_id: &str, report_number: i64) -> String {
    format!(
        "{prefixes}\n\
         SELECT ?report ?number ?timestamp ?state ?reason ?handler ?owner\n\
         WHERE {{\n\
         \x20 ?report rdf:type icm:IntentReport ;\n\
         \x20         icm:about data5g:I{intent_id} ;\n\
         \x20         icm:reportNumber ?number ;\n\
         \x20         icm:reportGenerated ?timestamp .\n\
         \x20 FILTER (?number = \"{report_number}\"^^xsd:integer)\n\
         \x20 OPTIONAL {{ ?report icm:intentHandlingState ?state }}\n\
         \x20 OPTIONAL {{ ?report icm:reason ?reason }}\n\
         \x20 OPTIONAL {{ ?report imo:handler ?handler }}\n\
         \x20 OPTIONAL {{ ?report imo:owner ?owner }}\n\
         }}\n\
         ORDER BY DESC(?timestamp)\n\
         LIMIT 1",
        prefixes = sparql_prefixes(),
    )
}

fn delete_intent_query(intent_id: &str) -> String {
    format!(
        "{prefixes}\n\
         DELETE {{ ?s ?p ?o }}\n\
         WHERE {{\n\
         \x20 ?s ?p ?o .\n\
         \x20 <{data5g}I{intent_id}> (^!rdf:type|!rdf:type)* ?s .\n\
         }}",
        prefixes = sparql_prefixes(),
        data5g = ns::DATA5G,
    )
}

/// Federated SELECT returning the time series of one metric, suitable for
/// registration in the metadata graph.
fn federated_metric_query(repository: &str, metric_name: &str) -> String {
    format!(
        "PREFIX met: <{met}>\n\
         PREFIX rdf: <{rdf}>\n\
         PREFIX data5g: <{data5g}>\n\
         PREFIX quan: <{quan}>\n\
         PREFIX xsd: <{xsd}>\n\n\
         SELECT ?unit ?value ?timestamp\n\
         WHERE {{\n\
         \x20 SERVICE <repository:{repository}> {{\n\
         \x20   BIND(IRI(CONCAT(\"{data5g}\", \"{metric_name}\")) AS ?metric)\n\n\
         \x20   ?observation a met:Observation ;\n\
         \x20       met:observedMetric ?metric ;\n\
         \x20       met:observedValue ?blankValue ;\n\
         \x20       met:obtainedAt ?timestamp .\n\n\
         \x20   ?blankValue rdf:value ?rawValue ;\n\
         \x20       quan:unit ?unit .\n\n\
         \x20   BIND(xsd:decimal(?rawValue) AS ?value)\n\
         \x20 }}\n\
         }}\n\
         ORDER BY ?timestamp",
        met = ns::MET,
        rdf = ns::RDF,
        data5g = ns::DATA5G,
        quan = ns::QUAN,
        xsd = ns::XSD,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_query_uses_property_path_traversal() {
        let query = construct_intent_query("3ad0057e78fd4445a12632770206fc0c");
        assert!(query.contains("(^!rdf:type|!rdf:type)*"));
        assert!(query.contains("I3ad0057e78fd4445a12632770206fc0c"));
    }

    #[test]
    fn report_number_query_takes_the_maximum() {
        let query = highest_report_number_query("abc");
        assert!(query.contains("MAX(xsd:integer(?reportNum))"));
        assert!(query.contains("icm:about data5g:Iabc"));
    }

    #[test]
    fn federated_query_targets_the_repository_service() {
        let query = federated_metric_query("intents", "p99-token-target_CO1");
        assert!(query.contains("SERVICE <repository:intents>"));
        assert!(query.contains("p99-token-target_CO1"));
        assert!(query.contains("ORDER BY ?timestamp"));
    }

    #[test]
    fn metadata_query_url_is_percent_encoded() {
        let client = GraphDbClient::new(
            "http://graphdb:7200".into(),
            "intents".into(),
            None,
            Duration::from_secs(5),
        );
        let url = client.metadata_query_url("p99-token-target_CO1");
        assert!(url.starts_with("http://graphdb:7200/repositories/intents?query="));
        assert!(!url.contains(' '));
        assert!(url.contains("SELECT%20%3Funit"));
    }

    #[test]
    fn last_report_query_orders_by_generation_time() {
        let query = last_report_query("abc");
        assert!(query.contains("ORDER BY DESC(?timestamp)"));
        assert!(query.contains("LIMIT 1"));
    }
}
