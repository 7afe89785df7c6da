use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::graph::GraphDbClient;
use crate::icm::ns;

/// Resolves DataCenter identifiers to downstream handler URLs through the
/// knowledge graph. There is no in-memory fallback: an unreachable graph is
/// surfaced to the caller as a `Graph` error.
pub struct InfrastructureResolver {
    graphdb: Arc<GraphDbClient>,
}

impl InfrastructureResolver {
    pub fn new(graphdb: Arc<GraphDbClient>) -> Self {
        Self { graphdb }
    }

    /// Base URL of the inOrch handler responsible for a DataCenter.
    pub async fn datacenter_url(&self, datacenter: &str) -> Result<String> {
        let query = datacenter_url_query(datacenter);
        let results = self.graphdb.query_intents(&query).await?;
        let url = results
            .pointer("/results/bindings/0/url/value")
            .and_then(Value::as_str)
            .map(str::to_string);
        match url {
            Some(url) => {
                debug!(datacenter, url = %url, "resolved DataCenter handler URL");
                Ok(url)
            }
            None => Err(OrchestratorError::DatacenterNotFound(
                datacenter.to_string(),
            )),
        }
    }
}

fn datacenter_url_query(datacenter: &str) -> String {
    format!(
        "PREFIX data5g: <{data5g}>\n\n\
         SELECT ?url\n\
         WHERE {{\n\
         \x20 ?dc a data5g:DataCenter ;\n\
         \x20     data5g:name \"{datacenter}\" ;\n\
         \x20     data5g:inOrchUrl ?url .\n\
         }}\n\
         LIMIT 1",
        data5g = ns::DATA5G,
    )
}
