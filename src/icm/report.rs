use chrono::{DateTime, SecondsFormat, Utc};

use crate::icm::{HandlingState, new_observation_id, new_report_id, ns};

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An intent handling-state report, rendered as a single-statement Turtle
/// document with full IRIs so it can be inserted without prefix negotiation.
#[derive(Debug, Clone)]
pub struct IntentReport<'a> {
    pub intent_id: &'a str,
    pub report_number: i64,
    pub handler: &'a str,
    pub owner: &'a str,
    pub handling_state: HandlingState,
    pub reason: Option<&'a str>,
    pub generated_at: DateTime<Utc>,
}

impl IntentReport<'_> {
    pub fn to_turtle(&self) -> String {
        let report_id = new_report_id();
        let mut ttl = format!(
            "<{icm}{report_id}> a <{icm}IntentReport> ;",
            icm = ns::ICM,
            report_id = report_id,
        );
        ttl.push_str(&format!(
            " <{icm}about> <{data5g}I{intent}> ;",
            icm = ns::ICM,
            data5g = ns::DATA5G,
            intent = self.intent_id,
        ));
        ttl.push_str(&format!(
            " <{icm}reportNumber> \"{number}\"^^<{xsd}integer> ;",
            icm = ns::ICM,
            number = self.report_number,
            xsd = ns::XSD,
        ));
        ttl.push_str(&format!(
            " <{icm}reportGenerated> \"{at}\"^^<{xsd}dateTime>",
            icm = ns::ICM,
            at = timestamp(self.generated_at),
            xsd = ns::XSD,
        ));
        ttl.push_str(&format!(" ; <{imo}handler> \"{}\"", self.handler, imo = ns::IMO));
        ttl.push_str(&format!(" ; <{imo}owner> \"{}\"", self.owner, imo = ns::IMO));
        ttl.push_str(&format!(
            " ; <{icm}intentHandlingState> <{imo}{state}>",
            icm = ns::ICM,
            imo = ns::IMO,
            state = self.handling_state.as_str(),
        ));
        if let Some(reason) = self.reason {
            ttl.push_str(&format!(
                " ; <{icm}reason> \"{}\"",
                reason.replace('"', "\\\""),
                icm = ns::ICM,
            ));
        }
        ttl.push_str(" .");
        ttl
    }
}

/// A single KPI sample rendered as an ICM `met:Observation`.
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub objective_name: &'a str,
    pub condition_id: &'a str,
    pub value: f64,
    pub unit: &'a str,
    pub obtained_at: DateTime<Utc>,
}

impl Observation<'_> {
    /// The observed metric local name, `<objective>_<conditionId>`.
    pub fn metric_name(&self) -> String {
        format!("{}_{}", self.objective_name, self.condition_id)
    }

    pub fn to_turtle(&self) -> String {
        let observation_id = new_observation_id();
        format!(
            "@prefix met: <{met}> .\n\
             @prefix rdf: <{rdf}> .\n\
             @prefix quan: <{quan}> .\n\
             @prefix xsd: <{xsd}> .\n\
             @prefix data5g: <{data5g}> .\n\
             \n\
             data5g:{observation_id} a met:Observation ;\n\
             \x20   met:observedMetric data5g:{metric} ;\n\
             \x20   met:observedValue [ rdf:value {value:.3} ; quan:unit \"{unit}\" ] ;\n\
             \x20   met:obtainedAt \"{at}\"^^xsd:dateTime .",
            met = ns::MET,
            rdf = ns::RDF,
            quan = ns::QUAN,
            xsd = ns::XSD,
            data5g = ns::DATA5G,
            observation_id = observation_id,
            metric = self.metric_name(),
            value = self.value,
            unit = self.unit,
            at = timestamp(self.obtained_at),
        )
    }
}
