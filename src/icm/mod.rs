//! TM Forum Intent Common Model vocabulary and typed views over intent
//! documents expressed in Turtle.

pub mod report;
pub mod turtle;

use once_cell::sync::Lazy;
use regex::Regex;

/// Namespace IRIs bound in every intent document this system produces or consumes.
pub mod ns {
    pub const DATA5G: &str = "http://5g4data.eu/5g4data#";
    pub const ICM: &str = "http://tio.models.tmforum.org/tio/v3.6.0/IntentCommonModel/";
    pub const IMO: &str = "http://tio.models.tmforum.org/tio/v3.6.0/IntentManagementOntology/";
    pub const LOG: &str = "http://tio.models.tmforum.org/tio/v3.6.0/LogicalOperators/";
    pub const SET: &str = "http://tio.models.tmforum.org/tio/v3.6.0/SetOperators/";
    pub const QUAN: &str = "http://tio.models.tmforum.org/tio/v3.6.0/QuantityOntology/";
    pub const MET: &str = "http://tio.models.tmforum.org/tio/v3.6.0/MetricsAndObservations/";
    pub const DCT: &str = "http://purl.org/dc/terms/";
    pub const GEO: &str = "http://www.opengis.net/ont/geosparql#";
    pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
}

/// Kind of an ICM Expectation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectationKind {
    Network,
    Deployment,
    Reporting,
}

/// A located expectation: its `data5g:` local identifier plus its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationRef {
    pub id: String,
    pub kind: ExpectationKind,
}

/// Expectations discovered in a single intent document.
#[derive(Debug, Clone, Default)]
pub struct Expectations {
    pub network: Option<ExpectationRef>,
    pub deployment: Option<ExpectationRef>,
    pub reporting: Vec<ExpectationRef>,
}

impl Expectations {
    pub fn has_network(&self) -> bool {
        self.network.is_some()
    }

    pub fn has_deployment(&self) -> bool {
        self.deployment.is_some()
    }
}

/// Quantified constraint operator attached to a Condition's `set:forAll` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Smaller,
    Larger,
    AtLeast,
    AtMost,
    Greater,
    InRange,
    Mean,
    Median,
}

impl ConstraintOp {
    pub const ALL: [ConstraintOp; 8] = [
        ConstraintOp::Smaller,
        ConstraintOp::Larger,
        ConstraintOp::AtLeast,
        ConstraintOp::AtMost,
        ConstraintOp::Greater,
        ConstraintOp::InRange,
        ConstraintOp::Mean,
        ConstraintOp::Median,
    ];

    pub fn local_name(&self) -> &'static str {
        match self {
            ConstraintOp::Smaller => "smaller",
            ConstraintOp::Larger => "larger",
            ConstraintOp::AtLeast => "atLeast",
            ConstraintOp::AtMost => "atMost",
            ConstraintOp::Greater => "greater",
            ConstraintOp::InRange => "inRange",
            ConstraintOp::Mean => "mean",
            ConstraintOp::Median => "median",
        }
    }

    pub fn iri(&self) -> String {
        format!("{}{}", ns::QUAN, self.local_name())
    }

    pub fn from_iri(iri: &str) -> Option<Self> {
        let local = iri.strip_prefix(ns::QUAN)?;
        Self::ALL.iter().copied().find(|op| op.local_name() == local)
    }
}

/// Objective target parsed from a Condition, after unit normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveTarget {
    /// Value after conversion (ms targets are rewritten to seconds).
    pub value: f64,
    /// Declared unit, lowercased, kept for provenance.
    pub unit: String,
    /// Value exactly as declared in the intent.
    pub original_value: f64,
    pub operator: ConstraintOp,
}

/// Deployment context extracted from a DeploymentExpectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub chart_url: String,
    pub application: String,
    pub has_deployment_expectation: bool,
}

/// Intent handling states reported through IntentReports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlingState {
    Received,
    Accepted,
    Compliant,
    NonCompliant,
    Rejected,
}

impl HandlingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlingState::Received => "StateIntentReceived",
            HandlingState::Accepted => "StateIntentAccepted",
            HandlingState::Compliant => "StateCompliant",
            HandlingState::NonCompliant => "StateNonCompliant",
            HandlingState::Rejected => "StateIntentRejected",
        }
    }
}

static INTENT_ID_PREFIXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"data5g:I([0-9a-f][0-9a-f-]{7,})").expect("valid regex"));
static INTENT_ID_FULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"5g4data#I([0-9a-f][0-9a-f-]{7,})").expect("valid regex"));

/// Extract the local intent identifier (the hex suffix of `data5g:I<hex>`)
/// from a Turtle document without fully parsing it.
pub fn extract_intent_id(ttl: &str) -> Option<String> {
    INTENT_ID_PREFIXED
        .captures(ttl)
        .or_else(|| INTENT_ID_FULL.captures(ttl))
        .map(|captures| captures[1].to_string())
}

/// New observation identifier: `OB` + 16 hex characters.
pub fn new_observation_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("OB{}", &hex[..16])
}

/// New report identifier: `RP` + uuid.
pub fn new_report_id() -> String {
    format!("RP{}", uuid::Uuid::new_v4())
}

/// Local name of a `data5g:` IRI (everything after the hash).
pub fn local_name(iri: &str) -> Option<&str> {
    if let Some(rest) = iri.strip_prefix(ns::DATA5G) {
        return Some(rest);
    }
    if let Some(idx) = iri.rfind('#') {
        return Some(&iri[idx + 1..]);
    }
    iri.rsplit('/').next()
}
