use indexmap::IndexMap;
use oxrdf::{Graph, NamedNode, NamedNodeRef, Subject, SubjectRef, Term, TermRef, TripleRef};
use oxttl::{TurtleParser, TurtleSerializer};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::icm::{
    ConstraintOp, DeploymentInfo, ExpectationKind, ExpectationRef, Expectations, ObjectiveTarget,
    local_name, ns,
};

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const RDF_VALUE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#value";
const RDF_FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";
const RDF_REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";
const RDF_NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";

fn iri(value: &str) -> NamedNodeRef<'_> {
    NamedNodeRef::new_unchecked(value)
}

fn as_subject(term: TermRef<'_>) -> Option<SubjectRef<'_>> {
    match term {
        TermRef::NamedNode(node) => Some(node.into()),
        TermRef::BlankNode(node) => Some(node.into()),
        _ => None,
    }
}

fn term_text(term: TermRef<'_>) -> String {
    match term {
        TermRef::NamedNode(node) => node.as_str().to_string(),
        TermRef::Literal(literal) => literal.value().to_string(),
        TermRef::BlankNode(node) => node.as_str().to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

/// A parsed, navigable view over one intent document.
pub struct IntentGraph {
    graph: Graph,
}

impl IntentGraph {
    pub fn parse(ttl: &str) -> Result<Self> {
        let mut graph = Graph::new();
        for triple in TurtleParser::new().for_reader(ttl.as_bytes()) {
            let triple = triple.map_err(|err| OrchestratorError::Parse(err.to_string()))?;
            graph.insert(&triple);
        }
        Ok(Self { graph })
    }

    /// Serialize the graph back to Turtle with the well-known prefixes bound.
    pub fn to_turtle(&self) -> Result<String> {
        serialize_graph(&self.graph)
    }

    fn data5g(&self, id: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("{}{}", ns::DATA5G, id))
    }

    fn has_type(&self, subject: SubjectRef<'_>, class: &str) -> bool {
        self.graph
            .contains(TripleRef::new(subject, iri(RDF_TYPE), iri(class)))
    }

    fn subjects_of_type(&self, class: &str) -> Vec<Subject> {
        self.graph
            .subjects_for_predicate_object(iri(RDF_TYPE), iri(class))
            .map(|subject| subject.into_owned())
            .collect()
    }

    fn first_object(&self, subject: SubjectRef<'_>, predicate: &str) -> Option<Term> {
        self.graph
            .objects_for_subject_predicate(subject, iri(predicate))
            .next()
            .map(|term| term.into_owned())
    }

    /// The `icm:Intent` subject of this document, if any.
    pub fn intent_subject(&self) -> Option<NamedNode> {
        let class = format!("{}Intent", ns::ICM);
        self.subjects_of_type(&class)
            .into_iter()
            .find_map(|subject| match subject {
                Subject::NamedNode(node) if node.as_str().starts_with(ns::DATA5G) => Some(node),
                _ => None,
            })
    }

    /// Local intent identifier (hex suffix of `data5g:I<hex>`).
    pub fn intent_id(&self) -> Option<String> {
        let subject = self.intent_subject()?;
        local_name(subject.as_str())
            .and_then(|name| name.strip_prefix('I'))
            .map(str::to_string)
    }

    /// Locate the network, deployment and reporting expectations of the intent.
    ///
    /// Detection prefers explicit `data5g:NetworkExpectation` /
    /// `data5g:DeploymentExpectation` types; legacy documents typed only
    /// `icm:DeliveryExpectation` are classified by their `icm:target`.
    pub fn find_all_expectations(&self) -> Expectations {
        let mut result = Expectations::default();

        let reporting_class = format!("{}ReportingExpectation", ns::ICM);
        for subject in self.subjects_of_type(&reporting_class) {
            if let Some(reference) = expectation_ref(&subject, ExpectationKind::Reporting) {
                result.reporting.push(reference);
            }
        }

        let network_class = format!("{}NetworkExpectation", ns::DATA5G);
        result.network = self
            .subjects_of_type(&network_class)
            .into_iter()
            .find_map(|subject| expectation_ref(&subject, ExpectationKind::Network));

        let deployment_class = format!("{}DeploymentExpectation", ns::DATA5G);
        result.deployment = self
            .subjects_of_type(&deployment_class)
            .into_iter()
            .find_map(|subject| expectation_ref(&subject, ExpectationKind::Deployment));

        if result.network.is_some() && result.deployment.is_some() {
            return result;
        }

        // Fallback for documents that only carry the generic expectation types.
        let target_predicate = format!("{}target", ns::ICM);
        let network_target = format!("{}network-slice", ns::DATA5G);
        let deployment_target = format!("{}deployment", ns::DATA5G);
        for class in [
            format!("{}DeliveryExpectation", ns::ICM),
            format!("{}Expectation", ns::ICM),
        ] {
            for subject in self.subjects_of_type(&class) {
                if self.has_type(subject.as_ref(), &reporting_class) {
                    continue;
                }
                let Some(target) = self.first_object(subject.as_ref(), &target_predicate) else {
                    continue;
                };
                let target = term_text(target.as_ref());
                if target == network_target && result.network.is_none() {
                    result.network = expectation_ref(&subject, ExpectationKind::Network);
                } else if target == deployment_target && result.deployment.is_none() {
                    result.deployment = expectation_ref(&subject, ExpectationKind::Deployment);
                }
            }
        }

        result
    }

    /// Extract chart URL and application name from the DeploymentExpectation's
    /// Context, if the document carries one.
    pub fn find_deployment_info(&self) -> Option<DeploymentInfo> {
        let expectations = self.find_all_expectations();
        let deployment = expectations.deployment?;
        let subject = self.data5g(&deployment.id);

        let allof = format!("{}allOf", ns::LOG);
        let context_class = format!("{}Context", ns::ICM);
        let descriptor_predicate = format!("{}DeploymentDescriptor", ns::DATA5G);
        let application_predicate = format!("{}Application", ns::DATA5G);

        for member in self
            .graph
            .objects_for_subject_predicate(&subject, iri(&allof))
        {
            let Some(candidate) = as_subject(member) else {
                continue;
            };
            if !self.has_type(candidate, &context_class) {
                continue;
            }
            let Some(descriptor) = self.first_object(candidate, &descriptor_predicate) else {
                continue;
            };
            let Some(application) = self.first_object(candidate, &application_predicate) else {
                warn!("deployment Context found but no Application name");
                return None;
            };
            return Some(DeploymentInfo {
                chart_url: term_text(descriptor.as_ref()),
                application: term_text(application.as_ref()),
                has_deployment_expectation: true,
            });
        }

        warn!("DeploymentExpectation found but no Context with a DeploymentDescriptor");
        None
    }

    /// The `data5g:DataCenter` value from the DeploymentExpectation's Context.
    pub fn datacenter(&self) -> Option<String> {
        let expectations = self.find_all_expectations();
        let deployment = expectations.deployment?;
        let subject = self.data5g(&deployment.id);

        let allof = format!("{}allOf", ns::LOG);
        let datacenter_predicate = format!("{}DataCenter", ns::DATA5G);
        for member in self
            .graph
            .objects_for_subject_predicate(&subject, iri(&allof))
        {
            let Some(candidate) = as_subject(member) else {
                continue;
            };
            if let Some(value) = self.first_object(candidate, &datacenter_predicate) {
                return Some(term_text(value.as_ref()));
            }
        }
        None
    }

    /// Objective targets declared on the DeploymentExpectation's Conditions,
    /// keyed by objective name. Millisecond targets are converted to seconds;
    /// the declared value and unit are kept for provenance.
    pub fn deployment_objectives(&self) -> Result<IndexMap<String, ObjectiveTarget>> {
        let mut objectives = IndexMap::new();
        let expectations = self.find_all_expectations();
        let Some(deployment) = expectations.deployment else {
            return Ok(objectives);
        };
        let subject = self.data5g(&deployment.id);

        let allof = format!("{}allOf", ns::LOG);
        let condition_class = format!("{}Condition", ns::ICM);
        let forall_predicate = format!("{}forAll", ns::SET);
        let target_predicate = format!("{}valuesOfTargetProperty", ns::ICM);

        for member in self
            .graph
            .objects_for_subject_predicate(&subject, iri(&allof))
        {
            let Some(condition) = as_subject(member) else {
                continue;
            };
            if !self.has_type(condition, &condition_class) {
                continue;
            }
            let condition_id = match condition {
                SubjectRef::NamedNode(node) => local_name(node.as_str()).map(str::to_string),
                _ => None,
            };

            for forall in self
                .graph
                .objects_for_subject_predicate(condition, iri(&forall_predicate))
                .collect::<Vec<_>>()
            {
                let Some(forall) = as_subject(forall) else {
                    continue;
                };
                let Some(target) = self.first_object(forall, &target_predicate) else {
                    continue;
                };
                let Some(name) =
                    objective_name(&term_text(target.as_ref()), condition_id.as_deref())
                else {
                    warn!(property = %term_text(target.as_ref()), "could not extract objective name");
                    continue;
                };

                let Some(constraint) = self.parse_constraint(forall)? else {
                    continue;
                };
                let (operator, declared_value, declared_unit) = constraint;
                let unit = declared_unit.unwrap_or_default().to_lowercase();
                let value = match unit.as_str() {
                    "ms" => declared_value / 1000.0,
                    "s" | "sec" | "seconds" => declared_value,
                    _ => {
                        if !matches!(unit.as_str(), "mbps" | "mb/s" | "mbit/s") {
                            warn!(objective = %name, unit = %unit, "unknown unit, keeping declared value");
                        }
                        declared_value
                    }
                };

                debug!(
                    objective = %name,
                    declared = declared_value,
                    unit = %unit,
                    converted = value,
                    "extracted deployment objective"
                );
                objectives.insert(
                    name,
                    ObjectiveTarget {
                        value,
                        unit,
                        original_value: declared_value,
                        operator,
                    },
                );
            }
        }

        Ok(objectives)
    }

    /// Parse the single quantified constraint of a `set:forAll` node.
    ///
    /// A node carrying both `quan:inRange` and a simple operator is rejected:
    /// the emitted observation metric would be ambiguous.
    fn parse_constraint(
        &self,
        forall: SubjectRef<'_>,
    ) -> Result<Option<(ConstraintOp, f64, Option<String>)>> {
        let mut found: Vec<(ConstraintOp, Term)> = Vec::new();
        for op in ConstraintOp::ALL {
            if let Some(object) = self.first_object(forall, &op.iri()) {
                found.push((op, object));
            }
        }

        let has_range = found.iter().any(|(op, _)| *op == ConstraintOp::InRange);
        if has_range && found.len() > 1 {
            return Err(OrchestratorError::Parse(
                "Condition mixes inRange with a simple constraint operator".into(),
            ));
        }

        let Some((op, object)) = found.into_iter().next() else {
            return Ok(None);
        };

        if op == ConstraintOp::InRange {
            let Some(head) = as_subject(object.as_ref()) else {
                return Err(OrchestratorError::Parse(
                    "inRange constraint is not a collection".into(),
                ));
            };
            let items = self.collect_list(head);
            let mut bounds = Vec::new();
            for item in &items {
                if let Some(node) = as_subject(item.as_ref()) {
                    if let Some(value) = self.value_of(node) {
                        bounds.push((value, self.unit_of(node)));
                    }
                }
            }
            if bounds.len() < 2 {
                return Err(OrchestratorError::Parse(
                    "inRange constraint requires two value bounds".into(),
                ));
            }
            let (lower, unit) = bounds.swap_remove(0);
            return Ok(Some((op, lower, unit)));
        }

        let Some(value_node) = as_subject(object.as_ref()) else {
            return Ok(None);
        };
        let Some(value) = self.value_of(value_node) else {
            return Ok(None);
        };
        Ok(Some((op, value, self.unit_of(value_node))))
    }

    fn value_of(&self, node: SubjectRef<'_>) -> Option<f64> {
        self.first_object(node, RDF_VALUE)
            .and_then(|term| term_text(term.as_ref()).parse::<f64>().ok())
    }

    fn unit_of(&self, node: SubjectRef<'_>) -> Option<String> {
        let unit_predicate = format!("{}unit", ns::QUAN);
        self.first_object(node, &unit_predicate)
            .map(|term| term_text(term.as_ref()))
    }

    fn collect_list(&self, head: SubjectRef<'_>) -> Vec<Term> {
        let mut items = Vec::new();
        let mut current = Some(head.into_owned());
        let mut hops = 0;
        while let Some(node) = current.take() {
            hops += 1;
            if hops > 64 {
                break;
            }
            if let Subject::NamedNode(named) = &node {
                if named.as_str() == RDF_NIL {
                    break;
                }
            }
            if let Some(first) = self.first_object(node.as_ref(), RDF_FIRST) {
                items.push(first);
            }
            current = self
                .first_object(node.as_ref(), RDF_REST)
                .and_then(|term| as_subject(term.as_ref()).map(|s| s.into_owned()));
        }
        items
    }

    /// First Condition whose target property IRI contains the objective name.
    pub fn condition_for_objective(&self, objective: &str) -> Option<String> {
        let condition_class = format!("{}Condition", ns::ICM);
        let forall_predicate = format!("{}forAll", ns::SET);
        let target_predicate = format!("{}valuesOfTargetProperty", ns::ICM);

        for condition in self.subjects_of_type(&condition_class) {
            let Subject::NamedNode(node) = &condition else {
                continue;
            };
            if !node.as_str().starts_with(ns::DATA5G) {
                continue;
            }
            for forall in self
                .graph
                .objects_for_subject_predicate(node, iri(&forall_predicate))
                .collect::<Vec<_>>()
            {
                let Some(forall) = as_subject(forall) else {
                    continue;
                };
                for target in self
                    .graph
                    .objects_for_subject_predicate(forall, iri(&target_predicate))
                {
                    if term_text(target).contains(objective) {
                        return local_name(node.as_str()).map(str::to_string);
                    }
                }
            }
        }
        None
    }

    /// Objective name declared by a Condition's target property.
    pub fn objective_name_of_condition(&self, condition_id: &str) -> Option<String> {
        let subject = self.data5g(condition_id);
        let forall_predicate = format!("{}forAll", ns::SET);
        let target_predicate = format!("{}valuesOfTargetProperty", ns::ICM);

        for forall in self
            .graph
            .objects_for_subject_predicate(&subject, iri(&forall_predicate))
            .collect::<Vec<_>>()
        {
            let forall = as_subject(forall)?;
            if let Some(target) = self.first_object(forall, &target_predicate) {
                return objective_name(&term_text(target.as_ref()), Some(condition_id));
            }
        }
        None
    }

    /// Unit literal declared on a Condition's constraint value node.
    pub fn declared_unit_of_condition(&self, condition_id: &str) -> Option<String> {
        let subject = self.data5g(condition_id);
        let forall_predicate = format!("{}forAll", ns::SET);

        for forall in self
            .graph
            .objects_for_subject_predicate(&subject, iri(&forall_predicate))
            .collect::<Vec<_>>()
        {
            let forall = as_subject(forall)?;
            for op in ConstraintOp::ALL {
                let Some(object) = self.first_object(forall, &op.iri()) else {
                    continue;
                };
                let node = if op == ConstraintOp::InRange {
                    let head = as_subject(object.as_ref())?.into_owned();
                    let items = self.collect_list(head.as_ref());
                    items
                        .first()
                        .and_then(|item| as_subject(item.as_ref()).map(|s| s.into_owned()))?
                } else {
                    as_subject(object.as_ref())?.into_owned()
                };
                if let Some(unit) = self.unit_of(node.as_ref()) {
                    return Some(unit.to_lowercase());
                }
            }
        }
        None
    }

    /// Split a combined intent into a network-only and a deployment-only
    /// document. Both halves keep the original Intent IRI and metadata; the
    /// expectations are partitioned, reporting expectations are carried into
    /// both halves.
    pub fn split_combined_intent(&self) -> Result<(String, String)> {
        let expectations = self.find_all_expectations();
        let network = expectations
            .network
            .clone()
            .ok_or_else(|| OrchestratorError::Split("no NetworkExpectation in intent".into()))?;
        let deployment = expectations
            .deployment
            .clone()
            .ok_or_else(|| OrchestratorError::Split("no DeploymentExpectation in intent".into()))?;
        let intent = self
            .intent_subject()
            .ok_or_else(|| OrchestratorError::Split("no icm:Intent subject in document".into()))?;

        let ne = self.branch_graph(&intent, &network.id, &deployment.id, &expectations.reporting)?;
        let de = self.branch_graph(&intent, &deployment.id, &network.id, &expectations.reporting)?;
        Ok((ne, de))
    }

    fn branch_graph(
        &self,
        intent: &NamedNode,
        keep_id: &str,
        drop_id: &str,
        reporting: &[ExpectationRef],
    ) -> Result<String> {
        let mut branch = Graph::new();
        let allof = NamedNode::new_unchecked(format!("{}allOf", ns::LOG));
        let dropped = self.data5g(drop_id);

        for triple in self.graph.triples_for_subject(intent) {
            if triple.predicate == allof.as_ref() && triple.object == dropped.as_ref().into() {
                continue;
            }
            branch.insert(triple);
        }

        let mut queue: Vec<Subject> = vec![self.data5g(keep_id).into()];
        for reference in reporting {
            queue.push(self.data5g(&reference.id).into());
        }
        let mut visited: Vec<Subject> = Vec::new();

        while let Some(node) = queue.pop() {
            if visited.contains(&node) {
                continue;
            }
            visited.push(node.clone());
            for triple in self.graph.triples_for_subject(node.as_ref()) {
                branch.insert(triple);
                match triple.object {
                    TermRef::BlankNode(blank) => queue.push(blank.into_owned().into()),
                    TermRef::NamedNode(named)
                        if named.as_str().starts_with(ns::DATA5G)
                            && named != intent.as_ref() =>
                    {
                        queue.push(named.into_owned().into());
                    }
                    _ => {}
                }
            }
        }

        serialize_graph(&branch)
    }
}

fn expectation_ref(subject: &Subject, kind: ExpectationKind) -> Option<ExpectationRef> {
    subject_local_id(subject).map(|id| ExpectationRef { id, kind })
}

fn subject_local_id(subject: &Subject) -> Option<String> {
    match subject {
        Subject::NamedNode(node) => local_name(node.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Objective name from a target property IRI: the local name with any
/// trailing `_<conditionId>` marker removed so the derived observation metric
/// stays `data5g:<objective>_<conditionId>`.
fn objective_name(target_property: &str, condition_id: Option<&str>) -> Option<String> {
    let name = local_name(target_property)?;
    if let Some(condition_id) = condition_id {
        if let Some(stripped) = name.strip_suffix(&format!("_{condition_id}")) {
            return Some(stripped.to_string());
        }
    }
    Some(name.to_string())
}

fn serialize_graph(graph: &Graph) -> Result<String> {
    let mut serializer = TurtleSerializer::new();
    for (prefix, namespace) in [
        ("data5g", ns::DATA5G),
        ("icm", ns::ICM),
        ("imo", ns::IMO),
        ("log", ns::LOG),
        ("set", ns::SET),
        ("quan", ns::QUAN),
        ("met", ns::MET),
        ("dct", ns::DCT),
        ("geo", ns::GEO),
        ("rdf", ns::RDF),
        ("xsd", ns::XSD),
    ] {
        serializer = serializer
            .with_prefix(prefix, namespace)
            .map_err(|err| OrchestratorError::Parse(err.to_string()))?;
    }

    let mut writer = serializer.for_writer(Vec::new());
    for triple in graph.iter() {
        writer
            .serialize_triple(triple)
            .map_err(OrchestratorError::Io)?;
    }
    let bytes = writer.finish().map_err(OrchestratorError::Io)?;
    String::from_utf8(bytes).map_err(|err| OrchestratorError::Parse(err.to_string()))
}
