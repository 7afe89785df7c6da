use data5g_orchestrator::icm::turtle::IntentGraph;

const COMBINED_INTENT: &str = r#"
@prefix data5g: <http://5g4data.eu/5g4data#> .
@prefix dct: <http://purl.org/dc/terms/> .
@prefix geo: <http://www.opengis.net/ont/geosparql#> .
@prefix icm: <http://tio.models.tmforum.org/tio/v3.6.0/IntentCommonModel/> .
@prefix imo: <http://tio.models.tmforum.org/tio/v3.6.0/IntentManagementOntology/> .
@prefix log: <http://tio.models.tmforum.org/tio/v3.6.0/LogicalOperators/> .
@prefix quan: <http://tio.models.tmforum.org/tio/v3.6.0/QuantityOntology/> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix set: <http://tio.models.tmforum.org/tio/v3.6.0/SetOperators/> .

data5g:Iaa11bb22cc33dd44ee55ff6677889900 a icm:Intent, icm:IntentElement ;
    dct:description "Deploy hello to the edge and set up a network slice" ;
    imo:handler "inOrch" ;
    imo:owner "inServ" ;
    log:allOf data5g:DE1111111111111111aaaaaaaaaaaaaaaa,
        data5g:NE2222222222222222bbbbbbbbbbbbbbbb,
        data5g:RE3333333333333333cccccccccccccccc .

data5g:DE1111111111111111aaaaaaaaaaaaaaaa a data5g:DeploymentExpectation,
        icm:Expectation, icm:IntentElement ;
    dct:description "Deploy hello to Edge Data Center" ;
    icm:target data5g:deployment ;
    log:allOf data5g:CO4444444444444444dddddddddddddddd,
        data5g:CX5555555555555555eeeeeeeeeeeeeeee .

data5g:CO4444444444444444dddddddddddddddd a icm:Condition ;
    dct:description "Compute latency condition quan:smaller: 1000ms" ;
    set:forAll [ icm:valuesOfTargetProperty data5g:computelatency_CO4444444444444444dddddddddddddddd ;
            quan:smaller [ quan:unit "ms" ; rdf:value 1000.0 ] ] .

data5g:CX5555555555555555eeeeeeeeeeeeeeee a icm:Context, icm:IntentElement ;
    data5g:Application "hello" ;
    data5g:DataCenter "EC21" ;
    data5g:DeploymentDescriptor "http://charts.example/hello-0.1.0.tgz" .

data5g:NE2222222222222222bbbbbbbbbbbbbbbb a data5g:NetworkExpectation,
        icm:Expectation, icm:IntentElement ;
    dct:description "Ensure QoS guarantees for the hello network slice" ;
    icm:target data5g:network-slice ;
    log:allOf data5g:CO6666666666666666ffffffffffffffff,
        data5g:CO7777777777777777aaaaaaaaaaaaaaaa,
        data5g:CX8888888888888888bbbbbbbbbbbbbbbb .

data5g:CO6666666666666666ffffffffffffffff a icm:Condition ;
    dct:description "Bandwidth condition quan:larger: 300mbit/s" ;
    set:forAll [ icm:valuesOfTargetProperty data5g:bandwidth_CO6666666666666666ffffffffffffffff ;
            quan:larger [ quan:unit "mbit/s" ; rdf:value 300.0 ] ] .

data5g:CO7777777777777777aaaaaaaaaaaaaaaa a icm:Condition ;
    dct:description "Latency condition quan:smaller: 50ms" ;
    set:forAll [ icm:valuesOfTargetProperty data5g:networklatency_CO7777777777777777aaaaaaaaaaaaaaaa ;
            quan:smaller [ quan:unit "ms" ; rdf:value 50.0 ] ] .

data5g:CX8888888888888888bbbbbbbbbbbbbbbb a icm:Context, icm:IntentElement ;
    data5g:appliesToCustomer "+47 90914547" ;
    data5g:appliesToRegion data5g:RG9999999999999999cccccccccccccccc .

data5g:RG9999999999999999cccccccccccccccc a geo:Feature ;
    geo:hasGeometry [ a geo:Polygon ;
            geo:asWKT "POLYGON((69.6613 18.9332, 69.6613 18.9782, 69.6163 18.9782, 69.6163 18.9332))"^^geo:wktLiteral ] .

data5g:RE3333333333333333cccccccccccccccc a icm:Expectation,
        icm:IntentElement, icm:ReportingExpectation ;
    dct:description "Report if expectation is met." ;
    icm:target data5g:deployment .
"#;

#[test]
fn combined_intent_is_classified_as_both() {
    let graph = IntentGraph::parse(COMBINED_INTENT).expect("combined intent parses");
    let expectations = graph.find_all_expectations();
    assert!(expectations.has_network());
    assert!(expectations.has_deployment());
    assert_eq!(expectations.reporting.len(), 1);
}

#[test]
fn split_partitions_the_expectations() {
    let graph = IntentGraph::parse(COMBINED_INTENT).expect("combined intent parses");
    let (ne_ttl, de_ttl) = graph.split_combined_intent().expect("split succeeds");

    let ne = IntentGraph::parse(&ne_ttl).expect("network half parses");
    let de = IntentGraph::parse(&de_ttl).expect("deployment half parses");

    let ne_expectations = ne.find_all_expectations();
    assert!(ne_expectations.has_network());
    assert!(!ne_expectations.has_deployment());

    let de_expectations = de.find_all_expectations();
    assert!(de_expectations.has_deployment());
    assert!(!de_expectations.has_network());

    // Reporting expectations ride along in both halves.
    assert_eq!(ne_expectations.reporting.len(), 1);
    assert_eq!(de_expectations.reporting.len(), 1);
}

#[test]
fn both_halves_keep_the_original_intent_iri() {
    let graph = IntentGraph::parse(COMBINED_INTENT).expect("combined intent parses");
    let original_id = graph.intent_id().expect("intent id");
    let (ne_ttl, de_ttl) = graph.split_combined_intent().expect("split succeeds");

    let ne = IntentGraph::parse(&ne_ttl).expect("network half parses");
    let de = IntentGraph::parse(&de_ttl).expect("deployment half parses");
    assert_eq!(ne.intent_id().as_deref(), Some(original_id.as_str()));
    assert_eq!(de.intent_id().as_deref(), Some(original_id.as_str()));
}

#[test]
fn conditions_and_contexts_follow_their_expectation() {
    let graph = IntentGraph::parse(COMBINED_INTENT).expect("combined intent parses");
    let (ne_ttl, de_ttl) = graph.split_combined_intent().expect("split succeeds");

    // Deployment half: compute latency condition and the deployment context.
    assert!(de_ttl.contains("CO4444444444444444dddddddddddddddd"));
    assert!(de_ttl.contains("DeploymentDescriptor"));
    assert!(!de_ttl.contains("CO6666666666666666ffffffffffffffff"));
    assert!(!de_ttl.contains("appliesToCustomer"));

    // Network half: bandwidth and latency conditions, region geometry.
    assert!(ne_ttl.contains("CO6666666666666666ffffffffffffffff"));
    assert!(ne_ttl.contains("CO7777777777777777aaaaaaaaaaaaaaaa"));
    assert!(ne_ttl.contains("appliesToCustomer"));
    assert!(ne_ttl.contains("POLYGON"));
    assert!(!ne_ttl.contains("CO4444444444444444dddddddddddddddd"));
    assert!(!ne_ttl.contains("DeploymentDescriptor"));

    // Intent metadata survives in both halves.
    for half in [&ne_ttl, &de_ttl] {
        assert!(half.contains("inOrch"));
        assert!(half.contains("inServ"));
    }
}

#[test]
fn deployment_half_still_parses_objectives() {
    let graph = IntentGraph::parse(COMBINED_INTENT).expect("combined intent parses");
    let (_, de_ttl) = graph.split_combined_intent().expect("split succeeds");
    let de = IntentGraph::parse(&de_ttl).expect("deployment half parses");

    let objectives = de.deployment_objectives().expect("objectives parse");
    let target = objectives.get("computelatency").expect("objective present");
    assert!((target.value - 1.0).abs() < 1e-9);
    assert!((target.original_value - 1000.0).abs() < 1e-9);

    let info = de.find_deployment_info().expect("deployment info");
    assert_eq!(info.application, "hello");
    assert_eq!(de.datacenter().as_deref(), Some("EC21"));
}

#[test]
fn split_requires_both_expectations() {
    let deployment_only = r#"
@prefix data5g: <http://5g4data.eu/5g4data#> .
@prefix icm: <http://tio.models.tmforum.org/tio/v3.6.0/IntentCommonModel/> .
@prefix log: <http://tio.models.tmforum.org/tio/v3.6.0/LogicalOperators/> .

data5g:Iaa11bb22cc33dd44ee55ff6677889900 a icm:Intent ;
    log:allOf data5g:DE1111111111111111aaaaaaaaaaaaaaaa .

data5g:DE1111111111111111aaaaaaaaaaaaaaaa a data5g:DeploymentExpectation ;
    icm:target data5g:deployment .
"#;
    let graph = IntentGraph::parse(deployment_only).expect("parses");
    assert!(graph.split_combined_intent().is_err());
}
