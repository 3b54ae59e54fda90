use crate::compile::{compile, CompileEnv, NodeKind};
use crate::dot::{render, ExecStats, NodeStats};
use crate::lambda::LambdaValue;
use crate::parse::{parse, parse_lambda};
use crate::vars::{materialize, VarType, VarValue, Vars};
use crate::ScriptError;
use std::collections::BTreeMap;
use weir_common::types::{FieldValue, TaskType};

const COUNT_SCRIPT: &str = "stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count('value')
    |httpOut('count')
";

fn compile_script(src: &str) -> crate::compile::CompiledGraph {
    let program = parse(src).unwrap();
    let program = materialize(&program, &Vars::new()).unwrap();
    compile(&program, &CompileEnv::default()).unwrap()
}

#[test]
fn parse_and_compile_stream_count() {
    let graph = compile_script(COUNT_SCRIPT);
    assert_eq!(graph.task_type, TaskType::Stream);
    let ids: Vec<String> = graph
        .topo()
        .iter()
        .map(|idx| graph.node(*idx).id.clone())
        .collect();
    assert_eq!(ids, ["stream0", "from1", "window2", "count3", "httpOut4"]);
}

#[test]
fn dot_without_stats_is_bare_edge_list() {
    let graph = compile_script("stream\n    |from()\n        .measurement('test')\n");
    assert_eq!(
        render(&graph, "testTaskID", None),
        "digraph testTaskID {\nstream0 -> from1;\n}"
    );
}

#[test]
fn dot_with_stats_carries_counters() {
    let graph = compile_script("stream\n    |from()\n        .measurement('test')\n");
    let mut stats = ExecStats::default();
    stats.nodes.insert(
        "stream0".to_string(),
        NodeStats {
            avg_exec_ns: 0,
            dropped: None,
        },
    );
    stats.nodes.insert(
        "from1".to_string(),
        NodeStats {
            avg_exec_ns: 0,
            dropped: None,
        },
    );
    stats
        .edges
        .insert(("stream0".to_string(), "from1".to_string()), 0);
    let got = render(&graph, "testTaskID", Some(&stats));
    let want = "digraph testTaskID {\n\
graph [throughput=\"0.00 points/s\"];\n\
\n\
stream0 [avg_exec_time_ns=\"0s\" ];\n\
stream0 -> from1 [processed=\"0\"];\n\
\n\
from1 [avg_exec_time_ns=\"0s\" ];\n\
}";
    assert_eq!(got, want);
}

#[test]
fn alert_node_gets_ordinal_two() {
    let graph = compile_script(
        "stream
    |from()
        .measurement('alert')
    |alert()
        .id('id')
        .message('message')
        .details('details')
        .warn(lambda: \"value\" <= 1.0)
        .crit(lambda: \"value\" > 1.0)
",
    );
    let alert = graph.find("alert2").expect("alert2 node");
    match &graph.node(alert).kind {
        NodeKind::Alert(spec) => {
            assert_eq!(spec.id_tmpl.as_deref(), Some("id"));
            assert!(spec.warn.is_some());
            assert!(spec.crit.is_some());
        }
        other => panic!("unexpected node kind {other:?}"),
    }
}

#[test]
fn missing_var_is_reported_with_name() {
    let src = "var field string
stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count(field)
    |httpOut('count')
";
    let program = parse(src).unwrap();
    let err = materialize(&program, &Vars::new()).unwrap_err();
    assert_eq!(err.to_string(), "missing value for var \"field\".");
}

#[test]
fn provided_var_fills_argument() {
    let src = "var field string
stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count(field)
    |httpOut('count')
";
    let program = parse(src).unwrap();
    let mut vars = Vars::new();
    vars.insert(
        "field".to_string(),
        VarValue {
            var_type: VarType::String,
            value: serde_json::json!("value"),
            description: None,
        },
    );
    let program = materialize(&program, &vars).unwrap();
    let graph = compile(&program, &CompileEnv::default()).unwrap();
    let count = graph.find("count3").expect("count3 node");
    match &graph.node(count).kind {
        NodeKind::Aggregate { field, .. } => assert_eq!(field, "value"),
        other => panic!("unexpected node kind {other:?}"),
    }
}

#[test]
fn duration_var_accepts_string_and_nanoseconds() {
    let src = "var period duration
stream
    |from()
    |window()
        .period(period)
        .every(period)
";
    let program = parse(src).unwrap();
    for value in [serde_json::json!("10s"), serde_json::json!(10_000_000_000i64)] {
        let mut vars = Vars::new();
        vars.insert(
            "period".to_string(),
            VarValue {
                var_type: VarType::Duration,
                value,
                description: None,
            },
        );
        let program = materialize(&program, &vars).unwrap();
        let graph = compile(&program, &CompileEnv::default()).unwrap();
        let window = graph.find("window2").unwrap();
        match &graph.node(window).kind {
            NodeKind::Window { period, every, .. } => {
                assert_eq!(*period, 10_000_000_000);
                assert_eq!(*every, 10_000_000_000);
            }
            other => panic!("unexpected node kind {other:?}"),
        }
    }
}

#[test]
fn stream_edge_cannot_feed_batch_only_node() {
    let src = "stream
    |from()
        .measurement('test')
    |count('value')
";
    let program = parse(src).unwrap();
    let program = materialize(&program, &Vars::new()).unwrap();
    let err = compile(&program, &CompileEnv::default()).unwrap_err();
    assert!(
        err.to_string().contains("wants batch"),
        "unexpected error: {err}"
    );
}

#[test]
fn join_builds_multi_parent_node() {
    let src = "var cpu = stream
    |from()
        .measurement('cpu')
var mem = stream
    |from()
        .measurement('mem')
cpu
    |join(mem)
        .as('cpu', 'mem')
        .tolerance(1s)
    |httpOut('joined')
";
    let graph = compile_script(src);
    let join = graph
        .graph
        .node_indices()
        .find(|idx| matches!(graph.node(*idx).kind, NodeKind::Join { .. }))
        .expect("join node");
    assert_eq!(graph.parents(join).len(), 2);
}

#[test]
fn batch_query_compiles_with_align() {
    let src = "batch
    |query('SELECT value from mydb.myrp.cpu')
        .period(5ms)
        .every(5ms)
        .align()
    |count('value')
    |where(lambda: \"count\" == 2)
    |httpOut('count')
";
    let graph = compile_script(src);
    assert_eq!(graph.task_type, TaskType::Batch);
    let query = graph.find("query1").unwrap();
    match &graph.node(query).kind {
        NodeKind::Query {
            period,
            every,
            align,
            ..
        } => {
            assert_eq!(*period, 5_000_000);
            assert_eq!(*every, 5_000_000);
            assert!(align);
        }
        other => panic!("unexpected node kind {other:?}"),
    }
}

#[test]
fn lambda_eval_nulls_on_missing_field() {
    let expr = parse_lambda("\"value\" > 1.0").unwrap();
    let mut fields = BTreeMap::new();
    let tags = BTreeMap::new();
    assert_eq!(expr.eval(&fields, &tags), LambdaValue::Bool(false));

    fields.insert("value".to_string(), FieldValue::Float(2.0));
    assert_eq!(expr.eval(&fields, &tags), LambdaValue::Bool(true));
}

#[test]
fn lambda_boolean_and_arithmetic() {
    let expr = parse_lambda("(\"a\" + \"b\") * 2 == 10 AND \"host\" == 'web-01'").unwrap();
    let mut fields = BTreeMap::new();
    fields.insert("a".to_string(), FieldValue::Int(2));
    fields.insert("b".to_string(), FieldValue::Int(3));
    let mut tags = BTreeMap::new();
    tags.insert("host".to_string(), "web-01".to_string());
    assert_eq!(expr.eval(&fields, &tags), LambdaValue::Bool(true));
}

#[test]
fn lambda_regex_match_on_tag() {
    let expr = parse_lambda("\"host\" =~ /^web-\\d+$/").unwrap();
    let fields = BTreeMap::new();
    let mut tags = BTreeMap::new();
    tags.insert("host".to_string(), "web-01".to_string());
    assert_eq!(expr.eval(&fields, &tags), LambdaValue::Bool(true));
}

#[test]
fn unknown_node_is_a_compile_error() {
    let program = parse("stream\n    |frobnicate()\n").unwrap();
    let program = materialize(&program, &Vars::new()).unwrap();
    assert!(matches!(
        compile(&program, &CompileEnv::default()),
        Err(ScriptError::Compile(_))
    ));
}
