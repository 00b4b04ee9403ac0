//! Serialization round-trips through the properties recorders.

mod common;

use common::*;
use serde_json::json;

#[test]
fn dump_load_dump_is_identical() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());
    graph.add_node("source", Some("src")).unwrap();
    graph.add_node("sink", Some("end")).unwrap();
    graph.add_node("counter", Some("cnt")).unwrap();
    graph.add_connection("src", "end", "out", "in").unwrap();

    let dump = graph.dump_json();

    let fixture2 = Fixture::new();
    let mut graph2 = fixture2.graph_with_registry(test_registry());
    graph2.load_json(dump.clone());
    assert_eq!(graph2.dump_json(), dump);

    let identifiers: Vec<&str> = graph2.identifiers().collect();
    assert_eq!(identifiers, ["cnt", "end", "src"]);
}

#[test]
fn node_properties_survive_the_round_trip() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());
    graph.add_node("counter", Some("cnt")).unwrap();

    // Set the node's value through the load recorder, then dump.
    graph.load_json(json!({
        "cnt": { "type": "counter", "properties": { "value": 7 } }
    }));
    let dump = graph.dump_json();
    assert_eq!(dump["cnt"]["properties"]["value"], json!(7));

    // And a fresh graph reconstructs the node including its value.
    let fixture2 = Fixture::new();
    let mut graph2 = fixture2.graph_with_registry(test_registry());
    graph2.load_json(dump);
    assert_eq!(graph2.dump_json()["cnt"]["properties"]["value"], json!(7));
}

#[test]
fn disable_flag_round_trips_and_takes_effect() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());
    graph.add_node("source", Some("src")).unwrap();

    graph.load_json(json!({
        "src": { "type": "source", "disable": true }
    }));
    graph.run().unwrap();
    assert!(fixture.allocations().is_empty());
    assert_eq!(graph.dump_json()["src"]["disable"], json!(true));
}

#[test]
fn unknown_types_and_connections_are_skipped() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());
    graph.add_node("source", Some("src")).unwrap();
    graph.add_node("sink", Some("end")).unwrap();

    graph.load_json(json!({
        "mystery": { "type": "does-not-exist" },
        "connections": [
            { "src": "src", "dst": "end", "src_output": "out", "dst_input": "in" },
            { "src": "ghost", "dst": "end", "src_output": "out", "dst_input": "in" },
            { "src": "src", "dst": "end", "src_output": "out", "dst_input": "nope" }
        ]
    }));

    // The unknown node and the two bogus connections are dropped; the valid
    // connection is replayed and the graph runs.
    let identifiers: Vec<&str> = graph.identifiers().collect();
    assert_eq!(identifiers, ["end", "src"]);
    graph.run().unwrap();
}

#[test]
fn graph_settings_round_trip() {
    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());
    graph.set_iterations_in_flight(3);
    graph.set_fps_limit(60);

    let dump = graph.dump_json();
    assert_eq!(dump["graph"]["iterations in flight"], json!(3));
    assert_eq!(dump["graph"]["fps limit"], json!(60));

    let fixture2 = Fixture::new();
    let mut graph2 = fixture2.graph_with_registry(test_registry());
    graph2.load_json(dump);
    graph2.run().unwrap();
    // The loaded ring bound is in effect after the rebuild.
    assert_eq!(graph2.dump_json()["graph"]["iterations in flight"], json!(3));
}

#[test]
fn registry_maps_types_back_to_names() {
    use std::any::TypeId;

    let registry = test_registry();
    assert_eq!(
        registry.type_name_of(TypeId::of::<SourceNode>()),
        Some("source")
    );
    assert_eq!(
        registry.type_name_of(TypeId::of::<CounterNode>()),
        Some("counter")
    );
    assert_eq!(registry.type_name_of(TypeId::of::<FailingNode>()), None);

    let fixture = Fixture::new();
    let mut graph = fixture.graph_with_registry(test_registry());
    graph.add_node("source", Some("src")).unwrap();
    graph
        .add_node_object("hand-built", Box::new(FailingNode), Some("odd"))
        .unwrap();
    assert_eq!(graph.node_type_name("src"), Some("source"));
    assert_eq!(graph.node_type_name("odd"), Some("hand-built"));
    assert_eq!(graph.node_type_name("missing"), None);
}
