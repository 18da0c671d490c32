mod common;

use std::collections::HashSet;

use node_forge_shadergen::document::{self, attr, io, topological_sort};
use node_forge_shadergen::genshader::{PIXEL, glsl};
use node_forge_shadergen::{Document, ElementKind, Error};
use proptest::prelude::*;
use proptest::sample::Index;

use common::{document, generate, last_statement, no_lights};

fn tinted() -> serde_json::Value {
    serde_json::json!({
        "nodeDefs": [{
            "name": "ND_tint3_color3",
            "node": "tint3",
            "type": "color3",
            "inputs": [{ "name": "base", "type": "color3", "value": "0.0, 0.0, 0.0" }]
        }],
        "nodeGraphs": [
            {
                "name": "NG_tint3",
                "nodedef": "ND_tint3_color3",
                "nodes": [
                    {
                        "name": "scale",
                        "category": "multiply",
                        "type": "color3",
                        "inputs": [
                            { "name": "in1", "type": "color3", "interfacename": "base" },
                            { "name": "in2", "type": "color3", "value": "0.5, 0.5, 0.5" }
                        ]
                    },
                    {
                        "name": "lift",
                        "category": "add",
                        "type": "color3",
                        "inputs": [
                            { "name": "in1", "type": "color3", "nodename": "scale" },
                            { "name": "in2", "type": "color3", "value": "0.1, 0.1, 0.1" }
                        ]
                    },
                    {
                        "name": "blend",
                        "category": "mix",
                        "type": "color3",
                        "inputs": [
                            { "name": "fg", "type": "color3", "nodename": "lift" },
                            { "name": "bg", "type": "color3", "interfacename": "base" },
                            { "name": "mix", "type": "float", "value": "0.25" }
                        ]
                    }
                ],
                "outputs": [{ "name": "out", "type": "color3", "nodename": "blend" }]
            },
            {
                "name": "M",
                "nodes": [{
                    "name": "t1",
                    "category": "tint3",
                    "type": "color3",
                    "inputs": [{ "name": "base", "type": "color3", "value": "0.2, 0.4, 0.6" }]
                }],
                "outputs": [{ "name": "out", "type": "color3", "nodename": "t1" }]
            }
        ]
    })
}

#[test]
fn flattening_inlines_a_three_node_compound() {
    let mut doc = document(tinted());
    let compound = generate(&doc, "M", glsl::TARGET, no_lights()).unwrap();
    let compound_pixel = compound.source_code(PIXEL).unwrap().to_string();

    let graph = doc.child(doc.root(), "M").unwrap();
    document::flatten_subgraphs(&mut doc, graph, glsl::TARGET).unwrap();

    assert!(doc.child(graph, "t1").is_none());
    let inlined: Vec<_> = doc.nodes(graph).into_iter().map(|n| doc.name(n).to_string()).collect();
    assert_eq!(inlined.len(), 3);
    for name in ["t1_scale", "t1_lift", "t1_blend"] {
        assert!(inlined.iter().any(|n| n == name), "missing {name} in {inlined:?}");
    }
    let scale = doc.child(graph, "t1_scale").unwrap();
    let in1 = doc.input(scale, "in1").unwrap();
    assert_eq!(doc.attribute(in1, attr::VALUE), Some("0.2, 0.4, 0.6"));

    let flat = generate(&doc, "M", glsl::TARGET, no_lights()).unwrap();
    let flat_pixel = flat.source_code(PIXEL).unwrap();

    // The compound body is a function in one and inline statements in the other.
    assert!(compound_pixel.contains("void NG_tint3("), "{compound_pixel}");
    assert!(!flat_pixel.contains("NG_tint3"));
    for (inner, outer) in [("scale_out", "t1_scale_out"), ("lift_out", "t1_lift_out"), ("blend_out", "t1_blend_out")] {
        assert!(compound_pixel.contains(&format!("vec3 {inner} = ")));
        assert!(flat_pixel.contains(&format!("vec3 {outer} = ")));
    }
    assert_eq!(last_statement(&compound_pixel), "out1 = vec4(t1_out, 1.0);");
    assert_eq!(last_statement(flat_pixel), "out1 = vec4(t1_blend_out, 1.0);");
}

#[test]
fn two_node_loop_is_a_cycle_for_sort_and_generation() {
    let doc = document(serde_json::json!({
        "nodeGraphs": [{
            "name": "NG_loop",
            "nodes": [
                {
                    "name": "a",
                    "category": "multiply",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "nodename": "b" }]
                },
                {
                    "name": "b",
                    "category": "multiply",
                    "type": "color3",
                    "inputs": [{ "name": "in1", "type": "color3", "nodename": "a" }]
                }
            ],
            "outputs": [{ "name": "out", "type": "color3", "nodename": "b" }]
        }]
    }));
    let graph = doc.child(doc.root(), "NG_loop").unwrap();
    assert!(matches!(topological_sort(&doc, graph), Err(Error::FoundCycle(_))));
    assert!(matches!(
        generate(&doc, "NG_loop", glsl::TARGET, no_lights()),
        Err(Error::FoundCycle(_))
    ));
}

#[test]
fn json_round_trip_keeps_graph_structure() {
    let doc = io::document_from_json(&tinted().to_string()).unwrap();
    let text = io::document_to_json(&doc).unwrap();
    let back = io::document_from_json(&text).unwrap();

    let ng = back.child(back.root(), "NG_tint3").unwrap();
    assert_eq!(back.attribute(ng, attr::NODE_DEF), Some("ND_tint3_color3"));
    let blend = back.child(ng, "blend").unwrap();
    let bg = back.input(blend, "bg").unwrap();
    assert_eq!(back.attribute(bg, attr::INTERFACE_NAME), Some("base"));
    assert_eq!(back.nodes(ng).len(), 3);
    assert_eq!(back.node_defs().len(), 1);
}

#[test]
fn dot_lists_nodes_and_edges() {
    let doc = document(tinted());
    let ng = doc.child(doc.root(), "NG_tint3").unwrap();
    let dot = document::dot::as_string_dot(&doc, ng).unwrap();
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains("\"scale\" [shape=box, label=\"scale\\n(multiply)\"];"));
    assert!(dot.contains("\"lift\" -> \"blend\" [label=\"fg\"];"));
    assert!(dot.contains("\"base\" -> \"scale\" [label=\"in1\"];"));
    assert!(dot.contains("\"blend\" -> \"out\";"));
}

/// Build a graph of `add` nodes. Node `i` may read from any node `j < i`;
/// nodes are inserted in `order` so the document order is not already sorted.
fn dag(links: &[(Option<Index>, Option<Index>)], order: &[usize]) -> (Document, Vec<(String, String)>) {
    let mut doc = io::load_standard_library().unwrap();
    let graph = doc.add_node_graph("dag").unwrap();
    let mut edges = Vec::new();
    for &i in order {
        let name = format!("n{i}");
        let node = doc.add_node(graph, "add", &name, "color3").unwrap();
        for (port, link) in [("in1", &links[i].0), ("in2", &links[i].1)] {
            match link {
                Some(ix) if i > 0 => {
                    let up = format!("n{}", ix.index(i));
                    doc.add_connected_input(node, port, "color3", &up).unwrap();
                    edges.push((up, name.clone()));
                }
                _ => {
                    doc.add_value_input(node, port, "color3", "0.1, 0.2, 0.3").unwrap();
                }
            }
        }
    }
    let out = doc.add_output(graph, "out", "color3").unwrap();
    let last = format!("n{}", links.len() - 1);
    doc.set_attribute(out, attr::NODE_NAME, last.clone());
    edges.push((last, "out".to_string()));
    (doc, edges)
}

fn links_and_order() -> impl Strategy<Value = (Vec<(Option<Index>, Option<Index>)>, Vec<usize>)> {
    (1usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec((any::<Option<Index>>(), any::<Option<Index>>()), n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn sort_places_every_producer_before_its_consumers((links, order) in links_and_order()) {
        let (doc, edges) = dag(&links, &order);
        let graph = doc.child(doc.root(), "dag").unwrap();
        let sorted: Vec<String> = topological_sort(&doc, graph)
            .unwrap()
            .into_iter()
            .map(|e| doc.name(e).to_string())
            .collect();

        let children = doc
            .children(graph)
            .iter()
            .filter(|c| matches!(doc.kind(**c), ElementKind::Node | ElementKind::Output))
            .count();
        prop_assert_eq!(sorted.len(), children);
        let position = |name: &str| sorted.iter().position(|n| n == name).unwrap();
        for (up, down) in &edges {
            prop_assert!(position(up) < position(down), "{} after {}", up, down);
        }
    }

    #[test]
    fn identifiers_are_unique_and_never_reserved(names in prop::collection::vec("[a-z_]{1,6}", 1..40)) {
        let syntax = glsl::glsl_syntax();
        let mut ids = syntax.new_identifier_map();
        let mut seen = HashSet::new();
        for name in &names {
            let id = syntax.make_identifier(name, &mut ids);
            prop_assert!(!syntax.is_reserved(&id), "{} is reserved", id);
            prop_assert!(seen.insert(id.clone()), "{} handed out twice", id);
        }
    }
}
