//! In-place expansion of nodes implemented by node graphs.

use std::collections::{HashMap, VecDeque};

use log::debug;

use super::{Document, ElementId, ElementKind, attr};
use crate::error::{Error, Result};

/// Replace every node of `graph` whose implementation for `target` is a node
/// graph with renamed copies of that graph's nodes.
///
/// Newly inlined nodes are queued again so nested compounds expand fully. Each
/// queued node carries the chain of graphs it was inlined from; a graph showing
/// up twice in that chain raises `FoundCycle`.
pub fn flatten_subgraphs(doc: &mut Document, graph: ElementId, target: &str) -> Result<()> {
    let mut queue: VecDeque<(ElementId, Vec<String>)> = doc
        .nodes(graph)
        .into_iter()
        .map(|n| (n, Vec::new()))
        .collect();

    while let Some((node, lineage)) = queue.pop_front() {
        if !doc.contains(node) {
            continue;
        }
        let Some(impl_graph) = graph_implementation(doc, node, target)? else {
            continue;
        };
        let impl_name = doc.name(impl_graph).to_string();
        if lineage.contains(&impl_name) {
            return Err(Error::FoundCycle(format!(
                "node graph '{impl_name}' contains itself through node '{}'",
                doc.path(node)
            )));
        }
        let created = inline_node(doc, graph, node, impl_graph)?;
        debug!(
            "flattened '{}' into {} nodes from '{impl_name}'",
            doc.path(graph),
            created.len()
        );
        let mut next = lineage;
        next.push(impl_name);
        for c in created {
            queue.push_back((c, next.clone()));
        }
    }
    Ok(())
}

fn graph_implementation(doc: &Document, node: ElementId, target: &str) -> Result<Option<ElementId>> {
    let def = match doc.node_def_for(node) {
        Ok(d) => d,
        Err(Error::NoImplementation(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(doc
        .implementation_for(def, target)
        .filter(|i| doc.kind(*i) == ElementKind::NodeGraph))
}

const BINDING_ATTRS: [&str; 4] = [attr::NODE_NAME, attr::OUTPUT, attr::INTERFACE_NAME, attr::VALUE];

/// Make `to` carry the same value or connection as `from`.
fn copy_binding(doc: &mut Document, from: ElementId, to: ElementId) {
    for a in BINDING_ATTRS {
        doc.remove_attribute(to, a);
    }
    for a in BINDING_ATTRS {
        if let Some(v) = doc.attribute(from, a).map(str::to_string) {
            doc.set_attribute(to, a, v);
        }
    }
    if doc.attribute(to, attr::CHANNELS).is_none() {
        if let Some(ch) = doc.attribute(from, attr::CHANNELS).map(str::to_string) {
            doc.set_attribute(to, attr::CHANNELS, ch);
        }
    }
}

fn interface_default(
    doc: &Document,
    impl_graph: ElementId,
    def: ElementId,
    name: &str,
) -> Result<Option<String>> {
    if let Some(own) = doc.input(impl_graph, name) {
        return Ok(doc.attribute(own, attr::VALUE).map(str::to_string));
    }
    Ok(doc
        .active_input(def, name)?
        .and_then(|i| doc.attribute(i, attr::VALUE))
        .map(str::to_string))
}

fn inline_node(
    doc: &mut Document,
    graph: ElementId,
    node: ElementId,
    impl_graph: ElementId,
) -> Result<Vec<ElementId>> {
    let node_name = doc.name(node).to_string();
    let def = doc.node_def_for(node)?;
    let position = doc.children(graph).iter().position(|c| *c == node);

    let mut renamed: HashMap<String, String> = HashMap::new();
    let mut created = Vec::new();
    for sub in doc.nodes(impl_graph) {
        let sub_name = doc.name(sub).to_string();
        let new_name = doc.create_valid_child_name(graph, &format!("{node_name}_{sub_name}"));
        let index = position.map(|p| p + created.len());
        let copy = doc.duplicate_element(sub, graph, &new_name, index)?;
        renamed.insert(sub_name, new_name);
        created.push(copy);
    }

    for copy in &created {
        for input in doc.inputs(*copy) {
            if let Some(iface) = doc.attribute(input, attr::INTERFACE_NAME).map(str::to_string) {
                doc.remove_attribute(input, attr::INTERFACE_NAME);
                if let Some(outer) = doc.input(node, &iface) {
                    copy_binding(doc, outer, input);
                } else if let Some(value) = interface_default(doc, impl_graph, def, &iface)? {
                    doc.set_attribute(input, attr::VALUE, value);
                }
            } else if let Some(up) = doc.attribute(input, attr::NODE_NAME) {
                if let Some(new) = renamed.get(up).cloned() {
                    doc.set_attribute(input, attr::NODE_NAME, new);
                }
            }
        }
    }

    let inner_outputs = doc.outputs(impl_graph);
    let mut downstream = doc.outputs(graph);
    for n in doc.nodes(graph) {
        downstream.extend(doc.inputs(n));
    }
    for port in downstream {
        if doc.attribute(port, attr::NODE_NAME) != Some(node_name.as_str()) {
            continue;
        }
        let inner = match doc.attribute(port, attr::OUTPUT) {
            Some(name) => doc
                .child(impl_graph, name)
                .filter(|o| doc.kind(*o) == ElementKind::Output),
            None => inner_outputs.first().copied(),
        }
        .ok_or_else(|| {
            Error::document(format!(
                "'{}' connects to an output that graph '{}' does not have",
                doc.path(port),
                doc.name(impl_graph)
            ))
        })?;

        if let Some(inner_node) = doc.attribute(inner, attr::NODE_NAME) {
            let new = renamed.get(inner_node).cloned().ok_or_else(|| {
                Error::document(format!(
                    "output '{}' references missing node '{inner_node}'",
                    doc.path(inner)
                ))
            })?;
            doc.set_attribute(port, attr::NODE_NAME, new);
            match doc.attribute(inner, attr::OUTPUT).map(str::to_string) {
                Some(o) => doc.set_attribute(port, attr::OUTPUT, o),
                None => doc.remove_attribute(port, attr::OUTPUT),
            }
        } else if let Some(iface) = doc.attribute(inner, attr::INTERFACE_NAME).map(str::to_string) {
            if let Some(outer) = doc.input(node, &iface) {
                copy_binding(doc, outer, port);
            } else {
                doc.remove_attribute(port, attr::NODE_NAME);
                doc.remove_attribute(port, attr::OUTPUT);
                if let Some(value) = interface_default(doc, impl_graph, def, &iface)? {
                    doc.set_attribute(port, attr::VALUE, value);
                }
            }
        } else {
            doc.remove_attribute(port, attr::NODE_NAME);
            doc.remove_attribute(port, attr::OUTPUT);
            if let Some(value) = doc.attribute(inner, attr::VALUE).map(str::to_string) {
                doc.set_attribute(port, attr::VALUE, value);
            }
        }
    }

    doc.remove_child(graph, &node_name)?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_utils::doc_with_defs;

    /// `ND_tint` implemented by a graph: add(constant, interface `base`).
    fn doc_with_compound() -> Document {
        let mut doc = doc_with_defs();
        let def = doc.add_node_def("ND_tint", "tint", "color3").unwrap();
        doc.add_value_input(def, "base", "color3", "0.1, 0.1, 0.1").unwrap();
        doc.add_output(def, "out", "color3").unwrap();

        let ng = doc.add_node_graph("NG_tint").unwrap();
        doc.set_attribute(ng, attr::NODE_DEF, "ND_tint");
        let c = doc.add_node(ng, "constant", "offset", "color3").unwrap();
        doc.add_value_input(c, "value", "color3", "0.2, 0.2, 0.2").unwrap();
        let add = doc.add_node(ng, "add", "sum", "color3").unwrap();
        let in1 = doc.add_input(add, "in1", "color3").unwrap();
        doc.set_attribute(in1, attr::INTERFACE_NAME, "base");
        doc.add_connected_input(add, "in2", "color3", "offset").unwrap();
        let out = doc.add_output(ng, "out", "color3").unwrap();
        doc.set_attribute(out, attr::NODE_NAME, "sum");
        doc
    }

    #[test]
    fn compound_is_replaced_by_renamed_copies() {
        let mut doc = doc_with_compound();
        let g = doc.add_node_graph("material").unwrap();
        let src = doc.add_node(g, "constant", "src", "color3").unwrap();
        doc.add_value_input(src, "value", "color3", "1, 0, 0").unwrap();
        let t = doc.add_node(g, "tint", "tint1", "color3").unwrap();
        doc.add_connected_input(t, "base", "color3", "src").unwrap();
        let out = doc.add_output(g, "out", "color3").unwrap();
        doc.set_attribute(out, attr::NODE_NAME, "tint1");

        flatten_subgraphs(&mut doc, g, "genglsl").unwrap();

        assert!(doc.child(g, "tint1").is_none());
        let sum = doc.child(g, "tint1_sum").unwrap();
        assert_eq!(doc.attribute(out, attr::NODE_NAME), Some("tint1_sum"));
        let in1 = doc.input(sum, "in1").unwrap();
        assert_eq!(doc.attribute(in1, attr::NODE_NAME), Some("src"));
        assert!(doc.attribute(in1, attr::INTERFACE_NAME).is_none());
        let in2 = doc.input(sum, "in2").unwrap();
        assert_eq!(doc.attribute(in2, attr::NODE_NAME), Some("tint1_offset"));
    }

    #[test]
    fn self_referencing_compound_is_a_cycle() {
        let mut doc = doc_with_compound();
        let ng = doc.child(doc.root(), "NG_tint").unwrap();
        let inner = doc.add_node(ng, "tint", "again", "color3").unwrap();
        doc.add_value_input(inner, "base", "color3", "0, 0, 0").unwrap();

        let g = doc.add_node_graph("material").unwrap();
        doc.add_node(g, "tint", "tint1", "color3").unwrap();
        let err = flatten_subgraphs(&mut doc, g, "genglsl").unwrap_err();
        assert!(matches!(err, Error::FoundCycle(_)));
    }
}
