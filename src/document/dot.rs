use std::fmt::Write as _;

use super::{Document, ElementId, ElementKind, attr};
use crate::error::Result;

/// GraphViz rendering of a node graph: one box per node labelled with its
/// category, one ellipse per graph output, edges labelled with the input name.
pub fn as_string_dot(doc: &Document, graph: ElementId) -> Result<String> {
    let mut out = String::from("digraph {\n");
    for child in doc.children(graph) {
        let name = doc.name(*child);
        match doc.kind(*child) {
            ElementKind::Node => {
                let _ = writeln!(
                    out,
                    "    \"{name}\" [shape=box, label=\"{name}\\n({})\"];",
                    doc.get(*child).category
                );
            }
            ElementKind::Output => {
                let _ = writeln!(out, "    \"{name}\" [shape=ellipse];");
            }
            ElementKind::Input | ElementKind::Parameter => {
                let _ = writeln!(out, "    \"{name}\" [shape=diamond];");
            }
            _ => {}
        }
    }
    for child in doc.children(graph) {
        let child_name = doc.name(*child);
        match doc.kind(*child) {
            ElementKind::Node => {
                for input in doc.inputs(*child) {
                    let upstream = match doc.connected_node(input)? {
                        Some(up) => Some(doc.name(up).to_string()),
                        None => doc
                            .attribute(input, attr::INTERFACE_NAME)
                            .map(str::to_string),
                    };
                    if let Some(up) = upstream {
                        let _ = writeln!(
                            out,
                            "    \"{up}\" -> \"{child_name}\" [label=\"{}\"];",
                            doc.name(input)
                        );
                    }
                }
            }
            ElementKind::Output => {
                if let Some(up) = doc.connected_node(*child)? {
                    let _ = writeln!(out, "    \"{}\" -> \"{child_name}\";", doc.name(up));
                }
            }
            _ => {}
        }
    }
    out.push_str("}\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_utils::doc_with_defs;

    #[test]
    fn dot_lists_nodes_and_labelled_edges() {
        let mut doc = doc_with_defs();
        let g = doc.add_node_graph("g").unwrap();
        doc.add_node(g, "constant", "c", "color3").unwrap();
        let a = doc.add_node(g, "add", "a", "color3").unwrap();
        doc.add_connected_input(a, "in1", "color3", "c").unwrap();
        let out = doc.add_output(g, "out", "color3").unwrap();
        doc.set_attribute(out, attr::NODE_NAME, "a");

        let dot = as_string_dot(&doc, g).unwrap();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("\"c\" [shape=box, label=\"c\\n(constant)\"];"));
        assert!(dot.contains("\"c\" -> \"a\" [label=\"in1\"];"));
        assert!(dot.contains("\"a\" -> \"out\";"));
    }
}
