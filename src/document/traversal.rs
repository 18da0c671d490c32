use std::collections::{HashMap, VecDeque};

use super::{Document, ElementId, ElementKind};
use crate::error::{Error, Result};

/// A connection seen during upstream traversal. Built on demand, never stored
/// in the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    pub downstream: ElementId,
    /// The input carrying the connection; `None` when an output connects directly.
    pub connecting: Option<ElementId>,
    pub upstream: ElementId,
}

/// Kahn sort of a graph's nodes and outputs.
///
/// # Inputs
/// - `graph`: a node graph, or the document root for top-level nodes
///
/// # Output
/// - Children in evaluation order. Ties keep document order, so identical
///   graphs always sort identically.
pub fn topological_sort(doc: &Document, graph: ElementId) -> Result<Vec<ElementId>> {
    let children: Vec<ElementId> = doc
        .children(graph)
        .iter()
        .copied()
        .filter(|c| matches!(doc.kind(*c), ElementKind::Node | ElementKind::Output))
        .collect();

    let mut indeg: HashMap<ElementId, usize> = HashMap::with_capacity(children.len());
    let mut outgoing: HashMap<ElementId, Vec<ElementId>> = HashMap::new();
    for &child in &children {
        let ports = match doc.kind(child) {
            ElementKind::Node => doc.inputs(child),
            _ => vec![child],
        };
        let mut degree = 0usize;
        for port in ports {
            if let Some(up) = doc.connected_node(port)? {
                degree += 1;
                outgoing.entry(up).or_default().push(child);
            }
        }
        indeg.insert(child, degree);
    }

    let mut q: VecDeque<ElementId> = children
        .iter()
        .copied()
        .filter(|c| indeg.get(c) == Some(&0))
        .collect();
    let mut order: Vec<ElementId> = Vec::with_capacity(children.len());

    while let Some(n) = q.pop_front() {
        order.push(n);
        if let Some(nexts) = outgoing.get(&n) {
            for m in nexts {
                if let Some(entry) = indeg.get_mut(m) {
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(*m);
                    }
                }
            }
        }
    }

    if order.len() != children.len() {
        let name = if graph == doc.root() {
            "<document>".to_string()
        } else {
            doc.path(graph)
        };
        return Err(Error::FoundCycle(format!(
            "cycle detected in graph '{name}' (cannot topologically sort)"
        )));
    }
    Ok(order)
}

/// Direct upstream connections of an element.
///
/// Nodes report one edge per connected input, in input order. An input bound
/// through `interfacename` reports the interface port as its upstream. Outputs
/// report the node named by `nodename`. Interface ports are leaves.
pub fn upstream_edges(doc: &Document, element: ElementId) -> Result<Vec<Edge>> {
    let mut edges = Vec::new();
    match doc.kind(element) {
        ElementKind::Node => {
            for input in doc.inputs(element) {
                if let Some(up) = doc.connected_node(input)? {
                    edges.push(Edge {
                        downstream: element,
                        connecting: Some(input),
                        upstream: up,
                    });
                } else if let Some(port) = doc.interface_input(input)? {
                    edges.push(Edge {
                        downstream: element,
                        connecting: Some(input),
                        upstream: port,
                    });
                }
            }
        }
        ElementKind::Output => {
            if let Some(up) = doc.connected_node(element)? {
                edges.push(Edge {
                    downstream: element,
                    connecting: None,
                    upstream: up,
                });
            }
        }
        _ => {}
    }
    Ok(edges)
}

struct Frame {
    edges: Vec<Edge>,
    next: usize,
    element_depth: usize,
    node_depth: usize,
}

/// Depth-first upstream walk that fails on cycles instead of looping.
///
/// Elements on the active path are tracked explicitly; revisiting one yields
/// `Err(FoundCycle)` and ends the iteration. Shared subgraphs that are not on
/// the path are walked again unless the caller prunes them.
pub struct GraphIterator<'d> {
    doc: &'d Document,
    start: ElementId,
    started: bool,
    stack: Vec<Frame>,
    path: Vec<ElementId>,
    pending: Option<Edge>,
    prune: bool,
    element_depth: usize,
    node_depth: usize,
    done: bool,
}

pub fn traverse_graph(doc: &Document, start: ElementId) -> GraphIterator<'_> {
    GraphIterator {
        doc,
        start,
        started: false,
        stack: Vec::new(),
        path: Vec::new(),
        pending: None,
        prune: false,
        element_depth: 0,
        node_depth: 0,
        done: false,
    }
}

impl GraphIterator<'_> {
    /// Do not descend above the edge returned last.
    pub fn prune_subgraph(&mut self) {
        self.prune = true;
    }

    /// Hops from the start to the last upstream element, ports included.
    pub fn element_depth(&self) -> usize {
        self.element_depth
    }

    /// Node-to-node hops from the start to the last upstream element.
    pub fn node_depth(&self) -> usize {
        self.node_depth
    }

    fn fail(&mut self, err: Error) -> Option<Result<Edge>> {
        self.done = true;
        self.stack.clear();
        self.path.clear();
        Some(Err(err))
    }

    fn push(&mut self, element: ElementId) -> Result<()> {
        let edges = upstream_edges(self.doc, element)?;
        self.stack.push(Frame {
            edges,
            next: 0,
            element_depth: self.element_depth,
            node_depth: self.node_depth,
        });
        self.path.push(element);
        Ok(())
    }
}

impl Iterator for GraphIterator<'_> {
    type Item = Result<Edge>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if let Err(e) = self.push(self.start) {
                return self.fail(e);
            }
        }
        if let Some(edge) = self.pending.take() {
            if !std::mem::take(&mut self.prune) {
                if let Err(e) = self.push(edge.upstream) {
                    return self.fail(e);
                }
            }
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                return None;
            };
            if frame.next < frame.edges.len() {
                let edge = frame.edges[frame.next];
                frame.next += 1;
                let (element_depth, node_depth) = (frame.element_depth, frame.node_depth);
                if self.path.contains(&edge.upstream) {
                    let msg = format!("Encountered cycle at element: {}", self.doc.path(edge.upstream));
                    return self.fail(Error::FoundCycle(msg));
                }
                self.element_depth = element_depth + if edge.connecting.is_some() { 2 } else { 1 };
                self.node_depth =
                    node_depth + usize::from(self.doc.kind(edge.upstream) == ElementKind::Node);
                self.pending = Some(edge);
                return Some(Ok(edge));
            }
            self.stack.pop();
            self.path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_utils::doc_with_defs;
    use crate::document::attr;

    fn chain() -> (Document, ElementId) {
        let mut doc = doc_with_defs();
        let g = doc.add_node_graph("g").unwrap();
        let out = doc.add_output(g, "out", "color3").unwrap();
        doc.set_attribute(out, attr::NODE_NAME, "add1");
        let add = doc.add_node(g, "add", "add1", "color3").unwrap();
        doc.add_connected_input(add, "in1", "color3", "c1").unwrap();
        doc.add_connected_input(add, "in2", "color3", "c2").unwrap();
        let c1 = doc.add_node(g, "constant", "c1", "color3").unwrap();
        doc.add_value_input(c1, "value", "color3", "1, 0, 0").unwrap();
        doc.add_node(g, "constant", "c2", "color3").unwrap();
        (doc, g)
    }

    #[test]
    fn sort_orders_upstream_first() {
        let (doc, g) = chain();
        let names: Vec<_> = topological_sort(&doc, g)
            .unwrap()
            .into_iter()
            .map(|e| doc.name(e).to_string())
            .collect();
        assert_eq!(names, ["c1", "c2", "add1", "out"]);
    }

    #[test]
    fn two_node_cycle_fails_sort_and_traversal() {
        let mut doc = doc_with_defs();
        let g = doc.add_node_graph("loop").unwrap();
        let a = doc.add_node(g, "add", "a", "color3").unwrap();
        doc.add_connected_input(a, "in1", "color3", "b").unwrap();
        let b = doc.add_node(g, "add", "b", "color3").unwrap();
        doc.add_connected_input(b, "in1", "color3", "a").unwrap();
        let out = doc.add_output(g, "out", "color3").unwrap();
        doc.set_attribute(out, attr::NODE_NAME, "a");

        let err = topological_sort(&doc, g).unwrap_err();
        assert!(matches!(&err, Error::FoundCycle(m) if m.contains("loop")));

        let results: Vec<_> = traverse_graph(&doc, out).collect();
        assert!(matches!(results.last(), Some(Err(Error::FoundCycle(_)))));
    }

    #[test]
    fn traversal_reports_depths_and_prunes() {
        let (doc, g) = chain();
        let out = doc.child(g, "out").unwrap();
        let mut it = traverse_graph(&doc, out);
        let first = it.next().unwrap().unwrap();
        assert_eq!(doc.name(first.upstream), "add1");
        assert_eq!((it.element_depth(), it.node_depth()), (1, 1));
        let second = it.next().unwrap().unwrap();
        assert_eq!(doc.name(second.upstream), "c1");
        assert_eq!((it.element_depth(), it.node_depth()), (3, 2));

        let mut pruned = traverse_graph(&doc, out);
        pruned.next().unwrap().unwrap();
        pruned.prune_subgraph();
        assert!(pruned.next().is_none());
    }

    #[test]
    fn interface_names_resolve_to_graph_inputs() {
        let mut doc = doc_with_defs();
        let g = doc.add_node_graph("g").unwrap();
        doc.add_value_input(g, "tint", "color3", "1, 1, 1").unwrap();
        let add = doc.add_node(g, "add", "add1", "color3").unwrap();
        let i = doc.add_input(add, "in1", "color3").unwrap();
        doc.set_attribute(i, attr::INTERFACE_NAME, "tint");
        let edges = upstream_edges(&doc, add).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].upstream, doc.input(g, "tint").unwrap());
    }
}
