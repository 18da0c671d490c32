//! Arena-backed material document: node definitions, implementations, node
//! graphs and node instances with their typed ports.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};

pub mod dot;
pub mod flatten;
pub mod io;
pub mod traversal;

pub use flatten::flatten_subgraphs;
pub use traversal::{Edge, GraphIterator, topological_sort, traverse_graph};

/// Stable handle into a [`Document`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

impl ElementId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Document,
    NodeDef,
    Implementation,
    NodeGraph,
    Node,
    Input,
    Output,
    Parameter,
}

impl ElementKind {
    pub fn is_port(self) -> bool {
        matches!(self, ElementKind::Input | ElementKind::Output | ElementKind::Parameter)
    }

    /// Ports that feed a node: inputs and parameters.
    pub fn is_input_like(self) -> bool {
        matches!(self, ElementKind::Input | ElementKind::Parameter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Document => "document",
            ElementKind::NodeDef => "nodedef",
            ElementKind::Implementation => "implementation",
            ElementKind::NodeGraph => "nodegraph",
            ElementKind::Node => "node",
            ElementKind::Input => "input",
            ElementKind::Output => "output",
            ElementKind::Parameter => "parameter",
        }
    }
}

/// Attribute names used throughout the document model.
pub mod attr {
    pub const TYPE: &str = "type";
    pub const VALUE: &str = "value";
    pub const NODE_NAME: &str = "nodename";
    pub const OUTPUT: &str = "output";
    pub const INTERFACE_NAME: &str = "interfacename";
    pub const CHANNELS: &str = "channels";
    pub const NODE: &str = "node";
    pub const NODE_DEF: &str = "nodedef";
    pub const NODE_GROUP: &str = "nodegroup";
    pub const INHERIT: &str = "inherit";
    pub const TARGET: &str = "target";
    pub const FILE: &str = "file";
    pub const FUNCTION: &str = "function";
    pub const SOURCE_CODE: &str = "sourcecode";
    pub const ENUM: &str = "enum";
    pub const BSDF: &str = "bsdf";
    pub const UNIFORM: &str = "uniform";
    pub const DEFAULT_GEOM_PROP: &str = "defaultgeomprop";
}

#[derive(Clone, Debug)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Node category for nodes (`constant`, `surface`, ...), the kind name otherwise.
    pub category: String,
    pub attributes: BTreeMap<String, String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    removed: bool,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn type_name(&self) -> &str {
        self.attribute(attr::TYPE).unwrap_or("")
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }
}

/// Owns every element. Parent links are plain handles resolved through the arena.
#[derive(Clone)]
pub struct Document {
    elements: Vec<Element>,
    root: ElementId,
    /// Source files embedded in the document, keyed by the `file` attribute value.
    pub sources: BTreeMap<String, String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("elements", &self.elements.iter().filter(|e| !e.removed).count())
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = Element {
            name: String::new(),
            kind: ElementKind::Document,
            category: ElementKind::Document.as_str().to_string(),
            attributes: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
            removed: false,
        };
        Document {
            elements: vec![root],
            root: ElementId(0),
            sources: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.0]
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.get(id.0).is_some_and(|e| !e.removed)
    }

    pub fn name(&self, id: ElementId) -> &str {
        &self.elements[id.0].name
    }

    pub fn kind(&self, id: ElementId) -> ElementKind {
        self.elements[id.0].kind
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.elements[id.0].parent
    }

    pub fn children(&self, id: ElementId) -> &[ElementId] {
        &self.elements[id.0].children
    }

    pub fn children_of_kind(&self, id: ElementId, kind: ElementKind) -> Vec<ElementId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.kind(*c) == kind)
            .collect()
    }

    pub fn child(&self, parent: ElementId, name: &str) -> Option<ElementId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.name(*c) == name)
    }

    pub fn attribute(&self, id: ElementId, name: &str) -> Option<&str> {
        self.get(id).attribute(name)
    }

    pub fn set_attribute(&mut self, id: ElementId, name: &str, value: impl Into<String>) {
        self.get_mut(id)
            .attributes
            .insert(name.to_string(), value.into());
    }

    pub fn remove_attribute(&mut self, id: ElementId, name: &str) {
        self.get_mut(id).attributes.remove(name);
    }

    pub fn type_name(&self, id: ElementId) -> &str {
        self.get(id).type_name()
    }

    /// Slash separated path from the document root, used in diagnostics.
    pub fn path(&self, id: ElementId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c != self.root {
                parts.push(self.name(c).to_string());
            }
            cur = self.parent(c);
        }
        parts.reverse();
        parts.join("/")
    }

    pub fn add_child(
        &mut self,
        parent: ElementId,
        kind: ElementKind,
        name: &str,
        category: &str,
    ) -> Result<ElementId> {
        let index = self.children(parent).len();
        self.insert_child_at(parent, index, kind, name, category)
    }

    /// Insert a child at a position among its siblings. Names must be unique per parent.
    pub fn insert_child_at(
        &mut self,
        parent: ElementId,
        index: usize,
        kind: ElementKind,
        name: &str,
        category: &str,
    ) -> Result<ElementId> {
        if name.is_empty() {
            return Err(Error::document(format!(
                "cannot add unnamed {} to '{}'",
                kind.as_str(),
                self.path(parent)
            )));
        }
        if self.child(parent, name).is_some() {
            return Err(Error::document(format!(
                "'{}' already has a child named '{name}'",
                self.path(parent)
            )));
        }
        let id = ElementId(self.elements.len());
        self.elements.push(Element {
            name: name.to_string(),
            kind,
            category: category.to_string(),
            attributes: BTreeMap::new(),
            parent: Some(parent),
            children: Vec::new(),
            removed: false,
        });
        let siblings = &mut self.elements[parent.0].children;
        let index = index.min(siblings.len());
        siblings.insert(index, id);
        Ok(id)
    }

    /// Detach a child and tombstone it together with its subtree.
    pub fn remove_child(&mut self, parent: ElementId, name: &str) -> Result<()> {
        let id = self.child(parent, name).ok_or_else(|| {
            Error::document(format!("'{}' has no child named '{name}'", self.path(parent)))
        })?;
        self.elements[parent.0].children.retain(|c| *c != id);
        let mut stack = vec![id];
        while let Some(e) = stack.pop() {
            self.elements[e.0].removed = true;
            stack.extend(self.elements[e.0].children.iter().copied());
        }
        Ok(())
    }

    /// Deep copy `source` (possibly from another document) under `parent`.
    pub fn copy_element_from(
        &mut self,
        source_doc: &Document,
        source: ElementId,
        parent: ElementId,
        name: &str,
        index: Option<usize>,
    ) -> Result<ElementId> {
        let src = source_doc.get(source);
        let index = index.unwrap_or(self.children(parent).len());
        let id = self.insert_child_at(parent, index, src.kind, name, &src.category)?;
        self.get_mut(id).attributes = src.attributes.clone();
        for child in source_doc.children(source) {
            self.copy_element_from(source_doc, *child, id, source_doc.name(*child), None)?;
        }
        Ok(id)
    }

    /// Deep copy an element of this document under `parent`.
    pub fn duplicate_element(
        &mut self,
        source: ElementId,
        parent: ElementId,
        name: &str,
        index: Option<usize>,
    ) -> Result<ElementId> {
        let src = self.get(source).clone();
        let index = index.unwrap_or(self.children(parent).len());
        let id = self.insert_child_at(parent, index, src.kind, name, &src.category)?;
        self.get_mut(id).attributes = src.attributes;
        for child in src.children {
            let child_name = self.name(child).to_string();
            self.duplicate_element(child, id, &child_name, None)?;
        }
        Ok(id)
    }

    /// A name not yet used among `parent`'s children: invalid characters become
    /// `_` and a trailing number is incremented until the name is free.
    pub fn create_valid_child_name(&self, parent: ElementId, name: &str) -> String {
        let mut name = sanitize_name(name);
        while self.child(parent, &name).is_some() {
            name = increment_name(&name);
        }
        name
    }

    // Convenience constructors.

    pub fn add_node_def(&mut self, name: &str, node: &str, ty: &str) -> Result<ElementId> {
        let root = self.root;
        let id = self.add_child(root, ElementKind::NodeDef, name, ElementKind::NodeDef.as_str())?;
        self.set_attribute(id, attr::NODE, node);
        self.set_attribute(id, attr::TYPE, ty);
        Ok(id)
    }

    pub fn add_node_graph(&mut self, name: &str) -> Result<ElementId> {
        let root = self.root;
        self.add_child(root, ElementKind::NodeGraph, name, ElementKind::NodeGraph.as_str())
    }

    pub fn add_implementation(&mut self, name: &str, node_def: &str, target: &str) -> Result<ElementId> {
        let root = self.root;
        let id = self.add_child(
            root,
            ElementKind::Implementation,
            name,
            ElementKind::Implementation.as_str(),
        )?;
        self.set_attribute(id, attr::NODE_DEF, node_def);
        if !target.is_empty() {
            self.set_attribute(id, attr::TARGET, target);
        }
        Ok(id)
    }

    pub fn add_node(&mut self, parent: ElementId, category: &str, name: &str, ty: &str) -> Result<ElementId> {
        let id = self.add_child(parent, ElementKind::Node, name, category)?;
        self.set_attribute(id, attr::TYPE, ty);
        Ok(id)
    }

    pub fn add_input(&mut self, parent: ElementId, name: &str, ty: &str) -> Result<ElementId> {
        let id = self.add_child(parent, ElementKind::Input, name, ElementKind::Input.as_str())?;
        self.set_attribute(id, attr::TYPE, ty);
        Ok(id)
    }

    pub fn add_parameter(&mut self, parent: ElementId, name: &str, ty: &str) -> Result<ElementId> {
        let id = self.add_child(
            parent,
            ElementKind::Parameter,
            name,
            ElementKind::Parameter.as_str(),
        )?;
        self.set_attribute(id, attr::TYPE, ty);
        Ok(id)
    }

    pub fn add_output(&mut self, parent: ElementId, name: &str, ty: &str) -> Result<ElementId> {
        let id = self.add_child(parent, ElementKind::Output, name, ElementKind::Output.as_str())?;
        self.set_attribute(id, attr::TYPE, ty);
        Ok(id)
    }

    /// Add an input carrying a literal value.
    pub fn add_value_input(
        &mut self,
        node: ElementId,
        name: &str,
        ty: &str,
        value: &str,
    ) -> Result<ElementId> {
        let id = self.add_input(node, name, ty)?;
        self.set_attribute(id, attr::VALUE, value);
        Ok(id)
    }

    /// Add an input connected to `upstream`'s default output.
    pub fn add_connected_input(
        &mut self,
        node: ElementId,
        name: &str,
        ty: &str,
        upstream: &str,
    ) -> Result<ElementId> {
        let id = self.add_input(node, name, ty)?;
        self.set_attribute(id, attr::NODE_NAME, upstream);
        Ok(id)
    }

    /// Root-level elements of a kind, in document order.
    pub fn node_defs(&self) -> Vec<ElementId> {
        self.children_of_kind(self.root, ElementKind::NodeDef)
    }

    pub fn node_graphs(&self) -> Vec<ElementId> {
        self.children_of_kind(self.root, ElementKind::NodeGraph)
    }

    pub fn implementations(&self) -> Vec<ElementId> {
        self.children_of_kind(self.root, ElementKind::Implementation)
    }

    pub fn nodes(&self, parent: ElementId) -> Vec<ElementId> {
        self.children_of_kind(parent, ElementKind::Node)
    }

    pub fn outputs(&self, parent: ElementId) -> Vec<ElementId> {
        self.children_of_kind(parent, ElementKind::Output)
    }

    /// Inputs and parameters of an element, in child order.
    pub fn inputs(&self, parent: ElementId) -> Vec<ElementId> {
        self.children(parent)
            .iter()
            .copied()
            .filter(|c| self.kind(*c).is_input_like())
            .collect()
    }

    pub fn input(&self, parent: ElementId, name: &str) -> Option<ElementId> {
        self.child(parent, name)
            .filter(|c| self.kind(*c).is_input_like())
    }

    pub fn node_def(&self, name: &str) -> Option<ElementId> {
        self.child(self.root, name)
            .filter(|c| self.kind(*c) == ElementKind::NodeDef)
    }

    /// Chain of node definitions from `node_def` through its `inherit` ancestors.
    pub fn inheritance_chain(&self, node_def: ElementId) -> Result<Vec<ElementId>> {
        let mut chain = vec![node_def];
        let mut seen: HashSet<ElementId> = HashSet::from([node_def]);
        let mut cur = node_def;
        while let Some(base) = self.attribute(cur, attr::INHERIT) {
            let base_id = self.node_def(base).ok_or_else(|| {
                Error::document(format!(
                    "nodedef '{}' inherits from unknown nodedef '{base}'",
                    self.name(cur)
                ))
            })?;
            if !seen.insert(base_id) {
                return Err(Error::FoundCycle(format!(
                    "inheritance cycle at nodedef '{}'",
                    self.name(base_id)
                )));
            }
            chain.push(base_id);
            cur = base_id;
        }
        Ok(chain)
    }

    /// Own inputs first, then inherited inputs that are not overridden.
    pub fn active_inputs(&self, node_def: ElementId) -> Result<Vec<ElementId>> {
        let mut names = HashSet::new();
        let mut out = Vec::new();
        for def in self.inheritance_chain(node_def)? {
            for input in self.inputs(def) {
                if names.insert(self.name(input).to_string()) {
                    out.push(input);
                }
            }
        }
        Ok(out)
    }

    pub fn active_input(&self, node_def: ElementId, name: &str) -> Result<Option<ElementId>> {
        Ok(self
            .active_inputs(node_def)?
            .into_iter()
            .find(|i| self.name(*i) == name))
    }

    /// Outputs of a node definition, inherited ones included.
    pub fn active_outputs(&self, node_def: ElementId) -> Result<Vec<ElementId>> {
        let mut names = HashSet::new();
        let mut out = Vec::new();
        for def in self.inheritance_chain(node_def)? {
            for output in self.outputs(def) {
                if names.insert(self.name(output).to_string()) {
                    out.push(output);
                }
            }
        }
        Ok(out)
    }

    /// Resolve the node definition a node instance is bound to.
    ///
    /// An explicit `nodedef` attribute wins. Otherwise candidates share the node
    /// category and must agree on output type and on the type of every input the
    /// instance declares.
    pub fn node_def_for(&self, node: ElementId) -> Result<ElementId> {
        if let Some(explicit) = self.attribute(node, attr::NODE_DEF) {
            return self.node_def(explicit).ok_or_else(|| {
                Error::NoImplementation(format!(
                    "node '{}' references unknown nodedef '{explicit}'",
                    self.path(node)
                ))
            });
        }
        let category = &self.get(node).category;
        let candidates: Vec<ElementId> = self
            .node_defs()
            .into_iter()
            .filter(|d| self.attribute(*d, attr::NODE) == Some(category.as_str()))
            .collect();
        if candidates.is_empty() {
            return Err(Error::NoImplementation(format!(
                "no nodedef for node '{}' of category '{category}'",
                self.path(node)
            )));
        }
        let node_type = self.type_name(node);
        for def in &candidates {
            if !node_type.is_empty() && self.type_name(*def) != node_type {
                continue;
            }
            let mut matches = true;
            for input in self.inputs(node) {
                let ty = self.type_name(input);
                if ty.is_empty() {
                    continue;
                }
                match self.active_input(*def, self.name(input))? {
                    Some(def_input) if self.type_name(def_input) == ty => {}
                    _ => {
                        matches = false;
                        break;
                    }
                }
            }
            if matches {
                return Ok(*def);
            }
        }
        Err(Error::TypeMismatch(format!(
            "node '{}' of category '{category}' and type '{node_type}' matches no nodedef by input types",
            self.path(node)
        )))
    }

    /// The implementation or node graph bound to a node definition for a target.
    /// An exact target match is preferred over an untargeted one.
    pub fn implementation_for(&self, node_def: ElementId, target: &str) -> Option<ElementId> {
        let def_name = self.name(node_def);
        let mut fallback = None;
        for id in self.children(self.root) {
            let kind = self.kind(*id);
            if !matches!(kind, ElementKind::Implementation | ElementKind::NodeGraph) {
                continue;
            }
            if self.attribute(*id, attr::NODE_DEF) != Some(def_name) {
                continue;
            }
            match self.attribute(*id, attr::TARGET) {
                Some(t) if t == target => return Some(*id),
                None if fallback.is_none() => fallback = Some(*id),
                _ => {}
            }
        }
        fallback
    }

    /// The element that scopes sibling lookups for a port: a node input resolves
    /// `nodename` among the node's siblings, a graph output among its own siblings.
    fn connection_scope(&self, port: ElementId) -> Option<ElementId> {
        let owner = self.parent(port)?;
        match self.kind(owner) {
            ElementKind::Node => self.parent(owner),
            _ => Some(owner),
        }
    }

    /// The node a port is connected to through `nodename`, if any.
    pub fn connected_node(&self, port: ElementId) -> Result<Option<ElementId>> {
        let Some(node_name) = self.attribute(port, attr::NODE_NAME) else {
            return Ok(None);
        };
        let scope = self
            .connection_scope(port)
            .ok_or_else(|| Error::document(format!("port '{}' has no owner", self.path(port))))?;
        self.child(scope, node_name)
            .filter(|c| self.kind(*c) == ElementKind::Node)
            .map(Some)
            .ok_or_else(|| {
                Error::document(format!(
                    "'{}' references missing node '{node_name}'",
                    self.path(port)
                ))
            })
    }

    /// The interface port an input is bound to through `interfacename`: the
    /// enclosing graph's own input, or the matching input of the graph's nodedef.
    pub fn interface_input(&self, port: ElementId) -> Result<Option<ElementId>> {
        let Some(iface) = self.attribute(port, attr::INTERFACE_NAME) else {
            return Ok(None);
        };
        let graph = self
            .connection_scope(port)
            .filter(|g| self.kind(*g) == ElementKind::NodeGraph)
            .ok_or_else(|| {
                Error::document(format!(
                    "'{}' uses interfacename '{iface}' outside a node graph",
                    self.path(port)
                ))
            })?;
        if let Some(own) = self.input(graph, iface) {
            return Ok(Some(own));
        }
        if let Some(def) = self
            .attribute(graph, attr::NODE_DEF)
            .and_then(|d| self.node_def(d))
        {
            if let Some(input) = self.active_input(def, iface)? {
                return Ok(Some(input));
            }
        }
        Err(Error::document(format!(
            "'{}' references unknown interface input '{iface}' of graph '{}'",
            self.path(port),
            self.name(graph)
        )))
    }

    /// Copy definitions, implementations, graphs and sources from a library
    /// document. Elements whose names already exist are kept as they are.
    pub fn import_library(&mut self, library: &Document) -> Result<()> {
        let root = self.root;
        for id in library.children(library.root()).to_vec() {
            let kind = library.kind(id);
            if !matches!(
                kind,
                ElementKind::NodeDef | ElementKind::Implementation | ElementKind::NodeGraph
            ) {
                continue;
            }
            let name = library.name(id);
            if self.child(root, name).is_some() {
                continue;
            }
            self.copy_element_from(library, id, root, name, None)?;
        }
        for (file, text) in &library.sources {
            self.sources
                .entry(file.clone())
                .or_insert_with(|| text.clone());
        }
        Ok(())
    }
}

/// Replace characters that are not valid in element names with `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// `node` -> `node2`, `node7` -> `node8`.
fn increment_name(name: &str) -> String {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &name[stem.len()..];
    match digits.parse::<u64>() {
        Ok(n) => format!("{stem}{}", n + 1),
        Err(_) => format!("{name}2"),
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// Nodedefs for `constant` and `add` over color3, enough for small graphs.
    pub fn doc_with_defs() -> Document {
        let mut doc = Document::new();
        let c = doc.add_node_def("ND_constant_color3", "constant", "color3").unwrap();
        doc.add_value_input(c, "value", "color3", "0, 0, 0").unwrap();
        doc.add_output(c, "out", "color3").unwrap();
        let a = doc.add_node_def("ND_add_color3", "add", "color3").unwrap();
        doc.add_value_input(a, "in1", "color3", "0, 0, 0").unwrap();
        doc.add_value_input(a, "in2", "color3", "0, 0, 0").unwrap();
        doc.add_output(a, "out", "color3").unwrap();
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::doc_with_defs;
    use super::*;

    #[test]
    fn duplicate_child_names_are_rejected() {
        let mut doc = Document::new();
        let g = doc.add_node_graph("g").unwrap();
        doc.add_node(g, "constant", "c", "color3").unwrap();
        assert!(matches!(
            doc.add_node(g, "constant", "c", "color3"),
            Err(Error::Document(_))
        ));
    }

    #[test]
    fn valid_child_names_increment_trailing_numbers() {
        let mut doc = Document::new();
        let g = doc.add_node_graph("g").unwrap();
        doc.add_node(g, "constant", "add", "color3").unwrap();
        doc.add_node(g, "constant", "mix3", "color3").unwrap();
        assert_eq!(doc.create_valid_child_name(g, "add"), "add2");
        assert_eq!(doc.create_valid_child_name(g, "mix3"), "mix4");
        assert_eq!(doc.create_valid_child_name(g, "my node"), "my_node");
    }

    #[test]
    fn node_def_lookup_checks_types() {
        let mut doc = doc_with_defs();
        let g = doc.add_node_graph("g").unwrap();
        let ok = doc.add_node(g, "add", "a", "color3").unwrap();
        doc.add_value_input(ok, "in1", "color3", "1, 1, 1").unwrap();
        assert_eq!(doc.node_def_for(ok).unwrap(), doc.node_def("ND_add_color3").unwrap());

        let bad = doc.add_node(g, "add", "b", "color3").unwrap();
        doc.add_value_input(bad, "in1", "float", "1").unwrap();
        assert!(matches!(doc.node_def_for(bad), Err(Error::TypeMismatch(_))));

        let missing = doc.add_node(g, "noise", "n", "float").unwrap();
        assert!(matches!(doc.node_def_for(missing), Err(Error::NoImplementation(_))));
    }

    #[test]
    fn inheritance_contributes_inputs_and_detects_cycles() {
        let mut doc = Document::new();
        let base = doc.add_node_def("ND_base", "base", "float").unwrap();
        doc.add_value_input(base, "a", "float", "1").unwrap();
        let derived = doc.add_node_def("ND_derived", "derived", "float").unwrap();
        doc.add_value_input(derived, "b", "float", "2").unwrap();
        doc.set_attribute(derived, attr::INHERIT, "ND_base");
        let names: Vec<_> = doc
            .active_inputs(derived)
            .unwrap()
            .into_iter()
            .map(|i| doc.name(i).to_string())
            .collect();
        assert_eq!(names, ["b", "a"]);

        doc.set_attribute(base, attr::INHERIT, "ND_derived");
        assert!(matches!(doc.active_inputs(derived), Err(Error::FoundCycle(_))));
    }

    #[test]
    fn implementation_prefers_exact_target() {
        let mut doc = doc_with_defs();
        doc.add_implementation("IM_any", "ND_add_color3", "").unwrap();
        let glsl = doc.add_implementation("IM_glsl", "ND_add_color3", "genglsl").unwrap();
        let def = doc.node_def("ND_add_color3").unwrap();
        assert_eq!(doc.implementation_for(def, "genglsl"), Some(glsl));
        assert_eq!(
            doc.implementation_for(def, "genosl"),
            doc.child(doc.root(), "IM_any")
        );
    }

    #[test]
    fn removal_detaches_subtree() {
        let mut doc = Document::new();
        let g = doc.add_node_graph("g").unwrap();
        let n = doc.add_node(g, "constant", "c", "color3").unwrap();
        let i = doc.add_value_input(n, "value", "color3", "1, 1, 1").unwrap();
        doc.remove_child(g, "c").unwrap();
        assert!(doc.nodes(g).is_empty());
        assert!(!doc.contains(n));
        assert!(!doc.contains(i));
    }
}
