//! Generator-side mirror of a document graph.
//!
//! Rebuilt from the document on every `generate()` call and owned by the
//! resulting [`Shader`](super::Shader). Nodes live in an arena kept in
//! topological order once the graph is finalized.

use std::collections::{BTreeSet, HashMap};
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;

use log::{debug, warn};

use crate::document::{Document, ElementId, ElementKind, attr, traverse_graph};
use crate::error::{Error, Result};
use crate::types::{TypeDesc, names};
use crate::value::Value;

use super::context::{GenContext, ShaderInterfaceType};
use super::nodes::ShaderNodeImpl;

/// Semantic role flags of a shader node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Classification(u32);

impl Classification {
    pub const NONE: Self = Self(0);
    pub const TEXTURE: Self = Self(1 << 0);
    pub const CLOSURE: Self = Self(1 << 1);
    pub const SHADER: Self = Self(1 << 2);
    pub const MATERIAL: Self = Self(1 << 3);
    pub const FILETEXTURE: Self = Self(1 << 4);
    pub const CONDITIONAL: Self = Self(1 << 5);
    pub const CONSTANT: Self = Self(1 << 6);
    pub const BSDF: Self = Self(1 << 7);
    pub const BSDF_R: Self = Self(1 << 8);
    pub const BSDF_T: Self = Self(1 << 9);
    pub const EDF: Self = Self(1 << 10);
    pub const VDF: Self = Self(1 << 11);
    pub const SURFACE: Self = Self(1 << 12);
    pub const VOLUME: Self = Self(1 << 13);
    pub const LIGHT: Self = Self(1 << 14);
    pub const SAMPLE2D: Self = Self(1 << 15);
    pub const SAMPLE3D: Self = Self(1 << 16);
    pub const CONVOLUTION2D: Self = Self(1 << 17);
    pub const IFELSE: Self = Self(1 << 18);
    pub const SWITCH: Self = Self(1 << 19);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every flag of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Classification {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Classification {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScopeKind {
    #[default]
    Unknown,
    Global,
    Single,
    Multiple,
}

/// Which conditional branches, if any, exclusively use a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScopeInfo {
    pub kind: ScopeKind,
    /// Arena index of the conditional node for `Single` scopes.
    pub conditional_node: Option<usize>,
    pub condition_bitmask: u32,
    pub full_condition_mask: u32,
}

impl ScopeInfo {
    pub fn global() -> Self {
        ScopeInfo {
            kind: ScopeKind::Global,
            ..Default::default()
        }
    }

    /// Narrow the scope when passing through branch `branch` of `node`.
    pub fn adjust_at_conditional_input(&mut self, node: usize, branch: usize, full_mask: u32) {
        if self.kind == ScopeKind::Global
            || (self.kind == ScopeKind::Single && self.condition_bitmask == self.full_condition_mask)
        {
            self.kind = ScopeKind::Single;
            self.conditional_node = Some(node);
            self.condition_bitmask = 1u32.checked_shl(branch as u32).unwrap_or(0);
            self.full_condition_mask = full_mask;
        } else if self.kind == ScopeKind::Single {
            self.kind = ScopeKind::Multiple;
            self.conditional_node = None;
        }
    }

    /// Combine the scope reaching a node through another downstream path.
    pub fn merge(&mut self, from: &ScopeInfo) {
        if self.kind == ScopeKind::Unknown || from.kind == ScopeKind::Global {
            *self = *from;
        } else if self.kind == ScopeKind::Global {
        } else if self.kind == ScopeKind::Single
            && from.kind == ScopeKind::Single
            && self.conditional_node == from.conditional_node
        {
            self.condition_bitmask |= from.condition_bitmask;
            // Needed by every branch, so no longer conditional.
            if self.condition_bitmask == self.full_condition_mask {
                *self = ScopeInfo::global();
            }
        } else {
            self.kind = ScopeKind::Multiple;
            self.conditional_node = None;
        }
    }

    pub fn used_by_branch(&self, branch: usize) -> bool {
        branch < 32 && self.condition_bitmask & (1 << branch) != 0
    }
}

/// Source of a connected input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connection {
    Node { node: usize, output: usize },
    /// Graph input socket index.
    Socket(usize),
}

#[derive(Clone, Debug)]
pub struct ShaderInput {
    pub name: String,
    pub ty: TypeDesc,
    pub value: Option<Value>,
    pub connection: Option<Connection>,
    pub channels: Option<String>,
    pub path: String,
    pub enum_names: Option<String>,
    pub uniform: bool,
    default_geom_prop: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ShaderOutput {
    pub name: String,
    pub ty: TypeDesc,
    pub variable: String,
}

#[derive(Clone, Debug)]
pub struct ShaderNode {
    pub name: String,
    pub category: String,
    pub node_def: String,
    pub classification: Classification,
    pub inputs: Vec<ShaderInput>,
    pub outputs: Vec<ShaderOutput>,
    pub imp: Rc<dyn ShaderNodeImpl>,
    pub scope: ScopeInfo,
}

impl ShaderNode {
    /// Build a node from its definition, taking values and channels from an
    /// optional document instance.
    pub fn create(
        doc: &Document,
        node_def: ElementId,
        instance: Option<ElementId>,
        name: &str,
        ctx: &mut GenContext<'_>,
    ) -> Result<ShaderNode> {
        let target = ctx.generator().target();
        let imp_el = doc.implementation_for(node_def, target).ok_or_else(|| {
            Error::NoImplementation(format!(
                "no implementation of nodedef '{}' for node '{name}' on target '{target}'",
                doc.name(node_def)
            ))
        })?;
        let imp = ctx.get_implementation(doc, imp_el)?;
        let types = ctx.types();
        let syntax = ctx.syntax();

        let mut inputs = Vec::new();
        for def_input in doc.active_inputs(node_def)? {
            let input_name = doc.name(def_input);
            let mut ty = types.get(doc.type_name(def_input))?;
            let inst = instance.and_then(|n| doc.input(n, input_name));
            let bound = inst.is_some_and(|i| {
                doc.attribute(i, attr::VALUE).is_some()
                    || doc.attribute(i, attr::NODE_NAME).is_some()
                    || doc.attribute(i, attr::INTERFACE_NAME).is_some()
            });
            let raw = inst
                .and_then(|i| doc.attribute(i, attr::VALUE))
                .or_else(|| doc.attribute(def_input, attr::VALUE));
            let enum_names = doc.attribute(def_input, attr::ENUM).map(str::to_string);
            let mut value = match raw {
                Some(text) if ty.is_editable() => Some(Value::parse(&ty, text)?),
                None if matches!(ty.name(), names::STRING | names::FILENAME) => {
                    Some(Value::parse(&ty, "")?)
                }
                _ => None,
            };
            if ty.name() == names::STRING && !syntax.type_supported(&ty) {
                let text = raw.unwrap_or("");
                if let Some(remapped) = syntax.remap_enumeration(&ty, text, enum_names.as_deref())? {
                    ty = types.get(names::INTEGER)?;
                    value = Some(remapped);
                }
            }
            inputs.push(ShaderInput {
                name: input_name.to_string(),
                ty,
                value,
                connection: None,
                channels: inst
                    .and_then(|i| doc.attribute(i, attr::CHANNELS))
                    .map(str::to_string),
                path: doc.path(inst.unwrap_or(def_input)),
                enum_names,
                uniform: doc.attribute(def_input, attr::UNIFORM) == Some("true"),
                default_geom_prop: if bound {
                    None
                } else {
                    doc.attribute(def_input, attr::DEFAULT_GEOM_PROP)
                        .map(str::to_string)
                },
            });
        }
        if let Some(inst) = instance {
            for i in doc.inputs(inst) {
                if !inputs.iter().any(|x| x.name == doc.name(i)) {
                    warn!(
                        "input '{}' is not declared by nodedef '{}', ignoring it",
                        doc.path(i),
                        doc.name(node_def)
                    );
                }
            }
        }

        let mut outputs = Vec::new();
        for out in doc.active_outputs(node_def)? {
            outputs.push(ShaderOutput {
                name: doc.name(out).to_string(),
                ty: types.get(doc.type_name(out))?,
                variable: String::new(),
            });
        }
        if outputs.is_empty() {
            outputs.push(ShaderOutput {
                name: "out".to_string(),
                ty: types.get(doc.type_name(node_def))?,
                variable: String::new(),
            });
        }

        let mut node = ShaderNode {
            name: syntax.make_valid_name(name),
            category: doc.attribute(node_def, attr::NODE).unwrap_or("").to_string(),
            node_def: doc.name(node_def).to_string(),
            classification: classify(doc, node_def, &outputs[0].ty),
            inputs,
            outputs,
            imp: imp.clone(),
            scope: ScopeInfo::default(),
        };
        imp.add_classification(&mut node);
        Ok(node)
    }

    pub fn has_classification(&self, c: Classification) -> bool {
        self.classification.contains(c)
    }

    pub fn input(&self, name: &str) -> Option<&ShaderInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ShaderOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Used from exactly one conditional node's branches, and nowhere else.
    pub fn referenced_conditionally(&self) -> bool {
        self.scope.kind == ScopeKind::Single && self.scope.condition_bitmask != 0
    }
}

fn classify(doc: &Document, node_def: ElementId, out_ty: &TypeDesc) -> Classification {
    let node = doc.attribute(node_def, attr::NODE).unwrap_or("");
    let group = doc.attribute(node_def, attr::NODE_GROUP).unwrap_or("");
    let mut c = match out_ty.name() {
        names::SURFACESHADER => Classification::SURFACE | Classification::SHADER,
        names::LIGHTSHADER => Classification::LIGHT | Classification::SHADER,
        names::VOLUMESHADER => Classification::VOLUME | Classification::SHADER,
        names::DISPLACEMENTSHADER => Classification::SHADER,
        names::MATERIAL => Classification::MATERIAL,
        names::BSDF => {
            let mut c = Classification::BSDF | Classification::CLOSURE;
            match doc.attribute(node_def, attr::BSDF) {
                Some("R") => c |= Classification::BSDF_R,
                Some("T") => c |= Classification::BSDF_T,
                _ => {}
            }
            c
        }
        names::EDF => Classification::EDF | Classification::CLOSURE,
        names::VDF => Classification::VDF | Classification::CLOSURE,
        _ => match node {
            "constant" => Classification::TEXTURE | Classification::CONSTANT,
            "compare" => Classification::TEXTURE | Classification::CONDITIONAL | Classification::IFELSE,
            "switch" => Classification::TEXTURE | Classification::CONDITIONAL | Classification::SWITCH,
            _ if group == "texture2d" || group == "texture3d" => {
                Classification::TEXTURE | Classification::FILETEXTURE
            }
            _ => Classification::TEXTURE,
        },
    };
    match group {
        "texture2d" => c |= Classification::SAMPLE2D,
        "texture3d" => c |= Classification::SAMPLE3D,
        "convolution2d" => c |= Classification::CONVOLUTION2D,
        _ => {}
    }
    c
}

/// Input or output socket on the graph boundary.
#[derive(Clone, Debug)]
pub struct GraphSocket {
    pub name: String,
    pub ty: TypeDesc,
    pub value: Option<Value>,
    pub variable: String,
    pub path: String,
    /// Set on output sockets only.
    pub connection: Option<Connection>,
    pub channels: Option<String>,
}

impl GraphSocket {
    fn new(name: &str, ty: TypeDesc) -> Self {
        GraphSocket {
            name: name.to_string(),
            ty,
            value: None,
            variable: String::new(),
            path: String::new(),
            connection: None,
            channels: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShaderGraph {
    pub name: String,
    nodes: Vec<ShaderNode>,
    input_sockets: Vec<GraphSocket>,
    output_sockets: Vec<GraphSocket>,
    classification: Classification,
}

/// Geometric nodes instantiated for inputs that declare a `defaultgeomprop`.
fn geom_prop_node(geomprop: &str) -> Option<(&'static str, &'static str, &'static str, &'static str)> {
    match geomprop {
        "UV0" => Some(("texcoord", names::VECTOR2, "index", "0")),
        "Nworld" => Some(("normal", names::VECTOR3, "space", "world")),
        "Nobject" => Some(("normal", names::VECTOR3, "space", "object")),
        "Pworld" => Some(("position", names::VECTOR3, "space", "world")),
        "Pobject" => Some(("position", names::VECTOR3, "space", "object")),
        _ => None,
    }
}

struct Builder<'d> {
    doc: &'d Document,
    graph: ShaderGraph,
    created: HashMap<ElementId, usize>,
}

impl Builder<'_> {
    fn ensure_node(&mut self, element: ElementId, ctx: &mut GenContext<'_>) -> Result<(usize, bool)> {
        if let Some(i) = self.created.get(&element) {
            return Ok((*i, false));
        }
        let def = self.doc.node_def_for(element)?;
        let node = ShaderNode::create(self.doc, def, Some(element), self.doc.name(element), ctx)?;
        let i = self.graph.add_node(node);
        self.created.insert(element, i);
        Ok((i, true))
    }

    fn output_index(&self, node: usize, port: ElementId) -> Result<usize> {
        let n = &self.graph.nodes[node];
        match self.doc.attribute(port, attr::OUTPUT) {
            None => Ok(0),
            Some(name) => n.outputs.iter().position(|o| o.name == name).ok_or_else(|| {
                Error::document(format!(
                    "'{}' connects to missing output '{name}' of node '{}'",
                    self.doc.path(port),
                    n.name
                ))
            }),
        }
    }

    fn input_socket(&mut self, port: ElementId, ctx: &GenContext<'_>) -> Result<usize> {
        let name = self.doc.name(port);
        if let Some(i) = self.graph.input_sockets.iter().position(|s| s.name == name) {
            return Ok(i);
        }
        let ty = ctx.types().get(self.doc.type_name(port))?;
        let mut socket = GraphSocket::new(name, ty.clone());
        socket.path = self.doc.path(port);
        if let Some(text) = self.doc.attribute(port, attr::VALUE) {
            socket.value = Some(Value::parse(&ty, text)?);
        }
        self.graph.input_sockets.push(socket);
        Ok(self.graph.input_sockets.len() - 1)
    }

    /// Walk upstream from `start`, creating nodes and wiring connections.
    fn walk(&mut self, start: ElementId, socket: Option<usize>, ctx: &mut GenContext<'_>) -> Result<()> {
        let doc = self.doc;
        let mut it = traverse_graph(doc, start);
        while let Some(edge) = it.next() {
            let edge = edge?;
            let upstream_kind = doc.kind(edge.upstream);
            let (up_index, fresh) = if upstream_kind == ElementKind::Node {
                let (i, fresh) = self.ensure_node(edge.upstream, ctx)?;
                (Some(i), fresh)
            } else {
                (None, false)
            };

            match (doc.kind(edge.downstream), edge.connecting) {
                (ElementKind::Output, _) => {
                    let (Some(s), Some(up)) = (socket, up_index) else {
                        continue;
                    };
                    let output = self.output_index(up, edge.downstream)?;
                    self.graph.output_sockets[s].connection = Some(Connection::Node { node: up, output });
                }
                (ElementKind::Node, Some(input_el)) => {
                    let (down, _) = self.ensure_node(edge.downstream, ctx)?;
                    let input_name = doc.name(input_el);
                    let Some(ii) = self.graph.nodes[down].input_index(input_name) else {
                        continue;
                    };
                    let connection = match up_index {
                        Some(up) => Connection::Node {
                            node: up,
                            output: self.output_index(up, input_el)?,
                        },
                        None => Connection::Socket(self.input_socket(edge.upstream, ctx)?),
                    };
                    self.graph.nodes[down].inputs[ii].connection = Some(connection);
                }
                _ => {}
            }
            if !fresh {
                it.prune_subgraph();
            }
        }
        Ok(())
    }

    /// Instantiate geometric nodes for unbound inputs with a `defaultgeomprop`.
    fn add_default_geom_props(&mut self, ctx: &mut GenContext<'_>) -> Result<()> {
        let mut shared: HashMap<String, usize> = HashMap::new();
        let count = self.graph.nodes.len();
        for ni in 0..count {
            for ii in 0..self.graph.nodes[ni].inputs.len() {
                let input = &self.graph.nodes[ni].inputs[ii];
                if input.connection.is_some() {
                    continue;
                }
                let Some(gp) = input.default_geom_prop.clone() else {
                    continue;
                };
                let Some((category, ty, param, value)) = geom_prop_node(&gp) else {
                    continue;
                };
                let index = match shared.get(&gp) {
                    Some(i) => *i,
                    None => {
                        let Some(def) = self.doc.node_defs().into_iter().find(|d| {
                            self.doc.attribute(*d, attr::NODE) == Some(category)
                                && self.doc.type_name(*d) == ty
                        }) else {
                            continue;
                        };
                        let mut node = ShaderNode::create(self.doc, def, None, &format!("geomprop_{gp}"), ctx)?;
                        if let Some(p) = node.inputs.iter_mut().find(|i| i.name == param) {
                            let parsed = Value::parse(&p.ty, value).ok();
                            let remapped = p
                                .enum_names
                                .as_deref()
                                .and_then(|e| e.split(',').map(str::trim).position(|x| x == value))
                                .map(|i| Value::Integer(i as i32));
                            p.value = if p.ty.name() == names::INTEGER && remapped.is_some() {
                                remapped
                            } else {
                                parsed.or(remapped)
                            };
                        }
                        let i = self.graph.add_node(node);
                        shared.insert(gp.clone(), i);
                        i
                    }
                };
                let up_ty = self.graph.nodes[index].outputs[0].ty.clone();
                let input = &mut self.graph.nodes[ni].inputs[ii];
                if up_ty == input.ty {
                    input.connection = Some(Connection::Node { node: index, output: 0 });
                }
            }
        }
        Ok(())
    }
}

impl ShaderGraph {
    /// Build the mirror for a node graph, a graph output or a single node.
    pub fn create(doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<ShaderGraph> {
        Self::build(doc, element, ctx, false)
    }

    /// Build the internal graph of a compound implementation. Its interface
    /// is the nodedef's inputs and nothing is published.
    pub fn create_compound(doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<ShaderGraph> {
        Self::build(doc, element, ctx, true)
    }

    fn build(doc: &Document, element: ElementId, ctx: &mut GenContext<'_>, compound: bool) -> Result<ShaderGraph> {
        let mut b = Builder {
            doc,
            graph: ShaderGraph {
                name: doc.name(element).to_string(),
                nodes: Vec::new(),
                input_sockets: Vec::new(),
                output_sockets: Vec::new(),
                classification: Classification::NONE,
            },
            created: HashMap::new(),
        };

        match doc.kind(element) {
            ElementKind::NodeGraph => {
                if compound {
                    if let Some(def) = doc.attribute(element, attr::NODE_DEF).and_then(|d| doc.node_def(d)) {
                        for input in doc.active_inputs(def)? {
                            b.input_socket(input, ctx)?;
                        }
                    }
                }
                for input in doc.inputs(element) {
                    b.input_socket(input, ctx)?;
                }
                let outputs = doc.outputs(element);
                if outputs.is_empty() {
                    return Err(Error::generation(format!(
                        "node graph '{}' has no outputs",
                        doc.path(element)
                    )));
                }
                for out in outputs {
                    let s = b.graph.add_output_socket(doc, out, ctx)?;
                    b.walk(out, Some(s), ctx)?;
                }
            }
            ElementKind::Output => {
                let s = b.graph.add_output_socket(doc, element, ctx)?;
                b.walk(element, Some(s), ctx)?;
            }
            ElementKind::Node => {
                let (node, _) = b.ensure_node(element, ctx)?;
                for output in 0..b.graph.nodes[node].outputs.len() {
                    let out = &b.graph.nodes[node].outputs[output];
                    let mut socket = GraphSocket::new(&out.name, out.ty.clone());
                    socket.path = doc.path(element);
                    socket.connection = Some(Connection::Node { node, output });
                    b.graph.output_sockets.push(socket);
                }
                b.walk(element, None, ctx)?;
            }
            other => {
                return Err(Error::generation(format!(
                    "cannot generate a shader from {} '{}'",
                    other.as_str(),
                    doc.path(element)
                )));
            }
        }

        b.add_default_geom_props(ctx)?;
        let mut graph = b.graph;
        graph.check_connection_types()?;
        if ctx.options.optimize_graph {
            graph.optimize();
        }
        graph.sort_topologically()?;
        if !compound {
            graph.publish_inputs(ctx.options.shader_interface_type);
        }
        graph.set_variable_names(ctx);
        graph.calculate_scopes();
        graph.classification = graph
            .output_sockets
            .iter()
            .filter_map(|s| match s.connection {
                Some(Connection::Node { node, .. }) => Some(graph.nodes[node].classification),
                _ => None,
            })
            .fold(Classification::NONE, |acc, c| acc | c);
        debug!(
            "built shader graph '{}' with {} nodes, {} input sockets",
            graph.name,
            graph.nodes.len(),
            graph.input_sockets.len()
        );
        Ok(graph)
    }

    fn add_node(&mut self, node: ShaderNode) -> usize {
        let mut node = node;
        if self.nodes.iter().any(|n| n.name == node.name) {
            let base = node.name.clone();
            let mut i = 2;
            while self.nodes.iter().any(|n| n.name == format!("{base}{i}")) {
                i += 1;
            }
            node.name = format!("{base}{i}");
        }
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn add_output_socket(&mut self, doc: &Document, out: ElementId, ctx: &GenContext<'_>) -> Result<usize> {
        let ty = ctx.types().get(doc.type_name(out))?;
        let mut socket = GraphSocket::new(doc.name(out), ty.clone());
        socket.path = doc.path(out);
        socket.channels = doc.attribute(out, attr::CHANNELS).map(str::to_string);
        if let Some(text) = doc.attribute(out, attr::VALUE) {
            socket.value = Some(Value::parse(&ty, text)?);
        }
        self.output_sockets.push(socket);
        Ok(self.output_sockets.len() - 1)
    }

    pub fn nodes(&self) -> &[ShaderNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &ShaderNode {
        &self.nodes[index]
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn find_node(&self, name: &str) -> Option<&ShaderNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn input_sockets(&self) -> &[GraphSocket] {
        &self.input_sockets
    }

    pub fn output_sockets(&self) -> &[GraphSocket] {
        &self.output_sockets
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn has_classification(&self, c: Classification) -> bool {
        self.classification.contains(c)
    }

    /// Type of whatever feeds a connection.
    pub fn connection_type(&self, connection: Connection) -> &TypeDesc {
        match connection {
            Connection::Node { node, output } => &self.nodes[node].outputs[output].ty,
            Connection::Socket(s) => &self.input_sockets[s].ty,
        }
    }

    fn check_connection_types(&self) -> Result<()> {
        for node in &self.nodes {
            for input in &node.inputs {
                let Some(c) = input.connection else { continue };
                let up = self.connection_type(c);
                if input.channels.is_none() && *up != input.ty {
                    return Err(Error::TypeMismatch(format!(
                        "input '{}' of node '{}' has type '{}' but is connected to type '{}'",
                        input.name, node.name, input.ty, up
                    )));
                }
            }
        }
        for socket in &self.output_sockets {
            let Some(c) = socket.connection else { continue };
            let up = self.connection_type(c);
            if socket.channels.is_none() && *up != socket.ty {
                return Err(Error::TypeMismatch(format!(
                    "output '{}' of graph '{}' has type '{}' but is connected to type '{}'",
                    socket.name, self.name, socket.ty, up
                )));
            }
        }
        Ok(())
    }

    /// Route everything reading `node`'s first output to its input `input`.
    fn bypass(&mut self, node: usize, input: usize) {
        let source = self.nodes[node].inputs[input].clone();
        if source.channels.is_some() {
            return;
        }
        let target = Some(Connection::Node { node, output: 0 });
        let rewire = |connection: &mut Option<Connection>, value: &mut Option<Value>| {
            *connection = source.connection;
            if source.connection.is_none() {
                *value = source.value.clone();
            }
        };
        for (ni, n) in self.nodes.iter_mut().enumerate() {
            if ni == node {
                continue;
            }
            for i in n.inputs.iter_mut() {
                if i.connection == target && i.channels.is_none() {
                    rewire(&mut i.connection, &mut i.value);
                }
            }
        }
        for s in self.output_sockets.iter_mut() {
            if s.connection == target && s.channels.is_none() {
                rewire(&mut s.connection, &mut s.value);
            }
        }
    }

    /// Bypass constants and statically decidable conditionals, then drop
    /// nodes no output depends on.
    fn optimize(&mut self) {
        let mut bypassed = 0usize;
        for ni in 0..self.nodes.len() {
            let node = &self.nodes[ni];
            let branch = if node.has_classification(Classification::CONSTANT) {
                node.input_index("value")
            } else if node.has_classification(Classification::IFELSE) {
                let (Some(intest), Some(cutoff)) = (node.input("intest"), node.input("cutoff")) else {
                    continue;
                };
                let (Some(a), Some(b)) = (
                    self.static_value(intest).and_then(Value::as_float),
                    self.static_value(cutoff).and_then(Value::as_float),
                ) else {
                    continue;
                };
                node.input_index(if a <= b { "in1" } else { "in2" })
            } else if node.has_classification(Classification::SWITCH) {
                let Some(which) = node.input("which") else { continue };
                let branches = switch_branches(node);
                if branches.is_empty() {
                    continue;
                }
                let Some(value) = self.static_value(which) else { continue };
                let selected = value.as_integer().unwrap_or(0);
                let clamped = selected.clamp(0, branches.len() as i32 - 1);
                if clamped != selected {
                    warn!(
                        "switch '{}' selector {selected} out of range, clamped to {clamped}",
                        node.name
                    );
                }
                Some(branches[clamped as usize])
            } else {
                None
            };
            if let Some(input) = branch {
                self.bypass(ni, input);
                bypassed += 1;
            }
        }
        let removed = self.remove_unreachable();
        if bypassed + removed > 0 {
            debug!(
                "optimized graph '{}': {bypassed} nodes bypassed, {removed} removed",
                self.name
            );
        }
    }

    /// Value of `input` if it is known before generation: either unconnected
    /// or fed, possibly through a chain, by constant nodes.
    fn static_value<'a>(&'a self, mut input: &'a ShaderInput) -> Option<&'a Value> {
        for _ in 0..=self.nodes.len() {
            match input.connection {
                None => return input.value.as_ref(),
                Some(Connection::Node { node, .. }) => {
                    let up = &self.nodes[node];
                    if !up.has_classification(Classification::CONSTANT) || input.channels.is_some() {
                        return None;
                    }
                    input = up.input("value")?;
                }
                Some(Connection::Socket(_)) => return None,
            }
        }
        None
    }

    fn remove_unreachable(&mut self) -> usize {
        let mut reachable = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self
            .output_sockets
            .iter()
            .filter_map(|s| match s.connection {
                Some(Connection::Node { node, .. }) => Some(node),
                _ => None,
            })
            .collect();
        while let Some(n) = stack.pop() {
            if std::mem::replace(&mut reachable[n], true) {
                continue;
            }
            for i in &self.nodes[n].inputs {
                if let Some(Connection::Node { node, .. }) = i.connection {
                    stack.push(node);
                }
            }
        }
        let order: Vec<usize> = (0..self.nodes.len()).filter(|i| reachable[*i]).collect();
        let removed = self.nodes.len() - order.len();
        if removed > 0 {
            self.reorder(&order);
        }
        removed
    }

    /// Keep only the nodes listed in `order`, in that order, fixing connections.
    fn reorder(&mut self, order: &[usize]) {
        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new, old) in order.iter().enumerate() {
            remap[*old] = new;
        }
        let mut old_nodes: Vec<Option<ShaderNode>> = std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        self.nodes = order.iter().filter_map(|i| old_nodes[*i].take()).collect();
        let fix = |c: &mut Option<Connection>| {
            if let Some(Connection::Node { node, output }) = *c {
                *c = (remap[node] != usize::MAX).then(|| Connection::Node {
                    node: remap[node],
                    output,
                });
            }
        };
        for n in self.nodes.iter_mut() {
            for i in n.inputs.iter_mut() {
                fix(&mut i.connection);
            }
            if let Some(c) = n.scope.conditional_node {
                n.scope.conditional_node = (remap[c] != usize::MAX).then_some(remap[c]);
            }
        }
        for s in self.output_sockets.iter_mut() {
            fix(&mut s.connection);
        }
    }

    /// Kahn sort of the arena; ties keep creation order.
    fn sort_topologically(&mut self) -> Result<()> {
        let n = self.nodes.len();
        let mut indeg = vec![0usize; n];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (ni, node) in self.nodes.iter().enumerate() {
            for i in &node.inputs {
                if let Some(Connection::Node { node: up, .. }) = i.connection {
                    indeg[ni] += 1;
                    outgoing[up].push(ni);
                }
            }
        }
        let mut q: std::collections::VecDeque<usize> = (0..n).filter(|i| indeg[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = q.pop_front() {
            order.push(i);
            for m in &outgoing[i] {
                indeg[*m] -= 1;
                if indeg[*m] == 0 {
                    q.push_back(*m);
                }
            }
        }
        if order.len() != n {
            return Err(Error::FoundCycle(format!(
                "cycle detected in shader graph '{}'",
                self.name
            )));
        }
        self.reorder(&order);
        Ok(())
    }

    /// Turn unconnected node inputs into graph input sockets.
    fn publish_inputs(&mut self, interface: ShaderInterfaceType) {
        for ni in 0..self.nodes.len() {
            for ii in 0..self.nodes[ni].inputs.len() {
                let node = &self.nodes[ni];
                let input = &node.inputs[ii];
                if input.connection.is_some() || !input.ty.is_editable() {
                    continue;
                }
                if interface == ShaderInterfaceType::Reduced && input.ty.name() != names::FILENAME {
                    continue;
                }
                let mut socket = GraphSocket::new(&format!("{}_{}", node.name, input.name), input.ty.clone());
                socket.value = input.value.clone();
                socket.path = input.path.clone();
                let s = match self.input_sockets.iter().position(|x| x.name == socket.name) {
                    Some(s) => s,
                    None => {
                        self.input_sockets.push(socket);
                        self.input_sockets.len() - 1
                    }
                };
                let input = &mut self.nodes[ni].inputs[ii];
                input.connection = Some(Connection::Socket(s));
                input.channels = None;
            }
        }
    }

    fn set_variable_names(&mut self, ctx: &GenContext<'_>) {
        let syntax = ctx.syntax();
        let mut ids = syntax.new_identifier_map();
        for s in self.input_sockets.iter_mut() {
            s.variable = syntax.make_identifier(&s.name, &mut ids);
        }
        for s in self.output_sockets.iter_mut() {
            s.variable = syntax.make_identifier(&s.name, &mut ids);
        }
        for n in self.nodes.iter_mut() {
            for o in n.outputs.iter_mut() {
                o.variable = syntax.make_identifier(&format!("{}_{}", n.name, o.name), &mut ids);
            }
        }
    }

    /// Propagate scope information from the outputs upstream, in reverse
    /// topological order so every downstream user is merged first.
    fn calculate_scopes(&mut self) {
        let n = self.nodes.len();
        let mut used = vec![false; n];
        for s in &self.output_sockets {
            if let Some(Connection::Node { node, .. }) = s.connection {
                self.nodes[node].scope = ScopeInfo::global();
                used[node] = true;
            }
        }
        for ni in (0..n).rev() {
            if !used[ni] {
                continue;
            }
            let node = &self.nodes[ni];
            let branches = conditional_branches(node);
            let full_mask = branches
                .iter()
                .fold(0u32, |m, b| m | 1u32.checked_shl(*b as u32).unwrap_or(0));
            let current = node.scope;
            let mut updates = Vec::new();
            for (ii, input) in node.inputs.iter().enumerate() {
                let Some(Connection::Node { node: up, .. }) = input.connection else {
                    continue;
                };
                let mut scope = current;
                if branches.contains(&ii) {
                    scope.adjust_at_conditional_input(ni, ii, full_mask);
                }
                updates.push((up, scope));
            }
            for (up, scope) in updates {
                self.nodes[up].scope.merge(&scope);
                used[up] = true;
            }
        }
    }

    /// Closure nodes feeding `node` through closure-typed connections.
    pub fn upstream_closures(&self, node: usize) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            for i in &self.nodes[n].inputs {
                if !i.ty.is_closure() {
                    continue;
                }
                if let Some(Connection::Node { node: up, .. }) = i.connection {
                    if found.insert(up) {
                        stack.push(up);
                    }
                }
            }
        }
        found
    }
}

/// Input indices of the branches of a conditional node. Empty otherwise.
pub fn conditional_branches(node: &ShaderNode) -> Vec<usize> {
    if node.has_classification(Classification::IFELSE) {
        ["in1", "in2"].iter().filter_map(|n| node.input_index(n)).collect()
    } else if node.has_classification(Classification::SWITCH) {
        switch_branches(node)
    } else {
        Vec::new()
    }
}

fn switch_branches(node: &ShaderNode) -> Vec<usize> {
    node.inputs
        .iter()
        .enumerate()
        .filter(|(_, i)| i.name != "which")
        .map(|(ii, _)| ii)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_merge_covers_all_branches() {
        let mut a = ScopeInfo::global();
        a.adjust_at_conditional_input(4, 2, 0b1100);
        assert_eq!(a.kind, ScopeKind::Single);
        assert!(a.used_by_branch(2));
        assert!(!a.used_by_branch(3));

        let mut b = ScopeInfo::global();
        b.adjust_at_conditional_input(4, 3, 0b1100);
        let mut merged = ScopeInfo::default();
        merged.merge(&a);
        merged.merge(&b);
        assert_eq!(merged.kind, ScopeKind::Global);
    }

    #[test]
    fn scope_merge_across_conditionals_is_multiple() {
        let mut a = ScopeInfo::global();
        a.adjust_at_conditional_input(1, 2, 0b1100);
        let mut b = ScopeInfo::global();
        b.adjust_at_conditional_input(2, 0, 0b11111);
        a.merge(&b);
        assert_eq!(a.kind, ScopeKind::Multiple);
        assert_eq!(a.conditional_node, None);
    }

    #[test]
    fn branch_beyond_mask_width_is_not_conditional() {
        let mut scope = ScopeInfo::global();
        scope.adjust_at_conditional_input(7, 40, 0b11);
        assert_eq!(scope.kind, ScopeKind::Single);
        assert_eq!(scope.condition_bitmask, 0);
        assert!(!scope.used_by_branch(40));
        assert!(!scope.used_by_branch(8));

        let mut wide = ScopeInfo::global();
        wide.adjust_at_conditional_input(7, 31, 1 << 31);
        assert!(wide.used_by_branch(31));
    }

    #[test]
    fn classification_flags_compose() {
        let c = Classification::BSDF | Classification::CLOSURE | Classification::BSDF_R;
        assert!(c.contains(Classification::BSDF | Classification::CLOSURE));
        assert!(!c.contains(Classification::BSDF_T));
        assert!(c.intersects(Classification::BSDF_T | Classification::BSDF_R));
    }
}
