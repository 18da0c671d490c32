//! JSON exchange format for documents, and the bundled standard library.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Document, ElementId, ElementKind, attr};

const STDLIB_JSON: &str = include_str!("../../assets/stdlib.json");

/// Source files referenced by the standard library implementations.
pub const STDLIB_SOURCES: &[(&str, &str)] = &[
    ("stdlib/genglsl/mx_image.glsl", include_str!("../../assets/stdlib/genglsl/mx_image.glsl")),
    ("stdlib/genglsl/mx_diffuse_brdf.glsl", include_str!("../../assets/stdlib/genglsl/mx_diffuse_brdf.glsl")),
    ("stdlib/genglsl/mx_dielectric_btdf.glsl", include_str!("../../assets/stdlib/genglsl/mx_dielectric_btdf.glsl")),
    ("stdlib/genglsl/mx_dielectric_bsdf.glsl", include_str!("../../assets/stdlib/genglsl/mx_dielectric_bsdf.glsl")),
    ("stdlib/genglsl/mx_uniform_edf.glsl", include_str!("../../assets/stdlib/genglsl/mx_uniform_edf.glsl")),
    ("stdlib/genglsl/mx_point_light.glsl", include_str!("../../assets/stdlib/genglsl/mx_point_light.glsl")),
    ("stdlib/genglsl/mx_directional_light.glsl", include_str!("../../assets/stdlib/genglsl/mx_directional_light.glsl")),
    ("stdlib/genmsl/mx_image.metal", include_str!("../../assets/stdlib/genmsl/mx_image.metal")),
    ("stdlib/genmsl/mx_diffuse_brdf.metal", include_str!("../../assets/stdlib/genmsl/mx_diffuse_brdf.metal")),
    ("stdlib/genmsl/mx_dielectric_btdf.metal", include_str!("../../assets/stdlib/genmsl/mx_dielectric_btdf.metal")),
    ("stdlib/genmsl/mx_dielectric_bsdf.metal", include_str!("../../assets/stdlib/genmsl/mx_dielectric_bsdf.metal")),
    ("stdlib/genmsl/mx_uniform_edf.metal", include_str!("../../assets/stdlib/genmsl/mx_uniform_edf.metal")),
    ("stdlib/genmsl/mx_point_light.metal", include_str!("../../assets/stdlib/genmsl/mx_point_light.metal")),
    ("stdlib/genmsl/mx_directional_light.metal", include_str!("../../assets/stdlib/genmsl/mx_directional_light.metal")),
    ("stdlib/genosl/mx_image.osl", include_str!("../../assets/stdlib/genosl/mx_image.osl")),
    ("stdlib/genosl/mx_texcoord.osl", include_str!("../../assets/stdlib/genosl/mx_texcoord.osl")),
    ("stdlib/genosl/mx_diffuse_brdf.osl", include_str!("../../assets/stdlib/genosl/mx_diffuse_brdf.osl")),
    ("stdlib/genosl/mx_dielectric_btdf.osl", include_str!("../../assets/stdlib/genosl/mx_dielectric_btdf.osl")),
    ("stdlib/genosl/mx_dielectric_bsdf.osl", include_str!("../../assets/stdlib/genosl/mx_dielectric_bsdf.osl")),
    ("stdlib/genosl/mx_uniform_edf.osl", include_str!("../../assets/stdlib/genosl/mx_uniform_edf.osl")),
    ("stdlib/genosl/mx_surface.osl", include_str!("../../assets/stdlib/genosl/mx_surface.osl")),
];

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDesc {
    #[serde(default)]
    pub node_defs: Vec<NodeDefDesc>,
    #[serde(default)]
    pub implementations: Vec<ImplementationDesc>,
    #[serde(default)]
    pub node_graphs: Vec<NodeGraphDesc>,
    #[serde(default)]
    pub nodes: Vec<NodeDesc>,
    #[serde(default)]
    pub outputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeDefDesc {
    pub name: String,
    pub node: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodegroup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsdf: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImplementationDesc {
    pub name: String,
    pub nodedef: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Inline expression template, e.g. `{{in1}} + {{in2}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcecode: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeGraphDesc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodedef: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortDesc>,
    #[serde(default)]
    pub nodes: Vec<NodeDesc>,
    #[serde(default)]
    pub outputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeDesc {
    pub name: String,
    pub category: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodedef: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PortDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfacename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaultgeomprop: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

fn apply_attrs(doc: &mut Document, id: ElementId, known: &[(&str, &Option<String>)], extra: &BTreeMap<String, String>) {
    for (key, value) in extra {
        doc.set_attribute(id, key, value.clone());
    }
    for (key, value) in known {
        if let Some(v) = value {
            doc.set_attribute(id, key, v.clone());
        }
    }
}

fn add_ports(
    doc: &mut Document,
    parent: ElementId,
    kind: ElementKind,
    ports: &[PortDesc],
) -> crate::error::Result<()> {
    for p in ports {
        let id = doc.add_child(parent, kind, &p.name, kind.as_str())?;
        doc.set_attribute(id, attr::TYPE, p.ty.clone());
        apply_attrs(
            doc,
            id,
            &[
                (attr::VALUE, &p.value),
                (attr::NODE_NAME, &p.nodename),
                (attr::OUTPUT, &p.output),
                (attr::INTERFACE_NAME, &p.interfacename),
                (attr::CHANNELS, &p.channels),
                (attr::ENUM, &p.enum_values),
                (attr::DEFAULT_GEOM_PROP, &p.defaultgeomprop),
            ],
            &p.attributes,
        );
    }
    Ok(())
}

fn add_node_desc(doc: &mut Document, parent: ElementId, n: &NodeDesc) -> crate::error::Result<()> {
    let id = doc.add_node(parent, &n.category, &n.name, &n.ty)?;
    apply_attrs(doc, id, &[(attr::NODE_DEF, &n.nodedef)], &n.attributes);
    add_ports(doc, id, ElementKind::Input, &n.inputs)?;
    add_ports(doc, id, ElementKind::Parameter, &n.parameters)?;
    add_ports(doc, id, ElementKind::Output, &n.outputs)?;
    Ok(())
}

impl DocumentDesc {
    pub fn into_document(self) -> crate::error::Result<Document> {
        let mut doc = Document::new();
        let root = doc.root();
        for d in &self.node_defs {
            let id = doc.add_node_def(&d.name, &d.node, &d.ty)?;
            apply_attrs(
                &mut doc,
                id,
                &[
                    (attr::NODE_GROUP, &d.nodegroup),
                    (attr::INHERIT, &d.inherit),
                    (attr::BSDF, &d.bsdf),
                ],
                &d.attributes,
            );
            add_ports(&mut doc, id, ElementKind::Input, &d.inputs)?;
            add_ports(&mut doc, id, ElementKind::Parameter, &d.parameters)?;
            add_ports(&mut doc, id, ElementKind::Output, &d.outputs)?;
            if d.outputs.is_empty() && d.inherit.is_none() && !d.ty.is_empty() && d.ty != "multioutput" {
                doc.add_output(id, "out", &d.ty)?;
            }
        }
        for i in &self.implementations {
            let id = doc.add_implementation(&i.name, &i.nodedef, i.target.as_deref().unwrap_or(""))?;
            apply_attrs(
                &mut doc,
                id,
                &[
                    (attr::FILE, &i.file),
                    (attr::FUNCTION, &i.function),
                    (attr::SOURCE_CODE, &i.sourcecode),
                ],
                &i.attributes,
            );
        }
        for g in &self.node_graphs {
            let id = doc.add_node_graph(&g.name)?;
            apply_attrs(
                &mut doc,
                id,
                &[(attr::NODE_DEF, &g.nodedef), (attr::TARGET, &g.target)],
                &g.attributes,
            );
            add_ports(&mut doc, id, ElementKind::Input, &g.inputs)?;
            for n in &g.nodes {
                add_node_desc(&mut doc, id, n)?;
            }
            add_ports(&mut doc, id, ElementKind::Output, &g.outputs)?;
        }
        for n in &self.nodes {
            add_node_desc(&mut doc, root, n)?;
        }
        add_ports(&mut doc, root, ElementKind::Output, &self.outputs)?;
        doc.sources = self.sources;
        Ok(doc)
    }

    pub fn from_document(doc: &Document) -> Self {
        let mut desc = DocumentDesc {
            sources: doc.sources.clone(),
            ..Default::default()
        };
        let root = doc.root();
        for id in doc.children(root) {
            let mut attrs = doc.get(*id).attributes.clone();
            let name = doc.name(*id).to_string();
            match doc.kind(*id) {
                ElementKind::NodeDef => desc.node_defs.push(NodeDefDesc {
                    name,
                    node: attrs.remove(attr::NODE).unwrap_or_default(),
                    ty: attrs.remove(attr::TYPE).unwrap_or_default(),
                    nodegroup: attrs.remove(attr::NODE_GROUP),
                    inherit: attrs.remove(attr::INHERIT),
                    bsdf: attrs.remove(attr::BSDF),
                    inputs: ports_of(doc, *id, ElementKind::Input),
                    parameters: ports_of(doc, *id, ElementKind::Parameter),
                    outputs: ports_of(doc, *id, ElementKind::Output),
                    attributes: attrs,
                }),
                ElementKind::Implementation => desc.implementations.push(ImplementationDesc {
                    name,
                    nodedef: attrs.remove(attr::NODE_DEF).unwrap_or_default(),
                    target: attrs.remove(attr::TARGET),
                    file: attrs.remove(attr::FILE),
                    function: attrs.remove(attr::FUNCTION),
                    sourcecode: attrs.remove(attr::SOURCE_CODE),
                    attributes: attrs,
                }),
                ElementKind::NodeGraph => desc.node_graphs.push(NodeGraphDesc {
                    name,
                    nodedef: attrs.remove(attr::NODE_DEF),
                    target: attrs.remove(attr::TARGET),
                    inputs: ports_of(doc, *id, ElementKind::Input),
                    nodes: doc.nodes(*id).into_iter().map(|n| node_desc(doc, n)).collect(),
                    outputs: ports_of(doc, *id, ElementKind::Output),
                    attributes: attrs,
                }),
                ElementKind::Node => desc.nodes.push(node_desc(doc, *id)),
                ElementKind::Output => desc.outputs.push(port_desc(doc, *id)),
                _ => {}
            }
        }
        desc
    }
}

fn node_desc(doc: &Document, id: ElementId) -> NodeDesc {
    let mut attrs = doc.get(id).attributes.clone();
    NodeDesc {
        name: doc.name(id).to_string(),
        category: doc.get(id).category.clone(),
        ty: attrs.remove(attr::TYPE).unwrap_or_default(),
        nodedef: attrs.remove(attr::NODE_DEF),
        inputs: ports_of(doc, id, ElementKind::Input),
        parameters: ports_of(doc, id, ElementKind::Parameter),
        outputs: ports_of(doc, id, ElementKind::Output),
        attributes: attrs,
    }
}

fn ports_of(doc: &Document, parent: ElementId, kind: ElementKind) -> Vec<PortDesc> {
    doc.children_of_kind(parent, kind)
        .into_iter()
        .map(|p| port_desc(doc, p))
        .collect()
}

fn port_desc(doc: &Document, id: ElementId) -> PortDesc {
    let mut attrs = doc.get(id).attributes.clone();
    PortDesc {
        name: doc.name(id).to_string(),
        ty: attrs.remove(attr::TYPE).unwrap_or_default(),
        value: attrs.remove(attr::VALUE),
        nodename: attrs.remove(attr::NODE_NAME),
        output: attrs.remove(attr::OUTPUT),
        interfacename: attrs.remove(attr::INTERFACE_NAME),
        channels: attrs.remove(attr::CHANNELS),
        enum_values: attrs.remove(attr::ENUM),
        defaultgeomprop: attrs.remove(attr::DEFAULT_GEOM_PROP),
        attributes: attrs,
    }
}

pub fn document_from_json(text: &str) -> Result<Document> {
    let desc: DocumentDesc = serde_json::from_str(text).context("invalid document json")?;
    Ok(desc.into_document()?)
}

pub fn document_to_json(doc: &Document) -> Result<String> {
    serde_json::to_string_pretty(&DocumentDesc::from_document(doc))
        .context("failed to serialize document")
}

pub fn load_document(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read document {}", path.display()))?;
    document_from_json(&text).with_context(|| format!("failed to load document {}", path.display()))
}

/// The bundled standard library with its source files embedded.
pub fn load_standard_library() -> Result<Document> {
    let mut doc = document_from_json(STDLIB_JSON).context("bundled stdlib.json is invalid")?;
    for (file, text) in STDLIB_SOURCES {
        doc.sources.insert((*file).to_string(), (*text).to_string());
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdlib_loads_with_sources() {
        let lib = load_standard_library().unwrap();
        assert!(lib.node_def("ND_surface").is_some());
        assert!(lib.node_def("ND_constant_color3").is_some());
        for imp in lib.implementations() {
            if let Some(file) = lib.attribute(imp, attr::FILE) {
                assert!(lib.sources.contains_key(file), "missing source {file}");
            }
        }
    }

    #[test]
    fn json_round_trip_keeps_connections() {
        let text = r#"{
            "nodeGraphs": [{
                "name": "g",
                "nodes": [
                    {"name": "c", "category": "constant", "type": "color3",
                     "inputs": [{"name": "value", "type": "color3", "value": "0.5, 0.5, 0.5"}]}
                ],
                "outputs": [{"name": "out", "type": "color3", "nodename": "c"}]
            }]
        }"#;
        let doc = document_from_json(text).unwrap();
        let again = document_from_json(&document_to_json(&doc).unwrap()).unwrap();
        let g = again.node_graphs()[0];
        let out = again.child(g, "out").unwrap();
        assert_eq!(again.attribute(out, attr::NODE_NAME), Some("c"));
        let c = again.child(g, "c").unwrap();
        let value = again.input(c, "value").unwrap();
        assert_eq!(again.attribute(value, attr::VALUE), Some("0.5, 0.5, 0.5"));
    }

    #[test]
    fn malformed_json_reports_context() {
        let err = document_from_json("{ nope").unwrap_err();
        assert!(format!("{err:#}").contains("invalid document json"));
    }
}
