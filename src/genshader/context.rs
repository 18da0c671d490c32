//! Generation options, source lookup and the per-run [`GenContext`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::document::{Document, ElementId, ElementKind};
use crate::error::{Error, Result};
use crate::types::{TypeSystem, names};

use super::nodes::{CompoundNode, ShaderNodeImpl, SourceCodeNode};
use super::registry::ImplementationRegistry;
use super::syntax::Syntax;
use super::{Shader, ShaderGenerator};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderInterfaceType {
    /// Every editable unconnected input becomes a shader parameter.
    #[default]
    Complete,
    /// Only texture file names are exposed.
    Reduced,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecularEnvironmentMethod {
    #[default]
    None,
    Prefilter,
    Fis,
}

/// Options read by generators. Loadable from JSON with camelCase keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenOptions {
    pub shader_interface_type: ShaderInterfaceType,
    pub hw_transparency: bool,
    pub hw_shadow_map: bool,
    pub hw_ambient_occlusion: bool,
    pub hw_max_active_light_sources: u32,
    pub hw_specular_environment_method: SpecularEnvironmentMethod,
    pub file_texture_vertical_flip: bool,
    pub emit_omitted_comments: bool,
    pub optimize_graph: bool,
    pub glsl_version: String,
}

impl Default for GenOptions {
    fn default() -> Self {
        GenOptions {
            shader_interface_type: ShaderInterfaceType::Complete,
            hw_transparency: false,
            hw_shadow_map: false,
            hw_ambient_occlusion: false,
            hw_max_active_light_sources: 3,
            hw_specular_environment_method: SpecularEnvironmentMethod::None,
            file_texture_vertical_flip: false,
            emit_omitted_comments: true,
            optimize_graph: true,
            glsl_version: "400".to_string(),
        }
    }
}

/// Where implementation source files are looked up: registered in-memory
/// sources first, then each filesystem root in order.
#[derive(Clone, Debug, Default)]
pub struct SourceSearchPath {
    sources: BTreeMap<String, String>,
    roots: Vec<PathBuf>,
}

impl SourceSearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled library sources.
    pub fn standard() -> Self {
        let mut path = Self::new();
        for (file, text) in crate::document::io::STDLIB_SOURCES {
            path.add_source(file, text);
        }
        path
    }

    pub fn add_source(&mut self, file: &str, text: &str) {
        self.sources.insert(file.to_string(), text.to_string());
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn resolve(&self, file: &str) -> Result<String> {
        if let Some(text) = self.sources.get(file) {
            return Ok(text.clone());
        }
        for root in &self.roots {
            let path = root.join(file);
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::generation(format!("failed to read '{}': {e}", path.display()))
                });
            }
        }
        Err(Error::generation(format!(
            "source file '{file}' not found in {} registered sources or {} search roots",
            self.sources.len(),
            self.roots.len()
        )))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClosureKind {
    Default,
    Reflection,
    Transmission,
    Indirect,
    Emission,
}

/// Extra arguments and a function-name suffix for closure calls evaluated
/// in a particular lighting context.
#[derive(Clone, Debug)]
pub struct ClosureContext {
    pub kind: ClosureKind,
    /// (closure type, argument type, argument name)
    arguments: Vec<(String, String, String)>,
    suffixes: Vec<(String, String)>,
}

impl ClosureContext {
    pub fn new(kind: ClosureKind) -> Self {
        ClosureContext {
            kind,
            arguments: Vec::new(),
            suffixes: Vec::new(),
        }
    }

    pub fn argument(mut self, closure_type: &str, arg_type: &str, name: &str) -> Self {
        self.arguments
            .push((closure_type.to_string(), arg_type.to_string(), name.to_string()));
        self
    }

    pub fn suffix(mut self, closure_type: &str, suffix: &str) -> Self {
        self.suffixes.push((closure_type.to_string(), suffix.to_string()));
        self
    }

    /// (argument type, argument name) pairs for a closure type.
    pub fn arguments(&self, closure_type: &str) -> Vec<(&str, &str)> {
        self.arguments
            .iter()
            .filter(|(c, _, _)| c == closure_type)
            .map(|(_, t, n)| (t.as_str(), n.as_str()))
            .collect()
    }

    pub fn function_suffix(&self, closure_type: &str) -> &str {
        self.suffixes
            .iter()
            .find(|(c, _)| c == closure_type)
            .map(|(_, s)| s.as_str())
            .unwrap_or("")
    }
}

/// The contexts used by the hardware generators.
pub fn hw_closure_context(kind: ClosureKind) -> Option<ClosureContext> {
    let ctx = ClosureContext::new(kind);
    Some(match kind {
        ClosureKind::Default => return None,
        ClosureKind::Reflection => ctx
            .argument(names::BSDF, names::VECTOR3, "L")
            .argument(names::BSDF, names::VECTOR3, "V")
            .suffix(names::BSDF, "_reflection"),
        ClosureKind::Transmission => ctx
            .argument(names::BSDF, names::VECTOR3, "V")
            .suffix(names::BSDF, "_transmission"),
        ClosureKind::Indirect => ctx
            .argument(names::BSDF, names::VECTOR3, "V")
            .suffix(names::BSDF, "_indirect"),
        ClosureKind::Emission => ctx
            .argument(names::EDF, names::VECTOR3, "N")
            .argument(names::EDF, names::VECTOR3, "V"),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundLight {
    pub type_id: u32,
    pub node_def: String,
}

/// State for one or more generation runs against a single generator.
///
/// Implementations created through [`GenContext::get_implementation`] are
/// cached by name and shared by every node that resolves to them.
pub struct GenContext<'a> {
    generator: &'a dyn ShaderGenerator,
    types: &'a TypeSystem,
    registry: &'a ImplementationRegistry,
    pub options: GenOptions,
    pub search_path: SourceSearchPath,
    cache: HashMap<String, Rc<dyn ShaderNodeImpl>>,
    in_progress: Vec<String>,
    closure_stack: Vec<ClosureContext>,
    input_suffix: HashMap<String, String>,
    output_suffix: HashMap<String, String>,
    bound_lights: Vec<BoundLight>,
}

impl<'a> GenContext<'a> {
    pub fn new(
        generator: &'a dyn ShaderGenerator,
        types: &'a TypeSystem,
        registry: &'a ImplementationRegistry,
    ) -> Self {
        GenContext {
            generator,
            types,
            registry,
            options: GenOptions::default(),
            search_path: SourceSearchPath::standard(),
            cache: HashMap::new(),
            in_progress: Vec::new(),
            closure_stack: Vec::new(),
            input_suffix: HashMap::new(),
            output_suffix: HashMap::new(),
            bound_lights: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: GenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn generator(&self) -> &'a dyn ShaderGenerator {
        self.generator
    }

    pub fn syntax(&self) -> &'a Syntax {
        self.generator.syntax()
    }

    pub fn types(&self) -> &'a TypeSystem {
        self.types
    }

    /// Generate a shader with this context's generator.
    pub fn generate(&mut self, name: &str, doc: &Document, element: ElementId) -> Result<Shader> {
        let generator = self.generator;
        generator.generate(name, doc, element, self)
    }

    /// Resolve an implementation element to a node implementation.
    ///
    /// Lookup order is the context cache, native registrations, a node graph
    /// (compound), then source code. Each distinct name is initialized once.
    pub fn get_implementation(&mut self, doc: &Document, element: ElementId) -> Result<Rc<dyn ShaderNodeImpl>> {
        let name = doc.name(element).to_string();
        if let Some(imp) = self.cache.get(&name) {
            return Ok(imp.clone());
        }
        if self.in_progress.contains(&name) {
            return Err(Error::FoundCycle(format!(
                "implementation '{name}' is used by its own node graph"
            )));
        }
        let mut imp: Box<dyn ShaderNodeImpl> = match self.registry.factory(&name) {
            Some(factory) => factory(),
            None => match doc.kind(element) {
                ElementKind::NodeGraph => Box::new(CompoundNode::default()),
                ElementKind::Implementation => Box::new(SourceCodeNode::default()),
                other => {
                    return Err(Error::NoImplementation(format!(
                        "{} '{}' cannot implement a node",
                        other.as_str(),
                        doc.path(element)
                    )));
                }
            },
        };
        debug!(
            "creating implementation '{name}' for target '{}'",
            self.generator.target()
        );
        self.in_progress.push(name.clone());
        let result = imp.initialize(doc, element, self);
        self.in_progress.pop();
        result?;
        let imp: Rc<dyn ShaderNodeImpl> = Rc::from(imp);
        self.cache.insert(name, imp.clone());
        Ok(imp)
    }

    pub fn find_implementation(&self, name: &str) -> Option<Rc<dyn ShaderNodeImpl>> {
        self.cache.get(name).cloned()
    }

    pub fn clear_implementations(&mut self) {
        self.cache.clear();
    }

    pub fn push_closure_context(&mut self, ctx: ClosureContext) {
        self.closure_stack.push(ctx);
    }

    pub fn pop_closure_context(&mut self) {
        self.closure_stack.pop();
    }

    pub fn closure_context(&self) -> Option<&ClosureContext> {
        self.closure_stack.last()
    }

    pub fn closure_kind(&self) -> ClosureKind {
        self.closure_context().map_or(ClosureKind::Default, |c| c.kind)
    }

    pub fn add_input_suffix(&mut self, variable: &str, suffix: &str) {
        self.input_suffix.insert(variable.to_string(), suffix.to_string());
    }

    pub fn remove_input_suffix(&mut self, variable: &str) {
        self.input_suffix.remove(variable);
    }

    pub fn input_suffix(&self, variable: &str) -> Option<&str> {
        self.input_suffix.get(variable).map(String::as_str)
    }

    pub fn add_output_suffix(&mut self, variable: &str, suffix: &str) {
        self.output_suffix.insert(variable.to_string(), suffix.to_string());
    }

    pub fn remove_output_suffix(&mut self, variable: &str) {
        self.output_suffix.remove(variable);
    }

    pub fn output_suffix(&self, variable: &str) -> Option<&str> {
        self.output_suffix.get(variable).map(String::as_str)
    }

    /// Make a light nodedef available to generated light loops under `type_id`.
    pub fn bind_light_shader(&mut self, doc: &Document, node_def: &str, type_id: u32) -> Result<()> {
        let def = doc.node_def(node_def).ok_or_else(|| {
            Error::document(format!("light nodedef '{node_def}' not found"))
        })?;
        if doc.type_name(def) != names::LIGHTSHADER {
            return Err(Error::TypeMismatch(format!(
                "nodedef '{node_def}' is '{}', not a lightshader",
                doc.type_name(def)
            )));
        }
        if self.bound_lights.iter().any(|l| l.type_id == type_id && l.node_def != node_def) {
            return Err(Error::generation(format!(
                "light type id {type_id} is already bound"
            )));
        }
        self.bound_lights.retain(|l| l.type_id != type_id);
        self.bound_lights.push(BoundLight {
            type_id,
            node_def: node_def.to_string(),
        });
        Ok(())
    }

    pub fn bound_lights(&self) -> &[BoundLight] {
        &self.bound_lights
    }

    pub fn clear_light_shaders(&mut self) {
        self.bound_lights.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let opts: GenOptions =
            serde_json::from_str(r#"{"hwTransparency": true, "shaderInterfaceType": "reduced"}"#).unwrap();
        assert!(opts.hw_transparency);
        assert_eq!(opts.shader_interface_type, ShaderInterfaceType::Reduced);
        assert_eq!(opts.hw_max_active_light_sources, 3);
        assert!(opts.optimize_graph);
    }

    #[test]
    fn search_path_prefers_registered_sources() {
        let dir = std::env::temp_dir().join("shadergen_search_path_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.glsl"), "from disk").unwrap();
        std::fs::write(dir.join("b.glsl"), "only on disk").unwrap();

        let mut path = SourceSearchPath::new();
        path.add_source("a.glsl", "in memory");
        path.add_root(&dir);
        assert_eq!(path.resolve("a.glsl").unwrap(), "in memory");
        assert_eq!(path.resolve("b.glsl").unwrap(), "only on disk");
        assert_eq!(path.resolve("c.glsl").unwrap_err().kind(), "Generation");
    }

    #[test]
    fn reflection_context_has_light_and_view_arguments() {
        let ctx = hw_closure_context(ClosureKind::Reflection).unwrap();
        assert_eq!(ctx.arguments(names::BSDF), [("vector3", "L"), ("vector3", "V")]);
        assert_eq!(ctx.function_suffix(names::BSDF), "_reflection");
        assert_eq!(ctx.function_suffix(names::EDF), "");
        assert!(hw_closure_context(ClosureKind::Default).is_none());
    }
}
