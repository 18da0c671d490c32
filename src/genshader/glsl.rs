//! GLSL generator: a vertex and a pixel stage for OpenGL-style pipelines.

use log::debug;

use crate::document::{Document, ElementId};
use crate::error::{Error, Result};
use crate::types::names;

use super::context::{ClosureContext, ClosureKind, GenContext, hw_closure_context};
use super::emit::{emit_function_definitions, substitute_tokens, variable_declaration};
use super::graph::{ShaderGraph, ShaderNode};
use super::hw::{self, block, token};
use super::registry::ImplementationRegistry;
use super::stage::{Brackets, Shader, ShaderStage, VariableBlock};
use super::syntax::{LiteralForm, Syntax, TypeSyntax};
use super::ShaderGenerator;

pub const TARGET: &str = "genglsl";

const RESERVED_WORDS: &[&str] = &[
    "attribute", "const", "uniform", "varying", "buffer", "shared", "coherent", "volatile", "restrict",
    "readonly", "writeonly", "atomic_uint", "layout", "centroid", "flat", "smooth", "noperspective",
    "patch", "sample", "break", "continue", "do", "for", "while", "switch", "case", "default", "if",
    "else", "subroutine", "in", "out", "inout", "float", "double", "int", "void", "bool", "true",
    "false", "invariant", "precise", "discard", "return", "mat2", "mat3", "mat4", "dmat2", "dmat3",
    "dmat4", "vec2", "vec3", "vec4", "ivec2", "ivec3", "ivec4", "bvec2", "bvec3", "bvec4", "dvec2",
    "dvec3", "dvec4", "uint", "uvec2", "uvec3", "uvec4", "lowp", "mediump", "highp", "precision",
    "sampler1D", "sampler2D", "sampler3D", "samplerCube", "sampler2DShadow", "struct", "common",
    "partition", "active", "asm", "class", "union", "enum", "typedef", "template", "this", "goto",
    "inline", "noinline", "public", "static", "extern", "external", "interface", "long", "short",
    "half", "fixed", "unsigned", "superp", "input", "output", "filter", "sizeof", "cast", "namespace",
    "using", "main", "texture", "mix", "min", "max", "normalize", "dot", "clamp", "length", "pow",
    // Names used by the generated scaffolding.
    "vd", "L", "V", "N", "P", "light", "lightShader", "numLights", "occlusion", "surfaceOpacity",
    "hPositionWorld", "activeLightIndex", "outAlpha", "ambOccUv", "BSDF", "EDF", "VDF",
    "surfaceshader", "volumeshader", "displacementshader", "lightshader", "material", "LightData",
    "VertexData", "MAX_LIGHT_SOURCES", "numActiveLightSources", "sampleLightSource",
];

pub fn glsl_syntax() -> Syntax {
    let mut s = Syntax::new(TARGET);
    let vec = |name: &str, members: &[&str]| {
        TypeSyntax::new(name, &format!("{name}(0.0)"), LiteralForm::Constructor).members(members)
    };
    s.register_type(names::BOOLEAN, TypeSyntax::new("bool", "false", LiteralForm::Scalar));
    s.register_type(names::INTEGER, TypeSyntax::new("int", "0", LiteralForm::Scalar));
    s.register_type(names::FLOAT, TypeSyntax::new("float", "0.0", LiteralForm::Scalar));
    s.register_type(names::COLOR2, vec("vec2", &[".r", ".g"]));
    s.register_type(names::COLOR3, vec("vec3", &[".r", ".g", ".b"]));
    s.register_type(names::COLOR4, vec("vec4", &[".r", ".g", ".b", ".a"]));
    s.register_type(names::VECTOR2, vec("vec2", &[".x", ".y"]));
    s.register_type(names::VECTOR3, vec("vec3", &[".x", ".y", ".z"]));
    s.register_type(names::VECTOR4, vec("vec4", &[".x", ".y", ".z", ".w"]));
    s.register_type(names::MATRIX33, TypeSyntax::new("mat3", "mat3(1.0)", LiteralForm::Constructor));
    s.register_type(names::MATRIX44, TypeSyntax::new("mat4", "mat4(1.0)", LiteralForm::Constructor));
    s.register_type(names::FILENAME, TypeSyntax::new("sampler2D", "sampler2D", LiteralForm::Opaque));
    s.register_type(names::INTEGERARRAY, TypeSyntax::new("int", "int[1](0)", LiteralForm::Array { braces: false }));
    s.register_type(names::FLOATARRAY, TypeSyntax::new("float", "float[1](0.0)", LiteralForm::Array { braces: false }));
    s.register_type(
        names::BSDF,
        TypeSyntax::new("BSDF", "BSDF(0.0)", LiteralForm::Opaque).definition("#define BSDF vec3"),
    );
    s.register_type(
        names::EDF,
        TypeSyntax::new("EDF", "EDF(0.0)", LiteralForm::Opaque).definition("#define EDF vec3"),
    );
    s.register_type(
        names::VDF,
        TypeSyntax::new("VDF", "VDF(vec3(0.0), vec3(0.0))", LiteralForm::Opaque)
            .definition("struct VDF { vec3 absorption; vec3 scattering; };"),
    );
    s.register_type(
        names::SURFACESHADER,
        TypeSyntax::new("surfaceshader", "surfaceshader(vec3(0.0), vec3(0.0))", LiteralForm::Opaque)
            .definition("struct surfaceshader { vec3 color; vec3 transparency; };"),
    );
    s.register_type(
        names::VOLUMESHADER,
        TypeSyntax::new("volumeshader", "volumeshader(VDF(vec3(0.0), vec3(0.0)), EDF(0.0))", LiteralForm::Opaque)
            .definition("struct volumeshader { VDF vdf; EDF edf; };"),
    );
    s.register_type(
        names::DISPLACEMENTSHADER,
        TypeSyntax::new("displacementshader", "displacementshader(vec3(0.0), 1.0)", LiteralForm::Opaque)
            .definition("struct displacementshader { vec3 offset; float scale; };"),
    );
    s.register_type(
        names::LIGHTSHADER,
        TypeSyntax::new("lightshader", "lightshader(vec3(0.0), vec3(0.0))", LiteralForm::Opaque)
            .definition("struct lightshader { vec3 intensity; vec3 direction; };"),
    );
    s.register_type(
        names::MATERIAL,
        TypeSyntax::new("material", "material(vec3(0.0), vec3(0.0))", LiteralForm::Opaque)
            .definition("#define material surfaceshader"),
    );
    s.register_type(
        names::ROUGHNESSINFO,
        TypeSyntax::new("roughnessinfo", "roughnessinfo(0.0, 0.0, 0.0, 0.0)", LiteralForm::Struct)
            .definition("struct roughnessinfo { float roughness; float alpha; float alphaX; float alphaY; };"),
    );
    s.register_reserved_words(RESERVED_WORDS);
    s.register_invalid_tokens(&[("__", "_"), ("gl_", "gll"), ("webgl_", "webgll"), ("_webgl", "wwebgl")]);
    s.source_file_extension = ".glsl";
    s
}

/// Declarations for every port of a block, one line each.
pub(crate) fn block_declarations(syntax: &Syntax, b: &VariableBlock, qualifier: &str, assign: bool) -> Result<Vec<String>> {
    b.ports()
        .iter()
        .map(|p| variable_declaration(syntax, p, qualifier, assign).map(|d| format!("{d};")))
        .collect()
}

#[derive(Debug)]
pub struct GlslShaderGenerator {
    syntax: Syntax,
}

impl Default for GlslShaderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GlslShaderGenerator {
    pub fn new() -> Self {
        GlslShaderGenerator { syntax: glsl_syntax() }
    }

    fn emit_uniforms(&self, stage: &mut ShaderStage) -> Result<()> {
        let mut lines = Vec::new();
        for b in stage.uniform_blocks() {
            if b.is_empty() || b.name == block::LIGHT_DATA {
                continue;
            }
            lines.push(format!("// Uniform block: {}", b.name));
            lines.extend(block_declarations(&self.syntax, b, self.syntax.uniform_qualifier, true)?);
            lines.push(String::new());
        }
        for line in lines {
            if line.is_empty() {
                stage.emit_empty_line();
            } else {
                stage.emit_line(&line, false);
            }
        }
        Ok(())
    }

    fn emit_interface_block(&self, stage: &mut ShaderStage, qualifier: &str, b: &VariableBlock) -> Result<()> {
        if b.is_empty() {
            return Ok(());
        }
        let members = block_declarations(&self.syntax, b, "", false)?;
        stage.emit_line(&format!("{qualifier} {}", b.name), false);
        stage.emit_line("{", false);
        stage.begin_scope(Brackets::None);
        for m in members {
            stage.emit_line(&m, false);
        }
        stage.end_scope(false)?;
        stage.emit_line(&format!("}} {}", b.instance), true);
        stage.emit_empty_line();
        Ok(())
    }

    fn emit_type_definitions(&self, stage: &mut ShaderStage) {
        for def in self.syntax.type_definitions() {
            stage.emit_line(def, false);
        }
        stage.emit_empty_line();
    }

    fn emit_vertex_stage(&self, graph: &ShaderGraph, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
        stage.emit_line(&format!("#version {}", ctx.options.glsl_version), false);
        stage.emit_empty_line();
        self.emit_uniforms(stage)?;

        let inputs = stage.input_block(block::VERTEX_INPUTS).cloned();
        if let Some(inputs) = inputs {
            stage.emit_comment("Inputs block: VertexInputs");
            for line in block_declarations(&self.syntax, &inputs, "in", false)? {
                stage.emit_line(&line, false);
            }
            stage.emit_empty_line();
        }
        if let Some(vd) = stage.output_block(block::VERTEX_DATA).cloned() {
            self.emit_interface_block(stage, "out", &vd)?;
        }

        emit_function_definitions(graph, ctx, stage)?;
        stage.emit_line("void main()", false);
        stage.begin_scope(Brackets::Braces);
        stage.emit_line(
            &format!("vec4 hPositionWorld = {} * vec4({}, 1.0)", token::WORLD_MATRIX, token::IN_POSITION),
            true,
        );
        stage.emit_line(&format!("gl_Position = {} * hPositionWorld", token::VIEW_PROJECTION_MATRIX), true);
        hw::emit_vertex_calls(graph, ctx, stage)?;
        stage.end_scope(false)
    }

    fn emit_pixel_stage(
        &self,
        graph: &ShaderGraph,
        doc: &Document,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        stage.emit_line(&format!("#version {}", ctx.options.glsl_version), false);
        stage.emit_empty_line();
        let light_data = stage.uniform_block(block::LIGHT_DATA).cloned();
        if light_data.is_some() {
            stage.emit_line(
                &format!("#define MAX_LIGHT_SOURCES {}", ctx.options.hw_max_active_light_sources),
                false,
            );
            stage.emit_empty_line();
        }
        self.emit_type_definitions(stage);
        self.emit_uniforms(stage)?;

        if let Some(lights) = light_data {
            stage.emit_line("struct LightData", false);
            stage.begin_scope(Brackets::Braces);
            for line in block_declarations(&self.syntax, &lights, "", false)? {
                stage.emit_line(&line, false);
            }
            stage.end_scope(true)?;
            stage.emit_empty_line();
            stage.emit_line(
                &format!("{} LightData {}[MAX_LIGHT_SOURCES]", self.syntax.uniform_qualifier, token::LIGHT_DATA),
                true,
            );
            stage.emit_empty_line();
        }

        if let Some(vd) = stage.input_block(block::VERTEX_DATA).cloned() {
            self.emit_interface_block(stage, "in", &vd)?;
        }

        if let Some(outputs) = stage.output_block(block::PIXEL_OUTPUTS).cloned() {
            stage.emit_comment("Pixel shader outputs");
            for line in block_declarations(&self.syntax, &outputs, "out", false)? {
                stage.emit_line(&line, false);
            }
            stage.emit_empty_line();
        }

        hw::emit_light_functions(graph, doc, ctx, stage)?;
        emit_function_definitions(graph, ctx, stage)?;

        stage.emit_line("void main()", false);
        stage.begin_scope(Brackets::Braces);
        hw::emit_pixel_calls(graph, ctx, stage)?;
        stage.end_scope(false)
    }
}

impl ShaderGenerator for GlslShaderGenerator {
    fn target(&self) -> &'static str {
        TARGET
    }

    fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    fn register_implementations(&self, registry: &mut ImplementationRegistry) {
        hw::register_implementations(registry, TARGET);
    }

    fn node_context_kinds(&self, node: &ShaderNode) -> Vec<ClosureKind> {
        hw::node_context_kinds(node)
    }

    fn closure_context(&self, kind: ClosureKind) -> Option<ClosureContext> {
        hw_closure_context(kind)
    }

    fn generate(&self, name: &str, doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<Shader> {
        let graph = ShaderGraph::create(doc, element, ctx)?;
        let mut stages = hw::create_stages(&graph, doc, ctx)?;
        let [vs, ps] = stages.as_mut_slice() else {
            return Err(Error::generation("expected a vertex and a pixel stage"));
        };
        self.emit_vertex_stage(&graph, ctx, vs)?;
        self.emit_pixel_stage(&graph, doc, ctx, ps)?;

        let tokens = hw::token_substitutions(&stages);
        for stage in stages.iter_mut() {
            let code = substitute_tokens(stage.source_code(), &tokens);
            stage.set_source_code(code);
        }
        debug!("generated {TARGET} shader '{name}' from '{}'", doc.path(element));
        Ok(Shader::new(name, graph, stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSystem;
    use crate::value::Value;

    #[test]
    fn literals_use_glsl_constructors() {
        let syntax = glsl_syntax();
        let ts = TypeSystem::standard();
        let c3 = ts.get(names::COLOR3).unwrap();
        let v = Value::Color3([0.5, 0.25, 1.0]);
        assert_eq!(syntax.value(&c3, &v, false).unwrap(), "vec3(0.500000, 0.250000, 1.000000)");
        let arr = ts.get(names::FLOATARRAY).unwrap();
        let v = Value::FloatArray(vec![1.0, 2.0]);
        assert_eq!(syntax.value(&arr, &v, false).unwrap(), "float[2](1.000000, 2.000000)");
    }

    #[test]
    fn strings_are_not_a_glsl_type() {
        let syntax = glsl_syntax();
        let ts = TypeSystem::standard();
        let s = ts.get(names::STRING).unwrap();
        assert!(!syntax.type_supported(&s));
        let remapped = syntax.remap_enumeration(&s, "world", Some("model,object,world")).unwrap();
        assert_eq!(remapped, Some(Value::Integer(2)));
    }

    #[test]
    fn reserved_names_get_suffixed() {
        let syntax = glsl_syntax();
        let mut ids = syntax.new_identifier_map();
        assert_eq!(syntax.make_identifier("out", &mut ids), "out1");
        assert_eq!(syntax.make_identifier("gl_Color", &mut ids), "gllColor");
        assert_eq!(syntax.make_identifier("base__color", &mut ids), "base_color");
    }
}
