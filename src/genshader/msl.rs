//! Metal Shading Language generator.
//!
//! Metal has no global uniforms, so both stages wrap their code in a
//! `GlobalContext` struct whose members are the uniforms, the stage inputs
//! and the vertex data. The entry points build the context from their
//! buffers and call into it.

use log::debug;

use crate::document::{Document, ElementId};
use crate::error::{Error, Result};
use crate::types::names;

use super::context::{ClosureContext, ClosureKind, GenContext, hw_closure_context};
use super::emit::{emit_function_definitions, substitute_tokens, variable_declaration};
use super::glsl::block_declarations;
use super::graph::{ShaderGraph, ShaderNode};
use super::hw::{self, LIGHT_DATA_INSTANCE, block, token};
use super::registry::ImplementationRegistry;
use super::stage::{Brackets, Shader, ShaderStage, VERTEX, VariableBlock};
use super::syntax::{LiteralForm, Syntax, TypeSyntax};
use super::ShaderGenerator;

pub const TARGET: &str = "genmsl";

const RESERVED_WORDS: &[&str] = &[
    "alignas", "alignof", "and", "asm", "auto", "bool", "break", "case", "catch", "char", "class",
    "const", "constexpr", "const_cast", "continue", "decltype", "default", "delete", "do", "double",
    "dynamic_cast", "else", "enum", "explicit", "export", "extern", "false", "float", "for", "friend",
    "goto", "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "not",
    "nullptr", "operator", "or", "private", "protected", "public", "register", "return", "short",
    "signed", "sizeof", "static", "static_assert", "static_cast", "struct", "switch", "template",
    "this", "thread", "throw", "true", "try", "typedef", "typeid", "typename", "union", "unsigned",
    "using", "virtual", "void", "volatile", "while", "device", "constant", "threadgroup", "kernel",
    "vertex", "fragment", "stage_in", "sampler", "texture2d", "half", "float2", "float3", "float4",
    "float3x3", "float4x4", "metal", "main", "discard_fragment", "mix", "min", "max", "normalize",
    "dot", "clamp", "length", "pow",
    "vd", "L", "V", "N", "P", "light", "lightShader", "numLights", "occlusion", "surfaceOpacity",
    "hPositionWorld", "activeLightIndex", "outAlpha", "ambOccUv", "BSDF", "EDF", "VDF",
    "surfaceshader", "volumeshader", "displacementshader", "lightshader", "material", "LightData",
    "VertexData", "VertexInputs", "GlobalContext", "MetalTexture", "MAX_LIGHT_SOURCES",
    "numActiveLightSources", "sampleLightSource", "VertexMain", "FragmentMain", "ctx", "i_vs",
    "u_prv", "u_pub",
];

pub fn msl_syntax() -> Syntax {
    let mut s = Syntax::new(TARGET);
    let vec = |name: &str, members: &[&str]| {
        TypeSyntax::new(name, &format!("{name}(0.0)"), LiteralForm::Constructor).members(members)
    };
    s.register_type(names::BOOLEAN, TypeSyntax::new("bool", "false", LiteralForm::Scalar));
    s.register_type(names::INTEGER, TypeSyntax::new("int", "0", LiteralForm::Scalar));
    s.register_type(names::FLOAT, TypeSyntax::new("float", "0.0", LiteralForm::Scalar));
    s.register_type(names::COLOR2, vec("float2", &[".r", ".g"]));
    s.register_type(names::COLOR3, vec("float3", &[".r", ".g", ".b"]));
    s.register_type(names::COLOR4, vec("float4", &[".r", ".g", ".b", ".a"]));
    s.register_type(names::VECTOR2, vec("float2", &[".x", ".y"]));
    s.register_type(names::VECTOR3, vec("float3", &[".x", ".y", ".z"]));
    s.register_type(names::VECTOR4, vec("float4", &[".x", ".y", ".z", ".w"]));
    s.register_type(
        names::MATRIX33,
        TypeSyntax::new(
            "float3x3",
            "float3x3(1.0)",
            LiteralForm::ColumnMatrix { column: "float3".to_string(), rows: 3 },
        ),
    );
    s.register_type(
        names::MATRIX44,
        TypeSyntax::new(
            "float4x4",
            "float4x4(1.0)",
            LiteralForm::ColumnMatrix { column: "float4".to_string(), rows: 4 },
        ),
    );
    s.register_type(
        names::FILENAME,
        TypeSyntax::new("MetalTexture", "MetalTexture()", LiteralForm::Opaque)
            .definition("struct MetalTexture\n{\n    texture2d<float> tex;\n    sampler s;\n};"),
    );
    s.register_type(names::INTEGERARRAY, TypeSyntax::new("int", "{0}", LiteralForm::Array { braces: true }));
    s.register_type(names::FLOATARRAY, TypeSyntax::new("float", "{0.0}", LiteralForm::Array { braces: true }));
    s.register_type(
        names::BSDF,
        TypeSyntax::new("BSDF", "BSDF(0.0)", LiteralForm::Opaque).definition("#define BSDF float3"),
    );
    s.register_type(
        names::EDF,
        TypeSyntax::new("EDF", "EDF(0.0)", LiteralForm::Opaque).definition("#define EDF float3"),
    );
    s.register_type(
        names::VDF,
        TypeSyntax::new("VDF", "VDF{float3(0.0), float3(0.0)}", LiteralForm::Opaque)
            .definition("struct VDF { float3 absorption; float3 scattering; };"),
    );
    s.register_type(
        names::SURFACESHADER,
        TypeSyntax::new("surfaceshader", "surfaceshader{float3(0.0), float3(0.0)}", LiteralForm::Opaque)
            .definition("struct surfaceshader { float3 color; float3 transparency; };"),
    );
    s.register_type(
        names::VOLUMESHADER,
        TypeSyntax::new("volumeshader", "volumeshader{VDF{float3(0.0), float3(0.0)}, EDF(0.0)}", LiteralForm::Opaque)
            .definition("struct volumeshader { VDF vdf; EDF edf; };"),
    );
    s.register_type(
        names::DISPLACEMENTSHADER,
        TypeSyntax::new("displacementshader", "displacementshader{float3(0.0), 1.0}", LiteralForm::Opaque)
            .definition("struct displacementshader { float3 offset; float scale; };"),
    );
    s.register_type(
        names::LIGHTSHADER,
        TypeSyntax::new("lightshader", "lightshader{float3(0.0), float3(0.0)}", LiteralForm::Opaque)
            .definition("struct lightshader { float3 intensity; float3 direction; };"),
    );
    s.register_type(
        names::MATERIAL,
        TypeSyntax::new("material", "material{float3(0.0), float3(0.0)}", LiteralForm::Opaque)
            .definition("#define material surfaceshader"),
    );
    s.register_type(
        names::ROUGHNESSINFO,
        TypeSyntax::new("roughnessinfo", "roughnessinfo{0.0, 0.0, 0.0, 0.0}", LiteralForm::Struct)
            .definition("struct roughnessinfo { float roughness; float alpha; float alphaX; float alphaY; };"),
    );
    s.register_reserved_words(RESERVED_WORDS);
    s.register_invalid_tokens(&[("__", "_")]);
    s.set_output_qualifier("thread ", "&");
    s.uniform_qualifier = "constant";
    s.texture_sample = "{sampler}.tex.sample({sampler}.s, {uv})";
    s.discard = "discard_fragment()";
    s.source_file_extension = ".metal";
    s
}

/// One `GlobalContext` member and how the entry point initializes it.
struct ContextMember {
    declaration: String,
    initializer: String,
}

#[derive(Debug)]
pub struct MslShaderGenerator {
    syntax: Syntax,
}

impl Default for MslShaderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MslShaderGenerator {
    pub fn new() -> Self {
        MslShaderGenerator { syntax: msl_syntax() }
    }

    fn emit_header(&self, stage: &mut ShaderStage) {
        stage.emit_line("#include <metal_stdlib>", false);
        stage.emit_line("#include <simd/simd.h>", false);
        stage.emit_empty_line();
        stage.emit_line("using namespace metal;", false);
        stage.emit_empty_line();
    }

    fn emit_struct(&self, stage: &mut ShaderStage, name: &str, members: &[String]) -> Result<()> {
        stage.emit_line(&format!("struct {name}"), false);
        stage.begin_scope(Brackets::Braces);
        for m in members {
            stage.emit_line(m, false);
        }
        stage.end_scope(true)?;
        stage.emit_empty_line();
        Ok(())
    }

    /// Buffer structs for the non-texture uniforms of each uniform block.
    /// Returns the context members and entry point parameters they produce.
    fn emit_uniform_buffers(
        &self,
        stage: &mut ShaderStage,
        members: &mut Vec<ContextMember>,
        params: &mut Vec<String>,
    ) -> Result<()> {
        let blocks: Vec<VariableBlock> = stage
            .uniform_blocks()
            .iter()
            .filter(|b| !b.is_empty() && b.name != block::LIGHT_DATA)
            .cloned()
            .collect();
        let mut buffer = 0;
        let mut texture = 0;
        for b in &blocks {
            let mut fields = Vec::new();
            for port in b.ports() {
                let decl = variable_declaration(&self.syntax, port, "", false)?;
                if port.ty.name() == names::FILENAME {
                    let v = &port.variable;
                    params.push(format!("texture2d<float> {v}_tex [[texture({texture})]]"));
                    params.push(format!("sampler {v}_sampler [[sampler({texture})]]"));
                    texture += 1;
                    members.push(ContextMember {
                        declaration: format!("{decl};"),
                        initializer: format!("MetalTexture{{{v}_tex, {v}_sampler}}"),
                    });
                } else {
                    fields.push(format!("{decl};"));
                    members.push(ContextMember {
                        declaration: format!("{decl};"),
                        initializer: format!("{}.{}", b.instance, port.variable),
                    });
                }
            }
            if !fields.is_empty() {
                self.emit_struct(stage, &b.name, &fields)?;
                params.push(format!(
                    "{} {}& {} [[buffer({buffer})]]",
                    self.syntax.uniform_qualifier, b.name, b.instance
                ));
                buffer += 1;
            }
        }
        if stage.uniform_block(block::LIGHT_DATA).is_some() {
            params.push(format!(
                "{} LightData* {LIGHT_DATA_INSTANCE} [[buffer({buffer})]]",
                self.syntax.uniform_qualifier
            ));
            members.push(ContextMember {
                declaration: format!("constant LightData* {LIGHT_DATA_INSTANCE};"),
                initializer: LIGHT_DATA_INSTANCE.to_string(),
            });
        }
        Ok(())
    }

    fn vertex_data_members(&self, vd: Option<&VariableBlock>) -> Result<Vec<String>> {
        let mut members = vec!["float4 pos [[position]];".to_string()];
        if let Some(vd) = vd {
            members.extend(block_declarations(&self.syntax, vd, "", false)?);
        }
        Ok(members)
    }

    fn begin_context(&self, stage: &mut ShaderStage, members: &[ContextMember]) {
        stage.emit_line("struct GlobalContext", false);
        stage.begin_scope(Brackets::Braces);
        for m in members {
            stage.emit_line(&m.declaration, false);
        }
        stage.emit_empty_line();
    }

    fn emit_entry_point(
        &self,
        stage: &mut ShaderStage,
        signature: &str,
        params: &[String],
        members: &[ContextMember],
        method: &str,
    ) -> Result<()> {
        stage.emit_line(signature, false);
        stage.begin_scope(Brackets::Parentheses);
        let last = params.len().saturating_sub(1);
        for (i, p) in params.iter().enumerate() {
            let sep = if i == last { "" } else { "," };
            stage.emit_line(&format!("{p}{sep}"), false);
        }
        stage.end_scope(false)?;
        stage.begin_scope(Brackets::Braces);
        let inits: Vec<&str> = members.iter().map(|m| m.initializer.as_str()).collect();
        stage.emit_line(&format!("GlobalContext ctx {{{}}}", inits.join(", ")), true);
        stage.emit_line(&format!("return ctx.{method}()"), true);
        stage.end_scope(false)
    }

    fn emit_vertex_stage(&self, graph: &ShaderGraph, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
        self.emit_header(stage);
        for def in self.syntax.type_definitions() {
            stage.emit_block(def);
        }
        stage.emit_empty_line();

        let inputs = stage.input_block(block::VERTEX_INPUTS).cloned();
        let mut input_fields = Vec::new();
        if let Some(inputs) = &inputs {
            for (i, port) in inputs.ports().iter().enumerate() {
                let decl = variable_declaration(&self.syntax, port, "", false)?;
                input_fields.push(format!("{decl} [[attribute({i})]];"));
            }
        }
        self.emit_struct(stage, block::VERTEX_INPUTS, &input_fields)?;
        let vd = stage.output_block(block::VERTEX_DATA).cloned();
        let vd_members = self.vertex_data_members(vd.as_ref())?;
        self.emit_struct(stage, block::VERTEX_DATA, &vd_members)?;

        let mut members = Vec::new();
        let mut params = vec!["VertexInputs i_vs [[stage_in]]".to_string()];
        self.emit_uniform_buffers(stage, &mut members, &mut params)?;
        members.push(ContextMember { declaration: "VertexInputs i_vs;".to_string(), initializer: "i_vs".to_string() });
        members.push(ContextMember { declaration: "VertexData vd;".to_string(), initializer: "VertexData()".to_string() });

        self.begin_context(stage, &members);
        emit_function_definitions(graph, ctx, stage)?;
        stage.emit_line("VertexData VertexMain()", false);
        stage.begin_scope(Brackets::Braces);
        stage.emit_line(
            &format!("float4 hPositionWorld = {} * float4({}, 1.0)", token::WORLD_MATRIX, token::IN_POSITION),
            true,
        );
        stage.emit_line(&format!("vd.pos = {} * hPositionWorld", token::VIEW_PROJECTION_MATRIX), true);
        hw::emit_vertex_calls(graph, ctx, stage)?;
        stage.emit_line("return vd", true);
        stage.end_scope(false)?;
        stage.end_scope(true)?;
        stage.emit_empty_line();

        self.emit_entry_point(stage, "vertex VertexData VertexMain", &params, &members, "VertexMain")
    }

    fn emit_pixel_stage(
        &self,
        graph: &ShaderGraph,
        doc: &Document,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        self.emit_header(stage);
        let light_data = stage.uniform_block(block::LIGHT_DATA).cloned();
        if light_data.is_some() {
            stage.emit_line(
                &format!("#define MAX_LIGHT_SOURCES {}", ctx.options.hw_max_active_light_sources),
                false,
            );
            stage.emit_empty_line();
        }
        for def in self.syntax.type_definitions() {
            stage.emit_block(def);
        }
        stage.emit_empty_line();
        if let Some(lights) = &light_data {
            let fields = block_declarations(&self.syntax, lights, "", false)?;
            self.emit_struct(stage, block::LIGHT_DATA, &fields)?;
        }
        let vd = stage.input_block(block::VERTEX_DATA).cloned();
        let vd_members = self.vertex_data_members(vd.as_ref())?;
        self.emit_struct(stage, block::VERTEX_DATA, &vd_members)?;

        let mut members = Vec::new();
        let mut params = vec!["VertexData vd [[stage_in]]".to_string()];
        self.emit_uniform_buffers(stage, &mut members, &mut params)?;
        members.push(ContextMember { declaration: "VertexData vd;".to_string(), initializer: "vd".to_string() });

        self.begin_context(stage, &members);
        hw::emit_light_functions(graph, doc, ctx, stage)?;
        emit_function_definitions(graph, ctx, stage)?;

        let outputs = stage.output_block(block::PIXEL_OUTPUTS).cloned();
        let first = outputs
            .as_ref()
            .and_then(|b| b.ports().first())
            .map(|p| p.variable.clone())
            .ok_or_else(|| Error::generation("shader has no outputs"))?;
        stage.emit_line("float4 FragmentMain()", false);
        stage.begin_scope(Brackets::Braces);
        if let Some(outputs) = &outputs {
            for port in outputs.ports() {
                stage.emit_line(&format!("float4 {} = float4(0.0)", port.variable), true);
            }
        }
        hw::emit_pixel_calls(graph, ctx, stage)?;
        stage.emit_line(&format!("return {first}"), true);
        stage.end_scope(false)?;
        stage.end_scope(true)?;
        stage.emit_empty_line();

        self.emit_entry_point(stage, "fragment float4 FragmentMain", &params, &members, "FragmentMain")
    }
}

impl ShaderGenerator for MslShaderGenerator {
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

        let mut tokens = hw::token_substitutions(&stages);
        // Vertex attributes are read through the stage input struct.
        if let Some(inputs) = stages
            .iter()
            .find(|s| s.name == VERTEX)
            .and_then(|s| s.input_block(block::VERTEX_INPUTS))
        {
            for port in inputs.ports() {
                tokens.insert(port.name.clone(), format!("{}.{}", inputs.instance, port.variable));
            }
        }
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
    fn matrices_are_written_by_column() {
        let syntax = msl_syntax();
        let ts = TypeSystem::standard();
        let m = ts.get(names::MATRIX33).unwrap();
        let v = Value::Matrix33([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let text = syntax.value(&m, &v, false).unwrap();
        assert!(text.starts_with("float3x3(float3(1.000000, 0.000000, 0.000000), float3("));
    }

    #[test]
    fn outputs_are_thread_references() {
        let syntax = msl_syntax();
        let ts = TypeSystem::standard();
        let c3 = ts.get(names::COLOR3).unwrap();
        assert_eq!(syntax.output_type_name(&c3).unwrap(), "thread float3&");
        assert_eq!(syntax.sample_texture("tex0", "uv"), "tex0.tex.sample(tex0.s, uv)");
    }
}
