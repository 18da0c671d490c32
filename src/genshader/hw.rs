//! Pieces shared by the rasterization targets (GLSL and MSL): stage and
//! block layout, `$token` naming, light plumbing and output conversion.

use std::collections::HashMap;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::{TypeDesc, names};
use crate::value::Value;

use super::context::{ClosureKind, GenContext, SpecularEnvironmentMethod};
use super::emit::{emit_function_calls, emit_node_call, literal, socket_result};
use super::graph::{Classification, Connection, ShaderGraph, ShaderNode};
use super::nodes::{LightShaderNode, NormalNode, PositionNode, SurfaceNode, TexcoordNode, register_conditionals};
use super::registry::ImplementationRegistry;
use super::stage::{Brackets, PIXEL, ShaderStage, VERTEX, stage_mut};
use super::syntax::Syntax;

pub mod token {
    pub const IN_POSITION: &str = "$inPosition";
    pub const IN_NORMAL: &str = "$inNormal";
    pub const IN_TEXCOORD: &str = "$inTexcoord";
    pub const WORLD_MATRIX: &str = "$worldMatrix";
    pub const WORLD_INVERSE_TRANSPOSE_MATRIX: &str = "$worldInverseTransposeMatrix";
    pub const VIEW_PROJECTION_MATRIX: &str = "$viewProjectionMatrix";
    pub const VIEW_POSITION: &str = "$viewPosition";
    pub const NUM_ACTIVE_LIGHT_SOURCES: &str = "$numActiveLightSources";
    pub const LIGHT_DATA: &str = "$lightData";
    pub const ENV_MATRIX: &str = "$envMatrix";
    pub const ENV_RADIANCE: &str = "$envRadiance";
    pub const ENV_RADIANCE_MIPS: &str = "$envRadianceMips";
    pub const ENV_RADIANCE_SAMPLES: &str = "$envRadianceSamples";
    pub const ENV_IRRADIANCE: &str = "$envIrradiance";
    pub const SHADOW_MAP: &str = "$shadowMap";
    pub const SHADOW_MATRIX: &str = "$shadowMatrix";
    pub const AMB_OCC_MAP: &str = "$ambOccMap";
    pub const AMB_OCC_GAIN: &str = "$ambOccGain";
    pub const ALPHA_THRESHOLD: &str = "$alphaThreshold";
    pub const VERTEX_DATA: &str = "$vd";
}

pub mod block {
    pub const VERTEX_INPUTS: &str = "VertexInputs";
    pub const VERTEX_DATA: &str = "VertexData";
    pub const PRIVATE_UNIFORMS: &str = "PrivateUniforms";
    pub const PUBLIC_UNIFORMS: &str = "PublicUniforms";
    pub const LIGHT_DATA: &str = "LightData";
    pub const PIXEL_OUTPUTS: &str = "PixelOutputs";
}

pub const LIGHT_DATA_INSTANCE: &str = "u_lightData";

/// Register the native implementations both hardware targets share.
pub fn register_implementations(registry: &mut ImplementationRegistry, target: &str) {
    register_conditionals(registry, target);
    registry.register(format!("IM_texcoord_vector2_{target}"), || Box::new(TexcoordNode::default()));
    registry.register(format!("IM_position_vector3_{target}"), || Box::new(PositionNode::default()));
    registry.register(format!("IM_normal_vector3_{target}"), || Box::new(NormalNode::default()));
    registry.register(format!("IM_surface_{target}"), || Box::new(SurfaceNode::default()));
    registry.register(format!("IM_point_light_{target}"), || Box::new(LightShaderNode::default()));
    registry.register(format!("IM_directional_light_{target}"), || Box::new(LightShaderNode::default()));
}

/// Closure contexts a node responds to on hardware targets.
pub fn node_context_kinds(node: &ShaderNode) -> Vec<ClosureKind> {
    if node.has_classification(Classification::BSDF_R) {
        vec![ClosureKind::Reflection, ClosureKind::Indirect]
    } else if node.has_classification(Classification::BSDF_T) {
        vec![ClosureKind::Transmission]
    } else if node.has_classification(Classification::BSDF) {
        vec![ClosureKind::Reflection, ClosureKind::Transmission, ClosureKind::Indirect]
    } else if node.has_classification(Classification::EDF) {
        vec![ClosureKind::Emission]
    } else {
        vec![ClosureKind::Default]
    }
}

/// True when the graph needs light loops and view-dependent uniforms.
pub fn requires_lighting(graph: &ShaderGraph) -> bool {
    graph.has_classification(Classification::SHADER | Classification::SURFACE)
        || graph.has_classification(Classification::BSDF)
}

fn requires_light_loop(graph: &ShaderGraph, ctx: &GenContext<'_>) -> bool {
    requires_lighting(graph) && ctx.options.hw_max_active_light_sources > 0
}

/// Code-side name of a `$token` port. `$inX` becomes `i_x`, uniforms get `u_`.
fn token_variable(name: &str, uniform: bool) -> String {
    let bare = name.trim_start_matches('$');
    if let Some(rest) = bare.strip_prefix("in") {
        let mut chars = rest.chars();
        if let Some(first) = chars.next() {
            if first.is_ascii_uppercase() {
                return format!("i_{}{}", first.to_ascii_lowercase(), chars.as_str());
            }
        }
    }
    if uniform {
        format!("u_{bare}")
    } else {
        bare.to_string()
    }
}

fn add_port(stage: &mut ShaderStage, kind: BlockKind, block: &str, ty: &TypeDesc, name: &str, value: Option<Value>) {
    let b = match kind {
        BlockKind::Uniform => stage.uniform_block_mut(block),
        BlockKind::Input => stage.input_block_mut(block),
        BlockKind::Output => stage.output_block_mut(block),
    };
    if let Some(b) = b {
        b.add(ty, name, value);
    }
}

#[derive(Clone, Copy)]
enum BlockKind {
    Uniform,
    Input,
    Output,
}

/// Add a vertex input to the vertex stage.
pub fn add_vertex_input(stages: &mut [ShaderStage], ty: &TypeDesc, name: &str) {
    if let Some(vs) = stage_mut(stages, VERTEX) {
        add_port(vs, BlockKind::Input, block::VERTEX_INPUTS, ty, name, None);
    }
}

/// Add a private uniform to one stage.
pub fn add_private_uniform(stages: &mut [ShaderStage], stage: &str, ty: &TypeDesc, name: &str, value: Option<Value>) {
    if let Some(s) = stage_mut(stages, stage) {
        add_port(s, BlockKind::Uniform, block::PRIVATE_UNIFORMS, ty, name, value);
    }
}

/// Add a variable passed from the vertex to the pixel stage.
pub fn add_stage_connector(stages: &mut [ShaderStage], ty: &TypeDesc, name: &str) {
    if let Some(vs) = stage_mut(stages, VERTEX) {
        add_port(vs, BlockKind::Output, block::VERTEX_DATA, ty, name, None);
    }
    if let Some(ps) = stage_mut(stages, PIXEL) {
        add_port(ps, BlockKind::Input, block::VERTEX_DATA, ty, name, None);
    }
}

/// Emit `$vd.<name> = <expr>;` in the vertex stage once per connector.
pub fn emit_vertex_connector(stage: &mut ShaderStage, name: &str, expr: &str) {
    let Some(port) = stage.output_block_mut(block::VERTEX_DATA).and_then(|b| b.find_mut(name)) else {
        return;
    };
    if port.emitted {
        return;
    }
    port.emitted = true;
    stage.emit_line(&format!("{}.{name} = {expr}", token::VERTEX_DATA), true);
}

/// Create the vertex and pixel stages with every block the graph needs.
pub fn create_stages(graph: &ShaderGraph, doc: &Document, ctx: &GenContext<'_>) -> Result<Vec<ShaderStage>> {
    let types = ctx.types();
    let float = types.get(names::FLOAT)?;
    let integer = types.get(names::INTEGER)?;
    let v3 = types.get(names::VECTOR3)?;
    let v4 = types.get(names::VECTOR4)?;
    let m44 = types.get(names::MATRIX44)?;
    let filename = types.get(names::FILENAME)?;

    let mut vs = ShaderStage::new(VERTEX, "main");
    vs.create_input_block(block::VERTEX_INPUTS, "i_vs");
    vs.create_uniform_block(block::PRIVATE_UNIFORMS, "u_prv");
    vs.create_uniform_block(block::PUBLIC_UNIFORMS, "u_pub");
    vs.create_output_block(block::VERTEX_DATA, "vd");

    let mut ps = ShaderStage::new(PIXEL, "main");
    ps.create_input_block(block::VERTEX_DATA, "vd");
    ps.create_uniform_block(block::PRIVATE_UNIFORMS, "u_prv");
    ps.create_uniform_block(block::PUBLIC_UNIFORMS, "u_pub");
    ps.create_output_block(block::PIXEL_OUTPUTS, "");

    add_port(&mut vs, BlockKind::Input, block::VERTEX_INPUTS, &v3, token::IN_POSITION, None);
    add_port(&mut vs, BlockKind::Uniform, block::PRIVATE_UNIFORMS, &m44, token::WORLD_MATRIX, None);
    add_port(&mut vs, BlockKind::Uniform, block::PRIVATE_UNIFORMS, &m44, token::VIEW_PROJECTION_MATRIX, None);

    let opts = &ctx.options;
    if requires_lighting(graph) {
        let prv = block::PRIVATE_UNIFORMS;
        add_port(&mut ps, BlockKind::Uniform, prv, &v3, token::VIEW_POSITION, None);
        if opts.hw_max_active_light_sources > 0 {
            add_port(&mut ps, BlockKind::Uniform, prv, &integer, token::NUM_ACTIVE_LIGHT_SOURCES, Some(Value::Integer(0)));
        }
        if opts.hw_transparency {
            add_port(&mut ps, BlockKind::Uniform, prv, &float, token::ALPHA_THRESHOLD, Some(Value::Float(0.001)));
        }
        if opts.hw_shadow_map {
            add_port(&mut ps, BlockKind::Uniform, prv, &filename, token::SHADOW_MAP, None);
            add_port(&mut ps, BlockKind::Uniform, prv, &m44, token::SHADOW_MATRIX, None);
        }
        if opts.hw_specular_environment_method != SpecularEnvironmentMethod::None {
            add_port(&mut ps, BlockKind::Uniform, prv, &m44, token::ENV_MATRIX, None);
            add_port(&mut ps, BlockKind::Uniform, prv, &filename, token::ENV_RADIANCE, None);
            add_port(&mut ps, BlockKind::Uniform, prv, &integer, token::ENV_RADIANCE_MIPS, Some(Value::Integer(1)));
            if opts.hw_specular_environment_method == SpecularEnvironmentMethod::Fis {
                add_port(&mut ps, BlockKind::Uniform, prv, &integer, token::ENV_RADIANCE_SAMPLES, Some(Value::Integer(16)));
            }
            add_port(&mut ps, BlockKind::Uniform, prv, &filename, token::ENV_IRRADIANCE, None);
        }
    }

    for socket in graph.input_sockets() {
        let Some(ub) = ps.uniform_block_mut(block::PUBLIC_UNIFORMS) else { continue };
        let port = ub.add(&socket.ty, &socket.name, socket.value.clone());
        port.variable = socket.variable.clone();
        port.path = socket.path.clone();
    }
    for socket in graph.output_sockets() {
        let Some(ob) = ps.output_block_mut(block::PIXEL_OUTPUTS) else { continue };
        let port = ob.add(&v4, &socket.name, None);
        port.variable = socket.variable.clone();
    }

    let mut stages = vec![vs, ps];
    if requires_lighting(graph) && opts.hw_ambient_occlusion {
        let v2 = types.get(names::VECTOR2)?;
        add_vertex_input(&mut stages, &v2, &format!("{}_0", token::IN_TEXCOORD));
        add_stage_connector(&mut stages, &v2, "texcoord_0");
        add_private_uniform(&mut stages, PIXEL, &filename, token::AMB_OCC_MAP, None);
        add_private_uniform(&mut stages, PIXEL, &float, token::AMB_OCC_GAIN, Some(Value::Float(1.0)));
    }
    for node in graph.nodes() {
        node.imp.create_variables(node, ctx, &mut stages)?;
    }

    if requires_light_loop(graph, ctx) {
        if let Some(ps) = stage_mut(&mut stages, PIXEL) {
            let light_block = ps.create_uniform_block(block::LIGHT_DATA, token::LIGHT_DATA);
            light_block.add(&integer, "type", None);
            for light in ctx.bound_lights() {
                let def = doc.node_def(&light.node_def).ok_or_else(|| {
                    Error::document(format!("bound light nodedef '{}' not found", light.node_def))
                })?;
                for input in doc.active_inputs(def)? {
                    let ty = types.get(doc.type_name(input))?;
                    light_block.add(&ty, doc.name(input), None);
                }
            }
        }
    }

    for stage in stages.iter_mut() {
        for b in stage.blocks_mut() {
            let uniform = b.name == block::PRIVATE_UNIFORMS || b.name == block::PUBLIC_UNIFORMS;
            for port in b.ports_mut() {
                if port.name.starts_with('$') {
                    port.variable = token_variable(&port.name, uniform);
                }
            }
        }
    }
    Ok(stages)
}

/// `$token` to code map for a stage set: every `$` port plus the fixed
/// vertex data and light data instances.
pub fn token_substitutions(stages: &[ShaderStage]) -> HashMap<String, String> {
    let mut tokens = HashMap::new();
    tokens.insert(token::VERTEX_DATA.to_string(), "vd".to_string());
    tokens.insert(token::LIGHT_DATA.to_string(), LIGHT_DATA_INSTANCE.to_string());
    for stage in stages {
        let blocks = stage
            .uniform_blocks()
            .iter()
            .chain(stage.input_blocks())
            .chain(stage.output_blocks());
        for b in blocks {
            for port in b.ports() {
                if port.name.starts_with('$') {
                    tokens.insert(port.name.clone(), port.variable.clone());
                }
            }
        }
    }
    tokens
}

/// Vertex `main` body after the position transform.
pub fn emit_vertex_calls(graph: &ShaderGraph, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
    emit_function_calls(graph, ctx, stage, None, false)
}

/// `numActiveLightSources()` and `sampleLightSource()` for the bound lights.
pub fn emit_light_functions(
    graph: &ShaderGraph,
    doc: &Document,
    ctx: &mut GenContext<'_>,
    stage: &mut ShaderStage,
) -> Result<()> {
    if !requires_light_loop(graph, ctx) {
        return Ok(());
    }
    let syntax = ctx.syntax();
    let types = ctx.types();
    let v3 = types.get(names::VECTOR3)?;
    let lightshader = types.get(names::LIGHTSHADER)?;

    stage.emit_line("int numActiveLightSources()", false);
    stage.begin_scope(Brackets::Braces);
    stage.emit_line(
        &format!("return min({}, MAX_LIGHT_SOURCES)", token::NUM_ACTIVE_LIGHT_SOURCES),
        true,
    );
    stage.end_scope(false)?;
    stage.emit_empty_line();

    let mut lights = Vec::new();
    for bound in ctx.bound_lights().to_vec() {
        let def = doc.node_def(&bound.node_def).ok_or_else(|| {
            Error::document(format!("bound light nodedef '{}' not found", bound.node_def))
        })?;
        let node = ShaderNode::create(doc, def, None, &bound.node_def, ctx)?;
        node.imp.emit_function_definition(&node, ctx, stage)?;
        lights.push((bound.type_id, node));
    }

    stage.emit_line(
        &format!(
            "void sampleLightSource(LightData light, {} position, {} result)",
            syntax.type_name(&v3)?,
            syntax.output_type_name(&lightshader)?
        ),
        false,
    );
    stage.begin_scope(Brackets::Braces);
    let zero = syntax.default_value(&v3, false)?;
    stage.emit_line(&format!("result.intensity = {zero}"), true);
    stage.emit_line(&format!("result.direction = {zero}"), true);
    for (i, (type_id, node)) in lights.iter().enumerate() {
        let keyword = if i == 0 { "if" } else { "else if" };
        stage.emit_line(&format!("{keyword} (light.type == {type_id})"), false);
        stage.begin_scope(Brackets::Braces);
        node.imp.emit_function_call(node, graph, ctx, stage)?;
        stage.end_scope(false)?;
    }
    stage.end_scope(false)?;
    stage.emit_empty_line();
    Ok(())
}

/// Widen an expression of type `ty` to a four-component output color.
pub fn to_vec4(syntax: &Syntax, v4: &TypeDesc, ty: &TypeDesc, expr: &str) -> Result<String> {
    let v4_name = syntax.type_name(v4)?;
    Ok(if ty.is_float4() {
        expr.to_string()
    } else if ty.is_float3() || ty.is_closure() {
        format!("{v4_name}({expr}, 1.0)")
    } else if ty.is_float2() {
        format!("{v4_name}({expr}, 0.0, 1.0)")
    } else if ty.is_scalar() && matches!(ty.name(), names::FLOAT | names::INTEGER | names::BOOLEAN) {
        format!("{v4_name}({expr}, {expr}, {expr}, 1.0)")
    } else {
        format!("{v4_name}(0.0, 0.0, 0.0, 1.0)")
    })
}

/// Pixel `main` body: texture nodes, root closure and shader nodes, then
/// the final output assignments.
pub fn emit_pixel_calls(graph: &ShaderGraph, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
    emit_function_calls(graph, ctx, stage, Some(Classification::TEXTURE), true)?;
    for socket in graph.output_sockets() {
        let Some(Connection::Node { node, .. }) = socket.connection else { continue };
        let node = graph.node(node);
        if node.has_classification(Classification::CLOSURE) || node.has_classification(Classification::SHADER) {
            emit_node_call(node, graph, ctx, stage)?;
        }
    }
    emit_final_outputs(graph, ctx, stage)
}

fn emit_final_outputs(graph: &ShaderGraph, ctx: &GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
    let syntax = ctx.syntax();
    let types = ctx.types();
    let v3 = types.get(names::VECTOR3)?;
    let v4 = types.get(names::VECTOR4)?;
    for socket in graph.output_sockets() {
        let out = &socket.variable;
        if socket.connection.is_none() {
            let line = if socket.ty.is_editable() {
                let value = literal(syntax, &socket.ty, socket.value.as_ref(), false)?;
                to_vec4(syntax, &v4, &socket.ty, &value)?
            } else {
                format!("{}(0.0, 0.0, 0.0, 1.0)", syntax.type_name(&v4)?)
            };
            stage.emit_line(&format!("{out} = {line}"), true);
            continue;
        }
        let result = socket_result(socket, graph, ctx)?;
        if socket.ty.name() == names::SURFACESHADER {
            let v4_name = syntax.type_name(&v4)?;
            if ctx.options.hw_transparency {
                stage.emit_line(
                    &format!(
                        "float outAlpha = clamp(1.0 - dot({result}.transparency, {}(0.3333)), 0.0, 1.0)",
                        syntax.type_name(&v3)?
                    ),
                    true,
                );
                stage.emit_line(&format!("{out} = {v4_name}({result}.color, outAlpha)"), true);
                stage.emit_line(&format!("if (outAlpha < {})", token::ALPHA_THRESHOLD), false);
                stage.begin_scope(Brackets::Braces);
                stage.emit_line(syntax.discard, true);
                stage.end_scope(false)?;
            } else {
                stage.emit_line(&format!("{out} = {v4_name}({result}.color, 1.0)"), true);
            }
        } else if socket.ty.is_shader() {
            stage.emit_line(&format!("{out} = {}(0.0, 0.0, 0.0, 1.0)", syntax.type_name(&v4)?), true);
        } else {
            stage.emit_line(&format!("{out} = {}", to_vec4(syntax, &v4, &socket.ty, &result)?), true);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_variables_follow_naming_rules() {
        assert_eq!(token_variable("$inPosition", false), "i_position");
        assert_eq!(token_variable("$inTexcoord_0", false), "i_texcoord_0");
        assert_eq!(token_variable("$worldMatrix", true), "u_worldMatrix");
        assert_eq!(token_variable("$index", true), "u_index");
    }
}
