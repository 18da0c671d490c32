use std::collections::BTreeSet;

use crate::document::{Document, ElementId};
use crate::error::{Error, Result};
use crate::genshader::context::{ClosureKind, GenContext};
use crate::genshader::emit::{emit_node_call, emit_output_declaration, output_variable, upstream_result};
use crate::genshader::graph::{Classification, ShaderGraph, ShaderNode};
use crate::genshader::hw::{self, token};
use crate::genshader::stage::{Brackets, PIXEL, ShaderStage, VERTEX};
use crate::types::{names, stable_hash};

use super::ShaderNodeImpl;
use super::geometry::world_normal_expression;

/// The `surface` shader node: evaluates its BSDF against every active light,
/// the environment and its EDF, and writes a `surfaceshader` result.
#[derive(Debug, Default)]
pub struct SurfaceNode {
    name: String,
    hash: u64,
}

/// Emit the calls of closure nodes in `used` matching `filter` under `kind`.
fn emit_closures(
    graph: &ShaderGraph,
    used: &BTreeSet<usize>,
    filter: Classification,
    kind: ClosureKind,
    ctx: &mut GenContext<'_>,
    stage: &mut ShaderStage,
) -> Result<()> {
    let closure = ctx.generator().closure_context(kind);
    let pushed = closure.is_some();
    if let Some(cc) = closure {
        ctx.push_closure_context(cc);
    }
    let mut result = Ok(());
    for index in used {
        let node = graph.node(*index);
        if node.has_classification(filter) {
            result = emit_node_call(node, graph, ctx, stage);
            if result.is_err() {
                break;
            }
        }
    }
    if pushed {
        ctx.pop_closure_context();
    }
    result
}

impl ShaderNodeImpl for SurfaceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn initialize(&mut self, doc: &Document, element: ElementId, _ctx: &mut GenContext<'_>) -> Result<()> {
        self.name = doc.name(element).to_string();
        self.hash = stable_hash(&self.name);
        Ok(())
    }

    fn create_variables(&self, _node: &ShaderNode, ctx: &GenContext<'_>, stages: &mut [ShaderStage]) -> Result<()> {
        let types = ctx.types();
        let v3 = types.get(names::VECTOR3)?;
        let m44 = types.get(names::MATRIX44)?;
        hw::add_vertex_input(stages, &v3, token::IN_POSITION);
        hw::add_vertex_input(stages, &v3, token::IN_NORMAL);
        hw::add_private_uniform(stages, VERTEX, &m44, token::WORLD_INVERSE_TRANSPOSE_MATRIX, None);
        hw::add_stage_connector(stages, &v3, "normalWorld");
        hw::add_stage_connector(stages, &v3, "positionWorld");
        hw::add_private_uniform(stages, PIXEL, &v3, token::VIEW_POSITION, None);
        Ok(())
    }

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        if stage.name == VERTEX {
            hw::emit_vertex_connector(stage, "positionWorld", "hPositionWorld.xyz");
            hw::emit_vertex_connector(stage, "normalWorld", &world_normal_expression(ctx)?);
            return Ok(());
        }
        if stage.name != PIXEL {
            return Ok(());
        }

        let syntax = ctx.syntax();
        let types = ctx.types();
        let v2 = syntax.type_name(&types.get(names::VECTOR2)?)?.to_string();
        let v3 = syntax.type_name(&types.get(names::VECTOR3)?)?.to_string();
        let lightshader = syntax.type_name(&types.get(names::LIGHTSHADER)?)?.to_string();
        let input = |name: &str| {
            node.input(name)
                .ok_or_else(|| Error::generation(format!("surface '{}' has no input '{name}'", node.name)))
        };
        let (bsdf_in, edf_in, opacity_in) = (input("bsdf")?, input("edf")?, input("opacity")?);
        let me = graph
            .node_index(&node.name)
            .ok_or_else(|| Error::generation(format!("surface '{}' is not in graph '{}'", node.name, graph.name)))?;
        let used = graph.upstream_closures(me);
        let out = output_variable(&node.outputs[0], ctx);
        let vd = token::VERTEX_DATA;

        emit_output_declaration(&node.outputs[0], stage, ctx, true)?;
        stage.begin_scope(Brackets::Braces);
        stage.emit_line(&format!("{v3} N = normalize({vd}.normalWorld)"), true);
        stage.emit_line(&format!("{v3} V = normalize({} - {vd}.positionWorld)", token::VIEW_POSITION), true);
        stage.emit_line(&format!("{v3} P = {vd}.positionWorld"), true);
        let opacity = upstream_result(opacity_in, graph, ctx)?;
        stage.emit_line(&format!("float surfaceOpacity = {opacity}"), true);
        stage.emit_empty_line();

        if ctx.options.hw_max_active_light_sources > 0 {
            stage.emit_comment("Shadow and light loop");
            stage.emit_line("int numLights = numActiveLightSources()", true);
            stage.emit_line(&format!("{lightshader} lightShader"), true);
            stage.emit_line(
                "for (int activeLightIndex = 0; activeLightIndex < numLights; ++activeLightIndex)",
                false,
            );
            stage.begin_scope(Brackets::Braces);
            stage.emit_line(
                &format!(
                    "sampleLightSource({}[activeLightIndex], {vd}.positionWorld, lightShader)",
                    token::LIGHT_DATA
                ),
                true,
            );
            stage.emit_line(&format!("{v3} L = lightShader.direction"), true);
            stage.emit_empty_line();
            stage.emit_comment("Calculate the BSDF response for this light source");
            emit_closures(graph, &used, Classification::BSDF, ClosureKind::Reflection, ctx, stage)?;
            stage.emit_empty_line();
            stage.emit_comment("Accumulate the light's contribution");
            let bsdf = upstream_result(bsdf_in, graph, ctx)?;
            stage.emit_line(&format!("{out}.color += lightShader.intensity * {bsdf}"), true);
            stage.end_scope(false)?;
            stage.emit_empty_line();
        }

        stage.emit_line("float occlusion = 1.0", true);
        if ctx.options.hw_ambient_occlusion {
            let uv = if ctx.options.file_texture_vertical_flip {
                format!("{v2}({vd}.texcoord_0.x, 1.0 - {vd}.texcoord_0.y)")
            } else {
                format!("{vd}.texcoord_0")
            };
            stage.emit_line(&format!("{v2} ambOccUv = {uv}"), true);
            let sample = syntax.sample_texture(token::AMB_OCC_MAP, "ambOccUv");
            stage.emit_line(&format!("occlusion = mix(1.0, {sample}.x, {})", token::AMB_OCC_GAIN), true);
        }
        stage.emit_empty_line();

        stage.emit_comment("Add environment contribution");
        stage.begin_scope(Brackets::Braces);
        emit_closures(graph, &used, Classification::BSDF, ClosureKind::Indirect, ctx, stage)?;
        stage.emit_empty_line();
        let bsdf = upstream_result(bsdf_in, graph, ctx)?;
        stage.emit_line(&format!("{out}.color += occlusion * {bsdf}"), true);
        stage.end_scope(false)?;
        stage.emit_empty_line();

        stage.emit_comment("Add surface emission");
        stage.begin_scope(Brackets::Braces);
        emit_closures(graph, &used, Classification::EDF, ClosureKind::Emission, ctx, stage)?;
        let edf = upstream_result(edf_in, graph, ctx)?;
        stage.emit_line(&format!("{out}.color += {edf}"), true);
        stage.end_scope(false)?;

        if ctx.options.hw_transparency {
            stage.emit_empty_line();
            stage.emit_comment("Calculate the BSDF transmission for viewing direction");
            stage.begin_scope(Brackets::Braces);
            emit_closures(graph, &used, Classification::BSDF, ClosureKind::Transmission, ctx, stage)?;
            let bsdf = upstream_result(bsdf_in, graph, ctx)?;
            stage.emit_line(&format!("{out}.transparency += {bsdf}"), true);
            stage.end_scope(false)?;
            stage.emit_empty_line();
            stage.emit_comment("Compute and apply surface opacity");
            stage.begin_scope(Brackets::Braces);
            stage.emit_line(&format!("{out}.color *= surfaceOpacity"), true);
            stage.emit_line(
                &format!("{out}.transparency = mix({v3}(1.0), {out}.transparency, surfaceOpacity)"),
                true,
            );
            stage.end_scope(false)?;
        }
        stage.end_scope(false)
    }
}
