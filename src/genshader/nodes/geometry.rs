//! Geometric property nodes for the hardware targets. Each one declares a
//! vertex input, forwards it through the vertex data block and reads it back
//! in the pixel stage.

use crate::document::{Document, ElementId};
use crate::error::Result;
use crate::genshader::context::GenContext;
use crate::genshader::emit::output_variable;
use crate::genshader::graph::{ShaderGraph, ShaderNode};
use crate::genshader::hw::{self, token};
use crate::genshader::stage::{PIXEL, ShaderStage, VERTEX};
use crate::types::{names, stable_hash};
use crate::value::Value;

use super::ShaderNodeImpl;

/// Index of "world" in the `space` enumeration `model,object,world`.
const WORLD_SPACE: i32 = 2;

fn is_world_space(node: &ShaderNode) -> bool {
    match node.input("space").and_then(|i| i.value.as_ref()) {
        Some(Value::Integer(i)) => *i == WORLD_SPACE,
        Some(Value::String(s)) => s == "world",
        _ => false,
    }
}

fn emit_pixel_read(node: &ShaderNode, ctx: &GenContext<'_>, stage: &mut ShaderStage, expr: &str) -> Result<()> {
    let output = &node.outputs[0];
    let ty = ctx.syntax().type_name(&output.ty)?;
    stage.emit_line(&format!("{ty} {} = {expr}", output_variable(output, ctx)), true);
    Ok(())
}

macro_rules! impl_basics {
    () => {
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
    };
}

#[derive(Debug, Default)]
pub struct TexcoordNode {
    name: String,
    hash: u64,
}

fn texcoord_index(node: &ShaderNode) -> i32 {
    node.input("index")
        .and_then(|i| i.value.as_ref())
        .and_then(Value::as_integer)
        .unwrap_or(0)
}

impl ShaderNodeImpl for TexcoordNode {
    impl_basics!();

    fn create_variables(&self, node: &ShaderNode, ctx: &GenContext<'_>, stages: &mut [ShaderStage]) -> Result<()> {
        let index = texcoord_index(node);
        let v2 = ctx.types().get(names::VECTOR2)?;
        hw::add_vertex_input(stages, &v2, &format!("{}_{index}", token::IN_TEXCOORD));
        hw::add_stage_connector(stages, &v2, &format!("texcoord_{index}"));
        Ok(())
    }

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        _graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        let index = texcoord_index(node);
        let connector = format!("texcoord_{index}");
        if stage.name == VERTEX {
            hw::emit_vertex_connector(stage, &connector, &format!("{}_{index}", token::IN_TEXCOORD));
        } else if stage.name == PIXEL {
            let uv = format!("{}.{connector}", token::VERTEX_DATA);
            let expr = if ctx.options.file_texture_vertical_flip {
                let v2 = ctx.types().get(names::VECTOR2)?;
                format!("{}({uv}.x, 1.0 - {uv}.y)", ctx.syntax().type_name(&v2)?)
            } else {
                uv
            };
            emit_pixel_read(node, ctx, stage, &expr)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PositionNode {
    name: String,
    hash: u64,
}

impl ShaderNodeImpl for PositionNode {
    impl_basics!();

    fn create_variables(&self, node: &ShaderNode, ctx: &GenContext<'_>, stages: &mut [ShaderStage]) -> Result<()> {
        let v3 = ctx.types().get(names::VECTOR3)?;
        hw::add_vertex_input(stages, &v3, token::IN_POSITION);
        let connector = if is_world_space(node) { "positionWorld" } else { "positionObject" };
        hw::add_stage_connector(stages, &v3, connector);
        Ok(())
    }

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        _graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        let world = is_world_space(node);
        let connector = if world { "positionWorld" } else { "positionObject" };
        if stage.name == VERTEX {
            let expr = if world { "hPositionWorld.xyz" } else { token::IN_POSITION };
            hw::emit_vertex_connector(stage, connector, expr);
        } else if stage.name == PIXEL {
            emit_pixel_read(node, ctx, stage, &format!("{}.{connector}", token::VERTEX_DATA))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NormalNode {
    name: String,
    hash: u64,
}

/// Vertex expression for the world space normal.
pub(crate) fn world_normal_expression(ctx: &GenContext<'_>) -> Result<String> {
    let v4 = ctx.types().get(names::VECTOR4)?;
    Ok(format!(
        "normalize(({} * {}({}, 0.0)).xyz)",
        token::WORLD_INVERSE_TRANSPOSE_MATRIX,
        ctx.syntax().type_name(&v4)?,
        token::IN_NORMAL
    ))
}

impl ShaderNodeImpl for NormalNode {
    impl_basics!();

    fn create_variables(&self, node: &ShaderNode, ctx: &GenContext<'_>, stages: &mut [ShaderStage]) -> Result<()> {
        let v3 = ctx.types().get(names::VECTOR3)?;
        hw::add_vertex_input(stages, &v3, token::IN_NORMAL);
        if is_world_space(node) {
            let m44 = ctx.types().get(names::MATRIX44)?;
            hw::add_private_uniform(stages, VERTEX, &m44, token::WORLD_INVERSE_TRANSPOSE_MATRIX, None);
            hw::add_stage_connector(stages, &v3, "normalWorld");
        } else {
            hw::add_stage_connector(stages, &v3, "normalObject");
        }
        Ok(())
    }

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        _graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        let world = is_world_space(node);
        let connector = if world { "normalWorld" } else { "normalObject" };
        if stage.name == VERTEX {
            let expr = if world {
                world_normal_expression(ctx)?
            } else {
                token::IN_NORMAL.to_string()
            };
            hw::emit_vertex_connector(stage, connector, &expr);
        } else if stage.name == PIXEL {
            emit_pixel_read(node, ctx, stage, &format!("normalize({}.{connector})", token::VERTEX_DATA))?;
        }
        Ok(())
    }
}
