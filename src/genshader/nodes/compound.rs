use crate::document::{Document, ElementId};
use crate::error::{Error, Result};
use crate::genshader::context::{ClosureKind, GenContext};
use crate::genshader::emit::{
    emit_function_calls, emit_function_definitions, emit_output_declaration, literal, output_variable,
    socket_result, upstream_result,
};
use crate::genshader::graph::{Classification, ShaderGraph, ShaderNode};
use crate::genshader::stage::{Brackets, PIXEL, ShaderStage, VERTEX};
use crate::types::stable_hash;

use super::ShaderNodeImpl;

/// A nodedef implemented by a node graph, emitted as one function per
/// closure context the node responds to.
#[derive(Debug, Default)]
pub struct CompoundNode {
    name: String,
    function_name: String,
    hash: u64,
    graph: Option<ShaderGraph>,
}

impl CompoundNode {
    fn graph(&self) -> Result<&ShaderGraph> {
        self.graph
            .as_ref()
            .ok_or_else(|| Error::generation(format!("compound '{}' used before initialization", self.name)))
    }

    fn contexts(&self, node: &ShaderNode, ctx: &GenContext<'_>) -> Vec<ClosureKind> {
        if node.has_classification(Classification::CLOSURE) {
            ctx.generator().node_context_kinds(node)
        } else {
            vec![ClosureKind::Default]
        }
    }
}

impl ShaderNodeImpl for CompoundNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn initialize(&mut self, doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<()> {
        self.name = doc.name(element).to_string();
        self.function_name = ctx.syntax().make_valid_name(&self.name);
        self.hash = stable_hash(&self.function_name);
        self.graph = Some(ShaderGraph::create_compound(doc, element, ctx)?);
        Ok(())
    }

    fn add_classification(&self, node: &mut ShaderNode) {
        if let Some(graph) = &self.graph {
            node.classification |= graph.classification();
        }
    }

    fn create_variables(&self, _node: &ShaderNode, ctx: &GenContext<'_>, stages: &mut [ShaderStage]) -> Result<()> {
        for inner in self.graph()?.nodes() {
            inner.imp.create_variables(inner, ctx, stages)?;
        }
        Ok(())
    }

    fn emit_function_definition(&self, node: &ShaderNode, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
        let graph = self.graph()?;
        emit_function_definitions(graph, ctx, stage)?;
        if stage.name != PIXEL || !stage.add_function_definition(self.hash) {
            return Ok(());
        }
        let syntax = ctx.syntax();
        let types = ctx.types();
        for kind in self.contexts(node, ctx) {
            let closure = ctx.generator().closure_context(kind);
            let out_type = graph
                .output_sockets()
                .first()
                .map(|s| s.ty.name().to_string())
                .unwrap_or_default();

            let mut params = Vec::new();
            let mut suffix = String::new();
            if let Some(cc) = &closure {
                suffix = cc.function_suffix(&out_type).to_string();
                for (arg_type, arg_name) in cc.arguments(&out_type) {
                    let ty = types.get(arg_type)?;
                    params.push(format!("{} {arg_name}", syntax.type_name(&ty)?));
                }
            }
            for socket in graph.input_sockets() {
                params.push(format!("{} {}", syntax.type_name(&socket.ty)?, socket.variable));
            }
            for socket in graph.output_sockets() {
                params.push(format!("{} {}", syntax.output_type_name(&socket.ty)?, socket.variable));
            }

            stage.emit_line(&format!("void {}{suffix}({})", self.function_name, params.join(", ")), false);
            stage.begin_scope(Brackets::Braces);
            let pushed = closure.is_some();
            if let Some(cc) = closure {
                ctx.push_closure_context(cc);
            }
            let result = emit_function_calls(graph, ctx, stage, None, true);
            if pushed {
                ctx.pop_closure_context();
            }
            result?;
            for socket in graph.output_sockets() {
                let value = socket_result(socket, graph, ctx)?;
                stage.emit_line(&format!("{} = {value}", socket.variable), true);
            }
            stage.end_scope(false)?;
            stage.emit_empty_line();
        }
        Ok(())
    }

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        let inner = self.graph()?;
        if stage.name == VERTEX {
            // Geometric nodes inside the compound still need their vertex code.
            for child in inner.nodes() {
                child.imp.emit_function_call(child, inner, ctx, stage)?;
            }
            return Ok(());
        }
        if stage.name != PIXEL {
            return Ok(());
        }

        for output in &node.outputs {
            emit_output_declaration(output, stage, ctx, true)?;
        }
        let mut args = Vec::new();
        let mut suffix = String::new();
        if node.has_classification(Classification::CLOSURE) {
            if let Some(cc) = ctx.closure_context() {
                let closure_type = node.outputs[0].ty.name();
                suffix = cc.function_suffix(closure_type).to_string();
                args.extend(cc.arguments(closure_type).into_iter().map(|(_, n)| n.to_string()));
            }
        }
        // Inputs are passed in socket order, which follows the nodedef.
        for socket in inner.input_sockets() {
            match node.input(&socket.name) {
                Some(input) => args.push(upstream_result(input, graph, ctx)?),
                None => args.push(literal(ctx.syntax(), &socket.ty, socket.value.as_ref(), false)?),
            }
        }
        for output in &node.outputs {
            args.push(output_variable(output, ctx));
        }
        stage.emit_line(&format!("{}{suffix}({})", self.function_name, args.join(", ")), true);
        Ok(())
    }
}
