use crate::document::{Document, ElementId};
use crate::error::{Error, Result};
use crate::genshader::context::GenContext;
use crate::genshader::emit::{emit_branch_calls, emit_output_declaration, output_variable, upstream_result};
use crate::genshader::graph::{ShaderGraph, ShaderNode, conditional_branches};
use crate::genshader::stage::{Brackets, PIXEL, ShaderStage};
use crate::types::{names, stable_hash};

fn node_index(node: &ShaderNode, graph: &ShaderGraph) -> Result<usize> {
    graph
        .node_index(&node.name)
        .ok_or_else(|| Error::generation(format!("node '{}' is not part of graph '{}'", node.name, graph.name)))
}

fn required_input<'n>(node: &'n ShaderNode, name: &str) -> Result<&'n crate::genshader::graph::ShaderInput> {
    node.input(name)
        .ok_or_else(|| Error::generation(format!("conditional '{}' has no input '{name}'", node.name)))
}

/// Emit one branch body: the nodes it owns, then the output assignment.
fn emit_branch(
    node: &ShaderNode,
    owner: usize,
    branch: usize,
    graph: &ShaderGraph,
    ctx: &mut GenContext<'_>,
    stage: &mut ShaderStage,
) -> Result<()> {
    stage.begin_scope(Brackets::Braces);
    emit_branch_calls(graph, owner, branch, ctx, stage)?;
    let value = upstream_result(&node.inputs[branch], graph, ctx)?;
    stage.emit_line(&format!("{} = {value}", output_variable(&node.outputs[0], ctx)), true);
    stage.end_scope(false)
}

/// `compare`: `in1` when `intest <= cutoff`, `in2` otherwise.
#[derive(Debug, Default)]
pub struct CompareNode {
    name: String,
    hash: u64,
}

impl super::ShaderNodeImpl for CompareNode {
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

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        if stage.name != PIXEL {
            return Ok(());
        }
        let owner = node_index(node, graph)?;
        let intest = upstream_result(required_input(node, "intest")?, graph, ctx)?;
        let cutoff = upstream_result(required_input(node, "cutoff")?, graph, ctx)?;
        let branches = conditional_branches(node);
        let &[in1, in2] = branches.as_slice() else {
            return Err(Error::generation(format!("compare '{}' needs inputs in1 and in2", node.name)));
        };

        emit_output_declaration(&node.outputs[0], stage, ctx, true)?;
        stage.emit_line(&format!("if ({intest} <= {cutoff})"), false);
        emit_branch(node, owner, in1, graph, ctx, stage)?;
        stage.emit_line("else", false);
        emit_branch(node, owner, in2, graph, ctx, stage)
    }
}

/// `switch`: picks `in1`..`in5` by the floor of `which`.
#[derive(Debug, Default)]
pub struct SwitchNode {
    name: String,
    hash: u64,
}

impl super::ShaderNodeImpl for SwitchNode {
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

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        if stage.name != PIXEL {
            return Ok(());
        }
        let owner = node_index(node, graph)?;
        let which_input = required_input(node, "which")?;
        let which = upstream_result(which_input, graph, ctx)?;
        let integer = which_input.ty.name() == names::INTEGER;
        let branches = conditional_branches(node);

        emit_output_declaration(&node.outputs[0], stage, ctx, true)?;
        let last = branches.len().saturating_sub(1);
        for (k, branch) in branches.iter().enumerate() {
            let bound = if integer { format!("{}", k + 1) } else { format!("{}.0", k + 1) };
            if k == 0 {
                stage.emit_line(&format!("if ({which} < {bound})"), false);
            } else if k < last {
                stage.emit_line(&format!("else if ({which} < {bound})"), false);
            } else {
                stage.emit_line("else", false);
            }
            emit_branch(node, owner, *branch, graph, ctx, stage)?;
        }
        Ok(())
    }
}
