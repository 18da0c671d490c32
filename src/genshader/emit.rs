//! Emission helpers shared by every generator and node implementation.

use std::collections::HashMap;

use crate::error::Result;
use crate::types::TypeDesc;
use crate::value::Value;

use super::context::GenContext;
use super::graph::{Classification, Connection, GraphSocket, ShaderGraph, ShaderInput, ShaderNode, ShaderOutput};
use super::stage::{PIXEL, ShaderPort, ShaderStage};
use super::syntax::{LiteralForm, Syntax};

/// Literal for a value, or the type's default when there is none.
pub fn literal(syntax: &Syntax, ty: &TypeDesc, value: Option<&Value>, uniform: bool) -> Result<String> {
    match value {
        Some(v) => syntax.value(ty, v, uniform),
        None => syntax.default_value(ty, uniform),
    }
}

/// Variable an output is read through, including any active suffix.
pub fn output_variable(output: &ShaderOutput, ctx: &GenContext<'_>) -> String {
    match ctx.output_suffix(&output.variable) {
        Some(suffix) => format!("{}{suffix}", output.variable),
        None => output.variable.clone(),
    }
}

fn connection_expression(
    connection: Connection,
    channels: Option<&str>,
    dst_ty: &TypeDesc,
    graph: &ShaderGraph,
    ctx: &GenContext<'_>,
) -> Result<String> {
    let (variable, src_ty) = match connection {
        Connection::Socket(s) => {
            let socket = &graph.input_sockets()[s];
            let variable = match ctx.input_suffix(&socket.variable) {
                Some(suffix) => format!("{}{suffix}", socket.variable),
                None => socket.variable.clone(),
            };
            (variable, &socket.ty)
        }
        Connection::Node { node, output } => {
            let out = &graph.node(node).outputs[output];
            (output_variable(out, ctx), &out.ty)
        }
    };
    match channels {
        Some(ch) => ctx.syntax().swizzled_variable(&variable, src_ty, ch, dst_ty),
        None => Ok(variable),
    }
}

/// Expression feeding a node input: the upstream variable or a literal.
pub fn upstream_result(input: &ShaderInput, graph: &ShaderGraph, ctx: &GenContext<'_>) -> Result<String> {
    match input.connection {
        Some(c) => connection_expression(c, input.channels.as_deref(), &input.ty, graph, ctx),
        None => literal(ctx.syntax(), &input.ty, input.value.as_ref(), false),
    }
}

/// Expression assigned to a graph output socket.
pub fn socket_result(socket: &GraphSocket, graph: &ShaderGraph, ctx: &GenContext<'_>) -> Result<String> {
    match socket.connection {
        Some(c) => connection_expression(c, socket.channels.as_deref(), &socket.ty, graph, ctx),
        None => literal(ctx.syntax(), &socket.ty, socket.value.as_ref(), false),
    }
}

/// `T name = default;` or `T name;`.
pub fn emit_output_declaration(
    output: &ShaderOutput,
    stage: &mut ShaderStage,
    ctx: &GenContext<'_>,
    assign_default: bool,
) -> Result<()> {
    let syntax = ctx.syntax();
    let ty = syntax.type_name(&output.ty)?;
    let variable = output_variable(output, ctx);
    if assign_default {
        let value = syntax.default_value(&output.ty, false)?;
        stage.emit_line(&format!("{ty} {variable} = {value}"), true);
    } else {
        stage.emit_line(&format!("{ty} {variable}"), true);
    }
    Ok(())
}

/// Declaration of a block port, e.g. `uniform vec3 u_color = vec3(...)`.
pub fn variable_declaration(syntax: &Syntax, port: &ShaderPort, qualifier: &str, assign_value: bool) -> Result<String> {
    let ty_syntax = syntax.type_syntax(&port.ty)?;
    let mut s = String::new();
    if !qualifier.is_empty() {
        s.push_str(qualifier);
        s.push(' ');
    }
    s.push_str(&ty_syntax.name);
    s.push(' ');
    s.push_str(&port.variable);
    s.push_str(&syntax.array_suffix(&port.ty, port.value.as_ref()));
    let is_unsized_array = port.ty.is_array() && port.value.is_none();
    if assign_value && ty_syntax.form != LiteralForm::Opaque && !is_unsized_array {
        s.push_str(" = ");
        s.push_str(&literal(syntax, &port.ty, port.value.as_ref(), true)?);
    }
    Ok(s)
}

pub fn emit_function_definitions(graph: &ShaderGraph, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
    for node in graph.nodes() {
        node.imp.emit_function_definition(node, ctx, stage)?;
    }
    Ok(())
}

/// Emit calls for the graph's nodes in topological order.
///
/// With `check_scope`, nodes used only inside a conditional branch are left
/// for the conditional to emit.
pub fn emit_function_calls(
    graph: &ShaderGraph,
    ctx: &mut GenContext<'_>,
    stage: &mut ShaderStage,
    filter: Option<Classification>,
    check_scope: bool,
) -> Result<()> {
    for node in graph.nodes() {
        if let Some(filter) = filter {
            if !node.has_classification(filter) {
                continue;
            }
        }
        if check_scope && node.referenced_conditionally() {
            if ctx.options.emit_omitted_comments {
                let owner = node
                    .scope
                    .conditional_node
                    .map(|i| graph.node(i).name.as_str())
                    .unwrap_or("");
                stage.emit_comment(&format!(
                    "Omitted node '{}'. Only used in conditional node '{owner}'",
                    node.name
                ));
            }
            continue;
        }
        emit_node_call(node, graph, ctx, stage)?;
    }
    Ok(())
}

/// Emit one node's call, honouring the active closure context. A closure
/// node with no response in the current context produces its default value.
pub fn emit_node_call(node: &ShaderNode, graph: &ShaderGraph, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
    if node.has_classification(Classification::CLOSURE) {
        let kind = ctx.closure_kind();
        if !ctx.generator().node_context_kinds(node).contains(&kind) {
            if stage.name == PIXEL {
                for out in &node.outputs {
                    emit_output_declaration(out, stage, ctx, true)?;
                }
            }
            return Ok(());
        }
    }
    node.imp.emit_function_call(node, graph, ctx, stage)
}

/// Emit the calls of nodes used only by branch `branch` of conditional `owner`.
pub fn emit_branch_calls(
    graph: &ShaderGraph,
    owner: usize,
    branch: usize,
    ctx: &mut GenContext<'_>,
    stage: &mut ShaderStage,
) -> Result<()> {
    for node in graph.nodes() {
        if node.referenced_conditionally()
            && node.scope.conditional_node == Some(owner)
            && node.scope.used_by_branch(branch)
        {
            emit_node_call(node, graph, ctx, stage)?;
        }
    }
    Ok(())
}

/// Replace every `$identifier` token found in `tokens`. Unknown tokens stay.
pub fn substitute_tokens(text: &str, tokens: &HashMap<String, String>) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let mut end = i + 1;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        if end > i + 1 {
            if let Some(replacement) = tokens.get(&text[i..end]) {
                out.push_str(&text[last..i]);
                out.push_str(replacement);
                last = end;
            }
        }
        i = end;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_replaced_whole() {
        let tokens: HashMap<String, String> = [
            ("$vd".to_string(), "vd".to_string()),
            ("$inPosition".to_string(), "i_position".to_string()),
        ]
        .into_iter()
        .collect();
        let text = "$vd.positionWorld = $inPosition; $inPositionX $unknown $";
        assert_eq!(
            substitute_tokens(text, &tokens),
            "vd.positionWorld = i_position; $inPositionX $unknown $"
        );
    }

    #[test]
    fn text_without_tokens_is_unchanged() {
        let tokens = HashMap::new();
        assert_eq!(substitute_tokens("float x = 1.0; // é", &tokens), "float x = 1.0; // é");
    }
}
