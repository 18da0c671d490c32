use crate::document::{Document, ElementId, attr};
use crate::error::{Error, Result};
use crate::types::stable_hash;

use crate::genshader::context::GenContext;
use crate::genshader::emit::{emit_output_declaration, literal, output_variable, upstream_result};
use crate::genshader::graph::{Classification, ShaderGraph, ShaderNode};
use crate::genshader::stage::{PIXEL, ShaderStage};
use super::ShaderNodeImpl;
use super::inline::InlineTemplate;

/// Implementation backed by a function in a source file, or by an inline
/// expression template when the element carries `sourcecode`.
#[derive(Debug, Default)]
pub struct SourceCodeNode {
    name: String,
    function: String,
    source: String,
    hash: u64,
    inline: Option<InlineTemplate>,
}

impl SourceCodeNode {
    pub fn is_inline(&self) -> bool {
        self.inline.is_some()
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    fn emit_inline(
        &self,
        template: &InlineTemplate,
        node: &ShaderNode,
        graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        let syntax = ctx.syntax();
        // Array literals cannot appear inside expressions, so unconnected
        // array inputs are hoisted into constants first.
        let mut hoisted = Vec::new();
        for input in &node.inputs {
            if input.connection.is_some() || !input.ty.is_array() || !template.ports().any(|p| p == input.name) {
                continue;
            }
            let variable = format!("{}_{}_tmp", node.name, input.name);
            stage.emit_line(
                &format!(
                    "{} {} {variable}{} = {}",
                    syntax.constant_qualifier,
                    syntax.type_name(&input.ty)?,
                    syntax.array_suffix(&input.ty, input.value.as_ref()),
                    literal(syntax, &input.ty, input.value.as_ref(), false)?
                ),
                true,
            );
            hoisted.push((input.name.as_str(), variable));
        }
        let ctx_ref: &GenContext<'_> = ctx;
        let expression = template.render(|port| {
            if let Some((_, v)) = hoisted.iter().find(|(n, _)| *n == port) {
                return Ok(v.clone());
            }
            let input = node.input(port).ok_or_else(|| {
                Error::MalformedTemplate(format!("node '{}' has no input '{port}'", node.name))
            })?;
            upstream_result(input, graph, ctx_ref)
        })?;
        let output = &node.outputs[0];
        stage.emit_line(
            &format!(
                "{} {} = {expression}",
                syntax.type_name(&output.ty)?,
                output_variable(output, ctx)
            ),
            true,
        );
        Ok(())
    }
}

impl ShaderNodeImpl for SourceCodeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn initialize(&mut self, doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<()> {
        self.name = doc.name(element).to_string();
        if let Some(code) = doc.attribute(element, attr::SOURCE_CODE) {
            let template = InlineTemplate::parse(code)?;
            if let Some(def) = doc.attribute(element, attr::NODE_DEF).and_then(|d| doc.node_def(d)) {
                let inputs = doc.active_inputs(def)?;
                let known: Vec<&str> = inputs.iter().map(|i| doc.name(*i)).collect();
                template.check_ports(&known, &self.name)?;
            }
            self.hash = stable_hash(&self.name);
            self.inline = Some(template);
            return Ok(());
        }
        let file = doc.attribute(element, attr::FILE).ok_or_else(|| {
            Error::NoImplementation(format!(
                "implementation '{}' has no native registration, source code or file",
                doc.path(element)
            ))
        })?;
        self.function = doc
            .attribute(element, attr::FUNCTION)
            .ok_or_else(|| {
                Error::NoImplementation(format!(
                    "implementation '{}' names file '{file}' but no function",
                    doc.path(element)
                ))
            })?
            .to_string();
        self.source = match doc.sources.get(file) {
            Some(text) => text.clone(),
            None => ctx.search_path.resolve(file)?,
        };
        // One definition per file, however many functions it holds.
        self.hash = stable_hash(file);
        Ok(())
    }

    fn emit_function_definition(&self, _node: &ShaderNode, _ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
        if self.inline.is_some() || stage.name != PIXEL {
            return Ok(());
        }
        if stage.add_function_definition(self.hash) {
            stage.emit_block(&self.source);
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
        if stage.name != PIXEL {
            return Ok(());
        }
        if let Some(template) = &self.inline {
            return self.emit_inline(template, node, graph, ctx, stage);
        }

        for output in &node.outputs {
            emit_output_declaration(output, stage, ctx, true)?;
        }
        let mut args = Vec::new();
        let mut suffix = "";
        if node.has_classification(Classification::CLOSURE) {
            if let Some(cc) = ctx.closure_context() {
                let closure_type = node.outputs[0].ty.name();
                suffix = cc.function_suffix(closure_type);
                args.extend(cc.arguments(closure_type).into_iter().map(|(_, name)| name.to_string()));
            }
        }
        let suffix = suffix.to_string();
        for input in &node.inputs {
            args.push(upstream_result(input, graph, ctx)?);
        }
        for output in &node.outputs {
            args.push(output_variable(output, ctx));
        }
        stage.emit_line(&format!("{}{suffix}({})", self.function, args.join(", ")), true);
        Ok(())
    }
}
