use crate::document::{Document, ElementId, attr};
use crate::error::{Error, Result};
use crate::genshader::context::GenContext;
use crate::genshader::graph::{ShaderGraph, ShaderNode};
use crate::genshader::stage::{PIXEL, ShaderStage};
use crate::types::stable_hash;

use super::ShaderNodeImpl;

/// A light shader sampled from `sampleLightSource()`. Its inputs are read
/// from the `LightData` struct rather than passed as arguments.
#[derive(Debug, Default)]
pub struct LightShaderNode {
    name: String,
    function: String,
    source: String,
    hash: u64,
}

impl ShaderNodeImpl for LightShaderNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn initialize(&mut self, doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<()> {
        self.name = doc.name(element).to_string();
        let (Some(file), Some(function)) = (
            doc.attribute(element, attr::FILE),
            doc.attribute(element, attr::FUNCTION),
        ) else {
            return Err(Error::NoImplementation(format!(
                "light implementation '{}' needs a file and a function",
                doc.path(element)
            )));
        };
        self.function = function.to_string();
        self.source = match doc.sources.get(file) {
            Some(text) => text.clone(),
            None => ctx.search_path.resolve(file)?,
        };
        self.hash = stable_hash(file);
        Ok(())
    }

    fn emit_function_definition(&self, _node: &ShaderNode, _ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
        if stage.name == PIXEL && stage.add_function_definition(self.hash) {
            stage.emit_block(&self.source);
            stage.emit_empty_line();
        }
        Ok(())
    }

    fn emit_function_call(
        &self,
        _node: &ShaderNode,
        _graph: &ShaderGraph,
        _ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()> {
        if stage.name == PIXEL {
            stage.emit_line(&format!("{}(light, position, result)", self.function), true);
        }
        Ok(())
    }
}
