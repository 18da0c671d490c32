//! Node implementations: how a node's function is defined and called.

mod compound;
mod conditional;
mod geometry;
mod inline;
mod light;
mod source_code;
mod surface;

pub use compound::CompoundNode;
pub use conditional::{CompareNode, SwitchNode};
pub use geometry::{NormalNode, PositionNode, TexcoordNode};
pub use inline::{InlineTemplate, Segment};
pub use light::LightShaderNode;
pub use source_code::SourceCodeNode;
pub use surface::SurfaceNode;

use std::fmt;

use crate::document::{Document, ElementId};
use crate::error::Result;

use super::context::GenContext;
use super::graph::{ShaderGraph, ShaderNode};
use super::registry::ImplementationRegistry;
use super::stage::ShaderStage;

/// Code generation for every node resolved to one implementation element.
///
/// Instances are created and initialized once per [`GenContext`] and shared
/// between nodes, so all per-node data arrives through the `node` argument.
pub trait ShaderNodeImpl: fmt::Debug {
    fn name(&self) -> &str;

    /// Identity used to emit a function definition only once per stage.
    fn hash(&self) -> u64;

    fn initialize(&mut self, doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<()>;

    /// Add classification flags beyond those derived from the nodedef.
    fn add_classification(&self, node: &mut ShaderNode) {
        let _ = node;
    }

    /// Declare the stage variables the node's code reads.
    fn create_variables(&self, node: &ShaderNode, ctx: &GenContext<'_>, stages: &mut [ShaderStage]) -> Result<()> {
        let _ = (node, ctx, stages);
        Ok(())
    }

    fn emit_function_definition(&self, node: &ShaderNode, ctx: &mut GenContext<'_>, stage: &mut ShaderStage) -> Result<()> {
        let _ = (node, ctx, stage);
        Ok(())
    }

    fn emit_function_call(
        &self,
        node: &ShaderNode,
        graph: &ShaderGraph,
        ctx: &mut GenContext<'_>,
        stage: &mut ShaderStage,
    ) -> Result<()>;
}

/// Register the conditional nodes for a target under the stdlib naming scheme.
pub fn register_conditionals(registry: &mut ImplementationRegistry, target: &str) {
    for ty in ["float", "color3", "vector3"] {
        registry.register(format!("IM_compare_{ty}_{target}"), || Box::new(CompareNode::default()));
        registry.register(format!("IM_switch_{ty}_{target}"), || Box::new(SwitchNode::default()));
    }
}
