//! Shader generation from material graphs.
//!
//! A [`ShaderGenerator`] owns a target's [`Syntax`] and turns a document
//! element into a [`Shader`]. All per-run state lives in a [`GenContext`].

pub mod context;
pub mod emit;
pub mod glsl;
pub mod graph;
pub mod hw;
pub mod msl;
pub mod nodes;
pub mod osl;
pub mod registry;
pub mod stage;
pub mod syntax;

pub use context::{ClosureContext, ClosureKind, GenContext, GenOptions, ShaderInterfaceType, SourceSearchPath};
pub use glsl::GlslShaderGenerator;
pub use graph::{Classification, ShaderGraph, ShaderNode};
pub use msl::MslShaderGenerator;
pub use nodes::ShaderNodeImpl;
pub use osl::OslShaderGenerator;
pub use registry::ImplementationRegistry;
pub use stage::{PIXEL, Shader, ShaderStage, VERTEX};
pub use syntax::Syntax;

use crate::document::{Document, ElementId};
use crate::error::Result;

/// A code generator for one shading language target.
pub trait ShaderGenerator {
    /// Target name matched against implementation `target` attributes.
    fn target(&self) -> &'static str;

    fn syntax(&self) -> &Syntax;

    /// Generate a shader for a node graph, a graph output or a node.
    fn generate(
        &self,
        name: &str,
        doc: &Document,
        element: ElementId,
        ctx: &mut GenContext<'_>,
    ) -> Result<Shader>;

    /// Add the target's native node implementations.
    fn register_implementations(&self, registry: &mut ImplementationRegistry) {
        let _ = registry;
    }

    /// Closure contexts a node responds to.
    fn node_context_kinds(&self, node: &ShaderNode) -> Vec<ClosureKind> {
        let _ = node;
        vec![ClosureKind::Default]
    }

    fn closure_context(&self, kind: ClosureKind) -> Option<ClosureContext> {
        let _ = kind;
        None
    }
}

/// Look up a generator by target name.
pub fn generator_for(target: &str) -> Option<Box<dyn ShaderGenerator>> {
    match target {
        glsl::TARGET => Some(Box::new(GlslShaderGenerator::new())),
        msl::TARGET => Some(Box::new(MslShaderGenerator::new())),
        osl::TARGET => Some(Box::new(OslShaderGenerator::new())),
        _ => None,
    }
}
