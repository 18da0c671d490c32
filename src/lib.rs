//! Material graph documents and shader generation for GLSL, MSL and OSL.

pub mod document;
pub mod error;
pub mod genshader;
pub mod types;
pub mod validation;
pub mod value;

pub use document::{Document, ElementId, ElementKind};
pub use error::{Error, Result};
pub use genshader::{GenContext, GenOptions, ImplementationRegistry, Shader, ShaderGenerator, generator_for};
pub use types::{TypeDesc, TypeSystem};
pub use value::Value;
