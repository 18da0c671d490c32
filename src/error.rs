//! Error kinds shared by the document model and the shader generators.

/// Failures raised while building, traversing or generating from a material graph.
///
/// All of these are fatal for the current `generate()` call: no partial shader
/// is ever handed back to the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A traversal, sort or inheritance walk revisited an element on its active path.
    #[error("found cycle: {0}")]
    FoundCycle(String),

    /// A node could not be resolved to a node definition or an implementation.
    #[error("no implementation: {0}")]
    NoImplementation(String),

    /// An inline expression template could not be parsed or references an unknown port.
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("type '{ty}' is not supported by target '{target}'")]
    UnsupportedType { ty: String, target: String },

    /// Structural problems in a document (duplicate names, dangling handles).
    #[error("document error: {0}")]
    Document(String),

    #[error("shader generation error: {0}")]
    Generation(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn generation(msg: impl Into<String>) -> Self {
        Error::Generation(msg.into())
    }

    pub fn document(msg: impl Into<String>) -> Self {
        Error::Document(msg.into())
    }

    /// Short kind label, used by the CLI when summarising batch failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FoundCycle(_) => "FoundCycle",
            Error::NoImplementation(_) => "NoImplementation",
            Error::MalformedTemplate(_) => "MalformedTemplate",
            Error::TypeMismatch(_) => "TypeMismatch",
            Error::UnknownType(_) => "UnknownType",
            Error::UnsupportedType { .. } => "UnsupportedType",
            Error::Document(_) => "Document",
            Error::Generation(_) => "Generation",
        }
    }
}
