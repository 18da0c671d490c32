//! Open Shading Language generator. OSL has a single stage whose shader
//! parameters are the published inputs and whose closures are native.

use std::slice;

use log::debug;

use crate::document::{Document, ElementId};
use crate::error::Result;
use crate::types::names;

use super::context::GenContext;
use super::emit::{emit_function_calls, emit_function_definitions, literal, socket_result};
use super::graph::ShaderGraph;
use super::nodes::register_conditionals;
use super::registry::ImplementationRegistry;
use super::stage::{Brackets, PIXEL, Shader, ShaderStage};
use super::syntax::{LiteralForm, Syntax, TypeSyntax};
use super::ShaderGenerator;

pub const TARGET: &str = "genosl";

const RESERVED_WORDS: &[&str] = &[
    "and", "break", "closure", "color", "continue", "do", "else", "emit", "float", "for", "if",
    "illuminance", "illuminate", "int", "matrix", "normal", "not", "or", "output", "point", "public",
    "return", "string", "struct", "vector", "void", "while", "bool", "case", "catch", "char", "class",
    "const", "delete", "default", "double", "enum", "extern", "false", "friend", "goto", "inline",
    "long", "new", "operator", "private", "protected", "short", "signed", "sizeof", "static",
    "switch", "template", "this", "throw", "true", "try", "typedef", "uniform", "union", "unsigned",
    "varying", "virtual", "volatile", "shader", "surface", "volume", "displacement", "light",
    "texture", "transparent", "emission", "diffuse", "mix", "min", "max", "normalize", "dot",
    "clamp", "length", "pow",
    "P", "N", "I", "Ng", "u", "v", "dPdu", "dPdv", "Ps", "time", "dtime", "dPdtime", "Ci",
    "BSDF", "EDF", "VDF", "surfaceshader", "volumeshader", "displacementshader", "lightshader",
    "material", "color2", "color4", "vector2", "vector4",
];

pub fn osl_syntax() -> Syntax {
    let mut s = Syntax::new(TARGET);
    let closure = |name: &str| {
        TypeSyntax::new(name, "0", LiteralForm::Opaque).definition(&format!("#define {name} closure color"))
    };
    s.register_type(names::BOOLEAN, TypeSyntax::new("int", "false", LiteralForm::Scalar));
    s.register_type(names::INTEGER, TypeSyntax::new("int", "0", LiteralForm::Scalar));
    s.register_type(names::FLOAT, TypeSyntax::new("float", "0.0", LiteralForm::Scalar));
    s.register_type(
        names::COLOR2,
        TypeSyntax::new("color2", "color2(0.0, 0.0)", LiteralForm::MemberStruct)
            .uniform_default("{0.0, 0.0}")
            .definition("struct color2 { float r; float a; };")
            .members(&[".r", ".a"]),
    );
    s.register_type(
        names::COLOR3,
        TypeSyntax::new("color", "color(0.0)", LiteralForm::Constructor).members(&["[0]", "[1]", "[2]"]),
    );
    s.register_type(
        names::COLOR4,
        TypeSyntax::new("color4", "color4(color(0.0), 0.0)", LiteralForm::ColorAlphaStruct)
            .uniform_default("{color(0.0), 0.0}")
            .definition("struct color4 { color rgb; float a; };")
            .members(&[".rgb[0]", ".rgb[1]", ".rgb[2]", ".a"]),
    );
    s.register_type(
        names::VECTOR2,
        TypeSyntax::new("vector2", "vector2(0.0, 0.0)", LiteralForm::MemberStruct)
            .uniform_default("{0.0, 0.0}")
            .definition("struct vector2 { float x; float y; };")
            .members(&[".x", ".y"]),
    );
    s.register_type(
        names::VECTOR3,
        TypeSyntax::new("vector", "vector(0.0)", LiteralForm::Constructor).members(&["[0]", "[1]", "[2]"]),
    );
    s.register_type(
        names::VECTOR4,
        TypeSyntax::new("vector4", "vector4(0.0, 0.0, 0.0, 0.0)", LiteralForm::MemberStruct)
            .uniform_default("{0.0, 0.0, 0.0, 0.0}")
            .definition("struct vector4 { float x; float y; float z; float w; };")
            .members(&[".x", ".y", ".z", ".w"]),
    );
    // OSL only has 4x4 matrices; a 3x3 value is held in the upper-left corner.
    s.register_type(names::MATRIX33, TypeSyntax::new("matrix", "matrix(1.0)", LiteralForm::Opaque));
    s.register_type(names::MATRIX44, TypeSyntax::new("matrix", "matrix(1.0)", LiteralForm::Constructor));
    s.register_type(names::STRING, TypeSyntax::new("string", "\"\"", LiteralForm::Quoted));
    s.register_type(names::FILENAME, TypeSyntax::new("string", "\"\"", LiteralForm::Quoted));
    s.register_type(names::INTEGERARRAY, TypeSyntax::new("int", "{0}", LiteralForm::Array { braces: true }));
    s.register_type(names::FLOATARRAY, TypeSyntax::new("float", "{0.0}", LiteralForm::Array { braces: true }));
    s.register_type(names::BSDF, closure("BSDF"));
    s.register_type(names::EDF, closure("EDF"));
    s.register_type(names::VDF, closure("VDF"));
    s.register_type(names::SURFACESHADER, closure("surfaceshader"));
    s.register_type(names::VOLUMESHADER, closure("volumeshader"));
    s.register_type(names::LIGHTSHADER, closure("lightshader"));
    s.register_type(names::MATERIAL, closure("material"));
    s.register_type(
        names::DISPLACEMENTSHADER,
        TypeSyntax::new("vector", "vector(0.0)", LiteralForm::Opaque),
    );
    s.register_reserved_words(RESERVED_WORDS);
    s.register_invalid_tokens(&[("__", "_")]);
    s.set_output_qualifier("output ", "");
    s.source_file_extension = ".osl";
    s
}

#[derive(Debug)]
pub struct OslShaderGenerator {
    syntax: Syntax,
}

impl Default for OslShaderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl OslShaderGenerator {
    pub fn new() -> Self {
        OslShaderGenerator { syntax: osl_syntax() }
    }

    /// `shader name(...)` parameter list: uniform inputs then outputs.
    fn parameters(&self, graph: &ShaderGraph) -> Result<Vec<String>> {
        let mut params = Vec::new();
        for socket in graph.input_sockets() {
            let ty = self.syntax.type_name(&socket.ty)?;
            let suffix = self.syntax.array_suffix(&socket.ty, socket.value.as_ref());
            let value = literal(&self.syntax, &socket.ty, socket.value.as_ref(), true)?;
            params.push(format!("{ty} {}{suffix} = {value}", socket.variable));
        }
        for socket in graph.output_sockets() {
            let ty = self.syntax.type_name(&socket.ty)?;
            let value = self.syntax.default_value(&socket.ty, true)?;
            params.push(format!("output {ty} {} = {value}", socket.variable));
        }
        Ok(params)
    }
}

impl ShaderGenerator for OslShaderGenerator {
    fn target(&self) -> &'static str {
        TARGET
    }

    fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    fn register_implementations(&self, registry: &mut ImplementationRegistry) {
        register_conditionals(registry, TARGET);
    }

    fn generate(&self, name: &str, doc: &Document, element: ElementId, ctx: &mut GenContext<'_>) -> Result<Shader> {
        let graph = ShaderGraph::create(doc, element, ctx)?;
        let function = self.syntax.make_valid_name(name);
        let mut stage = ShaderStage::new(PIXEL, &function);
        for node in graph.nodes() {
            node.imp.create_variables(node, ctx, slice::from_mut(&mut stage))?;
        }

        stage.emit_line("#define true 1", false);
        stage.emit_line("#define false 0", false);
        stage.emit_empty_line();
        for def in self.syntax.type_definitions() {
            stage.emit_line(def, false);
        }
        stage.emit_empty_line();
        emit_function_definitions(&graph, ctx, &mut stage)?;

        let params = self.parameters(&graph)?;
        stage.emit_line(&format!("shader {function}"), false);
        stage.begin_scope(Brackets::Parentheses);
        let last = params.len().saturating_sub(1);
        for (i, p) in params.iter().enumerate() {
            let sep = if i == last { "" } else { "," };
            stage.emit_line(&format!("{p}{sep}"), false);
        }
        stage.end_scope(false)?;
        stage.begin_scope(Brackets::Braces);
        emit_function_calls(&graph, ctx, &mut stage, None, true)?;
        for socket in graph.output_sockets() {
            let result = socket_result(socket, &graph, ctx)?;
            stage.emit_line(&format!("{} = {result}", socket.variable), true);
        }
        stage.end_scope(false)?;

        debug!("generated {TARGET} shader '{name}' from '{}'", doc.path(element));
        Ok(Shader::new(name, graph, vec![stage]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSystem;
    use crate::value::Value;

    #[test]
    fn struct_types_use_brace_defaults_for_parameters() {
        let syntax = osl_syntax();
        let ts = TypeSystem::standard();
        let v2 = ts.get(names::VECTOR2).unwrap();
        let v = Value::Vector2([0.5, 1.0]);
        assert_eq!(syntax.value(&v2, &v, true).unwrap(), "{0.500000, 1.000000}");
        assert_eq!(syntax.value(&v2, &v, false).unwrap(), "vector2(0.500000, 1.000000)");
        let c4 = ts.get(names::COLOR4).unwrap();
        let v = Value::Color4([1.0, 0.0, 0.0, 0.5]);
        assert_eq!(
            syntax.value(&c4, &v, false).unwrap(),
            "color4(color(1.000000, 0.000000, 0.000000), 0.500000)"
        );
    }

    #[test]
    fn strings_are_native() {
        let syntax = osl_syntax();
        let ts = TypeSystem::standard();
        let s = ts.get(names::STRING).unwrap();
        assert!(syntax.type_supported(&s));
        assert_eq!(syntax.remap_enumeration(&s, "linear", Some("closest,linear")).unwrap(), None);
        assert_eq!(syntax.value(&s, &Value::String("linear".into()), false).unwrap(), "\"linear\"");
    }
}
