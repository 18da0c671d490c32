//! Per-target lexical rules: type names, literals, identifiers and swizzles.
//!
//! Generators never format a value or name a type themselves; everything that
//! differs between shading languages is a row in a [`Syntax`] table.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::types::{TypeDesc, names};
use crate::value::{FloatFormat, Value};

/// Identifier name to next numeric suffix, see [`Syntax::make_identifier`].
pub type IdentifierMap = HashMap<String, usize>;

/// How a type's literals are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiteralForm {
    /// Bare scalar: `1.000000`, `3`, `true`.
    Scalar,
    /// Constructor call over all components: `vec3(a, b, c)`.
    Constructor,
    /// Matrix built from column vectors: `float3x3(float3(..), ..)`.
    ColumnMatrix { column: String, rows: usize },
    /// Quoted string.
    Quoted,
    /// `float[3](a, b, c)` or, with `braces`, `{a, b, c}`.
    Array { braces: bool },
    /// Struct emulated with members: `{a, b}` as a parameter default, `T(a, b)` inline.
    MemberStruct,
    /// `color4`-style struct of a color and an alpha.
    ColorAlphaStruct,
    /// User struct values, one constructor argument per member.
    Struct,
    /// No literal form. The default value is always used.
    Opaque,
}

#[derive(Clone, Debug)]
pub struct TypeSyntax {
    pub name: String,
    pub default_value: String,
    pub uniform_default_value: String,
    /// Emitted once at the top of every stage when non-empty.
    pub type_definition: String,
    /// Member accessors used for swizzles, in channel order.
    pub members: Vec<String>,
    pub form: LiteralForm,
}

impl TypeSyntax {
    pub fn new(name: &str, default_value: &str, form: LiteralForm) -> Self {
        TypeSyntax {
            name: name.to_string(),
            default_value: default_value.to_string(),
            uniform_default_value: default_value.to_string(),
            type_definition: String::new(),
            members: Vec::new(),
            form,
        }
    }

    pub fn uniform_default(mut self, value: &str) -> Self {
        self.uniform_default_value = value.to_string();
        self
    }

    pub fn definition(mut self, text: &str) -> Self {
        self.type_definition = text.to_string();
        self
    }

    pub fn members(mut self, members: &[&str]) -> Self {
        self.members = members.iter().map(|m| m.to_string()).collect();
        self
    }
}

#[derive(Clone, Debug)]
pub struct Syntax {
    target: &'static str,
    types: HashMap<String, TypeSyntax>,
    order: Vec<String>,
    reserved: HashSet<String>,
    invalid_tokens: Vec<(&'static str, &'static str)>,
    output_prefix: &'static str,
    output_suffix: &'static str,
    pub uniform_qualifier: &'static str,
    pub constant_qualifier: &'static str,
    pub source_file_extension: &'static str,
    /// 2D texture lookup with `{sampler}` and `{uv}` placeholders.
    pub texture_sample: &'static str,
    pub discard: &'static str,
}

fn channel_index(c: char) -> Option<usize> {
    match c {
        'r' | 'x' => Some(0),
        'g' | 'y' => Some(1),
        'b' | 'z' => Some(2),
        'a' | 'w' => Some(3),
        _ => None,
    }
}

impl Syntax {
    pub fn new(target: &'static str) -> Self {
        Syntax {
            target,
            types: HashMap::new(),
            order: Vec::new(),
            reserved: HashSet::new(),
            invalid_tokens: Vec::new(),
            output_prefix: "out ",
            output_suffix: "",
            uniform_qualifier: "uniform",
            constant_qualifier: "const",
            source_file_extension: "",
            texture_sample: "texture({sampler}, {uv})",
            discard: "discard",
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn register_type(&mut self, type_name: &str, syntax: TypeSyntax) {
        if self.types.insert(type_name.to_string(), syntax).is_none() {
            self.order.push(type_name.to_string());
        }
    }

    pub fn register_reserved_words(&mut self, words: &[&str]) {
        self.reserved.extend(words.iter().map(|w| w.to_string()));
    }

    pub fn register_invalid_tokens(&mut self, tokens: &[(&'static str, &'static str)]) {
        self.invalid_tokens.extend_from_slice(tokens);
    }

    /// Parameter declaration form for outputs, e.g. `out ` + `vec3`.
    pub fn set_output_qualifier(&mut self, prefix: &'static str, suffix: &'static str) {
        self.output_prefix = prefix;
        self.output_suffix = suffix;
    }

    pub fn sample_texture(&self, sampler: &str, uv: &str) -> String {
        self.texture_sample.replace("{sampler}", sampler).replace("{uv}", uv)
    }

    pub fn is_reserved(&self, word: &str) -> bool {
        self.reserved.contains(word)
    }

    pub fn type_supported(&self, ty: &TypeDesc) -> bool {
        self.types.contains_key(ty.name())
    }

    pub fn type_syntax(&self, ty: &TypeDesc) -> Result<&TypeSyntax> {
        self.types.get(ty.name()).ok_or_else(|| Error::UnsupportedType {
            ty: ty.name().to_string(),
            target: self.target.to_string(),
        })
    }

    pub fn type_name(&self, ty: &TypeDesc) -> Result<&str> {
        Ok(&self.type_syntax(ty)?.name)
    }

    pub fn output_type_name(&self, ty: &TypeDesc) -> Result<String> {
        Ok(format!(
            "{}{}{}",
            self.output_prefix,
            self.type_name(ty)?,
            self.output_suffix
        ))
    }

    pub fn default_value(&self, ty: &TypeDesc, uniform: bool) -> Result<String> {
        let s = self.type_syntax(ty)?;
        Ok(if uniform {
            s.uniform_default_value.clone()
        } else {
            s.default_value.clone()
        })
    }

    /// Literal for a value. `uniform` selects the initializer form used for
    /// shader parameters, which some targets write differently.
    pub fn value(&self, ty: &TypeDesc, value: &Value, uniform: bool) -> Result<String> {
        let s = self.type_syntax(ty)?;
        let fixed = FloatFormat::Fixed;
        let text = match &s.form {
            LiteralForm::Scalar => value.format(fixed),
            LiteralForm::Constructor => format!("{}({})", s.name, value.components(fixed).join(", ")),
            LiteralForm::ColumnMatrix { column, rows } => {
                let comps = value.components(fixed);
                let cols: Vec<String> = comps
                    .chunks((*rows).max(1))
                    .map(|c| format!("{column}({})", c.join(", ")))
                    .collect();
                format!("{}({})", s.name, cols.join(", "))
            }
            LiteralForm::Quoted => format!("\"{}\"", value.format(fixed)),
            LiteralForm::Array { braces } => {
                let comps = value.components(fixed);
                if *braces {
                    format!("{{{}}}", comps.join(", "))
                } else {
                    format!("{}[{}]({})", s.name, comps.len(), comps.join(", "))
                }
            }
            LiteralForm::MemberStruct => {
                let comps = value.components(fixed).join(", ");
                if uniform {
                    format!("{{{comps}}}")
                } else {
                    format!("{}({comps})", s.name)
                }
            }
            LiteralForm::ColorAlphaStruct => {
                let comps = value.components(fixed);
                if comps.len() != 4 {
                    return Err(Error::TypeMismatch(format!(
                        "{} literal needs 4 components, got '{}'",
                        ty.name(),
                        value.value_string()
                    )));
                }
                let rgb = format!("color({})", comps[..3].join(", "));
                if uniform {
                    format!("{{{rgb}, {}}}", comps[3])
                } else {
                    format!("{}({rgb}, {})", s.name, comps[3])
                }
            }
            LiteralForm::Struct => {
                let Value::Struct(fields) = value else {
                    return Err(Error::TypeMismatch(format!(
                        "struct '{}' given non-struct value '{}'",
                        ty.name(),
                        value.value_string()
                    )));
                };
                let mut parts = Vec::with_capacity(fields.len());
                for (member, field) in ty.members().iter().zip(fields) {
                    parts.push(self.value(&member.ty, field, uniform)?);
                }
                format!("{}({})", s.name, parts.join(", "))
            }
            LiteralForm::Opaque => {
                if uniform {
                    s.uniform_default_value.clone()
                } else {
                    s.default_value.clone()
                }
            }
        };
        Ok(text)
    }

    /// `[N]` for array declarations. The length always comes from the value.
    pub fn array_suffix(&self, ty: &TypeDesc, value: Option<&Value>) -> String {
        match (ty.is_array(), value.and_then(Value::array_len)) {
            (true, Some(n)) => format!("[{n}]"),
            _ => String::new(),
        }
    }

    /// Type definitions for every registered type, in registration order.
    pub fn type_definitions(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|n| self.types.get(n))
            .map(|s| s.type_definition.as_str())
            .filter(|d| !d.is_empty())
            .collect()
    }

    /// Map a string value onto the index of its enumeration on targets that
    /// cannot hold strings. Returns `None` when no remapping is needed.
    pub fn remap_enumeration(
        &self,
        ty: &TypeDesc,
        value: &str,
        enum_names: Option<&str>,
    ) -> Result<Option<Value>> {
        if ty.name() != names::STRING || self.type_supported(ty) {
            return Ok(None);
        }
        let Some(enum_names) = enum_names else {
            return Err(Error::UnsupportedType {
                ty: ty.name().to_string(),
                target: self.target.to_string(),
            });
        };
        let index = enum_names
            .split(',')
            .map(str::trim)
            .position(|e| e == value.trim())
            .ok_or_else(|| {
                Error::TypeMismatch(format!(
                    "'{value}' is not one of the enumeration values '{enum_names}'"
                ))
            })?;
        Ok(Some(Value::Integer(index as i32)))
    }

    /// A fresh identifier table with every reserved word already taken.
    pub fn new_identifier_map(&self) -> IdentifierMap {
        let mut words: Vec<&String> = self.reserved.iter().collect();
        words.sort();
        words.into_iter().map(|w| (w.clone(), 1)).collect()
    }

    /// Valid and unique identifier: a taken name gets the next free numeric
    /// suffix, so `out` becomes `out1` when `out` is reserved.
    pub fn make_identifier(&self, name: &str, identifiers: &mut IdentifierMap) -> String {
        let name = self.make_valid_name(name);
        let result = match identifiers.get(&name).copied() {
            Some(mut n) => {
                let candidate = loop {
                    let c = format!("{name}{n}");
                    n += 1;
                    if !identifiers.contains_key(&c) {
                        break c;
                    }
                };
                identifiers.insert(name, n);
                candidate
            }
            None => name,
        };
        identifiers.insert(result.clone(), 1);
        result
    }

    pub fn make_valid_name(&self, name: &str) -> String {
        let mut out: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
            out.insert(0, 'v');
        }
        for (from, to) in &self.invalid_tokens {
            while out.contains(from) {
                out = out.replace(from, to);
            }
        }
        out
    }

    /// Expression reading `channels` of `source` as `dst_ty`. `0` and `1`
    /// select constants.
    pub fn swizzled_variable(
        &self,
        source: &str,
        src_ty: &TypeDesc,
        channels: &str,
        dst_ty: &TypeDesc,
    ) -> Result<String> {
        let src = self.type_syntax(src_ty)?;
        let dst = self.type_syntax(dst_ty)?;
        let mut parts = Vec::with_capacity(channels.len());
        for ch in channels.chars() {
            match ch {
                '0' => parts.push("0.0".to_string()),
                '1' => parts.push("1.0".to_string()),
                c => {
                    let idx = channel_index(c).ok_or_else(|| {
                        Error::TypeMismatch(format!("invalid channel '{c}' in swizzle '{channels}'"))
                    })?;
                    if src_ty.is_scalar() {
                        if idx != 0 {
                            return Err(Error::TypeMismatch(format!(
                                "swizzle '{channels}' reads channel '{c}' of scalar '{source}'"
                            )));
                        }
                        parts.push(source.to_string());
                    } else {
                        let member = src.members.get(idx).ok_or_else(|| {
                            Error::TypeMismatch(format!(
                                "channel '{c}' out of range for type '{}'",
                                src_ty.name()
                            ))
                        })?;
                        parts.push(format!("{source}{member}"));
                    }
                }
            }
        }
        let expected = if dst_ty.is_scalar() { 1 } else { dst_ty.size() };
        if parts.len() != expected {
            return Err(Error::TypeMismatch(format!(
                "swizzle '{channels}' yields {} channels but '{}' needs {expected}",
                parts.len(),
                dst_ty.name()
            )));
        }
        if dst_ty.is_scalar() {
            Ok(parts.remove(0))
        } else {
            Ok(format!("{}({})", dst.name, parts.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSystem;

    fn sample() -> Syntax {
        let mut s = Syntax::new("test");
        s.register_type(names::FLOAT, TypeSyntax::new("float", "0.0", LiteralForm::Scalar));
        s.register_type(
            names::COLOR3,
            TypeSyntax::new("vec3", "vec3(0.0)", LiteralForm::Constructor).members(&[".x", ".y", ".z"]),
        );
        s.register_type(
            names::VECTOR2,
            TypeSyntax::new("vec2", "vec2(0.0)", LiteralForm::Constructor).members(&[".x", ".y"]),
        );
        s.register_reserved_words(&["out", "in"]);
        s.register_invalid_tokens(&[("gl_", "gll"), ("__", "_")]);
        s
    }

    #[test]
    fn reserved_names_get_numeric_suffixes() {
        let s = sample();
        let mut ids = s.new_identifier_map();
        assert_eq!(s.make_identifier("out", &mut ids), "out1");
        assert_eq!(s.make_identifier("out", &mut ids), "out2");
        assert_eq!(s.make_identifier("color", &mut ids), "color");
        assert_eq!(s.make_identifier("color", &mut ids), "color1");
        assert_eq!(s.make_identifier("gl_Position", &mut ids), "gllPosition");
        assert_eq!(s.make_identifier("a__b", &mut ids), "a_b");
    }

    #[test]
    fn literals_use_fixed_floats() {
        let s = sample();
        let ts = TypeSystem::standard();
        let c3 = ts.get("color3").unwrap();
        let v = Value::Color3([0.5, 0.25, 1.0]);
        assert_eq!(s.value(&c3, &v, false).unwrap(), "vec3(0.500000, 0.250000, 1.000000)");
    }

    #[test]
    fn swizzles_check_channel_counts() {
        let s = sample();
        let ts = TypeSystem::standard();
        let c3 = ts.get("color3").unwrap();
        let v2 = ts.get("vector2").unwrap();
        let f = ts.get("float").unwrap();
        assert_eq!(s.swizzled_variable("c", &c3, "rb", &v2).unwrap(), "vec2(c.x, c.z)");
        assert_eq!(s.swizzled_variable("c", &c3, "g", &f).unwrap(), "c.y");
        assert_eq!(s.swizzled_variable("f", &f, "r1", &v2).unwrap(), "vec2(f, 1.0)");
        assert!(matches!(
            s.swizzled_variable("c", &c3, "rgb", &v2),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn strings_remap_to_enum_index_when_unsupported() {
        let s = sample();
        let ts = TypeSystem::standard();
        let string = ts.get("string").unwrap();
        assert_eq!(
            s.remap_enumeration(&string, "linear", Some("closest, linear, cubic")).unwrap(),
            Some(Value::Integer(1))
        );
        assert!(matches!(
            s.remap_enumeration(&string, "linear", None),
            Err(Error::UnsupportedType { .. })
        ));
    }

    #[test]
    fn unknown_types_are_unsupported() {
        let s = sample();
        let ts = TypeSystem::standard();
        let m = ts.get("matrix44").unwrap();
        assert!(!s.type_supported(&m));
        assert!(matches!(s.type_name(&m), Err(Error::UnsupportedType { .. })));
    }
}
