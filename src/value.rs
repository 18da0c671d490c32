//! Typed values attached to ports, with string round-tripping.

use crate::error::{Error, Result};
use crate::types::{BaseType, Semantic, TypeDesc, names};

/// Float formatting used when turning values into text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FloatFormat {
    /// Shortest representation, used for document round-trips.
    #[default]
    Default,
    /// Fixed notation with six decimals. Generators always use this so every
    /// target parses the same literal.
    Fixed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Float(f32),
    Color2([f32; 2]),
    Color3([f32; 3]),
    Color4([f32; 4]),
    Vector2([f32; 2]),
    Vector3([f32; 3]),
    Vector4([f32; 4]),
    /// Row-major.
    Matrix33([f32; 9]),
    /// Row-major.
    Matrix44([f32; 16]),
    String(String),
    Filename(String),
    IntegerArray(Vec<i32>),
    FloatArray(Vec<f32>),
    Struct(Vec<Value>),
}

const IDENTITY33: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
const IDENTITY44: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

fn fmt_float(v: f32, fmt: FloatFormat) -> String {
    match fmt {
        FloatFormat::Default => format!("{v}"),
        FloatFormat::Fixed => format!("{v:.6}"),
    }
}

fn join_floats(vals: &[f32], fmt: FloatFormat) -> String {
    vals.iter()
        .map(|v| fmt_float(*v, fmt))
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_components(text: &str) -> Vec<&str> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_float(ty: &str, s: &str) -> Result<f32> {
    s.trim()
        .parse::<f32>()
        .map_err(|_| Error::TypeMismatch(format!("'{s}' is not a valid {ty} component")))
}

fn parse_floats<const N: usize>(ty: &str, text: &str) -> Result<[f32; N]> {
    let parts = split_components(text);
    if parts.len() != N {
        return Err(Error::TypeMismatch(format!(
            "{ty} expects {N} components, got '{text}'"
        )));
    }
    let mut out = [0.0f32; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = parse_float(ty, part)?;
    }
    Ok(out)
}

/// Split a struct value string `{a;b;{c;d}}` into its top-level fields.
fn split_struct_fields(text: &str) -> Result<Vec<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let inner = text
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| Error::TypeMismatch(format!("struct value '{text}' must be wrapped in braces")))?;
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut part = String::new();
    for c in inner.chars() {
        match c {
            '{' => {
                depth += 1;
                part.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                part.push(c);
            }
            ';' if depth == 0 => {
                fields.push(std::mem::take(&mut part).trim().to_string());
            }
            _ => part.push(c),
        }
    }
    fields.push(part.trim().to_string());
    Ok(fields)
}

impl Value {
    /// Parse a value string for the given type.
    pub fn parse(ty: &TypeDesc, text: &str) -> Result<Value> {
        let name = ty.name();
        let v = match name {
            names::BOOLEAN => match text.trim() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                other => {
                    return Err(Error::TypeMismatch(format!(
                        "'{other}' is not a boolean"
                    )));
                }
            },
            names::INTEGER => Value::Integer(text.trim().parse::<i32>().map_err(|_| {
                Error::TypeMismatch(format!("'{text}' is not an integer"))
            })?),
            names::FLOAT => Value::Float(parse_float(name, text)?),
            names::COLOR2 => Value::Color2(parse_floats(name, text)?),
            names::COLOR3 => Value::Color3(parse_floats(name, text)?),
            names::COLOR4 => Value::Color4(parse_floats(name, text)?),
            names::VECTOR2 => Value::Vector2(parse_floats(name, text)?),
            names::VECTOR3 => Value::Vector3(parse_floats(name, text)?),
            names::VECTOR4 => Value::Vector4(parse_floats(name, text)?),
            names::MATRIX33 => Value::Matrix33(parse_floats(name, text)?),
            names::MATRIX44 => Value::Matrix44(parse_floats(name, text)?),
            names::STRING => Value::String(text.to_string()),
            names::FILENAME => Value::Filename(text.to_string()),
            names::INTEGERARRAY => Value::IntegerArray(
                split_components(text)
                    .into_iter()
                    .map(|s| {
                        s.parse::<i32>().map_err(|_| {
                            Error::TypeMismatch(format!("'{s}' is not an integer array element"))
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            names::FLOATARRAY => Value::FloatArray(
                split_components(text)
                    .into_iter()
                    .map(|s| parse_float(name, s))
                    .collect::<Result<_>>()?,
            ),
            _ if ty.is_struct() => {
                let fields = split_struct_fields(text)?;
                if fields.len() != ty.members().len() {
                    return Err(Error::TypeMismatch(format!(
                        "struct '{name}' has {} members, value '{text}' has {}",
                        ty.members().len(),
                        fields.len()
                    )));
                }
                let mut values = Vec::with_capacity(fields.len());
                for (member, field) in ty.members().iter().zip(fields) {
                    values.push(Value::parse(&member.ty, &field)?);
                }
                Value::Struct(values)
            }
            _ if ty.semantic() == Semantic::Enum || ty.base_type() == BaseType::String => {
                Value::String(text.to_string())
            }
            _ => {
                return Err(Error::TypeMismatch(format!(
                    "type '{name}' cannot hold a value ('{text}')"
                )));
            }
        };
        Ok(v)
    }

    /// The zero/identity value for a built-in type.
    pub fn zero(ty: &TypeDesc) -> Option<Value> {
        Some(match ty.name() {
            names::BOOLEAN => Value::Boolean(false),
            names::INTEGER => Value::Integer(0),
            names::FLOAT => Value::Float(0.0),
            names::COLOR2 => Value::Color2([0.0; 2]),
            names::COLOR3 => Value::Color3([0.0; 3]),
            names::COLOR4 => Value::Color4([0.0; 4]),
            names::VECTOR2 => Value::Vector2([0.0; 2]),
            names::VECTOR3 => Value::Vector3([0.0; 3]),
            names::VECTOR4 => Value::Vector4([0.0; 4]),
            names::MATRIX33 => Value::Matrix33(IDENTITY33),
            names::MATRIX44 => Value::Matrix44(IDENTITY44),
            names::STRING => Value::String(String::new()),
            names::FILENAME => Value::Filename(String::new()),
            names::INTEGERARRAY => Value::IntegerArray(Vec::new()),
            names::FLOATARRAY => Value::FloatArray(Vec::new()),
            _ => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => names::BOOLEAN,
            Value::Integer(_) => names::INTEGER,
            Value::Float(_) => names::FLOAT,
            Value::Color2(_) => names::COLOR2,
            Value::Color3(_) => names::COLOR3,
            Value::Color4(_) => names::COLOR4,
            Value::Vector2(_) => names::VECTOR2,
            Value::Vector3(_) => names::VECTOR3,
            Value::Vector4(_) => names::VECTOR4,
            Value::Matrix33(_) => names::MATRIX33,
            Value::Matrix44(_) => names::MATRIX44,
            Value::String(_) => names::STRING,
            Value::Filename(_) => names::FILENAME,
            Value::IntegerArray(_) => names::INTEGERARRAY,
            Value::FloatArray(_) => names::FLOATARRAY,
            Value::Struct(_) => "struct",
        }
    }

    pub fn value_string(&self) -> String {
        self.format(FloatFormat::Default)
    }

    pub fn format(&self, fmt: FloatFormat) -> String {
        match self {
            Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => fmt_float(*f, fmt),
            Value::Color2(v) | Value::Vector2(v) => join_floats(v, fmt),
            Value::Color3(v) | Value::Vector3(v) => join_floats(v, fmt),
            Value::Color4(v) | Value::Vector4(v) => join_floats(v, fmt),
            Value::Matrix33(v) => join_floats(v, fmt),
            Value::Matrix44(v) => join_floats(v, fmt),
            Value::String(s) | Value::Filename(s) => s.clone(),
            Value::IntegerArray(v) => v
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            Value::FloatArray(v) => join_floats(v, fmt),
            Value::Struct(fields) => {
                let inner: Vec<String> = fields.iter().map(|f| f.format(fmt)).collect();
                format!("{{{}}}", inner.join(";"))
            }
        }
    }

    /// Individual components formatted for use in a constructor, e.g. swizzles.
    pub fn components(&self, fmt: FloatFormat) -> Vec<String> {
        match self {
            Value::Color2(v) | Value::Vector2(v) => v.iter().map(|f| fmt_float(*f, fmt)).collect(),
            Value::Color3(v) | Value::Vector3(v) => v.iter().map(|f| fmt_float(*f, fmt)).collect(),
            Value::Color4(v) | Value::Vector4(v) => v.iter().map(|f| fmt_float(*f, fmt)).collect(),
            Value::Matrix33(v) => v.iter().map(|f| fmt_float(*f, fmt)).collect(),
            Value::Matrix44(v) => v.iter().map(|f| fmt_float(*f, fmt)).collect(),
            Value::FloatArray(v) => v.iter().map(|f| fmt_float(*f, fmt)).collect(),
            Value::IntegerArray(v) => v.iter().map(|i| i.to_string()).collect(),
            Value::Struct(fields) => fields.iter().map(|f| f.format(fmt)).collect(),
            other => vec![other.format(fmt)],
        }
    }

    /// Number of elements for array values, used to size array declarations.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Value::IntegerArray(v) => Some(v.len()),
            Value::FloatArray(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f32),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.floor() as i32),
            Value::Boolean(b) => Some(i32::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Filename(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSystem;

    #[test]
    fn parses_and_formats_color3() {
        let ts = TypeSystem::standard();
        let c3 = ts.get("color3").unwrap();
        let v = Value::parse(&c3, "0.5,0.5, 0.5").unwrap();
        assert_eq!(v, Value::Color3([0.5, 0.5, 0.5]));
        assert_eq!(v.value_string(), "0.5, 0.5, 0.5");
        assert_eq!(v.format(FloatFormat::Fixed), "0.500000, 0.500000, 0.500000");
    }

    #[test]
    fn rejects_wrong_component_count() {
        let ts = TypeSystem::standard();
        let v3 = ts.get("vector3").unwrap();
        assert!(matches!(
            Value::parse(&v3, "1, 2"),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn closures_hold_no_value() {
        let ts = TypeSystem::standard();
        let bsdf = ts.get("BSDF").unwrap();
        assert!(Value::parse(&bsdf, "0").is_err());
        assert!(ts.default_value(&bsdf).is_none());
    }

    #[test]
    fn struct_values_use_braces() {
        let ts = TypeSystem::standard();
        let ri = ts.get("roughnessinfo").unwrap();
        let v = Value::parse(&ri, "{0.1;0.2;0.3;0.4}").unwrap();
        assert_eq!(v.value_string(), "{0.1;0.2;0.3;0.4}");
        assert_eq!(Value::parse(&ri, &v.value_string()).unwrap(), v);
    }

    #[test]
    fn every_default_round_trips_to_zero_or_identity() {
        let ts = TypeSystem::standard();
        for ty in ts.types() {
            let Some(default) = ts.default_value(ty) else {
                continue;
            };
            let reparsed = Value::parse(ty, &default.value_string())
                .unwrap_or_else(|e| panic!("type {}: {e}", ty.name()));
            assert_eq!(reparsed, default, "type {}", ty.name());
        }
        let m44 = ts.get("matrix44").unwrap();
        assert_eq!(ts.default_value(&m44), Some(Value::Matrix44(IDENTITY44)));
        let v3 = ts.get("vector3").unwrap();
        assert_eq!(ts.default_value(&v3), Some(Value::Vector3([0.0; 3])));
    }
}
