//! Type descriptors and the registry that owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Standard type names. These are plain names, the descriptors themselves
/// always come from a [`TypeSystem`].
pub mod names {
    pub const NONE: &str = "none";
    pub const BOOLEAN: &str = "boolean";
    pub const INTEGER: &str = "integer";
    pub const FLOAT: &str = "float";
    pub const COLOR2: &str = "color2";
    pub const COLOR3: &str = "color3";
    pub const COLOR4: &str = "color4";
    pub const VECTOR2: &str = "vector2";
    pub const VECTOR3: &str = "vector3";
    pub const VECTOR4: &str = "vector4";
    pub const MATRIX33: &str = "matrix33";
    pub const MATRIX44: &str = "matrix44";
    pub const STRING: &str = "string";
    pub const FILENAME: &str = "filename";
    pub const INTEGERARRAY: &str = "integerarray";
    pub const FLOATARRAY: &str = "floatarray";
    pub const BSDF: &str = "BSDF";
    pub const EDF: &str = "EDF";
    pub const VDF: &str = "VDF";
    pub const SURFACESHADER: &str = "surfaceshader";
    pub const VOLUMESHADER: &str = "volumeshader";
    pub const DISPLACEMENTSHADER: &str = "displacementshader";
    pub const LIGHTSHADER: &str = "lightshader";
    pub const MATERIAL: &str = "material";
    pub const ROUGHNESSINFO: &str = "roughnessinfo";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaseType {
    None,
    Boolean,
    Integer,
    Float,
    String,
    Struct,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Semantic {
    None,
    Color,
    Vector,
    Matrix,
    Filename,
    Closure,
    Shader,
    Material,
    Enum,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructMember {
    pub ty: TypeDesc,
    pub name: String,
    pub default_value: String,
}

#[derive(Debug)]
struct TypeDescData {
    name: String,
    id: u64,
    base: BaseType,
    semantic: Semantic,
    size: usize,
    members: Vec<StructMember>,
}

/// Immutable, cheaply clonable type descriptor.
///
/// Identity is the hash of the name; the registry guarantees one descriptor per name.
#[derive(Clone)]
pub struct TypeDesc(Arc<TypeDescData>);

impl TypeDesc {
    fn new(name: &str, base: BaseType, semantic: Semantic, size: usize, members: Vec<StructMember>) -> Self {
        TypeDesc(Arc::new(TypeDescData {
            name: name.to_string(),
            id: stable_hash(name),
            base,
            semantic,
            size,
            members,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn base_type(&self) -> BaseType {
        self.0.base
    }

    pub fn semantic(&self) -> Semantic {
        self.0.semantic
    }

    /// Component count. 0 marks an array whose length comes from its value.
    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn members(&self) -> &[StructMember] {
        &self.0.members
    }

    pub fn is_scalar(&self) -> bool {
        self.0.size == 1 && self.0.base != BaseType::Struct
    }

    pub fn is_aggregate(&self) -> bool {
        self.0.size > 1
    }

    pub fn is_array(&self) -> bool {
        self.0.size == 0
    }

    fn is_float_n(&self, n: usize) -> bool {
        self.0.size == n && matches!(self.0.semantic, Semantic::Color | Semantic::Vector)
    }

    pub fn is_float2(&self) -> bool {
        self.is_float_n(2)
    }

    pub fn is_float3(&self) -> bool {
        self.is_float_n(3)
    }

    pub fn is_float4(&self) -> bool {
        self.is_float_n(4)
    }

    pub fn is_closure(&self) -> bool {
        self.0.semantic == Semantic::Closure
    }

    pub fn is_shader(&self) -> bool {
        self.0.semantic == Semantic::Shader
    }

    pub fn is_struct(&self) -> bool {
        self.0.base == BaseType::Struct
    }

    /// Closure and shader types can be connected but never hold a literal value.
    pub fn is_editable(&self) -> bool {
        !matches!(
            self.0.semantic,
            Semantic::Closure | Semantic::Shader | Semantic::Material
        ) && self.0.base != BaseType::None
    }
}

impl PartialEq for TypeDesc {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TypeDesc {}

impl std::hash::Hash for TypeDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDesc({})", self.0.name)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// FNV-1a over the name. Stable across runs and platforms, unlike `DefaultHasher`.
pub fn stable_hash(s: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

/// Registry of type descriptors, constructed once and passed by reference.
#[derive(Debug, Default, Clone)]
pub struct TypeSystem {
    types: HashMap<String, TypeDesc>,
    order: Vec<TypeDesc>,
}

impl TypeSystem {
    /// An empty registry. Most callers want [`TypeSystem::standard`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the standard library types.
    pub fn standard() -> Self {
        use names::*;
        let mut ts = Self::new();
        let builtin: [(&str, BaseType, Semantic, usize); 24] = [
            (NONE, BaseType::None, Semantic::None, 1),
            (BOOLEAN, BaseType::Boolean, Semantic::None, 1),
            (INTEGER, BaseType::Integer, Semantic::None, 1),
            (FLOAT, BaseType::Float, Semantic::None, 1),
            (COLOR2, BaseType::Float, Semantic::Color, 2),
            (COLOR3, BaseType::Float, Semantic::Color, 3),
            (COLOR4, BaseType::Float, Semantic::Color, 4),
            (VECTOR2, BaseType::Float, Semantic::Vector, 2),
            (VECTOR3, BaseType::Float, Semantic::Vector, 3),
            (VECTOR4, BaseType::Float, Semantic::Vector, 4),
            (MATRIX33, BaseType::Float, Semantic::Matrix, 9),
            (MATRIX44, BaseType::Float, Semantic::Matrix, 16),
            (STRING, BaseType::String, Semantic::None, 1),
            (FILENAME, BaseType::String, Semantic::Filename, 1),
            (INTEGERARRAY, BaseType::Integer, Semantic::None, 0),
            (FLOATARRAY, BaseType::Float, Semantic::None, 0),
            (BSDF, BaseType::None, Semantic::Closure, 1),
            (EDF, BaseType::None, Semantic::Closure, 1),
            (VDF, BaseType::None, Semantic::Closure, 1),
            (SURFACESHADER, BaseType::None, Semantic::Shader, 1),
            (VOLUMESHADER, BaseType::None, Semantic::Shader, 1),
            (DISPLACEMENTSHADER, BaseType::None, Semantic::Shader, 1),
            (LIGHTSHADER, BaseType::None, Semantic::Shader, 1),
            (MATERIAL, BaseType::None, Semantic::Material, 1),
        ];
        for (name, base, semantic, size) in builtin {
            // Names above are unique, so registration cannot collide.
            let _ = ts.register_type(name, base, semantic, size);
        }
        let float = ts.types[FLOAT].clone();
        let members = ["roughness", "alpha", "alphaX", "alphaY"]
            .into_iter()
            .map(|m| StructMember {
                ty: float.clone(),
                name: m.to_string(),
                default_value: "0.0".to_string(),
            })
            .collect();
        let _ = ts.register_struct(ROUGHNESSINFO, members);
        ts
    }

    pub fn register_type(
        &mut self,
        name: &str,
        base: BaseType,
        semantic: Semantic,
        size: usize,
    ) -> Result<TypeDesc> {
        self.insert(TypeDesc::new(name, base, semantic, size, Vec::new()))
    }

    /// Register a struct type. Its size is the member count.
    pub fn register_struct(&mut self, name: &str, members: Vec<StructMember>) -> Result<TypeDesc> {
        let size = members.len();
        self.insert(TypeDesc::new(name, BaseType::Struct, Semantic::None, size, members))
    }

    fn insert(&mut self, ty: TypeDesc) -> Result<TypeDesc> {
        if self.types.contains_key(ty.name()) {
            return Err(Error::document(format!(
                "type '{}' is already registered",
                ty.name()
            )));
        }
        self.types.insert(ty.name().to_string(), ty.clone());
        self.order.push(ty.clone());
        Ok(ty)
    }

    /// Look up a registered type. There is no implicit fallback.
    pub fn get(&self, name: &str) -> Result<TypeDesc> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// All registered types in registration order.
    pub fn types(&self) -> &[TypeDesc] {
        &self.order
    }

    /// The zero/identity value for a type, or `None` for closures and shaders.
    pub fn default_value(&self, ty: &TypeDesc) -> Option<Value> {
        if ty.is_struct() {
            let mut fields = Vec::with_capacity(ty.members().len());
            for m in ty.members() {
                let v = Value::parse(&m.ty, &m.default_value)
                    .ok()
                    .or_else(|| self.default_value(&m.ty))?;
                fields.push(v);
            }
            return Some(Value::Struct(fields));
        }
        Value::zero(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_types_are_classified() {
        let ts = TypeSystem::standard();
        let c3 = ts.get(names::COLOR3).unwrap();
        assert!(c3.is_float3());
        assert!(c3.is_aggregate());
        assert!(!c3.is_scalar());

        let v2 = ts.get(names::VECTOR2).unwrap();
        assert!(v2.is_float2());
        assert!(!ts.get(names::MATRIX33).unwrap().is_float3());

        assert!(ts.get(names::FLOATARRAY).unwrap().is_array());
        assert!(ts.get(names::BSDF).unwrap().is_closure());
        assert!(!ts.get(names::BSDF).unwrap().is_editable());
        assert!(ts.get(names::ROUGHNESSINFO).unwrap().is_struct());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let ts = TypeSystem::standard();
        assert_eq!(
            ts.get("color5"),
            Err(Error::UnknownType("color5".to_string()))
        );
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut ts = TypeSystem::standard();
        let err = ts
            .register_type(names::FLOAT, BaseType::Float, Semantic::None, 1)
            .unwrap_err();
        assert_eq!(err.kind(), "Document");
        assert!(err.to_string().contains("'float'"), "{err}");
        assert!(ts.register_type("float5", BaseType::Float, Semantic::None, 5).is_ok());
    }

    #[test]
    fn identity_is_name_hash() {
        let a = TypeSystem::standard();
        let b = TypeSystem::standard();
        assert_eq!(a.get("color3").unwrap(), b.get("color3").unwrap());
        assert_ne!(a.get("color3").unwrap(), a.get("vector3").unwrap());
        assert_eq!(a.get("float").unwrap().id(), stable_hash("float"));
    }
}
