use core::fmt;

use crate::callable::{Callable, Signal};
use crate::containers::{creates_cycle, Array, Dictionary, Nested};
use crate::math::*;
use crate::object::ObjectId;
use crate::variant_type::VariantType;

/// The host's dynamic value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Rect2(Rect2),
    Rect2i(Rect2i),
    Vector3(Vector3),
    Vector3i(Vector3i),
    Transform2D(Transform2D),
    Vector4(Vector4),
    Vector4i(Vector4i),
    Plane(Plane),
    Quaternion(Quaternion),
    Aabb(Aabb),
    Basis(Basis),
    Transform3D(Transform3D),
    Projection(Projection),
    Color(Color),
    StringName(String),
    NodePath(String),
    Rid(u64),
    Object(ObjectId),
    Callable(Callable),
    Signal(Signal),
    Dictionary(Dictionary),
    Array(Array),
    PackedByteArray(Vec<u8>),
    PackedInt32Array(Vec<i32>),
    PackedInt64Array(Vec<i64>),
    PackedFloat32Array(Vec<f32>),
    PackedFloat64Array(Vec<f64>),
    PackedStringArray(Vec<String>),
    PackedVector2Array(Vec<Vector2>),
    PackedVector3Array(Vec<Vector3>),
    PackedColorArray(Vec<Color>),
    PackedVector4Array(Vec<Vector4>),
}

impl Variant {
    pub fn get_type(&self) -> VariantType {
        match self {
            Variant::Nil => VariantType::Nil,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::Float(_) => VariantType::Float,
            Variant::String(_) => VariantType::String,
            Variant::Vector2(_) => VariantType::Vector2,
            Variant::Vector2i(_) => VariantType::Vector2i,
            Variant::Rect2(_) => VariantType::Rect2,
            Variant::Rect2i(_) => VariantType::Rect2i,
            Variant::Vector3(_) => VariantType::Vector3,
            Variant::Vector3i(_) => VariantType::Vector3i,
            Variant::Transform2D(_) => VariantType::Transform2D,
            Variant::Vector4(_) => VariantType::Vector4,
            Variant::Vector4i(_) => VariantType::Vector4i,
            Variant::Plane(_) => VariantType::Plane,
            Variant::Quaternion(_) => VariantType::Quaternion,
            Variant::Aabb(_) => VariantType::Aabb,
            Variant::Basis(_) => VariantType::Basis,
            Variant::Transform3D(_) => VariantType::Transform3D,
            Variant::Projection(_) => VariantType::Projection,
            Variant::Color(_) => VariantType::Color,
            Variant::StringName(_) => VariantType::StringName,
            Variant::NodePath(_) => VariantType::NodePath,
            Variant::Rid(_) => VariantType::Rid,
            Variant::Object(_) => VariantType::Object,
            Variant::Callable(_) => VariantType::Callable,
            Variant::Signal(_) => VariantType::Signal,
            Variant::Dictionary(_) => VariantType::Dictionary,
            Variant::Array(_) => VariantType::Array,
            Variant::PackedByteArray(_) => VariantType::PackedByteArray,
            Variant::PackedInt32Array(_) => VariantType::PackedInt32Array,
            Variant::PackedInt64Array(_) => VariantType::PackedInt64Array,
            Variant::PackedFloat32Array(_) => VariantType::PackedFloat32Array,
            Variant::PackedFloat64Array(_) => VariantType::PackedFloat64Array,
            Variant::PackedStringArray(_) => VariantType::PackedStringArray,
            Variant::PackedVector2Array(_) => VariantType::PackedVector2Array,
            Variant::PackedVector3Array(_) => VariantType::PackedVector3Array,
            Variant::PackedColorArray(_) => VariantType::PackedColorArray,
            Variant::PackedVector4Array(_) => VariantType::PackedVector4Array,
        }
    }

    /// Empty value of the given kind, used by `vcreate` and container resizes.
    pub fn default_for(ty: VariantType) -> Variant {
        match ty {
            VariantType::Nil => Variant::Nil,
            VariantType::Bool => Variant::Bool(false),
            VariantType::Int => Variant::Int(0),
            VariantType::Float => Variant::Float(0.0),
            VariantType::String => Variant::String(String::new()),
            VariantType::Vector2 => Variant::Vector2(Vector2::default()),
            VariantType::Vector2i => Variant::Vector2i(Vector2i::default()),
            VariantType::Rect2 => Variant::Rect2(Rect2::default()),
            VariantType::Rect2i => Variant::Rect2i(Rect2i::default()),
            VariantType::Vector3 => Variant::Vector3(Vector3::default()),
            VariantType::Vector3i => Variant::Vector3i(Vector3i::default()),
            VariantType::Transform2D => Variant::Transform2D(Transform2D::default()),
            VariantType::Vector4 => Variant::Vector4(Vector4::default()),
            VariantType::Vector4i => Variant::Vector4i(Vector4i::default()),
            VariantType::Plane => Variant::Plane(Plane::default()),
            VariantType::Quaternion => Variant::Quaternion(Quaternion::default()),
            VariantType::Aabb => Variant::Aabb(Aabb::default()),
            VariantType::Basis => Variant::Basis(Basis::default()),
            VariantType::Transform3D => Variant::Transform3D(Transform3D::default()),
            VariantType::Projection => Variant::Projection(Projection::default()),
            VariantType::Color => Variant::Color(Color::default()),
            VariantType::StringName => Variant::StringName(String::new()),
            VariantType::NodePath => Variant::NodePath(String::new()),
            VariantType::Rid => Variant::Rid(0),
            VariantType::Object => Variant::Object(ObjectId::NULL),
            VariantType::Callable => Variant::Nil,
            VariantType::Signal => Variant::Nil,
            VariantType::Dictionary => Variant::Dictionary(Dictionary::new()),
            VariantType::Array => Variant::Array(Array::new()),
            VariantType::PackedByteArray => Variant::PackedByteArray(Vec::new()),
            VariantType::PackedInt32Array => Variant::PackedInt32Array(Vec::new()),
            VariantType::PackedInt64Array => Variant::PackedInt64Array(Vec::new()),
            VariantType::PackedFloat32Array => Variant::PackedFloat32Array(Vec::new()),
            VariantType::PackedFloat64Array => Variant::PackedFloat64Array(Vec::new()),
            VariantType::PackedStringArray => Variant::PackedStringArray(Vec::new()),
            VariantType::PackedVector2Array => Variant::PackedVector2Array(Vec::new()),
            VariantType::PackedVector3Array => Variant::PackedVector3Array(Vec::new()),
            VariantType::PackedColorArray => Variant::PackedColorArray(Vec::new()),
            VariantType::PackedVector4Array => Variant::PackedVector4Array(Vec::new()),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    /// Copy that no longer shares container storage with `self`.
    pub fn duplicate(&self) -> Variant {
        match self {
            Variant::Array(a) => Variant::Array(a.duplicate()),
            Variant::Dictionary(d) => Variant::Dictionary(d.duplicate()),
            other => other.clone(),
        }
    }

    /// Truthiness as scripts see it.
    pub fn booleanize(&self) -> bool {
        match self {
            Variant::Nil => false,
            Variant::Bool(b) => *b,
            Variant::Int(i) => *i != 0,
            Variant::Float(f) => *f != 0.0,
            Variant::String(s) | Variant::StringName(s) | Variant::NodePath(s) => !s.is_empty(),
            Variant::Object(o) => !o.is_null(),
            Variant::Array(a) => !a.is_empty(),
            Variant::Dictionary(d) => !d.is_empty(),
            Variant::Vector2(v) => *v != Vector2::ZERO,
            Variant::Vector3(v) => *v != Vector3::ZERO,
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) | Variant::StringName(s) | Variant::NodePath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            Variant::Bool(b) => Some(*b as i64),
            Variant::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Variant::Float(f) => Some(*f),
            Variant::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Variant::Object(o) => Some(*o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Variant::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Variant::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Variant::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Raw bytes of a packed array, in guest (little endian) layout.
    pub fn packed_bytes(&self) -> Option<Vec<u8>> {
        fn flat<T: Copy, const N: usize>(items: &[T], to: impl Fn(T) -> [u8; N]) -> Vec<u8> {
            items.iter().flat_map(|v| to(*v)).collect()
        }
        Some(match self {
            Variant::PackedByteArray(v) => v.clone(),
            Variant::PackedInt32Array(v) => flat(v, i32::to_le_bytes),
            Variant::PackedInt64Array(v) => flat(v, i64::to_le_bytes),
            Variant::PackedFloat32Array(v) => flat(v, f32::to_le_bytes),
            Variant::PackedFloat64Array(v) => flat(v, f64::to_le_bytes),
            Variant::PackedVector2Array(v) => v.iter().flat_map(|p| [p.x, p.y]).flat_map(f32::to_le_bytes).collect(),
            Variant::PackedVector3Array(v) => v.iter().flat_map(|p| [p.x, p.y, p.z]).flat_map(f32::to_le_bytes).collect(),
            Variant::PackedColorArray(v) => v.iter().flat_map(|c| [c.r, c.g, c.b, c.a]).flat_map(f32::to_le_bytes).collect(),
            Variant::PackedVector4Array(v) => v.iter().flat_map(|p| [p.x, p.y, p.z, p.w]).flat_map(f32::to_le_bytes).collect(),
            _ => return None,
        })
    }

    /// Element size in bytes of a packed array kind.
    pub fn packed_element_size(ty: VariantType) -> Option<usize> {
        Some(match ty {
            VariantType::PackedByteArray => 1,
            VariantType::PackedInt32Array | VariantType::PackedFloat32Array => 4,
            VariantType::PackedInt64Array | VariantType::PackedFloat64Array => 8,
            VariantType::PackedVector2Array => 8,
            VariantType::PackedVector3Array => 12,
            VariantType::PackedColorArray | VariantType::PackedVector4Array => 16,
            _ => return None,
        })
    }

    /// Inverse of `packed_bytes`. Trailing bytes that do not fill a whole
    /// element are ignored.
    pub fn from_packed_bytes(ty: VariantType, bytes: &[u8]) -> Option<Variant> {
        fn f32s(bytes: &[u8]) -> Vec<f32> {
            bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
        }
        Some(match ty {
            VariantType::PackedByteArray => Variant::PackedByteArray(bytes.to_vec()),
            VariantType::PackedInt32Array => Variant::PackedInt32Array(
                bytes.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
            ),
            VariantType::PackedInt64Array => Variant::PackedInt64Array(
                bytes.chunks_exact(8).map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8]))).collect(),
            ),
            VariantType::PackedFloat32Array => Variant::PackedFloat32Array(f32s(bytes)),
            VariantType::PackedFloat64Array => Variant::PackedFloat64Array(
                bytes.chunks_exact(8).map(|c| f64::from_le_bytes(c.try_into().unwrap_or([0; 8]))).collect(),
            ),
            VariantType::PackedVector2Array => Variant::PackedVector2Array(
                f32s(bytes).chunks_exact(2).map(|c| Vector2::new(c[0], c[1])).collect(),
            ),
            VariantType::PackedVector3Array => Variant::PackedVector3Array(
                f32s(bytes).chunks_exact(3).map(|c| Vector3::new(c[0], c[1], c[2])).collect(),
            ),
            VariantType::PackedColorArray => Variant::PackedColorArray(
                f32s(bytes).chunks_exact(4).map(|c| Color::new(c[0], c[1], c[2], c[3])).collect(),
            ),
            VariantType::PackedVector4Array => Variant::PackedVector4Array(
                f32s(bytes).chunks_exact(4).map(|c| Vector4::new(c[0], c[1], c[2], c[3])).collect(),
            ),
            _ => return None,
        })
    }

    /// Built-in methods a guest may call on a value through `vcall`.
    /// Callables are dispatched by the sandbox, not here.
    pub fn call_builtin(&self, method: &str, args: &[Variant]) -> Option<Variant> {
        let arg = |i: usize| args.get(i);
        match (self, method) {
            (Variant::String(s) | Variant::StringName(s), "length") => Some(Variant::Int(s.chars().count() as i64)),
            (Variant::String(s), "to_upper") => Some(Variant::String(s.to_uppercase())),
            (Variant::String(s), "to_lower") => Some(Variant::String(s.to_lowercase())),
            (Variant::String(s), "is_empty") => Some(Variant::Bool(s.is_empty())),
            (Variant::String(s), "begins_with") => Some(Variant::Bool(s.starts_with(arg(0)?.as_str()?))),
            (Variant::String(s), "ends_with") => Some(Variant::Bool(s.ends_with(arg(0)?.as_str()?))),
            (Variant::String(s), "find") => Some(Variant::Int(
                s.find(arg(0)?.as_str()?).map(|b| s[..b].chars().count() as i64).unwrap_or(-1),
            )),
            (Variant::String(s), "substr") => {
                let from = arg(0)?.as_int()?.max(0) as usize;
                let len = arg(1).and_then(Variant::as_int).unwrap_or(-1);
                let chars = s.chars().skip(from);
                let out: String = if len < 0 { chars.collect() } else { chars.take(len as usize).collect() };
                Some(Variant::String(out))
            }
            (Variant::Array(a), "size") => Some(Variant::Int(a.len() as i64)),
            (Variant::Array(a), "is_empty") => Some(Variant::Bool(a.is_empty())),
            (Variant::Array(a), "has") => Some(Variant::Bool(a.contains(arg(0)?))),
            (Variant::Array(a), "append" | "push_back") => {
                if creates_cycle(self, arg(0)?) {
                    return None;
                }
                a.push(arg(0)?.clone());
                Some(Variant::Nil)
            }
            (Variant::Array(a), "find") => {
                let needle = arg(0)?;
                Some(Variant::Int(a.items().iter().position(|v| v == needle).map(|p| p as i64).unwrap_or(-1)))
            }
            (Variant::Dictionary(d), "size") => Some(Variant::Int(d.len() as i64)),
            (Variant::Dictionary(d), "has") => Some(Variant::Bool(d.has(arg(0)?))),
            (Variant::Dictionary(d), "get") => Some(d.get(arg(0)?).unwrap_or_else(|| arg(1).cloned().unwrap_or_default())),
            (Variant::Dictionary(d), "keys") => Some(Variant::Array(Array::from_vec(d.keys()))),
            (Variant::Dictionary(d), "values") => Some(Variant::Array(Array::from_vec(d.values()))),
            (Variant::Vector2(v), "length") => Some(Variant::Float(v.length() as f64)),
            (Variant::Vector2(v), "normalized") => Some(Variant::Vector2(v.normalized())),
            (Variant::Vector2(v), "dot") => match arg(0)? {
                Variant::Vector2(o) => Some(Variant::Float(v.dot(*o) as f64)),
                _ => None,
            },
            (Variant::Vector3(v), "length") => Some(Variant::Float(v.length() as f64)),
            (Variant::Vector3(v), "normalized") => Some(Variant::Vector3(v.normalized())),
            (Variant::Vector3(v), "dot") => match arg(0)? {
                Variant::Vector3(o) => Some(Variant::Float(v.dot(*o) as f64)),
                _ => None,
            },
            (Variant::Vector3(v), "cross") => match arg(0)? {
                Variant::Vector3(o) => Some(Variant::Vector3(v.cross(*o))),
                _ => None,
            },
            (Variant::PackedByteArray(v), "size") => Some(Variant::Int(v.len() as i64)),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Nil => f.write_str("<null>"),
            Variant::Bool(b) => write!(f, "{b}"),
            Variant::Int(i) => write!(f, "{i}"),
            Variant::Float(v) => write!(f, "{v}"),
            Variant::String(s) | Variant::StringName(s) | Variant::NodePath(s) => f.write_str(s),
            Variant::Vector2(v) => write!(f, "({}, {})", v.x, v.y),
            Variant::Vector2i(v) => write!(f, "({}, {})", v.x, v.y),
            Variant::Vector3(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Variant::Vector3i(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Variant::Vector4(v) => write!(f, "({}, {}, {}, {})", v.x, v.y, v.z, v.w),
            Variant::Vector4i(v) => write!(f, "({}, {}, {}, {})", v.x, v.y, v.z, v.w),
            Variant::Color(c) => write!(f, "({}, {}, {}, {})", c.r, c.g, c.b, c.a),
            Variant::Object(o) if o.is_null() => f.write_str("<Object#null>"),
            Variant::Object(o) => write!(f, "<Object#{o}>"),
            Variant::Array(a) => {
                let Some(_nested) = Nested::enter() else {
                    return f.write_str("[...]");
                };
                f.write_str("[")?;
                for (i, item) in a.items().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Variant::Dictionary(d) => {
                let Some(_nested) = Nested::enter() else {
                    return f.write_str("{...}");
                };
                f.write_str("{ ")?;
                for (i, (k, v)) in d.keys().iter().zip(d.values()).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str(" }")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Variant {
            fn from(value: $ty) -> Self {
                Variant::$variant(value)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    Vector2 => Vector2,
    Vector2i => Vector2i,
    Vector3 => Vector3,
    Vector3i => Vector3i,
    Vector4 => Vector4,
    Vector4i => Vector4i,
    Color => Color,
    ObjectId => Object,
    Callable => Callable,
    Dictionary => Dictionary,
    Array => Array,
    Vec<u8> => PackedByteArray,
}

impl From<i32> for Variant {
    fn from(value: i32) -> Self {
        Variant::Int(value as i64)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_bytes_round_trip_keeps_elements() {
        let v = Variant::PackedVector3Array(vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.5, 9.0)]);
        let bytes = v.packed_bytes().unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(Variant::from_packed_bytes(VariantType::PackedVector3Array, &bytes), Some(v));
    }

    #[test]
    fn duplicate_detaches_containers() {
        let arr = Variant::Array(Array::from_vec(vec![Variant::Int(1)]));
        let dup = arr.duplicate();
        arr.as_array().unwrap().push(Variant::Int(2));
        assert_eq!(dup.as_array().unwrap().len(), 1);
    }

    #[test]
    fn builtin_string_methods() {
        let s = Variant::from("hello world");
        assert_eq!(s.call_builtin("length", &[]), Some(Variant::Int(11)));
        assert_eq!(s.call_builtin("find", &[Variant::from("world")]), Some(Variant::Int(6)));
        assert_eq!(s.call_builtin("no_such_method", &[]), None);
    }
}
