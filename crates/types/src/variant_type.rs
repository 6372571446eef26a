use core::fmt;

/// Discriminant of a dynamic value. The numbering is part of the guest ABI:
/// guests write these numbers into the `type` field of a guest variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    pub const COUNT: u32 = 39;

    const ALL: [VariantType; Self::COUNT as usize] = [
        Self::Nil,
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::String,
        Self::Vector2,
        Self::Vector2i,
        Self::Rect2,
        Self::Rect2i,
        Self::Vector3,
        Self::Vector3i,
        Self::Transform2D,
        Self::Vector4,
        Self::Vector4i,
        Self::Plane,
        Self::Quaternion,
        Self::Aabb,
        Self::Basis,
        Self::Transform3D,
        Self::Projection,
        Self::Color,
        Self::StringName,
        Self::NodePath,
        Self::Rid,
        Self::Object,
        Self::Callable,
        Self::Signal,
        Self::Dictionary,
        Self::Array,
        Self::PackedByteArray,
        Self::PackedInt32Array,
        Self::PackedInt64Array,
        Self::PackedFloat32Array,
        Self::PackedFloat64Array,
        Self::PackedStringArray,
        Self::PackedVector2Array,
        Self::PackedVector3Array,
        Self::PackedColorArray,
        Self::PackedVector4Array,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Kinds that never travel inline. A guest only ever sees an index into
    /// the host value store for these.
    pub fn is_scoped(self) -> bool {
        matches!(
            self,
            Self::String
                | Self::Transform2D
                | Self::Quaternion
                | Self::Aabb
                | Self::Basis
                | Self::Transform3D
                | Self::Projection
                | Self::StringName
                | Self::NodePath
                | Self::Rid
                | Self::Callable
                | Self::Signal
                | Self::Dictionary
                | Self::Array
        ) || self.is_packed_array()
    }

    pub fn is_packed_array(self) -> bool {
        (Self::PackedByteArray as u32..=Self::PackedVector4Array as u32).contains(&(self as u32))
    }

    pub fn is_string_like(self) -> bool {
        matches!(self, Self::String | Self::StringName | Self::NodePath)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "Nil",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "String",
            Self::Vector2 => "Vector2",
            Self::Vector2i => "Vector2i",
            Self::Rect2 => "Rect2",
            Self::Rect2i => "Rect2i",
            Self::Vector3 => "Vector3",
            Self::Vector3i => "Vector3i",
            Self::Transform2D => "Transform2D",
            Self::Vector4 => "Vector4",
            Self::Vector4i => "Vector4i",
            Self::Plane => "Plane",
            Self::Quaternion => "Quaternion",
            Self::Aabb => "AABB",
            Self::Basis => "Basis",
            Self::Transform3D => "Transform3D",
            Self::Projection => "Projection",
            Self::Color => "Color",
            Self::StringName => "StringName",
            Self::NodePath => "NodePath",
            Self::Rid => "RID",
            Self::Object => "Object",
            Self::Callable => "Callable",
            Self::Signal => "Signal",
            Self::Dictionary => "Dictionary",
            Self::Array => "Array",
            Self::PackedByteArray => "PackedByteArray",
            Self::PackedInt32Array => "PackedInt32Array",
            Self::PackedInt64Array => "PackedInt64Array",
            Self::PackedFloat32Array => "PackedFloat32Array",
            Self::PackedFloat64Array => "PackedFloat64Array",
            Self::PackedStringArray => "PackedStringArray",
            Self::PackedVector2Array => "PackedVector2Array",
            Self::PackedVector3Array => "PackedVector3Array",
            Self::PackedColorArray => "PackedColorArray",
            Self::PackedVector4Array => "PackedVector4Array",
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_is_dense() {
        for raw in 0..VariantType::COUNT {
            let ty = VariantType::from_u32(raw).unwrap();
            assert_eq!(ty as u32, raw);
        }
        assert_eq!(VariantType::from_u32(VariantType::COUNT), None);
    }

    #[test]
    fn object_is_guarded_not_scoped() {
        assert!(!VariantType::Object.is_scoped());
        assert!(VariantType::String.is_scoped());
        assert!(VariantType::PackedColorArray.is_scoped());
        assert!(!VariantType::Vector4i.is_scoped());
    }
}
