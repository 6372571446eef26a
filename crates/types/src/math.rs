//! Plain value types carried by `Variant`. Single precision, matching the
//! engine's `real_t`.

use core::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Vector2i {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Vector3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Vector4i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vector2,
    pub size: Vector2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect2i {
    pub position: Vector2i,
    pub size: Vector2i,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vector3,
    pub d: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub position: Vector3,
    pub size: Vector3,
}

/// Row-major 3x3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub rows: [Vector3; 3],
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    /// x axis, y axis, origin.
    pub columns: [Vector2; 3],
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform3D {
    pub basis: Basis,
    pub origin: Vector3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub columns: [Vector4; 4],
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            columns: [
                Vector4::new(1.0, 0.0, 0.0, 0.0),
                Vector4::new(0.0, 1.0, 0.0, 0.0),
                Vector4::new(0.0, 0.0, 1.0, 0.0),
                Vector4::new(0.0, 0.0, 0.0, 1.0),
            ],
        }
    }
}

impl Vector2 {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn normalized(self) -> Self {
        let len = self.length();
        if len == 0.0 { self } else { Self::new(self.x / len, self.y / len) }
    }

    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl Vector2i {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Vector3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn normalized(self) -> Self {
        let len = self.length();
        if len == 0.0 { self } else { self / len }
    }
}

impl Vector3i {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl Vector4 {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Vector4i {
    pub const fn new(x: i32, y: i32, z: i32, w: i32) -> Self {
        Self { x, y, z, w }
    }
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

impl Basis {
    pub const IDENTITY: Self = Self {
        rows: [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ],
    };

    pub fn transposed(self) -> Self {
        let r = self.rows;
        Self {
            rows: [
                Vector3::new(r[0].x, r[1].x, r[2].x),
                Vector3::new(r[0].y, r[1].y, r[2].y),
                Vector3::new(r[0].z, r[1].z, r[2].z),
            ],
        }
    }

    pub fn xform(self, v: Vector3) -> Vector3 {
        Vector3::new(self.rows[0].dot(v), self.rows[1].dot(v), self.rows[2].dot(v))
    }
}

impl Mul for Basis {
    type Output = Basis;

    fn mul(self, rhs: Basis) -> Basis {
        let t = rhs.transposed();
        let row = |r: Vector3| Vector3::new(r.dot(t.rows[0]), r.dot(t.rows[1]), r.dot(t.rows[2]));
        Basis { rows: [row(self.rows[0]), row(self.rows[1]), row(self.rows[2])] }
    }
}

impl Transform2D {
    pub const IDENTITY: Self = Self {
        columns: [Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0), Vector2::new(0.0, 0.0)],
    };

    pub fn xform(self, v: Vector2) -> Vector2 {
        let [x, y, origin] = self.columns;
        Vector2::new(x.x * v.x + y.x * v.y + origin.x, x.y * v.x + y.y * v.y + origin.y)
    }

    pub fn translated(mut self, offset: Vector2) -> Self {
        self.columns[2] = self.columns[2] + offset;
        self
    }
}

impl Transform3D {
    pub fn xform(self, v: Vector3) -> Vector3 {
        self.basis.xform(v) + self.origin
    }

    pub fn translated(mut self, offset: Vector3) -> Self {
        self.origin = self.origin + offset;
        self
    }
}

macro_rules! impl_float_vector_ops {
    ($ty:ident { $($f:ident),+ }) => {
        impl Add for $ty {
            type Output = $ty;
            fn add(self, rhs: $ty) -> $ty { $ty { $($f: self.$f + rhs.$f),+ } }
        }
        impl Sub for $ty {
            type Output = $ty;
            fn sub(self, rhs: $ty) -> $ty { $ty { $($f: self.$f - rhs.$f),+ } }
        }
        impl Mul for $ty {
            type Output = $ty;
            fn mul(self, rhs: $ty) -> $ty { $ty { $($f: self.$f * rhs.$f),+ } }
        }
        impl Mul<f32> for $ty {
            type Output = $ty;
            fn mul(self, rhs: f32) -> $ty { $ty { $($f: self.$f * rhs),+ } }
        }
        impl Div for $ty {
            type Output = $ty;
            fn div(self, rhs: $ty) -> $ty { $ty { $($f: self.$f / rhs.$f),+ } }
        }
        impl Div<f32> for $ty {
            type Output = $ty;
            fn div(self, rhs: f32) -> $ty { $ty { $($f: self.$f / rhs),+ } }
        }
        impl Neg for $ty {
            type Output = $ty;
            fn neg(self) -> $ty { $ty { $($f: -self.$f),+ } }
        }
    };
}

macro_rules! impl_int_vector_ops {
    ($ty:ident { $($f:ident),+ }) => {
        impl Add for $ty {
            type Output = $ty;
            fn add(self, rhs: $ty) -> $ty { $ty { $($f: self.$f.wrapping_add(rhs.$f)),+ } }
        }
        impl Sub for $ty {
            type Output = $ty;
            fn sub(self, rhs: $ty) -> $ty { $ty { $($f: self.$f.wrapping_sub(rhs.$f)),+ } }
        }
        impl Mul for $ty {
            type Output = $ty;
            fn mul(self, rhs: $ty) -> $ty { $ty { $($f: self.$f.wrapping_mul(rhs.$f)),+ } }
        }
        impl Mul<i32> for $ty {
            type Output = $ty;
            fn mul(self, rhs: i32) -> $ty { $ty { $($f: self.$f.wrapping_mul(rhs)),+ } }
        }
        impl Neg for $ty {
            type Output = $ty;
            fn neg(self) -> $ty { $ty { $($f: self.$f.wrapping_neg()),+ } }
        }
    };
}

impl_float_vector_ops!(Vector2 { x, y });
impl_float_vector_ops!(Vector3 { x, y, z });
impl_float_vector_ops!(Vector4 { x, y, z, w });
impl_float_vector_ops!(Color { r, g, b, a });
impl_int_vector_ops!(Vector2i { x, y });
impl_int_vector_ops!(Vector3i { x, y, z });
impl_int_vector_ops!(Vector4i { x, y, z, w });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_identity_is_neutral() {
        let b = Basis { rows: [Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0), Vector3::new(7.0, 8.0, 9.0)] };
        assert_eq!(b * Basis::IDENTITY, b);
        assert_eq!(Basis::IDENTITY * b, b);
    }

    #[test]
    fn transform2d_translates_points() {
        let t = Transform2D::IDENTITY.translated(Vector2::new(3.0, -1.0));
        assert_eq!(t.xform(Vector2::new(1.0, 1.0)), Vector2::new(4.0, 0.0));
    }
}
