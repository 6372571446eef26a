//! Operator evaluation on dynamic values. Guests reach this through `veval`;
//! the numbering of `VariantOp` is fixed by the guest ABI.

use core::cmp::Ordering;

use crate::math::*;
use crate::variant::Variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VariantOp {
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    LessEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
    Add = 6,
    Subtract = 7,
    Multiply = 8,
    Divide = 9,
    Negate = 10,
    Positive = 11,
    Module = 12,
    Power = 13,
    ShiftLeft = 14,
    ShiftRight = 15,
    BitAnd = 16,
    BitOr = 17,
    BitXor = 18,
    BitNegate = 19,
    And = 20,
    Or = 21,
    Xor = 22,
    Not = 23,
    In = 24,
}

impl VariantOp {
    pub fn from_u32(value: u32) -> Option<Self> {
        use VariantOp::*;
        const ALL: [VariantOp; 25] = [
            Equal, NotEqual, Less, LessEqual, Greater, GreaterEqual, Add, Subtract, Multiply, Divide, Negate,
            Positive, Module, Power, ShiftLeft, ShiftRight, BitAnd, BitOr, BitXor, BitNegate, And, Or, Xor, Not,
            In,
        ];
        ALL.get(value as usize).copied()
    }

    pub fn is_unary(self) -> bool {
        matches!(self, VariantOp::Negate | VariantOp::Positive | VariantOp::BitNegate | VariantOp::Not)
    }
}

/// Evaluates `a op b`. Unary operators ignore `b`. Returns `None` when the
/// operator is not defined for the operand kinds, or for integer division by
/// zero.
pub fn evaluate(op: VariantOp, a: &Variant, b: &Variant) -> Option<Variant> {
    use Variant as V;
    use VariantOp as Op;

    match op {
        Op::Equal => return Some(V::Bool(loose_eq(a, b))),
        Op::NotEqual => return Some(V::Bool(!loose_eq(a, b))),
        Op::Less | Op::LessEqual | Op::Greater | Op::GreaterEqual => {
            let ord = compare(a, b)?;
            let result = match op {
                Op::Less => ord == Ordering::Less,
                Op::LessEqual => ord != Ordering::Greater,
                Op::Greater => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Some(V::Bool(result));
        }
        Op::And => return Some(V::Bool(a.booleanize() && b.booleanize())),
        Op::Or => return Some(V::Bool(a.booleanize() || b.booleanize())),
        Op::Xor => return Some(V::Bool(a.booleanize() != b.booleanize())),
        Op::Not => return Some(V::Bool(!a.booleanize())),
        Op::In => return contains(b, a).map(V::Bool),
        _ => {}
    }

    match (a, b) {
        (V::Int(x), V::Int(y)) => int_op(op, *x, *y).map(V::Int),
        (V::Int(_), V::Float(_)) | (V::Float(_), V::Int(_)) | (V::Float(_), V::Float(_)) => {
            float_op(op, a.as_float()?, b.as_float()?).map(V::Float)
        }
        (V::Int(x), _) if op.is_unary() => int_op(op, *x, 0).map(V::Int),
        (V::Float(x), _) if op.is_unary() => float_op(op, *x, 0.0).map(V::Float),
        (V::Bool(x), _) if op.is_unary() => int_op(op, *x as i64, 0).map(V::Int),
        (V::String(x), V::String(y)) if op == Op::Add => Some(V::String(format!("{x}{y}"))),
        (V::StringName(x), V::String(y) | V::StringName(y)) if op == Op::Add => Some(V::String(format!("{x}{y}"))),
        (V::String(x), other) if op == Op::Module => Some(V::String(format_percent(x, other))),
        (V::Vector2(x), V::Vector2(y)) => vec2_op(op, *x, *y),
        (V::Vector2(x), V::Float(_) | V::Int(_)) => scale_op(op, b.as_float()? as f32).map(|s| V::Vector2(s(*x))),
        (V::Vector2(x), _) if op.is_unary() => unary_vec(op, *x).map(V::Vector2),
        (V::Vector3(x), V::Vector3(y)) => vec3_op(op, *x, *y),
        (V::Vector3(x), V::Float(_) | V::Int(_)) => scale_op(op, b.as_float()? as f32).map(|s| V::Vector3(s(*x))),
        (V::Vector3(x), _) if op.is_unary() => unary_vec(op, *x).map(V::Vector3),
        (V::Vector2i(x), V::Vector2i(y)) => match op {
            Op::Add => Some(V::Vector2i(*x + *y)),
            Op::Subtract => Some(V::Vector2i(*x - *y)),
            Op::Multiply => Some(V::Vector2i(*x * *y)),
            _ => None,
        },
        (V::Vector3i(x), V::Vector3i(y)) => match op {
            Op::Add => Some(V::Vector3i(*x + *y)),
            Op::Subtract => Some(V::Vector3i(*x - *y)),
            Op::Multiply => Some(V::Vector3i(*x * *y)),
            _ => None,
        },
        (V::Color(x), V::Color(y)) => match op {
            Op::Add => Some(V::Color(*x + *y)),
            Op::Subtract => Some(V::Color(*x - *y)),
            Op::Multiply => Some(V::Color(*x * *y)),
            _ => None,
        },
        (V::Array(x), V::Array(y)) if op == Op::Add => {
            let mut items = x.to_vec();
            items.extend(y.to_vec());
            Some(V::Array(items.into_iter().collect()))
        }
        (V::Transform2D(t), V::Vector2(v)) if op == Op::Multiply => Some(V::Vector2(t.xform(*v))),
        (V::Transform3D(t), V::Vector3(v)) if op == Op::Multiply => Some(V::Vector3(t.xform(*v))),
        (V::Basis(x), V::Basis(y)) if op == Op::Multiply => Some(V::Basis(*x * *y)),
        (V::Basis(x), V::Vector3(v)) if op == Op::Multiply => Some(V::Vector3(x.xform(*v))),
        _ => None,
    }
}

fn int_op(op: VariantOp, x: i64, y: i64) -> Option<i64> {
    use VariantOp as Op;
    Some(match op {
        Op::Add => x.wrapping_add(y),
        Op::Subtract => x.wrapping_sub(y),
        Op::Multiply => x.wrapping_mul(y),
        Op::Divide => x.checked_div(y)?,
        Op::Module => x.checked_rem(y)?,
        Op::Power => x.wrapping_pow(u32::try_from(y).ok()?),
        Op::Negate => x.wrapping_neg(),
        Op::Positive => x,
        Op::ShiftLeft => x.wrapping_shl(u32::try_from(y).ok()?),
        Op::ShiftRight => x.wrapping_shr(u32::try_from(y).ok()?),
        Op::BitAnd => x & y,
        Op::BitOr => x | y,
        Op::BitXor => x ^ y,
        Op::BitNegate => !x,
        _ => return None,
    })
}

fn float_op(op: VariantOp, x: f64, y: f64) -> Option<f64> {
    use VariantOp as Op;
    Some(match op {
        Op::Add => x + y,
        Op::Subtract => x - y,
        Op::Multiply => x * y,
        Op::Divide => x / y,
        Op::Module => x % y,
        Op::Power => x.powf(y),
        Op::Negate => -x,
        Op::Positive => x,
        _ => return None,
    })
}

fn vec2_op(op: VariantOp, x: Vector2, y: Vector2) -> Option<Variant> {
    use VariantOp as Op;
    Some(Variant::Vector2(match op {
        Op::Add => x + y,
        Op::Subtract => x - y,
        Op::Multiply => x * y,
        Op::Divide => x / y,
        _ => return None,
    }))
}

fn vec3_op(op: VariantOp, x: Vector3, y: Vector3) -> Option<Variant> {
    use VariantOp as Op;
    Some(Variant::Vector3(match op {
        Op::Add => x + y,
        Op::Subtract => x - y,
        Op::Multiply => x * y,
        Op::Divide => x / y,
        _ => return None,
    }))
}

fn scale_op<T>(op: VariantOp, s: f32) -> Option<impl Fn(T) -> T>
where
    T: core::ops::Mul<f32, Output = T> + core::ops::Div<f32, Output = T>,
{
    let divide = match op {
        VariantOp::Multiply => false,
        VariantOp::Divide => true,
        _ => return None,
    };
    Some(move |v: T| if divide { v / s } else { v * s })
}

fn unary_vec<T: core::ops::Neg<Output = T>>(op: VariantOp, v: T) -> Option<T> {
    match op {
        VariantOp::Negate => Some(-v),
        VariantOp::Positive => Some(v),
        _ => None,
    }
}

/// Equality that treats ints and floats as comparable numbers, and strings
/// and string names as comparable text.
fn loose_eq(a: &Variant, b: &Variant) -> bool {
    match (a, b) {
        (Variant::Int(_), Variant::Float(_)) | (Variant::Float(_), Variant::Int(_)) => a.as_float() == b.as_float(),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Ordering used by comparison operators and by array sorting.
pub fn compare(a: &Variant, b: &Variant) -> Option<Ordering> {
    match (a, b) {
        (Variant::Int(x), Variant::Int(y)) => Some(x.cmp(y)),
        (Variant::Bool(x), Variant::Bool(y)) => Some(x.cmp(y)),
        (Variant::Int(_) | Variant::Float(_), Variant::Int(_) | Variant::Float(_)) => {
            a.as_float()?.partial_cmp(&b.as_float()?)
        }
        (Variant::Vector2(x), Variant::Vector2(y)) => (x.x, x.y).partial_cmp(&(y.x, y.y)),
        (Variant::Vector3(x), Variant::Vector3(y)) => (x.x, x.y, x.z).partial_cmp(&(y.x, y.y, y.z)),
        (Variant::Vector2i(x), Variant::Vector2i(y)) => Some((x.x, x.y).cmp(&(y.x, y.y))),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

/// Total order for sorting heterogeneous arrays: by kind first, then value.
pub fn sort_order(a: &Variant, b: &Variant) -> Ordering {
    compare(a, b).unwrap_or_else(|| (a.get_type() as u32).cmp(&(b.get_type() as u32)))
}

fn contains(container: &Variant, needle: &Variant) -> Option<bool> {
    match container {
        Variant::Array(a) => Some(a.contains(needle)),
        Variant::Dictionary(d) => Some(d.has(needle)),
        Variant::String(s) | Variant::StringName(s) => Some(s.contains(needle.as_str()?)),
        Variant::PackedStringArray(v) => Some(v.iter().any(|s| Some(s.as_str()) == needle.as_str())),
        Variant::PackedInt32Array(v) => Some(v.iter().any(|i| Some(*i as i64) == needle.as_int())),
        Variant::PackedInt64Array(v) => Some(v.iter().any(|i| Some(*i) == needle.as_int())),
        _ => None,
    }
}

/// `"%s and %d" % [a, b]` style formatting, enough for guest diagnostics.
fn format_percent(format: &str, args: &Variant) -> String {
    let values: Vec<Variant> = match args {
        Variant::Array(a) => a.to_vec(),
        other => vec![other.clone()],
    };
    let mut values = values.into_iter();
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.peek() {
                Some('s') | Some('d') | Some('f') => {
                    chars.next();
                    if let Some(v) = values.next() {
                        out.push_str(&v.to_string());
                    }
                    continue;
                }
                Some('%') => {
                    chars.next();
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_arithmetic_promotes_to_float() {
        let r = evaluate(VariantOp::Add, &Variant::Int(2), &Variant::Float(0.5));
        assert_eq!(r, Some(Variant::Float(2.5)));
    }

    #[test]
    fn integer_division_by_zero_is_invalid() {
        assert_eq!(evaluate(VariantOp::Divide, &Variant::Int(1), &Variant::Int(0)), None);
    }

    #[test]
    fn string_concatenation_and_in() {
        let hello = Variant::from("hello");
        let r = evaluate(VariantOp::Add, &hello, &Variant::from(" world"));
        assert_eq!(r, Some(Variant::from("hello world")));
        assert_eq!(evaluate(VariantOp::In, &Variant::from("ell"), &hello), Some(Variant::Bool(true)));
    }

    #[test]
    fn comparisons_cross_numeric_kinds() {
        assert_eq!(evaluate(VariantOp::Less, &Variant::Int(1), &Variant::Float(1.5)), Some(Variant::Bool(true)));
        assert_eq!(evaluate(VariantOp::Equal, &Variant::Int(2), &Variant::Float(2.0)), Some(Variant::Bool(true)));
        assert_eq!(evaluate(VariantOp::Less, &Variant::Nil, &Variant::Int(1)), None);
    }

    #[test]
    fn vector_scaling() {
        let v = Variant::Vector2(Vector2::new(1.0, 2.0));
        assert_eq!(evaluate(VariantOp::Multiply, &v, &Variant::Int(2)), Some(Variant::Vector2(Vector2::new(2.0, 4.0))));
    }

    #[test]
    fn op_numbering_is_stable() {
        assert_eq!(VariantOp::from_u32(24), Some(VariantOp::In));
        assert_eq!(VariantOp::from_u32(6), Some(VariantOp::Add));
        assert_eq!(VariantOp::from_u32(25), None);
    }

    proptest::proptest! {
        #[test]
        fn integer_comparisons_match_i64(x in proptest::num::i64::ANY, y in proptest::num::i64::ANY) {
            let (a, b) = (Variant::Int(x), Variant::Int(y));
            proptest::prop_assert_eq!(evaluate(VariantOp::Less, &a, &b), Some(Variant::Bool(x < y)));
            proptest::prop_assert_eq!(evaluate(VariantOp::GreaterEqual, &a, &b), Some(Variant::Bool(x >= y)));
            proptest::prop_assert_eq!(evaluate(VariantOp::Equal, &a, &b), Some(Variant::Bool(x == y)));
        }
    }
}
