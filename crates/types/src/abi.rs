//! Syscall numbering shared by host and guest.
//!
//! A guest places the number in `a7` and arguments in `a0..a6`, then executes
//! `ecall`. Results come back in `a0` (and `a1` for 64-bit values). The
//! numbers below are the versioned ABI: engine calls start at 500, native
//! libc-style helpers live in 480..499, and the two Linux-compatible numbers
//! cover `write` and `exit`.

pub const ABI_VERSION: u32 = 1;

pub const SYSCALL_WRITE: u32 = 64;
pub const SYSCALL_EXIT: u32 = 93;

pub const NATIVE_SYSCALLS_BASE: u32 = 480;
pub const SYSCALL_MALLOC: u32 = 480;
pub const SYSCALL_CALLOC: u32 = 481;
pub const SYSCALL_REALLOC: u32 = 482;
pub const SYSCALL_FREE: u32 = 483;
pub const SYSCALL_MEMINFO: u32 = 484;
pub const SYSCALL_MEMCPY: u32 = 485;
pub const SYSCALL_MEMSET: u32 = 486;
pub const SYSCALL_MEMMOVE: u32 = 487;
pub const SYSCALL_MEMCMP: u32 = 488;
pub const SYSCALL_STRLEN: u32 = 490;
pub const SYSCALL_STRNCMP: u32 = 491;

pub const ENGINE_SYSCALLS_BASE: u32 = 500;
pub const ECALL_PRINT: u32 = 500;
pub const ECALL_VCALL: u32 = 501;
pub const ECALL_VEVAL: u32 = 502;
pub const ECALL_VFREE: u32 = 503;
pub const ECALL_VCREATE: u32 = 504;
pub const ECALL_VFETCH: u32 = 505;
pub const ECALL_VCLONE: u32 = 506;
pub const ECALL_VSTORE: u32 = 507;
pub const ECALL_VASSIGN: u32 = 508;
pub const ECALL_GET_OBJ: u32 = 509;
pub const ECALL_OBJ: u32 = 510;
pub const ECALL_OBJ_CALLP: u32 = 511;
pub const ECALL_GET_NODE: u32 = 512;
pub const ECALL_NODE: u32 = 513;
pub const ECALL_NODE_CREATE: u32 = 514;
pub const ECALL_NODE2D: u32 = 515;
pub const ECALL_NODE3D: u32 = 516;
pub const ECALL_THROW: u32 = 517;
pub const ECALL_IS_EDITOR: u32 = 518;
pub const ECALL_ARRAY_OPS: u32 = 519;
pub const ECALL_ARRAY_AT: u32 = 520;
pub const ECALL_ARRAY_SIZE: u32 = 521;
pub const ECALL_DICTIONARY_OPS: u32 = 522;
pub const ECALL_STRING_CREATE: u32 = 523;
pub const ECALL_STRING_OPS: u32 = 524;
pub const ECALL_STRING_AT: u32 = 525;
pub const ECALL_STRING_SIZE: u32 = 526;
pub const ECALL_STRING_APPEND: u32 = 527;
pub const ECALL_TIMER_PERIODIC: u32 = 528;
pub const ECALL_TIMER_STOP: u32 = 529;
pub const ECALL_CALLABLE_CREATE: u32 = 530;
pub const ECALL_LOAD: u32 = 531;
pub const ECALL_MATH_OP64: u32 = 532;
pub const ECALL_LERP_OP64: u32 = 533;
pub const ECALL_SINCOS: u32 = 534;
pub const ECALL_LAST: u32 = ECALL_SINCOS;

/// `vcreate` method for string-like kinds: the data pointer is a
/// `GuestStdString`.
pub const VCREATE_FROM_STD_STRING: u32 = 0;
/// `vcreate` method for containers and packed arrays: the data pointer is a
/// `GuestStdVector` of elements (or of guest variants for `Array`).
pub const VCREATE_FROM_STD_VECTOR: u32 = 0;
/// `vcreate` method: no data, create an empty value of the kind.
pub const VCREATE_EMPTY: u32 = 1;

pub fn syscall_name(number: u32) -> &'static str {
    match number {
        SYSCALL_WRITE => "write",
        SYSCALL_EXIT => "exit",
        SYSCALL_MALLOC => "malloc",
        SYSCALL_CALLOC => "calloc",
        SYSCALL_REALLOC => "realloc",
        SYSCALL_FREE => "free",
        SYSCALL_MEMINFO => "meminfo",
        SYSCALL_MEMCPY => "memcpy",
        SYSCALL_MEMSET => "memset",
        SYSCALL_MEMMOVE => "memmove",
        SYSCALL_MEMCMP => "memcmp",
        SYSCALL_STRLEN => "strlen",
        SYSCALL_STRNCMP => "strncmp",
        ECALL_PRINT => "print",
        ECALL_VCALL => "vcall",
        ECALL_VEVAL => "veval",
        ECALL_VFREE => "vfree",
        ECALL_VCREATE => "vcreate",
        ECALL_VFETCH => "vfetch",
        ECALL_VCLONE => "vclone",
        ECALL_VSTORE => "vstore",
        ECALL_VASSIGN => "vassign",
        ECALL_GET_OBJ => "get_obj",
        ECALL_OBJ => "obj",
        ECALL_OBJ_CALLP => "obj_callp",
        ECALL_GET_NODE => "get_node",
        ECALL_NODE => "node",
        ECALL_NODE_CREATE => "node_create",
        ECALL_NODE2D => "node2d",
        ECALL_NODE3D => "node3d",
        ECALL_THROW => "throw",
        ECALL_IS_EDITOR => "is_editor",
        ECALL_ARRAY_OPS => "array_ops",
        ECALL_ARRAY_AT => "array_at",
        ECALL_ARRAY_SIZE => "array_size",
        ECALL_DICTIONARY_OPS => "dictionary_ops",
        ECALL_STRING_CREATE => "string_create",
        ECALL_STRING_OPS => "string_ops",
        ECALL_STRING_AT => "string_at",
        ECALL_STRING_SIZE => "string_size",
        ECALL_STRING_APPEND => "string_append",
        ECALL_TIMER_PERIODIC => "timer_periodic",
        ECALL_TIMER_STOP => "timer_stop",
        ECALL_CALLABLE_CREATE => "callable_create",
        ECALL_LOAD => "load",
        ECALL_MATH_OP64 => "math_op64",
        ECALL_LERP_OP64 => "lerp_op64",
        ECALL_SINCOS => "sincos",
        _ => "unknown",
    }
}

/// Declares a `#[repr(u32)]` sub-operation enum numbered from zero, with a
/// checked conversion from the raw register value.
macro_rules! sub_ops {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn from_u32(value: u32) -> Option<Self> {
                Self::ALL.get(value as usize).copied()
            }
        }
    };
}

sub_ops!(
    /// Operations of `ECALL_OBJ`.
    ObjectOp {
        GetMethodList,
        Get,
        Set,
        GetPropertyList,
        Connect,
        Disconnect,
        GetSignalList,
    }
);

sub_ops!(
    /// Operations of `ECALL_NODE`.
    NodeOp {
        GetName,
        SetName,
        GetPath,
        GetParent,
        QueueFree,
        Duplicate,
        GetChildCount,
        GetChild,
        AddChild,
        AddChildDeferred,
        AddSibling,
        AddSiblingDeferred,
        MoveChild,
        RemoveChild,
        RemoveChildDeferred,
        GetChildren,
        AddToGroup,
        RemoveFromGroup,
        IsInGroup,
        Reparent,
    }
);

sub_ops!(NodeCreate { ClassDb, Node, Node2D, Node3D });

sub_ops!(
    /// Operations of `ECALL_NODE2D` and `ECALL_NODE3D`.
    SpatialOp {
        GetPosition,
        SetPosition,
        GetRotation,
        SetRotation,
        GetScale,
        SetScale,
    }
);

sub_ops!(ArrayOp {
    Create,
    PushBack,
    PushFront,
    PopAt,
    PopBack,
    PopFront,
    Insert,
    Erase,
    Resize,
    Clear,
    Sort,
    FetchToVector,
    Has,
});

sub_ops!(DictionaryOp {
    Get,
    Set,
    Erase,
    Has,
    GetSize,
    Clear,
    Merge,
    GetOrAdd,
    GetKeys,
    GetValues,
});

sub_ops!(StringOp { Append, GetLength, ToStdString, Compare });

sub_ops!(MathOp { Sin, Cos, Tan, Asin, Acos, Atan, Atan2, Pow });

sub_ops!(LerpOp { Lerp, Smoothstep, Clamp });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_op_numbering_follows_declaration_order() {
        assert_eq!(NodeOp::from_u32(0), Some(NodeOp::GetName));
        assert_eq!(NodeOp::from_u32(19), Some(NodeOp::Reparent));
        assert_eq!(NodeOp::from_u32(20), None);
        assert_eq!(ArrayOp::Has as u32, 12);
        assert_eq!(DictionaryOp::from_u32(9), Some(DictionaryOp::GetValues));
    }

    #[test]
    fn engine_range_is_contiguous() {
        for nr in ENGINE_SYSCALLS_BASE..=ECALL_LAST {
            assert_ne!(syscall_name(nr), "unknown", "syscall {nr} has no name");
        }
    }
}
