//! Guest syscall handlers.
//!
//! EDUCATIONAL PURPOSE: every guest request arrives here as an `ecall` with
//! the number in `a7` and up to seven arguments in `a0..a6`. `dispatch` is a
//! flat match from number to handler. Each handler:
//! - reads its arguments with `sysargs`, which knows how wide each argument
//!   type is (doubles take an aligned register pair),
//! - validates every guest pointer, length, index and object address before
//!   the host sees anything,
//! - charges an instruction penalty when the work it does is expensive,
//! - writes its result to `a0` (and `a1`) or into guest memory.
//!
//! Returning an error aborts the running guest call. Nothing here ever
//! panics on guest input.

mod containers;
mod misc;
mod native;
mod node;
mod object;
mod string;
mod variant;

use types::abi::*;
use types::{ObjectGraph, ObjectId, Variant, VariantType};
use vm::sys_call::ENOSYS;
use vm::Machine;

use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;

pub(crate) type SyscallResult = Result<(), SandboxError>;

/// One syscall argument of a fixed register width.
pub(crate) trait SysArg: Sized {
    fn take(machine: &Machine, next: &mut usize) -> Self;
}

impl SysArg for u32 {
    fn take(machine: &Machine, next: &mut usize) -> Self {
        let value = machine.sysarg(*next);
        *next += 1;
        value
    }
}

impl SysArg for i32 {
    fn take(machine: &Machine, next: &mut usize) -> Self {
        u32::take(machine, next) as i32
    }
}

impl SysArg for bool {
    fn take(machine: &Machine, next: &mut usize) -> Self {
        u32::take(machine, next) != 0
    }
}

impl SysArg for f64 {
    fn take(machine: &Machine, next: &mut usize) -> Self {
        *next += *next % 2;
        let value = machine.sysarg_f64(*next);
        *next += 2;
        value
    }
}

pub(crate) trait SysArgs: Sized {
    fn read(machine: &Machine) -> Self;
}

macro_rules! impl_sysargs {
    ($($ty:ident),+) => {
        impl<$($ty: SysArg),+> SysArgs for ($($ty,)+) {
            fn read(machine: &Machine) -> Self {
                let mut next = 0;
                ($($ty::take(machine, &mut next),)+)
            }
        }
    };
}

impl_sysargs!(A);
impl_sysargs!(A, B);
impl_sysargs!(A, B, C);
impl_sysargs!(A, B, C, D);
impl_sysargs!(A, B, C, D, E);
impl_sysargs!(A, B, C, D, E, F);
impl_sysargs!(A, B, C, D, E, F, G);

/// Reads the syscall arguments as a typed tuple, e.g.
/// `let (op, addr, gv): (u32, u32, u32) = sysargs(machine);`.
pub(crate) fn sysargs<T: SysArgs>(machine: &Machine) -> T {
    T::read(machine)
}

/// A method, property, class, group or path name.
pub(crate) fn read_name(machine: &Machine, ptr: u32, len: u32) -> Result<String, SandboxError> {
    read_guest_str(machine, ptr, len, Config::MAX_NAME_LEN)
}

/// Free-form guest text.
pub(crate) fn read_text(machine: &Machine, ptr: u32, len: u32) -> Result<String, SandboxError> {
    read_guest_str(machine, ptr, len, Config::MAX_STRING_LEN)
}

fn read_guest_str(machine: &Machine, ptr: u32, len: u32, max: usize) -> Result<String, SandboxError> {
    let len = len as usize;
    if len > max {
        return Err(SandboxError::InvalidArgument(format!("guest string of {len} bytes exceeds {max}")));
    }
    let bytes = machine.memory.read_bytes(ptr, len)?;
    String::from_utf8(bytes).map_err(|_| SandboxError::InvalidArgument("guest string is not UTF-8".into()))
}

/// The text of a string-like value passed where a name is expected.
pub(crate) fn expect_name(value: &Variant) -> Result<String, SandboxError> {
    match value.as_str() {
        Some(name) if name.len() <= Config::MAX_NAME_LEN => Ok(name.to_owned()),
        Some(name) => Err(SandboxError::InvalidArgument(format!("name of {} bytes", name.len()))),
        None => Err(SandboxError::mismatch(VariantType::String, value.get_type())),
    }
}

pub(crate) fn expect_int(value: &Variant) -> Result<i64, SandboxError> {
    match value {
        Variant::Int(i) => Ok(*i),
        other => Err(SandboxError::mismatch(VariantType::Int, other.get_type())),
    }
}

/// The object a guest variant names, checked against the scoped set.
pub(crate) fn expect_object<H: ObjectGraph>(core: &SandboxCore<H>, value: &Variant) -> Result<ObjectId, SandboxError> {
    match value {
        Variant::Object(object) => core.resolve(object.address()),
        other => Err(SandboxError::mismatch(VariantType::Object, other.get_type())),
    }
}

pub(crate) fn check_argc(argc: u32, max: usize, what: &str) -> Result<usize, SandboxError> {
    let argc = argc as usize;
    if argc > max {
        log::error!("{what}: too many arguments ({argc}, max {max})");
        return Err(SandboxError::InvalidArgument(format!("{what}: too many arguments ({argc})")));
    }
    Ok(argc)
}

pub(crate) fn dispatch<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine, number: u32) -> SyscallResult {
    if log::log_enabled!(log::Level::Trace) {
        let args: Vec<u8> = (0..4).flat_map(|i| machine.sysarg(i).to_be_bytes()).collect();
        log::trace!("sys_{}({}) a0..a3 = {}", syscall_name(number), number, hex::encode(args));
    }
    match number {
        SYSCALL_WRITE => native::sys_write(core, machine),
        SYSCALL_EXIT => native::sys_exit(machine),
        SYSCALL_MALLOC => native::sys_malloc(machine),
        SYSCALL_CALLOC => native::sys_calloc(machine),
        SYSCALL_REALLOC => native::sys_realloc(machine),
        SYSCALL_FREE => native::sys_free(machine),
        SYSCALL_MEMINFO => native::sys_meminfo(machine),
        SYSCALL_MEMCPY => native::sys_memcpy(machine),
        SYSCALL_MEMSET => native::sys_memset(machine),
        SYSCALL_MEMMOVE => native::sys_memmove(machine),
        SYSCALL_MEMCMP => native::sys_memcmp(machine),
        SYSCALL_STRLEN => native::sys_strlen(machine),
        SYSCALL_STRNCMP => native::sys_strncmp(machine),

        ECALL_PRINT => variant::sys_print(core, machine),
        ECALL_VCALL => variant::sys_vcall(core, machine),
        ECALL_VEVAL => variant::sys_veval(core, machine),
        ECALL_VFREE => variant::sys_vfree(core, machine),
        ECALL_VCREATE => variant::sys_vcreate(core, machine),
        ECALL_VFETCH => variant::sys_vfetch(core, machine),
        ECALL_VCLONE => variant::sys_vclone(core, machine),
        ECALL_VSTORE => variant::sys_vstore(core, machine),
        ECALL_VASSIGN => variant::sys_vassign(core, machine),

        ECALL_GET_OBJ => object::sys_get_obj(core, machine),
        ECALL_OBJ => object::sys_obj(core, machine),
        ECALL_OBJ_CALLP => object::sys_obj_callp(core, machine),

        ECALL_GET_NODE => node::sys_get_node(core, machine),
        ECALL_NODE => node::sys_node(core, machine),
        ECALL_NODE_CREATE => node::sys_node_create(core, machine),
        ECALL_NODE2D => node::sys_node2d(core, machine),
        ECALL_NODE3D => node::sys_node3d(core, machine),

        ECALL_ARRAY_OPS => containers::sys_array_ops(core, machine),
        ECALL_ARRAY_AT => containers::sys_array_at(core, machine),
        ECALL_ARRAY_SIZE => containers::sys_array_size(core, machine),
        ECALL_DICTIONARY_OPS => containers::sys_dictionary_ops(core, machine),

        ECALL_STRING_CREATE => string::sys_string_create(core, machine),
        ECALL_STRING_OPS => string::sys_string_ops(core, machine),
        ECALL_STRING_AT => string::sys_string_at(core, machine),
        ECALL_STRING_SIZE => string::sys_string_size(core, machine),
        ECALL_STRING_APPEND => string::sys_string_append(core, machine),

        ECALL_THROW => misc::sys_throw(core, machine),
        ECALL_IS_EDITOR => misc::sys_is_editor(core, machine),
        ECALL_TIMER_PERIODIC => misc::sys_timer_periodic(core, machine),
        ECALL_TIMER_STOP => misc::sys_timer_stop(core, machine),
        ECALL_CALLABLE_CREATE => misc::sys_callable_create(core, machine),
        ECALL_LOAD => misc::sys_load(core, machine),
        ECALL_MATH_OP64 => misc::sys_math_op64(machine),
        ECALL_LERP_OP64 => misc::sys_lerp_op64(machine),
        ECALL_SINCOS => misc::sys_sincos(machine),
        _ => {
            log::warn!("unhandled syscall {number} at 0x{:08x}", machine.cpu.pc);
            machine.penalize(Config::PENALTY_UNHANDLED);
            machine.set_result((-ENOSYS) as u32);
            Ok(())
        }
    }
}
