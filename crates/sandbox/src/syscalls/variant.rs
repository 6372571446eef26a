//! Value lifecycle: creating, fetching, storing, cloning and assigning
//! scoped values, plus `print`, `vcall` and operator evaluation.

use types::abi::{VCREATE_EMPTY, VCREATE_FROM_STD_STRING};
use types::ops::evaluate;
use types::{Array, ObjectGraph, Variant, VariantOp, VariantType};
use vm::Machine;

use super::{check_argc, object, read_name, sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;
use crate::guest_variant::{GuestStdString, GuestStdVector, GuestVariant};

pub(super) fn sys_print<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (array, argc): (u32, u32) = sysargs(machine);
    if argc as usize >= Config::MAX_PRINT_ARGS {
        log::error!("print: too many values ({argc})");
        return Err(SandboxError::InvalidArgument(format!("print: too many values ({argc})")));
    }
    for value in core.read_variants(machine, array, argc as usize)? {
        core.host.print(&value.to_string());
    }
    Ok(())
}

pub(super) fn sys_vcall<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (vp, method, mlen, args_ptr, argc, ret): (u32, u32, u32, u32, u32, u32) = sysargs(machine);
    let argc = check_argc(argc, Config::MAX_CALL_ARGS, "vcall")?;
    let method = read_name(machine, method, mlen)?;
    let target = GuestVariant::read(&machine.memory, vp)?;
    let args = core.read_variants(machine, args_ptr, argc)?;

    let result = if target.variant_type()? == VariantType::Object {
        let object = core.resolve(target.object().address())?;
        object::call_object(core, machine, object, &method, &args)?
    } else {
        let value = target.to_variant(&core.variants, &core.objects)?;
        match (&value, method.as_str()) {
            (Variant::Callable(callable), "call") => core.invoke_callable(machine, callable, &args)?,
            _ => value.call_builtin(&method, &args).ok_or_else(|| {
                log::error!("vcall: {} has no method '{method}'", value.get_type());
                SandboxError::InvalidArgument(format!("{} has no method '{method}'", value.get_type()))
            })?,
        }
    };
    if ret != 0 {
        core.write_variant(machine, ret, &result)?;
    }
    Ok(())
}

pub(super) fn sys_veval<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (op, ap, bp, ret): (u32, u32, u32, u32) = sysargs(machine);
    let op = VariantOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("veval: unknown operator {op}")))?;
    let a = GuestVariant::read(&machine.memory, ap)?;
    let b = GuestVariant::read(&machine.memory, bp)?;

    // Object identity comparison works even for objects that are no longer
    // scoped.
    let object = VariantType::Object as u32;
    if op == VariantOp::Equal && a.ty == object && b.ty == object {
        GuestVariant::from_bool(a.object() == b.object()).write(&mut machine.memory, ret)?;
        machine.set_result(1);
        return Ok(());
    }

    let a = a.to_variant(&core.variants, &core.objects)?;
    let b = b.to_variant(&core.variants, &core.objects)?;
    match evaluate(op, &a, &b) {
        Some(result) => {
            core.write_variant(machine, ret, &result)?;
            machine.set_result(1);
        }
        None => {
            GuestVariant::nil().write(&mut machine.memory, ret)?;
            machine.set_result(0);
        }
    }
    Ok(())
}

/// Guest destructors call this; host values are released with their scope.
pub(super) fn sys_vfree<H: ObjectGraph>(_core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (vp,): (u32,) = sysargs(machine);
    GuestVariant::read(&machine.memory, vp)?;
    Ok(())
}

fn read_packed(machine: &Machine, ty: VariantType, data: u32, count: usize) -> Result<Variant, SandboxError> {
    if ty == VariantType::PackedStringArray {
        if count > Config::MAX_VECTOR_BYTES / Config::STD_STRING_SIZE {
            return Err(SandboxError::InvalidArgument(format!("{count} strings is too many")));
        }
        let strings = (0..count)
            .map(|i| GuestStdString::read(&machine.memory, data.wrapping_add(i as u32 * GuestStdString::SIZE)))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Variant::PackedStringArray(strings));
    }
    let size = Variant::packed_element_size(ty).ok_or_else(|| SandboxError::mismatch(VariantType::PackedByteArray, ty))?;
    let len = count
        .checked_mul(size)
        .filter(|len| *len <= Config::MAX_VECTOR_BYTES)
        .ok_or_else(|| SandboxError::InvalidArgument(format!("{count} elements of {ty} is too large")))?;
    let bytes = machine.memory.read_bytes(data, len)?;
    Variant::from_packed_bytes(ty, &bytes).ok_or_else(|| SandboxError::mismatch(VariantType::PackedByteArray, ty))
}

fn string_variant(ty: VariantType, text: String) -> Variant {
    match ty {
        VariantType::StringName => Variant::StringName(text),
        VariantType::NodePath => Variant::NodePath(text),
        _ => Variant::String(text),
    }
}

/// Builds a new scoped value of `type` from guest data: a `std::string`
/// for string kinds, a `std::vector` for arrays and packed arrays. A null
/// data pointer creates an empty value. For byte arrays a non-zero method
/// is the length of a raw buffer at `data`.
pub(super) fn sys_vcreate<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (vp, ty, method, data): (u32, u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let ty = VariantType::from_u32(ty).ok_or(SandboxError::UnknownType(ty))?;
    let empty = data == 0;

    let value = match ty {
        _ if ty.is_string_like() => {
            if empty || method == VCREATE_EMPTY {
                string_variant(ty, String::new())
            } else if method == VCREATE_FROM_STD_STRING {
                string_variant(ty, GuestStdString::read(&machine.memory, data)?)
            } else {
                return Err(SandboxError::InvalidArgument(format!("vcreate: unsupported method {method} for {ty}")));
            }
        }
        VariantType::Array => {
            let mut items = Vec::new();
            if !empty {
                let bytes = GuestStdVector::read_bytes(&machine.memory, data)?;
                for chunk in bytes.chunks_exact(Config::GUEST_VARIANT_SIZE) {
                    let mut raw = [0u8; Config::GUEST_VARIANT_SIZE];
                    raw.copy_from_slice(chunk);
                    items.push(GuestVariant::from_bytes(&raw).to_variant(&core.variants, &core.objects)?);
                }
            }
            Variant::Array(Array::from_vec(items))
        }
        VariantType::Dictionary => Variant::default_for(ty),
        VariantType::PackedByteArray if !empty && method != 0 => {
            let len = method as usize;
            if len > Config::MAX_VECTOR_BYTES {
                return Err(SandboxError::InvalidArgument(format!("vcreate: buffer of {len} bytes")));
            }
            Variant::PackedByteArray(machine.memory.read_bytes(data, len)?)
        }
        VariantType::PackedStringArray => {
            if empty {
                Variant::default_for(ty)
            } else {
                Variant::PackedStringArray(GuestStdVector::read_strings(&machine.memory, data)?)
            }
        }
        _ if ty.is_packed_array() => {
            if empty {
                Variant::default_for(ty)
            } else {
                let bytes = GuestStdVector::read_bytes(&machine.memory, data)?;
                Variant::from_packed_bytes(ty, &bytes)
                    .ok_or_else(|| SandboxError::InvalidArgument(format!("vcreate: cannot build {ty}")))?
            }
        }
        _ => {
            log::error!("vcreate: unsupported type {ty}");
            return Err(SandboxError::InvalidArgument(format!("vcreate: unsupported type {ty}")));
        }
    };
    let index = core.variants.create_scoped(value)?;
    GuestVariant::from_index(ty, index).write(&mut machine.memory, vp)
}

/// Copies a scoped value out into guest-owned data: a `std::string` for
/// string kinds, a `std::vector` for packed arrays.
pub(super) fn sys_vfetch<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (index, data, method): (i32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let value = core.variants.get(index)?;
    let (memory, arena) = (&mut machine.memory, &mut machine.arena);

    match value {
        Variant::String(s) | Variant::StringName(s) | Variant::NodePath(s) => {
            if method != VCREATE_FROM_STD_STRING {
                return Err(SandboxError::InvalidArgument(format!("vfetch: unsupported method {method} for strings")));
            }
            GuestStdString::write(memory, arena, data, s.as_bytes())
        }
        Variant::PackedStringArray(strings) => GuestStdVector::write_strings(memory, arena, data, strings.as_slice()),
        other => match other.packed_bytes() {
            Some(bytes) => GuestStdVector::write(memory, arena, data, &bytes),
            None => {
                log::error!("vfetch: cannot fetch {} into the guest", other.get_type());
                Err(SandboxError::InvalidArgument(format!("vfetch: cannot fetch {}", other.get_type())))
            }
        },
    }
}

/// With a return pointer: a new scoped copy of the value. Without one: the
/// value is promoted to the permanent pool and the guest variant updated in
/// place.
pub(super) fn sys_vclone<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (vp, ret): (u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let ty = GuestVariant::read(&machine.memory, vp)?.variant_type()?;
    let index = core.scoped_index(machine, vp)?;

    if ret != 0 {
        let copy = core.variants.get(index)?.duplicate();
        let new = core.variants.create_scoped(copy)?;
        GuestVariant::from_index(ty, new).write(&mut machine.memory, ret)
    } else {
        let permanent = core.variants.create_permanent(index)?;
        GuestVariant::from_index(ty, permanent).write(&mut machine.memory, vp)
    }
}

/// Replaces the contents of a scoped packed array with `count` elements
/// read from guest memory.
pub(super) fn sys_vstore<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (index, data, count): (i32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let ty = core.variants.get(index)?.get_type();
    if !ty.is_packed_array() {
        log::error!("vstore: cannot store into {ty}");
        return Err(SandboxError::mismatch(VariantType::PackedByteArray, ty));
    }
    let value = read_packed(machine, ty, data, count as usize)?;
    *core.variants.get_mut(index)? = value;
    Ok(())
}

/// `*dst = *src`. A scoped destination keeps its index and accepts a value
/// of its own type or nil; an inline destination accepts its own type or
/// anything when it is nil. When the stored type changes the tag at `dst`
/// is rewritten to match.
pub(super) fn sys_vassign<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (dst, src): (u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let target = GuestVariant::read(&machine.memory, dst)?;
    let value = core.read_variant(machine, src)?;
    let target_ty = target.variant_type()?;

    if target.is_scoped() {
        let index = target.index()?;
        let ty = value.get_type();
        core.variants.assign(index, value.clone())?;
        if ty == target_ty {
            return Ok(());
        }
        return if ty.is_scoped() {
            GuestVariant::from_index(ty, index).write(&mut machine.memory, dst)
        } else {
            core.write_variant(machine, dst, &value)
        };
    }
    if target_ty != VariantType::Nil && target_ty != value.get_type() {
        log::error!("vassign: cannot assign {} to {target_ty}", value.get_type());
        return Err(SandboxError::mismatch(target_ty, value.get_type()));
    }
    core.write_variant(machine, dst, &value)
}
