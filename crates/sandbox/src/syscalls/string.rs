use core::cmp::Ordering;

use types::abi::StringOp;
use types::{ObjectGraph, Variant, VariantType};
use vm::Machine;

use super::{read_text, sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;
use crate::guest_variant::{GuestStdString, GuestVariant};

fn scoped_string<H: ObjectGraph>(core: &SandboxCore<H>, index: i32) -> Result<&str, SandboxError> {
    match core.variants.get(index)? {
        Variant::String(s) => Ok(s),
        other => {
            log::error!("invalid String object, index {index}");
            Err(SandboxError::mismatch(VariantType::String, other.get_type()))
        }
    }
}

fn scoped_string_mut<H: ObjectGraph>(core: &mut SandboxCore<H>, index: i32) -> Result<&mut String, SandboxError> {
    match core.variants.get_mut(index)? {
        Variant::String(s) => Ok(s),
        other => Err(SandboxError::mismatch(VariantType::String, other.get_type())),
    }
}

fn append_checked(target: &mut String, text: &str) -> Result<(), SandboxError> {
    if target.len() + text.len() > Config::MAX_STRING_LEN {
        return Err(SandboxError::InvalidArgument(format!("string would exceed {} bytes", Config::MAX_STRING_LEN)));
    }
    target.push_str(text);
    Ok(())
}

pub(super) fn sys_string_create<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (ptr, len, ret): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let text = read_text(machine, ptr, len)?;
    let index = core.variants.create_scoped(Variant::String(text))?;
    GuestVariant::from_index(VariantType::String, index).write(&mut machine.memory, ret)
}

pub(super) fn sys_string_ops<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (op, index, arg, gv): (u32, i32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let op = StringOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("string: unknown operation {op}")))?;

    match op {
        StringOp::Append => {
            let suffix = match core.read_variant(machine, gv)? {
                Variant::String(s) | Variant::StringName(s) | Variant::NodePath(s) => s,
                other => other.to_string(),
            };
            append_checked(scoped_string_mut(core, index)?, &suffix)?;
        }
        StringOp::GetLength => {
            let length = scoped_string(core, index)?.chars().count();
            machine.set_result(length as u32);
        }
        StringOp::ToStdString => {
            if arg != 0 {
                log::error!("string: unsupported conversion {arg}");
                return Err(SandboxError::InvalidArgument(format!("string: unsupported conversion {arg}")));
            }
            let text = scoped_string(core, index)?;
            GuestStdString::write(&mut machine.memory, &mut machine.arena, gv, text.as_bytes())?;
        }
        StringOp::Compare => {
            let other = core.read_variant(machine, gv)?;
            let other = other.as_str().ok_or_else(|| SandboxError::mismatch(VariantType::String, other.get_type()))?;
            let ordering = scoped_string(core, index)?.cmp(other);
            machine.set_result(match ordering {
                Ordering::Less => -1i32 as u32,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            });
        }
    }
    Ok(())
}

pub(super) fn sys_string_at<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (index, at, ret): (i32, i32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let text = scoped_string(core, index)?;
    let ch = usize::try_from(at).ok().and_then(|at| text.chars().nth(at)).ok_or_else(|| {
        log::error!("string index {at} out of bounds");
        SandboxError::InvalidArgument(format!("string index {at} out of bounds"))
    })?;
    let created = core.variants.create_scoped(Variant::String(ch.to_string()))?;
    GuestVariant::from_index(VariantType::String, created).write(&mut machine.memory, ret)
}

pub(super) fn sys_string_size<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (index,): (i32,) = sysargs(machine);
    let length = scoped_string(core, index)?.chars().count();
    machine.set_result(length as u32);
    Ok(())
}

/// Appends guest text to the string the variant at `gv` names, in place.
pub(super) fn sys_string_append<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (gv, ptr, len): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let index = core.scoped_index(machine, gv)?;
    let text = read_text(machine, ptr, len)?;
    append_checked(scoped_string_mut(core, index)?, &text)
}
