//! Array and dictionary operations on scoped containers. Containers share
//! storage, so every mutation is visible through all guest variants that
//! name the same container.

use types::abi::{ArrayOp, DictionaryOp};
use types::containers::creates_cycle;
use types::ops::sort_order;
use types::{Array, Dictionary, ObjectGraph, Variant, VariantType};
use vm::Machine;

use super::{sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;
use crate::guest_variant::{GuestStdVector, GuestVariant};

fn scoped_array<H: ObjectGraph>(core: &SandboxCore<H>, index: i32) -> Result<Array, SandboxError> {
    match core.variants.get(index)? {
        Variant::Array(array) => Ok(array.clone()),
        other => {
            log::error!("invalid Array object, index {index}");
            Err(SandboxError::mismatch(VariantType::Array, other.get_type()))
        }
    }
}

fn scoped_dictionary<H: ObjectGraph>(core: &SandboxCore<H>, index: i32) -> Result<Dictionary, SandboxError> {
    match core.variants.get(index)? {
        Variant::Dictionary(dict) => Ok(dict.clone()),
        other => {
            log::error!("invalid Dictionary object, index {index}");
            Err(SandboxError::mismatch(VariantType::Dictionary, other.get_type()))
        }
    }
}

/// Refuses `value` when storing it in `container` would make the container
/// hold itself.
fn ensure_acyclic(container: &Variant, value: &Variant) -> Result<(), SandboxError> {
    if creates_cycle(container, value) {
        log::error!("refusing to store a {} inside itself", container.get_type());
        return Err(SandboxError::InvalidArgument(format!("{} cannot contain itself", container.get_type())));
    }
    Ok(())
}

/// Position `at` in a container of `len`, counting from the end when
/// negative.
fn position(at: i32, len: usize) -> Option<usize> {
    let at = if at < 0 { len as i64 + at as i64 } else { at as i64 };
    usize::try_from(at).ok().filter(|p| *p < len)
}

fn out_of_bounds(what: &str, at: i32, len: usize) -> SandboxError {
    log::error!("{what} index {at} out of bounds (size {len})");
    SandboxError::InvalidArgument(format!("{what} index {at} out of bounds (size {len})"))
}

/// `ArrayOp::Create` takes the initial size in the index argument.
fn create_array<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine, size: i32, gv: u32) -> SyscallResult {
    let size = usize::try_from(size).map_err(|_| SandboxError::InvalidArgument(format!("array size {size}")))?;
    if size > Config::MAX_VECTOR_BYTES / Config::GUEST_VARIANT_SIZE {
        return Err(SandboxError::InvalidArgument(format!("array size {size}")));
    }
    let created = core.variants.create_scoped(Variant::Array(Array::from_vec(vec![Variant::Nil; size])))?;
    GuestVariant::from_index(VariantType::Array, created).write(&mut machine.memory, gv)
}

pub(super) fn sys_array_ops<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (op, index, arg, gv): (u32, i32, i32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_CONTAINER);
    let op = ArrayOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("array: unknown operation {op}")))?;

    let array = match op {
        ArrayOp::Create => return create_array(core, machine, index, gv),
        _ => scoped_array(core, index)?,
    };
    match op {
        ArrayOp::Create => {}
        ArrayOp::PushBack => {
            let value = core.read_variant(machine, gv)?;
            ensure_acyclic(&Variant::Array(array.clone()), &value)?;
            array.push(value);
        }
        ArrayOp::PushFront => {
            let value = core.read_variant(machine, gv)?;
            ensure_acyclic(&Variant::Array(array.clone()), &value)?;
            array.items_mut().insert(0, value);
        }
        ArrayOp::Insert => {
            let value = core.read_variant(machine, gv)?;
            ensure_acyclic(&Variant::Array(array.clone()), &value)?;
            let len = array.len();
            let at = if arg as i64 == len as i64 { Some(len) } else { position(arg, len) };
            let at = at.ok_or_else(|| out_of_bounds("array insert", arg, len))?;
            array.items_mut().insert(at, value);
        }
        ArrayOp::PopAt | ArrayOp::Erase => {
            let len = array.len();
            let at = position(arg, len).ok_or_else(|| out_of_bounds("array", arg, len))?;
            let removed = array.items_mut().remove(at);
            if op == ArrayOp::PopAt && gv != 0 {
                core.write_variant(machine, gv, &removed)?;
            }
        }
        ArrayOp::PopBack | ArrayOp::PopFront => {
            let removed = {
                let mut items = array.items_mut();
                if items.is_empty() {
                    None
                } else if op == ArrayOp::PopBack {
                    items.pop()
                } else {
                    Some(items.remove(0))
                }
            };
            if gv != 0 {
                core.write_variant(machine, gv, &removed.unwrap_or_default())?;
            }
        }
        ArrayOp::Resize => {
            let size = usize::try_from(arg).map_err(|_| SandboxError::InvalidArgument(format!("array size {arg}")))?;
            if size > Config::MAX_VECTOR_BYTES / Config::GUEST_VARIANT_SIZE {
                return Err(SandboxError::InvalidArgument(format!("array size {size}")));
            }
            array.items_mut().resize(size, Variant::Nil);
        }
        ArrayOp::Clear => array.items_mut().clear(),
        ArrayOp::Sort => array.items_mut().sort_by(sort_order),
        ArrayOp::FetchToVector => {
            let items = array.to_vec();
            let mut bytes = Vec::with_capacity(items.len() * Config::GUEST_VARIANT_SIZE);
            for item in &items {
                let element = GuestVariant::create(&item.duplicate(), &mut core.variants, &mut core.objects)?;
                bytes.extend_from_slice(&element.to_bytes());
            }
            GuestStdVector::write(&mut machine.memory, &mut machine.arena, gv, &bytes)?;
        }
        ArrayOp::Has => {
            let value = core.read_variant(machine, gv)?;
            machine.set_result(array.contains(&value) as u32);
        }
    }
    Ok(())
}

pub(super) fn sys_array_at<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (index, at, gv): (i32, i32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let array = scoped_array(core, index)?;
    let len = array.len();
    let value = usize::try_from(at)
        .ok()
        .and_then(|at| array.get(at))
        .ok_or_else(|| out_of_bounds("array", at, len))?;
    core.write_variant(machine, gv, &value)
}

pub(super) fn sys_array_size<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (index,): (i32,) = sysargs(machine);
    let array = scoped_array(core, index)?;
    machine.set_result(array.len() as u32);
    Ok(())
}

pub(super) fn sys_dictionary_ops<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (op, index, key, value, default): (u32, i32, u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_CONTAINER);
    let op = DictionaryOp::from_u32(op)
        .ok_or_else(|| SandboxError::InvalidArgument(format!("dictionary: unknown operation {op}")))?;
    let dict = scoped_dictionary(core, index)?;

    match op {
        DictionaryOp::Get => {
            let k = core.read_variant(machine, key)?;
            let found = dict.get(&k).unwrap_or_default();
            core.write_variant(machine, value, &found)?;
        }
        DictionaryOp::Set => {
            let k = core.read_variant(machine, key)?;
            let v = core.read_variant(machine, value)?;
            let container = Variant::Dictionary(dict.clone());
            ensure_acyclic(&container, &k)?;
            ensure_acyclic(&container, &v)?;
            dict.set(k, v);
        }
        DictionaryOp::Erase => {
            let k = core.read_variant(machine, key)?;
            dict.erase(&k);
        }
        DictionaryOp::Has => {
            let k = core.read_variant(machine, key)?;
            machine.set_result(dict.has(&k) as u32);
        }
        DictionaryOp::GetSize => machine.set_result(dict.len() as u32),
        DictionaryOp::Clear => dict.clear(),
        DictionaryOp::Merge => {
            let other = match core.read_variant(machine, key)? {
                Variant::Dictionary(other) => other,
                other => return Err(SandboxError::mismatch(VariantType::Dictionary, other.get_type())),
            };
            if !dict.shares_storage(&other) {
                ensure_acyclic(&Variant::Dictionary(dict.clone()), &Variant::Dictionary(other.clone()))?;
            }
            dict.merge(&other, false);
        }
        DictionaryOp::GetOrAdd => {
            let k = core.read_variant(machine, key)?;
            let current = match dict.get(&k) {
                Some(found) if !found.is_nil() => found,
                _ => {
                    let fallback = core.read_variant(machine, default)?;
                    let container = Variant::Dictionary(dict.clone());
                    ensure_acyclic(&container, &k)?;
                    ensure_acyclic(&container, &fallback)?;
                    dict.set(k, fallback.clone());
                    fallback
                }
            };
            core.write_variant(machine, value, &current)?;
        }
        DictionaryOp::GetKeys => {
            let keys = Variant::Array(Array::from_vec(dict.keys()));
            core.write_variant(machine, value, &keys)?;
        }
        DictionaryOp::GetValues => {
            let values = Variant::Array(Array::from_vec(dict.values()));
            core.write_variant(machine, value, &values)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::position;

    #[test]
    fn negative_positions_count_from_the_end() {
        assert_eq!(position(0, 3), Some(0));
        assert_eq!(position(-1, 3), Some(2));
        assert_eq!(position(-3, 3), Some(0));
        assert_eq!(position(-4, 3), None);
        assert_eq!(position(3, 3), None);
        assert_eq!(position(0, 0), None);
    }
}
