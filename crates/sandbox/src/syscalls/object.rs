//! Object lookup, property access, signals and method calls.

use types::abi::ObjectOp;
use types::{Callable, ObjectGraph, ObjectId, Variant};
use vm::Machine;

use super::{check_argc, expect_name, expect_object, read_name, sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;
use crate::guest_variant::{GuestStdVector, GuestVariant};

/// Calls `method` on `object` for the guest. A call on the sandbox's own
/// object re-enters the guest: `vmcall` takes the function name as its first
/// argument, any other method name is the function itself.
pub(crate) fn call_object<H: ObjectGraph>(
    core: &mut SandboxCore<H>,
    machine: &mut Machine,
    object: ObjectId,
    method: &str,
    args: &[Variant],
) -> Result<Variant, SandboxError> {
    if object != core.self_object {
        core.guard.check_method(object, method)?;
        return Ok(core.host.call_method(object, method, args)?);
    }

    let (function, args) = if method == Config::SELF_CALL_METHOD {
        let (first, rest) = args
            .split_first()
            .ok_or_else(|| SandboxError::InvalidArgument("vmcall needs a function name".into()))?;
        (expect_name(first)?, rest)
    } else {
        (method.to_owned(), args)
    };
    let address = core.symbols.address_of(&function).ok_or_else(|| {
        log::error!("self call: no guest function named '{function}'");
        SandboxError::FunctionNotFound(function.clone())
    })?;
    core.call(machine, address, args)
}

pub(super) fn sys_get_obj<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (name, len): (u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_LOOKUP);
    let name = read_name(machine, name, len)?;
    core.guard.check_class(&name)?;

    let found = match core.singletons.lookup(&core.host, &name) {
        Some(object) => core.admit(object)?,
        None => {
            log::warn!("get_obj: no singleton named '{name}'");
            ObjectId::NULL
        }
    };
    machine.set_result(found.address());
    Ok(())
}

pub(super) fn sys_obj<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (op, addr, gv): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_OBJECT_CALL);
    let op = ObjectOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("obj: unknown operation {op}")))?;
    let object = core.resolve(addr)?;

    match op {
        ObjectOp::GetMethodList => {
            let names = core.host.method_list(object)?;
            GuestStdVector::write_strings(&mut machine.memory, &mut machine.arena, gv, &names)
        }
        ObjectOp::GetPropertyList => {
            let names = core.host.property_list(object)?;
            GuestStdVector::write_strings(&mut machine.memory, &mut machine.arena, gv, &names)
        }
        ObjectOp::GetSignalList => {
            let names = core.host.signal_list(object)?;
            GuestStdVector::write_strings(&mut machine.memory, &mut machine.arena, gv, &names)
        }
        ObjectOp::Get => {
            let name = expect_name(&core.read_variant(machine, gv)?)?;
            core.guard.check_property(object, &name, false)?;
            let value = core.host.get_property(object, &name)?;
            core.write_variant(machine, gv.wrapping_add(GuestVariant::SIZE), &value)
        }
        ObjectOp::Set => {
            let vars = core.read_variants(machine, gv, 2)?;
            let name = expect_name(&vars[0])?;
            core.guard.check_property(object, &name, true)?;
            Ok(core.host.set_property(object, &name, vars[1].clone())?)
        }
        ObjectOp::Connect | ObjectOp::Disconnect => {
            let vars = core.read_variants(machine, gv, 3)?;
            let target = expect_object(core, &vars[0])?;
            let signal = expect_name(&vars[1])?;
            let method = expect_name(&vars[2])?;
            core.guard.check_method(target, &method)?;
            let callable = Callable::method(target, method);
            if op == ObjectOp::Connect {
                Ok(core.host.connect(object, &signal, callable)?)
            } else {
                Ok(core.host.disconnect(object, &signal, &callable)?)
            }
        }
    }
}

pub(super) fn sys_obj_callp<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (addr, method, mlen, deferred, ret, args_ptr, argc): (u32, u32, u32, bool, u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_OBJECT_CALL);
    let argc = check_argc(argc, Config::MAX_CALL_ARGS, "obj_callp")?;
    let object = core.resolve(addr)?;
    let method = read_name(machine, method, mlen)?;
    let args = core.read_variants(machine, args_ptr, argc)?;

    if deferred {
        if object == core.self_object {
            return Err(SandboxError::InvalidArgument("deferred calls into the sandbox itself".into()));
        }
        core.guard.check_method(object, &method)?;
        core.host.call_deferred(object, &method, args)?;
        return Ok(());
    }
    let result = call_object(core, machine, object, &method, &args)?;
    if ret != 0 {
        core.write_variant(machine, ret, &result)?;
    }
    Ok(())
}
