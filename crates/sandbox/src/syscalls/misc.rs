//! Exceptions, timers, callables, resources and the float helpers that
//! soft-float guests would otherwise spend thousands of instructions on.

use types::abi::{LerpOp, MathOp};
use types::{Callable, ObjectGraph, Variant, VariantType};
use vm::Machine;

use super::{read_name, read_text, sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;
use crate::guest_variant::GuestVariant;

pub(super) fn sys_throw<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (kind, kind_len, msg, msg_len, gv): (u32, u32, u32, u32, u32) = sysargs(machine);
    let kind = read_name(machine, kind, kind_len)?;
    let message = read_text(machine, msg, msg_len)?;
    let value = if gv == 0 {
        String::new()
    } else {
        let raw = GuestVariant::read(&machine.memory, gv)?;
        match raw.to_variant(&core.variants, &core.objects) {
            Ok(value) => format!("{} {}", value.get_type(), value),
            Err(_) => format!("variant of type {}", raw.ty),
        }
    };
    log::error!("guest exception of type {kind}: {message} ({value})");
    Err(SandboxError::GuestThrow { kind, message, value })
}

pub(super) fn sys_is_editor<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    machine.set_result(core.host.is_editor() as u32);
    Ok(())
}

/// Starts a host timer that calls the guest function `callback` with the
/// timer object and a copy of the guest's capture storage.
pub(super) fn sys_timer_periodic<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (interval, oneshot, callback, capture, ret): (f64, bool, u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_TIMER);
    if core.self_object.is_null() {
        log::error!("timer_periodic: the sandbox has no object for callbacks to return to");
        return Err(SandboxError::NullObject);
    }
    let capture = machine.memory.read_bytes(capture, Config::CAPTURE_SIZE)?;
    let callable = Callable::guest(core.self_object, callback).bind([Variant::PackedByteArray(capture)]);

    let timer = core.host.create_timer(interval, oneshot, callable)?;
    let timer = core.admit(timer)?;
    log::debug!("timer {timer}: every {interval}s, oneshot {oneshot}, callback 0x{callback:08x}");
    GuestVariant::from_object(timer).write(&mut machine.memory, ret)
}

pub(super) fn sys_timer_stop<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (addr,): (u32,) = sysargs(machine);
    let timer = core.resolve(addr)?;
    Ok(core.host.stop_timer(timer)?)
}

/// A callable for the guest function at `address`, with an optional bound
/// argument.
pub(super) fn sys_callable_create<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (address, bound, ret): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_VARIANT);
    let mut callable = Callable::guest(core.self_object, address);
    if bound != 0 {
        let value = core.read_variant(machine, bound)?;
        if !value.is_nil() {
            callable = callable.bind([value]);
        }
    }
    let index = core.variants.create_scoped(Variant::Callable(callable))?;
    GuestVariant::from_index(VariantType::Callable, index).write(&mut machine.memory, ret)
}

pub(super) fn sys_load<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (path, len, ret): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_LOOKUP);
    let path = read_name(machine, path, len)?;
    core.guard.check_resource(&path)?;

    let resource = core.host.load(&path)?;
    if let Variant::Object(object) = &resource {
        core.admit(*object)?;
    }
    core.write_variant(machine, ret, &resource)
}

pub(super) fn sys_math_op64(machine: &mut Machine) -> SyscallResult {
    let (op, x, y): (u32, f64, f64) = sysargs(machine);
    let op = MathOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("math: unknown operation {op}")))?;
    let result = match op {
        MathOp::Sin => x.sin(),
        MathOp::Cos => x.cos(),
        MathOp::Tan => x.tan(),
        MathOp::Asin => x.asin(),
        MathOp::Acos => x.acos(),
        MathOp::Atan => x.atan(),
        MathOp::Atan2 => x.atan2(y),
        MathOp::Pow => x.powf(y),
    };
    machine.set_result_f64(result);
    Ok(())
}

/// The three doubles take `a0..a5`, so the operation comes last in `a6`.
pub(super) fn sys_lerp_op64(machine: &mut Machine) -> SyscallResult {
    let (a, b, t, op): (f64, f64, f64, u32) = sysargs(machine);
    let op = LerpOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("lerp: unknown operation {op}")))?;
    let result = match op {
        LerpOp::Lerp => a + (b - a) * t,
        LerpOp::Smoothstep => {
            if a == b {
                if t < a { 0.0 } else { 1.0 }
            } else {
                let s = ((t - a) / (b - a)).clamp(0.0, 1.0);
                s * s * (3.0 - 2.0 * s)
            }
        }
        // clamp(value, min, max); f64::clamp panics on min > max.
        LerpOp::Clamp => a.max(b).min(t),
    };
    machine.set_result_f64(result);
    Ok(())
}

pub(super) fn sys_sincos(machine: &mut Machine) -> SyscallResult {
    let (bits,): (u32,) = sysargs(machine);
    let (sin, cos) = f32::from_bits(bits).sin_cos();
    machine.set_result(sin.to_bits());
    machine.cpu.set(vm::Register::A1, cos.to_bits());
    Ok(())
}
