use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use loader::SymbolTable;
use types::{Callable, ObjectGraph, ObjectId, Variant};
use vm::{Machine, Register, SyscallHandler};

use crate::counters::CallCounters;
use crate::error::SandboxError;
use crate::execution_context::{CallLevel, CallStack};
use crate::global::Config;
use crate::guard::ObjectGuard;
use crate::guest_variant::GuestVariant;
use crate::scoped::{ScopedObjects, ScopedVariants};
use crate::singletons::Singletons;
use crate::syscalls;

/// Where a failed call was when it failed, captured at the innermost level
/// before any registers are restored.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultReport {
    pub pc: u32,
    /// Function containing `pc` and the offset into it.
    pub function: Option<(String, u32)>,
    pub instruction: Option<String>,
    pub registers: String,
}

impl FaultReport {
    fn capture(machine: &Machine, symbols: &SymbolTable) -> Self {
        let pc = machine.cpu.pc;
        Self {
            pc,
            function: symbols.lookup(pc).map(|s| (s.name.clone(), pc - s.address)),
            instruction: machine.current_instruction().map(|i| i.to_string()),
            registers: machine.cpu.dump(),
        }
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some((name, offset)) => writeln!(f, "at 0x{:08x} ({name}+0x{offset:x})", self.pc)?,
            None => writeln!(f, "at 0x{:08x} (unknown function)", self.pc)?,
        }
        if let Some(instruction) = &self.instruction {
            writeln!(f, "instruction: {instruction}")?;
        }
        f.write_str(&self.registers)
    }
}

/// Everything a running guest can reach, kept apart from the `Machine` so
/// the machine can hand `&mut self` to it on every syscall.
///
/// EDUCATIONAL PURPOSE: a guest call is a stack of levels. The outermost
/// level starts a fresh simulation with the full instruction budget; a
/// syscall handler that needs to run guest code again (a guest callable, a
/// method call on the sandbox itself) opens a nested level and preempts the
/// machine. Every level:
/// 1. opens a scope in both scoped pools,
/// 2. saves the interrupted registers (nested levels only),
/// 3. marshals its arguments onto the guest stack and runs,
/// 4. decodes the return slot while its scope is still open,
/// 5. closes the scope and restores the registers, on success or failure.
///
/// Errors travel up through every level unchanged and are logged and
/// counted once, at the outermost level, which also empties the transient
/// value pool.
pub(crate) struct SandboxCore<H> {
    pub(crate) host: H,
    pub(crate) variants: ScopedVariants,
    pub(crate) objects: ScopedObjects,
    pub(crate) guard: ObjectGuard,
    pub(crate) singletons: Singletons<H>,
    pub(crate) calls: CallStack,
    pub(crate) symbols: SymbolTable,
    pub(crate) self_object: ObjectId,
    pub(crate) tree_base: ObjectId,
    pub(crate) counters: CallCounters,
    pub(crate) max_instructions: u64,
    pub(crate) fault: Option<FaultReport>,
}

impl<H: ObjectGraph> SyscallHandler for SandboxCore<H> {
    type Error = SandboxError;

    fn handle_syscall(&mut self, machine: &mut Machine, number: u32) -> Result<(), SandboxError> {
        syscalls::dispatch(self, machine, number)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<H: ObjectGraph> SandboxCore<H> {
    pub(crate) fn in_call(&self) -> bool {
        !self.calls.is_empty()
    }

    pub(crate) fn read_variant(&self, machine: &Machine, addr: u32) -> Result<Variant, SandboxError> {
        GuestVariant::read(&machine.memory, addr)?.to_variant(&self.variants, &self.objects)
    }

    pub(crate) fn read_variants(&self, machine: &Machine, addr: u32, count: usize) -> Result<Vec<Variant>, SandboxError> {
        GuestVariant::read_array(&machine.memory, addr, count)?
            .iter()
            .map(|gv| gv.to_variant(&self.variants, &self.objects))
            .collect()
    }

    pub(crate) fn write_variant(&mut self, machine: &mut Machine, addr: u32, value: &Variant) -> Result<(), SandboxError> {
        GuestVariant::create(value, &mut self.variants, &mut self.objects)?.write(&mut machine.memory, addr)
    }

    /// Store index of the scoped value described by the guest variant at
    /// `addr`.
    pub(crate) fn scoped_index(&self, machine: &Machine, addr: u32) -> Result<i32, SandboxError> {
        let gv = GuestVariant::read(&machine.memory, addr)?;
        if !gv.is_scoped() {
            let actual = gv.variant_type()?;
            return Err(SandboxError::TypeMismatch { expected: "scoped value".into(), actual: actual.name().into() });
        }
        gv.index()
    }

    pub(crate) fn resolve(&self, address: u32) -> Result<ObjectId, SandboxError> {
        self.guard.resolve(&self.objects, address)
    }

    /// Checks an object the host produced and scopes it so the guest may
    /// name it for the rest of the call.
    pub(crate) fn admit(&mut self, object: ObjectId) -> Result<ObjectId, SandboxError> {
        if object.is_null() {
            return Ok(object);
        }
        self.guard.check_object(&self.host, object)?;
        self.objects.scope(object)?;
        Ok(object)
    }

    /// Runs `callable` on behalf of the guest. Guest callables of this
    /// sandbox re-enter the guest; method callables go to the host after
    /// the usual checks.
    pub(crate) fn invoke_callable(
        &mut self,
        machine: &mut Machine,
        callable: &Callable,
        args: &[Variant],
    ) -> Result<Variant, SandboxError> {
        match callable {
            Callable::Guest { owner, address, .. } => {
                if *owner != self.self_object {
                    return Err(SandboxError::InvalidArgument(format!("callable belongs to {owner}")));
                }
                self.call(machine, *address, &callable.arguments(args))
            }
            Callable::Method { object, method, .. } => {
                if !self.objects.contains(*object) {
                    self.guard.check_object(&self.host, *object)?;
                }
                self.guard.check_method(*object, method)?;
                Ok(self.host.call_method(*object, method, &callable.arguments(args))?)
            }
        }
    }

    /// Calls the guest function at `address` at whatever depth the sandbox
    /// is currently at.
    pub(crate) fn call(&mut self, machine: &mut Machine, address: u32, args: &[Variant]) -> Result<Variant, SandboxError> {
        if args.len() > Config::MAX_VMCALL_ARGS {
            return Err(SandboxError::InvalidArgument(format!(
                "{} arguments, at most {} are supported",
                args.len(),
                Config::MAX_VMCALL_ARGS
            )));
        }
        self.calls.check_room()?;
        if self.in_call() {
            return self.run_level(machine, address, args);
        }

        self.counters.record_call();
        self.fault = None;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_level(machine, address, args)));
        let result = outcome.unwrap_or_else(|payload| {
            Err(SandboxError::GuestFault(format!("host panic during guest call: {}", panic_message(payload))))
        });
        // A panic skips the per-level cleanup.
        while let Some(level) = self.calls.pop() {
            self.close_level(machine, level);
        }
        self.variants.clear_transient();
        if let Err(err) = &result {
            self.report(address, err);
        }
        result
    }

    fn run_level(&mut self, machine: &mut Machine, address: u32, args: &[Variant]) -> Result<Variant, SandboxError> {
        let nested = self.in_call();
        let level = CallLevel {
            address,
            variants: self.variants.enter_level(),
            objects: self.objects.enter_level(),
            saved: nested.then(|| machine.cpu.clone()),
        };
        if let Err(err) = self.calls.push(level.clone()) {
            self.close_level(machine, level);
            return Err(err);
        }

        let result = self.enter_guest(machine, address, args, nested);
        if result.is_err() && self.fault.is_none() {
            self.fault = Some(FaultReport::capture(machine, &self.symbols));
        }
        if let Some(level) = self.calls.pop() {
            self.close_level(machine, level);
        }
        result
    }

    fn close_level(&mut self, machine: &mut Machine, level: CallLevel) {
        self.variants.leave_level(level.variants);
        self.objects.leave_level(level.objects);
        if let Some(saved) = level.saved {
            machine.cpu = saved;
        }
    }

    /// Marshals the return slot and arguments below the stack pointer and
    /// runs the function. `a0` points at the return slot, `a1..a7` at the
    /// arguments.
    fn enter_guest(&mut self, machine: &mut Machine, address: u32, args: &[Variant], nested: bool) -> Result<Variant, SandboxError> {
        let sp = if nested { machine.cpu.get(Register::Sp) } else { machine.stack_top() };
        let frame = (args.len() as u32 + 1) * GuestVariant::SIZE;
        let base = sp
            .checked_sub(frame)
            .map(|b| b & !15)
            .ok_or_else(|| SandboxError::GuestFault(format!("stack exhausted at 0x{sp:08x}")))?;

        GuestVariant::nil().write(&mut machine.memory, base)?;
        machine.cpu.set(Register::A0, base);
        for (i, arg) in args.iter().enumerate() {
            let slot = base + (i as u32 + 1) * GuestVariant::SIZE;
            self.write_variant(machine, slot, arg)?;
            machine.cpu.set_reg(Register::A0.index() + 1 + i, slot);
        }
        machine.cpu.set(Register::Sp, base);

        if log::log_enabled!(log::Level::Debug) {
            let name = self.symbols.lookup(address).map(|s| s.name.as_str()).unwrap_or("?");
            log::debug!("vmcall {name} at 0x{address:08x}, {} args, depth {}", args.len(), self.calls.depth());
        }
        if nested {
            machine.preempt(self, address)?;
        } else {
            machine.cpu.pc = address;
            let exit = machine.exit_address();
            machine.cpu.set(Register::Ra, exit);
            machine.simulate(self, self.max_instructions)?;
        }
        self.read_variant(machine, base)
    }

    fn report(&mut self, address: u32, err: &SandboxError) {
        let name = self.symbols.lookup(address).map(|s| s.name.clone()).unwrap_or_else(|| format!("0x{address:08x}"));
        if let SandboxError::Timeout(limit) = err {
            self.counters.record_timeout();
            log::warn!("guest call to {name} timed out after {limit} instructions");
            return;
        }
        self.counters.record_exception();
        log::error!("exception in guest call to {name}: {err}");
        if let Some(fault) = &self.fault {
            log::error!("{fault}");
        }
    }
}
