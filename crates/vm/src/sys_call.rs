use crate::error::MachineError;
use crate::machine::Machine;

/// Trait implemented by syscall handlers consumed by the machine.
///
/// On `ecall` the machine hands itself to the handler with the number taken
/// from `a7`. The handler reads arguments from `a0..a6`, writes results back
/// and may re-enter the machine (see `Machine::preempt`). Returning an error
/// aborts the running simulation with that error.
pub trait SyscallHandler {
    type Error: From<MachineError>;

    fn handle_syscall(&mut self, machine: &mut Machine, number: u32) -> Result<(), Self::Error>;
}

/// Handler that only knows how to stop: `exit` (93) halts the machine and
/// anything else is reported as `-ENOSYS` in `a0`.
#[derive(Debug, Default)]
pub struct ExitOnly {
    pub exit_code: Option<i32>,
    pub unhandled: Vec<u32>,
}

pub const SYSCALL_EXIT: u32 = 93;
pub const ENOSYS: i32 = 38;

impl SyscallHandler for ExitOnly {
    type Error = MachineError;

    fn handle_syscall(&mut self, machine: &mut Machine, number: u32) -> Result<(), MachineError> {
        if number == SYSCALL_EXIT {
            self.exit_code = Some(machine.sysarg(0) as i32);
            machine.stop();
        } else {
            self.unhandled.push(number);
            machine.set_result((-ENOSYS) as u32);
        }
        Ok(())
    }
}
