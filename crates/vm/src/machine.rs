use crate::cpu::{Cpu, Flow};
use crate::decoder::decode;
use crate::encoder::encode;
use crate::error::MachineError;
use crate::instruction::Instruction;
use crate::memory::{align_down, Arena, Memory, PageAttributes, PAGE_SIZE};
use crate::metering::{InstructionCounter, MeterResult, PcSampler};
use crate::registers::{Register, SYSCALL_ARG0, SYSCALL_NUMBER};
use crate::sys_call::SyscallHandler;
use crate::translate::DecodedSegment;

/// Address-space layout of a machine.
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// Upper bound on machine-owned memory, in bytes.
    pub memory_max: usize,
    pub stack_top: u32,
    pub stack_size: u32,
    pub heap_base: u32,
    pub heap_size: u32,
    /// Where the one-instruction stop stub is placed. Returning to it ends
    /// a call.
    pub exit_stub: u32,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            memory_max: 64 << 20,
            stack_top: 0x4000_0000,
            stack_size: 1 << 20,
            heap_base: 0x2000_0000,
            heap_size: 16 << 20,
            exit_stub: 0x0000_1000,
        }
    }
}

/// A complete RV32IM machine: CPU, paged memory, guest heap arena and the
/// instruction budget.
///
/// EDUCATIONAL PURPOSE: this is the driver loop of the interpreter. It
/// fetches (from a predecoded segment when one is installed, otherwise from
/// memory), lets the CPU execute, and reacts to what the CPU reports:
/// - `ecall` hands the machine to the syscall handler,
/// - `ebreak` is an exception,
/// - the STOP instruction ends the current simulation.
///
/// A handler may call back into the guest while it is handling a syscall
/// (`preempt`). The nested run shares the instruction budget with the outer
/// one and, when it stops, leaves the outer run free to continue.
#[derive(Debug)]
pub struct Machine {
    pub cpu: Cpu,
    pub memory: Memory,
    pub arena: Arena,
    meter: InstructionCounter,
    stopped: bool,
    exit_address: u32,
    stack_top: u32,
    segment: Option<DecodedSegment>,
    sampler: Option<PcSampler>,
}

impl Machine {
    pub fn new(options: &MachineOptions) -> Result<Self, MachineError> {
        let mut memory = Memory::new(options.memory_max);
        let stack_bottom = options.stack_top.wrapping_sub(options.stack_size);
        memory.map(stack_bottom, options.stack_size as usize, PageAttributes::rw())?;
        memory.map(options.heap_base, options.heap_size as usize, PageAttributes::rw())?;

        let stub = align_down(options.exit_stub);
        memory.map(stub, PAGE_SIZE, PageAttributes::rw())?;
        let stop = encode(&Instruction::Stop).ok_or(MachineError::InvalidOperation("stop stub"))?;
        memory.write_u32(options.exit_stub, stop)?;
        memory.set_page_attributes(stub, PAGE_SIZE, PageAttributes::rx())?;

        let mut cpu = Cpu::default();
        cpu.set(Register::Sp, options.stack_top);

        Ok(Self {
            cpu,
            memory,
            arena: Arena::new(options.heap_base, options.heap_size),
            meter: InstructionCounter::default(),
            stopped: false,
            exit_address: options.exit_stub,
            stack_top: options.stack_top,
            segment: None,
            sampler: None,
        })
    }

    /// Copies a loadable segment into memory. `mem_size` beyond `data` is
    /// zero filled. Pages shared with an earlier segment keep the union of
    /// both attribute sets.
    pub fn load_segment(
        &mut self,
        vaddr: u32,
        data: &[u8],
        mem_size: usize,
        attr: PageAttributes,
    ) -> Result<(), MachineError> {
        let size = mem_size.max(data.len());
        if size == 0 {
            return Ok(());
        }
        let start = align_down(vaddr);
        let end = vaddr as u64 + size as u64;
        let mut page = start as u64;
        while page < end {
            let merged = match self.memory.attributes(page as u32) {
                Some(prev) => PageAttributes::new(prev.read | attr.read, prev.write | attr.write, prev.exec | attr.exec),
                None => attr,
            };
            self.memory.map(page as u32, PAGE_SIZE, merged)?;
            page += PAGE_SIZE as u64;
        }
        self.memory.write_privileged(vaddr, data)
    }

    pub fn stack_top(&self) -> u32 {
        self.stack_top
    }

    pub fn exit_address(&self) -> u32 {
        self.exit_address
    }

    /// Address guest functions return to. Must hold a STOP instruction.
    pub fn set_exit_address(&mut self, addr: u32) {
        self.exit_address = addr;
    }

    pub fn install_segment(&mut self, segment: DecodedSegment) {
        log::debug!("installing predecoded segment 0x{:08x}..0x{:08x}", segment.base(), segment.end());
        self.segment = Some(segment);
    }

    pub fn has_segment(&self) -> bool {
        self.segment.is_some()
    }

    #[inline]
    pub fn sysarg(&self, index: usize) -> u32 {
        self.cpu.reg(SYSCALL_ARG0 + index)
    }

    /// 64-bit argument passed in the register pair starting at `index`.
    pub fn sysarg_u64(&self, index: usize) -> u64 {
        (self.sysarg(index) as u64) | ((self.sysarg(index + 1) as u64) << 32)
    }

    pub fn sysarg_f64(&self, index: usize) -> f64 {
        f64::from_bits(self.sysarg_u64(index))
    }

    pub fn syscall_number(&self) -> u32 {
        self.cpu.reg(SYSCALL_NUMBER)
    }

    pub fn set_result(&mut self, value: u32) {
        self.cpu.set(Register::A0, value);
    }

    pub fn set_result_u64(&mut self, value: u64) {
        self.cpu.set(Register::A0, value as u32);
        self.cpu.set(Register::A1, (value >> 32) as u32);
    }

    pub fn set_result_f64(&mut self, value: f64) {
        self.set_result_u64(value.to_bits());
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn penalize(&mut self, amount: u64) {
        self.meter.penalize(amount);
    }

    pub fn instruction_counter(&self) -> u64 {
        self.meter.counter()
    }

    pub fn max_instructions(&self) -> u64 {
        self.meter.max()
    }

    /// Starts sampling the pc every `interval` instructions. Samples taken
    /// so far are kept when only the interval changes.
    pub fn enable_sampling(&mut self, interval: u64) {
        match &mut self.sampler {
            Some(sampler) => sampler.set_interval(interval),
            None => self.sampler = Some(PcSampler::new(interval)),
        }
    }

    /// Stops sampling and returns what was collected.
    pub fn disable_sampling(&mut self) -> Option<PcSampler> {
        self.sampler.take()
    }

    pub fn sampler(&self) -> Option<&PcSampler> {
        self.sampler.as_ref()
    }

    pub fn sampler_mut(&mut self) -> Option<&mut PcSampler> {
        self.sampler.as_mut()
    }

    /// Instruction at the current pc, for diagnostics.
    pub fn current_instruction(&self) -> Option<Instruction> {
        self.memory.fetch(self.cpu.pc).ok().and_then(decode)
    }

    /// Runs from the current pc until the machine stops, with a fresh
    /// budget of `max_instructions`.
    pub fn simulate<H: SyscallHandler>(&mut self, handler: &mut H, max_instructions: u64) -> Result<(), H::Error> {
        self.meter.reset(max_instructions);
        self.stopped = false;
        self.run(handler)
    }

    /// Calls the guest function at `address` from inside a syscall handler.
    /// The return address is the exit address, so the nested run ends when
    /// the function returns. The caller is responsible for saving and
    /// restoring registers around this.
    pub fn preempt<H: SyscallHandler>(&mut self, handler: &mut H, address: u32) -> Result<(), H::Error> {
        self.cpu.pc = address;
        self.cpu.set(Register::Ra, self.exit_address);
        self.stopped = false;
        let result = self.run(handler);
        self.stopped = false;
        result
    }

    fn fetch(&self, pc: u32) -> Result<Instruction, MachineError> {
        if let Some(decoded) = self.segment.as_ref().and_then(|s| s.get(pc)) {
            return decoded.map_err(|word| MachineError::IllegalInstruction { pc, word });
        }
        let word = self.memory.fetch(pc)?;
        decode(word).ok_or(MachineError::IllegalInstruction { pc, word })
    }

    fn run<H: SyscallHandler>(&mut self, handler: &mut H) -> Result<(), H::Error> {
        while !self.stopped {
            if self.meter.on_instruction() == MeterResult::Halt {
                return Err(MachineError::Timeout(self.meter.max()).into());
            }
            let pc = self.cpu.pc;
            if let Some(sampler) = &mut self.sampler {
                sampler.on_instruction(pc);
            }
            let instr = self.fetch(pc)?;
            match self.cpu.execute(instr, &mut self.memory)? {
                Flow::Continue(next) => self.cpu.pc = next,
                Flow::Ecall => {
                    let number = self.syscall_number();
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!("ecall {} at 0x{:08x}", number, pc);
                    }
                    handler.handle_syscall(self, number)?;
                    self.cpu.pc = pc.wrapping_add(4);
                }
                Flow::Ebreak => return Err(MachineError::Breakpoint(pc).into()),
                Flow::Stop => self.stopped = true,
            }
        }
        Ok(())
    }
}
