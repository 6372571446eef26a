use vm::encoder::encode;
use vm::instruction::{AluOp, BranchCond, Instruction};
use vm::sys_call::{ExitOnly, SyscallHandler};
use vm::{DecodedSegment, Machine, MachineError, MachineOptions, PageAttributes, Register};

const CODE_BASE: u32 = 0x10000;

fn addi(rd: usize, rs1: usize, imm: i32) -> Instruction {
    Instruction::OpImm { op: AluOp::Add, rd, rs1, imm }
}

fn load(machine: &mut Machine, program: &[Instruction]) -> Vec<u8> {
    let code: Vec<u8> = program.iter().flat_map(|i| encode(i).unwrap().to_le_bytes()).collect();
    machine.load_segment(CODE_BASE, &code, code.len(), PageAttributes::rx()).unwrap();
    machine.cpu.pc = CODE_BASE;
    code
}

/// Sums 1..=10 into a0, then calls exit(a0).
fn sum_program() -> Vec<Instruction> {
    vec![
        addi(10, 0, 0),
        addi(5, 0, 10),
        Instruction::Op { op: AluOp::Add, rd: 10, rs1: 10, rs2: 5 },
        addi(5, 5, -1),
        Instruction::Branch { cond: BranchCond::Ne, rs1: 5, rs2: 0, offset: -8 },
        addi(17, 0, 93),
        Instruction::Ecall,
    ]
}

#[test]
fn runs_until_exit_syscall() {
    let mut machine = Machine::new(&MachineOptions::default()).unwrap();
    load(&mut machine, &sum_program());
    let mut handler = ExitOnly::default();
    machine.simulate(&mut handler, 1_000).unwrap();
    assert_eq!(handler.exit_code, Some(55));
    assert!(machine.stopped());
}

#[test]
fn predecoded_segment_behaves_like_the_interpreter() {
    let mut machine = Machine::new(&MachineOptions::default()).unwrap();
    let code = load(&mut machine, &sum_program());
    machine.install_segment(DecodedSegment::decode(CODE_BASE, &code));
    let mut handler = ExitOnly::default();
    machine.simulate(&mut handler, 1_000).unwrap();
    assert_eq!(handler.exit_code, Some(55));
}

#[test]
fn infinite_loop_times_out() {
    let mut machine = Machine::new(&MachineOptions::default()).unwrap();
    load(&mut machine, &[Instruction::Jal { rd: 0, offset: 0 }]);
    let err = machine.simulate(&mut ExitOnly::default(), 500).unwrap_err();
    assert_eq!(err, MachineError::Timeout(500));
    assert!(machine.instruction_counter() > 500);
}

#[test]
fn returning_to_exit_stub_stops() {
    let mut machine = Machine::new(&MachineOptions::default()).unwrap();
    load(&mut machine, &[addi(10, 0, 42), Instruction::Jalr { rd: 0, rs1: 1, offset: 0 }]);
    let exit = machine.exit_address();
    machine.cpu.set(Register::Ra, exit);
    machine.simulate(&mut ExitOnly::default(), 100).unwrap();
    assert_eq!(machine.cpu.get(Register::A0), 42);
    assert_eq!(machine.cpu.pc, exit);
}

#[test]
fn writing_to_code_faults() {
    let mut machine = Machine::new(&MachineOptions::default()).unwrap();
    load(
        &mut machine,
        &[
            Instruction::Lui { rd: 5, imm: CODE_BASE as i32 },
            Instruction::Store { width: vm::instruction::StoreWidth::Word, rs1: 5, rs2: 0, offset: 0 },
        ],
    );
    let err = machine.simulate(&mut ExitOnly::default(), 100).unwrap_err();
    assert!(matches!(err, MachineError::ProtectionFault { addr: CODE_BASE, .. }));
}

/// Handles syscall 1 by calling the guest function whose address is in a0
/// and returning its a0, with the caller's registers preserved.
struct Reenter {
    depth: usize,
}

impl SyscallHandler for Reenter {
    type Error = MachineError;

    fn handle_syscall(&mut self, machine: &mut Machine, number: u32) -> Result<(), MachineError> {
        match number {
            1 => {
                let target = machine.sysarg(0);
                let saved = machine.cpu.clone();
                self.depth += 1;
                let result = machine.preempt(self, target);
                let value = machine.cpu.get(Register::A0);
                machine.cpu = saved;
                result?;
                machine.set_result(value);
            }
            93 => machine.stop(),
            _ => machine.set_result(u32::MAX),
        }
        Ok(())
    }
}

#[test]
fn preempt_runs_nested_call_and_resumes() {
    let mut machine = Machine::new(&MachineOptions::default()).unwrap();
    // 0x00: a0 = address of callee; syscall 1; a0 += 1; exit
    // 0x18: callee: a0 = 7; ret
    let callee = CODE_BASE + 0x18;
    load(
        &mut machine,
        &[
            Instruction::Lui { rd: 10, imm: CODE_BASE as i32 },
            addi(10, 10, 0x18),
            addi(17, 0, 1),
            Instruction::Ecall,
            addi(10, 10, 1),
            Instruction::Stop,
            addi(10, 0, 7),
            Instruction::Jalr { rd: 0, rs1: 1, offset: 0 },
        ],
    );
    let mut handler = Reenter { depth: 0 };
    machine.simulate(&mut handler, 1_000).unwrap();
    assert_eq!(handler.depth, 1);
    assert_eq!(machine.cpu.get(Register::A0), 8);
    assert_eq!(machine.cpu.get(Register::A7), 1);
    assert_eq!(callee, CODE_BASE + 0x18);
}
