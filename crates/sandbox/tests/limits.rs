mod common;

use common::{load, test_config, world, World};
use guest::abi::Arg;
use guest::{ProgramBuilder, Register};
use sandbox::{Config, ErrorKind, SandboxConfig, SandboxError};
use types::abi::*;
use types::Variant;

use Register::*;

/// `recurse(n)` calls itself through the sandbox object until `n` is 0, so
/// it runs `n + 1` levels deep.
fn program(w: &World) -> ProgramBuilder {
    let me = w.sandbox.address() as i32;
    let mut p = ProgramBuilder::new();
    p.function("recurse")
        .prologue(64)
        .sw(A0, Sp, 0)
        .lw(T0, A1, 8)
        .beqz(T0, "recurse.done")
        .addi(T0, T0, -1)
        .set_variant_int_reg(Sp, 8, T0)
        .set_variant_nil(Sp, 32)
        .addi(T1, Sp, 32)
        .addi(T2, Sp, 8)
        .host_call(
            ECALL_OBJ_CALLP,
            &[Arg::Imm(me), Arg::Addr("recurse.name"), Arg::Imm(7), Arg::Imm(0), Arg::Reg(T1), Arg::Reg(T2), Arg::Imm(1)],
        )
        .label("recurse.done")
        .lw(A0, Sp, 0)
        .set_variant_int(A0, 0, 1)
        .epilogue(64);

    p.function("spin").label("spin.loop").j("spin.loop");

    // Creates one string per iteration, forever.
    p.function("hoard")
        .la(S0, "slot")
        .label("hoard.loop")
        .host_call(ECALL_STRING_CREATE, &[Arg::Addr("recurse.name"), Arg::Imm(1), Arg::Reg(S0)])
        .j("hoard.loop");

    p.function("answer").set_variant_int(A0, 0, 42).ret();
    p.data("recurse.name", b"recurse").variant_slot("slot");
    p
}

#[test]
fn recursion_up_to_the_depth_limit() {
    println!("=== Testing reentrant calls ===");
    let w = world();
    let p = program(&w);
    let mut sandbox = load(w, &p, test_config());
    let max = Config::DEFAULT_MAX_CALL_DEPTH as i64;

    assert_eq!(sandbox.vmcall("recurse", &[Variant::Int(max - 1)]).unwrap(), Variant::Int(1));
    assert_eq!(sandbox.call_depth(), 0);
    println!("✓ {max} levels succeed");

    let err = sandbox.vmcall("recurse", &[Variant::Int(max)]).unwrap_err();
    assert_eq!(err, SandboxError::RecursionLimitExceeded(Config::DEFAULT_MAX_CALL_DEPTH));
    assert_eq!(err.kind(), ErrorKind::RecursionLimitExceeded);
    assert_eq!(sandbox.call_depth(), 0);
    assert!(!sandbox.in_call());
    assert_eq!(sandbox.variants().transient_len(), 0);
    println!("✓ one more level fails and the depth is restored");

    sandbox.set_max_call_depth(2).unwrap();
    assert!(sandbox.vmcall("recurse", &[Variant::Int(1)]).is_ok());
    assert!(sandbox.vmcall("recurse", &[Variant::Int(2)]).is_err());
}

#[test]
fn timeouts_leave_the_sandbox_usable() {
    let w = world();
    let p = program(&w);
    let config = SandboxConfig { max_instructions: 50_000, ..test_config() };
    let mut sandbox = load(w, &p, config);

    let err = sandbox.vmcall("spin", &[]).unwrap_err();
    assert_eq!(err, SandboxError::Timeout(50_000));
    assert_eq!(sandbox.counters().timeouts, 1);
    assert_eq!(sandbox.counters().exceptions, 0);
    assert_eq!(sandbox.variants().transient_len(), 0);
    assert_eq!(sandbox.call_depth(), 0);

    assert_eq!(sandbox.vmcall("answer", &[]).unwrap(), Variant::Int(42));
}

#[test]
fn penalties_shorten_the_budget() {
    let w = world();
    let p = program(&w);
    // Each string costs a 10 000 instruction penalty, so the budget runs
    // out long before the reference cap.
    let config = SandboxConfig { max_instructions: 100_000, max_refs: 1_000, ..test_config() };
    let mut sandbox = load(w, &p, config);
    assert_eq!(sandbox.vmcall("hoard", &[]).unwrap_err().kind(), ErrorKind::Timeout);
    assert_eq!(sandbox.variants().transient_len(), 0);
}

#[test]
fn references_are_capped() {
    let w = world();
    let p = program(&w);
    let config = SandboxConfig { max_refs: 16, ..test_config() };
    let mut sandbox = load(w, &p, config);
    assert_eq!(sandbox.vmcall("hoard", &[]).unwrap_err(), SandboxError::TooManyReferences(16));
    assert_eq!(sandbox.variants().transient_len(), 0);
}
