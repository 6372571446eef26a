mod common;

use common::{load, test_config, world};
use guest::abi::Arg;
use guest::{ProgramBuilder, Register};
use sandbox::{GuestStdString, GuestVariant, Sandbox, SandboxError};
use scene::Scene;
use types::abi::*;
use types::{Array, Variant, VariantOp, VariantType};

use Register::*;

const LONG_TEXT: &str = "a string too long for the inline buffer";

fn create(p: &mut ProgramBuilder, name: &str, ty: VariantType, data: Arg) {
    p.function(name)
        .mv(S0, A0)
        .host_call(ECALL_VCREATE, &[Arg::Reg(S0), Arg::Imm(ty as i32), Arg::Imm(0), data])
        .ret();
}

fn program() -> ProgramBuilder {
    let mut p = ProgramBuilder::new();

    // evaluate(op, a, b), with the validity flag kept in `valid`.
    p.function("evaluate")
        .mv(S0, A0)
        .lw(S1, A1, 8)
        .mv(S2, A2)
        .mv(S3, A3)
        .host_call(ECALL_VEVAL, &[Arg::Reg(S1), Arg::Reg(S2), Arg::Reg(S3), Arg::Reg(S0)])
        .la(T0, "valid")
        .sw(A0, T0, 0)
        .ret();

    // Returns a copy of the argument taken before "!" is appended to it,
    // and prints the original.
    p.function("clone_then_append")
        .mv(S0, A0)
        .mv(S1, A1)
        .host_call(ECALL_VCLONE, &[Arg::Reg(S1), Arg::Reg(S0)])
        .host_call(ECALL_STRING_APPEND, &[Arg::Reg(S1), Arg::Addr("bang"), Arg::Imm(1)])
        .host_call(ECALL_PRINT, &[Arg::Reg(S1), Arg::Imm(1)])
        .ret();

    p.function("keep")
        .la(T0, "kept")
        .copy_variant(T0, A1)
        .host_call(ECALL_VCLONE, &[Arg::Addr("kept"), Arg::Imm(0)])
        .ret();
    p.function("kept_value").la(T0, "kept").copy_variant(A0, T0).ret();

    p.function("store_ints")
        .mv(S0, A0)
        .mv(S2, A1)
        .lw(S1, S2, 8)
        .host_call(ECALL_VSTORE, &[Arg::Reg(S1), Arg::Addr("ints"), Arg::Imm(4)])
        .copy_variant(S0, S2)
        .ret();

    p.function("fetch_sum")
        .mv(S0, A0)
        .lw(S1, A1, 8)
        .host_call(ECALL_VFETCH, &[Arg::Reg(S1), Arg::Addr("fetched"), Arg::Imm(0)])
        .la(T0, "fetched")
        .lw(T1, T0, 4)
        .lw(T0, T0, 0)
        .li(T2, 0)
        .label("fetch_sum.loop")
        .beq(T0, T1, "fetch_sum.done")
        .lw(T3, T0, 0)
        .add(T2, T2, T3)
        .addi(T0, T0, 4)
        .j("fetch_sum.loop")
        .label("fetch_sum.done")
        .set_variant_int_reg(S0, 0, T2)
        .ret();

    p.function("fetch_text")
        .lw(S1, A1, 8)
        .host_call(ECALL_VFETCH, &[Arg::Reg(S1), Arg::Addr("text"), Arg::Imm(0)])
        .ret();

    create(&mut p, "make_string", VariantType::String, Arg::Addr("greeting"));
    create(&mut p, "make_node_path", VariantType::NodePath, Arg::Addr("path"));
    create(&mut p, "make_floats", VariantType::PackedFloat32Array, Arg::Addr("floats"));
    create(&mut p, "make_array", VariantType::Array, Arg::Addr("items"));
    create(&mut p, "make_empty_array", VariantType::Array, Arg::Imm(0));
    create(&mut p, "make_int", VariantType::Int, Arg::Imm(0));

    // string_ops(s, other): appends 7 to s, records its length, its order
    // against `other` and a std::string copy, then returns s.
    p.function("string_ops")
        .mv(S0, A0)
        .mv(S2, A1)
        .mv(S3, A2)
        .lw(S1, S2, 8)
        .host_call(ECALL_STRING_OPS, &[Arg::Imm(StringOp::Append as i32), Arg::Reg(S1), Arg::Imm(0), Arg::Addr("seven")])
        .host_call(ECALL_STRING_OPS, &[Arg::Imm(StringOp::GetLength as i32), Arg::Reg(S1), Arg::Imm(0), Arg::Imm(0)])
        .la(T0, "length")
        .sw(A0, T0, 0)
        .host_call(ECALL_STRING_OPS, &[Arg::Imm(StringOp::Compare as i32), Arg::Reg(S1), Arg::Imm(0), Arg::Reg(S3)])
        .la(T0, "order")
        .sw(A0, T0, 0)
        .host_call(
            ECALL_STRING_OPS,
            &[Arg::Imm(StringOp::ToStdString as i32), Arg::Reg(S1), Arg::Imm(0), Arg::Addr("text")],
        )
        .copy_variant(S0, S2)
        .ret();

    // assign(dst, src) returns dst after `*dst = *src`.
    p.function("assign")
        .mv(S0, A0)
        .mv(S1, A1)
        .mv(S2, A2)
        .host_call(ECALL_VASSIGN, &[Arg::Reg(S1), Arg::Reg(S2)])
        .copy_variant(S0, S1)
        .ret();

    let ints: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
    let floats: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
    let items: Vec<u8> = [GuestVariant::from_int(7), GuestVariant::from_bool(true)]
        .iter()
        .flat_map(|gv| gv.to_bytes())
        .collect();
    p.data("bang", b"!").data("ints", &ints);
    p.std_string("greeting", LONG_TEXT).std_string("path", "../Target");
    p.std_vector("floats", &floats).std_vector("items", &items);
    p.variant_int("seven", 7).variant_slot("kept");
    p.zeroed("valid", 4).zeroed("length", 4).zeroed("order", 4);
    p.zeroed("fetched", 12).zeroed("text", 24);
    p
}

fn symbol(name: &str) -> u32 {
    let image = program().build().unwrap();
    image.symbols.iter().find(|s| s.name == name).map(|s| s.value).unwrap()
}

fn word(sandbox: &Sandbox<Scene>, name: &str) -> u32 {
    sandbox.machine().memory.read_u32(symbol(name)).unwrap()
}

fn evaluate(sandbox: &mut Sandbox<Scene>, op: VariantOp, a: Variant, b: Variant) -> (Variant, bool) {
    let result = sandbox.vmcall("evaluate", &[Variant::Int(op as i64), a, b]).unwrap();
    (result, word(sandbox, "valid") == 1)
}

#[test]
fn operators_evaluate_on_the_host() {
    let w = world();
    let target = w.target;
    let mut sandbox = load(w, &program(), test_config());

    assert_eq!(evaluate(&mut sandbox, VariantOp::Add, Variant::Int(40), Variant::Int(2)), (Variant::Int(42), true));
    assert_eq!(
        evaluate(&mut sandbox, VariantOp::Add, Variant::from("ab"), Variant::from("cd")),
        (Variant::from("abcd"), true)
    );
    let list = Variant::Array(Array::from_vec(vec![Variant::Int(1)]));
    assert_eq!(evaluate(&mut sandbox, VariantOp::In, Variant::Int(1), list), (Variant::Bool(true), true));
    assert_eq!(evaluate(&mut sandbox, VariantOp::Divide, Variant::Int(1), Variant::Int(0)), (Variant::Nil, false));

    let object = Variant::Object(target);
    assert_eq!(evaluate(&mut sandbox, VariantOp::Equal, object.clone(), object), (Variant::Bool(true), true));
}

#[test]
fn clones_are_independent_copies() {
    let mut sandbox = load(world(), &program(), test_config());
    let copy = sandbox.vmcall("clone_then_append", &[Variant::from("hi")]).unwrap();
    assert_eq!(copy, Variant::from("hi"));
    assert_eq!(sandbox.host().printed(), &["hi!".to_string()]);
}

#[test]
fn clone_without_a_target_makes_the_value_permanent() {
    let mut sandbox = load(world(), &program(), test_config());
    assert_eq!(sandbox.variants().permanent_len(), 0);
    sandbox.vmcall("keep", &[Variant::from("hello")]).unwrap();
    assert_eq!(sandbox.variants().permanent_len(), 1);
    assert_eq!(sandbox.variants().transient_len(), 0);

    let index = sandbox.machine().memory.read_u32(symbol("kept") + 8).unwrap() as i32;
    assert!(index < 0, "permanent indices are negative, got {index}");
    assert_eq!(sandbox.permanent_value(index).unwrap(), &Variant::from("hello"));
    for _ in 0..2 {
        assert_eq!(sandbox.vmcall("kept_value", &[]).unwrap(), Variant::from("hello"));
    }
}

#[test]
fn packed_arrays_move_in_and_out_of_the_guest() {
    let mut sandbox = load(world(), &program(), test_config());
    let stored = sandbox.vmcall("store_ints", &[Variant::PackedInt32Array(vec![9])]).unwrap();
    assert_eq!(stored, Variant::PackedInt32Array(vec![1, 2, 3, 4]));
    let err = sandbox.vmcall("store_ints", &[Variant::from("text")]).unwrap_err();
    assert!(matches!(err, SandboxError::TypeMismatch { .. }));

    let sum = sandbox.vmcall("fetch_sum", &[Variant::PackedInt32Array(vec![10, 20, 30])]).unwrap();
    assert_eq!(sum, Variant::Int(60));
    assert_eq!(sandbox.vmcall("fetch_sum", &[Variant::PackedInt32Array(vec![])]).unwrap(), Variant::Int(0));

    sandbox.vmcall("fetch_text", &[Variant::from(LONG_TEXT)]).unwrap();
    assert_eq!(GuestStdString::read(&sandbox.machine().memory, symbol("text")).unwrap(), LONG_TEXT);
}

#[test]
fn values_are_created_from_guest_data() {
    let mut sandbox = load(world(), &program(), test_config());
    assert_eq!(sandbox.vmcall("make_string", &[]).unwrap(), Variant::from(LONG_TEXT));
    assert_eq!(sandbox.vmcall("make_node_path", &[]).unwrap(), Variant::NodePath("../Target".into()));
    assert_eq!(sandbox.vmcall("make_floats", &[]).unwrap(), Variant::PackedFloat32Array(vec![1.5, -2.0]));

    let array = sandbox.vmcall("make_array", &[]).unwrap();
    assert_eq!(array.as_array().unwrap().to_vec(), vec![Variant::Int(7), Variant::Bool(true)]);
    assert!(sandbox.vmcall("make_empty_array", &[]).unwrap().as_array().unwrap().is_empty());

    let err = sandbox.vmcall("make_int", &[]).unwrap_err();
    assert!(matches!(err, SandboxError::InvalidArgument(_)));
}

#[test]
fn string_operations() {
    let mut sandbox = load(world(), &program(), test_config());
    let result = sandbox.vmcall("string_ops", &[Variant::from("abc"), Variant::from("abd")]).unwrap();
    assert_eq!(result, Variant::from("abc7"));
    assert_eq!(word(&sandbox, "length"), 4);
    assert_eq!(word(&sandbox, "order") as i32, -1);
    assert_eq!(GuestStdString::read(&sandbox.machine().memory, symbol("text")).unwrap(), "abc7");

    let err = sandbox.vmcall("string_ops", &[Variant::Int(1), Variant::from("x")]).unwrap_err();
    assert!(matches!(err, SandboxError::InvalidReference(_) | SandboxError::TypeMismatch { .. }), "{err}");
}

#[test]
fn assignment_accepts_nil_and_rewrites_the_tag() {
    let mut sandbox = load(world(), &program(), test_config());
    let same = sandbox.vmcall("assign", &[Variant::from("a"), Variant::from("b")]).unwrap();
    assert_eq!(same, Variant::from("b"));

    let cleared = sandbox.vmcall("assign", &[Variant::from("a"), Variant::Nil]).unwrap();
    assert_eq!(cleared, Variant::Nil);

    let err = sandbox.vmcall("assign", &[Variant::from("a"), Variant::Int(1)]).unwrap_err();
    assert!(matches!(err, SandboxError::TypeMismatch { .. }));
    let filled = sandbox.vmcall("assign", &[Variant::Nil, Variant::Int(1)]).unwrap();
    assert_eq!(filled, Variant::Int(1));
}
