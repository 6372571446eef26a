mod common;

use common::{load, test_config, world};
use guest::abi::Arg;
use guest::{ProgramBuilder, Register};
use sandbox::{Sandbox, SandboxError};
use scene::Scene;
use types::abi::*;
use types::{Array, Dictionary, Variant, VariantType};

use Register::*;

fn dictionary_op(p: &mut ProgramBuilder, op: DictionaryOp, key: Arg, value: Arg, default: Arg) {
    p.host_call(ECALL_DICTIONARY_OPS, &[Arg::Imm(op as i32), Arg::Reg(S1), key, value, default]);
}

fn program() -> ProgramBuilder {
    let mut p = ProgramBuilder::new();

    // nest_array(op): a new array given to itself through `op`, then printed.
    p.function("nest_array")
        .mv(S0, A0)
        .lw(S2, A1, 8)
        .host_call(ECALL_ARRAY_OPS, &[Arg::Imm(ArrayOp::Create as i32), Arg::Imm(0), Arg::Imm(0), Arg::Reg(S0)])
        .lw(S1, S0, 8)
        .host_call(ECALL_ARRAY_OPS, &[Arg::Reg(S2), Arg::Reg(S1), Arg::Imm(0), Arg::Reg(S0)])
        .host_call(ECALL_PRINT, &[Arg::Reg(S0), Arg::Imm(1)])
        .ret();

    // The outer array reaches itself through the inner one.
    p.function("nest_indirectly")
        .la(S0, "outer")
        .la(S2, "inner")
        .host_call(ECALL_ARRAY_OPS, &[Arg::Imm(ArrayOp::Create as i32), Arg::Imm(0), Arg::Imm(0), Arg::Reg(S0)])
        .host_call(ECALL_ARRAY_OPS, &[Arg::Imm(ArrayOp::Create as i32), Arg::Imm(0), Arg::Imm(0), Arg::Reg(S2)])
        .lw(S1, S0, 8)
        .host_call(ECALL_ARRAY_OPS, &[Arg::Imm(ArrayOp::PushBack as i32), Arg::Reg(S1), Arg::Imm(0), Arg::Reg(S2)])
        .lw(S1, S2, 8)
        .host_call(ECALL_ARRAY_OPS, &[Arg::Imm(ArrayOp::PushBack as i32), Arg::Reg(S1), Arg::Imm(0), Arg::Reg(S0)])
        .host_call(ECALL_PRINT, &[Arg::Reg(S0), Arg::Imm(1)])
        .ret();

    // nest_dictionary(use_default): the dictionary as its own value, through
    // SET or through the fallback of GET_OR_ADD.
    p.function("nest_dictionary")
        .mv(S0, A0)
        .lw(S2, A1, 8)
        .host_call(
            ECALL_VCREATE,
            &[Arg::Reg(S0), Arg::Imm(VariantType::Dictionary as i32), Arg::Imm(VCREATE_EMPTY as i32), Arg::Imm(0)],
        )
        .lw(S1, S0, 8)
        .bnez(S2, "nest_dictionary.default");
    dictionary_op(&mut p, DictionaryOp::Set, Arg::Addr("one"), Arg::Reg(S0), Arg::Imm(0));
    p.ret().label("nest_dictionary.default");
    dictionary_op(&mut p, DictionaryOp::GetOrAdd, Arg::Addr("one"), Arg::Addr("out"), Arg::Reg(S0));
    p.ret();

    p.function("dictionary")
        .mv(S0, A0)
        .host_call(
            ECALL_VCREATE,
            &[Arg::Reg(S0), Arg::Imm(VariantType::Dictionary as i32), Arg::Imm(VCREATE_EMPTY as i32), Arg::Imm(0)],
        )
        .lw(S1, S0, 8);
    dictionary_op(&mut p, DictionaryOp::Set, Arg::Addr("one"), Arg::Addr("ten"), Arg::Imm(0));
    dictionary_op(&mut p, DictionaryOp::Set, Arg::Addr("two"), Arg::Addr("twenty"), Arg::Imm(0));
    dictionary_op(&mut p, DictionaryOp::GetOrAdd, Arg::Addr("three"), Arg::Addr("out"), Arg::Addr("thirty"));
    dictionary_op(&mut p, DictionaryOp::GetOrAdd, Arg::Addr("two"), Arg::Addr("kept"), Arg::Addr("thirty"));
    dictionary_op(&mut p, DictionaryOp::Erase, Arg::Addr("one"), Arg::Imm(0), Arg::Imm(0));
    dictionary_op(&mut p, DictionaryOp::GetSize, Arg::Imm(0), Arg::Imm(0), Arg::Imm(0));
    p.la(T0, "size").sw(A0, T0, 0);
    dictionary_op(&mut p, DictionaryOp::Has, Arg::Addr("one"), Arg::Imm(0), Arg::Imm(0));
    p.la(T0, "has_one").sw(A0, T0, 0).ret();

    // merge(a, b) merges b into a and returns a.
    p.function("merge").mv(S0, A0).mv(S2, A1).mv(S3, A2).lw(S1, S2, 8);
    dictionary_op(&mut p, DictionaryOp::Merge, Arg::Reg(S3), Arg::Imm(0), Arg::Imm(0));
    p.copy_variant(S0, S2).ret();

    p.function("keys").mv(S0, A0).lw(S1, A1, 8);
    dictionary_op(&mut p, DictionaryOp::GetKeys, Arg::Imm(0), Arg::Reg(S0), Arg::Imm(0));
    p.ret();

    // array_at(array, position)
    p.function("array_at")
        .mv(S0, A0)
        .lw(S1, A1, 8)
        .lw(S2, A2, 8)
        .host_call(ECALL_ARRAY_AT, &[Arg::Reg(S1), Arg::Reg(S2), Arg::Reg(S0)])
        .ret();

    p.function("answer").set_variant_int(A0, 0, 42).ret();

    p.variant_int("one", 1)
        .variant_int("two", 2)
        .variant_int("three", 3)
        .variant_int("ten", 10)
        .variant_int("twenty", 20)
        .variant_int("thirty", 30);
    p.variant_slot("out").variant_slot("kept").variant_slot("outer").variant_slot("inner");
    p.zeroed("size", 4).zeroed("has_one", 4);
    p
}

fn symbol(name: &str) -> u32 {
    let image = program().build().unwrap();
    image.symbols.iter().find(|s| s.name == name).map(|s| s.value).unwrap()
}

fn int_slot(sandbox: &Sandbox<Scene>, name: &str) -> u32 {
    let addr = symbol(name);
    assert_eq!(sandbox.machine().memory.read_u32(addr).unwrap(), VariantType::Int as u32, "{name}");
    sandbox.machine().memory.read_u32(addr + 8).unwrap()
}

fn assert_refused(sandbox: &mut Sandbox<Scene>, function: &str, args: &[Variant]) {
    let err = sandbox.vmcall(function, args).unwrap_err();
    assert!(matches!(&err, SandboxError::InvalidArgument(msg) if msg.contains("itself")), "{function}: {err}");
    assert_eq!(sandbox.variants().transient_len(), 0);
    assert_eq!(sandbox.vmcall("answer", &[]).unwrap(), Variant::Int(42));
}

#[test]
fn containers_cannot_contain_themselves() {
    let mut sandbox = load(world(), &program(), test_config());
    for op in [ArrayOp::PushBack, ArrayOp::PushFront, ArrayOp::Insert] {
        assert_refused(&mut sandbox, "nest_array", &[Variant::Int(op as i64)]);
    }
    assert_refused(&mut sandbox, "nest_indirectly", &[]);
    assert_refused(&mut sandbox, "nest_dictionary", &[Variant::Int(0)]);
    assert_refused(&mut sandbox, "nest_dictionary", &[Variant::Int(1)]);
    assert!(sandbox.host().printed().is_empty());
    assert_eq!(sandbox.counters().exceptions, 6);
}

#[test]
fn dictionary_operations() {
    let mut sandbox = load(world(), &program(), test_config());
    let result = sandbox.vmcall("dictionary", &[]).unwrap();
    let dict = result.as_dictionary().expect("a dictionary");

    assert_eq!(dict.len(), 2);
    assert_eq!(dict.get(&Variant::Int(1)), None);
    assert_eq!(dict.get(&Variant::Int(2)), Some(Variant::Int(20)));
    assert_eq!(dict.get(&Variant::Int(3)), Some(Variant::Int(30)));
    assert_eq!(int_slot(&sandbox, "out"), 30);
    assert_eq!(int_slot(&sandbox, "kept"), 20, "an existing key keeps its value");
    assert_eq!(sandbox.machine().memory.read_u32(symbol("size")).unwrap(), 2);
    assert_eq!(sandbox.machine().memory.read_u32(symbol("has_one")).unwrap(), 0);
}

#[test]
fn merge_keeps_existing_keys_and_shares_storage() {
    let mut sandbox = load(world(), &program(), test_config());
    let a = Dictionary::new();
    a.set(Variant::from("x"), Variant::Int(1));
    let b = Dictionary::new();
    b.set(Variant::from("x"), Variant::Int(99));
    b.set(Variant::from("y"), Variant::Int(2));

    let merged = sandbox.vmcall("merge", &[Variant::Dictionary(a.clone()), Variant::Dictionary(b)]).unwrap();
    assert_eq!(merged, Variant::Dictionary(a.clone()));
    assert_eq!(a.get(&Variant::from("x")), Some(Variant::Int(1)));
    assert_eq!(a.get(&Variant::from("y")), Some(Variant::Int(2)));

    // Merging a dictionary into itself is a no-op, not a cycle.
    let same = Variant::Dictionary(a.clone());
    sandbox.vmcall("merge", &[same.clone(), same]).unwrap();
    assert_eq!(a.len(), 2);

    let keys = sandbox.vmcall("keys", &[Variant::Dictionary(a)]).unwrap();
    assert_eq!(keys.as_array().unwrap().to_vec(), vec![Variant::from("x"), Variant::from("y")]);
}

#[test]
fn array_at_checks_bounds() {
    let mut sandbox = load(world(), &program(), test_config());
    let array = Variant::Array(Array::from_vec(vec![Variant::Int(5), Variant::from("six")]));

    let second = sandbox.vmcall("array_at", &[array.clone(), Variant::Int(1)]).unwrap();
    assert_eq!(second, Variant::from("six"));
    for position in [2, -1] {
        let err = sandbox.vmcall("array_at", &[array.clone(), Variant::Int(position)]).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidArgument(_)), "{position}: {err}");
    }
    let err = sandbox.vmcall("array_at", &[Variant::from("not an array"), Variant::Int(0)]).unwrap_err();
    assert!(matches!(err, SandboxError::TypeMismatch { .. }));
}
