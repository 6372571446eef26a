use proptest::prelude::*;
use sandbox::{Config, GuestStdString, GuestVariant, SandboxError, ScopedObjects, ScopedVariants};
use types::{Variant, VariantType};
use vm::{Arena, Memory, PageAttributes};

const BASE: u32 = 0x40000;

fn guest_memory() -> (Memory, Arena) {
    let mut memory = Memory::new(1 << 20);
    memory.map(BASE, 0x10000, PageAttributes::rw()).unwrap();
    (memory, Arena::new(BASE + 0x1000, 0xf000))
}

/// Encodes `value`, writes it to guest memory, reads it back and decodes.
fn through_guest(value: &Variant) -> Result<Variant, SandboxError> {
    let (mut memory, _) = guest_memory();
    let mut variants = ScopedVariants::new(Config::DEFAULT_MAX_REFS);
    let mut objects = ScopedObjects::new(Config::DEFAULT_MAX_REFS);
    GuestVariant::create(value, &mut variants, &mut objects)?.write(&mut memory, BASE)?;
    GuestVariant::read(&memory, BASE)?.to_variant(&variants, &objects)
}

proptest! {
    #[test]
    fn integers_round_trip(i in any::<i64>()) {
        prop_assert_eq!(through_guest(&Variant::Int(i)).unwrap(), Variant::Int(i));
    }

    #[test]
    fn floats_round_trip(f in any::<f64>().prop_filter("NaN never compares equal", |f| !f.is_nan())) {
        prop_assert_eq!(through_guest(&Variant::Float(f)).unwrap(), Variant::Float(f));
    }

    #[test]
    fn bools_round_trip(b in any::<bool>()) {
        prop_assert_eq!(through_guest(&Variant::Bool(b)).unwrap(), Variant::Bool(b));
    }

    #[test]
    fn strings_round_trip_through_the_store(s in ".{0,64}") {
        prop_assert_eq!(through_guest(&Variant::String(s.clone())).unwrap(), Variant::String(s));
    }

    #[test]
    fn std_strings_round_trip(s in "[a-z0-9 ]{0,40}") {
        let (mut memory, mut arena) = guest_memory();
        GuestStdString::write(&mut memory, &mut arena, BASE, s.as_bytes()).unwrap();
        let inline = memory.read_u32(BASE).unwrap() == BASE + 8;
        prop_assert_eq!(inline, s.len() <= Config::STD_STRING_SSO);
        prop_assert_eq!(GuestStdString::read(&memory, BASE).unwrap(), s);
    }
}

#[test]
fn sso_boundary_is_fifteen_bytes() {
    let (mut memory, mut arena) = guest_memory();
    for (len, inline) in [(15, true), (16, false)] {
        let text = "x".repeat(len);
        GuestStdString::write(&mut memory, &mut arena, BASE, text.as_bytes()).unwrap();
        assert_eq!(memory.read_u32(BASE).unwrap() == BASE + 8, inline, "length {len}");
        assert_eq!(GuestStdString::read(&memory, BASE).unwrap(), text);
    }
}

#[test]
fn scoped_values_live_until_the_store_is_cleared() {
    let mut variants = ScopedVariants::new(8);
    let mut objects = ScopedObjects::new(8);
    let gv = GuestVariant::create(&Variant::from("kept"), &mut variants, &mut objects).unwrap();
    assert_eq!(gv.variant_type().unwrap(), VariantType::String);
    assert_eq!(gv.to_variant(&variants, &objects).unwrap(), Variant::from("kept"));

    let permanent = variants.create_permanent(gv.index().unwrap()).unwrap();
    assert_eq!(variants.create_permanent(permanent).unwrap(), permanent);

    variants.clear_transient();
    assert_eq!(gv.to_variant(&variants, &objects), Err(SandboxError::InvalidReference(0)));
    let promoted = GuestVariant::from_index(VariantType::String, permanent);
    assert_eq!(promoted.to_variant(&variants, &objects).unwrap(), Variant::from("kept"));
}

#[test]
fn strict_assignment_keeps_the_index() {
    let mut variants = ScopedVariants::new(8);
    let index = variants.create_scoped(Variant::from("a")).unwrap();
    variants.assign(index, Variant::from("b")).unwrap();
    assert_eq!(variants.get(index).unwrap(), &Variant::from("b"));
    assert!(matches!(variants.assign(index, Variant::Int(1)), Err(SandboxError::TypeMismatch { .. })));

    // Nil is accepted on either side and the index survives.
    variants.assign(index, Variant::Nil).unwrap();
    assert_eq!(variants.get(index).unwrap(), &Variant::Nil);
    variants.assign(index, Variant::from("c")).unwrap();
    assert_eq!(variants.get(index).unwrap(), &Variant::from("c"));
}
