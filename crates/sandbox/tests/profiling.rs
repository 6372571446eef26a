mod common;

use common::{load, test_config, world};
use guest::{ProgramBuilder, Register};
use sandbox::Config;
use types::Variant;

use Register::*;

fn program() -> ProgramBuilder {
    let mut p = ProgramBuilder::new();
    // spin(n): n trips around a three instruction loop.
    p.function("spin")
        .lw(T0, A1, 8)
        .label("spin.loop")
        .beqz(T0, "spin.done")
        .addi(T0, T0, -1)
        .j("spin.loop")
        .label("spin.done")
        .set_variant_int(A0, 0, 1)
        .ret();
    p.function("answer").set_variant_int(A0, 0, 42).ret();
    p
}

#[test]
fn samples_are_grouped_by_function() {
    let mut sandbox = load(world(), &program(), test_config());
    assert!(!sandbox.is_profiling());
    assert_eq!(sandbox.hotspots(10).total_samples, 0);

    sandbox.enable_profiling(true, 100).unwrap();
    sandbox.vmcall("spin", &[Variant::Int(10_000)]).unwrap();
    sandbox.vmcall("answer", &[]).unwrap();

    let report = sandbox.hotspots(10);
    assert!(report.total_samples >= 250, "{report:?}");
    assert_eq!(report.hotspots[0].function, "spin");
    assert!(report.hotspots[0].count * 10 >= report.total_samples * 9);
    assert_eq!(report.hotspots.iter().map(|h| h.count).sum::<u64>(), report.total_samples);
    assert_eq!(sandbox.hotspots(1).hotspots.len(), 1);

    sandbox.clear_hotspots();
    assert_eq!(sandbox.hotspots(10).total_samples, 0);
    assert!(sandbox.is_profiling());
}

#[test]
fn profiling_survives_a_reload_but_not_a_stop() {
    let mut sandbox = load(world(), &program(), test_config());
    sandbox.enable_profiling(true, Config::DEFAULT_PROFILING_INTERVAL).unwrap();
    sandbox.load_program(&program().build_elf().unwrap()).unwrap();
    assert!(sandbox.is_profiling());
    assert_eq!(sandbox.machine().sampler().map(|s| s.interval()), Some(Config::DEFAULT_PROFILING_INTERVAL));

    sandbox.enable_profiling(false, 0).unwrap();
    assert!(!sandbox.is_profiling());
    assert!(sandbox.hotspots(10).hotspots.is_empty());
}
