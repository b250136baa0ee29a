//! Integration tests for the register lowering backend.

use std::fs;
use std::path::{Path, PathBuf};

use pathprof::core::ConfigError;
use pathprof::{AllocationTable, CompileError, InstrumentOptions, Pipeline, Program};

fn input_path(filename: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("inputs")
        .join(filename)
}

fn load_program(filename: &str) -> Program {
    let path = input_path(filename);
    let contents = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    Program::parse(&contents).unwrap_or_else(|e| panic!("Failed to parse {filename}: {e}"))
}

fn load_table() -> AllocationTable {
    AllocationTable::load(input_path("routing_allocation.json"))
        .unwrap_or_else(|e| panic!("Failed to load allocation table: {e}"))
}

#[test]
fn test_routing_lowering() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut program = load_program("routing.ctl");
    let pipeline = Pipeline::new(InstrumentOptions::default());

    let reports = pipeline.lower(&mut program, &load_table()).unwrap();
    assert_eq!(reports.len(), 1);
    let lowering = &reports[0].lowering;

    let lowered: Vec<(&str, &str, u8, u64)> = lowering
        .lowered
        .iter()
        .map(|l| (l.action.as_str(), l.dispatch.as_str(), l.counter, l.increment))
        .collect();
    assert_eq!(
        lowered,
        vec![
            ("ingress_drop", "ingress.ipv4_lpm", 1, 1),
            ("set_nhop", "ingress.ipv4_lpm", 0, 1),
            ("ingress_forward", "ingress.l2_fwd", 0, 2),
            ("acl_deny", "ingress.acl", 2, 1),
        ]
    );

    assert_eq!(lowering.misses.len(), 1);
    assert_eq!(lowering.misses[0].action, "acl_permit");
    assert_eq!(lowering.misses[0].dispatches, vec!["ingress.acl".to_string()]);
    assert_eq!(lowering.counter_usage, (3, 3, 8));
    assert_eq!(reports[0].stats.counters_lowered, 4);
    assert_eq!(reports[0].stats.lookup_misses, 1);

    let output = program.print();
    assert!(output.contains(
        "action ingress_forward(port) {\n        standard_metadata.var_0 = standard_metadata.var_0 + 2;\n        egress_port = port;"
    ));
    assert!(output.contains("action acl_permit() @name(\"ingress.acl_permit\") {\n    }"));
    assert!(!output.contains("meta.BL"));
}

#[test]
fn test_lowering_is_applied_once() {
    let mut program = load_program("routing.ctl");
    let pipeline = Pipeline::new(InstrumentOptions::default());
    let table = load_table();

    pipeline.lower(&mut program, &table).unwrap();
    let once = program.print();

    let reports = pipeline.lower(&mut program, &table).unwrap();
    assert!(reports[0].lowering.already_lowered);
    assert_eq!(program.print(), once);
    assert_eq!(once.matches("standard_metadata.var_").count(), 8);
}

#[test]
fn test_register_prefix_option() {
    let mut program = load_program("routing.ctl");
    let options = InstrumentOptions {
        register_prefix: "meta.ctr".to_string(),
        ..InstrumentOptions::default()
    };
    let pipeline = Pipeline::new(options);
    pipeline.lower(&mut program, &load_table()).unwrap();

    let output = pathprof::ir::Printer::new(pipeline.options()).print(&program);
    assert!(output.contains("meta.ctr2 = meta.ctr2 + 1;"));
}

#[test]
fn test_small_bank_rejects_table() {
    let mut program = load_program("routing.ctl");
    let options = InstrumentOptions {
        counter_bank_size: 2,
        ..InstrumentOptions::default()
    };

    let err = Pipeline::new(options)
        .lower(&mut program, &load_table())
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Config(ConfigError::RegisterOutOfRange { register: 2, bank_size: 2, .. })
    ));
}

#[test]
fn test_lowered_paths_sum_counters() {
    let mut program = load_program("routing.ctl");
    let pipeline = Pipeline::new(InstrumentOptions::default());
    pipeline.lower(&mut program, &load_table()).unwrap();

    let traces = pathprof::ir::enumerate(&program, 0, pipeline.options()).unwrap();
    assert_eq!(traces.len(), 10);

    let nhop_deny = traces
        .iter()
        .find(|t| t.route == ["ipv4_lpm.set_nhop", "acl.acl_deny"])
        .unwrap();
    assert_eq!(nhop_deny.counters.get(&0), Some(&1));
    assert_eq!(nhop_deny.counters.get(&2), Some(&1));
    assert_eq!(nhop_deny.accumulator, 0);
}
