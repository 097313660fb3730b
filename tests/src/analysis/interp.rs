use tacmesh_analysis::Error;
use tacmesh_analysis::interp::{CallRecord, Interpreter};
use tacmesh_core::seed::Seed;
use tacmesh_transform::obfuscator::{ObfuscationConfig, obfuscate_routine};

use crate::common::{ROUTINE, SINGLE_JUMP, function, init_tracing, routine, seed};

/// Result of `main(n)`: the sum of `|i - 3|` for `i < n`, minus 20 when above 20.
fn expected_main(n: i64) -> i64 {
    let total: i64 = (0..n).map(|i| (i - 3).abs()).sum();
    if total > 20 { total - 20 } else { total }
}

#[test]
fn test_main_golden_trace() {
    init_tracing();
    let routine = routine(ROUTINE);
    let abs = function(&routine, "abs_diff").id;
    let mut interp = Interpreter::new(&routine);

    for n in 0..10 {
        let trace = interp.run("main", &[n]).unwrap();
        let observed = trace.observed;
        assert_eq!(observed.return_value, Some(expected_main(n)), "n = {n}");
        assert_eq!(observed.outputs, vec![("total".to_string(), expected_main(n))]);
        let calls: Vec<CallRecord> = (0..n)
            .map(|i| CallRecord {
                callee: abs,
                args: vec![i, 3],
                result: Some((i - 3).abs()),
            })
            .collect();
        assert_eq!(observed.calls, calls);
        assert!(trace.steps > 0);
    }
}

#[test]
fn test_pointer_and_indexed_access() {
    let routine = routine(ROUTINE);
    let mut interp = Interpreter::new(&routine);
    let array = interp.alloc(&[5, 9]);

    let trace = interp.run("scale", &[array]).unwrap();
    // t = p[1] * 2; p[0] = t; u = -*(&t)
    assert_eq!(trace.observed.return_value, Some(-18));
    assert_eq!(interp.read(array, 2).unwrap(), &[18, 9]);
    assert!(trace.observed.calls.is_empty());
    assert!(interp.read(array, 3).is_err());
}

#[test]
fn test_single_jump_returns_local() {
    let routine = routine(SINGLE_JUMP);
    let trace = Interpreter::new(&routine).run("single", &[]).unwrap();
    assert_eq!(trace.observed.return_value, Some(41));
    assert_eq!(trace.steps, 3);
}

#[test]
fn test_meshing_preserves_observations() {
    init_tracing();
    let original = routine(ROUTINE);
    let seeds = [
        seed(),
        Seed::from_hex(&"01".repeat(32)).unwrap(),
        Seed::from_hex(&"fe".repeat(32)).unwrap(),
        Seed::from_hex(&"5a".repeat(32)).unwrap(),
    ];

    for seed in seeds {
        let mut meshed = original.clone();
        let report = obfuscate_routine(&mut meshed, &ObfuscationConfig::with_seed(seed.clone()));
        assert_eq!(report.meshed(), 3, "seed {}", seed.to_hex());

        for n in [0, 1, 4, 8, 9, 12] {
            let before = Interpreter::new(&original).run("main", &[n]).unwrap();
            let after = Interpreter::new(&meshed).run("main", &[n]).unwrap();
            assert_eq!(after.observed, before.observed, "seed {}, n = {n}", seed.to_hex());
            assert!(after.steps > before.steps);
        }

        for (a, b) in [(2, 7), (7, 2), (-4, -4)] {
            let before = Interpreter::new(&original).run("abs_diff", &[a, b]).unwrap();
            let after = Interpreter::new(&meshed).run("abs_diff", &[a, b]).unwrap();
            assert_eq!(after.observed, before.observed);
            assert_eq!(after.observed.return_value, Some((a - b).abs()));
        }

        let mut before = Interpreter::new(&original);
        let mut after = Interpreter::new(&meshed);
        let (x, y) = (before.alloc(&[1, -6]), after.alloc(&[1, -6]));
        let traced = before.run("scale", &[x]).unwrap();
        assert_eq!(after.run("scale", &[y]).unwrap().observed, traced.observed);
        assert_eq!(after.read(y, 2).unwrap(), before.read(x, 2).unwrap());
    }
}

#[test]
fn test_step_limit() {
    let routine = routine(ROUTINE);
    let result = Interpreter::new(&routine).with_step_limit(10).run("main", &[9]);
    assert!(matches!(result, Err(Error::StepLimit(10))));
}

#[test]
fn test_bad_invocations() {
    let routine = routine(ROUTINE);
    let mut interp = Interpreter::new(&routine);
    assert!(matches!(interp.run("main", &[]), Err(Error::Execution(_))));
    assert!(matches!(interp.run("main", &[1, 2]), Err(Error::Execution(_))));
    assert!(matches!(interp.run("missing", &[]), Err(Error::Execution(_))));
    // the pointer input must address allocated memory
    assert!(matches!(interp.run("scale", &[1_000]), Err(Error::Execution(_))));
}
