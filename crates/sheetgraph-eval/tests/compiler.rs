//! End-to-end tests: workbook → graph → evaluation → mutation →
//! trim/snapshot/validate.

use sheetgraph_eval::test_workbook::TestWorkbook;
use sheetgraph_eval::{CompilerError, CycleMode, Notation, SheetCompiler};
use sheetgraph_common::CellValue as V;

fn chain_workbook() -> TestWorkbook {
    // A1 input; A2 = A1*2; A3 = A2+5; B1 unrelated
    TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(10.0))
        .with_formula("Sheet1", "A2", "=A1*2", V::Number(20.0))
        .with_formula("Sheet1", "A3", "=A2+5", V::Number(25.0))
        .with_cell_a1("Sheet1", "B1", V::Number(99.0))
}

#[test]
fn compile_and_evaluate_chain() {
    let mut wb = chain_workbook();
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A3"]).unwrap();

    // three cells on the path; B1 was never pulled in
    assert_eq!(sheet.node_count(), 3);
    assert_eq!(sheet.evaluate("A3").unwrap(), V::Number(25.0));
    assert_eq!(sheet.evaluate("Sheet1!A2").unwrap(), V::Number(20.0));
    assert!(matches!(
        sheet.evaluate("B1"),
        Err(CompilerError::UnknownAddress(_))
    ));
}

#[test]
fn set_value_invalidates_only_downstream() {
    let mut wb = chain_workbook();
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A3"]).unwrap();
    assert_eq!(sheet.evaluate("A3").unwrap(), V::Number(25.0));

    sheet.set_value("A1", V::Number(100.0)).unwrap();
    assert_eq!(sheet.evaluate("A2").unwrap(), V::Number(200.0));
    assert_eq!(sheet.evaluate("A3").unwrap(), V::Number(205.0));

    // fixed point: a fresh compile with the same input agrees
    let mut wb2 = TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(100.0))
        .with_formula("Sheet1", "A2", "=A1*2", V::Empty)
        .with_formula("Sheet1", "A3", "=A2+5", V::Empty);
    let mut fresh = SheetCompiler::new(&mut wb2).compile(&["A3"]).unwrap();
    assert_eq!(
        fresh.evaluate("A3").unwrap(),
        sheet.evaluate("A3").unwrap()
    );
}

#[test]
fn set_value_is_idempotent_and_ordered() {
    let mut wb = chain_workbook();
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A3"]).unwrap();

    sheet.set_value("A1", V::Number(50.0)).unwrap();
    sheet.set_value("A1", V::Number(50.0)).unwrap();
    assert_eq!(sheet.evaluate("A3").unwrap(), V::Number(105.0));

    // a second mutation made before reading is the one observed
    sheet.set_value("A1", V::Number(1.0)).unwrap();
    sheet.set_value("A1", V::Number(2.0)).unwrap();
    assert_eq!(sheet.evaluate("A3").unwrap(), V::Number(9.0));
}

#[test]
fn reset_forces_recompute() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(3.0))
        .with_formula("Sheet1", "A2", "=A1*A1", V::Number(999.0)); // stale host value
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A2"]).unwrap();

    // memoization returns the compile-time cache until reset
    assert_eq!(sheet.evaluate("A2").unwrap(), V::Number(999.0));
    sheet.reset("A2").unwrap();
    assert_eq!(sheet.evaluate("A2").unwrap(), V::Number(9.0));
}

#[test]
fn sum_over_two_ranges() {
    let mut wb = TestWorkbook::new().with_formula("Sheet1", "F1", "=SUM(B5:B15,D5:D15)", V::Empty);
    for row in 5..=15 {
        wb = wb
            .with_cell("Sheet1", row, 2, V::Number((row - 4) as f64))
            .with_cell("Sheet1", row, 4, V::Number((row - 4) as f64));
    }
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["F1"]).unwrap();
    // 1+..+11 on both columns
    assert_eq!(sheet.evaluate("F1").unwrap(), V::Number(132.0));

    // range nodes materialise their members: 22 cells + 2 ranges + seed
    assert_eq!(sheet.node_count(), 25);

    sheet.set_value("B5", V::Number(100.0)).unwrap();
    assert_eq!(sheet.evaluate("F1").unwrap(), V::Number(231.0));
}

#[test]
fn array_comparison_scenario() {
    let mut wb = TestWorkbook::new().with_formula(
        "Sheet1",
        "G1",
        "=IF(\"a\"={\"a\",\"b\";\"c\",#N/A;-1,TRUE},\"yes\",\"no\")&\"  more \"\"test\"\" text\"",
        V::Empty,
    );
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["G1"]).unwrap();
    assert_eq!(
        sheet.evaluate("G1").unwrap(),
        V::Text("no  more \"test\" text".into())
    );
}

#[test]
fn whole_column_clamps_to_used_bounds() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "B1", V::Number(1.0))
        .with_cell_a1("Sheet1", "B2", V::Number(2.0))
        .with_cell_a1("Sheet1", "B3", V::Number(3.0))
        .with_formula("Sheet1", "D1", "=SUM(B:B)", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["D1"]).unwrap();
    assert_eq!(sheet.evaluate("D1").unwrap(), V::Number(6.0));
}

#[test]
fn defined_names_resolve_before_the_graph() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "B1", V::Number(1.0))
        .with_cell_a1("Sheet1", "B2", V::Number(2.0))
        .with_cell_a1("Sheet1", "B3", V::Number(3.0))
        .with_defined_name("Totals", "=Sheet1!$B$1:$B$3")
        .with_formula("Sheet1", "C1", "=SUM(Totals)*10", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["C1"]).unwrap();
    assert_eq!(sheet.evaluate("C1").unwrap(), V::Number(60.0));

    sheet.set_value("B2", V::Number(20.0)).unwrap();
    assert_eq!(sheet.evaluate("C1").unwrap(), V::Number(240.0));
}

#[test]
fn unresolved_name_is_a_name_error() {
    let mut wb =
        TestWorkbook::new().with_formula("Sheet1", "C1", "=NoSuchName+1", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["C1"]).unwrap();
    assert!(matches!(
        sheet.evaluate("C1").unwrap(),
        V::Error(e) if e == "#NAME?"
    ));
}

#[test]
fn indirect_literal_becomes_a_dependency() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(7.0))
        .with_formula("Sheet1", "C1", "=INDIRECT(\"A1\")*2", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["C1"]).unwrap();
    assert_eq!(sheet.evaluate("C1").unwrap(), V::Number(14.0));

    sheet.set_value("A1", V::Number(8.0)).unwrap();
    assert_eq!(sheet.evaluate("C1").unwrap(), V::Number(16.0));
}

#[test]
fn poisoned_cell_surfaces_its_parse_error() {
    let mut wb = TestWorkbook::new()
        .with_formula("Sheet1", "A1", "=SUM((", V::Empty)
        .with_formula("Sheet1", "A2", "=A1+1", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A2"]).unwrap();
    assert!(matches!(
        sheet.evaluate("A2"),
        Err(CompilerError::Poisoned { addr, .. }) if addr.contains("A1")
    ));
}

#[test]
fn default_mode_rejects_cycles() {
    let mut wb = TestWorkbook::new()
        .with_formula("Sheet1", "A1", "=B1", V::Empty)
        .with_formula("Sheet1", "B1", "=A1+1", V::Empty);
    let result = SheetCompiler::new(&mut wb).compile(&["A1"]);
    assert!(matches!(result, Err(CompilerError::Cycle(_))));
}

#[test]
fn iterative_mode_converges() {
    // A1 = B1/2 + 1, B1 = A1/2 + 1 has the fixed point A1 = B1 = 2
    let mut wb = TestWorkbook::new()
        .with_formula("Sheet1", "A1", "=B1/2+1", V::Empty)
        .with_formula("Sheet1", "B1", "=A1/2+1", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb)
        .with_cycle_mode(CycleMode::Iterate {
            max_iterations: 100,
            tolerance: 1e-9,
        })
        .compile(&["A1"])
        .unwrap();
    match sheet.evaluate("A1").unwrap() {
        V::Number(n) => assert!((n - 2.0).abs() < 1e-6, "got {n}"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn linest_array_run_annotates_each_cell() {
    // three adjacent cells with the identical LINEST formula: a
    // degree-2 fit; y = x² over x = 1..4
    let formula = "=LINEST(B1:B4,A1:A4)";
    let mut wb = TestWorkbook::new()
        .with_range(
            "Sheet1",
            1,
            1,
            vec![
                vec![V::Number(1.0), V::Number(1.0)],
                vec![V::Number(2.0), V::Number(4.0)],
                vec![V::Number(3.0), V::Number(9.0)],
                vec![V::Number(4.0), V::Number(16.0)],
            ],
        )
        .with_formula("Sheet1", "D1", formula, V::Empty)
        .with_formula("Sheet1", "E1", formula, V::Empty)
        .with_formula("Sheet1", "F1", formula, V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb)
        .compile(&["D1", "E1", "F1"])
        .unwrap();

    let x2 = match sheet.evaluate("D1").unwrap() {
        V::Number(n) => n,
        other => panic!("unexpected: {other:?}"),
    };
    let x1 = match sheet.evaluate("E1").unwrap() {
        V::Number(n) => n,
        other => panic!("unexpected: {other:?}"),
    };
    let b = match sheet.evaluate("F1").unwrap() {
        V::Number(n) => n,
        other => panic!("unexpected: {other:?}"),
    };
    assert!((x2 - 1.0).abs() < 1e-6, "x² coefficient was {x2}");
    assert!(x1.abs() < 1e-6, "x coefficient was {x1}");
    assert!(b.abs() < 1e-6, "intercept was {b}");
}

#[test]
fn lone_linest_cell_yields_its_slope() {
    let mut wb = TestWorkbook::new()
        .with_range(
            "Sheet1",
            1,
            1,
            vec![
                vec![V::Number(1.0), V::Number(3.0)],
                vec![V::Number(2.0), V::Number(5.0)],
                vec![V::Number(3.0), V::Number(7.0)],
            ],
        )
        .with_formula("Sheet1", "D1", "=LINEST(B1:B3,A1:A3)", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["D1"]).unwrap();
    match sheet.evaluate("D1").unwrap() {
        V::Number(n) => assert!((n - 2.0).abs() < 1e-9),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn trim_preserves_output_evaluation() {
    // out depends on input via mid; extra work hangs off to the side
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(2.0))
        .with_cell_a1("Sheet1", "B1", V::Number(5.0))
        .with_formula("Sheet1", "A2", "=A1*B1", V::Empty)
        .with_formula("Sheet1", "A3", "=A2+1", V::Empty)
        .with_formula("Sheet1", "C1", "=B1*100", V::Empty);
    let mut full = SheetCompiler::new(&mut wb).compile(&["A3", "C1"]).unwrap();

    let mut trimmed = {
        let mut wb2 = TestWorkbook::new()
            .with_cell_a1("Sheet1", "A1", V::Number(2.0))
            .with_cell_a1("Sheet1", "B1", V::Number(5.0))
            .with_formula("Sheet1", "A2", "=A1*B1", V::Empty)
            .with_formula("Sheet1", "A3", "=A2+1", V::Empty)
            .with_formula("Sheet1", "C1", "=B1*100", V::Empty);
        SheetCompiler::new(&mut wb2).compile(&["A3", "C1"]).unwrap()
    };
    trimmed.trim(&["A1"], &["A3"]).unwrap();

    // the side computation and its output are gone
    assert!(trimmed.node_count() < full.node_count());
    assert!(matches!(
        trimmed.evaluate("C1"),
        Err(CompilerError::UnknownAddress(_))
    ));

    // every covered input assignment agrees with the full graph
    for input in [1.0, 2.0, 7.5, -3.0] {
        full.set_value("A1", V::Number(input)).unwrap();
        trimmed.set_value("A1", V::Number(input)).unwrap();
        assert_eq!(
            full.evaluate("A3").unwrap(),
            trimmed.evaluate("A3").unwrap(),
            "input {input}"
        );
    }
}

#[test]
fn value_tree_dumps_the_dependency_chain() {
    let mut wb = chain_workbook();
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A3"]).unwrap();
    let tree = sheet.value_tree("A3").unwrap();
    let a3_pos = tree.find("Sheet1!A3 = 25").unwrap();
    let a2_pos = tree.find(" Sheet1!A2 = 20").unwrap();
    let a1_pos = tree.find("  Sheet1!A1 = 10").unwrap();
    assert!(a3_pos < a2_pos && a2_pos < a1_pos);
}

#[test]
fn snapshot_round_trip_preserves_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");

    let mut wb = chain_workbook();
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A3"]).unwrap();
    sheet.set_value("A1", V::Number(21.0)).unwrap();
    let expected = sheet.evaluate("A3").unwrap();
    sheet.serialize(&path).unwrap();

    let mut restored = sheetgraph_eval::CompiledSheet::deserialize(&path).unwrap();
    assert_eq!(restored.digest(), sheet.digest());
    assert_eq!(restored.evaluate("A3").unwrap(), expected);

    // the restored graph keeps reacting to input changes
    restored.set_value("A1", V::Number(1.0)).unwrap();
    assert_eq!(restored.evaluate("A3").unwrap(), V::Number(7.0));
}

#[test]
fn validate_reports_stale_host_values() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(3.0))
        .with_formula("Sheet1", "A2", "=A1*2", V::Number(6.0))
        .with_formula("Sheet1", "A3", "=A1+1", V::Number(123.0)); // host lied
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A2", "A3"]).unwrap();

    let mismatches = sheet.validate(&[]).unwrap();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].addr.to_string(), "Sheet1!A3");
    assert_eq!(mismatches[0].expected, V::Number(123.0));
    assert_eq!(mismatches[0].got, V::Number(4.0));
}

#[test]
fn evaluate_many_and_recalculate() {
    let mut wb = chain_workbook();
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A3"]).unwrap();
    sheet.recalculate().unwrap();
    assert_eq!(
        sheet.evaluate_many(&["A1", "A2", "A3"]).unwrap(),
        vec![V::Number(10.0), V::Number(20.0), V::Number(25.0)]
    );
}

#[test]
fn r1c1_workbooks_compile_with_relative_references() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Sheet1", "A1", V::Number(6.0))
        .with_formula("Sheet1", "A2", "=R[-1]C*7", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb)
        .with_notation(Notation::R1C1)
        .compile(&["A2"])
        .unwrap();
    assert_eq!(sheet.evaluate("A2").unwrap(), V::Number(42.0));
}

#[test]
fn cross_sheet_references() {
    let mut wb = TestWorkbook::new()
        .with_cell_a1("Data", "A1", V::Number(5.0))
        .with_formula("Sheet1", "A1", "=Data!A1*3", V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A1"]).unwrap();
    assert_eq!(sheet.evaluate("A1").unwrap(), V::Number(15.0));
    sheet.set_value("Data!A1", V::Number(6.0)).unwrap();
    assert_eq!(sheet.evaluate("A1").unwrap(), V::Number(18.0));
}
