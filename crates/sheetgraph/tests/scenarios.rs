//! The canonical end-to-end scenarios, driven through the public
//! surface of the meta crate.

use sheetgraph::eval::test_workbook::TestWorkbook;
use sheetgraph::{CellValue as V, SheetCompiler};

fn compile_single(formula: &str) -> V {
    let mut wb = TestWorkbook::new().with_formula("Sheet1", "A1", formula, V::Empty);
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["A1"]).unwrap();
    sheet.evaluate("A1").unwrap()
}

#[test]
fn sum_of_two_ranges_through_the_graph() {
    let mut wb = TestWorkbook::new().with_formula("Sheet1", "F1", "=SUM(B5:B15,D5:D15)", V::Empty);
    for row in 5..=15 {
        wb = wb
            .with_cell("Sheet1", row, 2, V::Number(1.0))
            .with_cell("Sheet1", row, 4, V::Number(2.0));
    }
    let mut sheet = SheetCompiler::new(&mut wb).compile(&["F1"]).unwrap();
    assert_eq!(sheet.evaluate("F1").unwrap(), V::Number(33.0));
}

#[test]
fn array_literal_comparison_with_escaped_text() {
    assert_eq!(
        compile_single(
            "=IF(\"a\"={\"a\",\"b\";\"c\",#N/A;-1,TRUE},\"yes\",\"no\")&\"  more \"\"test\"\" text\""
        ),
        V::Text("no  more \"test\" text".into())
    );
}

#[test]
fn atan2_uses_spreadsheet_argument_order() {
    match compile_single("=ATAN2(1,0)") {
        V::Number(n) => assert!((n - std::f64::consts::FRAC_PI_2).abs() < 1e-12),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn base_conversion_window() {
    assert_eq!(compile_single("=HEX2DEC(\"FFFFFFFFFE\")"), V::Number(-2.0));
    assert_eq!(compile_single("=DEC2BIN(-2)"), V::Text("1111111110".into()));
    assert!(matches!(
        compile_single("=DEC2HEX(2^39)"),
        V::Error(e) if e == "#NUM!"
    ));
}

#[test]
fn yearfrac_actual_actual() {
    match compile_single("=YEARFRAC(DATE(2008,1,1),DATE(2015,4,20),1)") {
        V::Number(n) => assert!((n - 7.299110198).abs() < 1e-8, "got {n}"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn wildcard_match_skips_error_cells() {
    assert_eq!(
        compile_single("=MATCH(\"Th*t\",{\"xyzzy\",1,FALSE,#DIV/0!,\"That\",\"TheEnd\"},0)"),
        V::Number(5.0)
    );
}
