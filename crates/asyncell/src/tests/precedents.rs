use asyncell_common::{CellRef, SheetId};

use crate::precedents::{CalledFunction, PrecedentResolver};
use crate::test_host::TestHost;

fn refs(host: &TestHost, cells: &[&str]) -> Vec<CellRef> {
    cells.iter().map(|a1| host.cell("Sheet1", a1)).collect()
}

#[test]
fn references_are_transitive_and_unique() {
    let host = TestHost::new()
        .with_value("Sheet1", "A1", 1.0)
        .with_formula("Sheet1", "B1", "=F(A1)")
        .with_formula("Sheet1", "C1", "=G(B1, A1)")
        .with_formula("Sheet1", "D1", "=H(C1)");
    let mut resolver = PrecedentResolver::new();

    let d1 = host.cell("Sheet1", "D1");
    assert_eq!(
        resolver.dependency_references(&host, &d1),
        refs(&host, &["C1", "B1", "A1"])
    );
    let c1 = host.cell("Sheet1", "C1");
    assert_eq!(resolver.direct_edges(&host, &c1).len(), 2);
    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "A1")),
        vec![]
    );
}

#[test]
fn operands_on_other_sheets_resolve() {
    let host = TestHost::new()
        .with_sheet("Sheet1")
        .with_sheet("Data")
        .with_sheet("My Sheet")
        .with_formula("Sheet1", "A1", "=F(Data!A1, 'My Sheet'!$B$2, C3)");
    let mut resolver = PrecedentResolver::new();
    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "A1")),
        vec![
            host.cell("Data", "A1"),
            host.cell("My Sheet", "B2"),
            host.cell("Sheet1", "C3"),
        ]
    );
}

#[test]
fn unknown_sheet_operand_is_skipped() {
    let host = TestHost::new().with_formula("Sheet1", "A1", "=F(Nowhere!A1, A2)");
    let mut resolver = PrecedentResolver::new();
    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "A1")),
        refs(&host, &["A2"])
    );
}

#[test]
fn ranges_expand_column_by_column() {
    let host = TestHost::new().with_formula("Sheet1", "C1", "=SUM(A1:B2)");
    let mut resolver = PrecedentResolver::new();
    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "C1")),
        refs(&host, &["A1", "A2", "B1", "B2"])
    );
}

#[test]
fn function_calls_exclude_the_root() {
    let host = TestHost::new()
        .with_formula("Sheet1", "A1", "=Inner(1)")
        .with_formula("Sheet1", "B1", "=Middle(A1)")
        .with_formula("Sheet1", "C1", "=Outer(B1)")
        .with_formula("Sheet1", "D1", "=Top(C1)");
    let mut resolver = PrecedentResolver::new();
    let b1 = host.cell("Sheet1", "B1");
    let c1 = host.cell("Sheet1", "C1");

    assert_eq!(
        resolver.dependency_function_calls(&host, &c1),
        vec![CalledFunction::new(b1, "Middle")]
    );
    // A1 reads nothing, so its own call is never an edge parent
    assert_eq!(
        resolver.dependency_function_calls(&host, &host.cell("Sheet1", "D1")),
        vec![CalledFunction::new(c1, "OUTER"), CalledFunction::new(b1, "middle")]
    );
}

#[test]
fn called_function_names_ignore_case() {
    let cell = CellRef::cell(SheetId(1), 0, 0);
    let mut set = rustc_hash::FxHashSet::default();
    set.insert(CalledFunction::new(cell, "AsyncAdd"));
    assert!(set.contains(&CalledFunction::new(cell, "ASYNCADD")));
    assert!(!set.contains(&CalledFunction::new(cell, "AsyncSub")));
    assert!(!set.contains(&CalledFunction::new(CellRef::cell(SheetId(1), 0, 1), "AsyncAdd")));
}

#[test]
fn cycles_terminate() {
    let host = TestHost::new()
        .with_formula("Sheet1", "A1", "=F(B1)")
        .with_formula("Sheet1", "B1", "=F(C1)")
        .with_formula("Sheet1", "C1", "=F(A1)")
        .with_formula("Sheet1", "D1", "=F(D1)");
    let mut resolver = PrecedentResolver::new();

    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "A1")),
        refs(&host, &["B1", "C1"])
    );
    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "D1")),
        vec![]
    );
    assert_eq!(
        resolver.dependency_function_calls(&host, &host.cell("Sheet1", "A1")),
        vec![CalledFunction::new(host.cell("Sheet1", "B1"), "F")]
    );
}

#[test]
fn unresolvable_operands_give_no_edges() {
    let host = TestHost::new()
        .with_value("Sheet1", "A1", 5.0)
        .with_formula("Sheet1", "B1", "=F(MyName, A:A, 1, \"A1\")")
        .with_formula("Sheet1", "C1", "=F((");
    let mut resolver = PrecedentResolver::new();

    for a1 in ["A1", "B1", "C1"] {
        let cell = host.cell("Sheet1", a1);
        assert!(resolver.dependency_references(&host, &cell).is_empty(), "{a1}");
    }
    let missing_sheet = CellRef::cell(SheetId(99), 0, 0);
    assert!(resolver.direct_edges(&host, &missing_sheet).is_empty());
}

#[test]
fn edges_are_memoised_until_cleared() {
    let host = TestHost::new().with_formula("Sheet1", "B1", "=F(A1)");
    let b1 = host.cell("Sheet1", "B1");
    let mut resolver = PrecedentResolver::new();

    assert_eq!(resolver.dependency_references(&host, &b1), refs(&host, &["A1"]));
    assert_eq!(resolver.cached_cells(), 2);

    let _ = host.clone().with_formula("Sheet1", "B1", "=F(A2)");
    assert_eq!(resolver.dependency_references(&host, &b1), refs(&host, &["A1"]));

    resolver.clear();
    assert_eq!(resolver.cached_cells(), 0);
    assert_eq!(resolver.dependency_references(&host, &b1), refs(&host, &["A2"]));
}

#[test]
fn long_chains_walk_without_recursion() {
    const LEN: u32 = 20_000;
    let mut host = TestHost::new().with_value("Sheet1", "A1", 1.0);
    for row in 2..=LEN {
        host = host.with_formula("Sheet1", &format!("A{row}"), &format!("=F(A{})", row - 1));
    }
    let mut resolver = PrecedentResolver::new();
    let last = host.cell("Sheet1", &format!("A{LEN}"));

    let found = resolver.dependency_references(&host, &last);
    assert_eq!(found.len(), LEN as usize - 1);
    assert_eq!(found.first(), Some(&host.cell("Sheet1", &format!("A{}", LEN - 1))));
    assert_eq!(found.last(), Some(&host.cell("Sheet1", "A1")));
}

#[test]
fn oversized_ranges_give_no_edges() {
    let host = TestHost::new()
        .with_formula("Sheet1", "A1", "=SUM(B1:XFD1048576, C3)")
        .with_formula("Sheet1", "A2", "=SUM(B1:B65536)")
        .with_formula("Sheet1", "A3", "=SUM(B1:B65537)");
    let mut resolver = PrecedentResolver::new();

    assert_eq!(
        resolver.dependency_references(&host, &host.cell("Sheet1", "A1")),
        refs(&host, &["C3"])
    );
    assert_eq!(
        resolver.direct_edges(&host, &host.cell("Sheet1", "A2")).len() as u64,
        crate::precedents::MAX_RANGE_CELLS
    );
    assert!(resolver.direct_edges(&host, &host.cell("Sheet1", "A3")).is_empty());
}
