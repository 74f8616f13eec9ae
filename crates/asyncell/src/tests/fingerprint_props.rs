use std::hash::{Hash, Hasher};

use asyncell_common::{CellRef, ExcelErrorKind, SheetId, XlValue};
use proptest::prelude::*;
use rustc_hash::FxHasher;

use crate::fingerprint::CallFingerprint;

const CALLER: CellRef = CellRef::cell(SheetId(1), 3, 4);

fn scalar() -> impl Strategy<Value = XlValue> {
    prop_oneof![
        (-1e12f64..1e12).prop_map(XlValue::Number),
        any::<i64>().prop_map(XlValue::Int),
        "[a-z]{0,6}".prop_map(XlValue::Text),
        any::<bool>().prop_map(XlValue::Boolean),
        prop::sample::select(ExcelErrorKind::ALL.to_vec()).prop_map(XlValue::Error),
        Just(XlValue::Empty),
        Just(XlValue::Missing),
        (0u32..50, 0u32..20).prop_map(|(r, c)| XlValue::Reference(CellRef::cell(SheetId(1), r, c))),
    ]
}

fn grid() -> impl Strategy<Value = XlValue> {
    (1usize..4, 1usize..4).prop_flat_map(|(rows, cols)| {
        prop::collection::vec(prop::collection::vec(scalar(), cols), rows).prop_map(XlValue::Array)
    })
}

fn argument() -> impl Strategy<Value = XlValue> {
    prop_oneof![3 => scalar(), 1 => grid()]
}

fn arguments() -> impl Strategy<Value = Vec<XlValue>> {
    prop::collection::vec(argument(), 0..6)
}

fn hash_of(fp: &CallFingerprint) -> u64 {
    let mut hasher = FxHasher::default();
    fp.hash(&mut hasher);
    hasher.finish()
}

proptest! {
    #[test]
    fn equal_arguments_give_equal_keys(args in arguments(), stamp in 40000.0f64..50000.0) {
        let copy = args.clone();
        let a = CallFingerprint::for_call("AsyncAdd", &args, CALLER, stamp).unwrap();
        let b = CallFingerprint::for_call("AsyncAdd", &copy, CALLER, stamp).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn changing_one_argument_changes_the_key(
        args in prop::collection::vec(argument(), 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut changed = args.clone();
        let i = pick.index(changed.len());
        changed[i] = XlValue::text("#changed");
        let a = CallFingerprint::for_call("AsyncAdd", &args, CALLER, 1.0).unwrap();
        let b = CallFingerprint::for_call("AsyncAdd", &changed, CALLER, 1.0).unwrap();
        prop_assert_ne!(a, b);
    }

    #[test]
    fn changing_one_grid_cell_changes_the_key(
        value in grid(),
        pick in any::<prop::sample::Index>(),
    ) {
        let XlValue::Array(mut rows) = value.clone() else { unreachable!() };
        let cols = rows[0].len();
        let flat = pick.index(rows.len() * cols);
        rows[flat / cols][flat % cols] = XlValue::text("#changed");
        let a = CallFingerprint::for_call("F", &[value], CALLER, 1.0).unwrap();
        let b = CallFingerprint::for_call("F", &[XlValue::Array(rows)], CALLER, 1.0).unwrap();
        prop_assert_ne!(a, b);
    }

    #[test]
    fn caller_and_stamp_are_part_of_the_key(args in arguments(), row in 0u32..100) {
        let other = CellRef::cell(SheetId(2), row, 0);
        let here = CallFingerprint::for_call("F", &args, CALLER, 1.0).unwrap();
        let elsewhere = CallFingerprint::for_call("F", &args, other, 1.0).unwrap();
        let later = CallFingerprint::for_call("F", &args, CALLER, 2.0).unwrap();
        prop_assert_ne!(&here, &elsewhere);
        prop_assert_ne!(&here, &later);
    }

    #[test]
    fn a_grid_differs_from_its_flattened_row(value in grid()) {
        let XlValue::Array(rows) = &value else { unreachable!() };
        let flat: Vec<XlValue> = rows.iter().flatten().cloned().collect();
        let nested = CallFingerprint::for_call("F", &[value.clone()], CALLER, 1.0).unwrap();
        let spread = CallFingerprint::for_call("F", &flat, CALLER, 1.0).unwrap();
        prop_assert_ne!(nested, spread);
    }
}
