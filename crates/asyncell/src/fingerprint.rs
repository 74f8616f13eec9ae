//! Value-equality keys for async calls.
//!
//! A fingerprint is the function name plus a [`Payload`] tree built from the
//! raw arguments, the calling reference, and the batch stamp. Two calls with
//! the same fingerprint are the same logical request and share one
//! computation.

use std::fmt;
use std::hash::{Hash, Hasher};

use asyncell_common::{CellRef, ExcelErrorKind, XlValue};
use rustc_hash::FxHasher;

use crate::error::AsyncError;

/// Leaf of a payload. Numbers are kept as canonical bit patterns so that
/// equality and hashing agree (`-0.0 == 0.0`, every NaN is one NaN).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    Number(u64),
    Int(i64),
    Text(String),
    Boolean(bool),
    Error(ExcelErrorKind),
    Empty,
    Missing,
}

impl Scalar {
    pub fn number(n: f64) -> Self {
        let canonical = if n == 0.0 {
            0.0f64
        } else if n.is_nan() {
            f64::NAN
        } else {
            n
        };
        Scalar::Number(canonical.to_bits())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    Scalar(Scalar),
    Reference(CellRef),
    Row(Vec<Payload>),
    /// Row-major cells of a `rows × cols` grid.
    Grid {
        rows: usize,
        cols: usize,
        cells: Vec<Payload>,
    },
}

impl Payload {
    pub fn from_value(value: &XlValue) -> Result<Self, AsyncError> {
        Ok(match value {
            XlValue::Number(n) => Payload::Scalar(Scalar::number(*n)),
            XlValue::Int(i) => Payload::Scalar(Scalar::Int(*i)),
            XlValue::Text(s) => Payload::Scalar(Scalar::Text(s.clone())),
            XlValue::Boolean(b) => Payload::Scalar(Scalar::Boolean(*b)),
            XlValue::Error(e) => Payload::Scalar(Scalar::Error(*e)),
            XlValue::Empty => Payload::Scalar(Scalar::Empty),
            XlValue::Missing => Payload::Scalar(Scalar::Missing),
            XlValue::Reference(r) => Payload::Reference(*r),
            XlValue::Array(rows) => {
                let (n_rows, n_cols) =
                    value
                        .array_dims()
                        .ok_or_else(|| AsyncError::InvalidPayload {
                            reason: format!(
                                "array rows differ in length ({})",
                                rows.iter()
                                    .map(|r| r.len().to_string())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ),
                        })?;
                let cells = rows
                    .iter()
                    .flatten()
                    .map(Payload::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Payload::Grid {
                    rows: n_rows,
                    cols: n_cols,
                    cells,
                }
            }
        })
    }

    pub fn row(values: &[XlValue]) -> Result<Self, AsyncError> {
        values
            .iter()
            .map(Payload::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Payload::Row)
    }
}

/// `(function name, payload)` with its hash computed once.
///
/// The name is compared exactly; registration lookups are the only
/// case-insensitive step.
#[derive(Debug, Clone)]
pub struct CallFingerprint {
    function_name: String,
    payload: Payload,
    hash: u64,
}

impl CallFingerprint {
    pub fn new(function_name: impl Into<String>, payload: Payload) -> Self {
        let function_name = function_name.into();
        let mut hasher = FxHasher::default();
        function_name.hash(&mut hasher);
        payload.hash(&mut hasher);
        Self {
            function_name,
            payload,
            hash: hasher.finish(),
        }
    }

    /// Key for one invocation: the raw arguments followed by the caller and
    /// the batch stamp, so the same arguments in two cells or two batches
    /// never share a computation.
    pub fn for_call(
        function_name: &str,
        raw_args: &[XlValue],
        caller: CellRef,
        batch_stamp: f64,
    ) -> Result<Self, AsyncError> {
        let mut items = Vec::with_capacity(raw_args.len() + 2);
        for arg in raw_args {
            items.push(Payload::from_value(arg)?);
        }
        items.push(Payload::Reference(caller));
        items.push(Payload::Scalar(Scalar::number(batch_stamp)));
        Ok(Self::new(function_name, Payload::Row(items)))
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl PartialEq for CallFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.function_name == other.function_name
            && self.payload == other.payload
    }
}

impl Eq for CallFingerprint {}

impl Hash for CallFingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:016x}", self.function_name, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncell_common::SheetId;

    const CALLER: CellRef = CellRef::cell(SheetId(1), 0, 0);

    #[test]
    fn zero_signs_and_nans_collapse() {
        assert_eq!(Scalar::number(0.0), Scalar::number(-0.0));
        assert_eq!(Scalar::number(f64::NAN), Scalar::number(-f64::NAN));
        assert_ne!(Scalar::number(1.0), Scalar::number(1.0 + f64::EPSILON));
    }

    #[test]
    fn ragged_array_is_a_usage_error() {
        let ragged = XlValue::Array(vec![vec![1.0.into()], vec![]]);
        let err = CallFingerprint::for_call("F", &[ragged], CALLER, 1.0).unwrap_err();
        assert!(matches!(err, AsyncError::InvalidPayload { .. }));
    }

    #[test]
    fn name_is_compared_exactly() {
        let a = CallFingerprint::for_call("AsyncAdd", &[1.0.into()], CALLER, 1.0).unwrap();
        let b = CallFingerprint::for_call("asyncadd", &[1.0.into()], CALLER, 1.0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn caller_and_stamp_are_part_of_the_key() {
        let args = [XlValue::from(2.0), XlValue::from(3.0)];
        let base = CallFingerprint::for_call("Add", &args, CALLER, 45292.5).unwrap();
        let other_cell =
            CallFingerprint::for_call("Add", &args, CellRef::cell(SheetId(1), 0, 1), 45292.5)
                .unwrap();
        let other_batch = CallFingerprint::for_call("Add", &args, CALLER, 45292.6).unwrap();
        assert_ne!(base, other_cell);
        assert_ne!(base, other_batch);
        assert_eq!(
            base,
            CallFingerprint::for_call("Add", &args, CALLER, 45292.5).unwrap()
        );
    }

    #[test]
    fn grid_shape_matters() {
        let one_by_two = XlValue::Array(vec![vec![1.0.into(), 2.0.into()]]);
        let two_by_one = XlValue::Array(vec![vec![1.0.into()], vec![2.0.into()]]);
        assert_ne!(
            Payload::from_value(&one_by_two).unwrap(),
            Payload::from_value(&two_by_one).unwrap()
        );
    }
}
