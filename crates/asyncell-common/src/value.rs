use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::fmt::{self, Display};

use crate::{CellRef, ExcelErrorKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ───────────────────── serial-date encoding ───────────────────
Serial 1  = 1900-01-01, serial 60 is the phantom 1900-02-29 Excel
believes in, so dates from 1900-03-01 onwards carry +1. Time is the
fractional part of the day.
--------------------------------------------------------------- */

const SERIAL_EPOCH: NaiveDate = NaiveDate::from_ymd_opt(1899, 12, 31).unwrap();
const PHANTOM_LEAP_CUTOFF: NaiveDate = NaiveDate::from_ymd_opt(1900, 3, 1).unwrap();

pub fn datetime_to_serial(dt: &NaiveDateTime) -> f64 {
    let days = (dt.date() - SERIAL_EPOCH).num_days();
    let serial_days = if dt.date() >= PHANTOM_LEAP_CUTOFF {
        days + 1
    } else {
        days
    };

    let secs = dt.time().num_seconds_from_midnight() as f64
        + dt.time().nanosecond() as f64 / 1_000_000_000.0;
    serial_days as f64 + secs / 86_400.0
}

/// Placeholder returned while a cell waits on a busy precedent.
pub const SCHEDULED: &str = "Scheduled...";
/// Placeholder returned while a cell's own computation is in flight.
pub const CALCULATING: &str = "Calculating...";

/// Every shape a host value can take when it is passed to, or returned from,
/// an async function.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum XlValue {
    Number(f64),
    Int(i64),
    Text(String),
    Boolean(bool),
    Error(ExcelErrorKind),
    /// An empty cell.
    Empty,
    /// An omitted optional argument.
    Missing,
    /// An argument passed by reference rather than by value.
    Reference(CellRef),
    /// Rows of values; rows are expected to share one length.
    Array(Vec<Vec<XlValue>>),
}

impl XlValue {
    pub fn text(s: impl Into<String>) -> Self {
        XlValue::Text(s.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            XlValue::Number(n) => Some(*n),
            XlValue::Int(i) => Some(*i as f64),
            XlValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            XlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, XlValue::Error(_))
    }

    /// Sentinel text this value carries, if it is one of the placeholders.
    pub fn sentinel(&self) -> Option<&'static str> {
        match self {
            XlValue::Text(s) if s == SCHEDULED => Some(SCHEDULED),
            XlValue::Text(s) if s == CALCULATING => Some(CALCULATING),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.sentinel().is_some()
    }

    /// `(rows, cols)` of an array, `None` for every other shape.
    /// Ragged arrays also yield `None`.
    pub fn array_dims(&self) -> Option<(usize, usize)> {
        let XlValue::Array(rows) = self else {
            return None;
        };
        let cols = rows.first().map_or(0, Vec::len);
        rows.iter()
            .all(|r| r.len() == cols)
            .then_some((rows.len(), cols))
    }
}

impl Display for XlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XlValue::Number(n) => write!(f, "{n}"),
            XlValue::Int(i) => write!(f, "{i}"),
            XlValue::Text(s) => write!(f, "{s}"),
            XlValue::Boolean(true) => write!(f, "TRUE"),
            XlValue::Boolean(false) => write!(f, "FALSE"),
            XlValue::Error(e) => write!(f, "{e}"),
            XlValue::Empty | XlValue::Missing => Ok(()),
            XlValue::Reference(r) => write!(f, "{r}"),
            XlValue::Array(rows) => {
                write!(f, "{{")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, ";")?;
                    }
                    for (j, v) in row.iter().enumerate() {
                        if j > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{v}")?;
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<f64> for XlValue {
    fn from(n: f64) -> Self {
        XlValue::Number(n)
    }
}

impl From<i64> for XlValue {
    fn from(i: i64) -> Self {
        XlValue::Int(i)
    }
}

impl From<bool> for XlValue {
    fn from(b: bool) -> Self {
        XlValue::Boolean(b)
    }
}

impl From<&str> for XlValue {
    fn from(s: &str) -> Self {
        XlValue::Text(s.to_string())
    }
}

impl From<String> for XlValue {
    fn from(s: String) -> Self {
        XlValue::Text(s)
    }
}

impl From<ExcelErrorKind> for XlValue {
    fn from(kind: ExcelErrorKind) -> Self {
        XlValue::Error(kind)
    }
}

impl From<CellRef> for XlValue {
    fn from(r: CellRef) -> Self {
        XlValue::Reference(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn serial_matches_excel_1900_system() {
        assert_eq!(datetime_to_serial(&at(1900, 1, 1)), 1.0);
        assert_eq!(datetime_to_serial(&at(1900, 2, 28)), 59.0);
        assert_eq!(datetime_to_serial(&at(1900, 3, 1)), 61.0);
        assert_eq!(datetime_to_serial(&at(2024, 1, 1)), 45292.0);
    }

    #[test]
    fn serial_keeps_sub_second_resolution() {
        let base = at(2024, 1, 1);
        let later = base + chrono::Duration::milliseconds(5);
        assert!(datetime_to_serial(&later) > datetime_to_serial(&base));
    }

    #[test]
    fn array_dims_rejects_ragged_rows() {
        let square = XlValue::Array(vec![vec![1.0.into(), 2.0.into()], vec![3.0.into(), 4.0.into()]]);
        assert_eq!(square.array_dims(), Some((2, 2)));
        let ragged = XlValue::Array(vec![vec![1.0.into()], vec![3.0.into(), 4.0.into()]]);
        assert_eq!(ragged.array_dims(), None);
        assert_eq!(XlValue::Empty.array_dims(), None);
    }

    #[test]
    fn sentinels_are_exact_text() {
        assert!(XlValue::text("Scheduled...").is_sentinel());
        assert_eq!(XlValue::text(CALCULATING).sentinel(), Some(CALCULATING));
        assert!(!XlValue::text("scheduled...").is_sentinel());
        assert!(!XlValue::Number(1.0).is_sentinel());
    }

    #[test]
    fn display_renders_cell_text() {
        assert_eq!(XlValue::Error(ExcelErrorKind::Na).to_string(), "#N/A");
        assert_eq!(XlValue::Boolean(true).to_string(), "TRUE");
        assert_eq!(XlValue::Missing.to_string(), "");
        let arr = XlValue::Array(vec![vec![1.0.into(), "a".into()], vec![XlValue::Empty, 2i64.into()]]);
        assert_eq!(arr.to_string(), "{1,a;,2}");
    }
}
