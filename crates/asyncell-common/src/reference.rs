//! Sheet-scoped rectangular references handed out by the host.

use std::fmt;

use crate::coord::column_to_letters;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque host handle for a worksheet. Two sheets with the same name in
/// different workbooks carry different ids.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetId(pub u64);

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sheet#{}", self.0)
    }
}

/// Inclusive rectangular region of one sheet, 0-based.
///
/// Equality and hashing are structural: two references are the same iff the
/// sheet handle and all four coordinates match.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub sheet: SheetId,
    pub row_first: u32,
    pub row_last: u32,
    pub col_first: u32,
    pub col_last: u32,
}

impl CellRef {
    /// Single-cell reference.
    pub const fn cell(sheet: SheetId, row: u32, col: u32) -> Self {
        Self {
            sheet,
            row_first: row,
            row_last: row,
            col_first: col,
            col_last: col,
        }
    }

    /// Rectangular reference; corners may be given in any order.
    pub fn range(sheet: SheetId, row_a: u32, col_a: u32, row_b: u32, col_b: u32) -> Self {
        Self {
            sheet,
            row_first: row_a.min(row_b),
            row_last: row_a.max(row_b),
            col_first: col_a.min(col_b),
            col_last: col_a.max(col_b),
        }
    }

    pub fn is_single_cell(&self) -> bool {
        self.row_first == self.row_last && self.col_first == self.col_last
    }

    pub fn height(&self) -> u32 {
        self.row_last - self.row_first + 1
    }

    pub fn width(&self) -> u32 {
        self.col_last - self.col_first + 1
    }

    /// Constituent single cells, row by row.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        let sheet = self.sheet;
        (self.row_first..=self.row_last).flat_map(move |row| {
            (self.col_first..=self.col_last).map(move |col| CellRef::cell(sheet, row, col))
        })
    }

    pub fn contains(&self, other: &CellRef) -> bool {
        self.sheet == other.sheet
            && self.row_first <= other.row_first
            && other.row_last <= self.row_last
            && self.col_first <= other.col_first
            && other.col_last <= self.col_last
    }

    /// A1 text without the sheet, e.g. `B2` or `A1:C2`.
    pub fn a1(&self) -> String {
        let corner = |row: u32, col: u32| format!("{}{}", column_to_letters(col), row + 1);
        if self.is_single_cell() {
            corner(self.row_first, self.col_first)
        } else {
            format!(
                "{}:{}",
                corner(self.row_first, self.col_first),
                corner(self.row_last, self.col_last)
            )
        }
    }

    /// 1-based R1C1 text of the whole rectangle, e.g. `R1C1:R2C3`.
    pub fn r1c1(&self) -> String {
        format!(
            "R{}C{}:R{}C{}",
            self.row_first + 1,
            self.col_first + 1,
            self.row_last + 1,
            self.col_last + 1
        )
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.r1c1())
    }
}

/// A [`CellRef`] as the host names it: workbook and worksheet text plus the
/// coordinates. This is what the call service receives.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedReference {
    pub workbook: Option<String>,
    pub worksheet: Option<String>,
    pub cell: CellRef,
}

impl ResolvedReference {
    pub fn new(workbook: impl Into<String>, worksheet: impl Into<String>, cell: CellRef) -> Self {
        Self {
            workbook: Some(workbook.into()),
            worksheet: Some(worksheet.into()),
            cell,
        }
    }

    /// Coordinates only, for when the host could not supply names.
    pub fn unresolved(cell: CellRef) -> Self {
        Self {
            workbook: None,
            worksheet: None,
            cell,
        }
    }

    pub fn range(&self) -> String {
        self.cell.r1c1()
    }
}
