//! A1-style range operands as they appear in formula text.
//!
//! Only the plain `[Sheet!]A1[:B2]` shape is understood. Whole rows and
//! columns, defined names, R1C1 text, external workbook references and
//! structured table references all parse to `None`.

use asyncell_common::{digits_to_row, letters_to_column};
use once_cell::sync::Lazy;
use regex::Regex;

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^
        (?: (?P<sheet> '(?:[^']|'')+' | [^!'\[\]:]+ ) ! )?
        \$?(?P<col1>[A-Za-z]{1,3}) \$?(?P<row1>[0-9]+)
        (?: : \$?(?P<col2>[A-Za-z]{1,3}) \$?(?P<row2>[0-9]+) )?
        $",
    )
    .expect("range operand regex")
});

/// A parsed range operand, 0-based, start is the top-left corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeOperand {
    pub sheet: Option<String>,
    pub start: (u32, u32),
    pub end: (u32, u32),
}

impl RangeOperand {
    pub fn parse(text: &str) -> Option<Self> {
        let caps = RANGE_RE.captures(text.trim())?;

        let sheet = match caps.name("sheet") {
            None => None,
            Some(m) => {
                let name = unquote_sheet(m.as_str());
                if name.is_empty() || name.starts_with('[') {
                    return None;
                }
                Some(name)
            }
        };

        let col1 = letters_to_column(&caps["col1"])?;
        let row1 = digits_to_row(&caps["row1"])?;
        let (row2, col2) = match (caps.name("row2"), caps.name("col2")) {
            (Some(r), Some(c)) => (digits_to_row(r.as_str())?, letters_to_column(c.as_str())?),
            _ => (row1, col1),
        };

        Some(RangeOperand {
            sheet,
            start: (row1.min(row2), col1.min(col2)),
            end: (row1.max(row2), col1.max(col2)),
        })
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }
}

fn unquote_sheet(raw: &str) -> String {
    match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => raw.to_string(),
    }
}
