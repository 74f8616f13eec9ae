//! Excel-style error codes as they travel through argument payloads and
//! computed results.
//!
//! Names are CamelCase while `Display` renders them exactly as Excel shows
//! them (`#DIV/0!`, …).

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// All error codes a host can hand to (or receive from) an async function.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExcelErrorKind {
    Null,
    Div,
    Value,
    Ref,
    Name,
    Num,
    Na,
    GettingData,
}

impl ExcelErrorKind {
    pub const ALL: [ExcelErrorKind; 8] = [
        Self::Null,
        Self::Div,
        Self::Value,
        Self::Ref,
        Self::Name,
        Self::Num,
        Self::Na,
        Self::GettingData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "#NULL!",
            Self::Div => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::Na => "#N/A",
            Self::GettingData => "#GETTING_DATA",
        }
    }

    /// Case-insensitive lookup of an error literal. Unknown text yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ExcelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for ExcelErrorKind {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ExcelErrorKind {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
