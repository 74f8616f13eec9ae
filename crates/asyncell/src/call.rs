//! The pluggable function that does the real work for a call.

use asyncell_common::{ExcelErrorKind, ResolvedReference, XlValue};
use thiserror::Error;
use tracing::debug;

use crate::host::Host;

/// References nested deeper than this convert to `#REF!`.
const MAX_REFERENCE_DEPTH: usize = 8;

/// Arguments as the host passed them, and with every reference replaced by
/// the value it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArguments {
    pub function_name: String,
    pub raw_args: Vec<XlValue>,
    pub converted_args: Vec<XlValue>,
}

impl CallArguments {
    pub fn new(function_name: impl Into<String>, raw_args: Vec<XlValue>) -> Self {
        let converted_args = raw_args.clone();
        Self {
            function_name: function_name.into(),
            raw_args,
            converted_args,
        }
    }

    /// Reads every referenced value from `host`.
    pub fn convert<H: Host + ?Sized>(host: &H, function_name: &str, raw_args: &[XlValue]) -> Self {
        Self {
            function_name: function_name.to_string(),
            raw_args: raw_args.to_vec(),
            converted_args: raw_args.iter().map(|v| convert_value(host, v, 0)).collect(),
        }
    }
}

fn convert_value<H: Host + ?Sized>(host: &H, value: &XlValue, depth: usize) -> XlValue {
    match value {
        XlValue::Reference(cell) => {
            if depth >= MAX_REFERENCE_DEPTH {
                return XlValue::Error(ExcelErrorKind::Ref);
            }
            match host.read_value(cell) {
                Ok(v) => convert_value(host, &v, depth + 1),
                Err(err) => {
                    debug!(%cell, %err, "reference could not be read");
                    XlValue::Error(ExcelErrorKind::Ref)
                }
            }
        }
        XlValue::Array(rows) => XlValue::Array(
            rows.iter()
                .map(|row| row.iter().map(|v| convert_value(host, v, depth)).collect())
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    /// An expected failure that already knows what the cell should show.
    #[error("{message}")]
    Evaluation {
        message: String,
        replacement: XlValue,
    },
    #[error("{0}")]
    Failed(String),
}

impl CallError {
    pub fn evaluation(message: impl Into<String>, replacement: impl Into<XlValue>) -> Self {
        CallError::Evaluation {
            message: message.into(),
            replacement: replacement.into(),
        }
    }
}

/// Text shown in place of a result when a call fails unexpectedly.
pub fn failure_text(function_name: &str) -> String {
    format!(
        "Function '{function_name}' was executed with errors. Contact application administrator for assistance."
    )
}

pub trait CallService: Send + Sync + 'static {
    fn call(&self, reference: &ResolvedReference, args: &CallArguments)
    -> Result<XlValue, CallError>;
}

impl<F> CallService for F
where
    F: Fn(&ResolvedReference, &CallArguments) -> Result<XlValue, CallError> + Send + Sync + 'static,
{
    fn call(
        &self,
        reference: &ResolvedReference,
        args: &CallArguments,
    ) -> Result<XlValue, CallError> {
        self(reference, args)
    }
}

/// Answers `#VALUE!` to everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallService;

impl CallService for NullCallService {
    fn call(&self, _: &ResolvedReference, _: &CallArguments) -> Result<XlValue, CallError> {
        Ok(XlValue::Error(ExcelErrorKind::Value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;
    use asyncell_common::{CellRef, SheetId};

    #[test]
    fn references_convert_to_values() {
        let host = TestHost::new()
            .with_value("Sheet1", "A1", 4.0)
            .with_value("Sheet1", "B1", "x");
        let s = host.sheet("Sheet1").unwrap();
        let raw = vec![
            XlValue::Reference(CellRef::cell(s, 0, 0)),
            XlValue::Array(vec![vec![XlValue::Reference(CellRef::cell(s, 0, 1)), 2.0.into()]]),
            XlValue::Reference(CellRef::cell(SheetId(99), 0, 0)),
        ];
        let args = CallArguments::convert(&host, "F", &raw);
        assert_eq!(args.raw_args, raw);
        assert_eq!(
            args.converted_args,
            vec![
                XlValue::Number(4.0),
                XlValue::Array(vec![vec!["x".into(), 2.0.into()]]),
                XlValue::Error(ExcelErrorKind::Ref),
            ]
        );
    }

    #[test]
    fn range_references_read_as_arrays() {
        let host = TestHost::new()
            .with_value("Sheet1", "A1", 1.0)
            .with_value("Sheet1", "A2", 2.0);
        let s = host.sheet("Sheet1").unwrap();
        let raw = vec![XlValue::Reference(CellRef::range(s, 0, 0, 2, 0))];
        let args = CallArguments::convert(&host, "F", &raw);
        assert_eq!(
            args.converted_args,
            vec![XlValue::Array(vec![
                vec![1.0.into()],
                vec![2.0.into()],
                vec![XlValue::Empty],
            ])]
        );
    }

    #[test]
    fn failure_text_names_the_function() {
        assert_eq!(
            failure_text("AsyncAdd"),
            "Function 'AsyncAdd' was executed with errors. Contact application administrator for assistance."
        );
    }
}
