//! Log-context strings for calls, argument values and references.

use asyncell_common::{ResolvedReference, XlValue};

use crate::state::StateCounts;

/// `[functionName='AsyncAdd', args='1, 'x', #Missing']`
pub fn describe_call(function_name: &str, args: &[XlValue]) -> String {
    format!(
        "[functionName='{function_name}', args='{}']",
        describe_values(args)
    )
}

pub fn describe_values(values: &[XlValue]) -> String {
    values
        .iter()
        .map(describe_value)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn describe_value(value: &XlValue) -> String {
    match value {
        XlValue::Number(n) => n.to_string(),
        XlValue::Int(i) => i.to_string(),
        XlValue::Text(s) => format!("'{s}'"),
        XlValue::Boolean(b) => b.to_string(),
        XlValue::Error(e) => format!("#Error-{e}"),
        XlValue::Empty => "#Empty".to_string(),
        XlValue::Missing => "#Missing".to_string(),
        XlValue::Reference(r) => format!("#Ref-{}", r.r1c1()),
        XlValue::Array(rows) if rows.len() == 1 => format!("{{{}}}", describe_values(&rows[0])),
        XlValue::Array(rows) => {
            let inner = rows
                .iter()
                .map(|row| format!("{{{}}}", describe_values(row)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{inner}}}")
        }
    }
}

pub fn describe_reference(reference: Option<&ResolvedReference>) -> String {
    let Some(r) = reference else {
        return "[Reference is not available]".to_string();
    };
    match (&r.workbook, &r.worksheet) {
        (None, None) => "[Reference is empty]".to_string(),
        (workbook, worksheet) => format!(
            "[Workbook='{}', sheet='{}', range='{}']",
            workbook.as_deref().unwrap_or_default(),
            worksheet.as_deref().unwrap_or_default(),
            r.range()
        ),
    }
}

/// Status-bar text for the current batch; empty once nothing is pending.
pub fn status_line(batch_id: u64, counts: StateCounts) -> String {
    if counts.all_finished() {
        return String::new();
    }
    format!(
        "{batch_id}: Evaluating async funcs ({} calculating, {} calculated, {} scheduled)...",
        counts.calculating, counts.calculated, counts.scheduled
    )
}
