//! crates/asyncell/src/test_host.rs
//! --------------------------------
//! In-memory workbook host for unit tests, integration tests and the demo.
//!
//! Cells hold either a value or a formula of the form `=Func(arg, ...)`
//! whose arguments are literals or A1 references. [`TestHost::recalculate`]
//! plays the part of the host's recalculation loop: it re-invokes dirty
//! cells through the scheduler, marks dependents dirty when a displayed
//! value changes, and waits for worker notifications while anything still
//! shows a placeholder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use asyncell_common::{CellRef, ExcelErrorKind, ResolvedReference, SheetId, XlValue};
use asyncell_parse::{RangeOperand, TokenSubType, TokenType, Tokenizer};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::AsyncError;
use crate::fingerprint::CallFingerprint;
use crate::host::{FormulaSource, Host, HostError, RecalcNotifier};
use crate::scheduler::{AsyncScheduler, CalcResult};

#[derive(Debug, Clone)]
struct Cell {
    formula: Option<String>,
    value: XlValue,
}

#[derive(Default)]
struct Inner {
    workbook: String,
    sheets: Vec<(String, SheetId)>,
    cells: BTreeMap<CellRef, Cell>,
    caller: Option<CellRef>,
    caller_fault: bool,
    dirty: BTreeSet<CellRef>,
    forced: Vec<CellRef>,
    status: Vec<String>,
    throttle: Option<Duration>,
    non_volatile_marks: usize,
    invocations: FxHashMap<CellRef, usize>,
}

impl Inner {
    fn sheet(&self, name: &str) -> Option<SheetId> {
        self.sheets
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
    }

    fn sheet_name(&self, id: SheetId) -> Option<&str> {
        self.sheets
            .iter()
            .find(|(_, s)| *s == id)
            .map(|(n, _)| n.as_str())
    }

    fn ensure_sheet(&mut self, name: &str) -> SheetId {
        if let Some(id) = self.sheet(name) {
            return id;
        }
        let id = SheetId(self.sheets.len() as u64 + 1);
        self.sheets.push((name.to_string(), id));
        id
    }

    fn value(&self, cell: &CellRef) -> XlValue {
        self.cells
            .get(cell)
            .map(|c| c.value.clone())
            .unwrap_or(XlValue::Empty)
    }
}

/// Shared handle; clones see the same workbook.
#[derive(Clone)]
pub struct TestHost {
    inner: Arc<Mutex<Inner>>,
    wake: Arc<Condvar>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one [`TestHost::recalculate`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecalcReport {
    pub waves: usize,
    pub invocations: usize,
    /// False when the timeout hit while cells were still pending.
    pub settled: bool,
}

/// A parsed `=Func(args)` formula.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaCall {
    pub function_name: String,
    pub args: Vec<XlValue>,
}

impl TestHost {
    /* ─────────────── constructors ─────────────── */
    pub fn new() -> Self {
        let inner = Inner {
            workbook: "Book1".to_string(),
            ..Inner::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            wake: Arc::new(Condvar::new()),
        }
    }

    pub fn with_sheet(self, name: &str) -> Self {
        self.inner.lock().ensure_sheet(name);
        self
    }

    /* ─────────────── cell helpers ─────────────── */
    pub fn with_value(self, sheet: &str, a1: &str, value: impl Into<XlValue>) -> Self {
        let cell = self.cell(sheet, a1);
        self.inner.lock().cells.insert(
            cell,
            Cell {
                formula: None,
                value: value.into(),
            },
        );
        self
    }

    pub fn with_formula(self, sheet: &str, a1: &str, formula: &str) -> Self {
        let cell = self.cell(sheet, a1);
        self.inner.lock().cells.insert(
            cell,
            Cell {
                formula: Some(formula.to_string()),
                value: XlValue::Empty,
            },
        );
        self
    }

    pub fn sheet(&self, name: &str) -> Option<SheetId> {
        self.inner.lock().sheet(name)
    }

    /// Reference for `a1` on `sheet`, creating the sheet if needed.
    pub fn cell(&self, sheet: &str, a1: &str) -> CellRef {
        let op = RangeOperand::parse(a1).expect("bad A1 ref in TestHost::cell");
        let id = self.inner.lock().ensure_sheet(sheet);
        CellRef::range(id, op.start.0, op.start.1, op.end.0, op.end.1)
    }

    pub fn value(&self, cell: &CellRef) -> XlValue {
        self.inner.lock().value(cell)
    }

    /// Overwrite what the cell shows, keeping any formula. Formula cells
    /// that read it become dirty.
    pub fn set_value(&self, cell: &CellRef, value: impl Into<XlValue>) {
        self.store(*cell, value.into());
    }

    pub fn set_caller(&self, caller: Option<CellRef>) {
        self.inner.lock().caller = caller;
    }

    /// Make the next `caller()` queries fail.
    pub fn set_caller_fault(&self, fault: bool) {
        self.inner.lock().caller_fault = fault;
    }

    pub fn formula_cells(&self) -> Vec<CellRef> {
        self.inner
            .lock()
            .cells
            .iter()
            .filter(|(_, c)| c.formula.is_some())
            .map(|(r, _)| *r)
            .collect()
    }

    pub fn forced_recalcs(&self) -> Vec<CellRef> {
        self.inner.lock().forced.clone()
    }

    pub fn status_messages(&self) -> Vec<String> {
        self.inner.lock().status.clone()
    }

    pub fn throttle(&self) -> Option<Duration> {
        self.inner.lock().throttle
    }

    pub fn non_volatile_marks(&self) -> usize {
        self.inner.lock().non_volatile_marks
    }

    pub fn invocations(&self, cell: &CellRef) -> usize {
        self.inner
            .lock()
            .invocations
            .get(cell)
            .copied()
            .unwrap_or(0)
    }

    pub fn mark_dirty(&self, cell: CellRef) {
        self.inner.lock().dirty.insert(cell);
        self.wake.notify_all();
    }

    /* ─────────────── formula handling ─────────────── */

    /// Parse the cell's formula into a call. `None` for value cells and
    /// formulas that are not a single top-level function call.
    pub fn formula_call(&self, cell: &CellRef) -> Option<FormulaCall> {
        let text = self.inner.lock().cells.get(cell)?.formula.clone()?;
        let tokens = Tokenizer::new(&text).ok()?;
        let items: Vec<_> = tokens
            .items
            .iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
            .collect();

        let (first, rest) = items.split_first()?;
        let function_name = first.function_name()?.to_string();
        let (last, body) = rest.split_last()?;
        if last.token_type != TokenType::Func || last.subtype != TokenSubType::Close {
            return None;
        }

        let mut args = Vec::new();
        let mut current = Vec::new();
        let mut depth = 0usize;
        for token in body {
            match token.subtype {
                TokenSubType::Open => depth += 1,
                // the outer call closed early, e.g. `=F(1)+G(2)`
                TokenSubType::Close => depth = depth.checked_sub(1)?,
                _ => {}
            }
            if depth == 0 && token.token_type == TokenType::Sep && token.subtype == TokenSubType::Arg {
                args.push(self.argument(cell, &current));
                current.clear();
            } else {
                current.push(*token);
            }
        }
        if !body.is_empty() {
            args.push(self.argument(cell, &current));
        }

        Some(FormulaCall {
            function_name,
            args,
        })
    }

    fn argument(&self, cell: &CellRef, tokens: &[&asyncell_parse::Token]) -> XlValue {
        match tokens {
            [] => XlValue::Missing,
            [t] => self.operand(cell, t),
            [sign, t] if sign.token_type == TokenType::OpPrefix && sign.value == "-" => {
                match self.operand(cell, t) {
                    XlValue::Number(n) => XlValue::Number(-n),
                    _ => XlValue::Error(ExcelErrorKind::Value),
                }
            }
            _ => XlValue::Error(ExcelErrorKind::Value),
        }
    }

    fn operand(&self, cell: &CellRef, token: &asyncell_parse::Token) -> XlValue {
        if token.token_type != TokenType::Operand {
            return XlValue::Error(ExcelErrorKind::Value);
        }
        match token.subtype {
            TokenSubType::Number => token
                .value
                .parse::<f64>()
                .map(XlValue::Number)
                .unwrap_or(XlValue::Error(ExcelErrorKind::Value)),
            TokenSubType::Text => {
                let inner = &token.value[1..token.value.len() - 1];
                XlValue::Text(inner.replace("\"\"", "\""))
            }
            TokenSubType::Logical => XlValue::Boolean(token.value.eq_ignore_ascii_case("TRUE")),
            TokenSubType::Error => ExcelErrorKind::parse(&token.value)
                .map(XlValue::Error)
                .unwrap_or(XlValue::Error(ExcelErrorKind::Value)),
            TokenSubType::Range => match self.operand_ref(cell, &token.value) {
                Some(r) => XlValue::Reference(r),
                None => XlValue::Error(ExcelErrorKind::Name),
            },
            _ => XlValue::Error(ExcelErrorKind::Value),
        }
    }

    fn operand_ref(&self, cell: &CellRef, text: &str) -> Option<CellRef> {
        let op = RangeOperand::parse(text)?;
        let sheet = match &op.sheet {
            None => cell.sheet,
            Some(name) => self.sheet(name)?,
        };
        Some(CellRef::range(
            sheet, op.start.0, op.start.1, op.end.0, op.end.1,
        ))
    }

    /// Formula cells whose operands cover `cell`.
    fn dependents_of(&self, cell: &CellRef) -> Vec<CellRef> {
        let formulas: Vec<(CellRef, String)> = self
            .inner
            .lock()
            .cells
            .iter()
            .filter_map(|(r, c)| c.formula.clone().map(|f| (*r, f)))
            .collect();

        formulas
            .into_iter()
            .filter(|(owner, text)| {
                Tokenizer::new(text).is_ok_and(|tokens| {
                    tokens
                        .ranges()
                        .filter_map(|t| self.operand_ref(owner, &t.value))
                        .any(|r| r.contains(cell))
                })
            })
            .map(|(owner, _)| owner)
            .collect()
    }

    fn store(&self, cell: CellRef, value: XlValue) {
        let changed = {
            let mut inner = self.inner.lock();
            let entry = inner.cells.entry(cell).or_insert_with(|| Cell {
                formula: None,
                value: XlValue::Empty,
            });
            let changed = entry.value != value;
            entry.value = value;
            changed
        };
        if changed {
            for dependent in self.dependents_of(&cell) {
                self.mark_dirty(dependent);
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.inner
            .lock()
            .cells
            .values()
            .any(|c| c.value.is_sentinel())
    }

    /* ─────────────── recalculation driver ─────────────── */

    /// Evaluate one formula cell the way the host would: set it as the
    /// caller, run it through the scheduler, and show the outcome.
    pub fn invoke(
        &self,
        scheduler: &mut AsyncScheduler<TestHost>,
        cell: CellRef,
    ) -> Result<Option<CalcResult>, AsyncError> {
        let Some(call) = self.formula_call(&cell) else {
            return Ok(None);
        };

        {
            let mut inner = self.inner.lock();
            inner.caller = Some(cell);
            *inner.invocations.entry(cell).or_insert(0) += 1;
        }
        let outcome = scheduler.calc(&call.function_name, &call.args);
        self.inner.lock().caller = None;

        let result = outcome?;
        self.store(cell, result.clone().into_value());
        Ok(Some(result))
    }

    /// Mark every formula cell dirty, then [`recalculate`](Self::recalculate).
    pub fn recalculate_all(
        &self,
        scheduler: &mut AsyncScheduler<TestHost>,
        timeout: Duration,
    ) -> Result<RecalcReport, AsyncError> {
        {
            let mut inner = self.inner.lock();
            let formulas: Vec<_> = inner
                .cells
                .iter()
                .filter(|(_, c)| c.formula.is_some())
                .map(|(r, _)| *r)
                .collect();
            inner.dirty.extend(formulas);
        }
        self.recalculate(scheduler, timeout)
    }

    /// Re-invoke dirty cells in waves until nothing is dirty and no cell
    /// shows a placeholder, or `timeout` passes.
    pub fn recalculate(
        &self,
        scheduler: &mut AsyncScheduler<TestHost>,
        timeout: Duration,
    ) -> Result<RecalcReport, AsyncError> {
        let deadline = Instant::now() + timeout;
        let mut report = RecalcReport::default();

        loop {
            let wave = std::mem::take(&mut self.inner.lock().dirty);
            if wave.is_empty() {
                if !self.has_pending() {
                    report.settled = true;
                    return Ok(report);
                }
                let mut inner = self.inner.lock();
                while inner.dirty.is_empty() {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(report);
                    }
                    self.wake.wait_for(&mut inner, deadline - now);
                }
                continue;
            }

            report.waves += 1;
            for cell in wave {
                if self.invoke(scheduler, cell)?.is_some() {
                    report.invocations += 1;
                }
            }
        }
    }
}

impl FormulaSource for TestHost {
    fn is_formula(&self, cell: &CellRef) -> Result<bool, HostError> {
        let inner = self.inner.lock();
        if inner.sheet_name(cell.sheet).is_none() {
            return Err(HostError::Unavailable(*cell));
        }
        Ok(inner.cells.get(cell).is_some_and(|c| c.formula.is_some()))
    }

    fn formula_text(&self, cell: &CellRef) -> Result<String, HostError> {
        self.inner
            .lock()
            .cells
            .get(cell)
            .and_then(|c| c.formula.clone())
            .ok_or(HostError::Unavailable(*cell))
    }

    fn sheet_id(&self, name: &str) -> Result<SheetId, HostError> {
        self.sheet(name)
            .ok_or_else(|| HostError::UnknownSheet(name.to_string()))
    }
}

impl Host for TestHost {
    fn caller(&self) -> Result<CellRef, HostError> {
        let inner = self.inner.lock();
        if inner.caller_fault {
            return Err(HostError::Other("caller lookup failed".to_string()));
        }
        inner.caller.ok_or(HostError::NoCaller)
    }

    fn read_value(&self, cell: &CellRef) -> Result<XlValue, HostError> {
        let inner = self.inner.lock();
        if inner.sheet_name(cell.sheet).is_none() {
            return Err(HostError::Unavailable(*cell));
        }
        if cell.is_single_cell() {
            return Ok(inner.value(cell));
        }
        let rows = (cell.row_first..=cell.row_last)
            .map(|row| {
                (cell.col_first..=cell.col_last)
                    .map(|col| inner.value(&CellRef::cell(cell.sheet, row, col)))
                    .collect()
            })
            .collect();
        Ok(XlValue::Array(rows))
    }

    fn resolve(&self, cell: &CellRef) -> Result<ResolvedReference, HostError> {
        let inner = self.inner.lock();
        let sheet = inner
            .sheet_name(cell.sheet)
            .ok_or(HostError::Unavailable(*cell))?;
        Ok(ResolvedReference::new(inner.workbook.clone(), sheet, *cell))
    }

    fn queue_force_recalculate(&self, cell: &CellRef) -> Result<(), HostError> {
        {
            let mut inner = self.inner.lock();
            if !inner.cells.get(cell).is_some_and(|c| c.formula.is_some()) {
                return Err(HostError::Unavailable(*cell));
            }
            inner.forced.push(*cell);
        }
        self.mark_dirty(*cell);
        Ok(())
    }

    fn mark_non_volatile(&self) {
        self.inner.lock().non_volatile_marks += 1;
    }

    fn set_throttle_interval(&self, interval: Duration) {
        self.inner.lock().throttle = Some(interval);
    }

    fn throttle_interval(&self) -> Option<Duration> {
        self.inner.lock().throttle
    }

    fn queue_status_message(&self, text: &str) {
        self.inner.lock().status.push(text.to_string());
    }
}

impl RecalcNotifier for TestHost {
    fn result_ready(&self, caller: &CellRef, _fingerprint: &CallFingerprint) {
        self.mark_dirty(*caller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_call_parses_literals_and_references() {
        let host = TestHost::new()
            .with_sheet("Sheet1")
            .with_sheet("Other")
            .with_formula("Sheet1", "C1", "=AsyncAdd(A1, -2.5, \"a\"\"b\", TRUE, , Other!B2:C3, #N/A)");
        let c1 = host.cell("Sheet1", "C1");
        let call = host.formula_call(&c1).unwrap();
        assert_eq!(call.function_name, "AsyncAdd");
        assert_eq!(
            call.args,
            vec![
                XlValue::Reference(host.cell("Sheet1", "A1")),
                XlValue::Number(-2.5),
                XlValue::text("a\"b"),
                XlValue::Boolean(true),
                XlValue::Missing,
                XlValue::Reference(host.cell("Other", "B2:C3")),
                XlValue::Error(ExcelErrorKind::Na),
            ]
        );
    }

    #[test]
    fn value_changes_dirty_dependents() {
        let host = TestHost::new()
            .with_value("Sheet1", "A1", 1.0)
            .with_formula("Sheet1", "B1", "=F(A1)")
            .with_formula("Sheet1", "C1", "=F(2)");
        let a1 = host.cell("Sheet1", "A1");
        host.set_value(&a1, 5.0);
        let dirty: Vec<_> = host.inner.lock().dirty.iter().copied().collect();
        assert_eq!(dirty, vec![host.cell("Sheet1", "B1")]);
    }

    #[test]
    fn host_queries() {
        let host = TestHost::new().with_value("Data", "B2", "x");
        let b2 = host.cell("Data", "B2");
        assert_eq!(host.read_value(&b2).unwrap(), XlValue::text("x"));
        assert_eq!(
            host.resolve(&b2).unwrap(),
            ResolvedReference::new("Book1", "Data", b2)
        );
        assert!(!host.is_formula(&b2).unwrap());
        assert!(host.formula_text(&b2).is_err());
        assert_eq!(host.sheet_id("data").unwrap(), b2.sheet);
        assert_eq!(host.caller(), Err(HostError::NoCaller));
        assert!(host.read_value(&CellRef::cell(SheetId(42), 0, 0)).is_err());
    }
}
