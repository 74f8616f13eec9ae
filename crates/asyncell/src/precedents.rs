//! Lazy precedent discovery over formula text.
//!
//! Direct edges are parsed once per cell and memoised until the next batch;
//! transitive queries walk the memoised edges. Operands the A1 parser does
//! not understand (names, whole columns, `INDIRECT` results, external books)
//! produce no edge.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use asyncell_common::CellRef;
use asyncell_parse::{RangeOperand, Tokenizer};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::host::FormulaSource;

/// `parent`'s formula reads `reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedentEdge {
    pub reference: CellRef,
    pub parent: CellRef,
    /// First function called in the parent's formula.
    pub parent_function: Option<Arc<str>>,
}

/// A function known to be called at a cell. The name compares
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct CalledFunction {
    pub cell: CellRef,
    pub name: String,
}

impl CalledFunction {
    pub fn new(cell: CellRef, name: impl Into<String>) -> Self {
        Self {
            cell,
            name: name.into(),
        }
    }
}

impl PartialEq for CalledFunction {
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for CalledFunction {}

impl Hash for CalledFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cell.hash(state);
        for b in self.name.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

type Edges = Arc<[PrecedentEdge]>;

/// Ranges with more cells than this produce no edges.
pub const MAX_RANGE_CELLS: u64 = 1 << 16;

#[derive(Debug, Default)]
pub struct PrecedentResolver {
    direct: FxHashMap<CellRef, Edges>,
}

impl PrecedentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every memoised edge.
    pub fn clear(&mut self) {
        self.direct.clear();
    }

    pub fn cached_cells(&self) -> usize {
        self.direct.len()
    }

    /// Every cell `cell` depends on, directly or transitively, without
    /// duplicates, in discovery order.
    pub fn dependency_references<S: FormulaSource + ?Sized>(
        &mut self,
        source: &S,
        cell: &CellRef,
    ) -> Vec<CellRef> {
        let mut seen = FxHashSet::default();
        self.walk(source, cell)
            .into_iter()
            .filter(|edge| seen.insert(edge.reference))
            .map(|edge| edge.reference)
            .collect()
    }

    /// Functions called by the cells `cell` depends on, excluding `cell`
    /// itself, without duplicates.
    pub fn dependency_function_calls<S: FormulaSource + ?Sized>(
        &mut self,
        source: &S,
        cell: &CellRef,
    ) -> Vec<CalledFunction> {
        let mut seen = FxHashSet::default();
        self.walk(source, cell)
            .into_iter()
            .filter(|edge| edge.parent != *cell)
            .filter_map(|edge| {
                let name = edge.parent_function.as_deref()?;
                Some(CalledFunction::new(edge.parent, name))
            })
            .filter(|call| seen.insert(call.clone()))
            .collect()
    }

    /// Depth-first walk from `root` on an explicit stack. Each cell is
    /// expanded once; an edge back onto the current path is a cycle and is
    /// dropped with a warning.
    fn walk<S: FormulaSource + ?Sized>(&mut self, source: &S, root: &CellRef) -> Vec<PrecedentEdge> {
        let mut out = Vec::new();
        let mut expanded = FxHashSet::default();
        let mut on_path = FxHashSet::default();
        let mut stack: Vec<(CellRef, Edges, usize)> = Vec::new();

        expanded.insert(*root);
        on_path.insert(*root);
        stack.push((*root, self.direct_edges(source, root), 0));

        while let Some((cell, edges, next)) = stack.last_mut() {
            let Some(edge) = edges.get(*next).cloned() else {
                on_path.remove(&*cell);
                stack.pop();
                continue;
            };
            *next += 1;

            if on_path.contains(&edge.reference) {
                warn!(
                    cell = %edge.parent,
                    precedent = %edge.reference,
                    "dependency cycle; edge ignored"
                );
                continue;
            }
            let reference = edge.reference;
            out.push(edge);
            if expanded.insert(reference) {
                on_path.insert(reference);
                let edges = self.direct_edges(source, &reference);
                stack.push((reference, edges, 0));
            }
        }
        out
    }

    /// Memoised direct edges of `cell`.
    pub fn direct_edges<S: FormulaSource + ?Sized>(&mut self, source: &S, cell: &CellRef) -> Edges {
        if let Some(edges) = self.direct.get(cell) {
            return Arc::clone(edges);
        }
        let edges: Edges = parse_edges(source, cell).into_vec().into();
        self.direct.insert(*cell, Arc::clone(&edges));
        edges
    }
}

fn parse_edges<S: FormulaSource + ?Sized>(
    source: &S,
    cell: &CellRef,
) -> SmallVec<[PrecedentEdge; 4]> {
    let mut edges = SmallVec::new();

    match source.is_formula(cell) {
        Ok(true) => {}
        Ok(false) => return edges,
        Err(err) => {
            debug!(%cell, %err, "formula check failed");
            return edges;
        }
    }
    let text = match source.formula_text(cell) {
        Ok(text) => text,
        Err(err) => {
            debug!(%cell, %err, "formula text unavailable");
            return edges;
        }
    };
    let tokens = match Tokenizer::new(&text) {
        Ok(tokens) => tokens,
        Err(err) => {
            debug!(%cell, %err, formula = %text, "formula did not tokenize");
            return edges;
        }
    };

    let parent_function: Option<Arc<str>> = tokens.first_function().map(Arc::from);

    for token in tokens.ranges() {
        let Some(operand) = RangeOperand::parse(&token.value) else {
            trace!(%cell, operand = %token.value, "operand not resolvable");
            continue;
        };
        let sheet = match &operand.sheet {
            None => cell.sheet,
            Some(name) => match source.sheet_id(name) {
                Ok(id) => id,
                Err(err) => {
                    debug!(%cell, %err, "sheet of operand not found");
                    continue;
                }
            },
        };
        let (row_a, col_a) = operand.start;
        let (row_b, col_b) = operand.end;
        let size = u64::from(row_b - row_a + 1) * u64::from(col_b - col_a + 1);
        if size > MAX_RANGE_CELLS {
            warn!(%cell, operand = %token.value, size, "range too large to track; skipped");
            continue;
        }
        for col in col_a..=col_b {
            for row in row_a..=row_b {
                edges.push(PrecedentEdge {
                    reference: CellRef::cell(sheet, row, col),
                    parent: *cell,
                    parent_function: parent_function.clone(),
                });
            }
        }
    }

    edges
}
