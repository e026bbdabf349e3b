//! Formula evaluation for one sheet.
//!
//! An [`Evaluator`] is bound to the sheet whose formulas it evaluates and to
//! the registry used for cross-sheet references. `evaluate` runs
//! preprocess -> compile -> resolve inputs -> execute, reading input cells
//! through the cell value accessor, which evaluates other formula cells
//! recursively (across sheets if needed). The evaluator's [`CircularGuard`]
//! spans that whole recursion.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::deps::{find_cross_sheet_dependents, find_dependent_cells};
use super::eval::{ExpressionEngine, InputValue, Inputs, RhaiEngine};
use super::formula::InputRef;
use super::preprocess::{preprocess, qualified_target};
use super::resolve::{parse_cell_reference, parse_sheet_qualified};
use super::{
    CellRef, CellType, CircularGuard, EngineConfig, FormulaError, SheetHandle, SheetModel,
    SheetRegistry, Value,
};

/// A formula cell whose cached value was invalidated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellChange {
    pub sheet: String,
    pub cell: CellRef,
}

type Listener = Box<dyn Fn(&CellChange) + Send + Sync>;

pub struct Evaluator<E: ExpressionEngine = RhaiEngine> {
    sheet_name: String,
    sheet: SheetHandle,
    registry: Arc<SheetRegistry>,
    engine: Arc<E>,
    guard: CircularGuard,
    config: EngineConfig,
    listeners: Vec<Listener>,
}

impl Evaluator<RhaiEngine> {
    pub fn new(sheet_name: &str, sheet: SheetHandle, registry: Arc<SheetRegistry>) -> Self {
        Self::with_engine(sheet_name, sheet, registry, Arc::new(RhaiEngine::new()))
    }
}

impl<E: ExpressionEngine> Evaluator<E> {
    pub fn with_engine(
        sheet_name: &str,
        sheet: SheetHandle,
        registry: Arc<SheetRegistry>,
        engine: Arc<E>,
    ) -> Self {
        Evaluator {
            sheet_name: sheet_name.to_string(),
            sheet,
            registry,
            engine,
            guard: CircularGuard::new(),
            config: EngineConfig::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn sheet(&self) -> &SheetHandle {
        &self.sheet
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a callback for cells invalidated by `recalculate_dependents`.
    pub fn subscribe(&mut self, listener: impl Fn(&CellChange) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Evaluate `formula` as if it were stored at (`row`, `col`) of this sheet.
    ///
    /// Text that does not start with `=` is returned as a literal. Failures are
    /// returned in-band as [`Value::Error`].
    pub fn evaluate(&self, formula: &str, row: usize, col: usize) -> Value {
        self.evaluate_in(&self.sheet_name, self.sheet.as_ref(), formula, row, col)
    }

    /// Value of the cell at (`row`, `col`) of this sheet, evaluating (and
    /// caching through the sheet model) if it holds a formula.
    pub fn value_at(&self, row: usize, col: usize) -> Value {
        self.read_cell(&self.sheet_name, self.sheet.as_ref(), CellRef::new(row, col))
    }

    /// Arithmetic-ready value of a reference (`B3`, `model.2`, `'Rate Card'!A1`).
    /// Unresolvable references read as 0.
    pub fn cell_value(&self, reference: &str) -> Value {
        let (sheet_name, target) = parse_sheet_qualified(reference);
        let (name, sheet) = match sheet_name {
            Some(name) => match self.registry.lookup(&name) {
                Some(sheet) => (name, sheet),
                None => {
                    log::warn!("reference to unknown sheet '{}'", name);
                    return Value::zero();
                }
            },
            None => (self.sheet_name.clone(), self.sheet.clone()),
        };
        match qualified_target(target, 0, sheet.as_ref()) {
            Ok(Some(cell)) => self.read_cell(&name, sheet.as_ref(), cell),
            _ => Value::zero(),
        }
    }

    /// Values of an `A1:B2` range on this sheet, rows top to bottom.
    /// A malformed range, or one reaching outside the sheet, reads as `[[0]]`.
    pub fn range_values(&self, range: &str) -> Vec<Vec<Value>> {
        let sheet = self.sheet.as_ref();
        let corners = range.split_once(':').and_then(|(a, b)| {
            Some((parse_cell_reference(a, sheet)?, parse_cell_reference(b, sheet)?))
        });
        match corners {
            Some((a, b)) => self.read_range(&self.sheet_name, sheet, a, b),
            None => vec![vec![Value::zero()]],
        }
    }

    /// Cells on this sheet whose formulas reference (`row`, `col`).
    pub fn find_dependent_cells(&self, row: usize, col: usize) -> HashSet<CellRef> {
        find_dependent_cells(self.sheet.as_ref(), row, col, &self.config)
    }

    /// Invalidate every formula that (transitively) depends on (`row`, `col`),
    /// on this sheet or on any registered sheet reaching it by name, and notify
    /// listeners. Values are recomputed on the next read.
    pub fn recalculate_dependents(&self, row: usize, col: usize) -> Vec<CellChange> {
        let mut changes = Vec::new();
        let mut seen: HashSet<(String, CellRef)> = HashSet::new();
        let mut queue: VecDeque<(String, SheetHandle, CellRef)> = VecDeque::new();
        queue.push_back((self.sheet_name.clone(), self.sheet.clone(), CellRef::new(row, col)));
        seen.insert((self.sheet_name.to_lowercase(), CellRef::new(row, col)));

        while let Some((name, sheet, cell)) = queue.pop_front() {
            let mut found: Vec<(String, SheetHandle, CellRef)> =
                find_dependent_cells(sheet.as_ref(), cell.row, cell.col, &self.config)
                    .into_iter()
                    .map(|dep| (name.clone(), sheet.clone(), dep))
                    .collect();
            for (other_name, other) in self.registry.sheets() {
                if other_name.eq_ignore_ascii_case(&name) {
                    continue;
                }
                let deps =
                    find_cross_sheet_dependents(&name, sheet.as_ref(), cell.row, cell.col, other.as_ref());
                found.extend(deps.into_iter().map(|dep| (other_name.clone(), other.clone(), dep)));
            }

            for (dep_name, dep_sheet, dep) in found {
                if !seen.insert((dep_name.to_lowercase(), dep)) {
                    continue;
                }
                if dep_sheet.raw_value(dep.row, dep.col).formula().is_none() {
                    continue;
                }
                dep_sheet.mark_dirty(dep.row, dep.col);
                let change = CellChange {
                    sheet: dep_name.clone(),
                    cell: dep,
                };
                log::debug!("invalidated {}!{}", change.sheet, change.cell);
                for listener in &self.listeners {
                    listener(&change);
                }
                changes.push(change);
                queue.push_back((dep_name, dep_sheet, dep));
            }
        }
        changes
    }

    fn evaluate_in(
        &self,
        name: &str,
        sheet: &dyn SheetModel,
        formula: &str,
        row: usize,
        col: usize,
    ) -> Value {
        let Some(body) = formula.trim_start().strip_prefix('=') else {
            if formula.trim().is_empty() {
                return Value::Empty;
            }
            return Value::Text(formula.to_string());
        };

        let Some(_token) = self.guard.enter(name, row, col) else {
            return Value::Error(FormulaError::Circular);
        };

        let mut fetch = |sheet_name: &str, target: &str| -> Option<Value> {
            let other = self.registry.lookup(sheet_name)?;
            let other_name = self
                .registry
                .canonical_name(sheet_name)
                .unwrap_or_else(|| sheet_name.to_string());
            Some(match qualified_target(target, row, other.as_ref()) {
                Ok(Some(cell)) => self.read_cell(&other_name, other.as_ref(), cell),
                Ok(None) => Value::zero(),
                Err(e) => Value::Error(e),
            })
        };
        let text = preprocess(body, row, col, sheet, &mut fetch);

        match self.run(name, sheet, &text) {
            // A formula pointing at a blank cell shows 0, as spreadsheets do.
            Ok(Value::Empty) => Value::zero(),
            Ok(value) => value.normalized(self.config.precision_digits),
            Err(e) => {
                log::debug!("{}!{} = {} failed: {}", name, CellRef::new(row, col), formula, e);
                Value::Error(e)
            }
        }
    }

    fn run(&self, name: &str, sheet: &dyn SheetModel, text: &str) -> Result<Value, FormulaError> {
        let compiled = self.engine.compile(text)?;

        let mut inputs = Inputs::new();
        for input in self.engine.inputs(&compiled) {
            let value = match input {
                InputRef::Cell(cell) => {
                    let value = self.read_cell(name, sheet, cell);
                    if let Some(e) = value.as_error() {
                        return Err(e);
                    }
                    InputValue::Scalar(value)
                }
                InputRef::Range(a, b) => {
                    let rows = self.read_range(name, sheet, a, b);
                    if let Some(e) = rows.iter().flatten().find_map(Value::as_error) {
                        return Err(e);
                    }
                    InputValue::Range(rows)
                }
            };
            inputs.insert(input, value);
        }

        self.engine.execute(&compiled, &inputs)
    }

    /// The cell value accessor.
    fn read_cell(&self, name: &str, sheet: &dyn SheetModel, cell: CellRef) -> Value {
        if cell.row >= sheet.row_count() || cell.col >= sheet.column_count() {
            return Value::zero();
        }
        match sheet.raw_value(cell.row, cell.col) {
            CellType::Empty => Value::Empty,
            CellType::Number(n) => Value::normalize_number(n, self.config.precision_digits),
            CellType::Text(s) => Value::from_display_text(&s),
            CellType::Formula(f) => {
                if let Some(cached) = sheet.display_value(cell.row, cell.col) {
                    return cached;
                }
                let value = self.evaluate_in(name, sheet, &f, cell.row, cell.col);
                if value != Value::Error(FormulaError::Circular) {
                    sheet.store_display(cell.row, cell.col, &value);
                }
                value
            }
        }
    }

    fn read_range(&self, name: &str, sheet: &dyn SheetModel, a: CellRef, b: CellRef) -> Vec<Vec<Value>> {
        let in_bounds =
            |c: CellRef| c.row < sheet.row_count() && c.col < sheet.column_count();
        if !in_bounds(a) || !in_bounds(b) {
            return vec![vec![Value::zero()]];
        }
        let (top, bottom) = (a.row.min(b.row), a.row.max(b.row));
        let (left, right) = (a.col.min(b.col), a.col.max(b.col));
        (top..=bottom)
            .map(|row| {
                (left..=right)
                    .map(|col| self.read_cell(name, sheet, CellRef::new(row, col)))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sheet::testing::MemSheet;
    use std::sync::Mutex;

    fn evaluator(fields: &[&str], rows: &[&[&str]]) -> Evaluator {
        Evaluator::new("Line Items", MemSheet::handle(fields, rows), Arc::new(SheetRegistry::new()))
    }

    #[test]
    fn test_literal_passthrough() {
        let ev = evaluator(&[], &[]);
        assert_eq!(ev.evaluate("Shot 1", 0, 0), Value::Text("Shot 1".into()));
        assert_eq!(ev.evaluate("Shot 1", 0, 0), ev.evaluate("Shot 1", 0, 0));
        assert_eq!(ev.evaluate("", 0, 0), Value::Empty);
    }

    #[test]
    fn test_integer_result() {
        let ev = evaluator(&[], &[]);
        assert_eq!(ev.evaluate("=2+2", 0, 0), Value::Int(4));
        assert_eq!(ev.evaluate("=0.1+0.2", 0, 0), Value::Number(0.3));
    }

    #[test]
    fn test_cell_value_coercion() {
        let ev = evaluator(&["a", "b"], &[&["25%", "$1,200"], &["abc", ""]]);
        assert_eq!(ev.cell_value("A1"), Value::Number(0.25));
        assert_eq!(ev.cell_value("$B$1"), Value::Number(1200.0));
        assert_eq!(ev.cell_value("A2"), Value::Text("abc".into()));
        assert_eq!(ev.cell_value("B2"), Value::Empty);
        assert_eq!(ev.cell_value("Z99"), Value::zero());
        assert_eq!(ev.cell_value("b.1"), Value::Number(1200.0));
    }

    #[test]
    fn test_nan_and_inf_are_text() {
        let ev = evaluator(&["code", "n"], &[&["nan", "1"], &["inf", "2"]]);
        assert_eq!(ev.cell_value("A1"), Value::Text("nan".into()));
        assert_eq!(ev.evaluate("=A2&\"x\"", 0, 2), Value::Text("infx".into()));
        assert_eq!(ev.evaluate("=SUM(A1:B2)", 0, 2), Value::Int(3));
    }

    #[test]
    fn test_single_letter_fields() {
        let ev = evaluator(&["x", "y"], &[&["3", "4"]]);
        assert_eq!(ev.evaluate("=x*y", 0, 2), Value::Int(12));
        assert_eq!(ev.evaluate("=x.1*2", 0, 2), Value::Int(6));
    }

    #[test]
    fn test_indirect_inside_string_is_text() {
        let ev = evaluator(&["a"], &[&["5"]]);
        assert_eq!(ev.evaluate("=\"INDIRECT(x)\"", 0, 1), Value::Text("INDIRECT(x)".into()));
        assert_eq!(ev.evaluate("=INDIRECT(\"A\"&1)*2", 0, 1), Value::Int(10));
    }

    #[test]
    fn test_blank_reference_reads_zero() {
        let ev = evaluator(&["a", "b"], &[&["1", ""]]);
        assert_eq!(ev.evaluate("=B1", 0, 2), Value::Int(0));
        assert_eq!(ev.evaluate("=B1+1", 0, 2), Value::Int(1));
    }

    #[test]
    fn test_range_values() {
        let ev = evaluator(&["a", "b"], &[&["1", "2"], &["3", "4"]]);
        assert_eq!(
            ev.range_values("B2:A1"),
            vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3), Value::Int(4)]]
        );
        assert_eq!(ev.range_values("A1"), vec![vec![Value::zero()]]);
        assert_eq!(ev.range_values("A1:C9"), vec![vec![Value::zero()]]);
    }

    #[test]
    fn test_circular_reference() {
        let ev = evaluator(&["a", "b"], &[&["=B1", "=A1"]]);
        assert_eq!(ev.evaluate("=B1", 0, 0), Value::Error(FormulaError::Circular));
        assert_eq!(ev.guard.depth(), 0);
        assert_eq!(ev.evaluate("=A1+1", 0, 0), Value::Error(FormulaError::Circular));
    }

    #[test]
    fn test_error_sentinels() {
        let ev = evaluator(&["a"], &[&["1"]]);
        assert_eq!(ev.evaluate("=1+", 0, 0), Value::Error(FormulaError::Parse));
        assert_eq!(ev.evaluate("=FOO(1)", 0, 0), Value::Error(FormulaError::NotSupported));
        assert_eq!(ev.evaluate("=\"a\"*2", 0, 0), Value::Error(FormulaError::Eval));
        assert_eq!(ev.evaluate("='Missing'!x", 0, 0), Value::Error(FormulaError::Ref));
        assert_eq!(ev.evaluate("=nothing.1", 0, 0), Value::Error(FormulaError::Ref));
        assert_eq!(ev.guard.depth(), 0);
    }

    #[test]
    fn test_errors_propagate_from_inputs() {
        let ev = evaluator(&["a", "b"], &[&["=1/0", "=A1+1"]]);
        assert_eq!(ev.evaluate("=SUM(A1:B1)", 0, 2), Value::Error(FormulaError::Eval));
        assert_eq!(ev.evaluate("=B1", 0, 2), Value::Error(FormulaError::Eval));
    }

    #[test]
    fn test_recalculate_notifies_listeners() {
        let mut ev = evaluator(
            &["qty", "rate", "cost", "total"],
            &[&["2", "10", "=qty*rate", "=cost.1*1.2"], &["1", "5", "=A2*B2", ""]],
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ev.subscribe(move |change| sink.lock().unwrap().push(change.cell));

        let changes = ev.recalculate_dependents(0, 1);
        let cells: HashSet<CellRef> = changes.iter().map(|c| c.cell).collect();
        assert_eq!(cells, HashSet::from([CellRef::new(0, 2), CellRef::new(0, 3)]));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
