//! In-memory sheet: named columns, raw cell contents and cached display values.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use bidsheet_engine::engine::{CellRef, CellType, SheetModel, Value};

/// A grid of cells with a header row of field names.
///
/// Cells live in a `DashMap` so the sheet can be shared behind an `Arc` and
/// still be edited. Formula results are cached per cell until invalidated.
pub struct Sheet {
    fields: Vec<String>,
    rows: AtomicUsize,
    cols: AtomicUsize,
    cells: DashMap<CellRef, CellType>,
    display: DashMap<CellRef, Value>,
}

impl Sheet {
    pub fn new(fields: Vec<String>) -> Self {
        let cols = fields.len();
        Sheet {
            fields,
            rows: AtomicUsize::new(0),
            cols: AtomicUsize::new(cols),
            cells: DashMap::new(),
            display: DashMap::new(),
        }
    }

    /// Build a sheet from field names and rows of user input.
    pub fn from_rows<S: AsRef<str>>(fields: Vec<String>, rows: &[Vec<S>]) -> Self {
        let sheet = Sheet::new(fields);
        for (r, row) in rows.iter().enumerate() {
            sheet.ensure_rows(r + 1);
            for (c, input) in row.iter().enumerate() {
                sheet.set_input(r, c, input.as_ref());
            }
        }
        sheet
    }

    /// Grow the row count so trailing blank rows still count.
    pub fn ensure_rows(&self, rows: usize) {
        self.rows.fetch_max(rows, Ordering::Relaxed);
    }

    /// Store user input (`=...` for formulas) at a cell.
    pub fn set_input(&self, row: usize, col: usize, input: &str) {
        self.set_cell_value(row, col, CellType::from_input(input));
    }

    /// The text a user would edit for the cell.
    pub fn input(&self, row: usize, col: usize) -> String {
        self.raw_value(row, col).to_input_string()
    }

    /// Drop every cached formula result.
    pub fn clear_display(&self) {
        self.display.clear();
    }

    /// Positions of all formula cells, in row-major order.
    pub fn formula_cells(&self) -> Vec<CellRef> {
        let mut cells: Vec<CellRef> = self
            .cells
            .iter()
            .filter(|entry| entry.value().formula().is_some())
            .map(|entry| *entry.key())
            .collect();
        cells.sort();
        cells
    }

    pub fn is_cached(&self, row: usize, col: usize) -> bool {
        self.display.contains_key(&CellRef::new(row, col))
    }
}

impl SheetModel for Sheet {
    fn row_count(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }

    fn column_count(&self) -> usize {
        self.cols.load(Ordering::Relaxed)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn field_name_for_column(&self, col: usize) -> Option<String> {
        self.fields.get(col).cloned()
    }

    fn column_for_field_name(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    fn raw_value(&self, row: usize, col: usize) -> CellType {
        self.cells
            .get(&CellRef::new(row, col))
            .map(|c| c.value().clone())
            .unwrap_or(CellType::Empty)
    }

    fn display_value(&self, row: usize, col: usize) -> Option<Value> {
        self.display
            .get(&CellRef::new(row, col))
            .map(|v| v.value().clone())
    }

    fn set_cell_value(&self, row: usize, col: usize, value: CellType) {
        let cell = CellRef::new(row, col);
        self.display.remove(&cell);
        if value.is_empty() {
            self.cells.remove(&cell);
            return;
        }
        self.rows.fetch_max(row + 1, Ordering::Relaxed);
        self.cols.fetch_max(col + 1, Ordering::Relaxed);
        self.cells.insert(cell, value);
    }

    fn mark_dirty(&self, row: usize, col: usize) {
        self.display.remove(&CellRef::new(row, col));
    }

    fn store_display(&self, row: usize, col: usize, value: &Value) {
        self.display.insert(CellRef::new(row, col), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bounds_grow_on_set() {
        let sheet = Sheet::new(fields(&["code", "rate"]));
        assert_eq!((sheet.row_count(), sheet.column_count()), (0, 2));
        sheet.set_input(3, 4, "x");
        assert_eq!((sheet.row_count(), sheet.column_count()), (4, 5));
        sheet.set_input(0, 0, "");
        assert_eq!(sheet.raw_value(0, 0), CellType::Empty);
    }

    #[test]
    fn test_from_rows_keeps_blank_rows() {
        let sheet = Sheet::from_rows(fields(&["a"]), &[vec!["1"], vec![""], vec!["=A1*2"]]);
        assert_eq!(sheet.row_count(), 3);
        assert_eq!(sheet.input(2, 0), "=A1*2");
        assert_eq!(sheet.formula_cells(), vec![CellRef::new(2, 0)]);
    }

    #[test]
    fn test_display_cache_lifecycle() {
        let sheet = Sheet::from_rows(fields(&["a"]), &[vec!["=1+1"]]);
        sheet.store_display(0, 0, &Value::Int(2));
        assert_eq!(sheet.display_value(0, 0), Some(Value::Int(2)));
        sheet.mark_dirty(0, 0);
        assert!(!sheet.is_cached(0, 0));
        sheet.store_display(0, 0, &Value::Int(2));
        sheet.set_input(0, 0, "=1+2");
        assert_eq!(sheet.display_value(0, 0), None);
    }
}
