//! The tabular data source the evaluator reads from, and the registry of
//! named sheets used for cross-sheet references.

use dashmap::DashMap;
use std::sync::Arc;

use super::{CellType, Value};

/// A 2-D grid of cells with named columns.
///
/// Methods take `&self`; implementations keep their cells behind interior
/// mutability so a handle can be shared between the registry, evaluators and
/// the application layer.
pub trait SheetModel: Send + Sync {
    fn row_count(&self) -> usize;

    fn column_count(&self) -> usize;

    /// Field names in column order. May be shorter than `column_count`.
    fn field_names(&self) -> Vec<String>;

    fn field_name_for_column(&self, col: usize) -> Option<String> {
        self.field_names().into_iter().nth(col)
    }

    fn column_for_field_name(&self, name: &str) -> Option<usize> {
        self.field_names().iter().position(|f| f == name)
    }

    /// The stored literal or formula text.
    fn raw_value(&self, row: usize, col: usize) -> CellType;

    /// The already-computed value of a formula cell, if the model holds one.
    fn display_value(&self, row: usize, col: usize) -> Option<Value>;

    fn set_cell_value(&self, row: usize, col: usize, value: CellType);

    /// Forget any computed value held for the cell.
    fn mark_dirty(&self, _row: usize, _col: usize) {}

    /// Offer a freshly computed value for caching.
    fn store_display(&self, _row: usize, _col: usize, _value: &Value) {}
}

pub type SheetHandle = Arc<dyn SheetModel>;

struct RegistryEntry {
    name: String,
    sheet: SheetHandle,
}

/// Case-insensitive map of sheet name to sheet.
///
/// Lookups return a cloned handle, so replacing an entry never disturbs an
/// evaluation that already holds the previous sheet.
#[derive(Default)]
pub struct SheetRegistry {
    sheets: DashMap<String, RegistryEntry>,
}

impl SheetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a sheet. Returns the sheet previously registered under the name.
    pub fn insert(&self, name: &str, sheet: SheetHandle) -> Option<SheetHandle> {
        log::debug!("registering sheet '{}'", name);
        self.sheets
            .insert(
                name.trim().to_lowercase(),
                RegistryEntry {
                    name: name.to_string(),
                    sheet,
                },
            )
            .map(|old| old.sheet)
    }

    pub fn remove(&self, name: &str) -> Option<SheetHandle> {
        self.sheets
            .remove(&name.trim().to_lowercase())
            .map(|(_, entry)| entry.sheet)
    }

    pub fn lookup(&self, name: &str) -> Option<SheetHandle> {
        self.sheets
            .get(&name.trim().to_lowercase())
            .map(|entry| entry.sheet.clone())
    }

    /// The name as it was registered (original casing).
    pub fn canonical_name(&self, name: &str) -> Option<String> {
        self.sheets
            .get(&name.trim().to_lowercase())
            .map(|entry| entry.name.clone())
    }

    /// Registered names, sorted case-insensitively.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sheets.iter().map(|e| e.name.clone()).collect();
        names.sort_by_key(|n| n.to_lowercase());
        names
    }

    /// Every registered sheet with its registered name.
    pub fn sheets(&self) -> Vec<(String, SheetHandle)> {
        self.sheets
            .iter()
            .map(|e| (e.name.clone(), e.sheet.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A minimal sheet model for engine tests.

    use super::*;
    use crate::engine::CellRef;

    pub struct MemSheet {
        pub fields: Vec<String>,
        pub rows: usize,
        pub cols: usize,
        pub cells: DashMap<CellRef, CellType>,
    }

    impl MemSheet {
        /// Build a sheet from field names and rows of user input.
        pub fn new(fields: &[&str], rows: &[&[&str]]) -> MemSheet {
            let cells = DashMap::new();
            let mut cols = fields.len();
            for (r, row) in rows.iter().enumerate() {
                cols = cols.max(row.len());
                for (c, input) in row.iter().enumerate() {
                    let cell = CellType::from_input(input);
                    if !cell.is_empty() {
                        cells.insert(CellRef::new(r, c), cell);
                    }
                }
            }
            MemSheet {
                fields: fields.iter().map(|f| f.to_string()).collect(),
                rows: rows.len(),
                cols,
                cells,
            }
        }

        pub fn handle(fields: &[&str], rows: &[&[&str]]) -> SheetHandle {
            Arc::new(Self::new(fields, rows))
        }
    }

    impl SheetModel for MemSheet {
        fn row_count(&self) -> usize {
            self.rows
        }

        fn column_count(&self) -> usize {
            self.cols
        }

        fn field_names(&self) -> Vec<String> {
            self.fields.clone()
        }

        fn raw_value(&self, row: usize, col: usize) -> CellType {
            self.cells
                .get(&CellRef::new(row, col))
                .map(|c| c.value().clone())
                .unwrap_or(CellType::Empty)
        }

        fn display_value(&self, _row: usize, _col: usize) -> Option<Value> {
            None
        }

        fn set_cell_value(&self, row: usize, col: usize, value: CellType) {
            self.cells.insert(CellRef::new(row, col), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemSheet;
    use super::*;

    #[test]
    fn test_registry_is_case_insensitive() {
        let registry = SheetRegistry::new();
        registry.insert("Rate Card", MemSheet::handle(&["a"], &[&["1"]]));
        assert!(registry.lookup("rate card").is_some());
        assert!(registry.lookup(" RATE CARD ").is_some());
        assert_eq!(registry.canonical_name("RATE card").as_deref(), Some("Rate Card"));
        assert!(registry.lookup("Line Items").is_none());
    }

    #[test]
    fn test_registry_replace_and_remove() {
        let registry = SheetRegistry::new();
        assert!(registry.insert("Rates", MemSheet::handle(&["a"], &[])).is_none());
        let old = registry.insert("RATES", MemSheet::handle(&["b"], &[]));
        assert_eq!(old.map(|s| s.field_names()), Some(vec!["a".to_string()]));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("rates").is_some());
        assert!(registry.is_empty());
    }
}
