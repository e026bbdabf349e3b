//! A set of named sheets that can reference each other.
//!
//! Edits go through [`Workbook::set_cell`], which invalidates every formula
//! that depends on the edited cell (on any sheet). Values are computed lazily
//! by [`Workbook::display_value`] and cached in the sheet until invalidated.

use std::sync::Arc;

use bidsheet_engine::engine::{
    CellChange, CellRef, CellType, EngineConfig, Evaluator, RhaiEngine, SheetHandle, SheetModel,
    SheetRegistry, Value, format_value,
};

use crate::error::{BidsheetError, Result};
use crate::sheet::Sheet;

pub struct Workbook {
    registry: Arc<SheetRegistry>,
    engine: Arc<RhaiEngine>,
    config: EngineConfig,
    /// Sheets in the order they were added.
    sheets: Vec<(String, Arc<Sheet>)>,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Workbook {
    pub fn new(config: EngineConfig) -> Self {
        Workbook {
            registry: Arc::new(SheetRegistry::new()),
            engine: Arc::new(RhaiEngine::new()),
            config,
            sheets: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.sheets.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Add a sheet under a new name.
    pub fn add_sheet(&mut self, name: &str, sheet: Sheet) -> Result<Arc<Sheet>> {
        if self.position(name).is_some() {
            return Err(BidsheetError::DuplicateSheet(name.to_string()));
        }
        let sheet = Arc::new(sheet);
        let handle: SheetHandle = sheet.clone();
        self.registry.insert(name, handle);
        self.sheets.push((name.to_string(), sheet.clone()));
        log::info!("added sheet '{}'", name);
        Ok(sheet)
    }

    /// Swap the contents of an existing sheet (e.g. a new rate card).
    /// Cached values on every sheet are dropped since any of them may read it.
    pub fn replace_sheet(&mut self, name: &str, sheet: Sheet) -> Result<Arc<Sheet>> {
        let idx = self
            .position(name)
            .ok_or_else(|| BidsheetError::UnknownSheet(name.to_string()))?;
        let sheet = Arc::new(sheet);
        let registered = self.sheets[idx].0.clone();
        let handle: SheetHandle = sheet.clone();
        self.registry.insert(&registered, handle);
        self.sheets[idx].1 = sheet.clone();
        self.invalidate_all();
        log::info!("replaced sheet '{}'", registered);
        Ok(sheet)
    }

    pub fn remove_sheet(&mut self, name: &str) -> Result<Arc<Sheet>> {
        let idx = self
            .position(name)
            .ok_or_else(|| BidsheetError::UnknownSheet(name.to_string()))?;
        let (registered, sheet) = self.sheets.remove(idx);
        self.registry.remove(&registered);
        self.invalidate_all();
        Ok(sheet)
    }

    pub fn sheet(&self, name: &str) -> Option<Arc<Sheet>> {
        self.position(name).map(|idx| self.sheets[idx].1.clone())
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(n, _)| n.clone()).collect()
    }

    /// An evaluator bound to the named sheet.
    pub fn evaluator(&self, name: &str) -> Result<Evaluator> {
        let idx = self
            .position(name)
            .ok_or_else(|| BidsheetError::UnknownSheet(name.to_string()))?;
        let (registered, sheet) = &self.sheets[idx];
        let handle: SheetHandle = sheet.clone();
        Ok(
            Evaluator::with_engine(registered, handle, self.registry.clone(), self.engine.clone())
                .with_config(self.config.clone()),
        )
    }

    /// Store user input at a cell and invalidate everything that depends on it.
    /// Returns the formula cells whose values must be recomputed.
    pub fn set_cell(
        &self,
        sheet: &str,
        row: usize,
        col: usize,
        input: &str,
    ) -> Result<Vec<CellChange>> {
        let evaluator = self.evaluator(sheet)?;
        evaluator
            .sheet()
            .set_cell_value(row, col, CellType::from_input(input));
        let changes = evaluator.recalculate_dependents(row, col);
        log::debug!(
            "{}!{} edited, {} dependents invalidated",
            evaluator.sheet_name(),
            CellRef::new(row, col),
            changes.len()
        );
        Ok(changes)
    }

    /// The value shown for a cell: formula results are evaluated (and cached)
    /// on demand, literals are shown as entered.
    pub fn display_value(&self, sheet: &str, row: usize, col: usize) -> Result<Value> {
        let evaluator = self.evaluator(sheet)?;
        Ok(match evaluator.sheet().raw_value(row, col) {
            CellType::Formula(_) => evaluator.value_at(row, col),
            CellType::Text(s) => Value::Text(s),
            CellType::Number(n) => Value::normalize_number(n, self.config.precision_digits),
            CellType::Empty => Value::Empty,
        })
    }

    pub fn display_text(&self, sheet: &str, row: usize, col: usize) -> Result<String> {
        Ok(format_value(&self.display_value(sheet, row, col)?))
    }

    /// Drop every cached value and re-evaluate all formulas.
    /// Returns the number of formula cells evaluated.
    pub fn recalculate_all(&self) -> Result<usize> {
        self.invalidate_all();
        let mut count = 0;
        for (name, sheet) in &self.sheets {
            let evaluator = self.evaluator(name)?;
            for cell in sheet.formula_cells() {
                evaluator.value_at(cell.row, cell.col);
                count += 1;
            }
        }
        Ok(count)
    }

    fn invalidate_all(&self) {
        for (_, sheet) in &self.sheets {
            sheet.clear_display();
        }
    }
}
