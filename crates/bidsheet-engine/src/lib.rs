//! bidsheet_engine - formula evaluation for VFX bid sheets.
//!
//! Formulas are spreadsheet expressions extended with header references
//! (`sg_model_mandays * sg_model_rate`, `model.3`), cross-sheet references
//! (`'Rate Card'!model.1`), `ROW()`, `COLUMN()` and `INDIRECT`. See
//! [`engine::Evaluator`] for the entry point.

pub(crate) mod builtins;
pub mod engine;
pub mod error;

pub use builtins::FUNCTIONS;

#[cfg(test)]
mod tests {
    use crate::engine::sheet::testing::MemSheet;
    use crate::engine::*;
    use std::sync::Arc;

    fn line_items(registry: &Arc<SheetRegistry>) -> Evaluator {
        let sheet = MemSheet::handle(
            &["code", "sg_model_mandays", "sg_model_rate"],
            &[&["Shot1", "5", "20"], &["Shot2", "2", "=sg_model_rate.1"]],
        );
        registry.insert("Line Items", sheet.clone());
        Evaluator::new("Line Items", sheet, Arc::clone(registry))
    }

    #[test]
    fn test_column_letters_round_trip() {
        for i in [0usize, 1, 25, 26, 27, 51, 52, 701, 702, 18_277] {
            let letters = CellRef::col_to_letters(i);
            assert_eq!(letters_to_col(&letters), Some(i), "{letters}");
        }
        assert_eq!(CellRef::col_to_letters(25), "Z");
        assert_eq!(CellRef::col_to_letters(26), "AA");
        assert_eq!(letters_to_col("zz"), Some(701));
    }

    #[test]
    fn test_parse_cell_reference_examples() {
        let fields: Vec<String> = (0..800).map(|i| format!("f{i}")).collect();
        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        let empty: &[&str] = &[];
        let rows = vec![empty; 1000];
        let sheet = MemSheet::new(&field_refs, &rows);
        assert_eq!(parse_cell_reference("A1", &sheet), Some(CellRef::new(0, 0)));
        assert_eq!(parse_cell_reference("$B$2", &sheet), Some(CellRef::new(1, 1)));
        assert_eq!(parse_cell_reference("ZZ1000", &sheet), Some(CellRef::new(999, 701)));
        assert_eq!(parse_cell_reference("ZZ1001", &sheet), None);
    }

    #[test]
    fn test_short_alias_resolves_to_long_field() {
        let sheet = MemSheet::new(&["code", "notes_cmpx", "sg_cmp_rate"], &[]);
        assert_eq!(resolve_header_reference("cmp.1", 5, &sheet).as_deref(), Some("C1"));
    }

    #[test]
    fn test_rate_card_lookup() {
        let registry = Arc::new(SheetRegistry::new());
        registry.insert(
            "Rate Card",
            MemSheet::handle(&["sg_model_rate", "sg_comp_rate"], &[&["50", "65"]]),
        );
        let ev = line_items(&registry);
        assert_eq!(ev.evaluate("='Rate Card'!model.1", 0, 3), Value::Int(50));
        assert_eq!(ev.evaluate("=sg_model_mandays*'rate card'!comp.1", 1, 3), Value::Int(130));
    }

    #[test]
    fn test_bid_line_price() {
        let registry = Arc::new(SheetRegistry::new());
        let ev = line_items(&registry);
        assert_eq!(ev.evaluate("=sg_model_mandays * sg_model_rate", 0, 3), Value::Int(100));
        // Row 2's rate is itself a formula pointing back at row 1.
        assert_eq!(ev.evaluate("=sg_model_mandays * sg_model_rate", 1, 3), Value::Int(40));
    }

    #[test]
    fn test_sum_skips_text() {
        let registry = Arc::new(SheetRegistry::new());
        let sheet = MemSheet::handle(&["v"], &[&["1"], &["2"], &["abc"]]);
        let ev = Evaluator::new("Sheet1", sheet, registry);
        assert_eq!(ev.evaluate("=SUM(A1:A3)", 0, 1), Value::Int(3));
    }

    #[test]
    fn test_repeat_evaluation_is_stable() {
        let registry = Arc::new(SheetRegistry::new());
        let ev = line_items(&registry);
        let first = ev.evaluate("=ROUND(sg_model_rate/3, 2)&\" per day\"", 0, 3);
        assert_eq!(first, Value::Text("6.67 per day".into()));
        assert_eq!(ev.evaluate("=ROUND(sg_model_rate/3, 2)&\" per day\"", 0, 3), first);
    }

    #[test]
    fn test_dependents_by_every_reference_form() {
        let sheet = MemSheet::handle(
            &["code", "sg_model_mandays", "sg_model_rate", "a", "b", "c"],
            &[&["Shot1", "5", "20", "=B1*2", "=model*3", "=sg_model_mandays.1+1"]],
        );
        let ev = Evaluator::new("Line Items", sheet, Arc::new(SheetRegistry::new()));
        let deps = ev.find_dependent_cells(0, 1);
        for col in [3, 4, 5] {
            assert!(deps.contains(&CellRef::new(0, col)), "missing column {col}");
        }
    }

    #[test]
    fn test_cross_sheet_cycle_is_caught() {
        let registry = Arc::new(SheetRegistry::new());
        let a = MemSheet::handle(&["x"], &[&["=B!x.1"]]);
        let b = MemSheet::handle(&["x"], &[&["=A!x.1"]]);
        registry.insert("A", a.clone());
        registry.insert("B", b);
        let ev = Evaluator::new("A", a, Arc::clone(&registry));
        assert_eq!(ev.evaluate("=B!x.1", 0, 0), Value::Error(FormulaError::Circular));
    }

    #[test]
    fn test_registry_swap_is_seen_by_next_evaluation() {
        let registry = Arc::new(SheetRegistry::new());
        registry.insert("Rate Card", MemSheet::handle(&["sg_model_rate"], &[&["50"]]));
        let ev = line_items(&registry);
        assert_eq!(ev.evaluate("='Rate Card'!model.1", 0, 3), Value::Int(50));
        registry.insert("rate card", MemSheet::handle(&["sg_model_rate"], &[&["75"]]));
        assert_eq!(ev.evaluate("='Rate Card'!model.1", 0, 3), Value::Int(75));
    }
}
