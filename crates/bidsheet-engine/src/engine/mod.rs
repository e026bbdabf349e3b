//! Bid-sheet formula engine API.
//!
//! - [`CellRef`], [`match_field`], [`resolve_header_reference`] - reference resolution
//! - [`SheetModel`], [`SheetRegistry`] - the sheets formulas read from
//! - [`preprocess`] - rewrite header, cross-sheet, `ROW()`/`COLUMN()` and `INDIRECT` forms
//! - [`ExpressionEngine`], [`RhaiEngine`] - compile and execute preprocessed formulas
//! - [`CircularGuard`] - re-entrance detection
//! - [`find_dependent_cells`] - textual dependency discovery
//! - [`Evaluator`] - ties the above together for one sheet

mod cell;
mod cell_ref;
mod config;
mod cycle;
mod deps;
mod eval;
mod evaluator;
mod format;
mod formula;
mod preprocess;
mod resolve;
pub(crate) mod sheet;
mod value;

pub use crate::error::FormulaError;
pub use cell::CellType;
pub use cell_ref::{CellRef, letters_to_col};
pub use config::EngineConfig;
pub use cycle::{CircularGuard, GuardKey, GuardToken};
pub use deps::{field_aliases, find_cross_sheet_dependents, find_dependent_cells};
pub use eval::{ExpressionEngine, InputValue, Inputs, RhaiEngine, RhaiFormula};
pub use evaluator::{CellChange, Evaluator};
pub use format::{format_number, format_value};
pub use formula::{BinaryOp, Expr, InputRef, UnaryOp, parse_formula};
pub use preprocess::{
    SheetFetch, map_outside_strings, preprocess, qualified_target, substitute_bare_fields,
    substitute_indirect, substitute_quoted_sheet_refs, substitute_row_column, substitute_row_refs,
    substitute_sheet_refs, value_literal,
};
pub use resolve::{
    FieldMatch, match_field, parse_cell_reference, parse_sheet_qualified, resolve_header_reference,
};
pub use sheet::{SheetHandle, SheetModel, SheetRegistry};
pub use value::{Value, number_literal, parse_formatted_number};
