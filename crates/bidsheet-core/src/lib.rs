//! bidsheet-core - in-memory sheets, workbook and storage.

pub mod error;
pub mod sheet;
pub mod storage;
pub mod workbook;

pub use error::{BidsheetError, Result};
pub use sheet::Sheet;
pub use workbook::Workbook;

pub use bidsheet_engine::engine::{CellChange, CellRef, EngineConfig, Value};
