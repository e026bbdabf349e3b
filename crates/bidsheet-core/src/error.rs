//! Error types for bidsheet core.

use thiserror::Error;

/// Errors from loading, saving and addressing sheets.
#[derive(Error, Debug)]
pub enum BidsheetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("CSV file is empty")]
    EmptyCsv,

    #[error("No sheet named '{0}'")]
    UnknownSheet(String),

    #[error("A sheet named '{0}' already exists")]
    DuplicateSheet(String),
}

pub type Result<T> = std::result::Result<T, BidsheetError>;
