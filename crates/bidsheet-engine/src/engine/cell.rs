//! Raw cell contents as stored by a sheet model.

use serde::{Deserialize, Serialize};

/// The type of content stored in a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellType {
    Empty,
    Text(String),
    Number(f64),
    /// Formula text including the leading `=`.
    Formula(String),
}

impl CellType {
    /// Parse user input and create appropriate cell type.
    /// - Empty string or whitespace -> Empty
    /// - Starts with '=' -> Formula (the '=' is kept)
    /// - Quoted string -> Text (without quotes)
    /// - Valid finite number -> Number (`nan`, `inf` stay text)
    /// - Otherwise -> Text
    pub fn from_input(input: &str) -> CellType {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return CellType::Empty;
        }

        if trimmed.starts_with('=') {
            return CellType::Formula(trimmed.to_string());
        }

        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            return CellType::Text(trimmed[1..trimmed.len() - 1].to_string());
        }

        if let Ok(n) = trimmed.parse::<f64>()
            && n.is_finite()
        {
            return CellType::Number(n);
        }

        CellType::Text(trimmed.to_string())
    }

    /// Get the text a user would edit for this cell.
    pub fn to_input_string(&self) -> String {
        match self {
            CellType::Empty => String::new(),
            CellType::Text(s) => s.clone(),
            CellType::Number(n) => n.to_string(),
            CellType::Formula(s) => s.clone(),
        }
    }

    pub fn formula(&self) -> Option<&str> {
        match self {
            CellType::Formula(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellType::Empty)
    }
}
