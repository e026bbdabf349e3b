//! Error sentinels produced by formula evaluation.
//!
//! Evaluation never fails across the public boundary: every failure is turned
//! into one of these kinds and carried in-band as `Value::Error`. The
//! `Display` form is the token shown in the cell.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum FormulaError {
    /// A sheet, column or row named by a reference does not exist.
    #[error("#REF!")]
    Ref,

    /// The cell is already being evaluated further up the call stack.
    #[error("#CIRCULAR!")]
    Circular,

    /// The preprocessed text is not a valid expression (or is empty).
    #[error("#PARSE_ERROR!")]
    Parse,

    /// The formula calls a function the expression engine does not implement.
    #[error("#NOT_SUPPORTED!")]
    NotSupported,

    /// Anything else that went wrong while executing.
    #[error("#ERROR!")]
    Eval,
}

impl FormulaError {
    pub const ALL: [FormulaError; 5] = [
        FormulaError::Ref,
        FormulaError::Circular,
        FormulaError::Parse,
        FormulaError::NotSupported,
        FormulaError::Eval,
    ];

    /// The sentinel token, e.g. `#REF!`.
    pub fn token(&self) -> &'static str {
        match self {
            FormulaError::Ref => "#REF!",
            FormulaError::Circular => "#CIRCULAR!",
            FormulaError::Parse => "#PARSE_ERROR!",
            FormulaError::NotSupported => "#NOT_SUPPORTED!",
            FormulaError::Eval => "#ERROR!",
        }
    }

    /// Map a sentinel token back to its kind (case-insensitive).
    pub fn from_token(token: &str) -> Option<FormulaError> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|e| e.token().eq_ignore_ascii_case(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_sentinel() {
        assert_eq!(FormulaError::Circular.to_string(), "#CIRCULAR!");
        assert_eq!(FormulaError::Eval.to_string(), "#ERROR!");
    }

    #[test]
    fn test_from_token() {
        assert_eq!(FormulaError::from_token("#ref!"), Some(FormulaError::Ref));
        assert_eq!(
            FormulaError::from_token(" #NOT_SUPPORTED! "),
            Some(FormulaError::NotSupported)
        );
        assert_eq!(FormulaError::from_token("#DIV/0!"), None);
    }
}
