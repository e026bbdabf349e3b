//! Evaluated cell values and the coercions between them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FormulaError;

/// A computed (or literal) cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Empty,
    Int(i64),
    Number(f64),
    Text(String),
    Bool(bool),
    Error(FormulaError),
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

impl Value {
    pub fn zero() -> Value {
        Value::Int(0)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<FormulaError> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Coerce displayed cell text into an arithmetic-ready value.
    ///
    /// - surrounding whitespace is ignored; blank text is `Empty`
    /// - `25%` becomes `0.25`
    /// - thousands separators and currency symbols are dropped before parsing
    /// - error sentinels become `Value::Error`
    /// - anything else stays text (trimmed)
    pub fn from_display_text(text: &str) -> Value {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Value::Empty;
        }
        if let Some(e) = FormulaError::from_token(trimmed) {
            return Value::Error(e);
        }

        if let Some(pct) = trimmed.strip_suffix('%')
            && let Some(n) = parse_formatted_number(pct)
        {
            return Value::Number(n / 100.0);
        }

        match parse_formatted_number(trimmed) {
            Some(n) => Value::Number(n),
            None => Value::Text(trimmed.to_string()),
        }
    }

    /// Collapse floating-point noise and near-integers.
    ///
    /// Values are rounded to `digits` decimal places; a result with no
    /// fractional part that fits in an `i64` becomes `Int`. Non-finite
    /// numbers become `#ERROR!`.
    pub fn normalize_number(n: f64, digits: i32) -> Value {
        if !n.is_finite() {
            return Value::Error(FormulaError::Eval);
        }
        let scale = 10f64.powi(digits);
        let scaled = n * scale;
        let rounded = if scaled.is_finite() {
            scaled.round() / scale
        } else {
            n
        };
        const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
        if rounded.fract() == 0.0 && rounded.abs() < MAX_EXACT {
            Value::Int(rounded as i64)
        } else {
            Value::Number(rounded)
        }
    }

    /// Normalize a value returned by the expression engine.
    pub fn normalized(self, digits: i32) -> Value {
        match self {
            Value::Number(n) => Value::normalize_number(n, digits),
            other => other,
        }
    }
}

/// Parse a number that may carry thousands separators, currency symbols or
/// inner whitespace (e.g. `$1,250.00`, `- 3`).
pub fn parse_formatted_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace() && !CURRENCY_SYMBOLS.contains(c))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let n = cleaned.parse::<f64>().ok()?;
    n.is_finite().then_some(n)
}

/// Render a number the way it would be typed into a formula.
pub fn number_literal(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Int(n) => write!(f, "{}", n),
            Value::Number(n) => write!(f, "{}", number_literal(*n)),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<FormulaError> for Value {
    fn from(e: FormulaError) -> Self {
        Value::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_text() {
        assert_eq!(Value::from_display_text("25%"), Value::Number(0.25));
        assert_eq!(Value::from_display_text(" 12.5 % "), Value::Number(0.125));
    }

    #[test]
    fn test_formatted_numbers() {
        assert_eq!(Value::from_display_text("1,234.50"), Value::Number(1234.5));
        assert_eq!(Value::from_display_text("$ 2,000"), Value::Number(2000.0));
        assert_eq!(Value::from_display_text("€15"), Value::Number(15.0));
    }

    #[test]
    fn test_text_stays_text() {
        assert_eq!(Value::from_display_text("  Shot 1 "), Value::Text("Shot 1".into()));
        assert_eq!(Value::from_display_text("abc%"), Value::Text("abc%".into()));
        assert_eq!(Value::from_display_text(""), Value::Empty);
        assert_eq!(
            Value::from_display_text("#CIRCULAR!"),
            Value::Error(FormulaError::Circular)
        );
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(Value::normalize_number(4.0, 10), Value::Int(4));
        assert_eq!(Value::normalize_number(0.1 + 0.2, 10), Value::Number(0.3));
        assert_eq!(Value::normalize_number(2.9999999999999996, 10), Value::Int(3));
        assert_eq!(
            Value::normalize_number(f64::INFINITY, 10),
            Value::Error(FormulaError::Eval)
        );
    }

    #[test]
    fn test_number_literal() {
        assert_eq!(number_literal(50.0), "50");
        assert_eq!(number_literal(-2.5), "-2.5");
    }
}
