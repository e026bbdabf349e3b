use super::Value;

/// Format a value for display.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Empty => String::new(),
        Value::Int(n) => group_thousands(&n.unsigned_abs().to_string(), *n < 0),
        Value::Number(n) => format_number(*n),
        Value::Text(s) => s.clone(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Error(e) => e.token().to_string(),
    }
}

/// Format a number for display: thousands separators and two decimals.
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return "#ERROR!".to_string();
    }
    let fixed = format!("{:.2}", n.abs());
    let (whole, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let negative = n < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0');
    format!("{}.{}", group_thousands(whole, negative), frac)
}

fn group_thousands(digits: &str, negative: bool) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if negative {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormulaError;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.891), "1,234,567.89");
        assert_eq!(format_number(0.5), "0.50");
        assert_eq!(format_number(-1500.0), "-1,500.00");
        assert_eq!(format_number(-0.001), "0.00");
        assert_eq!(format_number(f64::NAN), "#ERROR!");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::Int(3250)), "3,250");
        assert_eq!(format_value(&Value::Int(-42)), "-42");
        assert_eq!(format_value(&Value::Text("sh010".into())), "sh010");
        assert_eq!(format_value(&Value::Error(FormulaError::Ref)), "#REF!");
        assert_eq!(format_value(&Value::Empty), "");
    }
}
