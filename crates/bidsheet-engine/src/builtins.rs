//! Built-in spreadsheet functions and operators (Rust) registered into Rhai.
//!
//! Conventions:
//! - Formulas are lowered so every operator is a call (`ADD(a, b)`, `CONCAT(a, b)`)
//!   and every spreadsheet function takes its arguments as one array
//!   (`SUM([r_0_0_2_0, k0])`).
//! - Ranges arrive as arrays of row arrays; functions flatten them.
//! - Text inside a range is skipped by the aggregate functions; text passed
//!   directly must coerce to a number or the call fails with `#ERROR!`.
//! - If you add a function, list it in `FUNCTIONS` and register it in
//!   `register_builtins`.

use rhai::{Array, Dynamic, Engine, EvalAltResult, Position};
use std::cmp::Ordering;

use crate::engine::{FormulaError, Value, number_literal, parse_formatted_number};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

/// Spreadsheet functions the Rhai engine implements. `IF` is lowered to a Rhai
/// `if` expression instead of a call so only the taken branch runs.
pub const FUNCTIONS: &[&str] = &[
    "SUM",
    "AVERAGE",
    "AVG",
    "COUNT",
    "COUNTA",
    "MIN",
    "MAX",
    "PRODUCT",
    "ROUND",
    "ROUNDUP",
    "ROUNDDOWN",
    "ABS",
    "AND",
    "OR",
    "NOT",
    "CONCATENATE",
    "IF",
];

pub fn is_supported(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub(crate) fn formula_err(e: FormulaError) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(e.token().into(), Position::NONE).into()
}

fn invalid_arg() -> Box<EvalAltResult> {
    formula_err(FormulaError::Eval)
}

/// Convert an evaluator value into a Rhai value.
pub(crate) fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Empty => Dynamic::UNIT,
        Value::Int(n) => Dynamic::from_int(*n),
        Value::Number(n) => Dynamic::from_float(*n),
        Value::Text(s) => Dynamic::from(s.clone()),
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Error(e) => Dynamic::from(e.token().to_string()),
    }
}

/// Convert a Rhai result back into an evaluator value.
pub(crate) fn dynamic_to_value(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Empty
    } else if let Ok(n) = value.as_float() {
        Value::Number(n)
    } else if let Ok(n) = value.as_int() {
        Value::Int(n)
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(s) = value.clone().into_string() {
        Value::Text(s)
    } else {
        // Arrays (a bare range as the whole formula) have no single value.
        Value::Error(FormulaError::Eval)
    }
}

/// Map a Rhai failure to the sentinel it represents.
pub(crate) fn classify_error(err: &EvalAltResult) -> FormulaError {
    match err {
        EvalAltResult::ErrorRuntime(v, _) => v
            .clone()
            .into_string()
            .ok()
            .and_then(|s| FormulaError::from_token(&s))
            .unwrap_or(FormulaError::Eval),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify_error(inner),
        EvalAltResult::ErrorFunctionNotFound(..) => FormulaError::NotSupported,
        _ => FormulaError::Eval,
    }
}

fn is_number(d: &Dynamic) -> bool {
    d.as_float().is_ok() || d.as_int().is_ok()
}

fn raw_number(d: &Dynamic) -> Option<f64> {
    d.as_float()
        .ok()
        .or_else(|| d.as_int().ok().map(|n| n as f64))
}

/// Coerce a scalar operand to a number: empty is 0, booleans are 1/0 and
/// numeric text is parsed; any other text is an error.
pub(crate) fn to_number(d: &Dynamic) -> FnResult<f64> {
    if d.is_unit() {
        return Ok(0.0);
    }
    if let Some(n) = raw_number(d) {
        return Ok(n);
    }
    if let Ok(b) = d.as_bool() {
        return Ok(if b { 1.0 } else { 0.0 });
    }
    if let Ok(s) = d.clone().into_string() {
        if s.trim().is_empty() {
            return Ok(0.0);
        }
        if let Some(e) = FormulaError::from_token(&s) {
            return Err(formula_err(e));
        }
        return parse_formatted_number(&s).ok_or_else(invalid_arg);
    }
    Err(invalid_arg())
}

fn to_text(d: &Dynamic) -> String {
    if d.is_unit() {
        String::new()
    } else if let Ok(n) = d.as_float() {
        number_literal(n)
    } else if let Ok(n) = d.as_int() {
        n.to_string()
    } else if let Ok(b) = d.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else {
        d.clone().into_string().unwrap_or_default()
    }
}

fn truthy(d: &Dynamic) -> FnResult<bool> {
    if let Ok(b) = d.as_bool() {
        return Ok(b);
    }
    if let Ok(s) = d.clone().into_string() {
        return match s.trim().to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" | "" => Ok(false),
            _ => Err(invalid_arg()),
        };
    }
    Ok(to_number(d)? != 0.0)
}

/// Numbers contributed by an aggregate's arguments.
/// Range members that are not numbers are skipped; direct arguments are coerced.
fn collect_numbers(args: &Array) -> FnResult<Vec<f64>> {
    let mut out = Vec::new();
    for arg in args {
        if arg.is_array() {
            for item in flatten(arg) {
                if let Some(n) = raw_number(&item) {
                    out.push(n);
                }
            }
        } else {
            out.push(to_number(arg)?);
        }
    }
    Ok(out)
}

fn flatten(d: &Dynamic) -> Vec<Dynamic> {
    match d.clone().into_array() {
        Ok(items) => items.iter().flat_map(flatten).collect(),
        Err(_) => vec![d.clone()],
    }
}

fn rank(d: &Dynamic) -> u8 {
    if d.as_bool().is_ok() {
        2
    } else if d.is_string() {
        1
    } else {
        0
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text compares case-insensitively.
fn compare(a: &Dynamic, b: &Dynamic) -> FnResult<Ordering> {
    let (a_rank, b_rank) = (
        if a.is_unit() { rank(b) } else { rank(a) },
        if b.is_unit() { rank(a) } else { rank(b) },
    );
    if a_rank != b_rank {
        return Ok(a_rank.cmp(&b_rank));
    }
    match a_rank {
        1 => Ok(to_text(a).to_lowercase().cmp(&to_text(b).to_lowercase())),
        2 => Ok(truthy(a)?.cmp(&truthy(b)?)),
        _ => to_number(a)?
            .partial_cmp(&to_number(b)?)
            .ok_or_else(invalid_arg),
    }
}

fn arg(args: &Array, idx: usize) -> FnResult<&Dynamic> {
    args.get(idx).ok_or_else(invalid_arg)
}

fn round_with(args: &Array, f: fn(f64) -> f64) -> FnResult<f64> {
    if args.is_empty() || args.len() > 2 {
        return Err(invalid_arg());
    }
    let x = to_number(arg(args, 0)?)?;
    let digits = match args.get(1) {
        Some(d) => to_number(d)?.trunc() as i32,
        None => 0,
    };
    // Scaled values are cut to 9 places first so 2.345 * 100 rounds as 234.5.
    let settle = |v: f64| (v * 1e9).round() / 1e9;
    if digits >= 0 {
        let scale = 10f64.powi(digits);
        Ok(f(settle(x * scale)) / scale)
    } else {
        let scale = 10f64.powi(-digits);
        Ok(f(settle(x / scale)) * scale)
    }
}

/// Register operator helpers and spreadsheet functions into the Rhai engine.
pub fn register_builtins(engine: &mut Engine) {
    // Arithmetic operators.
    engine.register_fn("ADD", |a: Dynamic, b: Dynamic| -> FnResult<f64> {
        Ok(to_number(&a)? + to_number(&b)?)
    });
    engine.register_fn("SUB", |a: Dynamic, b: Dynamic| -> FnResult<f64> {
        Ok(to_number(&a)? - to_number(&b)?)
    });
    engine.register_fn("MUL", |a: Dynamic, b: Dynamic| -> FnResult<f64> {
        Ok(to_number(&a)? * to_number(&b)?)
    });
    engine.register_fn("DIV", |a: Dynamic, b: Dynamic| -> FnResult<f64> {
        let divisor = to_number(&b)?;
        if divisor == 0.0 {
            return Err(invalid_arg());
        }
        Ok(to_number(&a)? / divisor)
    });
    engine.register_fn("POW", |a: Dynamic, b: Dynamic| -> FnResult<f64> {
        Ok(to_number(&a)?.powf(to_number(&b)?))
    });
    engine.register_fn("NEG", |a: Dynamic| -> FnResult<f64> { Ok(-to_number(&a)?) });
    engine.register_fn("PLUS", |a: Dynamic| -> FnResult<f64> { to_number(&a) });
    engine.register_fn("PCT", |a: Dynamic| -> FnResult<f64> { Ok(to_number(&a)? / 100.0) });
    engine.register_fn("CONCAT", |a: Dynamic, b: Dynamic| -> String {
        format!("{}{}", to_text(&a), to_text(&b))
    });

    // Comparison operators.
    engine.register_fn("EQ", |a: Dynamic, b: Dynamic| -> FnResult<bool> {
        Ok(compare(&a, &b)? == Ordering::Equal)
    });
    engine.register_fn("NE", |a: Dynamic, b: Dynamic| -> FnResult<bool> {
        Ok(compare(&a, &b)? != Ordering::Equal)
    });
    engine.register_fn("LT", |a: Dynamic, b: Dynamic| -> FnResult<bool> {
        Ok(compare(&a, &b)? == Ordering::Less)
    });
    engine.register_fn("LE", |a: Dynamic, b: Dynamic| -> FnResult<bool> {
        Ok(compare(&a, &b)? != Ordering::Greater)
    });
    engine.register_fn("GT", |a: Dynamic, b: Dynamic| -> FnResult<bool> {
        Ok(compare(&a, &b)? == Ordering::Greater)
    });
    engine.register_fn("GE", |a: Dynamic, b: Dynamic| -> FnResult<bool> {
        Ok(compare(&a, &b)? != Ordering::Less)
    });

    // Support for lowered IF and error literals.
    engine.register_fn("TRUTHY", |a: Dynamic| -> FnResult<bool> { truthy(&a) });
    engine.register_fn("RAISE", |token: Dynamic| -> FnResult<Dynamic> {
        let e = token
            .into_string()
            .ok()
            .and_then(|s| FormulaError::from_token(&s))
            .unwrap_or(FormulaError::Eval);
        Err(formula_err(e))
    });

    // Aggregates.
    engine.register_fn("SUM", |args: Array| -> FnResult<f64> {
        Ok(collect_numbers(&args)?.iter().sum())
    });
    let average = |args: Array| -> FnResult<f64> {
        let nums = collect_numbers(&args)?;
        if nums.is_empty() {
            return Ok(0.0);
        }
        Ok(nums.iter().sum::<f64>() / nums.len() as f64)
    };
    engine.register_fn("AVERAGE", average);
    engine.register_fn("AVG", average);
    engine.register_fn("COUNT", |args: Array| -> i64 {
        args.iter()
            .map(|a| {
                if a.is_array() {
                    flatten(a).into_iter().filter(is_number).count()
                } else {
                    usize::from(to_number(a).is_ok() && !a.is_unit())
                }
            })
            .sum::<usize>() as i64
    });
    engine.register_fn("COUNTA", |args: Array| -> i64 {
        args.iter()
            .flat_map(flatten)
            .filter(|d| !d.is_unit() && !(d.is_string() && to_text(d).is_empty()))
            .count() as i64
    });
    engine.register_fn("MIN", |args: Array| -> FnResult<f64> {
        Ok(collect_numbers(&args)?
            .into_iter()
            .reduce(f64::min)
            .unwrap_or(0.0))
    });
    engine.register_fn("MAX", |args: Array| -> FnResult<f64> {
        Ok(collect_numbers(&args)?
            .into_iter()
            .reduce(f64::max)
            .unwrap_or(0.0))
    });
    engine.register_fn("PRODUCT", |args: Array| -> FnResult<f64> {
        let nums = collect_numbers(&args)?;
        if nums.is_empty() {
            return Ok(0.0);
        }
        Ok(nums.iter().product())
    });

    // Rounding.
    engine.register_fn("ROUND", |args: Array| -> FnResult<f64> {
        round_with(&args, f64::round)
    });
    engine.register_fn("ROUNDUP", |args: Array| -> FnResult<f64> {
        round_with(&args, |x| x.signum() * x.abs().ceil())
    });
    engine.register_fn("ROUNDDOWN", |args: Array| -> FnResult<f64> {
        round_with(&args, f64::trunc)
    });
    engine.register_fn("ABS", |args: Array| -> FnResult<f64> {
        if args.len() != 1 {
            return Err(invalid_arg());
        }
        Ok(to_number(arg(&args, 0)?)?.abs())
    });

    // Logic.
    engine.register_fn("AND", |args: Array| -> FnResult<bool> {
        let mut result = true;
        for item in args.iter().flat_map(flatten) {
            result &= truthy(&item)?;
        }
        Ok(result)
    });
    engine.register_fn("OR", |args: Array| -> FnResult<bool> {
        let mut result = false;
        for item in args.iter().flat_map(flatten) {
            result |= truthy(&item)?;
        }
        Ok(result)
    });
    engine.register_fn("NOT", |args: Array| -> FnResult<bool> {
        if args.len() != 1 {
            return Err(invalid_arg());
        }
        Ok(!truthy(arg(&args, 0)?)?)
    });

    // Text.
    engine.register_fn("CONCATENATE", |args: Array| -> String {
        args.iter().flat_map(flatten).map(|d| to_text(&d)).collect()
    });
}
