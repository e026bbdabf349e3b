//! Formula preprocessing.
//!
//! Bid-sheet formulas may name cells by header (`model`, `model.3`), reach
//! into other sheets (`'Rate Card'!comp_rate.1`, `Rates!B2`) and use
//! `ROW()`, `COLUMN()` and `INDIRECT(...)`. The expression engine understands
//! none of that, so before evaluation every such form is rewritten into plain
//! spreadsheet syntax:
//!
//! 1. quoted sheet-qualified references become the referenced value
//! 2. unquoted sheet-qualified references likewise
//! 3. `field.N` becomes an A1 reference on row N
//! 4. bare `field` becomes an A1 reference on the formula's own row
//! 5. `ROW()` / `COLUMN()` become the formula cell's 1-based position
//! 6. `INDIRECT(expr)` becomes the reference `expr` spells out
//!
//! Stages 1-5 leave text inside double-quoted strings alone.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::resolve::{match_field, parse_cell_reference, resolve_header_reference};
use super::{CellRef, FormulaError, SheetModel, Value, number_literal};

/// Reads a sheet-qualified target: `(sheet name, target)` to its value.
/// `None` means the sheet does not exist.
pub type SheetFetch<'a> = dyn FnMut(&str, &str) -> Option<Value> + 'a;

/// Apply `f` to every run of text outside `"..."` literals.
/// A doubled quote inside a literal is an escaped quote.
pub fn map_outside_strings(formula: &str, mut f: impl FnMut(&str) -> String) -> String {
    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len());
    let mut seg_start = 0;
    let mut in_string = false;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'"' {
                if bytes.get(i + 1) == Some(&b'"') {
                    i += 2;
                    continue;
                }
                out.push_str(&formula[seg_start..=i]);
                in_string = false;
                seg_start = i + 1;
            }
            i += 1;
            continue;
        }

        if b == b'"' {
            out.push_str(&f(&formula[seg_start..i]));
            in_string = true;
            seg_start = i;
        }
        i += 1;
    }

    if seg_start < formula.len() {
        if in_string {
            out.push_str(&formula[seg_start..]);
        } else {
            out.push_str(&f(&formula[seg_start..]));
        }
    }
    out
}

pub(crate) fn preceding_char(text: &str, idx: usize) -> Option<char> {
    text[..idx].chars().next_back()
}

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Render a value so it can stand in for a reference inside a formula.
pub fn value_literal(value: &Value) -> String {
    let number = |n: f64| {
        if n < 0.0 {
            format!("({})", number_literal(n))
        } else {
            number_literal(n)
        }
    };
    match value {
        Value::Int(n) => number(*n as f64),
        Value::Number(n) => number(*n),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Error(e) => e.token().to_string(),
        Value::Empty | Value::Text(_) => "0".to_string(),
    }
}

/// The cell a sheet-qualified target names inside `sheet`.
///
/// An A1-looking target that is not itself a field name is read as A1 and
/// yields `Ok(None)` when it lies outside the sheet (it then reads as 0).
/// Anything else is a header reference resolved on `row`; failure is `#REF!`.
pub fn qualified_target(
    target: &str,
    row: usize,
    sheet: &dyn SheetModel,
) -> Result<Option<CellRef>, FormulaError> {
    if CellRef::looks_like_a1(target) && sheet.column_for_field_name(target).is_none() {
        return Ok(parse_cell_reference(target, sheet));
    }
    resolve_header_reference(target, row, sheet)
        .and_then(|a1| CellRef::from_str(&a1))
        .map(Some)
        .ok_or(FormulaError::Ref)
}

fn fetch_literal(fetch: &mut SheetFetch<'_>, sheet: &str, target: &str) -> String {
    match fetch(sheet, target) {
        Some(value) => value_literal(&value),
        None => {
            log::warn!("reference to unknown sheet '{}'", sheet);
            FormulaError::Ref.token().to_string()
        }
    }
}

pub(crate) fn quoted_sheet_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"'([^']+)'!(\$?[A-Za-z_][A-Za-z0-9_$]*(?:\.[0-9]+)?)")
            .expect("quoted sheet reference regex must compile")
    })
}

pub(crate) fn sheet_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9_]+)!(\$?[A-Za-z_][A-Za-z0-9_$]*(?:\.[0-9]+)?)")
            .expect("sheet reference regex must compile")
    })
}

/// Stage 1: `'Sheet Name'!target`.
pub fn substitute_quoted_sheet_refs(formula: &str, fetch: &mut SheetFetch<'_>) -> String {
    map_outside_strings(formula, |seg| {
        quoted_sheet_ref_re()
            .replace_all(seg, |caps: &Captures| fetch_literal(fetch, &caps[1], &caps[2]))
            .into_owned()
    })
}

/// Stage 2: `SheetName!target`. Digit-only names are not sheet names.
pub fn substitute_sheet_refs(formula: &str, fetch: &mut SheetFetch<'_>) -> String {
    map_outside_strings(formula, |seg| {
        sheet_ref_re()
            .replace_all(seg, |caps: &Captures| {
                let whole = &caps[0];
                let start = caps.get(0).map_or(0, |m| m.start());
                let blocked = preceding_char(seg, start)
                    .is_some_and(|c| is_word_char(c) || c == '\'' || c == '#' || c == '.');
                if blocked || caps[1].chars().all(|c| c.is_ascii_digit()) {
                    return whole.to_string();
                }
                fetch_literal(fetch, &caps[1], &caps[2])
            })
            .into_owned()
    })
}

fn row_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\.([0-9]+)").expect("row reference regex must compile")
    })
}

/// Stage 3: `field.N` (1-based row) on the formula's own sheet.
pub fn substitute_row_refs(formula: &str, sheet: &dyn SheetModel) -> String {
    let fields = sheet.field_names();
    map_outside_strings(formula, |seg| {
        row_ref_re()
            .replace_all(seg, |caps: &Captures| {
                let whole = &caps[0];
                let start = caps.get(0).map_or(0, |m| m.start());
                if preceding_char(seg, start).is_some_and(|c| is_word_char(c) || c == '.' || c == '#') {
                    return whole.to_string();
                }
                let name = &caps[1];
                if CellRef::looks_like_a1(name) && !fields.iter().any(|f| f == name) {
                    return whole.to_string();
                }
                let row = caps[2].parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                match (match_field(name, &fields), row) {
                    (Some((col, _)), Some(row)) => CellRef::new(row, col).to_string(),
                    _ => {
                        log::warn!("unresolved header reference '{}'", whole);
                        FormulaError::Ref.token().to_string()
                    }
                }
            })
            .into_owned()
    })
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").expect("identifier regex must compile")
    })
}

/// Stage 4: bare `field` on the formula's own row. Unknown names are kept.
pub fn substitute_bare_fields(formula: &str, row: usize, sheet: &dyn SheetModel) -> String {
    let fields = sheet.field_names();
    map_outside_strings(formula, |seg| {
        identifier_re()
            .replace_all(seg, |caps: &Captures| {
                let name = &caps[0];
                let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
                if preceding_char(seg, start).is_some_and(|c| is_word_char(c) || c == '#' || c == '.') {
                    return name.to_string();
                }
                let rest = seg[end..].trim_start();
                let after = seg[end..].chars().next();
                if rest.starts_with('(') || matches!(after, Some('.') | Some('!')) {
                    return name.to_string();
                }
                let is_field = fields.iter().any(|f| f == name);
                if name.contains('$')
                    || (name.len() == 1 && !is_field)
                    || name.eq_ignore_ascii_case("TRUE")
                    || name.eq_ignore_ascii_case("FALSE")
                    || (CellRef::looks_like_a1(name) && !is_field)
                {
                    return name.to_string();
                }
                match match_field(name, &fields) {
                    Some((col, _)) => CellRef::new(row, col).to_string(),
                    None => name.to_string(),
                }
            })
            .into_owned()
    })
}

fn row_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bROW\(\s*\)").expect("ROW() regex must compile"))
}

fn column_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bCOLUMN\(\s*\)").expect("COLUMN() regex must compile"))
}

/// Stage 5: `ROW()` and `COLUMN()` of the formula cell, 1-based.
pub fn substitute_row_column(formula: &str, row: usize, col: usize) -> String {
    map_outside_strings(formula, |seg| {
        let seg = row_fn_re().replace_all(seg, (row + 1).to_string().as_str());
        column_fn_re()
            .replace_all(&seg, (col + 1).to_string().as_str())
            .into_owned()
    })
}

/// Byte index of the `)` closing the `(` just before `open`, skipping string literals.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut in_string = false;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' if in_string && bytes.get(i + 1) == Some(&b'"') => i += 1,
            b'"' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split on `&` outside string literals.
fn split_concat(arg: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_string = false;
    let mut start = 0;
    for (i, c) in arg.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '&' if !in_string => {
                parts.push(&arg[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&arg[start..]);
    parts
}

/// Evaluate an INDIRECT argument built from quoted text, numbers, `ROW()`
/// and `COLUMN()` joined with `&`.
fn indirect_text(arg: &str, row: usize, col: usize) -> Option<String> {
    let mut text = String::new();
    for part in split_concat(arg) {
        let part = part.trim();
        if part.len() >= 2 && part.starts_with('"') && part.ends_with('"') {
            text.push_str(&part[1..part.len() - 1].replace("\"\"", "\""));
        } else if part.eq_ignore_ascii_case("ROW()") {
            text.push_str(&(row + 1).to_string());
        } else if part.eq_ignore_ascii_case("COLUMN()") {
            text.push_str(&(col + 1).to_string());
        } else if let Ok(n) = part.parse::<f64>() {
            text.push_str(&number_literal(n));
        } else {
            return None;
        }
    }
    Some(text)
}

fn indirect_target(arg: &str, row: usize, col: usize, sheet: &dyn SheetModel) -> String {
    let resolved = indirect_text(arg, row, col).and_then(|text| {
        let text = text.trim().to_string();
        if let Some(cell) = CellRef::from_str(&text) {
            return Some(cell.to_string());
        }
        resolve_header_reference(&text, row, sheet)
    });
    resolved.unwrap_or_else(|| {
        log::warn!("INDIRECT({}) did not name a cell; using A1", arg);
        "A1".to_string()
    })
}

const INDIRECT: &str = "INDIRECT(";

/// Byte index of the first `INDIRECT(` call outside string literals that is
/// not the tail of a longer identifier.
fn find_indirect(text: &str) -> Option<usize> {
    let upper = text.to_ascii_uppercase();
    let mut in_string = false;
    for (i, c) in upper.char_indices() {
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if !in_string
            && upper[i..].starts_with(INDIRECT)
            && !preceding_char(&upper, i).is_some_and(|p| is_word_char(p) || p == '.')
        {
            return Some(i);
        }
    }
    None
}

/// Stage 6: replace each `INDIRECT(expr)` with the reference it produces.
/// Text inside string literals is left alone.
pub fn substitute_indirect(formula: &str, row: usize, col: usize, sheet: &dyn SheetModel) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;

    while let Some(idx) = find_indirect(rest) {
        let open = idx + INDIRECT.len();
        let Some(close) = matching_paren(rest, open) else {
            break;
        };
        out.push_str(&rest[..idx]);
        out.push_str(&indirect_target(&rest[open..close], row, col, sheet));
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Run every stage in order over a formula body (text after `=`).
/// `row` and `col` are the formula cell's zero-based position in `sheet`.
pub fn preprocess(
    formula: &str,
    row: usize,
    col: usize,
    sheet: &dyn SheetModel,
    fetch: &mut SheetFetch<'_>,
) -> String {
    let text = substitute_quoted_sheet_refs(formula, fetch);
    let text = substitute_sheet_refs(&text, fetch);
    let text = substitute_row_refs(&text, sheet);
    let text = substitute_bare_fields(&text, row, sheet);
    let text = substitute_row_column(&text, row, col);
    let text = substitute_indirect(&text, row, col, sheet);
    log::trace!("preprocessed '{}' -> '{}'", formula, text);
    text
}
