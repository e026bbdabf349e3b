//! Reference resolution against a sheet: bounded A1 parsing, sheet-qualified
//! references and header (field-name) references.

use regex::Regex;
use std::sync::OnceLock;

use super::{CellRef, SheetModel};

/// How a header name matched a field. Variants are listed in precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldMatch {
    Exact,
    CaseInsensitive,
    /// Substring delimited by `_` or the ends of the field name (`cmp` in `sg_cmp_rate`).
    Boundary,
    /// Substring anywhere.
    Substring,
}

/// Find the column a header name refers to.
///
/// Tries each [`FieldMatch`] tier in order over all fields; within a tier the
/// first field in column order wins.
pub fn match_field<S: AsRef<str>>(name: &str, fields: &[S]) -> Option<(usize, FieldMatch)> {
    if name.is_empty() {
        return None;
    }
    let lower = name.to_lowercase();

    let tiers: [(FieldMatch, &dyn Fn(&str) -> bool); 4] = [
        (FieldMatch::Exact, &|f: &str| f == name),
        (FieldMatch::CaseInsensitive, &|f: &str| f.to_lowercase() == lower),
        (FieldMatch::Boundary, &|f: &str| {
            contains_at_boundary(&f.to_lowercase(), &lower)
        }),
        (FieldMatch::Substring, &|f: &str| f.to_lowercase().contains(&lower)),
    ];

    tiers.iter().find_map(|(kind, matches)| {
        fields
            .iter()
            .position(|f| matches(f.as_ref()))
            .map(|idx| (idx, *kind))
    })
}

fn contains_at_boundary(field: &str, needle: &str) -> bool {
    field.match_indices(needle).any(|(start, m)| {
        let end = start + m.len();
        let before_ok = start == 0 || field[..start].ends_with('_');
        let after_ok = end == field.len() || field[end..].starts_with('_');
        before_ok && after_ok
    })
}

/// Parse an A1 reference and require it to lie inside the sheet's current bounds.
pub fn parse_cell_reference(reference: &str, sheet: &dyn SheetModel) -> Option<CellRef> {
    let cell = CellRef::from_str(reference)?;
    (cell.row < sheet.row_count() && cell.col < sheet.column_count()).then_some(cell)
}

fn quoted_sheet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^'([^']+)'!(.+)$").expect("quoted sheet regex must compile"))
}

fn unquoted_sheet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_ ]+)!(.+)$").expect("unquoted sheet regex must compile")
    })
}

/// Split `'Sheet Name'!rest` or `SheetName!rest` into the sheet name and the remainder.
/// Without a qualifier the whole input is returned as the remainder.
pub fn parse_sheet_qualified(reference: &str) -> (Option<String>, &str) {
    if let Some(caps) = quoted_sheet_re().captures(reference) {
        let rest = caps.get(2).map_or(reference, |m| &reference[m.start()..]);
        return (Some(caps[1].to_string()), rest);
    }
    if let Some(caps) = unquoted_sheet_re().captures(reference) {
        let name = caps[1].trim();
        if !name.is_empty() && !name.chars().all(|c| c.is_ascii_digit()) {
            let rest = caps.get(2).map_or(reference, |m| &reference[m.start()..]);
            return (Some(name.to_string()), rest);
        }
    }
    (None, reference)
}

fn header_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?<field>[A-Za-z_][A-Za-z0-9_]*)(?:\.(?<row>[0-9]+))?$")
            .expect("header reference regex must compile")
    })
}

/// Resolve `field.N` (1-based row) or bare `field` (on `current_row`, 0-based)
/// to an A1 reference such as `"C4"`.
pub fn resolve_header_reference(
    reference: &str,
    current_row: usize,
    sheet: &dyn SheetModel,
) -> Option<String> {
    let caps = header_ref_re().captures(reference.trim())?;
    let row = match caps.name("row") {
        Some(m) => m.as_str().parse::<usize>().ok()?.checked_sub(1)?,
        None => current_row,
    };
    let (col, _) = match_field(&caps["field"], &sheet.field_names())?;
    Some(CellRef::new(row, col).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sheet::testing::MemSheet;
    use rstest::rstest;

    const FIELDS: &[&str] = &["code", "sg_model_mandays", "sg_model_rate", "sg_cmp_rate", "compositing_notes"];

    #[rstest]
    #[case("code", Some((0, FieldMatch::Exact)))]
    #[case("SG_MODEL_RATE", Some((2, FieldMatch::CaseInsensitive)))]
    #[case("cmp", Some((3, FieldMatch::Boundary)))]
    #[case("model", Some((1, FieldMatch::Boundary)))]
    #[case("model_rate", Some((2, FieldMatch::Boundary)))]
    #[case("compo", Some((4, FieldMatch::Substring)))]
    #[case("nothing", None)]
    #[case("", None)]
    fn test_match_field_precedence(#[case] name: &str, #[case] expected: Option<(usize, FieldMatch)>) {
        assert_eq!(match_field(name, FIELDS), expected);
    }

    #[test]
    fn test_boundary_beats_earlier_substring() {
        // "cmp" occurs inside "xcmpx_total" but only at a boundary in "sg_cmp_rate".
        let fields = ["xcmpx_total", "sg_cmp_rate"];
        assert_eq!(match_field("cmp", &fields), Some((1, FieldMatch::Boundary)));
    }

    #[test]
    fn test_parse_cell_reference_bounds() {
        let sheet = MemSheet::new(&["a", "b"], &[&["1", "2"], &["3", "4"]]);
        assert_eq!(parse_cell_reference("A1", &sheet), Some(CellRef::new(0, 0)));
        assert_eq!(parse_cell_reference("$B$2", &sheet), Some(CellRef::new(1, 1)));
        assert_eq!(parse_cell_reference("C1", &sheet), None);
        assert_eq!(parse_cell_reference("A3", &sheet), None);
        assert_eq!(parse_cell_reference("model", &sheet), None);
    }

    #[test]
    fn test_parse_sheet_qualified() {
        assert_eq!(
            parse_sheet_qualified("'Rate Card'!model.1"),
            (Some("Rate Card".to_string()), "model.1")
        );
        assert_eq!(
            parse_sheet_qualified("LineItems!B2"),
            (Some("LineItems".to_string()), "B2")
        );
        assert_eq!(
            parse_sheet_qualified("Rate Card!A1"),
            (Some("Rate Card".to_string()), "A1")
        );
        assert_eq!(parse_sheet_qualified("123!A1"), (None, "123!A1"));
        assert_eq!(parse_sheet_qualified("model.1"), (None, "model.1"));
    }

    #[test]
    fn test_resolve_header_reference() {
        let sheet = MemSheet::new(FIELDS, &[]);
        assert_eq!(resolve_header_reference("cmp.1", 7, &sheet).as_deref(), Some("D1"));
        assert_eq!(resolve_header_reference("code", 4, &sheet).as_deref(), Some("A5"));
        assert_eq!(resolve_header_reference("code.0", 4, &sheet), None);
        assert_eq!(resolve_header_reference("missing.2", 0, &sheet), None);
        assert_eq!(resolve_header_reference("A1:B2", 0, &sheet), None);
    }
}
