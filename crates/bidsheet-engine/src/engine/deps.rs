//! Dependency discovery by scanning formula text.
//!
//! There is no stored dependency graph. When a cell changes, every formula in
//! the sheet is searched for something that could name the changed cell:
//!
//! - its A1 reference as a whole word, or a range that covers it
//! - `alias.N` where `alias` is one of the field's aliases and N its 1-based row
//! - a bare `alias` in a formula on the same row
//! - a sheet-qualified form of either (`'Sheet'!alias.N`, `Sheet!B4`)
//! - any other `name.N` or bare `name` the header resolver maps to the cell
//!
//! The scan is textual and may over-report; callers only use the result to
//! invalidate cached values.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::preprocess::{
    is_word_char, preceding_char, qualified_target, quoted_sheet_ref_re, sheet_ref_re,
};
use super::{CellRef, EngineConfig, SheetModel, match_field};

/// Names a formula might use for `field`: the field itself, and the field
/// with a configured prefix, suffix or both removed
/// (`sg_model_mandays` -> `model_mandays`, `sg_model`, `model`).
pub fn field_aliases(field: &str, config: &EngineConfig) -> Vec<String> {
    let strip_prefix = |name: &str| -> Option<String> {
        config
            .alias_prefixes
            .iter()
            .find_map(|p| name.strip_prefix(p.as_str()))
            .map(str::to_string)
    };
    let strip_suffix = |name: &str| -> Option<String> {
        config
            .alias_suffixes
            .iter()
            .find_map(|s| name.strip_suffix(s.as_str()))
            .map(str::to_string)
    };

    let mut aliases = vec![field.to_string()];
    let no_prefix = strip_prefix(field);
    let no_suffix = strip_suffix(field);
    let bare = no_prefix.as_deref().and_then(strip_suffix);
    for alias in [no_prefix, no_suffix, bare].into_iter().flatten() {
        if !alias.is_empty() && !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }
    aliases
}

/// Formula text with string literals removed and `$` anchors dropped.
fn scannable(formula: &str) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut in_string = false;
    for c in formula.chars() {
        match c {
            '"' => {
                in_string = !in_string;
                out.push(' ');
            }
            '$' if !in_string => {}
            _ if in_string => {}
            _ => out.push(c),
        }
    }
    out
}

/// Case-insensitive whole-word search. `allow_after` decides whether the
/// character following a hit is acceptable (end of text is always fine).
fn contains_word(text: &str, word: &str, allow_after: impl Fn(char) -> bool) -> bool {
    if word.is_empty() {
        return false;
    }
    let haystack = text.to_ascii_lowercase();
    let needle = word.to_ascii_lowercase();
    haystack.match_indices(&needle).any(|(start, m)| {
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_word_char(c) && c != '.');
        let after_ok = haystack[start + m.len()..]
            .chars()
            .next()
            .is_none_or(|c| !is_word_char(c) && allow_after(c));
        before_ok && after_ok
    })
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b([A-Z]+[0-9]+):([A-Z]+[0-9]+)\b").expect("range regex must compile")
    })
}

fn range_covers(text: &str, target: CellRef) -> bool {
    range_re().captures_iter(text).any(|caps| {
        match (CellRef::from_str(&caps[1]), CellRef::from_str(&caps[2])) {
            (Some(a), Some(b)) => {
                (a.row.min(b.row)..=a.row.max(b.row)).contains(&target.row)
                    && (a.col.min(b.col)..=a.col.max(b.col)).contains(&target.col)
            }
            _ => false,
        }
    })
}

fn header_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)(?:\.([0-9]+))?")
            .expect("header token regex must compile")
    })
}

/// Header references in `text` (a formula on `formula_row`) that the resolver
/// would map to `target`. Uses the same skip rules as preprocessing so the two
/// cannot disagree about what a name means.
fn resolves_to(text: &str, fields: &[String], formula_row: usize, target: CellRef) -> bool {
    header_token_re().captures_iter(text).any(|caps| {
        let Some(whole) = caps.get(0) else {
            return false;
        };
        if preceding_char(text, whole.start())
            .is_some_and(|c| is_word_char(c) || matches!(c, '.' | '#' | '!' | '\''))
        {
            return false;
        }
        let after = text[whole.end()..].chars().next();
        if matches!(after, Some('!' | '\'' | '.'))
            || text[whole.end()..].trim_start().starts_with('(')
        {
            return false;
        }
        let name = &caps[1];
        let is_field = fields.iter().any(|f| f == name);
        if CellRef::looks_like_a1(name) && !is_field {
            return false;
        }
        let row = match caps.get(2) {
            Some(n) => match n.as_str().parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
                Some(row) => row,
                None => return false,
            },
            None => {
                if (name.len() == 1 && !is_field)
                    || name.eq_ignore_ascii_case("TRUE")
                    || name.eq_ignore_ascii_case("FALSE")
                {
                    return false;
                }
                formula_row
            }
        };
        row == target.row && matches!(match_field(name, fields), Some((col, _)) if col == target.col)
    })
}

/// Cells in `sheet` whose formulas appear to read the cell at (`row`, `col`).
pub fn find_dependent_cells(
    sheet: &dyn SheetModel,
    row: usize,
    col: usize,
    config: &EngineConfig,
) -> HashSet<CellRef> {
    let changed = CellRef::new(row, col);
    let a1 = changed.to_string();
    let aliases = sheet
        .field_name_for_column(col)
        .map(|f| field_aliases(&f, config))
        .unwrap_or_default();
    let explicit: Vec<String> = aliases.iter().map(|a| format!("{}.{}", a, row + 1)).collect();
    let fields = sheet.field_names();

    let mut dependents = HashSet::new();
    for r in 0..sheet.row_count() {
        for c in 0..sheet.column_count() {
            if (r, c) == (row, col) {
                continue;
            }
            let raw = sheet.raw_value(r, c);
            let Some(formula) = raw.formula() else {
                continue;
            };
            let text = scannable(formula);

            let standard = contains_word(&text, &a1, |_| true) || range_covers(&text, changed);
            let by_row = explicit.iter().any(|w| contains_word(&text, w, |_| true));
            let same_row = r == row && aliases.iter().any(|a| contains_word(&text, a, |ch| ch != '.'));
            let bare: &[String] = if r == row { &aliases } else { &[] };
            let qualified = qualified_mentions(&text, &a1, &explicit, bare);

            if standard
                || by_row
                || same_row
                || qualified
                || resolves_to(&text, &fields, r, changed)
            {
                dependents.insert(CellRef::new(r, c));
            }
        }
    }
    log::debug!("{} has {} dependents", a1, dependents.len());
    dependents
}

/// `!A1`, `!alias.N` or (same row only) `!alias` behind any sheet name.
fn qualified_mentions(text: &str, a1: &str, explicit: &[String], bare: &[String]) -> bool {
    let lower = text.to_ascii_lowercase();
    let hit = |word: &str, allow_dot: bool| {
        let needle = format!("!{}", word.to_ascii_lowercase());
        lower.match_indices(&needle).any(|(start, m)| {
            lower[start + m.len()..]
                .chars()
                .next()
                .is_none_or(|c| !is_word_char(c) && (allow_dot || c != '.'))
        })
    };
    hit(a1, true) || explicit.iter().any(|w| hit(w, true)) || bare.iter().any(|w| hit(w, false))
}

/// Cells in `other` whose sheet-qualified references resolve to the cell at
/// (`row`, `col`) of the sheet registered as `changed_name`.
pub fn find_cross_sheet_dependents(
    changed_name: &str,
    changed: &dyn SheetModel,
    row: usize,
    col: usize,
    other: &dyn SheetModel,
) -> HashSet<CellRef> {
    let target = CellRef::new(row, col);
    let names_changed = |name: &str| name.trim().eq_ignore_ascii_case(changed_name.trim());

    let mut dependents = HashSet::new();
    for r in 0..other.row_count() {
        for c in 0..other.column_count() {
            let raw = other.raw_value(r, c);
            let Some(formula) = raw.formula() else {
                continue;
            };
            let resolves_here = |reference: &str| {
                matches!(qualified_target(reference, r, changed), Ok(Some(cell)) if cell == target)
            };
            let quoted = quoted_sheet_ref_re()
                .captures_iter(formula)
                .any(|caps| names_changed(&caps[1]) && resolves_here(&caps[2]));
            let unquoted = sheet_ref_re()
                .captures_iter(formula)
                .any(|caps| names_changed(&caps[1]) && resolves_here(&caps[2]));
            if quoted || unquoted {
                dependents.insert(CellRef::new(r, c));
            }
        }
    }
    dependents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sheet::testing::MemSheet;

    fn bid_sheet() -> MemSheet {
        MemSheet::new(
            &["code", "sg_model_mandays", "sg_model_rate", "total"],
            &[
                &["sh010", "5", "20", "=model_mandays*model_rate"],
                &["sh020", "3", "20", "=B2*C2"],
                &["sh030", "1", "20", "=sg_model_mandays.1+SUM(B1:B3)"],
                &["sh040", "2", "20", "=\"B1\"&code"],
            ],
        )
    }

    #[test]
    fn test_field_aliases() {
        let config = EngineConfig::default();
        assert_eq!(
            field_aliases("sg_model_mandays", &config),
            vec!["sg_model_mandays", "model_mandays", "sg_model", "model"]
        );
        assert_eq!(field_aliases("code", &config), vec!["code"]);
        assert_eq!(field_aliases("sg_rate", &config), vec!["sg_rate", "rate", "sg"]);
    }

    #[test]
    fn test_standard_reference() {
        let sheet = bid_sheet();
        let deps = find_dependent_cells(&sheet, 1, 1, &EngineConfig::default());
        // D2 names B2 directly, D3 covers it with B1:B3.
        assert!(deps.contains(&CellRef::new(1, 3)));
        assert!(deps.contains(&CellRef::new(2, 3)));
        assert!(!deps.contains(&CellRef::new(0, 3)));
    }

    #[test]
    fn test_same_row_bare_alias() {
        let sheet = bid_sheet();
        let deps = find_dependent_cells(&sheet, 0, 2, &EngineConfig::default());
        assert_eq!(deps, HashSet::from([CellRef::new(0, 3)]));
    }

    #[test]
    fn test_explicit_row_alias() {
        let sheet = bid_sheet();
        let deps = find_dependent_cells(&sheet, 0, 1, &EngineConfig::default());
        assert!(deps.contains(&CellRef::new(0, 3)));
        assert!(deps.contains(&CellRef::new(2, 3)));
    }

    #[test]
    fn test_string_literals_are_ignored() {
        let sheet = bid_sheet();
        let deps = find_dependent_cells(&sheet, 0, 1, &EngineConfig::default());
        assert!(!deps.contains(&CellRef::new(3, 3)));
        let deps = find_dependent_cells(&sheet, 3, 0, &EngineConfig::default());
        assert!(deps.contains(&CellRef::new(3, 3)));
    }

    #[test]
    fn test_qualified_reference_in_same_sheet() {
        let sheet = MemSheet::new(
            &["sg_cmp_rate", "price"],
            &[&["40", "='Bid'!cmp_rate.1*2"], &["45", "=Bid!A2"]],
        );
        let deps = find_dependent_cells(&sheet, 0, 0, &EngineConfig::default());
        assert!(deps.contains(&CellRef::new(0, 1)));
        let deps = find_dependent_cells(&sheet, 1, 0, &EngineConfig::default());
        assert!(deps.contains(&CellRef::new(1, 1)));
    }

    #[test]
    fn test_names_the_resolver_accepts() {
        // `mandays` is not a configured alias but resolves by field-name boundary.
        let sheet = MemSheet::new(
            &["code", "sg_model_mandays", "price", "x"],
            &[
                &["sh010", "5", "=mandays*2", "=x*2"],
                &["sh020", "3", "=MANDAYS.1+1", "4"],
            ],
        );
        let deps = find_dependent_cells(&sheet, 0, 1, &EngineConfig::default());
        assert_eq!(deps, HashSet::from([CellRef::new(0, 2), CellRef::new(1, 2)]));
        let deps = find_dependent_cells(&sheet, 1, 1, &EngineConfig::default());
        assert!(deps.is_empty());
    }

    #[test]
    fn test_single_letter_field_same_row() {
        let sheet = MemSheet::new(&["x", "y"], &[&["3", "=x*2"], &["5", "=x*3"]]);
        let deps = find_dependent_cells(&sheet, 0, 0, &EngineConfig::default());
        assert_eq!(deps, HashSet::from([CellRef::new(0, 1)]));
    }

    #[test]
    fn test_cross_sheet_dependents() {
        let rates = MemSheet::new(&["sg_model_rate", "sg_comp_rate"], &[&["650", "700"]]);
        let items = MemSheet::new(
            &["code", "model_cost", "comp_cost"],
            &[
                &["sh010", "='Rate Card'!model.1*2", "='rate card'!B1"],
                &["sh020", "=Other!model.1", "=\"x\""],
            ],
        );
        let deps = find_cross_sheet_dependents("Rate Card", &rates, 0, 0, &items);
        assert_eq!(deps, HashSet::from([CellRef::new(0, 1)]));
        let deps = find_cross_sheet_dependents("Rate Card", &rates, 0, 1, &items);
        assert_eq!(deps, HashSet::from([CellRef::new(0, 2)]));
    }
}
