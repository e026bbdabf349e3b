//! CSV import/export.
//!
//! A sheet file has one header line of field names followed by one line per
//! row. Fields starting with `=` are formulas.

use bidsheet_engine::engine::{CellRef, CellType, SheetModel};
use std::io::Write;
use std::path::Path;

use crate::error::{BidsheetError, Result};
use crate::sheet::Sheet;
use crate::workbook::Workbook;

/// Load a sheet from a CSV file.
pub fn read_sheet(path: &Path) -> Result<Sheet> {
    let content = std::fs::read_to_string(path)?;
    parse_sheet(&content)
}

/// Parse CSV text into a sheet. Rows wider than the header are rejected.
pub fn parse_sheet(content: &str) -> Result<Sheet> {
    let mut lines = content.lines().enumerate().skip_while(|(_, l)| l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Err(BidsheetError::EmptyCsv);
    };
    let fields: Vec<String> = parse_csv_line(header);
    let width = fields.len();
    let sheet = Sheet::new(fields);

    let mut row = 0;
    for (line_idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let values = parse_csv_line(line);
        if values.len() > width {
            return Err(BidsheetError::Parse {
                line: line_idx + 1,
                message: format!("{} fields but the header has {}", values.len(), width),
            });
        }
        for (col, field) in values.iter().enumerate() {
            let cell = parse_csv_field(field);
            if !cell.is_empty() {
                sheet.set_cell_value(row, col, cell);
            }
        }
        sheet.ensure_rows(row + 1);
        row += 1;
    }

    Ok(sheet)
}

/// Parse a single CSV line, handling quoted fields
pub(crate) fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut field_was_quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => {
                    in_quotes = true;
                    field_was_quoted = true;
                }
                ',' => {
                    if field_was_quoted {
                        fields.push(std::mem::take(&mut current));
                    } else {
                        fields.push(current.trim().to_string());
                        current.clear();
                    }
                    field_was_quoted = false;
                }
                _ => current.push(c),
            }
        }
    }
    if field_was_quoted {
        fields.push(current);
    } else {
        fields.push(current.trim().to_string());
    }
    fields
}

/// Parse a CSV field into a cell.
/// - Empty -> Empty
/// - Leading `=` -> Formula
/// - Number (unless it has leading zeros like shot code "007") -> Number
/// - Otherwise -> Text, with surrounding whitespace kept if it was quoted in
pub(crate) fn parse_csv_field(field: &str) -> CellType {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellType::Empty;
    }
    if trimmed.starts_with('=') {
        return CellType::Formula(trimmed.to_string());
    }
    if field != trimmed {
        return CellType::Text(field.to_string());
    }

    if trimmed.starts_with('0')
        && trimmed.len() > 1
        && !trimmed.starts_with("0.")
        && trimmed.chars().nth(1).is_some_and(|c| c.is_ascii_digit())
    {
        return CellType::Text(trimmed.to_string());
    }

    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => CellType::Number(n),
        _ => CellType::Text(trimmed.to_string()),
    }
}

/// Export a sheet's displayed values (formulas evaluated) as CSV.
pub fn write_csv(path: &Path, workbook: &Workbook, sheet_name: &str) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_csv_to(&mut file, workbook, sheet_name)
}

pub fn write_csv_to<W: Write>(w: &mut W, workbook: &Workbook, sheet_name: &str) -> Result<()> {
    let sheet = workbook
        .sheet(sheet_name)
        .ok_or_else(|| BidsheetError::UnknownSheet(sheet_name.to_string()))?;
    let header: Vec<String> = (0..sheet.column_count())
        .map(|col| {
            let name = sheet
                .field_name_for_column(col)
                .unwrap_or_else(|| CellRef::col_to_letters(col));
            escape_csv_field(&name)
        })
        .collect();
    writeln!(w, "{}", header.join(","))?;

    for row in 0..sheet.row_count() {
        let mut fields = Vec::with_capacity(sheet.column_count());
        for col in 0..sheet.column_count() {
            fields.push(escape_csv_field(&workbook.display_text(sheet_name, row, col)?));
        }
        writeln!(w, "{}", fields.join(","))?;
    }
    Ok(())
}

/// Escape a field for CSV output
fn escape_csv_field(field: &str) -> String {
    // Guard against CSV formula injection in spreadsheet apps.
    let first_non_space = field.trim_start_matches([' ', '\t']).chars().next();
    let safe_field = if matches!(first_non_space, Some('=' | '+' | '@')) {
        format!("'{}", field)
    } else {
        field.to_string()
    };

    if safe_field.contains(',')
        || safe_field.contains('"')
        || safe_field.contains('\n')
        || safe_field.contains('\r')
    {
        format!("\"{}\"", safe_field.replace('"', "\"\""))
    } else {
        safe_field
    }
}
