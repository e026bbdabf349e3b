//! Markdown export functionality

use bidsheet_engine::engine::{CellRef, SheetModel};
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::workbook::Workbook;

/// Write every sheet of the workbook to a markdown file.
pub fn save_markdown(path: &Path, workbook: &Workbook) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_markdown(&mut file, workbook)
}

/// One `# Name` section per sheet, each a table of displayed values under
/// the field names.
pub fn write_markdown<W: Write>(w: &mut W, workbook: &Workbook) -> Result<()> {
    for (i, name) in workbook.sheet_names().iter().enumerate() {
        let Some(sheet) = workbook.sheet(name) else {
            continue;
        };
        if i > 0 {
            writeln!(w)?;
        }
        writeln!(w, "# {}", name)?;
        writeln!(w)?;

        let cols = sheet.column_count();
        if cols == 0 || sheet.row_count() == 0 {
            writeln!(w, "*Empty sheet*")?;
            continue;
        }

        write!(w, "|")?;
        for col in 0..cols {
            let field = sheet
                .field_name_for_column(col)
                .unwrap_or_else(|| CellRef::col_to_letters(col));
            write!(w, " {} |", escape_markdown(&field))?;
        }
        writeln!(w)?;

        write!(w, "|")?;
        for _ in 0..cols {
            write!(w, "---|")?;
        }
        writeln!(w)?;

        for row in 0..sheet.row_count() {
            write!(w, "|")?;
            for col in 0..cols {
                let display = workbook.display_text(name, row, col)?;
                write!(w, " {} |", escape_markdown(&display))?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}

/// Escape special markdown characters in cell content
fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ").replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::Sheet;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_markdown_export() {
        let mut wb = Workbook::default();
        wb.add_sheet(
            "Line Items",
            Sheet::from_rows(
                fields(&["code", "sg_model_mandays", "price"]),
                &[vec!["sh010", "2", "=sg_model_mandays*650"], vec!["a|b", "", "=price.1/3"]],
            ),
        )
        .unwrap();
        wb.add_sheet("Notes", Sheet::new(Vec::new())).unwrap();

        let mut out = Vec::new();
        write_markdown(&mut out, &wb).unwrap();
        let expected = "\
# Line Items

| code | sg_model_mandays | price |
|---|---|---|
| sh010 | 2 | 1,300 |
| a\\|b |  | 433.33 |

# Notes

*Empty sheet*
";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a|b\r\nc"), "a\\|b c");
    }
}
