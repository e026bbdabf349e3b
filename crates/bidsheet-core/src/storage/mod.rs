//! Reading and writing sheets.

pub mod csv;
pub mod md;

pub use csv::{parse_sheet, read_sheet, write_csv};
pub use md::{save_markdown, write_markdown};
