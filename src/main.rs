//! bidsheet - evaluate CSV bid sheets from the command line

mod config;

use anyhow::{Context, bail};
use bidsheet_core::storage::{read_sheet, save_markdown, write_csv, write_markdown};
use bidsheet_core::{Sheet, Workbook};
use bidsheet_engine::engine::{SheetModel, Value, format_value};
use std::env;
use std::path::{Path, PathBuf};

fn print_usage() {
    eprintln!("Usage: bidsheet [OPTIONS] <SHEET>...");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <SHEET>                   CSV file; named after the file stem, or NAME=PATH");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --command <FORMULA>   Evaluate FORMULA in the first sheet and print it");
    eprintln!("  -r, --row <N>             1-based row used for --command (default 1)");
    eprintln!("  -o, --output <FILE>       Write Markdown (or CSV for .csv) instead of printing");
    eprintln!("  --config <FILE>           Load engine configuration from TOML");
    eprintln!("  -h, --help                Print help");
}

struct Args {
    sheets: Vec<(String, PathBuf)>,
    command: Option<String>,
    row: usize,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        sheets: Vec::new(),
        command: None,
        row: 1,
        output: None,
        config: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-c" | "--command" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --command requires a formula");
                    std::process::exit(1);
                }
                parsed.command = Some(args[i].to_string());
            }
            "-r" | "--row" => {
                i += 1;
                match args.get(i).and_then(|s| s.parse::<usize>().ok()) {
                    Some(n) if n >= 1 => parsed.row = n,
                    _ => {
                        eprintln!("Error: --row requires a positive number");
                        std::process::exit(1);
                    }
                }
            }
            "-o" | "--output" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --output requires a file path");
                    std::process::exit(1);
                }
                parsed.output = Some(PathBuf::from(&args[i]));
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a file path");
                    std::process::exit(1);
                }
                parsed.config = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
            arg => parsed.sheets.push(sheet_arg(arg)),
        }
        i += 1;
    }
    parsed
}

/// `NAME=PATH`, or a bare path named after its file stem.
fn sheet_arg(arg: &str) -> (String, PathBuf) {
    if let Some((name, path)) = arg.split_once('=')
        && !name.trim().is_empty()
    {
        return (name.trim().to_string(), PathBuf::from(path));
    }
    let path = PathBuf::from(arg);
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| arg.to_string());
    (name, path)
}

fn load_workbook(args: &Args) -> anyhow::Result<Workbook> {
    let (engine_config, warnings) = config::load_config(args.config.as_deref());
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }

    let mut workbook = Workbook::new(engine_config);
    for (name, path) in &args.sheets {
        let sheet = read_sheet(path).with_context(|| format!("loading {}", path.display()))?;
        workbook.add_sheet(name, sheet)?;
        log::debug!("loaded {} as '{}'", path.display(), name);
    }
    Ok(workbook)
}

/// Evaluate a one-off formula at `row` of the first sheet, in the column just
/// past its last field. Returns the process exit code.
fn run_command(
    workbook: &mut Workbook,
    formula: &str,
    row: usize,
    output: Option<&Path>,
) -> anyhow::Result<i32> {
    if workbook.sheet_names().is_empty() {
        workbook.add_sheet("Sheet1", Sheet::new(Vec::new()))?;
    }
    let formula = if formula.trim_start().starts_with('=') {
        formula.to_string()
    } else {
        format!("={}", formula)
    };

    let first = workbook.sheet_names().remove(0);
    let evaluator = workbook.evaluator(&first)?;
    let col = evaluator.sheet().column_count();
    let value = evaluator.evaluate(&formula, row - 1, col);
    let text = format_value(&value);

    if let Some(path) = output {
        std::fs::write(path, format!("{}\n", text))
            .with_context(|| format!("writing {}", path.display()))?;
        eprintln!("Result written to {}", path.display());
    } else {
        println!("{}", text);
    }
    Ok(if matches!(value, Value::Error(_)) { 1 } else { 0 })
}

fn run(args: Args) -> anyhow::Result<i32> {
    let mut workbook = load_workbook(&args)?;

    if let Some(formula) = args.command.as_deref() {
        return run_command(&mut workbook, formula, args.row, args.output.as_deref());
    }

    if args.sheets.is_empty() {
        print_usage();
        bail!("no sheets given");
    }

    match args.output.as_deref() {
        Some(path) if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) => {
            let first = workbook.sheet_names().remove(0);
            write_csv(path, &workbook, &first)?;
            println!("Exported '{}' to {}", first, path.display());
        }
        Some(path) => {
            save_markdown(path, &workbook)?;
            println!("Exported to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            write_markdown(&mut stdout, &workbook)?;
        }
    }
    Ok(0)
}

fn main() {
    env_logger::init();
    let args = parse_args();
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
