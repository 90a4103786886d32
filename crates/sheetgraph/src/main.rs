//! Command-line front end over compiled-sheet snapshots.
//!
//! Exit status is 0 on success; any parse/compile/evaluate failure
//! prints a single-line diagnostic on stderr and exits non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use sheetgraph_eval::{CellValue, CompiledSheet};

#[derive(Parser)]
#[command(
    name = "sheetgraph",
    version,
    about = "Evaluate and trim compiled spreadsheet graphs"
)]
struct Cli {
    /// Compiled snapshot to operate on
    #[arg(long, value_name = "SNAPSHOT")]
    input: PathBuf,

    /// Evaluate one cell or range address and print the value
    #[arg(long, value_name = "ADDR")]
    evaluate: Option<String>,

    /// Set input cells before evaluating; ADDR=VALUE, repeatable
    #[arg(long = "set", value_name = "ADDR=VALUE")]
    sets: Vec<String>,

    /// Comma-separated input addresses to trim against (requires --out)
    #[arg(long, value_name = "INPUTS", requires = "out")]
    trim: Option<String>,

    /// Comma-separated output addresses to keep when trimming
    #[arg(long, value_name = "OUTPUTS", requires = "trim")]
    out: Option<String>,

    /// Write the (trimmed) snapshot back to this path
    #[arg(long, value_name = "PATH")]
    save: Option<PathBuf>,

    /// Re-evaluate captured cells and report disagreements
    #[arg(long)]
    validate: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sheetgraph: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut sheet = CompiledSheet::deserialize(&cli.input)
        .with_context(|| format!("loading {}", cli.input.display()))?;

    for assignment in &cli.sets {
        let (addr, text) = assignment
            .split_once('=')
            .with_context(|| format!("malformed --set '{assignment}', expected ADDR=VALUE"))?;
        sheet
            .set_value(addr.trim(), parse_value(text.trim()))
            .with_context(|| format!("setting {addr}"))?;
    }

    if cli.validate {
        let mismatches = sheet.validate(&[])?;
        if mismatches.is_empty() {
            println!("validate: all captured values agree");
        } else {
            for m in &mismatches {
                println!("validate: {} expected {} got {}", m.addr, m.expected, m.got);
            }
            bail!("{} cell(s) disagree with captured values", mismatches.len());
        }
    }

    if let Some(addr) = &cli.evaluate {
        let value = sheet
            .evaluate(addr)
            .with_context(|| format!("evaluating {addr}"))?;
        println!("{addr} = {value}");
    }

    if let (Some(inputs), Some(outputs)) = (&cli.trim, &cli.out) {
        let inputs: Vec<&str> = inputs.split(',').map(str::trim).collect();
        let outputs: Vec<&str> = outputs.split(',').map(str::trim).collect();
        sheet
            .trim(&inputs, &outputs)
            .context("trimming the graph")?;
        println!(
            "trimmed to {} nodes / {} edges",
            sheet.node_count(),
            sheet.edge_count()
        );
    }

    if let Some(path) = &cli.save {
        sheet
            .serialize(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("saved {}", path.display());
    }

    Ok(())
}

/// A CLI value literal: number, TRUE/FALSE, blank, or text.
fn parse_value(text: &str) -> CellValue {
    if text.is_empty() {
        return CellValue::Empty;
    }
    if let Ok(n) = text.parse::<f64>() {
        return CellValue::Number(n);
    }
    if text.eq_ignore_ascii_case("true") {
        return CellValue::Boolean(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return CellValue::Boolean(false);
    }
    CellValue::Text(text.to_string())
}
