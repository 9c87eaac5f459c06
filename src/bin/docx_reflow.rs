//! Reflow a generated report: Calibri 11pt placeholders, narrow photos
//! packed two or three per row in borderless tables, spacing after photos.
//!
//! Usage:
//!   docx-reflow --docx report.docx [-o report_FORMATADO.docx]

use anyhow::{bail, Context, Result};
use clap::Parser;
use photo_report_toolkit::reflow::{default_output_path, reflow_file, ReflowOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docx-reflow", about = "Lay out report photos in columns")]
struct Cli {
    /// Input DOCX file
    #[arg(long)]
    docx: PathBuf,

    /// Output DOCX file (default: <input>_FORMATADO.docx next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Widest photo (cm) placed three per row
    #[arg(long, default_value = "5.92")]
    three_max_cm: f64,

    /// Widest photo (cm) placed two per row
    #[arg(long, default_value = "7.50")]
    two_max_cm: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if !cli.docx.is_file() {
        bail!("File not found: {}", cli.docx.display());
    }
    if cli.three_max_cm > cli.two_max_cm {
        bail!(
            "--three-max-cm ({}) must not exceed --two-max-cm ({})",
            cli.three_max_cm,
            cli.two_max_cm
        );
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.docx));
    let options = ReflowOptions {
        three_per_row_max_cm: cli.three_max_cm,
        two_per_row_max_cm: cli.two_max_cm,
        ..ReflowOptions::default()
    };

    let report = reflow_file(&cli.docx, &output, &options)
        .with_context(|| format!("Failed to reflow {}", cli.docx.display()))?;

    println!("Formatted document: {}", output.display());
    println!("  Placeholder runs: {}", report.placeholder_runs);
    println!("  Photos:           {}", report.images_seen);
    println!("  Tables created:   {}", report.tables_created);
    Ok(())
}
