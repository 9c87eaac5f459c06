//! Photo Report - build Word photo reports from ZIP archives
//!
//! Usage:
//!   photo-report generate fotos.zip --field nome_projeto="Agência Centro" \
//!     --field modelo=modelo_3575 --form dados.json
//!   photo-report preview fotos.zip -o preview.json
//!   photo-report generate fotos.zip --form dados.json --order preview.json
//!   photo-report config show
//!   photo-report config set empresa --type fixed --value "ACME"
//!   photo-report templates

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use photo_report_toolkit::archive::SubfolderOrder;
use photo_report_toolkit::config_store::{FieldType, PlaceholderStore, DEFAULT_CONFIG_PATH};
use photo_report_toolkit::content::{preview_to_form_fields, PreviewFolder};
use photo_report_toolkit::injector::SubstitutionMode;
use photo_report_toolkit::pipeline::{
    discard_preview, generate_report, prepare_preview, PipelineConfig, ReportRequest,
};
use photo_report_toolkit::placeholders::{FormData, BRAZILIAN_STATES};
use photo_report_toolkit::reflow::{default_output_path, reflow_file, ReflowOptions};
use photo_report_toolkit::ReportError;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "photo-report")]
#[command(about = "Generate photographic survey reports from ZIP archives and Word templates")]
struct Cli {
    /// Placeholder configuration file
    #[arg(long, global = true, env = "PHOTO_REPORT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding `<template>.docx` files
    #[arg(long, global = true, env = "PHOTO_REPORT_TEMPLATES", default_value = "models")]
    templates: PathBuf,

    /// Directory reports are written to
    #[arg(long, global = true, env = "PHOTO_REPORT_OUTPUT", default_value = "output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a report from a ZIP of categorized photos
    Generate {
        /// ZIP archive of photo folders
        archive: PathBuf,

        /// Template identifier (overrides the form's `modelo` field)
        #[arg(short, long)]
        template: Option<String>,

        /// Form field as key=value (repeatable)
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// JSON object of form fields
        #[arg(long)]
        form: Option<PathBuf>,

        /// Edited preview JSON to use instead of the archive's own order
        #[arg(long)]
        order: Option<PathBuf>,

        /// Sort subfolders alphabetically instead of in listing order
        #[arg(long)]
        alphabetical: bool,

        /// Substitute placeholders in place, keeping run formatting
        #[arg(long)]
        keep_run_format: bool,

        /// Also write a reflowed copy with photos packed into columns
        #[arg(long)]
        reflow: bool,
    },

    /// Walk an archive and write its grouped content as JSON for reordering
    Preview {
        /// ZIP archive of photo folders
        archive: PathBuf,

        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sort subfolders alphabetically instead of in listing order
        #[arg(long)]
        alphabetical: bool,

        /// Delete the scratch copies right away (no generate step follows)
        #[arg(long)]
        discard: bool,
    },

    /// Show or change the placeholder configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List known templates and whether their files are present
    Templates,

    /// List valid state codes for the `uf` field
    States,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every field grouped by section
    Show {
        /// Print the raw JSON record instead
        #[arg(long)]
        json: bool,
    },

    /// Change a field's binding and value
    Set {
        /// Field key (e.g. empresa)
        key: String,

        /// variable or fixed (keeps the current type when omitted)
        #[arg(long = "type")]
        field_type: Option<FieldType>,

        /// Value used when the field is fixed (keeps the current value when omitted)
        #[arg(long)]
        value: Option<String>,

        /// New display label
        #[arg(long)]
        label: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            ref archive,
            ref template,
            ref fields,
            ref form,
            ref order,
            alphabetical,
            keep_run_format,
            reflow,
        } => {
            let mut config = pipeline_config(&cli, alphabetical);
            if keep_run_format {
                config.inject.mode = SubstitutionMode::SpliceText;
            }
            let form = load_form(form.as_deref(), fields)?;
            let mut request = ReportRequest::new(archive, form);
            if let Some(template) = template {
                request.form.insert("modelo", template);
                request.template_id = template.clone();
            }
            if let Some(order) = order {
                let preview = read_preview(order)?;
                request = request.with_order(preview_to_form_fields(&preview));
            }
            generate(&cli, &request, &config, reflow)?;
        }
        Commands::Preview {
            ref archive,
            ref output,
            alphabetical,
            discard,
        } => {
            let config = pipeline_config(&cli, alphabetical);
            preview(archive, output.as_deref(), &config, discard)?;
        }
        Commands::Config { ref action } => {
            let mut store = open_store(&cli.config)?;
            match action {
                ConfigAction::Show { json } => show_config(&store, *json)?,
                ConfigAction::Set {
                    key,
                    field_type,
                    value,
                    label,
                } => {
                    let found = store
                        .update_placeholder(key, *field_type, value.as_deref(), label.as_deref())
                        .with_context(|| format!("Failed to save {}", cli.config.display()))?;
                    if !found {
                        bail!("Unknown placeholder field '{}'", key);
                    }
                    println!("Updated {} in {}", key, store.path().display());
                }
            }
        }
        Commands::Templates => {
            let config = pipeline_config(&cli, false);
            println!("Templates in {}:", config.catalog.dir().display());
            for (id, label, present) in config.catalog.available() {
                let mark = if present { "ok" } else { "missing" };
                println!("  {:<12} {:<36} [{}]", id, label, mark);
            }
        }
        Commands::States => {
            println!("{}", BRAZILIAN_STATES.join(" "));
        }
    }

    Ok(())
}

fn show_config(store: &PlaceholderStore, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(store.config())?);
    } else {
        println!("Placeholder configuration: {}", store.path().display());
        print!("{}", store.render_listing());
    }
    Ok(())
}

fn pipeline_config(cli: &Cli, alphabetical: bool) -> PipelineConfig {
    let mut config = PipelineConfig::new(&cli.templates, &cli.output_dir);
    if alphabetical {
        config.walk.subfolder_order = SubfolderOrder::Alphabetical;
    }
    config
}

fn open_store(path: &Path) -> Result<PlaceholderStore> {
    PlaceholderStore::open(path)
        .with_context(|| format!("Failed to open placeholder configuration {}", path.display()))
}

/// Merge a JSON form file with `key=value` overrides.
fn load_form(path: Option<&Path>, fields: &[String]) -> Result<FormData> {
    let mut form = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read form {}", path.display()))?;
            serde_json::from_str::<FormData>(&raw)
                .with_context(|| format!("Invalid form JSON in {}", path.display()))?
        }
        None => FormData::new(),
    };
    let overrides = FormData::from_pairs(fields.iter().map(|s| s.as_str()))
        .map_err(describe)
        .context("Invalid --field argument")?;
    form.0.extend(overrides.0);
    Ok(form)
}

fn read_preview(path: &Path) -> Result<Vec<PreviewFolder>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read preview {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid preview JSON in {}", path.display()))
}

/// Spell out every field of a validation failure.
fn describe(err: ReportError) -> anyhow::Error {
    match err {
        ReportError::Validation(errors) => {
            let lines: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
            anyhow::anyhow!("Validation failed:\n{}", lines.join("\n"))
        }
        other => anyhow::Error::new(other),
    }
}

fn generate(cli: &Cli, request: &ReportRequest, config: &PipelineConfig, reflow: bool) -> Result<()> {
    let store = open_store(&cli.config)?;
    let report = generate_report(request, config, &store)
        .map_err(describe)
        .context("Report generation failed")?;

    println!("Report generated: {}", report.output_path.display());
    println!("  Images inserted: {}", report.image_count);
    if !report.warnings.is_empty() {
        println!("  Warnings: {}", report.warnings.len());
        for warning in &report.warnings {
            println!("    {}", warning);
        }
    }

    if reflow {
        let output = default_output_path(&report.output_path);
        let summary = reflow_file(&report.output_path, &output, &ReflowOptions::default())
            .with_context(|| format!("Reflow failed for {}", report.output_path.display()))?;
        println!(
            "Reflowed copy: {} ({} tables)",
            output.display(),
            summary.tables_created
        );
    }
    Ok(())
}

fn preview(
    archive: &Path,
    output: Option<&Path>,
    config: &PipelineConfig,
    discard: bool,
) -> Result<()> {
    let form = FormData::new();
    let folders = prepare_preview(archive, &form, config)
        .map_err(describe)
        .with_context(|| format!("Failed to process {}", archive.display()))?;
    let json = serde_json::to_string_pretty(&folders)?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let images: usize = folders.iter().map(|f| f.images.len()).sum();
            println!(
                "Preview written: {} ({} folders, {} images)",
                path.display(),
                folders.len(),
                images
            );
        }
        None => println!("{json}"),
    }

    if discard {
        let removed = discard_preview(&folders);
        log::info!("Discarded {removed} scratch images");
    }
    Ok(())
}
