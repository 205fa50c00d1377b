//! Command-line runner for ViewDefinition transformations.
//!
//! Reads a ViewDefinition and a FHIR data file (Bundle, bare resource, JSON
//! array, or NDJSON), applies the view, and writes the rows in the chosen
//! format:
//!
//! ```text
//! tabula-sof --view condition_flat.json --data conditions.ndjson --format csv
//! tabula-sof -v view.json -d bundle.json -f ndjson -o rows.ndjson
//! ```
//!
//! Errors are reported on stderr with a nonzero exit code; the engine
//! itself never prints.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tabula_sql_on_fhir::data_source::parse_fhir_content;
use tabula_sql_on_fhir::{
    format_output, run_view_definition, ContentType, FhirVersion, ParseOptions, SofError,
    ViewDefinition,
};

#[derive(Parser, Debug)]
#[command(name = "tabula-sof")]
#[command(about = "Run a SQL-on-FHIR ViewDefinition over FHIR resources")]
struct Args {
    /// Path to the ViewDefinition JSON file
    #[arg(long, short = 'v')]
    view: PathBuf,

    /// Path to the FHIR data file: a Bundle, a single resource, an array of
    /// resources, or NDJSON (one resource per line)
    #[arg(long, short = 'd')]
    data: PathBuf,

    /// Output format: csv (with headers), json, or ndjson
    #[arg(long, short = 'f', default_value = "csv")]
    format: String,

    /// Exclude the CSV header row
    #[arg(long)]
    no_headers: bool,

    /// Output file path (defaults to stdout)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// FHIR version override (DSTU3, R4, R4B, R5); otherwise the
    /// ViewDefinition's own fhirVersion list applies
    #[arg(long)]
    fhir_version: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), SofError> {
    let content_type = match ContentType::from_string(&args.format)? {
        ContentType::CsvWithHeader if args.no_headers => ContentType::Csv,
        other => other,
    };

    // Validate the version code up front so a typo fails before any work.
    let fhir_version = args
        .fhir_version
        .as_deref()
        .map(FhirVersion::from_code)
        .transpose()?;

    let view_json = fs::read_to_string(&args.view)?;
    let view = ViewDefinition::parse_with_options(
        &view_json,
        ParseOptions {
            check_name: true,
            fhir_version: fhir_version.map(|v| version_string_for(v).to_string()),
        },
    )?;

    let data = fs::read_to_string(&args.data)?;
    let loaded = parse_fhir_content(&data)?;
    if loaded.skipped_lines > 0 {
        eprintln!("warning: skipped {} invalid lines", loaded.skipped_lines);
    }

    let result = run_view_definition(&view, &loaded.resources)?;
    let bytes = format_output(&result, content_type)?;

    match args.output {
        Some(path) => fs::write(path, bytes)?,
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

fn version_string_for(version: FhirVersion) -> &'static str {
    match version {
        FhirVersion::Dstu3 => "3.0.2",
        FhirVersion::R4 => "4.0.1",
        FhirVersion::R4B => "4.3.0",
        FhirVersion::R5 => "5.0.0",
    }
}
