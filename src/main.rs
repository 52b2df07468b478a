//! SUS Billing CLI
//!
//! Exports raw production rows (CSV) into BPA-I, APAC or CIHA files and
//! validates existing files against the official layouts.
//!
//! # Usage
//!
//! ```bash
//! sus-billing export bpa --input producao.csv --output PA202403.TXT --period 202403
//! sus-billing validate PA202403.TXT --format bpa --report
//! ```
//!
//! # Exit codes
//!
//! - `0`: export written, or file validated without problems
//! - `1`: validation found diagnostics or findings
//! - `2`: runtime error
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;
use sus_billing::engine::write_warnings;
use sus_billing::transaction::read_transactions;
use sus_billing::{
    ApacOptions, ExportConfig, ExportError, Exporter, Format, LayoutRegistry, QuotaFilter,
    ReportingPeriod, Result, RuleTables,
};

/// Exporter and validator for SUS fixed-width billing files
#[derive(Parser)]
#[command(name = "sus-billing")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a CSV batch into a billing file
    Export {
        /// Target family: bpa, apac or ciha
        format: Format,

        /// CSV file with one raw transaction per row
        #[arg(short, long)]
        input: PathBuf,

        /// File to write
        #[arg(short, long)]
        output: PathBuf,

        /// Reporting period (YYYYMM)
        #[arg(short, long)]
        period: ReportingPeriod,

        /// TOML file overriding the default organization settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Date ages are computed on (default: today)
        #[arg(long)]
        reference_date: Option<NaiveDate>,

        /// Write procedures without mapping to this file
        #[arg(short, long)]
        warnings: Option<PathBuf>,

        /// First APAC running number (required for apac)
        #[arg(long)]
        apac_start_number: Option<u64>,

        /// First day of APAC validity (default: first day of the period)
        #[arg(long)]
        apac_validity_start: Option<NaiveDate>,

        /// CIHA procedure quota file
        #[arg(long)]
        quota_file: Option<PathBuf>,

        /// Override the facility CNES code
        #[arg(long)]
        cnes: Option<String>,
    },

    /// Validate a billing file
    Validate {
        /// File to validate
        file: PathBuf,

        /// Family of the file
        #[arg(short, long, default_value = "bpa")]
        format: Format,

        /// Also write an HTML report
        #[arg(short, long)]
        report: bool,

        /// HTML report path (default: <stem>_validacao.html next to the file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    }
}

/// Returns `false` when a validated file has problems.
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Export {
            format,
            input,
            output,
            period,
            config,
            reference_date,
            warnings,
            apac_start_number,
            apac_validity_start,
            quota_file,
            cnes,
        } => {
            let mut settings = match config {
                Some(path) => ExportConfig::from_file(&path)?,
                None => ExportConfig::default(),
            };
            if let Some(cnes) = cnes {
                settings.cnes = cnes;
            }

            let registry = LayoutRegistry::new()?;
            let rules = RuleTables::builtin()?;
            let reference_date = reference_date.unwrap_or_else(|| Local::now().date_naive());
            let exporter = Exporter::new(&registry, &rules, &settings, reference_date);

            let rows = read_transactions(BufReader::new(File::open(&input)?))?;

            let result = match format {
                Format::Bpa => exporter.export_bpa(&rows, period)?,
                Format::Apac => {
                    let options = ApacOptions {
                        start_number: apac_start_number
                            .ok_or(ExportError::MissingArgument("--apac-start-number"))?,
                        validity_start: apac_validity_start.unwrap_or_else(|| period.first_day()),
                    };
                    exporter.export_apac(&rows, period, &options)?
                }
                Format::Ciha => {
                    let quotas = match quota_file {
                        Some(path) => QuotaFilter::parse(&std::fs::read_to_string(path)?),
                        None => QuotaFilter::default(),
                    };
                    exporter.export_ciha(&rows, period, &quotas)?
                }
            };

            std::fs::write(&output, &result.bytes)?;
            info!("Wrote {}", output.display());

            if let Some(path) = warnings {
                let writer = BufWriter::new(File::create(&path)?);
                write_warnings(writer, &result.summary.missing, Local::now().naive_local())?;
                info!(
                    "Wrote {} missing mapping(s) to {}",
                    result.summary.missing.len(),
                    path.display()
                );
            }

            println!(
                "{} records written to {}",
                result.summary.records_written,
                output.display()
            );
            Ok(true)
        }

        Commands::Validate {
            file,
            format,
            report,
            output,
        } => {
            let bytes = std::fs::read(&file)?;
            let registry = LayoutRegistry::new()?;
            let rules = RuleTables::builtin()?;
            let settings = ExportConfig::default();
            let exporter = Exporter::new(&registry, &rules, &settings, Local::now().date_naive());

            let result = exporter.validate(format, &bytes)?;
            println!("{}", result);
            for message in result.messages() {
                println!("  {}", message);
            }

            if report {
                let path = output.unwrap_or_else(|| default_report_path(&file));
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                std::fs::write(&path, result.render_html(&name))?;
                println!("HTML report written to {}", path.display());
            }

            Ok(result.is_clean())
        }
    }
}

fn default_report_path(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "relatorio".to_string());
    file.with_file_name(format!("{}_validacao.html", stem))
}
