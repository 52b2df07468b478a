//! # SUS Billing
//!
//! Exporter and validator for the fixed-width production files of the
//! Brazilian public health system: BPA-I (individualized outpatient
//! production), APAC (procedure authorizations) and CIHA (admission
//! communication).
//!
//! ## Design Principles
//!
//! - **Table-driven layouts**: every record is a compiled list of positional
//!   field specs; encoding and validation read the same tables
//! - **Lenient encode, strict decode**: bad values degrade to fillers when
//!   writing and become diagnostics when reading
//! - **Injected rules**: procedure and provider tables are validated once and
//!   shared read-only
//! - **Deterministic output**: records are sorted and numbered before encoding
//!
//! ## Example
//!
//! ```no_run
//! use sus_billing::{Exporter, ExportConfig, LayoutRegistry, RuleTables};
//! use sus_billing::transaction::read_transactions;
//! use chrono::NaiveDate;
//! use std::fs::File;
//!
//! let registry = LayoutRegistry::new().unwrap();
//! let rules = RuleTables::builtin().unwrap();
//! let config = ExportConfig::default();
//! let today = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
//! let exporter = Exporter::new(&registry, &rules, &config, today);
//!
//! let rows = read_transactions(File::open("producao.csv").unwrap()).unwrap();
//! let output = exporter.export_bpa(&rows, "202403".parse().unwrap()).unwrap();
//! std::fs::write("PA202403.TXT", &output.bytes).unwrap();
//! ```

pub mod apac;
pub mod assembler;
pub mod bpa;
pub mod ciha;
pub mod codec;
pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod layout;
pub mod period;
pub mod quantity;
pub mod record;
pub mod report;
pub mod rules;
pub mod sequencer;
pub mod transaction;

pub use apac::ApacOptions;
pub use ciha::QuotaFilter;
pub use config::ExportConfig;
pub use engine::{ExportOutput, ExportSummary, Exporter};
pub use enrichment::{Classification, ClassificationEngine, DiagnosisPolicy, MissingMapping};
pub use error::{ExportError, Result};
pub use layout::{Format, LayoutRegistry, RecordType};
pub use period::ReportingPeriod;
pub use quantity::Quantity;
pub use record::{FieldValue, LogicalRecord};
pub use report::{Diagnostic, DiagnosticKind, Finding, FindingKind, ValidationReport};
pub use rules::RuleTables;
pub use transaction::RawTransaction;
