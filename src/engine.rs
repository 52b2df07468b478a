//! Export pipelines.
//!
//! An [`Exporter`] ties the compiled layouts, the rule tables and the
//! configuration together and turns a batch of raw transactions into the
//! bytes of one file. Every export runs the same stages: deduplicate,
//! classify, filter to the family's rows, build logical records, number them
//! and encode. The exporter only borrows shared, read-only state, so several
//! exports can run at once on different threads.

use crate::apac::{self, ApacOptions};
use crate::assembler::{decode_file, encode_file};
use crate::bpa;
use crate::ciha::{self, QuotaFilter};
use crate::config::ExportConfig;
use crate::enrichment::{Classification, ClassificationEngine, DiagnosisPolicy, MissingMapping};
use crate::error::{ExportError, Result};
use crate::layout::{Format, LayoutRegistry};
use crate::period::ReportingPeriod;
use crate::report::ValidationReport;
use crate::rules::{Category, RuleTables};
use crate::sequencer::{assign_sequence, deduplicate};
use crate::transaction::RawTransaction;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// Counters gathered while exporting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Detail lines written (BPA details, APAC procedures, CIHA lines)
    pub records_written: usize,
    pub bpa_records: usize,
    pub apac_records: usize,
    /// Authorization-category rows kept out of a BPA file
    pub apac_excluded: usize,
    /// Authorizations (`14` bodies) written to an APAC file
    pub authorizations: usize,
    /// Written records per modality label, counted after duplicate rows are
    /// removed
    pub by_modality: BTreeMap<String, usize>,
    /// Distinct procedure codes without a mapping
    pub missing: BTreeSet<MissingMapping>,
}

impl ExportSummary {
    fn count(&mut self, classification: &Classification) {
        self.records_written += 1;
        match classification.category {
            Category::Bpa => self.bpa_records += 1,
            Category::Apac => self.apac_records += 1,
        }
        *self
            .by_modality
            .entry(classification.modality.to_string())
            .or_insert(0) += 1;
    }

    fn log(&self, format: Format) {
        info!(
            "{} export: {} records written ({} BPA, {} APAC, {} APAC excluded)",
            format, self.records_written, self.bpa_records, self.apac_records, self.apac_excluded
        );
        for (modality, count) in &self.by_modality {
            info!("  {}: {} written", modality, count);
        }
        if !self.missing.is_empty() {
            warn!(
                "{} procedure code(s) without mapping, see the warnings list",
                self.missing.len()
            );
        }
    }
}

/// Encoded file plus the counters of the run that produced it.
#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub summary: ExportSummary,
}

/// Runs exports and validations against shared, read-only tables.
#[derive(Debug, Clone, Copy)]
pub struct Exporter<'a> {
    registry: &'a LayoutRegistry,
    config: &'a ExportConfig,
    engine: ClassificationEngine<'a>,
}

impl<'a> Exporter<'a> {
    /// Creates an exporter. Ages and processing dates are computed as of
    /// `reference_date`.
    pub fn new(
        registry: &'a LayoutRegistry,
        rules: &'a RuleTables,
        config: &'a ExportConfig,
        reference_date: NaiveDate,
    ) -> Self {
        Exporter {
            registry,
            config,
            engine: ClassificationEngine::new(rules, reference_date),
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.engine.reference_date()
    }

    /// Builds a BPA-I file.
    ///
    /// Authorization-category procedures are counted and left out. Unmapped
    /// procedures are written with the default billing code and reported in
    /// the summary.
    pub fn export_bpa(
        &self,
        transactions: &[RawTransaction],
        period: ReportingPeriod,
    ) -> Result<ExportOutput> {
        let mut summary = ExportSummary::default();
        let mut details = Vec::new();

        for tx in unique(transactions) {
            let mut classification = self.engine.classify(&tx, DiagnosisPolicy::Standard);
            if let Some(missing) = classification.missing.take() {
                warn!("Transaction {}: {}", tx.transaction_id, missing);
                summary.missing.insert(missing);
            }

            self.engine.apply_age_rule(&mut classification, tx.birth_date);

            if classification.category == Category::Apac {
                debug!(
                    "Transaction {}: {} belongs to an APAC, skipped",
                    tx.transaction_id, classification.billing_code
                );
                summary.apac_excluded += 1;
                continue;
            }

            let age = tx.birth_date.map(|birth| self.engine.age_of(birth));
            details.push(bpa::detail_record(
                &tx,
                &classification,
                self.config,
                period,
                age,
            ));
            summary.count(&classification);
        }

        if details.is_empty() {
            return Err(ExportError::EmptyBatch(format!(
                "no BPA records for period {}",
                period
            )));
        }

        let pages = assign_sequence(&mut details, bpa::SEQUENCE_FIELDS);
        let header = bpa::header_record(&details, pages, self.config, period);
        let bytes = encode_file(self.registry, Format::Bpa, Some(&header), &details)?;

        info!("BPA file: {} lines on {} pages", details.len(), pages);
        summary.log(Format::Bpa);
        Ok(ExportOutput { bytes, summary })
    }

    /// Builds an APAC file: one authorization per patient, numbered from
    /// `options.start_number`.
    ///
    /// Only mapped authorization-category procedures are exported; unmapped
    /// rows are skipped and reported.
    pub fn export_apac(
        &self,
        transactions: &[RawTransaction],
        period: ReportingPeriod,
        options: &ApacOptions,
    ) -> Result<ExportOutput> {
        let mut summary = ExportSummary::default();
        let mut rows = Vec::new();

        for tx in unique(transactions) {
            let mut classification = self.engine.classify(&tx, DiagnosisPolicy::Standard);
            if let Some(missing) = classification.missing.take() {
                warn!("Transaction {}: {}, skipped", tx.transaction_id, missing);
                summary.missing.insert(missing);
                continue;
            }
            if classification.category != Category::Apac {
                continue;
            }
            rows.push((tx, classification));
        }

        let groups = apac::group_by_patient(rows);
        if groups.is_empty() {
            return Err(ExportError::EmptyBatch(format!(
                "no APAC procedures for period {}",
                period
            )));
        }

        let processed_on = self.engine.reference_date();
        let mut records = Vec::new();
        let mut procedures = Vec::new();

        let numbers = apac::running_numbers(
            options.start_number,
            groups.len(),
            self.config.apac_check_digit,
        )?;

        for (group, number) in groups.iter().zip(&numbers) {
            let age = group
                .principal()
                .and_then(|(tx, _)| tx.birth_date)
                .map(|birth| self.engine.age_of(birth));

            let Some(body) = apac::body_record(
                group,
                number,
                self.config,
                period,
                options,
                processed_on,
                age,
            ) else {
                continue;
            };
            debug!(
                "APAC {}: patient {} with {} procedure(s)",
                number,
                group.key,
                group.procedures.len()
            );
            records.push(body);
            summary.authorizations += 1;

            for (tx, classification) in &group.procedures {
                let line = apac::procedure_record(tx, classification, number, period);
                records.push(line.clone());
                procedures.push(line);
                summary.count(classification);
            }
        }

        let header = apac::header_record(
            summary.authorizations,
            &procedures,
            self.config,
            period,
            processed_on,
        );
        let bytes = encode_file(self.registry, Format::Apac, Some(&header), &records)?;

        info!(
            "APAC file: {} authorizations starting at {}",
            summary.authorizations, options.start_number
        );
        summary.log(Format::Apac);
        Ok(ExportOutput { bytes, summary })
    }

    /// Builds a CIHA file from the rows of providers that have a fallback
    /// service, applying the hospital diagnosis policy and the quota filter.
    pub fn export_ciha(
        &self,
        transactions: &[RawTransaction],
        period: ReportingPeriod,
        quotas: &QuotaFilter,
    ) -> Result<ExportOutput> {
        let mut summary = ExportSummary::default();
        let providers = &self.engine.rules().providers;

        let eligible: Vec<RawTransaction> = transactions
            .iter()
            .filter(|tx| providers.has_fallback(&tx.provider_id))
            .cloned()
            .collect();
        debug!(
            "CIHA: {} of {} rows from eligible providers",
            eligible.len(),
            transactions.len()
        );

        let mut rows: Vec<(RawTransaction, Classification)> =
            deduplicate(eligible, |tx| tx.transaction_id)
                .into_iter()
                .map(|tx| {
                    let classification = self.engine.classify(&tx, DiagnosisPolicy::Hospital);
                    (tx, classification)
                })
                .collect();

        ciha::sort_rows(&mut rows);
        let rows = quotas.apply(rows, |(_, classification)| ciha::quota_code(classification));

        let mut details = Vec::with_capacity(rows.len());
        for (tx, mut classification) in rows {
            if let Some(missing) = classification.missing.take() {
                warn!(
                    "Transaction {}: {}, written with procedure id",
                    tx.transaction_id, missing
                );
                summary.missing.insert(missing);
            }
            details.push(ciha::detail_record(&tx, &classification, self.config, period));
            summary.count(&classification);
        }

        if details.is_empty() {
            return Err(ExportError::EmptyBatch(format!(
                "no CIHA records for period {}",
                period
            )));
        }

        ciha::number_lines(&mut details);
        let bytes = encode_file(self.registry, Format::Ciha, None, &details)?;

        summary.log(Format::Ciha);
        Ok(ExportOutput { bytes, summary })
    }

    /// Validates the bytes of a file of the given family.
    pub fn validate(&self, format: Format, bytes: &[u8]) -> Result<ValidationReport> {
        let report = decode_file(self.registry, format, bytes)?;
        info!(
            "Validated {} file: {} lines, {} valid, {} invalid, {} finding(s)",
            format,
            report.total_lines,
            report.valid_records,
            report.invalid_records,
            report.findings.len()
        );
        Ok(report)
    }
}

/// First occurrence of every transaction id, in input order.
fn unique(transactions: &[RawTransaction]) -> Vec<RawTransaction> {
    let kept = deduplicate(transactions.to_vec(), |tx| tx.transaction_id);
    if kept.len() < transactions.len() {
        debug!(
            "Dropped {} duplicate transaction(s)",
            transactions.len() - kept.len()
        );
    }
    kept
}

/// Writes the missing-mapping list: a timestamped title, a rule, and one
/// line per code in sorted order.
pub fn write_warnings<W: Write>(
    mut writer: W,
    missing: &BTreeSet<MissingMapping>,
    generated_at: NaiveDateTime,
) -> Result<()> {
    writeln!(
        writer,
        "Procedimentos sem mapeamento - {}",
        generated_at.format("%d/%m/%Y %H:%M:%S")
    )?;
    writeln!(writer, "{}", "=".repeat(80))?;
    for entry in missing {
        writeln!(writer, "{}", entry)?;
    }
    writer.flush()?;
    Ok(())
}
