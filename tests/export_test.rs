//! Library-level tests running whole export and validation pipelines over the
//! CSV fixture in `tests/data`.

use chrono::NaiveDate;
use encoding_rs::WINDOWS_1252;
use std::fs::File;
use std::path::Path;
use sus_billing::transaction::read_transactions;
use sus_billing::{
    ApacOptions, DiagnosticKind, ExportConfig, ExportError, Exporter, FindingKind, Format,
    LayoutRegistry, QuotaFilter, RawTransaction, ReportingPeriod, RuleTables,
};

struct Setup {
    registry: LayoutRegistry,
    rules: RuleTables,
    config: ExportConfig,
}

impl Setup {
    fn new() -> Self {
        Setup {
            registry: LayoutRegistry::new().unwrap(),
            rules: RuleTables::builtin().unwrap(),
            config: ExportConfig::default(),
        }
    }

    fn exporter(&self) -> Exporter<'_> {
        let reference = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        Exporter::new(&self.registry, &self.rules, &self.config, reference)
    }
}

fn fixture() -> Vec<RawTransaction> {
    read_transactions(File::open("tests/data/producao.csv").unwrap()).unwrap()
}

fn period() -> ReportingPeriod {
    "202403".parse().unwrap()
}

fn decode_lines(bytes: &[u8]) -> Vec<String> {
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.lines().map(str::to_string).collect()
}

fn columns(line: &str, start: usize, length: usize) -> String {
    line.chars().skip(start - 1).take(length).collect()
}

#[test]
fn test_fixture_reads_all_rows() {
    assert_eq!(fixture().len(), 8);
}

#[test]
fn test_bpa_export() {
    let setup = Setup::new();
    let output = setup.exporter().export_bpa(&fixture(), period()).unwrap();

    assert_eq!(output.summary.records_written, 5);
    assert_eq!(output.summary.apac_excluded, 2);
    assert_eq!(output.summary.missing.len(), 1);
    assert!(output.summary.missing.iter().any(|m| m.code == "99999"));

    let lines = decode_lines(&output.bytes);
    assert_eq!(lines.len(), 6);
    assert_eq!(columns(&lines[0], 1, 13), "01#BPA#202403");
    assert_eq!(columns(&lines[0], 14, 6), "000005");
    assert!(lines[1..].iter().all(|l| l.starts_with("03")));
    assert!(lines[1..].iter().all(|l| l.chars().count() == 350));
    assert!(output.bytes.windows(2).any(|w| w == b"\r\n"));
}

#[test]
fn test_bpa_export_validates_without_header_findings() {
    let setup = Setup::new();
    let exporter = setup.exporter();
    let output = exporter.export_bpa(&fixture(), period()).unwrap();

    let report = exporter.validate(Format::Bpa, &output.bytes).unwrap();
    assert_eq!(report.total_lines, 6);
    assert_eq!(report.detail_records, 5);
    assert!(report.findings.is_empty());
    assert_eq!(report.count_kind(DiagnosticKind::LengthError), 0);
    assert_eq!(report.count_kind(DiagnosticKind::UnknownRecordType), 0);
}

#[test]
fn test_tampered_line_count_is_reported() {
    let setup = Setup::new();
    let exporter = setup.exporter();
    let output = exporter.export_bpa(&fixture(), period()).unwrap();

    let mut bytes = output.bytes;
    bytes[13..19].copy_from_slice(b"000009");

    let report = exporter.validate(Format::Bpa, &bytes).unwrap();
    assert_eq!(report.count_finding(FindingKind::LineCountMismatch), 1);
    let finding = report
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::LineCountMismatch)
        .unwrap();
    assert_eq!(finding.declared, 9);
    assert_eq!(finding.computed, 5);
    assert!(!report.is_clean());
}

#[test]
fn test_truncated_detail_line() {
    let setup = Setup::new();
    let exporter = setup.exporter();
    let output = exporter.export_bpa(&fixture(), period()).unwrap();

    let mut lines = decode_lines(&output.bytes);
    lines[2].truncate(100);
    let text = lines.join("\r\n") + "\r\n";

    let report = exporter.validate(Format::Bpa, text.as_bytes()).unwrap();
    assert_eq!(report.count_kind(DiagnosticKind::LengthError), 1);
    assert_eq!(report.detail_records, 5);
    assert!(report.invalid_records >= 1);
}

#[test]
fn test_apac_export() {
    let setup = Setup::new();
    let options = ApacOptions {
        start_number: 500,
        validity_start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    };
    let output = setup
        .exporter()
        .export_apac(&fixture(), period(), &options)
        .unwrap();

    assert_eq!(output.summary.authorizations, 1);
    assert_eq!(output.summary.records_written, 2);
    assert_eq!(output.summary.missing.len(), 1);

    let lines = decode_lines(&output.bytes);
    assert_eq!(lines.len(), 4);
    assert_eq!(columns(&lines[0], 1, 7), "01#APAC");
    assert_eq!(columns(&lines[0], 14, 6), "000001");
    assert!(lines[1].starts_with("14"));
    assert!(lines[2].starts_with("13") && lines[3].starts_with("13"));
    assert!(lines[2].contains("0000000005001"));
    assert_eq!(lines[1].chars().count(), 533);
    assert_eq!(lines[2].chars().count(), 97);

    let report = setup.exporter().validate(Format::Apac, &output.bytes).unwrap();
    assert_eq!(report.count_finding(FindingKind::LineCountMismatch), 0);
}

#[test]
fn test_apac_check_digit_from_config() {
    let mut setup = Setup::new();
    setup.config = ExportConfig::from_file(Path::new("tests/data/config.toml")).unwrap();
    let options = ApacOptions {
        start_number: 42,
        validity_start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    };
    let output = setup
        .exporter()
        .export_apac(&fixture(), period(), &options)
        .unwrap();

    let lines = decode_lines(&output.bytes);
    assert!(lines[1].contains("0000000000427"));
    assert!(lines[0].contains("HOSPITAL DE TESTE"));
}

#[test]
fn test_ciha_export() {
    let setup = Setup::new();
    let output = setup
        .exporter()
        .export_ciha(&fixture(), period(), &QuotaFilter::default())
        .unwrap();

    // provider 999 has no fallback service
    assert_eq!(output.summary.records_written, 6);

    let lines = decode_lines(&output.bytes);
    assert_eq!(lines.len(), 6);
    assert!(lines.iter().all(|l| l.chars().count() == 450));
    assert!(!output.bytes.windows(2).any(|w| w == b"\r\n"));
    assert!(lines[0].contains("ANA PEREIRA"));
    let digits: String = lines.iter().map(|l| columns(l, 324, 1)).collect();
    assert_eq!(digits, "123456");
}

#[test]
fn test_ciha_quota_file() {
    let setup = Setup::new();
    let quotas = QuotaFilter::parse(&std::fs::read_to_string("tests/data/quotas.txt").unwrap());
    let output = setup
        .exporter()
        .export_ciha(&fixture(), period(), &quotas)
        .unwrap();

    let lines = decode_lines(&output.bytes);
    assert_eq!(lines.len(), 2);
    assert_eq!(columns(&lines[0], 15, 10), "0301070040");
    assert_eq!(columns(&lines[1], 15, 10), "0301010072");
}

#[test]
fn test_empty_input_is_an_error() {
    let setup = Setup::new();
    let err = setup.exporter().export_bpa(&[], period()).unwrap_err();
    assert!(matches!(err, ExportError::EmptyBatch(_)));
}
