//! File-level encoding and validation.
//!
//! Encoding writes the header (if any) and then every detail line, each
//! followed by the format's terminator, in Windows-1252. Validation splits a
//! file back into lines, checks every field of every line and cross-checks
//! the header totals against what the file actually contains.

use crate::codec::{decode_field, encode_record};
use crate::error::{ExportError, Result};
use crate::layout::{Format, LayoutRegistry, RecordLayout, RecordType};
use crate::record::LogicalRecord;
use crate::report::{Diagnostic, DiagnosticKind, Finding, FindingKind, ValidationReport};
use crate::sequencer::MAX_SEQUENCE;
use encoding_rs::WINDOWS_1252;
use log::debug;
use std::collections::HashMap;

/// Modulus of the header control field.
pub const CONTROL_MODULUS: u64 = 1111;

/// Header control value: `(Σ billing codes + Σ quantities) mod 1111 + 1111`.
pub fn control_field<I>(items: I) -> u64
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let sum = items.into_iter().fold(0, |acc, (code, quantity)| {
        (acc + code % CONTROL_MODULUS + quantity % CONTROL_MODULUS) % CONTROL_MODULUS
    });
    sum + CONTROL_MODULUS
}

/// Encodes a header and its details into the bytes of one file.
///
/// Every record must belong to `format`; a record type without a layout is
/// an error.
pub fn encode_file(
    registry: &LayoutRegistry,
    format: Format,
    header: Option<&LogicalRecord>,
    details: &[LogicalRecord],
) -> Result<Vec<u8>> {
    let mut text = String::new();
    for record in header.into_iter().chain(details) {
        let layout = layout_for(registry, format, record.record_type())?;
        text.push_str(&encode_record(record, layout));
        text.push_str(format.terminator());
    }

    let (bytes, _, had_errors) = WINDOWS_1252.encode(&text);
    if had_errors {
        debug!("Unmappable characters replaced while encoding {} file", format);
    }
    Ok(bytes.into_owned())
}

fn layout_for(
    registry: &LayoutRegistry,
    format: Format,
    record_type: RecordType,
) -> Result<&RecordLayout> {
    if record_type.format() != format {
        return Err(ExportError::LayoutNotFound {
            format: format.name(),
            record: record_type.name(),
        });
    }
    registry.layout(record_type)
}

/// Splits decoded text into lines, tolerating both terminators and a
/// missing terminator on the last line.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Validates a whole file.
///
/// Content problems never fail the call; they end up in the report. Only a
/// layout missing from the registry is an error.
pub fn decode_file(
    registry: &LayoutRegistry,
    format: Format,
    bytes: &[u8],
) -> Result<ValidationReport> {
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    let lines = split_lines(&text);

    let mut report = ValidationReport::new(format);
    report.total_lines = lines.len();

    if lines.is_empty() {
        report.diagnostics.push(Diagnostic {
            line: 0,
            field: None,
            kind: DiagnosticKind::EmptyFile,
            message: "file contains no lines".to_string(),
        });
        return Ok(report);
    }

    let mut header_values: HashMap<&'static str, String> = HashMap::new();
    let mut first_detail = 0;

    if let Some(header_type) = format.header() {
        let layout = registry.layout(header_type)?;
        let chars: Vec<char> = lines[0].chars().collect();
        if chars.len() < layout.length() {
            report.diagnostics.push(Diagnostic {
                line: 1,
                field: None,
                kind: DiagnosticKind::LengthError,
                message: format!(
                    "header has {} columns, expected {}",
                    chars.len(),
                    layout.length()
                ),
            });
        } else {
            for spec in layout.fields() {
                let check = decode_field(&chars, spec, 1);
                report.diagnostics.extend(check.diagnostics);
                header_values.insert(spec.name, check.value);
            }
        }
        first_detail = 1;
    }

    let totals = format.header_totals();
    let mut counted = 0u64;
    let mut max_page: Option<u64> = None;

    for (idx, line) in lines.iter().enumerate().skip(first_detail) {
        let line_no = idx + 1;
        let chars: Vec<char> = line.chars().collect();

        let Some(layout) = registry.detail_layout_for(format, &chars) else {
            let prefix: String = chars.iter().take(2).collect();
            report.diagnostics.push(Diagnostic {
                line: line_no,
                field: None,
                kind: DiagnosticKind::UnknownRecordType,
                message: format!("unknown record type '{}'", prefix),
            });
            continue;
        };

        report.detail_records += 1;
        if totals.is_some_and(|t| t.counted == layout.record_type()) {
            counted += 1;
        }

        if chars.len() < layout.length() {
            report.diagnostics.push(Diagnostic {
                line: line_no,
                field: None,
                kind: DiagnosticKind::LengthError,
                message: format!(
                    "{} has {} columns, expected {}",
                    layout.record_type().name(),
                    chars.len(),
                    layout.length()
                ),
            });
            report.invalid_records += 1;
            continue;
        }

        let mut line_valid = true;
        for spec in layout.fields() {
            let check = decode_field(&chars, spec, line_no);
            if !check.diagnostics.is_empty() {
                line_valid = false;
                report.diagnostics.extend(check.diagnostics);
            }
            let is_page_field = totals.and_then(|t| t.detail_page_field) == Some(spec.name);
            if is_page_field {
                if let Ok(page) = check.value.parse::<u64>() {
                    max_page = Some(max_page.map_or(page, |max| max.max(page)));
                }
            }
        }

        if line_valid {
            report.valid_records += 1;
        } else {
            report.invalid_records += 1;
        }
    }

    if let Some(totals) = totals {
        let declared = |field: &str| {
            header_values
                .get(field)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0)
        };

        let declared_lines = declared(totals.count_field);
        if declared_lines != counted {
            report.findings.push(Finding {
                kind: FindingKind::LineCountMismatch,
                declared: declared_lines,
                computed: counted,
            });
        }

        if let Some(page_field) = totals.page_field {
            let declared_pages = declared(page_field);
            let computed_pages = max_page.unwrap_or_else(|| counted.div_ceil(MAX_SEQUENCE));
            if declared_pages != computed_pages {
                report.findings.push(Finding {
                    kind: FindingKind::PageCountMismatch,
                    declared: declared_pages,
                    computed: computed_pages,
                });
            }
        }
    }

    debug!(
        "Validated {} lines of {} file: {} problems",
        report.total_lines,
        format,
        report.error_count()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpa;
    use crate::config::ExportConfig;
    use crate::period::ReportingPeriod;
    use crate::record::FieldValue;
    use chrono::NaiveDate;

    fn period() -> ReportingPeriod {
        "202403".parse().unwrap()
    }

    fn detail(cns: &str, day: u32, page: u64, seq: u64) -> LogicalRecord {
        LogicalRecord::new(RecordType::BpaDetail)
            .with("prd_cnes", "2560372")
            .with("prd_cmp", "202403")
            .with("prd_cnsmed", cns)
            .with("prd_cbo", "225133")
            .with("prd_dtaten", NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
            .with("prd_flh", page)
            .with("prd_seq", seq)
            .with("prd_pa", "0301010048")
            .with("prd_sexo", "F")
            .with("prd_cid", "Z000")
            .with("prd_ldade", 30u64)
            .with("prd_qt", 1u64)
            .with("prd_nmpac", "MARIA")
            .with("prd_dtnasc", NaiveDate::from_ymd_opt(1994, 1, 1).unwrap())
            .with("prd_raca", "99")
    }

    fn bpa_file(details: &[LogicalRecord], header: LogicalRecord) -> Vec<u8> {
        let registry = LayoutRegistry::new().unwrap();
        encode_file(&registry, Format::Bpa, Some(&header), details).unwrap()
    }

    fn validate(bytes: &[u8]) -> ValidationReport {
        let registry = LayoutRegistry::new().unwrap();
        decode_file(&registry, Format::Bpa, bytes).unwrap()
    }

    fn four_details() -> Vec<LogicalRecord> {
        (1..=4).map(|i| detail("700000000000001", i as u32, 1, i)).collect()
    }

    #[test]
    fn test_control_field() {
        assert_eq!(control_field(Vec::new()), 1111);
        assert_eq!(control_field(vec![(1110, 1)]), 1111);
        assert_eq!(control_field(vec![(1000, 5), (100, 7)]), 1112 % 1111 + 1111);
    }

    #[test]
    fn test_encode_terminators_and_encoding() {
        let details = vec![detail("700000000000001", 1, 1, 1).with("prd_nmpac", "JOÃO")];
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period());
        let bytes = bpa_file(&details, header);

        assert_eq!(bytes.len(), 130 + 2 + 350 + 2);
        assert_eq!(&bytes[130..132], b"\r\n");
        assert!(bytes.ends_with(b"\r\n"));
        // Ã is a single byte in Windows-1252
        assert!(bytes.contains(&0xC3));
    }

    #[test]
    fn test_rejects_foreign_record_type() {
        let registry = LayoutRegistry::new().unwrap();
        let ciha = LogicalRecord::new(RecordType::CihaDetail);
        let err = encode_file(&registry, Format::Bpa, None, &[ciha]).unwrap_err();
        assert!(matches!(err, ExportError::LayoutNotFound { .. }));
    }

    #[test]
    fn test_valid_file_round_trip() {
        let details = four_details();
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period());
        let report = validate(&bpa_file(&details, header));

        assert!(report.is_clean(), "{:?}", report.messages());
        assert_eq!(report.total_lines, 5);
        assert_eq!(report.detail_records, 4);
        assert_eq!(report.valid_records, 4);
    }

    #[test]
    fn test_line_count_mismatch() {
        let details = four_details();
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period())
            .with("cbc_lin", 5u64);
        let report = validate(&bpa_file(&details, header));

        assert!(report.diagnostics.is_empty());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(
            report.findings[0],
            Finding {
                kind: FindingKind::LineCountMismatch,
                declared: 5,
                computed: 4,
            }
        );
    }

    #[test]
    fn test_page_count_uses_declared_pages() {
        let mut details = four_details();
        details.push(detail("700000000000002", 1, 2, 1));
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period());
        let report = validate(&bpa_file(&details, header));

        assert_eq!(report.count_finding(FindingKind::PageCountMismatch), 1);
        assert_eq!(report.findings[0].computed, 2);
    }

    #[test]
    fn test_short_and_unknown_lines() {
        let details = four_details();
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period())
            .with("cbc_lin", 5u64);
        let mut bytes = bpa_file(&details, header);
        bytes.extend_from_slice(b"03short\r\n99whatever\r\n");

        let report = validate(&bytes);
        assert_eq!(report.total_lines, 7);
        assert_eq!(report.detail_records, 5);
        assert_eq!(report.invalid_records, 1);
        assert_eq!(report.count_kind(DiagnosticKind::LengthError), 1);
        assert_eq!(report.count_kind(DiagnosticKind::UnknownRecordType), 1);
        // the short line still counts towards the header total
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_field_errors_do_not_short_circuit() {
        let details = vec![detail("700000000000001", 1, 1, 1)
            .with("prd_sexo", "X")
            .with("prd_nmpac", "")];
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period());
        let report = validate(&bpa_file(&details, header));

        assert_eq!(report.invalid_records, 1);
        assert_eq!(report.count_kind(DiagnosticKind::NotInAllowedSet), 1);
        assert_eq!(report.count_kind(DiagnosticKind::RequiredFieldEmpty), 1);
    }

    #[test]
    fn test_short_header() {
        let report = validate(b"01#BPA#\r\n");
        assert_eq!(report.count_kind(DiagnosticKind::LengthError), 1);
        // unreadable declared count is zero and matches the empty body
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_empty_file() {
        let report = validate(b"");
        assert_eq!(report.total_lines, 0);
        assert_eq!(report.count_kind(DiagnosticKind::EmptyFile), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_lf_only_and_missing_final_terminator() {
        let details = four_details();
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period());
        let bytes = bpa_file(&details, header);
        let text = String::from_utf8(bytes).unwrap().replace("\r\n", "\n");
        let trimmed = text.trim_end_matches('\n');

        let report = validate(trimmed.as_bytes());
        assert!(report.is_clean(), "{:?}", report.messages());
        assert_eq!(report.total_lines, 5);
    }

    #[test]
    fn test_zero_pages_are_readable() {
        let details: Vec<_> = four_details()
            .into_iter()
            .map(|d| d.with("prd_flh", FieldValue::Absent))
            .collect();
        let header = bpa::header_record(&details, 1, &ExportConfig::default(), period());
        let report = validate(&bpa_file(&details, header));
        // absent page encodes as 000, which is readable
        assert_eq!(report.count_finding(FindingKind::PageCountMismatch), 1);
        assert_eq!(report.findings[0].computed, 0);
    }
}
