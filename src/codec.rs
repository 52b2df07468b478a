//! Field-level encoding and validation.
//!
//! Encoding is lenient: any value, including an absent or malformed one,
//! becomes a slot of exactly the field's length. Decoding is strict: every
//! deviation from the field's declaration is reported.

use crate::layout::{Constraint, DateOrder, FieldKind, FieldSpec, RecordLayout};
use crate::record::{FieldValue, LogicalRecord};
use crate::report::{Diagnostic, DiagnosticKind};
use encoding_rs::WINDOWS_1252;

/// Encodes one value into a slot of exactly `spec.length` characters.
///
/// # Examples
///
/// ```
/// use sus_billing::codec::encode_field;
/// use sus_billing::layout::{FieldDef, RecordLayout, RecordType};
/// use sus_billing::FieldValue;
///
/// let layout = RecordLayout::compile(
///     RecordType::BpaDetail,
///     16,
///     &[FieldDef::num("qt", 1, 6), FieldDef::alpha("name", 7, 10)],
/// )
/// .unwrap();
///
/// let qt = layout.field("qt").unwrap();
/// assert_eq!(encode_field(&FieldValue::text("12a3"), qt), "000123");
///
/// let name = layout.field("name").unwrap();
/// assert_eq!(encode_field(&FieldValue::text("Maria "), name), "Maria     ");
/// ```
pub fn encode_field(value: &FieldValue, spec: &FieldSpec) -> String {
    let raw = match spec.constraint {
        Constraint::Fixed(literal) => literal.to_string(),
        _ => render(value, spec.date_order),
    };

    match spec.kind {
        FieldKind::Numeric => encode_numeric(&raw, spec.length),
        FieldKind::Alphanumeric => encode_alphanumeric(&raw, spec.length),
    }
}

/// Encodes a whole record in layout order. Fields the record does not set
/// encode as absent; fields the layout does not declare are ignored.
pub fn encode_record(record: &LogicalRecord, layout: &RecordLayout) -> String {
    let mut line = String::with_capacity(layout.length());
    for spec in layout.fields() {
        line.push_str(&encode_field(record.value(spec.name), spec));
    }
    line
}

fn render(value: &FieldValue, order: DateOrder) -> String {
    match value {
        FieldValue::Absent => String::new(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(s) => s.clone(),
        FieldValue::Date(d) => match order {
            DateOrder::YearFirst => d.format("%Y%m%d").to_string(),
            DateOrder::DayFirst => d.format("%d%m%Y").to_string(),
        },
    }
}

fn encode_numeric(raw: &str, length: usize) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let padded = format!("{:0>width$}", digits, width = length);
    padded.chars().take(length).collect()
}

fn encode_alphanumeric(raw: &str, length: usize) -> String {
    let clean = sanitize(raw);
    let truncated: String = clean.trim().chars().take(length).collect();
    format!("{:<width$}", truncated, width = length)
}

/// Drops characters the single-byte output encoding cannot carry, along with
/// control characters, so every kept character is exactly one output byte.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() && is_single_byte(*c))
        .collect()
}

fn is_single_byte(c: char) -> bool {
    if c.is_ascii() {
        return true;
    }
    let mut buf = [0u8; 4];
    let (bytes, _, had_errors) = WINDOWS_1252.encode(c.encode_utf8(&mut buf));
    !had_errors && bytes.len() == 1
}

/// Result of checking one field of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCheck {
    /// Trimmed slice content, empty when the line is too short
    pub value: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Reads and validates one field from a decoded line.
///
/// `line` holds the line's characters without its terminator; `line_no` is
/// the 1-indexed physical line used in diagnostics.
pub fn decode_field(line: &[char], spec: &FieldSpec, line_no: usize) -> FieldCheck {
    let mut diagnostics = Vec::new();
    let mut report = |kind: DiagnosticKind, message: String| {
        diagnostics.push(Diagnostic {
            line: line_no,
            field: Some(spec.name),
            kind,
            message,
        })
    };

    if line.len() < spec.end() {
        report(
            DiagnosticKind::LengthError,
            format!(
                "line has {} columns, field ends at column {}",
                line.len(),
                spec.end()
            ),
        );
        return FieldCheck {
            value: String::new(),
            diagnostics,
        };
    }

    let raw: String = line[spec.start - 1..spec.end()].iter().collect();
    let trimmed = raw.trim().to_string();

    if trimmed.is_empty() {
        if spec.required {
            report(
                DiagnosticKind::RequiredFieldEmpty,
                "required field is empty".to_string(),
            );
        }
        return FieldCheck {
            value: trimmed,
            diagnostics,
        };
    }

    match &spec.constraint {
        Constraint::None => {}
        Constraint::Fixed(literal) => {
            let expected = encode_field(&FieldValue::Absent, spec);
            if raw != expected {
                report(
                    DiagnosticKind::FixedValueMismatch,
                    format!("value '{}' does not match expected '{}'", raw, literal),
                );
            }
        }
        Constraint::OneOf(values) => {
            if !values.contains(&raw.as_str()) {
                report(
                    DiagnosticKind::NotInAllowedSet,
                    format!("value '{}' is not one of {:?}", raw, values),
                );
            }
        }
        Constraint::Pattern(pattern) => {
            if !pattern.is_match(&trimmed) {
                report(
                    DiagnosticKind::PatternMismatch,
                    format!("value '{}' does not match the expected pattern", raw),
                );
            }
        }
        Constraint::MaxLength(max) => {
            if raw.trim_end().chars().count() > *max {
                report(
                    DiagnosticKind::MaxLengthExceeded,
                    format!("value exceeds {} characters", max),
                );
            }
        }
    }

    FieldCheck {
        value: trimmed,
        diagnostics,
    }
}
