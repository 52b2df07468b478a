//! Logical (not yet positional) records.

use crate::layout::RecordType;
use chrono::NaiveDate;

/// A semantic value bound to a field before encoding.
///
/// Variants are ordered `Absent < Number < Text < Date`, and values of the
/// same variant compare by content, which is what the sequencer sorts on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FieldValue {
    #[default]
    Absent,
    Number(u64),
    Text(String),
    Date(NaiveDate),
}

impl FieldValue {
    /// Text value, or `Absent` for an empty/whitespace-only string.
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            FieldValue::Absent
        } else {
            FieldValue::Text(value)
        }
    }

    /// Optional text, `None` and blanks map to `Absent`.
    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(FieldValue::Absent, FieldValue::text)
    }

    pub fn opt_date(value: Option<NaiveDate>) -> Self {
        value.map_or(FieldValue::Absent, FieldValue::Date)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    /// Numeric reading of the value: numbers as-is, text when it is all
    /// digits after trimming.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Absent | FieldValue::Date(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::text(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::text(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// An ordered mapping from field name to value for one output line.
///
/// Fields the record's layout declares but the record omits encode as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRecord {
    record_type: RecordType,
    fields: Vec<(&'static str, FieldValue)>,
}

impl LogicalRecord {
    pub fn new(record_type: RecordType) -> Self {
        LogicalRecord {
            record_type,
            fields: Vec::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Inserts or replaces a field, keeping the original position on replace.
    pub fn set(&mut self, name: &'static str, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Value for `name`, `Absent` when missing.
    pub fn value(&self, name: &str) -> &FieldValue {
        const ABSENT: FieldValue = FieldValue::Absent;
        self.get(name).unwrap_or(&ABSENT)
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
