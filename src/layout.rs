//! Declarative fixed-width layouts.
//!
//! A layout is an ordered list of fields, each anchored at a 1-indexed column
//! with a fixed length. The static tables live next to each record family
//! (`bpa`, `apac`, `ciha`) as [`FieldDef`] constants and are compiled once into
//! a [`LayoutRegistry`] at startup. Compilation rejects tables that overlap,
//! leave gaps, or do not cover the declared record length.

use crate::error::{ExportError, Result};
use crate::{apac, bpa, ciha};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Content type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Digits only, zero-padded on the left
    Numeric,
    /// Free text, space-padded on the right
    Alphanumeric,
}

/// How a date value is rendered into a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateOrder {
    /// `YYYYMMDD`
    #[default]
    YearFirst,
    /// `DDMMYYYY`
    DayFirst,
}

/// Content rule of a static field definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// No content check beyond required/empty
    Free,
    /// Must equal this literal
    Fixed(&'static str),
    /// Must be one of these values
    OneOf(&'static [&'static str]),
    /// Exactly `length` digits
    Digits,
    /// Must match this regular expression
    Pattern(&'static str),
    /// Right-trimmed value must fit in the field
    MaxLength,
}

/// Static, `const`-constructible description of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub start: usize,
    pub length: usize,
    pub kind: FieldKind,
    pub rule: Rule,
    pub required: bool,
    pub date_order: DateOrder,
}

impl FieldDef {
    /// Numeric field checked for exactly `length` digits.
    pub const fn num(name: &'static str, start: usize, length: usize) -> Self {
        FieldDef {
            name,
            start,
            length,
            kind: FieldKind::Numeric,
            rule: Rule::Digits,
            required: false,
            date_order: DateOrder::YearFirst,
        }
    }

    /// Alphanumeric field checked only for its maximum length.
    pub const fn alpha(name: &'static str, start: usize, length: usize) -> Self {
        FieldDef {
            name,
            start,
            length,
            kind: FieldKind::Alphanumeric,
            rule: Rule::MaxLength,
            required: false,
            date_order: DateOrder::YearFirst,
        }
    }

    pub const fn fixed(self, literal: &'static str) -> Self {
        FieldDef {
            rule: Rule::Fixed(literal),
            ..self
        }
    }

    pub const fn one_of(self, values: &'static [&'static str]) -> Self {
        FieldDef {
            rule: Rule::OneOf(values),
            ..self
        }
    }

    pub const fn pattern(self, pattern: &'static str) -> Self {
        FieldDef {
            rule: Rule::Pattern(pattern),
            ..self
        }
    }

    pub const fn free(self) -> Self {
        FieldDef {
            rule: Rule::Free,
            ..self
        }
    }

    pub const fn required(self) -> Self {
        FieldDef {
            required: true,
            ..self
        }
    }

    pub const fn day_first(self) -> Self {
        FieldDef {
            date_order: DateOrder::DayFirst,
            ..self
        }
    }
}

/// Compiled content constraint. At most one applies per field.
#[derive(Debug, Clone)]
pub enum Constraint {
    None,
    Fixed(&'static str),
    OneOf(&'static [&'static str]),
    Pattern(Regex),
    MaxLength(usize),
}

/// One compiled field of a record layout.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    /// 1-indexed first column
    pub start: usize,
    pub length: usize,
    pub kind: FieldKind,
    pub constraint: Constraint,
    pub required: bool,
    pub date_order: DateOrder,
}

impl FieldSpec {
    /// 1-indexed last column (inclusive).
    pub fn end(&self) -> usize {
        self.start + self.length - 1
    }

    fn compile(layout: &'static str, def: &FieldDef) -> Result<Self> {
        let invalid = |message: String| ExportError::InvalidLayout { layout, message };

        if def.length == 0 {
            return Err(invalid(format!("field {} has zero length", def.name)));
        }

        let constraint = match def.rule {
            Rule::Free => Constraint::None,
            Rule::Fixed(literal) => {
                if literal.chars().count() > def.length {
                    return Err(invalid(format!(
                        "fixed value '{}' does not fit field {} ({} columns)",
                        literal, def.name, def.length
                    )));
                }
                Constraint::Fixed(literal)
            }
            Rule::OneOf(values) => {
                if values.is_empty() {
                    return Err(invalid(format!("field {} has an empty value set", def.name)));
                }
                Constraint::OneOf(values)
            }
            Rule::Digits => Constraint::Pattern(
                Regex::new(&format!(r"^\d{{{}}}$", def.length))
                    .map_err(|e| invalid(format!("field {}: {}", def.name, e)))?,
            ),
            Rule::Pattern(pattern) => Constraint::Pattern(
                Regex::new(pattern).map_err(|e| invalid(format!("field {}: {}", def.name, e)))?,
            ),
            Rule::MaxLength => Constraint::MaxLength(def.length),
        };

        Ok(FieldSpec {
            name: def.name,
            start: def.start,
            length: def.length,
            kind: def.kind,
            constraint,
            required: def.required,
            date_order: def.date_order,
        })
    }
}

/// Record families handled by the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// BPA-I, individualized outpatient production
    Bpa,
    /// APAC, high-complexity procedure authorizations
    Apac,
    /// CIHA, hospital and outpatient admission communication
    Ciha,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Bpa => "bpa",
            Format::Apac => "apac",
            Format::Ciha => "ciha",
        }
    }

    /// Line terminator written after every line.
    pub fn terminator(&self) -> &'static str {
        match self {
            Format::Bpa | Format::Apac => "\r\n",
            Format::Ciha => "\n",
        }
    }

    /// Header record type, if the family has a header line.
    pub fn header(&self) -> Option<RecordType> {
        match self {
            Format::Bpa => Some(RecordType::BpaHeader),
            Format::Apac => Some(RecordType::ApacHeader),
            Format::Ciha => None,
        }
    }

    /// Record types that may follow the header.
    pub fn detail_types(&self) -> &'static [RecordType] {
        match self {
            Format::Bpa => &[RecordType::BpaDetail],
            Format::Apac => &[RecordType::ApacBody, RecordType::ApacProcedure],
            Format::Ciha => &[RecordType::CihaDetail],
        }
    }

    /// Header consistency checks, `None` for families without a header.
    pub fn header_totals(&self) -> Option<HeaderTotals> {
        match self {
            Format::Bpa => Some(HeaderTotals {
                count_field: bpa::HEADER_COUNT_FIELD,
                counted: RecordType::BpaDetail,
                page_field: Some(bpa::HEADER_PAGE_FIELD),
                detail_page_field: Some(bpa::DETAIL_PAGE_FIELD),
            }),
            Format::Apac => Some(HeaderTotals {
                count_field: apac::HEADER_COUNT_FIELD,
                counted: RecordType::ApacBody,
                page_field: None,
                detail_page_field: None,
            }),
            Format::Ciha => None,
        }
    }
}

impl FromStr for Format {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bpa" | "bpa-i" => Ok(Format::Bpa),
            "apac" => Ok(Format::Apac),
            "ciha" => Ok(Format::Ciha),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a family declares its totals and which records they count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderTotals {
    /// Header field holding the declared record count
    pub count_field: &'static str,
    /// Detail record type the count refers to
    pub counted: RecordType,
    /// Header field holding the declared page count
    pub page_field: Option<&'static str>,
    /// Per-record page field, when the family numbers pages explicitly
    pub detail_page_field: Option<&'static str>,
}

/// Every record kind across the three families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    BpaHeader,
    BpaDetail,
    ApacHeader,
    ApacBody,
    ApacProcedure,
    CihaDetail,
}

impl RecordType {
    pub const ALL: [RecordType; 6] = [
        RecordType::BpaHeader,
        RecordType::BpaDetail,
        RecordType::ApacHeader,
        RecordType::ApacBody,
        RecordType::ApacProcedure,
        RecordType::CihaDetail,
    ];

    pub fn format(&self) -> Format {
        match self {
            RecordType::BpaHeader | RecordType::BpaDetail => Format::Bpa,
            RecordType::ApacHeader | RecordType::ApacBody | RecordType::ApacProcedure => {
                Format::Apac
            }
            RecordType::CihaDetail => Format::Ciha,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordType::BpaHeader => "bpa header",
            RecordType::BpaDetail => "bpa detail",
            RecordType::ApacHeader => "apac header",
            RecordType::ApacBody => "apac body",
            RecordType::ApacProcedure => "apac procedure",
            RecordType::CihaDetail => "ciha detail",
        }
    }

    /// Leading characters that identify the record inside a file.
    pub fn discriminator(&self) -> Option<&'static str> {
        match self {
            RecordType::BpaHeader | RecordType::ApacHeader => Some("01"),
            RecordType::BpaDetail => Some("03"),
            RecordType::ApacBody => Some("14"),
            RecordType::ApacProcedure => Some("13"),
            RecordType::CihaDetail => None,
        }
    }

    fn fields(&self) -> (usize, &'static [FieldDef]) {
        match self {
            RecordType::BpaHeader => (bpa::HEADER_LENGTH, bpa::HEADER_FIELDS),
            RecordType::BpaDetail => (bpa::DETAIL_LENGTH, bpa::DETAIL_FIELDS),
            RecordType::ApacHeader => (apac::HEADER_LENGTH, apac::HEADER_FIELDS),
            RecordType::ApacBody => (apac::BODY_LENGTH, apac::BODY_FIELDS),
            RecordType::ApacProcedure => (apac::PROCEDURE_LENGTH, apac::PROCEDURE_FIELDS),
            RecordType::CihaDetail => (ciha::DETAIL_LENGTH, ciha::DETAIL_FIELDS),
        }
    }
}

/// A compiled, validated record layout.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    record_type: RecordType,
    length: usize,
    fields: Vec<FieldSpec>,
}

impl RecordLayout {
    /// Compiles field definitions, checking that they are listed in column
    /// order, do not overlap or leave gaps, have unique names, and cover
    /// exactly `length` columns.
    pub fn compile(record_type: RecordType, length: usize, defs: &[FieldDef]) -> Result<Self> {
        let layout = record_type.name();
        let invalid = |message: String| ExportError::InvalidLayout { layout, message };

        if defs.is_empty() {
            return Err(invalid("layout has no fields".to_string()));
        }

        let mut fields = Vec::with_capacity(defs.len());
        let mut next_column = 1;
        for def in defs {
            if fields.iter().any(|f: &FieldSpec| f.name == def.name) {
                return Err(invalid(format!("duplicate field name {}", def.name)));
            }
            if def.start != next_column {
                return Err(invalid(format!(
                    "field {} starts at column {}, expected {}",
                    def.name, def.start, next_column
                )));
            }
            let spec = FieldSpec::compile(layout, def)?;
            next_column = spec.end() + 1;
            fields.push(spec);
        }

        if next_column - 1 != length {
            return Err(invalid(format!(
                "fields cover {} columns, record length is {}",
                next_column - 1,
                length
            )));
        }

        Ok(RecordLayout {
            record_type,
            length,
            fields,
        })
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns `true` if `line` carries this layout's discriminator.
    /// Layouts without a discriminator match every line.
    pub fn matches(&self, line: &[char]) -> bool {
        match self.record_type.discriminator() {
            Some(code) => {
                let prefix: Vec<char> = code.chars().collect();
                line.starts_with(&prefix)
            }
            None => true,
        }
    }
}

/// Read-only set of compiled layouts, one per record type.
///
/// Built once before any export or validation and shared by reference; it
/// holds no interior mutability.
#[derive(Debug, Clone)]
pub struct LayoutRegistry {
    layouts: HashMap<RecordType, RecordLayout>,
}

impl LayoutRegistry {
    /// Compiles the built-in layouts of all three families.
    pub fn new() -> Result<Self> {
        let layouts = RecordType::ALL
            .iter()
            .map(|record_type| {
                let (length, defs) = record_type.fields();
                RecordLayout::compile(*record_type, length, defs)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::with_layouts(layouts))
    }

    /// Registry holding only the given layouts.
    pub fn with_layouts(layouts: impl IntoIterator<Item = RecordLayout>) -> Self {
        LayoutRegistry {
            layouts: layouts
                .into_iter()
                .map(|layout| (layout.record_type(), layout))
                .collect(),
        }
    }

    /// Layout used to encode a record of the given type.
    pub fn layout(&self, record_type: RecordType) -> Result<&RecordLayout> {
        self.layouts
            .get(&record_type)
            .ok_or(ExportError::LayoutNotFound {
                format: record_type.format().name(),
                record: record_type.name(),
            })
    }

    /// Detail layout selected by the discriminator at the start of `line`.
    pub fn detail_layout_for(&self, format: Format, line: &[char]) -> Option<&RecordLayout> {
        format
            .detail_types()
            .iter()
            .filter_map(|record_type| self.layouts.get(record_type))
            .find(|layout| layout.matches(line))
    }
}
