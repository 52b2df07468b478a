//! Validation results and their HTML rendering.

use crate::layout::Format;
use chrono::Local;
use std::fmt;

/// Kind of a per-line problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The file has no lines at all
    EmptyFile,
    /// Line ends before a field (or the whole record) does
    LengthError,
    /// Leading characters match no layout of the format
    UnknownRecordType,
    RequiredFieldEmpty,
    FixedValueMismatch,
    NotInAllowedSet,
    PatternMismatch,
    MaxLengthExceeded,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::EmptyFile => "EmptyFile",
            DiagnosticKind::LengthError => "LengthError",
            DiagnosticKind::UnknownRecordType => "UnknownRecordType",
            DiagnosticKind::RequiredFieldEmpty => "RequiredFieldEmpty",
            DiagnosticKind::FixedValueMismatch => "FixedValueMismatch",
            DiagnosticKind::NotInAllowedSet => "NotInAllowedSet",
            DiagnosticKind::PatternMismatch => "PatternMismatch",
            DiagnosticKind::MaxLengthExceeded => "MaxLengthExceeded",
        };
        f.write_str(name)
    }
}

/// A problem found on one line, optionally tied to one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-indexed physical line number, 0 for whole-file problems
    pub line: usize,
    pub field: Option<&'static str>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "Line {}, field {}: {}", self.line, field, self.message),
            None => write!(f, "Line {}: {}", self.line, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindingKind {
    LineCountMismatch,
    PageCountMismatch,
}

/// Header total that disagrees with what the file actually contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: FindingKind,
    pub declared: u64,
    pub computed: u64,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FindingKind::LineCountMismatch => write!(
                f,
                "Record count ({}) does not match the header declaration ({})",
                self.computed, self.declared
            ),
            FindingKind::PageCountMismatch => write!(
                f,
                "Page count ({}) does not match the header declaration ({})",
                self.computed, self.declared
            ),
        }
    }
}

/// Outcome of validating one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub format: Format,
    /// Physical lines, header and unrecognized lines included
    pub total_lines: usize,
    /// Lines matched to a detail layout
    pub detail_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn new(format: Format) -> Self {
        ValidationReport {
            format,
            total_lines: 0,
            detail_records: 0,
            valid_records: 0,
            invalid_records: 0,
            diagnostics: Vec::new(),
            findings: Vec::new(),
        }
    }

    /// No diagnostics and no header findings.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty() && self.findings.is_empty()
    }

    /// Number of reported problems of any kind.
    pub fn error_count(&self) -> usize {
        self.diagnostics.len() + self.findings.len()
    }

    pub fn count_kind(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    pub fn count_finding(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    /// All problems as display lines, diagnostics first.
    pub fn messages(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .map(ToString::to_string)
            .chain(self.findings.iter().map(ToString::to_string))
            .collect()
    }

    /// Renders a standalone HTML page summarizing the report.
    pub fn render_html(&self, file_name: &str) -> String {
        let title = format!("Relatório de Validação {}", self.format.name().to_uppercase());
        let generated = Local::now().format("%d/%m/%Y %H:%M:%S");
        let (status_class, status_text) = if self.is_clean() {
            ("success", "O arquivo está em conformidade com o layout.")
        } else {
            ("error", "O arquivo contém erros. Corrija-os e tente novamente.")
        };

        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html lang=\"pt-br\">\n<head>\n");
        html.push_str("<meta charset=\"UTF-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_html(&title)));
        html.push_str(
            "<style>\n\
             body { font-family: Arial, sans-serif; margin: 20px; }\n\
             h1 { color: #2c3e50; }\n\
             h2 { color: #3498db; }\n\
             .success { color: green; }\n\
             .error { color: red; }\n\
             table { border-collapse: collapse; width: 100%; margin-top: 20px; }\n\
             th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }\n\
             th { background-color: #f2f2f2; }\n\
             tr:nth-child(even) { background-color: #f9f9f9; }\n\
             </style>\n",
        );
        html.push_str("</head>\n<body>\n");
        html.push_str(&format!("<h1>{}</h1>\n", escape_html(&title)));
        html.push_str(&format!(
            "<p><strong>Arquivo:</strong> {}</p>\n",
            escape_html(file_name)
        ));
        html.push_str(&format!("<p><strong>Data/Hora:</strong> {}</p>\n", generated));

        html.push_str("<h2>Resumo</h2>\n");
        html.push_str(&format!(
            "<p><strong>Total de linhas:</strong> {}</p>\n",
            self.total_lines
        ));
        html.push_str(&format!(
            "<p><strong>Total de registros:</strong> {}</p>\n",
            self.detail_records
        ));
        html.push_str(&format!(
            "<p><strong>Registros válidos:</strong> {}</p>\n",
            self.valid_records
        ));
        html.push_str(&format!(
            "<p><strong>Registros inválidos:</strong> {}</p>\n",
            self.invalid_records
        ));
        html.push_str(&format!(
            "<p><strong>Total de erros:</strong> {}</p>\n",
            self.error_count()
        ));

        html.push_str("<h2>Status</h2>\n");
        html.push_str(&format!(
            "<p class=\"{}\">{}</p>\n",
            status_class, status_text
        ));

        let messages = self.messages();
        if !messages.is_empty() {
            html.push_str("<h2>Erros Encontrados</h2>\n<table>\n");
            html.push_str("<tr><th>#</th><th>Descrição</th></tr>\n");
            for (idx, message) in messages.iter().enumerate() {
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td></tr>\n",
                    idx + 1,
                    escape_html(message)
                ));
            }
            html.push_str("</table>\n");
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Format: {}", self.format)?;
        writeln!(f, "Total lines: {}", self.total_lines)?;
        writeln!(f, "Detail records: {}", self.detail_records)?;
        writeln!(f, "Valid records: {}", self.valid_records)?;
        writeln!(f, "Invalid records: {}", self.invalid_records)?;
        write!(f, "Errors: {}", self.error_count())
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
