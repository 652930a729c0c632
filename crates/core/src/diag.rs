use std::collections::{HashMap, hash_map::Entry};
use std::fmt;

use ariadne::{Cache, Color, ColorGenerator, Config, IndexType, Label, Report, ReportKind, Source};

use crate::span::{SourceId, SourceMap, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Which stage noticed the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Malformed statement; the statement is skipped.
    Parse,
    /// Well-formed input that cannot be given a meaning.
    Semantic,
    /// A broken invariant inside the assembler itself.
    Internal,
}

#[derive(Debug, Clone)]
pub struct LabelledSpan {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum Supplemental {
    Help(String),
    Note(String),
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub primary: Span,
    pub labels: Vec<LabelledSpan>,
    pub supplements: Vec<Supplemental>,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        kind: DiagnosticKind,
        primary: Span,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            primary,
            labels: Vec::new(),
            supplements: Vec::new(),
        }
    }

    pub fn parse_error(primary: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, DiagnosticKind::Parse, primary, message)
    }

    pub fn error(primary: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, DiagnosticKind::Semantic, primary, message)
    }

    pub fn internal(primary: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, DiagnosticKind::Internal, primary, message)
    }

    pub fn warning(primary: Span, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, DiagnosticKind::Semantic, primary, message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(LabelledSpan {
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.supplements.push(Supplemental::Help(help.into()));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.supplements.push(Supplemental::Note(note.into()));
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[derive(Debug)]
struct SourceMapCache<'a> {
    source_map: &'a SourceMap,
    sources: HashMap<SourceId, Source<&'a str>>,
}

impl<'a> SourceMapCache<'a> {
    fn new(source_map: &'a SourceMap) -> Self {
        Self {
            source_map,
            sources: HashMap::new(),
        }
    }
}

impl<'a> Cache<SourceId> for SourceMapCache<'a> {
    type Storage = &'a str;

    fn fetch(&mut self, id: &SourceId) -> Result<&Source<Self::Storage>, impl fmt::Debug> {
        match self.sources.entry(*id) {
            Entry::Occupied(entry) => Ok::<_, String>(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = self
                    .source_map
                    .get(*id)
                    .ok_or_else(|| format!("missing source for id {:?}", id))?;
                Ok::<_, String>(entry.insert(Source::from(file.text.as_str())))
            }
        }
    }

    fn display<'b>(&self, id: &'b SourceId) -> Option<impl fmt::Display + 'b> {
        self.source_map.get(*id).map(|file| file.name.clone())
    }
}

fn report_kind(diagnostic: &Diagnostic) -> ReportKind<'static> {
    match (diagnostic.severity, diagnostic.kind) {
        (Severity::Warning, _) => ReportKind::Warning,
        (Severity::Error, DiagnosticKind::Internal) => {
            ReportKind::Custom("internal error", Color::Magenta)
        }
        (Severity::Error, _) => ReportKind::Error,
    }
}

fn primary_color(diagnostic: &Diagnostic) -> Color {
    match (diagnostic.severity, diagnostic.kind) {
        (Severity::Warning, _) => Color::Yellow,
        (Severity::Error, DiagnosticKind::Internal) => Color::Magenta,
        (Severity::Error, _) => Color::Red,
    }
}

fn plain_severity_name(diagnostic: &Diagnostic) -> &'static str {
    match (diagnostic.severity, diagnostic.kind) {
        (Severity::Warning, _) => "warning",
        (Severity::Error, DiagnosticKind::Internal) => "internal error",
        (Severity::Error, _) => "error",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub color: bool,
}

impl RenderOptions {
    pub const fn plain() -> Self {
        Self { color: false }
    }

    pub const fn colored() -> Self {
        Self { color: true }
    }
}

pub fn render_diagnostic(source_map: &SourceMap, diagnostic: &Diagnostic) -> String {
    render_diagnostic_with_options(source_map, diagnostic, RenderOptions::plain())
}

pub fn render_diagnostic_with_options(
    source_map: &SourceMap,
    diagnostic: &Diagnostic,
    options: RenderOptions,
) -> String {
    if source_map.get(diagnostic.primary.source_id).is_some() {
        let mut output = Vec::new();
        let mut cache = SourceMapCache::new(source_map);
        if build_report(diagnostic, options)
            .write(&mut cache, &mut output)
            .is_ok()
        {
            return String::from_utf8_lossy(&output).into_owned();
        }
    }
    render_fallback(source_map, diagnostic)
}

fn build_report(
    diagnostic: &Diagnostic,
    options: RenderOptions,
) -> Report<'static, (SourceId, std::ops::Range<usize>)> {
    let primary_span = (diagnostic.primary.source_id, diagnostic.primary.as_range());
    let mut report = Report::build(report_kind(diagnostic), primary_span.clone())
        .with_config(
            Config::default()
                .with_index_type(IndexType::Byte)
                .with_color(options.color),
        )
        .with_message(diagnostic.message.clone())
        .with_label(
            Label::new(primary_span)
                .with_color(primary_color(diagnostic))
                .with_priority(100)
                .with_order(0)
                .with_message("here"),
        );

    let mut colors = ColorGenerator::new();
    for (index, label) in diagnostic.labels.iter().enumerate() {
        report = report.with_label(
            Label::new((label.span.source_id, label.span.as_range()))
                .with_color(colors.next())
                .with_order((index + 1) as i32)
                .with_message(label.message.clone()),
        );
    }

    for supplement in &diagnostic.supplements {
        report = match supplement {
            Supplemental::Help(help) => report.with_help(help.clone()),
            Supplemental::Note(note) => report.with_note(note.clone()),
        };
    }
    report.finish()
}

fn render_fallback(source_map: &SourceMap, diagnostic: &Diagnostic) -> String {
    let mut fallback = format!(
        "{}: {}\n --> {}",
        plain_severity_name(diagnostic),
        diagnostic.message,
        source_map.location(diagnostic.primary),
    );
    for supplement in &diagnostic.supplements {
        match supplement {
            Supplemental::Help(help) => fallback.push_str(&format!("\nHelp: {help}")),
            Supplemental::Note(note) => fallback.push_str(&format!("\nNote: {note}")),
        }
    }
    fallback
}

pub fn render_diagnostics(source_map: &SourceMap, diagnostics: &[Diagnostic]) -> String {
    render_diagnostics_with_options(source_map, diagnostics, RenderOptions::plain())
}

pub fn render_diagnostics_with_options(
    source_map: &SourceMap,
    diagnostics: &[Diagnostic],
    options: RenderOptions,
) -> String {
    diagnostics
        .iter()
        .map(|diag| render_diagnostic_with_options(source_map, diag, options))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_message_and_help() {
        let mut map = SourceMap::default();
        let source_id = map.add_source("demo.s", "lda #$05\nbogus ,,\n");
        let diagnostic = Diagnostic::parse_error(Span::new(source_id, 9, 14), "what is 'bogus ,,'")
            .with_help("check the operand syntax");
        let rendered = render_diagnostic(&map, &diagnostic);
        assert!(rendered.contains("what is 'bogus ,,'"), "{rendered}");
        assert!(rendered.contains("check the operand syntax"), "{rendered}");
    }

    #[test]
    fn internal_errors_are_labelled_as_such() {
        let mut map = SourceMap::default();
        let source_id = map.add_source("demo.s", "bne far\n");
        let diagnostic = Diagnostic::internal(Span::new(source_id, 0, 7), "bad branch shape");
        let rendered = render_diagnostic(&map, &diagnostic);
        assert!(rendered.contains("internal error"), "{rendered}");
        assert!(diagnostic.is_error());
    }

    #[test]
    fn falls_back_to_plain_text_for_unknown_sources() {
        let map = SourceMap::default();
        let diagnostic = Diagnostic::warning(Span::new(SourceId(7), 3, 4), "gap filled");
        let rendered = render_diagnostic(&map, &diagnostic);
        assert!(rendered.starts_with("warning: gap filled"), "{rendered}");
        assert!(!has_errors(&[diagnostic]));
    }
}
