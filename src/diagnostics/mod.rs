//! Structured diagnostics for the compilation pipeline
//!
//! Every stage (lexer, parser, evaluator, MIDI writer) reports problems as
//! [`Diagnostic`] values. The core never renders diagnostics to formatted
//! strings; callers (CLI, editors) receive the structured form and decide
//! how to present it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity level for a diagnostic
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

/// A source location (1-based line and column)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Pos { line, col }
    }
}

/// A half-open source region from `start` to `end`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn new(start: Pos, end: Pos) -> Self {
        Span { start, end }
    }

    /// A zero-width span at a single position
    pub fn at(pos: Pos) -> Self {
        Span { start: pos, end: pos }
    }

    /// The smallest span covering both `self` and `other`
    pub fn join(self, other: Span) -> Span {
        let start = if (other.start.line, other.start.col) < (self.start.line, self.start.col) {
            other.start
        } else {
            self.start
        };
        let end = if (other.end.line, other.end.col) > (self.end.line, self.end.col) {
            other.end
        } else {
            self.end
        };
        Span { start, end }
    }
}

/// Error and warning codes, grouped by hundreds:
/// `E0xx` configuration, `E1xx` syntax/range, `E2xx` type and vocal,
/// `E3xx` evaluation, `E4xx` resources, `E5xx` MIDI, `Wxxx` warnings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    // configuration
    InvalidPpq,
    MissingTempoAtZero,
    MissingMeterAtZero,
    PhaseViolation,
    // syntax / range
    LexError,
    InvalidDuration,
    PositionOutOfRange,
    ParseError,
    PitchOutOfRange,
    ControllerOutOfRange,
    // type / vocal
    VocalOverlap,
    TypeMismatch,
    BadArgument,
    LyricRequired,
    // evaluation
    UndefinedName,
    Redeclaration,
    AssignToImmutable,
    DivisionByZero,
    RecursionLimit,
    // resources
    LoopLimit,
    AllocationLimit,
    // midi
    TempoOutOfRange,
    BadTimeSignature,
    // warnings
    LyricCountMismatch,
    UnknownEscape,
}

impl Code {
    /// The stable letter+digits code reported to users
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidPpq => "E001",
            Code::MissingTempoAtZero => "E010",
            Code::MissingMeterAtZero => "E011",
            Code::PhaseViolation => "E050",
            Code::LexError => "E100",
            Code::InvalidDuration => "E101",
            Code::PositionOutOfRange => "E102",
            Code::ParseError => "E103",
            Code::PitchOutOfRange => "E110",
            Code::ControllerOutOfRange => "E121",
            Code::VocalOverlap => "E200",
            Code::TypeMismatch => "E201",
            Code::BadArgument => "E202",
            Code::LyricRequired => "E210",
            Code::UndefinedName => "E300",
            Code::Redeclaration => "E301",
            Code::AssignToImmutable => "E302",
            Code::DivisionByZero => "E303",
            Code::RecursionLimit => "E310",
            Code::LoopLimit => "E401",
            Code::AllocationLimit => "E402",
            Code::TempoOutOfRange => "E500",
            Code::BadTimeSignature => "E501",
            Code::LyricCountMismatch => "W001",
            Code::UnknownEscape => "W002",
        }
    }

    /// Default severity for the code (`W` codes are warnings)
    pub fn severity(&self) -> Severity {
        match self {
            Code::LyricCountMismatch | Code::UnknownEscape => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A related location, e.g. the first of two conflicting notes
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Related {
    pub message: String,
    pub span: Span,
}

/// A structured compiler diagnostic
///
/// Carries everything a renderer needs for a caret-annotated message:
/// severity, stable code, message, optional file path and span, an optional
/// short label for the primary span, an optional help suggestion, and any
/// related spans.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Error)]
#[error("[{code}] {message}")]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Code,
    pub message: String,
    pub path: Option<String>,
    pub span: Option<Span>,
    pub label: Option<String>,
    pub help: Option<String>,
    pub related: Vec<Related>,
}

impl Diagnostic {
    /// Create a diagnostic with the code's default severity
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: code.severity(),
            code,
            message: message.into(),
            path: None,
            span: None,
            label: None,
            help: None,
            related: Vec::new(),
        }
    }

    pub fn error(code: Code, message: impl Into<String>, span: Span) -> Self {
        Diagnostic::new(code, message).with_span(span)
    }

    pub fn warning(code: Code, message: impl Into<String>, span: Span) -> Self {
        let mut d = Diagnostic::new(code, message).with_span(span);
        d.severity = Severity::Warning;
        d
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_related(mut self, message: impl Into<String>, span: Span) -> Self {
        self.related.push(Related { message: message.into(), span });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings() {
        assert_eq!(Code::PitchOutOfRange.as_str(), "E110");
        assert_eq!(Code::VocalOverlap.as_str(), "E200");
        assert_eq!(Code::LoopLimit.as_str(), "E401");
        assert_eq!(Code::LyricCountMismatch.as_str(), "W001");
    }

    #[test]
    fn test_warning_codes_default_to_warning_severity() {
        let d = Diagnostic::new(Code::LyricCountMismatch, "lyric count mismatch");
        assert_eq!(d.severity, Severity::Warning);
        assert!(!d.is_error());
    }

    #[test]
    fn test_builder_chain() {
        let span = Span::new(Pos::new(3, 7), Pos::new(3, 9));
        let d = Diagnostic::error(Code::PitchOutOfRange, "pitch 131 out of range 0..127", span)
            .with_label("this note")
            .with_help("keep transposed pitches within MIDI range");
        assert_eq!(d.code.as_str(), "E110");
        assert_eq!(d.span.unwrap().start.line, 3);
        assert!(d.help.unwrap().contains("MIDI range"));
    }

    #[test]
    fn test_display_includes_code() {
        let d = Diagnostic::new(Code::DivisionByZero, "division by zero");
        let text = format!("{}", d);
        assert!(text.contains("E303"));
        assert!(text.contains("division by zero"));
    }

    #[test]
    fn test_span_join() {
        let a = Span::new(Pos::new(1, 5), Pos::new(1, 8));
        let b = Span::new(Pos::new(1, 2), Pos::new(1, 6));
        let j = a.join(b);
        assert_eq!(j.start.col, 2);
        assert_eq!(j.end.col, 8);
    }
}
