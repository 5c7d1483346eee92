// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases:
// the error taxonomy (`ErrorKind`), stable codes, severity, and line/column
// positions resolved against the source text.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0201`).
///
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning. Ranges: E01xx syntax, E02xx names, E03xx ports, E04xx types,
/// E05xx resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const E0101: DiagCode = DiagCode("E0101"); // syntax error
    pub const E0201: DiagCode = DiagCode("E0201"); // unknown definition
    pub const E0202: DiagCode = DiagCode("E0202"); // unknown primitive
    pub const E0203: DiagCode = DiagCode("E0203"); // duplicate definition
    pub const E0204: DiagCode = DiagCode("E0204"); // duplicate instance
    pub const E0301: DiagCode = DiagCode("E0301"); // arity mismatch
    pub const E0302: DiagCode = DiagCode("E0302"); // port mismatch
    pub const E0303: DiagCode = DiagCode("E0303"); // illegal fan-in
    pub const E0304: DiagCode = DiagCode("E0304"); // unbound port
    pub const E0401: DiagCode = DiagCode("E0401"); // contradictory signature
    pub const E0501: DiagCode = DiagCode("E0501"); // resource budget exceeded
    pub const W0201: DiagCode = DiagCode("W0201"); // unreachable definition
}

// ── Error taxonomy ───────────────────────────────────────────────────────

/// What went wrong, independent of where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Syntax,
    UnknownDefinition,
    UnknownPrimitive,
    DuplicateDefinition,
    DuplicateInstance,
    ArityMismatch,
    PortMismatch,
    IllegalFanIn,
    UnboundPort,
    Type,
    ResourceExceeded,
    /// Non-fatal findings (warnings) that have no error class of their own.
    Lint,
}

/// Coarse grouping used by callers that only need to tell malformed input
/// from well-formed but invalid input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Semantic,
    Resource,
}

impl ErrorKind {
    pub fn code(self) -> DiagCode {
        match self {
            ErrorKind::Syntax => codes::E0101,
            ErrorKind::UnknownDefinition => codes::E0201,
            ErrorKind::UnknownPrimitive => codes::E0202,
            ErrorKind::DuplicateDefinition => codes::E0203,
            ErrorKind::DuplicateInstance => codes::E0204,
            ErrorKind::ArityMismatch => codes::E0301,
            ErrorKind::PortMismatch => codes::E0302,
            ErrorKind::IllegalFanIn => codes::E0303,
            ErrorKind::UnboundPort => codes::E0304,
            ErrorKind::Type => codes::E0401,
            ErrorKind::ResourceExceeded => codes::E0501,
            ErrorKind::Lint => codes::W0201,
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::Syntax => ErrorCategory::Syntax,
            ErrorKind::ResourceExceeded => ErrorCategory::Resource,
            _ => ErrorCategory::Semantic,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::UnknownDefinition => "UnknownDefinitionError",
            ErrorKind::UnknownPrimitive => "UnknownPrimitiveError",
            ErrorKind::DuplicateDefinition => "DuplicateDefinitionError",
            ErrorKind::DuplicateInstance => "DuplicateInstanceError",
            ErrorKind::ArityMismatch => "ArityMismatchError",
            ErrorKind::PortMismatch => "PortMismatchError",
            ErrorKind::IllegalFanIn => "IllegalFanInError",
            ErrorKind::UnboundPort => "UnboundPortError",
            ErrorKind::Type => "TypeError",
            ErrorKind::ResourceExceeded => "ResourceExceededError",
            ErrorKind::Lint => "Warning",
        }
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Source position ──────────────────────────────────────────────────────

/// 1-based line and column (in characters) of a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Byte offsets of line starts, for offset → line/column lookups.
pub struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        LineIndex {
            source,
            line_starts,
        }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self
            .source
            .get(start..offset)
            .map_or(offset - start, |s| s.chars().count());
        Position {
            line: line + 1,
            column: column + 1,
        }
    }
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub code: DiagCode,
    pub level: DiagLevel,
    pub span: Span,
    pub position: Option<Position>,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create an error of the given kind; the code follows from the kind.
    pub fn error(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            level: DiagLevel::Error,
            span,
            position: None,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Create a warning.
    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self {
            level: DiagLevel::Warning,
            ..Self::error(ErrorKind::Lint, span, message)
        }
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// Resolve `position` from the span start if not already set.
    pub fn locate(&mut self, index: &LineIndex<'_>) {
        if self.position.is_none() {
            self.position = Some(index.position(self.span.start));
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        write!(f, "{}[{}]: {}", level, self.code, self.message)?;
        if let Some(pos) = &self.position {
            write!(f, "\n  --> {}:{}", pos.line, pos.column)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Resolve positions for every diagnostic in `diags`.
pub fn locate_all(diags: &mut [Diagnostic], source: &str) {
    let index = LineIndex::new(source);
    for d in diags {
        d.locate(&index);
    }
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
