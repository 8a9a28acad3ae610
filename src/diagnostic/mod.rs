pub mod ansi;
pub mod json;

use crate::ast::Span;

/// Where a byte offset falls in its source: 1-based line and byte column,
/// plus that line's text without its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub line: usize,
    pub col: usize,
    pub text: &'a str,
}

impl<'a> Location<'a> {
    pub fn of(source: &'a str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source.as_bytes()[..offset];
        let line_start = before.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let line_end = source[line_start..].find('\n').map_or(source.len(), |i| line_start + i);
        Location {
            line: before.iter().filter(|&&b| b == b'\n').count() + 1,
            col: offset - line_start + 1,
            text: source[line_start..line_end].trim_end_matches('\r'),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// An error report. Every failure the CLI shows goes through one of these.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for error types ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        let span = Span { start: e.position, end: e.position + e.snippet.len().max(1) };
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("ARITH-L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        let d = Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here");
        match e.code {
            "ARITH-P005" => d.with_suggestion("split the expression or remove redundant parentheses and negations"),
            _ => d,
        }
    }
}

impl From<&crate::vm::CompileError> for Diagnostic {
    fn from(e: &crate::vm::CompileError) -> Self {
        use crate::vm::CompileError;
        let d = Diagnostic::error(e.to_string()).with_code("ARITH-C001");
        match e {
            CompileError::NoFreeRegisters => {
                d.with_suggestion("regroup the expression so fewer operations wait on their left side")
            }
            CompileError::ConstantPoolFull => d.with_suggestion("split the expression into smaller ones"),
            CompileError::RegisterNotAllocated { .. } => d,
        }
    }
}

impl From<&crate::jit::JitError> for Diagnostic {
    fn from(e: &crate::jit::JitError) -> Self {
        use crate::jit::JitError;
        let mut d = Diagnostic::error(e.to_string()).with_code("ARITH-J001");
        match e {
            JitError::Toolchain { command, output, .. } => {
                d = d.with_note(format!("command: {command}"));
                let output = output.trim();
                if !output.is_empty() {
                    d = d.with_note(format!("toolchain output:\n{output}"));
                }
            }
            JitError::ToolchainSpawn { .. } => {
                d = d.with_suggestion("install a C compiler or point ARITH_CC / --cc at one");
            }
            JitError::ToolchainTimeout { .. } => {
                d = d.with_suggestion("raise ARITH_JIT_TIMEOUT or --timeout");
            }
            _ => {}
        }
        d
    }
}

impl From<&crate::backend::EvalError> for Diagnostic {
    fn from(e: &crate::backend::EvalError) -> Self {
        use crate::backend::EvalError;
        match e {
            EvalError::Compile(e) => e.into(),
            EvalError::Jit(e) => e.into(),
        }
    }
}
