use std::fmt::{Display, Formatter};

use thiserror::Error;

/// The compiler phase a [Diagnostic] was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Tokenizer,
    Preprocessor,
    Analyzer,
    Translator,
    Generator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

/// A user facing problem found while compiling a shader.
///
/// Diagnostics accumulate: a single compile reports everything it could find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub severity: Severity,
    pub line: u32,
    pub column: u32,
    pub message: String,
}
impl Diagnostic {
    pub fn error(phase: Phase, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            phase,
            severity: Severity::Error,
            line,
            column,
            message: message.into(),
        }
    }

    pub fn warning(phase: Phase, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            phase,
            severity: Severity::Warning,
            line,
            column,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "[ERR ] {}", self.message),
            Severity::Warning => write!(f, "[WARN] {}", self.message),
        }
    }
}

/// Returns true if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Compiler-internal failure during emission. Never caused by user code, it means an
/// earlier phase left the tree in a state the generator cannot print.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("code generation fail; unexpected node; compiler error; ({0})")]
    UnexpectedNode(&'static str),
    #[error("code generation fail; {0}; compiler error;")]
    Internal(String),
    #[error("formatting failed")]
    Fmt(#[from] std::fmt::Error),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Preprocessing failed!\n{0}")]
    Preprocess(String),
    #[error("Unsupported target api")]
    UnsupportedApi,
    #[error("generate called before a successful analyze")]
    NotAnalyzed,
    #[error("compilation failed with {0} error(s)")]
    Failed(usize),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
