//! HQL Error Handling - Unified Encapsulated API
//!
//! Every pipeline stage surfaces the same `HqlError` type; the stage is
//! carried by the kind, never by a separate wrapper. The linker and public
//! API do not transform or demote kinds.

use miette::{Diagnostic, SourceSpan};
use miette::{LabeledSpan, NamedSource};
use std::fmt;
use std::sync::Arc;

use crate::syntax::Meta;

// ============================================================================
// SOURCE CONTEXT - Error reporting infrastructure
// ============================================================================

/// Represents source context for error reporting with explicit hierarchy
/// between real sources (preferred) and fallbacks (tolerated when necessary)
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub name: String,
    pub content: String,
}

impl SourceContext {
    /// Create a source context from real file content
    /// This is the preferred method for error reporting
    pub fn from_file(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Create a fallback when real source is unavailable
    /// Use only when real source cannot be obtained
    pub fn fallback(context: &str) -> Self {
        Self {
            name: "fallback".to_string(),
            content: format!("; {}", context),
        }
    }

    /// Convert to NamedSource for use with miette error reporting
    pub fn to_named_source(&self) -> Arc<NamedSource<String>> {
        Arc::new(NamedSource::new(self.name.clone(), self.content.clone()))
    }
}

impl Default for SourceContext {
    fn default() -> Self {
        Self::fallback("default context")
    }
}

/// The single error type - no wrapper, no variants, just essential data
#[derive(Debug)]
pub struct HqlError {
    /// What went wrong (type-specific data)
    pub kind: ErrorKind,
    /// Where it happened (context-specific source information)
    pub source_info: SourceInfo,
    /// How to help (auto-populated based on context)
    pub diagnostic_info: DiagnosticInfo,
}

/// All error types as a clean enum - no duplicate fields
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    // Read errors - malformed source text
    UnterminatedString,
    UnmatchedBracket {
        bracket: String,
    },
    InvalidEscape {
        escape: String,
    },
    InvalidLiteral {
        literal_type: String,
        value: String,
    },
    MalformedSyntax {
        construct: String,
    },

    // Macro errors - bad definition or expansion failure
    MacroArity {
        macro_name: String,
        expected: String,
        actual: usize,
    },
    MalformedMacro {
        macro_name: String,
        reason: String,
    },
    UnknownPrimitive {
        name: String,
    },
    UnquoteOutsideQuasiquote,
    SpliceNotAList {
        actual: String,
    },
    InterpreterDepth {
        limit: usize,
    },
    UndefinedSymbol {
        symbol: String,
    },
    TypeMismatch {
        expected: String,
        actual: String,
    },

    // Validation errors - semantic analysis issues
    DuplicateDeclaration {
        symbol: String,
    },
    UndefinedAssignTarget {
        symbol: String,
    },
    CallArityMismatch {
        callee: String,
        expected: String,
        actual: usize,
    },
    ArgumentTypeMismatch {
        callee: String,
        param: String,
        expected: String,
        actual: String,
    },
    UnknownProperty {
        property: String,
        value_type: String,
    },

    // Lowering errors - IR construction invariant violated (internal bug)
    UnsupportedForm {
        form: String,
    },
    MalformedForm {
        form: String,
        reason: String,
    },

    // Code generation errors - IR shape not supported by emitter (internal bug)
    UnsupportedNode {
        kind: String,
    },

    // Module resolution errors
    UnknownSpecifier {
        specifier: String,
    },
    ForbiddenPath {
        path: String,
    },

    // IO errors
    Io {
        operation: String,
        path: String,
        detail: String,
    },

    // Runtime errors - thrown by executing generated code. The `code`
    // field distinguishes user errors from host failures so run_file
    // never retries on user code.
    Runtime {
        message: String,
        code: Option<String>,
    },
}

/// Context-specific source information
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub source: Arc<NamedSource<String>>,
    pub primary_span: SourceSpan,
    pub phase: String,
}

/// Diagnostic enhancement data
#[derive(Debug, Clone)]
pub struct DiagnosticInfo {
    pub help: Option<String>,
    pub error_code: String,
    pub is_warning: bool,
}

/// Context-aware error creation - each context knows how to create appropriate errors
pub trait ErrorReporting {
    /// Create an error with context-appropriate enhancements
    fn report(&self, kind: ErrorKind, span: SourceSpan) -> HqlError;

    /// Convenience methods for common error types
    fn invalid_literal(&self, literal_type: &str, value: &str, span: SourceSpan) -> HqlError {
        self.report(
            ErrorKind::InvalidLiteral {
                literal_type: literal_type.into(),
                value: value.into(),
            },
            span,
        )
    }

    fn malformed_syntax(&self, construct: &str, span: SourceSpan) -> HqlError {
        self.report(
            ErrorKind::MalformedSyntax {
                construct: construct.into(),
            },
            span,
        )
    }

    fn macro_arity(
        &self,
        macro_name: &str,
        expected: &str,
        actual: usize,
        span: SourceSpan,
    ) -> HqlError {
        self.report(
            ErrorKind::MacroArity {
                macro_name: macro_name.into(),
                expected: expected.into(),
                actual,
            },
            span,
        )
    }

    fn undefined_symbol(&self, symbol: &str, span: SourceSpan) -> HqlError {
        self.report(
            ErrorKind::UndefinedSymbol {
                symbol: symbol.into(),
            },
            span,
        )
    }

    fn type_mismatch(&self, expected: &str, actual: &str, span: SourceSpan) -> HqlError {
        self.report(
            ErrorKind::TypeMismatch {
                expected: expected.into(),
                actual: actual.into(),
            },
            span,
        )
    }

    fn malformed_form(&self, form: &str, reason: &str, span: SourceSpan) -> HqlError {
        self.report(
            ErrorKind::MalformedForm {
                form: form.into(),
                reason: reason.into(),
            },
            span,
        )
    }

    /// Creates an internal error - these indicate compiler bugs, not user errors.
    fn internal_error(&self, message: &str, span: SourceSpan) -> HqlError {
        let mut error = self.report(
            ErrorKind::UnsupportedNode {
                kind: format!("INTERNAL ERROR: {}", message),
            },
            span,
        );
        error.diagnostic_info.help =
            Some("This is an internal compiler error. Please report this as a bug.".into());
        error
    }
}

impl ErrorKind {
    /// Get the error category for test assertions and API consumers
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnterminatedString
            | Self::UnmatchedBracket { .. }
            | Self::InvalidEscape { .. }
            | Self::InvalidLiteral { .. }
            | Self::MalformedSyntax { .. } => ErrorCategory::Read,

            Self::MacroArity { .. }
            | Self::MalformedMacro { .. }
            | Self::UnknownPrimitive { .. }
            | Self::UnquoteOutsideQuasiquote
            | Self::SpliceNotAList { .. }
            | Self::InterpreterDepth { .. }
            | Self::UndefinedSymbol { .. }
            | Self::TypeMismatch { .. } => ErrorCategory::Macro,

            Self::DuplicateDeclaration { .. }
            | Self::UndefinedAssignTarget { .. }
            | Self::CallArityMismatch { .. }
            | Self::ArgumentTypeMismatch { .. }
            | Self::UnknownProperty { .. } => ErrorCategory::Validation,

            Self::UnsupportedForm { .. } | Self::MalformedForm { .. } => ErrorCategory::Lowering,

            Self::UnsupportedNode { .. } => ErrorCategory::CodeGen,

            Self::UnknownSpecifier { .. } | Self::ForbiddenPath { .. } => {
                ErrorCategory::ModuleResolve
            }

            Self::Io { .. } => ErrorCategory::Io,

            Self::Runtime { .. } => ErrorCategory::Runtime,
        }
    }

    /// Get error code suffix for diagnostic codes
    pub const fn code_suffix(&self) -> &'static str {
        match self {
            Self::UnterminatedString => "unterminated_string",
            Self::UnmatchedBracket { .. } => "unmatched_bracket",
            Self::InvalidEscape { .. } => "invalid_escape",
            Self::InvalidLiteral { .. } => "invalid_literal",
            Self::MalformedSyntax { .. } => "malformed_syntax",
            Self::MacroArity { .. } => "macro_arity",
            Self::MalformedMacro { .. } => "malformed_macro",
            Self::UnknownPrimitive { .. } => "unknown_primitive",
            Self::UnquoteOutsideQuasiquote => "unquote_depth",
            Self::SpliceNotAList { .. } => "splice_not_a_list",
            Self::InterpreterDepth { .. } => "interpreter_depth",
            Self::UndefinedSymbol { .. } => "undefined_symbol",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::DuplicateDeclaration { .. } => "duplicate_declaration",
            Self::UndefinedAssignTarget { .. } => "undefined_assign_target",
            Self::CallArityMismatch { .. } => "call_arity_mismatch",
            Self::ArgumentTypeMismatch { .. } => "argument_type_mismatch",
            Self::UnknownProperty { .. } => "unknown_property",
            Self::UnsupportedForm { .. } => "unsupported_form",
            Self::MalformedForm { .. } => "malformed_form",
            Self::UnsupportedNode { .. } => "unsupported_node",
            Self::UnknownSpecifier { .. } => "unknown_specifier",
            Self::ForbiddenPath { .. } => "forbidden_path",
            Self::Io { .. } => "io",
            Self::Runtime { .. } => "runtime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Read,
    Macro,
    Validation,
    Lowering,
    CodeGen,
    ModuleResolve,
    Io,
    Runtime,
}

impl std::error::Error for HqlError {}

impl fmt::Display for HqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::UnterminatedString => {
                write!(f, "Read error: unterminated string literal")
            }
            ErrorKind::UnmatchedBracket { bracket } => {
                write!(f, "Read error: unmatched '{}'", bracket)
            }
            ErrorKind::InvalidEscape { escape } => {
                write!(f, "Read error: invalid escape sequence '\\{}'", escape)
            }
            ErrorKind::InvalidLiteral {
                literal_type,
                value,
            } => {
                write!(f, "Read error: invalid {} '{}'", literal_type, value)
            }
            ErrorKind::MalformedSyntax { construct } => {
                write!(f, "Read error: {}", construct)
            }
            ErrorKind::MacroArity {
                macro_name,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Macro error: '{}' expects {} arguments, got {}",
                    macro_name, expected, actual
                )
            }
            ErrorKind::MalformedMacro { macro_name, reason } => {
                write!(f, "Macro error: invalid macro '{}': {}", macro_name, reason)
            }
            ErrorKind::UnknownPrimitive { name } => {
                write!(f, "Macro error: unknown macro primitive '{}'", name)
            }
            ErrorKind::UnquoteOutsideQuasiquote => {
                write!(f, "Macro error: unquote outside quasiquote")
            }
            ErrorKind::SpliceNotAList { actual } => {
                write!(
                    f,
                    "Macro error: unquote-splicing requires a list, got {}",
                    actual
                )
            }
            ErrorKind::InterpreterDepth { limit } => {
                write!(f, "Macro error: call depth limit of {} exceeded", limit)
            }
            ErrorKind::UndefinedSymbol { symbol } => {
                write!(f, "Macro error: undefined symbol '{}'", symbol)
            }
            ErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "Type error: expected {}, got {}", expected, actual)
            }
            ErrorKind::DuplicateDeclaration { symbol } => {
                write!(
                    f,
                    "Validation error: '{}' has already been declared in this scope",
                    symbol
                )
            }
            ErrorKind::UndefinedAssignTarget { symbol } => {
                write!(
                    f,
                    "Validation error: cannot assign to undeclared binding '{}'",
                    symbol
                )
            }
            ErrorKind::CallArityMismatch {
                callee,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Validation error: '{}' expects {} arguments, got {}",
                    callee, expected, actual
                )
            }
            ErrorKind::ArgumentTypeMismatch {
                callee,
                param,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Validation error: argument '{}' of '{}' expects type {}, got {}",
                    param, callee, expected, actual
                )
            }
            ErrorKind::UnknownProperty {
                property,
                value_type,
            } => {
                write!(
                    f,
                    "Validation error: no property '{}' on values of type {}",
                    property, value_type
                )
            }
            ErrorKind::UnsupportedForm { form } => {
                write!(f, "Lowering error: unsupported form '{}'", form)
            }
            ErrorKind::MalformedForm { form, reason } => {
                write!(f, "Lowering error: malformed '{}' form: {}", form, reason)
            }
            ErrorKind::UnsupportedNode { kind } => {
                write!(f, "Code generation error: {}", kind)
            }
            ErrorKind::UnknownSpecifier { specifier } => {
                write!(f, "Module error: cannot resolve specifier '{}'", specifier)
            }
            ErrorKind::ForbiddenPath { path } => {
                write!(f, "Module error: path outside allowed roots: '{}'", path)
            }
            ErrorKind::Io {
                operation,
                path,
                detail,
            } => {
                write!(f, "IO error: failed to {} '{}': {}", operation, path, detail)
            }
            ErrorKind::Runtime { message, .. } => {
                write!(f, "Runtime error: {}", message)
            }
        }
    }
}

impl Diagnostic for HqlError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.diagnostic_info.error_code))
    }

    fn severity(&self) -> Option<miette::Severity> {
        if self.diagnostic_info.is_warning {
            Some(miette::Severity::Warning)
        } else {
            Some(miette::Severity::Error)
        }
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic_info
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        let labels = vec![LabeledSpan::new_with_span(
            Some(self.primary_label()),
            self.source_info.primary_span,
        )];
        Some(Box::new(labels.into_iter()))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&*self.source_info.source)
    }
}

impl HqlError {
    fn primary_label(&self) -> String {
        match &self.kind {
            ErrorKind::UnterminatedString => "string starts here".into(),
            ErrorKind::UnmatchedBracket { .. } => "unmatched bracket".into(),
            ErrorKind::InvalidEscape { .. } => "invalid escape".into(),
            ErrorKind::InvalidLiteral { .. } => "invalid literal".into(),
            ErrorKind::MalformedSyntax { .. } => "malformed syntax".into(),
            ErrorKind::MacroArity { .. } => "macro call here".into(),
            ErrorKind::MalformedMacro { .. } => "invalid macro".into(),
            ErrorKind::UnknownPrimitive { .. } => "unknown primitive".into(),
            ErrorKind::UnquoteOutsideQuasiquote => "unquote here".into(),
            ErrorKind::SpliceNotAList { .. } => "splice here".into(),
            ErrorKind::InterpreterDepth { .. } => "call depth exceeded".into(),
            ErrorKind::UndefinedSymbol { .. } => "undefined symbol".into(),
            ErrorKind::TypeMismatch { .. } => "type mismatch".into(),
            ErrorKind::DuplicateDeclaration { .. } => "redeclared here".into(),
            ErrorKind::UndefinedAssignTarget { .. } => "assignment target".into(),
            ErrorKind::CallArityMismatch { .. } => "call here".into(),
            ErrorKind::ArgumentTypeMismatch { .. } => "argument here".into(),
            ErrorKind::UnknownProperty { .. } => "property access".into(),
            ErrorKind::UnsupportedForm { .. } => "unsupported form".into(),
            ErrorKind::MalformedForm { .. } => "malformed form".into(),
            ErrorKind::UnsupportedNode { .. } => "unsupported node".into(),
            ErrorKind::UnknownSpecifier { .. } => "import here".into(),
            ErrorKind::ForbiddenPath { .. } => "resolved path".into(),
            ErrorKind::Io { .. } => "while compiling this module".into(),
            ErrorKind::Runtime { .. } => "error originates here".into(),
        }
    }

    /// Attach or replace help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.diagnostic_info.help = Some(help.into());
        self
    }

    /// Mark this diagnostic as a non-fatal warning.
    pub fn as_warning(mut self) -> Self {
        self.diagnostic_info.is_warning = true;
        self
    }

    pub fn is_warning(&self) -> bool {
        self.diagnostic_info.is_warning
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

/// Creates a placeholder span for errors not tied to a specific source code
/// location, such as I/O errors or internal state failures.
pub fn unspanned() -> miette::SourceSpan {
    miette::SourceSpan::from(0..0)
}

/// Converts an HQL source `Meta` to a miette SourceSpan using its byte
/// offsets. Metas produced by macro expansion may have no offsets; those
/// map to the unspanned placeholder.
pub fn to_source_span(meta: &Meta) -> miette::SourceSpan {
    match (meta.offset, meta.end_offset) {
        (Some(start), Some(end)) if end >= start => miette::SourceSpan::from(start..end),
        (Some(start), _) => miette::SourceSpan::from(start..start),
        _ => unspanned(),
    }
}

/// Converts an optional `Meta` (the common shape on S-expression nodes).
pub fn meta_span(meta: Option<&Meta>) -> miette::SourceSpan {
    meta.map(to_source_span).unwrap_or_else(unspanned)
}

/// General-purpose error creation context used throughout the pipeline
/// for creating properly contextualized HqlError instances
pub struct ReportContext {
    pub source: SourceContext,
    pub phase: String,
}

impl ReportContext {
    pub fn new(source: SourceContext, phase: impl Into<String>) -> Self {
        Self {
            source,
            phase: phase.into(),
        }
    }
}

impl ErrorReporting for ReportContext {
    fn report(&self, kind: ErrorKind, span: SourceSpan) -> HqlError {
        let error_code = format!("hql::{}::{}", self.phase, kind.code_suffix());

        HqlError {
            kind,
            source_info: SourceInfo {
                source: self.source.to_named_source(),
                primary_span: span,
                phase: self.phase.clone(),
            },
            diagnostic_info: DiagnosticInfo {
                help: None,
                error_code,
                is_warning: false,
            },
        }
    }
}

/// A host IO failure, kept as a typed source until it crosses into the
/// diagnostic system.
#[derive(Debug, thiserror::Error)]
#[error("failed to {operation} '{path}'")]
pub struct IoFailure {
    pub operation: String,
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

impl From<IoFailure> for HqlError {
    fn from(failure: IoFailure) -> HqlError {
        let ctx = ReportContext::new(SourceContext::fallback(&failure.path), "io");
        ctx.report(
            ErrorKind::Io {
                operation: failure.operation,
                path: failure.path,
                detail: failure.source.to_string(),
            },
            unspanned(),
        )
    }
}

/// Shorthand for wrapping a `std::io::Error` at its call site.
pub fn io_error(operation: &str, path: &str, source: std::io::Error) -> HqlError {
    HqlError::from(IoFailure {
        operation: operation.into(),
        path: path.into(),
        source,
    })
}

/// Prints an HqlError with full miette diagnostics
///
/// This provides rich error formatting with source spans, suggestions, and
/// context for user-facing error display.
pub fn print_error(error: HqlError) {
    use miette::Report;
    let report = Report::new(error);
    eprintln!("{report:?}");
}
