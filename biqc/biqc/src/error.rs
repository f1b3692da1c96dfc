use std::fmt::Debug;

use serde::Serialize;

use crate::span::Span;

/// Stable machine-readable error codes, grouped by pipeline stage.
///
/// These cross the API boundary and must never be renumbered; add new codes
/// at the end of a group instead.
pub mod codes {
    /// No operation with that name is registered at all.
    pub const UNKNOWN_FUNCTION: &str = "E0101";
    /// The operation exists, but no variant accepts these argument types
    /// under this dialect/scope combination.
    pub const WRONG_ARGUMENT_TYPES: &str = "E0102";
    /// A `Field` node does not resolve in the translation environment.
    pub const UNKNOWN_FIELD: &str = "E0103";

    /// A literal value cannot be represented in the requested data type.
    pub const INVALID_LITERAL: &str = "E0301";
    /// Request exceeds the configured field-count limit.
    pub const TOO_MANY_FIELDS: &str = "E0302";
    /// The assembled query has no usable structure (e.g. empty select).
    pub const INVALID_QUERY_STRUCTURE: &str = "E0303";
    /// A filter argument cannot be coerced to the filter's cast type.
    pub const INVALID_FILTER_VALUE: &str = "E0304";

    /// Two split masks claim the same AST location.
    pub const MASK_CONFLICT: &str = "E0401";
    /// Aggregations in one query request incompatible dimension sets.
    pub const INCOMPATIBLE_LOD_DIMENSIONS: &str = "E0402";
    /// The splitter fixed point did not converge within its bound.
    pub const SPLIT_GUARD_EXCEEDED: &str = "E0403";

    /// A wire response violates the event-ordering protocol.
    pub const PROTOCOL: &str = "E0501";
    /// The planned query selects nothing from nowhere.
    pub const EMPTY_QUERY: &str = "E0502";
    /// A download stream exceeded the hard row-count limit.
    pub const ROW_LIMIT: &str = "E0503";
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A biqc error. Compilation stages produce these directly; the execution
/// crate re-serializes them across the wire without exposing type names.
#[derive(Debug, Clone)]
pub struct Error {
    /// Message kind. Currently only Error and Warning are produced.
    pub kind: MessageKind,
    pub span: Option<Span>,
    pub reason: Reason,
    pub hints: Vec<String>,
    /// Machine readable identifier error code, eg "E0101".
    pub code: Option<&'static str>,
}

/// Multiple biqc errors, e.g. everything collected while compiling one field.
#[derive(Debug, Clone)]
pub struct Errors(pub Vec<Error>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    Error,
    Warning,
    Lint,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    Expected {
        who: Option<String>,
        expected: String,
        found: String,
    },
    Unexpected {
        found: String,
    },
    NotFound {
        name: String,
        namespace: String,
    },
    Bug {
        details: Option<String>,
    },
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            kind: MessageKind::Error,
            span: None,
            reason,
            hints: Vec::new(),
            code: None,
        }
    }

    pub fn new_simple<S: ToString>(reason: S) -> Self {
        Error::new(Reason::Simple(reason.to_string()))
    }

    /// Used for things that you *think* should never happen, but are not sure.
    pub fn new_assert<S: ToString>(details: S) -> Self {
        Error::new(Reason::Bug {
            details: Some(details.to_string()),
        })
    }

    pub fn new_warning(reason: Reason) -> Self {
        Error {
            kind: MessageKind::Warning,
            span: None,
            reason,
            hints: Vec::new(),
            code: None,
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Simple(text) => f.write_str(text),
            Reason::Expected {
                who,
                expected,
                found,
            } => {
                if let Some(who) = who {
                    write!(f, "{who} ")?;
                }
                write!(f, "expected {expected}, but found {found}")
            }
            Reason::Unexpected { found } => write!(f, "unexpected {found}"),
            Reason::NotFound { name, namespace } => write!(f, "{namespace} `{name}` not found"),
            Reason::Bug { details } => {
                write!(f, "internal compiler error")?;
                if let Some(details) = details {
                    write!(f, "; {details}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<Error> for Errors {
    fn from(error: Error) -> Self {
        Errors(vec![error])
    }
}

impl Errors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first error, when exactly one is expected by the caller.
    pub fn into_first(mut self) -> Error {
        if self.0.is_empty() {
            return Error::new_assert("empty error collection");
        }
        self.0.remove(0)
    }
}

impl std::error::Error for Error {}

impl std::error::Error for Errors {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self, f)
    }
}

impl std::fmt::Display for Errors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self, f)
    }
}

pub trait WithErrorInfo: Sized {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self;

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self;

    fn with_span(self, span: Option<Span>) -> Self;

    /// Set the span only if not already set by a deeper frame.
    fn with_span_fallback(self, span: Option<Span>) -> Self;

    fn with_code(self, code: &'static str) -> Self;
}

impl WithErrorInfo for Error {
    fn push_hint<S: Into<String>>(mut self, hint: S) -> Self {
        self.hints.push(hint.into());
        self
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(mut self, hints: I) -> Self {
        self.hints = hints.into_iter().map(|x| x.into()).collect();
        self
    }

    fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    fn with_span_fallback(mut self, span: Option<Span>) -> Self {
        self.span = self.span.or(span);
        self
    }

    fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

impl<T, E: WithErrorInfo> WithErrorInfo for Result<T, E> {
    fn push_hint<S: Into<String>>(self, hint: S) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }

    fn with_hints<S: Into<String>, I: IntoIterator<Item = S>>(self, hints: I) -> Self {
        self.map_err(|e| e.with_hints(hints))
    }

    fn with_span(self, span: Option<Span>) -> Self {
        self.map_err(|e| e.with_span(span))
    }

    fn with_span_fallback(self, span: Option<Span>) -> Self {
        self.map_err(|e| e.with_span_fallback(span))
    }

    fn with_code(self, code: &'static str) -> Self {
        self.map_err(|e| e.with_code(code))
    }
}
