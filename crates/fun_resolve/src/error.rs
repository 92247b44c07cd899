use fun_ast::Loc;
use fun_lexer::{FileId, Span};
use fun_parser::ParseError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    UndeclaredAlias,
    RepeatDeclaration,
    ModuleNotFound,
    FileNotFound,
    Io,
    Syntax,
    NotInvocable,
    UnsupportedIteration,
    InvalidExpand,
    MisplacedStatement,
    TooDeep,
    /// A carried declaration id with no template or handler behind it
    MissingDeclaration,
}

/// Resolution stops at the first error; every error points at the node that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} on line {line}, column {column}")]
pub struct ResolveError {
    pub kind: ResolveErrorKind,
    pub message: String,
    pub file: FileId,
    pub span: Span,
    pub line: u32,
    pub column: u32,
}

impl ResolveError {
    pub(crate) fn new(kind: ResolveErrorKind, loc: Loc, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: loc.file,
            span: loc.span,
            line: loc.line,
            column: loc.column,
        }
    }
}

impl From<ParseError> for ResolveError {
    fn from(e: ParseError) -> Self {
        Self {
            kind: ResolveErrorKind::Syntax,
            message: e.message,
            file: e.file,
            span: e.span,
            line: e.line,
            column: e.column,
        }
    }
}
