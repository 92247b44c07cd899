use fun_ast::Loc;
use fun_lexer::{FileId, Span};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// A node that cannot stand for a runtime value
    UnknownReference,
    /// Valid tree, but no instruction sequence exists for it
    Unsupported,
    /// The tree was not fully resolved
    Internal,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} on line {line}, column {column}")]
pub struct CodegenError {
    pub kind: CodegenErrorKind,
    pub message: String,
    pub file: FileId,
    pub span: Span,
    pub line: u32,
    pub column: u32,
}

impl CodegenError {
    pub(crate) fn new(kind: CodegenErrorKind, loc: Loc, message: impl Into<String>) -> Self {
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
