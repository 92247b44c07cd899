use std::path::{Path, PathBuf};

use logos::Logos;
use serde::Serialize;
use thiserror::Error;

/// Process escape sequences in a string literal
fn process_escape_sequences(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    // Unknown escape - keep as-is
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

fn unquote(slice: &str) -> String {
    process_escape_sequences(&slice[1..slice.len() - 1])
}

/// Span in source code (byte offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Index of a source file registered in a [`SourceMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct FileId(pub u32);

#[derive(Debug, Clone)]
struct SourceFile {
    path: PathBuf,
    text: String,
}

/// Every source text seen during one compile, so diagnostics can point back into it.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile { path: path.into(), text: text.into() });
        id
    }

    pub fn path(&self, id: FileId) -> Option<&Path> {
        self.files.get(id.0 as usize).map(|f| f.path.as_path())
    }

    pub fn text(&self, id: FileId) -> Option<&str> {
        self.files.get(id.0 as usize).map(|f| f.text.as_str())
    }

    /// Display name of a file, `<unknown>` for ids this map never issued.
    pub fn name(&self, id: FileId) -> String {
        self.path(id)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The five token classes the parser dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    String,
    Number,
    Name,
    Symbol,
    Keyword,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::String => write!(f, "string"),
            TokenKind::Number => write!(f, "number"),
            TokenKind::Name => write!(f, "name"),
            TokenKind::Symbol => write!(f, "symbol"),
            TokenKind::Keyword => write!(f, "keyword"),
        }
    }
}

/// A token with its position. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub span: Span,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn is(&self, kind: TokenKind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::String => write!(f, "\"{}\"", self.value),
            _ => write!(f, "{}", self.value),
        }
    }
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]  // Skip whitespace
#[logos(skip r"//[^\n]*")]      // Skip line comments
enum Lexeme {
    #[token("let")]
    #[token("for")]
    #[token("in")]
    #[token("if")]
    #[token("else")]
    #[token("template")]
    #[token("handler")]
    #[token("import")]
    Keyword,

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unquote(lex.slice()))]
    Str(String),

    #[regex(r"-?[0-9]+(\.[0-9]+)?")]
    Number,

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*")]
    Name,

    #[token("<=")]
    #[token(">=")]
    #[token("==")]
    #[regex(r"[<>/={}\[\](),:.#]")]
    Symbol,
}

/// Byte offset -> (line, column) translation for one source text
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { line_starts }
    }

    fn position(&self, source: &str, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let column = source[start..offset].chars().count() + 1;
        (line as u32 + 1, column as u32)
    }
}

/// Lexer wrapper that produces positioned [`Token`]s
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, Lexeme>,
    lines: LineIndex,
    file: FileId,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file: FileId) -> Self {
        Self {
            inner: Lexeme::lexer(source),
            lines: LineIndex::new(source),
            file,
        }
    }

    /// Tokenize the entire source into a Vec
    pub fn tokenize(source: &str, file: FileId) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source, file);
        let mut tokens = Vec::new();

        while let Some(token) = lexer.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        let Some(lexeme) = self.inner.next() else {
            return Ok(None);
        };

        let range = self.inner.span();
        let span = Span::new(range.start, range.end);
        let (line, column) = self.lines.position(self.inner.source(), range.start);

        let (kind, value) = match lexeme {
            Ok(Lexeme::Keyword) => (TokenKind::Keyword, self.inner.slice().to_string()),
            Ok(Lexeme::Str(value)) => (TokenKind::String, value),
            Ok(Lexeme::Number) => (TokenKind::Number, self.inner.slice().to_string()),
            Ok(Lexeme::Name) => (TokenKind::Name, self.inner.slice().to_string()),
            Ok(Lexeme::Symbol) => (TokenKind::Symbol, self.inner.slice().to_string()),
            Err(()) => {
                return Err(LexError {
                    found: self.inner.slice().to_string(),
                    file: self.file,
                    span,
                    line,
                    column,
                });
            }
        };

        Ok(Some(Token { kind, value, span, line, column }))
    }
}

/// Convenience wrapper around [`Lexer::tokenize`].
pub fn tokenize(source: &str, file: FileId) -> Result<Vec<Token>, LexError> {
    Lexer::tokenize(source, file)
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("unexpected character '{found}' on line {line}, column {column}")]
pub struct LexError {
    pub found: String,
    pub file: FileId,
    pub span: Span,
    pub line: u32,
    pub column: u32,
}
