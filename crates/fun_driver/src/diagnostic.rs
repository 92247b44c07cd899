//! Source-located error reports

use std::io::{self, IsTerminal};

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use fun_codegen::CodegenError;
use fun_lexer::{FileId, LexError, SourceMap, Span};
use fun_parser::ParseError;
use fun_resolve::ResolveError;

struct Located {
    file: FileId,
    span: Span,
    message: String,
}

fn locate(err: &anyhow::Error) -> Option<Located> {
    if let Some(e) = err.downcast_ref::<LexError>() {
        return Some(Located { file: e.file, span: e.span, message: format!("unexpected character '{}'", e.found) });
    }
    if let Some(e) = err.downcast_ref::<ParseError>() {
        return Some(Located { file: e.file, span: e.span, message: e.message.clone() });
    }
    if let Some(e) = err.downcast_ref::<ResolveError>() {
        return Some(Located { file: e.file, span: e.span, message: e.message.clone() });
    }
    if let Some(e) = err.downcast_ref::<CodegenError>() {
        return Some(Located { file: e.file, span: e.span, message: e.message.clone() });
    }
    None
}

/// ariadne counts characters, spans count bytes
fn char_offset(text: &str, byte: usize) -> usize {
    let byte = byte.min(text.len());
    text.get(..byte).map_or(byte, |prefix| prefix.chars().count())
}

/// Print `err` to stderr, pointing into the source when it carries a location.
pub fn report(err: &anyhow::Error, sources: &SourceMap) {
    let Some(located) = locate(err) else {
        eprintln!("error: {:#}", err);
        return;
    };
    let Some(text) = sources.text(located.file) else {
        eprintln!("error: {:#}", err);
        return;
    };

    let name = sources.name(located.file);
    let start = char_offset(text, located.span.start);
    let end = char_offset(text, located.span.end).max(start);
    let config = Config::default().with_color(io::stderr().is_terminal());

    let printed = Report::build(ReportKind::Error, name.clone(), start)
        .with_config(config)
        .with_message(err.to_string())
        .with_label(
            Label::new((name.clone(), start..end))
                .with_message(located.message)
                .with_color(Color::Red),
        )
        .finish()
        .eprint((name, Source::from(text)));

    if printed.is_err() {
        eprintln!("error: {:#}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_offset_counts_characters() {
        assert_eq!(char_offset("héllo", 3), 2);
        assert_eq!(char_offset("abc", 10), 3);
    }

    #[test]
    fn test_locates_stage_errors() {
        let err = fun_parser::parse_source("<div>", FileId(2)).unwrap_err();
        let located = locate(&anyhow::Error::new(err)).unwrap();
        assert_eq!(located.file, FileId(2));

        assert!(locate(&anyhow::anyhow!("plain")).is_none());
    }
}
