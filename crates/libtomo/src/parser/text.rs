//! Text literal parsing: quote families, escapes, interpolation, heredocs.
//!
//! Text supports several quoting families: `"..."`, `'...'`, `` `...` ``
//! and `$lang"..."` for language-tagged text, where the delimiter after the
//! language name may also be one of the paired brackets `()`, `[]`, `{}`,
//! `<>` (nested pairs are tracked with a depth counter). `$$` opens a text
//! with interpolation disabled. Escapes are not decoded inside
//! backtick-quoted text.
//!
//! A literal whose opener is immediately followed by a newline is a heredoc:
//! every body line must be indented one unit past the header line, the
//! common indent is stripped, and the trailing newline before the closer is
//! dropped.

use std::borrow::Cow;

use nom::{Err, Input, IResult};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind};
use crate::nom_tools::{line_indent, NomSpan, Span, SPACES_PER_INDENT};

use super::{fail, raw_ident, suffix, TomoParserError};

fn closing_delimiter(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        '<' => Some('>'),
        _ => None,
    }
}

struct TextFlavor<'base> {
    lang: Option<Cow<'base, str>>,
    open: char,
    close: char,
    /// `None` disables interpolation (`$$"..."`)
    interp: Option<char>,
    escapes: bool,
    opener_len: usize,
}

fn classify<'base>(input: &NomSpan<'base>) -> Option<TextFlavor<'base>> {
    let fragment = *input.fragment();
    let mut chars = fragment.chars();
    match chars.next()? {
        '"' => Some(TextFlavor { lang: None, open: '"', close: '"', interp: Some('$'), escapes: true, opener_len: 1 }),
        '\'' => Some(TextFlavor { lang: None, open: '\'', close: '\'', interp: Some('$'), escapes: true, opener_len: 1 }),
        '`' => Some(TextFlavor { lang: None, open: '`', close: '`', interp: Some('$'), escapes: false, opener_len: 1 }),
        '$' => {
            let rest = &fragment[1..];
            if let Some(after) = rest.strip_prefix('$') {
                // $$"..." — interpolation disabled
                let open = after.chars().next()?;
                if open == '"' || open == '\'' || open == '`' || closing_delimiter(open).is_some() {
                    let close = closing_delimiter(open).unwrap_or(open);
                    return Some(TextFlavor { lang: None, open, close, interp: None, escapes: open != '`', opener_len: 3 });
                }
                return None;
            }
            // $lang"..." / $lang(...)
            let (after_name, name) = raw_ident(input.take_split(1).0).ok()?;
            let open = after_name.fragment().chars().next()?;
            if open == '"' || open == '\'' || open == '`' || closing_delimiter(open).is_some() {
                let close = closing_delimiter(open).unwrap_or(open);
                Some(TextFlavor {
                    lang: Some(Cow::Borrowed(*name.fragment())),
                    open,
                    close,
                    interp: Some('$'),
                    escapes: open != '`',
                    opener_len: 1 + name.fragment().len() + 1,
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Decodes one escape sequence (the input starts after the backslash).
/// Returns the cooked text and the number of bytes consumed.
fn unescape(input: &str) -> Result<(String, usize), &'static str> {
    let mut chars = input.chars();
    let c = chars.next().ok_or("This escape sequence is missing its character")?;
    let simple = |s: &str| Ok((s.to_string(), 1));
    match c {
        'n' => simple("\n"),
        't' => simple("\t"),
        'r' => simple("\r"),
        'a' => simple("\x07"),
        'b' => simple("\x08"),
        'e' => simple("\x1b"),
        'f' => simple("\x0c"),
        'v' => simple("\x0b"),
        '\\' => simple("\\"),
        '"' => simple("\""),
        '\'' => simple("'"),
        '`' => simple("`"),
        '$' => simple("$"),
        'x' => {
            let hex: String = input[1..].chars().take(2).collect();
            if hex.len() == 2 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                let byte = u8::from_str_radix(&hex, 16).unwrap_or(0);
                Ok(((byte as char).to_string(), 3))
            } else {
                Err("I expected two hex digits after '\\x'")
            }
        }
        '0'..='7' => {
            let octal: String = input.chars().take_while(|c| ('0'..='7').contains(c)).take(3).collect();
            let byte = u8::from_str_radix(&octal, 8).map_err(|_| "Invalid octal escape")?;
            Ok(((byte as char).to_string(), octal.len()))
        }
        '[' => {
            // ANSI escape shorthand: \[...m becomes ESC[...m
            let body_len = input[1..].find('m').ok_or("I expected an 'm' to finish this ANSI escape")?;
            Ok((format!("\x1b[{}m", &input[1..1 + body_len]), 1 + body_len + 1))
        }
        '{' => {
            let body_len = input[1..].find('}').ok_or("I expected a '}' to finish this escape")?;
            let body = &input[1..1 + body_len];
            if let Some(hex) = body.strip_prefix("U+").or_else(|| body.strip_prefix("u+")) {
                let point = u32::from_str_radix(hex, 16).map_err(|_| "Invalid unicode code point")?;
                let c = char::from_u32(point).ok_or("Invalid unicode code point")?;
                Ok((c.to_string(), 1 + body_len + 1))
            } else {
                Err("Unicode escapes must use '\\{U+XXXX}' code point form")
            }
        }
        _ => Err("I don't recognize this escape sequence"),
    }
}

struct TextScanner<'base> {
    chunks: Vec<Ast<'base>>,
    cooked: String,
    chunk_start: usize,
    state: crate::nom_tools::State,
}

impl<'base> TextScanner<'base> {
    fn flush(&mut self, end: usize) {
        if !self.cooked.is_empty() {
            let span = Span::new(self.chunk_start..end, self.state.clone());
            let cooked = std::mem::take(&mut self.cooked);
            self.chunks.push(Ast::new(span, AstKind::TextLiteral(Cow::Owned(cooked))));
        }
        self.chunk_start = end;
    }
}

/// Parses a text literal in any quote family.
pub fn parse_text(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let Some(flavor) = classify(&input) else {
        return Err(Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("text literal"))],
        }));
    };
    let start: Span = (&input).into();
    let header_indent = line_indent(&input).unwrap_or(0);
    let string_indent = header_indent + SPACES_PER_INDENT;

    let (mut rest, _) = input.take_split(flavor.opener_len);
    let heredoc = rest.fragment().starts_with('\n') || rest.fragment().starts_with("\r\n");

    let mut scanner = TextScanner {
        chunks: Vec::new(),
        cooked: String::new(),
        chunk_start: rest.location_offset(),
        state: rest.extra.clone(),
    };
    let mut depth = 1usize;
    let mut offset = 0usize;

    if heredoc {
        // Consume the opener's newline and the first body line's indent
        let fragment = *rest.fragment();
        offset = fragment.find('\n').unwrap_or(0) + 1;
        match eat_heredoc_indent(&rest, &mut offset, string_indent, header_indent, flavor.close) {
            HeredocLine::Body => {}
            HeredocLine::Closer => {
                let (after, _) = rest.take_split(offset + 1);
                let span = Span::new(start.position.start..after.location_offset(), start.state.clone());
                return Ok((after, finish_text(flavor.lang, scanner.chunks, span)));
            }
            HeredocLine::BadIndent => {
                return fail(rest, "This multi-line text should be indented one level past its opening line");
            }
        }
        scanner.chunk_start = rest.location_offset() + offset;
    }

    loop {
        let fragment = *rest.fragment();
        let Some(c) = fragment[offset..].chars().next() else {
            return fail(rest, "I expected this text to be closed before the end of the file");
        };

        if Some(c) == flavor.interp {
            let interp_start = rest.location_offset() + offset;
            scanner.flush(interp_start);
            let (after_sigil, _) = rest.take_split(offset + c.len_utf8());
            if after_sigil.fragment().starts_with([' ', '\t']) {
                return fail(after_sigil, "Whitespace is not allowed before an interpolation here");
            }
            let (after_term, term) = match suffix::parse_interp_term(after_sigil.clone()) {
                Ok(result) => result,
                Err(_) => return fail(after_sigil, "I expected an interpolation term here"),
            };
            scanner.chunks.push(term);
            scanner.chunk_start = after_term.location_offset();
            rest = after_term;
            offset = 0;
            continue;
        }

        if flavor.escapes && c == '\\' {
            let escape_at = offset + 1;
            match unescape(&fragment[escape_at..]) {
                Ok((cooked, consumed)) => {
                    scanner.cooked.push_str(&cooked);
                    offset = escape_at + consumed;
                    continue;
                }
                Err(message) => {
                    let (at, _) = rest.take_split(offset);
                    return Err(Err::Failure(VerboseError {
                        errors: vec![(at, VerboseErrorKind::Context(message))],
                    }));
                }
            }
        }

        if c == '\n' || c == '\r' {
            if !heredoc {
                let (at, _) = rest.take_split(offset);
                return fail(at, "This text literal is missing its closing quote");
            }
            // Line break inside a heredoc
            offset += if fragment[offset..].starts_with("\r\n") { 2 } else { 1 };
            match eat_heredoc_indent(&rest, &mut offset, string_indent, header_indent, flavor.close) {
                HeredocLine::Body => {
                    scanner.cooked.push('\n');
                    continue;
                }
                HeredocLine::Closer => {
                    scanner.flush(rest.location_offset() + offset);
                    let (after, _) = rest.take_split(offset + 1);
                    let span = Span::new(start.position.start..after.location_offset(), start.state.clone());
                    return Ok((after, finish_text(flavor.lang, scanner.chunks, span)));
                }
                HeredocLine::BadIndent => {
                    let (at, _) = rest.take_split(offset);
                    return fail(at, "This multi-line text should be indented one level past its opening line");
                }
            }
        }

        if c == flavor.open && flavor.open != flavor.close {
            depth += 1;
            scanner.cooked.push(c);
            offset += c.len_utf8();
            continue;
        }
        if c == flavor.close && !heredoc {
            depth -= 1;
            if depth == 0 {
                scanner.flush(rest.location_offset() + offset);
                let (after, _) = rest.take_split(offset + c.len_utf8());
                let span = Span::new(start.position.start..after.location_offset(), start.state.clone());
                return Ok((after, finish_text(flavor.lang, scanner.chunks, span)));
            }
            scanner.cooked.push(c);
            offset += c.len_utf8();
            continue;
        }

        scanner.cooked.push(c);
        offset += c.len_utf8();
    }
}

enum HeredocLine {
    Body,
    Closer,
    BadIndent,
}

/// Positions `offset` after a heredoc line's stripped indentation, deciding
/// whether the line is body text, the closer, or badly indented.
fn eat_heredoc_indent(
    rest: &NomSpan<'_>,
    offset: &mut usize,
    string_indent: usize,
    _header_indent: usize,
    close: char,
) -> HeredocLine {
    let fragment = *rest.fragment();
    let line = &fragment[*offset..];
    let indent_len = line.len() - line.trim_start_matches(' ').len();
    let after_indent = &line[indent_len..];
    if after_indent.starts_with('\n') || after_indent.starts_with("\r\n") {
        // Blank line: contributes a newline, no indentation requirement
        *offset += indent_len;
        return HeredocLine::Body;
    }
    if after_indent.starts_with(close) && indent_len < string_indent {
        *offset += indent_len;
        return HeredocLine::Closer;
    }
    if indent_len < string_indent {
        return HeredocLine::BadIndent;
    }
    *offset += string_indent;
    HeredocLine::Body
}

fn finish_text<'base>(lang: Option<Cow<'base, str>>, mut chunks: Vec<Ast<'base>>, span: Span) -> Ast<'base> {
    if lang.is_none() && chunks.len() == 1 && matches!(chunks[0].kind, AstKind::TextLiteral(_)) {
        let only = chunks.pop().unwrap();
        return Ast::new(span, only.kind);
    }
    if lang.is_none() && chunks.is_empty() {
        return Ast::new(span, AstKind::TextLiteral(Cow::Borrowed("")));
    }
    Ast::new(span, AstKind::TextJoin { lang, chunks })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::*;

    fn parse(code: &str, check: impl FnOnce(&Ast<'_>)) {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_text(input).unwrap();
        check(&ast);
    }

    fn cooked_of(ast: &Ast<'_>) -> String {
        match &ast.kind {
            AstKind::TextLiteral(text) => text.to_string(),
            other => panic!("expected TextLiteral, got {other:?}"),
        }
    }

    #[rstest]
    #[case(r#""hello""#, "hello")]
    #[case(r#""hello\nworld""#, "hello\nworld")]
    #[case(r#""hello\tworld""#, "hello\tworld")]
    #[case(r#""hello\\world""#, "hello\\world")]
    #[case(r#""hello\"world""#, "hello\"world")]
    #[case(r#""hex \x41""#, "hex A")]
    #[case(r#""octal \101""#, "octal A")]
    #[case(r#""point \{U+1F600}""#, "point \u{1F600}")]
    #[case(r#""ansi \[1m""#, "ansi \x1b[1m")]
    #[case("''", "")]
    fn cooked_text(#[case] code: &str, #[case] expected: &str) {
        parse(code, |ast| assert_eq!(cooked_of(ast), expected));
    }

    #[test]
    fn backticks_do_not_escape() {
        parse(r"`a\nb`", |ast| assert_eq!(cooked_of(ast), "a\\nb"));
    }

    #[test]
    fn interpolation_produces_join() {
        parse(r#""x = $x!""#, |ast| match &ast.kind {
            AstKind::TextJoin { lang, chunks } => {
                assert!(lang.is_none());
                assert_eq!(chunks.len(), 3);
                assert_eq!(cooked_of(&chunks[0]), "x = ");
                assert!(matches!(chunks[1].kind, AstKind::NonOptional(_)));
                assert_eq!(cooked_of(&chunks[2]), "!");
            }
            other => panic!("expected TextJoin, got {other:?}"),
        });
    }

    #[test]
    fn parenthesized_interpolation() {
        parse(r#""sum: $(a + b)""#, |ast| match &ast.kind {
            AstKind::TextJoin { chunks, .. } => {
                assert_eq!(chunks.len(), 2);
                assert!(matches!(chunks[1].kind, AstKind::BinaryOp(_)));
            }
            other => panic!("expected TextJoin, got {other:?}"),
        });
    }

    #[test]
    fn dollar_dollar_disables_interpolation() {
        parse(r#"$$"$HOME""#, |ast| assert_eq!(cooked_of(ast), "$HOME"));
    }

    #[test]
    fn lang_tagged_text() {
        parse(r#"$Sh"ls $dir""#, |ast| match &ast.kind {
            AstKind::TextJoin { lang, chunks } => {
                assert_eq!(lang.as_deref(), Some("Sh"));
                assert_eq!(chunks.len(), 2);
            }
            other => panic!("expected TextJoin, got {other:?}"),
        });
    }

    #[test]
    fn paired_delimiters_nest() {
        parse("$Sh(echo (nested))", |ast| match &ast.kind {
            AstKind::TextJoin { lang, chunks } => {
                assert_eq!(lang.as_deref(), Some("Sh"));
                assert_eq!(cooked_of(&chunks[0]), "echo (nested)");
            }
            other => panic!("expected TextJoin, got {other:?}"),
        });
    }

    #[test]
    fn heredoc_strips_common_indent() {
        let code = "\"\n    line one\n    line two\n\"";
        parse(code, |ast| assert_eq!(cooked_of(ast), "line one\nline two"));
    }

    #[test]
    fn heredoc_keeps_extra_indent() {
        let code = "\"\n    a\n        b\n\"";
        parse(code, |ast| assert_eq!(cooked_of(ast), "a\n    b"));
    }

    #[test]
    fn unterminated_text_fails() {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], "\"abc".to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        assert!(matches!(parse_text(input), Err(nom::Err::Failure(_))));
    }

    #[test]
    fn unknown_escape_fails() {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], r#""\q""#.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        assert!(matches!(parse_text(input), Err(nom::Err::Failure(_))));
    }
}
