//! Indentation-sensitive block parsing.
//!
//! A block after a header keyword is either inline (statements separated by
//! `;` on the same line) or indented: each statement begins on a line whose
//! indentation is exactly one unit (four spaces, or one tab) deeper than the
//! header line. Blank and comment-only lines between statements are skipped;
//! the block ends at the first line whose indentation differs.

use nom::{IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind};
use crate::nom_tools::{indent_of_line, spaces, whitespace, NomSpan, Span, SPACES_PER_INDENT};

use super::{fail, parse_statement, TomoParserError};

/// Peeks past the end of the current line to the first following non-blank
/// line, returning the input positioned at its first content character and
/// its indentation. Returns `None` when the current line still has content
/// or the file ends. Mixed tab/space indentation is a committed failure.
pub fn next_line<'base>(
    input: NomSpan<'base>,
) -> IResult<NomSpan<'base>, Option<(NomSpan<'base>, usize)>, TomoParserError<'base>> {
    let (rest, _) = spaces(input.clone())?;
    let fragment = rest.fragment();
    if !(fragment.starts_with('\n') || fragment.starts_with("\r\n")) {
        return Ok((input, None));
    }
    let (content, _) = whitespace(rest)?;
    if content.fragment().is_empty() {
        return Ok((input, None));
    }
    match indent_of_line(content.extra.file.code(), content.location_offset()) {
        Some(indent) => Ok((input, Some((content, indent)))),
        None => fail(content, "This line mixes tabs and spaces in its indentation"),
    }
}

/// Parses a statement block after a header at `parent_indent`.
///
/// Tries the indented layout first (statements one unit deeper on following
/// lines), falling back to an inline `;`-separated statement list on the
/// same line.
pub fn parse_block<'base>(
    input: NomSpan<'base>,
    parent_indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (_, peeked) = next_line(input.clone())?;
    if let Some((line_pos, indent)) = peeked {
        if indent == parent_indent + SPACES_PER_INDENT {
            return parse_indented_statements(line_pos, indent);
        }
    }
    parse_inline_statements(input, parent_indent)
}

fn parse_indented_statements<'base>(
    input: NomSpan<'base>,
    block_indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let start: Span = (&input).into();
    let mut statements = Vec::new();
    let mut rest = input;
    loop {
        let (after, statement) = parse_statement(rest, block_indent)?;
        statements.push(statement);
        let (_, peeked) = next_line(after.clone())?;
        match peeked {
            Some((line_pos, indent)) if indent == block_indent => {
                rest = line_pos;
            }
            _ => {
                rest = after;
                break;
            }
        }
    }
    let end = statements
        .last()
        .map(|statement| statement.span.position.end)
        .unwrap_or(start.position.start);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Block(statements))))
}

fn parse_inline_statements<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let start: Span = (&input).into();
    let mut statements = Vec::new();
    let mut rest = input.clone();
    loop {
        let (after, _) = spaces(rest.clone())?;
        let Ok((after, statement)) = parse_statement(after, indent) else { break };
        statements.push(statement);
        let (after, _) = spaces(after)?;
        match nom::combinator::opt(nom::bytes::complete::tag::<_, _, TomoParserError>(";")).parse(after)? {
            (after, Some(_)) => rest = after,
            (after, None) => {
                rest = after;
                break;
            }
        }
    }
    if statements.is_empty() {
        return Err(nom::Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("I expected a block here"))],
        }));
    }
    let end = statements
        .last()
        .map(|statement| statement.span.position.end)
        .unwrap_or(start.position.start);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Block(statements))))
}

/// Parses the optional indented namespace block after a `struct`, `enum`,
/// `lang` or `extend` header. An absent or not-deeper-indented body yields
/// an empty block.
pub fn parse_namespace<'base>(
    input: NomSpan<'base>,
    parent_indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (_, peeked) = next_line(input.clone())?;
    if let Some((line_pos, indent)) = peeked {
        if indent == parent_indent + SPACES_PER_INDENT {
            return parse_indented_statements(line_pos, indent);
        }
    }
    let empty: Span = (&input).into();
    let span = Span::new(empty.position.start..empty.position.start, empty.state.clone());
    Ok((input, Ast::new(span, AstKind::Block(Vec::new()))))
}

/// True when the next non-blank line sits at exactly `indent` and begins
/// with the given word; used for `else` clauses and `when` arms.
pub fn peek_line_word<'base>(
    input: &NomSpan<'base>,
    indent: usize,
    keyword: &'static str,
) -> Option<NomSpan<'base>> {
    // Same-line first: `... else ...`
    let (rest, _) = spaces(input.clone()).ok()?;
    if let Ok((after, _)) = super::word(keyword).parse(rest.clone()) {
        return Some(after);
    }
    let (_, peeked) = next_line(input.clone()).ok()?;
    let (line_pos, line_indent) = peeked?;
    if line_indent != indent {
        return None;
    }
    let (after, _) = super::word(keyword).parse(line_pos).ok()?;
    Some(after)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::*;

    fn state(code: &str) -> State {
        State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()))
    }

    #[test]
    fn indented_block_parses_statements() {
        let code = "\n    x := 1\n    y := 2\nz := 3";
        let st = state(code);
        let input = NomSpan::new_extra(st.file.code().as_str(), st.clone());
        let (rest, block) = parse_block(input, 0).unwrap();
        match block.kind {
            AstKind::Block(statements) => assert_eq!(statements.len(), 2),
            other => panic!("expected Block, got {other:?}"),
        }
        assert!(rest.fragment().contains("z := 3"));
    }

    #[test]
    fn inline_block_with_semicolons() {
        let code = "x := 1; y := 2";
        let st = state(code);
        let input = NomSpan::new_extra(st.file.code().as_str(), st.clone());
        let (_, block) = parse_block(input, 0).unwrap();
        match block.kind {
            AstKind::Block(statements) => assert_eq!(statements.len(), 2),
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn wrong_indent_is_not_a_block_line() {
        // The deeper-indented second statement folds out of the block
        let code = "\n    x := 1\n        y := 2";
        let st = state(code);
        let input = NomSpan::new_extra(st.file.code().as_str(), st.clone());
        let (_, block) = parse_block(input, 0).unwrap();
        match block.kind {
            AstKind::Block(statements) => assert_eq!(statements.len(), 1),
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let code = "\n    x := 1\n\n    # a comment\n    y := 2\n";
        let st = state(code);
        let input = NomSpan::new_extra(st.file.code().as_str(), st.clone());
        let (_, block) = parse_block(input, 0).unwrap();
        match block.kind {
            AstKind::Block(statements) => assert_eq!(statements.len(), 2),
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn mixed_indentation_fails() {
        let code = "\n\t  x := 1\n";
        let st = state(code);
        let input = NomSpan::new_extra(st.file.code().as_str(), st.clone());
        assert!(matches!(parse_block(input, 0), Err(nom::Err::Failure(_))));
    }
}
