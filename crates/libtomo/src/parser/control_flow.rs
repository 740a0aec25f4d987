//! Control flow parsing: conditionals, loops, matches, and the simple
//! one-word statements.
//!
//! `if`/`unless` conditions may be inline declarations (`if y := f()`),
//! which the checker narrows in the true branch. `when` arms and `else`
//! clauses sit at the same indentation as their header keyword.

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::error::context;
use nom::{Err, IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind, WhenClause};
use crate::nom_tools::{line_indent, spaces, whitespace, NomSpan, Span};

use super::indent::{next_line, parse_block, peek_line_word};
use super::{expression, ident, parse_declaration, parse_statement, parse_var, word, TomoParserError};

/// Parses any block-bearing expression form: `if`, `unless`, `when`, `for`,
/// `while`, `repeat`, `do`.
pub fn parse_block_expression<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    super::try_parser!(parse_if(input.clone(), indent));
    super::try_parser!(parse_when(input.clone(), indent));
    super::try_parser!(parse_for(input.clone(), indent));
    super::try_parser!(parse_while(input.clone(), indent));
    super::try_parser!(parse_repeat(input.clone(), indent));
    parse_do(input, indent)
}

/// Parses any control-flow statement, including the one-word ones.
pub fn parse_control_statement<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    super::try_parser!(parse_block_expression(input.clone(), indent));
    super::try_parser!(parse_defer(input.clone(), indent));
    super::try_parser!(parse_return(input.clone(), indent));
    super::try_parser!(parse_skip_stop(input.clone()));
    super::try_parser!(parse_pass(input.clone()));
    parse_assert(input, indent)
}

fn header_span(matched: &NomSpan<'_>) -> Span {
    (matched).into()
}

/// `if cond ... [else ...]` and `unless cond ...`. The condition may be a
/// declaration for optional narrowing.
pub fn parse_if<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword, negated) = if let Ok((rest, kw)) = word("if").parse(input.clone()) {
        (rest, kw, false)
    } else {
        let (rest, kw) = word("unless").parse(input)?;
        (rest, kw, true)
    };
    let start = header_span(&keyword);
    let starting_indent = line_indent(&keyword).unwrap_or(indent);

    let (rest, condition) = match parse_declaration(rest.clone(), indent, false) {
        Ok((rest, declaration)) => (rest, declaration),
        Err(_) => context("I expected a condition for this 'if'", nom::combinator::cut(expression::parse_expression))
            .parse(rest)?,
    };
    let condition = if negated {
        let span = condition.span.clone();
        Ast::new(span, AstKind::Not(Box::new(condition)))
    } else {
        condition
    };

    let (rest, _) = opt(word("then")).parse(rest)?;
    let (rest, body) = context("I expected a body for this 'if' statement", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;

    let (rest, else_body) = match peek_line_word(&rest, starting_indent, "else") {
        Some(after_else) => {
            // `else if` chains
            let (rest, else_body) = match parse_if(after_else.clone(), indent) {
                Ok(chained) => chained,
                Err(Err::Failure(error)) => return Err(Err::Failure(error)),
                Err(_) => context("I expected a body for this 'else'", nom::combinator::cut(
                    |i| parse_block(i, starting_indent),
                ))
                .parse(after_else)?,
            };
            (rest, Some(Box::new(else_body)))
        }
        None => (rest, None),
    };

    let end = else_body
        .as_ref()
        .map(|b| b.span.position.end)
        .unwrap_or(body.span.position.end);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::If { condition: Box::new(condition), body: Box::new(body), else_body }),
    ))
}

/// `when subject is Pattern [, Pattern]* then body ... [else body]`
pub fn parse_when<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("when").parse(input)?;
    let start = header_span(&keyword);
    let starting_indent = line_indent(&keyword).unwrap_or(0);

    let (mut rest, subject) = context("I expected a subject for this 'when'", nom::combinator::cut(
        expression::parse_expression,
    ))
    .parse(rest)?;

    let mut clauses = Vec::new();
    while let Some(after_is) = peek_line_word(&rest, starting_indent, "is") {
        let mut patterns = Vec::new();
        let (mut after, first) = context("I expected a pattern for this 'is' clause", nom::combinator::cut(
            expression::parse_expression,
        ))
        .parse(after_is)?;
        patterns.push(first);
        loop {
            let (tmp, _) = spaces(after.clone())?;
            match opt(tag(",")).parse(tmp)? {
                (tmp, Some(_)) => {
                    let (tmp, pattern) = context("I expected a pattern here", nom::combinator::cut(
                        expression::parse_expression,
                    ))
                    .parse(tmp)?;
                    patterns.push(pattern);
                    after = tmp;
                }
                (_, None) => break,
            }
        }
        let (after, _) = opt(word("then")).parse(after)?;
        let (after, body) = context("I expected a body for this 'when' clause", nom::combinator::cut(
            |i| parse_block(i, starting_indent),
        ))
        .parse(after)?;
        clauses.push(WhenClause { patterns, body });
        rest = after;
    }

    if clauses.is_empty() {
        return super::fail(rest, "I expected at least one 'is' clause for this 'when'");
    }

    let (rest, else_body) = match peek_line_word(&rest, starting_indent, "else") {
        Some(after_else) => {
            let (rest, body) = context("I expected a body for this 'else'", nom::combinator::cut(
                |i| parse_block(i, starting_indent),
            ))
            .parse(after_else)?;
            (rest, Some(Box::new(body)))
        }
        None => (rest, None),
    };

    let end = else_body
        .as_ref()
        .map(|b| b.span.position.end)
        .or_else(|| clauses.last().map(|c| c.body.span.position.end))
        .unwrap_or(subject.span.position.end);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::When { subject: Box::new(subject), clauses, else_body }),
    ))
}

/// `for [i,] x in iter [do] body [else body]`
pub fn parse_for<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("for").parse(input)?;
    let start = header_span(&keyword);
    let starting_indent = line_indent(&keyword).unwrap_or(0);

    let mut vars = Vec::new();
    let mut rest = rest;
    loop {
        let (after, var) = context("I expected a loop variable here", nom::combinator::cut(parse_var)).parse(rest)?;
        vars.push(var);
        let (after, _) = spaces(after)?;
        match opt(tag(",")).parse(after)? {
            (after, Some(_)) => rest = after,
            (after, None) => {
                rest = after;
                break;
            }
        }
    }

    let (rest, _) = context("I expected 'in' for this 'for' loop", nom::combinator::cut(word("in"))).parse(rest)?;
    let (rest, iter) = context("I expected an iterable here", nom::combinator::cut(expression::parse_expression))
        .parse(rest)?;
    let (rest, _) = opt(word("do")).parse(rest)?;
    let (rest, body) = context("I expected a body for this 'for'", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;

    let (rest, empty) = match peek_line_word(&rest, starting_indent, "else") {
        Some(after_else) => {
            let (rest, body) = context("I expected a body for this 'else'", nom::combinator::cut(
                |i| parse_block(i, starting_indent),
            ))
            .parse(after_else)?;
            (rest, Some(Box::new(body)))
        }
        None => (rest, None),
    };

    let end = empty
        .as_ref()
        .map(|b| b.span.position.end)
        .unwrap_or(body.span.position.end);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::For { vars, iter: Box::new(iter), body: Box::new(body), empty }),
    ))
}

/// `while cond [do] body`
pub fn parse_while<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("while").parse(input)?;
    let start = header_span(&keyword);
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, condition) = context("I expected a condition for this 'while'", nom::combinator::cut(
        expression::parse_expression,
    ))
    .parse(rest)?;
    let (rest, _) = opt(word("do")).parse(rest)?;
    let (rest, body) = context("I expected a body for this 'while'", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;
    let span = Span::new(start.position.start..body.span.position.end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::While { condition: Box::new(condition), body: Box::new(body) }),
    ))
}

/// `repeat body` — loop until a `stop`
pub fn parse_repeat<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("repeat").parse(input)?;
    let start = header_span(&keyword);
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, body) = context("I expected a body for this 'repeat'", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;
    let span = Span::new(start.position.start..body.span.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Repeat(Box::new(body)))))
}

/// `do body` — a bare scoped block
pub fn parse_do<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("do").parse(input)?;
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let result = context("I expected a body for this 'do'", nom::combinator::cut(|i| parse_block(i, starting_indent))).parse(rest);
    result
}

/// `defer body`
pub fn parse_defer<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("defer").parse(input)?;
    let start = header_span(&keyword);
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, body) = context("I expected a block to be deferred here", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;
    let span = Span::new(start.position.start..body.span.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Defer(Box::new(body)))))
}

/// `return [value]`
pub fn parse_return<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("return").parse(input)?;
    let start = header_span(&keyword);
    let (rest, value) = opt(|i| expression::parse_extended_expression(i, indent)).parse(rest)?;
    let end = value.as_ref().map(|v| v.span.position.end).unwrap_or(start.position.end);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Return(value.map(Box::new)))))
}

/// `skip`/`continue` and `stop`/`break`, with an optional loop target.
pub fn parse_skip_stop(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, keyword, is_skip) = if let Ok((rest, kw)) = word("skip").parse(input.clone()) {
        (rest, kw, true)
    } else if let Ok((rest, kw)) = word("continue").parse(input.clone()) {
        (rest, kw, true)
    } else if let Ok((rest, kw)) = word("stop").parse(input.clone()) {
        (rest, kw, false)
    } else {
        let (rest, kw) = word("break").parse(input)?;
        (rest, kw, false)
    };
    let start = header_span(&keyword);

    let (rest, target) = if let Ok((after, _)) = word("for").parse(rest.clone()) {
        (after, Some(std::borrow::Cow::Borrowed("for")))
    } else if let Ok((after, _)) = word("while").parse(rest.clone()) {
        (after, Some(std::borrow::Cow::Borrowed("while")))
    } else if let Ok((after, name)) = ident(rest.clone()) {
        (after, Some(std::borrow::Cow::Borrowed(*name.fragment())))
    } else {
        (rest, None)
    };

    let span = start;
    let kind = if is_skip { AstKind::Skip(target) } else { AstKind::Stop(target) };
    Ok((rest, Ast::new(span, kind)))
}

/// `pass`
pub fn parse_pass(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, keyword) = word("pass").parse(input)?;
    Ok((rest, Ast::new(header_span(&keyword), AstKind::Pass)))
}

/// `assert cond [, message]`
pub fn parse_assert<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("assert").parse(input)?;
    let start = header_span(&keyword);
    let (rest, expr) = context("I couldn't parse the expression for this assert", nom::combinator::cut(
        |i| expression::parse_extended_expression(i, indent),
    ))
    .parse(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, message) = match opt(tag(",")).parse(rest)? {
        (rest, Some(_)) => {
            let (rest, message) = context("I expected a message for this assert", nom::combinator::cut(
                |i| expression::parse_extended_expression(i, indent),
            ))
            .parse(rest)?;
            (rest, Some(Box::new(message)))
        }
        (rest, None) => (rest, None),
    };
    let end = message
        .as_ref()
        .map(|m| m.span.position.end)
        .unwrap_or(expr.span.position.end);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Assert { expr: Box::new(expr), message })))
}

/// `>> expr` doctests, with an optional `= expected` line.
pub fn parse_doctest<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, mark) = tag(">>")(input)?;
    let start = header_span(&mark);
    let (rest, _) = spaces(rest)?;
    let (rest, expr) = context("I couldn't parse the expression for this doctest", nom::combinator::cut(
        |i| parse_statement(i, indent),
    ))
    .parse(rest)?;

    // An expected-value line: `= expr`, either inline or on the next line
    let probe = {
        let (tmp, _) = spaces(rest.clone())?;
        if tmp.fragment().starts_with('=') && !tmp.fragment().starts_with("==") {
            Some(tmp)
        } else {
            match next_line(rest.clone())? {
                (_, Some((line_pos, _))) if line_pos.fragment().starts_with('=') && !line_pos.fragment().starts_with("==") => {
                    Some(line_pos)
                }
                _ => None,
            }
        }
    };
    let (rest, expected) = match probe {
        Some(at_equals) => {
            let (after, _) = tag::<_, _, TomoParserError>("=")(at_equals)?;
            let (after, _) = whitespace(after)?;
            let (after, expected) = context("I couldn't parse the expected value here", nom::combinator::cut(
                expression::parse_expression,
            ))
            .parse(after)?;
            (after, Some(Box::new(expected)))
        }
        None => (rest, None),
    };

    let end = expected
        .as_ref()
        .map(|e| e.span.position.end)
        .unwrap_or(expr.span.position.end);
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::DocTest { expr: Box::new(expr), expected, skip_source: false }),
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::*;

    fn statement(code: &str, check: impl FnOnce(&Ast<'_>)) {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_statement(input, 0).unwrap();
        check(&ast);
    }

    #[test]
    fn inline_if_else() {
        statement("if x > 0 then say(\"pos\") else say(\"neg\")", |ast| match &ast.kind {
            AstKind::If { else_body, .. } => assert!(else_body.is_some()),
            other => panic!("expected If, got {other:?}"),
        });
    }

    #[test]
    fn indented_if_else() {
        let code = "if x > 0\n    say(\"pos\")\nelse\n    say(\"neg\")";
        statement(code, |ast| match &ast.kind {
            AstKind::If { body, else_body, .. } => {
                assert!(matches!(body.kind, AstKind::Block(_)));
                assert!(else_body.is_some());
            }
            other => panic!("expected If, got {other:?}"),
        });
    }

    #[test]
    fn if_with_declaration_condition() {
        statement("if y := maybe() then say(\"got\")", |ast| match &ast.kind {
            AstKind::If { condition, .. } => assert!(matches!(condition.kind, AstKind::Declare { .. })),
            other => panic!("expected If, got {other:?}"),
        });
    }

    #[test]
    fn unless_negates() {
        statement("unless done then retry()", |ast| match &ast.kind {
            AstKind::If { condition, .. } => assert!(matches!(condition.kind, AstKind::Not(_))),
            other => panic!("expected If, got {other:?}"),
        });
    }

    #[test]
    fn when_with_inline_arms() {
        statement("when shape is Circle(r) then r is Square(s) then s", |ast| match &ast.kind {
            AstKind::When { clauses, else_body, .. } => {
                assert_eq!(clauses.len(), 2);
                assert!(else_body.is_none());
            }
            other => panic!("expected When, got {other:?}"),
        });
    }

    #[test]
    fn when_with_indented_arms() {
        let code = "when shape\nis Circle(r)\n    r\nis Square(s)\n    s\nelse\n    0";
        statement(code, |ast| match &ast.kind {
            AstKind::When { clauses, else_body, .. } => {
                assert_eq!(clauses.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected When, got {other:?}"),
        });
    }

    #[test]
    fn for_loop_with_index_var() {
        statement("for i, x in xs do say(x)", |ast| match &ast.kind {
            AstKind::For { vars, .. } => assert_eq!(vars.len(), 2),
            other => panic!("expected For, got {other:?}"),
        });
    }

    #[test]
    fn for_loop_with_empty_clause() {
        let code = "for x in xs\n    say(x)\nelse\n    say(\"empty\")";
        statement(code, |ast| match &ast.kind {
            AstKind::For { empty, .. } => assert!(empty.is_some()),
            other => panic!("expected For, got {other:?}"),
        });
    }

    #[test]
    fn defer_statement() {
        statement("defer say(\"cleanup\")", |ast| {
            assert!(matches!(ast.kind, AstKind::Defer(_)));
        });
    }

    #[test]
    fn skip_and_stop_targets() {
        statement("skip x", |ast| {
            assert!(matches!(&ast.kind, AstKind::Skip(Some(t)) if t == "x"));
        });
        statement("break while", |ast| {
            assert!(matches!(&ast.kind, AstKind::Stop(Some(t)) if t == "while"));
        });
    }

    #[test]
    fn doctest_with_expected() {
        let code = ">> 1 + 2\n= 3";
        statement(code, |ast| match &ast.kind {
            AstKind::DocTest { expected, .. } => assert!(expected.is_some()),
            other => panic!("expected DocTest, got {other:?}"),
        });
    }

    #[test]
    fn repeat_loop() {
        statement("repeat say(\"again\")", |ast| {
            assert!(matches!(ast.kind, AstKind::Repeat(_)));
        });
    }
}
