//! Container literal parsing: lists, sets, tables and comprehensions.
//!
//! Sets are written between pipes (`|a, b|`, empty `||`), tables between
//! braces with `=` entries and optional `; fallback=...` / `; default=...`
//! attributes. Inside any container an item (or table entry) may grow a
//! comprehension suffix: `expr for vars in iter if cond`.

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::error::context;
use nom::{Err, IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind};
use crate::nom_tools::{spaces, whitespace, NomSpan, Span};

use super::{expression, match_separator, parse_var, word, TomoParserError};

/// Wraps `item` in [`AstKind::Comprehension`] layers for as long as `for`
/// clauses follow it.
pub fn parse_comprehension_suffix<'base>(
    mut input: NomSpan<'base>,
    mut item: Ast<'base>,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    loop {
        let (rest, _) = spaces(input.clone())?;
        let Ok((rest, _)) = word("for").parse(rest) else { break };
        let mut vars = Vec::new();
        let mut rest = rest;
        loop {
            let (after, var) = context("I expected a variable for this comprehension", nom::combinator::cut(parse_var))
                .parse(rest)?;
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
        let (rest, _) = context("I expected 'in' for this comprehension", nom::combinator::cut(word("in"))).parse(rest)?;
        let (rest, iter) = context("I expected an iterable here", nom::combinator::cut(expression::parse_expression))
            .parse(rest)?;
        let (rest, _) = spaces(rest)?;
        let (rest, filter) = match opt(word("if")).parse(rest)? {
            (rest, Some(_)) => {
                let (rest, filter) =
                    context("I expected a condition here", nom::combinator::cut(expression::parse_expression)).parse(rest)?;
                (rest, Some(Box::new(filter)))
            }
            (rest, None) => (rest, None),
        };
        let span = item.span.to(&iter.span);
        item = Ast::new(
            span,
            AstKind::Comprehension { expr: Box::new(item), vars, iter: Box::new(iter), filter },
        );
        input = rest;
    }
    Ok((input, item))
}

/// `[a, b, c]` and `[x*x for x in xs]`
pub fn parse_list(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    let (rest, _) = tag("[")(input)?;
    let (mut rest, _) = whitespace(rest)?;

    let mut items = Vec::new();
    loop {
        let Ok((after, item)) = expression::parse_expression(rest.clone()) else { break };
        let (after, item) = parse_comprehension_suffix(after, item)?;
        items.push(item);
        let (after, more) = match_separator(after)?;
        rest = after;
        if !more {
            break;
        }
    }
    let (rest, _) = whitespace(rest)?;
    let (rest, close) = context("I wasn't able to parse the rest of this list", nom::combinator::cut(tag("]"))).parse(rest)?;
    let end: Span = (&close).into();
    let span = Span::new(start.position.start..end.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::List(items))))
}

/// `{k=v, ...; fallback=..., default=...}`
pub fn parse_table(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    let (rest, _) = tag("{")(input)?;
    let (mut rest, _) = whitespace(rest)?;

    let mut entries = Vec::new();
    loop {
        let entry_start: Span = (&rest).into();
        let Ok((after, key)) = expression::parse_expression(rest.clone()) else { break };
        let (after, _) = spaces(after)?;
        let Ok((after, _)) = tag::<_, _, TomoParserError>("=")(after) else {
            return Err(Err::Error(VerboseError {
                errors: vec![(rest, VerboseErrorKind::Context("table entry"))],
            }));
        };
        let (after, value) = context("I couldn't parse the value for this table entry", nom::combinator::cut(
            expression::parse_expression,
        ))
        .parse(after)?;
        let span = Span::new(entry_start.position.start..value.span.position.end, entry_start.state.clone());
        let entry = Ast::new(span, AstKind::TableEntry { key: Box::new(key), value: Box::new(value) });
        let (after, entry) = parse_comprehension_suffix(after, entry)?;
        entries.push(entry);
        let (after, more) = match_separator(after)?;
        rest = after;
        if !more {
            break;
        }
    }

    let (rest, _) = whitespace(rest)?;
    let (mut rest, mut fallback, mut default_value) = (rest, None, None);
    if let (after, Some(_)) = opt(tag::<_, _, TomoParserError>(";")).parse(rest.clone())? {
        let (mut after, _) = whitespace(after)?;
        loop {
            if let Ok((next, _)) = word("fallback").parse(after.clone()) {
                let (next, _) = context("I expected an '=' after 'fallback'", nom::combinator::cut(tag("="))).parse(next)?;
                if fallback.is_some() {
                    return super::fail(next, "This table already has a fallback");
                }
                let (next, value) = context("I expected a fallback table", nom::combinator::cut(expression::parse_expression))
                    .parse(next)?;
                fallback = Some(Box::new(value));
                after = next;
            } else if let Ok((next, _)) = word("default").parse(after.clone()) {
                let (next, _) = context("I expected an '=' after 'default'", nom::combinator::cut(tag("="))).parse(next)?;
                if default_value.is_some() {
                    return super::fail(next, "This table already has a default");
                }
                let (next, value) = context("I expected a default value", nom::combinator::cut(expression::parse_expression))
                    .parse(next)?;
                default_value = Some(Box::new(value));
                after = next;
            } else {
                break;
            }
            let (next, more) = match_separator(after)?;
            after = next;
            if !more {
                break;
            }
        }
        rest = after;
    }

    let (rest, _) = whitespace(rest)?;
    let (rest, close) = context("I wasn't able to parse the rest of this table", nom::combinator::cut(tag("}"))).parse(rest)?;
    let end: Span = (&close).into();
    let span = Span::new(start.position.start..end.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Table { entries, fallback, default_value })))
}

/// `|a, b, c|` and the empty set `||`
pub fn parse_set(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    if let Ok((rest, close)) = tag::<_, _, TomoParserError>("||")(input.clone()) {
        let end: Span = (&close).into();
        let span = Span::new(start.position.start..end.position.start + 2, start.state.clone());
        return Ok((rest, Ast::new(span, AstKind::Set(Vec::new()))));
    }
    let (rest, _) = tag("|")(input)?;
    let (mut rest, _) = whitespace(rest)?;

    let mut items = Vec::new();
    loop {
        let Ok((after, item)) = expression::parse_expression(rest.clone()) else { break };
        let (after, item) = parse_comprehension_suffix(after, item)?;
        items.push(item);
        let (after, more) = match_separator(after)?;
        rest = after;
        if !more {
            break;
        }
    }
    let (rest, _) = whitespace(rest)?;
    let (rest, close) = context("I wasn't able to parse the rest of this set", nom::combinator::cut(tag("|"))).parse(rest)?;
    let end: Span = (&close).into();
    let span = Span::new(start.position.start..end.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Set(items))))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::super::suffix::parse_term;
    use super::*;

    fn term_to_string(code: &str) -> String {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_term(input).unwrap();
        ast.to_string()
    }

    #[rstest]
    #[case("[1, 2, 3]", "[1, 2, 3]")]
    #[case("[]", "[]")]
    #[case("[1,\n 2]", "[1, 2]")]
    #[case("|1, 2|", "|1, 2|")]
    #[case("||", "||")]
    #[case("{\"a\"=1, \"b\"=2}", "{\"a\"=1, \"b\"=2}")]
    #[case("{}", "{}")]
    fn containers(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(term_to_string(code), expected, "{code}");
    }

    #[test]
    fn list_comprehension() {
        let printed = term_to_string("[x*x for x in nums]");
        assert_eq!(printed, "[(x * x) for x in nums]");
    }

    #[test]
    fn comprehension_with_filter() {
        let printed = term_to_string("[x for x in nums if x > 0]");
        assert_eq!(printed, "[x for x in nums if (x > 0)]");
    }

    #[test]
    fn table_with_fallback_and_default() {
        let printed = term_to_string("{\"x\"=1; fallback=other, default=0}");
        assert_eq!(printed, "{\"x\"=1; fallback=other, default=0}");
    }

    #[test]
    fn table_comprehension() {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], "{k=v for k in keys}".to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_term(input).unwrap();
        match &ast.kind {
            AstKind::Table { entries, .. } => {
                assert!(matches!(entries[0].kind, AstKind::Comprehension { .. }));
            }
            other => panic!("expected Table, got {other:?}"),
        }
    }
}
