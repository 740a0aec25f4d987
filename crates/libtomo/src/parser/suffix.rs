//! Terms: prefix operators, atoms and the postfix suffix chain.
//!
//! A term is a prefix operator (`not`, `-`, `@`, `&`) applied to an atom,
//! followed by any number of tightly bound suffixes: field access, method
//! calls, function calls, indexing, `?` and `!`. Suffixes must be written
//! with no space before them; `f (x)` is not a call.

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::error::context;
use nom::{Err, IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind};
use crate::nom_tools::{spaces, whitespace, NomSpan, Span};

use super::{container, expression, function, primitive, text, type_info, word, TomoParserError};

/// Parses a term: prefix operators, an atom, then its suffix chain.
pub fn parse_term(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (input, _) = spaces(input)?;
    let start: Span = (&input).into();

    // Prefix operators bind the whole following term
    if let Ok((rest, _)) = word("not").parse(input.clone()) {
        let (rest, value) = context("I expected an expression after 'not'", nom::combinator::cut(parse_term)).parse(rest)?;
        let span = Span::new(start.position.start..value.span.position.end, start.state.clone());
        return Ok((rest, Ast::new(span, AstKind::Not(Box::new(value)))));
    }
    if input.fragment().starts_with('-') && !input.fragment()[1..].starts_with(|c: char| c.is_ascii_digit()) {
        let (rest, _) = tag::<_, _, TomoParserError>("-")(input.clone())?;
        let (rest, value) = parse_term(rest)?;
        let span = Span::new(start.position.start..value.span.position.end, start.state.clone());
        return Ok((rest, Ast::new(span, AstKind::Negative(Box::new(value)))));
    }
    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("@")(input.clone()) {
        let (rest, value) = context("I expected a value to heap allocate", nom::combinator::cut(parse_term)).parse(rest)?;
        let span = Span::new(start.position.start..value.span.position.end, start.state.clone());
        return Ok((rest, Ast::new(span, AstKind::HeapAllocate(Box::new(value)))));
    }
    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("&")(input.clone()) {
        let (rest, value) = context("I expected a value to reference", nom::combinator::cut(parse_term)).parse(rest)?;
        let span = Span::new(start.position.start..value.span.position.end, start.state.clone());
        return Ok((rest, Ast::new(span, AstKind::StackReference(Box::new(value)))));
    }

    let (input, atom) = parse_atom(input)?;
    parse_suffix_chain(input, atom)
}

fn parse_atom(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    super::try_parser!(primitive::parse_path_literal(input.clone()));
    super::try_parser!(parse_reduction(input.clone()));
    super::try_parser!(parse_parenthesized(input.clone()));
    super::try_parser!(text::parse_text(input.clone()));
    super::try_parser!(primitive::parse_number(input.clone()));
    super::try_parser!(primitive::parse_bool(input.clone()));
    super::try_parser!(primitive::parse_none(input.clone()));
    super::try_parser!(container::parse_list(input.clone()));
    super::try_parser!(container::parse_table(input.clone()));
    super::try_parser!(container::parse_set(input.clone()));
    super::try_parser!(function::parse_lambda(input.clone()));
    super::try_parser!(function::parse_inline_c(input.clone()));
    super::try_parser!(parse_deserialize(input.clone()));
    super::parse_var(input)
}

/// `( expr )` — parentheses may contain newlines.
fn parse_parenthesized(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, _) = tag("(")(input)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, expr) = expression::parse_expression(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, _) = context("I expected a ')' here", nom::combinator::cut(tag(")"))).parse(rest)?;
    Ok((rest, expr))
}

/// `(op: iter)` reductions, e.g. `(+: nums)` or `(_max_.size: files)`.
fn parse_reduction(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    let (rest, _) = tag("(")(input)?;
    let (rest, op) = expression::match_binary_operator(rest)?;
    let (rest, key) = if op.is_min_max() && (rest.fragment().starts_with('.') || rest.fragment().starts_with('[')) {
        let implicit = Ast::new(
            Span::new(start.position.start..start.position.start, start.state.clone()),
            AstKind::Var("$".into()),
        );
        let (rest, keyed) = parse_suffix_chain(rest, implicit)?;
        (rest, Some(Box::new(keyed)))
    } else {
        (rest, None)
    };
    let (rest, _) = tag(":")(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, iter) = context("I expected an iterable for this reduction", nom::combinator::cut(expression::parse_expression))
        .parse(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, close) = context("I expected a ')' to close this reduction", nom::combinator::cut(tag(")"))).parse(rest)?;
    let end: Span = (&close).into();
    let span = Span::new(start.position.start..end.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Reduction { iter: Box::new(iter), op, key })))
}

/// `deserialize(expr -> Type)`
fn parse_deserialize(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    let (rest, _) = word("deserialize").parse(input)?;
    let (rest, _) = tag("(")(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, value) = context("I expected a value to deserialize", nom::combinator::cut(expression::parse_expression))
        .parse(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, _) = context("I expected '->' and a target type", nom::combinator::cut(tag("->"))).parse(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, type_ast) = context("I expected a target type", nom::combinator::cut(type_info::parse_type)).parse(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, close) = context("I expected a ')' here", nom::combinator::cut(tag(")"))).parse(rest)?;
    let end: Span = (&close).into();
    let span = Span::new(start.position.start..end.position.end, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::Deserialize { value: Box::new(value), type_ast })))
}

/// Applies postfix suffixes to `base` for as long as they are written tight
/// against it.
pub fn parse_suffix_chain<'base>(
    mut input: NomSpan<'base>,
    mut base: Ast<'base>,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    loop {
        let fragment = input.fragment();
        if fragment.starts_with('.') && !fragment.starts_with("..") {
            let (rest, _) = tag::<_, _, TomoParserError>(".")(input.clone())?;
            // `x.1` is not field access; leave it for the caller to reject
            let Ok((mut rest, name)) = super::raw_ident(rest) else { break };
            if rest.fragment().starts_with('(') {
                let (r, _) = tag::<_, _, TomoParserError>("(")(rest.clone())?;
                let (r, args) = function::parse_call_args(r)?;
                let (r, close) = context("I expected a ')' to finish this method call", nom::combinator::cut(tag(")")))
                    .parse(r)?;
                rest = r;
                let end: Span = (&close).into();
                let span = Span::new(base.span.position.start..end.position.end, base.span.state.clone());
                base = Ast::new(
                    span,
                    AstKind::MethodCall {
                        target: Box::new(base),
                        name: std::borrow::Cow::Borrowed(name.fragment()),
                        args,
                    },
                );
            } else {
                let end: Span = (&name).into();
                let span = Span::new(base.span.position.start..end.position.end, base.span.state.clone());
                base = Ast::new(
                    span,
                    AstKind::FieldAccess {
                        fielded: Box::new(base),
                        field: std::borrow::Cow::Borrowed(name.fragment()),
                    },
                );
            }
            input = rest;
        } else if fragment.starts_with('(') {
            let (rest, _) = tag::<_, _, TomoParserError>("(")(input.clone())?;
            let (rest, args) = function::parse_call_args(rest)?;
            let (rest, close) = context("I expected a ')' to finish this function call", nom::combinator::cut(tag(")")))
                .parse(rest)?;
            let end: Span = (&close).into();
            let span = Span::new(base.span.position.start..end.position.end, base.span.state.clone());
            base = Ast::new(span, AstKind::FunctionCall { function: Box::new(base), args });
            input = rest;
        } else if fragment.starts_with('[') {
            let (rest, _) = tag::<_, _, TomoParserError>("[")(input.clone())?;
            let (rest, _) = whitespace(rest)?;
            let (rest, index) = opt(expression::parse_expression).parse(rest)?;
            let (rest, _) = whitespace(rest)?;
            let (rest, unchecked) = match opt(tag(";")).parse(rest)? {
                (rest, Some(_)) => {
                    let (rest, _) = whitespace(rest)?;
                    let (rest, _) = context("I expected 'unchecked' here", nom::combinator::cut(word("unchecked")))
                        .parse(rest)?;
                    let (rest, _) = whitespace(rest)?;
                    (rest, true)
                }
                (rest, None) => (rest, false),
            };
            let (rest, close) = context("I expected a ']' to finish this index", nom::combinator::cut(tag("]"))).parse(rest)?;
            let end: Span = (&close).into();
            let span = Span::new(base.span.position.start..end.position.end, base.span.state.clone());
            base = Ast::new(
                span,
                AstKind::Index {
                    indexed: Box::new(base),
                    index: index.map(Box::new),
                    unchecked,
                },
            );
            input = rest;
        } else if fragment.starts_with('?') {
            let (rest, mark) = tag::<_, _, TomoParserError>("?")(input.clone())?;
            let end: Span = (&mark).into();
            let span = Span::new(base.span.position.start..end.position.end, base.span.state.clone());
            base = Ast::new(span, AstKind::Optional(Box::new(base)));
            input = rest;
        } else if fragment.starts_with('!') && !fragment.starts_with("!=") {
            let (rest, mark) = tag::<_, _, TomoParserError>("!")(input.clone())?;
            let end: Span = (&mark).into();
            let span = Span::new(base.span.position.start..end.position.end, base.span.state.clone());
            base = Ast::new(span, AstKind::NonOptional(Box::new(base)));
            input = rest;
        } else {
            break;
        }
    }
    Ok((input, base))
}

/// Parses the term form allowed inside text interpolations: `$name` with
/// suffixes, or `$(expr)` for anything more complex.
pub fn parse_interp_term(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    if input.fragment().starts_with('(') {
        let (rest, expr) = parse_parenthesized(input)?;
        return parse_suffix_chain(rest, expr);
    }
    if input.fragment().starts_with(|c: char| c.is_ascii_digit()) {
        let (rest, number) = primitive::parse_number(input)?;
        return parse_suffix_chain(rest, number);
    }
    let (rest, var) = super::parse_var(input.clone())?;
    if rest.location_offset() == input.location_offset() {
        return Err(Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("interpolation term"))],
        }));
    }
    parse_suffix_chain(rest, var)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::{NomSpan, State};

    use super::*;

    fn term_to_string(code: &str) -> String {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_term(input).unwrap();
        ast.to_string()
    }

    #[rstest]
    #[case("x.y", "x.y")]
    #[case("x.y.z", "x.y.z")]
    #[case("call(1, 2)", "call(1, 2)")]
    #[case("obj.method(1)", "obj.method(1)")]
    #[case("xs[3]", "xs[3]")]
    #[case("ptr[]", "ptr[]")]
    #[case("xs[i; unchecked]", "xs[i; unchecked]")]
    #[case("x?", "x?")]
    #[case("x!", "x!")]
    #[case("@x", "@x")]
    #[case("&x", "&x")]
    #[case("not x", "not x")]
    #[case("-x", "-x")]
    #[case("table.get(key)!", "table.get(key)!")]
    fn suffix_test(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(term_to_string(code), expected, "{code}");
    }

    #[test]
    fn reduction_parses() {
        let printed = term_to_string("(+: nums)");
        assert_eq!(printed, "(+: nums)");
    }

    #[test]
    fn reduction_with_key() {
        let printed = term_to_string("(_max_.size: files)");
        assert_eq!(printed, "(_max_$.size: files)");
    }

    #[test]
    fn deserialize_parses() {
        let printed = term_to_string("deserialize(bytes -> [Int])");
        assert_eq!(printed, "deserialize(bytes -> [Int])");
    }

    #[test]
    fn no_space_before_suffix() {
        // `f (x)` must not be a call; the call suffix binds tight.
        let state = State::new(SourceFile::new(vec!["<memory>".into()], "f (x)".to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (rest, ast) = parse_term(input).unwrap();
        assert_eq!(ast.to_string(), "f");
        assert!(rest.fragment().starts_with(" ("));
    }
}
