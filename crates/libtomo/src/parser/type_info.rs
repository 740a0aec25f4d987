//! Surface type annotation parsing.
//!
//! Types mirror the value literal syntax: `[T]` lists, `|T|` sets, `{K=V}`
//! tables (with an optional `; default=...`), `@T`/`&T` pointers,
//! `func(args -> Ret)` functions, and a `?` suffix for optionals. Named
//! types may be module-qualified (`vectors.Vec2`).

use std::borrow::Cow;

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::error::context;
use nom::{IResult, Parser};

use crate::ast::{TypeAst, TypeAstKind};
use crate::nom_tools::{spaces, whitespace, NomSpan, Span};

use super::{expression, function, ident, raw_ident, word, TomoParserError};

/// Parses a type annotation, including its `?` optional suffixes.
pub fn parse_type(input: NomSpan<'_>) -> IResult<NomSpan<'_>, TypeAst<'_>, TomoParserError<'_>> {
    let (input, _) = spaces(input)?;
    let (mut rest, mut ty) = parse_base_type(input)?;
    while rest.fragment().starts_with('?') {
        let (after, mark) = tag::<_, _, TomoParserError>("?")(rest)?;
        let end: Span = (&mark).into();
        let span = Span::new(ty.span.position.start..end.position.end, ty.span.state.clone());
        ty = TypeAst { span, kind: TypeAstKind::Optional(Box::new(ty)) };
        rest = after;
    }
    Ok((rest, ty))
}

fn parse_base_type(input: NomSpan<'_>) -> IResult<NomSpan<'_>, TypeAst<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();

    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("@")(input.clone()) {
        let (rest, pointed) = context("I expected a pointed-to type here", nom::combinator::cut(parse_type)).parse(rest)?;
        let span = Span::new(start.position.start..pointed.span.position.end, start.state.clone());
        return Ok((rest, TypeAst { span, kind: TypeAstKind::Pointer { pointed: Box::new(pointed), is_stack: false } }));
    }
    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("&")(input.clone()) {
        let (rest, pointed) = context("I expected a pointed-to type here", nom::combinator::cut(parse_type)).parse(rest)?;
        let span = Span::new(start.position.start..pointed.span.position.end, start.state.clone());
        return Ok((rest, TypeAst { span, kind: TypeAstKind::Pointer { pointed: Box::new(pointed), is_stack: true } }));
    }
    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("[")(input.clone()) {
        let (rest, _) = whitespace(rest)?;
        let (rest, item) = context("I expected an item type here", nom::combinator::cut(parse_type)).parse(rest)?;
        let (rest, _) = whitespace(rest)?;
        let (rest, close) = context("I expected a ']' here", nom::combinator::cut(tag("]"))).parse(rest)?;
        let end: Span = (&close).into();
        let span = Span::new(start.position.start..end.position.end, start.state.clone());
        return Ok((rest, TypeAst { span, kind: TypeAstKind::List(Box::new(item)) }));
    }
    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("|")(input.clone()) {
        let (rest, _) = whitespace(rest)?;
        let (rest, item) = context("I expected an item type here", nom::combinator::cut(parse_type)).parse(rest)?;
        let (rest, _) = whitespace(rest)?;
        let (rest, close) = context("I expected a '|' here", nom::combinator::cut(tag("|"))).parse(rest)?;
        let end: Span = (&close).into();
        let span = Span::new(start.position.start..end.position.end, start.state.clone());
        return Ok((rest, TypeAst { span, kind: TypeAstKind::Set(Box::new(item)) }));
    }
    if let Ok((rest, _)) = tag::<_, _, TomoParserError>("{")(input.clone()) {
        let (rest, _) = whitespace(rest)?;
        let (rest, key) = context("I expected a key type here", nom::combinator::cut(parse_type)).parse(rest)?;
        let (rest, _) = whitespace(rest)?;
        let (rest, _) = context("I expected '=' between the key and value types", nom::combinator::cut(tag("=")))
            .parse(rest)?;
        let (rest, value) = context("I expected a value type here", nom::combinator::cut(parse_type)).parse(rest)?;
        let (rest, _) = whitespace(rest)?;
        let (rest, default_value) = match opt(tag(";")).parse(rest)? {
            (rest, Some(_)) => {
                let (rest, _) = whitespace(rest)?;
                let (rest, _) = context("I expected 'default' here", nom::combinator::cut(word("default"))).parse(rest)?;
                let (rest, _) = context("I expected '=' after 'default'", nom::combinator::cut(tag("="))).parse(rest)?;
                let (rest, default) = context("I expected a default value here", nom::combinator::cut(
                    expression::parse_expression,
                ))
                .parse(rest)?;
                let (rest, _) = whitespace(rest)?;
                (rest, Some(Box::new(default)))
            }
            (rest, None) => (rest, None),
        };
        let (rest, close) = context("I expected a '}' here", nom::combinator::cut(tag("}"))).parse(rest)?;
        let end: Span = (&close).into();
        let span = Span::new(start.position.start..end.position.end, start.state.clone());
        return Ok((
            rest,
            TypeAst {
                span,
                kind: TypeAstKind::Table { key: Box::new(key), value: Box::new(value), default_value },
            },
        ));
    }
    if let Ok((rest, _)) = word("func").parse(input.clone()) {
        let (rest, _) = context("I expected a '(' for this function type", nom::combinator::cut(tag("("))).parse(rest)?;
        let (rest, args) = function::parse_args(rest)?;
        let (rest, _) = spaces(rest)?;
        let (rest, ret) = match opt(tag("->")).parse(rest)? {
            (rest, Some(_)) => {
                let (rest, ret) = context("I expected a return type here", nom::combinator::cut(parse_type)).parse(rest)?;
                (rest, ret)
            }
            (rest, None) => {
                let span = Span::new(start.position.end..start.position.end, start.state.clone());
                (rest, TypeAst { span, kind: TypeAstKind::Var(Cow::Borrowed("Void")) })
            }
        };
        let (rest, _) = whitespace(rest)?;
        let (rest, close) = context("I expected a ')' here", nom::combinator::cut(tag(")"))).parse(rest)?;
        let end: Span = (&close).into();
        let span = Span::new(start.position.start..end.position.end, start.state.clone());
        return Ok((rest, TypeAst { span, kind: TypeAstKind::Function { args, ret: Box::new(ret) } }));
    }

    // A (possibly module-qualified) type name
    let (mut rest, first) = ident(input)?;
    let name_start: Span = (&first).into();
    let mut end = name_start.position.end;
    loop {
        if !rest.fragment().starts_with('.') {
            break;
        }
        let (after_dot, _) = tag::<_, _, TomoParserError>(".")(rest.clone())?;
        let Ok((after, part)) = raw_ident(after_dot) else { break };
        let part_span: Span = (&part).into();
        end = part_span.position.end;
        rest = after;
    }
    let span = Span::new(name_start.position.start..end, name_start.state.clone());
    let text = span.text().to_string();
    Ok((rest, TypeAst { span, kind: TypeAstKind::Var(Cow::Owned(text)) }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::*;

    fn type_to_string(code: &str) -> String {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ty) = parse_type(input).unwrap();
        ty.to_string()
    }

    #[rstest]
    #[case("Int", "Int")]
    #[case("Text", "Text")]
    #[case("[Int]", "[Int]")]
    #[case("|Text|", "|Text|")]
    #[case("{Text=Int}", "{Text=Int}")]
    #[case("@Int", "@Int")]
    #[case("&Int", "&Int")]
    #[case("Int?", "Int?")]
    #[case("[Int?]", "[Int?]")]
    #[case("@[Int]", "@[Int]")]
    #[case("vectors.Vec2", "vectors.Vec2")]
    fn type_round_trip(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(type_to_string(code), expected, "{code}");
    }

    #[test]
    fn function_type() {
        let printed = type_to_string("func(x:Int -> Bool)");
        assert_eq!(printed, "func(x:Int -> Bool)");
    }

    #[test]
    fn optional_suffix_nests_outward() {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], "@Int?".to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ty) = parse_type(input).unwrap();
        // `@Int?` reads as a pointer to an optional per the pointed-type
        // suffix binding
        assert!(matches!(ty.kind, TypeAstKind::Pointer { ref pointed, .. } if pointed.kind.is_optional()));
    }
}
