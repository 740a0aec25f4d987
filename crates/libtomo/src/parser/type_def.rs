//! Type definition parsing: `struct`, `enum`, `lang`, `extend`, `extern`
//! and `use`.
//!
//! Definitions may carry an indented namespace block one unit past the
//! header line holding methods, constants and nested definitions.

use std::borrow::Cow;

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::error::context;
use nom::{Input, IResult, Parser};

use crate::ast::{Ast, AstKind, EnumDefAst, LangDefAst, StructDefAst, TagAst, UseKind};
use crate::nom_tools::{line_indent, spaces, NomSpan, Span};

use super::indent::parse_namespace;
use super::{expected_ident, fail, function, ident, match_separator, parse_var, type_info, word, TomoParserError};

/// `struct Name(fields...; secret, extern, opaque)` with an optional
/// namespace block.
pub fn parse_struct_def<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("struct").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);

    let (rest, name) = expected_ident("I expected a name for this struct", rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, _) = context("I expected a '(' and a list of fields here", nom::combinator::cut(tag("("))).parse(rest)?;
    let (rest, fields) = function::parse_args(rest)?;

    let (mut rest, mut secret, mut external, mut opaque) = (rest, false, false, false);
    if let (after, Some(_)) = opt(tag::<_, _, TomoParserError>(";")).parse(rest.clone())? {
        let mut after = after;
        loop {
            let (next, _) = spaces(after)?;
            if let Ok((next, _)) = word("secret").parse(next.clone()) {
                secret = true;
                after = next;
            } else if let Ok((next, _)) = word("extern").parse(next.clone()) {
                external = true;
                after = next;
            } else if let Ok((next, _)) = word("opaque").parse(next.clone()) {
                if !fields.is_empty() {
                    return fail(next, "A struct can't be opaque if it has fields defined");
                }
                opaque = true;
                after = next;
            } else {
                after = next;
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
    let (rest, _) = spaces(rest)?;
    let (rest, close) = context("I wasn't able to parse the rest of this struct", nom::combinator::cut(tag(")")))
        .parse(rest)?;

    let (rest, namespace) = parse_namespace(rest, starting_indent)?;
    let end = if matches!(namespace.kind, AstKind::Block(ref statements) if statements.is_empty()) {
        let close_span: Span = (&close).into();
        close_span.position.end
    } else {
        namespace.span.position.end
    };
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(
            span,
            AstKind::StructDef(Box::new(StructDefAst {
                name: Cow::Borrowed(*name.fragment()),
                fields,
                namespace,
                secret,
                external,
                opaque,
            })),
        ),
    ))
}

/// `enum Name(Tag1, Tag2(field:Type), ...)` with an optional namespace
/// block.
pub fn parse_enum_def<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("enum").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);

    let (rest, name) = expected_ident("I expected a name for this enum", rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, _) = tag("(")(rest)?;

    let mut tags: Vec<TagAst<'_>> = Vec::new();
    let (mut rest, _) = spaces(rest)?;
    loop {
        let (after, _) = spaces(rest.clone())?;
        let Ok((after, tag_name)) = ident(after.clone()) else {
            rest = after;
            break;
        };
        let tag_span: Span = (&tag_name).into();
        let (after, _) = spaces(after)?;
        let (after, fields, secret) = if let (after, Some(_)) = opt(tag::<_, _, TomoParserError>("(")).parse(after.clone())? {
            let (after, fields) = function::parse_args(after)?;
            let (after, _) = spaces(after)?;
            let (after, secret) = match opt(tag(";")).parse(after)? {
                (after, Some(_)) => {
                    let (after, _) = spaces(after)?;
                    let (after, secret) = opt(word("secret")).parse(after)?;
                    let (after, _) = spaces(after)?;
                    (after, secret.is_some())
                }
                (after, None) => (after, false),
            };
            let (after, _) = context("I wasn't able to parse the rest of this tagged union member", nom::combinator::cut(tag(")")))
                .parse(after)?;
            (after, fields, secret)
        } else {
            (after, Vec::new(), false)
        };
        tags.push(TagAst { name: Cow::Borrowed(*tag_name.fragment()), fields, secret, span: tag_span });
        let (after, more) = match_separator(after)?;
        rest = after;
        if !more {
            break;
        }
    }

    let (rest, _) = spaces(rest)?;
    let (rest, close) = context("I wasn't able to parse the rest of this enum definition", nom::combinator::cut(tag(")")))
        .parse(rest)?;

    if tags.is_empty() {
        return fail(rest, "This enum does not have any tags!");
    }

    let (rest, namespace) = parse_namespace(rest, starting_indent)?;
    let end = if matches!(namespace.kind, AstKind::Block(ref statements) if statements.is_empty()) {
        let close_span: Span = (&close).into();
        close_span.position.end
    } else {
        namespace.span.position.end
    };
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(
            span,
            AstKind::EnumDef(Box::new(EnumDefAst { name: Cow::Borrowed(*name.fragment()), tags, namespace })),
        ),
    ))
}

/// `lang Name` with an optional namespace block.
pub fn parse_lang_def<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("lang").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, name) = expected_ident("I expected a name for this lang", rest)?;
    let name_span: Span = (&name).into();
    let (rest, namespace) = parse_namespace(rest, starting_indent)?;
    let end = if matches!(namespace.kind, AstKind::Block(ref statements) if statements.is_empty()) {
        name_span.position.end
    } else {
        namespace.span.position.end
    };
    let span = Span::new(start.position.start..end, start.state.clone());
    Ok((
        rest,
        Ast::new(
            span,
            AstKind::LangDef(Box::new(LangDefAst { name: Cow::Borrowed(*name.fragment()), namespace })),
        ),
    ))
}

/// `extend Name` with a namespace block (experimental; the checker rejects
/// it as not yet implemented).
pub fn parse_extend<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("extend").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, name) = expected_ident("I expected a name for this extend", rest)?;
    let (rest, body) = parse_namespace(rest, starting_indent)?;
    let span = Span::new(start.position.start..body.span.position.end.max(start.position.end), start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::Extend { name: Cow::Borrowed(*name.fragment()), body: Box::new(body) }),
    ))
}

/// `extern name : Type`
pub fn parse_extern(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, keyword) = word("extern").parse(input)?;
    let start: Span = (&keyword).into();
    let (rest, name) = expected_ident("I expected a name for this extern", rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, _) = context("I couldn't get a type for this extern", nom::combinator::cut(tag(":"))).parse(rest)?;
    let (rest, type_ast) = context("I couldn't parse the type for this extern", nom::combinator::cut(type_info::parse_type))
        .parse(rest)?;
    let span = Span::new(start.position.start..type_ast.span.position.end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::Extern { name: Cow::Borrowed(*name.fragment()), type_ast }),
    ))
}

/// `[var :=] use path`
pub fn parse_use(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    // Optional binding: `mod := use ./mod.tm`
    let (rest, var) = match parse_var(input.clone()) {
        Ok((rest, var)) => {
            let (rest, _) = spaces(rest)?;
            match tag::<_, _, TomoParserError>(":=")(rest) {
                Ok((rest, _)) => {
                    let name = match var.kind {
                        AstKind::Var(name) => name,
                        _ => unreachable!(),
                    };
                    (rest, Some(name))
                }
                Err(_) => (input, None),
            }
        }
        Err(_) => (input, None),
    };

    let (rest, _) = word("use").parse(rest)?;
    let (rest, _) = spaces(rest)?;
    let fragment = rest.fragment();
    let path_len = fragment
        .find([' ', '\t', '\r', '\n', ';'])
        .unwrap_or(fragment.len());
    if path_len == 0 {
        return fail(rest, "There is no module name here to use");
    }
    let path = &fragment[..path_len];
    let what = UseKind::classify(path);
    let (rest, matched) = rest.take_split(path_len);
    let end: Span = (&matched).into();
    let span = Span::new(start.position.start..end.position.end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::Use { var, path: Cow::Borrowed(path), what }),
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::super::parse_statement;
    use super::*;

    fn statement(code: &str, check: impl FnOnce(&Ast<'_>)) {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_statement(input, 0).unwrap();
        check(&ast);
    }

    #[test]
    fn struct_with_fields() {
        statement("struct Vec2(x:Num, y:Num)", |ast| match &ast.kind {
            AstKind::StructDef(def) => {
                assert_eq!(def.name, "Vec2");
                assert_eq!(def.fields.len(), 2);
                assert!(!def.secret && !def.opaque);
            }
            other => panic!("expected StructDef, got {other:?}"),
        });
    }

    #[test]
    fn struct_with_namespace() {
        let code = "struct Vec2(x:Num, y:Num)\n    zero := Vec2(0.0, 0.0)";
        statement(code, |ast| match &ast.kind {
            AstKind::StructDef(def) => match &def.namespace.kind {
                AstKind::Block(statements) => assert_eq!(statements.len(), 1),
                other => panic!("expected Block, got {other:?}"),
            },
            other => panic!("expected StructDef, got {other:?}"),
        });
    }

    #[test]
    fn opaque_struct() {
        statement("struct Handle(; opaque)", |ast| match &ast.kind {
            AstKind::StructDef(def) => assert!(def.opaque),
            other => panic!("expected StructDef, got {other:?}"),
        });
    }

    #[test]
    fn enum_with_payloads() {
        statement("enum Shape(Circle(r:Num), Square(s:Num))", |ast| match &ast.kind {
            AstKind::EnumDef(def) => {
                assert_eq!(def.name, "Shape");
                assert_eq!(def.tags.len(), 2);
                assert_eq!(def.tags[0].name, "Circle");
                assert_eq!(def.tags[0].fields.len(), 1);
            }
            other => panic!("expected EnumDef, got {other:?}"),
        });
    }

    #[test]
    fn enum_with_bare_tags() {
        statement("enum Direction(North, South, East, West)", |ast| match &ast.kind {
            AstKind::EnumDef(def) => {
                assert_eq!(def.tags.len(), 4);
                assert!(def.tags.iter().all(|t| t.fields.is_empty()));
            }
            other => panic!("expected EnumDef, got {other:?}"),
        });
    }

    #[test]
    fn empty_enum_fails() {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], "enum Nothing()".to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        assert!(parse_statement(input, 0).is_err());
    }

    #[test]
    fn lang_def() {
        statement("lang Sh", |ast| match &ast.kind {
            AstKind::LangDef(def) => assert_eq!(def.name, "Sh"),
            other => panic!("expected LangDef, got {other:?}"),
        });
    }

    #[test]
    fn extern_decl() {
        statement("extern sqrt : func(n:Num -> Num)", |ast| match &ast.kind {
            AstKind::Extern { name, .. } => assert_eq!(name, "sqrt"),
            other => panic!("expected Extern, got {other:?}"),
        });
    }

    #[test]
    fn use_kinds() {
        statement("use ./vectors.tm", |ast| match &ast.kind {
            AstKind::Use { what, .. } => assert_eq!(*what, UseKind::Local),
            other => panic!("expected Use, got {other:?}"),
        });
        statement("use <math.h>", |ast| match &ast.kind {
            AstKind::Use { what, .. } => assert_eq!(*what, UseKind::Header),
            other => panic!("expected Use, got {other:?}"),
        });
        statement("use -lm", |ast| match &ast.kind {
            AstKind::Use { what, .. } => assert_eq!(*what, UseKind::LinkerFlag),
            other => panic!("expected Use, got {other:?}"),
        });
    }

    #[test]
    fn bound_use() {
        statement("vectors := use ./vectors.tm", |ast| match &ast.kind {
            AstKind::Use { var, .. } => assert_eq!(var.as_deref(), Some("vectors")),
            other => panic!("expected Use, got {other:?}"),
        });
    }
}
