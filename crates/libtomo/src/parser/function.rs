//! Function definition, lambda, conversion and inline-C parsing.
//!
//! Argument lists group names into batches sharing one type annotation
//! (`x, y: Int`), with optional `name|alias` aliases and default values.
//! The return type and the `; cache, cache_size=N, inline` modifiers live
//! inside the parentheses: `func fib(n:Int -> Int; cache, cache_size=128)`.

use std::borrow::Cow;

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::error::context;
use nom::{IResult, Input, Parser};

use crate::ast::{ArgAst, Ast, AstKind, CacheAst, CallArg, ConvertDefAst, FunctionDefAst, LambdaAst, TypeAst};
use crate::nom_tools::{line_indent, spaces, whitespace, NomSpan, Span};

use super::indent::parse_block;
use super::{expression, fail, ident, match_separator, raw_ident, type_info, word, TomoParserError};

/// Parses a declaration argument list (without the surrounding parens).
pub fn parse_args(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Vec<ArgAst<'_>>, TomoParserError<'_>> {
    let mut args = Vec::new();
    let (mut input, _) = whitespace(input)?;
    'batches: loop {
        struct Named<'base> {
            name: Cow<'base, str>,
            alias: Option<Cow<'base, str>>,
            span: Span,
        }
        let mut names: Vec<Named<'_>> = Vec::new();
        let mut batch_type: Option<TypeAst<'_>> = None;
        let mut default_value: Option<Ast<'_>> = None;
        loop {
            let (rest, _) = whitespace(input.clone())?;
            let Ok((rest, name)) = ident(rest) else {
                if names.is_empty() {
                    break 'batches;
                }
                break;
            };
            let name_span: Span = (&name).into();
            let (rest, _) = spaces(rest)?;
            let (rest, alias) = match opt(tag("|")).parse(rest)? {
                (rest, Some(_)) => {
                    let (rest, alias) = context("I expected an argument alias after '|'", nom::combinator::cut(ident))
                        .parse(rest)?;
                    (rest, Some(Cow::Borrowed(*alias.fragment())))
                }
                (rest, None) => (rest, None),
            };
            names.push(Named { name: Cow::Borrowed(*name.fragment()), alias, span: name_span });

            let (rest, _) = spaces(rest)?;
            if let (rest, Some(_)) = opt(tag::<_, _, TomoParserError>(":")).parse(rest.clone())? {
                let (rest, ty) = context("I expected a type here", nom::combinator::cut(type_info::parse_type)).parse(rest)?;
                let (rest, _) = whitespace(rest)?;
                let (rest, default) = match opt(tag("=")).parse(rest)? {
                    (rest, Some(_)) if !rest.fragment().starts_with('=') => {
                        let (rest, value) = context("I expected a value here", nom::combinator::cut(super::suffix::parse_term))
                            .parse(rest)?;
                        (rest, Some(value))
                    }
                    (rest, _) => (rest, None),
                };
                batch_type = Some(ty);
                default_value = default;
                input = rest;
                break;
            }
            if !rest.fragment().starts_with("==") {
                if let (rest, Some(_)) = opt(tag::<_, _, TomoParserError>("=")).parse(rest.clone())? {
                    let (rest, value) = context("I expected a value here", nom::combinator::cut(super::suffix::parse_term))
                        .parse(rest)?;
                    default_value = Some(value);
                    input = rest;
                    break;
                }
            }
            let (rest, _) = spaces(rest)?;
            match opt(tag(",")).parse(rest)? {
                (rest, Some(_)) => input = rest,
                (rest, None) => {
                    input = rest;
                    break;
                }
            }
        }
        if names.is_empty() {
            break;
        }
        if batch_type.is_none() && default_value.is_none() {
            return fail(input, "I expected a ':' and type, or '=' and a default value after this parameter");
        }
        let count = names.len();
        for (i, named) in names.into_iter().enumerate() {
            // A shared default value only applies to the last name of the
            // batch; a shared type applies to all of them.
            let arg_default = if i + 1 == count { default_value.take() } else { None };
            let arg_type = match &batch_type {
                Some(ty) if i + 1 < count => Some(clone_type(ty)),
                Some(_) if i + 1 == count => batch_type.take(),
                _ => None,
            };
            args.push(ArgAst {
                name: named.name,
                alias: named.alias,
                type_ast: arg_type,
                default_value: arg_default,
                span: named.span,
            });
        }
        let (rest, more) = match_separator(input)?;
        input = rest;
        if !more {
            break;
        }
    }
    Ok((input, args))
}

/// Structural clone of a surface type for argument batches that share one
/// annotation. Only the forms that can appear in an argument type are
/// supported; the node index is re-drawn.
fn clone_type<'base>(ty: &TypeAst<'base>) -> TypeAst<'base> {
    use crate::ast::TypeAstKind;
    let kind = match &ty.kind {
        TypeAstKind::Unknown => TypeAstKind::Unknown,
        TypeAstKind::Var(name) => TypeAstKind::Var(name.clone()),
        TypeAstKind::Pointer { pointed, is_stack } => TypeAstKind::Pointer {
            pointed: Box::new(clone_type(pointed)),
            is_stack: *is_stack,
        },
        TypeAstKind::List(item) => TypeAstKind::List(Box::new(clone_type(item))),
        TypeAstKind::Set(item) => TypeAstKind::Set(Box::new(clone_type(item))),
        TypeAstKind::Table { key, value, .. } => TypeAstKind::Table {
            key: Box::new(clone_type(key)),
            value: Box::new(clone_type(value)),
            default_value: None,
        },
        TypeAstKind::Function { args: _, ret } => TypeAstKind::Function {
            args: Vec::new(),
            ret: Box::new(clone_type(ret)),
        },
        TypeAstKind::Optional(inner) => TypeAstKind::Optional(Box::new(clone_type(inner))),
        TypeAstKind::Enum { name, .. } => TypeAstKind::Enum { name: name.clone(), tags: Vec::new() },
    };
    TypeAst { span: ty.span.clone(), kind }
}

/// Parses call-site arguments (without the surrounding parens): positional
/// or `name=value`, separated by commas or newlines.
pub fn parse_call_args(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Vec<CallArg<'_>>, TomoParserError<'_>> {
    let (mut input, _) = whitespace(input)?;
    let mut args = Vec::new();
    loop {
        let (rest, _) = whitespace(input.clone())?;
        // Named argument?
        let named = (|| {
            let (rest, name) = ident(rest.clone()).ok()?;
            let (rest, _) = spaces(rest).ok()?;
            let (rest, _) = tag::<_, _, TomoParserError>("=")(rest).ok()?;
            if rest.fragment().starts_with('=') {
                return None;
            }
            Some((rest, Cow::Borrowed(*name.fragment())))
        })();
        let (rest, name) = match named {
            Some((rest, name)) => (rest, Some(name)),
            None => (rest, None),
        };
        let Ok((rest, value)) = expression::parse_expression(rest) else {
            if name.is_some() {
                return fail(input, "I expected a value for this named argument");
            }
            break;
        };
        args.push(CallArg { name, value });
        let (rest, more) = match_separator(rest)?;
        input = rest;
        if !more {
            break;
        }
    }
    let (input, _) = whitespace(input)?;
    Ok((input, args))
}

struct Modifiers {
    cache: Option<CacheAst>,
    is_inline: bool,
}

/// `; cache, cache_size=N, inline` inside the argument parens.
fn parse_modifiers(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Modifiers, TomoParserError<'_>> {
    let mut modifiers = Modifiers { cache: None, is_inline: false };
    let (rest, semicolon) = opt(tag(";")).parse(input)?;
    if semicolon.is_none() {
        return Ok((rest, modifiers));
    }
    let (mut rest, _) = whitespace(rest)?;
    loop {
        if let Ok((after, _)) = word("inline").parse(rest.clone()) {
            modifiers.is_inline = true;
            rest = after;
        } else if let Ok((after, _)) = word("cache_size").parse(rest.clone()) {
            let (after, _) = context("I expected '=' after 'cache_size'", nom::combinator::cut(tag("="))).parse(after)?;
            let (after, size) = context("I expected a cache size here", nom::combinator::cut(super::primitive::parse_number))
                .parse(after)?;
            let size = match size.kind {
                AstKind::Int { ref digits, .. } => digits.parse::<i64>().ok(),
                _ => None,
            };
            let Some(size) = size else {
                return fail(after, "Cache sizes must be plain integers");
            };
            modifiers.cache = Some(CacheAst { size: Some(size) });
            rest = after;
        } else if let Ok((after, _)) = word("cache").parse(rest.clone()) {
            if modifiers.cache.is_none() {
                modifiers.cache = Some(CacheAst { size: None });
            }
            rest = after;
        } else {
            break;
        }
        let (after, more) = match_separator(rest)?;
        rest = after;
        if !more {
            break;
        }
    }
    Ok((rest, modifiers))
}

/// `func name(args [-> ret] [; modifiers]) body`
pub fn parse_func_def<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("func").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);

    let (rest, name) = ident(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, _) = context("I expected a parenthesis for this function's arguments", nom::combinator::cut(tag("(")))
        .parse(rest)?;
    let (rest, args) = parse_args(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, ret_type) = match opt(tag("->")).parse(rest)? {
        (rest, Some(_)) => {
            let (rest, ty) = context("I expected a return type here", nom::combinator::cut(type_info::parse_type)).parse(rest)?;
            (rest, Some(ty))
        }
        (rest, None) => (rest, None),
    };
    let (rest, _) = whitespace(rest)?;
    let (rest, modifiers) = parse_modifiers(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, _) = context("I wasn't able to parse the rest of this function's arguments", nom::combinator::cut(tag(")")))
        .parse(rest)?;
    let (rest, body) = context("I expected a body for this function", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;

    let span = Span::new(start.position.start..body.span.position.end, start.state.clone());
    Ok((
        rest,
        Ast::new(
            span,
            AstKind::FunctionDef(Box::new(FunctionDefAst {
                name: Cow::Borrowed(*name.fragment()),
                args,
                ret_type,
                body,
                cache: modifiers.cache,
                is_inline: modifiers.is_inline,
            })),
        ),
    ))
}

/// `func(args [-> ret]) body` — an anonymous function.
pub fn parse_lambda(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, keyword) = word("func").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, _) = tag("(")(rest)?;
    let (rest, args) = parse_args(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, ret_type) = match opt(tag("->")).parse(rest)? {
        (rest, Some(_)) => {
            let (rest, ty) = context("I expected a return type here", nom::combinator::cut(type_info::parse_type)).parse(rest)?;
            (rest, Some(ty))
        }
        (rest, None) => (rest, None),
    };
    let (rest, _) = whitespace(rest)?;
    let (rest, _) = context("I expected a ')' for this function's arguments", nom::combinator::cut(tag(")"))).parse(rest)?;
    let (rest, body) = context("I expected a body for this function", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;

    let id = start.state.next_index();
    let span = Span::new(start.position.start..body.span.position.end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::Lambda(Box::new(LambdaAst { args, ret_type, body, id }))),
    ))
}

/// `convert(args -> Type) body` — a conversion constructor in a namespace.
pub fn parse_convert_def<'base>(
    input: NomSpan<'base>,
    _indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (rest, keyword) = word("convert").parse(input)?;
    let start: Span = (&keyword).into();
    let starting_indent = line_indent(&keyword).unwrap_or(0);
    let (rest, _) = tag("(")(rest)?;
    let (rest, args) = parse_args(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, _) = context("I expected '->' and the conversion's target type", nom::combinator::cut(tag("->"))).parse(rest)?;
    let (rest, ret_type) = context("I expected a target type here", nom::combinator::cut(type_info::parse_type)).parse(rest)?;
    let (rest, _) = whitespace(rest)?;
    let (rest, _) = context("I expected a ')' here", nom::combinator::cut(tag(")"))).parse(rest)?;
    let (rest, body) = context("I expected a body for this convert", nom::combinator::cut(
        |i| parse_block(i, starting_indent),
    ))
    .parse(rest)?;

    let span = Span::new(start.position.start..body.span.position.end, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::ConvertDef(Box::new(ConvertDefAst { args, ret_type, body }))),
    ))
}

/// `C_code[:Type] <quote> raw C text with @interpolations <closer>`
pub fn parse_inline_c(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, keyword) = word("C_code").parse(input)?;
    let start: Span = (&keyword).into();
    let (rest, _) = spaces(rest)?;
    let (rest, type_ast) = match opt(tag(":")).parse(rest)? {
        (rest, Some(_)) => {
            let (rest, ty) = context("I couldn't parse the type for this C_code", nom::combinator::cut(type_info::parse_type))
                .parse(rest)?;
            let (rest, _) = spaces(rest)?;
            (rest, Some(ty))
        }
        (rest, None) => (rest, None),
    };

    let open = rest.fragment().chars().next().unwrap_or('\0');
    let close = match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        '"' | '\'' | '`' | '|' | '/' | ';' => open,
        _ => {
            return fail(rest, "This is not a valid quotation character for C_code");
        }
    };
    let (mut rest, _) = rest.take_split(1);
    let mut chunks = Vec::new();
    let mut cooked = String::new();
    let mut chunk_start = rest.location_offset();
    let mut depth = 1usize;
    let mut offset = 0usize;
    loop {
        let fragment = *rest.fragment();
        let Some(c) = fragment[offset..].chars().next() else {
            return fail(rest, "I expected this C code to be closed before the end of the file");
        };
        if c == '@' {
            if !cooked.is_empty() {
                let span = Span::new(chunk_start..rest.location_offset() + offset, rest.extra.clone());
                chunks.push(Ast::new(span, AstKind::TextLiteral(Cow::Owned(std::mem::take(&mut cooked)))));
            }
            let (after_sigil, _) = rest.take_split(offset + 1);
            let (after_term, term) = match super::suffix::parse_interp_term(after_sigil.clone()) {
                Ok(result) => result,
                Err(_) => return fail(after_sigil, "I expected an interpolation term here"),
            };
            chunks.push(term);
            chunk_start = after_term.location_offset();
            rest = after_term;
            offset = 0;
            continue;
        }
        if c == open && open != close {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                if !cooked.is_empty() {
                    let span = Span::new(chunk_start..rest.location_offset() + offset, rest.extra.clone());
                    chunks.push(Ast::new(span, AstKind::TextLiteral(Cow::Owned(cooked))));
                }
                let (after, _) = rest.take_split(offset + c.len_utf8());
                let span = Span::new(start.position.start..after.location_offset(), start.state.clone());
                return Ok((after, Ast::new(span, AstKind::InlineCCode { chunks, type_ast })));
            }
        }
        cooked.push(c);
        offset += c.len_utf8();
    }
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
    fn simple_function() {
        statement("func add(x:Int, y:Int -> Int)\n    return x + y", |ast| match &ast.kind {
            AstKind::FunctionDef(def) => {
                assert_eq!(def.name, "add");
                assert_eq!(def.args.len(), 2);
                assert!(def.ret_type.is_some());
                assert!(def.cache.is_none());
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        });
    }

    #[test]
    fn batched_argument_types() {
        statement("func area(w, h: Num -> Num)\n    return w * h", |ast| match &ast.kind {
            AstKind::FunctionDef(def) => {
                assert_eq!(def.args.len(), 2);
                assert!(def.args[0].type_ast.is_some());
                assert!(def.args[1].type_ast.is_some());
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        });
    }

    #[test]
    fn cached_function() {
        statement("func fib(n:Int -> Int; cache, cache_size=128)\n    return n", |ast| match &ast.kind {
            AstKind::FunctionDef(def) => {
                assert_eq!(def.cache, Some(CacheAst { size: Some(128) }));
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        });
    }

    #[test]
    fn default_argument_value() {
        statement("func greet(name:Text = \"world\")\n    pass", |ast| match &ast.kind {
            AstKind::FunctionDef(def) => {
                assert!(def.args[0].default_value.is_some());
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        });
    }

    #[test]
    fn lambda_expression() {
        statement("double := func(x:Int) x * 2", |ast| match &ast.kind {
            AstKind::Declare { value: Some(value), .. } => {
                assert!(matches!(value.kind, AstKind::Lambda(_)));
            }
            other => panic!("expected Declare, got {other:?}"),
        });
    }

    #[test]
    fn inline_c_code() {
        statement("x := C_code:Int(Int$from_int64(42))", |ast| match &ast.kind {
            AstKind::Declare { value: Some(value), .. } => match &value.kind {
                AstKind::InlineCCode { chunks, type_ast } => {
                    assert!(type_ast.is_some());
                    assert_eq!(chunks.len(), 1);
                }
                other => panic!("expected InlineCCode, got {other:?}"),
            },
            other => panic!("expected Declare, got {other:?}"),
        });
    }

    #[test]
    fn named_call_arguments() {
        statement("draw(x=1, y=2)", |ast| match &ast.kind {
            AstKind::FunctionCall { args, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].name.as_deref(), Some("x"));
            }
            other => panic!("expected FunctionCall, got {other:?}"),
        });
    }
}
