//! Primitive value parsing: numbers, booleans, `none` and path literals.
//!
//! Integers keep their source digits (sign included, separators stripped)
//! plus the base they were written in, so the checker can range-check
//! narrowing conversions exactly and the emitter can re-emit the literal.
//! A handful of suffixes reclassify an integer literal as a `Num`:
//!
//! - `%` divides by 100 (`25%` is `0.25`)
//! - `deg` converts degrees to radians
//! - a trailing `e` exponent or `f` marker forces floating point

use std::borrow::Cow;

use nom::bytes::complete::tag;
use nom::combinator::opt;
use nom::{Err, Input, IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind};
use crate::nom_tools::{is_ident_continue, NomSpan, Span};

use super::{type_info, word, TomoParserError};

fn digit_run(fragment: &str, base: u32) -> usize {
    let mut len = 0;
    let mut seen_digit = false;
    for c in fragment.chars() {
        if c == '_' {
            if !seen_digit {
                break;
            }
            len += 1;
        } else if c.is_digit(base) {
            seen_digit = true;
            len += c.len_utf8();
        } else {
            break;
        }
    }
    if seen_digit { len } else { 0 }
}

/// Parses an integer or floating point literal.
pub fn parse_number(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let start: Span = (&input).into();
    let fragment = *input.fragment();

    let (negative, mut offset) = if fragment.starts_with('-') && fragment[1..].starts_with(|c: char| c.is_ascii_digit())
    {
        (true, 1)
    } else {
        (false, 0)
    };

    let base = if fragment[offset..].starts_with("0x") || fragment[offset..].starts_with("0X") {
        offset += 2;
        16
    } else if fragment[offset..].starts_with("0o") {
        offset += 2;
        8
    } else if fragment[offset..].starts_with("0b") {
        offset += 2;
        2
    } else {
        10
    };

    let digits_len = digit_run(&fragment[offset..], base);
    if digits_len == 0 {
        return Err(Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("number"))],
        }));
    }
    let int_digits = &fragment[offset..offset + digits_len];
    offset += digits_len;

    if base == 10 {
        // Fractional part?
        let mut is_float = false;
        let mut fraction = "";
        if fragment[offset..].starts_with('.')
            && fragment[offset + 1..].starts_with(|c: char| c.is_ascii_digit())
        {
            let fraction_len = digit_run(&fragment[offset + 1..], 10);
            fraction = &fragment[offset + 1..offset + 1 + fraction_len];
            offset += 1 + fraction_len;
            is_float = true;
        }
        // Exponent?
        let mut exponent = 0i32;
        if let Some(exp_rest) = fragment[offset..].strip_prefix(['e', 'E']) {
            let (exp_sign, sign_len) = match exp_rest.chars().next() {
                Some('-') => (-1i32, 1),
                Some('+') => (1i32, 1),
                _ => (1i32, 0),
            };
            let exp_len = digit_run(&exp_rest[sign_len..], 10);
            if exp_len > 0 {
                let exp_digits: String = exp_rest[sign_len..sign_len + exp_len].replace('_', "");
                exponent = exp_sign * exp_digits.parse::<i32>().unwrap_or(0);
                offset += 1 + sign_len + exp_len;
                is_float = true;
            }
        }

        let integer: String = int_digits.replace('_', "");
        let fractional: String = fraction.replace('_', "");

        if is_float {
            let mut value: f64 =
                minimal_lexical::parse_float(integer.as_bytes().iter(), fractional.as_bytes().iter(), exponent);
            if negative {
                value = -value;
            }
            let (rest, _) = input.take_split(offset);
            let span = Span::new(start.position.start..start.position.start + offset, start.state.clone());
            return Ok((rest, Ast::new(span, AstKind::Num(value))));
        }

        // Integer suffixes that reclassify as Num
        let tail = &fragment[offset..];
        if tail.starts_with('%') {
            let value = integer.parse::<f64>().unwrap_or(0.0) * if negative { -1.0 } else { 1.0 } / 100.0;
            let (rest, _) = input.take_split(offset + 1);
            let span = Span::new(start.position.start..start.position.start + offset + 1, start.state.clone());
            return Ok((rest, Ast::new(span, AstKind::Num(value))));
        }
        if tail.starts_with("deg") && !tail[3..].starts_with(is_ident_continue) {
            let value = integer.parse::<f64>().unwrap_or(0.0)
                * if negative { -1.0 } else { 1.0 }
                * std::f64::consts::PI
                / 180.0;
            let (rest, _) = input.take_split(offset + 3);
            let span = Span::new(start.position.start..start.position.start + offset + 3, start.state.clone());
            return Ok((rest, Ast::new(span, AstKind::Num(value))));
        }
        if tail.starts_with('f') && !tail[1..].starts_with(is_ident_continue) {
            let value = integer.parse::<f64>().unwrap_or(0.0) * if negative { -1.0 } else { 1.0 };
            let (rest, _) = input.take_split(offset + 1);
            let span = Span::new(start.position.start..start.position.start + offset + 1, start.state.clone());
            return Ok((rest, Ast::new(span, AstKind::Num(value))));
        }

        let digits = if negative { Cow::Owned(format!("-{integer}")) } else { Cow::Owned(integer) };
        let (rest, _) = input.take_split(offset);
        let span = Span::new(start.position.start..start.position.start + offset, start.state.clone());
        Ok((rest, Ast::new(span, AstKind::Int { digits, base })))
    } else {
        let cleaned: String = int_digits.replace('_', "");
        let digits = if negative { Cow::Owned(format!("-{cleaned}")) } else { Cow::Owned(cleaned) };
        let (rest, _) = input.take_split(offset);
        let span = Span::new(start.position.start..start.position.start + offset, start.state.clone());
        Ok((rest, Ast::new(span, AstKind::Int { digits, base })))
    }
}

/// `yes` / `no`
pub fn parse_bool(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    if let Ok((rest, matched)) = word("yes").parse(input.clone()) {
        let span: Span = (&matched).into();
        return Ok((rest, Ast::new(span, AstKind::Bool(true))));
    }
    let (rest, matched) = word("no").parse(input)?;
    let span: Span = (&matched).into();
    Ok((rest, Ast::new(span, AstKind::Bool(false))))
}

/// `none`, optionally with a written type hint: `none:Int?`
pub fn parse_none(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, matched) = word("none").parse(input)?;
    let start: Span = (&matched).into();
    if let Ok((after_colon, _)) = tag::<_, _, TomoParserError>(":")(rest.clone()) {
        let (after_type, type_hint) = opt(type_info::parse_type).parse(after_colon)?;
        if let Some(type_hint) = type_hint {
            let span = start.to(&type_hint.span);
            return Ok((after_type, Ast::new(span, AstKind::None { type_hint: Some(type_hint) })));
        }
    }
    Ok((rest, Ast::new(start, AstKind::None { type_hint: None })))
}

/// Path literals: `(/abs)`, `(./rel)`, `(../up)`, `(~/home)`.
pub fn parse_path_literal(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let fragment = *input.fragment();
    let Some(inner) = fragment.strip_prefix('(') else {
        return Err(Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("path"))],
        }));
    };
    if !(inner.starts_with('/') || inner.starts_with("./") || inner.starts_with("../") || inner.starts_with("~/")) {
        return Err(Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("path"))],
        }));
    }
    let mut depth = 1usize;
    let mut end = None;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            '\n' => break,
            _ => {}
        }
    }
    let Some(end) = end else {
        return super::fail(input, "I expected a ')' to close this path literal");
    };
    let raw = &inner[..end];
    let consumed = 1 + end + 1;
    let (rest, _) = input.take_split(consumed);
    let start: Span = (&input).into();
    let span = Span::new(start.position.start..start.position.start + consumed, start.state.clone());
    Ok((rest, Ast::new(span, AstKind::PathLiteral(Cow::Borrowed(raw)))))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::*;

    fn parse(code: &str, check: impl FnOnce(&AstKind<'_>)) {
        let state = State::new(SourceFile::new(vec!["<memory>".into(), ], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_number(input).unwrap();
        check(&ast.kind);
    }

    #[rstest]
    #[case("123", "123", 10)]
    #[case("-123", "-123", 10)]
    #[case("1_000_000", "1000000", 10)]
    #[case("0xFF", "FF", 16)]
    #[case("0o777", "777", 8)]
    #[case("0b1010", "1010", 2)]
    fn integer_test(#[case] code: &str, #[case] digits: &str, #[case] base: u32) {
        parse(code, |kind| match kind {
            AstKind::Int { digits: d, base: b } => {
                assert_eq!(d, digits);
                assert_eq!(*b, base);
            }
            other => panic!("expected Int, got {other:?}"),
        });
    }

    #[rstest]
    #[case("1.5", 1.5)]
    #[case("-2.25", -2.25)]
    #[case("1.0e3", 1000.0)]
    #[case("1.5e-1", 0.15)]
    #[case("5e3", 5000.0)]
    #[case("50%", 0.5)]
    #[case("5f", 5.0)]
    fn float_test(#[case] code: &str, #[case] expected: f64) {
        parse(code, |kind| match kind {
            AstKind::Num(n) => assert!((n - expected).abs() < 1e-9, "{code}: {n} != {expected}"),
            other => panic!("expected Num, got {other:?}"),
        });
    }

    #[test]
    fn degrees_convert_to_radians() {
        parse("180deg", |kind| match kind {
            AstKind::Num(n) => assert!((n - std::f64::consts::PI).abs() < 1e-12),
            other => panic!("expected Num, got {other:?}"),
        });
    }

    #[test]
    fn method_call_on_int_is_not_a_float() {
        let code = "1.to";
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(code, state);
        let (rest, ast) = parse_number(input).unwrap();
        assert!(matches!(ast.kind, AstKind::Int { .. }));
        assert_eq!(*rest.fragment(), ".to");
    }

    #[test]
    fn path_literal_parses() {
        let code = "(./foo/bar.txt)";
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(code, state);
        let (_, ast) = parse_path_literal(input).unwrap();
        assert!(matches!(ast.kind, AstKind::PathLiteral(ref p) if p == "./foo/bar.txt"));
    }
}
