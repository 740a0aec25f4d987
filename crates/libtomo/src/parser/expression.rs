//! Expression parsing with operator precedence for the Tomo language.
//!
//! Binary expressions are parsed by precedence climbing over the static
//! tightness table on [`BinOp`]: `parse_infix(min)` consumes operators whose
//! tightness is at least `min`, recursing at `tightness + 1` for
//! left-associative operators and at the same tightness for the
//! right-associative `^`.
//!
//! Two grammar rules from the spec are enforced here rather than left to
//! the checker:
//!
//! - comparison operators do not chain (`a < b < c` is a parse error), and
//! - `_min_`/`_max_` may not be mixed with comparisons without parentheses.
//!
//! An expression may continue onto a following line when that line is
//! indented deeper than the expression's first line and starts with `..`.

use nom::bytes::complete::tag;
use nom::error::context;
use nom::{Err, Input, IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind, BinOp, BinaryOperation};
use crate::nom_tools::{indent_of_line, line_indent, spaces, NomSpan, Span};

use super::{control_flow, fail, suffix, word, TomoParserError};

/// Matches one binary operator, longest first. Word operators respect
/// identifier boundaries.
pub fn match_binary_operator(input: NomSpan<'_>) -> IResult<NomSpan<'_>, BinOp, TomoParserError<'_>> {
    let symbolic: &[(&str, BinOp)] = &[
        ("++", BinOp::Concat),
        ("+", BinOp::Plus),
        ("-", BinOp::Minus),
        ("*", BinOp::Multiply),
        ("/", BinOp::Divide),
        ("^", BinOp::Power),
        ("<<<", BinOp::UnsignedLeftShift),
        ("<<", BinOp::LeftShift),
        ("<>", BinOp::Compare),
        ("<=", BinOp::LessThanOrEquals),
        ("<", BinOp::LessThan),
        (">>>", BinOp::UnsignedRightShift),
        (">>", BinOp::RightShift),
        (">=", BinOp::GreaterThanOrEquals),
        (">", BinOp::GreaterThan),
        ("!=", BinOp::NotEquals),
        ("==", BinOp::Equals),
    ];
    for (symbol, op) in symbolic {
        if let Ok((rest, _)) = tag::<_, _, TomoParserError>(*symbol).parse(input.clone()) {
            // `=` after `==` would make this an assignment-looking token
            if *symbol == "==" && rest.fragment().starts_with('=') {
                continue;
            }
            // `=` after an operator is its update form, not the operator
            if rest.fragment().starts_with('=') && !matches!(*op, BinOp::LessThanOrEquals | BinOp::GreaterThanOrEquals | BinOp::Equals | BinOp::NotEquals | BinOp::Compare) {
                continue;
            }
            return Ok((rest, *op));
        }
    }
    let words: &[(&str, BinOp)] = &[
        ("and", BinOp::And),
        ("or", BinOp::Or),
        ("xor", BinOp::Xor),
        ("mod1", BinOp::Mod1),
        ("mod", BinOp::Mod),
        ("_min_", BinOp::Min),
        ("_max_", BinOp::Max),
    ];
    for (keyword, op) in words {
        if let Ok((rest, _)) = word(keyword).parse(input.clone()) {
            if rest.fragment().starts_with('=') {
                continue;
            }
            return Ok((rest, *op));
        }
    }
    Err(Err::Error(VerboseError {
        errors: vec![(input, VerboseErrorKind::Context("binary operator"))],
    }))
}

/// Matches an update-assignment operator (`+=`, `and=`, ...), returning the
/// underlying binary operator.
pub fn match_update_operator(input: NomSpan<'_>) -> IResult<NomSpan<'_>, BinOp, TomoParserError<'_>> {
    let table: &[(&str, BinOp)] = &[
        ("++=", BinOp::Concat),
        ("+=", BinOp::Plus),
        ("-=", BinOp::Minus),
        ("*=", BinOp::Multiply),
        ("/=", BinOp::Divide),
        ("^=", BinOp::Power),
        ("<<<=", BinOp::UnsignedLeftShift),
        ("<<=", BinOp::LeftShift),
        (">>>=", BinOp::UnsignedRightShift),
        (">>=", BinOp::RightShift),
        ("and=", BinOp::And),
        ("or=", BinOp::Or),
        ("xor=", BinOp::Xor),
        ("mod1=", BinOp::Mod1),
        ("mod=", BinOp::Mod),
    ];
    for (symbol, op) in table {
        if let Ok((rest, _)) = tag::<_, _, TomoParserError>(*symbol).parse(input.clone()) {
            return Ok((rest, *op));
        }
    }
    Err(Err::Error(VerboseError {
        errors: vec![(input, VerboseErrorKind::Context("update operator"))],
    }))
}

/// Consumes spaces plus any `..` line continuations: a following line that
/// is indented deeper than the expression's first line and starts with `..`
/// folds into the current expression.
fn continuation<'base>(
    input: NomSpan<'base>,
    base_indent: usize,
) -> IResult<NomSpan<'base>, (), TomoParserError<'base>> {
    let (mut rest, _) = spaces(input)?;
    loop {
        let fragment = rest.fragment();
        let Some(after_newline) = fragment.strip_prefix('\n').or_else(|| fragment.strip_prefix("\r\n")) else {
            return Ok((rest, ()));
        };
        let code = rest.extra.file.code();
        let line_start = rest.location_offset() + (fragment.len() - after_newline.len());
        let Some(next_indent) = indent_of_line(code, line_start.min(code.len())) else {
            return Ok((rest, ()));
        };
        // Peek at the continuation line without committing
        let trimmed = after_newline.trim_start_matches([' ', '\t']);
        if next_indent > base_indent && trimmed.starts_with("..") {
            let eaten = fragment.len() - trimmed.len() + 2;
            let (after, _) = rest.take_split(eaten);
            let (after, _) = spaces(after)?;
            rest = after;
        } else {
            return Ok((rest, ()));
        }
    }
}

fn parse_min_max_key<'base>(
    input: NomSpan<'base>,
) -> IResult<NomSpan<'base>, Option<Ast<'base>>, TomoParserError<'base>> {
    // The key is a suffix chain hung off an implicit `$` variable, written
    // tight against the operator: `a _max_.abs() b`
    if !(input.fragment().starts_with('.') || input.fragment().starts_with('[')) {
        return Ok((input, None));
    }
    let span: Span = (&input).into();
    let implicit = Ast::new(Span::new(span.position.start..span.position.start, span.state.clone()), AstKind::Var("$".into()));
    let (rest, keyed) = suffix::parse_suffix_chain(input, implicit)?;
    match keyed.kind {
        AstKind::Var(_) => Ok((rest, None)),
        _ => Ok((rest, Some(keyed))),
    }
}

fn parse_infix<'base>(
    input: NomSpan<'base>,
    min_tightness: u8,
    seen_comparison: &mut bool,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let base_indent = line_indent(&input).unwrap_or(0);
    let (mut input, mut lhs) = suffix::parse_term(input)?;

    loop {
        let Ok((rest, _)) = continuation(input.clone(), base_indent) else { break };
        let Ok((rest, op)) = match_binary_operator(rest) else { break };
        if op.tightness() < min_tightness {
            break;
        }
        if op.is_comparison() || op.is_min_max() {
            if *seen_comparison {
                return fail(
                    input,
                    "Comparison operators can't be chained; use parentheses to disambiguate",
                );
            }
            *seen_comparison = true;
        }
        let (rest, key) = if op.is_min_max() {
            parse_min_max_key(rest)?
        } else {
            (rest, None)
        };
        let (rest, _) = continuation(rest, base_indent)?;
        let next_min = if op.is_right_associative() { op.tightness() } else { op.tightness() + 1 };
        let Ok((rest, rhs)) = parse_infix(rest, next_min, seen_comparison) else { break };
        let span = lhs.span.to(&rhs.span);
        lhs = Ast::new(span, AstKind::BinaryOp(Box::new(BinaryOperation { op, lhs, rhs, key })));
        input = rest;
    }
    Ok((input, lhs))
}

/// Parses a plain infix expression (no block-bearing forms).
pub fn parse_expression(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let mut seen_comparison = false;
    parse_infix(input, 1, &mut seen_comparison)
}

/// Parses an extended expression: a block-bearing form (`if`, `when`,
/// `for`, `while`, `repeat`, `do`, `C_code`), or an infix expression with an
/// optional postfix conditional (`value if cond else other`).
pub fn parse_extended_expression<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (input, _) = spaces(input)?;
    super::try_parser!(control_flow::parse_block_expression(input.clone(), indent));
    let (rest, value) = parse_expression(input)?;
    // Postfix conditional
    let (rest_spaces, _) = spaces(rest.clone())?;
    if let Ok((after_if, _)) = word("if").parse(rest_spaces) {
        let (after_cond, condition) = context("I expected a condition for this 'if'", nom::combinator::cut(parse_expression))
            .parse(after_if)?;
        let (after_cond, _) = spaces(after_cond)?;
        let (after_else, _) = context("I expected an 'else' for this conditional expression", nom::combinator::cut(word("else")))
            .parse(after_cond)?;
        let (after_value, else_value) = context("I expected a value for this 'else'", nom::combinator::cut(
            |i| parse_extended_expression(i, indent),
        ))
        .parse(after_else)?;
        let span = value.span.to(&else_value.span);
        return Ok((
            after_value,
            Ast::new(
                span,
                AstKind::If {
                    condition: Box::new(condition),
                    body: Box::new(value),
                    else_body: Some(Box::new(else_value)),
                },
            ),
        ));
    }
    Ok((rest, value))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::{NomSpan, State};

    use super::*;

    fn parse_to_string(code: &str) -> String {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_expression(input).unwrap();
        ast.to_string()
    }

    #[rstest]
    #[case("1", "1")]
    #[case("1-2", "(1 - 2)")]
    #[case("1+2", "(1 + 2)")]
    #[case("(1+2)", "(1 + 2)")]
    #[case("  1 / 2  ", "(1 / 2)")]
    #[case("2 + 3 * 4", "(2 + (3 * 4))")]
    #[case("2 * 3 + 4", "((2 * 3) + 4)")]
    #[case("2 ^ 3 ^ 4", "(2 ^ (3 ^ 4))")]
    #[case("1 + 2 - 3", "((1 + 2) - 3)")]
    #[case("1 << 2 + 3", "(1 << (2 + 3))")]
    #[case("a and b or c", "((a and b) or c)")]
    #[case("x mod 3", "(x mod 3)")]
    #[case("x mod1 3", "(x mod1 3)")]
    #[case("a ++ b", "(a ++ b)")]
    #[case("a <> b", "(a <> b)")]
    #[case("a _min_ b", "(a _min_ b)")]
    fn binary_test(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(parse_to_string(code), expected, "{code}");
    }

    #[rstest]
    #[case("1 - 10 == 20", "((1 - 10) == 20)")]
    #[case("1 - 10 == 20 * 4", "((1 - 10) == (20 * 4))")]
    #[case("20 mod 10 == 10 and 30 > 20", "(((20 mod 10) == 10) and (30 > 20))")]
    #[case("a < b and c < d", "((a < b) and (c < d))")]
    fn comparison_test(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(parse_to_string(code), expected, "{code}");
    }

    #[rstest]
    #[case("a < b < c")]
    #[case("a == b == c")]
    #[case("a <= b > c")]
    #[case("a _min_ b < c")]
    #[case("a < b _max_ c")]
    fn chained_comparisons_fail(#[case] code: &str) {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        assert!(
            matches!(parse_expression(input), Err(nom::Err::Failure(_))),
            "expected failure for {code}"
        );
    }

    #[test]
    fn parenthesized_comparisons_are_fine() {
        assert_eq!(parse_to_string("(a < b) == (c < d)"), "((a < b) == (c < d))");
    }

    #[test]
    fn precedence_printing_is_idempotent() {
        let code = "2*2/ 2 * 22 - 2 - ( 5 - 1) + 3";
        let printed = parse_to_string(code);
        assert_eq!(printed, "((((((2 * 2) / 2) * 22) - 2) - (5 - 1)) + 3)");
        assert_eq!(parse_to_string(&printed), printed);
    }

    #[test]
    fn min_max_key_is_parsed() {
        let printed = parse_to_string("a _max_.size b");
        assert_eq!(printed, "(a _max_ $.size b)");
    }

    #[test]
    fn postfix_conditional() {
        let state = State::new(SourceFile::new(vec!["<memory>".into()], "n if n > 1 else 0".to_string()));
        let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
        let (_, ast) = parse_extended_expression(input, 0).unwrap();
        assert!(matches!(ast.kind, crate::ast::AstKind::If { .. }));
    }
}
