//! Tomo language parser built on nom combinators.
//!
//! The grammar is hand-written recursive descent expressed as nom parser
//! functions over [`NomSpan`] inputs. Block structure is
//! indentation-sensitive: block parsers receive the indentation (in
//! space-equivalents) of their header line and expect their statements one
//! unit deeper. Backtracking follows nom's convention — `Err::Error`
//! backtracks, `Err::Failure` (after a committed keyword or bracket) aborts
//! with a diagnostic.
//!
//! The parser is organized into specialized submodules:
//! - [`expression`] — precedence climbing over the operator tightness table
//! - [`suffix`] — terms, prefix operators and the postfix suffix chain
//! - [`primitive`] — numbers, booleans, `none`, variables, path literals
//! - [`text`] — text literals with escapes, interpolation and heredocs
//! - [`container`] — lists, sets, tables and comprehensions
//! - [`control_flow`] — `if`/`when`/`for`/`while` and friends
//! - [`function`] — function definitions, lambdas, argument lists
//! - [`type_def`] — `struct`/`enum`/`lang`/`extend`/`extern`/`use`
//! - [`type_info`] — surface type annotations
//! - [`indent`] — indented and inline block plumbing

use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::{opt, verify};
use nom::error::context;
use nom::{Err, Input, IResult, Parser};
use nom_language::error::{VerboseError, VerboseErrorKind};

use crate::ast::{Ast, AstKind, FileAst, TypeAst};
use crate::nom_tools::{line_indent, spaces, whitespace, NomSpan, Span, State};
pub use crate::nom_tools::word;

pub mod container;
pub mod control_flow;
pub mod expression;
pub mod function;
pub mod indent;
pub mod primitive;
pub mod suffix;
pub mod text;
pub mod type_def;
pub mod type_info;

/// Type alias for parser errors with rich context information
pub type TomoParserError<'base> = VerboseError<NomSpan<'base>>;

/// Returns the parser's result on success, propagates committed failures,
/// and falls through to the next alternative on a plain error.
macro_rules! try_parser {
    ($expr:expr) => {
        match $expr {
            Ok(result) => return Ok(result),
            Err(nom::Err::Failure(error)) => return Err(nom::Err::Failure(error)),
            Err(_) => {}
        }
    };
}
pub(crate) use try_parser;

/// Reserved words, sorted. Identifiers are checked against this list with a
/// binary search.
pub static KEYWORDS: &[&str] = &[
    "C_code", "_max_", "_min_", "and", "assert", "break", "continue", "defer", "deserialize", "do", "else", "enum",
    "extend", "extern", "for", "func", "if", "in", "lang", "mod", "mod1", "no", "none", "not", "or", "pass", "return",
    "skip", "stop", "struct", "then", "unless", "use", "when", "while", "xor", "yes",
];

/// True when `name` is a reserved word.
pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.binary_search(&name).is_ok()
}

/// Produces a committed parse failure with a message at the given input.
pub fn fail<'base, T>(input: NomSpan<'base>, message: &'static str) -> IResult<NomSpan<'base>, T, TomoParserError<'base>> {
    Err(Err::Failure(VerboseError {
        errors: vec![(input, VerboseErrorKind::Context(message))],
    }))
}

/// Parses a raw identifier: XID start (alphabetic or `_`) followed by XID
/// continue characters. Does not exclude keywords and eats no whitespace.
pub fn raw_ident(input: NomSpan<'_>) -> IResult<NomSpan<'_>, NomSpan<'_>, TomoParserError<'_>> {
    let (rest, _) = take_while1(|c: char| c == '_' || c.is_alphabetic())(input.clone())?;
    let (rest, _) = take_while(|c: char| c == '_' || c.is_alphanumeric())(rest)?;
    let consumed = input.fragment().len() - rest.fragment().len();
    let (rest, matched) = input.take_split(consumed);
    Ok((rest, matched))
}

/// Parses an identifier that is not a keyword, with leading spaces eaten.
pub fn ident(input: NomSpan<'_>) -> IResult<NomSpan<'_>, NomSpan<'_>, TomoParserError<'_>> {
    let (input, _) = spaces(input)?;
    verify(raw_ident, |name: &NomSpan| !is_keyword(name.fragment())).parse(input)
}

/// Like [`ident`], but commits with a custom message when missing.
pub fn expected_ident<'base>(
    message: &'static str,
    input: NomSpan<'base>,
) -> IResult<NomSpan<'base>, NomSpan<'base>, TomoParserError<'base>> {
    context(message, nom::combinator::cut(ident)).parse(input)
}

/// Parses a variable reference.
pub fn parse_var(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Ast<'_>, TomoParserError<'_>> {
    let (rest, name) = ident(input)?;
    let span: Span = (&name).into();
    Ok((rest, Ast::new(span, AstKind::Var(std::borrow::Cow::Borrowed(name.fragment())))))
}

/// Parses one statement at the given block indentation.
///
/// Definition statements (`struct`, `enum`, `func`, `use`, ...) parse at any
/// level; the checker enforces their top-level-only placement so it can
/// point at the offending line with a proper diagnostic.
pub fn parse_statement<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let (input, _) = spaces(input)?;
    try_parser!(control_flow::parse_doctest(input.clone(), indent));
    try_parser!(type_def::parse_use(input.clone()));
    try_parser!(type_def::parse_struct_def(input.clone(), indent));
    try_parser!(type_def::parse_enum_def(input.clone(), indent));
    try_parser!(type_def::parse_lang_def(input.clone(), indent));
    try_parser!(type_def::parse_extend(input.clone(), indent));
    try_parser!(type_def::parse_extern(input.clone()));
    try_parser!(function::parse_func_def(input.clone(), indent));
    try_parser!(function::parse_convert_def(input.clone(), indent));
    try_parser!(control_flow::parse_control_statement(input.clone(), indent));
    try_parser!(parse_declaration(input.clone(), indent, false));
    try_parser!(parse_update(input.clone(), indent));
    try_parser!(parse_assignment(input.clone(), indent));
    expression::parse_extended_expression(input, indent)
}

/// `x := value` / `x : Type [= value]`
pub fn parse_declaration<'base>(
    input: NomSpan<'base>,
    indent: usize,
    top_level: bool,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let start: Span = (&input).into();
    let (rest, var) = parse_var(input)?;
    let (rest, _) = spaces(rest)?;
    let (rest, _) = tag(":")(rest)?;
    // `x:` must not swallow a `::` or similar
    let (rest, _) = spaces(rest)?;
    let (rest, declared_type) = opt(type_info::parse_type).parse(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, value) = match opt(tag("=")).parse(rest.clone())? {
        (after_eq, Some(_)) => {
            let (after_eq, _) = spaces(after_eq)?;
            let (after_value, value) =
                context("This is not a valid expression", nom::combinator::cut(
                    |i| expression::parse_extended_expression(i, indent),
                ))
                .parse(after_eq)?;
            (after_value, Some(Box::new(value)))
        }
        (rest, None) => {
            if declared_type.is_none() {
                // Bare `x :` with neither type nor value is not a declaration
                return Err(Err::Error(VerboseError {
                    errors: vec![(rest, VerboseErrorKind::Context("declaration"))],
                }));
            }
            (rest, None)
        }
    };
    let end_offset = rest.location_offset();
    let span = Span::new(start.position.start..end_offset, start.state.clone());
    Ok((
        rest,
        Ast::new(span, AstKind::Declare { var: Box::new(var), declared_type, value, top_level }),
    ))
}

/// `lhs op= rhs` in-place update assignments.
pub fn parse_update<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let start: Span = (&input).into();
    let (rest, lhs) = expression::parse_expression(input)?;
    let (rest, _) = spaces(rest)?;
    let (rest, op) = expression::match_update_operator(rest)?;
    let (rest, _) = spaces(rest)?;
    let (rest, rhs) = context("I expected an expression here", nom::combinator::cut(
        |i| expression::parse_extended_expression(i, indent),
    ))
    .parse(rest)?;
    let span = start.to(&rhs.span);
    Ok((
        rest,
        Ast::new(
            span,
            AstKind::UpdateAssign(Box::new(crate::ast::BinaryOperation { op, lhs, rhs, key: None })),
        ),
    ))
}

/// `a, b = x, y` assignments.
pub fn parse_assignment<'base>(
    input: NomSpan<'base>,
    indent: usize,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let start: Span = (&input).into();
    let mut targets = Vec::new();
    let mut rest = input;
    loop {
        let Ok((after, target)) = suffix::parse_term(rest.clone()) else { break };
        targets.push(target);
        let (after, _) = spaces(after)?;
        match opt(tag(",")).parse(after)? {
            (after, Some(_)) => {
                let (after, _) = whitespace(after)?;
                rest = after;
            }
            (after, None) => {
                rest = after;
                break;
            }
        }
    }
    if targets.is_empty() {
        return Err(Err::Error(VerboseError {
            errors: vec![(rest, VerboseErrorKind::Context("assignment"))],
        }));
    }
    let (rest, _) = spaces(rest)?;
    let (rest, _) = tag("=")(rest)?;
    if rest.fragment().starts_with('=') {
        // This is a `==` comparison, not an assignment
        return Err(Err::Error(VerboseError {
            errors: vec![(rest, VerboseErrorKind::Context("assignment"))],
        }));
    }
    let mut values = Vec::new();
    let mut rest = rest;
    loop {
        let (after, _) = spaces(rest.clone())?;
        let Ok((after, value)) = expression::parse_extended_expression(after, indent) else { break };
        values.push(value);
        let (after, _) = spaces(after)?;
        match opt(tag(",")).parse(after)? {
            (after, Some(_)) => {
                let (after, _) = whitespace(after)?;
                rest = after;
            }
            (after, None) => {
                rest = after;
                break;
            }
        }
    }
    if values.is_empty() {
        return fail(rest, "I expected a value for this assignment");
    }
    let end = values.last().map(|v| v.span.clone()).unwrap_or_else(|| start.clone());
    let span = start.to(&end);
    Ok((rest, Ast::new(span, AstKind::Assign { targets, values })))
}

/// Parses a complete Tomo source file into an AST.
///
/// A shebang line on line 1 is skipped. Every top-level statement must
/// begin at indentation zero; anything the statement grammar cannot consume
/// is reported as a committed failure so diagnostics point at the first
/// unparsable line.
pub fn parse<'base>(state: &'base State) -> IResult<NomSpan<'base>, FileAst<'base>, TomoParserError<'base>> {
    let file = state.file.clone();
    let extra = state.clone();

    let input = NomSpan::new_extra(state.file.code().as_str(), extra);
    let (mut input, _) = opt((tag("#!"), take_while(|c| c != '\n'))).parse(input)?;

    let mut statements = Vec::new();
    loop {
        let (rest, _) = whitespace(input.clone())?;
        if rest.fragment().is_empty() {
            input = rest;
            break;
        }
        if line_indent(&rest) != Some(0) {
            return fail(rest, "Top level statements must not be indented");
        }
        let (rest, statement) = parse_statement(rest, 0)?;
        statements.push(promote_declarations(statement));
        input = rest;
    }

    if !input.fragment().is_empty() {
        return fail(input, "Unknown syntax");
    }

    Ok((input, FileAst { file, statements }))
}

/// Marks file-scope declarations as top-level so the checker can order
/// their initializers.
fn promote_declarations(statement: Ast<'_>) -> Ast<'_> {
    match statement.kind {
        AstKind::Declare { var, declared_type, value, .. } => Ast {
            index: statement.index,
            span: statement.span,
            kind: AstKind::Declare { var, declared_type, value, top_level: true },
        },
        _ => statement,
    }
}

/// Parses a single expression (used by tooling and tests).
pub fn parse_expression_entry<'base>(
    state: &'base State,
) -> IResult<NomSpan<'base>, Ast<'base>, TomoParserError<'base>> {
    let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
    let (input, _) = whitespace(input)?;
    expression::parse_extended_expression(input, 0)
}

/// Parses a single type annotation (used by tooling and tests).
pub fn parse_type_entry<'base>(
    state: &'base State,
) -> IResult<NomSpan<'base>, TypeAst<'base>, TomoParserError<'base>> {
    let input = NomSpan::new_extra(state.file.code().as_str(), state.clone());
    let (input, _) = whitespace(input)?;
    type_info::parse_type(input)
}

/// Consumes a separator between container items or argument batches: a
/// comma, or a newline inside brackets.
pub fn match_separator(input: NomSpan<'_>) -> IResult<NomSpan<'_>, bool, TomoParserError<'_>> {
    let (rest, _) = spaces(input)?;
    if let (rest, Some(_)) = opt(tag::<_, _, TomoParserError>(",")).parse(rest.clone())? {
        let (rest, _) = whitespace(rest)?;
        return Ok((rest, true));
    }
    if rest.fragment().starts_with('\n') || rest.fragment().starts_with("\r\n") {
        let (rest, _) = whitespace(rest)?;
        // A closing bracket after the newline is not a separator
        let next = rest.fragment().chars().next();
        let separates = !matches!(next, Some(')') | Some(']') | Some('}') | Some('|') | None);
        return Ok((rest, separates));
    }
    Ok((rest, false))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::file::SourceFile;
    use crate::nom_tools::State;

    use super::*;

    fn state(code: &str) -> State {
        State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()))
    }

    #[test]
    fn keywords_are_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS);
    }

    #[rstest]
    #[case("foo")]
    #[case("_bar")]
    #[case("hello_world")]
    #[case("Vec2")]
    #[case("test123")]
    fn ident_accepts<'base>(#[case] code: &'base str) {
        let st = state(code);
        let input = NomSpan::new_extra(code, st);
        let (_, name) = ident(input).unwrap();
        assert_eq!(*name.fragment(), code);
    }

    #[rstest]
    #[case("func")]
    #[case("while")]
    #[case("none")]
    fn ident_rejects_keywords<'base>(#[case] code: &'base str) {
        let st = state(code);
        let input = NomSpan::new_extra(code, st);
        assert!(ident(input).is_err());
    }

    #[test]
    fn file_parses_several_statements() {
        let code = "x := 1\ny := 2\n";
        let st = state(code);
        let (_, file) = parse(&st).unwrap();
        assert_eq!(file.statements.len(), 2);
        assert!(matches!(file.statements[0].kind, AstKind::Declare { top_level: true, .. }));
    }

    #[test]
    fn shebang_is_skipped() {
        let code = "#!/usr/bin/env tomo\nx := 1\n";
        let st = state(code);
        let (_, file) = parse(&st).unwrap();
        assert_eq!(file.statements.len(), 1);
    }

    #[test]
    fn indented_top_level_fails() {
        let code = "    x := 1\n";
        let st = state(code);
        assert!(parse(&st).is_err());
    }
}
