//! Parser invariants: span containment, precedence idempotence, and the
//! text lexer round-trip.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::ast::{Ast, AstKind};
use crate::nom_tools::NomSpan;
use crate::parser;
use crate::tir::resolver::for_each_child;

use super::state_for;

fn parse_program(code: &str, f: impl FnOnce(&crate::ast::FileAst<'_>)) {
    let state = state_for(code);
    let ast = crate::process_code(&state).unwrap_or_else(|error| panic!("{code}\nfailed to parse: {error:?}"));
    f(&ast);
}

fn assert_spans_nest(parent: &Ast<'_>) {
    for_each_child(parent, &mut |child| {
        // Synthesized nodes (implicit `$` variables, empty blocks) may
        // carry zero-width spans; those are exempt from containment
        if child.span.position.start < child.span.position.end {
            assert!(
                parent.span.position.start <= child.span.position.start
                    && child.span.position.end <= parent.span.position.end,
                "child span {:?} escapes parent span {:?}\nparent: {parent}\nchild: {child}",
                child.span.position,
                parent.span.position,
            );
        }
        assert_spans_nest(child);
    });
}

#[test]
fn spans_nest_inside_their_parents() {
    let code = "\
struct Vec2(x:Num, y:Num)
func norm2(v:Vec2 -> Num)
    return v.x * v.x + v.y * v.y
total := 0.0
for x in [1.5, 2.5, 3.5]
    total += x
";
    parse_program(code, |file| {
        for statement in &file.statements {
            assert_spans_nest(statement);
        }
    });
}

#[rstest]
#[case("1 + 2 * 3 - 4")]
#[case("a and b or not c")]
#[case("x.field[3].method(1, 2)?")]
#[case("(a ++ b) ++ c")]
#[case("-x ^ 2")]
#[case("@val.count + other[]")]
#[case("(a < b) == (c >= d)")]
#[case("x mod 3 _min_ y mod1 7")]
fn precedence_printing_is_idempotent(#[case] code: &str) {
    let state = state_for(code);
    let (_, first) = parser::parse_expression_entry(&state).unwrap();
    let printed = first.to_string();

    let reparse_state = state_for(&printed);
    let (_, second) = parser::parse_expression_entry(&reparse_state).unwrap();
    assert_eq!(second.to_string(), printed, "{code} -> {printed}");
}

#[rstest]
#[case("hello world")]
#[case("tabs\tand\nnewlines")]
#[case("quotes \" and backslashes \\")]
#[case("dollar $ sign")]
fn text_lexer_round_trips(#[case] cooked: &str) {
    // Re-escape the cooked text with the double-quote family, reparse, and
    // expect the same cooked value back
    let state = state_for("x := 1");
    let literal = Ast::new(
        crate::nom_tools::Span::new(0..0, state.clone()),
        AstKind::TextLiteral(cooked.into()),
    );
    let escaped = literal.to_string();

    let reparse_state = state_for(&escaped);
    let input = NomSpan::new_extra(reparse_state.file.code().as_str(), reparse_state.clone());
    let (_, reparsed) = parser::text::parse_text(input).unwrap();
    match &reparsed.kind {
        AstKind::TextLiteral(text) => assert_eq!(text.as_ref(), cooked),
        other => panic!("expected TextLiteral, got {other:?}"),
    }
}

#[test]
fn expression_entry_point_parses_one_expression() {
    let state = state_for("1 + 2");
    let (_, ast) = parser::parse_expression_entry(&state).unwrap();
    assert!(matches!(ast.kind, AstKind::BinaryOp(_)));
}

#[test]
fn type_entry_point_parses_one_type() {
    let state = state_for("{Text=[Int]}?");
    let (_, ty) = parser::parse_type_entry(&state).unwrap();
    assert!(ty.kind.is_optional());
}

#[test]
fn comments_survive_parsing() {
    let code = "# leading note\nx := 1 # trailing note\n";
    let state = state_for(code);
    let _ = crate::process_code(&state).unwrap();
    let comments = state.comments_in(0..code.len());
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].1.text, "leading note");
    assert_eq!(comments[1].1.text, "trailing note");
}

#[test]
fn nested_functions_and_blocks_parse() {
    let code = "\
func outer(x:Int -> Int)
    doubled := x * 2
    if doubled > 10
        return doubled
    else
        return x
";
    parse_program(code, |file| {
        assert_eq!(file.statements.len(), 1);
        assert!(matches!(file.statements[0].kind, AstKind::FunctionDef(_)));
    });
}

#[test]
fn continuation_lines_fold_into_expressions() {
    let code = "total := 1 + 2\n    .. + 3\n";
    parse_program(code, |file| {
        let AstKind::Declare { value: Some(value), .. } = &file.statements[0].kind else {
            panic!("expected a declaration");
        };
        assert_eq!(value.to_string(), "((1 + 2) + 3)");
    });
}
