//! Checker scenarios: inference, optional narrowing, enum matching,
//! promotion and the diagnostic catalog.

use pretty_assertions::assert_eq;

use crate::ast::{AstKind, BinOp};
use crate::tir::TirError;
use crate::types::TypeLocation;

use super::{check, state_for};

#[test]
fn integer_arithmetic_infers_big_int() {
    let state = state_for("x := 2 + 3 * 4\n");
    let context = check(&state).unwrap();

    // The parsed shape is Declare(x, Plus(2, Multiply(3, 4)))
    let module = context.modules.get("main").unwrap();
    let AstKind::Declare { var, value: Some(value), .. } = &module.ast.statements[0].kind else {
        panic!("expected a declaration");
    };
    let AstKind::BinaryOp(plus) = &value.kind else {
        panic!("expected an addition");
    };
    assert_eq!(plus.op, BinOp::Plus);
    let AstKind::BinaryOp(times) = &plus.rhs.kind else {
        panic!("expected a multiplication on the right");
    };
    assert_eq!(times.op, BinOp::Multiply);

    // And x's type is the default integer: Int (big)
    assert_eq!(context.type_of(var), TypeLocation::BIG_INT);
}

#[test]
fn optional_narrowing_in_if_declarations() {
    let code = "\
func maybe(-> Int?)
    return 42?
func demo()
    if y := maybe()
        say(\"$y\")
    else
        say(\"none\")
";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn narrowed_variable_is_scoped_to_the_true_branch() {
    let code = "\
func maybe(-> Int?)
    return 42?
func demo()
    if y := maybe()
        pass
    say(\"$y\")
";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::UnknownName(_)), "{error:?}");
}

#[test]
fn unnarrowed_optionals_do_not_add() {
    let code = "\
func maybe(-> Int?)
    return 42?
func demo(-> Int)
    return maybe() + 1
";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(
        matches!(error, TirError::InvalidOperand(_) | TirError::TypeMismatch(_)),
        "{error:?}"
    );
}

#[test]
fn enum_matching_unifies_arm_types() {
    let code = "\
enum Shape(Circle(r:Num), Square(s:Num))
func area(shape:Shape -> Num)
    return when shape is Circle(r) then r * r * 3.14 is Square(s) then s * s
";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn non_exhaustive_when_is_reported() {
    let code = "\
enum Shape(Circle(r:Num), Square(s:Num))
func area(shape:Shape -> Num)
    return when shape is Circle(r) then r * r * 3.14
";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::NonExhaustiveWhen(_)), "{error:?}");
}

#[test]
fn duplicate_when_tags_are_reported() {
    let code = "\
enum Shape(Circle(r:Num), Square(s:Num))
func check(shape:Shape -> Num)
    return when shape is Circle(r) then r is Circle(r2) then r2 is Square(s) then s
";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::DuplicateWhenTag(_)), "{error:?}");
}

#[test]
fn when_with_else_need_not_be_exhaustive() {
    let code = "\
enum Shape(Circle(r:Num), Square(s:Num))
func area(shape:Shape -> Num)
    return when shape is Circle(r) then r * r * 3.14 else 0.0
";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn comprehensions_build_lists() {
    let state = state_for("squares := [x*x for x in 1.to(5)]\n");
    let context = check(&state).unwrap();
    let module = context.modules.get("main").unwrap();
    let AstKind::Declare { var, .. } = &module.ast.statements[0].kind else {
        panic!("expected a declaration");
    };
    let ty = context.type_of(var);
    assert_eq!(context.display_type(ty), "[Int]");
}

#[test]
fn literals_narrow_when_the_context_asks() {
    let state = state_for("small : Int8 = 100\n");
    check(&state).unwrap();
}

#[test]
fn out_of_range_literals_are_compile_errors() {
    let state = state_for("small : Int8 = 1000\n");
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::IntegerOutOfRange(_)), "{error:?}");
}

#[test]
fn cached_functions_type_check() {
    let code = "\
func fib(n:Int -> Int; cache, cache_size=128)
    return fib(n-1) + fib(n-2) if n > 1 else n
";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn return_outside_function_is_reported() {
    let state = state_for("return 1\n");
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::ReturnOutsideFunction(_)), "{error:?}");
}

#[test]
fn skip_outside_loop_is_reported() {
    let state = state_for("func f()\n    skip\n");
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::LoopControlOutsideLoop(_)), "{error:?}");
}

#[test]
fn stack_references_may_not_enter_containers() {
    let code = "func f()\n    x := 1\n    bad := [&x]\n";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::StackReferenceEscape(_)), "{error:?}");
}

#[test]
fn immutable_function_bindings_reject_assignment() {
    let code = "func f()\n    pass\nfunc g()\n    f = g\n";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::AssignToImmutable(_)), "{error:?}");
}

#[test]
fn none_without_context_needs_a_hint() {
    let state = state_for("x := none\n");
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::NoneNeedsTypeHint(_)), "{error:?}");
}

#[test]
fn none_with_written_hint_checks() {
    let state = state_for("x := none:Int\n");
    check(&state).unwrap();
}

#[test]
fn extend_blocks_are_not_yet_implemented() {
    let state = state_for("extend Text\n    pass\n");
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::NotYetImplemented(_)), "{error:?}");
}

#[test]
fn missing_struct_fields_are_reported() {
    let code = "struct Vec2(x:Num, y:Num)\nv := Vec2(1.0, 2.0)\nbad := v.z\n";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::MissingField(_)), "{error:?}");
}

#[test]
fn call_arity_is_checked() {
    let code = "func add(x:Int, y:Int -> Int)\n    return x + y\nbad := add(1)\n";
    let state = state_for(code);
    let error = check(&state).unwrap_err();
    assert!(matches!(error, TirError::MissingArgument(_)), "{error:?}");
}

#[test]
fn named_arguments_match_by_name() {
    let code = "func add(x:Int, y:Int -> Int)\n    return x + y\nok := add(y=2, x=1)\n";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn default_arguments_can_be_omitted() {
    let code = "func greet(name:Text = \"world\" -> Text)\n    return \"hi $name\"\nok := greet()\n";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn enum_tag_tests_are_bools() {
    let code = "\
enum Shape(Circle(r:Num), Square(s:Num))
func is_round(shape:Shape -> Bool)
    return shape.Circle
";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn table_indexing_is_optional_without_default() {
    let code = "\
ages := {\"alice\"=30, \"bob\"=25}
func check()
    if age := ages[\"alice\"]
        say(\"$age\")
";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn table_with_default_indexes_plainly() {
    let code = "counts := {\"a\"=1; default=0}\ntotal := counts[\"b\"] + 1\n";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn lambdas_infer_closure_types() {
    let code = "double := func(x:Int) x * 2\nresult := double(21)\n";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn defer_bodies_are_checked() {
    let code = "func f()\n    defer say(\"done\")\n    say(\"working\")\n";
    let state = state_for(code);
    check(&state).unwrap();
}

#[test]
fn reductions_over_comparisons_are_bools() {
    let code = "sorted := (<=: [1, 2, 3])\n";
    let state = state_for(code);
    let context = check(&state).unwrap();
    let module = context.modules.get("main").unwrap();
    let AstKind::Declare { var, .. } = &module.ast.statements[0].kind else {
        panic!("expected a declaration");
    };
    assert_eq!(context.type_of(var), TypeLocation::BOOL);
}

#[test]
fn value_reductions_are_optional() {
    let code = "total := (+: [1, 2, 3])\n";
    let state = state_for(code);
    let context = check(&state).unwrap();
    let module = context.modules.get("main").unwrap();
    let AstKind::Declare { var, .. } = &module.ast.statements[0].kind else {
        panic!("expected a declaration");
    };
    assert_eq!(context.display_type(context.type_of(var)), "Int?");
}
