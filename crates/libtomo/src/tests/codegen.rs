//! Golden checks on the emitted C text: defer ordering, loop lowering,
//! cache wrappers, mangling and the module initializer.

use super::emit;

#[test]
fn defers_replay_in_reverse_order() {
    let code = "\
func demo()
    defer say(\"a\")
    defer say(\"b\")
    say(\"c\")
";
    emit(code, |output| {
        let body = &output.implementation;
        let c = body.find("say(Text(\"c\"))").expect("c is emitted");
        let b = body[c..].find("say(Text(\"b\"))").expect("b after c") + c;
        let a = body[b..].find("say(Text(\"a\"))").expect("a after b") + b;
        assert!(c < b && b < a, "defers must run c, b, a:\n{body}");
    });
}

#[test]
fn returns_unwind_deferred_blocks() {
    let code = "\
func demo(-> Int)
    defer say(\"cleanup\")
    return 1
";
    emit(code, |output| {
        let body = &output.implementation;
        let cleanup = body.find("say(Text(\"cleanup\"))").expect("cleanup is emitted");
        let ret = body[cleanup..].find("return ").expect("return after cleanup") + cleanup;
        assert!(cleanup < ret, "the deferred block must run before returning:\n{body}");
    });
}

#[test]
fn comprehensions_lower_to_counted_loops() {
    emit("squares := [x*x for x in 1.to(5)]\n", |output| {
        let body = &output.implementation;
        assert!(body.contains("Int$compare_value"), "counted loop condition:\n{body}");
        assert!(body.contains("Int$plus"), "counted loop increment:\n{body}");
        assert!(body.contains("List$insert"), "accumulator insert:\n{body}");
    });
}

#[test]
fn cached_functions_get_wrappers() {
    let code = "\
func fib(n:Int -> Int; cache, cache_size=128)
    return fib(n-1) + fib(n-2) if n > 1 else n
";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("static Int_t main$fib$uncached(Int_t _$n);"), "uncached prototype:\n{body}");
        assert!(body.contains("typedef struct { Int_t _$n; } main$fib$args_t;"), "key struct:\n{body}");
        assert!(body.contains("static Table_t main$fib$cache"), "module-local cache:\n{body}");
        assert!(body.contains("Cache$get(&main$fib$cache"), "lookup:\n{body}");
        assert!(body.contains(">= 128) Cache$evict_random"), "bounded eviction:\n{body}");
        assert!(body.contains("main$fib$uncached("), "miss calls the uncached body:\n{body}");
    });
}

#[test]
fn name_mangling_is_injective_across_namespaces() {
    let code = "\
struct A(n:Int)
    func get(self:A -> Int)
        return self.n
struct B(n:Int)
    func get(self:B -> Int)
        return self.n
";
    emit(code, |output| {
        assert!(output.implementation.contains("main$A$get"), "{}", output.implementation);
        assert!(output.implementation.contains("main$B$get"), "{}", output.implementation);
    });
}

#[test]
fn when_lowers_to_a_tag_switch() {
    let code = "\
enum Shape(Circle(r:Num), Square(s:Num))
func area(shape:Shape -> Num)
    return when shape is Circle(r) then r * r * 3.14 is Square(s) then s * s
";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("switch ("), "{body}");
        assert!(body.contains("case main$Shape$tag$Circle:"), "{body}");
        assert!(body.contains("case main$Shape$tag$Square:"), "{body}");
        // Arm bindings destructure the payload
        assert!(body.contains(".Circle.r;"), "{body}");
    });
}

#[test]
fn enums_emit_tag_constructors_and_info() {
    let code = "enum Shape(Circle(r:Num), Square(s:Num))\n";
    emit(code, |output| {
        assert!(output.header.contains("main$Shape$$type main$Shape$tagged$Circle(Num_t r);"), "{}", output.header);
        assert!(output.implementation.contains("main$Shape$tagged$Circle"), "{}", output.implementation);
        assert!(output.implementation.contains("main$Shape$$info"), "{}", output.implementation);
        assert!(output.implementation.contains("Enum$metamethods"), "{}", output.implementation);
        // Tag values start at 1; 0 is the optional none sentinel
        assert!(output.header.contains("main$Shape$tag$Circle = 1"), "{}", output.header);
    });
}

#[test]
fn optional_narrowing_checks_the_sentinel() {
    let code = "\
func maybe(-> Int?)
    return 42?
func demo()
    if y := maybe()
        say(\"$y\")
";
    emit(code, |output| {
        let body = &output.implementation;
        // BigInt optionals use the zero small-int sentinel
        assert!(body.contains(".small == 0)"), "{body}");
    });
}

#[test]
fn doctests_lower_to_test_calls() {
    let code = ">> 1 + 2\n= 3\n";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("test(stack("), "{body}");
        assert!(body.contains("Text(\"3\")"), "{body}");
    });
}

#[test]
fn top_level_values_initialize_in_dependency_order() {
    let code = "b := a + 1\na := 1\n";
    emit(code, |output| {
        let body = &output.implementation;
        let init = body.find("_$main$$initialize").expect("initializer exists");
        let a = body[init..].find("main$a = ").expect("a is initialized") + init;
        let b = body[init..].find("main$b = ").expect("b is initialized") + init;
        assert!(a < b, "a must initialize before b:\n{body}");
    });
}

#[test]
fn structs_construct_with_compound_literals() {
    let code = "struct Vec2(x:Num, y:Num)\nv := Vec2(1.0, 2.0)\n";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("(struct main$Vec2$$struct){.x=1.0, .y=2.0}"), "{body}");
    });
}

#[test]
fn lambdas_lift_to_static_functions() {
    let code = "\
func make_adder(n:Int -> func(x:Int -> Int))
    return func(x:Int) x + n
";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("main$lambda$"), "lifted lambda:\n{body}");
        assert!(body.contains("$userdata_t"), "capture struct:\n{body}");
        assert!(body.contains("Closure_t"), "closure value:\n{body}");
        assert!(body.contains("GC_MALLOC"), "captures are heap-allocated:\n{body}");
    });
}

#[test]
fn while_loops_emit_skip_and_stop_labels() {
    let code = "\
func demo()
    x := 0
    while x < 10
        x += 1
        if x == 5
            skip
        if x == 8
            stop
";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("goto "), "loop controls lower to gotos:\n{body}");
        assert!(body.contains("_$_skip_"), "{body}");
        assert!(body.contains("_$_stop_"), "{body}");
    });
}

#[test]
fn for_else_runs_only_when_empty() {
    let code = "\
func demo(xs:[Int])
    for x in xs
        say(\"$x\")
    else
        say(\"empty\")
";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("Bool_t _$_ran_"), "{body}");
        assert!(body.contains("if (!_$_ran_"), "{body}");
    });
}

#[test]
fn text_interpolation_stringifies_values() {
    let code = "x := 42\nmessage := \"x is $x\"\n";
    emit(code, |output| {
        let body = &output.implementation;
        assert!(body.contains("Texts("), "{body}");
        assert!(body.contains("generic_as_text"), "{body}");
    });
}

#[test]
fn langs_emit_typedefs_and_info() {
    let code = "lang Sh\n";
    emit(code, |output| {
        assert!(output.header.contains("typedef Text_t main$Sh$$type;"), "{}", output.header);
        assert!(output.implementation.contains("main$Sh$$info"), "{}", output.implementation);
        assert!(output.implementation.contains("Text$metamethods"), "{}", output.implementation);
    });
}

#[test]
fn assert_lowers_to_fail_source() {
    let code = "func demo(x:Int)\n    assert x > 0\n";
    emit(code, |output| {
        assert!(output.implementation.contains("fail_source("), "{}", output.implementation);
    });
}
