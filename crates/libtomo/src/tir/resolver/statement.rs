//! Statement resolution: bindings, control flow, loops and `when`
//! exhaustiveness.
//!
//! A statement's type is `Void` unless it is an expression or a branching
//! form whose arms carry values; a block's type is its last statement's
//! type. `Abort` (a `return`, `stop` or `fail`-like statement) never
//! constrains the other branch of an `if`/`when`.

use std::borrow::Cow;

use crate::ast::{Ast, AstKind, FunctionDefAst, ConvertDefAst, WhenClause};
use crate::nom_tools::SpanInfo;
use crate::tir::context::TirContext;
use crate::tir::error::TirError;
use crate::tir::scope::{Binding, ScopeKind, ScopeLocation};
use crate::types::{TypeLocation, TypeValue};

use super::expression::{classify_iterable, coerce, resolve_expression, Iteration};
use super::{mangle, resolve_type_ast, span_info};

/// Resolves one statement, returning its type.
pub fn resolve_statement<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let ty = match &ast.kind {
        AstKind::Block(statements) => {
            let module = context.scope(scope).module.clone();
            let block_scope = context.create_scope(Some(scope), ScopeKind::Block, module);
            let mut last = TypeLocation::VOID;
            for statement in statements {
                last = resolve_statement(context, block_scope, statement)?;
            }
            last
        }
        AstKind::Declare { var, declared_type, value, top_level } => {
            if *top_level {
                // Handled by the dependency-ordered pass; just look it up
                if let AstKind::Var(name) = &var.kind {
                    if let Some(binding) = context.lookup(scope, name) {
                        return Ok(context.set_type(ast.index, binding.ty));
                    }
                }
            }
            let AstKind::Var(name) = &var.kind else {
                return Err(TirError::type_mismatch("a variable".into(), "something else".into(), &span, None));
            };
            let declared = match declared_type {
                Some(type_ast) => Some(resolve_type_ast(context, scope, type_ast)?),
                None => None,
            };
            let ty = match value {
                Some(value) => {
                    let inferred = resolve_expression(context, scope, value, declared)?;
                    match declared {
                        Some(declared) => {
                            coerce(context, value, inferred, declared)?;
                            declared
                        }
                        None => inferred,
                    }
                }
                None => match declared {
                    Some(declared) => declared,
                    None => {
                        return Err(TirError::type_mismatch(
                            "a type or a value".into(),
                            "a bare declaration".into(),
                            &span,
                            None,
                        ));
                    }
                },
            };
            context.bind(
                scope,
                name.clone(),
                Binding::new(ty, format!("_${name}")).mutable().spanned(span.clone()),
            );
            context.set_type(var.index, ty);
            TypeLocation::VOID
        }
        AstKind::Assign { targets, values } => {
            if targets.len() != values.len() {
                return Err(TirError::type_mismatch(
                    format!("{} value(s)", targets.len()),
                    format!("{} value(s)", values.len()),
                    &span,
                    None,
                ));
            }
            for (target, value) in targets.iter().zip(values) {
                check_assignable(context, scope, target)?;
                let target_ty = resolve_expression(context, scope, target, None)?;
                let value_ty = resolve_expression(context, scope, value, Some(target_ty))?;
                coerce(context, value, value_ty, target_ty)?;
            }
            TypeLocation::VOID
        }
        AstKind::If { condition, body, else_body } => {
            let module = context.scope(scope).module.clone();
            let then_scope = context.create_scope(Some(scope), ScopeKind::Block, module);

            match &condition.kind {
                // `if y := maybe()` narrows `y` to the optional's payload
                // in the true branch
                AstKind::Declare { var, value: Some(value), .. } => {
                    let AstKind::Var(name) = &var.kind else {
                        return Err(TirError::type_mismatch("a variable".into(), "something else".into(), &span, None));
                    };
                    let value_ty = resolve_expression(context, then_scope, value, None)?;
                    let TypeValue::Optional { inner } = context.types.get(value_ty).clone() else {
                        return Err(TirError::type_mismatch(
                            "an optional value".into(),
                            context.display_type(value_ty),
                            &span_info(value),
                            Some("only optional-typed conditions can narrow a declared variable".to_string()),
                        ));
                    };
                    context.bind(
                        then_scope,
                        name.clone(),
                        Binding::new(inner, format!("_${name}")).spanned(span_info(condition)),
                    );
                    context.set_type(var.index, inner);
                    context.set_type(condition.index, value_ty);
                }
                _ => {
                    let condition_ty = resolve_expression(context, scope, condition, Some(TypeLocation::BOOL))?;
                    coerce(context, condition, condition_ty, TypeLocation::BOOL)?;
                }
            }

            let body_ty = resolve_statement(context, then_scope, body)?;
            match else_body {
                Some(else_body) => {
                    let else_ty = resolve_statement(context, scope, else_body)?;
                    unify_branches(context, body_ty, else_ty, else_body)?
                }
                None => TypeLocation::VOID,
            }
        }
        AstKind::When { subject, clauses, else_body } => {
            resolve_when(context, scope, ast, subject, clauses, else_body.as_deref())?
        }
        AstKind::For { vars, iter, body, empty } => {
            let iter_ty = resolve_expression(context, scope, iter, None)?;
            let Some(iteration) = classify_iterable(context, iter_ty) else {
                return Err(TirError::not_iterable(context.display_type(iter_ty), &span_info(iter)));
            };
            let module = context.scope(scope).module.clone();
            let loop_scope = context.create_scope(Some(scope), ScopeKind::Loop, module);
            bind_loop_vars(context, loop_scope, vars, &iteration, iter)?;
            resolve_statement(context, loop_scope, body)?;
            if let Some(empty) = empty {
                resolve_statement(context, scope, empty)?;
            }
            TypeLocation::VOID
        }
        AstKind::While { condition, body } => {
            let condition_ty = resolve_expression(context, scope, condition, Some(TypeLocation::BOOL))?;
            coerce(context, condition, condition_ty, TypeLocation::BOOL)?;
            let module = context.scope(scope).module.clone();
            let loop_scope = context.create_scope(Some(scope), ScopeKind::Loop, module);
            resolve_statement(context, loop_scope, body)?;
            TypeLocation::VOID
        }
        AstKind::Repeat(body) => {
            let module = context.scope(scope).module.clone();
            let loop_scope = context.create_scope(Some(scope), ScopeKind::Loop, module);
            resolve_statement(context, loop_scope, body)?;
            TypeLocation::VOID
        }
        AstKind::Pass => TypeLocation::VOID,
        AstKind::Skip(_) | AstKind::Stop(_) => {
            if !context.in_loop(scope) {
                let keyword = if matches!(ast.kind, AstKind::Skip(_)) { "skip" } else { "stop" };
                return Err(TirError::loop_control_outside_loop(keyword, &span));
            }
            TypeLocation::ABORT
        }
        AstKind::Return(value) => {
            let Some(expected) = context.fn_return_type(scope) else {
                return Err(TirError::return_outside_function(&span));
            };
            match value {
                Some(value) => {
                    let value_ty = resolve_expression(context, scope, value, Some(expected))?;
                    coerce(context, value, value_ty, expected)?;
                }
                None => {
                    if expected != TypeLocation::VOID {
                        return Err(TirError::type_mismatch(
                            context.display_type(expected),
                            "Void".into(),
                            &span,
                            Some("this function must return a value".to_string()),
                        ));
                    }
                }
            }
            TypeLocation::ABORT
        }
        AstKind::Defer(body) => {
            let module = context.scope(scope).module.clone();
            let defer_scope = context.create_scope(Some(scope), ScopeKind::Block, module);
            resolve_statement(context, defer_scope, body)?;
            TypeLocation::VOID
        }
        AstKind::Assert { expr, message } => {
            let expr_ty = resolve_expression(context, scope, expr, Some(TypeLocation::BOOL))?;
            coerce(context, expr, expr_ty, TypeLocation::BOOL)?;
            if let Some(message) = message {
                let message_ty = resolve_expression(context, scope, message, Some(TypeLocation::TEXT))?;
                coerce(context, message, message_ty, TypeLocation::TEXT)?;
            }
            TypeLocation::VOID
        }
        AstKind::DocTest { expr, expected, .. } => {
            let value_ty = resolve_statement(context, scope, expr)?;
            if let Some(expected) = expected {
                let expected_ty = resolve_expression(context, scope, expected, Some(value_ty))?;
                coerce(context, expected, expected_ty, value_ty)?;
            }
            TypeLocation::VOID
        }
        _ => return resolve_expression(context, scope, ast, None),
    };
    Ok(context.set_type(ast.index, ty))
}

/// Branch unification: `Abort` never constrains the other side.
fn unify_branches<'base>(
    context: &mut TirContext<'base>,
    a: TypeLocation,
    b: TypeLocation,
    b_node: &Ast<'base>,
) -> Result<TypeLocation, TirError> {
    if a == TypeLocation::ABORT {
        return Ok(b);
    }
    if b == TypeLocation::ABORT {
        return Ok(a);
    }
    if context.types.equal(a, b) {
        return Ok(a);
    }
    if context.types.promote(b, a).is_some() {
        let promotion = context.types.promote(b, a).expect("checked above");
        context.set_promotion(b_node.index, promotion);
        return Ok(a);
    }
    if context.types.promote(a, b).is_some() {
        return Ok(b);
    }
    Err(TirError::type_mismatch(
        context.display_type(a),
        context.display_type(b),
        &span_info(b_node),
        Some("both branches of a conditional must produce the same type".to_string()),
    ))
}

/// Verifies an assignment target is a mutable place.
pub fn check_assignable<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    target: &Ast<'base>,
) -> Result<(), TirError> {
    match &target.kind {
        AstKind::Var(name) => match context.lookup(scope, name) {
            Some(binding) if binding.mutable => Ok(()),
            Some(_) => Err(TirError::assign_to_immutable(name.to_string(), &span_info(target))),
            None => Err(TirError::unknown_name(name.to_string(), &span_info(target), None)),
        },
        AstKind::FieldAccess { fielded, .. } => check_assignable_base(context, scope, fielded),
        AstKind::Index { indexed, .. } => check_assignable_base(context, scope, indexed),
        _ => Err(TirError::type_mismatch(
            "an assignable place".into(),
            "an expression".into(),
            &span_info(target),
            None,
        )),
    }
}

fn check_assignable_base<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    base: &Ast<'base>,
) -> Result<(), TirError> {
    // Writing through a pointer is always allowed; otherwise the base must
    // itself be assignable
    if let Some(ty) = context.try_type_of(base) {
        if matches!(context.types.get(ty), TypeValue::Pointer { .. }) {
            return Ok(());
        }
    }
    match &base.kind {
        AstKind::Var(_) | AstKind::FieldAccess { .. } | AstKind::Index { .. } => {
            check_assignable(context, scope, base)
        }
        _ => Ok(()),
    }
}

/// Binds `for`-loop variables according to the iteration strategy.
pub fn bind_loop_vars<'base>(
    context: &mut TirContext<'base>,
    loop_scope: ScopeLocation,
    vars: &[Ast<'base>],
    iteration: &Iteration,
    iter: &Ast<'base>,
) -> Result<(), TirError> {
    let mut bind = |context: &mut TirContext<'base>, var: &Ast<'base>, ty: TypeLocation| -> Result<(), TirError> {
        let AstKind::Var(name) = &var.kind else {
            return Err(TirError::type_mismatch(
                "a loop variable".into(),
                "something else".into(),
                &span_info(var),
                None,
            ));
        };
        context.bind(loop_scope, name.clone(), Binding::new(ty, format!("_${name}")));
        context.set_type(var.index, ty);
        Ok(())
    };

    match (iteration, vars) {
        (Iteration::IntUpTo, [var]) => bind(context, var, TypeLocation::BIG_INT),
        (Iteration::List(item), [var]) => bind(context, var, *item),
        (Iteration::List(item), [index, var]) => {
            bind(context, index, TypeLocation::BIG_INT)?;
            bind(context, var, *item)
        }
        (Iteration::Set(item), [var]) => bind(context, var, *item),
        (Iteration::Table(key, _), [var]) => bind(context, var, *key),
        (Iteration::Table(key, value), [key_var, value_var]) => {
            bind(context, key_var, *key)?;
            bind(context, value_var, *value)
        }
        (Iteration::Iterator(item), [var]) => bind(context, var, *item),
        _ => Err(TirError::type_mismatch(
            "a matching number of loop variables".into(),
            format!("{} variable(s)", vars.len()),
            &span_info(iter),
            None,
        )),
    }
}

fn resolve_when<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
    subject: &Ast<'base>,
    clauses: &[WhenClause<'base>],
    else_body: Option<&Ast<'base>>,
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let subject_ty = resolve_expression(context, scope, subject, None)?;
    let subject_value = context.types.value_type(subject_ty);

    let mut result: Option<TypeLocation> = None;
    let mut merge = |context: &mut TirContext<'base>, body_ty: TypeLocation, body: &Ast<'base>| -> Result<(), TirError> {
        result = Some(match result {
            Some(previous) => unify_branches(context, previous, body_ty, body)?,
            None => body_ty,
        });
        Ok(())
    };

    if let TypeValue::Enum(enum_type) = context.types.get(subject_value).clone() {
        let mut handled: Vec<&str> = Vec::new();
        for clause in clauses {
            let module = context.scope(scope).module.clone();
            let arm_scope = context.create_scope(Some(scope), ScopeKind::Block, module);
            for pattern in &clause.patterns {
                let tag_name: &str = match &pattern.kind {
                    AstKind::Var(tag_name) => tag_name.as_ref(),
                    AstKind::FunctionCall { function, args } => {
                        let AstKind::Var(tag_name) = &function.kind else {
                            return Err(TirError::type_mismatch(
                                "an enum tag pattern".into(),
                                "something else".into(),
                                &span_info(pattern),
                                None,
                            ));
                        };
                        // Positional pattern variables bind to the tag's
                        // payload fields
                        let tag = enum_type.tags.iter().find(|tag| tag.name == tag_name.as_ref());
                        if let Some(payload) = tag.and_then(|t| t.payload) {
                            let fields = match context.types.get(payload) {
                                TypeValue::Struct(s) => s.fields.clone(),
                                _ => Vec::new(),
                            };
                            for (arg, field) in args.iter().zip(fields) {
                                if let AstKind::Var(var_name) = &arg.value.kind {
                                    context.bind(
                                        arm_scope,
                                        var_name.clone(),
                                        Binding::new(field.ty, format!("_${var_name}")),
                                    );
                                    context.set_type(arg.value.index, field.ty);
                                }
                            }
                        }
                        tag_name.as_ref()
                    }
                    _ => {
                        return Err(TirError::type_mismatch(
                            "an enum tag pattern".into(),
                            "an expression".into(),
                            &span_info(pattern),
                            None,
                        ));
                    }
                };
                if !enum_type.tags.iter().any(|tag| tag.name == tag_name) {
                    let tags = enum_type.tags.iter().map(|tag| tag.name.to_string()).collect::<Vec<_>>().join(", ");
                    return Err(TirError::missing_field(
                        tag_name,
                        context.display_type(subject_value),
                        &span_info(pattern),
                        Some(format!("this enum's tags are: {tags}")),
                    ));
                }
                if handled.contains(&tag_name) {
                    return Err(TirError::duplicate_when_tag(tag_name, &span_info(pattern)));
                }
                handled.push(tag_name);
                context.set_type(pattern.index, subject_value);
            }
            let body_ty = resolve_statement(context, arm_scope, &clause.body)?;
            merge(context, body_ty, &clause.body)?;
        }

        let missing: Vec<String> = enum_type
            .tags
            .iter()
            .filter(|tag| !handled.contains(&tag.name.as_ref()))
            .map(|tag| tag.name.to_string())
            .collect();
        match else_body {
            Some(else_body) => {
                let else_ty = resolve_statement(context, scope, else_body)?;
                merge(context, else_ty, else_body)?;
            }
            None if !missing.is_empty() => {
                return Err(TirError::non_exhaustive_when(missing.join(", "), &span));
            }
            None => {}
        }
    } else {
        // Non-enum subject: arms compare with == against the subject
        for clause in clauses {
            for pattern in &clause.patterns {
                let pattern_ty = resolve_expression(context, scope, pattern, Some(subject_value))?;
                coerce(context, pattern, pattern_ty, subject_value)?;
            }
            let module = context.scope(scope).module.clone();
            let arm_scope = context.create_scope(Some(scope), ScopeKind::Block, module);
            let body_ty = resolve_statement(context, arm_scope, &clause.body)?;
            merge(context, body_ty, &clause.body)?;
        }
        if let Some(else_body) = else_body {
            let else_ty = resolve_statement(context, scope, else_body)?;
            merge(context, else_ty, else_body)?;
        } else {
            result = Some(TypeLocation::VOID);
        }
    }

    Ok(result.unwrap_or(TypeLocation::VOID))
}

/// Resolves a top-level `:=` declaration, binding it into the module
/// scope with its mangled C name.
pub fn resolve_top_level_declare<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    statement: &Ast<'base>,
    module_name: &str,
) -> Result<(), TirError> {
    let AstKind::Declare { var, declared_type, value, .. } = &statement.kind else {
        return Ok(());
    };
    let AstKind::Var(name) = &var.kind else {
        return Ok(());
    };
    let span = span_info(statement);
    let declared = match declared_type {
        Some(type_ast) => Some(resolve_type_ast(context, scope, type_ast)?),
        None => None,
    };
    let ty = match value {
        Some(value) => {
            let inferred = resolve_expression(context, scope, value, declared)?;
            match declared {
                Some(declared) => {
                    coerce(context, value, inferred, declared)?;
                    declared
                }
                None => inferred,
            }
        }
        None => declared.unwrap_or(TypeLocation::UNKNOWN),
    };
    if let Some(existing) = context.scope(scope).get(name) {
        let old_position = existing.span.as_ref().map(|s| s.position.clone()).unwrap_or(0..0);
        return Err(TirError::already_defined(&span, old_position, &span.file));
    }
    context.bind(
        scope,
        name.clone(),
        Binding::new(ty, format!("{}${name}", mangle(module_name))).mutable().spanned(span),
    );
    context.set_type(statement.index, ty);
    context.set_type(var.index, ty);
    Ok(())
}

/// Resolves a top-level function's body.
pub fn resolve_function_body<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    statement: &Ast<'base>,
    def: &FunctionDefAst<'base>,
) -> Result<(), TirError> {
    let function_ty = context
        .try_type_of(statement)
        .expect("signatures are resolved before bodies");
    resolve_body_against(context, scope, def, function_ty)
}

/// Resolves a method body declared inside a type's namespace.
pub fn resolve_method_body<'base>(
    context: &mut TirContext<'base>,
    ns_scope: ScopeLocation,
    statement: &Ast<'base>,
    def: &FunctionDefAst<'base>,
    _type_name: &str,
) -> Result<(), TirError> {
    let function_ty = context
        .try_type_of(statement)
        .expect("signatures are resolved before bodies");
    resolve_body_against(context, ns_scope, def, function_ty)
}

/// Resolves a `convert` constructor's body.
pub fn resolve_convert_body<'base>(
    context: &mut TirContext<'base>,
    ns_scope: ScopeLocation,
    statement: &Ast<'base>,
    def: &ConvertDefAst<'base>,
) -> Result<(), TirError> {
    let function_ty = context
        .try_type_of(statement)
        .expect("signatures are resolved before bodies");
    let TypeValue::Function(signature) = context.types.get(function_ty).clone() else {
        return Ok(());
    };
    let module = context.scope(ns_scope).module.clone();
    let fn_scope = context.create_scope(Some(ns_scope), ScopeKind::Function, module);
    context.scope_mut(fn_scope).fn_return_type = Some(signature.ret);
    for arg in &signature.args {
        context.bind(
            fn_scope,
            Cow::Owned(arg.name.to_string()),
            Binding::new(arg.ty, format!("_${}", arg.name)).mutable(),
        );
    }
    resolve_statement(context, fn_scope, &def.body)?;
    Ok(())
}

fn resolve_body_against<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    def: &FunctionDefAst<'base>,
    function_ty: TypeLocation,
) -> Result<(), TirError> {
    let TypeValue::Function(signature) = context.types.get(function_ty).clone() else {
        return Ok(());
    };
    let module = context.scope(scope).module.clone();
    let fn_scope = context.create_scope(Some(scope), ScopeKind::Function, module);
    context.scope_mut(fn_scope).fn_return_type = Some(signature.ret);
    for arg in &signature.args {
        context.bind(
            fn_scope,
            Cow::Owned(arg.name.to_string()),
            Binding::new(arg.ty, format!("_${}", arg.name)).mutable(),
        );
    }
    resolve_statement(context, fn_scope, &def.body)?;
    Ok(())
}
