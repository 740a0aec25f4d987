//! Expression type inference.
//!
//! `resolve_expression` computes a semantic type for every expression node
//! and records it in the context's `ast_types` table. An optional `hint`
//! carries the expected type inward so literals can settle into narrower
//! types (`x : Int8 = 5`), `none` can find its optional type, and empty
//! containers can adopt their declared item types. Where a value needs a
//! representation change to match its expected type, the promotion is
//! recorded for the emitter.

use std::borrow::Cow;

use crate::ast::{Ast, AstKind, BinOp, BinaryOperation, CallArg};
use crate::nom_tools::SpanInfo;
use crate::tir::context::TirContext;
use crate::tir::error::TirError;
use crate::tir::scope::{Binding, ScopeKind, ScopeLocation};
use crate::tir::int_range_iterator;
use crate::types::{FunctionArg, FunctionType, TypeLocation, TypeValue};

use super::{span_info, statement};

/// Checks that `actual` can be used where `needed` is expected, recording
/// the required promotion on the node.
pub fn coerce<'base>(
    context: &mut TirContext<'base>,
    ast: &Ast<'base>,
    actual: TypeLocation,
    needed: TypeLocation,
) -> Result<(), TirError> {
    if needed == TypeLocation::UNKNOWN || actual == TypeLocation::ABORT {
        return Ok(());
    }
    match context.types.promote(actual, needed) {
        Some(promotion) => {
            context.set_promotion(ast.index, promotion);
            Ok(())
        }
        None => {
            let advice = pointer_advice(context, actual, needed);
            Err(TirError::type_mismatch(
                context.display_type(needed),
                context.display_type(actual),
                &span_info(ast),
                advice,
            ))
        }
    }
}

fn pointer_advice(context: &TirContext<'_>, actual: TypeLocation, needed: TypeLocation) -> Option<String> {
    if let TypeValue::Pointer { pointed, is_stack: false, .. } = context.types.get(needed) {
        if context.types.equal(*pointed, actual) {
            return Some("wrap the value in '@' to heap-allocate it".to_string());
        }
    }
    None
}

/// Looks up a bare name: scope bindings first, then the namespace path of
/// the current scope (so members are visible inside their own namespace).
fn lookup_name<'base>(
    context: &TirContext<'base>,
    scope: ScopeLocation,
    name: &str,
) -> Option<Binding> {
    if let Some(binding) = context.lookup(scope, name) {
        return Some(binding.clone());
    }
    let namespace = &context.scope(scope).namespace;
    for prefix_len in (2..=namespace.len()).rev() {
        let key = namespace[..prefix_len].join(".");
        if let Some(binding) = context.namespace_member(&key, name) {
            return Some(binding.clone());
        }
    }
    None
}

fn unknown_name_error(context: &TirContext<'_>, scope: ScopeLocation, name: &str, span: &SpanInfo) -> TirError {
    let mut similar: Vec<String> = context
        .visible_names(scope)
        .into_iter()
        .filter(|known| known.len() >= 2 && (known.contains(name) || name.contains(known.as_str())))
        .take(4)
        .collect();
    similar.dedup();
    let advice = if similar.is_empty() {
        None
    } else {
        Some(format!("maybe you meant one of: {}", similar.join(", ")))
    };
    TirError::unknown_name(name, span, advice)
}

/// The item type produced by iterating a value, plus how many loop
/// variables the iteration can bind.
pub enum Iteration {
    /// Counted iteration `1..n` over a big integer
    IntUpTo,
    /// List iteration: optional index variable, then the item
    List(TypeLocation),
    Set(TypeLocation),
    Table(TypeLocation, TypeLocation),
    /// An iterator closure returning `Enum{Done, Next(T)}`
    Iterator(TypeLocation),
}

/// Classifies an iterable type per the loop strategies.
pub fn classify_iterable(context: &TirContext<'_>, iter_ty: TypeLocation) -> Option<Iteration> {
    let iter_ty = context.types.value_type(iter_ty);
    match context.types.get(iter_ty) {
        TypeValue::BigInt | TypeValue::Int { .. } => Some(Iteration::IntUpTo),
        TypeValue::List { item } => Some(Iteration::List(*item)),
        TypeValue::Set { item } => Some(Iteration::Set(*item)),
        TypeValue::Table { key, value, .. } => Some(Iteration::Table(*key, *value)),
        TypeValue::Closure { .. } | TypeValue::Function(_) => {
            let function = match context.types.get(iter_ty) {
                TypeValue::Closure { function } => *function,
                _ => iter_ty,
            };
            let TypeValue::Function(signature) = context.types.get(function) else {
                return None;
            };
            let TypeValue::Enum(iterated) = context.types.get(signature.ret) else {
                return None;
            };
            // The iterator protocol: Done plus a single-field Next payload
            let next = iterated.tags.iter().find(|tag| tag.name == "Next")?;
            let payload = next.payload?;
            let TypeValue::Struct(s) = context.types.get(payload) else {
                return None;
            };
            Some(Iteration::Iterator(s.fields.first()?.ty))
        }
        _ => None,
    }
}

fn fits_in(value: i128, ty: &TypeValue<'_>) -> bool {
    match ty {
        TypeValue::Int { bits: 8 } => i8::try_from(value).is_ok(),
        TypeValue::Int { bits: 16 } => i16::try_from(value).is_ok(),
        TypeValue::Int { bits: 32 } => i32::try_from(value).is_ok(),
        TypeValue::Int { bits: 64 } => i64::try_from(value).is_ok(),
        TypeValue::Byte => u8::try_from(value).is_ok(),
        TypeValue::BigInt => true,
        _ => false,
    }
}

/// Resolves the type of an expression. `hint` is the expected type from
/// the surrounding context, when one exists.
pub fn resolve_expression<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
    hint: Option<TypeLocation>,
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let ty = match &ast.kind {
        AstKind::None { type_hint } => {
            let inner = match type_hint {
                Some(type_ast) => super::resolve_type_ast(context, scope, type_ast)?,
                None => match hint {
                    Some(hinted) => hinted,
                    None => return Err(TirError::none_needs_type_hint(&span)),
                },
            };
            context.types.optional_of(inner)
        }
        AstKind::Bool(_) => TypeLocation::BOOL,
        AstKind::Int { digits, base } => {
            match hint.map(|h| context.types.get(h).clone()) {
                Some(TypeValue::Num { bits }) => {
                    if bits == 32 { TypeLocation::NUM32 } else { TypeLocation::NUM }
                }
                Some(target @ (TypeValue::Int { .. } | TypeValue::Byte)) => {
                    // Known literal: narrowing is checked at compile time
                    let value = i128::from_str_radix(digits, *base)
                        .map_err(|_| TirError::integer_out_of_range(digits.to_string(), "Int".into(), &span))?;
                    if !fits_in(value, &target) {
                        return Err(TirError::integer_out_of_range(
                            digits.to_string(),
                            context.display_type(hint.expect("hint is set")),
                            &span,
                        ));
                    }
                    hint.expect("hint is set")
                }
                _ => TypeLocation::BIG_INT,
            }
        }
        AstKind::Num(_) => match hint.map(|h| context.types.get(h).clone()) {
            Some(TypeValue::Num { bits: 32 }) => TypeLocation::NUM32,
            _ => TypeLocation::NUM,
        },
        AstKind::TextLiteral(_) => TypeLocation::TEXT,
        AstKind::TextJoin { lang, chunks } => {
            for chunk in chunks {
                resolve_expression(context, scope, chunk, None)?;
            }
            match lang {
                Some(lang) => {
                    let name = lang.to_string();
                    super::resolve_named_type(context, scope, &name, &span)?
                }
                None => TypeLocation::TEXT,
            }
        }
        AstKind::PathLiteral(_) => {
            // Paths are the built-in `Path` text sublanguage when it is in
            // scope, plain text otherwise
            match context.lookup_type_name("Path") {
                Some(path) => path,
                None => TypeLocation::TEXT,
            }
        }
        AstKind::Var(name) => match lookup_name(context, scope, name) {
            Some(binding) => binding.ty,
            None => return Err(unknown_name_error(context, scope, name, &span)),
        },

        AstKind::BinaryOp(op) => resolve_binary_op(context, scope, ast, op, hint)?,
        AstKind::UpdateAssign(op) => {
            statement::check_assignable(context, scope, &op.lhs)?;
            let lhs = resolve_expression(context, scope, &op.lhs, None)?;
            if !op.op.has_update_form() {
                return Err(TirError::invalid_operand(
                    format!("{}=", op.op.operator_str()),
                    context.display_type(lhs),
                    &span,
                ));
            }
            let rhs = resolve_expression(context, scope, &op.rhs, Some(lhs))?;
            coerce(context, &op.rhs, rhs, lhs)?;
            TypeLocation::VOID
        }
        AstKind::Not(value) => {
            let inner = resolve_expression(context, scope, value, Some(TypeLocation::BOOL))?;
            match context.types.get(inner) {
                TypeValue::Bool => TypeLocation::BOOL,
                TypeValue::Int { .. } | TypeValue::Byte | TypeValue::BigInt => inner,
                TypeValue::Optional { .. } => {
                    // `not x` on an optional is the "is none" test
                    context.set_promotion(value.index, crate::types::Promotion::OptionalTruthiness);
                    TypeLocation::BOOL
                }
                _ => {
                    return Err(TirError::invalid_operand("not", context.display_type(inner), &span));
                }
            }
        }
        AstKind::Negative(value) => {
            let inner = resolve_expression(context, scope, value, hint)?;
            if !context.types.is_numeric(inner) {
                return Err(TirError::invalid_operand("-", context.display_type(inner), &span));
            }
            inner
        }
        AstKind::HeapAllocate(value) => {
            if matches!(value.kind, AstKind::StackReference(_)) {
                return Err(TirError::stack_reference_escape(&span));
            }
            let inner = resolve_expression(context, scope, value, None)?;
            context.types.pointer_to(inner, false)
        }
        AstKind::StackReference(value) => {
            let inner = resolve_expression(context, scope, value, None)?;
            // A reference into an already-heap value is itself heap-backed
            let is_stack = !refers_through_heap(context, value);
            context.types.pointer_to(inner, is_stack)
        }
        AstKind::Optional(value) => {
            let inner = resolve_expression(context, scope, value, None)?;
            context.set_promotion(value.index, crate::types::Promotion::WrapOptional(inner));
            context.types.optional_of(inner)
        }
        AstKind::NonOptional(value) => {
            let inner = resolve_expression(context, scope, value, None)?;
            match context.types.get(inner) {
                TypeValue::Optional { inner } => *inner,
                _ => {
                    return Err(TirError::type_mismatch(
                        format!("{}?", context.display_type(inner)),
                        context.display_type(inner),
                        &span,
                        Some("'!' only unwraps optional values".to_string()),
                    ));
                }
            }
        }

        AstKind::List(items) => {
            let hint_item = hint.and_then(|h| match context.types.get(h) {
                TypeValue::List { item } => Some(*item),
                _ => None,
            });
            let item = resolve_container_items(context, scope, items, hint_item, &span)?;
            context.types.list_of(item)
        }
        AstKind::Set(items) => {
            let hint_item = hint.and_then(|h| match context.types.get(h) {
                TypeValue::Set { item } => Some(*item),
                _ => None,
            });
            let item = resolve_container_items(context, scope, items, hint_item, &span)?;
            context.types.set_of(item)
        }
        AstKind::Table { entries, fallback, default_value } => {
            let (hint_key, hint_value) = match hint.map(|h| context.types.get(h).clone()) {
                Some(TypeValue::Table { key, value, .. }) => (Some(key), Some(value)),
                _ => (None, None),
            };
            let mut key_ty = hint_key.unwrap_or(TypeLocation::UNKNOWN);
            let mut value_ty = hint_value.unwrap_or(TypeLocation::UNKNOWN);
            for entry in entries {
                let (key, value) = match &entry.kind {
                    AstKind::TableEntry { key, value } => (key.as_ref(), value.as_ref()),
                    AstKind::Comprehension { expr, vars, iter, filter } => {
                        let comp_scope = bind_comprehension_vars(context, scope, vars, iter)?;
                        if let Some(filter) = filter {
                            let filter_ty = resolve_expression(context, comp_scope, filter, Some(TypeLocation::BOOL))?;
                            coerce(context, filter, filter_ty, TypeLocation::BOOL)?;
                        }
                        let AstKind::TableEntry { key, value } = &expr.kind else {
                            return Err(TirError::type_mismatch(
                                "a key=value entry".into(),
                                "something else".into(),
                                &span_info(expr),
                                None,
                            ));
                        };
                        let k = resolve_expression(context, comp_scope, key, hint_key)?;
                        let v = resolve_expression(context, comp_scope, value, hint_value)?;
                        merge_item_type(context, &mut key_ty, k, key)?;
                        merge_item_type(context, &mut value_ty, v, value)?;
                        context.set_type(expr.index, TypeLocation::VOID);
                        context.set_type(entry.index, TypeLocation::VOID);
                        continue;
                    }
                    _ => {
                        return Err(TirError::type_mismatch(
                            "a key=value entry".into(),
                            "something else".into(),
                            &span_info(entry),
                            None,
                        ));
                    }
                };
                check_not_stack_reference(key)?;
                check_not_stack_reference(value)?;
                let k = resolve_expression(context, scope, key, hint_key)?;
                let v = resolve_expression(context, scope, value, hint_value)?;
                merge_item_type(context, &mut key_ty, k, key)?;
                merge_item_type(context, &mut value_ty, v, value)?;
                context.set_type(entry.index, TypeLocation::VOID);
            }
            let table = context.types.add(TypeValue::Table {
                key: key_ty,
                value: value_ty,
                has_default: default_value.is_some(),
            });
            if let Some(default_value) = default_value {
                let default_ty = resolve_expression(context, scope, default_value, Some(value_ty))?;
                coerce(context, default_value, default_ty, value_ty)?;
            }
            if let Some(fallback) = fallback {
                let fallback_ty = resolve_expression(context, scope, fallback, Some(table))?;
                coerce(context, fallback, fallback_ty, table)?;
            }
            table
        }
        AstKind::TableEntry { .. } => {
            return Err(TirError::type_mismatch(
                "a table literal".into(),
                "a bare table entry".into(),
                &span,
                None,
            ));
        }
        AstKind::Comprehension { expr, vars, iter, filter } => {
            // A bare comprehension (list context handles its own)
            let comp_scope = bind_comprehension_vars(context, scope, vars, iter)?;
            if let Some(filter) = filter {
                let filter_ty = resolve_expression(context, comp_scope, filter, Some(TypeLocation::BOOL))?;
                coerce(context, filter, filter_ty, TypeLocation::BOOL)?;
            }
            let item = resolve_expression(context, comp_scope, expr, hint.and_then(|h| match context.types.get(h) {
                TypeValue::List { item } => Some(*item),
                _ => None,
            }))?;
            context.types.list_of(item)
        }

        AstKind::FieldAccess { fielded, field } => resolve_field_access(context, scope, ast, fielded, field)?,
        AstKind::Index { indexed, index, .. } => {
            let target = resolve_expression(context, scope, indexed, None)?;
            let target_value = context.types.value_type(target);
            match (context.types.get(target_value).clone(), index) {
                (_, None) => match context.types.get(target) {
                    TypeValue::Pointer { pointed, .. } => *pointed,
                    _ => {
                        return Err(TirError::type_mismatch(
                            "a pointer".into(),
                            context.display_type(target),
                            &span,
                            Some("only pointers can be dereferenced with '[]'".to_string()),
                        ));
                    }
                },
                (TypeValue::List { item }, Some(index)) => {
                    let index_ty = resolve_expression(context, scope, index, Some(TypeLocation::BIG_INT))?;
                    if !context.types.is_integral(index_ty) {
                        return Err(TirError::type_mismatch(
                            "Int".into(),
                            context.display_type(index_ty),
                            &span_info(index),
                            None,
                        ));
                    }
                    item
                }
                (TypeValue::Table { key, value, has_default }, Some(index)) => {
                    let index_ty = resolve_expression(context, scope, index, Some(key))?;
                    coerce(context, index, index_ty, key)?;
                    if has_default {
                        value
                    } else {
                        context.types.optional_of(value)
                    }
                }
                (other, Some(_)) => {
                    let other_loc = context.types.add(other);
                    return Err(TirError::type_mismatch(
                        "a list or table".into(),
                        context.types.display(other_loc),
                        &span,
                        None,
                    ));
                }
            }
        }

        AstKind::FunctionCall { function, args } => resolve_function_call(context, scope, ast, function, args)?,
        AstKind::MethodCall { target, name, args } => resolve_method_call(context, scope, ast, target, name, args)?,
        AstKind::Lambda(lambda) => {
            let hint_fn = hint.and_then(|h| match context.types.get(h) {
                TypeValue::Closure { function } => match context.types.get(*function) {
                    TypeValue::Function(signature) => Some(signature.clone()),
                    _ => None,
                },
                _ => None,
            });
            let module = context.scope(scope).module.clone();
            let fn_scope = context.create_scope(Some(scope), ScopeKind::Function, module);
            let mut resolved_args = Vec::with_capacity(lambda.args.len());
            for (i, arg) in lambda.args.iter().enumerate() {
                let ty = match (&arg.type_ast, &arg.default_value) {
                    (Some(type_ast), _) => super::resolve_type_ast(context, fn_scope, type_ast)?,
                    (None, Some(default_value)) => resolve_expression(context, fn_scope, default_value, None)?,
                    (None, None) => match hint_fn.as_ref().and_then(|f| f.args.get(i)) {
                        Some(hinted) => hinted.ty,
                        None => {
                            return Err(TirError::type_mismatch(
                                "an annotated parameter".into(),
                                format!("'{}' with no type", arg.name),
                                &(&arg.span).into(),
                                Some("lambda parameters need a type or a default value".to_string()),
                            ));
                        }
                    },
                };
                context.bind(
                    fn_scope,
                    arg.name.clone(),
                    Binding::new(ty, format!("_${}", arg.name)).mutable(),
                );
                resolved_args.push(FunctionArg { name: arg.name.clone(), ty, default: arg.default_value.as_ref().map(|d| d.index) });
            }
            let declared_ret = match &lambda.ret_type {
                Some(type_ast) => Some(super::resolve_type_ast(context, fn_scope, type_ast)?),
                None => hint_fn.as_ref().map(|f| f.ret),
            };
            if let Some(ret) = declared_ret {
                context.scope_mut(fn_scope).fn_return_type = Some(ret);
            }
            let body_ty = statement::resolve_statement(context, fn_scope, &lambda.body)?;
            let ret = match declared_ret {
                Some(declared) => {
                    if declared != TypeLocation::VOID && body_ty != TypeLocation::ABORT {
                        coerce(context, &lambda.body, body_ty, declared)?;
                    }
                    declared
                }
                None => body_ty,
            };
            let function = context.types.add(TypeValue::Function(FunctionType { args: resolved_args, ret }));
            context.types.closure_of(function)
        }
        AstKind::Reduction { iter, op, key } => {
            let iter_ty = resolve_expression(context, scope, iter, None)?;
            let Some(iteration) = classify_iterable(context, iter_ty) else {
                return Err(TirError::not_iterable(context.display_type(iter_ty), &span_info(iter)));
            };
            let item = match iteration {
                Iteration::IntUpTo => TypeLocation::BIG_INT,
                Iteration::List(item) | Iteration::Set(item) | Iteration::Iterator(item) => item,
                Iteration::Table(_, value) => value,
            };
            if let Some(key) = key {
                let key_scope = {
                    let module = context.scope(scope).module.clone();
                    let key_scope = context.create_scope(Some(scope), ScopeKind::Block, module);
                    context.bind(key_scope, Cow::Borrowed("$"), Binding::new(item, "_$_reduce_item"));
                    key_scope
                };
                resolve_expression(context, key_scope, key, None)?;
            }
            if op.is_comparison() {
                TypeLocation::BOOL
            } else if matches!(op, BinOp::And | BinOp::Or | BinOp::Xor)
                && context.types.get(item) == &TypeValue::Bool
            {
                TypeLocation::BOOL
            } else {
                // Reductions over possibly-empty iterables yield an optional
                context.types.optional_of(item)
            }
        }
        AstKind::InlineCCode { chunks, type_ast } => {
            for chunk in chunks {
                if !matches!(chunk.kind, AstKind::TextLiteral(_)) {
                    resolve_expression(context, scope, chunk, None)?;
                }
            }
            match type_ast {
                Some(type_ast) => super::resolve_type_ast(context, scope, type_ast)?,
                None => TypeLocation::VOID,
            }
        }
        AstKind::Deserialize { value, type_ast } => {
            let value_ty = resolve_expression(context, scope, value, None)?;
            let bytes = context.types.list_of(TypeLocation::BYTE);
            coerce(context, value, value_ty, bytes)?;
            super::resolve_type_ast(context, scope, type_ast)?
        }
        AstKind::ExplicitlyTyped { inner, type_location } => {
            resolve_expression(context, scope, inner, Some(*type_location))?;
            *type_location
        }

        // Statement forms that can appear in expression position delegate
        // to the statement resolver
        AstKind::Block(_)
        | AstKind::If { .. }
        | AstKind::When { .. }
        | AstKind::For { .. }
        | AstKind::While { .. }
        | AstKind::Repeat(_)
        | AstKind::Declare { .. }
        | AstKind::Assign { .. }
        | AstKind::Pass
        | AstKind::Skip(_)
        | AstKind::Stop(_)
        | AstKind::Return(_)
        | AstKind::Defer(_)
        | AstKind::Assert { .. }
        | AstKind::DocTest { .. } => return statement::resolve_statement(context, scope, ast),

        AstKind::FunctionDef(_)
        | AstKind::ConvertDef(_)
        | AstKind::StructDef(_)
        | AstKind::EnumDef(_)
        | AstKind::LangDef(_)
        | AstKind::Extend { .. }
        | AstKind::Extern { .. }
        | AstKind::Use { .. } => {
            return Err(TirError::top_level_only(kind_name(&ast.kind), &span));
        }
    };
    Ok(context.set_type(ast.index, ty))
}

fn kind_name(kind: &AstKind<'_>) -> &'static str {
    match kind {
        AstKind::FunctionDef(_) => "function",
        AstKind::ConvertDef(_) => "convert",
        AstKind::StructDef(_) => "struct",
        AstKind::EnumDef(_) => "enum",
        AstKind::LangDef(_) => "lang",
        AstKind::Extend { .. } => "extend",
        AstKind::Extern { .. } => "extern",
        AstKind::Use { .. } => "use",
        _ => "this",
    }
}

fn check_not_stack_reference(ast: &Ast<'_>) -> Result<(), TirError> {
    if matches!(ast.kind, AstKind::StackReference(_)) {
        return Err(TirError::stack_reference_escape(&span_info(ast)));
    }
    Ok(())
}

/// True when the referenced place is reachable through a heap pointer, in
/// which case `&x.field` does not borrow the stack.
fn refers_through_heap(context: &TirContext<'_>, ast: &Ast<'_>) -> bool {
    match &ast.kind {
        AstKind::FieldAccess { fielded, .. } | AstKind::Index { indexed: fielded, .. } => {
            if let Some(ty) = context.try_type_of(fielded) {
                if matches!(context.types.get(ty), TypeValue::Pointer { is_stack: false, .. }) {
                    return true;
                }
            }
            refers_through_heap(context, fielded)
        }
        _ => false,
    }
}

fn resolve_container_items<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    items: &[Ast<'base>],
    hint_item: Option<TypeLocation>,
    _span: &SpanInfo,
) -> Result<TypeLocation, TirError> {
    let mut item_ty = hint_item.unwrap_or(TypeLocation::UNKNOWN);
    for item in items {
        match &item.kind {
            AstKind::Comprehension { expr, vars, iter, filter } => {
                let comp_scope = bind_comprehension_vars(context, scope, vars, iter)?;
                if let Some(filter) = filter {
                    let filter_ty = resolve_expression(context, comp_scope, filter, Some(TypeLocation::BOOL))?;
                    coerce(context, filter, filter_ty, TypeLocation::BOOL)?;
                }
                check_not_stack_reference(expr)?;
                let ty = resolve_expression(context, comp_scope, expr, hint_item)?;
                merge_item_type(context, &mut item_ty, ty, expr)?;
                context.set_type(item.index, TypeLocation::VOID);
            }
            _ => {
                check_not_stack_reference(item)?;
                let ty = resolve_expression(context, scope, item, hint_item)?;
                merge_item_type(context, &mut item_ty, ty, item)?;
            }
        }
    }
    Ok(item_ty)
}

fn merge_item_type<'base>(
    context: &mut TirContext<'base>,
    item_ty: &mut TypeLocation,
    ty: TypeLocation,
    ast: &Ast<'base>,
) -> Result<(), TirError> {
    if *item_ty == TypeLocation::UNKNOWN {
        *item_ty = ty;
        return Ok(());
    }
    coerce(context, ast, ty, *item_ty)
}

/// Binds a comprehension's loop variables into a fresh child scope.
pub fn bind_comprehension_vars<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    vars: &[Ast<'base>],
    iter: &Ast<'base>,
) -> Result<ScopeLocation, TirError> {
    let iter_ty = resolve_expression(context, scope, iter, None)?;
    let Some(iteration) = classify_iterable(context, iter_ty) else {
        return Err(TirError::not_iterable(context.display_type(iter_ty), &span_info(iter)));
    };
    let module = context.scope(scope).module.clone();
    let comp_scope = context.create_scope(Some(scope), ScopeKind::Loop, module);
    statement::bind_loop_vars(context, comp_scope, vars, &iteration, iter)?;
    Ok(comp_scope)
}

fn resolve_binary_op<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
    op: &BinaryOperation<'base>,
    hint: Option<TypeLocation>,
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let lhs = resolve_expression(context, scope, &op.lhs, hint)?;
    let rhs_hint = match op.op {
        BinOp::LeftShift | BinOp::RightShift | BinOp::UnsignedLeftShift | BinOp::UnsignedRightShift => {
            Some(TypeLocation::BIG_INT)
        }
        _ => Some(lhs),
    };
    let rhs = resolve_expression(context, scope, &op.rhs, rhs_hint)?;

    // User-defined operator overloads take precedence on nominal types
    if let Some(method) = op.op.method_name() {
        if let Some(type_name) = context.nominal_name(context.types.value_type(lhs)) {
            if let Some(binding) = context.namespace_member(&type_name, method) {
                let binding = binding.clone();
                if let TypeValue::Function(signature) = context.types.get(binding.ty).clone() {
                    if signature.args.len() == 2 {
                        coerce(context, &op.rhs, rhs, signature.args[1].ty)?;
                        return Ok(signature.ret);
                    }
                }
            }
        }
    }

    match op.op {
        BinOp::Power => {
            for (node, ty) in [(&op.lhs, lhs), (&op.rhs, rhs)] {
                if !context.types.is_numeric(ty) {
                    return Err(TirError::invalid_operand("^", context.display_type(ty), &span_info(node)));
                }
            }
            // Exponentiation always happens in floating point
            Ok(TypeLocation::NUM)
        }
        BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Divide | BinOp::Mod | BinOp::Mod1 => {
            match context.types.common_numeric(lhs, rhs) {
                Some(common) => {
                    record_numeric_promotions(context, op, lhs, rhs, common);
                    Ok(common)
                }
                None => Err(TirError::invalid_operand(
                    op.op.operator_str(),
                    context.display_type(if context.types.is_numeric(lhs) { rhs } else { lhs }),
                    &span,
                )),
            }
        }
        BinOp::Concat => {
            let lhs_value = context.types.value_type(lhs);
            match context.types.get(lhs_value).clone() {
                TypeValue::Text { .. } | TypeValue::List { .. } => {
                    coerce(context, &op.rhs, rhs, lhs_value)?;
                    Ok(lhs_value)
                }
                _ => Err(TirError::invalid_operand("++", context.display_type(lhs), &span)),
            }
        }
        BinOp::LeftShift | BinOp::RightShift | BinOp::UnsignedLeftShift | BinOp::UnsignedRightShift => {
            if !context.types.is_integral(lhs) {
                return Err(TirError::invalid_operand(op.op.operator_str(), context.display_type(lhs), &span));
            }
            if !context.types.is_integral(rhs) {
                return Err(TirError::invalid_operand(op.op.operator_str(), context.display_type(rhs), &span));
            }
            Ok(lhs)
        }
        BinOp::Equals | BinOp::NotEquals => {
            unify_comparison(context, op, lhs, rhs, &span)?;
            Ok(TypeLocation::BOOL)
        }
        BinOp::LessThan | BinOp::LessThanOrEquals | BinOp::GreaterThan | BinOp::GreaterThanOrEquals => {
            let common = unify_comparison(context, op, lhs, rhs, &span)?;
            if !context.types.is_orderable(common) {
                return Err(TirError::not_orderable(context.display_type(common), &span));
            }
            Ok(TypeLocation::BOOL)
        }
        BinOp::Compare => {
            let common = unify_comparison(context, op, lhs, rhs, &span)?;
            if !context.types.is_orderable(common) {
                return Err(TirError::not_orderable(context.display_type(common), &span));
            }
            // `<>` is the three-way comparison
            Ok(TypeLocation::INT32)
        }
        BinOp::Min | BinOp::Max => {
            let common = unify_comparison(context, op, lhs, rhs, &span)?;
            if let Some(key) = &op.key {
                let module = context.scope(scope).module.clone();
                let key_scope = context.create_scope(Some(scope), ScopeKind::Block, module);
                context.bind(key_scope, Cow::Borrowed("$"), Binding::new(common, "_$_key_item"));
                let key_ty = resolve_expression(context, key_scope, key, None)?;
                if !context.types.is_orderable(key_ty) {
                    return Err(TirError::not_orderable(context.display_type(key_ty), &span_info(key)));
                }
            } else if !context.types.is_orderable(common) {
                return Err(TirError::not_orderable(context.display_type(common), &span));
            }
            Ok(common)
        }
        BinOp::And | BinOp::Or | BinOp::Xor => resolve_logical_op(context, op, lhs, rhs, &span),
    }
}

fn record_numeric_promotions<'base>(
    context: &mut TirContext<'base>,
    op: &BinaryOperation<'base>,
    lhs: TypeLocation,
    rhs: TypeLocation,
    common: TypeLocation,
) {
    for (node, ty) in [(&op.lhs, lhs), (&op.rhs, rhs)] {
        if !context.types.equal(ty, common) {
            if let Some(promotion) = context.types.promote(ty, common) {
                context.set_promotion(node.index, promotion);
            }
        }
    }
}

fn unify_comparison<'base>(
    context: &mut TirContext<'base>,
    op: &BinaryOperation<'base>,
    lhs: TypeLocation,
    rhs: TypeLocation,
    span: &SpanInfo,
) -> Result<TypeLocation, TirError> {
    if context.types.equal(lhs, rhs) {
        return Ok(lhs);
    }
    if context.types.promote(lhs, rhs).is_some() {
        record_numeric_promotions(context, op, lhs, rhs, rhs);
        return Ok(rhs);
    }
    if context.types.promote(rhs, lhs).is_some() {
        record_numeric_promotions(context, op, lhs, rhs, lhs);
        return Ok(lhs);
    }
    Err(TirError::type_mismatch(
        context.display_type(lhs),
        context.display_type(rhs),
        span,
        Some(format!("'{}' needs operands of comparable types", op.op.operator_str())),
    ))
}

/// `and`/`or`/`xor` are overloaded over booleans, integers (bitwise) and
/// optionals (none-coalescing).
fn resolve_logical_op<'base>(
    context: &mut TirContext<'base>,
    op: &BinaryOperation<'base>,
    lhs: TypeLocation,
    rhs: TypeLocation,
    span: &SpanInfo,
) -> Result<TypeLocation, TirError> {
    let lhs_value = context.types.get(lhs).clone();
    let rhs_value = context.types.get(rhs).clone();

    // Integer bitwise
    if context.types.is_integral(lhs) && context.types.is_integral(rhs) {
        return match context.types.common_numeric(lhs, rhs) {
            Some(common) => {
                record_numeric_promotions(context, op, lhs, rhs, common);
                Ok(common)
            }
            None => Err(TirError::invalid_operand(op.op.operator_str(), context.display_type(rhs), span)),
        };
    }

    // Optionals: `a or b` yields a's payload when b provides a fallback of
    // the payload type (or aborts); `a and b` yields b's optional type.
    if let TypeValue::Optional { inner } = lhs_value {
        match op.op {
            BinOp::Or => {
                if rhs == TypeLocation::ABORT {
                    return Ok(inner);
                }
                if context.types.equal(rhs, inner) {
                    return Ok(inner);
                }
                if context.types.equal(rhs, lhs) {
                    return Ok(lhs);
                }
                if context.types.promote(rhs, inner).is_some() {
                    record_numeric_promotions(context, op, lhs, rhs, inner);
                    return Ok(inner);
                }
                return Err(TirError::type_mismatch(
                    context.display_type(inner),
                    context.display_type(rhs),
                    span,
                    Some("'or' on an optional needs a fallback of the wrapped type".to_string()),
                ));
            }
            BinOp::And => {
                if matches!(rhs_value, TypeValue::Optional { .. }) || rhs == TypeLocation::ABORT {
                    return Ok(rhs);
                }
                if rhs_value == TypeValue::Bool {
                    context.set_promotion(op.lhs.index, crate::types::Promotion::OptionalTruthiness);
                    return Ok(TypeLocation::BOOL);
                }
                return Err(TirError::type_mismatch(
                    "an optional or Bool".into(),
                    context.display_type(rhs),
                    span,
                    None,
                ));
            }
            _ => {}
        }
    }

    // Boolean logic, allowing optional truthiness on either side
    let mut check_bool = |node: &Ast<'base>, ty: TypeLocation| -> Result<(), TirError> {
        coerce(context, node, ty, TypeLocation::BOOL)
    };
    check_bool(&op.lhs, lhs)?;
    check_bool(&op.rhs, rhs)?;
    Ok(TypeLocation::BOOL)
}

fn resolve_field_access<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
    fielded: &Ast<'base>,
    field: &str,
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let target = resolve_expression(context, scope, fielded, None)?;
    let target_value = context.types.value_type(target);

    match context.types.get(target_value).clone() {
        TypeValue::Struct(s) => {
            if let Some(found) = s.fields.iter().find(|candidate| candidate.name == field) {
                return Ok(found.ty);
            }
            if let Some(binding) = context.namespace_member(&s.name, field) {
                return Ok(binding.ty);
            }
            Err(TirError::missing_field(field, context.display_type(target_value), &span, None))
        }
        TypeValue::Enum(e) => {
            // A field named like a tag is the "is this tag" test
            if e.tags.iter().any(|tag| tag.name == field) {
                return Ok(TypeLocation::BOOL);
            }
            Err(TirError::missing_field(field, context.display_type(target_value), &span, None))
        }
        TypeValue::TypeInfo { name, inner } => {
            if let Some(binding) = context.namespace_member(&name, field) {
                return Ok(binding.ty);
            }
            // Enum tags are namespace members too, but give tag typos a
            // more helpful message
            if let TypeValue::Enum(e) = context.types.get(inner) {
                let tags = e.tags.iter().map(|tag| tag.name.to_string()).collect::<Vec<_>>().join(", ");
                return Err(TirError::missing_field(
                    field,
                    name.to_string(),
                    &span,
                    Some(format!("this enum's tags are: {tags}")),
                ));
            }
            Err(TirError::missing_field(field, name.to_string(), &span, None))
        }
        TypeValue::Module { name } => {
            let module = context.modules.get(name.as_ref()).expect("imported module exists");
            let module_scope = module.scope;
            match context.scope(module_scope).get(field) {
                Some(binding) => Ok(binding.ty),
                None => Err(TirError::missing_field(field, format!("module {name}"), &span, None)),
            }
        }
        TypeValue::List { .. } if field == "length" => Ok(TypeLocation::BIG_INT),
        TypeValue::Set { item } => match field {
            "length" => Ok(TypeLocation::BIG_INT),
            "items" => Ok(context.types.list_of(item)),
            _ => Err(TirError::missing_field(field, context.display_type(target_value), &span, None)),
        },
        TypeValue::Table { key, value, .. } => match field {
            "length" => Ok(TypeLocation::BIG_INT),
            "keys" => Ok(context.types.list_of(key)),
            "values" => Ok(context.types.list_of(value)),
            "fallback" => Ok(context.types.optional_of(target_value)),
            _ => Err(TirError::missing_field(field, context.display_type(target_value), &span, None)),
        },
        TypeValue::Text { .. } if field == "length" => Ok(TypeLocation::BIG_INT),
        other => {
            let other_loc = context.types.add(other);
            Err(TirError::missing_field(
                field,
                context.types.display(other_loc),
                &span,
                None,
            ))
        }
    }
}

/// Matches call-site arguments against a declared parameter list,
/// coercing each matched value. Returns the function's return type.
pub fn check_call_args<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    span: &SpanInfo,
    signature: &FunctionType<'base>,
    args: &[CallArg<'base>],
    skip_params: usize,
) -> Result<TypeLocation, TirError> {
    let params = &signature.args[skip_params.min(signature.args.len())..];
    let mut filled: Vec<bool> = vec![false; params.len()];

    // Named arguments claim their parameters first
    for arg in args.iter().filter(|arg| arg.name.is_some()) {
        let name = arg.name.as_deref().expect("filtered on named");
        let Some(position) = params.iter().position(|param| param.name == name) else {
            return Err(TirError::extra_argument(&span_info(&arg.value)));
        };
        if filled[position] {
            return Err(TirError::extra_argument(&span_info(&arg.value)));
        }
        filled[position] = true;
        let ty = resolve_expression(context, scope, &arg.value, Some(params[position].ty))?;
        coerce(context, &arg.value, ty, params[position].ty)?;
    }

    // Positional arguments fill the leftmost open slots
    let mut cursor = 0usize;
    for arg in args.iter().filter(|arg| arg.name.is_none()) {
        while cursor < filled.len() && filled[cursor] {
            cursor += 1;
        }
        if cursor >= params.len() {
            return Err(TirError::extra_argument(&span_info(&arg.value)));
        }
        filled[cursor] = true;
        let ty = resolve_expression(context, scope, &arg.value, Some(params[cursor].ty))?;
        coerce(context, &arg.value, ty, params[cursor].ty)?;
    }

    for (position, was_filled) in filled.iter().enumerate() {
        if !was_filled && !params[position].has_default() {
            return Err(TirError::missing_argument(params[position].name.to_string(), span));
        }
    }
    Ok(signature.ret)
}

fn resolve_function_call<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
    function: &Ast<'base>,
    args: &[CallArg<'base>],
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let callee = resolve_expression(context, scope, function, None)?;
    match context.types.get(callee).clone() {
        TypeValue::Function(signature) => check_call_args(context, scope, &span, &signature, args, 0),
        TypeValue::Closure { function } => {
            let TypeValue::Function(signature) = context.types.get(function).clone() else {
                return Err(TirError::not_callable(context.display_type(callee), &span));
            };
            check_call_args(context, scope, &span, &signature, args, 0)
        }
        TypeValue::TypeInfo { name, inner } => {
            match context.types.get(inner).clone() {
                // Struct constructor: arguments match the fields
                TypeValue::Struct(s) => {
                    let signature = FunctionType {
                        args: s
                            .fields
                            .iter()
                            .map(|field| FunctionArg { name: field.name.clone(), ty: field.ty, default: None })
                            .collect(),
                        ret: inner,
                    };
                    match check_call_args(context, scope, &span, &signature, args, 0) {
                        Ok(ret) => Ok(ret),
                        Err(first_error) => {
                            // Fall back to any `convert` constructors
                            let converts: Vec<FunctionType> = (0..8)
                                .filter_map(|i| context.namespace_member(&name, &format!("$convert{i}")).cloned())
                                .filter_map(|binding| match context.types.get(binding.ty) {
                                    TypeValue::Function(signature) => Some(signature.clone()),
                                    _ => None,
                                })
                                .collect();
                            for signature in converts {
                                if check_call_args(context, scope, &span, &signature, args, 0).is_ok() {
                                    return Ok(signature.ret);
                                }
                            }
                            Err(first_error)
                        }
                    }
                }
                // Lang constructor: a single text argument
                TypeValue::Text { .. } => {
                    let signature = FunctionType {
                        args: vec![FunctionArg { name: Cow::Borrowed("text"), ty: TypeLocation::TEXT, default: None }],
                        ret: inner,
                    };
                    check_call_args(context, scope, &span, &signature, args, 0)
                }
                _ => Err(TirError::not_callable(name.to_string(), &span)),
            }
        }
        other => {
            let other_loc = context.types.add(other);
            Err(TirError::not_callable(context.types.display(other_loc), &span))
        }
    }
}

fn resolve_method_call<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    ast: &Ast<'base>,
    target: &Ast<'base>,
    name: &str,
    args: &[CallArg<'base>],
) -> Result<TypeLocation, TirError> {
    let span = span_info(ast);
    let target_ty = resolve_expression(context, scope, target, None)?;
    let self_ty = context.types.value_type(target_ty);

    // Calling through a namespace: `Shape.Circle(...)`, `Vec2.zero(...)`
    if let TypeValue::TypeInfo { name: type_name, .. } = context.types.get(self_ty).clone() {
        let Some(binding) = context.namespace_member(&type_name, name).cloned() else {
            return Err(TirError::missing_field(name, type_name.to_string(), &span, None));
        };
        return match context.types.get(binding.ty).clone() {
            TypeValue::Function(signature) => check_call_args(context, scope, &span, &signature, args, 0),
            _ => Err(TirError::not_callable(context.display_type(binding.ty), &span)),
        };
    }

    // User-defined methods on nominal types
    if let Some(type_name) = context.nominal_name(self_ty) {
        if let Some(binding) = context.namespace_member(&type_name, name).cloned() {
            if let TypeValue::Function(signature) = context.types.get(binding.ty).clone() {
                let has_self = signature
                    .args
                    .first()
                    .map(|arg| {
                        context.types.equal(context.types.value_type(arg.ty), self_ty)
                    })
                    .unwrap_or(false);
                let skip = usize::from(has_self);
                return check_call_args(context, scope, &span, &signature, args, skip);
            }
        }
    }

    builtin_method(context, scope, &span, self_ty, target, name, args)
}

/// Built-in methods on the primitive and container types.
fn builtin_method<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    span: &SpanInfo,
    self_ty: TypeLocation,
    _target: &Ast<'base>,
    name: &str,
    args: &[CallArg<'base>],
) -> Result<TypeLocation, TirError> {
    let make =
        |params: Vec<(&'static str, TypeLocation)>, ret: TypeLocation| -> FunctionType<'base> {
            FunctionType {
                args: params
                    .into_iter()
                    .map(|(param, ty)| FunctionArg { name: Cow::Borrowed(param), ty, default: None })
                    .collect(),
                ret,
            }
        };

    let signature = match context.types.get(self_ty).clone() {
        TypeValue::BigInt | TypeValue::Int { .. } => match name {
            "to" => {
                let iterator = int_range_iterator(context);
                Some(make(vec![("last", self_ty)], iterator))
            }
            "abs" => Some(make(vec![], self_ty)),
            "clamped" => Some(make(vec![("low", self_ty), ("high", self_ty)], self_ty)),
            _ => None,
        },
        TypeValue::Num { .. } => match name {
            "abs" | "sqrt" => Some(make(vec![], self_ty)),
            "clamped" => Some(make(vec![("low", self_ty), ("high", self_ty)], self_ty)),
            _ => None,
        },
        TypeValue::List { item } => match name {
            "insert" => Some(make(vec![("item", item)], TypeLocation::VOID)),
            "insert_all" => {
                let list = context.types.list_of(item);
                Some(make(vec![("items", list)], TypeLocation::VOID))
            }
            "pop" => {
                let optional = context.types.optional_of(item);
                Some(make(vec![], optional))
            }
            "has" => Some(make(vec![("item", item)], TypeLocation::BOOL)),
            "reversed" | "sorted" => {
                let list = context.types.list_of(item);
                Some(make(vec![], list))
            }
            "clear" => Some(make(vec![], TypeLocation::VOID)),
            _ => None,
        },
        TypeValue::Set { item } => match name {
            "add" => Some(make(vec![("item", item)], TypeLocation::VOID)),
            "remove" => Some(make(vec![("item", item)], TypeLocation::VOID)),
            "has" => Some(make(vec![("item", item)], TypeLocation::BOOL)),
            _ => None,
        },
        TypeValue::Table { key, value, .. } => match name {
            "get" => {
                let optional = context.types.optional_of(value);
                Some(make(vec![("key", key)], optional))
            }
            "set" => Some(make(vec![("key", key), ("value", value)], TypeLocation::VOID)),
            "remove" => Some(make(vec![("key", key)], TypeLocation::VOID)),
            "has" => Some(make(vec![("key", key)], TypeLocation::BOOL)),
            _ => None,
        },
        TypeValue::Text { .. } => match name {
            "upper" | "lower" | "trimmed" => Some(make(vec![], self_ty)),
            "has" => Some(make(vec![("target", TypeLocation::TEXT)], TypeLocation::BOOL)),
            "replace" => Some(make(
                vec![("target", TypeLocation::TEXT), ("replacement", TypeLocation::TEXT)],
                self_ty,
            )),
            "split" => {
                let list = context.types.list_of(TypeLocation::TEXT);
                Some(make(vec![("separator", TypeLocation::TEXT)], list))
            }
            _ => None,
        },
        _ => None,
    };

    match signature {
        Some(signature) => check_call_args(context, scope, span, &signature, args, 0),
        None => Err(TirError::missing_field(name, context.display_type(self_ty), span, None)),
    }
}
