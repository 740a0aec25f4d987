//! Three-pass semantic resolution.
//!
//! See the module docs on [`crate::tir`] for the pass structure. This file
//! holds the pass drivers, surface-type resolution, name mangling, and the
//! top-level value dependency ordering; expression and statement inference
//! live in the sibling modules.

use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{ArgAst, Ast, AstKind, TypeAst, TypeAstKind, UseKind};
use crate::nom_tools::SpanInfo;
use crate::types::{EnumTag, EnumType, FunctionArg, FunctionType, StructField, StructType, TypeLocation, TypeValue};

use super::context::TirContext;
use super::error::TirError;
use super::module::local_import_name;
use super::scope::{Binding, ScopeKind, ScopeLocation};

pub mod expression;
pub mod statement;

/// The span of an AST node in owned form, for diagnostics.
pub fn span_info(ast: &Ast<'_>) -> SpanInfo {
    (&ast.span).into()
}

/// Turns a dot-qualified name into its emitted C identifier. Distinct
/// qualified names map to distinct identifiers because `.` is the only
/// separator rewritten and `$` cannot appear in source names.
pub fn mangle(qualified: &str) -> String {
    qualified.replace('.', "$")
}

/// Resolves a written type annotation to a semantic type.
pub fn resolve_type_ast<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    type_ast: &TypeAst<'base>,
) -> Result<TypeLocation, TirError> {
    let span: SpanInfo = (&type_ast.span).into();
    match &type_ast.kind {
        TypeAstKind::Unknown => Ok(TypeLocation::UNKNOWN),
        TypeAstKind::Var(name) => resolve_named_type(context, scope, name, &span),
        TypeAstKind::Pointer { pointed, is_stack } => {
            let pointed = resolve_type_ast(context, scope, pointed)?;
            Ok(context.types.pointer_to(pointed, *is_stack))
        }
        TypeAstKind::List(item) => {
            let item = resolve_type_ast(context, scope, item)?;
            Ok(context.types.list_of(item))
        }
        TypeAstKind::Set(item) => {
            let item = resolve_type_ast(context, scope, item)?;
            Ok(context.types.set_of(item))
        }
        TypeAstKind::Table { key, value, default_value } => {
            let key = resolve_type_ast(context, scope, key)?;
            let value = resolve_type_ast(context, scope, value)?;
            if let Some(default_value) = default_value {
                let default_type = expression::resolve_expression(context, scope, default_value, Some(value))?;
                expression::coerce(context, default_value, default_type, value)?;
            }
            Ok(context.types.add(TypeValue::Table { key, value, has_default: default_value.is_some() }))
        }
        TypeAstKind::Function { args, ret } => {
            let function = resolve_function_signature(context, scope, args, Some(ret))?;
            let function = context.types.add(TypeValue::Function(function));
            // A written function type is a closure from the user's point of
            // view; bare function pointers only come from `extern`.
            Ok(context.types.closure_of(function))
        }
        TypeAstKind::Optional(inner) => {
            let inner = resolve_type_ast(context, scope, inner)?;
            Ok(context.types.optional_of(inner))
        }
        TypeAstKind::Enum { name, .. } => {
            resolve_named_type(context, scope, name, &span)
        }
    }
}

/// Resolves a (possibly dotted) type name, walking the scope's namespace
/// path outward before falling back to the raw name.
pub fn resolve_named_type<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    name: &str,
    span: &SpanInfo,
) -> Result<TypeLocation, TirError> {
    let namespace = context.scope(scope).namespace.clone();
    for prefix_len in (0..=namespace.len()).rev() {
        let key = if prefix_len == 0 {
            name.to_string()
        } else {
            format!("{}.{name}", namespace[..prefix_len].join("."))
        };
        if let Some(location) = context.lookup_type_name(&key) {
            return Ok(location);
        }
    }
    Err(TirError::type_not_found(
        context.type_names.keys().cloned(),
        name.to_string(),
        span,
    ))
}

/// Resolves a declared argument list plus return annotation into a
/// function signature.
pub fn resolve_function_signature<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    args: &[ArgAst<'base>],
    ret: Option<&TypeAst<'base>>,
) -> Result<FunctionType<'base>, TirError> {
    let mut resolved = Vec::with_capacity(args.len());
    for arg in args {
        let ty = match (&arg.type_ast, &arg.default_value) {
            (Some(type_ast), _) => resolve_type_ast(context, scope, type_ast)?,
            (None, Some(default_value)) => expression::resolve_expression(context, scope, default_value, None)?,
            (None, None) => TypeLocation::UNKNOWN,
        };
        if let (Some(default_value), Some(_)) = (&arg.default_value, &arg.type_ast) {
            let default_type = expression::resolve_expression(context, scope, default_value, Some(ty))?;
            expression::coerce(context, default_value, default_type, ty)?;
        }
        resolved.push(FunctionArg {
            name: arg.name.clone(),
            ty,
            default: arg.default_value.as_ref().map(|d| d.index),
        });
    }
    let ret = match ret {
        Some(type_ast) => resolve_type_ast(context, scope, type_ast)?,
        None => TypeLocation::VOID,
    };
    Ok(FunctionType { args: resolved, ret })
}

fn namespace_statements<'a, 'base>(namespace: &'a Ast<'base>) -> &'a [Ast<'base>] {
    match &namespace.kind {
        AstKind::Block(statements) => statements,
        _ => &[],
    }
}

/// Pass 1: register every named type in a module as a placeholder and bind
/// imports.
pub fn declare_module_types(context: &mut TirContext<'_>, module_name: &str) -> Result<(), TirError> {
    let module = context.modules.get(module_name).expect("module was registered");
    let ast = Rc::clone(&module.ast);
    let scope = module.scope;
    let mut seen_imports: HashMap<String, std::ops::Range<usize>> = HashMap::new();
    let namespace = vec![module_name.to_string()];
    for statement in &ast.statements {
        declare_statement_types(context, module_name, scope, statement, &namespace, &mut seen_imports)?;
    }
    Ok(())
}

fn declare_statement_types<'base>(
    context: &mut TirContext<'base>,
    module_name: &str,
    scope: ScopeLocation,
    statement: &Ast<'base>,
    namespace: &[String],
    seen_imports: &mut HashMap<String, std::ops::Range<usize>>,
) -> Result<(), TirError> {
    match &statement.kind {
        AstKind::StructDef(def) => {
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let placeholder = context.types.add(TypeValue::Struct(StructType {
                name: Cow::Owned(qualified.clone()),
                fields: Vec::new(),
                secret: def.secret,
                external: def.external,
                opaque: def.opaque,
            }));
            register_named_type(context, scope, statement, &qualified, placeholder, namespace)?;
            let mut inner = namespace.to_vec();
            inner.push(def.name.to_string());
            for nested in namespace_statements(&def.namespace) {
                declare_statement_types(context, module_name, scope, nested, &inner, seen_imports)?;
            }
        }
        AstKind::EnumDef(def) => {
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let placeholder = context.types.add(TypeValue::Enum(EnumType {
                name: Cow::Owned(qualified.clone()),
                tags: Vec::new(),
            }));
            register_named_type(context, scope, statement, &qualified, placeholder, namespace)?;
            let mut inner = namespace.to_vec();
            inner.push(def.name.to_string());
            for nested in namespace_statements(&def.namespace) {
                declare_statement_types(context, module_name, scope, nested, &inner, seen_imports)?;
            }
        }
        AstKind::LangDef(def) => {
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let lang = context.types.add(TypeValue::Text { lang: Some(Cow::Owned(qualified.clone())) });
            register_named_type(context, scope, statement, &qualified, lang, namespace)?;
            let mut inner = namespace.to_vec();
            inner.push(def.name.to_string());
            for nested in namespace_statements(&def.namespace) {
                declare_statement_types(context, module_name, scope, nested, &inner, seen_imports)?;
            }
        }
        AstKind::Use { var, path, what } => {
            let span = span_info(statement);
            match what {
                UseKind::Local | UseKind::Module => {
                    let target = match what {
                        UseKind::Local => local_import_name(path),
                        _ => path.to_string(),
                    };
                    if !context.modules.contains_key(&target) {
                        return Err(TirError::import_not_found(target, &span));
                    }
                    if let Some(old) = seen_imports.get(&target) {
                        if var.is_none() {
                            return Err(TirError::module_already_imported(old.clone(), &span));
                        }
                    }
                    seen_imports.insert(target.clone(), span.position.clone());
                    let bound_name: Cow<'base, str> = match var {
                        Some(name) => name.clone(),
                        None => Cow::Owned(target.clone()),
                    };
                    let module_type = context.types.add(TypeValue::Module { name: Cow::Owned(target.clone()) });
                    context.bind(scope, bound_name, Binding::new(module_type, "").spanned(span));
                    let module = context.modules.get_mut(module_name).expect("module exists");
                    module.imports.push(target);
                }
                _ => {
                    let module = context.modules.get_mut(module_name).expect("module exists");
                    module.build_uses.push(super::module::UseDecl { path: path.to_string(), what: *what });
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn register_named_type<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    statement: &Ast<'base>,
    qualified: &str,
    location: TypeLocation,
    namespace: &[String],
) -> Result<(), TirError> {
    let span = span_info(statement);
    if !context.register_type_name(qualified.to_string(), location) {
        return Err(TirError::already_defined(&span, 0..0, &span.file));
    }
    let info = context.types.add(TypeValue::TypeInfo {
        name: Cow::Owned(qualified.to_string()),
        inner: location,
    });
    let local_name = qualified.rsplit('.').next().unwrap_or(qualified).to_string();
    let binding = Binding::new(info, format!("{}$$info", mangle(qualified))).spanned(span);
    if namespace.len() == 1 {
        // Top-level definition: visible as a plain name in the module scope
        context.bind(scope, Cow::Owned(local_name), binding);
    } else {
        // Nested definition: visible as a member of the enclosing namespace
        let parent = namespace.join(".");
        context.add_namespace_member(&parent, local_name, binding);
    }
    Ok(())
}

/// Pass 2: resolve struct fields, enum payloads, and function/extern
/// signatures.
pub fn resolve_module_signatures(context: &mut TirContext<'_>, module_name: &str) -> Result<(), TirError> {
    let module = context.modules.get(module_name).expect("module was registered");
    let ast = Rc::clone(&module.ast);
    let scope = module.scope;
    let namespace = vec![module_name.to_string()];
    for statement in &ast.statements {
        resolve_statement_signature(context, scope, statement, &namespace)?;
    }
    Ok(())
}

fn resolve_statement_signature<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    statement: &Ast<'base>,
    namespace: &[String],
) -> Result<(), TirError> {
    match &statement.kind {
        AstKind::StructDef(def) => {
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let location = context.lookup_type_name(&qualified).expect("registered in pass 1");
            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                let Some(type_ast) = &field.type_ast else {
                    let ty = match &field.default_value {
                        Some(default_value) => expression::resolve_expression(context, scope, default_value, None)?,
                        None => TypeLocation::UNKNOWN,
                    };
                    fields.push(StructField { name: field.name.clone(), ty });
                    continue;
                };
                let ty = resolve_type_ast(context, scope, type_ast)?;
                fields.push(StructField { name: field.name.clone(), ty });
            }
            context.types.replace(location, TypeValue::Struct(StructType {
                name: Cow::Owned(qualified.clone()),
                fields,
                secret: def.secret,
                external: def.external,
                opaque: def.opaque,
            }));
            let mut inner = namespace.to_vec();
            inner.push(def.name.to_string());
            resolve_namespace_signatures(context, scope, &qualified, namespace_statements(&def.namespace), &inner)?;
        }
        AstKind::EnumDef(def) => {
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let location = context.lookup_type_name(&qualified).expect("registered in pass 1");
            let mut tags = Vec::with_capacity(def.tags.len());
            for tag in &def.tags {
                let payload = if tag.fields.is_empty() {
                    None
                } else {
                    let mut fields = Vec::with_capacity(tag.fields.len());
                    for field in &tag.fields {
                        let ty = match &field.type_ast {
                            Some(type_ast) => resolve_type_ast(context, scope, type_ast)?,
                            None => match &field.default_value {
                                Some(default_value) => {
                                    expression::resolve_expression(context, scope, default_value, None)?
                                }
                                None => TypeLocation::UNKNOWN,
                            },
                        };
                        fields.push(StructField { name: field.name.clone(), ty });
                    }
                    Some(context.types.add(TypeValue::Struct(StructType {
                        name: Cow::Owned(format!("{qualified}.{}", tag.name)),
                        fields,
                        secret: tag.secret,
                        external: false,
                        opaque: false,
                    })))
                };
                tags.push(EnumTag { name: tag.name.clone(), payload, secret: tag.secret });
            }
            context.types.replace(location, TypeValue::Enum(EnumType {
                name: Cow::Owned(qualified.clone()),
                tags: tags.clone(),
            }));

            // Tag constructors and constants become namespace members:
            // `Shape.Circle(...)` and `Shape.Done`.
            let mangled = mangle(&qualified);
            for tag in &tags {
                match tag.payload {
                    Some(payload) => {
                        let args = match context.types.get(payload) {
                            TypeValue::Struct(s) => s
                                .fields
                                .iter()
                                .map(|field| FunctionArg { name: field.name.clone(), ty: field.ty, default: None })
                                .collect(),
                            _ => Vec::new(),
                        };
                        let constructor = context.types.add(TypeValue::Function(FunctionType { args, ret: location }));
                        context.add_namespace_member(
                            &qualified,
                            tag.name.to_string(),
                            Binding::new(constructor, format!("{mangled}$tagged${}", tag.name)),
                        );
                    }
                    None => {
                        context.add_namespace_member(
                            &qualified,
                            tag.name.to_string(),
                            Binding::new(location, format!("{mangled}$tag${}", tag.name)),
                        );
                    }
                }
            }
            let mut inner = namespace.to_vec();
            inner.push(def.name.to_string());
            resolve_namespace_signatures(context, scope, &qualified, namespace_statements(&def.namespace), &inner)?;
        }
        AstKind::LangDef(def) => {
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let mut inner = namespace.to_vec();
            inner.push(def.name.to_string());
            resolve_namespace_signatures(context, scope, &qualified, namespace_statements(&def.namespace), &inner)?;
        }
        AstKind::FunctionDef(def) => {
            let signature = resolve_function_signature(context, scope, &def.args, def.ret_type.as_ref())?;
            let function = context.types.add(TypeValue::Function(signature));
            let qualified = format!("{}.{}", namespace.join("."), def.name);
            let span = span_info(statement);
            let binding = Binding::new(function, mangle(&qualified)).spanned(span.clone());
            if namespace.len() == 1 {
                if let Some(old) = context.lookup(scope, &def.name) {
                    let old_position = old.span.as_ref().map(|s| s.position.clone()).unwrap_or(0..0);
                    return Err(TirError::already_defined(&span, old_position, &span.file));
                }
                context.bind(scope, def.name.clone(), binding);
            } else {
                let parent = namespace.join(".");
                context.add_namespace_member(&parent, def.name.to_string(), binding);
            }
            context.set_type(statement.index, function);
        }
        AstKind::Extern { name, type_ast } => {
            let mut location = resolve_type_ast(context, scope, type_ast)?;
            // Extern functions are bare C symbols, not closures
            if let TypeValue::Closure { function } = context.types.get(location) {
                location = *function;
            }
            let span = span_info(statement);
            context.bind(scope, name.clone(), Binding::new(location, name.to_string()).spanned(span));
        }
        _ => {}
    }
    Ok(())
}

fn resolve_namespace_signatures<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    qualified: &str,
    statements: &[Ast<'base>],
    namespace: &[String],
) -> Result<(), TirError> {
    for (i, statement) in statements.iter().enumerate() {
        match &statement.kind {
            AstKind::FunctionDef(_) | AstKind::StructDef(_) | AstKind::EnumDef(_) | AstKind::LangDef(_) => {
                resolve_statement_signature(context, scope, statement, namespace)?;
            }
            AstKind::ConvertDef(def) => {
                let signature = resolve_function_signature(context, scope, &def.args, Some(&def.ret_type))?;
                let function = context.types.add(TypeValue::Function(signature));
                let mangled = format!("{}$$convert${i}", mangle(qualified));
                context.add_namespace_member(qualified, format!("$convert{i}"), Binding::new(function, mangled));
                context.set_type(statement.index, function);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Pass 3: resolve module bodies — top-level values in dependency order,
/// then function bodies and the remaining statements.
pub fn resolve_module_bodies(context: &mut TirContext<'_>, module_name: &str) -> Result<(), TirError> {
    let module = context.modules.get(module_name).expect("module was registered");
    let ast = Rc::clone(&module.ast);
    let scope = module.scope;

    resolve_top_level_values(context, scope, &ast.statements, module_name)?;

    let namespace = vec![module_name.to_string()];
    for statement in &ast.statements {
        match &statement.kind {
            AstKind::Declare { .. } | AstKind::Use { .. } | AstKind::Extern { .. } => {}
            AstKind::FunctionDef(def) => {
                statement::resolve_function_body(context, scope, statement, def)?;
            }
            AstKind::StructDef(_) | AstKind::EnumDef(_) | AstKind::LangDef(_) => {
                resolve_namespace_bodies(context, scope, statement, &namespace)?;
            }
            AstKind::Extend { .. } => {
                return Err(TirError::not_yet_implemented("'extend' blocks", &span_info(statement)));
            }
            _ => {
                statement::resolve_statement(context, scope, statement)?;
            }
        }
    }
    Ok(())
}

fn resolve_namespace_bodies<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    statement: &Ast<'base>,
    namespace: &[String],
) -> Result<(), TirError> {
    let (name, body) = match &statement.kind {
        AstKind::StructDef(def) => (def.name.as_ref(), &def.namespace),
        AstKind::EnumDef(def) => (def.name.as_ref(), &def.namespace),
        AstKind::LangDef(def) => (def.name.as_ref(), &def.namespace),
        _ => return Ok(()),
    };
    let qualified = format!("{}.{name}", namespace.join("."));
    let module = context.scope(scope).module.clone();
    let ns_scope = context.create_scope(Some(scope), ScopeKind::Namespace, module);
    {
        let mut path = namespace.to_vec();
        path.push(name.to_string());
        context.scope_mut(ns_scope).namespace = path.clone();

        for inner in namespace_statements(body) {
            match &inner.kind {
                AstKind::Declare { var, declared_type, value, .. } => {
                    let var_name = match &var.kind {
                        AstKind::Var(var_name) => var_name.clone(),
                        _ => continue,
                    };
                    let declared = match declared_type {
                        Some(type_ast) => Some(resolve_type_ast(context, ns_scope, type_ast)?),
                        None => None,
                    };
                    let ty = match value {
                        Some(value) => {
                            let inferred = expression::resolve_expression(context, ns_scope, value, declared)?;
                            if let Some(declared) = declared {
                                expression::coerce(context, value, inferred, declared)?;
                                declared
                            } else {
                                inferred
                            }
                        }
                        None => declared.unwrap_or(TypeLocation::UNKNOWN),
                    };
                    let mangled = format!("{}${}", mangle(&qualified), var_name);
                    let binding = Binding::new(ty, mangled).spanned(span_info(inner));
                    context.add_namespace_member(&qualified, var_name.to_string(), binding);
                    context.set_type(inner.index, ty);
                    context.set_type(var.index, ty);
                }
                AstKind::FunctionDef(def) => {
                    statement::resolve_method_body(context, ns_scope, inner, def, &qualified)?;
                }
                AstKind::ConvertDef(def) => {
                    statement::resolve_convert_body(context, ns_scope, inner, def)?;
                }
                AstKind::StructDef(_) | AstKind::EnumDef(_) | AstKind::LangDef(_) => {
                    resolve_namespace_bodies(context, ns_scope, inner, &path)?;
                }
                _ => {
                    statement::resolve_statement(context, ns_scope, inner)?;
                }
            }
        }
    }
    Ok(())
}

/// Resolves top-level `:=` declarations in dependency order; value cycles
/// are reported as [`TirError::CircularReference`].
fn resolve_top_level_values<'base>(
    context: &mut TirContext<'base>,
    scope: ScopeLocation,
    statements: &[Ast<'base>],
    module_name: &str,
) -> Result<(), TirError> {
    let mut declares: IndexMap<&str, &Ast<'base>> = IndexMap::new();
    for statement in statements {
        if let AstKind::Declare { var, .. } = &statement.kind {
            if let AstKind::Var(name) = &var.kind {
                if let Some(old) = declares.insert(name.as_ref(), statement) {
                    let span = span_info(statement);
                    return Err(TirError::already_defined(&span, old.span.position.clone(), &span.file));
                }
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    fn visit<'a, 'base>(
        name: &'a str,
        declares: &IndexMap<&'a str, &'a Ast<'base>>,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<&'a str>,
    ) -> Result<(), TirError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let statement = declares[name];
                return Err(TirError::circular_reference(name, &span_info(statement)));
            }
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        let statement = declares[name];
        if let AstKind::Declare { value: Some(value), .. } = &statement.kind {
            let mut deps = Vec::new();
            collect_var_deps(value, declares, &mut deps);
            for dep in deps {
                visit(dep, declares, marks, order)?;
            }
        }
        marks.insert(name, Mark::Done);
        order.push(name);
        Ok(())
    }

    let names: Vec<&str> = declares.keys().copied().collect();
    for name in names {
        visit(name, &declares, &mut marks, &mut order)?;
    }

    let mut ordered_indices = Vec::with_capacity(order.len());
    for name in order {
        let statement = declares[name];
        statement::resolve_top_level_declare(context, scope, statement, module_name)?;
        ordered_indices.push(statement.index);
    }
    context.top_level_order.insert(module_name.to_string(), ordered_indices);
    Ok(())
}

/// Gathers the top-level declaration names a value expression mentions.
fn collect_var_deps<'a, 'base>(
    ast: &'a Ast<'base>,
    declares: &IndexMap<&'a str, &'a Ast<'base>>,
    deps: &mut Vec<&'a str>,
) {
    if let AstKind::Var(name) = &ast.kind {
        if let Some((key, _)) = declares.get_key_value(name.as_ref()) {
            deps.push(key);
        }
        return;
    }
    for_each_child(ast, &mut |child| collect_var_deps(child, declares, deps));
}

/// Calls `f` on every direct child expression of a node.
pub fn for_each_child<'a, 'base>(ast: &'a Ast<'base>, f: &mut impl FnMut(&'a Ast<'base>)) {
    use AstKind::*;
    match &ast.kind {
        None { .. } | Bool(_) | Int { .. } | Num(_) | TextLiteral(_) | PathLiteral(_) | Var(_) | Pass | Skip(_)
        | Stop(_) | Use { .. } | Extern { .. } => {}
        TextJoin { chunks, .. } | Block(chunks) | List(chunks) | Set(chunks) => {
            for chunk in chunks {
                f(chunk);
            }
        }
        BinaryOp(op) | UpdateAssign(op) => {
            f(&op.lhs);
            f(&op.rhs);
            if let Some(key) = &op.key {
                f(key);
            }
        }
        Not(x) | Negative(x) | HeapAllocate(x) | StackReference(x) | Optional(x) | NonOptional(x) | Repeat(x)
        | Defer(x) => f(x),
        Table { entries, fallback, default_value } => {
            for entry in entries {
                f(entry);
            }
            if let Some(fallback) = fallback {
                f(fallback);
            }
            if let Some(default_value) = default_value {
                f(default_value);
            }
        }
        TableEntry { key, value } => {
            f(key);
            f(value);
        }
        Comprehension { expr, vars, iter, filter } => {
            f(expr);
            for var in vars {
                f(var);
            }
            f(iter);
            if let Some(filter) = filter {
                f(filter);
            }
        }
        FieldAccess { fielded, .. } => f(fielded),
        Index { indexed, index, .. } => {
            f(indexed);
            if let Some(index) = index {
                f(index);
            }
        }
        If { condition, body, else_body } => {
            f(condition);
            f(body);
            if let Some(else_body) = else_body {
                f(else_body);
            }
        }
        When { subject, clauses, else_body } => {
            f(subject);
            for clause in clauses {
                for pattern in &clause.patterns {
                    f(pattern);
                }
                f(&clause.body);
            }
            if let Some(else_body) = else_body {
                f(else_body);
            }
        }
        For { vars, iter, body, empty } => {
            for var in vars {
                f(var);
            }
            f(iter);
            f(body);
            if let Some(empty) = empty {
                f(empty);
            }
        }
        While { condition, body } => {
            f(condition);
            f(body);
        }
        Return(value) => {
            if let Some(value) = value {
                f(value);
            }
        }
        Assert { expr, message } => {
            f(expr);
            if let Some(message) = message {
                f(message);
            }
        }
        DocTest { expr, expected, .. } => {
            f(expr);
            if let Some(expected) = expected {
                f(expected);
            }
        }
        Declare { var, value, .. } => {
            f(var);
            if let Some(value) = value {
                f(value);
            }
        }
        Assign { targets, values } => {
            for target in targets {
                f(target);
            }
            for value in values {
                f(value);
            }
        }
        FunctionDef(def) => f(&def.body),
        ConvertDef(def) => f(&def.body),
        Lambda(lambda) => f(&lambda.body),
        StructDef(def) => f(&def.namespace),
        EnumDef(def) => f(&def.namespace),
        LangDef(def) => f(&def.namespace),
        Extend { body, .. } => f(body),
        FunctionCall { function, args } => {
            f(function);
            for arg in args {
                f(&arg.value);
            }
        }
        MethodCall { target, args, .. } => {
            f(target);
            for arg in args {
                f(&arg.value);
            }
        }
        Reduction { iter, key, .. } => {
            f(iter);
            if let Some(key) = key {
                f(key);
            }
        }
        InlineCCode { chunks, .. } => {
            for chunk in chunks {
                f(chunk);
            }
        }
        Deserialize { value, .. } => f(value),
        ExplicitlyTyped { inner, .. } => f(inner),
    }
}
