//! Type Intermediate Representation: the semantic analysis phase.
//!
//! The checker walks each module's AST top-down and records a semantic
//! type for every expression node in the context's side tables. Analysis
//! runs in three passes so that mutually recursive definitions resolve:
//!
//! 1. **Declare**: register every named type (`struct`/`enum`/`lang`) as a
//!    placeholder, recursing through namespaces, and bind imports.
//! 2. **Signatures**: resolve struct fields, enum tag payloads, function
//!    and extern signatures against the now-complete name tables.
//! 3. **Bodies**: resolve top-level value declarations in dependency order
//!    (cyclic value dependencies are errors), then function bodies and the
//!    remaining top-level statements.
//!
//! One error aborts the compilation; the checker does not attempt
//! recovery.

use std::rc::Rc;

use crate::ast::FileAst;
use crate::nom_tools::SpanInfo;
use crate::types::{EnumTag, EnumType, FunctionType, StructField, StructType, TypeLocation, TypeValue};

pub use context::TirContext;
pub use error::TirError;
pub use module::Module;
pub use scope::{Binding, Scope, ScopeKind, ScopeLocation};

pub mod context;
pub mod error;
pub mod module;
pub mod resolver;
pub mod scope;

/// The built-in type names every module sees.
pub static BUILTIN_TYPE_NAMES: &[(&str, TypeLocation)] = &[
    ("Abort", TypeLocation::ABORT),
    ("Bool", TypeLocation::BOOL),
    ("Byte", TypeLocation::BYTE),
    ("CString", TypeLocation::CSTRING),
    ("Int", TypeLocation::BIG_INT),
    ("Int16", TypeLocation::INT16),
    ("Int32", TypeLocation::INT32),
    ("Int64", TypeLocation::INT64),
    ("Int8", TypeLocation::INT8),
    ("Memory", TypeLocation::MEMORY),
    ("Moment", TypeLocation::MOMENT),
    ("Num", TypeLocation::NUM),
    ("Num32", TypeLocation::NUM32),
    ("Text", TypeLocation::TEXT),
    ("Void", TypeLocation::VOID),
];

/// Name of the built-in iterator-protocol enum produced by `Int.to(...)`.
pub static INT_RANGE_ENUM: &str = "IntRange";

fn register_builtins(context: &mut TirContext<'_>) {
    for (name, location) in BUILTIN_TYPE_NAMES {
        context.register_type_name((*name).to_string(), *location);
    }

    // The iterator protocol for counted ranges: an enum with a `Done` tag
    // and a `Next` tag carrying the next integer.
    let payload = context.types.add(TypeValue::Struct(StructType {
        name: format!("{INT_RANGE_ENUM}.Next").into(),
        fields: vec![StructField { name: "next".into(), ty: TypeLocation::BIG_INT }],
        secret: false,
        external: false,
        opaque: false,
    }));
    let range_enum = context.types.add(TypeValue::Enum(EnumType {
        name: INT_RANGE_ENUM.into(),
        tags: vec![
            EnumTag { name: "Done".into(), payload: None, secret: false },
            EnumTag { name: "Next".into(), payload: Some(payload), secret: false },
        ],
    }));
    context.register_type_name(INT_RANGE_ENUM.to_string(), range_enum);
}

/// Binds the runtime's global functions into a module scope: `say`,
/// `ask` and `fail`.
fn bind_global_functions(context: &mut TirContext<'_>, scope: ScopeLocation) {
    let mut bind = |context: &mut TirContext<'_>, name: &'static str, code: &'static str, args: Vec<(&'static str, TypeLocation)>, ret: TypeLocation| {
        let function = context.types.add(TypeValue::Function(FunctionType {
            args: args
                .into_iter()
                .map(|(arg_name, ty)| crate::types::FunctionArg { name: arg_name.into(), ty, default: None })
                .collect(),
            ret,
        }));
        context.bind(scope, name.into(), Binding::new(function, code));
    };
    bind(context, "say", "say", vec![("text", TypeLocation::TEXT)], TypeLocation::VOID);
    bind(context, "ask", "ask", vec![("prompt", TypeLocation::TEXT)], TypeLocation::TEXT);
    bind(context, "fail", "fail_text", vec![("message", TypeLocation::TEXT)], TypeLocation::ABORT);
}

/// The type of the closure returned by `n.to(m)`: `func(-> IntRange)`.
pub fn int_range_iterator(context: &mut TirContext<'_>) -> TypeLocation {
    let range_enum = context
        .lookup_type_name(INT_RANGE_ENUM)
        .expect("builtin range enum is registered in build()");
    let function = context.types.add(TypeValue::Function(FunctionType { args: Vec::new(), ret: range_enum }));
    context.types.closure_of(function)
}

/// Builds the Type Intermediate Representation from parsed AST files.
///
/// All files of the compilation (the entry module plus everything its
/// `use` statements pull in) are passed together; imports resolve against
/// this set.
pub fn build(files: Vec<Rc<FileAst<'_>>>) -> Result<TirContext<'_>, TirError> {
    let mut context = TirContext::default();
    register_builtins(&mut context);

    // Create all modules and their top-level scopes first so imports can
    // resolve in any order.
    for ast in files.into_iter() {
        let module = Module::new(ast.file.clone(), ast);
        let scope = context.create_scope(None, ScopeKind::Module, module.name.clone());
        context.scope_mut(scope).namespace = vec![module.name.clone()];
        bind_global_functions(&mut context, scope);
        let name = module.name.clone();
        if context.modules.contains_key(&name) {
            let span = SpanInfo::new(0..0, module.file.clone());
            return Err(TirError::already_defined(&span, 0..0, &module.file));
        }
        let mut module = module;
        module.scope = scope;
        context.modules.insert(name, module);
    }

    let module_names: Vec<String> = context.modules.keys().cloned().collect();

    for name in &module_names {
        resolver::declare_module_types(&mut context, name)?;
    }
    for name in &module_names {
        resolver::resolve_module_signatures(&mut context, name)?;
    }
    for name in &module_names {
        resolver::resolve_module_bodies(&mut context, name)?;
    }

    if !context.errors.is_empty() {
        let errors = std::mem::take(&mut context.errors);
        return Err(TirError::multiple_errors(errors));
    }

    Ok(context)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::file::SourceFile;
    use crate::nom_tools::State;
    use crate::process_code;

    use super::*;

    fn check(code: &str) -> Result<(), TirError> {
        let state = State::new(SourceFile::new(vec!["main.tm".into()], code.to_string()));
        let ast = process_code(&state)?;
        build(vec![Rc::new(ast)]).map(|_| ())
    }

    #[test]
    fn empty_module_builds() {
        check("").unwrap();
    }

    #[test]
    fn simple_declarations_build() {
        check("x := 2 + 3 * 4\ny := x + 1\n").unwrap();
    }

    #[test]
    fn missing_import_is_reported() {
        let error = check("use missing\n").unwrap_err();
        assert!(matches!(error, TirError::ImportNotFound(_)), "{error:?}");
    }

    #[test]
    fn multi_module_import() {
        let lib_state = State::new(SourceFile::new(
            vec!["vectors.tm".into()],
            "struct Vec2(x:Num, y:Num)\n".to_string(),
        ));
        let main_state = State::new(SourceFile::new(
            vec!["main.tm".into()],
            "use ./vectors.tm\nv := vectors.Vec2(1.0, 2.0)\n".to_string(),
        ));
        let lib = process_code(&lib_state).unwrap();
        let main = process_code(&main_state).unwrap();
        build(vec![Rc::new(lib), Rc::new(main)]).unwrap();
    }

    #[test]
    fn cyclic_values_are_reported() {
        let error = check("a := b + 1\nb := a + 1\n").unwrap_err();
        assert!(matches!(error, TirError::CircularReference(_)), "{error:?}");
    }
}
