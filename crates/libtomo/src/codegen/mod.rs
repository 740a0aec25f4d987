//! The C emitter: typed AST to C source text.
//!
//! Each module compiles to two outputs: a header (forward typedefs, type
//! definitions, extern declarations and prototypes) and an implementation
//! (local typedefs, lifted lambdas, static definitions, function bodies,
//! `TypeInfo` globals and the module's idempotent initializer function).
//!
//! The emitter never mutates or re-checks the AST: every expression's type
//! and every required promotion was recorded by the checker in the
//! context's side tables. Emission failures are compiler bugs and panic;
//! user errors were all reported before this phase runs.
//!
//! Output is accumulated in plain `String`s (amortized O(1) append) and
//! every emitted statement is preceded by a `#line` directive so C
//! diagnostics point back at the Tomo source.

use indexmap::IndexMap;

use crate::ast::{Ast, AstIndex, AstKind};
use crate::tir::context::TirContext;
use crate::tir::module::Module;
use crate::tir::resolver::{for_each_child, mangle};
use crate::types::{TypeLocation, TypeValue};

pub mod ctype;
pub mod expression;
pub mod function;
pub mod statement;

/// The two C outputs produced per compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct COutput {
    pub header: String,
    pub implementation: String,
}

/// One name visible to the emitter.
#[derive(Debug, Clone)]
pub struct CBinding {
    pub code: String,
    pub ty: TypeLocation,
}

/// A deferred block, compiled at its `defer` site and replayed (in LIFO
/// order) at every exit point of its scope.
#[derive(Debug, Clone)]
pub struct Deferral {
    pub code: String,
}

/// The enclosing loop's labels, for `skip`/`stop` lowering.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub skip_label: String,
    pub stop_label: String,
    /// Depth of the deferral stack at loop entry; `skip`/`stop` unwind
    /// down to here
    pub defer_base: usize,
    /// The loop variables, for targeted `skip x`/`stop x`
    pub var_names: Vec<String>,
}

/// The emitter's mutable environment while walking a function body.
#[derive(Debug, Default)]
pub struct CEnv {
    scopes: Vec<IndexMap<String, CBinding>>,
    pub deferred: Vec<Deferral>,
    pub loops: Vec<LoopFrame>,
    pub fn_ret: Option<TypeLocation>,
}

impl CEnv {
    pub fn new() -> Self {
        Self { scopes: vec![IndexMap::new()], ..Default::default() }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: CBinding) {
        self.scopes
            .last_mut()
            .expect("the environment always has a root scope")
            .insert(name.into(), binding);
    }

    pub fn lookup(&self, name: &str) -> Option<&CBinding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// All bindings currently visible, innermost shadowing outermost.
    pub fn flattened(&self) -> IndexMap<String, CBinding> {
        let mut all = IndexMap::new();
        for scope in &self.scopes {
            for (name, binding) in scope {
                all.insert(name.clone(), binding.clone());
            }
        }
        all
    }
}

/// The per-module emitter with its compilation-unit buffers.
pub struct Emitter<'ctx, 'base> {
    pub context: &'ctx TirContext<'base>,
    pub module: &'ctx Module<'base>,
    pub mangled_module: String,
    /// Typedefs for lambda userdata and cache-key structs
    pub local_typedefs: String,
    /// Static prototypes for private functions and lifted lambdas
    pub staticdefs: String,
    /// Lifted lambda bodies
    pub lambdas: String,
    /// Global variable definitions
    pub globals: String,
    /// `TypeInfo_t` global definitions
    pub type_infos: String,
    /// Function and method bodies
    pub function_bodies: String,
    /// Statements collected into the module initializer
    pub initializer_body: String,
    /// Header sections, assembled in layout order at the end
    pub header_forward: String,
    pub header_types: String,
    pub header_decls: String,
    pub header_protos: String,
    /// Every AST node of the compilation by index, so argument defaults
    /// recorded as indices can be compiled at call sites
    nodes: IndexMap<AstIndex, &'ctx Ast<'base>>,
    tmp_counter: usize,
}

fn collect_nodes<'ctx, 'base>(ast: &'ctx Ast<'base>, nodes: &mut IndexMap<AstIndex, &'ctx Ast<'base>>) {
    nodes.insert(ast.index, ast);
    for_each_child(ast, &mut |child| collect_nodes(child, nodes));
}

impl<'ctx, 'base> Emitter<'ctx, 'base> {
    pub fn new(context: &'ctx TirContext<'base>, module: &'ctx Module<'base>) -> Self {
        let mut nodes = IndexMap::new();
        for module in context.modules.values() {
            for statement in &module.ast.statements {
                collect_nodes(statement, &mut nodes);
            }
        }
        Self {
            context,
            module,
            mangled_module: mangle(&module.name),
            local_typedefs: String::new(),
            staticdefs: String::new(),
            lambdas: String::new(),
            globals: String::new(),
            type_infos: String::new(),
            function_bodies: String::new(),
            initializer_body: String::new(),
            header_forward: String::new(),
            header_types: String::new(),
            header_decls: String::new(),
            header_protos: String::new(),
            nodes,
            tmp_counter: 0,
        }
    }

    /// Resolves a node index back to its AST node.
    pub fn node(&self, index: AstIndex) -> &'ctx Ast<'base> {
        self.nodes
            .get(&index)
            .copied()
            .unwrap_or_else(|| unreachable!("every node of the compilation is indexed"))
    }

    /// A fresh C identifier for a compiler temporary.
    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.tmp_counter;
        self.tmp_counter += 1;
        format!("_$_{prefix}_{n}")
    }

    /// The 1-based line number of a byte offset in this module's source.
    pub fn line_of(&self, offset: usize) -> usize {
        let code = self.module.file.code();
        code[..offset.min(code.len())].matches('\n').count() + 1
    }

    /// A `#line` directive tying emitted C back to the Tomo source.
    pub fn line_directive(&self, ast: &Ast<'base>) -> String {
        format!(
            "#line {} \"{}\"\n",
            self.line_of(ast.span.position.start),
            self.module.file.display_path()
        )
    }

    /// An environment seeded with the module's top-level bindings.
    pub fn root_env(&self) -> CEnv {
        let mut env = CEnv::new();
        let scope = self.context.scope(self.module.scope);
        for (name, binding) in &scope.bindings {
            env.bind(name.to_string(), CBinding { code: binding.code.clone(), ty: binding.ty });
        }
        env
    }
}

/// Orders user types so that by-value field dependencies come first.
fn type_definition_order<'base>(context: &TirContext<'base>, module_name: &str) -> Vec<TypeLocation> {
    let prefix = format!("{module_name}.");
    let locations: Vec<TypeLocation> = context
        .type_names
        .iter()
        .filter(|(name, _)| name.starts_with(&prefix))
        .map(|(_, location)| *location)
        .collect();

    fn value_deps(context: &TirContext<'_>, location: TypeLocation, deps: &mut Vec<TypeLocation>) {
        match context.types.get(location) {
            TypeValue::Struct(s) => {
                for field in &s.fields {
                    deps.push(field.ty);
                }
            }
            TypeValue::Enum(e) => {
                for tag in &e.tags {
                    if let Some(payload) = tag.payload {
                        deps.push(payload);
                    }
                }
            }
            TypeValue::Optional { inner } => deps.push(*inner),
            _ => {}
        }
    }

    let mut ordered = Vec::new();
    let mut done: Vec<TypeLocation> = Vec::new();
    fn visit(
        context: &TirContext<'_>,
        location: TypeLocation,
        in_module: &[TypeLocation],
        done: &mut Vec<TypeLocation>,
        ordered: &mut Vec<TypeLocation>,
    ) {
        if done.contains(&location) {
            return;
        }
        done.push(location);
        let mut deps = Vec::new();
        value_deps(context, location, &mut deps);
        for dep in deps {
            if in_module.contains(&dep) {
                visit(context, dep, in_module, done, ordered);
            }
        }
        ordered.push(location);
    }
    for location in &locations {
        visit(context, *location, &locations, &mut done, &mut ordered);
    }
    ordered
}

/// Compiles one module into its header and implementation.
pub fn compile_file<'base>(context: &TirContext<'base>, module: &Module<'base>) -> COutput {
    let mut emitter = Emitter::new(context, module);

    // Type definitions first, in value-dependency order
    for location in type_definition_order(context, &module.name) {
        emitter.emit_type_definition(location);
    }

    let mut env = emitter.root_env();

    // Top-level value initializers run in dependency order, then the
    // remaining statements in source order
    if let Some(order) = context.top_level_order.get(&module.name) {
        for index in order.clone() {
            let statement = emitter.node(index);
            emitter.emit_top_level_statement(&mut env, statement);
        }
    }
    let statements: &[Ast<'base>] = &module.ast.statements;
    for statement in statements {
        if matches!(statement.kind, AstKind::Declare { .. }) {
            continue;
        }
        emitter.emit_top_level_statement(&mut env, statement);
    }

    assemble(emitter)
}

fn assemble(emitter: Emitter<'_, '_>) -> COutput {
    let module = &emitter.mangled_module;

    let mut header = String::new();
    header.push_str("#pragma once\n");
    header.push_str("#include <tomo/tomo.h>\n");
    for include in emitter.module.header_includes() {
        if include.starts_with('<') {
            header.push_str(&format!("#include {include}\n"));
        } else {
            header.push_str(&format!("#include \"{include}\"\n"));
        }
    }
    header.push('\n');
    header.push_str(&emitter.header_forward);
    header.push('\n');
    header.push_str(&emitter.header_types);
    header.push('\n');
    header.push_str(&emitter.header_decls);
    header.push('\n');
    header.push_str(&emitter.header_protos);
    header.push_str(&format!("void _${module}$$initialize(void);\n"));

    let mut implementation = String::new();
    implementation.push_str(&format!("#include \"{}.h\"\n", emitter.module.file.display_path()));
    for use_decl in &emitter.module.build_uses {
        if use_decl.what == crate::ast::UseKind::CSource {
            implementation.push_str(&format!("#include \"{}\"\n", use_decl.path));
        }
    }
    implementation.push('\n');
    implementation.push_str(&emitter.local_typedefs);
    implementation.push('\n');
    implementation.push_str(&emitter.staticdefs);
    implementation.push('\n');
    implementation.push_str(&emitter.lambdas);
    implementation.push('\n');
    implementation.push_str(&emitter.globals);
    implementation.push('\n');
    implementation.push_str(&emitter.type_infos);
    implementation.push('\n');
    implementation.push_str(&emitter.function_bodies);
    implementation.push('\n');

    // The initializer runs imports first, then the module's top-level
    // code, exactly once.
    implementation.push_str(&format!("public void _${module}$$initialize(void) {{\n"));
    implementation.push_str("    static bool initialized = false;\n");
    implementation.push_str("    if (initialized) return;\n");
    implementation.push_str("    initialized = true;\n");
    for import in &emitter.module.imports {
        implementation.push_str(&format!("    _${}$$initialize();\n", mangle(import)));
    }
    implementation.push_str(&emitter.initializer_body);
    implementation.push_str("}\n");

    COutput { header, implementation }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::file::SourceFile;
    use crate::nom_tools::State;
    use crate::process_code;
    use crate::tir;

    use super::*;

    fn compile(code: &str, f: impl FnOnce(&COutput)) {
        let state = State::new(SourceFile::new(vec!["main.tm".into()], code.to_string()));
        let ast = process_code(&state).unwrap();
        let context = tir::build(vec![Rc::new(ast)]).unwrap();
        let module = context.modules.get("main").unwrap();
        let output = compile_file(&context, module);
        f(&output);
    }

    #[test]
    fn initializer_is_idempotent() {
        compile("x := 42\n", |output| {
            assert!(output.implementation.contains("void _$main$$initialize(void)"));
            assert!(output.implementation.contains("static bool initialized = false;"));
            assert!(output.implementation.contains("if (initialized) return;"));
            assert!(output.header.contains("void _$main$$initialize(void);"));
        });
    }

    #[test]
    fn globals_get_extern_declarations() {
        compile("greeting := \"hello\"\n", |output| {
            assert!(output.header.contains("extern Text_t main$greeting;"), "{}", output.header);
            assert!(output.implementation.contains("Text_t main$greeting"), "{}", output.implementation);
        });
    }

    #[test]
    fn line_directives_point_at_the_source() {
        compile("x := 1\ny := 2\n", |output| {
            assert!(output.implementation.contains("#line 1 \"main.tm\""), "{}", output.implementation);
            assert!(output.implementation.contains("#line 2 \"main.tm\""), "{}", output.implementation);
        });
    }

    #[test]
    fn struct_definitions_live_in_the_header() {
        compile("struct Vec2(x:Num, y:Num)\n", |output| {
            assert!(output.header.contains("struct main$Vec2$$struct"), "{}", output.header);
            assert!(output.header.contains("Num_t x;"), "{}", output.header);
            assert!(output.implementation.contains("main$Vec2$$info"), "{}", output.implementation);
        });
    }

    #[test]
    fn imports_initialize_before_module_code() {
        let lib_state = State::new(SourceFile::new(vec!["vectors.tm".into()], "zero := 0\n".to_string()));
        let main_state = State::new(SourceFile::new(
            vec!["main.tm".into()],
            "use ./vectors.tm\nx := 1\n".to_string(),
        ));
        let lib = process_code(&lib_state).unwrap();
        let main = process_code(&main_state).unwrap();
        let context = tir::build(vec![Rc::new(lib), Rc::new(main)]).unwrap();
        let module = context.modules.get("main").unwrap();
        let output = compile_file(&context, module);
        assert!(output.implementation.contains("_$vectors$$initialize();"), "{}", output.implementation);
    }
}
