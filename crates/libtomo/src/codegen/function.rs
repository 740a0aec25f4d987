//! Function, method, conversion and lambda emission.
//!
//! Lambdas are lifted to static top-level functions with a synthesized
//! userdata struct carrying their captured variables (by value); the call
//! site builds a `Closure_t` pairing the lifted function with a
//! heap-allocated copy of the captures. Functions declared with `; cache`
//! get a wrapper that keys a module-local table on a packed struct of the
//! arguments, evicting a random entry when the configured bound is
//! exceeded.

use std::collections::HashSet;

use crate::ast::{Ast, AstKind, ConvertDefAst, FunctionDefAst, LambdaAst};
use crate::tir::resolver::mangle;
use crate::types::{FunctionType, TypeLocation, TypeValue};

use super::ctype::{c_declaration, c_type};
use super::{CBinding, CEnv, Emitter};

impl<'ctx, 'base> Emitter<'ctx, 'base> {
    fn signature_of(&self, statement: &Ast<'base>) -> FunctionType<'base> {
        let ty = self.context.type_of(statement);
        match self.context.types.get(ty).clone() {
            TypeValue::Function(signature) => signature,
            TypeValue::Closure { function } => match self.context.types.get(function).clone() {
                TypeValue::Function(signature) => signature,
                _ => unreachable!("closures wrap functions"),
            },
            _ => unreachable!("function definitions have function types"),
        }
    }

    fn param_list(&self, signature: &FunctionType<'base>) -> String {
        if signature.args.is_empty() {
            return "void".to_string();
        }
        signature
            .args
            .iter()
            .map(|arg| c_declaration(self.context, arg.ty, &format!("_${}", arg.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn body_env(&self, outer: &CEnv, signature: &FunctionType<'base>) -> CEnv {
        let mut env = CEnv::new();
        for (name, binding) in outer.flattened() {
            env.bind(name, binding);
        }
        env.push_scope();
        for arg in &signature.args {
            env.bind(arg.name.to_string(), CBinding { code: format!("_${}", arg.name), ty: arg.ty });
        }
        env.fn_ret = Some(signature.ret);
        env
    }

    /// Emits a named function (top-level or namespace method).
    pub fn emit_function(
        &mut self,
        env: &mut CEnv,
        statement: &Ast<'base>,
        def: &FunctionDefAst<'base>,
        qualified: &str,
        public: bool,
    ) {
        let signature = self.signature_of(statement);
        let mangled = mangle(qualified);
        let ret_c = if signature.ret == TypeLocation::VOID {
            "void".to_string()
        } else {
            c_type(self.context, signature.ret)
        };
        let params = self.param_list(&signature);

        let body_name = if def.cache.is_some() { format!("{mangled}$uncached") } else { mangled.clone() };

        let mut body_env = self.body_env(env, &signature);
        let mut body = String::new();
        body.push_str(&self.line_directive(statement));
        self.compile_statement(&mut body_env, &def.body, &mut body);

        let linkage = if def.cache.is_some() {
            "static "
        } else if public {
            "public "
        } else {
            "static "
        };
        let inline = if def.is_inline { "inline " } else { "" };
        if def.cache.is_some() || !public {
            self.staticdefs.push_str(&format!("static {ret_c} {body_name}({params});\n"));
        } else {
            self.header_protos.push_str(&format!("{ret_c} {mangled}({params});\n"));
        }
        self.function_bodies
            .push_str(&format!("{linkage}{inline}{ret_c} {body_name}({params}) {{\n{body}}}\n\n"));

        if let Some(cache) = def.cache {
            self.emit_cache_wrapper(&signature, &mangled, &ret_c, &params, cache.size, public);
        }
    }

    /// The caching wrapper: a module-local table keyed on a packed struct
    /// of the argument tuple.
    fn emit_cache_wrapper(
        &mut self,
        signature: &FunctionType<'base>,
        mangled: &str,
        ret_c: &str,
        params: &str,
        size: Option<i64>,
        public: bool,
    ) {
        let key_t = format!("{mangled}$args_t");
        let mut key_fields = String::new();
        for arg in &signature.args {
            key_fields.push_str(&format!("{}; ", c_declaration(self.context, arg.ty, &format!("_${}", arg.name))));
        }
        self.local_typedefs
            .push_str(&format!("typedef struct {{ {key_fields}}} {key_t};\n"));
        self.globals
            .push_str(&format!("static Table_t {mangled}$cache = {{}};\n"));

        let key_init = signature
            .args
            .iter()
            .map(|arg| format!("._${name}=_${name}", name = arg.name))
            .collect::<Vec<_>>()
            .join(", ");
        let arg_names = signature
            .args
            .iter()
            .map(|arg| format!("_${}", arg.name))
            .collect::<Vec<_>>()
            .join(", ");

        if public {
            self.header_protos.push_str(&format!("{ret_c} {mangled}({params});\n"));
        }
        let mut wrapper = format!("public {ret_c} {mangled}({params}) {{\n");
        wrapper.push_str(&format!("    {key_t} key = {{{key_init}}};\n"));
        wrapper.push_str(&format!(
            "    {ret_c} *cached = ({ret_c}*)Cache$get(&{mangled}$cache, &key, sizeof(key));\n"
        ));
        wrapper.push_str("    if (cached) return *cached;\n");
        wrapper.push_str(&format!("    {ret_c} value = {mangled}$uncached({arg_names});\n"));
        if let Some(size) = size {
            wrapper.push_str(&format!(
                "    if ({mangled}$cache.entries.length >= {size}) Cache$evict_random(&{mangled}$cache);\n"
            ));
        }
        wrapper.push_str(&format!(
            "    Cache$set(&{mangled}$cache, &key, sizeof(key), &value, sizeof(value));\n"
        ));
        wrapper.push_str("    return value;\n}\n\n");
        self.function_bodies.push_str(&wrapper);
    }

    /// Emits a `convert` constructor; `position` is its index within the
    /// namespace block, matching the checker's registration.
    pub fn emit_convert(
        &mut self,
        env: &mut CEnv,
        statement: &Ast<'base>,
        def: &ConvertDefAst<'base>,
        qualified: &str,
        position: usize,
    ) {
        let signature = self.signature_of(statement);
        let mangled = format!("{}$$convert${position}", mangle(qualified));
        let ret_c = c_type(self.context, signature.ret);
        let params = self.param_list(&signature);

        let mut body_env = self.body_env(env, &signature);
        let mut body = String::new();
        body.push_str(&self.line_directive(statement));
        self.compile_statement(&mut body_env, &def.body, &mut body);

        self.header_protos.push_str(&format!("{ret_c} {mangled}({params});\n"));
        self.function_bodies
            .push_str(&format!("public {ret_c} {mangled}({params}) {{\n{body}}}\n\n"));
    }

    /// Lifts a lambda to a static function and builds its closure value.
    pub fn compile_lambda(&mut self, env: &mut CEnv, ast: &Ast<'base>, lambda: &LambdaAst<'base>) -> String {
        let signature = self.signature_of(ast);
        let name = format!("{}$lambda${}", self.mangled_module, lambda.id);
        let ret_c = if signature.ret == TypeLocation::VOID {
            "void".to_string()
        } else {
            c_type(self.context, signature.ret)
        };

        // Captured variables: free names of the body that resolve to
        // locals in the enclosing environment
        let mut bound: HashSet<String> = signature.args.iter().map(|arg| arg.name.to_string()).collect();
        let mut free = Vec::new();
        collect_free_vars(&lambda.body, &mut bound, &mut free);
        let captures: Vec<(String, CBinding)> = free
            .into_iter()
            .filter_map(|name| {
                let binding = env.lookup(&name)?;
                // Module-level globals are directly addressable
                if binding.code.starts_with("_$") {
                    Some((name, binding.clone()))
                } else {
                    None
                }
            })
            .collect();

        let params = {
            let mut params: Vec<String> = signature
                .args
                .iter()
                .map(|arg| c_declaration(self.context, arg.ty, &format!("_${}", arg.name)))
                .collect();
            params.push("void *userdata".to_string());
            params.join(", ")
        };

        let userdata_t = format!("{name}$userdata_t");
        if !captures.is_empty() {
            let fields = captures
                .iter()
                .map(|(capture_name, binding)| {
                    format!("{};", c_declaration(self.context, binding.ty, capture_name))
                })
                .collect::<Vec<_>>()
                .join(" ");
            self.local_typedefs
                .push_str(&format!("typedef struct {{ {fields} }} {userdata_t};\n"));
        }

        // The lambda body sees the module globals, the captures through
        // userdata, and its own parameters
        let mut body_env = CEnv::new();
        for (binding_name, binding) in self.root_env().flattened() {
            body_env.bind(binding_name, binding);
        }
        body_env.push_scope();
        if !captures.is_empty() {
            for (capture_name, binding) in &captures {
                body_env.bind(
                    capture_name.clone(),
                    CBinding { code: format!("_$ud->{capture_name}"), ty: binding.ty },
                );
            }
        }
        for arg in &signature.args {
            body_env.bind(arg.name.to_string(), CBinding { code: format!("_${}", arg.name), ty: arg.ty });
        }
        body_env.fn_ret = Some(signature.ret);

        let mut body = String::new();
        if !captures.is_empty() {
            body.push_str(&format!("{userdata_t} *_$ud = ({userdata_t}*)userdata;\n"));
        } else {
            body.push_str("(void)userdata;\n");
        }
        match &lambda.body.kind {
            // A single-expression lambda body returns its value
            AstKind::Block(statements)
                if statements.len() == 1
                    && signature.ret != TypeLocation::VOID
                    && !matches!(statements[0].kind, AstKind::Return(_)) =>
            {
                let compiled = self.compile_expression(&mut body_env, &statements[0]);
                body.push_str(&format!("return {compiled};\n"));
            }
            _ => {
                self.compile_statement(&mut body_env, &lambda.body, &mut body);
            }
        }

        self.staticdefs.push_str(&format!("static {ret_c} {name}({params});\n"));
        self.lambdas
            .push_str(&format!("static {ret_c} {name}({params}) {{\n{body}}}\n\n"));

        if captures.is_empty() {
            format!("((Closure_t){{.fn=(void*)&{name}, .userdata=NULL}})")
        } else {
            let ud = self.fresh("ud");
            let init = captures
                .iter()
                .map(|(capture_name, binding)| format!(".{capture_name}={}", binding.code))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "({{ {userdata_t} *{ud} = GC_MALLOC(sizeof({userdata_t})); \
                 *{ud} = ({userdata_t}){{{init}}}; \
                 ((Closure_t){{.fn=(void*)&{name}, .userdata={ud}}}); }})"
            )
        }
    }
}

/// Collects names that occur free in `ast`: variables referenced before
/// any local binding introduces them.
fn collect_free_vars<'base>(ast: &Ast<'base>, bound: &mut HashSet<String>, free: &mut Vec<String>) {
    match &ast.kind {
        AstKind::Var(name) => {
            if !bound.contains(name.as_ref()) && !free.iter().any(|existing| existing == name.as_ref()) {
                free.push(name.to_string());
            }
        }
        AstKind::Declare { var, value, .. } => {
            if let Some(value) = value {
                collect_free_vars(value, bound, free);
            }
            if let AstKind::Var(name) = &var.kind {
                bound.insert(name.to_string());
            }
        }
        AstKind::For { vars, iter, body, empty } => {
            collect_free_vars(iter, bound, free);
            let mut inner = bound.clone();
            for var in vars {
                if let AstKind::Var(name) = &var.kind {
                    inner.insert(name.to_string());
                }
            }
            collect_free_vars(body, &mut inner, free);
            if let Some(empty) = empty {
                collect_free_vars(empty, bound, free);
            }
        }
        AstKind::Comprehension { expr, vars, iter, filter } => {
            collect_free_vars(iter, bound, free);
            let mut inner = bound.clone();
            for var in vars {
                if let AstKind::Var(name) = &var.kind {
                    inner.insert(name.to_string());
                }
            }
            collect_free_vars(expr, &mut inner, free);
            if let Some(filter) = filter {
                collect_free_vars(filter, &mut inner, free);
            }
        }
        AstKind::Lambda(inner_lambda) => {
            let mut inner = bound.clone();
            for arg in &inner_lambda.args {
                inner.insert(arg.name.to_string());
            }
            collect_free_vars(&inner_lambda.body, &mut inner, free);
        }
        AstKind::When { subject, clauses, else_body } => {
            collect_free_vars(subject, bound, free);
            for clause in clauses {
                let mut inner = bound.clone();
                for pattern in &clause.patterns {
                    if let AstKind::FunctionCall { args, .. } = &pattern.kind {
                        for arg in args {
                            if let AstKind::Var(name) = &arg.value.kind {
                                inner.insert(name.to_string());
                            }
                        }
                    }
                }
                collect_free_vars(&clause.body, &mut inner, free);
            }
            if let Some(else_body) = else_body {
                collect_free_vars(else_body, bound, free);
            }
        }
        AstKind::If { condition, body, else_body } => {
            // Narrowing declarations bind only in the true branch
            if let AstKind::Declare { var, value: Some(value), .. } = &condition.kind {
                collect_free_vars(value, bound, free);
                let mut inner = bound.clone();
                if let AstKind::Var(name) = &var.kind {
                    inner.insert(name.to_string());
                }
                collect_free_vars(body, &mut inner, free);
            } else {
                collect_free_vars(condition, bound, free);
                collect_free_vars(body, bound, free);
            }
            if let Some(else_body) = else_body {
                collect_free_vars(else_body, bound, free);
            }
        }
        AstKind::Block(statements) => {
            let mut inner = bound.clone();
            for statement in statements {
                collect_free_vars(statement, &mut inner, free);
            }
        }
        _ => {
            crate::tir::resolver::for_each_child(ast, &mut |child| collect_free_vars(child, bound, free));
        }
    }
}
