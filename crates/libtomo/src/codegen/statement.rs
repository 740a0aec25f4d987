//! Statement and type-definition lowering.
//!
//! Blocks track their deferral stack: a `defer` body is compiled once at
//! its site and replayed in LIFO order at every exit point (block end,
//! `return`, `skip`, `stop`). Loops lower through one of five strategies
//! chosen by the iterable's type: counted integer loops (specialized for
//! `Int.to(...)`), list iteration, set/table iteration over the entry
//! array, big-integer counting, and iterator-closure driving.

use crate::ast::{Ast, AstKind, UseKind, WhenClause};
use crate::tir::resolver::expression::{classify_iterable, Iteration};
use crate::tir::resolver::mangle;
use crate::types::{TypeLocation, TypeValue};

use super::ctype::{c_type, check_none, emit_type_info, extract_value, type_info_ptr};
use super::{CBinding, CEnv, Deferral, Emitter, LoopFrame};

impl<'ctx, 'base> Emitter<'ctx, 'base> {
    /// Emits the header definition (and `TypeInfo`) for one user type.
    pub fn emit_type_definition(&mut self, location: TypeLocation) {
        match self.context.types.get(location).clone() {
            TypeValue::Struct(s) => {
                let mangled = mangle(&s.name);
                self.header_forward
                    .push_str(&format!("typedef struct {mangled}$$struct {mangled}$$type;\n"));
                let mut body = format!("struct {mangled}$$struct {{\n");
                for field in &s.fields {
                    if self.context.types.get(field.ty) == &TypeValue::Bool {
                        body.push_str(&format!("    Bool_t {}:1;\n", field.name));
                    } else {
                        body.push_str(&format!(
                            "    {};\n",
                            super::ctype::c_declaration(self.context, field.ty, &field.name)
                        ));
                    }
                }
                body.push_str("};\n");
                // The flag-carrying optional wrapper for this struct
                body.push_str(&format!(
                    "typedef struct {{ struct {mangled}$$struct value; Bool_t is_none; }} {mangled}$$opt;\n"
                ));
                self.header_types.push_str(&body);
                self.header_decls
                    .push_str(&format!("extern const TypeInfo_t {mangled}$$info;\n"));
                emit_type_info(self.context, location, &mut self.type_infos);
            }
            TypeValue::Enum(e) => {
                let mangled = mangle(&e.name);
                self.header_forward
                    .push_str(&format!("typedef struct {mangled}$$struct {mangled}$$type;\n"));
                let mut body = String::new();
                // Payload structs come first so the union can hold them by
                // value
                for tag in &e.tags {
                    let Some(payload) = tag.payload else { continue };
                    let TypeValue::Struct(payload_struct) = self.context.types.get(payload) else { continue };
                    let payload_mangled = mangle(&payload_struct.name);
                    body.push_str(&format!("struct {payload_mangled}$$struct {{\n"));
                    for field in &payload_struct.fields {
                        body.push_str(&format!(
                            "    {};\n",
                            super::ctype::c_declaration(self.context, field.ty, &field.name)
                        ));
                    }
                    body.push_str("};\n");
                }
                // Tag value 0 stays reserved for the optional none sentinel
                let tags = e
                    .tags
                    .iter()
                    .enumerate()
                    .map(|(i, tag)| format!("{mangled}$tag${} = {}", tag.name, crate::types::EnumTag::value(i)))
                    .collect::<Vec<_>>()
                    .join(", ");
                body.push_str(&format!("struct {mangled}$$struct {{\n    enum {{ {tags} }} $tag;\n"));
                let has_payload = e.tags.iter().any(|tag| tag.payload.is_some());
                if has_payload {
                    body.push_str("    union {\n");
                    for tag in &e.tags {
                        let Some(payload) = tag.payload else { continue };
                        let TypeValue::Struct(payload_struct) = self.context.types.get(payload) else { continue };
                        body.push_str(&format!(
                            "        struct {}$$struct {};\n",
                            mangle(&payload_struct.name),
                            tag.name
                        ));
                    }
                    body.push_str("    };\n");
                }
                body.push_str("};\n");
                self.header_types.push_str(&body);
                self.header_decls
                    .push_str(&format!("extern const TypeInfo_t {mangled}$$info;\n"));
                emit_type_info(self.context, location, &mut self.type_infos);

                // Constructor functions for the payload-carrying tags
                for tag in &e.tags {
                    let Some(payload) = tag.payload else { continue };
                    let TypeValue::Struct(payload_struct) = self.context.types.get(payload).clone() else { continue };
                    let params = payload_struct
                        .fields
                        .iter()
                        .map(|field| super::ctype::c_declaration(self.context, field.ty, &field.name))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let assignments = payload_struct
                        .fields
                        .iter()
                        .map(|field| format!(".{}={}", field.name, field.name))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let signature = format!("{mangled}$$type {mangled}$tagged${}({params})", tag.name);
                    self.header_protos.push_str(&format!("{signature};\n"));
                    self.function_bodies.push_str(&format!(
                        "public {signature} {{\n    return ({mangled}$$type){{.$tag={mangled}$tag${tag}, \
                         .{tag}={{{assignments}}}}};\n}}\n\n",
                        tag = tag.name,
                    ));
                }
            }
            TypeValue::Text { lang: Some(lang) } => {
                let mangled = mangle(&lang);
                self.header_forward.push_str(&format!("typedef Text_t {mangled}$$type;\n"));
                self.header_decls
                    .push_str(&format!("extern const TypeInfo_t {mangled}$$info;\n"));
                emit_type_info(self.context, location, &mut self.type_infos);
            }
            _ => {}
        }
    }

    /// Emits one top-level statement into the appropriate buffers.
    pub fn emit_top_level_statement(&mut self, env: &mut CEnv, statement: &Ast<'base>) {
        match &statement.kind {
            AstKind::StructDef(def) => {
                let qualified = format!("{}.{}", self.module.name, def.name);
                self.emit_namespace_members(env, &qualified, &def.namespace);
            }
            AstKind::EnumDef(def) => {
                let qualified = format!("{}.{}", self.module.name, def.name);
                self.emit_namespace_members(env, &qualified, &def.namespace);
            }
            AstKind::LangDef(def) => {
                let qualified = format!("{}.{}", self.module.name, def.name);
                // The constructor macro for the sublanguage
                let mangled = mangle(&qualified);
                self.header_decls
                    .push_str(&format!("#define {mangled}(text) (({mangled}$$type)Text(text))\n"));
                self.emit_namespace_members(env, &qualified, &def.namespace);
            }
            AstKind::FunctionDef(def) => {
                let qualified = format!("{}.{}", self.module.name, def.name);
                self.emit_function(env, statement, def, &qualified, true);
            }
            AstKind::Declare { var, value, .. } => {
                let AstKind::Var(name) = &var.kind else { return };
                let ty = self.context.type_of(var);
                let code = match env.lookup(name) {
                    Some(binding) => binding.code.clone(),
                    None => format!("{}${name}", self.mangled_module),
                };
                self.globals.push_str(&format!(
                    "{};\n",
                    super::ctype::c_declaration(self.context, ty, &code)
                ));
                self.header_decls.push_str(&format!(
                    "extern {};\n",
                    super::ctype::c_declaration(self.context, ty, &code)
                ));
                if let Some(value) = value {
                    let directive = self.line_directive(statement);
                    let compiled = self.compile_expression(env, value);
                    self.initializer_body.push_str(&directive);
                    self.initializer_body.push_str(&format!("    {code} = {compiled};\n"));
                }
            }
            AstKind::Use { .. } => {
                // Imports are lowered in the initializer prologue; build
                // uses surface during assembly
            }
            AstKind::Extern { name, .. } => {
                let binding = env.lookup(name).cloned();
                if let Some(binding) = binding {
                    self.header_decls.push_str(&format!(
                        "extern {};\n",
                        super::ctype::c_declaration(self.context, binding.ty, name)
                    ));
                }
            }
            AstKind::ConvertDef(_) | AstKind::Extend { .. } => {
                // Rejected by the checker before emission
            }
            _ => {
                // Any other top-level statement runs in the initializer
                let directive = self.line_directive(statement);
                let mut body = String::new();
                self.compile_statement(env, statement, &mut body);
                self.initializer_body.push_str(&directive);
                for line in body.lines() {
                    self.initializer_body.push_str(&format!("    {line}\n"));
                }
            }
        }
    }

    /// Emits a type namespace's methods, constants and nested definitions.
    fn emit_namespace_members(&mut self, env: &mut CEnv, qualified: &str, namespace: &Ast<'base>) {
        let AstKind::Block(statements) = &namespace.kind else { return };
        // Namespace members are visible to each other by bare name
        env.push_scope();
        if let Some(members) = self.context.namespaces.get(qualified) {
            for (name, binding) in members {
                env.bind(name.clone(), CBinding { code: binding.code.clone(), ty: binding.ty });
            }
        }
        for (position, statement) in statements.iter().enumerate() {
            match &statement.kind {
                AstKind::FunctionDef(def) => {
                    let method_name = format!("{qualified}.{}", def.name);
                    self.emit_function(env, statement, def, &method_name, true);
                }
                AstKind::ConvertDef(def) => {
                    self.emit_convert(env, statement, def, qualified, position);
                }
                AstKind::Declare { var, value, .. } => {
                    let AstKind::Var(name) = &var.kind else { continue };
                    let ty = self.context.type_of(var);
                    let code = format!("{}${name}", mangle(qualified));
                    self.globals.push_str(&format!(
                        "{};\n",
                        super::ctype::c_declaration(self.context, ty, &code)
                    ));
                    self.header_decls.push_str(&format!(
                        "extern {};\n",
                        super::ctype::c_declaration(self.context, ty, &code)
                    ));
                    if let Some(value) = value {
                        let directive = self.line_directive(statement);
                        let compiled = self.compile_expression(env, value);
                        self.initializer_body.push_str(&directive);
                        self.initializer_body.push_str(&format!("    {code} = {compiled};\n"));
                    }
                }
                AstKind::StructDef(def) => {
                    let nested = format!("{qualified}.{}", def.name);
                    self.emit_namespace_members(env, &nested, &def.namespace);
                }
                AstKind::EnumDef(def) => {
                    let nested = format!("{qualified}.{}", def.name);
                    self.emit_namespace_members(env, &nested, &def.namespace);
                }
                _ => {
                    let directive = self.line_directive(statement);
                    let mut body = String::new();
                    self.compile_statement(env, statement, &mut body);
                    self.initializer_body.push_str(&directive);
                    for line in body.lines() {
                        self.initializer_body.push_str(&format!("    {line}\n"));
                    }
                }
            }
        }
        env.pop_scope();
    }

    /// Replays deferred blocks from the top of the stack down to `base`,
    /// newest first.
    pub fn unwind_defers(&self, env: &CEnv, base: usize, out: &mut String) {
        for deferral in env.deferred[base..].iter().rev() {
            out.push_str(&deferral.code);
        }
    }

    /// Compiles a statement, appending C lines to `out`.
    pub fn compile_statement(&mut self, env: &mut CEnv, ast: &Ast<'base>, out: &mut String) {
        match &ast.kind {
            AstKind::Block(statements) => {
                env.push_scope();
                let defer_base = env.deferred.len();
                out.push_str("{\n");
                for statement in statements {
                    out.push_str(&self.line_directive(statement));
                    self.compile_statement(env, statement, out);
                }
                // Block exit runs this block's defers in reverse
                self.unwind_defers(env, defer_base, out);
                env.deferred.truncate(defer_base);
                out.push_str("}\n");
                env.pop_scope();
            }
            AstKind::Declare { var, value, .. } => {
                let AstKind::Var(name) = &var.kind else { return };
                let ty = self.context.type_of(var);
                let code = format!("_${name}");
                let compiled = match value {
                    Some(value) => self.compile_expression(env, value),
                    None => "{0}".to_string(),
                };
                out.push_str(&format!(
                    "{} = {compiled};\n",
                    super::ctype::c_declaration(self.context, ty, &code)
                ));
                env.bind(name.to_string(), CBinding { code, ty });
            }
            AstKind::Assign { targets, values } => {
                // Values are evaluated into temporaries first so that
                // `a, b = b, a` swaps correctly
                let mut tmps = Vec::new();
                for value in values {
                    let ty = self.context.type_of(value);
                    let tmp = self.fresh("assign");
                    let compiled = self.compile_expression(env, value);
                    out.push_str(&format!(
                        "{} = {compiled};\n",
                        super::ctype::c_declaration(self.context, ty, &tmp)
                    ));
                    tmps.push(tmp);
                }
                for (target, tmp) in targets.iter().zip(tmps) {
                    let place = self.compile_expression(env, target);
                    out.push_str(&format!("{place} = {tmp};\n"));
                }
            }
            AstKind::UpdateAssign(op) => {
                self.compile_update_assign(env, op, out);
            }
            AstKind::If { condition, body, else_body } => {
                self.compile_if(env, condition, body, else_body.as_deref(), out);
            }
            AstKind::When { subject, clauses, else_body } => {
                self.compile_when(env, subject, clauses, else_body.as_deref(), out);
            }
            AstKind::For { vars, iter, body, empty } => {
                self.compile_for(env, vars, iter, body, empty.as_deref(), out);
            }
            AstKind::While { condition, body } => {
                let skip_label = self.fresh("skip");
                let stop_label = self.fresh("stop");
                let compiled_condition = self.compile_expression(env, condition);
                env.loops.push(LoopFrame {
                    skip_label: skip_label.clone(),
                    stop_label: stop_label.clone(),
                    defer_base: env.deferred.len(),
                    var_names: vec!["while".to_string()],
                });
                out.push_str(&format!("while ({compiled_condition}) {{\n"));
                self.compile_statement(env, body, out);
                out.push_str(&format!("{skip_label}: ;\n}}\n{stop_label}: ;\n"));
                env.loops.pop();
            }
            AstKind::Repeat(body) => {
                let skip_label = self.fresh("skip");
                let stop_label = self.fresh("stop");
                env.loops.push(LoopFrame {
                    skip_label: skip_label.clone(),
                    stop_label: stop_label.clone(),
                    defer_base: env.deferred.len(),
                    var_names: vec!["repeat".to_string()],
                });
                out.push_str("for (;;) {\n");
                self.compile_statement(env, body, out);
                out.push_str(&format!("{skip_label}: ;\n}}\n{stop_label}: ;\n"));
                env.loops.pop();
            }
            AstKind::Pass => out.push_str("(void)0;\n"),
            AstKind::Skip(target) | AstKind::Stop(target) => {
                let is_skip = matches!(ast.kind, AstKind::Skip(_));
                let frame = find_loop_frame(env, target.as_deref());
                let Some(frame) = frame else {
                    unreachable!("loop controls outside loops are rejected by the checker");
                };
                let (label, defer_base) = if is_skip {
                    (frame.skip_label.clone(), frame.defer_base)
                } else {
                    (frame.stop_label.clone(), frame.defer_base)
                };
                self.unwind_defers(env, defer_base, out);
                out.push_str(&format!("goto {label};\n"));
            }
            AstKind::Return(value) => {
                let compiled = value.as_ref().map(|value| self.compile_expression(env, value));
                // Returns unwind every deferral in the function
                self.unwind_defers(env, 0, out);
                match compiled {
                    Some(compiled) => out.push_str(&format!("return {compiled};\n")),
                    None => out.push_str("return;\n"),
                }
            }
            AstKind::Defer(body) => {
                let mut deferred = String::new();
                self.compile_statement(env, body, &mut deferred);
                env.deferred.push(Deferral { code: deferred });
            }
            AstKind::Assert { expr, message } => {
                let compiled = self.compile_expression(env, expr);
                let message = match message {
                    Some(message) => self.compile_expression(env, message),
                    None => format!("Text(\"This assertion failed: {}\")", escape_c(ast.span.text())),
                };
                out.push_str(&format!(
                    "if (!({compiled})) fail_source(\"{}\", {}, {}, {message});\n",
                    escape_c(&self.module.file.display_path()),
                    ast.span.position.start,
                    ast.span.position.end,
                ));
            }
            AstKind::DocTest { expr, expected, skip_source } => {
                self.compile_doctest(env, ast, expr, expected.as_deref(), *skip_source, out);
            }
            AstKind::Use { what: UseKind::Local | UseKind::Module, .. } => {
                // Already lowered into the initializer prologue
            }
            _ => {
                // Expression statement
                let ty = self.context.type_of(ast);
                let compiled = self.compile_expression(env, ast);
                if ty == TypeLocation::VOID || ty == TypeLocation::ABORT {
                    out.push_str(&format!("{compiled};\n"));
                } else {
                    out.push_str(&format!("(void)({compiled});\n"));
                }
            }
        }
    }

    fn compile_update_assign(
        &mut self,
        env: &mut CEnv,
        op: &crate::ast::BinaryOperation<'base>,
        out: &mut String,
    ) {
        let lhs_ty = self.context.type_of(&op.lhs);
        let rhs = self.compile_expression(env, &op.rhs);
        if op.lhs.is_idempotent() {
            let place = self.compile_expression(env, &op.lhs);
            let combined = self.compile_binary_values(op.op, lhs_ty, &place, &rhs);
            out.push_str(&format!("{place} = {combined};\n"));
            return;
        }
        // Non-idempotent target: read-modify-write through a pointer
        match &op.lhs.kind {
            AstKind::Index { indexed, index: Some(index), .. }
                if matches!(
                    self.context.types.get(self.context.types.value_type(self.context.type_of(indexed))),
                    TypeValue::Table { .. }
                ) =>
            {
                // Table entries update through get_or_setdefault to avoid
                // double hashing
                let table_ty = self.context.types.value_type(self.context.type_of(indexed));
                let value_ty = match self.context.types.get(table_ty) {
                    TypeValue::Table { value, .. } => *value,
                    _ => unreachable!("guarded by the match arm"),
                };
                let table = self.compile_lvalue_pointer(env, indexed);
                let key = self.compile_expression(env, index);
                let ptr = self.fresh("entry");
                let value_c = c_type(self.context, value_ty);
                let combined = self.compile_binary_values(op.op, value_ty, &format!("(*{ptr})"), &rhs);
                out.push_str(&format!(
                    "{{ {value_c} *{ptr} = ({value_c}*)Table$get_or_setdefault({table}, stack({key}), {info}); \
                     *{ptr} = {combined}; }}\n",
                    info = type_info_ptr(self.context, table_ty),
                ));
            }
            _ => {
                let ptr = self.fresh("target");
                let place = self.compile_lvalue_pointer(env, &op.lhs);
                let lhs_c = c_type(self.context, lhs_ty);
                let combined = self.compile_binary_values(op.op, lhs_ty, &format!("(*{ptr})"), &rhs);
                out.push_str(&format!("{{ {lhs_c} *{ptr} = {place}; *{ptr} = {combined}; }}\n"));
            }
        }
    }

    fn compile_if(
        &mut self,
        env: &mut CEnv,
        condition: &Ast<'base>,
        body: &Ast<'base>,
        else_body: Option<&Ast<'base>>,
        out: &mut String,
    ) {
        if let AstKind::Declare { var, value: Some(value), .. } = &condition.kind {
            // Optional narrowing: the declared variable has the payload
            // type inside the true branch only
            let AstKind::Var(name) = &var.kind else {
                unreachable!("the checker only accepts variable declarations here")
            };
            let optional_ty = self.context.type_of(value);
            let TypeValue::Optional { inner } = self.context.types.get(optional_ty).clone() else {
                unreachable!("narrowing conditions are optional-typed");
            };
            let tmp = self.fresh("cond");
            let compiled = self.compile_expression(env, value);
            let opt_c = super::ctype::optional_c_type(self.context, inner);
            out.push_str(&format!("{{ {opt_c} {tmp} = {compiled};\n"));
            out.push_str(&format!("if (!{}) {{\n", check_none(self.context, inner, &tmp)));
            env.push_scope();
            let code = format!("_${name}");
            out.push_str(&format!(
                "{} = {};\n",
                super::ctype::c_declaration(self.context, inner, &code),
                extract_value(self.context, inner, &tmp)
            ));
            env.bind(name.to_string(), CBinding { code, ty: inner });
            self.compile_statement(env, body, out);
            env.pop_scope();
            out.push_str("}\n");
            if let Some(else_body) = else_body {
                out.push_str("else {\n");
                self.compile_statement(env, else_body, out);
                out.push_str("}\n");
            }
            out.push_str("}\n");
            return;
        }

        let compiled = self.compile_expression(env, condition);
        out.push_str(&format!("if ({compiled}) {{\n"));
        self.compile_statement(env, body, out);
        out.push_str("}\n");
        if let Some(else_body) = else_body {
            out.push_str("else {\n");
            self.compile_statement(env, else_body, out);
            out.push_str("}\n");
        }
    }

    fn compile_when(
        &mut self,
        env: &mut CEnv,
        subject: &Ast<'base>,
        clauses: &[WhenClause<'base>],
        else_body: Option<&Ast<'base>>,
        out: &mut String,
    ) {
        let subject_ty = self.context.types.value_type(self.context.type_of(subject));
        let compiled_subject = self.compile_expression(env, subject);

        if let TypeValue::Enum(enum_type) = self.context.types.get(subject_ty).clone() {
            let mangled = mangle(&enum_type.name);
            let tmp = self.fresh("subject");
            out.push_str(&format!(
                "{{ {} {tmp} = {compiled_subject};\nswitch ({tmp}.$tag) {{\n",
                c_type(self.context, subject_ty)
            ));
            for clause in clauses {
                for pattern in &clause.patterns {
                    let (tag_name, bindings) = match &pattern.kind {
                        AstKind::Var(tag_name) => (tag_name.as_ref(), None),
                        AstKind::FunctionCall { function, args } => match &function.kind {
                            AstKind::Var(tag_name) => (tag_name.as_ref(), Some(args)),
                            _ => unreachable!("checker-validated pattern"),
                        },
                        _ => unreachable!("checker-validated pattern"),
                    };
                    out.push_str(&format!("case {mangled}$tag${tag_name}: {{\n"));
                    env.push_scope();
                    if let Some(args) = bindings {
                        let payload = enum_type
                            .tags
                            .iter()
                            .find(|tag| tag.name == tag_name)
                            .and_then(|tag| tag.payload);
                        if let Some(payload) = payload {
                            let fields = match self.context.types.get(payload) {
                                TypeValue::Struct(s) => s.fields.clone(),
                                _ => Vec::new(),
                            };
                            for (arg, field) in args.iter().zip(fields) {
                                if let AstKind::Var(var_name) = &arg.value.kind {
                                    let code = format!("_${var_name}");
                                    out.push_str(&format!(
                                        "{} = {tmp}.{tag_name}.{};\n",
                                        super::ctype::c_declaration(self.context, field.ty, &code),
                                        field.name
                                    ));
                                    env.bind(var_name.to_string(), CBinding { code, ty: field.ty });
                                }
                            }
                        }
                    }
                    self.compile_statement(env, &clause.body, out);
                    env.pop_scope();
                    out.push_str("break;\n}\n");
                }
            }
            match else_body {
                Some(else_body) => {
                    out.push_str("default: {\n");
                    self.compile_statement(env, else_body, out);
                    out.push_str("break;\n}\n");
                }
                None => out.push_str("default: break;\n"),
            }
            out.push_str("}\n}\n");
            return;
        }

        // Non-enum subject: hoist it and compare arms with ==
        let tmp = self.fresh("subject");
        out.push_str(&format!(
            "{{ {} {tmp} = {compiled_subject};\n",
            c_type(self.context, subject_ty)
        ));
        let mut first = true;
        for clause in clauses {
            let comparisons = clause
                .patterns
                .iter()
                .map(|pattern| {
                    let compiled = self.compile_expression(env, pattern);
                    self.compile_equality(subject_ty, &tmp, &compiled)
                })
                .collect::<Vec<_>>()
                .join(" || ");
            out.push_str(&format!("{}if ({comparisons}) {{\n", if first { "" } else { "else " }));
            first = false;
            self.compile_statement(env, &clause.body, out);
            out.push_str("}\n");
        }
        if let Some(else_body) = else_body {
            out.push_str("else {\n");
            self.compile_statement(env, else_body, out);
            out.push_str("}\n");
        }
        out.push_str("}\n");
    }

    fn compile_for(
        &mut self,
        env: &mut CEnv,
        vars: &[Ast<'base>],
        iter: &Ast<'base>,
        body: &Ast<'base>,
        empty: Option<&Ast<'base>>,
        out: &mut String,
    ) {
        let skip_label = self.fresh("skip");
        let stop_label = self.fresh("stop");
        let var_names: Vec<String> = vars
            .iter()
            .filter_map(|var| match &var.kind {
                AstKind::Var(name) => Some(name.to_string()),
                _ => None,
            })
            .collect();

        // A `for ... else` runs the else block only when no iteration ran
        let ran = empty.map(|_| self.fresh("ran"));
        if let Some(ran) = &ran {
            out.push_str(&format!("Bool_t {ran} = no;\n"));
        }

        env.loops.push(LoopFrame {
            skip_label: skip_label.clone(),
            stop_label: stop_label.clone(),
            defer_base: env.deferred.len(),
            var_names: {
                let mut names = var_names.clone();
                names.push("for".to_string());
                names
            },
        });
        env.push_scope();

        let mut body_text = String::new();
        if let Some(ran) = &ran {
            body_text.push_str(&format!("{ran} = yes;\n"));
        }

        compile_iteration(self, env, iter, vars, &mut body_text, |emitter, env, text| {
            emitter.compile_statement(env, body, text);
        });
        // The skip label sits at the bottom of the loop body
        body_text = body_text.replacen(
            "/*loop-end*/",
            &format!("{skip_label}: ;\n"),
            1,
        );
        out.push_str(&body_text);
        out.push_str(&format!("{stop_label}: ;\n"));

        env.pop_scope();
        env.loops.pop();

        if let (Some(ran), Some(empty)) = (&ran, empty) {
            out.push_str(&format!("if (!{ran}) {{\n"));
            self.compile_statement(env, empty, out);
            out.push_str("}\n");
        }
    }

    fn compile_doctest(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        expr: &Ast<'base>,
        expected: Option<&Ast<'base>>,
        skip_source: bool,
        out: &mut String,
    ) {
        let expected_text = match expected {
            Some(expected) => format!("Text(\"{}\")", escape_c(expected.span.text())),
            None => "NONE_TEXT".to_string(),
        };
        let start = if skip_source { 0 } else { ast.span.position.start };
        let end = if skip_source { 0 } else { expr.span.position.end };
        match &expr.kind {
            // Statement doctests run the statement, then report it
            AstKind::Declare { .. } | AstKind::Assign { .. } | AstKind::UpdateAssign(_) => {
                self.compile_statement(env, expr, out);
                out.push_str(&format!("test(NULL, NULL, {expected_text}, {start}, {end});\n"));
            }
            _ => {
                let ty = self.context.type_of(expr);
                let compiled = self.compile_expression(env, expr);
                if ty == TypeLocation::VOID || ty == TypeLocation::ABORT {
                    out.push_str(&format!("{compiled};\ntest(NULL, NULL, {expected_text}, {start}, {end});\n"));
                } else {
                    out.push_str(&format!(
                        "test(stack({compiled}), {}, {expected_text}, {start}, {end});\n",
                        type_info_ptr(self.context, ty)
                    ));
                }
            }
        }
    }
}

/// Finds the loop frame a `skip`/`stop` targets.
fn find_loop_frame<'a>(env: &'a CEnv, target: Option<&str>) -> Option<&'a LoopFrame> {
    match target {
        None => env.loops.last(),
        Some(target) => env
            .loops
            .iter()
            .rev()
            .find(|frame| frame.var_names.iter().any(|name| name == target)),
    }
}

/// Escapes text for inclusion in a C string literal.
pub fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Emits one of the five iteration strategies around a loop body. The body
/// generator writes into the provided buffer; a `/*loop-end*/` marker is
/// left where the skip label belongs.
pub fn compile_iteration<'ctx, 'base>(
    emitter: &mut Emitter<'ctx, 'base>,
    env: &mut CEnv,
    iter: &Ast<'base>,
    vars: &[Ast<'base>],
    out: &mut String,
    body_gen: impl FnOnce(&mut Emitter<'ctx, 'base>, &mut CEnv, &mut String),
) {
    let iter_ty = emitter.context.type_of(iter);

    let bind_var = |env: &mut CEnv, var: &Ast<'base>, ty: TypeLocation, code: String| {
        if let AstKind::Var(name) = &var.kind {
            env.bind(name.to_string(), CBinding { code, ty });
        }
    };

    // `first.to(last)` iterations skip the iterator closure entirely and
    // lower to a counted loop
    let counted = match &iter.kind {
        AstKind::MethodCall { target, name, args }
            if name == "to"
                && !args.is_empty()
                && emitter
                    .context
                    .types
                    .is_integral(emitter.context.types.value_type(emitter.context.type_of(target))) =>
        {
            let first = emitter.compile_expression(env, target);
            let last = emitter.compile_expression(env, &args[0].value);
            Some((first, last))
        }
        _ => match classify_iterable(emitter.context, iter_ty) {
            Some(Iteration::IntUpTo) => {
                let last = emitter.compile_expression(env, iter);
                Some(("I_small(1)".to_string(), last))
            }
            _ => None,
        },
    };
    if let Some((first_code, last_code)) = counted {
        let i = emitter.fresh("i");
        let last = emitter.fresh("last");
        out.push_str(&format!(
            "{{ Int_t {i} = {first_code};\nInt_t {last} = {last_code};\n\
             for (; Int$compare_value({i}, {last}) <= 0; {i} = Int$plus({i}, I_small(1))) {{\n"
        ));
        if let Some(var) = vars.first() {
            let name = emitter.fresh("x");
            out.push_str(&format!("Int_t {name} = {i};\n"));
            bind_var(env, var, TypeLocation::BIG_INT, name);
        }
        let mut body = String::new();
        body_gen(emitter, env, &mut body);
        out.push_str(&body);
        out.push_str("/*loop-end*/}\n}\n");
        return;
    }

    let iteration = classify_iterable(emitter.context, iter_ty)
        .unwrap_or_else(|| unreachable!("non-iterables are rejected by the checker"));

    match iteration {
        Iteration::IntUpTo => unreachable!("counted loops are handled above"),
        Iteration::List(item) => {
            let list = emitter.fresh("list");
            let i = emitter.fresh("i");
            let compiled = emitter.compile_expression(env, iter);
            let item_c = c_type(emitter.context, item);
            out.push_str(&format!(
                "{{ List_t {list} = {compiled};\n\
                 for (int64_t {i} = 0; {i} < {list}.length; {i}++) {{\n"
            ));
            match vars {
                [index_var, item_var] => {
                    let index_code = emitter.fresh("index");
                    out.push_str(&format!("Int_t {index_code} = I({i} + 1);\n"));
                    bind_var(env, index_var, TypeLocation::BIG_INT, index_code);
                    let item_code = emitter.fresh("item");
                    out.push_str(&format!(
                        "{item_c} {item_code} = *({item_c}*)({list}.data + {i}*{list}.stride);\n"
                    ));
                    bind_var(env, item_var, item, item_code);
                }
                [item_var] => {
                    let item_code = emitter.fresh("item");
                    out.push_str(&format!(
                        "{item_c} {item_code} = *({item_c}*)({list}.data + {i}*{list}.stride);\n"
                    ));
                    bind_var(env, item_var, item, item_code);
                }
                _ => {}
            }
            let mut body = String::new();
            body_gen(emitter, env, &mut body);
            out.push_str(&body);
            out.push_str("/*loop-end*/}\n}\n");
        }
        Iteration::Set(item) => {
            let entries = emitter.fresh("entries");
            let i = emitter.fresh("i");
            let compiled = emitter.compile_expression(env, iter);
            let item_c = c_type(emitter.context, item);
            out.push_str(&format!(
                "{{ List_t {entries} = ({compiled}).entries;\n\
                 for (int64_t {i} = 0; {i} < {entries}.length; {i}++) {{\n"
            ));
            if let Some(var) = vars.first() {
                let item_code = emitter.fresh("item");
                out.push_str(&format!(
                    "{item_c} {item_code} = *({item_c}*)({entries}.data + {i}*{entries}.stride);\n"
                ));
                bind_var(env, var, item, item_code);
            }
            let mut body = String::new();
            body_gen(emitter, env, &mut body);
            out.push_str(&body);
            out.push_str("/*loop-end*/}\n}\n");
        }
        Iteration::Table(key, value) => {
            let entries = emitter.fresh("entries");
            let i = emitter.fresh("i");
            let compiled = emitter.compile_expression(env, iter);
            let key_c = c_type(emitter.context, key);
            let value_c = c_type(emitter.context, value);
            let value_offset = emitter
                .context
                .types
                .size_of(key)
                .next_multiple_of(emitter.context.types.align_of(value).max(1));
            out.push_str(&format!(
                "{{ List_t {entries} = ({compiled}).entries;\n\
                 for (int64_t {i} = 0; {i} < {entries}.length; {i}++) {{\n"
            ));
            match vars {
                [key_var, value_var] => {
                    let key_code = emitter.fresh("key");
                    out.push_str(&format!(
                        "{key_c} {key_code} = *({key_c}*)({entries}.data + {i}*{entries}.stride);\n"
                    ));
                    bind_var(env, key_var, key, key_code);
                    let value_code = emitter.fresh("value");
                    out.push_str(&format!(
                        "{value_c} {value_code} = *({value_c}*)({entries}.data + {i}*{entries}.stride + {value_offset});\n"
                    ));
                    bind_var(env, value_var, value, value_code);
                }
                [key_var] => {
                    let key_code = emitter.fresh("key");
                    out.push_str(&format!(
                        "{key_c} {key_code} = *({key_c}*)({entries}.data + {i}*{entries}.stride);\n"
                    ));
                    bind_var(env, key_var, key, key_code);
                }
                _ => {}
            }
            let mut body = String::new();
            body_gen(emitter, env, &mut body);
            out.push_str(&body);
            out.push_str("/*loop-end*/}\n}\n");
        }
        Iteration::Iterator(item) => {
            let next = emitter.fresh("next");
            let current = emitter.fresh("cur");
            let compiled = emitter.compile_expression(env, iter);
            let function = match emitter.context.types.get(emitter.context.types.value_type(iter_ty)) {
                TypeValue::Closure { function } => *function,
                other => match other {
                    TypeValue::Function(_) => emitter.context.types.value_type(iter_ty),
                    _ => unreachable!("iterator iterables are closures"),
                },
            };
            let ret = match emitter.context.types.get(function) {
                TypeValue::Function(signature) => signature.ret,
                _ => unreachable!("closures wrap functions"),
            };
            let enum_c = c_type(emitter.context, ret);
            let enum_mangled = match emitter.context.types.get(ret) {
                TypeValue::Enum(e) => mangle(&e.name),
                _ => unreachable!("iterator protocol returns an enum"),
            };
            let (payload_field, _) = match emitter.context.types.get(ret) {
                TypeValue::Enum(e) => {
                    let next_tag = e.tags.iter().find(|tag| tag.name == "Next").expect("iterator protocol");
                    let payload = next_tag.payload.expect("Next carries a payload");
                    let field = match emitter.context.types.get(payload) {
                        TypeValue::Struct(s) => s.fields[0].name.to_string(),
                        _ => unreachable!("payloads are structs"),
                    };
                    (field, payload)
                }
                _ => unreachable!("iterator protocol returns an enum"),
            };
            let item_c = c_type(emitter.context, item);
            out.push_str(&format!(
                "{{ Closure_t {next} = {compiled};\nfor (;;) {{\n\
                 {enum_c} {current} = (({enum_c} (*)(void*)){next}.fn)({next}.userdata);\n\
                 if ({current}.$tag == {enum_mangled}$tag$Done) break;\n"
            ));
            if let Some(var) = vars.first() {
                let item_code = emitter.fresh("item");
                out.push_str(&format!("{item_c} {item_code} = {current}.Next.{payload_field};\n"));
                bind_var(env, var, item, item_code);
            }
            let mut body = String::new();
            body_gen(emitter, env, &mut body);
            out.push_str(&body);
            out.push_str("/*loop-end*/}\n}\n");
        }
    }
}
