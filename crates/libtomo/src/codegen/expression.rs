//! Expression lowering to C.
//!
//! Pure fragments compose directly; anything that needs statements (block
//! expressions, closure calls, optional checks, comprehension
//! accumulators, reductions) is wrapped in a GCC statement expression
//! `({ ...; result; })` to preserve evaluation order. Promotions recorded
//! by the checker are applied on the way out of every node.

use crate::ast::{Ast, AstKind, BinOp, CallArg};
use crate::tir::resolver::mangle;
use crate::types::{Promotion, TypeLocation, TypeValue};

use super::ctype::{
    c_type, check_none, extract_value, none_value, optional_c_type, promote_to_optional, type_info_ptr,
};
use super::statement::{compile_iteration, escape_c};
use super::{CBinding, CEnv, Emitter};

impl<'ctx, 'base> Emitter<'ctx, 'base> {
    /// Compiles an expression, applying any promotion the checker
    /// recorded for the node.
    pub fn compile_expression(&mut self, env: &mut CEnv, ast: &Ast<'base>) -> String {
        let raw = self.compile_raw_expression(env, ast);
        match self.context.promotion_of(ast.index) {
            Some(promotion) => self.apply_promotion(ast, promotion, raw),
            None => raw,
        }
    }

    fn apply_promotion(&mut self, ast: &Ast<'base>, promotion: Promotion, code: String) -> String {
        let actual = self.context.type_of(ast);
        match promotion {
            Promotion::Identical => code,
            Promotion::NumericWiden(target) => self.numeric_cast(actual, target, &code),
            Promotion::WrapOptional(inner) => {
                let widened = if self.context.types.equal(actual, inner) {
                    code
                } else {
                    self.numeric_cast(actual, inner, &code)
                };
                promote_to_optional(self.context, inner, &widened)
            }
            Promotion::OptionalTruthiness => {
                let inner = self.context.types.non_optional(actual);
                format!("(!{})", check_none(self.context, inner, &code))
            }
            Promotion::FunctionToClosure => {
                format!("((Closure_t){{.fn=(void*)({code}), .userdata=NULL}})")
            }
            Promotion::AutoDeref => format!("(*({code}))"),
            Promotion::TextToCString => format!("Text$as_c_string({code})"),
            Promotion::SetToList => format!("(({code}).entries)"),
            Promotion::EnumConstructor(enum_ty, tag_index) => {
                let TypeValue::Enum(e) = self.context.types.get(enum_ty) else {
                    unreachable!("enum constructors promote to enums");
                };
                format!("{}$tagged${}({code})", mangle(&e.name), e.tags[tag_index].name)
            }
        }
    }

    fn numeric_cast(&self, actual: TypeLocation, target: TypeLocation, code: &str) -> String {
        match self.context.types.get(target) {
            TypeValue::BigInt => match self.context.types.get(actual) {
                TypeValue::BigInt => code.to_string(),
                _ => format!("I((Int64_t)({code}))"),
            },
            _ => format!("(({})({code}))", c_type(self.context, target)),
        }
    }

    fn compile_raw_expression(&mut self, env: &mut CEnv, ast: &Ast<'base>) -> String {
        match &ast.kind {
            AstKind::None { .. } => {
                let ty = self.context.type_of(ast);
                let inner = self.context.types.non_optional(ty);
                none_value(self.context, inner)
            }
            AstKind::Bool(value) => if *value { "yes" } else { "no" }.to_string(),
            AstKind::Int { digits, base } => self.compile_int_literal(ast, digits, *base),
            AstKind::Num(value) => {
                let ty = self.context.type_of(ast);
                let suffix = if self.context.types.get(ty) == &(TypeValue::Num { bits: 32 }) { "f" } else { "" };
                if value.fract() == 0.0 && value.is_finite() {
                    format!("{value:.1}{suffix}")
                } else {
                    format!("{value}{suffix}")
                }
            }
            AstKind::TextLiteral(text) => format!("Text(\"{}\")", escape_c(text)),
            AstKind::TextJoin { lang, chunks } => self.compile_text_join(env, ast, lang.as_deref(), chunks),
            AstKind::PathLiteral(path) => format!("Path$from_str(\"{}\")", escape_c(path)),
            AstKind::Var(name) => match env.lookup(name) {
                Some(binding) => binding.code.clone(),
                None => unreachable!("unknown names are rejected by the checker: {name}"),
            },

            AstKind::BinaryOp(op) => {
                let ty = self.context.type_of(&op.lhs);
                let promoted_ty = match self.context.promotion_of(op.lhs.index) {
                    Some(Promotion::NumericWiden(target)) => target,
                    Some(Promotion::OptionalTruthiness) => TypeLocation::BOOL,
                    _ => ty,
                };
                let lhs = self.compile_expression(env, &op.lhs);
                let rhs = self.compile_expression(env, &op.rhs);
                if let Some(key) = &op.key {
                    return self.compile_min_max_keyed(env, op.op, promoted_ty, &lhs, &rhs, key);
                }
                self.compile_binary_operation(env, op, promoted_ty, &lhs, &rhs)
            }
            AstKind::UpdateAssign(_) => {
                let mut out = String::new();
                self.compile_statement(env, ast, &mut out);
                format!("({{ {out} }})")
            }
            AstKind::Not(value) => {
                let value_ty = self.context.type_of(value);
                let compiled = self.compile_expression(env, value);
                match self.context.types.get(value_ty) {
                    TypeValue::BigInt => format!("Int$negated({compiled})"),
                    TypeValue::Int { .. } | TypeValue::Byte => format!("(~({compiled}))"),
                    _ => format!("(!({compiled}))"),
                }
            }
            AstKind::Negative(value) => {
                let value_ty = self.context.type_of(value);
                let compiled = self.compile_expression(env, value);
                match self.context.types.get(value_ty) {
                    TypeValue::BigInt => format!("Int$negative({compiled})"),
                    _ => format!("(-({compiled}))"),
                }
            }
            AstKind::HeapAllocate(value) => {
                let value_ty = self.context.type_of(value);
                let compiled = self.compile_expression(env, value);
                let value_c = c_type(self.context, value_ty);
                let tmp = self.fresh("heap");
                format!(
                    "({{ {value_c} *{tmp} = GC_MALLOC(sizeof({value_c})); *{tmp} = {compiled}; {tmp}; }})"
                )
            }
            AstKind::StackReference(value) => {
                let compiled = self.compile_lvalue_pointer(env, value);
                compiled
            }
            AstKind::Optional(value) => self.compile_expression(env, value),
            AstKind::NonOptional(value) => {
                let value_ty = self.context.type_of(value);
                let inner = self.context.types.non_optional(value_ty);
                let compiled = self.compile_expression(env, value);
                let tmp = self.fresh("opt");
                let opt_c = optional_c_type(self.context, inner);
                format!(
                    "({{ {opt_c} {tmp} = {compiled}; if ({check}) fail_source(\"{file}\", {start}, {end}, \
                     Text(\"This value was expected to be non-none\")); {value}; }})",
                    check = check_none(self.context, inner, &tmp),
                    file = escape_c(&self.module.file.display_path()),
                    start = ast.span.position.start,
                    end = ast.span.position.end,
                    value = extract_value(self.context, inner, &tmp),
                )
            }

            AstKind::List(items) => self.compile_list_literal(env, ast, items),
            AstKind::Set(items) => self.compile_set_literal(env, ast, items),
            AstKind::Table { entries, fallback, default_value } => {
                self.compile_table_literal(env, ast, entries, fallback.as_deref(), default_value.as_deref())
            }
            AstKind::TableEntry { .. } => unreachable!("table entries only appear inside table literals"),
            AstKind::Comprehension { .. } => {
                // A bare comprehension is list-valued
                let ty = self.context.type_of(ast);
                let TypeValue::List { item } = self.context.types.get(ty).clone() else {
                    unreachable!("bare comprehensions build lists");
                };
                self.compile_accumulated(env, std::slice::from_ref(ast), item, AccumulatorKind::List)
            }

            AstKind::FieldAccess { fielded, field } => self.compile_field_access(env, ast, fielded, field),
            AstKind::Index { indexed, index, unchecked } => {
                self.compile_index(env, ast, indexed, index.as_deref(), *unchecked)
            }
            AstKind::FunctionCall { function, args } => self.compile_call(env, ast, function, args),
            AstKind::MethodCall { target, name, args } => self.compile_method_call(env, ast, target, name, args),
            AstKind::Lambda(lambda) => self.compile_lambda(env, ast, lambda),
            AstKind::Reduction { iter, op, key } => self.compile_reduction(env, ast, iter, *op, key.as_deref()),
            AstKind::InlineCCode { chunks, .. } => {
                let mut code = String::new();
                for chunk in chunks {
                    match &chunk.kind {
                        AstKind::TextLiteral(text) => code.push_str(text),
                        _ => code.push_str(&self.compile_expression(env, chunk)),
                    }
                }
                let ty = self.context.type_of(ast);
                if ty == TypeLocation::VOID {
                    format!("({{ {code}; }})")
                } else {
                    format!("({code})")
                }
            }
            AstKind::Deserialize { value, .. } => {
                let ty = self.context.type_of(ast);
                let compiled = self.compile_expression(env, value);
                let tmp = self.fresh("deser");
                let ty_c = c_type(self.context, ty);
                format!(
                    "({{ {ty_c} {tmp}; generic_deserialize({compiled}, &{tmp}, {info}); {tmp}; }})",
                    info = type_info_ptr(self.context, ty)
                )
            }
            AstKind::ExplicitlyTyped { inner, .. } => self.compile_expression(env, inner),

            // Block-bearing forms in expression position compile through a
            // result temporary in a statement expression
            AstKind::Block(_) | AstKind::If { .. } | AstKind::When { .. } => {
                let ty = self.context.type_of(ast);
                if ty == TypeLocation::VOID || ty == TypeLocation::ABORT {
                    let mut out = String::new();
                    self.compile_statement(env, ast, &mut out);
                    return format!("({{ {out} }})");
                }
                let tmp = self.fresh("result");
                let ty_c = c_type(self.context, ty);
                let mut out = String::new();
                self.compile_into(env, ast, &tmp, &mut out);
                format!("({{ {ty_c} {tmp}; {out} {tmp}; }})")
            }

            other => unreachable!("{other:?} is not an expression"),
        }
    }

    /// Compiles a block-bearing expression so its result lands in
    /// `target`.
    pub fn compile_into(&mut self, env: &mut CEnv, ast: &Ast<'base>, target: &str, out: &mut String) {
        match &ast.kind {
            AstKind::Block(statements) => {
                env.push_scope();
                let defer_base = env.deferred.len();
                out.push_str("{\n");
                for (i, statement) in statements.iter().enumerate() {
                    if i + 1 == statements.len() {
                        self.compile_into(env, statement, target, out);
                    } else {
                        self.compile_statement(env, statement, out);
                    }
                }
                self.unwind_defers(env, defer_base, out);
                env.deferred.truncate(defer_base);
                out.push_str("}\n");
                env.pop_scope();
            }
            AstKind::If { condition, body, else_body } => {
                // Reuse the narrowing machinery by rebuilding the branch
                // bodies as assignments
                match &condition.kind {
                    AstKind::Declare { .. } => {
                        let mut inner = String::new();
                        self.compile_if_expression_with_declaration(env, condition, body, else_body.as_deref(), target, &mut inner);
                        out.push_str(&inner);
                    }
                    _ => {
                        let compiled = self.compile_expression(env, condition);
                        out.push_str(&format!("if ({compiled}) {{\n"));
                        self.compile_into(env, body, target, out);
                        out.push_str("}\n");
                        if let Some(else_body) = else_body {
                            out.push_str("else {\n");
                            self.compile_into(env, else_body, target, out);
                            out.push_str("}\n");
                        }
                    }
                }
            }
            AstKind::When { .. } => {
                // Lower the match as a statement whose arms assign into the
                // target by rebuilding each arm through compile_into
                self.compile_when_into(env, ast, target, out);
            }
            _ => {
                let ty = self.context.type_of(ast);
                let compiled = self.compile_expression(env, ast);
                if ty == TypeLocation::VOID || ty == TypeLocation::ABORT {
                    out.push_str(&format!("{compiled};\n"));
                } else {
                    out.push_str(&format!("{target} = {compiled};\n"));
                }
            }
        }
    }

    fn compile_if_expression_with_declaration(
        &mut self,
        env: &mut CEnv,
        condition: &Ast<'base>,
        body: &Ast<'base>,
        else_body: Option<&Ast<'base>>,
        target: &str,
        out: &mut String,
    ) {
        let AstKind::Declare { var, value: Some(value), .. } = &condition.kind else {
            unreachable!("only declaration conditions reach here");
        };
        let AstKind::Var(name) = &var.kind else {
            unreachable!("narrowing declarations bind plain variables");
        };
        let optional_ty = self.context.type_of(value);
        let TypeValue::Optional { inner } = self.context.types.get(optional_ty).clone() else {
            unreachable!("narrowing conditions are optional-typed");
        };
        let tmp = self.fresh("cond");
        let compiled = self.compile_expression(env, value);
        let opt_c = optional_c_type(self.context, inner);
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
        self.compile_into(env, body, target, out);
        env.pop_scope();
        out.push_str("}\n");
        if let Some(else_body) = else_body {
            out.push_str("else {\n");
            self.compile_into(env, else_body, target, out);
            out.push_str("}\n");
        }
        out.push_str("}\n");
    }

    fn compile_when_into(&mut self, env: &mut CEnv, ast: &Ast<'base>, target: &str, out: &mut String) {
        let AstKind::When { subject, clauses, else_body } = &ast.kind else {
            unreachable!("compile_when_into only lowers when expressions");
        };
        // Rebuild the statement lowering, assigning each arm into target
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
                    self.compile_into(env, &clause.body, target, out);
                    env.pop_scope();
                    out.push_str("break;\n}\n");
                }
            }
            match else_body {
                Some(else_body) => {
                    out.push_str("default: {\n");
                    self.compile_into(env, else_body, target, out);
                    out.push_str("break;\n}\n");
                }
                None => out.push_str("default: break;\n"),
            }
            out.push_str("}\n}\n");
        } else {
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
                self.compile_into(env, &clause.body, target, out);
                out.push_str("}\n");
            }
            if let Some(else_body) = else_body {
                out.push_str("else {\n");
                self.compile_into(env, else_body, target, out);
                out.push_str("}\n");
            }
            out.push_str("}\n");
        }
    }

    fn compile_int_literal(&self, ast: &Ast<'base>, digits: &str, base: u32) -> String {
        let ty = self.context.type_of(ast);
        let literal = match base {
            16 => format!("0x{}", digits.trim_start_matches('-')),
            8 => format!("0{}", digits.trim_start_matches('-')),
            2 => i128::from_str_radix(digits, 2).map(|v| v.abs().to_string()).unwrap_or_default(),
            _ => digits.trim_start_matches('-').to_string(),
        };
        let sign = if digits.starts_with('-') { "-" } else { "" };
        match self.context.types.get(ty) {
            TypeValue::BigInt => {
                let value = i128::from_str_radix(digits, base).unwrap_or(i128::MAX);
                if i32::try_from(value).is_ok() {
                    format!("I_small({sign}{literal})")
                } else if i64::try_from(value).is_ok() {
                    format!("I({sign}{literal}L)")
                } else {
                    format!("Int$from_str(\"{sign}{literal}\")")
                }
            }
            TypeValue::Int { bits } => format!("I{bits}({sign}{literal})"),
            TypeValue::Byte => format!("((Byte_t){sign}{literal})"),
            TypeValue::Num { bits: 32 } => format!("{sign}{literal}.0f"),
            TypeValue::Num { .. } => format!("{sign}{literal}.0"),
            _ => format!("{sign}{literal}"),
        }
    }

    fn compile_text_join(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        lang: Option<&str>,
        chunks: &[Ast<'base>],
    ) -> String {
        let mut parts = Vec::new();
        for chunk in chunks {
            match &chunk.kind {
                AstKind::TextLiteral(text) => parts.push(format!("Text(\"{}\")", escape_c(text))),
                _ => {
                    let chunk_ty = self.context.type_of(chunk);
                    let compiled = self.compile_expression(env, chunk);
                    if matches!(self.context.types.get(chunk_ty), TypeValue::Text { .. }) {
                        parts.push(compiled);
                    } else {
                        parts.push(format!(
                            "generic_as_text(stack({compiled}), no, {})",
                            type_info_ptr(self.context, chunk_ty)
                        ));
                    }
                }
            }
        }
        let joined = match parts.len() {
            0 => "Text(\"\")".to_string(),
            1 => parts.pop().expect("len checked"),
            _ => format!("Texts({})", parts.join(", ")),
        };
        match lang {
            Some(_) => {
                let ty = self.context.type_of(ast);
                format!("(({}))({joined})", c_type(self.context, ty))
            }
            None => joined,
        }
    }

    /// Combines two already-compiled operand values with a binary
    /// operator, dispatching on the operand type.
    pub fn compile_binary_values(&mut self, op: BinOp, ty: TypeLocation, lhs: &str, rhs: &str) -> String {
        let type_value = self.context.types.get(ty).clone();
        match op {
            BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Divide => {
                let c_op = match op {
                    BinOp::Plus => "+",
                    BinOp::Minus => "-",
                    BinOp::Multiply => "*",
                    _ => "/",
                };
                match type_value {
                    TypeValue::BigInt => {
                        let call = match op {
                            BinOp::Plus => "Int$plus",
                            BinOp::Minus => "Int$minus",
                            BinOp::Multiply => "Int$times",
                            _ => "Int$divided_by",
                        };
                        format!("{call}({lhs}, {rhs})")
                    }
                    _ => format!("({lhs} {c_op} {rhs})"),
                }
            }
            BinOp::Mod => match type_value {
                TypeValue::BigInt => format!("Int$modulo({lhs}, {rhs})"),
                TypeValue::Num { bits: 32 } => format!("fmodf({lhs}, {rhs})"),
                TypeValue::Num { .. } => format!("fmod({lhs}, {rhs})"),
                _ => format!("({lhs} % {rhs})"),
            },
            BinOp::Mod1 => match type_value {
                TypeValue::BigInt => format!("Int$modulo1({lhs}, {rhs})"),
                _ => format!("(((({lhs}) - 1) % ({rhs})) + 1)"),
            },
            BinOp::Power => match type_value {
                TypeValue::BigInt => format!("Int$as_num(Int$power({lhs}, {rhs}))"),
                _ => format!("pow((Num_t)({lhs}), (Num_t)({rhs}))"),
            },
            BinOp::Concat => match type_value {
                TypeValue::Text { .. } => format!("Text$concat({lhs}, {rhs})"),
                TypeValue::List { item } => format!(
                    "List$concat({lhs}, {rhs}, {})",
                    type_info_ptr(self.context, item)
                ),
                _ => unreachable!("concat works on text and lists"),
            },
            BinOp::LeftShift | BinOp::RightShift | BinOp::UnsignedLeftShift | BinOp::UnsignedRightShift => {
                match type_value {
                    TypeValue::BigInt => {
                        let call = match op {
                            BinOp::LeftShift => "Int$left_shifted",
                            BinOp::RightShift => "Int$right_shifted",
                            BinOp::UnsignedLeftShift => "Int$unsigned_left_shifted",
                            _ => "Int$unsigned_right_shifted",
                        };
                        format!("{call}({lhs}, {rhs})")
                    }
                    TypeValue::Int { bits } => match op {
                        BinOp::LeftShift => format!("({lhs} << Int64$from_int({rhs}))"),
                        BinOp::RightShift => format!("({lhs} >> Int64$from_int({rhs}))"),
                        BinOp::UnsignedLeftShift => {
                            format!("((Int{bits}_t)((UInt{bits}_t){lhs} << Int64$from_int({rhs})))")
                        }
                        _ => format!("((Int{bits}_t)((UInt{bits}_t){lhs} >> Int64$from_int({rhs})))"),
                    },
                    _ => format!("({lhs} << {rhs})"),
                }
            }
            BinOp::Equals => self.compile_equality(ty, lhs, rhs),
            BinOp::NotEquals => format!("(!{})", self.compile_equality(ty, lhs, rhs)),
            BinOp::LessThan => self.compile_comparison(ty, lhs, rhs, "<"),
            BinOp::LessThanOrEquals => self.compile_comparison(ty, lhs, rhs, "<="),
            BinOp::GreaterThan => self.compile_comparison(ty, lhs, rhs, ">"),
            BinOp::GreaterThanOrEquals => self.compile_comparison(ty, lhs, rhs, ">="),
            BinOp::Compare => self.compile_three_way(ty, lhs, rhs),
            BinOp::Min | BinOp::Max => {
                let c_op = if op == BinOp::Min { "<=" } else { ">=" };
                let comparison = self.compile_comparison(ty, lhs, rhs, c_op);
                format!("({comparison} ? {lhs} : {rhs})")
            }
            BinOp::And | BinOp::Or | BinOp::Xor => match type_value {
                TypeValue::Bool => match op {
                    BinOp::And => format!("({lhs} && {rhs})"),
                    BinOp::Or => format!("({lhs} || {rhs})"),
                    _ => format!("({lhs} != {rhs})"),
                },
                TypeValue::BigInt => {
                    let call = match op {
                        BinOp::And => "Int$bit_and",
                        BinOp::Or => "Int$bit_or",
                        _ => "Int$bit_xor",
                    };
                    format!("{call}({lhs}, {rhs})")
                }
                _ => {
                    let c_op = match op {
                        BinOp::And => "&",
                        BinOp::Or => "|",
                        _ => "^",
                    };
                    format!("({lhs} {c_op} {rhs})")
                }
            },
        }
    }

    fn compile_binary_operation(
        &mut self,
        env: &mut CEnv,
        op: &crate::ast::BinaryOperation<'base>,
        ty: TypeLocation,
        lhs: &str,
        rhs: &str,
    ) -> String {
        // User-defined overloads dispatch through the namespace
        if let Some(method) = op.op.method_name() {
            let lhs_ty = self.context.types.value_type(self.context.type_of(&op.lhs));
            if let Some(type_name) = self.context.nominal_name(lhs_ty) {
                if let Some(binding) = self.context.namespace_member(&type_name, method) {
                    if matches!(self.context.types.get(binding.ty), TypeValue::Function(_)) {
                        return format!("{}({lhs}, {rhs})", binding.code);
                    }
                }
            }
        }

        // `or`/`and` on optionals: none-coalescing with short circuit
        let lhs_ty = self.context.type_of(&op.lhs);
        if let TypeValue::Optional { inner } = self.context.types.get(lhs_ty).clone() {
            if op.op == BinOp::Or && self.context.promotion_of(op.lhs.index).is_none() {
                let tmp = self.fresh("opt");
                let opt_c = optional_c_type(self.context, inner);
                let rhs_ty = self.context.type_of(&op.rhs);
                let fallback_is_optional = matches!(self.context.types.get(rhs_ty), TypeValue::Optional { .. });
                let value = if fallback_is_optional {
                    tmp.clone()
                } else {
                    extract_value(self.context, inner, &tmp)
                };
                return format!(
                    "({{ {opt_c} {tmp} = {lhs}; {check} ? ({rhs}) : {value}; }})",
                    check = check_none(self.context, inner, &tmp),
                );
            }
        }
        let _ = env;
        self.compile_binary_values(op.op, ty, lhs, rhs)
    }

    fn compile_min_max_keyed(
        &mut self,
        env: &mut CEnv,
        op: BinOp,
        ty: TypeLocation,
        lhs: &str,
        rhs: &str,
        key: &Ast<'base>,
    ) -> String {
        // Evaluate the key for both operands and pick the operand whose
        // key wins
        let ty_c = c_type(self.context, ty);
        let a = self.fresh("a");
        let b = self.fresh("b");
        env.push_scope();
        env.bind("$", CBinding { code: a.clone(), ty });
        let key_a = self.compile_expression(env, key);
        env.pop_scope();
        env.push_scope();
        env.bind("$", CBinding { code: b.clone(), ty });
        let key_b = self.compile_expression(env, key);
        env.pop_scope();
        let key_ty = self.context.type_of(key);
        let c_op = if op == BinOp::Min { "<=" } else { ">=" };
        let comparison = self.compile_comparison(key_ty, &key_a, &key_b, c_op);
        format!("({{ {ty_c} {a} = {lhs}; {ty_c} {b} = {rhs}; {comparison} ? {a} : {b}; }})")
    }

    /// Equality on already-compiled values.
    pub fn compile_equality(&mut self, ty: TypeLocation, lhs: &str, rhs: &str) -> String {
        match self.context.types.get(ty) {
            TypeValue::Bool
            | TypeValue::Byte
            | TypeValue::Int { .. }
            | TypeValue::Num { .. }
            | TypeValue::Pointer { .. }
            | TypeValue::CString
            | TypeValue::Function(_) => format!("({lhs} == {rhs})"),
            TypeValue::BigInt => format!("Int$equal_value({lhs}, {rhs})"),
            TypeValue::Text { .. } => format!("Text$equal_values({lhs}, {rhs})"),
            _ => format!(
                "generic_equal(stack({lhs}), stack({rhs}), {})",
                type_info_ptr(self.context, ty)
            ),
        }
    }

    /// Ordering comparisons on already-compiled values.
    pub fn compile_comparison(&mut self, ty: TypeLocation, lhs: &str, rhs: &str, c_op: &str) -> String {
        match self.context.types.get(ty) {
            TypeValue::Bool | TypeValue::Byte | TypeValue::Int { .. } | TypeValue::Num { .. } => {
                format!("({lhs} {c_op} {rhs})")
            }
            TypeValue::BigInt => format!("(Int$compare_value({lhs}, {rhs}) {c_op} 0)"),
            TypeValue::Text { .. } => format!("(Text$compare_values({lhs}, {rhs}) {c_op} 0)"),
            _ => format!(
                "(generic_compare(stack({lhs}), stack({rhs}), {}) {c_op} 0)",
                type_info_ptr(self.context, ty)
            ),
        }
    }

    fn compile_three_way(&mut self, ty: TypeLocation, lhs: &str, rhs: &str) -> String {
        match self.context.types.get(ty) {
            TypeValue::Bool | TypeValue::Byte | TypeValue::Int { .. } | TypeValue::Num { .. } => {
                format!("((Int32_t)(({lhs} > {rhs}) - ({lhs} < {rhs})))")
            }
            TypeValue::BigInt => format!("Int$compare_value({lhs}, {rhs})"),
            TypeValue::Text { .. } => format!("Text$compare_values({lhs}, {rhs})"),
            _ => format!(
                "generic_compare(stack({lhs}), stack({rhs}), {})",
                type_info_ptr(self.context, ty)
            ),
        }
    }

    fn compile_field_access(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        fielded: &Ast<'base>,
        field: &str,
    ) -> String {
        let target_ty = self.context.type_of(fielded);
        let target_value_ty = self.context.types.value_type(target_ty);
        let mut compiled = self.compile_expression(env, fielded);
        // Adjust pointer depth down to the value
        let mut current = target_ty;
        while let TypeValue::Pointer { pointed, .. } = self.context.types.get(current) {
            compiled = format!("(*{compiled})");
            current = *pointed;
        }
        match self.context.types.get(target_value_ty).clone() {
            TypeValue::Struct(_) => format!("({compiled}).{field}"),
            TypeValue::Enum(e) => {
                // Tag test
                format!("(({compiled}).$tag == {}$tag${field})", mangle(&e.name))
            }
            TypeValue::TypeInfo { name, .. } => {
                let binding = self
                    .context
                    .namespace_member(&name, field)
                    .unwrap_or_else(|| unreachable!("namespace members are checked"));
                let member_ty = binding.ty;
                if matches!(self.context.types.get(member_ty), TypeValue::Enum(_)) && binding.code.contains("$tag$") {
                    // A bare enum tag constant
                    format!("(({}){{.$tag={}}})", c_type(self.context, member_ty), binding.code)
                } else {
                    binding.code.clone()
                }
            }
            TypeValue::Module { name } => {
                let module = self.context.modules.get(name.as_ref()).expect("imported module exists");
                let binding = self
                    .context
                    .scope(module.scope)
                    .get(field)
                    .unwrap_or_else(|| unreachable!("module members are checked"));
                binding.code.clone()
            }
            TypeValue::List { .. } if field == "length" => format!("I(({compiled}).length)"),
            TypeValue::Text { .. } if field == "length" => format!("I(({compiled}).length)"),
            TypeValue::Set { .. } => match field {
                "length" => format!("I(({compiled}).entries.length)"),
                "items" => format!("(({compiled}).entries)"),
                _ => unreachable!("set fields are checked"),
            },
            TypeValue::Table { .. } => match field {
                "length" => format!("I(({compiled}).entries.length)"),
                "keys" => format!("Table$keys(stack({compiled}), {})", type_info_ptr(self.context, target_value_ty)),
                "values" => format!("Table$values(stack({compiled}), {})", type_info_ptr(self.context, target_value_ty)),
                "fallback" => format!("Table$fallback({compiled})"),
                _ => unreachable!("table fields are checked"),
            },
            _ => {
                let _ = ast;
                unreachable!("field accesses are checked")
            }
        }
    }

    fn compile_index(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        indexed: &Ast<'base>,
        index: Option<&Ast<'base>>,
        unchecked: bool,
    ) -> String {
        let target_ty = self.context.type_of(indexed);
        let compiled = self.compile_expression(env, indexed);
        let Some(index) = index else {
            // Pointer dereference
            return format!("(*({compiled}))");
        };
        let target_value_ty = self.context.types.value_type(target_ty);
        match self.context.types.get(target_value_ty).clone() {
            TypeValue::List { item } => {
                let item_c = c_type(self.context, item);
                let compiled_index = self.compile_expression(env, index);
                let index_i64 = self.index_to_i64(index, &compiled_index);
                if unchecked {
                    format!("List$get_unchecked({item_c}, {compiled}, {index_i64})")
                } else {
                    format!(
                        "List$get({item_c}, {compiled}, {index_i64}, {}, {})",
                        ast.span.position.start, ast.span.position.end
                    )
                }
            }
            TypeValue::Table { value, has_default, .. } => {
                let value_c = c_type(self.context, value);
                let compiled_index = self.compile_expression(env, index);
                let info = type_info_ptr(self.context, target_value_ty);
                if has_default {
                    format!("Table$get_or_default({value_c}, {compiled}, stack({compiled_index}), {info})")
                } else {
                    format!(
                        "Table$get_optional({}, {compiled}, stack({compiled_index}), {info})",
                        optional_c_type(self.context, value)
                    )
                }
            }
            _ => unreachable!("index targets are checked"),
        }
    }

    fn index_to_i64(&self, index: &Ast<'base>, compiled: &str) -> String {
        let index_ty = self.context.type_of(index);
        match self.context.types.get(index_ty) {
            TypeValue::BigInt => format!("Int64$from_int({compiled})"),
            _ => format!("(int64_t)({compiled})"),
        }
    }

    /// An address-of expression for an assignable place.
    pub fn compile_lvalue_pointer(&mut self, env: &mut CEnv, ast: &Ast<'base>) -> String {
        match &ast.kind {
            AstKind::Index { indexed, index: Some(index), .. } => {
                let target_value_ty = self.context.types.value_type(self.context.type_of(indexed));
                if let TypeValue::List { item } = self.context.types.get(target_value_ty).clone() {
                    let list_ptr = self.compile_lvalue_pointer(env, indexed);
                    let compiled_index = self.compile_expression(env, index);
                    let index_i64 = self.index_to_i64(index, &compiled_index);
                    return format!(
                        "(({}*)List$get_ptr({list_ptr}, {index_i64}, {}, {}))",
                        c_type(self.context, item),
                        ast.span.position.start,
                        ast.span.position.end
                    );
                }
                let compiled = self.compile_expression(env, ast);
                format!("(&({compiled}))")
            }
            AstKind::Index { indexed, index: None, .. } => self.compile_expression(env, indexed),
            _ => {
                let compiled = self.compile_expression(env, ast);
                format!("(&({compiled}))")
            }
        }
    }

    /// Arranges call-site arguments against a signature, compiling each
    /// provided value or the declared default, in parameter order.
    pub fn arrange_call_args(
        &mut self,
        env: &mut CEnv,
        signature: &crate::types::FunctionType<'base>,
        args: &[CallArg<'base>],
        skip_params: usize,
    ) -> Vec<String> {
        let params = &signature.args[skip_params.min(signature.args.len())..];
        let mut sources: Vec<Option<&Ast<'base>>> = vec![None; params.len()];
        for arg in args.iter().filter(|arg| arg.name.is_some()) {
            let name = arg.name.as_deref().expect("filtered on named");
            if let Some(position) = params.iter().position(|param| param.name == name) {
                sources[position] = Some(&arg.value);
            }
        }
        let mut cursor = 0usize;
        for arg in args.iter().filter(|arg| arg.name.is_none()) {
            while cursor < sources.len() && sources[cursor].is_some() {
                cursor += 1;
            }
            if cursor < sources.len() {
                sources[cursor] = Some(&arg.value);
            }
        }
        sources
            .into_iter()
            .enumerate()
            .map(|(i, source)| match source {
                Some(value) => self.compile_expression(env, value),
                None => {
                    let default = params[i].default.unwrap_or_else(|| {
                        unreachable!("missing arguments without defaults are checked")
                    });
                    let default_ast = self.node(default);
                    self.compile_expression(env, default_ast)
                }
            })
            .collect()
    }

    fn compile_call(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        function: &Ast<'base>,
        args: &[CallArg<'base>],
    ) -> String {
        let callee_ty = self.context.type_of(function);
        match self.context.types.get(callee_ty).clone() {
            TypeValue::Function(signature) => {
                let callee = self.compile_expression(env, function);
                let compiled_args = self.arrange_call_args(env, &signature, args, 0);
                format!("{callee}({})", compiled_args.join(", "))
            }
            TypeValue::Closure { function: function_ty } => {
                let TypeValue::Function(signature) = self.context.types.get(function_ty).clone() else {
                    unreachable!("closures wrap functions");
                };
                let callee = self.compile_expression(env, function);
                let compiled_args = self.arrange_call_args(env, &signature, args, 0);
                let closure = self.fresh("closure");
                let mut param_types: Vec<String> =
                    signature.args.iter().map(|arg| c_type(self.context, arg.ty)).collect();
                param_types.push("void*".to_string());
                let mut call_args = compiled_args;
                call_args.push(format!("{closure}.userdata"));
                format!(
                    "({{ Closure_t {closure} = {callee}; (({ret} (*)({params})){closure}.fn)({args}); }})",
                    ret = c_type(self.context, signature.ret),
                    params = param_types.join(", "),
                    args = call_args.join(", "),
                )
            }
            TypeValue::TypeInfo { name, inner } => match self.context.types.get(inner).clone() {
                TypeValue::Struct(s) => {
                    let signature = crate::types::FunctionType {
                        args: s
                            .fields
                            .iter()
                            .map(|field| crate::types::FunctionArg {
                                name: field.name.clone(),
                                ty: field.ty,
                                default: None,
                            })
                            .collect(),
                        ret: inner,
                    };
                    let compiled_args = self.arrange_call_args(env, &signature, args, 0);
                    let assignments = s
                        .fields
                        .iter()
                        .zip(&compiled_args)
                        .map(|(field, value)| format!(".{}={value}", field.name))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("(({}){{{assignments}}})", c_type(self.context, inner))
                }
                TypeValue::Text { .. } => {
                    let text = args
                        .first()
                        .map(|arg| self.compile_expression(env, &arg.value))
                        .unwrap_or_else(|| "Text(\"\")".to_string());
                    format!("(({})({text}))", c_type(self.context, inner))
                }
                _ => unreachable!("uncallable type infos are checked: {name}"),
            },
            _ => {
                let _ = ast;
                unreachable!("uncallable callees are checked")
            }
        }
    }

    fn compile_method_call(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        target: &Ast<'base>,
        name: &str,
        args: &[CallArg<'base>],
    ) -> String {
        let target_ty = self.context.type_of(target);
        let self_ty = self.context.types.value_type(target_ty);

        // Namespace calls: `Shape.Circle(...)`, `Vec2.zero(...)`
        if let TypeValue::TypeInfo { name: type_name, .. } = self.context.types.get(self_ty).clone() {
            let binding = self
                .context
                .namespace_member(&type_name, name)
                .unwrap_or_else(|| unreachable!("namespace members are checked"))
                .clone();
            let TypeValue::Function(signature) = self.context.types.get(binding.ty).clone() else {
                unreachable!("only function members are callable");
            };
            let compiled_args = self.arrange_call_args(env, &signature, args, 0);
            return format!("{}({})", binding.code, compiled_args.join(", "));
        }

        // User-defined methods
        if let Some(type_name) = self.context.nominal_name(self_ty) {
            if let Some(binding) = self.context.namespace_member(&type_name, name).cloned() {
                if let TypeValue::Function(signature) = self.context.types.get(binding.ty).clone() {
                    let has_self = signature
                        .args
                        .first()
                        .map(|arg| self.context.types.equal(self.context.types.value_type(arg.ty), self_ty))
                        .unwrap_or(false);
                    if has_self {
                        let receiver = self.compile_receiver(env, target, signature.args[0].ty);
                        let mut compiled_args = self.arrange_call_args(env, &signature, args, 1);
                        compiled_args.insert(0, receiver);
                        return format!("{}({})", binding.code, compiled_args.join(", "));
                    }
                    let compiled_args = self.arrange_call_args(env, &signature, args, 0);
                    return format!("{}({})", binding.code, compiled_args.join(", "));
                }
            }
        }

        self.compile_builtin_method(env, ast, target, self_ty, name, args)
    }

    /// Adjusts the receiver expression to the pointer depth a method
    /// expects, inserting `&`/`*` as needed.
    fn compile_receiver(&mut self, env: &mut CEnv, target: &Ast<'base>, param_ty: TypeLocation) -> String {
        let have_depth = pointer_depth(self.context, self.context.type_of(target));
        let need_depth = pointer_depth(self.context, param_ty);
        if need_depth > have_depth {
            // Taking one level of address; rvalues are hoisted into a
            // temporary by way of the lvalue-pointer helper
            if target.is_idempotent() {
                self.compile_lvalue_pointer(env, target)
            } else {
                let compiled = self.compile_expression(env, target);
                format!("stack({compiled})")
            }
        } else {
            let mut compiled = self.compile_expression(env, target);
            for _ in need_depth..have_depth {
                compiled = format!("(*{compiled})");
            }
            compiled
        }
    }

    fn compile_builtin_method(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        target: &Ast<'base>,
        self_ty: TypeLocation,
        name: &str,
        args: &[CallArg<'base>],
    ) -> String {
        let compiled_args: Vec<String> = args.iter().map(|arg| self.compile_expression(env, &arg.value)).collect();
        match self.context.types.get(self_ty).clone() {
            TypeValue::BigInt | TypeValue::Int { .. } => {
                let compiled = self.compile_expression(env, target);
                match name {
                    "to" => format!("Int$to({compiled}, {})", compiled_args.join(", ")),
                    "abs" => format!("Int$abs({compiled})"),
                    "clamped" => format!("Int$clamped({compiled}, {})", compiled_args.join(", ")),
                    _ => unreachable!("builtin methods are checked: {name}"),
                }
            }
            TypeValue::Num { bits } => {
                let compiled = self.compile_expression(env, target);
                let suffix = if bits == 32 { "f" } else { "" };
                match name {
                    "abs" => format!("fabs{suffix}({compiled})"),
                    "sqrt" => format!("sqrt{suffix}({compiled})"),
                    "clamped" => format!("Num$clamped({compiled}, {})", compiled_args.join(", ")),
                    _ => unreachable!("builtin methods are checked: {name}"),
                }
            }
            TypeValue::List { item } => {
                let info = type_info_ptr(self.context, item);
                match name {
                    "insert" => {
                        let list_ptr = self.compile_lvalue_pointer(env, target);
                        format!("List$insert({list_ptr}, stack({}), {info})", compiled_args[0])
                    }
                    "insert_all" => {
                        let list_ptr = self.compile_lvalue_pointer(env, target);
                        format!("List$insert_all({list_ptr}, {}, {info})", compiled_args[0])
                    }
                    "pop" => {
                        let list_ptr = self.compile_lvalue_pointer(env, target);
                        format!(
                            "List$pop({}, {list_ptr}, {info})",
                            optional_c_type(self.context, item)
                        )
                    }
                    "clear" => {
                        let list_ptr = self.compile_lvalue_pointer(env, target);
                        format!("List$clear({list_ptr})")
                    }
                    "has" => {
                        let compiled = self.compile_expression(env, target);
                        format!("List$has({compiled}, stack({}), {info})", compiled_args[0])
                    }
                    "reversed" => {
                        let compiled = self.compile_expression(env, target);
                        format!("List$reversed({compiled}, {info})")
                    }
                    "sorted" => {
                        let compiled = self.compile_expression(env, target);
                        format!("List$sorted({compiled}, {info})")
                    }
                    _ => unreachable!("builtin methods are checked: {name}"),
                }
            }
            TypeValue::Set { item } => {
                let info = type_info_ptr(self.context, item);
                match name {
                    "add" => {
                        let set_ptr = self.compile_lvalue_pointer(env, target);
                        format!("Set$add({set_ptr}, stack({}), {info})", compiled_args[0])
                    }
                    "remove" => {
                        let set_ptr = self.compile_lvalue_pointer(env, target);
                        format!("Set$remove({set_ptr}, stack({}), {info})", compiled_args[0])
                    }
                    "has" => {
                        let compiled = self.compile_expression(env, target);
                        format!("Set$has({compiled}, stack({}), {info})", compiled_args[0])
                    }
                    _ => unreachable!("builtin methods are checked: {name}"),
                }
            }
            TypeValue::Table { value, .. } => {
                let info = type_info_ptr(self.context, self_ty);
                match name {
                    "get" => {
                        let compiled = self.compile_expression(env, target);
                        format!(
                            "Table$get_optional({}, {compiled}, stack({}), {info})",
                            optional_c_type(self.context, value),
                            compiled_args[0]
                        )
                    }
                    "set" => {
                        let table_ptr = self.compile_lvalue_pointer(env, target);
                        format!(
                            "Table$set({table_ptr}, stack({}), stack({}), {info})",
                            compiled_args[0], compiled_args[1]
                        )
                    }
                    "remove" => {
                        let table_ptr = self.compile_lvalue_pointer(env, target);
                        format!("Table$remove({table_ptr}, stack({}), {info})", compiled_args[0])
                    }
                    "has" => {
                        let compiled = self.compile_expression(env, target);
                        format!("Table$has({compiled}, stack({}), {info})", compiled_args[0])
                    }
                    _ => unreachable!("builtin methods are checked: {name}"),
                }
            }
            TypeValue::Text { .. } => {
                let compiled = self.compile_expression(env, target);
                match name {
                    "upper" => format!("Text$upper({compiled})"),
                    "lower" => format!("Text$lower({compiled})"),
                    "trimmed" => format!("Text$trimmed({compiled})"),
                    "has" => format!("Text$has({compiled}, {})", compiled_args[0]),
                    "replace" => format!("Text$replace({compiled}, {}, {})", compiled_args[0], compiled_args[1]),
                    "split" => format!("Text$split({compiled}, {})", compiled_args[0]),
                    _ => unreachable!("builtin methods are checked: {name}"),
                }
            }
            _ => {
                let _ = ast;
                unreachable!("method targets are checked")
            }
        }
    }

    fn compile_list_literal(&mut self, env: &mut CEnv, ast: &Ast<'base>, items: &[Ast<'base>]) -> String {
        let ty = self.context.type_of(ast);
        let TypeValue::List { item } = self.context.types.get(ty).clone() else {
            unreachable!("list literals have list types");
        };
        if items.is_empty() {
            return "(List_t){}".to_string();
        }
        if items.iter().any(|i| matches!(i.kind, AstKind::Comprehension { .. })) {
            return self.compile_accumulated(env, items, item, AccumulatorKind::List);
        }
        let item_c = c_type(self.context, item);
        let compiled: Vec<String> = items.iter().map(|i| self.compile_expression(env, i)).collect();
        format!(
            "TypedList({item_c}, {})",
            compiled.join(", ")
        )
    }

    fn compile_set_literal(&mut self, env: &mut CEnv, ast: &Ast<'base>, items: &[Ast<'base>]) -> String {
        let ty = self.context.type_of(ast);
        let TypeValue::Set { item } = self.context.types.get(ty).clone() else {
            unreachable!("set literals have set types");
        };
        if items.is_empty() {
            return "(Table_t){}".to_string();
        }
        self.compile_accumulated(env, items, item, AccumulatorKind::Set)
    }

    fn compile_table_literal(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        entries: &[Ast<'base>],
        fallback: Option<&Ast<'base>>,
        default_value: Option<&Ast<'base>>,
    ) -> String {
        let ty = self.context.type_of(ast);
        let info = type_info_ptr(self.context, ty);
        let acc = self.fresh("table");
        let mut body = format!("Table_t {acc} = (Table_t){{}};\n");
        for entry in entries {
            match &entry.kind {
                AstKind::TableEntry { key, value } => {
                    let compiled_key = self.compile_expression(env, key);
                    let compiled_value = self.compile_expression(env, value);
                    body.push_str(&format!(
                        "Table$set(&{acc}, stack({compiled_key}), stack({compiled_value}), {info});\n"
                    ));
                }
                AstKind::Comprehension { expr, vars, iter, filter } => {
                    env.push_scope();
                    let mut loop_body = String::new();
                    compile_iteration(self, env, iter, vars, &mut loop_body, |emitter, env, text| {
                        let condition = filter.as_ref().map(|filter| emitter.compile_expression(env, filter));
                        let AstKind::TableEntry { key, value } = &expr.kind else {
                            unreachable!("table comprehensions carry entries");
                        };
                        let compiled_key = emitter.compile_expression(env, key);
                        let compiled_value = emitter.compile_expression(env, value);
                        let insert = format!(
                            "Table$set(&{acc}, stack({compiled_key}), stack({compiled_value}), {info});\n"
                        );
                        match condition {
                            Some(condition) => text.push_str(&format!("if ({condition}) {{ {insert} }}\n")),
                            None => text.push_str(&insert),
                        }
                    });
                    loop_body = loop_body.replacen("/*loop-end*/", "", 1);
                    body.push_str(&loop_body);
                    env.pop_scope();
                }
                _ => unreachable!("table literals carry entries"),
            }
        }
        if let Some(default_value) = default_value {
            let compiled = self.compile_expression(env, default_value);
            body.push_str(&format!("Table$set_default(&{acc}, stack({compiled}), {info});\n"));
        }
        if let Some(fallback) = fallback {
            let compiled = self.compile_expression(env, fallback);
            body.push_str(&format!("Table$set_fallback(&{acc}, {compiled});\n"));
        }
        format!("({{ {body}{acc}; }})")
    }

    fn compile_accumulated(
        &mut self,
        env: &mut CEnv,
        items: &[Ast<'base>],
        item_ty: TypeLocation,
        kind: AccumulatorKind,
    ) -> String {
        let info = type_info_ptr(self.context, item_ty);
        let acc = self.fresh("acc");
        let (acc_c, insert_fn) = match kind {
            AccumulatorKind::List => ("List_t", "List$insert"),
            AccumulatorKind::Set => ("Table_t", "Set$add"),
        };
        let mut body = format!("{acc_c} {acc} = ({acc_c}){{}};\n");
        for item in items {
            match &item.kind {
                AstKind::Comprehension { expr, vars, iter, filter } => {
                    env.push_scope();
                    let mut loop_body = String::new();
                    compile_iteration(self, env, iter, vars, &mut loop_body, |emitter, env, text| {
                        let condition = filter.as_ref().map(|filter| emitter.compile_expression(env, filter));
                        let compiled = emitter.compile_expression(env, expr);
                        let insert = format!("{insert_fn}(&{acc}, stack({compiled}), {info});\n");
                        match condition {
                            Some(condition) => text.push_str(&format!("if ({condition}) {{ {insert} }}\n")),
                            None => text.push_str(&insert),
                        }
                    });
                    loop_body = loop_body.replacen("/*loop-end*/", "", 1);
                    body.push_str(&loop_body);
                    env.pop_scope();
                }
                _ => {
                    let compiled = self.compile_expression(env, item);
                    body.push_str(&format!("{insert_fn}(&{acc}, stack({compiled}), {info});\n"));
                }
            }
        }
        format!("({{ {body}{acc}; }})")
    }

    fn compile_reduction(
        &mut self,
        env: &mut CEnv,
        ast: &Ast<'base>,
        iter: &Ast<'base>,
        op: BinOp,
        key: Option<&Ast<'base>>,
    ) -> String {
        let result_ty = self.context.type_of(ast);

        if op.is_comparison() {
            // Chained-comparison reductions short-circuit to a Bool
            let done = self.fresh("done");
            let ok = self.fresh("ok");
            let prev = self.fresh("prev");
            let first = self.fresh("first");
            let mut item_ty = TypeLocation::UNKNOWN;
            let mut body = String::new();
            env.push_scope();
            let item_var = synth_var(iter, "item");
            compile_iteration(self, env, iter, std::slice::from_ref(&item_var), &mut body, |emitter, env, text| {
                let item_binding = env.lookup("item").cloned().expect("bound by the iteration");
                item_ty = item_binding.ty;
                let comparison = {
                    let c_op = match op {
                        BinOp::Equals => "==",
                        BinOp::NotEquals => "!=",
                        BinOp::LessThan => "<",
                        BinOp::LessThanOrEquals => "<=",
                        BinOp::GreaterThan => ">",
                        BinOp::GreaterThanOrEquals => ">=",
                        _ => "==",
                    };
                    emitter.compile_comparison(item_binding.ty, &prev, &item_binding.code, c_op)
                };
                text.push_str(&format!(
                    "if (!{first} && !{comparison}) {{ {ok} = no; goto {done}; }}\n\
                     {first} = no; {prev} = {};\n",
                    item_binding.code
                ));
            });
            env.pop_scope();
            let item_c = c_type(self.context, item_ty);
            return format!(
                "({{ Bool_t {ok} = yes; Bool_t {first} = yes; {item_c} {prev} = ({item_c}){{0}};\n\
                 {body}{done}: ;\n{ok}; }})"
            );
        }

        // Value reductions accumulate into an optional result
        let TypeValue::Optional { inner } = self.context.types.get(result_ty).clone() else {
            unreachable!("value reductions produce optionals");
        };
        let acc = self.fresh("acc");
        let have = self.fresh("have");
        let item_c = c_type(self.context, inner);
        let mut body = String::new();
        env.push_scope();
        let item_var = synth_var(iter, "item");
        compile_iteration(self, env, iter, std::slice::from_ref(&item_var), &mut body, |emitter, env, text| {
            let item_binding = env.lookup("item").cloned().expect("bound by the iteration");
            let combined = match (op, key) {
                (BinOp::Min | BinOp::Max, Some(key)) => {
                    env.push_scope();
                    env.bind("$", CBinding { code: acc.clone(), ty: inner });
                    let key_acc = emitter.compile_expression(env, key);
                    env.pop_scope();
                    env.push_scope();
                    env.bind("$", CBinding { code: item_binding.code.clone(), ty: inner });
                    let key_item = emitter.compile_expression(env, key);
                    env.pop_scope();
                    let key_ty = emitter.context.type_of(key);
                    let c_op = if op == BinOp::Min { "<=" } else { ">=" };
                    let comparison = emitter.compile_comparison(key_ty, &key_acc, &key_item, c_op);
                    format!("({comparison} ? {acc} : {})", item_binding.code)
                }
                _ => emitter.compile_binary_values(op, inner, &acc, &item_binding.code),
            };
            text.push_str(&format!(
                "if (!{have}) {{ {acc} = {}; {have} = yes; }} else {acc} = {combined};\n",
                item_binding.code
            ));
        });
        env.pop_scope();
        format!(
            "({{ {item_c} {acc} = ({item_c}){{0}}; Bool_t {have} = no;\n{body}\
             {have} ? {wrapped} : {none}; }})",
            wrapped = promote_to_optional(self.context, inner, &acc),
            none = none_value(self.context, inner),
        )
    }
}

enum AccumulatorKind {
    List,
    Set,
}

fn pointer_depth(context: &crate::tir::context::TirContext<'_>, mut ty: TypeLocation) -> usize {
    let mut depth = 0;
    while let TypeValue::Pointer { pointed, .. } = context.types.get(ty) {
        depth += 1;
        ty = *pointed;
    }
    depth
}

/// A synthesized loop variable AST for reductions; shares the iterated
/// node's span and state.
fn synth_var<'base>(iter: &Ast<'base>, name: &'static str) -> Ast<'base> {
    Ast::new(iter.span.clone(), AstKind::Var(std::borrow::Cow::Borrowed(name)))
}
