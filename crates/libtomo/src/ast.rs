//! Abstract Syntax Tree definitions for the Tomo language.
//!
//! This module defines the AST produced by the parser and consumed by the
//! type checker (TIR) and the C emitter. The shape mirrors the language
//! itself: one wide sum, [`AstKind`], with roughly seventy variants covering
//! literals, operators, containers, control flow, definitions and calls.
//!
//! # Key design points
//!
//! 1. **Lifetime management**: nodes borrow identifier and literal text from
//!    the source buffer through the `'base` lifetime; nothing is copied
//!    unless an escape sequence forced a new string.
//! 2. **Source spans**: every node carries a [`Span`] and a unique
//!    [`AstIndex`]. The checker never mutates the tree; it records inferred
//!    types in a side table keyed by the index.
//! 3. **Uniform operators**: all binary operators share one structural shape
//!    ([`BinaryOperation`]), so precedence handling, type checking and C
//!    lowering can treat them uniformly. In-place update assignments reuse
//!    the same shape under a different tag.
//!
//! Equality between nodes is structural: spans and indices are ignored, which
//! is what the parser round-trip tests rely on.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use strum_macros::{EnumDiscriminants, EnumIs};

use crate::file::SourceFile;
use crate::nom_tools::Span;
use crate::types::TypeLocation;

/// Unique identifier for AST nodes within a compilation unit.
///
/// Handed out by the parser state's atomic indexer; the checker's side
/// tables (inferred types, promotions, narrowed scopes) are keyed by it.
#[derive(PartialEq, Debug, Copy, Clone, Eq, PartialOrd, Ord, Hash)]
pub struct AstIndex(pub usize);

/// Binary operators, ordered roughly by precedence group.
///
/// `Min`/`Max` are the `_min_`/`_max_` operators; they are the only ones
/// that may carry a key expression (`a _max_ .field b`). `Compare` is the
/// three-way `<>` operator.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum BinOp {
    Power,
    Multiply,
    Divide,
    Mod,
    Mod1,
    Plus,
    Minus,
    Concat,
    LeftShift,
    UnsignedLeftShift,
    RightShift,
    UnsignedRightShift,
    Min,
    Max,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    Compare,
    And,
    Or,
    Xor,
}

impl BinOp {
    /// The operator's binding tightness. Higher binds tighter; `Power` is 9,
    /// the logical operators are 1.
    pub fn tightness(self) -> u8 {
        match self {
            BinOp::Power => 9,
            BinOp::Multiply | BinOp::Divide | BinOp::Mod | BinOp::Mod1 => 8,
            BinOp::Plus | BinOp::Minus => 7,
            BinOp::Concat => 6,
            BinOp::LeftShift | BinOp::RightShift | BinOp::UnsignedLeftShift | BinOp::UnsignedRightShift => 5,
            BinOp::Min | BinOp::Max => 4,
            BinOp::Equals | BinOp::NotEquals => 3,
            BinOp::LessThan
            | BinOp::LessThanOrEquals
            | BinOp::GreaterThan
            | BinOp::GreaterThanOrEquals
            | BinOp::Compare => 2,
            BinOp::And | BinOp::Or | BinOp::Xor => 1,
        }
    }

    /// `Power` is right-associative; everything else is left-associative.
    pub fn is_right_associative(self) -> bool {
        matches!(self, BinOp::Power)
    }

    /// True for operators that produce a `Bool` from an ordering and must
    /// not be chained without parentheses.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Equals
                | BinOp::NotEquals
                | BinOp::LessThan
                | BinOp::LessThanOrEquals
                | BinOp::GreaterThan
                | BinOp::GreaterThanOrEquals
                | BinOp::Compare
        )
    }

    /// True for `_min_`/`_max_`, which share the no-mixing rule with the
    /// comparison operators.
    pub fn is_min_max(self) -> bool {
        matches!(self, BinOp::Min | BinOp::Max)
    }

    /// True for operators that have an in-place update mirror (`+=` etc.).
    pub fn has_update_form(self) -> bool {
        !(self.is_comparison() || self.is_min_max())
    }

    /// The method name a user-defined type can implement to overload this
    /// operator, if overloading is supported for it.
    pub fn method_name(self) -> Option<&'static str> {
        match self {
            BinOp::Power => Some("power"),
            BinOp::Multiply => Some("times"),
            BinOp::Divide => Some("divided_by"),
            BinOp::Mod => Some("modulo"),
            BinOp::Mod1 => Some("modulo1"),
            BinOp::Plus => Some("plus"),
            BinOp::Minus => Some("minus"),
            BinOp::Concat => Some("concat"),
            BinOp::LeftShift => Some("left_shifted"),
            BinOp::RightShift => Some("right_shifted"),
            BinOp::UnsignedLeftShift => Some("unsigned_left_shifted"),
            BinOp::UnsignedRightShift => Some("unsigned_right_shifted"),
            BinOp::And => Some("bit_and"),
            BinOp::Or => Some("bit_or"),
            BinOp::Xor => Some("bit_xor"),
            _ => None,
        }
    }

    /// The surface syntax of the operator.
    pub fn operator_str(self) -> &'static str {
        match self {
            BinOp::Power => "^",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Mod => "mod",
            BinOp::Mod1 => "mod1",
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Concat => "++",
            BinOp::LeftShift => "<<",
            BinOp::UnsignedLeftShift => "<<<",
            BinOp::RightShift => ">>",
            BinOp::UnsignedRightShift => ">>>",
            BinOp::Min => "_min_",
            BinOp::Max => "_max_",
            BinOp::Equals => "==",
            BinOp::NotEquals => "!=",
            BinOp::LessThan => "<",
            BinOp::LessThanOrEquals => "<=",
            BinOp::GreaterThan => ">",
            BinOp::GreaterThanOrEquals => ">=",
            BinOp::Compare => "<>",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.operator_str())
    }
}

/// The shared shape of every binary operation and update assignment.
///
/// `key` is only ever populated for `_min_`/`_max_`, where it names the
/// keying expression applied to both operands before comparing.
#[derive(Debug, PartialEq)]
pub struct BinaryOperation<'base> {
    pub op: BinOp,
    pub lhs: Ast<'base>,
    pub rhs: Ast<'base>,
    pub key: Option<Ast<'base>>,
}

/// How a `use` path should be treated (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
    /// `use ./foo.tm` — path relative to the current file
    Local,
    /// `use foo` — installed library module
    Module,
    /// `use <foo.h>` or `use "foo.h"` — C header passthrough
    Header,
    /// `use foo.c` — C source compiled into the build
    CSource,
    /// `use foo.S` — assembly source compiled into the build
    Asm,
    /// `use foo.so` — shared object linked into the build
    SharedObject,
    /// `use -lfoo` — linker flag passthrough
    LinkerFlag,
}

impl UseKind {
    /// Classifies a `use` path by its shape.
    pub fn classify(path: &str) -> UseKind {
        if path.starts_with("-l") {
            UseKind::LinkerFlag
        } else if path.starts_with('<') || path.ends_with(".h") {
            UseKind::Header
        } else if path.ends_with(".c") {
            UseKind::CSource
        } else if path.ends_with(".S") || path.ends_with(".s") {
            UseKind::Asm
        } else if path.ends_with(".so") {
            UseKind::SharedObject
        } else if path.starts_with("./") || path.starts_with("../") || path.starts_with('/') || path.ends_with(".tm") {
            UseKind::Local
        } else {
            UseKind::Module
        }
    }
}

/// One declared argument of a function, struct field list, or enum tag.
#[derive(Debug, PartialEq)]
pub struct ArgAst<'base> {
    pub name: Cow<'base, str>,
    /// Alternate caller-facing name (`name|alias`)
    pub alias: Option<Cow<'base, str>>,
    pub type_ast: Option<TypeAst<'base>>,
    pub default_value: Option<Ast<'base>>,
    pub span: Span,
}

/// One argument at a call site, positional or named.
#[derive(Debug, PartialEq)]
pub struct CallArg<'base> {
    pub name: Option<Cow<'base, str>>,
    pub value: Ast<'base>,
}

/// One tag of an enum definition.
#[derive(Debug, PartialEq)]
pub struct TagAst<'base> {
    pub name: Cow<'base, str>,
    pub fields: Vec<ArgAst<'base>>,
    pub secret: bool,
    pub span: Span,
}

/// One `is <pattern> [, <pattern>]* then <body>` arm of a `when`.
#[derive(Debug, PartialEq)]
pub struct WhenClause<'base> {
    pub patterns: Vec<Ast<'base>>,
    pub body: Ast<'base>,
}

/// Function cache configuration (`; cache` / `; cache_size=N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAst {
    /// Maximum entry count, when bounded
    pub size: Option<i64>,
}

/// A named function definition.
#[derive(Debug, PartialEq)]
pub struct FunctionDefAst<'base> {
    pub name: Cow<'base, str>,
    pub args: Vec<ArgAst<'base>>,
    pub ret_type: Option<TypeAst<'base>>,
    pub body: Ast<'base>,
    pub cache: Option<CacheAst>,
    pub is_inline: bool,
}

/// A `convert` definition: a constructor-like conversion function living in
/// a type's namespace.
#[derive(Debug, PartialEq)]
pub struct ConvertDefAst<'base> {
    pub args: Vec<ArgAst<'base>>,
    pub ret_type: TypeAst<'base>,
    pub body: Ast<'base>,
}

/// An anonymous function. The `id` makes the lifted C name unique.
#[derive(Debug, PartialEq)]
pub struct LambdaAst<'base> {
    pub args: Vec<ArgAst<'base>>,
    pub ret_type: Option<TypeAst<'base>>,
    pub body: Ast<'base>,
    pub id: usize,
}

/// A struct definition with its namespace block.
#[derive(Debug, PartialEq)]
pub struct StructDefAst<'base> {
    pub name: Cow<'base, str>,
    pub fields: Vec<ArgAst<'base>>,
    pub namespace: Ast<'base>,
    pub secret: bool,
    pub external: bool,
    pub opaque: bool,
}

/// An enum (tagged union) definition with its namespace block.
#[derive(Debug, PartialEq)]
pub struct EnumDefAst<'base> {
    pub name: Cow<'base, str>,
    pub tags: Vec<TagAst<'base>>,
    pub namespace: Ast<'base>,
}

/// A textual sublanguage definition (`lang Path: ...`).
#[derive(Debug, PartialEq)]
pub struct LangDefAst<'base> {
    pub name: Cow<'base, str>,
    pub namespace: Ast<'base>,
}

/// An AST node: a unique index, a source span, and the node payload.
#[derive(Debug)]
pub struct Ast<'base> {
    pub index: AstIndex,
    pub span: Span,
    pub kind: AstKind<'base>,
}

impl<'base> Ast<'base> {
    /// Creates a node over `span`, drawing a fresh index from the parser
    /// state the span carries.
    pub fn new(span: Span, kind: AstKind<'base>) -> Self {
        let index = AstIndex(span.state.next_index());
        Self { index, span, kind }
    }

    /// True when evaluating this expression twice is guaranteed to be
    /// observationally identical and side-effect free. Update assignments
    /// to non-idempotent targets must go through a pointer temporary.
    pub fn is_idempotent(&self) -> bool {
        match &self.kind {
            AstKind::Var(_)
            | AstKind::Bool(_)
            | AstKind::Int { .. }
            | AstKind::Num(_)
            | AstKind::None { .. }
            | AstKind::TextLiteral(_)
            | AstKind::PathLiteral(_) => true,
            AstKind::FieldAccess { fielded, .. } => fielded.is_idempotent(),
            AstKind::Index { indexed, index, .. } => {
                indexed.is_idempotent() && index.as_deref().map(Ast::is_idempotent).unwrap_or(true)
            }
            _ => false,
        }
    }

    /// True for any of the binary-operator variants.
    pub fn is_binary_operation(&self) -> bool {
        matches!(self.kind, AstKind::BinaryOp(_))
    }

    /// True for in-place update assignments.
    pub fn is_update_assignment(&self) -> bool {
        matches!(self.kind, AstKind::UpdateAssign(_))
    }
}

impl PartialEq for Ast<'_> {
    fn eq(&self, other: &Self) -> bool {
        // Structural equality; spans and indices are bookkeeping.
        self.kind == other.kind
    }
}

/// The payload of an AST node.
#[derive(Debug, PartialEq, EnumIs, EnumDiscriminants)]
#[strum_discriminants(name(AstKindDiscriminants))]
pub enum AstKind<'base> {
    /// `none`, with the written type hint when one was given (`none:Int?`)
    None { type_hint: Option<TypeAst<'base>> },
    /// `yes` / `no`
    Bool(bool),
    /// An integer literal, canonical digits (sign included, separators
    /// stripped) plus the base they were written in
    Int { digits: Cow<'base, str>, base: u32 },
    /// A floating point literal
    Num(f64),
    /// A fully cooked (escape-decoded) piece of literal text
    TextLiteral(Cow<'base, str>),
    /// A text literal with interpolations: chunks alternate `TextLiteral`
    /// and arbitrary expressions. `lang` names the text sublanguage.
    TextJoin { lang: Option<Cow<'base, str>>, chunks: Vec<Ast<'base>> },
    /// A path literal such as `(./foo.txt)` or `(~/x)`
    PathLiteral(Cow<'base, str>),

    /// A variable reference
    Var(Cow<'base, str>),

    /// Any binary operation
    BinaryOp(Box<BinaryOperation<'base>>),
    /// Any in-place update assignment (`x += 1`)
    UpdateAssign(Box<BinaryOperation<'base>>),
    /// `not x`
    Not(Box<Ast<'base>>),
    /// `-x`
    Negative(Box<Ast<'base>>),
    /// `@x` — heap allocate
    HeapAllocate(Box<Ast<'base>>),
    /// `&x` — stack reference
    StackReference(Box<Ast<'base>>),
    /// `x?` — wrap in an optional
    Optional(Box<Ast<'base>>),
    /// `x!` — assert non-none and unwrap
    NonOptional(Box<Ast<'base>>),

    /// `[a, b, c]`
    List(Vec<Ast<'base>>),
    /// `|a, b, c|`
    Set(Vec<Ast<'base>>),
    /// `{k=v, ...}` with optional `; fallback=...` / `; default=...`
    Table {
        entries: Vec<Ast<'base>>,
        fallback: Option<Box<Ast<'base>>>,
        default_value: Option<Box<Ast<'base>>>,
    },
    /// One `k=v` entry of a table literal
    TableEntry { key: Box<Ast<'base>>, value: Box<Ast<'base>> },
    /// `expr for vars in iter if filter`
    Comprehension {
        expr: Box<Ast<'base>>,
        vars: Vec<Ast<'base>>,
        iter: Box<Ast<'base>>,
        filter: Option<Box<Ast<'base>>>,
    },

    /// `x.field`
    FieldAccess { fielded: Box<Ast<'base>>, field: Cow<'base, str> },
    /// `x[i]`, `x[]` (pointer dereference), `x[i; unchecked]`
    Index {
        indexed: Box<Ast<'base>>,
        index: Option<Box<Ast<'base>>>,
        unchecked: bool,
    },

    /// A sequence of statements; its type is the last statement's type
    Block(Vec<Ast<'base>>),
    /// `if cond ... else ...`; the condition may be a declaration for
    /// optional narrowing
    If {
        condition: Box<Ast<'base>>,
        body: Box<Ast<'base>>,
        else_body: Option<Box<Ast<'base>>>,
    },
    /// `when subject is ...`
    When {
        subject: Box<Ast<'base>>,
        clauses: Vec<WhenClause<'base>>,
        else_body: Option<Box<Ast<'base>>>,
    },
    /// `for [i,] x in iter ... [else ...]`
    For {
        vars: Vec<Ast<'base>>,
        iter: Box<Ast<'base>>,
        body: Box<Ast<'base>>,
        empty: Option<Box<Ast<'base>>>,
    },
    /// `while cond ...`
    While { condition: Box<Ast<'base>>, body: Box<Ast<'base>> },
    /// `repeat ...` — loop forever
    Repeat(Box<Ast<'base>>),
    /// `pass`
    Pass,
    /// `skip` / `continue`, optionally targeting a named loop variable
    Skip(Option<Cow<'base, str>>),
    /// `stop` / `break`, optionally targeting a named loop variable
    Stop(Option<Cow<'base, str>>),
    /// `return [value]`
    Return(Option<Box<Ast<'base>>>),
    /// `defer ...` — run at scope exit, LIFO
    Defer(Box<Ast<'base>>),
    /// `assert cond [, message]`
    Assert { expr: Box<Ast<'base>>, message: Option<Box<Ast<'base>>> },
    /// `>> expr` with optional `= expected` line
    DocTest {
        expr: Box<Ast<'base>>,
        expected: Option<Box<Ast<'base>>>,
        skip_source: bool,
    },

    /// `x := value` / `x : Type = value`
    Declare {
        var: Box<Ast<'base>>,
        declared_type: Option<TypeAst<'base>>,
        value: Option<Box<Ast<'base>>>,
        top_level: bool,
    },
    /// `a, b = x, y`
    Assign { targets: Vec<Ast<'base>>, values: Vec<Ast<'base>> },
    /// `func name(...) ...`
    FunctionDef(Box<FunctionDefAst<'base>>),
    /// `convert(... -> T) ...`
    ConvertDef(Box<ConvertDefAst<'base>>),
    /// `func(...) ...` — anonymous function
    Lambda(Box<LambdaAst<'base>>),
    /// `struct Name(...)`
    StructDef(Box<StructDefAst<'base>>),
    /// `enum Name(...)`
    EnumDef(Box<EnumDefAst<'base>>),
    /// `lang Name`
    LangDef(Box<LangDefAst<'base>>),
    /// `extend Name: ...` (experimental; rejected by the checker)
    Extend { name: Cow<'base, str>, body: Box<Ast<'base>> },
    /// `extern name : Type`
    Extern { name: Cow<'base, str>, type_ast: TypeAst<'base> },
    /// `use path`
    Use {
        var: Option<Cow<'base, str>>,
        path: Cow<'base, str>,
        what: UseKind,
    },

    /// `f(args...)`
    FunctionCall { function: Box<Ast<'base>>, args: Vec<CallArg<'base>> },
    /// `x.method(args...)`
    MethodCall {
        target: Box<Ast<'base>>,
        name: Cow<'base, str>,
        args: Vec<CallArg<'base>>,
    },
    /// `(op: iter)` — fold `iter` with `op`; `(op.field: iter)` keys the
    /// comparison for min/max reductions
    Reduction {
        iter: Box<Ast<'base>>,
        op: BinOp,
        key: Option<Box<Ast<'base>>>,
    },

    /// `C_code ( ... )` — raw C text with interpolated expressions
    InlineCCode {
        chunks: Vec<Ast<'base>>,
        type_ast: Option<TypeAst<'base>>,
    },
    /// `deserialize(expr -> Type)`
    Deserialize { value: Box<Ast<'base>>, type_ast: TypeAst<'base> },
    /// A checker-synthesized node whose type is pinned rather than inferred
    ExplicitlyTyped {
        inner: Box<Ast<'base>>,
        type_location: TypeLocation,
    },
}

/// Root AST node for a single parsed source file.
#[derive(Debug)]
pub struct FileAst<'base> {
    /// Source file information including path and content
    pub file: SourceFile,
    /// All top-level statements in the file
    pub statements: Vec<Ast<'base>>,
}

/// The surface syntax of a type, exactly as written. Resolved to a semantic
/// type by the checker.
#[derive(Debug, PartialEq)]
pub struct TypeAst<'base> {
    pub span: Span,
    pub kind: TypeAstKind<'base>,
}

/// The payload of a surface type.
#[derive(Debug, PartialEq, EnumIs)]
pub enum TypeAstKind<'base> {
    Unknown,
    /// A named type (`Int`, `Text`, `Foo`)
    Var(Cow<'base, str>),
    /// `@T` (heap) or `&T` (stack)
    Pointer { pointed: Box<TypeAst<'base>>, is_stack: bool },
    /// `[T]`
    List(Box<TypeAst<'base>>),
    /// `|T|`
    Set(Box<TypeAst<'base>>),
    /// `{K=V}` with an optional written default value
    Table {
        key: Box<TypeAst<'base>>,
        value: Box<TypeAst<'base>>,
        default_value: Option<Box<Ast<'base>>>,
    },
    /// `func(args -> Ret)`
    Function { args: Vec<ArgAst<'base>>, ret: Box<TypeAst<'base>> },
    /// `T?`
    Optional(Box<TypeAst<'base>>),
    /// An anonymous enum type; only produced internally (iterator protocol)
    Enum { name: Cow<'base, str>, tags: Vec<TagAst<'base>> },
}

impl Display for TypeAst<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TypeAstKind::Unknown => f.write_str("???"),
            TypeAstKind::Var(name) => f.write_str(name),
            TypeAstKind::Pointer { pointed, is_stack } => {
                write!(f, "{}{pointed}", if *is_stack { "&" } else { "@" })
            }
            TypeAstKind::List(item) => write!(f, "[{item}]"),
            TypeAstKind::Set(item) => write!(f, "|{item}|"),
            TypeAstKind::Table { key, value, .. } => write!(f, "{{{key}={value}}}"),
            TypeAstKind::Function { args, ret } => {
                f.write_str("func(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &arg.type_ast {
                        Some(ty) => write!(f, "{}:{ty}", arg.name)?,
                        Option::None => f.write_str(&arg.name)?,
                    }
                }
                write!(f, " -> {ret})")
            }
            TypeAstKind::Optional(inner) => write!(f, "{inner}?"),
            TypeAstKind::Enum { name, .. } => f.write_str(name),
        }
    }
}

fn escape_text(text: &str, out: &mut Formatter<'_>) -> std::fmt::Result {
    for c in text.chars() {
        match c {
            '\n' => out.write_str("\\n")?,
            '\t' => out.write_str("\\t")?,
            '\r' => out.write_str("\\r")?,
            '\\' => out.write_str("\\\\")?,
            '"' => out.write_str("\\\"")?,
            '$' => out.write_str("\\$")?,
            c => std::fmt::Write::write_char(out, c)?,
        }
    }
    Ok(())
}

fn write_call_args(f: &mut Formatter<'_>, args: &[CallArg<'_>]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        if let Some(name) = &arg.name {
            write!(f, "{name}=")?;
        }
        write!(f, "{}", arg.value)?;
    }
    Ok(())
}

impl Display for Ast<'_> {
    /// Prints the node back as Tomo source with every operator fully
    /// parenthesized. Reparsing the output yields a structurally equal
    /// tree, which the precedence tests exercise.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            AstKind::None { type_hint: Some(ty) } => write!(f, "none:{ty}"),
            AstKind::None { type_hint: Option::None } => f.write_str("none"),
            AstKind::Bool(true) => f.write_str("yes"),
            AstKind::Bool(false) => f.write_str("no"),
            AstKind::Int { digits, base } => match base {
                16 => write!(f, "0x{digits}"),
                8 => write!(f, "0o{digits}"),
                2 => write!(f, "0b{digits}"),
                _ => f.write_str(digits),
            },
            AstKind::Num(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            AstKind::TextLiteral(text) => {
                f.write_str("\"")?;
                escape_text(text, f)?;
                f.write_str("\"")
            }
            AstKind::TextJoin { lang, chunks } => {
                if let Some(lang) = lang {
                    write!(f, "${lang}")?;
                }
                f.write_str("\"")?;
                for chunk in chunks {
                    match &chunk.kind {
                        AstKind::TextLiteral(text) => escape_text(text, f)?,
                        _ => write!(f, "$({chunk})")?,
                    }
                }
                f.write_str("\"")
            }
            AstKind::PathLiteral(path) => write!(f, "({path})"),
            AstKind::Var(name) => f.write_str(name),
            AstKind::BinaryOp(op) => {
                if let Some(key) = &op.key {
                    write!(f, "({} {} {key} {})", op.lhs, op.op, op.rhs)
                } else {
                    write!(f, "({} {} {})", op.lhs, op.op, op.rhs)
                }
            }
            AstKind::UpdateAssign(op) => write!(f, "{} {}= {}", op.lhs, op.op, op.rhs),
            AstKind::Not(value) => write!(f, "not {value}"),
            AstKind::Negative(value) => write!(f, "-{value}"),
            AstKind::HeapAllocate(value) => write!(f, "@{value}"),
            AstKind::StackReference(value) => write!(f, "&{value}"),
            AstKind::Optional(value) => write!(f, "{value}?"),
            AstKind::NonOptional(value) => write!(f, "{value}!"),
            AstKind::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            AstKind::Set(items) => {
                f.write_str("|")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("|")
            }
            AstKind::Table { entries, fallback, default_value } => {
                f.write_str("{")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{entry}")?;
                }
                if fallback.is_some() || default_value.is_some() {
                    f.write_str("; ")?;
                    if let Some(fallback) = fallback {
                        write!(f, "fallback={fallback}")?;
                    }
                    if let Some(default_value) = default_value {
                        if fallback.is_some() {
                            f.write_str(", ")?;
                        }
                        write!(f, "default={default_value}")?;
                    }
                }
                f.write_str("}")
            }
            AstKind::TableEntry { key, value } => write!(f, "{key}={value}"),
            AstKind::Comprehension { expr, vars, iter, filter } => {
                write!(f, "{expr} for ")?;
                for (i, var) in vars.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{var}")?;
                }
                write!(f, " in {iter}")?;
                if let Some(filter) = filter {
                    write!(f, " if {filter}")?;
                }
                Ok(())
            }
            AstKind::FieldAccess { fielded, field } => write!(f, "{fielded}.{field}"),
            AstKind::Index { indexed, index: Some(index), unchecked } => {
                write!(f, "{indexed}[{index}{}]", if *unchecked { "; unchecked" } else { "" })
            }
            AstKind::Index { indexed, index: Option::None, .. } => write!(f, "{indexed}[]"),
            AstKind::Block(statements) => {
                for (i, statement) in statements.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{statement}")?;
                }
                Ok(())
            }
            AstKind::If { condition, body, else_body } => {
                write!(f, "if {condition} then {body}")?;
                if let Some(else_body) = else_body {
                    write!(f, " else {else_body}")?;
                }
                Ok(())
            }
            AstKind::When { subject, clauses, else_body } => {
                write!(f, "when {subject}")?;
                for clause in clauses {
                    f.write_str(" is ")?;
                    for (i, pattern) in clause.patterns.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{pattern}")?;
                    }
                    write!(f, " then {}", clause.body)?;
                }
                if let Some(else_body) = else_body {
                    write!(f, " else {else_body}")?;
                }
                Ok(())
            }
            AstKind::For { vars, iter, body, .. } => {
                f.write_str("for ")?;
                for (i, var) in vars.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{var}")?;
                }
                write!(f, " in {iter} do {body}")
            }
            AstKind::While { condition, body } => write!(f, "while {condition} do {body}"),
            AstKind::Repeat(body) => write!(f, "repeat {body}"),
            AstKind::Pass => f.write_str("pass"),
            AstKind::Skip(Some(target)) => write!(f, "skip {target}"),
            AstKind::Skip(Option::None) => f.write_str("skip"),
            AstKind::Stop(Some(target)) => write!(f, "stop {target}"),
            AstKind::Stop(Option::None) => f.write_str("stop"),
            AstKind::Return(Some(value)) => write!(f, "return {value}"),
            AstKind::Return(Option::None) => f.write_str("return"),
            AstKind::Defer(body) => write!(f, "defer {body}"),
            AstKind::Assert { expr, message: Some(message) } => write!(f, "assert {expr}, {message}"),
            AstKind::Assert { expr, message: Option::None } => write!(f, "assert {expr}"),
            AstKind::DocTest { expr, .. } => write!(f, ">> {expr}"),
            AstKind::Declare { var, declared_type, value, .. } => {
                write!(f, "{var}")?;
                match (declared_type, value) {
                    (Some(ty), Some(value)) => write!(f, " : {ty} = {value}"),
                    (Some(ty), Option::None) => write!(f, " : {ty}"),
                    (Option::None, Some(value)) => write!(f, " := {value}"),
                    (Option::None, Option::None) => Ok(()),
                }
            }
            AstKind::Assign { targets, values } => {
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{target}")?;
                }
                f.write_str(" = ")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
            AstKind::FunctionDef(def) => write!(f, "func {}(...)", def.name),
            AstKind::ConvertDef(def) => write!(f, "convert(... -> {})", def.ret_type),
            AstKind::Lambda(lambda) => {
                f.write_str("func(")?;
                for (i, arg) in lambda.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &arg.type_ast {
                        Some(ty) => write!(f, "{}:{ty}", arg.name)?,
                        Option::None => f.write_str(&arg.name)?,
                    }
                }
                write!(f, ") {}", lambda.body)
            }
            AstKind::StructDef(def) => write!(f, "struct {}(...)", def.name),
            AstKind::EnumDef(def) => write!(f, "enum {}(...)", def.name),
            AstKind::LangDef(def) => write!(f, "lang {}", def.name),
            AstKind::Extend { name, .. } => write!(f, "extend {name}"),
            AstKind::Extern { name, type_ast } => write!(f, "extern {name} : {type_ast}"),
            AstKind::Use { path, .. } => write!(f, "use {path}"),
            AstKind::FunctionCall { function, args } => {
                write!(f, "{function}(")?;
                write_call_args(f, args)?;
                f.write_str(")")
            }
            AstKind::MethodCall { target, name, args } => {
                write!(f, "{target}.{name}(")?;
                write_call_args(f, args)?;
                f.write_str(")")
            }
            AstKind::Reduction { iter, op, key } => match key {
                Some(key) => write!(f, "({}{key}: {iter})", op.operator_str()),
                Option::None => write!(f, "({}: {iter})", op.operator_str()),
            },
            AstKind::InlineCCode { .. } => f.write_str("C_code(...)"),
            AstKind::Deserialize { value, type_ast } => write!(f, "deserialize({value} -> {type_ast})"),
            AstKind::ExplicitlyTyped { inner, .. } => write!(f, "{inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tightness_table_matches_the_grammar() {
        assert_eq!(BinOp::Power.tightness(), 9);
        assert_eq!(BinOp::Multiply.tightness(), 8);
        assert_eq!(BinOp::Plus.tightness(), 7);
        assert_eq!(BinOp::Concat.tightness(), 6);
        assert_eq!(BinOp::LeftShift.tightness(), 5);
        assert_eq!(BinOp::Min.tightness(), 4);
        assert_eq!(BinOp::Equals.tightness(), 3);
        assert_eq!(BinOp::LessThan.tightness(), 2);
        assert_eq!(BinOp::And.tightness(), 1);
    }

    #[test]
    fn update_forms_exclude_comparisons() {
        assert!(BinOp::Plus.has_update_form());
        assert!(BinOp::Concat.has_update_form());
        assert!(!BinOp::Equals.has_update_form());
        assert!(!BinOp::Min.has_update_form());
        assert!(!BinOp::Compare.has_update_form());
    }

    #[test]
    fn use_kind_classification() {
        assert_eq!(UseKind::classify("./foo.tm"), UseKind::Local);
        assert_eq!(UseKind::classify("vectors"), UseKind::Module);
        assert_eq!(UseKind::classify("<math.h>"), UseKind::Header);
        assert_eq!(UseKind::classify("impl.c"), UseKind::CSource);
        assert_eq!(UseKind::classify("boot.S"), UseKind::Asm);
        assert_eq!(UseKind::classify("-lm"), UseKind::LinkerFlag);
    }
}
