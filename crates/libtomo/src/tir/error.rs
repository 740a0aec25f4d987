//! The checker's error catalog.
//!
//! Every diagnostic the compiler can produce is a dedicated struct deriving
//! [`miette::Diagnostic`] with labeled source spans, collected under the
//! [`TirError`] sum. The constructor helpers keep call sites short and make
//! sure every error carries its source context.
//!
//! Error kinds follow the compiler phases: I/O failures, syntax errors
//! forwarded from the parser, bind errors (unknown or duplicate names,
//! cyclic value dependencies), type errors (mismatches, non-orderable
//! comparisons, missing fields, arity problems, non-exhaustive `when`) and
//! semantic errors (`return` outside a function, `skip` outside a loop,
//! stack references escaping into containers, assignment to immutables).

use miette::{Diagnostic, NamedSource, SourceSpan};
use strum_macros::EnumDiscriminants;

use crate::file::SourceFile;
use crate::nom_tools::SpanInfo;

fn source_span(info: &SpanInfo) -> SourceSpan {
    let len = info.position.end.saturating_sub(info.position.start);
    SourceSpan::new(info.position.start.into(), len)
}

fn source_code(info: &SpanInfo) -> NamedSource<String> {
    (&info.file).into()
}

/// Default help message for type-not-found errors when no similar names
/// could be suggested.
pub static TYPE_NOT_FOUND_HELP: &str = "try to import the type, or maybe you need to define it in the current file";

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Couldn't read '{path}': {message}")]
#[diagnostic(code("tomo::error::io"))]
pub struct IoError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Syntax error")]
pub struct SyntaxErrorItem {
    #[label("{message}")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,

    pub message: String,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{} syntax error(s) detected", .errors.len())]
pub struct SyntaxError {
    #[related]
    pub errors: Vec<SyntaxErrorItem>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'{name}' is not defined")]
#[diagnostic(code("tomo::error::unknown_name"))]
pub struct UnknownName {
    pub name: String,

    #[label("no variable or function with this name is in scope")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,

    #[help]
    pub advice: Option<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'{type_name}' type not found")]
#[diagnostic(code("tomo::error::type_not_found"))]
pub struct TypeNotFound {
    pub type_name: String,

    #[label("type is not imported or defined in the current file")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,

    #[help]
    pub advice: String,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Already defined")]
#[diagnostic(code("tomo::error::already_defined"), help("change one of the names or remove the definition"))]
pub struct AlreadyDefined {
    #[label("already defined here")]
    pub old_position: SourceSpan,

    #[label("but it is defined again here")]
    pub new_position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'{module}' not found")]
#[diagnostic(code("tomo::error::import_not_found"), help("try to remove the import or check the module name"))]
pub struct ImportNotFound {
    pub module: String,

    #[label("no module found with this name")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Module already imported")]
#[diagnostic(code("tomo::error::module_already_imported"), help("try to remove one of the imports"))]
pub struct ModuleAlreadyImported {
    #[label("already imported here")]
    pub old_position: SourceSpan,

    #[label("but it is imported again here")]
    pub new_position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Circular dependency on '{name}'")]
#[diagnostic(
    code("tomo::error::circular_reference"),
    help("this value's initializer depends on itself; break the cycle or initialize it inside a function")
)]
pub struct CircularReference {
    pub name: String,

    #[label("this initializer depends on itself")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Type mismatch: expected {expected}, but this is {found}")]
#[diagnostic(code("tomo::error::type_mismatch"))]
pub struct TypeMismatch {
    pub expected: String,
    pub found: String,

    #[label("this has type {found}")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,

    #[help]
    pub advice: Option<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{type_name} values don't have an ordering")]
#[diagnostic(code("tomo::error::not_orderable"))]
pub struct NotOrderable {
    pub type_name: String,

    #[label("this can't be compared")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{type_name} has no field '{field}'")]
#[diagnostic(code("tomo::error::missing_field"))]
pub struct MissingField {
    pub field: String,
    pub type_name: String,

    #[label("no such field or method")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,

    #[help]
    pub advice: Option<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Required argument '{name}' was not provided")]
#[diagnostic(code("tomo::error::missing_argument"))]
pub struct MissingArgument {
    pub name: String,

    #[label("this call is missing '{name}'")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Extra argument in this call")]
#[diagnostic(code("tomo::error::extra_argument"), help("remove the extra argument or check the function's signature"))]
pub struct ExtraArgument {
    #[label("this argument doesn't match any parameter")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("This 'when' doesn't handle: {missing}")]
#[diagnostic(code("tomo::error::non_exhaustive_when"), help("add the missing tags or an 'else' clause"))]
pub struct NonExhaustiveWhen {
    pub missing: String,

    #[label("not all tags are handled here")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("The tag '{tag}' is handled twice")]
#[diagnostic(code("tomo::error::duplicate_when_tag"), help("each tag may be matched at most once"))]
pub struct DuplicateWhenTag {
    pub tag: String,

    #[label("this tag was already handled")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'return' is only allowed inside a function")]
#[diagnostic(code("tomo::error::return_outside_function"))]
pub struct ReturnOutsideFunction {
    #[label("there is no enclosing function to return from")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'{keyword}' is only allowed inside a loop")]
#[diagnostic(code("tomo::error::loop_control_outside_loop"))]
pub struct LoopControlOutsideLoop {
    pub keyword: String,

    #[label("there is no enclosing loop here")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("Stack references can't escape into the heap")]
#[diagnostic(
    code("tomo::error::stack_reference_escape"),
    help("wrap the value in '@' to heap-allocate it instead of taking a stack reference")
)]
pub struct StackReferenceEscape {
    #[label("this stack reference would outlive its stack frame")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'{name}' can't be assigned to")]
#[diagnostic(code("tomo::error::assign_to_immutable"))]
pub struct AssignToImmutable {
    pub name: String,

    #[label("this binding is immutable")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'none' needs a type")]
#[diagnostic(code("tomo::error::none_needs_type"), help("write 'none:T?' so the compiler knows which optional type this is"))]
pub struct NoneNeedsTypeHint {
    #[label("the type of this 'none' can't be inferred")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{value} doesn't fit in {target}")]
#[diagnostic(code("tomo::error::integer_out_of_range"))]
pub struct IntegerOutOfRange {
    pub value: String,
    pub target: String,

    #[label("this literal is out of range for {target}")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{feature} is not yet implemented")]
#[diagnostic(code("tomo::error::not_yet_implemented"))]
pub struct NotYetImplemented {
    pub feature: String,

    #[label("this isn't supported yet")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{what} definitions are only allowed at the top level of a file")]
#[diagnostic(code("tomo::error::top_level_only"))]
pub struct TopLevelOnly {
    pub what: String,

    #[label("move this to the top level")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("'{operator}' doesn't work on {type_name} values")]
#[diagnostic(code("tomo::error::invalid_operand"))]
pub struct InvalidOperand {
    pub operator: String,
    pub type_name: String,

    #[label("this operand has type {type_name}")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{type_name} values can't be called")]
#[diagnostic(code("tomo::error::not_callable"))]
pub struct NotCallable {
    pub type_name: String,

    #[label("this is not a function")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{type_name} values can't be iterated")]
#[diagnostic(
    code("tomo::error::not_iterable"),
    help("loops can iterate lists, sets, tables, integer ranges and iterator functions")
)]
pub struct NotIterable {
    pub type_name: String,

    #[label("this is not iterable")]
    pub position: SourceSpan,

    #[source_code]
    pub code: NamedSource<String>,
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("ooops, multiple errors detected")]
pub struct ErrorCollection {
    #[related]
    pub errors: Vec<TirError>,
}

/// Any error the compiler core can produce.
#[derive(Debug, thiserror::Error, Diagnostic, EnumDiscriminants)]
#[strum_discriminants(name(TirErrorKind))]
pub enum TirError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(Box<IoError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    SyntaxError(Box<SyntaxError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownName(Box<UnknownName>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TypeNotFound(Box<TypeNotFound>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    AlreadyDefined(Box<AlreadyDefined>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ImportNotFound(Box<ImportNotFound>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ModuleAlreadyImported(Box<ModuleAlreadyImported>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    CircularReference(Box<CircularReference>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TypeMismatch(Box<TypeMismatch>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotOrderable(Box<NotOrderable>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    MissingField(Box<MissingField>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    MissingArgument(Box<MissingArgument>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ExtraArgument(Box<ExtraArgument>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NonExhaustiveWhen(Box<NonExhaustiveWhen>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    DuplicateWhenTag(Box<DuplicateWhenTag>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ReturnOutsideFunction(Box<ReturnOutsideFunction>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    LoopControlOutsideLoop(Box<LoopControlOutsideLoop>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    StackReferenceEscape(Box<StackReferenceEscape>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    AssignToImmutable(Box<AssignToImmutable>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NoneNeedsTypeHint(Box<NoneNeedsTypeHint>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    IntegerOutOfRange(Box<IntegerOutOfRange>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotYetImplemented(Box<NotYetImplemented>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TopLevelOnly(Box<TopLevelOnly>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidOperand(Box<InvalidOperand>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotCallable(Box<NotCallable>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotIterable(Box<NotIterable>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ErrorCollection(Box<ErrorCollection>),
}

impl TirError {
    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        TirError::Io(Box::new(IoError { path: path.into(), message: message.into() }))
    }

    pub fn syntax_error(errors: Vec<SyntaxErrorItem>) -> Self {
        TirError::SyntaxError(Box::new(SyntaxError { errors }))
    }

    pub fn unknown_name(name: impl Into<String>, span: &SpanInfo, advice: Option<String>) -> Self {
        TirError::UnknownName(Box::new(UnknownName {
            name: name.into(),
            position: source_span(span),
            code: source_code(span),
            advice,
        }))
    }

    pub fn type_not_found(known_types: impl Iterator<Item = String>, type_name: String, span: &SpanInfo) -> Self {
        let similar: Vec<String> = known_types
            .filter(|known| known.ends_with(type_name.as_str()) || type_name.ends_with(known.as_str()))
            .collect();
        let advice = if similar.is_empty() {
            TYPE_NOT_FOUND_HELP.to_string()
        } else {
            let list = similar.iter().map(|name| format!(" - {name}")).collect::<Vec<_>>().join("\n");
            format!("The following types are similar:\n{list}")
        };
        TirError::TypeNotFound(Box::new(TypeNotFound {
            type_name,
            position: source_span(span),
            code: source_code(span),
            advice,
        }))
    }

    pub fn already_defined(new_span: &SpanInfo, old_position: std::ops::Range<usize>, file: &SourceFile) -> Self {
        let len = old_position.end.saturating_sub(old_position.start);
        TirError::AlreadyDefined(Box::new(AlreadyDefined {
            old_position: SourceSpan::new(old_position.start.into(), len),
            new_position: source_span(new_span),
            code: file.into(),
        }))
    }

    pub fn import_not_found(module: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::ImportNotFound(Box::new(ImportNotFound {
            module: module.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn module_already_imported(old_position: std::ops::Range<usize>, new_span: &SpanInfo) -> Self {
        let len = old_position.end.saturating_sub(old_position.start);
        TirError::ModuleAlreadyImported(Box::new(ModuleAlreadyImported {
            old_position: SourceSpan::new(old_position.start.into(), len),
            new_position: source_span(new_span),
            code: source_code(new_span),
        }))
    }

    pub fn circular_reference(name: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::CircularReference(Box::new(CircularReference {
            name: name.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn type_mismatch(expected: String, found: String, span: &SpanInfo, advice: Option<String>) -> Self {
        TirError::TypeMismatch(Box::new(TypeMismatch {
            expected,
            found,
            position: source_span(span),
            code: source_code(span),
            advice,
        }))
    }

    pub fn not_orderable(type_name: String, span: &SpanInfo) -> Self {
        TirError::NotOrderable(Box::new(NotOrderable {
            type_name,
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn missing_field(field: impl Into<String>, type_name: String, span: &SpanInfo, advice: Option<String>) -> Self {
        TirError::MissingField(Box::new(MissingField {
            field: field.into(),
            type_name,
            position: source_span(span),
            code: source_code(span),
            advice,
        }))
    }

    pub fn missing_argument(name: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::MissingArgument(Box::new(MissingArgument {
            name: name.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn extra_argument(span: &SpanInfo) -> Self {
        TirError::ExtraArgument(Box::new(ExtraArgument {
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn non_exhaustive_when(missing: String, span: &SpanInfo) -> Self {
        TirError::NonExhaustiveWhen(Box::new(NonExhaustiveWhen {
            missing,
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn duplicate_when_tag(tag: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::DuplicateWhenTag(Box::new(DuplicateWhenTag {
            tag: tag.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn return_outside_function(span: &SpanInfo) -> Self {
        TirError::ReturnOutsideFunction(Box::new(ReturnOutsideFunction {
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn loop_control_outside_loop(keyword: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::LoopControlOutsideLoop(Box::new(LoopControlOutsideLoop {
            keyword: keyword.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn stack_reference_escape(span: &SpanInfo) -> Self {
        TirError::StackReferenceEscape(Box::new(StackReferenceEscape {
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn assign_to_immutable(name: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::AssignToImmutable(Box::new(AssignToImmutable {
            name: name.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn none_needs_type_hint(span: &SpanInfo) -> Self {
        TirError::NoneNeedsTypeHint(Box::new(NoneNeedsTypeHint {
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn integer_out_of_range(value: impl Into<String>, target: String, span: &SpanInfo) -> Self {
        TirError::IntegerOutOfRange(Box::new(IntegerOutOfRange {
            value: value.into(),
            target,
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn not_yet_implemented(feature: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::NotYetImplemented(Box::new(NotYetImplemented {
            feature: feature.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn top_level_only(what: impl Into<String>, span: &SpanInfo) -> Self {
        TirError::TopLevelOnly(Box::new(TopLevelOnly {
            what: what.into(),
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn invalid_operand(operator: impl Into<String>, type_name: String, span: &SpanInfo) -> Self {
        TirError::InvalidOperand(Box::new(InvalidOperand {
            operator: operator.into(),
            type_name,
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn not_callable(type_name: String, span: &SpanInfo) -> Self {
        TirError::NotCallable(Box::new(NotCallable {
            type_name,
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn not_iterable(type_name: String, span: &SpanInfo) -> Self {
        TirError::NotIterable(Box::new(NotIterable {
            type_name,
            position: source_span(span),
            code: source_code(span),
        }))
    }

    pub fn multiple_errors(errors: Vec<TirError>) -> Self {
        TirError::ErrorCollection(Box::new(ErrorCollection { errors }))
    }
}
