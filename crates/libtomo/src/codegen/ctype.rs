//! Type lowering: semantic types to C type text, optional representations,
//! and `TypeInfo` globals.
//!
//! The mapping follows the runtime's ABI: `Bool_t`, `Int8..64_t`, `Int_t`
//! (big integers), `Num_t`/`Num32_t`, `Text_t`, `List_t`, `Table_t` (sets
//! share the table representation), `Closure_t`, and `struct N$$struct` /
//! `E$$type` for user types. Optionals reuse their base representation
//! whenever the base type affords a `none` sentinel; otherwise a
//! flag-carrying wrapper type is used.

use crate::tir::context::TirContext;
use crate::tir::resolver::mangle;
use crate::types::{OptionalRepr, TypeLocation, TypeValue};

/// The C type for a semantic type.
pub fn c_type(context: &TirContext<'_>, location: TypeLocation) -> String {
    match context.types.get(location) {
        TypeValue::Unknown | TypeValue::Abort | TypeValue::Void => "void".into(),
        TypeValue::Memory => "void*".into(),
        TypeValue::Bool => "Bool_t".into(),
        TypeValue::Byte => "Byte_t".into(),
        TypeValue::BigInt => "Int_t".into(),
        TypeValue::Int { bits } => format!("Int{bits}_t"),
        TypeValue::Num { bits: 32 } => "Num32_t".into(),
        TypeValue::Num { .. } => "Num_t".into(),
        TypeValue::CString => "char*".into(),
        TypeValue::Text { lang: None } => "Text_t".into(),
        TypeValue::Text { lang: Some(lang) } => format!("{}$$type", mangle(lang)),
        TypeValue::Moment => "Moment_t".into(),
        TypeValue::List { .. } => "List_t".into(),
        TypeValue::Table { .. } | TypeValue::Set { .. } => "Table_t".into(),
        TypeValue::Function(_) => "void*".into(),
        TypeValue::Closure { .. } => "Closure_t".into(),
        TypeValue::Pointer { pointed, .. } => format!("{}*", c_type(context, *pointed)),
        TypeValue::Struct(s) => format!("struct {}$$struct", mangle(&s.name)),
        TypeValue::Enum(e) => format!("{}$$type", mangle(&e.name)),
        TypeValue::Optional { inner } => optional_c_type(context, *inner),
        TypeValue::TypeInfo { .. } => "TypeInfo_t".into(),
        TypeValue::Module { .. } => "void".into(),
        TypeValue::Mutexed { .. } => "MutexedData_t".into(),
    }
}

/// The C type of `Optional(inner)`.
pub fn optional_c_type(context: &TirContext<'_>, inner: TypeLocation) -> String {
    match context.types.optional_repr(inner) {
        OptionalRepr::NoneFlag => match context.types.get(inner) {
            TypeValue::Int { bits } => format!("OptionalInt{bits}_t"),
            TypeValue::Byte => "OptionalByte_t".into(),
            TypeValue::Struct(s) => format!("{}$$opt", mangle(&s.name)),
            _ => format!("Optional{}", c_type(context, inner)),
        },
        // Sentinel-carrying types reuse their base representation
        _ => c_type(context, inner),
    }
}

/// A C declaration of `name` with the given type. Function pointers need
/// the name woven into the declarator.
pub fn c_declaration(context: &TirContext<'_>, location: TypeLocation, name: &str) -> String {
    if let TypeValue::Function(signature) = context.types.get(location) {
        let args = signature
            .args
            .iter()
            .map(|arg| c_type(context, arg.ty))
            .collect::<Vec<_>>()
            .join(", ");
        let ret = c_type(context, signature.ret);
        return format!("{ret} (*{name})({args})");
    }
    format!("{} {name}", c_type(context, location))
}

/// The C expression for this optional type's `none` value.
pub fn none_value(context: &TirContext<'_>, inner: TypeLocation) -> String {
    match context.types.optional_repr(inner) {
        OptionalRepr::NullPointer => "NULL".into(),
        OptionalRepr::ZeroSmallInt => "NONE_INT".into(),
        OptionalRepr::NanBits => "nan(\"none\")".into(),
        OptionalRepr::ReservedBoolByte => "NONE_BOOL".into(),
        OptionalRepr::NoneFlag => format!("(({}){{.is_none=yes}})", optional_c_type(context, inner)),
        OptionalRepr::NegativeLength => format!("(({}){{.length=-1}})", c_type(context, inner)),
        OptionalRepr::ZeroTag => format!("(({}){{.$tag=0}})", c_type(context, inner)),
        OptionalRepr::NegativeMicroseconds => "NONE_MOMENT".into(),
    }
}

/// A C expression testing whether `code` (of `Optional(inner)`) is none.
pub fn check_none(context: &TirContext<'_>, inner: TypeLocation, code: &str) -> String {
    match context.types.optional_repr(inner) {
        OptionalRepr::NullPointer => format!("(({code}) == NULL)"),
        OptionalRepr::ZeroSmallInt => format!("(({code}).small == 0)"),
        OptionalRepr::NanBits => format!("Num$is_none({code})"),
        OptionalRepr::ReservedBoolByte => format!("(({code}) == NONE_BOOL)"),
        OptionalRepr::NoneFlag => format!("(({code}).is_none)"),
        OptionalRepr::NegativeLength => format!("(({code}).length < 0)"),
        OptionalRepr::ZeroTag => format!("(({code}).$tag == 0)"),
        OptionalRepr::NegativeMicroseconds => format!("(({code}).tv_usec < 0)"),
    }
}

/// A C expression extracting the payload from a non-none optional.
pub fn extract_value(context: &TirContext<'_>, inner: TypeLocation, code: &str) -> String {
    match context.types.optional_repr(inner) {
        OptionalRepr::NoneFlag => format!("(({code}).value)"),
        _ => code.to_string(),
    }
}

/// A C expression wrapping a non-optional value into the optional
/// representation.
pub fn promote_to_optional(context: &TirContext<'_>, inner: TypeLocation, code: &str) -> String {
    match context.types.optional_repr(inner) {
        OptionalRepr::NoneFlag => {
            format!("(({}){{.value={code}}})", optional_c_type(context, inner))
        }
        _ => code.to_string(),
    }
}

/// The metamethod table a type's `TypeInfo` points at.
pub fn metamethods(context: &TirContext<'_>, location: TypeLocation) -> &'static str {
    match context.types.get(location) {
        TypeValue::Struct(_) if context.types.is_packed_data(location) => "PackedData$metamethods",
        TypeValue::Struct(_) => "Struct$metamethods",
        TypeValue::Enum(_) if context.types.is_packed_data(location) => "PackedDataEnum$metamethods",
        TypeValue::Enum(_) => "Enum$metamethods",
        TypeValue::Text { .. } => "Text$metamethods",
        _ => "Struct$metamethods",
    }
}

/// The C expression for a pointer to a type's `TypeInfo_t`.
pub fn type_info_ptr(context: &TirContext<'_>, location: TypeLocation) -> String {
    match context.types.get(location) {
        TypeValue::Bool => "&Bool$info".into(),
        TypeValue::Byte => "&Byte$info".into(),
        TypeValue::BigInt => "&Int$info".into(),
        TypeValue::Int { bits } => format!("&Int{bits}$info"),
        TypeValue::Num { bits: 32 } => "&Num32$info".into(),
        TypeValue::Num { .. } => "&Num$info".into(),
        TypeValue::CString => "&CString$info".into(),
        TypeValue::Text { lang: None } => "&Text$info".into(),
        TypeValue::Text { lang: Some(lang) } => format!("&{}$$info", mangle(lang)),
        TypeValue::Moment => "&Moment$info".into(),
        TypeValue::List { item } => format!("List$info({})", type_info_ptr(context, *item)),
        TypeValue::Set { item } => format!("Set$info({})", type_info_ptr(context, *item)),
        TypeValue::Table { key, value, .. } => format!(
            "Table$info({}, {})",
            type_info_ptr(context, *key),
            type_info_ptr(context, *value)
        ),
        TypeValue::Pointer { pointed, .. } => format!("Pointer$info(\"@\", {})", type_info_ptr(context, *pointed)),
        TypeValue::Struct(s) => format!("&{}$$info", mangle(&s.name)),
        TypeValue::Enum(e) => format!("&{}$$info", mangle(&e.name)),
        TypeValue::Optional { inner } => format!("Optional$info({})", type_info_ptr(context, *inner)),
        TypeValue::Closure { .. } | TypeValue::Function(_) => "&Closure$info".into(),
        _ => "&Memory$info".into(),
    }
}

/// Emits the `TypeInfo_t` global definition for a user-defined type.
pub fn emit_type_info(context: &TirContext<'_>, location: TypeLocation, out: &mut String) {
    let size = context.types.size_of(location);
    let align = context.types.align_of(location);
    match context.types.get(location) {
        TypeValue::Struct(s) => {
            let mangled = mangle(&s.name);
            let fields = s
                .fields
                .iter()
                .map(|field| {
                    format!(
                        "{{.name=\"{}\", .type={}}}",
                        field.name,
                        type_info_ptr(context, field.ty)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "public const TypeInfo_t {mangled}$$info = {{.size={size}, .align={align}, \
                 .metamethods={meta}, .tag=StructInfo, .StructInfo={{.name=\"{short}\", \
                 .num_fields={n}, .fields=(NamedType_t[]){{{fields}}}}}}};\n",
                meta = metamethods(context, location),
                short = s.name.rsplit('.').next().unwrap_or(&s.name),
                n = s.fields.len(),
            ));
        }
        TypeValue::Enum(e) => {
            let mangled = mangle(&e.name);
            let tags = e
                .tags
                .iter()
                .enumerate()
                .map(|(i, tag)| {
                    let payload = match tag.payload {
                        Some(payload) => type_info_ptr(context, payload),
                        None => "NULL".into(),
                    };
                    format!(
                        "{{.name=\"{}\", .tag_value={}, .type={payload}}}",
                        tag.name,
                        crate::types::EnumTag::value(i)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "public const TypeInfo_t {mangled}$$info = {{.size={size}, .align={align}, \
                 .metamethods={meta}, .tag=EnumInfo, .EnumInfo={{.name=\"{short}\", \
                 .num_tags={n}, .tags=(NamedType_t[]){{{tags}}}}}}};\n",
                meta = metamethods(context, location),
                short = e.name.rsplit('.').next().unwrap_or(&e.name),
                n = e.tags.len(),
            ));
        }
        TypeValue::Text { lang: Some(lang) } => {
            let mangled = mangle(lang);
            out.push_str(&format!(
                "public const TypeInfo_t {mangled}$$info = {{.size={size}, .align={align}, \
                 .metamethods=Text$metamethods, .tag=TextInfo, .TextInfo={{.lang=\"{short}\"}}}};\n",
                short = lang.rsplit('.').next().unwrap_or(lang),
            ));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use crate::file::SourceFile;
    use crate::nom_tools::State;
    use crate::process_code;
    use crate::tir;

    use super::*;

    fn with_context(code: &str, f: impl FnOnce(&TirContext<'_>)) {
        let state = State::new(SourceFile::new(vec!["main.tm".into()], code.to_string()));
        let ast = process_code(&state).unwrap();
        let context = tir::build(vec![Rc::new(ast)]).unwrap();
        f(&context);
    }

    #[test]
    fn primitive_c_types() {
        with_context("", |context| {
            assert_eq!(c_type(context, TypeLocation::BOOL), "Bool_t");
            assert_eq!(c_type(context, TypeLocation::BIG_INT), "Int_t");
            assert_eq!(c_type(context, TypeLocation::INT32), "Int32_t");
            assert_eq!(c_type(context, TypeLocation::NUM), "Num_t");
            assert_eq!(c_type(context, TypeLocation::TEXT), "Text_t");
            assert_eq!(c_type(context, TypeLocation::CSTRING), "char*");
        });
    }

    #[test]
    fn user_struct_c_type_and_info() {
        with_context("struct Vec2(x:Num, y:Num)\n", |context| {
            let location = context.lookup_type_name("main.Vec2").unwrap();
            assert_eq!(c_type(context, location), "struct main$Vec2$$struct");
            let mut out = String::new();
            emit_type_info(context, location, &mut out);
            assert!(out.contains("main$Vec2$$info"), "{out}");
            assert!(out.contains(".size=16"), "{out}");
            assert!(out.contains("Struct$metamethods"), "{out}");
        });
    }

    #[test]
    fn optional_representations() {
        with_context("", |context| {
            // Sentinel types reuse their representation
            assert_eq!(optional_c_type(context, TypeLocation::BIG_INT), "Int_t");
            assert_eq!(optional_c_type(context, TypeLocation::NUM), "Num_t");
            // Flag types get a wrapper
            assert_eq!(optional_c_type(context, TypeLocation::INT64), "OptionalInt64_t");
            assert_eq!(check_none(context, TypeLocation::INT64, "x"), "((x).is_none)");
            assert_eq!(check_none(context, TypeLocation::BIG_INT, "x"), "((x).small == 0)");
        });
    }
}
