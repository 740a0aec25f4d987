//! Semantic types for the Tomo compiler.
//!
//! The checker resolves every expression to a [`TypeValue`] stored in a
//! [`TypeArena`]. Nested types are held as [`TypeLocation`] indices into the
//! arena rather than owned sub-trees, which keeps recursive types (a struct
//! whose field points at itself) representable without reference cycles.
//! The primitive types occupy fixed, pre-registered slots so that comparing
//! against `Bool` or `Void` is an index comparison.
//!
//! Alongside the representation this module implements the structural
//! relations the checker and emitter need: equality, C-ABI size/alignment,
//! packed-data classification, orderability, the optional-sentinel table and
//! the promotion rules.

use std::borrow::Cow;

use indexmap::IndexMap;
use strum_macros::{EnumDiscriminants, EnumIs};

/// Index of a type inside a [`TypeArena`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeLocation(pub usize);

impl TypeLocation {
    pub const UNKNOWN: TypeLocation = TypeLocation(0);
    pub const VOID: TypeLocation = TypeLocation(1);
    pub const ABORT: TypeLocation = TypeLocation(2);
    pub const MEMORY: TypeLocation = TypeLocation(3);
    pub const BOOL: TypeLocation = TypeLocation(4);
    pub const BYTE: TypeLocation = TypeLocation(5);
    pub const BIG_INT: TypeLocation = TypeLocation(6);
    pub const INT8: TypeLocation = TypeLocation(7);
    pub const INT16: TypeLocation = TypeLocation(8);
    pub const INT32: TypeLocation = TypeLocation(9);
    pub const INT64: TypeLocation = TypeLocation(10);
    pub const NUM32: TypeLocation = TypeLocation(11);
    pub const NUM: TypeLocation = TypeLocation(12);
    pub const CSTRING: TypeLocation = TypeLocation(13);
    pub const TEXT: TypeLocation = TypeLocation(14);
    pub const MOMENT: TypeLocation = TypeLocation(15);

    /// Represents an unresolved location.
    pub const UNDEFINED: TypeLocation = TypeLocation(usize::MAX);
}

/// One argument of a function type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArg<'base> {
    pub name: Cow<'base, str>,
    pub ty: TypeLocation,
    /// The declaration's default value (as an AST node index), making the
    /// argument optional at call sites. The emitter compiles the default
    /// in for calls that omit the argument.
    pub default: Option<crate::ast::AstIndex>,
}

impl FunctionArg<'_> {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType<'base> {
    pub args: Vec<FunctionArg<'base>>,
    pub ret: TypeLocation,
}

/// One field of a struct type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField<'base> {
    pub name: Cow<'base, str>,
    pub ty: TypeLocation,
}

/// A nominal record type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType<'base> {
    /// Namespace-qualified name, e.g. `vectors.Vec2`
    pub name: Cow<'base, str>,
    pub fields: Vec<StructField<'base>>,
    pub secret: bool,
    pub external: bool,
    pub opaque: bool,
}

/// One tag of an enum type. Tag values start at 1; 0 is reserved as the
/// optional `none` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumTag<'base> {
    pub name: Cow<'base, str>,
    /// The payload struct type, when the tag carries fields
    pub payload: Option<TypeLocation>,
    pub secret: bool,
}

impl EnumTag<'_> {
    /// The numeric discriminant emitted for this tag (index + 1).
    pub fn value(index: usize) -> i64 {
        index as i64 + 1
    }
}

/// A tagged union type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType<'base> {
    pub name: Cow<'base, str>,
    pub tags: Vec<EnumTag<'base>>,
}

/// The semantic type of an expression or binding.
#[derive(Debug, Clone, PartialEq, EnumIs, EnumDiscriminants)]
#[strum_discriminants(name(TypeValueDiscriminants))]
pub enum TypeValue<'base> {
    /// Not yet known; only appears transiently during checking
    Unknown,
    /// The type of expressions that never return (`return`, `fail`)
    Abort,
    /// The unit type of statements
    Void,
    /// Raw bytes
    Memory,
    Bool,
    Byte,
    /// Arbitrary-precision integer, the default integer type
    BigInt,
    /// Fixed-width integer; `bits` is one of 8, 16, 32, 64
    Int { bits: u8 },
    /// IEEE-754 float; `bits` is 32 or 64
    Num { bits: u8 },
    /// Borrowed null-terminated C string
    CString,
    /// Text; `lang` names a user-defined textual sublanguage
    Text { lang: Option<Cow<'base, str>> },
    /// A timestamp
    Moment,
    List { item: TypeLocation },
    Table {
        key: TypeLocation,
        value: TypeLocation,
        has_default: bool,
    },
    Set { item: TypeLocation },
    Function(FunctionType<'base>),
    /// A function pointer paired with a captured environment
    Closure { function: TypeLocation },
    Pointer {
        pointed: TypeLocation,
        is_stack: bool,
        is_readonly: bool,
    },
    Struct(StructType<'base>),
    Enum(EnumType<'base>),
    /// `T?`
    Optional { inner: TypeLocation },
    /// The metatype of a named user type, used for namespace lookup
    TypeInfo { name: Cow<'base, str>, inner: TypeLocation },
    /// A `use`d module's namespace
    Module { name: Cow<'base, str> },
    /// A mutex-guarded value (no surface syntax binds this yet)
    Mutexed { inner: TypeLocation },
}

/// How an `Optional(T)` represents `none` (spec §3.5). Each base type has at
/// most one in-band sentinel; types without one get an appended flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalRepr {
    /// Pointer, Closure, CString, Function: null pointer
    NullPointer,
    /// BigInt: small-int field zero
    ZeroSmallInt,
    /// Num/Num32: a reserved NaN bit pattern
    NanBits,
    /// Bool: a reserved non-{0,1} byte value
    ReservedBoolByte,
    /// Fixed-width ints, Byte, Struct: an extra `is_none` flag after padding
    NoneFlag,
    /// List/Table/Set/Text: length field set to -1
    NegativeLength,
    /// Enum: tag value 0
    ZeroTag,
    /// Moment: negative microseconds
    NegativeMicroseconds,
}

/// How a value must be rewritten when it is promoted to another type
/// (spec §4.2). The checker records one of these per call-site/assignment
/// and the emitter wraps the compiled expression accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// Types are equal; emit as-is
    Identical,
    /// Numeric widening to the carried type; emit a C cast
    NumericWiden(TypeLocation),
    /// Wrap the value in the optional representation whose payload is the
    /// carried type
    WrapOptional(TypeLocation),
    /// An optional used as a truth value; emit the `is present` check
    OptionalTruthiness,
    /// A bare function promoted to a closure with a null userdata pointer
    FunctionToClosure,
    /// Auto-dereference a pointer to its pointed-to value
    AutoDeref,
    /// Default-language text passed where a C string is needed
    TextToCString,
    /// A set used as a list (shares the backing item array)
    SetToList,
    /// Call the single-argument constructor of the carried enum type's tag
    EnumConstructor(TypeLocation, usize),
}

/// The arena holding every semantic type of a compilation.
///
/// Primitive types are registered at construction into their fixed
/// [`TypeLocation`] slots; compound types are appended as the checker
/// resolves them.
#[derive(Debug)]
pub struct TypeArena<'base> {
    types: Vec<TypeValue<'base>>,
    /// Interned optionals/lists/sets so repeated lookups reuse locations
    optionals: IndexMap<TypeLocation, TypeLocation>,
    lists: IndexMap<TypeLocation, TypeLocation>,
    sets: IndexMap<TypeLocation, TypeLocation>,
}

impl Default for TypeArena<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'base> TypeArena<'base> {
    pub fn new() -> Self {
        let types = vec![
            TypeValue::Unknown,
            TypeValue::Void,
            TypeValue::Abort,
            TypeValue::Memory,
            TypeValue::Bool,
            TypeValue::Byte,
            TypeValue::BigInt,
            TypeValue::Int { bits: 8 },
            TypeValue::Int { bits: 16 },
            TypeValue::Int { bits: 32 },
            TypeValue::Int { bits: 64 },
            TypeValue::Num { bits: 32 },
            TypeValue::Num { bits: 64 },
            TypeValue::CString,
            TypeValue::Text { lang: None },
            TypeValue::Moment,
        ];
        debug_assert_eq!(types[TypeLocation::TEXT.0], TypeValue::Text { lang: None });
        Self {
            types,
            optionals: IndexMap::new(),
            lists: IndexMap::new(),
            sets: IndexMap::new(),
        }
    }

    pub fn get(&self, location: TypeLocation) -> &TypeValue<'base> {
        &self.types[location.0]
    }

    pub fn add(&mut self, value: TypeValue<'base>) -> TypeLocation {
        let location = TypeLocation(self.types.len());
        self.types.push(value);
        location
    }

    /// Replaces a previously added placeholder; used when prebinding
    /// mutually recursive nominal types.
    pub fn replace(&mut self, location: TypeLocation, value: TypeValue<'base>) {
        self.types[location.0] = value;
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// `T?`, interned per inner type. Optionals never nest: an optional of
    /// an optional is the same type.
    pub fn optional_of(&mut self, inner: TypeLocation) -> TypeLocation {
        if let TypeValue::Optional { .. } = self.get(inner) {
            return inner;
        }
        if let Some(existing) = self.optionals.get(&inner) {
            return *existing;
        }
        let location = self.add(TypeValue::Optional { inner });
        self.optionals.insert(inner, location);
        location
    }

    pub fn list_of(&mut self, item: TypeLocation) -> TypeLocation {
        if let Some(existing) = self.lists.get(&item) {
            return *existing;
        }
        let location = self.add(TypeValue::List { item });
        self.lists.insert(item, location);
        location
    }

    pub fn set_of(&mut self, item: TypeLocation) -> TypeLocation {
        if let Some(existing) = self.sets.get(&item) {
            return *existing;
        }
        let location = self.add(TypeValue::Set { item });
        self.sets.insert(item, location);
        location
    }

    pub fn pointer_to(&mut self, pointed: TypeLocation, is_stack: bool) -> TypeLocation {
        self.add(TypeValue::Pointer { pointed, is_stack, is_readonly: false })
    }

    pub fn closure_of(&mut self, function: TypeLocation) -> TypeLocation {
        self.add(TypeValue::Closure { function })
    }

    /// Strips optional wrapping, returning the payload type.
    pub fn non_optional(&self, location: TypeLocation) -> TypeLocation {
        match self.get(location) {
            TypeValue::Optional { inner } => *inner,
            _ => location,
        }
    }

    /// Follows pointers down to the pointed-to value type.
    pub fn value_type(&self, location: TypeLocation) -> TypeLocation {
        match self.get(location) {
            TypeValue::Pointer { pointed, .. } => self.value_type(*pointed),
            _ => location,
        }
    }

    /// Structural type equality. Nominal types (structs, enums) compare by
    /// qualified name; everything else compares by shape.
    pub fn equal(&self, a: TypeLocation, b: TypeLocation) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (TypeValue::Int { bits: a }, TypeValue::Int { bits: b }) => a == b,
            (TypeValue::Num { bits: a }, TypeValue::Num { bits: b }) => a == b,
            (TypeValue::Text { lang: a }, TypeValue::Text { lang: b }) => a == b,
            (TypeValue::List { item: a }, TypeValue::List { item: b }) => self.equal(*a, *b),
            (TypeValue::Set { item: a }, TypeValue::Set { item: b }) => self.equal(*a, *b),
            (
                TypeValue::Table { key: ka, value: va, .. },
                TypeValue::Table { key: kb, value: vb, .. },
            ) => self.equal(*ka, *kb) && self.equal(*va, *vb),
            (TypeValue::Function(a), TypeValue::Function(b)) => {
                a.args.len() == b.args.len()
                    && self.equal(a.ret, b.ret)
                    && a.args.iter().zip(&b.args).all(|(x, y)| self.equal(x.ty, y.ty))
            }
            (TypeValue::Closure { function: a }, TypeValue::Closure { function: b }) => self.equal(*a, *b),
            (
                TypeValue::Pointer { pointed: a, is_stack: sa, .. },
                TypeValue::Pointer { pointed: b, is_stack: sb, .. },
            ) => sa == sb && self.equal(*a, *b),
            (TypeValue::Struct(a), TypeValue::Struct(b)) => a.name == b.name,
            (TypeValue::Enum(a), TypeValue::Enum(b)) => a.name == b.name,
            (TypeValue::Optional { inner: a }, TypeValue::Optional { inner: b }) => self.equal(*a, *b),
            (TypeValue::Mutexed { inner: a }, TypeValue::Mutexed { inner: b }) => self.equal(*a, *b),
            (TypeValue::Module { name: a }, TypeValue::Module { name: b }) => a == b,
            (a, b) => {
                TypeValueDiscriminants::from(a) == TypeValueDiscriminants::from(b)
                    && !matches!(a, TypeValue::Struct(_) | TypeValue::Enum(_))
            }
        }
    }

    pub fn is_numeric(&self, location: TypeLocation) -> bool {
        matches!(
            self.get(location),
            TypeValue::Int { .. } | TypeValue::Num { .. } | TypeValue::BigInt | TypeValue::Byte
        )
    }

    pub fn is_integral(&self, location: TypeLocation) -> bool {
        matches!(self.get(location), TypeValue::Int { .. } | TypeValue::BigInt | TypeValue::Byte)
    }

    /// True when values of this type have a total order usable by the
    /// comparison operators.
    pub fn is_orderable(&self, location: TypeLocation) -> bool {
        match self.get(location) {
            TypeValue::Bool
            | TypeValue::Byte
            | TypeValue::BigInt
            | TypeValue::Int { .. }
            | TypeValue::Num { .. }
            | TypeValue::CString
            | TypeValue::Text { .. }
            | TypeValue::Moment => true,
            TypeValue::List { item } => self.is_orderable(*item),
            TypeValue::Struct(s) => s.fields.iter().all(|field| self.is_orderable(field.ty)),
            TypeValue::Enum(e) => e
                .tags
                .iter()
                .all(|tag| tag.payload.map(|p| self.is_orderable(p)).unwrap_or(true)),
            TypeValue::Optional { inner } => self.is_orderable(*inner),
            _ => false,
        }
    }

    /// The C ABI alignment of the type, one of {1, 2, 4, 8}.
    pub fn align_of(&self, location: TypeLocation) -> usize {
        match self.get(location) {
            TypeValue::Unknown | TypeValue::Abort | TypeValue::Void => 1,
            TypeValue::Bool | TypeValue::Byte | TypeValue::Memory => 1,
            TypeValue::Int { bits } => (*bits as usize) / 8,
            TypeValue::Num { bits } => (*bits as usize) / 8,
            TypeValue::BigInt
            | TypeValue::CString
            | TypeValue::Text { .. }
            | TypeValue::Moment
            | TypeValue::List { .. }
            | TypeValue::Table { .. }
            | TypeValue::Set { .. }
            | TypeValue::Function(_)
            | TypeValue::Closure { .. }
            | TypeValue::Pointer { .. }
            | TypeValue::Mutexed { .. }
            | TypeValue::Module { .. }
            | TypeValue::TypeInfo { .. } => 8,
            TypeValue::Struct(s) => s
                .fields
                .iter()
                .map(|field| self.align_of(field.ty))
                .max()
                .unwrap_or(1),
            TypeValue::Enum(e) => e
                .tags
                .iter()
                .filter_map(|tag| tag.payload)
                .map(|payload| self.align_of(payload))
                .max()
                .unwrap_or(4)
                .max(4),
            TypeValue::Optional { inner } => match self.optional_repr(*inner) {
                OptionalRepr::NoneFlag => self.align_of(*inner).max(1),
                _ => self.align_of(*inner),
            },
        }
    }

    /// The C ABI size of the type. Consecutive `Bool` struct fields are
    /// packed as 1-bit bitfields sharing bytes.
    pub fn size_of(&self, location: TypeLocation) -> usize {
        match self.get(location) {
            TypeValue::Unknown | TypeValue::Abort | TypeValue::Void => 0,
            TypeValue::Bool | TypeValue::Byte | TypeValue::Memory => 1,
            TypeValue::Int { bits } => (*bits as usize) / 8,
            TypeValue::Num { bits } => (*bits as usize) / 8,
            TypeValue::BigInt | TypeValue::CString | TypeValue::Function(_) | TypeValue::Pointer { .. } => 8,
            TypeValue::Mutexed { .. } | TypeValue::Module { .. } | TypeValue::TypeInfo { .. } => 8,
            TypeValue::Text { .. } | TypeValue::Moment | TypeValue::Closure { .. } => 16,
            TypeValue::List { .. } => 24,
            TypeValue::Table { .. } | TypeValue::Set { .. } => 40,
            TypeValue::Struct(s) => {
                let mut offset = 0usize;
                let mut pending_bools = 0usize;
                for field in &s.fields {
                    if self.get(field.ty) == &TypeValue::Bool {
                        pending_bools += 1;
                        continue;
                    }
                    offset += pending_bools.div_ceil(8);
                    pending_bools = 0;
                    let align = self.align_of(field.ty);
                    offset = offset.next_multiple_of(align);
                    offset += self.size_of(field.ty);
                }
                offset += pending_bools.div_ceil(8);
                let align = self.align_of(location);
                offset.next_multiple_of(align).max(if s.opaque { 8 } else { 0 })
            }
            TypeValue::Enum(e) => {
                let payload = e
                    .tags
                    .iter()
                    .filter_map(|tag| tag.payload)
                    .map(|p| self.size_of(p))
                    .max()
                    .unwrap_or(0);
                let align = self.align_of(location);
                (4usize.next_multiple_of(if payload > 0 { align } else { 4 }) + payload).next_multiple_of(align)
            }
            TypeValue::Optional { inner } => match self.optional_repr(*inner) {
                OptionalRepr::NoneFlag => {
                    let size = self.size_of(*inner);
                    let align = self.align_of(location);
                    (size + 1).next_multiple_of(align)
                }
                _ => self.size_of(*inner),
            },
        }
    }

    /// True when the type has no padding and can be compared and hashed
    /// bytewise.
    pub fn is_packed_data(&self, location: TypeLocation) -> bool {
        match self.get(location) {
            TypeValue::Bool | TypeValue::Byte | TypeValue::Int { .. } | TypeValue::Moment => true,
            TypeValue::Struct(s) => {
                let packed_fields = s.fields.iter().all(|field| self.is_packed_data(field.ty));
                let raw: usize = s.fields.iter().map(|field| self.size_of(field.ty)).sum();
                packed_fields && raw == self.size_of(location) && !s.fields.iter().any(|f| self.get(f.ty).is_bool())
            }
            TypeValue::Enum(e) => e.tags.iter().all(|tag| match tag.payload {
                Some(payload) => self.is_packed_data(payload) && self.size_of(payload) == 0,
                None => true,
            }),
            _ => false,
        }
    }

    /// Which `none` encoding an `Optional` of `inner` uses (spec §3.5).
    pub fn optional_repr(&self, inner: TypeLocation) -> OptionalRepr {
        match self.get(inner) {
            TypeValue::Pointer { .. }
            | TypeValue::Closure { .. }
            | TypeValue::CString
            | TypeValue::Function(_)
            | TypeValue::Mutexed { .. } => OptionalRepr::NullPointer,
            TypeValue::BigInt => OptionalRepr::ZeroSmallInt,
            TypeValue::Num { .. } => OptionalRepr::NanBits,
            TypeValue::Bool => OptionalRepr::ReservedBoolByte,
            TypeValue::List { .. } | TypeValue::Table { .. } | TypeValue::Set { .. } | TypeValue::Text { .. } => {
                OptionalRepr::NegativeLength
            }
            TypeValue::Enum(_) => OptionalRepr::ZeroTag,
            TypeValue::Moment => OptionalRepr::NegativeMicroseconds,
            _ => OptionalRepr::NoneFlag,
        }
    }

    fn numeric_rank(&self, location: TypeLocation) -> Option<(bool, u32)> {
        // (is_float, width); Byte is an unsigned 8-bit integer whose
        // envelope only fits from 16 bits up.
        match self.get(location) {
            TypeValue::Byte => Some((false, 9)),
            TypeValue::Int { bits } => Some((false, *bits as u32)),
            TypeValue::BigInt => Some((false, u32::MAX)),
            TypeValue::Num { bits } => Some((true, *bits as u32)),
            _ => None,
        }
    }

    /// Whether `actual` can be used where `needed` is expected, and what
    /// rewrite that requires (spec §4.2 promotion rules). Promotion is
    /// asymmetric.
    pub fn promote(&mut self, actual: TypeLocation, needed: TypeLocation) -> Option<Promotion> {
        if self.equal(actual, needed) {
            return Some(Promotion::Identical);
        }
        // Numeric widening: strictly more precision, envelope contained.
        if let (Some((actual_float, actual_width)), Some((needed_float, needed_width))) =
            (self.numeric_rank(actual), self.numeric_rank(needed))
        {
            let fits = match (actual_float, needed_float) {
                (false, false) => needed_width > actual_width,
                (true, true) => needed_width > actual_width,
                // Integers fit in a float when the mantissa can hold them
                (false, true) => {
                    let mantissa = if needed_width == 64 { 52 } else { 23 };
                    actual_width != u32::MAX && actual_width <= mantissa
                }
                (true, false) => false,
            };
            if fits {
                return Some(Promotion::NumericWiden(needed));
            }
        }
        match (self.get(actual).clone(), self.get(needed).clone()) {
            // T -> T?
            (_, TypeValue::Optional { inner }) if self.promotable_value(actual, inner) => {
                Some(Promotion::WrapOptional(inner))
            }
            // T? -> Bool ("is present")
            (TypeValue::Optional { .. }, TypeValue::Bool) => Some(Promotion::OptionalTruthiness),
            // Function -> Closure of the same function
            (TypeValue::Function(_), TypeValue::Closure { function }) if self.equal(actual, function) => {
                Some(Promotion::FunctionToClosure)
            }
            // @T -> T
            (TypeValue::Pointer { pointed, .. }, _) if self.equal(pointed, needed) => Some(Promotion::AutoDeref),
            // Text (default lang) -> CString
            (TypeValue::Text { lang: None }, TypeValue::CString) => Some(Promotion::TextToCString),
            // |T| -> [T]
            (TypeValue::Set { item: a }, TypeValue::List { item: b }) if self.equal(a, b) => {
                Some(Promotion::SetToList)
            }
            // A single-field enum tag constructor accepting the value
            (_, TypeValue::Enum(e)) => {
                for (index, tag) in e.tags.iter().enumerate() {
                    let Some(payload) = tag.payload else { continue };
                    let TypeValue::Struct(s) = self.get(payload) else { continue };
                    if s.fields.len() == 1 && self.equal(s.fields[0].ty, actual) {
                        return Some(Promotion::EnumConstructor(needed, index));
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn promotable_value(&mut self, actual: TypeLocation, inner: TypeLocation) -> bool {
        self.equal(actual, inner)
            || matches!(
                self.promote(actual, inner),
                Some(Promotion::Identical) | Some(Promotion::NumericWiden(_))
            )
    }

    /// The common type two arithmetic operands promote to, if any.
    pub fn common_numeric(&mut self, a: TypeLocation, b: TypeLocation) -> Option<TypeLocation> {
        if self.equal(a, b) && self.is_numeric(a) {
            return Some(a);
        }
        if self.promote(a, b).is_some() && self.is_numeric(b) {
            return Some(b);
        }
        if self.promote(b, a).is_some() && self.is_numeric(a) {
            return Some(a);
        }
        None
    }

    /// Renders the type back into user-facing syntax for diagnostics.
    pub fn display(&self, location: TypeLocation) -> String {
        match self.get(location) {
            TypeValue::Unknown => "???".into(),
            TypeValue::Abort => "Abort".into(),
            TypeValue::Void => "Void".into(),
            TypeValue::Memory => "Memory".into(),
            TypeValue::Bool => "Bool".into(),
            TypeValue::Byte => "Byte".into(),
            TypeValue::BigInt => "Int".into(),
            TypeValue::Int { bits } => format!("Int{bits}"),
            TypeValue::Num { bits: 64 } => "Num".into(),
            TypeValue::Num { bits } => format!("Num{bits}"),
            TypeValue::CString => "CString".into(),
            TypeValue::Text { lang: None } => "Text".into(),
            TypeValue::Text { lang: Some(lang) } => lang.to_string(),
            TypeValue::Moment => "Moment".into(),
            TypeValue::List { item } => format!("[{}]", self.display(*item)),
            TypeValue::Set { item } => format!("|{}|", self.display(*item)),
            TypeValue::Table { key, value, .. } => {
                format!("{{{}={}}}", self.display(*key), self.display(*value))
            }
            TypeValue::Function(function) => {
                let args = function
                    .args
                    .iter()
                    .map(|arg| format!("{}:{}", arg.name, self.display(arg.ty)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("func({args} -> {})", self.display(function.ret))
            }
            TypeValue::Closure { function } => self.display(*function),
            TypeValue::Pointer { pointed, is_stack, .. } => {
                format!("{}{}", if *is_stack { "&" } else { "@" }, self.display(*pointed))
            }
            TypeValue::Struct(s) => s.name.to_string(),
            TypeValue::Enum(e) => e.name.to_string(),
            TypeValue::Optional { inner } => format!("{}?", self.display(*inner)),
            TypeValue::TypeInfo { name, .. } => format!("Type({name})"),
            TypeValue::Module { name } => format!("Module({name})"),
            TypeValue::Mutexed { inner } => format!("mutexed {}", self.display(*inner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_slots_are_fixed() {
        let arena = TypeArena::new();
        assert_eq!(arena.get(TypeLocation::BOOL), &TypeValue::Bool);
        assert_eq!(arena.get(TypeLocation::BIG_INT), &TypeValue::BigInt);
        assert_eq!(arena.get(TypeLocation::INT32), &TypeValue::Int { bits: 32 });
        assert_eq!(arena.get(TypeLocation::NUM), &TypeValue::Num { bits: 64 });
        assert_eq!(arena.get(TypeLocation::TEXT), &TypeValue::Text { lang: None });
    }

    #[test]
    fn size_is_a_multiple_of_align() {
        let mut arena = TypeArena::new();
        let vec2 = arena.add(TypeValue::Struct(StructType {
            name: "Vec2".into(),
            fields: vec![
                StructField { name: "x".into(), ty: TypeLocation::NUM },
                StructField { name: "y".into(), ty: TypeLocation::NUM },
            ],
            secret: false,
            external: false,
            opaque: false,
        }));
        let mixed = arena.add(TypeValue::Struct(StructType {
            name: "Mixed".into(),
            fields: vec![
                StructField { name: "flag".into(), ty: TypeLocation::BOOL },
                StructField { name: "n".into(), ty: TypeLocation::INT64 },
                StructField { name: "b".into(), ty: TypeLocation::BYTE },
            ],
            secret: false,
            external: false,
            opaque: false,
        }));
        for location in [vec2, mixed, TypeLocation::TEXT, TypeLocation::MOMENT] {
            let size = arena.size_of(location);
            let align = arena.align_of(location);
            assert!(matches!(align, 1 | 2 | 4 | 8), "align {align}");
            assert_eq!(size % align, 0, "size {size} align {align}");
        }
        assert_eq!(arena.size_of(vec2), 16);
        assert_eq!(arena.align_of(vec2), 8);
    }

    #[test]
    fn bool_fields_share_bitfield_bytes() {
        let mut arena = TypeArena::new();
        let flags = arena.add(TypeValue::Struct(StructType {
            name: "Flags".into(),
            fields: (0..8)
                .map(|i| StructField { name: format!("f{i}").into(), ty: TypeLocation::BOOL })
                .collect(),
            secret: false,
            external: false,
            opaque: false,
        }));
        assert_eq!(arena.size_of(flags), 1);
    }

    #[test]
    fn optional_sentinels_follow_the_table() {
        let mut arena = TypeArena::new();
        let ptr = arena.pointer_to(TypeLocation::BOOL, false);
        let list = arena.list_of(TypeLocation::BIG_INT);
        assert_eq!(arena.optional_repr(ptr), OptionalRepr::NullPointer);
        assert_eq!(arena.optional_repr(TypeLocation::BIG_INT), OptionalRepr::ZeroSmallInt);
        assert_eq!(arena.optional_repr(TypeLocation::NUM), OptionalRepr::NanBits);
        assert_eq!(arena.optional_repr(TypeLocation::BOOL), OptionalRepr::ReservedBoolByte);
        assert_eq!(arena.optional_repr(TypeLocation::INT32), OptionalRepr::NoneFlag);
        assert_eq!(arena.optional_repr(list), OptionalRepr::NegativeLength);
        assert_eq!(arena.optional_repr(TypeLocation::MOMENT), OptionalRepr::NegativeMicroseconds);
    }

    #[test]
    fn optional_with_flag_grows_padded() {
        let mut arena = TypeArena::new();
        let optional_int = arena.optional_of(TypeLocation::INT64);
        assert_eq!(arena.size_of(optional_int), 16);
        assert_eq!(arena.align_of(optional_int), 8);
        let optional_num = arena.optional_of(TypeLocation::NUM);
        assert_eq!(arena.size_of(optional_num), 8);
    }

    #[test]
    fn promotion_rules() {
        let mut arena = TypeArena::new();
        assert_eq!(
            arena.promote(TypeLocation::INT8, TypeLocation::INT32),
            Some(Promotion::NumericWiden(TypeLocation::INT32))
        );
        assert_eq!(arena.promote(TypeLocation::INT32, TypeLocation::INT8), None);
        assert_eq!(
            arena.promote(TypeLocation::INT64, TypeLocation::BIG_INT),
            Some(Promotion::NumericWiden(TypeLocation::BIG_INT))
        );
        assert_eq!(arena.promote(TypeLocation::BIG_INT, TypeLocation::NUM), None);
        assert_eq!(
            arena.promote(TypeLocation::INT16, TypeLocation::NUM32),
            Some(Promotion::NumericWiden(TypeLocation::NUM32))
        );
        assert_eq!(arena.promote(TypeLocation::INT64, TypeLocation::NUM), None);

        let optional_int = arena.optional_of(TypeLocation::BIG_INT);
        assert_eq!(
            arena.promote(TypeLocation::BIG_INT, optional_int),
            Some(Promotion::WrapOptional(TypeLocation::BIG_INT))
        );
        assert_eq!(arena.promote(optional_int, TypeLocation::BOOL), Some(Promotion::OptionalTruthiness));

        assert_eq!(arena.promote(TypeLocation::TEXT, TypeLocation::CSTRING), Some(Promotion::TextToCString));

        let set = arena.set_of(TypeLocation::TEXT);
        let list = arena.list_of(TypeLocation::TEXT);
        assert_eq!(arena.promote(set, list), Some(Promotion::SetToList));

        let ptr = arena.pointer_to(TypeLocation::NUM, false);
        assert_eq!(arena.promote(ptr, TypeLocation::NUM), Some(Promotion::AutoDeref));
    }

    #[test]
    fn optionals_do_not_nest() {
        let mut arena = TypeArena::new();
        let a = arena.optional_of(TypeLocation::TEXT);
        let b = arena.optional_of(a);
        assert_eq!(a, b);
    }
}
