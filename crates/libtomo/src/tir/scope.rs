//! Scope management and variable resolution.
//!
//! Scopes form a tree held in the context's scope vector; each scope knows
//! its parent and lookups read through to it. A fresh child scope is pushed
//! for each block, lambda and function body, loop body, `when` arm and the
//! narrowing true-branch of an `if` with an inline declaration.

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::nom_tools::SpanInfo;
use crate::types::TypeLocation;

/// A unique identifier for a scope within the compilation context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScopeLocation(pub usize);

impl ScopeLocation {
    /// Represents an undefined or invalid scope location.
    pub const UNDEFINED: Self = ScopeLocation(usize::MAX);
}

impl From<usize> for ScopeLocation {
    fn from(location: usize) -> Self {
        ScopeLocation(location)
    }
}

/// What introduced a scope. Loop membership and function boundaries are
/// derived from this when validating `skip`/`stop`/`return`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Namespace,
    Function,
    Block,
    Loop,
}

/// One name bound in a scope.
///
/// `code` is the emitter's textual reference for the binding: the mangled C
/// variable name, a closure field access, or a module-qualified symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub ty: TypeLocation,
    pub code: String,
    pub mutable: bool,
    pub span: Option<SpanInfo>,
}

impl Binding {
    pub fn new(ty: TypeLocation, code: impl Into<String>) -> Self {
        Self { ty, code: code.into(), mutable: false, span: None }
    }

    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }

    pub fn spanned(mut self, span: SpanInfo) -> Self {
        self.span = Some(span);
        self
    }
}

/// A node of the scope tree.
#[derive(Debug)]
pub struct Scope<'base> {
    pub location: ScopeLocation,
    pub parent: Option<ScopeLocation>,
    pub kind: ScopeKind,
    /// The module this scope belongs to
    pub module: String,
    /// The nested namespace path for name mangling
    pub namespace: Vec<String>,
    /// Names bound directly in this scope
    pub bindings: IndexMap<Cow<'base, str>, Binding>,
    /// Return type of the enclosing function, set on `Function` scopes
    pub fn_return_type: Option<TypeLocation>,
}

impl<'base> Scope<'base> {
    pub fn new(location: ScopeLocation, parent: Option<ScopeLocation>, kind: ScopeKind, module: String) -> Self {
        Self {
            location,
            parent,
            kind,
            module,
            namespace: Vec::new(),
            bindings: IndexMap::new(),
            fn_return_type: None,
        }
    }

    /// Looks up a name in this scope only (no parent read-through).
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Binds a name in this scope, replacing any shadowed binding.
    pub fn bind(&mut self, name: Cow<'base, str>, binding: Binding) -> Option<Binding> {
        self.bindings.insert(name, binding)
    }

    /// The namespace-qualified name of a member of this scope.
    pub fn qualified(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.namespace.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_join_the_namespace() {
        let mut scope = Scope::new(ScopeLocation(0), None, ScopeKind::Namespace, "main".into());
        scope.namespace = vec!["Foo".into(), "Bar".into()];
        assert_eq!(scope.qualified("baz"), "Foo.Bar.baz");
    }

    #[test]
    fn binding_builder() {
        let binding = Binding::new(TypeLocation::BOOL, "_$x").mutable();
        assert!(binding.mutable);
        assert_eq!(binding.code, "_$x");
    }
}
