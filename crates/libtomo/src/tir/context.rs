//! The central compilation context.
//!
//! `TirContext` owns everything the checker produces and the emitter
//! consumes: the module table, the type arena with its named-type index,
//! the scope tree, per-type namespaces (methods, constants, enum tag
//! constructors), and the `ast_types`/`promotions` side tables keyed by
//! AST node index — the AST itself is never mutated after parsing.
//!
//! Nothing here is process-global; a fresh context is built per
//! compilation and dropped afterwards.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::ast::{Ast, AstIndex};
use crate::types::{Promotion, TypeArena, TypeLocation, TypeValue};

use super::error::TirError;
use super::module::Module;
use super::scope::{Binding, Scope, ScopeKind, ScopeLocation};

/// The central context for type resolution and code emission.
#[derive(Debug, Default)]
pub struct TirContext<'base> {
    /// All modules in the compilation unit, in load order
    pub modules: IndexMap<String, Module<'base>>,
    /// The semantic type arena
    pub types: TypeArena<'base>,
    /// Qualified type name → arena location
    pub type_names: IndexMap<String, TypeLocation>,
    /// Qualified type name → its namespace members (methods, constants,
    /// enum tag constructors)
    pub namespaces: IndexMap<String, IndexMap<String, Binding>>,
    /// All scopes in the compilation unit
    pub scopes: Vec<Scope<'base>>,
    /// Inferred type of every expression node
    pub ast_types: IndexMap<AstIndex, TypeLocation>,
    /// Promotions the emitter must apply, keyed by the promoted node
    pub promotions: IndexMap<AstIndex, Promotion>,
    /// Per module: the dependency-ordered top-level declarations, for the
    /// emitter's initializer ordering
    pub top_level_order: IndexMap<String, Vec<AstIndex>>,
    /// Collected (non-fatal-yet) errors
    pub errors: Vec<TirError>,
    tmp_indexer: AtomicUsize,
}

impl<'base> TirContext<'base> {
    /// Creates a fresh scope and returns its location.
    pub fn create_scope(&mut self, parent: Option<ScopeLocation>, kind: ScopeKind, module: String) -> ScopeLocation {
        let location = ScopeLocation(self.scopes.len());
        let mut scope = Scope::new(location, parent, kind, module);
        if let Some(parent) = parent {
            let parent_scope = self.scope(parent);
            scope.namespace = parent_scope.namespace.clone();
            scope.fn_return_type = parent_scope.fn_return_type;
        }
        self.scopes.push(scope);
        location
    }

    pub fn scope(&self, location: ScopeLocation) -> &Scope<'base> {
        &self.scopes[location.0]
    }

    pub fn scope_mut(&mut self, location: ScopeLocation) -> &mut Scope<'base> {
        &mut self.scopes[location.0]
    }

    /// Looks a name up through the scope chain.
    pub fn lookup(&self, mut scope: ScopeLocation, name: &str) -> Option<&Binding> {
        loop {
            let current = self.scope(scope);
            if let Some(binding) = current.get(name) {
                return Some(binding);
            }
            scope = current.parent?;
        }
    }

    /// All names visible from a scope, for "did you mean" suggestions.
    pub fn visible_names(&self, mut scope: ScopeLocation) -> Vec<String> {
        let mut names = Vec::new();
        loop {
            let current = self.scope(scope);
            names.extend(current.bindings.keys().map(|name| name.to_string()));
            match current.parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        names
    }

    /// Binds a name in the given scope.
    pub fn bind(&mut self, scope: ScopeLocation, name: Cow<'base, str>, binding: Binding) -> Option<Binding> {
        self.scope_mut(scope).bind(name, binding)
    }

    /// True when the scope (or one of its ancestors up to the enclosing
    /// function) is a loop body.
    pub fn in_loop(&self, mut scope: ScopeLocation) -> bool {
        loop {
            let current = self.scope(scope);
            match current.kind {
                ScopeKind::Loop => return true,
                ScopeKind::Function | ScopeKind::Module | ScopeKind::Namespace => return false,
                ScopeKind::Block => match current.parent {
                    Some(parent) => scope = parent,
                    None => return false,
                },
            }
        }
    }

    /// Return type of the enclosing function, if any.
    pub fn fn_return_type(&self, scope: ScopeLocation) -> Option<TypeLocation> {
        self.scope(scope).fn_return_type
    }

    /// Registers a named type, reporting duplicates.
    pub fn register_type_name(&mut self, name: String, location: TypeLocation) -> bool {
        if self.type_names.contains_key(&name) {
            return false;
        }
        self.type_names.insert(name, location);
        true
    }

    pub fn lookup_type_name(&self, name: &str) -> Option<TypeLocation> {
        self.type_names.get(name).copied()
    }

    /// A namespace member of a named type (`Type.member`).
    pub fn namespace_member(&self, type_name: &str, member: &str) -> Option<&Binding> {
        self.namespaces.get(type_name)?.get(member)
    }

    pub fn add_namespace_member(&mut self, type_name: &str, member: String, binding: Binding) -> Option<Binding> {
        self.namespaces
            .entry(type_name.to_string())
            .or_default()
            .insert(member, binding)
    }

    /// Records the inferred type of an expression node.
    pub fn set_type(&mut self, index: AstIndex, location: TypeLocation) -> TypeLocation {
        self.ast_types.insert(index, location);
        location
    }

    /// The previously inferred type of a node. Panics on untyped nodes;
    /// reaching one is a compiler bug, not a user error.
    pub fn type_of(&self, ast: &Ast<'base>) -> TypeLocation {
        match self.ast_types.get(&ast.index) {
            Some(location) => *location,
            None => unreachable!("no type was inferred for node {:?} at {:?}", ast.index, ast.span.position),
        }
    }

    pub fn try_type_of(&self, ast: &Ast<'base>) -> Option<TypeLocation> {
        self.ast_types.get(&ast.index).copied()
    }

    /// Records a promotion the emitter must apply to a node.
    pub fn set_promotion(&mut self, index: AstIndex, promotion: Promotion) {
        if promotion != Promotion::Identical {
            self.promotions.insert(index, promotion);
        }
    }

    pub fn promotion_of(&self, index: AstIndex) -> Option<Promotion> {
        self.promotions.get(&index).copied()
    }

    /// A unique name for compiler-generated temporaries.
    pub fn fresh_tmp(&self, prefix: &str) -> String {
        let n = self.tmp_indexer.fetch_add(1, Ordering::Relaxed);
        format!("_$_{prefix}_{n}")
    }

    /// Renders a type for diagnostics.
    pub fn display_type(&self, location: TypeLocation) -> String {
        self.types.display(location)
    }

    /// The qualified name of a nominal type, when it has one.
    pub fn nominal_name(&self, location: TypeLocation) -> Option<String> {
        match self.types.get(location) {
            TypeValue::Struct(s) => Some(s.name.to_string()),
            TypeValue::Enum(e) => Some(e.name.to_string()),
            TypeValue::Text { lang: Some(lang) } => Some(lang.to_string()),
            _ => None,
        }
    }
}
