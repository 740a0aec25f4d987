//! Modules and `use` resolution.
//!
//! Each source file is one module. Code imports (`use ./foo.tm`,
//! `use foo`) bind the imported module's namespace into the importing
//! scope; build-system imports (headers, C sources, assembly, linker
//! flags) are recorded on the module and resurface in the emitted C and
//! the driver's compile metadata.

use std::rc::Rc;

use crate::ast::{FileAst, UseKind};
use crate::file::SourceFile;
use crate::tir::scope::ScopeLocation;

/// A `use` recorded for the build system rather than the type checker.
#[derive(Debug, Clone, PartialEq)]
pub struct UseDecl {
    pub path: String,
    pub what: UseKind,
}

/// One compiled source file.
#[derive(Debug)]
pub struct Module<'base> {
    /// The module name (file stem)
    pub name: String,
    pub file: SourceFile,
    pub ast: Rc<FileAst<'base>>,
    /// The module's top-level scope
    pub scope: ScopeLocation,
    /// Module names this module imports (in `use` order)
    pub imports: Vec<String>,
    /// Non-module uses: headers, C/asm sources, linker flags
    pub build_uses: Vec<UseDecl>,
}

impl<'base> Module<'base> {
    pub fn new(file: SourceFile, ast: Rc<FileAst<'base>>) -> Self {
        let name = file.module_name();
        Self {
            name,
            file,
            ast,
            scope: ScopeLocation::UNDEFINED,
            imports: Vec::new(),
            build_uses: Vec::new(),
        }
    }

    /// Header includes to emit for this module's implementation file.
    pub fn header_includes(&self) -> impl Iterator<Item = &str> {
        self.build_uses
            .iter()
            .filter(|use_decl| use_decl.what == UseKind::Header)
            .map(|use_decl| use_decl.path.as_str())
    }

    /// Linker flags this module contributes to the final link.
    pub fn link_flags(&self) -> impl Iterator<Item = &str> {
        self.build_uses
            .iter()
            .filter(|use_decl| use_decl.what == UseKind::LinkerFlag)
            .map(|use_decl| use_decl.path.as_str())
    }
}

/// Resolves a local `use` path against the importing file, producing the
/// imported module's name.
pub fn local_import_name(path: &str) -> String {
    let stem = path.rsplit('/').next().unwrap_or(path);
    stem.strip_suffix(".tm").unwrap_or(stem).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_import_names() {
        assert_eq!(local_import_name("./vectors.tm"), "vectors");
        assert_eq!(local_import_name("../lib/util.tm"), "util");
        assert_eq!(local_import_name("plain"), "plain");
    }
}
