//! Tomo Language Compiler Library
//!
//! This is the core library for the Tomo programming language compiler: a
//! front-end (parser and type checker) plus a C backend. It provides the
//! full pipeline from source text to the pair of C files handed to a
//! downstream C compiler.
//!
//! # Overview
//!
//! Compilation runs in three stages:
//!
//! 1. **Parsing**: source code becomes an Abstract Syntax Tree with precise
//!    source spans and a comment table ([`parser`], [`ast`])
//! 2. **Type resolution**: the TIR pass infers a semantic type for every
//!    expression and validates the program ([`tir`], [`types`])
//! 3. **C emission**: the typed AST lowers to a C header and
//!    implementation pair ([`codegen`])
//!
//! The checker records its results in side tables on the [`tir::TirContext`];
//! the AST is never mutated after parsing.
//!
//! # Usage
//!
//! ```ignore
//! use libtomo::{process_code, process_ast, compile_to_c, nom_tools::State, file::SourceFile};
//!
//! let source = SourceFile::new(vec!["main.tm".into()], "x := 42".to_string());
//! let state = State::new(source);
//! let ast = process_code(&state)?;
//! let context = process_ast(vec![ast.into()])?;
//! let output = compile_to_c(&context, "main").expect("module was compiled");
//! println!("{}", output.implementation);
//! ```
//!
//! # Error Handling
//!
//! All compilation errors are [`TirError`] values carrying rich miette
//! diagnostics with source locations; the pipeline aborts on the first
//! error.

use std::rc::Rc;

use ast::FileAst;
use codegen::COutput;
use error::handle_parser;
use nom::Finish;
use nom_tools::State;
use tir::{TirContext, TirError};

pub mod ast;
pub mod codegen;
pub mod error;
pub mod file;
pub mod nom_tools;
pub mod parser;
pub mod tir;
pub mod types;

#[cfg(test)]
mod tests;

/// Parses Tomo source code into an Abstract Syntax Tree.
///
/// This is the first stage of the compilation pipeline.
///
/// # Errors
///
/// Returns a [`TirError::SyntaxError`] when the source contains syntax
/// errors: malformed literals, unterminated text, mixed indentation,
/// unexpected tokens.
pub fn process_code<'base>(state: &'base State) -> Result<FileAst<'base>, TirError> {
    let response = parser::parse(state).finish();
    handle_parser(response)
}

/// Performs type checking and builds the Type Intermediate Representation.
///
/// All files of the compilation — the entry module plus every module its
/// `use` statements pull in — are passed together so imports resolve
/// against the set.
///
/// # Errors
///
/// Returns a [`TirError`] on the first bind, type or semantic error.
pub fn process_ast(files: Vec<Rc<FileAst<'_>>>) -> Result<TirContext<'_>, TirError> {
    tir::build(files)
}

/// Emits the C header and implementation for one checked module.
///
/// Returns `None` when no module with that name exists in the context.
pub fn compile_to_c(context: &TirContext<'_>, module_name: &str) -> Option<COutput> {
    let module = context.modules.get(module_name)?;
    Some(codegen::compile_file(context, module))
}
