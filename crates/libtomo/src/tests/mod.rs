//! Cross-cutting tests exercising the full pipeline: parser invariants,
//! checker scenarios, and golden checks on the emitted C.

mod codegen;
mod parser;
mod tir;

use std::rc::Rc;

use crate::file::SourceFile;
use crate::nom_tools::State;
use crate::tir::{TirContext, TirError};

/// Parses and checks a single in-memory module named `main`.
pub(crate) fn check<'base>(state: &'base State) -> Result<TirContext<'base>, TirError> {
    let ast = crate::process_code(state)?;
    crate::process_ast(vec![Rc::new(ast)])
}

pub(crate) fn state_for(code: &str) -> State {
    State::new(SourceFile::new(vec!["main.tm".into()], code.to_string()))
}

/// Runs the whole pipeline and returns the emitted C for `main`.
pub(crate) fn emit(code: &str, f: impl FnOnce(&crate::codegen::COutput)) {
    let state = state_for(code);
    let context = check(&state).unwrap_or_else(|error| panic!("{code}\nfailed to check: {error:?}"));
    let output = crate::compile_to_c(&context, "main").expect("main module exists");
    f(&output);
}
