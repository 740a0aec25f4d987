//! Error handling and reporting plumbing.
//!
//! Parser errors (nom `VerboseError`s) are converted into the compiler's
//! [`TirError`] diagnostics here, and the report generators turn any
//! `TirError` into terminal output: syntax-error batches render through
//! `codespan-reporting`, everything else through miette's fancy reports.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::{self, termcolor::{ColorChoice, StandardStream}};
use miette::Diagnostic as _;
use nom_language::error::VerboseErrorKind;

use crate::ast::FileAst;
use crate::nom_tools::{State, ToRange};
use crate::tir::error::{SyntaxError, SyntaxErrorItem};
use crate::tir::{TirContext, TirError};

/// File extension for Tomo language source files
pub static TOMO_LANG_EXT: &str = "tm";

/// Error type for parsing operations using nom combinators
pub type ParseError<'base> = nom_language::error::VerboseError<nom_locate::LocatedSpan<&'base str, State>>;

/// Result type for parsing operations that returns the remaining input and parsed AST
pub type ParseResult<'base> = Result<(nom_locate::LocatedSpan<&'base str, State>, FileAst<'base>), ParseError<'base>>;

/// Result type for TIR (Type Intermediate Representation) operations
pub type TirResult<'base> = Result<TirContext<'base>, TirError>;

/// Converts parser results into TIR-compatible results, turning parser
/// errors into syntax diagnostics with source location information.
pub fn handle_parser(result: ParseResult<'_>) -> Result<FileAst<'_>, TirError> {
    match result {
        Ok((_, parsed)) => Ok(parsed),
        Err(error) => {
            let mut errors = Vec::new();
            error.errors.iter().for_each(|(span, error_kind)| {
                if let VerboseErrorKind::Context(message) = error_kind {
                    let position = span.to_range();
                    let len = position.end.saturating_sub(position.start);
                    errors.push(SyntaxErrorItem {
                        position: miette::SourceSpan::new(position.start.into(), len),
                        code: (&span.extra.file).into(),
                        message: (*message).to_string(),
                    });
                }
            });
            if errors.is_empty() {
                if let Some((span, _)) = error.errors.first() {
                    let position = span.to_range();
                    let len = position.end.saturating_sub(position.start);
                    errors.push(SyntaxErrorItem {
                        position: miette::SourceSpan::new(position.start.into(), len),
                        code: (&span.extra.file).into(),
                        message: "I couldn't parse this".to_string(),
                    });
                }
            }
            Err(TirError::syntax_error(errors))
        }
    }
}

/// Trait for rendering compiler errors to the terminal.
pub trait ReportGenerator {
    /// Renders the error, consuming it.
    fn generate(error: TirError);
}

/// The default report generator: syntax batches through
/// `codespan-reporting`, everything else through miette.
pub struct CodeSpanReportGenerator;

impl CodeSpanReportGenerator {
    fn generate_syntax(error: &SyntaxError) {
        let mut files = SimpleFiles::new();
        let mut diagnostics = Vec::new();
        for item in &error.errors {
            let file_id = files.add(item.code.name().to_string(), item.code.inner().clone());
            let start = item.position.offset();
            let end = start + item.position.len();
            diagnostics.push(
                Diagnostic::error()
                    .with_message("Syntax error")
                    .with_labels(vec![Label::primary(file_id, start..end).with_message(item.message.clone())]),
            );
        }
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        for diagnostic in diagnostics {
            let _ = term::emit(&mut writer.lock(), &config, &files, &diagnostic);
        }
    }
}

impl ReportGenerator for CodeSpanReportGenerator {
    fn generate(error: TirError) {
        match &error {
            TirError::SyntaxError(syntax) => Self::generate_syntax(syntax),
            TirError::ErrorCollection(collection)
                if collection.errors.iter().all(|e| matches!(e, TirError::SyntaxError(_))) =>
            {
                for inner in &collection.errors {
                    if let TirError::SyntaxError(syntax) = inner {
                        Self::generate_syntax(syntax);
                    }
                }
            }
            _ => {
                // Rich diagnostics (labels, help, related errors) render
                // through miette
                let _ = error.help();
                eprintln!("{:?}", miette::Report::new(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use nom::Finish;

    use crate::file::SourceFile;
    use crate::nom_tools::State;
    use crate::parser;

    use super::handle_parser;

    #[test]
    fn parse_errors_become_syntax_diagnostics() {
        let source_file = SourceFile::new(
            vec!["<memory>".into()],
            "func broken(\n".to_string(),
        );
        let state = State::new(source_file);
        let response = parser::parse(&state).finish();
        let error = handle_parser(response).unwrap_err();
        assert!(matches!(error, crate::tir::TirError::SyntaxError(_)), "{error:?}");
    }

    #[test]
    fn successful_parses_pass_through() {
        let source_file = SourceFile::new(vec!["<memory>".into()], "x := 1\n".to_string());
        let state = State::new(source_file);
        let response = parser::parse(&state).finish();
        let ast = handle_parser(response).unwrap();
        assert_eq!(ast.statements.len(), 1);
    }
}
