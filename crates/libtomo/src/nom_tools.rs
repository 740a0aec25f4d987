//! Nom parser tools and utilities for the Tomo compiler.
//!
//! This module provides the shared plumbing the hand-written parsers are
//! built on: the parser [`State`] carried in every [`NomSpan`], byte-range
//! [`Span`]s for AST nodes, the comment table filled in as whitespace is
//! skipped, and the indentation helpers the block grammar depends on.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nom::bytes::complete::tag;
use nom::{IResult, Input, Parser};
use nom_locate::LocatedSpan;

use crate::file::SourceFile;
use crate::parser::TomoParserError;

/// Number of spaces one indentation unit is worth. A tab always counts as
/// one full unit.
pub const SPACES_PER_INDENT: usize = 4;

/// A source comment captured by the lexer.
///
/// Comments are not discarded while parsing: every `#`-comment is recorded
/// in the comment table keyed by its start offset so that the emitter and
/// formatter can query them by range afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Offset one past the last byte of the comment
    pub end: usize,
    /// The comment text, without the leading `#`
    pub text: String,
}

/// Parser state containing source file information, the AST node indexer
/// and the comment table.
///
/// The state is stored in the `extra` slot of every [`NomSpan`] and cloned
/// freely; all of its fields are cheap shared handles.
#[derive(Debug, Clone)]
pub struct State {
    /// The source file being parsed
    pub file: SourceFile,
    /// Atomic counter handing out unique AST node indices
    pub indexer: Arc<AtomicUsize>,
    /// Comments recorded so far, keyed by start offset
    pub comments: Arc<Mutex<BTreeMap<usize, Comment>>>,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.file.hash(state);
    }
}

impl State {
    /// Creates a new parser state for the given source file
    pub fn new(file: SourceFile) -> Self {
        Self {
            file,
            indexer: Arc::new(AtomicUsize::new(0)),
            comments: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Hands out the next unique AST node index
    pub fn next_index(&self) -> usize {
        self.indexer.fetch_add(1, Ordering::Relaxed)
    }

    /// Records a comment into the comment table
    pub fn record_comment(&self, start: usize, end: usize, text: &str) {
        if let Ok(mut comments) = self.comments.lock() {
            comments.insert(start, Comment { end, text: to_comment_text(text) });
        }
    }

    /// Returns all comments whose start offset lies within `range`
    pub fn comments_in(&self, range: Range<usize>) -> Vec<(usize, Comment)> {
        match self.comments.lock() {
            Ok(comments) => comments.range(range).map(|(k, v)| (*k, v.clone())).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn to_comment_text(raw: &str) -> String {
    raw.strip_prefix('#').unwrap_or(raw).trim_end().to_string()
}

/// Type alias for nom's LocatedSpan with Tomo's parser state
pub type NomSpan<'base, T = &'base str> = LocatedSpan<T, State>;

/// A byte range into a source file, with the parser state that owns it.
///
/// Unlike the nom input spans, a `Span` does not borrow the source text; the
/// text can always be recovered through the state's [`SourceFile`], which
/// keeps AST spans trivially mergeable.
#[derive(Debug, Clone)]
pub struct Span {
    /// The byte range in the source file
    pub position: Range<usize>,
    /// The parser state containing file information
    pub state: State,
}

impl Span {
    pub fn new(position: Range<usize>, state: State) -> Self {
        Self { position, state }
    }

    /// The source text this span covers
    pub fn text(&self) -> &str {
        let code = self.state.file.code();
        let start = self.position.start.min(code.len());
        let end = self.position.end.min(code.len());
        &code[start..end]
    }

    /// A new span covering from the start of `self` to the end of `other`
    pub fn to(&self, other: &Span) -> Span {
        Span::new(self.position.start..other.position.end.max(self.position.start), self.state.clone())
    }

    /// True when `other` lies entirely within this span
    pub fn contains(&self, other: &Span) -> bool {
        self.position.start <= other.position.start && other.position.end <= self.position.end
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.state == other.state
    }
}

impl Eq for Span {}

impl Hash for Span {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.position.start.hash(state);
        self.position.end.hash(state);
        self.state.hash(state);
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

impl<'base> From<NomSpan<'base>> for Span {
    fn from(value: NomSpan<'base>) -> Self {
        let start = value.location_offset();
        Span {
            position: start..start + value.fragment().len(),
            state: value.extra.clone(),
        }
    }
}

impl<'base> From<&NomSpan<'base>> for Span {
    fn from(value: &NomSpan<'base>) -> Self {
        let start = value.location_offset();
        Span {
            position: start..start + value.fragment().len(),
            state: value.extra.clone(),
        }
    }
}

/// Span information without any parser state attached
///
/// This is the owned form stored inside diagnostics, where only the
/// position and the file matter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanInfo {
    /// The byte range in the source file
    pub position: Range<usize>,
    /// The source file this span belongs to
    pub file: SourceFile,
}

impl SpanInfo {
    pub fn new(position: Range<usize>, file: SourceFile) -> Self {
        Self { position, file }
    }
}

impl From<Span> for SpanInfo {
    fn from(span: Span) -> Self {
        let file = span.state.file.clone();
        Self { position: span.position, file }
    }
}

impl From<&Span> for SpanInfo {
    fn from(span: &Span) -> Self {
        Self { position: span.position.clone(), file: span.state.file.clone() }
    }
}

/// Trait for converting spans to position ranges
pub trait ToRange {
    /// Converts the span to a position range
    fn to_range(&self) -> Range<usize>;
}

impl ToRange for NomSpan<'_> {
    fn to_range(&self) -> Range<usize> {
        // Highlight the next word of the remaining input, or at least one
        // character, so syntax errors underline something readable.
        let start = self.location_offset();
        let word = self
            .fragment()
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(self.fragment().len());
        start..start + word.max(1).min(self.fragment().len().max(1))
    }
}

impl ToRange for Span {
    fn to_range(&self) -> Range<usize> {
        self.position.clone()
    }
}

fn eat_whitespace<'base>(
    input: NomSpan<'base>,
    allow_newlines: bool,
) -> IResult<NomSpan<'base>, (), TomoParserError<'base>> {
    let mut consumed = 0usize;
    let fragment = *input.fragment();
    let bytes = fragment.as_bytes();
    loop {
        match bytes.get(consumed) {
            Some(b' ') | Some(b'\t') => consumed += 1,
            Some(b'\r') | Some(b'\n') if allow_newlines => consumed += 1,
            Some(b'#') => {
                let start = consumed;
                while !matches!(bytes.get(consumed), None | Some(b'\r') | Some(b'\n')) {
                    consumed += 1;
                }
                let absolute = input.location_offset() + start;
                input
                    .extra
                    .record_comment(absolute, input.location_offset() + consumed, &fragment[start..consumed]);
            }
            _ => break,
        }
    }
    let (rest, _) = input.take_split(consumed);
    Ok((rest, ()))
}

/// Consumes spaces, tabs and `#` comments on the current line. Never eats a
/// newline; at block level newlines are statement separators.
pub fn spaces(input: NomSpan<'_>) -> IResult<NomSpan<'_>, (), TomoParserError<'_>> {
    eat_whitespace(input, false)
}

/// Consumes any whitespace, including newlines, plus `#` comments. Used
/// inside balanced brackets where line structure does not matter.
pub fn whitespace(input: NomSpan<'_>) -> IResult<NomSpan<'_>, (), TomoParserError<'_>> {
    eat_whitespace(input, true)
}

/// True for characters that may continue an identifier.
pub fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// A keyword token: the exact word, not followed by an identifier
/// character, preceded by same-line spaces.
pub fn word<'base>(k: &'static str) -> impl Parser<NomSpan<'base>, Output = NomSpan<'base>, Error = TomoParserError<'base>> {
    move |input: NomSpan<'base>| {
        let (input, _) = spaces(input)?;
        let (rest, matched) = tag(k)(input)?;
        match rest.fragment().chars().next() {
            Some(c) if is_ident_continue(c) => Err(nom::Err::Error(nom::error::ParseError::from_error_kind(
                rest,
                nom::error::ErrorKind::Tag,
            ))),
            _ => Ok((rest, matched)),
        }
    }
}

/// Measures the indentation of the line containing `offset`, in
/// space-equivalents (a tab counts as [`SPACES_PER_INDENT`]).
///
/// Returns `None` when the line mixes tabs and spaces in its indentation,
/// which the grammar treats as a hard error.
pub fn indent_of_line(code: &str, offset: usize) -> Option<usize> {
    let offset = offset.min(code.len());
    let line_start = code[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut tabs = 0usize;
    let mut space_count = 0usize;
    for c in code[line_start..].chars() {
        match c {
            '\t' => tabs += 1,
            ' ' => space_count += 1,
            _ => break,
        }
    }
    if tabs > 0 && space_count > 0 {
        return None;
    }
    Some(tabs * SPACES_PER_INDENT + space_count)
}

/// Indentation of the line the input currently points at.
pub fn line_indent(input: &NomSpan<'_>) -> Option<usize> {
    indent_of_line(input.extra.file.code(), input.location_offset())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(code: &str) -> State {
        State::new(SourceFile::new(vec!["<memory>".into()], code.to_string()))
    }

    #[test]
    fn comments_are_recorded() {
        let code = "x := 1 # the answer\n";
        let st = state(code);
        let input = NomSpan::new_extra(code, st.clone());
        let (rest, _) = input.take_split(7);
        let (rest, _) = spaces(rest).unwrap();
        assert_eq!(*rest.fragment(), "\n");
        let comments = st.comments_in(0..code.len());
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].1.text, "the answer");
    }

    #[test]
    fn indentation_measures_units() {
        assert_eq!(indent_of_line("    x", 4), Some(4));
        assert_eq!(indent_of_line("\tx", 1), Some(SPACES_PER_INDENT));
        assert_eq!(indent_of_line("a\n        b", 10), Some(8));
        assert_eq!(indent_of_line("\t  x", 3), None);
    }

    #[test]
    fn span_merge_and_containment() {
        let st = state("hello world");
        let a = Span::new(0..5, st.clone());
        let b = Span::new(6..11, st.clone());
        let merged = a.to(&b);
        assert_eq!(merged.position, 0..11);
        assert!(merged.contains(&a) && merged.contains(&b));
        assert_eq!(merged.text(), "hello world");
    }
}
