//! Parser state and span utilities built on nom.
//!
//! The parser threads a [`State`] through every combinator via
//! [`nom_locate::LocatedSpan`]. Besides the source file, the state carries an
//! atomic counter that hands out a unique [`AstIndex`](crate::ast::AstIndex)
//! to every AST node; later phases key their per-node tables (types, const
//! values, scopes) on that identity instead of mutating the tree.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while};
use nom::character::complete::{char, multispace1};
use nom::combinator::cut;
use nom::multi::many0;
use nom::sequence::{preceded, terminated};
use nom::{sequence::delimited, Parser};
use nom_locate::LocatedSpan;
use std::borrow::Cow;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::file::SourceFile;
use crate::parser::SlangParserError;

/// Parser state shared by all spans of one compilation unit.
#[derive(Debug, Clone)]
pub struct State {
    /// The source file being parsed.
    pub file: SourceFile,
    /// Counter handing out unique AST node indices.
    pub indexer: Arc<AtomicUsize>,
}

impl State {
    /// Creates a new parser state for the given source file.
    pub fn new(file: SourceFile) -> Self {
        Self {
            file,
            indexer: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hands out the next AST node index.
    pub fn next_index(&self) -> usize {
        self.indexer.fetch_add(1, Ordering::SeqCst)
    }
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

/// Type alias for nom's `LocatedSpan` carrying the parser state.
pub type NomSpan<'base, T = &'base str> = LocatedSpan<T, State>;

/// A piece of source text with its byte range and owning state.
///
/// The text is a [`Cow`] because two phases rewrite it after parsing: macro
/// expansion α-renames bound names, and deserialized macro bodies own their
/// strings outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Span<'base> {
    /// The text content of this span.
    pub text: Cow<'base, str>,
    /// Byte range in the source file.
    pub position: Range<usize>,
    /// The parser state this span belongs to.
    pub state: State,
}

impl<'base> Span<'base> {
    /// Creates a span from owned or borrowed text.
    pub fn new(text: impl Into<Cow<'base, str>>, position: Range<usize>, state: State) -> Self {
        Self {
            text: text.into(),
            position,
            state,
        }
    }

    /// The span text as a string slice.
    pub fn text(&self) -> &str {
        self.text.as_ref()
    }
}

impl Display for Span<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text.as_ref())
    }
}

impl<'base> From<NomSpan<'base>> for Span<'base> {
    fn from(value: NomSpan<'base>) -> Self {
        Span {
            text: Cow::Borrowed(*value.fragment()),
            position: value.to_range(),
            state: value.extra.clone(),
        }
    }
}

/// Span information without lifetime dependencies, used in diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanInfo {
    /// Byte range in the source file.
    pub position: Range<usize>,
    /// The source file this span belongs to.
    pub file: SourceFile,
}

impl SpanInfo {
    /// Creates span information from a position and file.
    pub fn new(position: Range<usize>, file: SourceFile) -> Self {
        Self { position, file }
    }
}

impl From<Span<'_>> for SpanInfo {
    fn from(span: Span<'_>) -> Self {
        SpanInfo {
            position: span.position.clone(),
            file: span.state.file.clone(),
        }
    }
}

impl From<&Span<'_>> for SpanInfo {
    fn from(span: &Span<'_>) -> Self {
        SpanInfo {
            position: span.position.clone(),
            file: span.state.file.clone(),
        }
    }
}

/// Converts spans to byte ranges.
pub trait ToRange {
    /// Returns the byte range of this span.
    fn to_range(&self) -> Range<usize>;
}

impl ToRange for NomSpan<'_> {
    fn to_range(&self) -> Range<usize> {
        // Error spans cover the next word rather than the whole remaining
        // input.
        let start = self.location_offset();
        let word = self
            .fragment()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
        start..start + word.max(1).min(self.fragment().len().max(1))
    }
}

impl ToRange for Span<'_> {
    fn to_range(&self) -> Range<usize> {
        self.position.clone()
    }
}

/// Skips whitespace and comments (`// …` and `/* … */`).
fn skip<'base>(
    input: NomSpan<'base>,
) -> nom::IResult<NomSpan<'base>, (), SlangParserError<'base>> {
    let (input, _) = many0(alt((
        multispace1.map(|_| ()),
        preceded(tag("//"), take_while(|c: char| c != '\n')).map(|_| ()),
        preceded(
            tag("/*"),
            cut(terminated(take_until("*/"), tag("*/"))),
        )
        .map(|_| ()),
    )))
    .parse(input)?;
    Ok((input, ()))
}

/// Wraps a parser so that surrounding whitespace and comments are consumed.
pub fn cleanup<'base, O, F>(f: F) -> impl Parser<NomSpan<'base>, Output = O, Error = SlangParserError<'base>>
where
    F: Parser<NomSpan<'base>, Output = O, Error = SlangParserError<'base>>,
{
    delimited(skip, f, skip)
}

/// Parses a single punctuation character with whitespace cleanup.
pub fn punct<'base>(
    c: char,
) -> impl Parser<NomSpan<'base>, Output = char, Error = SlangParserError<'base>> {
    cleanup(char(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(SourceFile::new(
            vec!["test".into()],
            "let x = 1;".to_string(),
        ))
    }

    #[test]
    fn indexer_is_monotonic() {
        let state = state();
        assert_eq!(state.next_index(), 0);
        assert_eq!(state.next_index(), 1);
        assert_eq!(state.next_index(), 2);
    }

    #[test]
    fn span_display_prints_text() {
        let span = Span::new("x", 4..5, state());
        assert_eq!(span.to_string(), "x");
    }

    #[test]
    fn span_info_keeps_position() {
        let span = Span::new("x", 4..5, state());
        let info: SpanInfo = (&span).into();
        assert_eq!(info.position, 4..5);
    }
}
