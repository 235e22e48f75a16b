//! Parser for slang source text, built on nom combinators.
//!
//! Each construct has its own parser function; they compose over
//! [`NomSpan`] so every produced token and AST node carries its source
//! range and the shared parser state. Errors are accumulated as
//! `nom-language` verbose errors with `context(...)` labels and converted
//! into compiler diagnostics by [`crate::error::handle_parser`].

mod expression;
mod primitive;
mod statement;
mod types;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{cut, eof, map, not, opt, peek, recognize, verify},
    error::context,
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, preceded, terminated},
    Finish, IResult, Parser,
};
use nom_locate::LocatedSpan;

use crate::{
    ast::{
        DirectiveAst, ExpressionAst, ExpressionKind, FileAst, FunctionAst, ImportAst,
        MacroArgAst, MacroBranchAst, MacroDefinitionAst, ParameterAst, PrototypeAst,
        StructDefinitionAst, StructFieldAst, Token,
    },
    error::{handle_parser, CompileError},
    nom_tools::{cleanup, punct, NomSpan, Span, State},
};

pub use expression::expression;
pub use statement::block;
pub use types::type_expression;

/// Error type used by all slang parsers.
pub type SlangParserError<'base> = nom_language::error::VerboseError<NomSpan<'base>>;

/// Parses a compilation unit into its AST.
pub fn parse(state: &State) -> Result<FileAst<'_>, CompileError> {
    let input = LocatedSpan::new_extra(state.file.code().as_str(), state.clone());
    let result = file(input).finish();
    handle_parser(result.map(|(rest, items)| {
        (
            rest,
            FileAst {
                file: state.file.clone(),
                items,
            },
        )
    }))
}

fn file(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Vec<ExpressionAst<'_>>, SlangParserError<'_>> {
    terminated(many0(cleanup(item)), cleanup(eof)).parse(input)
}

/// Keywords that cannot be used as identifiers.
static KEYWORDS: &[&str] = &[
    "import", "struct", "fn", "macro", "let", "const", "return", "if", "else", "while", "break",
    "continue", "new", "as", "null",
];

/// Parses an identifier token, rejecting keywords.
pub fn ident(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Token<'_>, SlangParserError<'_>> {
    let (input, span) = verify(
        recognize(preceded(
            take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
            take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        )),
        |span: &NomSpan<'_>| !KEYWORDS.contains(span.fragment()),
    )
    .parse(input)?;

    Ok((input, Token::identifier(span.into())))
}

/// Parses a macro argument name: `$name`.
pub fn macro_arg_name(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, Token<'_>, SlangParserError<'_>> {
    let (input, span) = recognize(preceded(char('$'), ident)).parse(input)?;
    Ok((input, Token::identifier(span.into())))
}

/// Parses a keyword followed by a word boundary.
pub fn keyword<'base>(
    word: &'static str,
) -> impl Parser<NomSpan<'base>, Output = NomSpan<'base>, Error = SlangParserError<'base>> {
    terminated(
        tag(word),
        peek(not(take_while1(|c: char| {
            c.is_ascii_alphanumeric() || c == '_'
        }))),
    )
}

/// Builds a [`Span`] covering the consumed input between two positions.
pub fn consumed_span<'base>(start: &NomSpan<'base>, rest: &NomSpan<'base>) -> Span<'base> {
    let begin = start.location_offset();
    let end = rest.location_offset();
    let text = &start.fragment()[..end - begin];
    Span::new(text, begin..end, start.extra.clone())
}

/// Parses one top-level item.
fn item(input: NomSpan<'_>) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    alt((
        directive_item,
        import,
        struct_definition,
        function,
        macro_definition,
        statement::constant_declaration,
    ))
    .parse(input)
}

/// Parses `#[name(args)]` wrapping an item or statement.
fn directive_item(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, _) = tag("#[").parse(input)?;
    let (input, name) = cut(cleanup(ident)).parse(input)?;
    let (input, args) = opt(delimited(
        punct('('),
        separated_list1(punct(','), directive_arg),
        punct(')'),
    ))
    .parse(input)?;
    let (input, _) = context("Expected ']'", cut(punct(']'))).parse(input)?;
    let (input, inner) = context("Expected a declaration after the directive", cut(cleanup(item)))
        .parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::Directive(DirectiveAst {
                name,
                args: args.unwrap_or_default(),
                inner: Box::new(inner),
            }),
        ),
    ))
}

pub(crate) fn directive_arg(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, (Token<'_>, Option<Token<'_>>), SlangParserError<'_>> {
    let (input, key) = cleanup(ident).parse(input)?;
    let (input, value) = opt(preceded(punct('='), cleanup(primitive::string_literal)))
        .parse(input)?;
    Ok((input, (key, value)))
}

/// Parses `import a::b;`.
fn import(input: NomSpan<'_>) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, _) = keyword("import").parse(input)?;
    let (input, path) = context(
        "Expected a module path",
        cut(separated_list1(tag("::"), cleanup(ident))),
    )
    .parse(input)?;
    let (input, _) = context("Expected ';'", cut(punct(';'))).parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(span, ExpressionKind::Import(ImportAst { path })),
    ))
}

/// Parses `struct S { field: type, ... }`.
fn struct_definition(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, _) = keyword("struct").parse(input)?;
    let (input, name) = context("Expected a struct name", cut(cleanup(ident))).parse(input)?;
    let (input, fields) = context(
        "Expected a struct body",
        cut(delimited(
            punct('{'),
            terminated(
                separated_list0(punct(','), struct_field),
                opt(punct(',')),
            ),
            punct('}'),
        )),
    )
    .parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::StructDefinition(StructDefinitionAst { name, fields }),
        ),
    ))
}

fn struct_field(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, StructFieldAst<'_>, SlangParserError<'_>> {
    let (input, name) = cleanup(ident).parse(input)?;
    let (input, _) = context("Expected ':'", cut(punct(':'))).parse(input)?;
    let (input, ty) = context("Expected a type", cut(cleanup(type_expression))).parse(input)?;
    Ok((input, StructFieldAst { name, ty }))
}

/// Parses `fn name(params) -> type { ... }`, or a bodyless prototype ending
/// in `;` (native functions).
fn function(input: NomSpan<'_>) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, _) = keyword("fn").parse(input)?;
    let (input, name) = context("Expected a function name", cut(cleanup(ident))).parse(input)?;
    let (input, parameters) = context(
        "Expected a parameter list",
        cut(delimited(
            punct('('),
            separated_list0(punct(','), parameter),
            punct(')'),
        )),
    )
    .parse(input)?;
    let (input, return_type) = opt(preceded(
        cleanup(tag("->")),
        context("Expected a return type", cut(cleanup(type_expression))),
    ))
    .parse(input)?;

    let return_type = match return_type {
        Some(ty) => ty,
        None => types::void_type(&name.span),
    };

    // A `;` instead of a body declares a prototype.
    let (input, body) = alt((
        map(punct(';'), |_| None),
        map(
            context("Expected a function body", cut(cleanup(block))),
            Some,
        ),
    ))
    .parse(input)?;

    let span = consumed_span(&start, &input);
    let kind = match body {
        Some(body) => ExpressionKind::Function(FunctionAst {
            name,
            parameters,
            return_type,
            body: Box::new(body),
        }),
        None => ExpressionKind::Prototype(PrototypeAst {
            name,
            parameters,
            return_type,
        }),
    };
    Ok((input, ExpressionAst::new(span, kind)))
}

fn parameter(input: NomSpan<'_>) -> IResult<NomSpan<'_>, ParameterAst<'_>, SlangParserError<'_>> {
    let (input, name) = cleanup(ident).parse(input)?;
    let (input, _) = context("Expected ':'", cut(punct(':'))).parse(input)?;
    let (input, ty) = context("Expected a type", cut(cleanup(type_expression))).parse(input)?;
    Ok((input, ParameterAst { name, ty }))
}

/// Parses `macro name! { (args) => { ... }; ... }`.
fn macro_definition(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, _) = keyword("macro").parse(input)?;
    let (input, name) = context("Expected a macro name", cut(cleanup(ident))).parse(input)?;
    let (input, _) = context("Expected '!'", cut(punct('!'))).parse(input)?;
    let (input, branches) = context(
        "Expected macro branches",
        cut(delimited(
            punct('{'),
            many0(terminated(cleanup(macro_branch), punct(';'))),
            punct('}'),
        )),
    )
    .parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::MacroDefinition(MacroDefinitionAst { name, branches }),
        ),
    ))
}

/// Parses one `(args) => { body }` branch.
fn macro_branch(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, ExpressionAst<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, args) = delimited(
        punct('('),
        separated_list0(punct(','), macro_branch_arg),
        punct(')'),
    )
    .parse(input)?;
    let (input, _) = context("Expected '=>'", cut(cleanup(tag("=>")))).parse(input)?;
    let (input, body) = context("Expected a branch body", cut(cleanup(block))).parse(input)?;

    // Only the last argument may be a list capture.
    let ends_with_list = args.last().is_some_and(|(_, list)| *list);
    let arg_list: Vec<MacroArgAst<'_>> = args.into_iter().map(|(arg, _)| arg).collect();

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::MacroBranch(MacroBranchAst {
                args: arg_list,
                ends_with_list,
                body: Box::new(body),
            }),
        ),
    ))
}

fn macro_branch_arg(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, (MacroArgAst<'_>, bool), SlangParserError<'_>> {
    let (input, name) = cleanup(macro_arg_name).parse(input)?;
    let (input, _) = context("Expected ':'", cut(punct(':'))).parse(input)?;
    let (input, ty) = context("Expected a pattern type", cut(cleanup(ident))).parse(input)?;
    let (input, list) = opt(cleanup(tag("..."))).parse(input)?;
    Ok((input, (MacroArgAst { name, ty }, list.is_some())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::SourceFile;

    fn parse_source(source: &'static str) -> Result<usize, CompileError> {
        let state = State::new(SourceFile::new(vec!["test".into()], source.to_string()));
        // The AST borrows the state; only the item count escapes.
        let file = parse(&state)?;
        Ok(file.items.len())
    }

    #[test]
    fn items_parse() {
        let count = parse_source(
            r#"
            import std;

            const LIMIT: i32 = 100;

            struct Point { x: i32, y: i32 }

            #[native(lib="host")]
            fn print(s: str) -> void;

            fn main() -> i32 {
                let p = Point{x: 1, y: 2};
                return p.x + LIMIT;
            }
            "#,
        )
        .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn macro_definitions_parse() {
        let count = parse_source(
            r#"
            macro swap! {
                ($a: expr, $b: expr) => {
                    let tmp = $a;
                    $a = $b;
                    $b = tmp;
                };
                ($a: expr, $rest: expr...) => {
                    $a = 0;
                };
            }
            "#,
        )
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(parse_source("fn broken( -> {").is_err());
        assert!(parse_source("struct S {").is_err());
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert!(parse_source("fn return() -> void {}").is_err());
    }
}
