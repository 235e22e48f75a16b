//! Type expression parsing: `i32`, `[f32]`, `collections::List`.

use nom::{
    bytes::complete::tag,
    combinator::{cut, opt},
    error::context,
    multi::many0,
    sequence::terminated,
    IResult, Parser,
};

use crate::{
    ast::{Token, TypeAst},
    nom_tools::{punct, NomSpan, Span},
};

use super::{consumed_span, ident, SlangParserError};

/// Parses a type expression: optional `[...]` array marker around an
/// optionally namespace-qualified name.
pub fn type_expression(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, TypeAst<'_>, SlangParserError<'_>> {
    let start = input.clone();

    let (input, open) = opt(punct('[')).parse(input)?;
    let array = open.is_some();

    let (input, mut parts) = (many0(terminated(ident, tag("::"))), ident)
        .map(|(namespaces, name)| {
            let mut parts: Vec<Token<'_>> = namespaces;
            parts.push(name);
            parts
        })
        .parse(input)?;

    let input = if array {
        let (input, _) = context("Expected ']'", cut(punct(']'))).parse(input)?;
        input
    } else {
        input
    };

    let name = parts.pop().expect("at least the type name is present");
    let span = consumed_span(&start, &input);
    Ok((
        input,
        TypeAst {
            span,
            name,
            namespaces: parts,
            array,
        },
    ))
}

/// Synthesizes the implied `void` return type of a function without a
/// `->` clause.
pub fn void_type<'base>(at: &Span<'base>) -> TypeAst<'base> {
    let span = Span::new("void", at.position.clone(), at.state.clone());
    TypeAst {
        span: span.clone(),
        name: Token::identifier(span),
        namespaces: Vec::new(),
        array: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::SourceFile, nom_tools::State};
    use nom_locate::LocatedSpan;

    fn span_of(source: &'static str) -> NomSpan<'static> {
        let state = State::new(SourceFile::new(vec!["test".into()], source.to_string()));
        LocatedSpan::new_extra(source, state)
    }

    #[test]
    fn plain_type_parses() {
        let (_, ty) = type_expression(span_of("i32")).unwrap();
        assert_eq!(ty.qualified_name(), "i32");
        assert!(!ty.array);
    }

    #[test]
    fn array_type_parses() {
        let (_, ty) = type_expression(span_of("[f32]")).unwrap();
        assert_eq!(ty.qualified_name(), "f32");
        assert!(ty.array);
    }

    #[test]
    fn qualified_type_parses() {
        let (_, ty) = type_expression(span_of("collections::List")).unwrap();
        assert_eq!(ty.qualified_name(), "collections::List");
        assert_eq!(ty.namespaces.len(), 1);
    }
}
