//! Literal parsing: integers, floats and strings with escapes.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::char,
    combinator::{cut, map_res, opt, recognize},
    error::context,
    sequence::preceded,
    IResult, Parser,
};

use crate::{
    ast::{LiteralValue, Token, TokenKind},
    nom_tools::{NomSpan, Span},
};

use super::SlangParserError;

/// Parses an integer or floating-point literal. Floats require a decimal
/// point; everything else is an `i32`.
pub fn number_literal(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, Token<'_>, SlangParserError<'_>> {
    alt((float_literal, int_literal)).parse(input)
}

fn digits(input: NomSpan<'_>) -> IResult<NomSpan<'_>, NomSpan<'_>, SlangParserError<'_>> {
    take_while1(|c: char| c.is_ascii_digit()).parse(input)
}

fn int_literal(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Token<'_>, SlangParserError<'_>> {
    let (input, span) = map_res(recognize(digits), |span: NomSpan<'_>| {
        span.fragment().parse::<i32>().map(|value| (span, value))
    })
    .parse(input)?;
    let (span, value) = span;

    Ok((
        input,
        Token {
            span: span.into(),
            kind: TokenKind::IntLiteral,
            value: Some(LiteralValue::Int(value)),
        },
    ))
}

fn float_literal(input: NomSpan<'_>) -> IResult<NomSpan<'_>, Token<'_>, SlangParserError<'_>> {
    let (input, span) = map_res(
        recognize((digits, char('.'), opt(digits))),
        |span: NomSpan<'_>| span.fragment().parse::<f32>().map(|value| (span, value)),
    )
    .parse(input)?;
    let (span, value) = span;

    Ok((
        input,
        Token {
            span: span.into(),
            kind: TokenKind::FloatLiteral,
            value: Some(LiteralValue::Float(value)),
        },
    ))
}

/// Parses a double-quoted string literal, decoding escape sequences.
pub fn string_literal(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, Token<'_>, SlangParserError<'_>> {
    let start = input.clone();
    let (input, _) = char('"').parse(input)?;

    let mut decoded = String::new();
    let mut rest = input;
    loop {
        let (next, chunk) =
            take_while(|c: char| c != '"' && c != '\\').parse(rest)?;
        decoded.push_str(chunk.fragment());
        rest = next;

        let Some(first) = rest.fragment().chars().next() else {
            // Unterminated string.
            return Err(nom::Err::Failure(nom::error::ParseError::from_error_kind(
                start,
                nom::error::ErrorKind::Char,
            )));
        };

        if first == '"' {
            let (next, _) = char::<NomSpan<'_>, SlangParserError<'_>>('"').parse(rest)?;
            rest = next;
            break;
        }

        // Escape sequence.
        let (next, escape) = preceded(
            char('\\'),
            context(
                "Unknown escape sequence",
                cut(alt((
                    tag("n"),
                    tag("t"),
                    tag("r"),
                    tag("0"),
                    tag("\\"),
                    tag("\""),
                ))),
            ),
        )
        .parse(rest)?;
        decoded.push(match *escape.fragment() {
            "n" => '\n',
            "t" => '\t',
            "r" => '\r',
            "0" => '\0',
            "\\" => '\\',
            _ => '"',
        });
        rest = next;
    }

    let span = super::consumed_span(&start, &rest);
    Ok((
        rest,
        Token {
            span: Span::new(decoded.clone(), span.position.clone(), span.state.clone()),
            kind: TokenKind::StrLiteral,
            value: Some(LiteralValue::Str(decoded)),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::SourceFile, nom_tools::State};
    use nom_locate::LocatedSpan;
    use rstest::rstest;

    fn span_of(source: &str) -> NomSpan<'_> {
        // Leak so the test source outlives the span.
        let state = State::new(SourceFile::new(vec!["test".into()], source.to_string()));
        LocatedSpan::new_extra(
            Box::leak(source.to_string().into_boxed_str()),
            state,
        )
    }

    #[rstest]
    #[case("0", 0)]
    #[case("42", 42)]
    #[case("2147483647", i32::MAX)]
    fn integers_decode(#[case] source: &str, #[case] expected: i32) {
        let (_, token) = number_literal(span_of(source)).unwrap();
        assert_eq!(token.value, Some(LiteralValue::Int(expected)));
        assert_eq!(token.kind, TokenKind::IntLiteral);
    }

    #[rstest]
    #[case("1.5", 1.5)]
    #[case("2.", 2.0)]
    #[case("0.25", 0.25)]
    fn floats_decode(#[case] source: &str, #[case] expected: f32) {
        let (_, token) = number_literal(span_of(source)).unwrap();
        assert_eq!(token.value, Some(LiteralValue::Float(expected)));
        assert_eq!(token.kind, TokenKind::FloatLiteral);
    }

    #[test]
    fn strings_decode_escapes() {
        let (_, token) = string_literal(span_of(r#""a\nb\"c""#)).unwrap();
        assert_eq!(token.value, Some(LiteralValue::Str("a\nb\"c".to_string())));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(string_literal(span_of("\"abc")).is_err());
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert!(number_literal(span_of("2147483648")).is_err());
    }
}
