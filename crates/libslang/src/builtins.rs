//! Compiler-provided built-in macros.
//!
//! `format!` parses its format string at compile time into literal fragments
//! and typed placeholders (`{d}` = i32, `{f}` = f32, `{s}` = str, `{}` =
//! inferred from the argument; doubled braces escape a brace), checks each
//! placeholder against the type of the matching argument, and expands to a
//! left-folded chain of `std::string_concat` calls with per-type
//! `std::*_to_string` conversions.

use std::borrow::Cow;

use crate::{
    ast::{
        CallAst, ExpressionAst, ExpressionKind, LiteralValue, NamespaceAccessAst, Token,
        TokenKind,
    },
    error::CompileError,
    nom_tools::Span,
    sema::SemaEnv,
    typing::{PrimitiveType, TypeContext},
};

/// Whether a macro name is provided by the compiler.
pub fn is_builtin_macro(name: &str) -> bool {
    name == "format"
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Piece {
    /// A typed placeholder; `spec` is `d`, `f`, `s` or inferred.
    Placeholder {
        start: usize,
        end: usize,
        spec: Option<char>,
    },
    /// An escaped `{{` or `}}`; contributes one literal brace.
    LiteralBrace { start: usize, end: usize, ch: char },
}

/// Parses a format string into placeholders and escapes.
fn parse_format_string(
    format: &str,
    span: &Span<'_>,
) -> Result<Vec<Piece>, CompileError> {
    let bytes = format.as_bytes();
    let mut pieces = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                    pieces.push(Piece::LiteralBrace {
                        start: i,
                        end: i + 2,
                        ch: '{',
                    });
                    i += 2;
                    continue;
                }

                let Some(close) = format[i + 1..].find('}').map(|p| i + 1 + p) else {
                    return Err(CompileError::invalid_format_string(
                        "unterminated placeholder".to_string(),
                        &span.into(),
                    ));
                };
                let spec_text = &format[i + 1..close];
                let spec = match spec_text {
                    "" => None,
                    "d" => Some('d'),
                    "f" => Some('f'),
                    "s" => Some('s'),
                    other => {
                        return Err(CompileError::invalid_format_string(
                            format!("unsupported format specifier '{other}'"),
                            &span.into(),
                        ))
                    }
                };
                pieces.push(Piece::Placeholder {
                    start: i,
                    end: close + 1,
                    spec,
                });
                i = close + 1;
            }
            b'}' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'}' {
                    pieces.push(Piece::LiteralBrace {
                        start: i,
                        end: i + 2,
                        ch: '}',
                    });
                    i += 2;
                    continue;
                }
                return Err(CompileError::invalid_format_string(
                    "unmatched '}'".to_string(),
                    &span.into(),
                ));
            }
            _ => i += 1,
        }
    }

    Ok(pieces)
}

/// Expands a `format!` invocation, or defers (`Ok(None)`) when the argument
/// types are not known yet (an argument still contains an unexpanded macro).
pub fn expand_format<'base>(
    env: &SemaEnv<'base>,
    types: &TypeContext<'base>,
    span: &Span<'base>,
    args: &[ExpressionAst<'base>],
) -> Result<Option<ExpressionAst<'base>>, CompileError> {
    let Some(first) = args.first() else {
        return Err(CompileError::invalid_format_string(
            "format! requires a string literal argument".to_string(),
            &span.into(),
        ));
    };

    let format = match &first.kind {
        ExpressionKind::Literal(Token {
            value: Some(LiteralValue::Str(text)),
            ..
        }) => text.clone(),
        _ => {
            return Err(CompileError::invalid_format_string(
                "the first argument of format! must be a string literal".to_string(),
                &(&first.span).into(),
            ))
        }
    };

    let pieces = parse_format_string(&format, span)?;
    let placeholder_count = pieces
        .iter()
        .filter(|piece| matches!(piece, Piece::Placeholder { .. }))
        .count();
    if placeholder_count != args.len() - 1 {
        return Err(CompileError::invalid_format_string(
            format!(
                "{} placeholder(s) but {} argument(s)",
                placeholder_count,
                args.len() - 1
            ),
            &span.into(),
        ));
    }

    // Check placeholders against argument types; defer when a type is not
    // recorded yet.
    let mut resolved_specs = Vec::with_capacity(placeholder_count);
    let mut arg_index = 1;
    for piece in &pieces {
        let Piece::Placeholder { spec, .. } = piece else {
            continue;
        };
        let arg = &args[arg_index];
        arg_index += 1;

        let Some(arg_type) = env.node_types.get(&arg.index).copied() else {
            return Ok(None);
        };

        let actual = if arg_type == types.primitive(PrimitiveType::I32) {
            'd'
        } else if arg_type == types.primitive(PrimitiveType::F32) {
            'f'
        } else if arg_type == types.primitive(PrimitiveType::Str) {
            's'
        } else {
            return Err(CompileError::type_mismatch(
                "i32, f32 or str".to_string(),
                types.to_string(arg_type),
                &(&arg.span).into(),
            ));
        };

        if let Some(spec) = spec {
            if *spec != actual {
                return Err(CompileError::type_mismatch(
                    spec_type_name(*spec).to_string(),
                    types.to_string(arg_type),
                    &(&arg.span).into(),
                ));
            }
        }
        resolved_specs.push(actual);
    }

    // Fold fragments and conversions into a string_concat chain.
    let mut lhs: Option<ExpressionAst<'base>> = None;
    let mut fragment = String::new();
    let mut last_end = 0;
    let mut placeholder_index = 0;

    for piece in &pieces {
        match piece {
            Piece::LiteralBrace { start, end, ch } => {
                fragment.push_str(&format[last_end..*start]);
                fragment.push(*ch);
                last_end = *end;
            }
            Piece::Placeholder { start, end, .. } => {
                fragment.push_str(&format[last_end..*start]);
                last_end = *end;

                if !fragment.is_empty() {
                    let literal = string_literal(span, std::mem::take(&mut fragment));
                    lhs = Some(match lhs {
                        Some(lhs) => concat(span, lhs, literal),
                        None => literal,
                    });
                }

                let arg = args[placeholder_index + 1].deep_clone();
                let conversion = match resolved_specs[placeholder_index] {
                    'd' => std_call(span, "i32_to_string", vec![arg]),
                    'f' => std_call(span, "f32_to_string", vec![arg]),
                    _ => arg,
                };
                placeholder_index += 1;

                lhs = Some(match lhs {
                    Some(lhs) => concat(span, lhs, conversion),
                    None => conversion,
                });
            }
        }
    }

    fragment.push_str(&format[last_end..]);
    if !fragment.is_empty() || lhs.is_none() {
        let literal = string_literal(span, fragment);
        lhs = Some(match lhs {
            Some(lhs) => concat(span, lhs, literal),
            None => literal,
        });
    }

    Ok(lhs)
}

fn spec_type_name(spec: char) -> &'static str {
    match spec {
        'd' => "i32",
        'f' => "f32",
        _ => "str",
    }
}

fn string_literal<'base>(span: &Span<'base>, text: String) -> ExpressionAst<'base> {
    let token = Token {
        span: Span::new(text.clone(), span.position.clone(), span.state.clone()),
        kind: TokenKind::StrLiteral,
        value: Some(LiteralValue::Str(text)),
    };
    ExpressionAst::new(span.clone(), ExpressionKind::Literal(token))
}

/// Builds `std::<name>(args)`.
fn std_call<'base>(
    span: &Span<'base>,
    name: &'static str,
    args: Vec<ExpressionAst<'base>>,
) -> ExpressionAst<'base> {
    let call = ExpressionAst::new(
        span.clone(),
        ExpressionKind::Call(CallAst {
            name: Token {
                span: Span::new(Cow::Borrowed(name), span.position.clone(), span.state.clone()),
                kind: TokenKind::Identifier,
                value: None,
            },
            args,
        }),
    );
    ExpressionAst::new(
        span.clone(),
        ExpressionKind::NamespaceAccess(NamespaceAccessAst {
            namespace: Token {
                span: Span::new(Cow::Borrowed("std"), span.position.clone(), span.state.clone()),
                kind: TokenKind::Identifier,
                value: None,
            },
            inner: Box::new(call),
        }),
    )
}

fn concat<'base>(
    span: &Span<'base>,
    lhs: ExpressionAst<'base>,
    rhs: ExpressionAst<'base>,
) -> ExpressionAst<'base> {
    std_call(span, "string_concat", vec![lhs, rhs])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span<'static> {
        let state = crate::nom_tools::State::new(crate::file::SourceFile::new(
            vec!["test".into()],
            String::new(),
        ));
        Span::new("format", 0..6, state)
    }

    #[test]
    fn plain_string_has_no_placeholders() {
        let pieces = parse_format_string("hello", &span()).unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn typed_and_inferred_placeholders_parse() {
        let pieces = parse_format_string("x={d}, y={s}, z={}", &span()).unwrap();
        let specs: Vec<Option<char>> = pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Placeholder { spec, .. } => Some(*spec),
                _ => None,
            })
            .collect();
        assert_eq!(specs, vec![Some('d'), Some('s'), None]);
    }

    #[test]
    fn doubled_braces_are_literals() {
        let pieces = parse_format_string("{{}}", &span()).unwrap();
        assert_eq!(
            pieces,
            vec![
                Piece::LiteralBrace { start: 0, end: 2, ch: '{' },
                Piece::LiteralBrace { start: 2, end: 4, ch: '}' },
            ]
        );
    }

    #[test]
    fn bad_specifier_is_rejected() {
        assert!(parse_format_string("{x}", &span()).is_err());
        assert!(parse_format_string("{", &span()).is_err());
        assert!(parse_format_string("}", &span()).is_err());
    }
}
