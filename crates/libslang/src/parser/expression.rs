//! Expression parsing with operator precedence climbing.
//!
//! Precedence (lowest to highest): assignment (right-associative), `||`,
//! `&&`, `|`, `^`, `&`, equality, relational, shifts, additive,
//! multiplicative, `as` casts, unary prefix, postfix (member access,
//! subscript, `++`/`--`), primary.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::char,
    combinator::{cut, map, not, opt, value},
    error::context,
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::{
    ast::{
        AccessAst, AnonymousInitializerAst, BinaryAst, BinaryOperator, CallAst, DirectiveAst,
        ExpressionAst, ExpressionKind, MacroInvocationAst, NamedInitializerAst,
        NamespaceAccessAst, NewAst, PostfixAst, PostfixOperator, SubscriptAst, Token,
        TypeCastAst, UnaryAst, UnaryOperator,
    },
    nom_tools::{cleanup, punct, NomSpan, Span},
};

use super::{ident, keyword, macro_arg_name, primitive, types::type_expression, SlangParserError};

type ExprResult<'base> = IResult<NomSpan<'base>, ExpressionAst<'base>, SlangParserError<'base>>;

/// Joins the spans of two expressions for a synthesized parent node.
fn join_spans<'base>(lhs: &ExpressionAst<'base>, rhs: &ExpressionAst<'base>) -> Span<'base> {
    Span::new(
        "",
        lhs.span.position.start..rhs.span.position.end,
        lhs.span.state.clone(),
    )
}

fn binary<'base>(
    lhs: ExpressionAst<'base>,
    op: BinaryOperator,
    rhs: ExpressionAst<'base>,
) -> ExpressionAst<'base> {
    let span = join_spans(&lhs, &rhs);
    ExpressionAst::new(
        span,
        ExpressionKind::Binary(BinaryAst {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }),
    )
}

/// Parses a full expression.
pub fn expression(input: NomSpan<'_>) -> ExprResult<'_> {
    assignment(input)
}

fn assignment_operator(
    input: NomSpan<'_>,
) -> IResult<NomSpan<'_>, BinaryOperator, SlangParserError<'_>> {
    alt((
        value(BinaryOperator::ShlAssign, tag("<<=")),
        value(BinaryOperator::ShrAssign, tag(">>=")),
        value(BinaryOperator::AddAssign, tag("+=")),
        value(BinaryOperator::SubAssign, tag("-=")),
        value(BinaryOperator::MulAssign, tag("*=")),
        value(BinaryOperator::DivAssign, tag("/=")),
        value(BinaryOperator::ModAssign, tag("%=")),
        value(BinaryOperator::AndAssign, tag("&=")),
        value(BinaryOperator::OrAssign, tag("|=")),
        value(BinaryOperator::XorAssign, tag("^=")),
        value(BinaryOperator::Assign, terminated(char('='), not(char('=')))),
    ))
    .parse(input)
}

/// Assignment is right-associative: `a = b = v` assigns `v` to both.
fn assignment(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, lhs) = logical_or(input)?;
    let (input, tail) = opt((cleanup(assignment_operator), cut(assignment))).parse(input)?;
    Ok(match tail {
        Some((op, rhs)) => (input, binary(lhs, op, rhs)),
        None => (input, lhs),
    })
}

fn logical_or(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = logical_and(input)?;
    let (input, rest) = many0((
        cleanup(value(BinaryOperator::LogicalOr, tag("||"))),
        logical_and,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn logical_and(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = bit_or(input)?;
    let (input, rest) = many0((
        cleanup(value(BinaryOperator::LogicalAnd, tag("&&"))),
        bit_or,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn bit_or(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = bit_xor(input)?;
    let (input, rest) = many0((
        cleanup(value(
            BinaryOperator::BitOr,
            terminated(char('|'), not(alt((char('|'), char('='))))),
        )),
        bit_xor,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn bit_xor(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = bit_and(input)?;
    let (input, rest) = many0((
        cleanup(value(
            BinaryOperator::BitXor,
            terminated(char('^'), not(char('='))),
        )),
        bit_and,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn bit_and(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = equality(input)?;
    let (input, rest) = many0((
        cleanup(value(
            BinaryOperator::BitAnd,
            terminated(char('&'), not(alt((char('&'), char('='))))),
        )),
        equality,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn equality(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = relational(input)?;
    let (input, rest) = many0((
        cleanup(alt((
            value(BinaryOperator::Equal, tag("==")),
            value(BinaryOperator::NotEqual, tag("!=")),
        ))),
        relational,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn relational(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = shift(input)?;
    let (input, rest) = many0((
        cleanup(alt((
            value(BinaryOperator::LessEqual, tag("<=")),
            value(BinaryOperator::GreaterEqual, tag(">=")),
            value(
                BinaryOperator::Less,
                terminated(char('<'), not(alt((char('<'), char('='))))),
            ),
            value(
                BinaryOperator::Greater,
                terminated(char('>'), not(alt((char('>'), char('='))))),
            ),
        ))),
        shift,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn shift(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = additive(input)?;
    let (input, rest) = many0((
        cleanup(alt((
            value(BinaryOperator::Shl, terminated(tag("<<"), not(char('=')))),
            value(BinaryOperator::Shr, terminated(tag(">>"), not(char('=')))),
        ))),
        additive,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn additive(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = multiplicative(input)?;
    let (input, rest) = many0((
        cleanup(alt((
            value(
                BinaryOperator::Add,
                terminated(char('+'), not(alt((char('+'), char('='))))),
            ),
            value(
                BinaryOperator::Sub,
                terminated(char('-'), not(alt((char('-'), char('='))))),
            ),
        ))),
        multiplicative,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

fn multiplicative(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = cast(input)?;
    let (input, rest) = many0((
        cleanup(alt((
            value(BinaryOperator::Mul, terminated(char('*'), not(char('=')))),
            value(
                BinaryOperator::Div,
                terminated(char('/'), not(alt((char('='), char('/'), char('*'))))),
            ),
            value(BinaryOperator::Mod, terminated(char('%'), not(char('=')))),
        ))),
        cast,
    ))
    .parse(input)?;
    Ok((input, rest.into_iter().fold(first, |l, (op, r)| binary(l, op, r))))
}

/// `expr as type`, left-folded for chained casts.
fn cast(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, first) = unary(input)?;
    let (input, targets) = many0(preceded(
        cleanup(keyword("as")),
        context("Expected a type after 'as'", cut(cleanup(type_expression))),
    ))
    .parse(input)?;

    let expr = targets.into_iter().fold(first, |expr, target| {
        let span = Span::new(
            "",
            expr.span.position.start..target.span.position.end,
            expr.span.state.clone(),
        );
        ExpressionAst::new(
            span,
            ExpressionKind::TypeCast(TypeCastAst {
                expr: Box::new(expr),
                target,
            }),
        )
    });
    Ok((input, expr))
}

fn unary(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, op) = opt(cleanup(alt((
        value(UnaryOperator::Increment, tag("++")),
        value(UnaryOperator::Decrement, tag("--")),
        value(UnaryOperator::Not, char('!')),
        value(UnaryOperator::BitNot, char('~')),
        value(UnaryOperator::Minus, terminated(char('-'), not(char('-')))),
        value(UnaryOperator::Plus, terminated(char('+'), not(char('+')))),
    ))))
    .parse(input)?;

    match op {
        Some(op) => {
            let (input, operand) = context("Expected an operand", cut(unary)).parse(input)?;
            let span = operand.span.clone();
            Ok((
                input,
                ExpressionAst::new(
                    span,
                    ExpressionKind::Unary(UnaryAst {
                        op,
                        operand: Box::new(operand),
                    }),
                ),
            ))
        }
        None => postfix(input),
    }
}

enum PostfixOp<'base> {
    Member(Token<'base>),
    Subscript(ExpressionAst<'base>),
    Step(PostfixOperator),
}

fn postfix(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, mut expr) = primary(input)?;
    let (input, ops) = many0(cleanup(alt((
        map(
            preceded(terminated(char('.'), not(char('.'))), cut(cleanup(ident))),
            PostfixOp::Member,
        ),
        map(
            delimited(punct('['), cut(expression), punct(']')),
            PostfixOp::Subscript,
        ),
        map(tag("++"), |_| PostfixOp::Step(PostfixOperator::Increment)),
        map(tag("--"), |_| PostfixOp::Step(PostfixOperator::Decrement)),
    ))))
    .parse(input)?;

    for op in ops {
        let span = expr.span.clone();
        expr = match op {
            PostfixOp::Member(member) => ExpressionAst::new(
                Span::new(
                    "",
                    span.position.start..member.span.position.end,
                    span.state.clone(),
                ),
                ExpressionKind::Access(AccessAst {
                    object: Box::new(expr),
                    member,
                }),
            ),
            PostfixOp::Subscript(subscript) => ExpressionAst::new(
                Span::new(
                    "",
                    span.position.start..subscript.span.position.end,
                    span.state.clone(),
                ),
                ExpressionKind::Subscript(SubscriptAst {
                    object: Box::new(expr),
                    subscript: Box::new(subscript),
                }),
            ),
            PostfixOp::Step(op) => ExpressionAst::new(
                span,
                ExpressionKind::Postfix(PostfixAst {
                    op,
                    operand: Box::new(expr),
                }),
            ),
        };
    }

    Ok((input, expr))
}

fn primary(input: NomSpan<'_>) -> ExprResult<'_> {
    cleanup(alt((
        directive_expression,
        parenthesized,
        null_literal,
        new_array,
        array_initializer,
        literal,
        macro_argument_ref,
        named,
    )))
    .parse(input)
}

/// `#[name(args)]` wrapping an expression; used for `disable(const_eval)`.
fn directive_expression(input: NomSpan<'_>) -> ExprResult<'_> {
    let start = input.clone();
    let (input, _) = tag("#[").parse(input)?;
    let (input, name) = cut(cleanup(ident)).parse(input)?;
    let (input, args) = opt(delimited(
        punct('('),
        separated_list1(punct(','), super::directive_arg),
        punct(')'),
    ))
    .parse(input)?;
    let (input, _) = context("Expected ']'", cut(punct(']'))).parse(input)?;
    let (input, inner) =
        context("Expected an expression after the directive", cut(unary)).parse(input)?;

    let span = super::consumed_span(&start, &input);
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

fn parenthesized(input: NomSpan<'_>) -> ExprResult<'_> {
    delimited(punct('('), cleanup(expression), punct(')')).parse(input)
}

fn null_literal(input: NomSpan<'_>) -> ExprResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("null").parse(input)?;
    let span = super::consumed_span(&start, &input);
    Ok((input, ExpressionAst::new(span, ExpressionKind::Null)))
}

/// `new type[length]`
fn new_array(input: NomSpan<'_>) -> ExprResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("new").parse(input)?;
    let (input, ty) = context("Expected an element type", cut(cleanup(type_expression)))
        .parse(input)?;
    let (input, length) = context(
        "Expected an array length",
        cut(delimited(punct('['), cleanup(expression), punct(']'))),
    )
    .parse(input)?;

    let span = super::consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::New(NewAst {
                ty,
                length: Box::new(length),
            }),
        ),
    ))
}

/// `[e, e, ...]`
fn array_initializer(input: NomSpan<'_>) -> ExprResult<'_> {
    let start = input.clone();
    let (input, values) = delimited(
        punct('['),
        separated_list0(punct(','), cleanup(expression)),
        punct(']'),
    )
    .parse(input)?;

    let span = super::consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(span, ExpressionKind::ArrayInitializer(values)),
    ))
}

fn literal(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, token) = alt((primitive::number_literal, primitive::string_literal)).parse(input)?;
    let span = token.span.clone();
    Ok((input, ExpressionAst::new(span, ExpressionKind::Literal(token))))
}

/// `$name`: a macro argument reference inside a macro branch body.
fn macro_argument_ref(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, token) = macro_arg_name(input)?;
    let span = token.span.clone();
    Ok((
        input,
        ExpressionAst::new(span, ExpressionKind::VariableRef(token)),
    ))
}

/// An identifier-led expression: namespace access, call, macro invocation,
/// struct initializer, or plain variable reference.
fn named(input: NomSpan<'_>) -> ExprResult<'_> {
    let (input, name) = ident(input)?;
    named_suffix(input, name)
}

fn named_suffix<'base>(
    input: NomSpan<'base>,
    name: Token<'base>,
) -> ExprResult<'base> {
    // Namespace access: `ns::inner`.
    if let Ok((rest, _)) = tag::<_, _, SlangParserError<'base>>("::").parse(input.clone()) {
        let (rest, inner_name) = cut(cleanup(ident)).parse(rest)?;
        let (rest, inner) = named_suffix(rest, inner_name)?;
        let span = Span::new(
            "",
            name.span.position.start..inner.span.position.end,
            name.span.state.clone(),
        );
        return Ok((
            rest,
            ExpressionAst::new(
                span,
                ExpressionKind::NamespaceAccess(NamespaceAccessAst {
                    namespace: name,
                    inner: Box::new(inner),
                }),
            ),
        ));
    }

    // Macro invocation: `name!(args)`.
    if let Ok((rest, _)) = (char::<_, SlangParserError<'base>>('!'), char('(')).parse(input.clone())
    {
        let (rest, args) = cut(terminated(
            separated_list0(punct(','), cleanup(expression)),
            punct(')'),
        ))
        .parse(rest)?;
        let span = Span::new(
            "",
            name.span.position.start..rest.location_offset(),
            name.span.state.clone(),
        );
        return Ok((
            rest,
            ExpressionAst::new(
                span,
                ExpressionKind::MacroInvocation(MacroInvocationAst { name, args }),
            ),
        ));
    }

    // Call: `name(args)`.
    if let Ok((rest, _)) = char::<_, SlangParserError<'base>>('(').parse(input.clone()) {
        let (rest, args) = cut(terminated(
            separated_list0(punct(','), cleanup(expression)),
            punct(')'),
        ))
        .parse(rest)?;
        let span = Span::new(
            "",
            name.span.position.start..rest.location_offset(),
            name.span.state.clone(),
        );
        return Ok((
            rest,
            ExpressionAst::new(span, ExpressionKind::Call(CallAst { name, args })),
        ));
    }

    // Struct initializer: `Name{...}`, named or anonymous.
    if let Ok((rest, _)) = punct('{').parse(input.clone()) {
        let ty = crate::ast::TypeAst {
            span: name.span.clone(),
            name: name.clone(),
            namespaces: Vec::new(),
            array: false,
        };

        // Named form: at least one `field: value`.
        let named_fields = terminated(
            separated_list1(
                punct(','),
                (cleanup(ident), preceded(punct(':'), cleanup(expression))),
            ),
            (opt(punct(',')), punct('}')),
        )
        .parse(rest.clone());
        if let Ok((rest, fields)) = named_fields {
            let span = Span::new(
                "",
                name.span.position.start..rest.location_offset(),
                name.span.state.clone(),
            );
            return Ok((
                rest,
                ExpressionAst::new(
                    span,
                    ExpressionKind::NamedInitializer(NamedInitializerAst { ty, fields }),
                ),
            ));
        }

        // Anonymous form: positional values.
        let (rest, values) = cut(terminated(
            separated_list0(punct(','), cleanup(expression)),
            (opt(punct(',')), punct('}')),
        ))
        .parse(rest)?;
        let span = Span::new(
            "",
            name.span.position.start..rest.location_offset(),
            name.span.state.clone(),
        );
        return Ok((
            rest,
            ExpressionAst::new(
                span,
                ExpressionKind::AnonymousInitializer(AnonymousInitializerAst { ty, values }),
            ),
        ));
    }

    // Plain variable reference.
    let span = name.span.clone();
    Ok((
        input,
        ExpressionAst::new(span, ExpressionKind::VariableRef(name)),
    ))
}
