//! Statement parsing: blocks, declarations and control flow.

use nom::{
    branch::alt,
    combinator::{cut, map, opt},
    error::context,
    multi::many0,
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::{
    ast::{
        ConstantDeclarationAst, ExpressionAst, ExpressionKind, IfAst, VariableDeclarationAst,
        WhileAst,
    },
    nom_tools::{cleanup, punct, NomSpan},
};

use super::{consumed_span, expression, ident, keyword, type_expression, SlangParserError};

type StmtResult<'base> = IResult<NomSpan<'base>, ExpressionAst<'base>, SlangParserError<'base>>;

/// Parses a `{ ... }` block.
pub fn block(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, statements) = delimited(
        punct('{'),
        many0(cleanup(statement)),
        context("Expected '}'", cut(punct('}'))),
    )
    .parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((input, ExpressionAst::new(span, ExpressionKind::Block(statements))))
}

fn statement(input: NomSpan<'_>) -> StmtResult<'_> {
    alt((
        block,
        variable_declaration,
        constant_declaration,
        return_statement,
        if_statement,
        while_statement,
        break_statement,
        continue_statement,
        expression_statement,
    ))
    .parse(input)
}

/// `let name: type = value;`; the type annotation is optional.
fn variable_declaration(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("let").parse(input)?;
    let (input, name) = context("Expected a variable name", cut(cleanup(ident))).parse(input)?;
    let (input, ty) = opt(preceded(
        punct(':'),
        context("Expected a type", cut(cleanup(type_expression))),
    ))
    .parse(input)?;
    let (input, value) = preceded(
        context("Expected '='", cut(punct('='))),
        context("Expected an initializer", cut(cleanup(expression))),
    )
    .parse(input)?;
    let (input, _) = context("Expected ';'", cut(punct(';'))).parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::VariableDeclaration(VariableDeclarationAst {
                name,
                ty,
                value: Box::new(value),
            }),
        ),
    ))
}

/// `const NAME: type = value;`; the type annotation is required.
pub fn constant_declaration(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("const").parse(input)?;
    let (input, name) = context("Expected a constant name", cut(cleanup(ident))).parse(input)?;
    let (input, ty) = preceded(
        context("Expected ':'", cut(punct(':'))),
        context("Expected a type", cut(cleanup(type_expression))),
    )
    .parse(input)?;
    let (input, value) = preceded(
        context("Expected '='", cut(punct('='))),
        context("Expected an initializer", cut(cleanup(expression))),
    )
    .parse(input)?;
    let (input, _) = context("Expected ';'", cut(punct(';'))).parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::ConstantDeclaration(ConstantDeclarationAst {
                name,
                ty,
                value: Box::new(value),
            }),
        ),
    ))
}

fn return_statement(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("return").parse(input)?;
    let (input, value) = opt(cleanup(expression)).parse(input)?;
    let (input, _) = context("Expected ';'", cut(punct(';'))).parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(span, ExpressionKind::Return(value.map(Box::new))),
    ))
}

/// `if (cond) { ... } else ...`; the else branch chains into another `if`
/// or a block.
fn if_statement(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("if").parse(input)?;
    let (input, condition) = context(
        "Expected a parenthesized condition",
        cut(delimited(punct('('), cleanup(expression), punct(')'))),
    )
    .parse(input)?;
    let (input, then_block) = context("Expected a block", cut(cleanup(block))).parse(input)?;
    let (input, else_block) = opt(preceded(
        cleanup(keyword("else")),
        context(
            "Expected a block or 'if' after 'else'",
            cut(cleanup(alt((if_statement, block)))),
        ),
    ))
    .parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::If(IfAst {
                condition: Box::new(condition),
                then_block: Box::new(then_block),
                else_block: else_block.map(Box::new),
            }),
        ),
    ))
}

fn while_statement(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = keyword("while").parse(input)?;
    let (input, condition) = context(
        "Expected a parenthesized condition",
        cut(delimited(punct('('), cleanup(expression), punct(')'))),
    )
    .parse(input)?;
    let (input, body) = context("Expected a block", cut(cleanup(block))).parse(input)?;

    let span = consumed_span(&start, &input);
    Ok((
        input,
        ExpressionAst::new(
            span,
            ExpressionKind::While(WhileAst {
                condition: Box::new(condition),
                body: Box::new(body),
            }),
        ),
    ))
}

fn break_statement(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = terminated(keyword("break"), context("Expected ';'", cut(punct(';'))))
        .parse(input)?;
    let span = consumed_span(&start, &input);
    Ok((input, ExpressionAst::new(span, ExpressionKind::Break)))
}

fn continue_statement(input: NomSpan<'_>) -> StmtResult<'_> {
    let start = input.clone();
    let (input, _) = terminated(
        keyword("continue"),
        context("Expected ';'", cut(punct(';'))),
    )
    .parse(input)?;
    let span = consumed_span(&start, &input);
    Ok((input, ExpressionAst::new(span, ExpressionKind::Continue)))
}

fn expression_statement(input: NomSpan<'_>) -> StmtResult<'_> {
    map(
        terminated(
            cleanup(expression),
            context("Expected ';'", cut(punct(';'))),
        ),
        |expr| expr,
    )
    .parse(input)
}
