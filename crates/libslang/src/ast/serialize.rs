//! Kind-tag-first AST serialization.
//!
//! Every node writes its [`NodeKind`] tag byte followed by its kind-specific
//! fields; reading dispatches on the tag to construct the matching payload.
//! This protocol exists so macro definition bodies can be embedded in module
//! files and re-expanded by importing compilation units. Node indices are not
//! serialized; deserialization draws fresh ones from the supplied
//! [`State`], so a reloaded body never aliases per-node tables.

use std::borrow::Cow;

use crate::{
    archive::{ReadArchive, WriteArchive},
    error::CompileError,
    nom_tools::{Span, State},
};

use super::{
    AccessAst, AnonymousInitializerAst, BinaryAst, BinaryOperator, CallAst,
    ConstantDeclarationAst, DirectiveAst, ExpressionAst, ExpressionKind, FunctionAst, IfAst,
    ImportAst, LiteralValue, MacroArgAst, MacroBranchAst, MacroDefinitionAst,
    MacroInvocationAst, NamedInitializerAst, NamespaceAccessAst, NewAst, NodeKind, ParameterAst,
    PostfixAst, PostfixOperator, PrototypeAst, StructDefinitionAst, StructFieldAst, SubscriptAst,
    Token, TokenKind, TypeAst, TypeCastAst, UnaryAst, UnaryOperator, VariableDeclarationAst,
    WhileAst,
};

fn write_span(ar: &mut WriteArchive, span: &Span<'_>) {
    ar.write_str(span.text.as_ref());
    ar.write_varuint(span.position.start as u64);
    ar.write_varuint(span.position.end as u64);
}

fn read_span(ar: &mut ReadArchive<'_>, state: &State) -> Result<Span<'static>, CompileError> {
    let text = ar.read_str()?;
    let start = ar.read_varuint()? as usize;
    let end = ar.read_varuint()? as usize;
    Ok(Span {
        text: Cow::Owned(text),
        position: start..end,
        state: state.clone(),
    })
}

fn write_token(ar: &mut WriteArchive, token: &Token<'_>) {
    write_span(ar, &token.span);
    ar.write_u8(token.kind as u8);
    match &token.value {
        None => ar.write_u8(0),
        Some(LiteralValue::Int(value)) => {
            ar.write_u8(1);
            ar.write_i32(*value);
        }
        Some(LiteralValue::Float(value)) => {
            ar.write_u8(2);
            ar.write_f32(*value);
        }
        Some(LiteralValue::Str(value)) => {
            ar.write_u8(3);
            ar.write_str(value);
        }
    }
}

fn read_token(ar: &mut ReadArchive<'_>, state: &State) -> Result<Token<'static>, CompileError> {
    let span = read_span(ar, state)?;
    let kind_tag = ar.read_u8()?;
    let kind = TokenKind::from_repr(kind_tag)
        .ok_or_else(|| CompileError::serialization("Unknown token kind tag."))?;
    let value = match ar.read_u8()? {
        0 => None,
        1 => Some(LiteralValue::Int(ar.read_i32()?)),
        2 => Some(LiteralValue::Float(ar.read_f32()?)),
        3 => Some(LiteralValue::Str(ar.read_str()?)),
        _ => return Err(CompileError::serialization("Unknown literal value tag.")),
    };
    Ok(Token { span, kind, value })
}

fn write_type(ar: &mut WriteArchive, ty: &TypeAst<'_>) {
    write_span(ar, &ty.span);
    write_token(ar, &ty.name);
    ar.write_varuint(ty.namespaces.len() as u64);
    for ns in &ty.namespaces {
        write_token(ar, ns);
    }
    ar.write_u8(ty.array as u8);
}

fn read_type(ar: &mut ReadArchive<'_>, state: &State) -> Result<TypeAst<'static>, CompileError> {
    let span = read_span(ar, state)?;
    let name = read_token(ar, state)?;
    let count = ar.read_varuint()?;
    let mut namespaces = Vec::with_capacity(count as usize);
    for _ in 0..count {
        namespaces.push(read_token(ar, state)?);
    }
    let array = ar.read_u8()? != 0;
    Ok(TypeAst {
        span,
        name,
        namespaces,
        array,
    })
}

fn write_parameters(ar: &mut WriteArchive, parameters: &[ParameterAst<'_>]) {
    ar.write_varuint(parameters.len() as u64);
    for parameter in parameters {
        write_token(ar, &parameter.name);
        write_type(ar, &parameter.ty);
    }
}

fn read_parameters(
    ar: &mut ReadArchive<'_>,
    state: &State,
) -> Result<Vec<ParameterAst<'static>>, CompileError> {
    let count = ar.read_varuint()?;
    let mut parameters = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = read_token(ar, state)?;
        let ty = read_type(ar, state)?;
        parameters.push(ParameterAst { name, ty });
    }
    Ok(parameters)
}

fn write_nodes(ar: &mut WriteArchive, nodes: &[ExpressionAst<'_>]) {
    ar.write_varuint(nodes.len() as u64);
    for node in nodes {
        node.serialize(ar);
    }
}

fn read_nodes(
    ar: &mut ReadArchive<'_>,
    state: &State,
) -> Result<Vec<ExpressionAst<'static>>, CompileError> {
    let count = ar.read_varuint()?;
    let mut nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        nodes.push(ExpressionAst::deserialize(ar, state)?);
    }
    Ok(nodes)
}

impl ExpressionAst<'_> {
    /// Serializes this node: kind tag byte first, then the fields.
    pub fn serialize(&self, ar: &mut WriteArchive) {
        ar.write_u8(self.node_kind() as u8);
        write_span(ar, &self.span);

        match &self.kind {
            ExpressionKind::Literal(token) => write_token(ar, token),
            ExpressionKind::VariableRef(token) => write_token(ar, token),
            ExpressionKind::Null | ExpressionKind::Break | ExpressionKind::Continue => {}
            ExpressionKind::Block(statements)
            | ExpressionKind::ArrayInitializer(statements)
            | ExpressionKind::MacroExpressionList(statements) => write_nodes(ar, statements),
            ExpressionKind::Function(func) => {
                write_token(ar, &func.name);
                write_parameters(ar, &func.parameters);
                write_type(ar, &func.return_type);
                func.body.serialize(ar);
            }
            ExpressionKind::Prototype(proto) => {
                write_token(ar, &proto.name);
                write_parameters(ar, &proto.parameters);
                write_type(ar, &proto.return_type);
            }
            ExpressionKind::StructDefinition(def) => {
                write_token(ar, &def.name);
                ar.write_varuint(def.fields.len() as u64);
                for field in &def.fields {
                    write_token(ar, &field.name);
                    write_type(ar, &field.ty);
                }
            }
            ExpressionKind::NamedInitializer(init) => {
                write_type(ar, &init.ty);
                ar.write_varuint(init.fields.len() as u64);
                for (name, value) in &init.fields {
                    write_token(ar, name);
                    value.serialize(ar);
                }
            }
            ExpressionKind::AnonymousInitializer(init) => {
                write_type(ar, &init.ty);
                write_nodes(ar, &init.values);
            }
            ExpressionKind::VariableDeclaration(decl) => {
                write_token(ar, &decl.name);
                match &decl.ty {
                    Some(ty) => {
                        ar.write_u8(1);
                        write_type(ar, ty);
                    }
                    None => ar.write_u8(0),
                }
                decl.value.serialize(ar);
            }
            ExpressionKind::ConstantDeclaration(decl) => {
                write_token(ar, &decl.name);
                write_type(ar, &decl.ty);
                decl.value.serialize(ar);
            }
            ExpressionKind::Import(import) => {
                ar.write_varuint(import.path.len() as u64);
                for part in &import.path {
                    write_token(ar, part);
                }
            }
            ExpressionKind::Directive(directive) => {
                write_token(ar, &directive.name);
                ar.write_varuint(directive.args.len() as u64);
                for (key, value) in &directive.args {
                    write_token(ar, key);
                    match value {
                        Some(value) => {
                            ar.write_u8(1);
                            write_token(ar, value);
                        }
                        None => ar.write_u8(0),
                    }
                }
                directive.inner.serialize(ar);
            }
            ExpressionKind::Unary(unary) => {
                ar.write_u8(unary.op as u8);
                unary.operand.serialize(ar);
            }
            ExpressionKind::Binary(binary) => {
                ar.write_u8(binary.op as u8);
                binary.lhs.serialize(ar);
                binary.rhs.serialize(ar);
            }
            ExpressionKind::Postfix(postfix) => {
                ar.write_u8(postfix.op as u8);
                postfix.operand.serialize(ar);
            }
            ExpressionKind::TypeCast(cast) => {
                cast.expr.serialize(ar);
                write_type(ar, &cast.target);
            }
            ExpressionKind::New(new) => {
                write_type(ar, &new.ty);
                new.length.serialize(ar);
            }
            ExpressionKind::Access(access) => {
                access.object.serialize(ar);
                write_token(ar, &access.member);
            }
            ExpressionKind::NamespaceAccess(access) => {
                write_token(ar, &access.namespace);
                access.inner.serialize(ar);
            }
            ExpressionKind::Subscript(subscript) => {
                subscript.object.serialize(ar);
                subscript.subscript.serialize(ar);
            }
            ExpressionKind::Call(call) => {
                write_token(ar, &call.name);
                write_nodes(ar, &call.args);
            }
            ExpressionKind::MacroInvocation(invocation) => {
                write_token(ar, &invocation.name);
                write_nodes(ar, &invocation.args);
            }
            ExpressionKind::Return(value) => match value {
                Some(value) => {
                    ar.write_u8(1);
                    value.serialize(ar);
                }
                None => ar.write_u8(0),
            },
            ExpressionKind::If(if_ast) => {
                if_ast.condition.serialize(ar);
                if_ast.then_block.serialize(ar);
                match &if_ast.else_block {
                    Some(else_block) => {
                        ar.write_u8(1);
                        else_block.serialize(ar);
                    }
                    None => ar.write_u8(0),
                }
            }
            ExpressionKind::While(while_ast) => {
                while_ast.condition.serialize(ar);
                while_ast.body.serialize(ar);
            }
            ExpressionKind::MacroDefinition(def) => {
                write_token(ar, &def.name);
                write_nodes(ar, &def.branches);
            }
            ExpressionKind::MacroBranch(branch) => {
                ar.write_varuint(branch.args.len() as u64);
                for arg in &branch.args {
                    write_token(ar, &arg.name);
                    write_token(ar, &arg.ty);
                }
                ar.write_u8(branch.ends_with_list as u8);
                branch.body.serialize(ar);
            }
        }
    }

    /// Reads one node from the archive, constructing the concrete kind from
    /// the leading tag byte. Fresh node indices are drawn from `state`.
    pub fn deserialize(
        ar: &mut ReadArchive<'_>,
        state: &State,
    ) -> Result<ExpressionAst<'static>, CompileError> {
        let tag = ar.read_u8()?;
        let kind_tag = NodeKind::from_repr(tag)
            .ok_or_else(|| CompileError::serialization(format!("Unknown AST node tag {tag}.")))?;
        let span = read_span(ar, state)?;

        let kind = match kind_tag {
            NodeKind::Literal => ExpressionKind::Literal(read_token(ar, state)?),
            NodeKind::VariableRef => ExpressionKind::VariableRef(read_token(ar, state)?),
            NodeKind::Null => ExpressionKind::Null,
            NodeKind::Break => ExpressionKind::Break,
            NodeKind::Continue => ExpressionKind::Continue,
            NodeKind::Block => ExpressionKind::Block(read_nodes(ar, state)?),
            NodeKind::ArrayInitializer => ExpressionKind::ArrayInitializer(read_nodes(ar, state)?),
            NodeKind::MacroExpressionList => {
                ExpressionKind::MacroExpressionList(read_nodes(ar, state)?)
            }
            NodeKind::Function => {
                let name = read_token(ar, state)?;
                let parameters = read_parameters(ar, state)?;
                let return_type = read_type(ar, state)?;
                let body = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::Function(FunctionAst {
                    name,
                    parameters,
                    return_type,
                    body,
                })
            }
            NodeKind::Prototype => {
                let name = read_token(ar, state)?;
                let parameters = read_parameters(ar, state)?;
                let return_type = read_type(ar, state)?;
                ExpressionKind::Prototype(PrototypeAst {
                    name,
                    parameters,
                    return_type,
                })
            }
            NodeKind::StructDefinition => {
                let name = read_token(ar, state)?;
                let count = ar.read_varuint()?;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = read_token(ar, state)?;
                    let ty = read_type(ar, state)?;
                    fields.push(StructFieldAst { name, ty });
                }
                ExpressionKind::StructDefinition(StructDefinitionAst { name, fields })
            }
            NodeKind::NamedInitializer => {
                let ty = read_type(ar, state)?;
                let count = ar.read_varuint()?;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = read_token(ar, state)?;
                    let value = ExpressionAst::deserialize(ar, state)?;
                    fields.push((name, value));
                }
                ExpressionKind::NamedInitializer(NamedInitializerAst { ty, fields })
            }
            NodeKind::AnonymousInitializer => {
                let ty = read_type(ar, state)?;
                let values = read_nodes(ar, state)?;
                ExpressionKind::AnonymousInitializer(AnonymousInitializerAst { ty, values })
            }
            NodeKind::VariableDeclaration => {
                let name = read_token(ar, state)?;
                let ty = match ar.read_u8()? {
                    0 => None,
                    _ => Some(read_type(ar, state)?),
                };
                let value = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::VariableDeclaration(VariableDeclarationAst { name, ty, value })
            }
            NodeKind::ConstantDeclaration => {
                let name = read_token(ar, state)?;
                let ty = read_type(ar, state)?;
                let value = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::ConstantDeclaration(ConstantDeclarationAst { name, ty, value })
            }
            NodeKind::Import => {
                let count = ar.read_varuint()?;
                let mut path = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    path.push(read_token(ar, state)?);
                }
                ExpressionKind::Import(ImportAst { path })
            }
            NodeKind::Directive => {
                let name = read_token(ar, state)?;
                let count = ar.read_varuint()?;
                let mut args = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = read_token(ar, state)?;
                    let value = match ar.read_u8()? {
                        0 => None,
                        _ => Some(read_token(ar, state)?),
                    };
                    args.push((key, value));
                }
                let inner = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::Directive(DirectiveAst { name, args, inner })
            }
            NodeKind::Unary => {
                let op = UnaryOperator::from_repr(ar.read_u8()?)
                    .ok_or_else(|| CompileError::serialization("Unknown unary operator tag."))?;
                let operand = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::Unary(UnaryAst { op, operand })
            }
            NodeKind::Binary => {
                let op = BinaryOperator::from_repr(ar.read_u8()?)
                    .ok_or_else(|| CompileError::serialization("Unknown binary operator tag."))?;
                let lhs = Box::new(ExpressionAst::deserialize(ar, state)?);
                let rhs = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::Binary(BinaryAst { op, lhs, rhs })
            }
            NodeKind::Postfix => {
                let op = PostfixOperator::from_repr(ar.read_u8()?)
                    .ok_or_else(|| CompileError::serialization("Unknown postfix operator tag."))?;
                let operand = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::Postfix(PostfixAst { op, operand })
            }
            NodeKind::TypeCast => {
                let expr = Box::new(ExpressionAst::deserialize(ar, state)?);
                let target = read_type(ar, state)?;
                ExpressionKind::TypeCast(TypeCastAst { expr, target })
            }
            NodeKind::New => {
                let ty = read_type(ar, state)?;
                let length = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::New(NewAst { ty, length })
            }
            NodeKind::Access => {
                let object = Box::new(ExpressionAst::deserialize(ar, state)?);
                let member = read_token(ar, state)?;
                ExpressionKind::Access(AccessAst { object, member })
            }
            NodeKind::NamespaceAccess => {
                let namespace = read_token(ar, state)?;
                let inner = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::NamespaceAccess(NamespaceAccessAst { namespace, inner })
            }
            NodeKind::Subscript => {
                let object = Box::new(ExpressionAst::deserialize(ar, state)?);
                let subscript = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::Subscript(SubscriptAst { object, subscript })
            }
            NodeKind::Call => {
                let name = read_token(ar, state)?;
                let args = read_nodes(ar, state)?;
                ExpressionKind::Call(CallAst { name, args })
            }
            NodeKind::MacroInvocation => {
                let name = read_token(ar, state)?;
                let args = read_nodes(ar, state)?;
                ExpressionKind::MacroInvocation(MacroInvocationAst { name, args })
            }
            NodeKind::Return => match ar.read_u8()? {
                0 => ExpressionKind::Return(None),
                _ => ExpressionKind::Return(Some(Box::new(ExpressionAst::deserialize(ar, state)?))),
            },
            NodeKind::If => {
                let condition = Box::new(ExpressionAst::deserialize(ar, state)?);
                let then_block = Box::new(ExpressionAst::deserialize(ar, state)?);
                let else_block = match ar.read_u8()? {
                    0 => None,
                    _ => Some(Box::new(ExpressionAst::deserialize(ar, state)?)),
                };
                ExpressionKind::If(IfAst {
                    condition,
                    then_block,
                    else_block,
                })
            }
            NodeKind::While => {
                let condition = Box::new(ExpressionAst::deserialize(ar, state)?);
                let body = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::While(WhileAst { condition, body })
            }
            NodeKind::MacroDefinition => {
                let name = read_token(ar, state)?;
                let branches = read_nodes(ar, state)?;
                ExpressionKind::MacroDefinition(MacroDefinitionAst { name, branches })
            }
            NodeKind::MacroBranch => {
                let count = ar.read_varuint()?;
                let mut args = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name = read_token(ar, state)?;
                    let ty = read_token(ar, state)?;
                    args.push(MacroArgAst { name, ty });
                }
                let ends_with_list = ar.read_u8()? != 0;
                let body = Box::new(ExpressionAst::deserialize(ar, state)?);
                ExpressionKind::MacroBranch(MacroBranchAst {
                    args,
                    ends_with_list,
                    body,
                })
            }
        };

        Ok(ExpressionAst {
            index: super::AstIndex(state.next_index()),
            span,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        archive::{ReadArchive, WriteArchive},
        ast::ExpressionAst,
        file::SourceFile,
        nom_tools::State,
    };

    #[test]
    fn macro_definition_round_trips_byte_identical() {
        let source = r#"
            macro swap! {
                ($a: expr, $b: expr) => {
                    let tmp = $a;
                    $a = $b;
                    $b = tmp;
                };
            }
        "#;
        let state = State::new(SourceFile::new(vec!["test".into()], source.to_string()));
        let file = crate::parser::parse(&state).expect("macro definition parses");
        let def = &file.items[0];

        let mut first = WriteArchive::new();
        def.serialize(&mut first);
        let bytes = first.into_bytes();

        let read_state = State::new(SourceFile::new(vec!["<macro>".into()], String::new()));
        let mut reader = ReadArchive::new(&bytes);
        let reloaded = ExpressionAst::deserialize(&mut reader, &read_state).unwrap();
        assert_eq!(reader.remaining(), 0);

        let mut second = WriteArchive::new();
        reloaded.serialize(&mut second);
        assert_eq!(second.into_bytes(), bytes);
    }
}
