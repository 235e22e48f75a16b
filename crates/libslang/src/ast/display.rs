//! Readable string representations of AST nodes.

use std::fmt::{Display, Formatter, Result};

use super::{ExpressionAst, ExpressionKind, TypeAst};

fn join<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Display for TypeAst<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if self.array {
            write!(f, "[{}]", self.qualified_name())
        } else {
            f.write_str(&self.qualified_name())
        }
    }
}

impl Display for ExpressionAst<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match &self.kind {
            ExpressionKind::Literal(token) => f.write_str(token.text()),
            ExpressionKind::VariableRef(token) => f.write_str(token.text()),
            ExpressionKind::Null => f.write_str("null"),
            ExpressionKind::Block(statements) => {
                write!(f, "Block({})", join(statements))
            }
            ExpressionKind::Function(func) => write!(
                f,
                "Function(name={}, args=({}), return={}, body={})",
                func.name.text(),
                join(func.parameters.iter().map(|p| format!("{}: {}", p.name.text(), p.ty))),
                func.return_type,
                func.body
            ),
            ExpressionKind::Prototype(proto) => write!(
                f,
                "Prototype(name={}, args=({}), return={})",
                proto.name.text(),
                join(proto.parameters.iter().map(|p| format!("{}: {}", p.name.text(), p.ty))),
                proto.return_type
            ),
            ExpressionKind::StructDefinition(def) => write!(
                f,
                "Struct(name={}, fields=({}))",
                def.name.text(),
                join(def.fields.iter().map(|field| format!("{}: {}", field.name.text(), field.ty)))
            ),
            ExpressionKind::NamedInitializer(init) => write!(
                f,
                "{}{{{}}}",
                init.ty,
                join(init.fields.iter().map(|(name, value)| format!("{}: {value}", name.text())))
            ),
            ExpressionKind::AnonymousInitializer(init) => {
                write!(f, "{}{{{}}}", init.ty, join(&init.values))
            }
            ExpressionKind::ArrayInitializer(values) => write!(f, "[{}]", join(values)),
            ExpressionKind::VariableDeclaration(decl) => match &decl.ty {
                Some(ty) => write!(f, "Let(name={}, type={ty}, value={})", decl.name.text(), decl.value),
                None => write!(f, "Let(name={}, value={})", decl.name.text(), decl.value),
            },
            ExpressionKind::ConstantDeclaration(decl) => write!(
                f,
                "Const(name={}, type={}, value={})",
                decl.name.text(),
                decl.ty,
                decl.value
            ),
            ExpressionKind::Import(import) => write!(f, "Import({})", import.qualified_name()),
            ExpressionKind::Directive(directive) => write!(
                f,
                "Directive(name={}, inner={})",
                directive.name.text(),
                directive.inner
            ),
            ExpressionKind::Unary(unary) => write!(f, "({}{})", unary.op, unary.operand),
            ExpressionKind::Binary(binary) => {
                write!(f, "({} {} {})", binary.lhs, binary.op, binary.rhs)
            }
            ExpressionKind::Postfix(postfix) => write!(f, "({}{})", postfix.operand, postfix.op),
            ExpressionKind::TypeCast(cast) => write!(f, "({} as {})", cast.expr, cast.target),
            ExpressionKind::New(new) => write!(f, "new {}[{}]", new.ty, new.length),
            ExpressionKind::Access(access) => write!(f, "{}.{}", access.object, access.member.text()),
            ExpressionKind::NamespaceAccess(access) => {
                write!(f, "{}::{}", access.namespace.text(), access.inner)
            }
            ExpressionKind::Subscript(subscript) => {
                write!(f, "{}[{}]", subscript.object, subscript.subscript)
            }
            ExpressionKind::Call(call) => write!(f, "{}({})", call.name.text(), join(&call.args)),
            ExpressionKind::MacroInvocation(invocation) => {
                write!(f, "{}!({})", invocation.name.text(), join(&invocation.args))
            }
            ExpressionKind::Return(value) => match value {
                Some(value) => write!(f, "Return({value})"),
                None => f.write_str("Return"),
            },
            ExpressionKind::If(if_ast) => match &if_ast.else_block {
                Some(else_block) => write!(
                    f,
                    "If(cond={}, then={}, else={})",
                    if_ast.condition, if_ast.then_block, else_block
                ),
                None => write!(f, "If(cond={}, then={})", if_ast.condition, if_ast.then_block),
            },
            ExpressionKind::While(while_ast) => {
                write!(f, "While(cond={}, body={})", while_ast.condition, while_ast.body)
            }
            ExpressionKind::Break => f.write_str("Break"),
            ExpressionKind::Continue => f.write_str("Continue"),
            ExpressionKind::MacroDefinition(def) => {
                write!(f, "Macro(name={}, branches=({}))", def.name.text(), join(&def.branches))
            }
            ExpressionKind::MacroBranch(branch) => write!(
                f,
                "MacroBranch(args=({}), list={}, body={})",
                join(
                    branch
                        .args
                        .iter()
                        .map(|arg| format!("{}: {}", arg.name.text(), arg.ty.text()))
                ),
                branch.ends_with_list,
                branch.body
            ),
            ExpressionKind::MacroExpressionList(exprs) => {
                write!(f, "MacroExpressionList({})", join(exprs))
            }
        }
    }
}
