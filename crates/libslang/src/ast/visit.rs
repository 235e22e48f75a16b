//! Depth-first traversal over the AST.
//!
//! The visitor guarantees: pre-order visits parents before children,
//! post-order visits children before parents, the filter prunes whole
//! subtrees, and a node is visited at most once (the AST is a tree).

use super::{ExpressionAst, ExpressionKind};

impl<'base> ExpressionAst<'base> {
    /// Returns the direct child nodes.
    pub fn children(&self) -> Vec<&ExpressionAst<'base>> {
        match &self.kind {
            ExpressionKind::Literal(_)
            | ExpressionKind::VariableRef(_)
            | ExpressionKind::Null
            | ExpressionKind::Import(_)
            | ExpressionKind::Prototype(_)
            | ExpressionKind::StructDefinition(_)
            | ExpressionKind::Break
            | ExpressionKind::Continue => Vec::new(),
            ExpressionKind::Block(statements)
            | ExpressionKind::ArrayInitializer(statements)
            | ExpressionKind::MacroExpressionList(statements) => statements.iter().collect(),
            ExpressionKind::Function(f) => vec![f.body.as_ref()],
            ExpressionKind::NamedInitializer(init) => {
                init.fields.iter().map(|(_, value)| value).collect()
            }
            ExpressionKind::AnonymousInitializer(init) => init.values.iter().collect(),
            ExpressionKind::VariableDeclaration(decl) => vec![decl.value.as_ref()],
            ExpressionKind::ConstantDeclaration(decl) => vec![decl.value.as_ref()],
            ExpressionKind::Directive(directive) => vec![directive.inner.as_ref()],
            ExpressionKind::Unary(unary) => vec![unary.operand.as_ref()],
            ExpressionKind::Binary(binary) => vec![binary.lhs.as_ref(), binary.rhs.as_ref()],
            ExpressionKind::Postfix(postfix) => vec![postfix.operand.as_ref()],
            ExpressionKind::TypeCast(cast) => vec![cast.expr.as_ref()],
            ExpressionKind::New(new) => vec![new.length.as_ref()],
            ExpressionKind::Access(access) => vec![access.object.as_ref()],
            ExpressionKind::NamespaceAccess(access) => vec![access.inner.as_ref()],
            ExpressionKind::Subscript(subscript) => {
                vec![subscript.object.as_ref(), subscript.subscript.as_ref()]
            }
            ExpressionKind::Call(call) => call.args.iter().collect(),
            ExpressionKind::MacroInvocation(invocation) => invocation.args.iter().collect(),
            ExpressionKind::Return(value) => value.iter().map(|v| v.as_ref()).collect(),
            ExpressionKind::If(if_ast) => {
                let mut children = vec![if_ast.condition.as_ref(), if_ast.then_block.as_ref()];
                if let Some(else_block) = &if_ast.else_block {
                    children.push(else_block.as_ref());
                }
                children
            }
            ExpressionKind::While(while_ast) => {
                vec![while_ast.condition.as_ref(), while_ast.body.as_ref()]
            }
            ExpressionKind::MacroDefinition(def) => def.branches.iter().collect(),
            ExpressionKind::MacroBranch(branch) => vec![branch.body.as_ref()],
        }
    }

    /// Returns the direct child nodes, mutably.
    pub fn children_mut(&mut self) -> Vec<&mut ExpressionAst<'base>> {
        match &mut self.kind {
            ExpressionKind::Literal(_)
            | ExpressionKind::VariableRef(_)
            | ExpressionKind::Null
            | ExpressionKind::Import(_)
            | ExpressionKind::Prototype(_)
            | ExpressionKind::StructDefinition(_)
            | ExpressionKind::Break
            | ExpressionKind::Continue => Vec::new(),
            ExpressionKind::Block(statements)
            | ExpressionKind::ArrayInitializer(statements)
            | ExpressionKind::MacroExpressionList(statements) => statements.iter_mut().collect(),
            ExpressionKind::Function(f) => vec![f.body.as_mut()],
            ExpressionKind::NamedInitializer(init) => {
                init.fields.iter_mut().map(|(_, value)| value).collect()
            }
            ExpressionKind::AnonymousInitializer(init) => init.values.iter_mut().collect(),
            ExpressionKind::VariableDeclaration(decl) => vec![decl.value.as_mut()],
            ExpressionKind::ConstantDeclaration(decl) => vec![decl.value.as_mut()],
            ExpressionKind::Directive(directive) => vec![directive.inner.as_mut()],
            ExpressionKind::Unary(unary) => vec![unary.operand.as_mut()],
            ExpressionKind::Binary(binary) => vec![binary.lhs.as_mut(), binary.rhs.as_mut()],
            ExpressionKind::Postfix(postfix) => vec![postfix.operand.as_mut()],
            ExpressionKind::TypeCast(cast) => vec![cast.expr.as_mut()],
            ExpressionKind::New(new) => vec![new.length.as_mut()],
            ExpressionKind::Access(access) => vec![access.object.as_mut()],
            ExpressionKind::NamespaceAccess(access) => vec![access.inner.as_mut()],
            ExpressionKind::Subscript(subscript) => {
                vec![subscript.object.as_mut(), subscript.subscript.as_mut()]
            }
            ExpressionKind::Call(call) => call.args.iter_mut().collect(),
            ExpressionKind::MacroInvocation(invocation) => invocation.args.iter_mut().collect(),
            ExpressionKind::Return(value) => value.iter_mut().map(|v| v.as_mut()).collect(),
            ExpressionKind::If(if_ast) => {
                let mut children = vec![if_ast.condition.as_mut(), if_ast.then_block.as_mut()];
                if let Some(else_block) = &mut if_ast.else_block {
                    children.push(else_block.as_mut());
                }
                children
            }
            ExpressionKind::While(while_ast) => {
                vec![while_ast.condition.as_mut(), while_ast.body.as_mut()]
            }
            ExpressionKind::MacroDefinition(def) => def.branches.iter_mut().collect(),
            ExpressionKind::MacroBranch(branch) => vec![branch.body.as_mut()],
        }
    }

    /// Visits all nodes in this subtree.
    ///
    /// * `visit_self`: whether the root itself is visited.
    /// * `post_order`: children before parents when `true`, parents first
    ///   otherwise.
    /// * `filter`: when supplied, a node for which it returns `false` is
    ///   skipped together with its whole subtree.
    pub fn visit_nodes(
        &self,
        visitor: &mut dyn FnMut(&ExpressionAst<'base>),
        visit_self: bool,
        post_order: bool,
        filter: Option<&dyn Fn(&ExpressionAst<'base>) -> bool>,
    ) {
        if let Some(filter) = filter {
            if !filter(self) {
                return;
            }
        }

        if visit_self && !post_order {
            visitor(self);
        }

        for child in self.children() {
            child.visit_nodes(visitor, true, post_order, filter);
        }

        if visit_self && post_order {
            visitor(self);
        }
    }

    /// Mutable variant of [`visit_nodes`](Self::visit_nodes).
    pub fn visit_nodes_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut ExpressionAst<'base>),
        visit_self: bool,
        post_order: bool,
        filter: Option<&dyn Fn(&ExpressionAst<'base>) -> bool>,
    ) {
        if let Some(filter) = filter {
            if !filter(self) {
                return;
            }
        }

        if visit_self && !post_order {
            visitor(self);
        }

        for child in self.children_mut() {
            child.visit_nodes_mut(visitor, true, post_order, filter);
        }

        if visit_self && post_order {
            visitor(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ast::{BinaryAst, BinaryOperator, ExpressionAst, ExpressionKind, NodeKind},
        file::SourceFile,
        nom_tools::{Span, State},
    };

    fn tree(state: &State) -> ExpressionAst<'static> {
        let lhs = ExpressionAst::new(Span::new("1", 0..1, state.clone()), ExpressionKind::Null);
        let rhs = ExpressionAst::new(Span::new("2", 4..5, state.clone()), ExpressionKind::Break);
        ExpressionAst::new(
            Span::new("1 + 2", 0..5, state.clone()),
            ExpressionKind::Binary(BinaryAst {
                op: BinaryOperator::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }),
        )
    }

    #[test]
    fn pre_order_visits_parent_first() {
        let state = State::new(SourceFile::new(vec!["test".into()], "1 + 2".to_string()));
        let root = tree(&state);

        let mut kinds = Vec::new();
        root.visit_nodes(&mut |node| kinds.push(node.node_kind()), true, false, None);
        assert_eq!(kinds, vec![NodeKind::Binary, NodeKind::Null, NodeKind::Break]);
    }

    #[test]
    fn post_order_visits_children_first() {
        let state = State::new(SourceFile::new(vec!["test".into()], "1 + 2".to_string()));
        let root = tree(&state);

        let mut kinds = Vec::new();
        root.visit_nodes(&mut |node| kinds.push(node.node_kind()), true, true, None);
        assert_eq!(kinds, vec![NodeKind::Null, NodeKind::Break, NodeKind::Binary]);
    }

    #[test]
    fn filter_prunes_subtrees() {
        let state = State::new(SourceFile::new(vec!["test".into()], "1 + 2".to_string()));
        let root = tree(&state);

        let mut kinds = Vec::new();
        root.visit_nodes(
            &mut |node| kinds.push(node.node_kind()),
            true,
            false,
            Some(&|node| node.node_kind() != NodeKind::Null),
        );
        assert_eq!(kinds, vec![NodeKind::Binary, NodeKind::Break]);
    }

    #[test]
    fn skipping_self_still_visits_children() {
        let state = State::new(SourceFile::new(vec!["test".into()], "1 + 2".to_string()));
        let root = tree(&state);

        let mut count = 0;
        root.visit_nodes(&mut |_| count += 1, false, false, None);
        assert_eq!(count, 2);
    }
}
