//! Name collection: the first full AST walk.
//!
//! Collection creates the scope tree, declares the symbols of the compiled
//! module, records every node's owning scope, and binds directives as
//! attributes of the enclosing declaration. Redefinition is an error unless
//! the existing symbol is only transitively imported, in which case the new
//! declaration demotes it out of the transitive set.

use std::borrow::Cow;

use log::debug;

use crate::{
    ast::{ExpressionAst, ExpressionKind},
    error::CompileError,
    nom_tools::SpanInfo,
};

use super::{
    attribute::{attribute_kind, AttributeInfo},
    env::SemaEnv,
    scope::{Scope, ScopeId},
    symbol::{SymbolId, SymbolInfo, SymbolKind, SymbolReference},
};

/// Name collection context: tracks the current scope while walking.
pub struct Collector<'env, 'base> {
    env: &'env mut SemaEnv<'base>,
    current_scope: ScopeId,
}

impl<'env, 'base> Collector<'env, 'base> {
    /// Creates a collector for a fresh compilation, creating the global
    /// scope.
    pub fn new(env: &'env mut SemaEnv<'base>, file_span: SpanInfo) -> Result<Self, CompileError> {
        if !env.scopes.is_empty() {
            return Err(CompileError::internal(
                "collect",
                "Scope table not empty when creating the global scope.",
            ));
        }

        let global = env.create_scope(Scope::new(ScopeId::UNDEFINED, Cow::Borrowed(""), file_span));
        env.global_scope = global;

        Ok(Self {
            env,
            current_scope: global,
        })
    }

    /// Creates a collector positioned at an existing scope. Used for
    /// subtrees grafted by macro expansion and by the import resolver.
    pub fn at_scope(env: &'env mut SemaEnv<'base>, scope: ScopeId) -> Self {
        Self {
            env,
            current_scope: scope,
        }
    }

    /// The scope the collector currently declares into.
    pub fn current_scope(&self) -> ScopeId {
        self.current_scope
    }

    /// Collects all top-level items of a compilation unit.
    pub fn collect_items(&mut self, items: &[ExpressionAst<'base>]) -> Result<(), CompileError> {
        for item in items {
            self.collect(item)?;
        }
        Ok(())
    }

    /// Collects one node and its subtree.
    pub fn collect(&mut self, node: &ExpressionAst<'base>) -> Result<(), CompileError> {
        self.env.node_scopes.insert(node.index, self.current_scope);

        match &node.kind {
            ExpressionKind::Block(statements) => {
                self.push_scope(None, (&node.span).into())?;
                for statement in statements {
                    self.collect(statement)?;
                }
                self.pop_scope()?;
            }
            ExpressionKind::Function(func) => {
                let symbol = self.declare_node(
                    func.name.span.text.clone(),
                    SymbolKind::Function,
                    (&func.name.span).into(),
                    node,
                )?;
                self.env.node_symbols.insert(node.index, symbol);

                self.push_scope(Some(func.name.span.text.clone()), (&node.span).into())?;
                for parameter in &func.parameters {
                    self.declare_node(
                        parameter.name.span.text.clone(),
                        SymbolKind::Variable,
                        (&parameter.name.span).into(),
                        node,
                    )?;
                }
                self.collect(&func.body)?;
                self.pop_scope()?;
            }
            ExpressionKind::Prototype(proto) => {
                let symbol = self.declare_node(
                    proto.name.span.text.clone(),
                    SymbolKind::Function,
                    (&proto.name.span).into(),
                    node,
                )?;
                self.env.node_symbols.insert(node.index, symbol);

                self.push_scope(Some(proto.name.span.text.clone()), (&node.span).into())?;
                for parameter in &proto.parameters {
                    self.declare_node(
                        parameter.name.span.text.clone(),
                        SymbolKind::Variable,
                        (&parameter.name.span).into(),
                        node,
                    )?;
                }
                self.pop_scope()?;
            }
            ExpressionKind::StructDefinition(def) => {
                let symbol = self.declare_node(
                    def.name.span.text.clone(),
                    SymbolKind::Type,
                    (&def.name.span).into(),
                    node,
                )?;
                self.env.node_symbols.insert(node.index, symbol);

                self.push_scope(Some(def.name.span.text.clone()), (&node.span).into())?;
                for field in &def.fields {
                    self.declare_node(
                        field.name.span.text.clone(),
                        SymbolKind::Variable,
                        (&field.name.span).into(),
                        node,
                    )?;
                }
                self.pop_scope()?;
            }
            ExpressionKind::MacroDefinition(def) => {
                let symbol = self.declare_node(
                    def.name.span.text.clone(),
                    SymbolKind::Macro,
                    (&def.name.span).into(),
                    node,
                )?;
                self.env.node_symbols.insert(node.index, symbol);

                self.push_scope(Some(def.name.span.text.clone()), (&node.span).into())?;
                for branch in &def.branches {
                    self.env.node_scopes.insert(branch.index, self.current_scope);
                    let ExpressionKind::MacroBranch(branch_ast) = &branch.kind else {
                        return Err(CompileError::internal(
                            "collect",
                            "Macro definition contains a non-branch child.",
                        ));
                    };

                    self.push_scope(None, (&branch.span).into())?;
                    for arg in &branch_ast.args {
                        self.declare_node(
                            arg.name.span.text.clone(),
                            SymbolKind::MacroArgument,
                            (&arg.name.span).into(),
                            branch,
                        )?;
                    }
                    self.collect(&branch_ast.body)?;
                    self.pop_scope()?;
                }
                self.pop_scope()?;
            }
            ExpressionKind::VariableDeclaration(decl) => {
                self.collect(&decl.value)?;
                let symbol = self.declare_node(
                    decl.name.span.text.clone(),
                    SymbolKind::Variable,
                    (&decl.name.span).into(),
                    node,
                )?;
                self.env.node_symbols.insert(node.index, symbol);
            }
            ExpressionKind::ConstantDeclaration(decl) => {
                self.collect(&decl.value)?;
                let symbol = self.declare_node(
                    decl.name.span.text.clone(),
                    SymbolKind::Constant,
                    (&decl.name.span).into(),
                    node,
                )?;
                self.env.node_symbols.insert(node.index, symbol);
            }
            ExpressionKind::Import(import) => {
                let path = import.qualified_name();
                let symbol = self.declare(
                    Cow::Owned(path.clone()),
                    Cow::Owned(path),
                    SymbolKind::ModuleImport,
                    (&node.span).into(),
                    SymbolId::UNDEFINED,
                    false,
                    Some(SymbolReference::Node(node.index)),
                )?;
                self.env.node_symbols.insert(node.index, symbol);
            }
            ExpressionKind::Directive(directive) => {
                let Some(kind) = attribute_kind(directive.name.text()) else {
                    return Err(CompileError::unknown_directive(
                        directive.name.text().to_string(),
                        &(&directive.name.span).into(),
                    ));
                };

                self.collect(&directive.inner)?;

                // Bind the attribute to the enclosing declaration, looking
                // through stacked directives.
                let mut target = directive.inner.as_ref();
                while let ExpressionKind::Directive(inner) = &target.kind {
                    target = inner.inner.as_ref();
                }
                if let Some(symbol) = self.env.node_symbols.get(&target.index).copied() {
                    self.env.attach_attribute(
                        symbol,
                        AttributeInfo {
                            kind,
                            span: (&directive.name.span).into(),
                            args: directive
                                .args
                                .iter()
                                .map(|(key, value)| {
                                    (
                                        key.text().to_string(),
                                        value.as_ref().map(|v| match &v.value {
                                            Some(crate::ast::LiteralValue::Str(s)) => s.clone(),
                                            _ => v.text().to_string(),
                                        }),
                                    )
                                })
                                .collect(),
                        },
                    );
                }
            }
            _ => {
                for child in node.children() {
                    self.collect(child)?;
                }
            }
        }

        Ok(())
    }

    /// Declares a symbol backed by an AST node in the current scope.
    fn declare_node(
        &mut self,
        name: Cow<'base, str>,
        kind: SymbolKind,
        span: SpanInfo,
        node: &ExpressionAst<'base>,
    ) -> Result<SymbolId, CompileError> {
        let qualified = self.qualify(&name);
        self.declare(
            name,
            qualified,
            kind,
            span,
            SymbolId::UNDEFINED,
            false,
            Some(SymbolReference::Node(node.index)),
        )
    }

    /// Declares a symbol in the current scope.
    ///
    /// Redeclaring a symbol that exists only transitively demotes it out of
    /// the transitive set instead of failing.
    #[allow(clippy::too_many_arguments)]
    pub fn declare(
        &mut self,
        name: Cow<'base, str>,
        qualified_name: Cow<'base, str>,
        kind: SymbolKind,
        span: SpanInfo,
        declaring_module: SymbolId,
        transitive: bool,
        reference: Option<SymbolReference>,
    ) -> Result<SymbolId, CompileError> {
        debug!(
            "declare: name={name}, kind={kind}, scope={}",
            self.current_scope.0
        );

        let scope = self.env.scope(self.current_scope)?;
        if let Some(existing) = scope.binding(&name, kind) {
            if !transitive && self.env.transitive_imports.contains(&existing) {
                self.env.transitive_imports.shift_remove(&existing);
                return Ok(existing);
            }

            let original = self.env.symbol_span(existing);
            return Err(CompileError::redefinition(
                name.to_string(),
                span.position,
                original.position,
                span.file,
            ));
        }

        let id = self.env.add_symbol(SymbolInfo {
            name: name.clone(),
            qualified_name,
            kind,
            span,
            scope: self.current_scope,
            declaring_module,
            reference,
        });
        self.env.scope_mut(self.current_scope)?.bind(name, kind, id);
        if transitive {
            self.env.transitive_imports.insert(id);
        }

        Ok(id)
    }

    /// Declares an imported symbol in the global scope, merging with an
    /// existing identical declaration.
    ///
    /// Returns `Ok(None)` when the symbol was already present (a merge); an
    /// explicit redeclaration of a transitive symbol demotes it.
    #[allow(clippy::too_many_arguments)]
    pub fn declare_imported(
        &mut self,
        name: Cow<'base, str>,
        qualified_name: Cow<'base, str>,
        kind: SymbolKind,
        span: SpanInfo,
        declaring_module: SymbolId,
        transitive: bool,
        reference: Option<SymbolReference>,
    ) -> Result<Option<SymbolId>, CompileError> {
        let global = self.env.global_scope;
        let scope = self.env.scope(global)?;

        if let Some(existing) = scope.binding(&name, kind) {
            let existing_info = self.env.symbol(existing);
            if existing_info.qualified_name != qualified_name {
                let original = existing_info.span.clone();
                return Err(CompileError::redefinition(
                    qualified_name.to_string(),
                    span.position,
                    original.position,
                    span.file,
                ));
            }

            if !transitive {
                self.env.transitive_imports.shift_remove(&existing);
            }
            return Ok(None);
        }

        let id = self.env.add_symbol(SymbolInfo {
            name: name.clone(),
            qualified_name,
            kind,
            span,
            scope: global,
            declaring_module,
            reference,
        });
        self.env.scope_mut(global)?.bind(name, kind, id);
        if transitive {
            self.env.transitive_imports.insert(id);
        }

        Ok(Some(id))
    }

    /// Builds the canonical qualified name for a declaration in the current
    /// scope.
    fn qualify(&self, name: &str) -> Cow<'base, str> {
        let canonical = self.env.canonical_scope_name(self.current_scope);
        if canonical.is_empty() {
            Cow::Owned(name.to_string())
        } else {
            Cow::Owned(format!("{canonical}::{name}"))
        }
    }

    fn push_scope(
        &mut self,
        name: Option<Cow<'base, str>>,
        span: SpanInfo,
    ) -> Result<ScopeId, CompileError> {
        let name = match name {
            Some(name) => name,
            None => Cow::Owned(self.env.generate_scope_name()),
        };
        let scope = Scope::new(self.current_scope, name, span);
        self.current_scope = self.env.create_scope(scope);
        Ok(self.current_scope)
    }

    fn pop_scope(&mut self) -> Result<(), CompileError> {
        let scope = self.env.scope(self.current_scope)?;
        if scope.parent == ScopeId::UNDEFINED && self.current_scope != self.env.global_scope {
            return Err(CompileError::internal("collect", "Invalid scope after pop."));
        }
        self.current_scope = scope.parent;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::SourceFile, nom_tools::State, parser};

    fn collect_source(source: &'static str) -> Result<SemaEnv<'static>, CompileError> {
        let state: &'static State = Box::leak(Box::new(State::new(SourceFile::new(
            vec!["test".into()],
            source.to_string(),
        ))));
        let file = parser::parse(state).expect("source parses");

        let mut env = SemaEnv::new();
        let span = SpanInfo::new(0..0, state.file.clone());
        let mut collector = Collector::new(&mut env, span)?;
        collector.collect_items(&file.items)?;
        Ok(env)
    }

    #[test]
    fn function_and_locals_are_declared() {
        let env = collect_source("fn main() -> void { let x = 1; }").unwrap();

        let main = env
            .lookup("main", SymbolKind::Function, env.global_scope)
            .expect("main is declared");
        assert_eq!(env.symbol(main).qualified_name, "main");

        let x = env
            .symbols
            .iter()
            .find(|info| info.name == "x")
            .expect("local x is declared");
        assert_eq!(x.kind, SymbolKind::Variable);
        assert_eq!(x.qualified_name, "main::scope#0::x");
    }

    #[test]
    fn redefinition_is_reported_with_both_locations() {
        let error = collect_source("fn f() -> void {} fn f() -> void {}").unwrap_err();
        match error {
            CompileError::Redefinition(inner) => {
                assert_eq!(inner.name, "f");
                assert!(inner.previous_position.start < inner.position.start);
            }
            other => panic!("expected redefinition, got {other:?}"),
        }
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let env = collect_source("struct S { i: i32 }\nfn S() -> void {}").unwrap();
        assert!(env.lookup("S", SymbolKind::Type, env.global_scope).is_some());
        assert!(env.lookup("S", SymbolKind::Function, env.global_scope).is_some());
    }

    #[test]
    fn import_declares_module_symbol() {
        let env = collect_source("import std;").unwrap();
        let symbol = env
            .lookup("std", SymbolKind::ModuleImport, env.global_scope)
            .expect("import declared");
        assert_eq!(env.symbol(symbol).qualified_name, "std");
    }

    #[test]
    fn native_directive_records_attribute() {
        let env =
            collect_source("#[native(lib=\"host\")]\nfn print(s: str) -> void;").unwrap();
        let symbol = env
            .lookup("print", SymbolKind::Function, env.global_scope)
            .expect("prototype declared");
        let attribute = env
            .attribute(symbol, super::super::attribute::AttributeKind::Native)
            .expect("native attribute recorded");
        assert_eq!(attribute.arg_value("lib"), Some("host"));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let error = collect_source("#[frobnicate]\nfn f() -> void {}").unwrap_err();
        assert!(matches!(error, CompileError::UnknownDirective(_)));
    }
}
