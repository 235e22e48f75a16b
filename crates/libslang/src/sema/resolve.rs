//! Name resolution: the second full AST walk.
//!
//! Binds every identifier occurrence to a symbol id using the scope recorded
//! for the node during collection. Namespace-access nodes extend a prefix
//! stack so the inner name is looked up fully qualified. Macro definition
//! bodies are skipped; their names only become resolvable after expansion
//! grafts them into a concrete scope.

use log::trace;

use crate::{
    ast::{ExpressionAst, ExpressionKind},
    builtins,
    error::CompileError,
    nom_tools::SpanInfo,
};

use super::{
    env::{Lookup, SemaEnv},
    scope::ScopeId,
    symbol::SymbolKind,
};

/// Candidate kinds for a plain identifier in expression position.
static VALUE_KINDS: &[SymbolKind] = &[
    SymbolKind::Variable,
    SymbolKind::Constant,
    SymbolKind::Function,
];

/// Resolves all names in the top-level items of a compilation unit.
pub fn resolve_names<'base>(
    env: &mut SemaEnv<'base>,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    let mut resolver = NameResolver { env };
    let mut prefix = Vec::new();
    for item in items {
        resolver.resolve(item, &mut prefix)?;
    }
    Ok(())
}

struct NameResolver<'env, 'base> {
    env: &'env mut SemaEnv<'base>,
}

impl<'base> NameResolver<'_, 'base> {
    fn resolve(
        &mut self,
        node: &ExpressionAst<'base>,
        prefix: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        match &node.kind {
            // Macro bodies resolve at their expansion site.
            ExpressionKind::MacroDefinition(_) => Ok(()),
            ExpressionKind::NamespaceAccess(access) => {
                prefix.push(access.namespace.text().to_string());
                self.resolve(&access.inner, prefix)?;
                prefix.pop();

                if let Some(symbol) = self.env.node_symbols.get(&access.inner.index).copied() {
                    self.env.node_symbols.insert(node.index, symbol);
                }
                Ok(())
            }
            ExpressionKind::VariableRef(token) => {
                let name = self.prefixed(prefix, token.text());
                let scope = self.scope_of(node)?;

                match self.env.lookup_one_of(&name, VALUE_KINDS, scope) {
                    Lookup::One(symbol) => {
                        trace!("resolved '{name}' to symbol {}", symbol.0);
                        self.env.node_symbols.insert(node.index, symbol);
                        Ok(())
                    }
                    Lookup::Ambiguous => Err(CompileError::ambiguous_name(
                        name,
                        &(&token.span).into(),
                    )),
                    Lookup::None => Err(self.unresolved(&name, &(&token.span).into())),
                }
            }
            ExpressionKind::Call(call) => {
                let name = self.prefixed(prefix, call.name.text());
                let scope = self.scope_of(node)?;

                match self.env.lookup_one_of(&name, &[SymbolKind::Function], scope) {
                    Lookup::One(symbol) => {
                        self.env.node_symbols.insert(node.index, symbol);
                    }
                    Lookup::Ambiguous => {
                        return Err(CompileError::ambiguous_name(name, &(&call.name.span).into()))
                    }
                    Lookup::None => {
                        return Err(self.unresolved(&name, &(&call.name.span).into()))
                    }
                }

                let mut empty = Vec::new();
                for arg in &call.args {
                    self.resolve(arg, &mut empty)?;
                }
                Ok(())
            }
            ExpressionKind::MacroInvocation(invocation) => {
                if !builtins::is_builtin_macro(invocation.name.text()) {
                    let name = self.prefixed(prefix, invocation.name.text());
                    let scope = self.scope_of(node)?;

                    match self.env.lookup_one_of(&name, &[SymbolKind::Macro], scope) {
                        Lookup::One(symbol) => {
                            self.env.node_symbols.insert(node.index, symbol);
                        }
                        Lookup::Ambiguous => {
                            return Err(CompileError::ambiguous_name(
                                name,
                                &(&invocation.name.span).into(),
                            ))
                        }
                        Lookup::None => {
                            return Err(self.unresolved(&name, &(&invocation.name.span).into()))
                        }
                    }
                }

                let mut empty = Vec::new();
                for arg in &invocation.args {
                    self.resolve(arg, &mut empty)?;
                }
                Ok(())
            }
            _ => {
                let mut empty = Vec::new();
                for child in node.children() {
                    self.resolve(child, &mut empty)?;
                }
                Ok(())
            }
        }
    }

    fn scope_of(&self, node: &ExpressionAst<'base>) -> Result<ScopeId, CompileError> {
        self.env.node_scopes.get(&node.index).copied().ok_or_else(|| {
            CompileError::internal("resolve", "Node has no recorded scope; collection did not visit it.")
        })
    }

    fn prefixed(&self, prefix: &[String], name: &str) -> String {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}::{name}", prefix.join("::"))
        }
    }

    fn unresolved(&self, name: &str, span: &SpanInfo) -> CompileError {
        if name.starts_with('$') {
            return CompileError::unresolved_name(
                name.to_string(),
                span,
                ["macro arguments can only be used inside their own branch".to_string()],
            );
        }
        CompileError::unresolved_name(name.to_string(), span, self.env.similar_names(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::SourceFile,
        nom_tools::{SpanInfo, State},
        parser,
        sema::collect::Collector,
    };

    fn resolve_source(source: &'static str) -> Result<SemaEnv<'static>, CompileError> {
        let state: &'static State = Box::leak(Box::new(State::new(SourceFile::new(
            vec!["test".into()],
            source.to_string(),
        ))));
        let file = parser::parse(state).expect("source parses");

        let mut env = SemaEnv::new();
        let span = SpanInfo::new(0..0, state.file.clone());
        let mut collector = Collector::new(&mut env, span)?;
        collector.collect_items(&file.items)?;
        resolve_names(&mut env, &file.items)?;
        Ok(env)
    }

    #[test]
    fn local_references_bind() {
        let env = resolve_source("fn f() -> i32 { let x = 1; return x; }").unwrap();
        // Two bindings recorded: the declaration node and the reference.
        let x_bindings = env
            .node_symbols
            .values()
            .filter(|id| env.symbol(**id).name == "x")
            .count();
        assert_eq!(x_bindings, 2);
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let error = resolve_source("fn f() -> i32 { return y; }").unwrap_err();
        match error {
            CompileError::UnresolvedName(inner) => assert_eq!(inner.name, "y"),
            other => panic!("expected unresolved name, got {other:?}"),
        }
    }

    #[test]
    fn call_binds_to_function_symbol() {
        let env = resolve_source("fn g() -> void {}\nfn f() -> void { g(); }").unwrap();
        let g_bindings = env
            .node_symbols
            .values()
            .filter(|id| env.symbol(**id).name == "g")
            .count();
        assert_eq!(g_bindings, 2);
    }

    #[test]
    fn shadowing_prefers_the_nearest_scope() {
        let env = resolve_source(
            "fn f() -> void { let x = 1; { let x = 2; x = 3; } }",
        )
        .unwrap();
        let inner = env
            .symbols
            .iter()
            .filter(|info| info.name == "x")
            .map(|info| info.qualified_name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(inner.len(), 2);
        assert_ne!(inner[0], inner[1]);
    }

    #[test]
    fn stray_macro_argument_reference_is_an_error() {
        let error = resolve_source("fn f() -> void { $x = 1; }").unwrap_err();
        assert!(matches!(error, CompileError::UnresolvedName(_)));
    }
}
