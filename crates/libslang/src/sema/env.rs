//! The shared semantic environment.

use indexmap::{IndexMap, IndexSet};
use log::trace;

use crate::{ast::AstIndex, nom_tools::SpanInfo, typing::TypeId};

use super::{
    attribute::{AttributeInfo, AttributeKind},
    scope::{Scope, ScopeId},
    symbol::{SymbolId, SymbolInfo, SymbolKind},
};

/// Type-checking context of the function currently being walked.
#[derive(Debug, Clone)]
pub struct FunctionContext {
    pub name: String,
    pub return_type: TypeId,
}

/// Result of a multi-kind scope lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    None,
    One(SymbolId),
    /// More than one candidate kind is bound at the nearest matching scope.
    Ambiguous,
}

/// The state shared by every phase after parsing: scope tree, symbol table,
/// attributes, transitive-import tracking, and the per-node fact tables.
#[derive(Debug)]
pub struct SemaEnv<'base> {
    /// The global scope. Set by the collection context.
    pub global_scope: ScopeId,
    /// Scope table; ids are indices, allocated monotonically.
    pub scopes: Vec<Scope<'base>>,
    /// Symbol table; ids are indices, allocated monotonically.
    pub symbols: Vec<SymbolInfo<'base>>,
    /// Symbols visible only because a dependency imported them.
    pub transitive_imports: IndexSet<SymbolId>,
    /// Attributes recorded from directives, per declared symbol.
    pub attributes: IndexMap<SymbolId, Vec<AttributeInfo>>,
    /// Types bound to symbols (variables, constants, struct types).
    pub symbol_types: IndexMap<SymbolId, TypeId>,
    /// Owning scope of every AST node, recorded by collection.
    pub node_scopes: IndexMap<AstIndex, ScopeId>,
    /// Symbol binding of identifier-bearing nodes, recorded by resolution.
    pub node_symbols: IndexMap<AstIndex, SymbolId>,
    /// Inferred type of every checked node, recorded by the type checker.
    pub node_types: IndexMap<AstIndex, TypeId>,
    /// Counter for `scope#N` anonymous scope names.
    pub anonymous_scope_counter: usize,
    /// Context of the function currently being checked or generated.
    pub current_function: Option<FunctionContext>,
}

impl Default for SemaEnv<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'base> SemaEnv<'base> {
    /// Creates an empty environment with an undefined global scope.
    pub fn new() -> Self {
        Self {
            global_scope: ScopeId::UNDEFINED,
            scopes: Vec::new(),
            symbols: Vec::new(),
            transitive_imports: IndexSet::new(),
            attributes: IndexMap::new(),
            symbol_types: IndexMap::new(),
            node_scopes: IndexMap::new(),
            node_symbols: IndexMap::new(),
            node_types: IndexMap::new(),
            anonymous_scope_counter: 0,
            current_function: None,
        }
    }

    /// Creates a scope and returns its id.
    pub fn create_scope(&mut self, scope: Scope<'base>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(scope);
        id
    }

    /// Returns the scope for an id.
    pub fn scope(&self, id: ScopeId) -> Result<&Scope<'base>, crate::error::CompileError> {
        self.scopes
            .get(id.0)
            .ok_or_else(|| crate::error::CompileError::internal("sema", format!("Unknown scope id {}.", id.0)))
    }

    /// Returns the scope for an id, mutably.
    pub fn scope_mut(&mut self, id: ScopeId) -> Result<&mut Scope<'base>, crate::error::CompileError> {
        self.scopes
            .get_mut(id.0)
            .ok_or_else(|| crate::error::CompileError::internal("sema", format!("Unknown scope id {}.", id.0)))
    }

    /// Adds a symbol to the table and returns its id.
    pub fn add_symbol(&mut self, info: SymbolInfo<'base>) -> SymbolId {
        let id = SymbolId(self.symbols.len());
        self.symbols.push(info);
        id
    }

    /// Returns the symbol info for an id.
    pub fn symbol(&self, id: SymbolId) -> &SymbolInfo<'base> {
        &self.symbols[id.0]
    }

    /// Looks up a symbol id by name, kind and starting scope.
    ///
    /// Qualified names (containing `::`) search the symbol table directly;
    /// plain names walk up the scope chain and return the first binding.
    pub fn lookup(&self, name: &str, kind: SymbolKind, scope_id: ScopeId) -> Option<SymbolId> {
        trace!("lookup: name={name}, kind={kind}, scope={}", scope_id.0);

        if name.contains("::") {
            return self
                .symbols
                .iter()
                .position(|info| info.kind == kind && info.qualified_name == name)
                .map(SymbolId);
        }

        let mut current = scope_id;
        while current != ScopeId::UNDEFINED {
            let scope = self.scopes.get(current.0)?;
            if let Some(symbol) = scope.binding(name, kind) {
                return Some(symbol);
            }
            current = scope.parent;
        }

        None
    }

    /// Looks up a name against several candidate kinds, walking the scope
    /// chain. If the nearest scope that binds the name binds it for more
    /// than one of the kinds, the lookup is ambiguous.
    pub fn lookup_one_of(&self, name: &str, kinds: &[SymbolKind], scope_id: ScopeId) -> Lookup {
        if name.contains("::") {
            let mut matches = self
                .symbols
                .iter()
                .enumerate()
                .filter(|(_, info)| kinds.contains(&info.kind) && info.qualified_name == name);
            return match (matches.next(), matches.next()) {
                (None, _) => Lookup::None,
                (Some((index, _)), None) => Lookup::One(SymbolId(index)),
                (Some(_), Some(_)) => Lookup::Ambiguous,
            };
        }

        let mut current = scope_id;
        while current != ScopeId::UNDEFINED {
            let Some(scope) = self.scopes.get(current.0) else {
                return Lookup::None;
            };
            if let Some(bindings) = scope.bindings.get(name) {
                let mut found = bindings
                    .iter()
                    .filter(|(kind, _)| kinds.contains(kind))
                    .map(|(_, id)| *id);
                match (found.next(), found.next()) {
                    (None, _) => {}
                    (Some(symbol), None) => return Lookup::One(symbol),
                    (Some(_), Some(_)) => return Lookup::Ambiguous,
                }
            }
            current = scope.parent;
        }

        Lookup::None
    }

    /// Builds the canonical (`::`-joined) name of a scope.
    pub fn canonical_scope_name(&self, id: ScopeId) -> String {
        let mut parts = Vec::new();
        let mut current = id;
        while current != ScopeId::UNDEFINED {
            let Some(scope) = self.scopes.get(current.0) else {
                break;
            };
            if !scope.name.is_empty() {
                parts.push(scope.name.to_string());
            }
            current = scope.parent;
        }
        parts.reverse();
        parts.join("::")
    }

    /// Generates a name for an anonymous scope.
    pub fn generate_scope_name(&mut self) -> String {
        let name = format!("scope#{}", self.anonymous_scope_counter);
        self.anonymous_scope_counter += 1;
        name
    }

    /// Attaches an attribute to a symbol.
    pub fn attach_attribute(&mut self, id: SymbolId, attribute: AttributeInfo) {
        self.attributes.entry(id).or_default().push(attribute);
    }

    /// Whether a symbol carries an attribute of the given kind.
    pub fn has_attribute(&self, id: SymbolId, kind: AttributeKind) -> bool {
        self.attributes
            .get(&id)
            .is_some_and(|attributes| attributes.iter().any(|a| a.kind == kind))
    }

    /// Returns an attribute of the given kind attached to a symbol.
    pub fn attribute(&self, id: SymbolId, kind: AttributeKind) -> Option<&AttributeInfo> {
        self.attributes
            .get(&id)?
            .iter()
            .find(|attribute| attribute.kind == kind)
    }

    /// Qualified names of symbols whose names end with `suffix`, used for
    /// unresolved-name suggestions.
    pub fn similar_names(&self, suffix: &str) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|info| info.name.ends_with(suffix) && info.name.as_ref() != suffix)
            .map(|info| info.qualified_name.to_string())
            .collect()
    }

    /// Definition span of a symbol.
    pub fn symbol_span(&self, id: SymbolId) -> SpanInfo {
        self.symbols[id.0].span.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::SourceFile;
    use std::borrow::Cow;

    fn span() -> SpanInfo {
        SpanInfo::new(0..1, SourceFile::new(vec!["t".into()], "x".into()))
    }

    fn env_with_chain() -> SemaEnv<'static> {
        let mut env = SemaEnv::new();
        let global = env.create_scope(Scope::new(ScopeId::UNDEFINED, "".into(), span()));
        env.global_scope = global;
        let inner = env.create_scope(Scope::new(global, Cow::Borrowed("f"), span()));

        let id = env.add_symbol(SymbolInfo {
            name: "x".into(),
            qualified_name: "x".into(),
            kind: SymbolKind::Variable,
            span: span(),
            scope: global,
            declaring_module: SymbolId::UNDEFINED,
            reference: None,
        });
        env.scopes[global.0].bind("x".into(), SymbolKind::Variable, id);

        let _ = inner;
        env
    }

    #[test]
    fn lookup_walks_the_scope_chain() {
        let env = env_with_chain();
        let inner = ScopeId(1);
        assert!(env.lookup("x", SymbolKind::Variable, inner).is_some());
        assert!(env.lookup("x", SymbolKind::Function, inner).is_none());
        assert!(env.lookup("y", SymbolKind::Variable, inner).is_none());
    }

    #[test]
    fn qualified_lookup_searches_the_symbol_table() {
        let mut env = env_with_chain();
        let id = env.add_symbol(SymbolInfo {
            name: "print".into(),
            qualified_name: "std::print".into(),
            kind: SymbolKind::Function,
            span: span(),
            scope: env.global_scope,
            declaring_module: SymbolId(0),
            reference: None,
        });

        assert_eq!(
            env.lookup("std::print", SymbolKind::Function, ScopeId(1)),
            Some(id)
        );
        assert_eq!(env.lookup("std::print", SymbolKind::Type, ScopeId(1)), None);
    }

    #[test]
    fn multi_kind_lookup_detects_ambiguity() {
        let mut env = env_with_chain();
        let id = env.add_symbol(SymbolInfo {
            name: "x".into(),
            qualified_name: "x#f".into(),
            kind: SymbolKind::Function,
            span: span(),
            scope: env.global_scope,
            declaring_module: SymbolId::UNDEFINED,
            reference: None,
        });
        env.scopes[0].bind("x".into(), SymbolKind::Function, id);

        let result = env.lookup_one_of(
            "x",
            &[SymbolKind::Variable, SymbolKind::Function],
            ScopeId(1),
        );
        assert_eq!(result, Lookup::Ambiguous);
    }

    #[test]
    fn canonical_scope_name_skips_the_global_scope() {
        let env = env_with_chain();
        assert_eq!(env.canonical_scope_name(ScopeId(1)), "f");
        assert_eq!(env.canonical_scope_name(ScopeId(0)), "");
    }
}
