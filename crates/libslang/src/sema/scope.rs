//! Scopes and the scope tree.
//!
//! Scopes form a tree through parent back-edges; exactly one scope (the
//! global scope) has [`ScopeId::UNDEFINED`] as its parent. A scope owns at
//! most one binding per `(name, symbol kind)` pair.

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::nom_tools::SpanInfo;

use super::symbol::{SymbolId, SymbolKind};

/// A unique identifier for a scope: its index in the scope table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

impl ScopeId {
    /// Invalid/unset scope id; the parent of the global scope.
    pub const UNDEFINED: Self = ScopeId(usize::MAX);
}

impl From<usize> for ScopeId {
    fn from(value: usize) -> Self {
        ScopeId(value)
    }
}

/// A named region binding `(name, kind)` pairs to symbols.
#[derive(Debug, Clone)]
pub struct Scope<'base> {
    /// Parent scope, [`ScopeId::UNDEFINED`] for the global scope.
    pub parent: ScopeId,
    /// Scope name; anonymous scopes get generated `scope#N` names.
    pub name: Cow<'base, str>,
    /// Source location the scope was opened at.
    pub span: SpanInfo,
    /// Symbol bindings.
    pub bindings: IndexMap<Cow<'base, str>, IndexMap<SymbolKind, SymbolId>>,
}

impl<'base> Scope<'base> {
    /// Creates an empty scope.
    pub fn new(parent: ScopeId, name: Cow<'base, str>, span: SpanInfo) -> Self {
        Self {
            parent,
            name,
            span,
            bindings: IndexMap::new(),
        }
    }

    /// Looks up a binding in this scope only.
    pub fn binding(&self, name: &str, kind: SymbolKind) -> Option<SymbolId> {
        self.bindings.get(name)?.get(&kind).copied()
    }

    /// Inserts a binding. The caller has already checked for duplicates.
    pub fn bind(&mut self, name: Cow<'base, str>, kind: SymbolKind, symbol: SymbolId) {
        self.bindings.entry(name).or_default().insert(kind, symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::SourceFile;

    fn scope() -> Scope<'static> {
        Scope::new(
            ScopeId::UNDEFINED,
            "".into(),
            SpanInfo::new(0..0, SourceFile::new(vec!["t".into()], String::new())),
        )
    }

    #[test]
    fn same_name_binds_once_per_kind() {
        let mut scope = scope();
        scope.bind("point".into(), SymbolKind::Type, SymbolId(0));
        scope.bind("point".into(), SymbolKind::Variable, SymbolId(1));

        assert_eq!(scope.binding("point", SymbolKind::Type), Some(SymbolId(0)));
        assert_eq!(scope.binding("point", SymbolKind::Variable), Some(SymbolId(1)));
        assert_eq!(scope.binding("point", SymbolKind::Function), None);
    }
}
