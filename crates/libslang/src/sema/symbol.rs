//! Symbols and symbol identities.

use std::borrow::Cow;

use strum_macros::Display;

use crate::{ast::AstIndex, module::ExportedSymbol, nom_tools::SpanInfo};

use super::scope::ScopeId;

/// A unique identifier for a symbol: its index in the symbol table.
///
/// Ids are allocated monotonically and never reused within a compilation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub usize);

impl SymbolId {
    /// Invalid/unset symbol id. Also stands for "the current module" in
    /// [`SymbolInfo::declaring_module`].
    pub const UNDEFINED: Self = SymbolId(usize::MAX);
}

impl From<usize> for SymbolId {
    fn from(value: usize) -> Self {
        SymbolId(value)
    }
}

/// The kinds of symbols the compiler tracks.
///
/// A scope may bind the same textual name once per kind, so e.g. a struct
/// and a variable can share a name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SymbolKind {
    ModuleImport,
    Constant,
    Variable,
    Function,
    Macro,
    Type,
    MacroArgument,
}

/// Declaration backing of a symbol: the AST node that declared it, or the
/// export table entry it was imported from.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolReference {
    Node(AstIndex),
    Export(ExportedSymbol),
}

/// Everything the compiler knows about one symbol.
#[derive(Debug, Clone)]
pub struct SymbolInfo<'base> {
    /// Local (unqualified) name.
    pub name: Cow<'base, str>,
    /// Fully qualified name; unique across the symbol table.
    pub qualified_name: Cow<'base, str>,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Definition location, or the location of the import statement for
    /// imported symbols.
    pub span: SpanInfo,
    /// Scope the symbol is bound in.
    pub scope: ScopeId,
    /// The module-import symbol that declared this symbol, or
    /// [`SymbolId::UNDEFINED`] for symbols of the compiled module itself.
    pub declaring_module: SymbolId,
    /// Declaration backing, if any.
    pub reference: Option<SymbolReference>,
}

impl SymbolInfo<'_> {
    /// Whether the symbol belongs to the module being compiled.
    pub fn is_local(&self) -> bool {
        self.declaring_module == SymbolId::UNDEFINED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_marks_current_module() {
        let info = SymbolInfo {
            name: "x".into(),
            qualified_name: "x".into(),
            kind: SymbolKind::Variable,
            span: SpanInfo::new(0..1, crate::file::SourceFile::new(vec!["t".into()], "x".into())),
            scope: ScopeId(0),
            declaring_module: SymbolId::UNDEFINED,
            reference: None,
        };
        assert!(info.is_local());
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(SymbolKind::ModuleImport.to_string(), "module_import");
        assert_eq!(SymbolKind::MacroArgument.to_string(), "macro_argument");
    }
}
