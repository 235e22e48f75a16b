//! Semantic analysis: the shared environment plus the walks that populate it.
//!
//! The [`env::SemaEnv`] is the state every phase after parsing reads or
//! mutates: the scope tree, the symbol table, attributes, transitive-import
//! tracking, and all per-node fact tables. [`collect`] runs the first AST
//! walk (scope creation and symbol declaration), [`resolve`] the second
//! (identifier binding). Import materialization lives in [`crate::loader`]
//! because it needs module headers, not the AST.

pub mod attribute;
pub mod collect;
pub mod env;
pub mod resolve;
pub mod scope;
pub mod symbol;

pub use env::SemaEnv;
pub use scope::{Scope, ScopeId};
pub use symbol::{SymbolId, SymbolInfo, SymbolKind};
