//! Abstract syntax tree for the slang language.
//!
//! The tree is a closed tagged sum: every node is an [`ExpressionAst`] whose
//! [`ExpressionKind`] is one of a fixed set of kinds registered in
//! [`NodeKind`]. Each node carries a stable [`AstIndex`] handed out by the
//! parser state; later phases record per-node facts (owning scope, resolved
//! symbol, inferred type, const value) in tables keyed by that index instead
//! of mutating the tree. Only macro expansion rewrites the tree, and it does
//! so by replacing whole subtrees with freshly indexed clones.
//!
//! Nodes support deep cloning with re-indexing ([`ExpressionAst::deep_clone`])
//! and a kind-tag-first serialization protocol (see [`serialize`]) used to
//! round-trip macro definition bodies through module files.

mod display;
pub mod serialize;
mod visit;

use std::borrow::Cow;

use strum_macros::{Display, EnumDiscriminants, FromRepr};

use crate::nom_tools::Span;

/// Stable identity of an AST node within one compilation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AstIndex(pub usize);

/// Token kind tags, as produced by the lexer layer of the parser.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum TokenKind {
    Identifier,
    MacroIdentifier,
    IntLiteral,
    FloatLiteral,
    StrLiteral,
    Keyword,
    Punctuation,
}

/// Decoded literal payload carried inline on literal tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i32),
    Float(f32),
    Str(String),
}

/// A lexical token: text span, kind tag and, for literals, the decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'base> {
    /// Source span of the token.
    pub span: Span<'base>,
    /// Token kind tag.
    pub kind: TokenKind,
    /// Decoded value for literal tokens.
    pub value: Option<LiteralValue>,
}

impl<'base> Token<'base> {
    /// Creates an identifier token from a span.
    pub fn identifier(span: Span<'base>) -> Self {
        Self {
            span,
            kind: TokenKind::Identifier,
            value: None,
        }
    }

    /// The token text.
    pub fn text(&self) -> &str {
        self.span.text.as_ref()
    }

    /// Replaces the token text with an owned string (macro α-renaming).
    pub fn rename(&mut self, name: String) {
        self.span.text = Cow::Owned(name);
    }
}

/// Node kind registry. The tag bytes are the serialization format; they are
/// stable and must not be reordered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum NodeKind {
    Literal = 1,
    VariableRef = 2,
    Null = 3,
    Block = 4,
    Function = 5,
    Prototype = 6,
    StructDefinition = 7,
    NamedInitializer = 8,
    AnonymousInitializer = 9,
    ArrayInitializer = 10,
    VariableDeclaration = 11,
    ConstantDeclaration = 12,
    Import = 13,
    Directive = 14,
    Unary = 15,
    Binary = 16,
    Postfix = 17,
    TypeCast = 18,
    New = 19,
    Access = 20,
    NamespaceAccess = 21,
    Subscript = 22,
    Call = 23,
    MacroInvocation = 24,
    Return = 25,
    If = 26,
    While = 27,
    Break = 28,
    Continue = 29,
    MacroDefinition = 30,
    MacroBranch = 31,
    MacroExpressionList = 32,
}

/// Binary operators, including assignment and compound assignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[repr(u8)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add = 0,
    #[strum(serialize = "-")]
    Sub = 1,
    #[strum(serialize = "*")]
    Mul = 2,
    #[strum(serialize = "/")]
    Div = 3,
    #[strum(serialize = "%")]
    Mod = 4,
    #[strum(serialize = "<<")]
    Shl = 5,
    #[strum(serialize = ">>")]
    Shr = 6,
    #[strum(serialize = "&")]
    BitAnd = 7,
    #[strum(serialize = "|")]
    BitOr = 8,
    #[strum(serialize = "^")]
    BitXor = 9,
    #[strum(serialize = "&&")]
    LogicalAnd = 10,
    #[strum(serialize = "||")]
    LogicalOr = 11,
    #[strum(serialize = "<")]
    Less = 12,
    #[strum(serialize = "<=")]
    LessEqual = 13,
    #[strum(serialize = ">")]
    Greater = 14,
    #[strum(serialize = ">=")]
    GreaterEqual = 15,
    #[strum(serialize = "==")]
    Equal = 16,
    #[strum(serialize = "!=")]
    NotEqual = 17,
    #[strum(serialize = "=")]
    Assign = 18,
    #[strum(serialize = "+=")]
    AddAssign = 19,
    #[strum(serialize = "-=")]
    SubAssign = 20,
    #[strum(serialize = "*=")]
    MulAssign = 21,
    #[strum(serialize = "/=")]
    DivAssign = 22,
    #[strum(serialize = "%=")]
    ModAssign = 23,
    #[strum(serialize = "&=")]
    AndAssign = 24,
    #[strum(serialize = "|=")]
    OrAssign = 25,
    #[strum(serialize = "^=")]
    XorAssign = 26,
    #[strum(serialize = "<<=")]
    ShlAssign = 27,
    #[strum(serialize = ">>=")]
    ShrAssign = 28,
}

impl BinaryOperator {
    /// Whether this is `=` or a compound assignment.
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            BinaryOperator::Assign
                | BinaryOperator::AddAssign
                | BinaryOperator::SubAssign
                | BinaryOperator::MulAssign
                | BinaryOperator::DivAssign
                | BinaryOperator::ModAssign
                | BinaryOperator::AndAssign
                | BinaryOperator::OrAssign
                | BinaryOperator::XorAssign
                | BinaryOperator::ShlAssign
                | BinaryOperator::ShrAssign
        )
    }

    /// For compound assignments, the underlying compute operator.
    pub fn compound_operator(self) -> Option<BinaryOperator> {
        match self {
            BinaryOperator::AddAssign => Some(BinaryOperator::Add),
            BinaryOperator::SubAssign => Some(BinaryOperator::Sub),
            BinaryOperator::MulAssign => Some(BinaryOperator::Mul),
            BinaryOperator::DivAssign => Some(BinaryOperator::Div),
            BinaryOperator::ModAssign => Some(BinaryOperator::Mod),
            BinaryOperator::AndAssign => Some(BinaryOperator::BitAnd),
            BinaryOperator::OrAssign => Some(BinaryOperator::BitOr),
            BinaryOperator::XorAssign => Some(BinaryOperator::BitXor),
            BinaryOperator::ShlAssign => Some(BinaryOperator::Shl),
            BinaryOperator::ShrAssign => Some(BinaryOperator::Shr),
            _ => None,
        }
    }

    /// Whether this is a comparison operator.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Less
                | BinaryOperator::LessEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEqual
                | BinaryOperator::Equal
                | BinaryOperator::NotEqual
        )
    }
}

/// Unary prefix operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[repr(u8)]
pub enum UnaryOperator {
    #[strum(serialize = "+")]
    Plus = 0,
    #[strum(serialize = "-")]
    Minus = 1,
    #[strum(serialize = "!")]
    Not = 2,
    #[strum(serialize = "~")]
    BitNot = 3,
    #[strum(serialize = "++")]
    Increment = 4,
    #[strum(serialize = "--")]
    Decrement = 5,
}

/// Postfix operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[repr(u8)]
pub enum PostfixOperator {
    #[strum(serialize = "++")]
    Increment = 0,
    #[strum(serialize = "--")]
    Decrement = 1,
}

/// A type expression: optionally namespace-qualified name plus array marker.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAst<'base> {
    /// Span of the whole type expression.
    pub span: Span<'base>,
    /// Unqualified type name.
    pub name: Token<'base>,
    /// Namespace path, outermost first.
    pub namespaces: Vec<Token<'base>>,
    /// Whether this is an array of the named type.
    pub array: bool,
}

impl TypeAst<'_> {
    /// The qualified type name with its namespace path prepended.
    pub fn qualified_name(&self) -> String {
        if self.namespaces.is_empty() {
            return self.name.text().to_string();
        }

        let mut out = String::new();
        for ns in &self.namespaces {
            out.push_str(ns.text());
            out.push_str("::");
        }
        out.push_str(self.name.text());
        out
    }
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAst<'base> {
    pub name: Token<'base>,
    pub ty: TypeAst<'base>,
}

/// A struct field declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct StructFieldAst<'base> {
    pub name: Token<'base>,
    pub ty: TypeAst<'base>,
}

/// A typed macro branch argument pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroArgAst<'base> {
    /// Argument name, spelled `$name` at the definition site.
    pub name: Token<'base>,
    /// Pattern type name (currently `expr`).
    pub ty: Token<'base>,
}

/// One AST node: identity, location, and kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionAst<'base> {
    /// Stable node identity.
    pub index: AstIndex,
    /// Source location of the node.
    pub span: Span<'base>,
    /// Kind-specific payload.
    pub kind: ExpressionKind<'base>,
}

/// Kind-specific node payloads.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
pub enum ExpressionKind<'base> {
    /// String, integer or floating-point literal.
    Literal(Token<'base>),
    /// A reference to a variable, constant, function or macro argument.
    VariableRef(Token<'base>),
    /// The `null` literal.
    Null,
    /// A `{ ... }` block opening a scope.
    Block(Vec<ExpressionAst<'base>>),
    /// A function definition with a body.
    Function(FunctionAst<'base>),
    /// A bodyless function declaration (native functions).
    Prototype(PrototypeAst<'base>),
    /// A struct definition.
    StructDefinition(StructDefinitionAst<'base>),
    /// `S { field: value, ... }`
    NamedInitializer(NamedInitializerAst<'base>),
    /// `S { value, ... }`
    AnonymousInitializer(AnonymousInitializerAst<'base>),
    /// `[ value, ... ]`
    ArrayInitializer(Vec<ExpressionAst<'base>>),
    /// `let name: type = value;`
    VariableDeclaration(VariableDeclarationAst<'base>),
    /// `const NAME: type = value;`
    ConstantDeclaration(ConstantDeclarationAst<'base>),
    /// `import a::b;`
    Import(ImportAst<'base>),
    /// `#[name(args)]` attached to the wrapped node.
    Directive(DirectiveAst<'base>),
    /// Unary prefix operator application.
    Unary(UnaryAst<'base>),
    /// Binary operator application, including assignments.
    Binary(BinaryAst<'base>),
    /// Postfix operator application.
    Postfix(PostfixAst<'base>),
    /// `expr as type`
    TypeCast(TypeCastAst<'base>),
    /// `new type[length]`
    New(NewAst<'base>),
    /// `expr.member`
    Access(AccessAst<'base>),
    /// `ns::inner`
    NamespaceAccess(NamespaceAccessAst<'base>),
    /// `expr[index]`
    Subscript(SubscriptAst<'base>),
    /// `name(args)`
    Call(CallAst<'base>),
    /// `name!(args)`
    MacroInvocation(MacroInvocationAst<'base>),
    /// `return expr?;`
    Return(Option<Box<ExpressionAst<'base>>>),
    /// `if cond { ... } else { ... }`
    If(IfAst<'base>),
    /// `while cond { ... }`
    While(WhileAst<'base>),
    /// `break;`
    Break,
    /// `continue;`
    Continue,
    /// `macro name! { branches }`
    MacroDefinition(MacroDefinitionAst<'base>),
    /// One arity-and-pattern alternative of a macro definition.
    MacroBranch(MacroBranchAst<'base>),
    /// Transient node holding a captured macro argument list.
    MacroExpressionList(Vec<ExpressionAst<'base>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAst<'base> {
    pub name: Token<'base>,
    pub parameters: Vec<ParameterAst<'base>>,
    pub return_type: TypeAst<'base>,
    pub body: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeAst<'base> {
    pub name: Token<'base>,
    pub parameters: Vec<ParameterAst<'base>>,
    pub return_type: TypeAst<'base>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDefinitionAst<'base> {
    pub name: Token<'base>,
    pub fields: Vec<StructFieldAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedInitializerAst<'base> {
    pub ty: TypeAst<'base>,
    pub fields: Vec<(Token<'base>, ExpressionAst<'base>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnonymousInitializerAst<'base> {
    pub ty: TypeAst<'base>,
    pub values: Vec<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarationAst<'base> {
    pub name: Token<'base>,
    pub ty: Option<TypeAst<'base>>,
    pub value: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDeclarationAst<'base> {
    pub name: Token<'base>,
    pub ty: TypeAst<'base>,
    pub value: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportAst<'base> {
    /// Import path components, e.g. `["collections", "list"]`.
    pub path: Vec<Token<'base>>,
}

impl ImportAst<'_> {
    /// The dotted import path joined with `::`.
    pub fn qualified_name(&self) -> String {
        self.path
            .iter()
            .map(|t| t.text())
            .collect::<Vec<_>>()
            .join("::")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveAst<'base> {
    pub name: Token<'base>,
    /// `key` or `key=value` arguments.
    pub args: Vec<(Token<'base>, Option<Token<'base>>)>,
    pub inner: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryAst<'base> {
    pub op: UnaryOperator,
    pub operand: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryAst<'base> {
    pub op: BinaryOperator,
    pub lhs: Box<ExpressionAst<'base>>,
    pub rhs: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostfixAst<'base> {
    pub op: PostfixOperator,
    pub operand: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeCastAst<'base> {
    pub expr: Box<ExpressionAst<'base>>,
    pub target: TypeAst<'base>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAst<'base> {
    pub ty: TypeAst<'base>,
    pub length: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessAst<'base> {
    pub object: Box<ExpressionAst<'base>>,
    pub member: Token<'base>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceAccessAst<'base> {
    pub namespace: Token<'base>,
    pub inner: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptAst<'base> {
    pub object: Box<ExpressionAst<'base>>,
    pub subscript: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallAst<'base> {
    pub name: Token<'base>,
    pub args: Vec<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroInvocationAst<'base> {
    pub name: Token<'base>,
    pub args: Vec<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfAst<'base> {
    pub condition: Box<ExpressionAst<'base>>,
    pub then_block: Box<ExpressionAst<'base>>,
    pub else_block: Option<Box<ExpressionAst<'base>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileAst<'base> {
    pub condition: Box<ExpressionAst<'base>>,
    pub body: Box<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinitionAst<'base> {
    pub name: Token<'base>,
    pub branches: Vec<ExpressionAst<'base>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroBranchAst<'base> {
    pub args: Vec<MacroArgAst<'base>>,
    /// Whether the last argument is a zero-or-more list capture.
    pub ends_with_list: bool,
    pub body: Box<ExpressionAst<'base>>,
}

/// A parsed compilation unit: the file plus its top-level items.
#[derive(Debug, Clone)]
pub struct FileAst<'base> {
    pub file: crate::file::SourceFile,
    pub items: Vec<ExpressionAst<'base>>,
}

impl<'base> ExpressionAst<'base> {
    /// Creates a node, drawing a fresh index from the span's state.
    pub fn new(span: Span<'base>, kind: ExpressionKind<'base>) -> Self {
        let index = AstIndex(span.state.next_index());
        Self { index, span, kind }
    }

    /// The node's kind tag.
    pub fn node_kind(&self) -> NodeKind {
        match &self.kind {
            ExpressionKind::Literal(_) => NodeKind::Literal,
            ExpressionKind::VariableRef(_) => NodeKind::VariableRef,
            ExpressionKind::Null => NodeKind::Null,
            ExpressionKind::Block(_) => NodeKind::Block,
            ExpressionKind::Function(_) => NodeKind::Function,
            ExpressionKind::Prototype(_) => NodeKind::Prototype,
            ExpressionKind::StructDefinition(_) => NodeKind::StructDefinition,
            ExpressionKind::NamedInitializer(_) => NodeKind::NamedInitializer,
            ExpressionKind::AnonymousInitializer(_) => NodeKind::AnonymousInitializer,
            ExpressionKind::ArrayInitializer(_) => NodeKind::ArrayInitializer,
            ExpressionKind::VariableDeclaration(_) => NodeKind::VariableDeclaration,
            ExpressionKind::ConstantDeclaration(_) => NodeKind::ConstantDeclaration,
            ExpressionKind::Import(_) => NodeKind::Import,
            ExpressionKind::Directive(_) => NodeKind::Directive,
            ExpressionKind::Unary(_) => NodeKind::Unary,
            ExpressionKind::Binary(_) => NodeKind::Binary,
            ExpressionKind::Postfix(_) => NodeKind::Postfix,
            ExpressionKind::TypeCast(_) => NodeKind::TypeCast,
            ExpressionKind::New(_) => NodeKind::New,
            ExpressionKind::Access(_) => NodeKind::Access,
            ExpressionKind::NamespaceAccess(_) => NodeKind::NamespaceAccess,
            ExpressionKind::Subscript(_) => NodeKind::Subscript,
            ExpressionKind::Call(_) => NodeKind::Call,
            ExpressionKind::MacroInvocation(_) => NodeKind::MacroInvocation,
            ExpressionKind::Return(_) => NodeKind::Return,
            ExpressionKind::If(_) => NodeKind::If,
            ExpressionKind::While(_) => NodeKind::While,
            ExpressionKind::Break => NodeKind::Break,
            ExpressionKind::Continue => NodeKind::Continue,
            ExpressionKind::MacroDefinition(_) => NodeKind::MacroDefinition,
            ExpressionKind::MacroBranch(_) => NodeKind::MacroBranch,
            ExpressionKind::MacroExpressionList(_) => NodeKind::MacroExpressionList,
        }
    }

    /// Deep clone with fresh node indices.
    ///
    /// Used by macro expansion: cloned subtrees must not alias the per-node
    /// tables of the originals.
    pub fn deep_clone(&self) -> ExpressionAst<'base> {
        let mut cloned = self.clone();
        let state = self.span.state.clone();
        cloned.visit_nodes_mut(
            &mut |node| {
                node.index = AstIndex(state.next_index());
            },
            true,
            false,
            None,
        );
        cloned
    }

    /// Whether the node denotes a storage location (assignable).
    pub fn is_storage_location(&self) -> bool {
        matches!(
            self.kind,
            ExpressionKind::VariableRef(_)
                | ExpressionKind::Access(_)
                | ExpressionKind::Subscript(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file::SourceFile, nom_tools::State};

    fn node(state: &State, kind: ExpressionKind<'static>) -> ExpressionAst<'static> {
        ExpressionAst::new(Span::new("x", 0..1, state.clone()), kind)
    }

    #[test]
    fn new_nodes_get_distinct_indices() {
        let state = State::new(SourceFile::new(vec!["test".into()], "x".to_string()));
        let a = node(&state, ExpressionKind::Null);
        let b = node(&state, ExpressionKind::Break);
        assert_ne!(a.index, b.index);
    }

    #[test]
    fn deep_clone_reindexes_every_node() {
        let state = State::new(SourceFile::new(vec!["test".into()], "x".to_string()));
        let inner = node(&state, ExpressionKind::Null);
        let outer = ExpressionAst::new(
            Span::new("-x", 0..2, state.clone()),
            ExpressionKind::Unary(UnaryAst {
                op: UnaryOperator::Minus,
                operand: Box::new(inner),
            }),
        );

        let cloned = outer.deep_clone();
        assert_ne!(cloned.index, outer.index);
        let original_child = outer.children()[0].index;
        let cloned_child = cloned.children()[0].index;
        assert_ne!(original_child, cloned_child);
    }

    #[test]
    fn node_kind_matches_payload() {
        let state = State::new(SourceFile::new(vec!["test".into()], "x".to_string()));
        assert_eq!(node(&state, ExpressionKind::Null).node_kind(), NodeKind::Null);
        assert_eq!(node(&state, ExpressionKind::Break).node_kind(), NodeKind::Break);
    }
}
