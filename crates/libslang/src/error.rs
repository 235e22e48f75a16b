//! Compiler diagnostics.
//!
//! Every phase reports the first problem it finds as a [`CompileError`] and
//! aborts; the compiler never guesses past an error. Each error kind is its
//! own struct carrying labeled source spans, so the CLI can render rich
//! reports through miette. Internal invariant failures surface as
//! [`InternalError`] citing the faulting component instead of panicking.

use miette::{Diagnostic, NamedSource};
use nom_language::error::VerboseErrorKind;
use std::ops::Range;

use crate::{
    ast::FileAst,
    file::SourceFile,
    nom_tools::{SpanInfo, State, ToRange},
};

/// Source attachment used by all diagnostics.
pub type ErrorSource = NamedSource<String>;

/// One or more syntax errors from the parser.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("{} syntax error(s) detected", .errors.len())]
pub struct SyntaxError {
    #[related]
    pub errors: Vec<SyntaxErrorItem>,
}

/// A single labeled syntax error.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Syntax error")]
#[diagnostic(code("slang::error::syntax"))]
pub struct SyntaxErrorItem {
    #[label("{message}")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,

    pub message: &'static str,
}

/// A name was defined twice with the same symbol kind in one scope.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Redeclaration of '{name}'")]
#[diagnostic(
    code("slang::error::redefinition"),
    help("change one of the names or remove the definition")
)]
pub struct Redefinition {
    pub name: String,

    #[label("defined again here")]
    pub position: Range<usize>,

    #[label("already defined here")]
    pub previous_position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// An identifier could not be bound to any symbol.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Unresolved name '{name}'")]
#[diagnostic(code("slang::error::unresolved_name"))]
pub struct UnresolvedName {
    pub name: String,

    #[label("not found in this scope or any enclosing scope")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,

    #[help]
    pub advice: String,
}

/// A lookup matched symbols of more than one kind and the context cannot
/// disambiguate.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Ambiguous name '{name}'")]
#[diagnostic(
    code("slang::error::ambiguous_name"),
    help("qualify the name or rename one of the symbols")
)]
pub struct AmbiguousName {
    pub name: String,

    #[label("more than one symbol with this name is in scope")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// Operand or assignment types do not match.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Type mismatch: expected '{expected}', found '{found}'")]
#[diagnostic(code("slang::error::type_mismatch"))]
pub struct TypeMismatch {
    pub expected: String,
    pub found: String,

    #[label("the types do not match here")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A cast rejected by the compile-time cast matrix.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Invalid cast from '{from}' to '{to}'")]
#[diagnostic(code("slang::error::invalid_cast"))]
pub struct InvalidCast {
    pub from: String,
    pub to: String,

    #[label("this cast is not allowed")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A call with the wrong number of arguments.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("'{name}' expects {expected} argument(s), got {found}")]
#[diagnostic(code("slang::error::wrong_arity"))]
pub struct WrongArity {
    pub name: String,
    pub expected: usize,
    pub found: usize,

    #[label("wrong number of arguments")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A directive the compiler does not recognize, or one applied to a
/// declaration that does not support it.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Unknown directive '{name}'")]
#[diagnostic(code("slang::error::unknown_directive"))]
pub struct UnknownDirective {
    pub name: String,

    #[label("this directive is not recognized here")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// Two macro branches scored equally for an invocation.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Ambiguous invocation of macro '{name}'")]
#[diagnostic(
    code("slang::error::macro_ambiguity"),
    help("make the branch arities distinct")
)]
pub struct MacroAmbiguity {
    pub name: String,

    #[label("this branch matches")]
    pub first_position: Range<usize>,

    #[label("and this branch matches too")]
    pub second_position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// No macro branch matched the invocation arity.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("No branch of macro '{name}' matches this invocation")]
#[diagnostic(code("slang::error::macro_no_match"))]
pub struct MacroNoMatch {
    pub name: String,

    #[label("no branch accepts this argument list")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// Integer division or modulo by zero while folding constants.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Division by zero in constant expression")]
#[diagnostic(code("slang::error::divide_by_zero"))]
pub struct DivideByZero {
    #[label("evaluates to a division by zero at compile time")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// An invalid `format!` string.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Invalid format string: {message}")]
#[diagnostic(code("slang::error::invalid_format_string"))]
pub struct InvalidFormatString {
    pub message: String,

    #[label("in this format string")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A non-void function whose last block does not return.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Missing return in function '{function}'")]
#[diagnostic(
    code("slang::error::missing_return"),
    help("every path through a non-void function must end in a return")
)]
pub struct MissingReturn {
    pub function: String,

    #[label("function body may end without returning a value")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// `break` or `continue` outside of a loop.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("'{statement}' outside of a loop")]
#[diagnostic(code("slang::error::outside_loop"))]
pub struct OutsideLoop {
    pub statement: &'static str,

    #[label("not inside a loop")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// An import that could not be resolved to a module.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Unresolved name '{module}'")]
#[diagnostic(
    code("slang::error::import_not_found"),
    help("check the module name and the module search path")
)]
pub struct ImportNotFound {
    pub module: String,

    #[label("no module found with this name")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A cyclic import chain.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Import cycle through module '{module}'")]
#[diagnostic(code("slang::error::import_cycle"))]
pub struct ImportCycle {
    pub module: String,

    #[label("this import closes a cycle")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A `const` initializer that is not a compile-time constant.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Constant expression required")]
#[diagnostic(code("slang::error::not_constant"))]
pub struct NotConstant {
    #[label("this expression cannot be evaluated at compile time")]
    pub position: Range<usize>,

    #[source_code]
    pub code: ErrorSource,
}

/// A malformed archive or module file.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Serialization error: {message}")]
#[diagnostic(code("slang::error::serialization"))]
pub struct SerializationError {
    pub message: String,
}

/// An internal invariant failed. Always a compiler bug, never user error.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
#[error("Internal error in {component}: {message}")]
#[diagnostic(code("slang::error::internal"))]
pub struct InternalError {
    pub component: &'static str,
    pub message: String,
}

/// The compiler's single error type: one variant per diagnostic kind.
#[derive(Clone, Debug, thiserror::Error, Diagnostic)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] Box<SyntaxError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Redefinition(#[from] Box<Redefinition>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnresolvedName(#[from] Box<UnresolvedName>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    AmbiguousName(#[from] Box<AmbiguousName>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TypeMismatch(#[from] Box<TypeMismatch>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidCast(#[from] Box<InvalidCast>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    WrongArity(#[from] Box<WrongArity>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownDirective(#[from] Box<UnknownDirective>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    MacroAmbiguity(#[from] Box<MacroAmbiguity>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    MacroNoMatch(#[from] Box<MacroNoMatch>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    DivideByZero(#[from] Box<DivideByZero>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidFormatString(#[from] Box<InvalidFormatString>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    MissingReturn(#[from] Box<MissingReturn>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    OutsideLoop(#[from] Box<OutsideLoop>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ImportNotFound(#[from] Box<ImportNotFound>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ImportCycle(#[from] Box<ImportCycle>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NotConstant(#[from] Box<NotConstant>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialization(#[from] Box<SerializationError>),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Internal(#[from] Box<InternalError>),
}

impl CompileError {
    pub fn redefinition(
        name: String,
        position: Range<usize>,
        previous_position: Range<usize>,
        source: SourceFile,
    ) -> Self {
        Box::new(Redefinition {
            name,
            position,
            previous_position,
            code: source.into(),
        })
        .into()
    }

    /// Builds an unresolved-name error, suggesting symbols whose names end
    /// with the missing one.
    pub fn unresolved_name(
        name: String,
        span: &SpanInfo,
        similar: impl IntoIterator<Item = String>,
    ) -> Self {
        let similar: Vec<String> = similar.into_iter().collect();
        let advice = if similar.is_empty() {
            "check the spelling, or import the module that defines it".to_string()
        } else {
            let list = similar
                .iter()
                .map(|item| format!(" - {item}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("the following names are similar:\n{list}")
        };

        Box::new(UnresolvedName {
            name,
            position: span.position.clone(),
            code: (&span.file).into(),
            advice,
        })
        .into()
    }

    pub fn ambiguous_name(name: String, span: &SpanInfo) -> Self {
        Box::new(AmbiguousName {
            name,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn type_mismatch(expected: String, found: String, span: &SpanInfo) -> Self {
        Box::new(TypeMismatch {
            expected,
            found,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn invalid_cast(from: String, to: String, span: &SpanInfo) -> Self {
        Box::new(InvalidCast {
            from,
            to,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn wrong_arity(name: String, expected: usize, found: usize, span: &SpanInfo) -> Self {
        Box::new(WrongArity {
            name,
            expected,
            found,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn unknown_directive(name: String, span: &SpanInfo) -> Self {
        Box::new(UnknownDirective {
            name,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn divide_by_zero(span: &SpanInfo) -> Self {
        Box::new(DivideByZero {
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn invalid_format_string(message: String, span: &SpanInfo) -> Self {
        Box::new(InvalidFormatString {
            message,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn missing_return(function: String, span: &SpanInfo) -> Self {
        Box::new(MissingReturn {
            function,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn outside_loop(statement: &'static str, span: &SpanInfo) -> Self {
        Box::new(OutsideLoop {
            statement,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn import_not_found(module: String, span: &SpanInfo) -> Self {
        Box::new(ImportNotFound {
            module,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn import_cycle(module: String, span: &SpanInfo) -> Self {
        Box::new(ImportCycle {
            module,
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn not_constant(span: &SpanInfo) -> Self {
        Box::new(NotConstant {
            position: span.position.clone(),
            code: (&span.file).into(),
        })
        .into()
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Box::new(SerializationError {
            message: message.into(),
        })
        .into()
    }

    pub fn internal(component: &'static str, message: impl Into<String>) -> Self {
        Box::new(InternalError {
            component,
            message: message.into(),
        })
        .into()
    }
}

/// Error type for parsing operations using nom combinators.
pub type ParseError<'base> =
    nom_language::error::VerboseError<nom_locate::LocatedSpan<&'base str, State>>;

/// Result of a parser run: remaining input plus the parsed file.
pub type ParseResult<'base> =
    Result<(nom_locate::LocatedSpan<&'base str, State>, FileAst<'base>), ParseError<'base>>;

/// Converts a finished nom result into the compiler's error type.
pub fn handle_parser(result: ParseResult<'_>) -> Result<FileAst<'_>, CompileError> {
    match result {
        Ok((_, parsed)) => Ok(parsed),
        Err(error) => {
            let mut errors = Vec::new();
            error.errors.iter().for_each(|(span, error_kind)| {
                if let VerboseErrorKind::Context(error_message) = error_kind {
                    errors.push(SyntaxErrorItem {
                        position: span.to_range(),
                        code: (&span.extra.file).into(),
                        message: error_message,
                    });
                }
            });
            Err(Box::new(SyntaxError { errors }).into())
        }
    }
}
