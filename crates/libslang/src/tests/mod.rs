//! Source-level test suites: whole-pipeline compilation, macro expansion
//! and module emission.

mod compile;
mod emitter;
mod macros;

use crate::{
    error::CompileError,
    file::SourceFile,
    loader::{MemoryResolver, ModuleResolver},
    module::{
        ExportDescriptor, ExportedSymbol, FunctionDescriptor, FunctionDetails, FunctionSignature,
        ModuleHeader, ModuleSymbolKind, VariableType,
    },
    nom_tools::State,
    Compilation,
};

/// Leaks a parser state so the borrowed AST can escape the helper.
pub fn state_of(source: &str) -> &'static State {
    Box::leak(Box::new(State::new(SourceFile::new(
        vec!["main".into()],
        source.to_string(),
    ))))
}

/// Compiles a source string with no imports available.
pub fn compile_source(source: &str) -> Result<Compilation<'static>, CompileError> {
    let resolver = MemoryResolver::new();
    crate::compile_to_context(state_of(source), &resolver)
}

/// Compiles a source string against a resolver.
pub fn compile_with(
    source: &str,
    resolver: &dyn ModuleResolver,
) -> Result<Compilation<'static>, CompileError> {
    crate::compile_to_context(state_of(source), resolver)
}

fn native_fn(name: &str, return_type: &str, args: &[&str]) -> ExportedSymbol {
    ExportedSymbol {
        kind: ModuleSymbolKind::Function,
        name: name.to_string(),
        desc: ExportDescriptor::Function(FunctionDescriptor {
            signature: FunctionSignature {
                return_type: VariableType::plain(return_type),
                arg_types: args.iter().map(|arg| VariableType::plain(*arg)).collect(),
            },
            details: FunctionDetails::Native {
                library: "host".to_string(),
            },
        }),
    }
}

/// A `std` module header with the string and printing natives the
/// `format!` expansion relies on.
pub fn std_header() -> ModuleHeader {
    ModuleHeader {
        imports: Vec::new(),
        exports: vec![
            native_fn("print", "void", &["str"]),
            native_fn("string_concat", "str", &["str", "str"]),
            native_fn("i32_to_string", "str", &["i32"]),
            native_fn("f32_to_string", "str", &["f32"]),
        ],
        constants: Vec::new(),
    }
}

/// A resolver exposing the `std` module.
pub fn std_resolver() -> MemoryResolver {
    let mut resolver = MemoryResolver::new();
    resolver.insert("std", std_header());
    resolver
}
