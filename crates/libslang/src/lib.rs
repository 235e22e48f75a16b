//! slang compiler library.
//!
//! `slang` is a statically-typed scripting language compiled ahead-of-time
//! to a stack-based bytecode module (`.cmod`) executed by a host virtual
//! machine. This crate is the compiler front-to-middle-end: parsing,
//! semantic analysis, type checking, constant evaluation, macro expansion,
//! code generation and module emission.
//!
//! # Pipeline
//!
//! One compilation unit runs through a strict phase order; each phase
//! consumes the state the previous one wrote:
//!
//! 1. **Parse** ([`parser`]): source text to AST.
//! 2. **Collect** ([`sema::collect`]): scopes, symbols, attributes.
//! 3. **Resolve imports** ([`loader`]): dependency headers become
//!    synthetic symbols.
//! 4. **Resolve names** ([`sema::resolve`]): identifiers bind to symbols.
//! 5. **Types** ([`typing`]): declare, define, check; every expression
//!    gets a type id.
//! 6. **Constants** ([`consteval`]): bind `const` declarations, fold
//!    eligible expressions.
//! 7. **Expand macros** ([`macros`]): pattern-directed rewriting to a
//!    fixed point, feeding back into phases 3–6.
//! 8. **Generate** ([`codegen`]): typed stack IR in basic blocks.
//! 9. **Emit** ([`emitter`]): bytecode, tables, the module image.
//!
//! # Usage
//!
//! ```ignore
//! use libslang::{compile, file::SourceFile, loader::MemoryResolver, nom_tools::State};
//!
//! let source = SourceFile::new(vec!["main".into()], "fn main() -> void {}".to_string());
//! let state = State::new(source);
//! let resolver = MemoryResolver::new();
//! let module = compile(&state, &resolver)?;
//! std::fs::write("main.cmod", module.to_bytes())?;
//! ```
//!
//! # Errors
//!
//! Every phase surfaces its first diagnostic as a [`error::CompileError`]
//! and aborts; the compiler never guesses past an error.

pub mod archive;
pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod consteval;
pub mod emitter;
pub mod error;
pub mod file;
pub mod loader;
pub mod macros;
pub mod map;
pub mod module;
pub mod nom_tools;
pub mod opcodes;
pub mod parser;
pub mod sema;
pub mod typing;

#[cfg(test)]
mod tests;

use ast::{ExpressionAst, FileAst};
use codegen::CodegenContext;
use consteval::ConstEnv;
use error::CompileError;
use loader::{LoaderContext, ModuleResolver};
use macros::MacroEnv;
use module::LanguageModule;
use nom_tools::{SpanInfo, State};
use sema::{collect::Collector, SemaEnv};
use typing::TypeContext;

/// Macro expansion rounds before the compiler gives up; recursive macros
/// never converge.
const MAX_EXPANSION_ROUNDS: usize = 64;

/// Parses slang source code into an AST.
pub fn process_code(state: &State) -> Result<FileAst<'_>, CompileError> {
    parser::parse(state)
}

/// Everything the middle-end produced for one compilation unit. Exposed so
/// tests and tools can inspect IR and environments before emission.
#[derive(Debug)]
pub struct Compilation<'base> {
    pub items: Vec<ExpressionAst<'base>>,
    pub env: SemaEnv<'base>,
    pub types: TypeContext<'base>,
    pub consts: ConstEnv,
    pub macro_env: MacroEnv<'base>,
    pub codegen: CodegenContext<'base>,
}

/// Runs the pipeline up to and including code generation.
pub fn compile_to_context<'base>(
    state: &'base State,
    resolver: &dyn ModuleResolver,
) -> Result<Compilation<'base>, CompileError> {
    let file = parser::parse(state)?;
    let mut items = file.items;

    // Collection: scopes, symbols, attributes.
    let mut env = SemaEnv::new();
    let file_span = SpanInfo::new(0..0, state.file.clone());
    let mut collector = Collector::new(&mut env, file_span)?;
    collector.collect_items(&items)?;

    // Import resolution.
    let mut loader = LoaderContext::new(resolver, state.file.module_name());
    loader.resolve_imports(&mut env)?;

    // Name resolution.
    sema::resolve::resolve_names(&mut env, &items)?;

    // Types: declare, define, function prototypes.
    let mut types = TypeContext::new();
    typing::declare_types(&mut env, &mut types, &items)?;
    typing::define_types(&mut env, &mut types, &items)?;
    typing::declare_functions(&mut env, &mut types, &items)?;

    // Constants, type checking, folding.
    let mut consts = ConstEnv::new();
    consteval::bind_constants(&mut env, &types, &mut consts, &loader, &items)?;
    typing::check::type_check(&mut env, &mut types, &items)?;
    consteval::evaluate_constants(&mut env, &mut consts, &items)?;

    // Macro expansion to a fixed point. Expansion may introduce imports, so
    // it feeds back into import resolution and the phases after it.
    let mut macro_env = MacroEnv::new();
    macros::collect_macros(&env, &mut macro_env, &items)?;
    if macros::resolve_macro_imports(&mut env, &macro_env)? {
        loader.resolve_imports(&mut env)?;
        typing::declare_types(&mut env, &mut types, &items)?;
        typing::define_types(&mut env, &mut types, &items)?;
        typing::declare_functions(&mut env, &mut types, &items)?;
        consteval::bind_constants(&mut env, &types, &mut consts, &loader, &items)?;
    }

    let mut rounds = 0;
    loop {
        let (changed, grafted) =
            macros::expand_macros(&mut env, &types, &mut macro_env, &mut items)?;
        if !changed {
            break;
        }

        rounds += 1;
        if rounds > MAX_EXPANSION_ROUNDS {
            return Err(CompileError::internal(
                "macros",
                "Macro expansion did not reach a fixed point.",
            ));
        }

        if macros::declare_grafted_imports(&mut env, &grafted)? {
            loader.resolve_imports(&mut env)?;
        }
        typing::declare_types(&mut env, &mut types, &items)?;
        typing::define_types(&mut env, &mut types, &items)?;
        typing::declare_functions(&mut env, &mut types, &items)?;
        sema::resolve::resolve_names(&mut env, &items)?;
        consteval::bind_constants(&mut env, &types, &mut consts, &loader, &items)?;
        typing::check::type_check(&mut env, &mut types, &items)?;
        consteval::evaluate_constants(&mut env, &mut consts, &items)?;
    }

    // Code generation.
    let codegen = codegen::generate::generate_code(&env, &types, &consts, &items)?;

    Ok(Compilation {
        items,
        env,
        types,
        consts,
        macro_env,
        codegen,
    })
}

/// Compiles one unit into a loadable module image.
pub fn compile<'base>(
    state: &'base State,
    resolver: &dyn ModuleResolver,
) -> Result<LanguageModule, CompileError> {
    let compilation = compile_to_context(state, resolver)?;
    emitter::emit_module(
        &compilation.env,
        &compilation.types,
        &compilation.consts,
        &compilation.macro_env,
        &compilation.codegen,
    )
}
