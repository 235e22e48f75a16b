//! Module loading and import resolution.
//!
//! For every `module_import` symbol the resolver loads the dependency's
//! module header and materializes each export as a synthetic symbol
//! `module::name` in the importing environment's global scope. Packages a
//! dependency itself imports become transitive module-import symbols and are
//! resolved recursively; an explicit `import` of the same module later
//! demotes them. The whole pass is idempotent on unchanged input, because
//! macro expansion may introduce new imports and re-run it.

use indexmap::IndexMap;
use log::debug;

use crate::{
    consteval::ConstInfo,
    error::CompileError,
    module::{ConstantType, ExportDescriptor, ModuleHeader, ModuleSymbolKind},
    nom_tools::SpanInfo,
    sema::{
        collect::Collector,
        symbol::{SymbolId, SymbolKind, SymbolReference},
        SemaEnv,
    },
};

/// Materializes a dependency module's header from its import name.
///
/// The compiler core never touches the filesystem; the CLI implements this
/// over its `-I` search path, tests implement it over in-memory modules.
pub trait ModuleResolver {
    /// Resolves an import name (`a::b`) to the module's header, or `None`
    /// if no such module exists.
    fn resolve(&self, import_name: &str) -> Result<Option<ModuleHeader>, CompileError>;
}

/// A resolver over a fixed set of in-memory headers. Used by tests and by
/// compilations without dependencies.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    modules: IndexMap<String, ModuleHeader>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module header under an import name.
    pub fn insert(&mut self, name: impl Into<String>, header: ModuleHeader) {
        self.modules.insert(name.into(), header);
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, import_name: &str) -> Result<Option<ModuleHeader>, CompileError> {
        Ok(self.modules.get(import_name).cloned())
    }
}

/// Import resolution state, kept across re-runs within one compilation.
pub struct LoaderContext<'resolver> {
    resolver: &'resolver dyn ModuleResolver,
    /// The module currently being compiled; importing it is a cycle.
    current_module: String,
    /// Loaded dependency headers, by import name.
    pub headers: IndexMap<String, ModuleHeader>,
    /// Decoded values of imported constants, per symbol.
    pub imported_constants: IndexMap<SymbolId, ConstInfo>,
}

impl<'resolver> LoaderContext<'resolver> {
    pub fn new(resolver: &'resolver dyn ModuleResolver, current_module: String) -> Self {
        Self {
            resolver,
            current_module,
            headers: IndexMap::new(),
            imported_constants: IndexMap::new(),
        }
    }

    /// Loads a dependency header, caching it by import name.
    fn load(
        &mut self,
        import_name: &str,
        span: &SpanInfo,
    ) -> Result<&ModuleHeader, CompileError> {
        if import_name == self.current_module {
            return Err(CompileError::import_cycle(import_name.to_string(), span));
        }

        if !self.headers.contains_key(import_name) {
            let header = self
                .resolver
                .resolve(import_name)?
                .ok_or_else(|| CompileError::import_not_found(import_name.to_string(), span))?;
            debug!(
                "loaded module '{import_name}': {} export(s), {} import(s)",
                header.exports.len(),
                header.imports.len()
            );
            self.headers.insert(import_name.to_string(), header);
        }

        Ok(&self.headers[import_name])
    }

    /// Resolves all module imports in the environment.
    ///
    /// Runs to a fixed point: loading a dependency may introduce transitive
    /// module-import symbols that need loading themselves.
    pub fn resolve_imports<'base>(
        &mut self,
        env: &mut SemaEnv<'base>,
    ) -> Result<(), CompileError> {
        let mut cursor = 0;
        loop {
            // Snapshot the module imports that appeared since the last round.
            let pending: Vec<SymbolId> = env
                .symbols
                .iter()
                .enumerate()
                .skip(cursor)
                .filter(|(_, info)| info.kind == SymbolKind::ModuleImport)
                .map(|(index, _)| SymbolId(index))
                .collect();
            cursor = env.symbols.len();

            if pending.is_empty() {
                return Ok(());
            }

            for import_symbol in pending {
                self.resolve_one(env, import_symbol)?;
            }
        }
    }

    fn resolve_one<'base>(
        &mut self,
        env: &mut SemaEnv<'base>,
        import_symbol: SymbolId,
    ) -> Result<(), CompileError> {
        let (module_name, span) = {
            let info = env.symbol(import_symbol);
            (info.qualified_name.to_string(), info.span.clone())
        };
        let transitive = env.transitive_imports.contains(&import_symbol);

        let header = self.load(&module_name, &span)?.clone();

        let global_scope = env.global_scope;
        let mut collector = Collector::at_scope(env, global_scope);
        for entry in &header.exports {
            let kind = match entry.kind {
                ModuleSymbolKind::Function => SymbolKind::Function,
                ModuleSymbolKind::Type => SymbolKind::Type,
                ModuleSymbolKind::Constant => SymbolKind::Constant,
                ModuleSymbolKind::Macro => SymbolKind::Macro,
                ModuleSymbolKind::Package => {
                    return Err(CompileError::serialization(
                        "Package entry in export table.",
                    ))
                }
            };

            let qualified = format!("{module_name}::{}", entry.name);
            let declared = collector.declare_imported(
                entry.name.clone().into(),
                qualified.into(),
                kind,
                span.clone(),
                import_symbol,
                transitive,
                Some(SymbolReference::Export(entry.clone())),
            )?;

            // Imported constants carry their value in the dependency's
            // constant pool; decode it now so constant binding can use it.
            if let (Some(symbol), ExportDescriptor::Constant(pool_index)) = (declared, &entry.desc)
            {
                let value = decode_pool_entry(&header, *pool_index)?;
                self.imported_constants.insert(symbol, value);
            }
        }

        // The dependency's own package imports become transitive imports of
        // this compilation.
        for package in header.imported_packages() {
            if package == self.current_module {
                return Err(CompileError::import_cycle(package.to_string(), &span));
            }
            let global_scope = env.global_scope;
            let mut collector = Collector::at_scope(env, global_scope);
            collector.declare_imported(
                package.to_string().into(),
                package.to_string().into(),
                SymbolKind::ModuleImport,
                span.clone(),
                import_symbol,
                true,
                None,
            )?;
        }

        Ok(())
    }
}

fn decode_pool_entry(header: &ModuleHeader, index: usize) -> Result<ConstInfo, CompileError> {
    let entry = header.constants.get(index).ok_or_else(|| {
        CompileError::serialization(format!("Constant pool index {index} out of range."))
    })?;

    match entry.ty {
        ConstantType::I32 => {
            let bytes: [u8; 4] = entry.payload.as_slice().try_into().map_err(|_| {
                CompileError::serialization("Malformed i32 constant pool entry.")
            })?;
            Ok(ConstInfo::int(i32::from_le_bytes(bytes)))
        }
        ConstantType::F32 => {
            let bytes: [u8; 4] = entry.payload.as_slice().try_into().map_err(|_| {
                CompileError::serialization("Malformed f32 constant pool entry.")
            })?;
            Ok(ConstInfo::float(f32::from_le_bytes(bytes)))
        }
        ConstantType::Str => {
            let text = String::from_utf8(entry.payload.clone()).map_err(|_| {
                CompileError::serialization("Malformed string constant pool entry.")
            })?;
            Ok(ConstInfo::str(text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::SourceFile,
        module::{
            ConstantEntry, ExportedSymbol, FunctionDescriptor, FunctionDetails, FunctionSignature,
            ImportEntry, VariableType,
        },
        nom_tools::State,
        parser,
    };

    fn std_header() -> ModuleHeader {
        ModuleHeader {
            imports: Vec::new(),
            exports: vec![
                ExportedSymbol {
                    kind: ModuleSymbolKind::Function,
                    name: "print".to_string(),
                    desc: ExportDescriptor::Function(FunctionDescriptor {
                        signature: FunctionSignature {
                            return_type: VariableType::plain("void"),
                            arg_types: vec![VariableType::plain("str")],
                        },
                        details: FunctionDetails::Native {
                            library: "host".to_string(),
                        },
                    }),
                },
                ExportedSymbol {
                    kind: ModuleSymbolKind::Constant,
                    name: "ANSWER".to_string(),
                    desc: ExportDescriptor::Constant(0),
                },
            ],
            constants: vec![ConstantEntry::i32(42)],
        }
    }

    fn env_with_import(source: &'static str) -> (SemaEnv<'static>, MemoryResolver) {
        let state: &'static State = Box::leak(Box::new(State::new(SourceFile::new(
            vec!["main".into()],
            source.to_string(),
        ))));
        let file = parser::parse(state).expect("source parses");

        let mut env = SemaEnv::new();
        let span = SpanInfo::new(0..0, state.file.clone());
        let mut collector = Collector::new(&mut env, span).unwrap();
        collector.collect_items(&file.items).unwrap();

        let mut resolver = MemoryResolver::new();
        resolver.insert("std", std_header());
        (env, resolver)
    }

    #[test]
    fn exports_become_qualified_symbols() {
        let (mut env, resolver) = env_with_import("import std;");
        let mut loader = LoaderContext::new(&resolver, "main".to_string());
        loader.resolve_imports(&mut env).unwrap();

        let print = env
            .lookup("std::print", SymbolKind::Function, env.global_scope)
            .expect("std::print declared");
        assert!(!env.symbol(print).is_local());

        // Plain-name binding works through the scope chain too.
        assert!(env
            .lookup("print", SymbolKind::Function, env.global_scope)
            .is_some());
    }

    #[test]
    fn missing_import_is_reported_at_the_import_statement() {
        let (mut env, resolver) = env_with_import("import missing;");
        let mut loader = LoaderContext::new(&resolver, "main".to_string());
        let error = loader.resolve_imports(&mut env).unwrap_err();
        match error {
            CompileError::ImportNotFound(inner) => assert_eq!(inner.module, "missing"),
            other => panic!("expected import-not-found, got {other:?}"),
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let (mut env, resolver) = env_with_import("import std;");
        let mut loader = LoaderContext::new(&resolver, "main".to_string());
        loader.resolve_imports(&mut env).unwrap();
        let symbols_after_first = env.symbols.len();

        loader.resolve_imports(&mut env).unwrap();
        assert_eq!(env.symbols.len(), symbols_after_first);
    }

    #[test]
    fn dependency_imports_become_transitive() {
        let mut dep = std_header();
        dep.imports.push(ImportEntry {
            kind: ModuleSymbolKind::Package,
            name: "math".to_string(),
            package_index: -1,
        });

        let mut resolver = MemoryResolver::new();
        resolver.insert("std", dep);
        resolver.insert(
            "math",
            ModuleHeader {
                imports: Vec::new(),
                exports: Vec::new(),
                constants: Vec::new(),
            },
        );

        let (mut env, _) = env_with_import("import std;");
        let mut loader = LoaderContext::new(&resolver, "main".to_string());
        loader.resolve_imports(&mut env).unwrap();

        let math = env
            .lookup("math", SymbolKind::ModuleImport, env.global_scope)
            .expect("transitive module import declared");
        assert!(env.transitive_imports.contains(&math));
    }

    #[test]
    fn imported_constants_are_decoded() {
        let (mut env, resolver) = env_with_import("import std;");
        let mut loader = LoaderContext::new(&resolver, "main".to_string());
        loader.resolve_imports(&mut env).unwrap();

        let answer = env
            .lookup("std::ANSWER", SymbolKind::Constant, env.global_scope)
            .expect("constant declared");
        assert_eq!(
            loader.imported_constants.get(&answer),
            Some(&ConstInfo::int(42))
        );
    }
}
