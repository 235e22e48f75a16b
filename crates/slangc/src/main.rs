//! slang compiler executable.
//!
//! Compiles one slang source file into a loadable module image:
//!
//! ```text
//! slangc compile <source.sl> [-I <dir>]... [-o <output.cmod>]
//! ```
//!
//! `-I` adds a module search directory consulted when resolving imports;
//! the directory containing the source file is always searched. The output
//! defaults to the source path with the `.cmod` extension. On any
//! compile-time error the first diagnostic is rendered to standard error
//! with its source location and the process exits non-zero.

use std::{path::PathBuf, process::exit};

use libslang::{
    compile,
    error::CompileError,
    file::SourceFile,
    loader::ModuleResolver,
    module::{LanguageModule, ModuleHeader, LANG_EXT, MODULE_EXT},
    nom_tools::State,
};
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode};

/// Resolves import names against the module search path.
struct SearchPathResolver {
    directories: Vec<PathBuf>,
}

impl ModuleResolver for SearchPathResolver {
    fn resolve(&self, import_name: &str) -> Result<Option<ModuleHeader>, CompileError> {
        let mut relative = PathBuf::new();
        for part in import_name.split("::") {
            relative.push(part);
        }
        relative.set_extension(MODULE_EXT);

        for directory in &self.directories {
            let candidate = directory.join(&relative);
            if !candidate.is_file() {
                continue;
            }
            let bytes = std::fs::read(&candidate).map_err(|error| {
                CompileError::serialization(format!(
                    "Cannot read module '{}': {error}",
                    candidate.display()
                ))
            })?;
            return LanguageModule::read_header(&bytes).map(Some);
        }

        Ok(None)
    }
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} compile <source.{LANG_EXT}> [-I <dir>]... [-o <output>]");
    exit(1);
}

fn main() {
    let config = ConfigBuilder::new()
        .set_location_level(LevelFilter::Error)
        .build();
    CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Warn,
        config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .unwrap();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("slangc");

    if args.len() < 3 || args[1] != "compile" {
        usage(program);
    }

    let source_path = PathBuf::from(&args[2]);
    let mut search_directories = Vec::new();
    let mut output_path: Option<PathBuf> = None;

    let mut index = 3;
    while index < args.len() {
        match args[index].as_str() {
            "-I" => {
                let Some(directory) = args.get(index + 1) else {
                    usage(program);
                };
                search_directories.push(PathBuf::from(directory));
                index += 2;
            }
            "-o" => {
                let Some(output) = args.get(index + 1) else {
                    usage(program);
                };
                output_path = Some(PathBuf::from(output));
                index += 2;
            }
            _ => usage(program),
        }
    }

    // The source's own directory is always searched.
    if let Some(parent) = source_path.parent() {
        search_directories.push(parent.to_path_buf());
    }

    let code = match std::fs::read_to_string(&source_path) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error reading {}: {error}", source_path.display());
            exit(1);
        }
    };

    let module_name = source_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "main".to_string());

    let state = State::new(SourceFile::new(vec![module_name], code));
    let resolver = SearchPathResolver {
        directories: search_directories,
    };

    let module = match compile(&state, &resolver) {
        Ok(module) => module,
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            exit(1);
        }
    };

    let output_path = output_path.unwrap_or_else(|| {
        let mut path = source_path.clone();
        path.set_extension(MODULE_EXT);
        path
    });

    if let Err(error) = std::fs::write(&output_path, module.to_bytes()) {
        eprintln!("Error writing {}: {error}", output_path.display());
        exit(1);
    }
}
