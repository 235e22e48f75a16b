//! On-disk module image (`.cmod`) model.
//!
//! A module file is: 4-byte magic, format version byte, import table, export
//! table, constant pool, then the bytecode stream. All tables are
//! count-prefixed with variable-length integers (see [`crate::archive`]).
//! Dependency compilation only ever needs the header, so [`ModuleHeader`]
//! can be read without touching the bytecode.

use strum_macros::{Display, FromRepr};

use crate::{
    archive::{ReadArchive, WriteArchive},
    error::CompileError,
};

/// Module file magic bytes.
pub static MODULE_MAGIC: [u8; 4] = *b"slng";

/// Current module format version.
pub const MODULE_VERSION: u8 = 1;

/// File extension for compiled slang modules.
pub static MODULE_EXT: &str = "cmod";

/// File extension for slang source files.
pub static LANG_EXT: &str = "sl";

/// Symbol kinds appearing in import/export tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromRepr, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ModuleSymbolKind {
    Package = 0,
    Function = 1,
    Type = 2,
    Constant = 3,
    Macro = 4,
}

/// Constant pool entry types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ConstantType {
    I32 = 0,
    F32 = 1,
    Str = 2,
}

/// A type as it appears in descriptors: base name, array marker, and the
/// import-table index when the base type comes from another module.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableType {
    pub base: String,
    pub array: bool,
    pub import_index: Option<i64>,
}

impl VariableType {
    /// A plain module-local type.
    pub fn plain(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            array: false,
            import_index: None,
        }
    }

    pub(crate) fn write(&self, ar: &mut WriteArchive) {
        ar.write_str(&self.base);
        ar.write_u8(self.array as u8);
        match self.import_index {
            Some(index) => {
                ar.write_u8(1);
                ar.write_varint(index);
            }
            None => ar.write_u8(0),
        }
    }

    fn read(ar: &mut ReadArchive<'_>) -> Result<Self, CompileError> {
        let base = ar.read_str()?;
        let array = ar.read_u8()? != 0;
        let import_index = match ar.read_u8()? {
            0 => None,
            _ => Some(ar.read_varint()?),
        };
        Ok(Self {
            base,
            array,
            import_index,
        })
    }
}

/// A function signature in descriptor form.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub return_type: VariableType,
    pub arg_types: Vec<VariableType>,
}

/// Body details of an exported function.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionDetails {
    /// A bytecode function: position in the module's bytecode stream plus
    /// the local slot table (parameters first).
    Bytecode {
        offset: usize,
        size: usize,
        locals: Vec<VariableType>,
    },
    /// A native function provided by the named host library.
    Native { library: String },
}

/// Descriptor of an exported function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub signature: FunctionSignature,
    pub details: FunctionDetails,
}

impl FunctionDescriptor {
    /// Whether the function is native.
    pub fn is_native(&self) -> bool {
        matches!(self.details, FunctionDetails::Native { .. })
    }
}

/// Struct descriptor flags.
pub mod struct_flags {
    /// Runtime casts into this struct are allowed (`allow_cast` directive).
    pub const ALLOW_CAST: u8 = 1;
    /// The struct is implemented by the host.
    pub const NATIVE: u8 = 2;
}

/// Descriptor of an exported struct.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDescriptor {
    pub fields: Vec<(String, VariableType)>,
    pub flags: u8,
}

/// Descriptor of an exported macro: the serialized branch-set AST.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDescriptor {
    pub serialized_ast: Vec<u8>,
}

/// Kind-specific payload of an export table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportDescriptor {
    Function(FunctionDescriptor),
    Struct(StructDescriptor),
    /// Index into the constant pool.
    Constant(usize),
    Macro(MacroDescriptor),
}

/// One export table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedSymbol {
    pub kind: ModuleSymbolKind,
    pub name: String,
    pub desc: ExportDescriptor,
}

/// One import table entry. Package entries use `package_index == -1`; symbol
/// entries reference the package entry they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportEntry {
    pub kind: ModuleSymbolKind,
    pub name: String,
    pub package_index: i64,
}

/// One constant pool entry. The payload is the little-endian encoding of the
/// value (4 bytes for `i32`/`f32`, UTF-8 bytes for `str`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantEntry {
    pub ty: ConstantType,
    pub payload: Vec<u8>,
}

impl ConstantEntry {
    pub fn i32(value: i32) -> Self {
        Self {
            ty: ConstantType::I32,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn f32(value: f32) -> Self {
        Self {
            ty: ConstantType::F32,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn str(value: &str) -> Self {
        Self {
            ty: ConstantType::Str,
            payload: value.as_bytes().to_vec(),
        }
    }
}

/// The module header: everything but the bytecode.
#[derive(Debug, Clone, Default)]
pub struct ModuleHeader {
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<ExportedSymbol>,
    pub constants: Vec<ConstantEntry>,
}

impl ModuleHeader {
    /// Finds an export by kind and name.
    pub fn find_export(&self, kind: ModuleSymbolKind, name: &str) -> Option<&ExportedSymbol> {
        self.exports
            .iter()
            .find(|entry| entry.kind == kind && entry.name == name)
    }

    /// Names of the packages this module imports.
    pub fn imported_packages(&self) -> impl Iterator<Item = &str> {
        self.imports
            .iter()
            .filter(|entry| entry.kind == ModuleSymbolKind::Package)
            .map(|entry| entry.name.as_str())
    }

    fn write(&self, ar: &mut WriteArchive) {
        ar.write_varuint(self.imports.len() as u64);
        for entry in &self.imports {
            ar.write_u8(entry.kind as u8);
            ar.write_str(&entry.name);
            ar.write_varint(entry.package_index);
        }

        ar.write_varuint(self.exports.len() as u64);
        for entry in &self.exports {
            ar.write_u8(entry.kind as u8);
            ar.write_str(&entry.name);
            match &entry.desc {
                ExportDescriptor::Function(desc) => {
                    desc.signature.return_type.write(ar);
                    ar.write_varuint(desc.signature.arg_types.len() as u64);
                    for arg in &desc.signature.arg_types {
                        arg.write(ar);
                    }
                    match &desc.details {
                        FunctionDetails::Native { library } => {
                            ar.write_u8(1);
                            ar.write_str(library);
                        }
                        FunctionDetails::Bytecode {
                            offset,
                            size,
                            locals,
                        } => {
                            ar.write_u8(0);
                            ar.write_varuint(*offset as u64);
                            ar.write_varuint(*size as u64);
                            ar.write_varuint(locals.len() as u64);
                            for local in locals {
                                local.write(ar);
                            }
                        }
                    }
                }
                ExportDescriptor::Struct(desc) => {
                    ar.write_u8(desc.flags);
                    ar.write_varuint(desc.fields.len() as u64);
                    for (name, ty) in &desc.fields {
                        ar.write_str(name);
                        ty.write(ar);
                    }
                }
                ExportDescriptor::Constant(index) => {
                    ar.write_varuint(*index as u64);
                }
                ExportDescriptor::Macro(desc) => {
                    ar.write_blob(&desc.serialized_ast);
                }
            }
        }

        ar.write_varuint(self.constants.len() as u64);
        for constant in &self.constants {
            ar.write_u8(constant.ty as u8);
            ar.write_blob(&constant.payload);
        }
    }

    fn read(ar: &mut ReadArchive<'_>) -> Result<Self, CompileError> {
        let mut header = ModuleHeader::default();

        let import_count = ar.read_varuint()?;
        for _ in 0..import_count {
            let kind = read_symbol_kind(ar)?;
            let name = ar.read_str()?;
            let package_index = ar.read_varint()?;
            header.imports.push(ImportEntry {
                kind,
                name,
                package_index,
            });
        }

        let export_count = ar.read_varuint()?;
        for _ in 0..export_count {
            let kind = read_symbol_kind(ar)?;
            let name = ar.read_str()?;
            let desc = match kind {
                ModuleSymbolKind::Function => {
                    let return_type = VariableType::read(ar)?;
                    let arg_count = ar.read_varuint()?;
                    let mut arg_types = Vec::with_capacity(arg_count as usize);
                    for _ in 0..arg_count {
                        arg_types.push(VariableType::read(ar)?);
                    }
                    let details = match ar.read_u8()? {
                        1 => FunctionDetails::Native {
                            library: ar.read_str()?,
                        },
                        _ => {
                            let offset = ar.read_varuint()? as usize;
                            let size = ar.read_varuint()? as usize;
                            let local_count = ar.read_varuint()?;
                            let mut locals = Vec::with_capacity(local_count as usize);
                            for _ in 0..local_count {
                                locals.push(VariableType::read(ar)?);
                            }
                            FunctionDetails::Bytecode {
                                offset,
                                size,
                                locals,
                            }
                        }
                    };
                    ExportDescriptor::Function(FunctionDescriptor {
                        signature: FunctionSignature {
                            return_type,
                            arg_types,
                        },
                        details,
                    })
                }
                ModuleSymbolKind::Type => {
                    let flags = ar.read_u8()?;
                    let field_count = ar.read_varuint()?;
                    let mut fields = Vec::with_capacity(field_count as usize);
                    for _ in 0..field_count {
                        let name = ar.read_str()?;
                        let ty = VariableType::read(ar)?;
                        fields.push((name, ty));
                    }
                    ExportDescriptor::Struct(StructDescriptor { fields, flags })
                }
                ModuleSymbolKind::Constant => {
                    ExportDescriptor::Constant(ar.read_varuint()? as usize)
                }
                ModuleSymbolKind::Macro => ExportDescriptor::Macro(MacroDescriptor {
                    serialized_ast: ar.read_blob()?,
                }),
                ModuleSymbolKind::Package => {
                    return Err(CompileError::serialization(
                        "Package entries are not allowed in the export table.",
                    ))
                }
            };
            header.exports.push(ExportedSymbol { kind, name, desc });
        }

        let constant_count = ar.read_varuint()?;
        for _ in 0..constant_count {
            let ty = ConstantType::from_repr(ar.read_u8()?)
                .ok_or_else(|| CompileError::serialization("Unknown constant type tag."))?;
            let payload = ar.read_blob()?;
            header.constants.push(ConstantEntry { ty, payload });
        }

        Ok(header)
    }
}

fn read_symbol_kind(ar: &mut ReadArchive<'_>) -> Result<ModuleSymbolKind, CompileError> {
    ModuleSymbolKind::from_repr(ar.read_u8()?)
        .ok_or_else(|| CompileError::serialization("Unknown module symbol kind tag."))
}

/// A complete module image: header plus bytecode.
#[derive(Debug, Clone, Default)]
pub struct LanguageModule {
    pub header: ModuleHeader,
    pub binary: Vec<u8>,
}

impl LanguageModule {
    /// Serializes the module image to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ar = WriteArchive::new();
        ar.write_bytes(&MODULE_MAGIC);
        ar.write_u8(MODULE_VERSION);
        self.header.write(&mut ar);
        ar.write_blob(&self.binary);
        ar.into_bytes()
    }

    /// Reads a full module image from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CompileError> {
        let mut ar = ReadArchive::new(data);
        let header = read_preamble(&mut ar)?;
        let binary = ar.read_blob()?;
        Ok(Self { header, binary })
    }

    /// Reads only the header of a module image. Dependency resolution uses
    /// this; the bytecode is never materialized.
    pub fn read_header(data: &[u8]) -> Result<ModuleHeader, CompileError> {
        let mut ar = ReadArchive::new(data);
        read_preamble(&mut ar)
    }
}

fn read_preamble(ar: &mut ReadArchive<'_>) -> Result<ModuleHeader, CompileError> {
    let magic = ar.read_bytes(4)?;
    if magic != MODULE_MAGIC {
        return Err(CompileError::serialization("Not a slang module file."));
    }
    let version = ar.read_u8()?;
    if version != MODULE_VERSION {
        return Err(CompileError::serialization(format!(
            "Unsupported module format version {version}."
        )));
    }
    ModuleHeader::read(ar)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_module() -> LanguageModule {
        LanguageModule {
            header: ModuleHeader {
                imports: vec![
                    ImportEntry {
                        kind: ModuleSymbolKind::Package,
                        name: "std".to_string(),
                        package_index: -1,
                    },
                    ImportEntry {
                        kind: ModuleSymbolKind::Function,
                        name: "print".to_string(),
                        package_index: 0,
                    },
                ],
                exports: vec![
                    ExportedSymbol {
                        kind: ModuleSymbolKind::Function,
                        name: "main".to_string(),
                        desc: ExportDescriptor::Function(FunctionDescriptor {
                            signature: FunctionSignature {
                                return_type: VariableType::plain("void"),
                                arg_types: vec![VariableType::plain("i32")],
                            },
                            details: FunctionDetails::Bytecode {
                                offset: 0,
                                size: 7,
                                locals: vec![VariableType::plain("i32")],
                            },
                        }),
                    },
                    ExportedSymbol {
                        kind: ModuleSymbolKind::Type,
                        name: "S".to_string(),
                        desc: ExportDescriptor::Struct(StructDescriptor {
                            fields: vec![
                                ("i".to_string(), VariableType::plain("i32")),
                                (
                                    "next".to_string(),
                                    VariableType {
                                        base: "S".to_string(),
                                        array: false,
                                        import_index: None,
                                    },
                                ),
                            ],
                            flags: struct_flags::ALLOW_CAST,
                        }),
                    },
                    ExportedSymbol {
                        kind: ModuleSymbolKind::Constant,
                        name: "GREETING".to_string(),
                        desc: ExportDescriptor::Constant(0),
                    },
                ],
                constants: vec![ConstantEntry::str("hello"), ConstantEntry::i32(-7)],
            },
            binary: vec![1, 2, 3, 4, 5, 6, 7],
        }
    }

    #[test]
    fn module_round_trip() {
        let module = sample_module();
        let bytes = module.to_bytes();
        let reloaded = LanguageModule::from_bytes(&bytes).unwrap();

        assert_eq!(reloaded.header.imports, module.header.imports);
        assert_eq!(reloaded.header.exports, module.header.exports);
        assert_eq!(reloaded.header.constants, module.header.constants);
        assert_eq!(reloaded.binary, module.binary);
    }

    #[test]
    fn header_reads_without_bytecode() {
        let module = sample_module();
        let bytes = module.to_bytes();
        let header = LanguageModule::read_header(&bytes).unwrap();
        assert!(header.find_export(ModuleSymbolKind::Type, "S").is_some());
        assert_eq!(header.imported_packages().collect::<Vec<_>>(), vec!["std"]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let module = sample_module();
        let mut bytes = module.to_bytes();
        bytes[0] = b'x';
        assert!(LanguageModule::from_bytes(&bytes).is_err());
    }
}
