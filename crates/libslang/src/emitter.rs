//! Bytecode emission and module writing.
//!
//! The emitter turns the typed IR into the on-disk module image: it collects
//! jump targets into a label table, gathers the imports the code actually
//! uses (every symbol preceded by its package entry), builds the export
//! table with function details patched in as bytecode is laid out, interns
//! constants into the pool, selects concrete opcodes from typed instruction
//! names, and finally assembles header plus bytecode. Operands referencing
//! symbols use the compact index scheme: non-negative values index this
//! module's export table, negative values encode `-1 - import_table_index`.

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::{
    archive::WriteArchive,
    ast::ExpressionKind,
    codegen::{CodegenContext, Instruction, InstructionArg, OperandKind, TypeCastKind},
    consteval::{ConstEnv, ConstValue},
    error::CompileError,
    macros::MacroEnv,
    module::{
        ConstantEntry, ExportDescriptor, ExportedSymbol, FunctionDescriptor, FunctionDetails,
        FunctionSignature, ImportEntry, LanguageModule, MacroDescriptor, ModuleHeader,
        ModuleSymbolKind, StructDescriptor, VariableType,
    },
    opcodes::{ArrayType, Opcode},
    sema::{symbol::SymbolKind, SemaEnv, SymbolId},
    typing::{TypeContext, TypeId},
};

/// A symbol the module imports, before package entries are interleaved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ImportedSymbol {
    kind: ModuleSymbolKind,
    import_path: String,
    name: String,
}

/// Emits the module image for a fully generated compilation unit.
pub fn emit_module<'base>(
    env: &SemaEnv<'base>,
    types: &TypeContext<'base>,
    consts: &ConstEnv,
    macro_env: &MacroEnv<'base>,
    codegen_ctx: &CodegenContext<'base>,
) -> Result<LanguageModule, CompileError> {
    let mut emitter = InstructionEmitter {
        env,
        types,
        consts,
        macro_env,
        codegen_ctx,
        buffer: WriteArchive::new(),
        jump_targets: IndexSet::new(),
        import_table: Vec::new(),
        exports: ExportTableBuilder::default(),
        constant_pool: Vec::new(),
        string_indices: IndexMap::new(),
    };
    emitter.run()?;
    Ok(emitter.into_module())
}

/// Builds the export table, patching function details during emission.
#[derive(Debug, Default)]
struct ExportTableBuilder {
    entries: Vec<ExportedSymbol>,
}

impl ExportTableBuilder {
    fn add(&mut self, entry: ExportedSymbol) -> Result<(), CompileError> {
        if self
            .entries
            .iter()
            .any(|existing| existing.kind == entry.kind && existing.name == entry.name)
        {
            return Err(CompileError::internal(
                "emitter",
                format!(
                    "Cannot add {} '{}' to export table: already exists.",
                    entry.kind, entry.name
                ),
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    fn get_index(&self, kind: ModuleSymbolKind, name: &str) -> Result<usize, CompileError> {
        self.entries
            .iter()
            .position(|entry| entry.kind == kind && entry.name == name)
            .ok_or_else(|| {
                CompileError::internal(
                    "emitter",
                    format!("Symbol '{name}' of kind '{kind}' not found in export table."),
                )
            })
    }

    fn update_function(
        &mut self,
        name: &str,
        offset: usize,
        size: usize,
        locals: Vec<VariableType>,
    ) -> Result<(), CompileError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.kind == ModuleSymbolKind::Function && entry.name == name)
            .ok_or_else(|| {
                CompileError::internal(
                    "emitter",
                    format!("Cannot update function '{name}': not in export table."),
                )
            })?;
        let ExportDescriptor::Function(desc) = &mut entry.desc else {
            return Err(CompileError::internal(
                "emitter",
                "Function export entry has a non-function descriptor.",
            ));
        };
        desc.details = FunctionDetails::Bytecode {
            offset,
            size,
            locals,
        };
        Ok(())
    }
}

struct InstructionEmitter<'a, 'base> {
    env: &'a SemaEnv<'base>,
    types: &'a TypeContext<'base>,
    consts: &'a ConstEnv,
    macro_env: &'a MacroEnv<'base>,
    codegen_ctx: &'a CodegenContext<'base>,
    buffer: WriteArchive,
    jump_targets: IndexSet<String>,
    import_table: Vec<ImportEntry>,
    exports: ExportTableBuilder,
    constant_pool: Vec<ConstantEntry>,
    string_indices: IndexMap<String, usize>,
}

impl<'base> InstructionEmitter<'_, 'base> {
    fn run(&mut self) -> Result<(), CompileError> {
        self.jump_targets = self.collect_jump_targets();
        let imports = self.collect_imports()?;
        self.build_import_table(imports);
        let import_count = self.import_table.len();

        self.build_exports()?;
        let export_count = self.exports.entries.len();

        // Bytecode, function by function, patching details as we go.
        let codegen_ctx = self.codegen_ctx;
        for func in &codegen_ctx.funcs {
            if func.is_native() {
                continue;
            }

            let locals: Vec<VariableType> = func
                .frame
                .slots()
                .map(|(_, slot)| self.variable_type_of(slot.ty))
                .collect::<Result<_, _>>()?;

            let entry_point = self.buffer.tell();
            for block in &func.blocks {
                if let Some(index) = self.jump_targets.get_index_of(&block.label) {
                    self.buffer.write_u8(Opcode::Label as u8);
                    self.buffer.write_varint(index as i64);
                }
                for instruction in &block.instructions {
                    self.emit_instruction(instruction)?;
                }
            }
            let size = self.buffer.tell() - entry_point;
            self.exports.update_function(&func.name, entry_point, size, locals)?;

            debug!(
                "emitted function '{}': offset {entry_point}, {size} byte(s)",
                func.name
            );
        }

        // The tables must not grow during emission.
        if import_count != self.import_table.len() {
            return Err(CompileError::internal(
                "emitter",
                "Import count changed during instruction emission.",
            ));
        }
        if export_count != self.exports.entries.len() {
            return Err(CompileError::internal(
                "emitter",
                "Export count changed during instruction emission.",
            ));
        }

        Ok(())
    }

    fn into_module(self) -> LanguageModule {
        LanguageModule {
            header: ModuleHeader {
                imports: self.import_table,
                exports: self.exports.entries,
                constants: self.constant_pool,
            },
            binary: self.buffer.into_bytes(),
        }
    }

    /// Labels referenced by `jmp`/`jnz`; their order defines the label table.
    fn collect_jump_targets(&self) -> IndexSet<String> {
        let mut targets = IndexSet::new();
        for func in &self.codegen_ctx.funcs {
            for block in &func.blocks {
                for instruction in &block.instructions {
                    if matches!(instruction.name, "jmp" | "jnz") {
                        for arg in &instruction.args {
                            if let InstructionArg::Label(label) = arg {
                                targets.insert(label.clone());
                            }
                        }
                    }
                }
            }
        }
        targets
    }

    /// Imports actually used: invoked functions, referenced struct types
    /// (in instructions, signatures, locals and struct fields), and macros
    /// invoked from exported macro bodies.
    fn collect_imports(&self) -> Result<Vec<ImportedSymbol>, CompileError> {
        let mut imports: IndexSet<ImportedSymbol> = IndexSet::new();

        let add_type = |imports: &mut IndexSet<ImportedSymbol>, ty: TypeId| {
            let base = self.types.base_type(ty);
            if let Some(info) = self.types.struct_info(base) {
                if let Some((path, name)) = self.import_info(info.symbol) {
                    imports.insert(ImportedSymbol {
                        kind: ModuleSymbolKind::Type,
                        import_path: path,
                        name,
                    });
                }
            }
        };

        for func in &self.codegen_ctx.funcs {
            for ty in func.arg_types.iter().chain([&func.return_type]) {
                add_type(&mut imports, *ty);
            }
            for (_, slot) in func.frame.slots() {
                add_type(&mut imports, slot.ty);
            }

            for block in &func.blocks {
                for instruction in &block.instructions {
                    for arg in &instruction.args {
                        match arg {
                            InstructionArg::FunctionRef { symbol, .. } => {
                                if let Some((path, name)) = self.import_info(*symbol) {
                                    imports.insert(ImportedSymbol {
                                        kind: ModuleSymbolKind::Function,
                                        import_path: path,
                                        name,
                                    });
                                }
                            }
                            InstructionArg::TypeRef { id, .. } => {
                                add_type(&mut imports, *id);
                            }
                            InstructionArg::Field { struct_type, .. } => {
                                add_type(&mut imports, *struct_type);
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        // Field types of locally defined structs.
        for (_, info) in self.types.structs() {
            if !self.env.symbol(info.symbol).is_local() {
                continue;
            }
            for field in &info.fields {
                add_type(&mut imports, field.ty);
            }
        }

        // Macros invoked from exported macro bodies are compile-time
        // imports of any module that re-expands them.
        for info in &self.macro_env.macros {
            if info.import_path.is_some() {
                continue;
            }
            let mut found: Vec<(String, String)> = Vec::new();
            info.node.visit_nodes(
                &mut |node| {
                    if let ExpressionKind::NamespaceAccess(access) = &node.kind {
                        let mut path = vec![access.namespace.text().to_string()];
                        let mut inner = access.inner.as_ref();
                        while let ExpressionKind::NamespaceAccess(next) = &inner.kind {
                            path.push(next.namespace.text().to_string());
                            inner = next.inner.as_ref();
                        }
                        if let ExpressionKind::MacroInvocation(invocation) = &inner.kind {
                            found.push((path.join("::"), invocation.name.text().to_string()));
                        }
                    }
                },
                true,
                false,
                None,
            );
            for (path, name) in found {
                imports.insert(ImportedSymbol {
                    kind: ModuleSymbolKind::Macro,
                    import_path: path,
                    name,
                });
            }
        }

        Ok(imports.into_iter().collect())
    }

    /// Builds the final import table: per package, the package entry first,
    /// then the symbols imported from it.
    fn build_import_table(&mut self, imports: Vec<ImportedSymbol>) {
        let packages: IndexSet<String> = imports
            .iter()
            .map(|symbol| symbol.import_path.clone())
            .collect();

        for package in packages {
            let package_index = self.import_table.len() as i64;
            self.import_table.push(ImportEntry {
                kind: ModuleSymbolKind::Package,
                name: package.clone(),
                package_index: -1,
            });
            for symbol in imports.iter().filter(|s| s.import_path == package) {
                self.import_table.push(ImportEntry {
                    kind: symbol.kind,
                    name: symbol.name.clone(),
                    package_index,
                });
            }
        }
    }

    fn build_exports(&mut self) -> Result<(), CompileError> {
        let env = self.env;
        let types = self.types;
        let macro_env = self.macro_env;
        let codegen_ctx = self.codegen_ctx;

        // Locally defined structs.
        for (_, info) in types.structs() {
            if !env.symbol(info.symbol).is_local() || !info.defined {
                continue;
            }

            let mut fields = Vec::with_capacity(info.fields.len());
            for field in &info.fields {
                fields.push((field.name.to_string(), self.variable_type_of(field.ty)?));
            }

            let mut flags = 0u8;
            if info.allow_cast {
                flags |= crate::module::struct_flags::ALLOW_CAST;
            }
            if info.native {
                flags |= crate::module::struct_flags::NATIVE;
            }

            self.exports.add(ExportedSymbol {
                kind: ModuleSymbolKind::Type,
                name: info.name.to_string(),
                desc: ExportDescriptor::Struct(StructDescriptor { fields, flags }),
            })?;
        }

        // Local constants, values interned into the pool.
        for (index, info) in env.symbols.iter().enumerate() {
            if info.kind != SymbolKind::Constant || !info.is_local() {
                continue;
            }
            let Some(value) = self.consts.info_of(SymbolId(index)).cloned() else {
                continue;
            };
            let pool_index = self.constant_pool.len();
            self.constant_pool.push(match &value.value {
                ConstValue::Int(v) => ConstantEntry::i32(*v),
                ConstValue::Float(v) => ConstantEntry::f32(*v),
                ConstValue::Str(v) => {
                    self.string_indices.insert(v.clone(), pool_index);
                    ConstantEntry::str(v)
                }
            });
            self.exports.add(ExportedSymbol {
                kind: ModuleSymbolKind::Constant,
                name: info.name.to_string(),
                desc: ExportDescriptor::Constant(pool_index),
            })?;
        }

        // Functions, placeholder details patched during emission.
        for func in &codegen_ctx.funcs {
            let signature = FunctionSignature {
                return_type: self.variable_type_of(func.return_type)?,
                arg_types: func
                    .arg_types
                    .iter()
                    .map(|ty| self.variable_type_of(*ty))
                    .collect::<Result<_, _>>()?,
            };
            let details = match &func.native {
                Some(library) => FunctionDetails::Native {
                    library: library.clone(),
                },
                None => FunctionDetails::Bytecode {
                    offset: 0,
                    size: 0,
                    locals: Vec::new(),
                },
            };
            self.exports.add(ExportedSymbol {
                kind: ModuleSymbolKind::Function,
                name: func.name.clone(),
                desc: ExportDescriptor::Function(FunctionDescriptor { signature, details }),
            })?;
        }

        // Local macros: the serialized branch set travels in the module so
        // importing units can re-expand it.
        for info in &macro_env.macros {
            if info.import_path.is_some() {
                continue;
            }
            let mut ar = WriteArchive::new();
            info.node.serialize(&mut ar);
            self.exports.add(ExportedSymbol {
                kind: ModuleSymbolKind::Macro,
                name: info.name.clone(),
                desc: ExportDescriptor::Macro(MacroDescriptor {
                    serialized_ast: ar.into_bytes(),
                }),
            })?;
        }

        Ok(())
    }

    /// Converts a type id into descriptor form, resolving imported struct
    /// base types to their import table index.
    fn variable_type_of(&self, ty: TypeId) -> Result<VariableType, CompileError> {
        let array = self.types.is_array(ty);
        let base = self.types.base_type(ty);

        let import_index = match self.types.struct_info(base) {
            Some(info) => match self.import_info(info.symbol) {
                Some((path, name)) => Some(self.find_import(ModuleSymbolKind::Type, &path, &name)?),
                None => None,
            },
            None => None,
        };

        Ok(VariableType {
            base: self.types.to_string(base),
            array,
            import_index,
        })
    }

    /// For imported symbols, the `(module path, name)` pair; `None` for
    /// symbols of the compiled module.
    fn import_info(&self, symbol: SymbolId) -> Option<(String, String)> {
        let info = self.env.symbol(symbol);
        if info.is_local() {
            return None;
        }
        let module = self.env.symbol(info.declaring_module);
        Some((module.qualified_name.to_string(), info.name.to_string()))
    }

    fn find_import(
        &self,
        kind: ModuleSymbolKind,
        path: &str,
        name: &str,
    ) -> Result<i64, CompileError> {
        // The symbol's package entry precedes it; match the entry itself.
        let mut current_package: Option<&str> = None;
        for (index, entry) in self.import_table.iter().enumerate() {
            if entry.kind == ModuleSymbolKind::Package {
                current_package = Some(entry.name.as_str());
                continue;
            }
            if entry.kind == kind && entry.name == name && current_package == Some(path) {
                return Ok(index as i64);
            }
        }
        Err(CompileError::internal(
            "emitter",
            format!("Cannot find {kind} '{name}' from package '{path}' in import table."),
        ))
    }

    /// The operand index for a symbol reference: non-negative for exports,
    /// `-1 - index` for imports.
    fn symbol_operand(
        &self,
        kind: ModuleSymbolKind,
        symbol: SymbolId,
    ) -> Result<i64, CompileError> {
        match self.import_info(symbol) {
            Some((path, name)) => Ok(-1 - self.find_import(kind, &path, &name)?),
            None => {
                let name = self.env.symbol(symbol).name.to_string();
                Ok(self.exports.get_index(kind, &name)? as i64)
            }
        }
    }

    fn struct_operand(&self, ty: TypeId) -> Result<i64, CompileError> {
        let info = self.types.struct_info(ty).ok_or_else(|| {
            CompileError::internal("emitter", "Type operand is not a struct.")
        })?;
        self.symbol_operand(ModuleSymbolKind::Type, info.symbol)
    }

    fn intern_string(&mut self, value: &str) -> usize {
        if let Some(index) = self.string_indices.get(value) {
            return *index;
        }
        let index = self.constant_pool.len();
        self.constant_pool.push(ConstantEntry::str(value));
        self.string_indices.insert(value.to_string(), index);
        index
    }

    fn opcode(&mut self, opcode: Opcode) {
        self.buffer.write_u8(opcode as u8);
    }

    /// Selects by operand kind: the i32 opcode, the f32 opcode, or the
    /// reference opcode (str, arrays, structs, null).
    fn typed_opcode(
        &self,
        instruction: &Instruction<'base>,
        i32_op: Opcode,
        f32_op: Option<Opcode>,
        ref_op: Option<Opcode>,
    ) -> Result<Opcode, CompileError> {
        let Some(ty) = &instruction.ty else {
            return Err(CompileError::internal(
                "emitter",
                format!("Instruction '{}' has no operand type.", instruction.name),
            ));
        };
        match ty.kind {
            OperandKind::I32 => Ok(i32_op),
            OperandKind::F32 => f32_op.ok_or_else(|| {
                CompileError::internal(
                    "emitter",
                    format!("Invalid type 'f32' for instruction '{}'.", instruction.name),
                )
            }),
            OperandKind::Str | OperandKind::Array | OperandKind::Struct | OperandKind::Null => {
                ref_op.ok_or_else(|| {
                    CompileError::internal(
                        "emitter",
                        format!(
                            "Invalid type '{}' for instruction '{}'.",
                            ty.name, instruction.name
                        ),
                    )
                })
            }
            OperandKind::Void => Err(CompileError::internal(
                "emitter",
                format!("Invalid type 'void' for instruction '{}'.", instruction.name),
            )),
        }
    }

    fn label_index(&self, label: &str) -> Result<i64, CompileError> {
        self.jump_targets
            .get_index_of(label)
            .map(|index| index as i64)
            .ok_or_else(|| {
                CompileError::internal("emitter", format!("Cannot find label '{label}'."))
            })
    }

    fn slot_index(&self, instruction: &Instruction<'base>) -> Result<i64, CompileError> {
        match instruction.args.first() {
            Some(InstructionArg::Slot { index, .. }) => Ok(*index as i64),
            _ => Err(CompileError::internal(
                "emitter",
                format!("Instruction '{}' expects a slot argument.", instruction.name),
            )),
        }
    }

    fn emit_instruction(&mut self, instruction: &Instruction<'base>) -> Result<(), CompileError> {
        match instruction.name {
            "add" => {
                let op = self.typed_opcode(instruction, Opcode::Iadd, Some(Opcode::Fadd), None)?;
                self.opcode(op);
            }
            "sub" => {
                let op = self.typed_opcode(instruction, Opcode::Isub, Some(Opcode::Fsub), None)?;
                self.opcode(op);
            }
            "mul" => {
                let op = self.typed_opcode(instruction, Opcode::Imul, Some(Opcode::Fmul), None)?;
                self.opcode(op);
            }
            "div" => {
                let op = self.typed_opcode(instruction, Opcode::Idiv, Some(Opcode::Fdiv), None)?;
                self.opcode(op);
            }
            "mod" => {
                let op = self.typed_opcode(instruction, Opcode::Imod, None, None)?;
                self.opcode(op);
            }
            "and" => {
                let op = self.typed_opcode(instruction, Opcode::Iand, None, None)?;
                self.opcode(op);
            }
            "land" => {
                let op = self.typed_opcode(instruction, Opcode::Land, None, None)?;
                self.opcode(op);
            }
            "or" => {
                let op = self.typed_opcode(instruction, Opcode::Ior, None, None)?;
                self.opcode(op);
            }
            "lor" => {
                let op = self.typed_opcode(instruction, Opcode::Lor, None, None)?;
                self.opcode(op);
            }
            "xor" => {
                let op = self.typed_opcode(instruction, Opcode::Ixor, None, None)?;
                self.opcode(op);
            }
            "shl" => {
                let op = self.typed_opcode(instruction, Opcode::Ishl, None, None)?;
                self.opcode(op);
            }
            "shr" => {
                let op = self.typed_opcode(instruction, Opcode::Ishr, None, None)?;
                self.opcode(op);
            }
            "cmpl" => {
                let op = self.typed_opcode(instruction, Opcode::Icmpl, Some(Opcode::Fcmpl), None)?;
                self.opcode(op);
            }
            "cmple" => {
                let op =
                    self.typed_opcode(instruction, Opcode::Icmple, Some(Opcode::Fcmple), None)?;
                self.opcode(op);
            }
            "cmpg" => {
                let op = self.typed_opcode(instruction, Opcode::Icmpg, Some(Opcode::Fcmpg), None)?;
                self.opcode(op);
            }
            "cmpge" => {
                let op =
                    self.typed_opcode(instruction, Opcode::Icmpge, Some(Opcode::Fcmpge), None)?;
                self.opcode(op);
            }
            "cmpeq" => {
                let op = self.typed_opcode(
                    instruction,
                    Opcode::Icmpeq,
                    Some(Opcode::Fcmpeq),
                    Some(Opcode::Acmpeq),
                )?;
                self.opcode(op);
            }
            "cmpne" => {
                let op = self.typed_opcode(
                    instruction,
                    Opcode::Icmpne,
                    Some(Opcode::Fcmpne),
                    Some(Opcode::Acmpne),
                )?;
                self.opcode(op);
            }
            "const" => match instruction.args.first() {
                Some(InstructionArg::ConstInt(value)) => {
                    self.opcode(Opcode::Iconst);
                    self.buffer.write_i32(*value);
                }
                Some(InstructionArg::ConstFloat(value)) => {
                    self.opcode(Opcode::Fconst);
                    self.buffer.write_f32(*value);
                }
                Some(InstructionArg::ConstStr(value)) => {
                    let index = self.intern_string(value);
                    self.opcode(Opcode::Sconst);
                    self.buffer.write_varint(index as i64);
                }
                _ => {
                    return Err(CompileError::internal(
                        "emitter",
                        "Instruction 'const' expects a literal argument.",
                    ))
                }
            },
            "const_null" => self.opcode(Opcode::AconstNull),
            "load" => {
                let op =
                    self.typed_opcode(instruction, Opcode::Iload, Some(Opcode::Fload), Some(Opcode::Aload))?;
                let index = self.slot_index(instruction)?;
                self.opcode(op);
                self.buffer.write_varint(index);
            }
            "store" => {
                let op = self.typed_opcode(
                    instruction,
                    Opcode::Istore,
                    Some(Opcode::Fstore),
                    Some(Opcode::Astore),
                )?;
                let index = self.slot_index(instruction)?;
                self.opcode(op);
                self.buffer.write_varint(index);
            }
            "load_element" => {
                let op = self.typed_opcode(
                    instruction,
                    Opcode::Iaload,
                    Some(Opcode::Faload),
                    Some(Opcode::Aaload),
                )?;
                self.opcode(op);
            }
            "store_element" => {
                let op = self.typed_opcode(
                    instruction,
                    Opcode::Iastore,
                    Some(Opcode::Fastore),
                    Some(Opcode::Aastore),
                )?;
                self.opcode(op);
            }
            "dup" => {
                let op =
                    self.typed_opcode(instruction, Opcode::Idup, Some(Opcode::Fdup), Some(Opcode::Adup))?;
                self.opcode(op);
            }
            "dup_x1" | "dup_x2" => {
                let opcode = if instruction.name == "dup_x1" {
                    Opcode::DupX1
                } else {
                    Opcode::DupX2
                };
                self.opcode(opcode);

                let value_type = match &instruction.ty {
                    Some(ty) => self.variable_type_of(ty.id)?,
                    None => {
                        return Err(CompileError::internal(
                            "emitter",
                            "Stack duplication has no operand type.",
                        ))
                    }
                };
                value_type.write(&mut self.buffer);
                for arg in &instruction.args {
                    let InstructionArg::TypeRef { id, .. } = arg else {
                        return Err(CompileError::internal(
                            "emitter",
                            "Stack duplication expects type arguments.",
                        ));
                    };
                    let stack_type = self.variable_type_of(*id)?;
                    stack_type.write(&mut self.buffer);
                }
            }
            "pop" => {
                let op =
                    self.typed_opcode(instruction, Opcode::Pop, Some(Opcode::Pop), Some(Opcode::Apop))?;
                self.opcode(op);
            }
            "cast" => match instruction.args.first() {
                Some(InstructionArg::Cast(TypeCastKind::I32ToF32)) => self.opcode(Opcode::I2f),
                Some(InstructionArg::Cast(TypeCastKind::F32ToI32)) => self.opcode(Opcode::F2i),
                _ => {
                    return Err(CompileError::internal(
                        "emitter",
                        "Instruction 'cast' expects a cast argument.",
                    ))
                }
            },
            "invoke" => {
                let Some(InstructionArg::FunctionRef { symbol, .. }) = instruction.args.first()
                else {
                    return Err(CompileError::internal(
                        "emitter",
                        "Instruction 'invoke' expects a function argument.",
                    ));
                };
                let index = self.symbol_operand(ModuleSymbolKind::Function, *symbol)?;
                self.opcode(Opcode::Invoke);
                self.buffer.write_varint(index);
            }
            "ret" => {
                let Some(ty) = &instruction.ty else {
                    return Err(CompileError::internal(
                        "emitter",
                        "Instruction 'ret' has no operand type.",
                    ));
                };
                let op = match ty.kind {
                    OperandKind::Void => Opcode::Ret,
                    OperandKind::I32 => Opcode::Iret,
                    OperandKind::F32 => Opcode::Fret,
                    OperandKind::Str => Opcode::Sret,
                    OperandKind::Array | OperandKind::Struct | OperandKind::Null => Opcode::Aret,
                };
                self.opcode(op);
            }
            "get_field" | "set_field" => {
                let Some(InstructionArg::Field {
                    struct_type,
                    field_index,
                    ..
                }) = instruction.args.first()
                else {
                    return Err(CompileError::internal(
                        "emitter",
                        "Field instruction expects a field argument.",
                    ));
                };
                let struct_index = self.struct_operand(*struct_type)?;

                if instruction.name == "set_field" {
                    self.opcode(Opcode::Setfield);
                } else {
                    self.opcode(Opcode::Getfield);
                }
                self.buffer.write_varint(struct_index);
                self.buffer.write_varint(*field_index as i64);
            }
            "jnz" => {
                let (then_label, else_label) = match instruction.args.as_slice() {
                    [InstructionArg::Label(a), InstructionArg::Label(b)] => (a, b),
                    _ => {
                        return Err(CompileError::internal(
                            "emitter",
                            "Instruction 'jnz' expects two label arguments.",
                        ))
                    }
                };
                let then_index = self.label_index(then_label)?;
                let else_index = self.label_index(else_label)?;
                self.opcode(Opcode::Jnz);
                self.buffer.write_varint(then_index);
                self.buffer.write_varint(else_index);
            }
            "jmp" => {
                let Some(InstructionArg::Label(label)) = instruction.args.first() else {
                    return Err(CompileError::internal(
                        "emitter",
                        "Instruction 'jmp' expects a label argument.",
                    ));
                };
                let index = self.label_index(label)?;
                self.opcode(Opcode::Jmp);
                self.buffer.write_varint(index);
            }
            "new" | "anewarray" | "checkcast" => {
                let Some(InstructionArg::TypeRef { id, .. }) = instruction.args.first() else {
                    return Err(CompileError::internal(
                        "emitter",
                        "Type instruction expects a type argument.",
                    ));
                };
                let index = self.struct_operand(*id)?;

                let opcode = match instruction.name {
                    "new" => Opcode::New,
                    "anewarray" => Opcode::Anewarray,
                    _ => Opcode::Checkcast,
                };
                self.opcode(opcode);
                self.buffer.write_varint(index);
            }
            "newarray" => {
                let Some(ty) = &instruction.ty else {
                    return Err(CompileError::internal(
                        "emitter",
                        "Instruction 'newarray' has no element type.",
                    ));
                };
                let element = match ty.kind {
                    OperandKind::I32 => ArrayType::I32,
                    OperandKind::F32 => ArrayType::F32,
                    OperandKind::Str => ArrayType::Str,
                    _ => {
                        return Err(CompileError::internal(
                            "emitter",
                            format!("Unknown array element type '{}' for newarray.", ty.name),
                        ))
                    }
                };
                self.opcode(Opcode::Newarray);
                self.buffer.write_u8(element as u8);
            }
            "arraylength" => self.opcode(Opcode::Arraylength),
            other => {
                return Err(CompileError::internal(
                    "emitter",
                    format!("Instruction emission for '{other}' not implemented."),
                ))
            }
        }

        Ok(())
    }
}
