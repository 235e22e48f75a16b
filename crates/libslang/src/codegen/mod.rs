//! Typed, stack-oriented intermediate representation.
//!
//! Code generation lowers the AST into per-function lists of basic blocks
//! holding typed instructions. Instruction names are the abstract operation
//! (`add`, `load`, `store_element`); the emitter later selects the concrete
//! opcode from the name and the operand type (`add` over `i32` becomes
//! `iadd`). Arguments carry enough information to resolve concrete bytecode
//! operands: local slots, literal constants, labels, field accesses and
//! function references.

pub mod generate;

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use indexmap::IndexMap;

use crate::{
    error::CompileError,
    sema::SymbolId,
    typing::{PrimitiveType, TypeContext, TypeId},
};

/// The memory context threaded through code generation: whether a node must
/// leave its value on the stack, consume one into a storage location, or
/// neither.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryContext {
    None,
    Load,
    Store,
}

/// Coarse operand classification driving opcode selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandKind {
    I32,
    F32,
    Str,
    Void,
    Null,
    Array,
    Struct,
}

/// The operand type of an instruction: id for table lookups, kind for
/// opcode selection, name for readable dumps.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandType {
    pub id: TypeId,
    pub kind: OperandKind,
    pub name: String,
}

impl OperandType {
    /// Classifies a type id.
    pub fn of(types: &TypeContext<'_>, id: TypeId) -> Self {
        let kind = if id == types.primitive(PrimitiveType::I32) {
            OperandKind::I32
        } else if id == types.primitive(PrimitiveType::F32) {
            OperandKind::F32
        } else if id == types.primitive(PrimitiveType::Str) {
            OperandKind::Str
        } else if id == types.primitive(PrimitiveType::Void) {
            OperandKind::Void
        } else if id == types.primitive(PrimitiveType::Null) {
            OperandKind::Null
        } else if types.is_array(id) {
            OperandKind::Array
        } else {
            OperandKind::Struct
        };

        Self {
            id,
            kind,
            name: types.to_string(id),
        }
    }
}

impl Display for OperandType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// The compile-time cast kinds the cast opcode supports.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeCastKind {
    I32ToF32,
    F32ToI32,
}

impl Display for TypeCastKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeCastKind::I32ToF32 => f.write_str("i32_to_f32"),
            TypeCastKind::F32ToI32 => f.write_str("f32_to_i32"),
        }
    }
}

/// An instruction argument.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionArg<'base> {
    /// A local variable slot.
    Slot { name: Cow<'base, str>, index: usize },
    ConstInt(i32),
    ConstFloat(f32),
    ConstStr(String),
    /// A branch target label.
    Label(String),
    /// A struct field access.
    Field {
        struct_type: TypeId,
        struct_name: String,
        field_index: usize,
        field_name: String,
    },
    /// An invoked function.
    FunctionRef { symbol: SymbolId, name: String },
    /// A type operand (`new`, `newarray`, `checkcast`).
    TypeRef { id: TypeId, name: String },
    /// A compile-time cast.
    Cast(TypeCastKind),
}

impl Display for InstructionArg<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InstructionArg::Slot { index, .. } => write!(f, "%{index}"),
            InstructionArg::ConstInt(value) => write!(f, "{value}"),
            InstructionArg::ConstFloat(value) => write!(f, "{value}"),
            InstructionArg::ConstStr(value) => write!(f, "{value:?}"),
            InstructionArg::Label(label) => f.write_str(label),
            InstructionArg::Field {
                struct_name,
                field_name,
                ..
            } => write!(f, "{struct_name}.{field_name}"),
            InstructionArg::FunctionRef { name, .. } => f.write_str(name),
            InstructionArg::TypeRef { name, .. } => f.write_str(name),
            InstructionArg::Cast(kind) => write!(f, "{kind}"),
        }
    }
}

/// One typed IR instruction: `(name, operand type, arguments)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction<'base> {
    pub name: &'static str,
    pub ty: Option<OperandType>,
    pub args: Vec<InstructionArg<'base>>,
}

impl Display for Instruction<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)?;
        if let Some(ty) = &self.ty {
            write!(f, " {ty}")?;
        }
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A label plus a straight-line instruction sequence.
#[derive(Debug, Clone)]
pub struct BasicBlock<'base> {
    pub label: String,
    pub instructions: Vec<Instruction<'base>>,
    /// Set when the block can only be entered through dead control flow
    /// (the merge block after two returning branch arms).
    pub unreachable: bool,
}

impl<'base> BasicBlock<'base> {
    fn new(label: String) -> Self {
        Self {
            label,
            instructions: Vec::new(),
            unreachable: false,
        }
    }

    /// Whether the block's last instruction is a return.
    pub fn ends_with_return(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|instruction| instruction.name == "ret")
    }

    /// Whether the block ends in a branch or return.
    pub fn terminated(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|instruction| matches!(instruction.name, "ret" | "jmp" | "jnz"))
    }
}

/// One local slot: parameters first, then locals in declaration order.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub index: usize,
    pub ty: TypeId,
    pub parameter: bool,
}

/// The local slot table of one function, keyed by the declaring symbol so
/// shadowed names get distinct slots.
#[derive(Debug, Clone, Default)]
pub struct FunctionFrame<'base> {
    slots: IndexMap<SymbolId, (Cow<'base, str>, SlotInfo)>,
}

impl<'base> FunctionFrame<'base> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a slot for a symbol; slot indices follow insertion order.
    pub fn add(&mut self, symbol: SymbolId, name: Cow<'base, str>, ty: TypeId, parameter: bool) {
        let index = self.slots.len();
        self.slots.insert(
            symbol,
            (
                name,
                SlotInfo {
                    index,
                    ty,
                    parameter,
                },
            ),
        );
    }

    /// The slot of a symbol.
    pub fn slot(&self, symbol: SymbolId) -> Option<&SlotInfo> {
        self.slots.get(&symbol).map(|(_, info)| info)
    }

    /// The slot name of a symbol.
    pub fn slot_name(&self, symbol: SymbolId) -> Option<&Cow<'base, str>> {
        self.slots.get(&symbol).map(|(name, _)| name)
    }

    /// All slots in index order.
    pub fn slots(&self) -> impl Iterator<Item = (&Cow<'base, str>, &SlotInfo)> {
        self.slots.values().map(|(name, info)| (name, info))
    }

    /// Number of slots (parameters + locals).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// One lowered function.
#[derive(Debug, Clone)]
pub struct Function<'base> {
    pub name: String,
    pub symbol: SymbolId,
    pub return_type: TypeId,
    pub arg_types: Vec<TypeId>,
    pub frame: FunctionFrame<'base>,
    pub blocks: Vec<BasicBlock<'base>>,
    /// Host library name for native functions; they carry no blocks.
    pub native: Option<String>,
}

impl<'base> Function<'base> {
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// Appends a new basic block and returns its index.
    pub fn add_block(&mut self, label: String) -> usize {
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    /// A readable dump of the function's IR, one instruction per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            out.push_str(&block.label);
            out.push_str(":\n");
            for instruction in &block.instructions {
                out.push_str("    ");
                out.push_str(&instruction.to_string());
                out.push('\n');
            }
        }
        out
    }

    /// The instruction sequence across all blocks, as display strings.
    /// Convenient for asserting generated code in tests.
    pub fn instruction_strings(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter().map(|i| i.to_string()))
            .collect()
    }
}

/// All functions of one compilation unit plus label generation state.
#[derive(Debug, Default)]
pub struct CodegenContext<'base> {
    pub funcs: Vec<Function<'base>>,
    label_counter: usize,
}

impl<'base> CodegenContext<'base> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh label with the given stem.
    pub fn generate_label(&mut self, stem: &str) -> String {
        let label = format!("{stem}#{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    /// Finds a generated function by name.
    pub fn function(&self, name: &str) -> Result<&Function<'base>, CompileError> {
        self.funcs
            .iter()
            .find(|func| func.name == name)
            .ok_or_else(|| {
                CompileError::internal("codegen", format!("Function '{name}' not generated."))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_display_matches_dump_format() {
        let instruction = Instruction {
            name: "const",
            ty: Some(OperandType {
                id: TypeId(0),
                kind: OperandKind::I32,
                name: "i32".to_string(),
            }),
            args: vec![InstructionArg::ConstInt(2)],
        };
        assert_eq!(instruction.to_string(), "const i32 2");
    }

    #[test]
    fn frame_assigns_slots_in_insertion_order()  {
        let mut frame = FunctionFrame::new();
        frame.add(SymbolId(7), "a".into(), TypeId(0), true);
        frame.add(SymbolId(9), "x".into(), TypeId(1), false);

        assert_eq!(frame.slot(SymbolId(7)).unwrap().index, 0);
        assert_eq!(frame.slot(SymbolId(9)).unwrap().index, 1);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn block_termination_checks_the_last_instruction() {
        let mut block = BasicBlock::new("entry".to_string());
        assert!(!block.terminated());

        block.instructions.push(Instruction {
            name: "ret",
            ty: None,
            args: vec![],
        });
        assert!(block.terminated());
        assert!(block.ends_with_return());
    }
}
