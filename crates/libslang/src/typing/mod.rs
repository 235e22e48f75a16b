//! Type context: interned type descriptors and declaration phases.
//!
//! Types are identified by opaque [`TypeId`]s; two types are equal iff their
//! ids are equal. Array and struct descriptors are interned so structurally
//! identical occurrences share an id, and the built-in primitives preoccupy
//! the low ids. Struct types are registered in two phases (declaration
//! reserves the name, definition fills in the field list) so mutually
//! recursive structs resolve.

pub mod check;

use std::borrow::Cow;

use indexmap::IndexMap;
use strum_macros::Display;

use crate::{
    ast::{ExpressionAst, ExpressionKind, TypeAst},
    error::CompileError,
    module::{self, ExportDescriptor, VariableType},
    nom_tools::SpanInfo,
    sema::{
        symbol::{SymbolKind, SymbolReference},
        SemaEnv, ScopeId, SymbolId,
    },
};

/// An opaque type identifier: the index of a descriptor in the type context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

impl TypeId {
    /// Invalid/unset type id. Also used for not-yet-typeable expressions
    /// (unexpanded macro invocations).
    pub const UNDEFINED: Self = TypeId(usize::MAX);
}

/// Built-in primitive types. The discriminants are the preoccupied type ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[repr(usize)]
pub enum PrimitiveType {
    #[strum(serialize = "i32")]
    I32 = 0,
    #[strum(serialize = "f32")]
    F32 = 1,
    #[strum(serialize = "str")]
    Str = 2,
    #[strum(serialize = "void")]
    Void = 3,
    /// The type of the `null` literal, coercible to any reference type.
    #[strum(serialize = "@null")]
    Null = 4,
}

/// One field of a struct type.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField<'base> {
    pub name: Cow<'base, str>,
    pub ty: TypeId,
}

/// A struct type descriptor.
#[derive(Debug, Clone)]
pub struct StructInfo<'base> {
    /// Unqualified struct name.
    pub name: Cow<'base, str>,
    /// The symbol that declared the struct.
    pub symbol: SymbolId,
    /// Ordered field list; empty until the definition phase runs.
    pub fields: Vec<StructField<'base>>,
    /// Whether runtime casts into this struct are allowed.
    pub allow_cast: bool,
    /// Whether the struct is provided by the host.
    pub native: bool,
    /// Whether the definition phase has filled in the fields.
    pub defined: bool,
}

impl StructInfo<'_> {
    /// Finds a field by name, returning its index and type.
    pub fn field(&self, name: &str) -> Option<(usize, TypeId)> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .map(|index| (index, self.fields[index].ty))
    }
}

/// A type descriptor.
#[derive(Debug, Clone)]
pub enum TypeDescriptor<'base> {
    Primitive(PrimitiveType),
    /// Array of the element type.
    Array(TypeId),
    Struct(StructInfo<'base>),
}

/// A function signature: return type plus parameter types.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignatureInfo {
    pub return_type: TypeId,
    pub parameters: Vec<TypeId>,
}

/// The type context: descriptor arena, interning tables, and function
/// signatures.
#[derive(Debug)]
pub struct TypeContext<'base> {
    types: Vec<TypeDescriptor<'base>>,
    /// Element type id → interned array type id.
    array_types: IndexMap<TypeId, TypeId>,
    /// Qualified struct name → type id.
    struct_types: IndexMap<String, TypeId>,
    /// Declared function signatures, per function symbol.
    pub function_signatures: IndexMap<SymbolId, FunctionSignatureInfo>,
}

impl Default for TypeContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'base> TypeContext<'base> {
    /// Creates a context with the primitives preoccupying the low ids.
    pub fn new() -> Self {
        Self {
            types: vec![
                TypeDescriptor::Primitive(PrimitiveType::I32),
                TypeDescriptor::Primitive(PrimitiveType::F32),
                TypeDescriptor::Primitive(PrimitiveType::Str),
                TypeDescriptor::Primitive(PrimitiveType::Void),
                TypeDescriptor::Primitive(PrimitiveType::Null),
            ],
            array_types: IndexMap::new(),
            struct_types: IndexMap::new(),
            function_signatures: IndexMap::new(),
        }
    }

    /// The id of a primitive type.
    pub fn primitive(&self, primitive: PrimitiveType) -> TypeId {
        TypeId(primitive as usize)
    }

    /// The descriptor behind an id.
    pub fn descriptor(&self, id: TypeId) -> Result<&TypeDescriptor<'base>, CompileError> {
        self.types
            .get(id.0)
            .ok_or_else(|| CompileError::internal("typing", format!("Unknown type id {}.", id.0)))
    }

    /// Interns and returns the array-of type for an element type.
    pub fn array_of(&mut self, element: TypeId) -> TypeId {
        if let Some(existing) = self.array_types.get(&element) {
            return *existing;
        }
        let id = TypeId(self.types.len());
        self.types.push(TypeDescriptor::Array(element));
        self.array_types.insert(element, id);
        id
    }

    /// Declaration phase for one struct: registers the name with an empty
    /// body so forward and mutually recursive references resolve.
    pub fn declare_struct(
        &mut self,
        qualified_name: String,
        name: Cow<'base, str>,
        symbol: SymbolId,
    ) -> TypeId {
        if let Some(existing) = self.struct_types.get(&qualified_name) {
            return *existing;
        }
        let id = TypeId(self.types.len());
        self.types.push(TypeDescriptor::Struct(StructInfo {
            name,
            symbol,
            fields: Vec::new(),
            allow_cast: false,
            native: false,
            defined: false,
        }));
        self.struct_types.insert(qualified_name, id);
        id
    }

    /// Definition phase for one struct: fills in the field list and flags.
    pub fn define_struct(
        &mut self,
        id: TypeId,
        fields: Vec<StructField<'base>>,
        allow_cast: bool,
        native: bool,
    ) -> Result<(), CompileError> {
        match self.types.get_mut(id.0) {
            Some(TypeDescriptor::Struct(info)) => {
                info.fields = fields;
                info.allow_cast = allow_cast;
                info.native = native;
                info.defined = true;
                Ok(())
            }
            _ => Err(CompileError::internal(
                "typing",
                format!("Type id {} is not a struct.", id.0),
            )),
        }
    }

    /// Looks up a struct type by qualified name.
    pub fn struct_by_name(&self, qualified_name: &str) -> Option<TypeId> {
        self.struct_types.get(qualified_name).copied()
    }

    /// The struct info behind a type id, if it is a struct.
    pub fn struct_info(&self, id: TypeId) -> Option<&StructInfo<'base>> {
        match self.types.get(id.0) {
            Some(TypeDescriptor::Struct(info)) => Some(info),
            _ => None,
        }
    }

    /// All struct types in declaration order.
    pub fn structs(&self) -> impl Iterator<Item = (TypeId, &StructInfo<'base>)> {
        self.types
            .iter()
            .enumerate()
            .filter_map(|(index, descriptor)| match descriptor {
                TypeDescriptor::Struct(info) => Some((TypeId(index), info)),
                _ => None,
            })
    }

    /// Whether the id denotes an array type.
    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.types.get(id.0), Some(TypeDescriptor::Array(_)))
    }

    /// Element type of an array type.
    pub fn element_type(&self, id: TypeId) -> Option<TypeId> {
        match self.types.get(id.0) {
            Some(TypeDescriptor::Array(element)) => Some(*element),
            _ => None,
        }
    }

    /// For arrays, the element type; otherwise the type itself.
    pub fn base_type(&self, id: TypeId) -> TypeId {
        self.element_type(id).unwrap_or(id)
    }

    /// Whether the id denotes a reference type (array, string or struct).
    pub fn is_reference(&self, id: TypeId) -> bool {
        match self.types.get(id.0) {
            Some(TypeDescriptor::Array(_)) | Some(TypeDescriptor::Struct(_)) => true,
            Some(TypeDescriptor::Primitive(PrimitiveType::Str)) => true,
            _ => false,
        }
    }

    /// Whether the id denotes `i32` or `f32`.
    pub fn is_numeric(&self, id: TypeId) -> bool {
        id == self.primitive(PrimitiveType::I32) || id == self.primitive(PrimitiveType::F32)
    }

    /// Whether a value of `found` can be used where `expected` is required:
    /// equal ids, or `null` flowing into a reference type.
    pub fn assignable(&self, expected: TypeId, found: TypeId) -> bool {
        if expected == found {
            return true;
        }
        found == self.primitive(PrimitiveType::Null) && self.is_reference(expected)
    }

    /// Readable name of a type.
    pub fn to_string(&self, id: TypeId) -> String {
        if id == TypeId::UNDEFINED {
            return "<undefined>".to_string();
        }
        match self.types.get(id.0) {
            Some(TypeDescriptor::Primitive(primitive)) => primitive.to_string(),
            Some(TypeDescriptor::Array(element)) => format!("[{}]", self.to_string(*element)),
            Some(TypeDescriptor::Struct(info)) => info.name.to_string(),
            None => format!("<invalid:{}>", id.0),
        }
    }

    /// Resolves a source-level type expression to a type id.
    pub fn resolve_type_ast(
        &mut self,
        env: &SemaEnv<'base>,
        ty: &TypeAst<'base>,
        scope: ScopeId,
    ) -> Result<TypeId, CompileError> {
        let base = match ty.name.text() {
            "i32" => self.primitive(PrimitiveType::I32),
            "f32" => self.primitive(PrimitiveType::F32),
            "str" => self.primitive(PrimitiveType::Str),
            "void" => self.primitive(PrimitiveType::Void),
            _ => {
                let name = ty.qualified_name();
                let symbol = env
                    .lookup(&name, SymbolKind::Type, scope)
                    .ok_or_else(|| {
                        CompileError::unresolved_name(
                            name.clone(),
                            &(&ty.name.span).into(),
                            env.similar_names(ty.name.text()),
                        )
                    })?;
                *env.symbol_types.get(&symbol).ok_or_else(|| {
                    CompileError::internal(
                        "typing",
                        format!("Type symbol '{name}' has no registered type id."),
                    )
                })?
            }
        };

        if ty.array {
            Ok(self.array_of(base))
        } else {
            Ok(base)
        }
    }

    /// Resolves a descriptor-level type (from a module header) to a type id.
    pub fn resolve_variable_type(
        &mut self,
        env: &SemaEnv<'base>,
        module_name: &str,
        ty: &VariableType,
        span: &SpanInfo,
    ) -> Result<TypeId, CompileError> {
        let base = match ty.base.as_str() {
            "i32" => self.primitive(PrimitiveType::I32),
            "f32" => self.primitive(PrimitiveType::F32),
            "str" => self.primitive(PrimitiveType::Str),
            "void" => self.primitive(PrimitiveType::Void),
            name => {
                let qualified = format!("{module_name}::{name}");
                match self
                    .struct_by_name(&qualified)
                    .or_else(|| self.struct_by_name(name))
                {
                    Some(id) => id,
                    None => {
                        return Err(CompileError::unresolved_name(
                            qualified,
                            span,
                            env.similar_names(name),
                        ))
                    }
                }
            }
        };

        if ty.array {
            Ok(self.array_of(base))
        } else {
            Ok(base)
        }
    }
}

/// Declaration phase: registers all struct names (local definitions and
/// imported descriptors) without their bodies.
pub fn declare_types<'base>(
    env: &mut SemaEnv<'base>,
    types: &mut TypeContext<'base>,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    // Locally defined structs.
    for item in items {
        let node = look_through_directives(item);
        if let ExpressionKind::StructDefinition(def) = &node.kind {
            let symbol = bound_symbol(env, node)?;
            let qualified = env.symbol(symbol).qualified_name.to_string();
            let id = types.declare_struct(qualified, def.name.span.text.clone(), symbol);
            env.symbol_types.insert(symbol, id);
        }
    }

    // Imported structs.
    let imported: Vec<(SymbolId, String)> = env
        .symbols
        .iter()
        .enumerate()
        .filter(|(_, info)| {
            info.kind == SymbolKind::Type && matches!(info.reference, Some(SymbolReference::Export(_)))
        })
        .map(|(index, info)| (SymbolId(index), info.qualified_name.to_string()))
        .collect();
    for (symbol, qualified) in imported {
        let name = env.symbol(symbol).name.to_string();
        let id = types.declare_struct(qualified, Cow::Owned(name), symbol);
        env.symbol_types.insert(symbol, id);
    }

    Ok(())
}

/// Definition phase: fills in struct bodies, local and imported.
pub fn define_types<'base>(
    env: &mut SemaEnv<'base>,
    types: &mut TypeContext<'base>,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    use crate::sema::attribute::AttributeKind;

    for item in items {
        let node = look_through_directives(item);
        if let ExpressionKind::StructDefinition(def) = &node.kind {
            let symbol = bound_symbol(env, node)?;
            let id = env.symbol_types[&symbol];
            let scope = node_scope(env, node)?;

            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                let field_type = types.resolve_type_ast(env, &field.ty, scope)?;
                fields.push(StructField {
                    name: field.name.span.text.clone(),
                    ty: field_type,
                });
            }

            let allow_cast = env.has_attribute(symbol, AttributeKind::AllowCast);
            let native = env.has_attribute(symbol, AttributeKind::Native);
            types.define_struct(id, fields, allow_cast, native)?;
        }
    }

    // Imported structs: fields come from the module header descriptor.
    let imported: Vec<SymbolId> = env
        .symbols
        .iter()
        .enumerate()
        .filter(|(_, info)| {
            info.kind == SymbolKind::Type && matches!(info.reference, Some(SymbolReference::Export(_)))
        })
        .map(|(index, _)| SymbolId(index))
        .collect();
    for symbol in imported {
        let (desc, module_name, span) = {
            let info = env.symbol(symbol);
            let Some(SymbolReference::Export(entry)) = &info.reference else {
                continue;
            };
            let ExportDescriptor::Struct(desc) = &entry.desc else {
                continue;
            };
            let module_name = info
                .qualified_name
                .rsplit_once("::")
                .map(|(module, _)| module.to_string())
                .unwrap_or_default();
            (desc.clone(), module_name, info.span.clone())
        };

        let id = env.symbol_types[&symbol];
        let mut fields = Vec::with_capacity(desc.fields.len());
        for (name, ty) in &desc.fields {
            let field_type = types.resolve_variable_type(env, &module_name, ty, &span)?;
            fields.push(StructField {
                name: Cow::Owned(name.clone()),
                ty: field_type,
            });
        }
        types.define_struct(
            id,
            fields,
            desc.flags & module::struct_flags::ALLOW_CAST != 0,
            desc.flags & module::struct_flags::NATIVE != 0,
        )?;
    }

    Ok(())
}

/// Function declaration phase: registers prototype signatures (local
/// functions, native prototypes, and imported functions) without checking
/// bodies. Parameter symbols get their types bound here.
pub fn declare_functions<'base>(
    env: &mut SemaEnv<'base>,
    types: &mut TypeContext<'base>,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    for item in items {
        let node = look_through_directives(item);
        let (name_token, parameters, return_type) = match &node.kind {
            ExpressionKind::Function(func) => (&func.name, &func.parameters, &func.return_type),
            ExpressionKind::Prototype(proto) => {
                (&proto.name, &proto.parameters, &proto.return_type)
            }
            _ => continue,
        };

        let symbol = bound_symbol(env, node)?;
        let scope = node_scope(env, node)?;

        let return_id = types.resolve_type_ast(env, return_type, scope)?;
        let mut parameter_ids = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let id = types.resolve_type_ast(env, &parameter.ty, scope)?;
            parameter_ids.push(id);

            // Parameters were declared in the function scope during
            // collection; bind their types now.
            let function_scope = function_scope_of(env, symbol, name_token.text())?;
            if let Some(param_symbol) =
                env.lookup(parameter.name.text(), SymbolKind::Variable, function_scope)
            {
                env.symbol_types.insert(param_symbol, id);
            }
        }

        types.function_signatures.insert(
            symbol,
            FunctionSignatureInfo {
                return_type: return_id,
                parameters: parameter_ids,
            },
        );
    }

    // Imported functions: signatures from the module header descriptors.
    let imported: Vec<SymbolId> = env
        .symbols
        .iter()
        .enumerate()
        .filter(|(_, info)| {
            info.kind == SymbolKind::Function
                && matches!(info.reference, Some(SymbolReference::Export(_)))
        })
        .map(|(index, _)| SymbolId(index))
        .collect();
    for symbol in imported {
        let (desc, module_name, span) = {
            let info = env.symbol(symbol);
            let Some(SymbolReference::Export(entry)) = &info.reference else {
                continue;
            };
            let ExportDescriptor::Function(desc) = &entry.desc else {
                continue;
            };
            let module_name = info
                .qualified_name
                .rsplit_once("::")
                .map(|(module, _)| module.to_string())
                .unwrap_or_default();
            (desc.clone(), module_name, info.span.clone())
        };

        let return_type =
            types.resolve_variable_type(env, &module_name, &desc.signature.return_type, &span)?;
        let mut parameters = Vec::with_capacity(desc.signature.arg_types.len());
        for arg in &desc.signature.arg_types {
            parameters.push(types.resolve_variable_type(env, &module_name, arg, &span)?);
        }
        types.function_signatures.insert(
            symbol,
            FunctionSignatureInfo {
                return_type,
                parameters,
            },
        );
    }

    Ok(())
}

/// Looks through directive wrappers to the declaration they annotate.
pub fn look_through_directives<'ast, 'base>(
    node: &'ast ExpressionAst<'base>,
) -> &'ast ExpressionAst<'base> {
    let mut current = node;
    while let ExpressionKind::Directive(directive) = &current.kind {
        current = directive.inner.as_ref();
    }
    current
}

fn bound_symbol(env: &SemaEnv<'_>, node: &ExpressionAst<'_>) -> Result<SymbolId, CompileError> {
    env.node_symbols.get(&node.index).copied().ok_or_else(|| {
        CompileError::internal("typing", "Declaration node has no bound symbol.")
    })
}

fn node_scope(env: &SemaEnv<'_>, node: &ExpressionAst<'_>) -> Result<ScopeId, CompileError> {
    env.node_scopes.get(&node.index).copied().ok_or_else(|| {
        CompileError::internal("typing", "Node has no recorded scope.")
    })
}

/// Finds the scope a function's parameters were declared in: the named
/// scope created for the function during collection.
pub(crate) fn function_scope_of(
    env: &SemaEnv<'_>,
    symbol: SymbolId,
    name: &str,
) -> Result<ScopeId, CompileError> {
    let declaring = env.symbol(symbol).scope;
    env.scopes
        .iter()
        .enumerate()
        .find(|(_, scope)| scope.parent == declaring && scope.name == name)
        .map(|(index, _)| ScopeId(index))
        .ok_or_else(|| {
            CompileError::internal("typing", format!("Function scope for '{name}' not found."))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_preoccupy_low_ids() {
        let types = TypeContext::new();
        assert_eq!(types.primitive(PrimitiveType::I32), TypeId(0));
        assert_eq!(types.primitive(PrimitiveType::F32), TypeId(1));
        assert_eq!(types.primitive(PrimitiveType::Str), TypeId(2));
        assert_eq!(types.primitive(PrimitiveType::Void), TypeId(3));
        assert_eq!(types.primitive(PrimitiveType::Null), TypeId(4));
    }

    #[test]
    fn array_types_are_interned() {
        let mut types = TypeContext::new();
        let i32_id = types.primitive(PrimitiveType::I32);
        let first = types.array_of(i32_id);
        let second = types.array_of(i32_id);
        assert_eq!(first, second);
        assert_eq!(types.element_type(first), Some(i32_id));
    }

    #[test]
    fn null_is_assignable_to_references_only() {
        let mut types = TypeContext::new();
        let null = types.primitive(PrimitiveType::Null);
        let i32_id = types.primitive(PrimitiveType::I32);
        let str_id = types.primitive(PrimitiveType::Str);
        let array = types.array_of(i32_id);

        assert!(types.assignable(str_id, null));
        assert!(types.assignable(array, null));
        assert!(!types.assignable(i32_id, null));
    }

    #[test]
    fn struct_declares_before_it_defines() {
        let mut types = TypeContext::new();
        let id = types.declare_struct("S".to_string(), "S".into(), SymbolId(0));
        assert!(types.struct_info(id).is_some());
        assert!(!types.struct_info(id).unwrap().defined);

        let i32_id = types.primitive(PrimitiveType::I32);
        types
            .define_struct(
                id,
                vec![
                    StructField {
                        name: "i".into(),
                        ty: i32_id,
                    },
                    StructField { name: "next".into(), ty: id },
                ],
                false,
                false,
            )
            .unwrap();

        let info = types.struct_info(id).unwrap();
        assert!(info.defined);
        assert_eq!(info.field("next"), Some((1, id)));
        assert_eq!(types.to_string(id), "S");
    }
}
