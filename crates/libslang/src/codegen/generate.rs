//! AST lowering to the typed stack IR.
//!
//! Every node generates under a [`MemoryContext`]: `Load` leaves the node's
//! value on the stack, `Store` consumes a value into the node's storage
//! location, `None` is statement position. Binary operators split into the
//! documented cases: pure compute, assign-to-variable, assign-to-array-
//! element, assign-to-struct-field, and their compound counterparts.
//! Expressions whose value was folded by constant evaluation emit a single
//! `const` at every use site instead of their subtree.

use log::trace;

use crate::{
    ast::{
        BinaryAst, BinaryOperator, ExpressionAst, ExpressionKind, PostfixOperator, UnaryOperator,
    },
    consteval::{ConstEnv, ConstInfo, ConstValue},
    error::CompileError,
    sema::{attribute::AttributeKind, SemaEnv, SymbolId, SymbolKind},
    typing::{self, PrimitiveType, TypeContext, TypeId},
};

use super::{
    CodegenContext, Function, FunctionFrame, Instruction, InstructionArg, MemoryContext,
    OperandType, TypeCastKind,
};

/// Lowers all functions of a compilation unit.
pub fn generate_code<'base>(
    env: &SemaEnv<'base>,
    types: &TypeContext<'base>,
    consts: &ConstEnv,
    items: &[ExpressionAst<'base>],
) -> Result<CodegenContext<'base>, CompileError> {
    let mut ctx = CodegenContext::new();

    for item in items {
        let node = typing::look_through_directives(item);
        match &node.kind {
            ExpressionKind::Function(func) => {
                let symbol = bound_symbol(env, node)?;
                let mut generator = Generator::new(env, types, consts, &mut ctx);
                generator.generate_function(func, symbol)?;
            }
            ExpressionKind::Prototype(proto) => {
                let symbol = bound_symbol(env, node)?;
                let Some(attribute) = env.attribute(symbol, AttributeKind::Native) else {
                    return Err(CompileError::type_mismatch(
                        "function body".to_string(),
                        "missing body (only native functions may omit the body)".to_string(),
                        &(&proto.name.span).into(),
                    ));
                };
                let library = attribute.arg_value("lib").unwrap_or_default().to_string();

                let signature = types.function_signatures.get(&symbol).ok_or_else(|| {
                    CompileError::internal("codegen", "Prototype has no declared signature.")
                })?;
                ctx.funcs.push(Function {
                    name: proto.name.text().to_string(),
                    symbol,
                    return_type: signature.return_type,
                    arg_types: signature.parameters.clone(),
                    frame: FunctionFrame::new(),
                    blocks: Vec::new(),
                    native: Some(library),
                });
            }
            _ => {}
        }
    }

    Ok(ctx)
}

fn bound_symbol(env: &SemaEnv<'_>, node: &ExpressionAst<'_>) -> Result<SymbolId, CompileError> {
    env.node_symbols.get(&node.index).copied().ok_or_else(|| {
        CompileError::internal("codegen", "Declaration node has no bound symbol.")
    })
}

struct Generator<'a, 'base> {
    env: &'a SemaEnv<'base>,
    types: &'a TypeContext<'base>,
    consts: &'a ConstEnv,
    ctx: &'a mut CodegenContext<'base>,
    function: Function<'base>,
    current_block: usize,
    /// `(break target, continue target)` per enclosing loop.
    loop_stack: Vec<(String, String)>,
}

impl<'a, 'base> Generator<'a, 'base> {
    fn new(
        env: &'a SemaEnv<'base>,
        types: &'a TypeContext<'base>,
        consts: &'a ConstEnv,
        ctx: &'a mut CodegenContext<'base>,
    ) -> Self {
        Self {
            env,
            types,
            consts,
            ctx,
            function: Function {
                name: String::new(),
                symbol: SymbolId::UNDEFINED,
                return_type: TypeId::UNDEFINED,
                arg_types: Vec::new(),
                frame: FunctionFrame::new(),
                blocks: Vec::new(),
                native: None,
            },
            current_block: 0,
            loop_stack: Vec::new(),
        }
    }

    fn generate_function(
        &mut self,
        func: &crate::ast::FunctionAst<'base>,
        symbol: SymbolId,
    ) -> Result<(), CompileError> {
        trace!("generating function '{}'", func.name.text());

        let signature = self.types.function_signatures.get(&symbol).ok_or_else(|| {
            CompileError::internal("codegen", "Function has no declared signature.")
        })?;
        self.function.name = func.name.text().to_string();
        self.function.symbol = symbol;
        self.function.return_type = signature.return_type;
        self.function.arg_types = signature.parameters.clone();

        // Local slot table: parameters first, then locals in declaration
        // order.
        let function_scope = typing::function_scope_of(self.env, symbol, func.name.text())?;
        for (parameter, ty) in func.parameters.iter().zip(&signature.parameters) {
            let param_symbol = self
                .env
                .lookup(parameter.name.text(), SymbolKind::Variable, function_scope)
                .ok_or_else(|| {
                    CompileError::internal("codegen", "Parameter symbol not found.")
                })?;
            self.function
                .frame
                .add(param_symbol, parameter.name.span.text.clone(), *ty, true);
        }

        let mut locals = Vec::new();
        func.body.visit_nodes(
            &mut |n| {
                if let ExpressionKind::VariableDeclaration(decl) = &n.kind {
                    locals.push((n.index, decl.name.span.text.clone()));
                }
            },
            true,
            false,
            None,
        );
        for (index, name) in locals {
            let local_symbol = self.env.node_symbols.get(&index).copied().ok_or_else(|| {
                CompileError::internal("codegen", "Local declaration has no bound symbol.")
            })?;
            let ty = self
                .env
                .symbol_types
                .get(&local_symbol)
                .copied()
                .ok_or_else(|| {
                    CompileError::internal("codegen", "Local declaration has no bound type.")
                })?;
            self.function.frame.add(local_symbol, name, ty, false);
        }

        self.current_block = self.function.add_block("entry".to_string());
        self.generate(&func.body, MemoryContext::None)?;

        // Epilogue: fall-through is only legal for void functions.
        let last = &self.function.blocks[self.current_block];
        if !last.terminated() && !last.unreachable {
            if self.function.return_type == self.types.primitive(PrimitiveType::Void) {
                self.emit("ret", Some(self.operand(self.function.return_type)), vec![]);
            } else {
                return Err(CompileError::missing_return(
                    self.function.name.clone(),
                    &(&func.name.span).into(),
                ));
            }
        }

        let function = std::mem::replace(
            &mut self.function,
            Function {
                name: String::new(),
                symbol: SymbolId::UNDEFINED,
                return_type: TypeId::UNDEFINED,
                arg_types: Vec::new(),
                frame: FunctionFrame::new(),
                blocks: Vec::new(),
                native: None,
            },
        );
        self.ctx.funcs.push(function);
        Ok(())
    }

    fn emit(
        &mut self,
        name: &'static str,
        ty: Option<OperandType>,
        args: Vec<InstructionArg<'base>>,
    ) {
        self.function.blocks[self.current_block]
            .instructions
            .push(Instruction { name, ty, args });
    }

    fn operand(&self, ty: TypeId) -> OperandType {
        OperandType::of(self.types, ty)
    }

    fn ty_of(&self, node: &ExpressionAst<'base>) -> Result<TypeId, CompileError> {
        self.env.node_types.get(&node.index).copied().ok_or_else(|| {
            CompileError::internal("codegen", "Expression has no recorded type.")
        })
    }

    fn emit_const(&mut self, info: &ConstInfo) {
        match &info.value {
            ConstValue::Int(value) => self.emit(
                "const",
                Some(self.operand(self.types.primitive(PrimitiveType::I32))),
                vec![InstructionArg::ConstInt(*value)],
            ),
            ConstValue::Float(value) => self.emit(
                "const",
                Some(self.operand(self.types.primitive(PrimitiveType::F32))),
                vec![InstructionArg::ConstFloat(*value)],
            ),
            ConstValue::Str(value) => self.emit(
                "const",
                Some(self.operand(self.types.primitive(PrimitiveType::Str))),
                vec![InstructionArg::ConstStr(value.clone())],
            ),
        }
    }

    fn slot_arg(&self, symbol: SymbolId) -> Result<InstructionArg<'base>, CompileError> {
        let info = self.function.frame.slot(symbol).ok_or_else(|| {
            CompileError::internal("codegen", "Variable has no assigned slot.")
        })?;
        let name = self
            .function
            .frame
            .slot_name(symbol)
            .cloned()
            .unwrap_or_default();
        Ok(InstructionArg::Slot {
            name,
            index: info.index,
        })
    }

    fn field_arg(
        &self,
        struct_type: TypeId,
        member: &str,
    ) -> Result<(InstructionArg<'base>, TypeId), CompileError> {
        let info = self.types.struct_info(struct_type).ok_or_else(|| {
            CompileError::internal("codegen", "Field access on a non-struct type.")
        })?;
        let (field_index, field_type) = info.field(member).ok_or_else(|| {
            CompileError::internal("codegen", format!("Unknown field '{member}'."))
        })?;
        Ok((
            InstructionArg::Field {
                struct_type,
                struct_name: info.name.to_string(),
                field_index,
                field_name: member.to_string(),
            },
            field_type,
        ))
    }

    /// Generates one statement of a block.
    fn generate_statement(&mut self, stmt: &ExpressionAst<'base>) -> Result<(), CompileError> {
        match &stmt.kind {
            ExpressionKind::VariableDeclaration(_)
            | ExpressionKind::ConstantDeclaration(_)
            | ExpressionKind::Return(_)
            | ExpressionKind::If(_)
            | ExpressionKind::While(_)
            | ExpressionKind::Break
            | ExpressionKind::Continue
            | ExpressionKind::Block(_)
            | ExpressionKind::Call(_)
            | ExpressionKind::NamespaceAccess(_)
            | ExpressionKind::Binary(_)
            | ExpressionKind::Unary(_)
            | ExpressionKind::Postfix(_)
            | ExpressionKind::Directive(_) => self.generate(stmt, MemoryContext::None),
            ExpressionKind::Literal(_) | ExpressionKind::VariableRef(_) | ExpressionKind::Null => {
                // Value-only statements have no effect.
                Ok(())
            }
            _ => {
                // A value-producing expression in statement position:
                // evaluate for side effects and discard the value.
                self.generate(stmt, MemoryContext::Load)?;
                let ty = self.ty_of(stmt)?;
                self.emit("pop", Some(self.operand(ty)), vec![]);
                Ok(())
            }
        }
    }

    fn generate(
        &mut self,
        node: &ExpressionAst<'base>,
        mc: MemoryContext,
    ) -> Result<(), CompileError> {
        // Constant folding: a folded expression loads as a single `const`.
        if mc == MemoryContext::Load {
            if let Some(info) = self.consts.value_of(node.index) {
                let info = info.clone();
                self.emit_const(&info);
                return Ok(());
            }
        }

        match &node.kind {
            ExpressionKind::Literal(token) => {
                // Usually served by the constant cache above; inside
                // `disable(const_eval)` subtrees the cache is empty and the
                // token value is emitted directly.
                if mc == MemoryContext::Load {
                    match &token.value {
                        Some(crate::ast::LiteralValue::Int(value)) => {
                            self.emit_const(&ConstInfo::int(*value))
                        }
                        Some(crate::ast::LiteralValue::Float(value)) => {
                            self.emit_const(&ConstInfo::float(*value))
                        }
                        Some(crate::ast::LiteralValue::Str(value)) => {
                            self.emit_const(&ConstInfo::str(value.clone()))
                        }
                        None => {
                            return Err(CompileError::internal(
                                "codegen",
                                "Literal token has no decoded value.",
                            ))
                        }
                    }
                }
                Ok(())
            }
            ExpressionKind::Null => {
                if mc == MemoryContext::Load {
                    self.emit("const_null", None, vec![]);
                }
                Ok(())
            }
            ExpressionKind::VariableRef(_) => {
                let symbol = bound_symbol(self.env, node)?;
                match mc {
                    MemoryContext::Load => {
                        let ty = self.ty_of(node)?;
                        let slot = self.slot_arg(symbol)?;
                        self.emit("load", Some(self.operand(ty)), vec![slot]);
                        Ok(())
                    }
                    MemoryContext::Store => {
                        if self.env.symbol(symbol).kind == SymbolKind::Constant {
                            return Err(CompileError::internal(
                                "codegen",
                                "Store into a constant.",
                            ));
                        }
                        let ty = self.ty_of(node)?;
                        let slot = self.slot_arg(symbol)?;
                        self.emit("store", Some(self.operand(ty)), vec![slot]);
                        Ok(())
                    }
                    MemoryContext::None => Ok(()),
                }
            }
            ExpressionKind::Block(statements) => {
                for statement in statements {
                    self.generate_statement(statement)?;
                }
                Ok(())
            }
            ExpressionKind::Binary(binary) => self.generate_binary(node, binary, mc),
            ExpressionKind::Unary(unary) => self.generate_unary(node, unary, mc),
            ExpressionKind::Postfix(postfix) => self.generate_postfix(node, postfix, mc),
            ExpressionKind::TypeCast(cast) => {
                self.generate(&cast.expr, MemoryContext::Load)?;
                let source = self.ty_of(&cast.expr)?;
                let target = self.ty_of(node)?;

                let i32_id = self.types.primitive(PrimitiveType::I32);
                let f32_id = self.types.primitive(PrimitiveType::F32);
                if source == target {
                    // Identity casts generate nothing.
                } else if source == i32_id && target == f32_id {
                    self.emit("cast", None, vec![InstructionArg::Cast(TypeCastKind::I32ToF32)]);
                } else if source == f32_id && target == i32_id {
                    self.emit("cast", None, vec![InstructionArg::Cast(TypeCastKind::F32ToI32)]);
                } else {
                    // Struct casts are verified at runtime.
                    self.emit(
                        "checkcast",
                        None,
                        vec![InstructionArg::TypeRef {
                            id: target,
                            name: self.types.to_string(target),
                        }],
                    );
                }

                if mc == MemoryContext::None {
                    self.emit("pop", Some(self.operand(target)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::Subscript(subscript) => {
                self.generate(&subscript.object, MemoryContext::Load)?;
                self.generate(&subscript.subscript, MemoryContext::Load)?;
                let element = self.ty_of(node)?;
                self.emit("load_element", Some(self.operand(element)), vec![]);
                if mc == MemoryContext::None {
                    self.emit("pop", Some(self.operand(element)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::Access(access) => {
                self.generate(&access.object, MemoryContext::Load)?;
                let object = self.ty_of(&access.object)?;
                if self.types.is_array(object) {
                    self.emit("arraylength", None, vec![]);
                } else {
                    let (field, _) = self.field_arg(object, access.member.text())?;
                    self.emit("get_field", None, vec![field]);
                }
                if mc == MemoryContext::None {
                    let ty = self.ty_of(node)?;
                    self.emit("pop", Some(self.operand(ty)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::NamespaceAccess(access) => self.generate(&access.inner, mc),
            ExpressionKind::Call(call) => {
                for arg in &call.args {
                    self.generate(arg, MemoryContext::Load)?;
                }
                let symbol = bound_symbol(self.env, node)?;
                let name = self.env.symbol(symbol).qualified_name.to_string();
                self.emit(
                    "invoke",
                    None,
                    vec![InstructionArg::FunctionRef { symbol, name }],
                );

                let return_type = self.ty_of(node)?;
                if mc == MemoryContext::None
                    && return_type != self.types.primitive(PrimitiveType::Void)
                {
                    self.emit("pop", Some(self.operand(return_type)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::ArrayInitializer(values) => {
                let array = self.ty_of(node)?;
                let element = self.types.element_type(array).ok_or_else(|| {
                    CompileError::internal("codegen", "Array initializer without array type.")
                })?;

                self.emit(
                    "const",
                    Some(self.operand(self.types.primitive(PrimitiveType::I32))),
                    vec![InstructionArg::ConstInt(values.len() as i32)],
                );
                self.emit_new_array(element)?;

                for (index, value) in values.iter().enumerate() {
                    self.emit("dup", Some(self.operand(array)), vec![]);
                    self.emit(
                        "const",
                        Some(self.operand(self.types.primitive(PrimitiveType::I32))),
                        vec![InstructionArg::ConstInt(index as i32)],
                    );
                    self.generate(value, MemoryContext::Load)?;
                    self.emit("store_element", Some(self.operand(element)), vec![]);
                }

                if mc == MemoryContext::None {
                    self.emit("pop", Some(self.operand(array)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::New(new) => {
                self.generate(&new.length, MemoryContext::Load)?;
                let array = self.ty_of(node)?;
                let element = self.types.element_type(array).ok_or_else(|| {
                    CompileError::internal("codegen", "New-array without array type.")
                })?;
                self.emit_new_array(element)?;
                if mc == MemoryContext::None {
                    self.emit("pop", Some(self.operand(array)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::NamedInitializer(init) => {
                let struct_type = self.ty_of(node)?;
                self.emit(
                    "new",
                    None,
                    vec![InstructionArg::TypeRef {
                        id: struct_type,
                        name: self.types.to_string(struct_type),
                    }],
                );
                for (name, value) in &init.fields {
                    self.emit("dup", Some(self.operand(struct_type)), vec![]);
                    self.generate(value, MemoryContext::Load)?;
                    let (field, _) = self.field_arg(struct_type, name.text())?;
                    self.emit("set_field", None, vec![field]);
                }
                if mc == MemoryContext::None {
                    self.emit("pop", Some(self.operand(struct_type)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::AnonymousInitializer(init) => {
                let struct_type = self.ty_of(node)?;
                let fields: Vec<String> = self
                    .types
                    .struct_info(struct_type)
                    .map(|info| info.fields.iter().map(|f| f.name.to_string()).collect())
                    .unwrap_or_default();

                self.emit(
                    "new",
                    None,
                    vec![InstructionArg::TypeRef {
                        id: struct_type,
                        name: self.types.to_string(struct_type),
                    }],
                );
                for (value, field_name) in init.values.iter().zip(fields) {
                    self.emit("dup", Some(self.operand(struct_type)), vec![]);
                    self.generate(value, MemoryContext::Load)?;
                    let (field, _) = self.field_arg(struct_type, &field_name)?;
                    self.emit("set_field", None, vec![field]);
                }
                if mc == MemoryContext::None {
                    self.emit("pop", Some(self.operand(struct_type)), vec![]);
                }
                Ok(())
            }
            ExpressionKind::VariableDeclaration(decl) => {
                self.generate(&decl.value, MemoryContext::Load)?;
                let symbol = bound_symbol(self.env, node)?;
                let ty = self.env.symbol_types.get(&symbol).copied().ok_or_else(|| {
                    CompileError::internal("codegen", "Local declaration has no bound type.")
                })?;
                let slot = self.slot_arg(symbol)?;
                self.emit("store", Some(self.operand(ty)), vec![slot]);
                Ok(())
            }
            // Constants are folded at every use site; the declaration
            // itself generates nothing.
            ExpressionKind::ConstantDeclaration(_) => Ok(()),
            ExpressionKind::Return(value) => {
                match value {
                    Some(value) => {
                        self.generate(value, MemoryContext::Load)?;
                        self.emit("ret", Some(self.operand(self.function.return_type)), vec![]);
                    }
                    None => {
                        self.emit(
                            "ret",
                            Some(self.operand(self.types.primitive(PrimitiveType::Void))),
                            vec![],
                        );
                    }
                }
                Ok(())
            }
            ExpressionKind::If(if_ast) => {
                let then_label = self.ctx.generate_label("if_then");
                let merge_label = self.ctx.generate_label("if_merge");
                let else_label = match &if_ast.else_block {
                    Some(_) => self.ctx.generate_label("if_else"),
                    None => merge_label.clone(),
                };

                self.generate(&if_ast.condition, MemoryContext::Load)?;
                self.emit(
                    "jnz",
                    None,
                    vec![
                        InstructionArg::Label(then_label.clone()),
                        InstructionArg::Label(else_label.clone()),
                    ],
                );

                self.current_block = self.function.add_block(then_label);
                self.generate(&if_ast.then_block, MemoryContext::None)?;
                let then_returns = self.arm_returns();
                if !self.function.blocks[self.current_block].terminated() {
                    self.emit("jmp", None, vec![InstructionArg::Label(merge_label.clone())]);
                }

                let else_returns = match &if_ast.else_block {
                    Some(else_block) => {
                        self.current_block = self.function.add_block(else_label);
                        self.generate(else_block, MemoryContext::None)?;
                        let returns = self.arm_returns();
                        if !self.function.blocks[self.current_block].terminated() {
                            self.emit(
                                "jmp",
                                None,
                                vec![InstructionArg::Label(merge_label.clone())],
                            );
                        }
                        returns
                    }
                    None => false,
                };

                self.current_block = self.function.add_block(merge_label);
                // The merge block is dead iff both arms returned.
                if then_returns && else_returns {
                    self.function.blocks[self.current_block].unreachable = true;
                }
                Ok(())
            }
            ExpressionKind::While(while_ast) => {
                let header_label = self.ctx.generate_label("while_header");
                let body_label = self.ctx.generate_label("while_body");
                let exit_label = self.ctx.generate_label("while_exit");

                self.emit("jmp", None, vec![InstructionArg::Label(header_label.clone())]);

                self.current_block = self.function.add_block(header_label.clone());
                self.generate(&while_ast.condition, MemoryContext::Load)?;
                self.emit(
                    "jnz",
                    None,
                    vec![
                        InstructionArg::Label(body_label.clone()),
                        InstructionArg::Label(exit_label.clone()),
                    ],
                );

                self.current_block = self.function.add_block(body_label);
                self.loop_stack
                    .push((exit_label.clone(), header_label.clone()));
                self.generate(&while_ast.body, MemoryContext::None)?;
                self.loop_stack.pop();
                if !self.function.blocks[self.current_block].terminated() {
                    self.emit("jmp", None, vec![InstructionArg::Label(header_label)]);
                }

                self.current_block = self.function.add_block(exit_label);
                Ok(())
            }
            ExpressionKind::Break => {
                let Some((break_label, _)) = self.loop_stack.last().cloned() else {
                    return Err(CompileError::outside_loop("break", &(&node.span).into()));
                };
                self.emit("jmp", None, vec![InstructionArg::Label(break_label)]);
                Ok(())
            }
            ExpressionKind::Continue => {
                let Some((_, continue_label)) = self.loop_stack.last().cloned() else {
                    return Err(CompileError::outside_loop("continue", &(&node.span).into()));
                };
                self.emit("jmp", None, vec![InstructionArg::Label(continue_label)]);
                Ok(())
            }
            ExpressionKind::Directive(directive) => self.generate(&directive.inner, mc),
            ExpressionKind::StructDefinition(_)
            | ExpressionKind::Import(_)
            | ExpressionKind::MacroDefinition(_)
            | ExpressionKind::Prototype(_)
            | ExpressionKind::Function(_) => Ok(()),
            ExpressionKind::MacroInvocation(_)
            | ExpressionKind::MacroExpressionList(_)
            | ExpressionKind::MacroBranch(_) => Err(CompileError::internal(
                "codegen",
                "Non-expanded macro reached code generation.",
            )),
        }
    }

    /// Whether the just-generated arm ends in a return (directly or through
    /// an unreachable merge).
    fn arm_returns(&self) -> bool {
        let block = &self.function.blocks[self.current_block];
        block.ends_with_return() || block.unreachable
    }

    fn emit_new_array(&mut self, element: TypeId) -> Result<(), CompileError> {
        if self.types.struct_info(element).is_some() {
            self.emit(
                "anewarray",
                None,
                vec![InstructionArg::TypeRef {
                    id: element,
                    name: self.types.to_string(element),
                }],
            );
        } else {
            self.emit("newarray", Some(self.operand(element)), vec![]);
        }
        Ok(())
    }

    /// The seven binary-operator shapes: pure compute, assignment and
    /// compound assignment against a variable, an array element or a struct
    /// field.
    fn generate_binary(
        &mut self,
        node: &ExpressionAst<'base>,
        binary: &BinaryAst<'base>,
        mc: MemoryContext,
    ) -> Result<(), CompileError> {
        if binary.op == BinaryOperator::Assign {
            return self.generate_assignment(binary, mc, None);
        }
        if let Some(compute) = binary.op.compound_operator() {
            return self.generate_assignment(binary, mc, Some(compute));
        }

        // Pure compute.
        self.generate(&binary.lhs, MemoryContext::Load)?;
        self.generate(&binary.rhs, MemoryContext::Load)?;
        let operand = self.ty_of(&binary.lhs)?;
        self.emit_compute(binary.op, operand)?;

        if mc == MemoryContext::None {
            let ty = self.ty_of(node)?;
            self.emit("pop", Some(self.operand(ty)), vec![]);
        }
        Ok(())
    }

    /// Assignment shapes. `compute` is the underlying operator of a
    /// compound assignment (`x ∘= y` materializes as evaluate x, evaluate
    /// y, compute, store to x).
    fn generate_assignment(
        &mut self,
        binary: &BinaryAst<'base>,
        mc: MemoryContext,
        compute: Option<BinaryOperator>,
    ) -> Result<(), CompileError> {
        let value_ty = self.ty_of(&binary.lhs)?;

        match &binary.lhs.kind {
            ExpressionKind::VariableRef(_) => {
                if let Some(op) = compute {
                    self.generate(&binary.lhs, MemoryContext::Load)?;
                    self.generate(&binary.rhs, MemoryContext::Load)?;
                    self.emit_compute(op, value_ty)?;
                } else {
                    self.generate(&binary.rhs, MemoryContext::Load)?;
                }
                if mc == MemoryContext::Load {
                    // Chained assignment keeps the value on the stack.
                    self.emit("dup", Some(self.operand(value_ty)), vec![]);
                }
                self.generate(&binary.lhs, MemoryContext::Store)
            }
            ExpressionKind::Subscript(subscript) => {
                let object_ty = self.ty_of(&subscript.object)?;
                let index_ty = self.ty_of(&subscript.subscript)?;

                self.generate(&subscript.object, MemoryContext::Load)?;
                self.generate(&subscript.subscript, MemoryContext::Load)?;
                if let Some(op) = compute {
                    self.generate(&subscript.object, MemoryContext::Load)?;
                    self.generate(&subscript.subscript, MemoryContext::Load)?;
                    self.emit("load_element", Some(self.operand(value_ty)), vec![]);
                    self.generate(&binary.rhs, MemoryContext::Load)?;
                    self.emit_compute(op, value_ty)?;
                } else {
                    self.generate(&binary.rhs, MemoryContext::Load)?;
                }
                if mc == MemoryContext::Load {
                    self.emit(
                        "dup_x2",
                        Some(self.operand(value_ty)),
                        vec![
                            InstructionArg::TypeRef {
                                id: object_ty,
                                name: self.types.to_string(object_ty),
                            },
                            InstructionArg::TypeRef {
                                id: index_ty,
                                name: self.types.to_string(index_ty),
                            },
                        ],
                    );
                }
                self.emit("store_element", Some(self.operand(value_ty)), vec![]);
                Ok(())
            }
            ExpressionKind::Access(access) => {
                let object_ty = self.ty_of(&access.object)?;
                let (field, field_ty) = self.field_arg(object_ty, access.member.text())?;

                self.generate(&access.object, MemoryContext::Load)?;
                if let Some(op) = compute {
                    self.generate(&access.object, MemoryContext::Load)?;
                    self.emit("get_field", None, vec![field.clone()]);
                    self.generate(&binary.rhs, MemoryContext::Load)?;
                    self.emit_compute(op, field_ty)?;
                } else {
                    self.generate(&binary.rhs, MemoryContext::Load)?;
                }
                if mc == MemoryContext::Load {
                    self.emit(
                        "dup_x1",
                        Some(self.operand(field_ty)),
                        vec![InstructionArg::TypeRef {
                            id: object_ty,
                            name: self.types.to_string(object_ty),
                        }],
                    );
                }
                self.emit("set_field", None, vec![field]);
                Ok(())
            }
            _ => Err(CompileError::internal(
                "codegen",
                "Assignment target is not a storage location.",
            )),
        }
    }

    fn emit_compute(&mut self, op: BinaryOperator, operand: TypeId) -> Result<(), CompileError> {
        let name = match op {
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::Div => "div",
            BinaryOperator::Mod => "mod",
            BinaryOperator::BitAnd => "and",
            BinaryOperator::BitOr => "or",
            BinaryOperator::BitXor => "xor",
            BinaryOperator::LogicalAnd => "land",
            BinaryOperator::LogicalOr => "lor",
            BinaryOperator::Shl => "shl",
            BinaryOperator::Shr => "shr",
            BinaryOperator::Less => "cmpl",
            BinaryOperator::LessEqual => "cmple",
            BinaryOperator::Greater => "cmpg",
            BinaryOperator::GreaterEqual => "cmpge",
            BinaryOperator::Equal => "cmpeq",
            BinaryOperator::NotEqual => "cmpne",
            other => {
                return Err(CompileError::internal(
                    "codegen",
                    format!("'{other}' is not a compute operator."),
                ))
            }
        };
        self.emit(name, Some(self.operand(operand)), vec![]);
        Ok(())
    }

    fn generate_unary(
        &mut self,
        node: &ExpressionAst<'base>,
        unary: &crate::ast::UnaryAst<'base>,
        mc: MemoryContext,
    ) -> Result<(), CompileError> {
        let i32_ty = self.types.primitive(PrimitiveType::I32);

        match unary.op {
            UnaryOperator::Plus => self.generate(&unary.operand, mc),
            UnaryOperator::Minus => {
                let ty = self.ty_of(&unary.operand)?;
                if ty == self.types.primitive(PrimitiveType::F32) {
                    self.emit(
                        "const",
                        Some(self.operand(ty)),
                        vec![InstructionArg::ConstFloat(0.0)],
                    );
                } else {
                    self.emit(
                        "const",
                        Some(self.operand(ty)),
                        vec![InstructionArg::ConstInt(0)],
                    );
                }
                self.generate(&unary.operand, MemoryContext::Load)?;
                self.emit("sub", Some(self.operand(ty)), vec![]);
                self.finish_value(node, mc)
            }
            UnaryOperator::Not => {
                self.generate(&unary.operand, MemoryContext::Load)?;
                self.emit(
                    "const",
                    Some(self.operand(i32_ty)),
                    vec![InstructionArg::ConstInt(0)],
                );
                self.emit("cmpeq", Some(self.operand(i32_ty)), vec![]);
                self.finish_value(node, mc)
            }
            UnaryOperator::BitNot => {
                self.generate(&unary.operand, MemoryContext::Load)?;
                self.emit(
                    "const",
                    Some(self.operand(i32_ty)),
                    vec![InstructionArg::ConstInt(-1)],
                );
                self.emit("xor", Some(self.operand(i32_ty)), vec![]);
                self.finish_value(node, mc)
            }
            UnaryOperator::Increment | UnaryOperator::Decrement => {
                // Prefix: increment, leave the new value.
                let op = if unary.op == UnaryOperator::Increment {
                    BinaryOperator::Add
                } else {
                    BinaryOperator::Sub
                };
                self.generate_step(&unary.operand, op, mc, false)
            }
        }
    }

    fn generate_postfix(
        &mut self,
        _node: &ExpressionAst<'base>,
        postfix: &crate::ast::PostfixAst<'base>,
        mc: MemoryContext,
    ) -> Result<(), CompileError> {
        let op = if postfix.op == PostfixOperator::Increment {
            BinaryOperator::Add
        } else {
            BinaryOperator::Sub
        };
        // Postfix: duplicate first, leave the old value.
        self.generate_step(&postfix.operand, op, mc, true)
    }

    /// Shared shape for `++`/`--`: load the target, add or subtract one,
    /// store back. `postfix` selects whether the old or the new value stays
    /// on the stack in load context.
    fn generate_step(
        &mut self,
        target: &ExpressionAst<'base>,
        op: BinaryOperator,
        mc: MemoryContext,
        postfix: bool,
    ) -> Result<(), CompileError> {
        let ty = self.ty_of(target)?;
        let one = if ty == self.types.primitive(PrimitiveType::F32) {
            InstructionArg::ConstFloat(1.0)
        } else {
            InstructionArg::ConstInt(1)
        };

        match &target.kind {
            ExpressionKind::VariableRef(_) => {
                self.generate(target, MemoryContext::Load)?;
                if postfix && mc == MemoryContext::Load {
                    self.emit("dup", Some(self.operand(ty)), vec![]);
                }
                self.emit("const", Some(self.operand(ty)), vec![one]);
                self.emit_compute(op, ty)?;
                if !postfix && mc == MemoryContext::Load {
                    self.emit("dup", Some(self.operand(ty)), vec![]);
                }
                self.generate(target, MemoryContext::Store)
            }
            ExpressionKind::Subscript(subscript) => {
                let object_ty = self.ty_of(&subscript.object)?;
                let index_ty = self.ty_of(&subscript.subscript)?;
                let stack_args = vec![
                    InstructionArg::TypeRef {
                        id: object_ty,
                        name: self.types.to_string(object_ty),
                    },
                    InstructionArg::TypeRef {
                        id: index_ty,
                        name: self.types.to_string(index_ty),
                    },
                ];

                self.generate(&subscript.object, MemoryContext::Load)?;
                self.generate(&subscript.subscript, MemoryContext::Load)?;
                self.generate(&subscript.object, MemoryContext::Load)?;
                self.generate(&subscript.subscript, MemoryContext::Load)?;
                self.emit("load_element", Some(self.operand(ty)), vec![]);
                if postfix && mc == MemoryContext::Load {
                    self.emit("dup_x2", Some(self.operand(ty)), stack_args.clone());
                }
                self.emit("const", Some(self.operand(ty)), vec![one]);
                self.emit_compute(op, ty)?;
                if !postfix && mc == MemoryContext::Load {
                    self.emit("dup_x2", Some(self.operand(ty)), stack_args);
                }
                self.emit("store_element", Some(self.operand(ty)), vec![]);
                Ok(())
            }
            ExpressionKind::Access(access) => {
                let object_ty = self.ty_of(&access.object)?;
                let (field, field_ty) = self.field_arg(object_ty, access.member.text())?;
                let stack_arg = vec![InstructionArg::TypeRef {
                    id: object_ty,
                    name: self.types.to_string(object_ty),
                }];

                self.generate(&access.object, MemoryContext::Load)?;
                self.generate(&access.object, MemoryContext::Load)?;
                self.emit("get_field", None, vec![field.clone()]);
                if postfix && mc == MemoryContext::Load {
                    self.emit("dup_x1", Some(self.operand(field_ty)), stack_arg.clone());
                }
                self.emit("const", Some(self.operand(field_ty)), vec![one]);
                self.emit_compute(op, field_ty)?;
                if !postfix && mc == MemoryContext::Load {
                    self.emit("dup_x1", Some(self.operand(field_ty)), stack_arg);
                }
                self.emit("set_field", None, vec![field]);
                Ok(())
            }
            _ => Err(CompileError::internal(
                "codegen",
                "Increment target is not a storage location.",
            )),
        }
    }

    /// Discards the produced value in statement context.
    fn finish_value(
        &mut self,
        node: &ExpressionAst<'base>,
        mc: MemoryContext,
    ) -> Result<(), CompileError> {
        if mc == MemoryContext::None {
            let ty = self.ty_of(node)?;
            self.emit("pop", Some(self.operand(ty)), vec![]);
        }
        Ok(())
    }
}
