//! Compile-time constant evaluation.
//!
//! An expression is const-eligible iff it is a literal, a reference to a
//! bound constant, a supported unary/binary operator over const-eligible
//! operands, or a primitive cast of a const-eligible operand. Evaluation
//! uses host-side arithmetic with the bytecode's semantics: `i32` wraps to
//! two's complement, shifts mask their count to 5 bits, `!` computes
//! `a == 0` and `~` computes `-1 ^ a` (matching the generated opcodes), and
//! `f32` follows IEEE-754 binary32. Integer division or modulo by zero is a
//! hard compile-time error. Results are cached per AST node.

use indexmap::IndexMap;
use log::trace;

use crate::{
    ast::{
        AstIndex, BinaryOperator, ExpressionAst, ExpressionKind, LiteralValue, UnaryOperator,
    },
    error::CompileError,
    module::ConstantType,
    sema::{attribute::attribute_kind, SemaEnv, SymbolId},
    typing::{PrimitiveType, TypeContext},
};

/// A computed compile-time value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Float(f32),
    Str(String),
}

/// A constant: its type tag plus value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstInfo {
    pub ty: ConstantType,
    pub value: ConstValue,
}

impl ConstInfo {
    pub fn int(value: i32) -> Self {
        Self {
            ty: ConstantType::I32,
            value: ConstValue::Int(value),
        }
    }

    pub fn float(value: f32) -> Self {
        Self {
            ty: ConstantType::F32,
            value: ConstValue::Float(value),
        }
    }

    pub fn str(value: String) -> Self {
        Self {
            ty: ConstantType::Str,
            value: ConstValue::Str(value),
        }
    }
}

/// The constant environment: bound constants plus per-node caches.
#[derive(Debug, Default)]
pub struct ConstEnv {
    /// Values of declared constants, per symbol.
    pub const_info: IndexMap<SymbolId, ConstInfo>,
    /// Whether a node was found const-eligible.
    pub const_eligible: IndexMap<AstIndex, bool>,
    /// Computed values of const-eligible nodes.
    pub const_values: IndexMap<AstIndex, ConstInfo>,
}

impl ConstEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value of a node, if it was folded.
    pub fn value_of(&self, index: AstIndex) -> Option<&ConstInfo> {
        self.const_values.get(&index)
    }

    /// The bound value of a constant symbol.
    pub fn info_of(&self, symbol: SymbolId) -> Option<&ConstInfo> {
        self.const_info.get(&symbol)
    }
}

/// Binds `const` declarations: evaluates every initializer and records the
/// value per symbol. Imported constants were decoded from their module's
/// constant pool by the loader. Runs before type checking so constant
/// references have known values during the later phases.
pub fn bind_constants<'base>(
    env: &mut SemaEnv<'base>,
    types: &TypeContext<'base>,
    consts: &mut ConstEnv,
    loader: &crate::loader::LoaderContext<'_>,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    // Imported constants first: their values come from dependency headers.
    for (symbol, value) in &loader.imported_constants {
        env.symbol_types.insert(*symbol, primitive_of(types, value.ty));
        consts.const_info.insert(*symbol, value.clone());
    }

    // Local constant declarations, in source order.
    let mut declarations = Vec::new();
    for item in items {
        collect_const_declarations(item, &mut declarations);
    }

    for node in declarations {
        let ExpressionKind::ConstantDeclaration(decl) = &node.kind else {
            continue;
        };
        let symbol = env.node_symbols.get(&node.index).copied().ok_or_else(|| {
            CompileError::internal("consteval", "Constant declaration has no bound symbol.")
        })?;

        let mut evaluator = Evaluator { env, consts };
        let value = match evaluator.try_evaluate(&decl.value)? {
            Some(value) => value,
            None => {
                // `disable(const_eval)` still permits trivially foldable
                // literal initializers.
                match literal_through_directives(&decl.value) {
                    Some(value) => value,
                    None => {
                        return Err(CompileError::not_constant(&(&decl.value.span).into()))
                    }
                }
            }
        };

        let declared = decl.ty.name.text();
        let matches = matches!(
            (&value.ty, declared),
            (ConstantType::I32, "i32") | (ConstantType::F32, "f32") | (ConstantType::Str, "str")
        ) && !decl.ty.array;
        if !matches {
            return Err(CompileError::type_mismatch(
                declared.to_string(),
                value.ty.to_string(),
                &(&decl.value.span).into(),
            ));
        }

        // Bind the symbol's type here so references check before the
        // declaration is reached in item order.
        env.symbol_types.insert(symbol, primitive_of(types, value.ty));

        trace!("bound constant '{}' = {value:?}", decl.name.text());
        consts.const_info.insert(symbol, value);
    }

    Ok(())
}

fn primitive_of(types: &TypeContext<'_>, ty: ConstantType) -> crate::typing::TypeId {
    match ty {
        ConstantType::I32 => types.primitive(PrimitiveType::I32),
        ConstantType::F32 => types.primitive(PrimitiveType::F32),
        ConstantType::Str => types.primitive(PrimitiveType::Str),
    }
}

/// Evaluates every const-eligible expression and caches the results per
/// node. Runs after type checking; code generation reads the cache to fold
/// subtrees into `const` instructions.
pub fn evaluate_constants<'base>(
    env: &mut SemaEnv<'base>,
    consts: &mut ConstEnv,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    for item in items {
        let mut evaluator = Evaluator { env, consts };
        evaluator.evaluate_tree(item)?;
    }
    Ok(())
}

fn collect_const_declarations<'ast, 'base>(
    node: &'ast ExpressionAst<'base>,
    out: &mut Vec<&'ast ExpressionAst<'base>>,
) {
    if let ExpressionKind::ConstantDeclaration(_) = &node.kind {
        out.push(node);
    }
    for child in node.children() {
        collect_const_declarations(child, out);
    }
}

/// Unwraps directive nodes down to a literal, for the `disable(const_eval)`
/// literal exemption.
fn literal_through_directives(node: &ExpressionAst<'_>) -> Option<ConstInfo> {
    match &node.kind {
        ExpressionKind::Directive(directive) => literal_through_directives(&directive.inner),
        ExpressionKind::Literal(token) => match &token.value {
            Some(LiteralValue::Int(value)) => Some(ConstInfo::int(*value)),
            Some(LiteralValue::Float(value)) => Some(ConstInfo::float(*value)),
            Some(LiteralValue::Str(value)) => Some(ConstInfo::str(value.clone())),
            None => None,
        },
        _ => None,
    }
}

struct Evaluator<'a, 'base> {
    env: &'a SemaEnv<'base>,
    consts: &'a mut ConstEnv,
}

impl<'base> Evaluator<'_, 'base> {
    /// Evaluates every foldable node in a subtree, caching results. Skips
    /// macro definitions (their bodies fold after expansion) and subtrees
    /// under `disable(const_eval)`.
    fn evaluate_tree(&mut self, node: &ExpressionAst<'base>) -> Result<(), CompileError> {
        if matches!(node.kind, ExpressionKind::MacroDefinition(_)) {
            return Ok(());
        }
        if let ExpressionKind::Directive(directive) = &node.kind {
            if attribute_kind(directive.name.text())
                == Some(crate::sema::attribute::AttributeKind::Disable)
                && directive.args.iter().any(|(key, _)| key.text() == "const_eval")
            {
                return Ok(());
            }
        }

        for child in node.children() {
            self.evaluate_tree(child)?;
        }
        // Casts are not cached at their own position, so a plain `2 as f32`
        // still lowers to a const plus a cast opcode. They evaluate fine
        // when a foldable parent needs their value.
        if !matches!(node.kind, ExpressionKind::TypeCast(_)) {
            self.try_evaluate(node)?;
        }
        Ok(())
    }

    /// Evaluates a node if it is const-eligible.
    ///
    /// Returns `Ok(None)` for ineligible nodes; hard evaluation failures
    /// (division by zero) are errors. Results are cached.
    fn try_evaluate(
        &mut self,
        node: &ExpressionAst<'base>,
    ) -> Result<Option<ConstInfo>, CompileError> {
        if let Some(eligible) = self.consts.const_eligible.get(&node.index) {
            if !eligible {
                return Ok(None);
            }
            if let Some(value) = self.consts.const_values.get(&node.index) {
                return Ok(Some(value.clone()));
            }
        }

        let value = self.evaluate(node)?;
        self.consts.const_eligible.insert(node.index, value.is_some());
        if let Some(value) = &value {
            self.consts.const_values.insert(node.index, value.clone());
        }
        Ok(value)
    }

    fn evaluate(
        &mut self,
        node: &ExpressionAst<'base>,
    ) -> Result<Option<ConstInfo>, CompileError> {
        match &node.kind {
            ExpressionKind::Literal(token) => Ok(match &token.value {
                Some(LiteralValue::Int(value)) => Some(ConstInfo::int(*value)),
                Some(LiteralValue::Float(value)) => Some(ConstInfo::float(*value)),
                Some(LiteralValue::Str(value)) => Some(ConstInfo::str(value.clone())),
                None => None,
            }),
            ExpressionKind::VariableRef(_) => {
                let Some(symbol) = self.env.node_symbols.get(&node.index) else {
                    return Ok(None);
                };
                Ok(self.consts.const_info.get(symbol).cloned())
            }
            ExpressionKind::NamespaceAccess(access) => self.try_evaluate(&access.inner),
            ExpressionKind::Unary(unary) => {
                let Some(operand) = self.try_evaluate(&unary.operand)? else {
                    return Ok(None);
                };
                self.evaluate_unary(unary.op, operand, node)
            }
            ExpressionKind::Binary(binary) => {
                if binary.op.is_assignment() {
                    return Ok(None);
                }
                let Some(lhs) = self.try_evaluate(&binary.lhs)? else {
                    return Ok(None);
                };
                let Some(rhs) = self.try_evaluate(&binary.rhs)? else {
                    return Ok(None);
                };
                self.evaluate_binary(binary.op, lhs, rhs, node)
            }
            ExpressionKind::TypeCast(cast) => {
                let Some(value) = self.try_evaluate(&cast.expr)? else {
                    return Ok(None);
                };
                Ok(match (value, cast.target.name.text(), cast.target.array) {
                    (value @ ConstInfo { ty: ConstantType::I32, .. }, "i32", false) => Some(value),
                    (value @ ConstInfo { ty: ConstantType::F32, .. }, "f32", false) => Some(value),
                    (ConstInfo { value: ConstValue::Int(v), .. }, "f32", false) => {
                        Some(ConstInfo::float(v as f32))
                    }
                    (ConstInfo { value: ConstValue::Float(v), .. }, "i32", false) => {
                        Some(ConstInfo::int(v as i32))
                    }
                    _ => None,
                })
            }
            ExpressionKind::Directive(directive) => {
                // `disable(const_eval)` suppresses folding of the subtree.
                if attribute_kind(directive.name.text())
                    == Some(crate::sema::attribute::AttributeKind::Disable)
                    && directive.args.iter().any(|(key, _)| key.text() == "const_eval")
                {
                    return Ok(None);
                }
                self.try_evaluate(&directive.inner)
            }
            _ => Ok(None),
        }
    }

    fn evaluate_unary(
        &self,
        op: UnaryOperator,
        operand: ConstInfo,
        node: &ExpressionAst<'base>,
    ) -> Result<Option<ConstInfo>, CompileError> {
        let _ = node;
        Ok(match (op, operand.value) {
            (UnaryOperator::Plus, value) => Some(ConstInfo {
                ty: operand.ty,
                value,
            }),
            (UnaryOperator::Minus, ConstValue::Int(a)) => Some(ConstInfo::int(a.wrapping_neg())),
            (UnaryOperator::Minus, ConstValue::Float(a)) => Some(ConstInfo::float(-a)),
            (UnaryOperator::Not, ConstValue::Int(a)) => Some(ConstInfo::int((a == 0) as i32)),
            (UnaryOperator::BitNot, ConstValue::Int(a)) => Some(ConstInfo::int(-1i32 ^ a)),
            _ => None,
        })
    }

    fn evaluate_binary(
        &self,
        op: BinaryOperator,
        lhs: ConstInfo,
        rhs: ConstInfo,
        node: &ExpressionAst<'base>,
    ) -> Result<Option<ConstInfo>, CompileError> {
        use BinaryOperator::*;
        use ConstValue::{Float, Int};

        let result = match (op, lhs.value, rhs.value) {
            (Add, Int(a), Int(b)) => ConstInfo::int(a.wrapping_add(b)),
            (Sub, Int(a), Int(b)) => ConstInfo::int(a.wrapping_sub(b)),
            (Mul, Int(a), Int(b)) => ConstInfo::int(a.wrapping_mul(b)),
            (Div, Int(a), Int(b)) => {
                if b == 0 {
                    return Err(CompileError::divide_by_zero(&(&node.span).into()));
                }
                ConstInfo::int(a.wrapping_div(b))
            }
            (Mod, Int(a), Int(b)) => {
                if b == 0 {
                    return Err(CompileError::divide_by_zero(&(&node.span).into()));
                }
                ConstInfo::int(a.wrapping_rem(b))
            }
            (Add, Float(a), Float(b)) => ConstInfo::float(a + b),
            (Sub, Float(a), Float(b)) => ConstInfo::float(a - b),
            (Mul, Float(a), Float(b)) => ConstInfo::float(a * b),
            (Div, Float(a), Float(b)) => ConstInfo::float(a / b),
            (Shl, Int(a), Int(b)) => ConstInfo::int(a.wrapping_shl((b & 0x1f) as u32)),
            (Shr, Int(a), Int(b)) => ConstInfo::int(a.wrapping_shr((b & 0x1f) as u32)),
            (BitAnd, Int(a), Int(b)) => ConstInfo::int(a & b),
            (BitOr, Int(a), Int(b)) => ConstInfo::int(a | b),
            (BitXor, Int(a), Int(b)) => ConstInfo::int(a ^ b),
            (LogicalAnd, Int(a), Int(b)) => ConstInfo::int((a != 0 && b != 0) as i32),
            (LogicalOr, Int(a), Int(b)) => ConstInfo::int((a != 0 || b != 0) as i32),
            (Less, Int(a), Int(b)) => ConstInfo::int((a < b) as i32),
            (LessEqual, Int(a), Int(b)) => ConstInfo::int((a <= b) as i32),
            (Greater, Int(a), Int(b)) => ConstInfo::int((a > b) as i32),
            (GreaterEqual, Int(a), Int(b)) => ConstInfo::int((a >= b) as i32),
            (Equal, Int(a), Int(b)) => ConstInfo::int((a == b) as i32),
            (NotEqual, Int(a), Int(b)) => ConstInfo::int((a != b) as i32),
            (Less, Float(a), Float(b)) => ConstInfo::int((a < b) as i32),
            (LessEqual, Float(a), Float(b)) => ConstInfo::int((a <= b) as i32),
            (Greater, Float(a), Float(b)) => ConstInfo::int((a > b) as i32),
            (GreaterEqual, Float(a), Float(b)) => ConstInfo::int((a >= b) as i32),
            (Equal, Float(a), Float(b)) => ConstInfo::int((a == b) as i32),
            (NotEqual, Float(a), Float(b)) => ConstInfo::int((a != b) as i32),
            _ => return Ok(None),
        };
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn eval_expr(source: &'static str) -> Result<Option<ConstInfo>, CompileError> {
        let state: &'static crate::nom_tools::State =
            Box::leak(Box::new(crate::nom_tools::State::new(
                crate::file::SourceFile::new(vec!["test".into()], source.to_string()),
            )));
        let file = crate::parser::parse(state).expect("source parses");

        let mut env = SemaEnv::new();
        let span = crate::nom_tools::SpanInfo::new(0..0, state.file.clone());
        let mut collector = crate::sema::collect::Collector::new(&mut env, span).unwrap();
        collector.collect_items(&file.items).unwrap();
        crate::sema::resolve::resolve_names(&mut env, &file.items).unwrap();

        let mut consts = ConstEnv::new();
        let types = TypeContext::new();
        let resolver = crate::loader::MemoryResolver::new();
        let loader = crate::loader::LoaderContext::new(&resolver, "test".to_string());
        bind_constants(&mut env, &types, &mut consts, &loader, &file.items)?;

        // The probe expression is the body of `fn probe`.
        let probe = file
            .items
            .iter()
            .find_map(|item| match &item.kind {
                ExpressionKind::Function(func) => Some(func.body.as_ref()),
                _ => None,
            })
            .expect("probe function");
        let ExpressionKind::Block(statements) = &probe.kind else {
            panic!("function body is a block");
        };
        let ExpressionKind::Return(Some(expr)) = &statements[0].kind else {
            panic!("probe returns an expression");
        };

        let mut evaluator = Evaluator {
            env: &env,
            consts: &mut consts,
        };
        evaluator.try_evaluate(expr)
    }

    #[rstest]
    #[case("1 + 2", 3)]
    #[case("2147483647 + 1", i32::MIN)] // two's-complement wrap
    #[case("7 % 3", 1)]
    #[case("1 << 33", 2)] // shift amount masks to 5 bits
    #[case("!0", 1)]
    #[case("!5", 0)]
    #[case("~0", -1)]
    #[case("-(2 * 3)", -6)]
    #[case("(1 > 0) && (2 < 0)", 0)]
    #[case("(1 > 0) || (2 < 0)", 1)]
    #[case("6 & 3", 2)]
    #[case("6 ^ 3", 5)]
    fn integer_folding(#[case] expr: &'static str, #[case] expected: i32) {
        let source: &'static str = Box::leak(
            format!("fn probe() -> i32 {{ return {expr}; }}").into_boxed_str(),
        );
        let value = eval_expr(source).unwrap().expect("expression folds");
        assert_eq!(value, ConstInfo::int(expected));
    }

    #[test]
    fn division_by_zero_is_a_hard_error() {
        let error = eval_expr("fn probe() -> i32 { return 1 / 0; }").unwrap_err();
        assert!(matches!(error, CompileError::DivideByZero(_)));
    }

    #[test]
    fn modulo_by_zero_is_a_hard_error() {
        let error = eval_expr("fn probe() -> i32 { return 1 % 0; }").unwrap_err();
        assert!(matches!(error, CompileError::DivideByZero(_)));
    }

    #[test]
    fn constant_references_fold() {
        let value = eval_expr(
            "const A: i32 = 6;\nfn probe() -> i32 { return A * 7; }",
        )
        .unwrap()
        .expect("constant reference folds");
        assert_eq!(value, ConstInfo::int(42));
    }

    #[test]
    fn primitive_casts_fold() {
        let value = eval_expr("fn probe() -> f32 { return 2 as f32; }")
            .unwrap()
            .expect("cast folds");
        assert_eq!(value, ConstInfo::float(2.0));
    }

    #[test]
    fn non_constant_subexpressions_do_not_fold() {
        let value = eval_expr(
            "fn probe(x: i32) -> i32 { return x + 1; }",
        )
        .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn float_division_follows_ieee() {
        let value = eval_expr("fn probe() -> f32 { return 1.0 / 0.0; }")
            .unwrap()
            .expect("float division folds");
        match value.value {
            ConstValue::Float(f) => assert!(f.is_infinite()),
            other => panic!("expected float, got {other:?}"),
        }
    }
}
