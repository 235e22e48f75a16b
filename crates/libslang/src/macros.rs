//! Macro environment and pattern-directed expansion.
//!
//! A macro definition is an ordered list of branches, each with a fixed
//! arity of typed argument patterns and an optional trailing list capture.
//! Expansion picks the single best-scoring branch for the invocation arity
//! (exact without capture 3, exact with empty capture 2, surplus into the
//! capture 1; ties are an error), deep-clones it, α-renames every name the
//! branch binds with a unique `$<invocation-id>` prefix, substitutes the
//! invocation expressions for the parameters, and replaces the invocation
//! node with the result. Newly grafted subtrees are collected immediately;
//! the caller re-runs import resolution, name resolution and type checking
//! until expansion reaches a fixed point.

use indexmap::IndexSet;
use log::debug;

use crate::{
    ast::{
        ExpressionAst, ExpressionKind, MacroBranchAst, MacroInvocationAst,
    },
    builtins,
    error::{CompileError, MacroAmbiguity, MacroNoMatch},
    module::ExportDescriptor,
    nom_tools::{SpanInfo, State},
    sema::{
        collect::Collector,
        symbol::{SymbolKind, SymbolReference},
        SemaEnv, SymbolId,
    },
    typing::TypeContext,
};

/// One registered macro: local definition or deserialized import.
#[derive(Debug, Clone)]
pub struct MacroInfo<'base> {
    /// Unqualified macro name.
    pub name: String,
    /// Qualified name (`module::name` for imports).
    pub qualified_name: String,
    /// The macro definition node (kind `MacroDefinition`).
    pub node: ExpressionAst<'base>,
    /// Import path for macros from dependencies.
    pub import_path: Option<String>,
    /// Whether the expander provides the implementation.
    pub builtin: bool,
}

/// The macro collection / expansion environment.
#[derive(Debug, Default)]
pub struct MacroEnv<'base> {
    pub macros: Vec<MacroInfo<'base>>,
    invocation_counter: usize,
}

impl<'base> MacroEnv<'base> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next unique invocation id for hygiene prefixes.
    pub fn next_invocation_id(&mut self) -> usize {
        let id = self.invocation_counter;
        self.invocation_counter += 1;
        id
    }

    /// Finds a macro by its qualified name.
    pub fn find(&self, qualified_name: &str) -> Option<&MacroInfo<'base>> {
        self.macros
            .iter()
            .find(|info| info.qualified_name == qualified_name)
    }
}

/// Registers all macros visible to this compilation: local definitions and
/// the serialized branch sets of imported macros.
pub fn collect_macros<'base>(
    env: &SemaEnv<'base>,
    macro_env: &mut MacroEnv<'base>,
    items: &[ExpressionAst<'base>],
) -> Result<(), CompileError> {
    use crate::sema::attribute::AttributeKind;

    for item in items {
        let node = crate::typing::look_through_directives(item);
        let ExpressionKind::MacroDefinition(def) = &node.kind else {
            continue;
        };
        let builtin = env
            .node_symbols
            .get(&node.index)
            .is_some_and(|symbol| env.has_attribute(*symbol, AttributeKind::Builtin));
        macro_env.macros.push(MacroInfo {
            name: def.name.text().to_string(),
            qualified_name: def.name.text().to_string(),
            node: node.clone(),
            import_path: None,
            builtin,
        });
    }

    for info in env.symbols.iter() {
        if info.kind != SymbolKind::Macro {
            continue;
        }
        let Some(SymbolReference::Export(entry)) = &info.reference else {
            continue;
        };
        let ExportDescriptor::Macro(desc) = &entry.desc else {
            continue;
        };

        let import_path = info
            .qualified_name
            .rsplit_once("::")
            .map(|(module, _)| module.to_string());

        let state = State::new(crate::file::SourceFile::new(
            vec!["<macro>".into()],
            String::new(),
        ));
        let mut reader = crate::archive::ReadArchive::new(&desc.serialized_ast);
        let node = ExpressionAst::deserialize(&mut reader, &state)?;

        macro_env.macros.push(MacroInfo {
            name: info.name.to_string(),
            qualified_name: info.qualified_name.to_string(),
            node,
            import_path,
            builtin: false,
        });
    }

    Ok(())
}

/// Declares module imports for namespace references inside macro bodies.
///
/// Macros may call `std::string_concat` without the expanding module having
/// imported `std`; those packages are declared as transitive module imports
/// so import resolution can materialize their symbols. Returns whether any
/// new import was declared (import resolution must then re-run).
pub fn resolve_macro_imports<'base>(
    env: &mut SemaEnv<'base>,
    macro_env: &MacroEnv<'base>,
) -> Result<bool, CompileError> {
    let mut needed: IndexSet<String> = IndexSet::new();
    for info in &macro_env.macros {
        info.node.visit_nodes(
            &mut |node| {
                if let ExpressionKind::NamespaceAccess(access) = &node.kind {
                    let mut path = vec![access.namespace.text().to_string()];
                    let mut inner = access.inner.as_ref();
                    while let ExpressionKind::NamespaceAccess(next) = &inner.kind {
                        path.push(next.namespace.text().to_string());
                        inner = next.inner.as_ref();
                    }
                    if matches!(
                        inner.kind,
                        ExpressionKind::Call(_) | ExpressionKind::MacroInvocation(_)
                    ) {
                        needed.insert(path.join("::"));
                    }
                }
            },
            true,
            false,
            None,
        );
    }

    let mut declared_any = false;
    for package in needed {
        if env
            .lookup(&package, SymbolKind::ModuleImport, env.global_scope)
            .is_some()
        {
            continue;
        }
        let span = SpanInfo::new(0..0, crate::file::SourceFile::new(vec!["<macro>".into()], String::new()));
        let global_scope = env.global_scope;
        let mut collector = Collector::at_scope(env, global_scope);
        collector.declare_imported(
            package.clone().into(),
            package.into(),
            SymbolKind::ModuleImport,
            span,
            SymbolId::UNDEFINED,
            true,
            None,
        )?;
        declared_any = true;
    }

    Ok(declared_any)
}

/// One expansion pass over all items.
///
/// Returns whether anything changed plus the namespace prefixes the grafted
/// code references; the caller declares those as transitive imports and
/// re-runs import resolution.
pub fn expand_macros<'base>(
    env: &mut SemaEnv<'base>,
    types: &TypeContext<'base>,
    macro_env: &mut MacroEnv<'base>,
    items: &mut [ExpressionAst<'base>],
) -> Result<(bool, IndexSet<String>), CompileError> {
    let mut changed = false;
    let mut grafted_namespaces = IndexSet::new();
    for item in items.iter_mut() {
        // Macro definitions are templates; invocations inside them expand
        // at their own expansion sites.
        if matches!(
            crate::typing::look_through_directives(item).kind,
            ExpressionKind::MacroDefinition(_)
        ) {
            continue;
        }
        changed |= expand_node(env, types, macro_env, item, &mut grafted_namespaces)?;
        flatten_expression_lists(item);
    }
    Ok((changed, grafted_namespaces))
}

/// Declares transitive module imports for namespace prefixes grafted by
/// expansion. Returns whether any new import was declared.
pub fn declare_grafted_imports<'base>(
    env: &mut SemaEnv<'base>,
    namespaces: &IndexSet<String>,
) -> Result<bool, CompileError> {
    let mut declared_any = false;
    for package in namespaces {
        if env
            .lookup(package, SymbolKind::ModuleImport, env.global_scope)
            .is_some()
        {
            continue;
        }
        let span = SpanInfo::new(
            0..0,
            crate::file::SourceFile::new(vec!["<macro>".into()], String::new()),
        );
        let global_scope = env.global_scope;
        let mut collector = Collector::at_scope(env, global_scope);
        collector.declare_imported(
            package.clone().into(),
            package.clone().into(),
            SymbolKind::ModuleImport,
            span,
            SymbolId::UNDEFINED,
            true,
            None,
        )?;
        declared_any = true;
    }
    Ok(declared_any)
}

fn collect_namespace_prefixes(node: &ExpressionAst<'_>, out: &mut IndexSet<String>) {
    node.visit_nodes(
        &mut |n| {
            if let ExpressionKind::NamespaceAccess(access) = &n.kind {
                let mut path = vec![access.namespace.text().to_string()];
                let mut inner = access.inner.as_ref();
                while let ExpressionKind::NamespaceAccess(next) = &inner.kind {
                    path.push(next.namespace.text().to_string());
                    inner = next.inner.as_ref();
                }
                if matches!(
                    inner.kind,
                    ExpressionKind::Call(_) | ExpressionKind::MacroInvocation(_)
                ) {
                    out.insert(path.join("::"));
                }
            }
        },
        true,
        false,
        None,
    );
}

fn expand_node<'base>(
    env: &mut SemaEnv<'base>,
    types: &TypeContext<'base>,
    macro_env: &mut MacroEnv<'base>,
    node: &mut ExpressionAst<'base>,
    grafted_namespaces: &mut IndexSet<String>,
) -> Result<bool, CompileError> {
    let mut changed = false;
    for child in node.children_mut() {
        changed |= expand_node(env, types, macro_env, child, grafted_namespaces)?;
    }

    let replacement = match &node.kind {
        ExpressionKind::MacroInvocation(invocation) => {
            expand_invocation(env, types, macro_env, node, invocation)?
        }
        ExpressionKind::NamespaceAccess(access) => {
            // A namespace-qualified invocation replaces the whole access
            // chain.
            let mut inner = access.inner.as_ref();
            while let ExpressionKind::NamespaceAccess(next) = &inner.kind {
                inner = next.inner.as_ref();
            }
            if let ExpressionKind::MacroInvocation(invocation) = &inner.kind {
                let invocation = invocation.clone();
                expand_invocation(env, types, macro_env, node, &invocation)?
            } else {
                None
            }
        }
        _ => None,
    };

    if let Some(replacement) = replacement {
        let scope = env.node_scopes.get(&node.index).copied().ok_or_else(|| {
            CompileError::internal("macros", "Invocation node has no recorded scope.")
        })?;
        *node = replacement;
        collect_namespace_prefixes(node, grafted_namespaces);

        // Newly grafted subtrees need scopes and symbols right away so the
        // re-resolution phases can see them.
        let mut collector = Collector::at_scope(env, scope);
        collector.collect(node)?;
        changed = true;
    }

    Ok(changed)
}

fn expand_invocation<'base>(
    env: &SemaEnv<'base>,
    types: &TypeContext<'base>,
    macro_env: &mut MacroEnv<'base>,
    node: &ExpressionAst<'base>,
    invocation: &MacroInvocationAst<'base>,
) -> Result<Option<ExpressionAst<'base>>, CompileError> {
    if builtins::is_builtin_macro(invocation.name.text()) {
        return builtins::expand_format(env, types, &node.span, &invocation.args);
    }

    // The resolver bound the invocation to its macro symbol; the symbol's
    // qualified name selects the definition.
    let symbol = env.node_symbols.get(&node.index).copied().ok_or_else(|| {
        CompileError::internal("macros", "Macro invocation has no bound symbol.")
    })?;
    let qualified = env.symbol(symbol).qualified_name.to_string();
    let Some(info) = macro_env.find(&qualified) else {
        return Err(CompileError::internal(
            "macros",
            format!("Macro '{qualified}' has no registered definition."),
        ));
    };

    if info.builtin {
        return builtins::expand_format(env, types, &node.span, &invocation.args);
    }

    let invocation_exprs = expand_invocation_args(invocation)?;
    let branch = matching_branch(&info.node, invocation, &invocation_exprs, node)?.clone();

    let invocation_id = macro_env.next_invocation_id();
    Ok(Some(instantiate_branch(
        &branch,
        invocation_id,
        &invocation_exprs,
        node,
    )?))
}

/// Step 1 of expansion: clone the invocation arguments, flattening a
/// trailing list capture bound by an enclosing expansion. A captured list
/// may only appear as the last argument.
fn expand_invocation_args<'base>(
    invocation: &MacroInvocationAst<'base>,
) -> Result<Vec<ExpressionAst<'base>>, CompileError> {
    let mut exprs: Vec<ExpressionAst<'base>> = Vec::with_capacity(invocation.args.len());
    for (position, arg) in invocation.args.iter().enumerate() {
        if let ExpressionKind::MacroExpressionList(list) = &arg.kind {
            if position + 1 != invocation.args.len() {
                return Err(CompileError::type_mismatch(
                    "single expression".to_string(),
                    "captured expression list".to_string(),
                    &(&arg.span).into(),
                ));
            }
            for expr in list {
                exprs.push(expr.deep_clone());
            }
        } else {
            exprs.push(arg.deep_clone());
        }
    }
    Ok(exprs)
}

/// Step 2: score every branch against the invocation arity and pick the
/// unique best one.
fn matching_branch<'def, 'base>(
    definition: &'def ExpressionAst<'base>,
    invocation: &MacroInvocationAst<'base>,
    invocation_exprs: &[ExpressionAst<'base>],
    node: &ExpressionAst<'base>,
) -> Result<&'def ExpressionAst<'base>, CompileError> {
    let ExpressionKind::MacroDefinition(def) = &definition.kind else {
        return Err(CompileError::internal(
            "macros",
            "Cannot match branches of a non-macro definition.",
        ));
    };

    let mut best: Option<(&ExpressionAst<'base>, usize)> = None;
    let mut tie: Option<&ExpressionAst<'base>> = None;

    for branch in &def.branches {
        let ExpressionKind::MacroBranch(branch_ast) = &branch.kind else {
            return Err(CompileError::internal(
                "macros",
                "Macro definition contains a non-branch child.",
            ));
        };

        let arity = branch_ast.args.len();
        let n = invocation_exprs.len();
        let score = if !branch_ast.ends_with_list {
            if n == arity {
                3
            } else {
                0
            }
        } else if n + 1 == arity {
            2
        } else if n >= arity {
            1
        } else {
            0
        };

        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score == score => tie = Some(branch),
            Some((_, best_score)) if best_score > score => {}
            _ => {
                best = Some((branch, score));
                tie = None;
            }
        }
    }

    if let (Some((winner, _)), Some(tied)) = (best, tie) {
        return Err(Box::new(MacroAmbiguity {
            name: invocation.name.text().to_string(),
            first_position: winner.span.position.clone(),
            second_position: tied.span.position.clone(),
            code: (&winner.span.state.file).into(),
        })
        .into());
    }

    match best {
        Some((winner, _)) => Ok(winner),
        None => Err(Box::new(MacroNoMatch {
            name: invocation.name.text().to_string(),
            position: node.span.position.clone(),
            code: (&node.span.state.file).into(),
        })
        .into()),
    }
}

/// Steps 3–5: clone the branch body, α-rename the names the branch binds,
/// substitute the invocation expressions, and produce the replacement node.
fn instantiate_branch<'base>(
    branch: &ExpressionAst<'base>,
    invocation_id: usize,
    invocation_exprs: &[ExpressionAst<'base>],
    node: &ExpressionAst<'base>,
) -> Result<ExpressionAst<'base>, CompileError> {
    let cloned = branch.deep_clone();
    let ExpressionKind::MacroBranch(branch_ast) = cloned.kind else {
        return Err(CompileError::internal("macros", "Branch clone lost its kind."));
    };
    let MacroBranchAst {
        mut args,
        ends_with_list,
        body,
    } = branch_ast;

    // Names the branch binds: its parameters and every variable its body
    // declares.
    let mut bound: IndexSet<String> = args
        .iter()
        .map(|arg| arg.name.text().to_string())
        .collect();
    body.visit_nodes(
        &mut |n| {
            if let ExpressionKind::VariableDeclaration(decl) = &n.kind {
                bound.insert(decl.name.text().to_string());
            }
        },
        true,
        false,
        None,
    );

    // α-rename with the unique invocation prefix.
    let prefix = format!("${invocation_id}");
    for arg in &mut args {
        let renamed = format!("{prefix}{}", arg.name.text());
        arg.name.rename(renamed);
    }
    let mut body = body;
    body.visit_nodes_mut(
        &mut |n| match &mut n.kind {
            ExpressionKind::VariableDeclaration(decl) if bound.contains(decl.name.text()) => {
                let renamed = format!("{prefix}{}", decl.name.text());
                decl.name.rename(renamed);
            }
            ExpressionKind::VariableRef(token) if bound.contains(token.text()) => {
                let renamed = format!("{prefix}{}", token.text());
                token.rename(renamed);
            }
            _ => {}
        },
        true,
        false,
        None,
    );

    // Substitute parameters with the (cloned) invocation expressions.
    let fixed_args = if ends_with_list {
        args.len() - 1
    } else {
        args.len()
    };

    let substitution = |name: &str| -> Option<ExpressionAst<'base>> {
        let position = args.iter().position(|arg| arg.name.text() == name)?;
        if position < fixed_args {
            return Some(invocation_exprs[position].deep_clone());
        }

        // Trailing list capture: zero or more remaining expressions.
        let captured: Vec<ExpressionAst<'base>> = invocation_exprs[fixed_args..]
            .iter()
            .map(|expr| expr.deep_clone())
            .collect();
        if captured.len() == 1 {
            return Some(captured.into_iter().next().unwrap());
        }
        Some(ExpressionAst::new(
            node.span.clone(),
            ExpressionKind::MacroExpressionList(captured),
        ))
    };
    body.visit_nodes_mut(
        &mut |n| {
            if let ExpressionKind::VariableRef(token) = &n.kind {
                if let Some(replacement) = substitution(token.text()) {
                    *n = replacement;
                }
            }
        },
        true,
        false,
        None,
    );

    debug!(
        "expanded macro invocation #{invocation_id} at {:?}",
        node.span.position
    );

    // A single-expression body substitutes as that expression; otherwise
    // the block is grafted as a statement.
    if let ExpressionKind::Block(statements) = &mut body.kind {
        if statements.len() == 1
            && matches!(
                statements[0].kind,
                ExpressionKind::Literal(_)
                    | ExpressionKind::VariableRef(_)
                    | ExpressionKind::Binary(_)
                    | ExpressionKind::Unary(_)
                    | ExpressionKind::Call(_)
                    | ExpressionKind::NamespaceAccess(_)
                    | ExpressionKind::TypeCast(_)
                    | ExpressionKind::Access(_)
                    | ExpressionKind::Subscript(_)
            )
        {
            return Ok(statements.pop().unwrap());
        }
    }

    Ok(*body)
}

/// Flattens transient expression-list nodes into their insertion points:
/// block statements, call and invocation arguments, array initializers.
fn flatten_expression_lists(node: &mut ExpressionAst<'_>) {
    for child in node.children_mut() {
        flatten_expression_lists(child);
    }

    match &mut node.kind {
        ExpressionKind::Block(statements) => splice_lists(statements),
        ExpressionKind::ArrayInitializer(values) => splice_lists(values),
        ExpressionKind::Call(call) => splice_lists(&mut call.args),
        ExpressionKind::MacroInvocation(invocation) => splice_lists(&mut invocation.args),
        _ => {}
    }
}

fn splice_lists<'base>(exprs: &mut Vec<ExpressionAst<'base>>) {
    if !exprs
        .iter()
        .any(|e| matches!(e.kind, ExpressionKind::MacroExpressionList(_)))
    {
        return;
    }

    let drained = std::mem::take(exprs);
    for expr in drained {
        if let ExpressionKind::MacroExpressionList(inner) = expr.kind {
            exprs.extend(inner);
        } else {
            exprs.push(expr);
        }
    }
}
