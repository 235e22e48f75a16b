//! Macro expansion tests: branch selection, hygiene, list captures and the
//! `format!` builtin.

use pretty_assertions::assert_eq;

use crate::{error::CompileError, loader::MemoryResolver, sema::SymbolKind};

use super::{compile_source, compile_with, state_of, std_resolver};

#[test]
fn invocations_expand_with_hygienic_locals() {
    let compilation = compile_source(
        r#"
        macro noisy! {
            ($v: expr) => {
                let x = $v;
                x = x + 1;
            };
        }

        fn test() -> void {
            noisy!(1);
            noisy!(2);
        }
        "#,
    )
    .unwrap();

    // Two invocations, two α-renamed locals with distinct invocation-id
    // prefixes.
    let hygienic: Vec<String> = compilation
        .env
        .symbols
        .iter()
        .filter(|info| info.kind == SymbolKind::Variable && info.name.starts_with('$'))
        .map(|info| info.name.to_string())
        .collect();
    assert_eq!(hygienic, vec!["$0x".to_string(), "$1x".to_string()]);

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(test.frame.len(), 2);
}

#[test]
fn swapping_invocations_preserves_semantics() {
    let source_a = r#"
        macro bump! {
            ($v: expr) => { let x = $v; x = x + 1; };
        }
        fn test() -> void { bump!(1); bump!(2); }
    "#;
    let source_b = r#"
        macro bump! {
            ($v: expr) => { let x = $v; x = x + 1; };
        }
        fn test() -> void { bump!(2); bump!(1); }
    "#;

    let first = compile_source(source_a).unwrap();
    let second = compile_source(source_b).unwrap();

    let strings = |c: &crate::Compilation<'_>| {
        c.codegen.function("test").unwrap().instruction_strings()
    };
    let a = strings(&first);
    let b = strings(&second);

    // Same instructions overall; only the expansion groups trade places.
    assert_eq!(a.len(), b.len());
    let mut sorted_a = a.clone();
    let mut sorted_b = b.clone();
    sorted_a.sort();
    sorted_b.sort();
    assert_eq!(sorted_a, sorted_b);
    assert_eq!(a[0], "const i32 1");
    assert_eq!(b[0], "const i32 2");
}

#[test]
fn branch_scoring_prefers_the_exact_arity() {
    let compilation = compile_source(
        r#"
        macro pick! {
            ($a: expr) => { $a; };
            ($a: expr, $rest: expr...) => { $a + 100; };
        }

        fn test() -> i32 {
            let a = 0;
            a = pick!(1);
            a = pick!(1, 2, 3);
            return a;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();
    // First invocation picked the exact branch (no +100), the second fed
    // the surplus into the list capture.
    assert!(instructions.contains(&"const i32 1".to_string()));
    assert!(instructions.contains(&"const i32 101".to_string()));
}

#[test]
fn tied_branches_are_ambiguous() {
    let error = compile_source(
        r#"
        macro bad! {
            ($a: expr) => { $a; };
            ($b: expr) => { $b; };
        }
        fn test() -> void { bad!(1); }
        "#,
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::MacroAmbiguity(_)));
}

#[test]
fn no_matching_branch_is_an_error() {
    let error = compile_source(
        r#"
        macro two! {
            ($a: expr, $b: expr) => { $a + $b; };
        }
        fn test() -> void { two!(1); }
        "#,
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::MacroNoMatch(_)));
}

#[test]
fn unknown_macro_is_unresolved() {
    let error = compile_source("fn test() -> void { nope!(1); }").unwrap_err();
    assert!(matches!(error, CompileError::UnresolvedName(_)));
}

#[test]
fn format_expands_to_left_folded_concat() {
    let compilation = compile_with(
        r#"
        import std;
        fn test(n: i32, name: str) -> str {
            return format!("x={d}, y={s}", n, name);
        }
        "#,
        &std_resolver(),
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec![
            "const str \"x=\"".to_string(),
            "load i32 %0".to_string(),
            "invoke std::i32_to_string".to_string(),
            "invoke std::string_concat".to_string(),
            "const str \", y=\"".to_string(),
            "invoke std::string_concat".to_string(),
            "load str %1".to_string(),
            "invoke std::string_concat".to_string(),
            "ret str".to_string(),
        ]
    );
}

#[test]
fn format_infers_untyped_placeholders() {
    let compilation = compile_with(
        r#"
        import std;
        fn test(n: f32) -> str { return format!("{}", n); }
        "#,
        &std_resolver(),
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert!(test
        .instruction_strings()
        .contains(&"invoke std::f32_to_string".to_string()));
}

#[test]
fn format_placeholder_type_mismatch_is_an_error() {
    let error = compile_with(
        r#"
        import std;
        fn test(n: i32) -> str { return format!("x={f}", n); }
        "#,
        &std_resolver(),
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::TypeMismatch(_)));
}

#[test]
fn format_rejects_invalid_format_strings() {
    for source in [
        r#"import std; fn t() -> str { return format!("{x}", 1); }"#,
        r#"import std; fn t() -> str { return format!("{", 1); }"#,
        r#"import std; fn t() -> str { return format!("a}b", 1); }"#,
        r#"import std; fn t() -> str { return format!("{d}"); }"#,
    ] {
        let error = compile_with(source, &std_resolver()).unwrap_err();
        assert!(
            matches!(error, CompileError::InvalidFormatString(_)),
            "source {source:?} produced {error:?}"
        );
    }
}

#[test]
fn format_without_placeholders_is_the_literal() {
    let compilation = compile_with(
        r#"
        import std;
        fn test() -> str { return format!("plain"); }
        "#,
        &std_resolver(),
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec!["const str \"plain\"".to_string(), "ret str".to_string()]
    );
}

#[test]
fn exported_macros_expand_in_importing_modules() {
    // Compile the dependency carrying the macro.
    let dep_state = state_of(
        r#"
        macro triple! {
            ($x: expr) => { $x * 3; };
        }
        "#,
    );
    let empty = MemoryResolver::new();
    let dep_module = crate::compile(dep_state, &empty).unwrap();

    let mut resolver = MemoryResolver::new();
    resolver.insert("dep", dep_module.header.clone());

    let compilation = compile_with(
        r#"
        import dep;
        fn test() -> i32 {
            let a = 0;
            a = triple!(7);
            return a;
        }
        "#,
        &resolver,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    // 7 * 3 folded after expansion.
    assert!(test
        .instruction_strings()
        .contains(&"const i32 21".to_string()));
}

#[test]
fn list_capture_flattens_into_call_arguments() {
    let compilation = compile_with(
        r#"
        import std;
        macro log_all! {
            ($first: expr, $rest: expr...) => {
                std::print($first);
                log_all!($rest);
            };
            ($only: expr) => {
                std::print($only);
            };
        }

        fn test() -> void {
            log_all!("a", "b", "c");
        }
        "#,
        &std_resolver(),
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let prints = test
        .instruction_strings()
        .iter()
        .filter(|i| i.starts_with("invoke std::print"))
        .count();
    assert_eq!(prints, 3);
}
