//! Whole-pipeline compilation tests: source in, IR out.

use pretty_assertions::assert_eq;

use crate::{
    error::CompileError,
    loader::MemoryResolver,
    sema::SymbolKind,
};

use super::{compile_source, compile_with, state_of, std_resolver};

#[test]
fn arithmetic_folding_collapses_to_a_constant() {
    let compilation = compile_source(
        r#"
        const A: i32 = 1;
        const B: i32 = 2;
        fn test() -> i32 { return (A > 0) && (B < 0); }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec!["const i32 0".to_string(), "ret i32".to_string()]
    );
}

#[test]
fn cast_matrix_lowers_to_cast_opcodes() {
    let compilation = compile_source(
        r#"
        fn test() -> void {
            let x: f32 = 2 as f32;
            let y: i32 = x as i32;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec![
            "const i32 2".to_string(),
            "cast i32_to_f32".to_string(),
            "store f32 %0".to_string(),
            "load f32 %0".to_string(),
            "cast f32_to_i32".to_string(),
            "store i32 %1".to_string(),
            "ret void".to_string(),
        ]
    );
}

#[test]
fn string_to_int_cast_is_a_type_error() {
    let error = compile_source(r#"fn test() -> i32 { return "hi" as i32; }"#).unwrap_err();
    assert!(matches!(error, CompileError::InvalidCast(_)));
}

#[test]
fn array_initializer_fills_elements_in_order() {
    let compilation = compile_source(
        r#"
        fn test() -> void {
            let b: [i32] = [1, 2];
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec![
            "const i32 2".to_string(),
            "newarray i32".to_string(),
            "dup [i32]".to_string(),
            "const i32 0".to_string(),
            "const i32 1".to_string(),
            "store_element i32".to_string(),
            "dup [i32]".to_string(),
            "const i32 1".to_string(),
            "const i32 2".to_string(),
            "store_element i32".to_string(),
            "store [i32] %0".to_string(),
            "ret void".to_string(),
        ]
    );
}

#[test]
fn nested_struct_initializer_and_member_read() {
    let compilation = compile_source(
        r#"
        struct S { i: i32, next: S }

        fn test() -> i32 {
            let s = S{i: 1, next: S{i: 3, next: null}};
            return s.next.i;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec![
            "new S".to_string(),
            "dup S".to_string(),
            "const i32 1".to_string(),
            "set_field S.i".to_string(),
            "dup S".to_string(),
            "new S".to_string(),
            "dup S".to_string(),
            "const i32 3".to_string(),
            "set_field S.i".to_string(),
            "dup S".to_string(),
            "const_null".to_string(),
            "set_field S.next".to_string(),
            "set_field S.next".to_string(),
            "store S %0".to_string(),
            "load S %0".to_string(),
            "get_field S.next".to_string(),
            "get_field S.i".to_string(),
            "ret i32".to_string(),
        ]
    );
}

#[test]
fn unresolved_import_is_reported_without_emitting() {
    let error = compile_source("import missing;").unwrap_err();
    match error {
        CompileError::ImportNotFound(inner) => {
            assert_eq!(inner.module, "missing");
            assert_eq!(inner.position.start, 0);
        }
        other => panic!("expected import-not-found, got {other:?}"),
    }
}

#[test]
fn while_loop_wires_header_body_and_exit_blocks() {
    let compilation = compile_source(
        r#"
        fn test(n: i32) -> i32 {
            let sum = 0;
            let i = 0;
            while (i < n) {
                sum = sum + i;
                i = i + 1;
            }
            return sum;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();
    assert!(instructions.iter().any(|i| i.starts_with("jnz while_body")));
    assert!(instructions.iter().any(|i| i.starts_with("jmp while_header")));
    assert_eq!(test.blocks.len(), 4); // entry, header, body, exit

    // Every slot is referenced by at least one load or store.
    for (_, slot) in test.frame.slots() {
        let marker = format!("%{}", slot.index);
        assert!(
            instructions
                .iter()
                .any(|i| (i.starts_with("load") || i.starts_with("store")) && i.ends_with(&marker)),
            "slot {marker} is never loaded or stored"
        );
    }
}

#[test]
fn break_and_continue_target_the_loop_labels() {
    let compilation = compile_source(
        r#"
        fn test() -> void {
            while (1) {
                if (0) { break; } else { continue; }
            }
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();
    assert!(instructions.iter().any(|i| i.starts_with("jmp while_exit")));
    assert!(instructions.iter().any(|i| i.starts_with("jmp while_header")));
}

#[test]
fn break_outside_a_loop_is_an_error() {
    let error = compile_source("fn test() -> void { break; }").unwrap_err();
    assert!(matches!(error, CompileError::OutsideLoop(_)));
}

#[test]
fn missing_return_in_non_void_function_is_an_error() {
    let error = compile_source("fn test() -> i32 { let x = 1; }").unwrap_err();
    match error {
        CompileError::MissingReturn(inner) => assert_eq!(inner.function, "test"),
        other => panic!("expected missing-return, got {other:?}"),
    }
}

#[test]
fn both_arms_returning_satisfies_the_epilogue() {
    let compilation = compile_source(
        r#"
        fn test(x: i32) -> i32 {
            if (x) { return 1; } else { return 2; }
        }
        "#,
    )
    .unwrap();
    let test = compilation.codegen.function("test").unwrap();
    assert!(test.blocks.last().unwrap().unreachable);
}

#[test]
fn chained_assignment_duplicates_the_value() {
    let compilation = compile_source(
        r#"
        fn test() -> void {
            let a = 0;
            let b = 0;
            a = b = 7;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();
    let chain_start = instructions
        .iter()
        .position(|i| i == "const i32 7")
        .expect("assigned constant");
    assert_eq!(instructions[chain_start + 1], "dup i32");
    assert!(instructions[chain_start + 2].starts_with("store i32"));
    assert!(instructions[chain_start + 3].starts_with("store i32"));
}

#[test]
fn compound_assignment_loads_computes_and_stores() {
    let compilation = compile_source(
        r#"
        fn test() -> i32 {
            let x = 3;
            x *= 2;
            return x;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();
    let load = instructions
        .iter()
        .position(|i| i == "load i32 %0")
        .expect("compound load");
    assert_eq!(instructions[load + 1], "const i32 2");
    assert_eq!(instructions[load + 2], "mul i32");
    assert_eq!(instructions[load + 3], "store i32 %0");
}

#[test]
fn wrong_arity_call_is_reported() {
    let error = compile_source(
        r#"
        fn f(a: i32) -> i32 { return a; }
        fn test() -> i32 { return f(1, 2); }
        "#,
    )
    .unwrap_err();
    match error {
        CompileError::WrongArity(inner) => {
            assert_eq!(inner.expected, 1);
            assert_eq!(inner.found, 2);
        }
        other => panic!("expected wrong-arity, got {other:?}"),
    }
}

#[test]
fn null_flows_into_reference_types_only() {
    assert!(compile_source("fn f() -> str { return null; }").is_ok());
    assert!(compile_source("fn f() -> [i32] { return null; }").is_ok());

    let error = compile_source("fn f() -> i32 { return null; }").unwrap_err();
    assert!(matches!(error, CompileError::TypeMismatch(_)));
}

#[test]
fn array_length_is_read_only() {
    let compilation = compile_source(
        r#"
        fn test(values: [i32]) -> i32 {
            return values.length;
        }
        "#,
    )
    .unwrap();
    let test = compilation.codegen.function("test").unwrap();
    assert!(test
        .instruction_strings()
        .contains(&"arraylength".to_string()));

    let error = compile_source(
        "fn test(values: [i32]) -> void { values.length = 1; }",
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::TypeMismatch(_)));
}

#[test]
fn imported_symbols_compile_end_to_end() {
    // Compile the dependency first.
    let dep_state = state_of(
        r#"
        const ANSWER: i32 = 42;
        struct Point { x: i32, y: i32 }
        fn double(v: i32) -> i32 { return v * 2; }
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
            let p = dep::Point{x: 1, y: ANSWER};
            return double(p.x) + dep::ANSWER;
        }
        "#,
        &resolver,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();
    // The imported constant folded to its value at both use sites.
    assert_eq!(
        instructions.iter().filter(|i| *i == "const i32 42").count(),
        2
    );
    assert!(instructions.contains(&"invoke dep::double".to_string()));
    assert!(instructions.contains(&"new Point".to_string()));
}

#[test]
fn explicit_imports_are_not_transitive() {
    let compilation = compile_with(
        r#"
        import std;
        fn test() -> void { std::print("hello"); }
        "#,
        &std_resolver(),
    )
    .unwrap();

    let print = compilation
        .env
        .lookup(
            "std::print",
            SymbolKind::Function,
            compilation.env.global_scope,
        )
        .expect("std::print resolved");
    assert!(!compilation.env.transitive_imports.contains(&print));
}

#[test]
fn compilation_is_deterministic() {
    let source = r#"
        struct S { i: i32, next: S }
        const GREETING: str = "hi";
        fn test(n: i32) -> i32 {
            let s = S{i: n, next: null};
            let total = 0;
            while (s.i > 0) {
                total += s.i;
                s.i -= 1;
            }
            return total;
        }
    "#;

    let empty = MemoryResolver::new();
    let first = crate::compile(state_of(source), &empty).unwrap();
    let second = crate::compile(state_of(source), &empty).unwrap();
    assert_eq!(first.to_bytes(), second.to_bytes());
}

#[test]
fn disable_const_eval_suppresses_folding() {
    let compilation = compile_source(
        r#"
        fn test() -> i32 {
            return #[disable(const_eval)] (1 + 2);
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    assert_eq!(
        test.instruction_strings(),
        vec![
            "const i32 1".to_string(),
            "const i32 2".to_string(),
            "add i32".to_string(),
            "ret i32".to_string(),
        ]
    );
}

#[test]
fn disabled_constant_still_binds_a_literal_initializer() {
    let compilation = compile_source(
        r#"
        fn helper() -> i32 { return LIMIT; }
        const LIMIT: i32 = #[disable(const_eval)] 9;
        "#,
    )
    .unwrap();

    let helper = compilation.codegen.function("helper").unwrap();
    assert_eq!(
        helper.instruction_strings(),
        vec!["const i32 9".to_string(), "ret i32".to_string()]
    );
}

#[test]
fn division_by_zero_during_folding_is_reported() {
    let error = compile_source("const BAD: i32 = 1 / 0;").unwrap_err();
    assert!(matches!(error, CompileError::DivideByZero(_)));
}

#[test]
fn importing_the_current_module_is_a_cycle() {
    let error = compile_source("import main;").unwrap_err();
    assert!(matches!(error, CompileError::ImportCycle(_)));
}

#[test]
fn prefix_and_postfix_steps_leave_the_right_value() {
    let compilation = compile_source(
        r#"
        fn test() -> i32 {
            let x = 1;
            let y = x++;
            let z = ++x;
            return y + z;
        }
        "#,
    )
    .unwrap();

    let test = compilation.codegen.function("test").unwrap();
    let instructions = test.instruction_strings();

    // Postfix duplicates before stepping, prefix after.
    let postfix = instructions
        .iter()
        .position(|i| i == "dup i32")
        .expect("postfix dup");
    assert_eq!(instructions[postfix - 1], "load i32 %0");
    assert_eq!(instructions[postfix + 1], "const i32 1");

    let prefix = instructions
        .iter()
        .rposition(|i| i == "dup i32")
        .expect("prefix dup");
    assert!(instructions[prefix - 1].starts_with("add"));
    assert!(instructions[prefix + 1].starts_with("store"));
}

#[test]
fn ambiguous_value_names_are_rejected() {
    let error = compile_source(
        r#"
        const x: i32 = 1;
        fn x() -> void {}
        fn test() -> void { x; }
        "#,
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::AmbiguousName(_)));
}
