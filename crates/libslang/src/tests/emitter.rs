//! Module emission tests: tables, bytecode layout and the operand index
//! scheme.

use pretty_assertions::assert_eq;

use crate::{
    loader::MemoryResolver,
    module::{
        ExportDescriptor, FunctionDetails, LanguageModule, ModuleSymbolKind,
    },
    opcodes::Opcode,
};

use super::{state_of, std_resolver};

fn compile_module(source: &str) -> LanguageModule {
    let resolver = MemoryResolver::new();
    crate::compile(state_of(source), &resolver).unwrap()
}

#[test]
fn function_details_are_patched_with_offsets() {
    let module = compile_module(
        r#"
        fn first() -> i32 { return 1; }
        fn second() -> i32 { return 2; }
        "#,
    );

    let first = module
        .header
        .find_export(ModuleSymbolKind::Function, "first")
        .unwrap();
    let second = module
        .header
        .find_export(ModuleSymbolKind::Function, "second")
        .unwrap();

    let details = |entry: &crate::module::ExportedSymbol| match &entry.desc {
        ExportDescriptor::Function(desc) => match &desc.details {
            FunctionDetails::Bytecode { offset, size, .. } => (*offset, *size),
            FunctionDetails::Native { .. } => panic!("expected bytecode details"),
        },
        _ => panic!("expected function descriptor"),
    };

    let (first_offset, first_size) = details(first);
    let (second_offset, second_size) = details(second);
    assert_eq!(first_offset, 0);
    assert!(first_size > 0);
    assert_eq!(second_offset, first_size);
    assert_eq!(module.binary.len(), first_size + second_size);
}

#[test]
fn local_slot_table_counts_parameters_and_locals() {
    let module = compile_module(
        r#"
        fn test(a: i32, b: f32) -> i32 {
            let x = 1;
            let s = "hi";
            return x;
        }
        "#,
    );

    let entry = module
        .header
        .find_export(ModuleSymbolKind::Function, "test")
        .unwrap();
    let ExportDescriptor::Function(desc) = &entry.desc else {
        panic!("expected function descriptor");
    };
    let FunctionDetails::Bytecode { locals, .. } = &desc.details else {
        panic!("expected bytecode details");
    };

    let bases: Vec<&str> = locals.iter().map(|local| local.base.as_str()).collect();
    assert_eq!(bases, vec!["i32", "f32", "i32", "str"]);
}

#[test]
fn native_prototypes_carry_the_library_and_no_body() {
    let module = compile_module(
        r#"
        #[native(lib="host_math")]
        fn sqrt(x: f32) -> f32;

        fn test() -> f32 { return sqrt(2.0); }
        "#,
    );

    let entry = module
        .header
        .find_export(ModuleSymbolKind::Function, "sqrt")
        .unwrap();
    let ExportDescriptor::Function(desc) = &entry.desc else {
        panic!("expected function descriptor");
    };
    assert!(desc.is_native());
    match &desc.details {
        FunctionDetails::Native { library } => assert_eq!(library, "host_math"),
        other => panic!("expected native details, got {other:?}"),
    }
}

#[test]
fn allow_cast_sets_the_struct_flag() {
    let module = compile_module(
        r#"
        #[allow_cast]
        struct S { i: i32 }

        struct T { s: S }
        "#,
    );

    let s = module
        .header
        .find_export(ModuleSymbolKind::Type, "S")
        .unwrap();
    let ExportDescriptor::Struct(desc) = &s.desc else {
        panic!("expected struct descriptor");
    };
    assert_eq!(desc.flags & crate::module::struct_flags::ALLOW_CAST, 1);

    let t = module
        .header
        .find_export(ModuleSymbolKind::Type, "T")
        .unwrap();
    let ExportDescriptor::Struct(desc) = &t.desc else {
        panic!("expected struct descriptor");
    };
    assert_eq!(desc.flags, 0);
    assert_eq!(desc.fields[0].0, "s");
    assert_eq!(desc.fields[0].1.base, "S");
}

#[test]
fn every_symbol_follows_its_package_entry() {
    let state = state_of(
        r#"
        import std;
        fn test() -> void { std::print("x"); }
        "#,
    );
    let module = crate::compile(state, &std_resolver()).unwrap();

    let mut current_package: Option<&str> = None;
    let mut saw_print = false;
    for entry in &module.header.imports {
        if entry.kind == ModuleSymbolKind::Package {
            assert_eq!(entry.package_index, -1);
            current_package = Some(entry.name.as_str());
            continue;
        }
        let package = current_package.expect("symbol entry without a preceding package");
        assert_eq!(
            module.header.imports[entry.package_index as usize].name,
            package
        );
        if entry.kind == ModuleSymbolKind::Function && entry.name == "print" {
            saw_print = true;
            assert_eq!(package, "std");
        }
    }
    assert!(saw_print);
}

#[test]
fn invoke_uses_negative_indices_for_imports() {
    let state = state_of(
        r#"
        import std;
        fn local() -> void {}
        fn test() -> void {
            local();
            std::print("x");
        }
        "#,
    );
    let module = crate::compile(state, &std_resolver()).unwrap();

    // Scan the bytecode for invoke operands: one export index (>= 0) and
    // one import index (< 0).
    let mut reader = crate::archive::ReadArchive::new(&module.binary);
    let mut operands = Vec::new();
    while reader.remaining() > 0 {
        let byte = reader.read_u8().unwrap();
        if byte == Opcode::Invoke as u8 {
            operands.push(reader.read_varint().unwrap());
        } else if byte == Opcode::Sconst as u8 {
            reader.read_varint().unwrap();
        } else if byte == Opcode::Iconst as u8 {
            reader.read_i32().unwrap();
        } else if byte == Opcode::Label as u8 {
            reader.read_varint().unwrap();
        }
        // Remaining opcodes in this program carry no operands.
    }

    assert_eq!(operands.len(), 2);
    let local_index = operands[0];
    let import_index = operands[1];
    assert!(local_index >= 0);
    assert_eq!(
        module.header.exports[local_index as usize].name,
        "local"
    );
    assert!(import_index < 0);
    let entry = &module.header.imports[(-1 - import_index) as usize];
    assert_eq!(entry.name, "print");
}

#[test]
fn string_constants_are_interned_once() {
    let module = compile_module(
        r#"
        fn test() -> str {
            let a = "shared";
            let b = "shared";
            return a;
        }
        "#,
    );

    let shared = module
        .header
        .constants
        .iter()
        .filter(|entry| entry.payload == b"shared")
        .count();
    assert_eq!(shared, 1);
}

#[test]
fn emitted_module_round_trips() {
    let module = compile_module(
        r#"
        struct Pair { a: i32, b: i32 }
        const LIMIT: i32 = 16;

        macro clamp! {
            ($v: expr) => { $v % LIMIT; };
        }

        fn test(p: Pair) -> i32 {
            let x = 0;
            x = clamp!(p.a + p.b);
            return x;
        }
        "#,
    );

    let bytes = module.to_bytes();
    let reloaded = LanguageModule::from_bytes(&bytes).unwrap();
    assert_eq!(reloaded.header.exports, module.header.exports);
    assert_eq!(reloaded.header.imports, module.header.imports);
    assert_eq!(reloaded.header.constants, module.header.constants);
    assert_eq!(reloaded.binary, module.binary);
    assert_eq!(reloaded.to_bytes(), bytes);
}
