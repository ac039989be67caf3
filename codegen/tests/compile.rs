//! End-to-end pipeline tests: type system in, laid-out image out.

use mosa_codegen::cil::{CilBody, CilCmp, CilOp};
use mosa_codegen::linker::{ObjectLinker, SectionKind};
use mosa_codegen::multiboot;
use mosa_codegen::settings::Options;
use mosa_codegen::typesys::{FieldData, MethodData, MethodSig, TypeData, TypeSystem};
use mosa_codegen::Compiler;
use std::sync::Arc;

/// A small program: an entry point computing with locals, a helper it
/// calls, a static counter field, and a loop.
fn sample_type_system() -> Arc<TypeSystem> {
    let mut ts = TypeSystem::with_corlib();
    let object = ts.lookup("System.Object").unwrap();
    let i4 = ts.lookup("System.Int32").unwrap();

    let kernel = ts.add_type(TypeData::class("Kernel", Some(object)));
    ts.add_field(kernel, FieldData::new("ticks", i4).static_());

    // static int Twice(int x) => x + x;
    let twice = ts.add_method(
        kernel,
        MethodData::new("Twice", MethodSig::new(vec![i4], Some(i4)))
            .static_()
            .with_body(CilBody::from_ops(vec![
                CilOp::LdArg(0),
                CilOp::LdArg(0),
                CilOp::Add,
                CilOp::Ret,
            ])),
    );

    // static int Main(int n):
    //   int sum = 0;
    //   while (n > 0) { sum = sum + Twice(n); n = n - 1; }
    //   return sum;
    let mut body = CilBody::from_ops(vec![
        // sum = 0
        CilOp::LdcI4(0),
        CilOp::StLoc(0),
        // 2: loop head: if (n <= 0) goto 15
        CilOp::LdArg(0),
        CilOp::LdcI4(0),
        CilOp::Bc(CilCmp::Le, 15),
        // sum += Twice(n)
        CilOp::LdLoc(0),
        CilOp::LdArg(0),
        CilOp::Call(twice),
        CilOp::Add,
        CilOp::StLoc(0),
        // n -= 1, back to the head
        CilOp::LdArg(0),
        CilOp::LdcI4(1),
        CilOp::Sub,
        CilOp::StArg(0),
        CilOp::Br(2),
        // 15: return sum
        CilOp::LdLoc(0),
        CilOp::Ret,
    ]);
    body.locals.push(i4);
    ts.add_method(
        kernel,
        MethodData::new("Main", MethodSig::new(vec![i4], Some(i4)))
            .static_()
            .with_body(body),
    );
    Arc::new(ts)
}

fn build(triple: &str, options: Options) -> (Vec<(String, u64)>, Vec<u8>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ts = sample_type_system();
    let compiler = match Compiler::new(ts, &triple.parse().unwrap(), options) {
        Ok(c) => c,
        Err(e) => panic!("no backend for {triple}: {e}"),
    };
    let linker = ObjectLinker::new(0x0040_0000);
    let errors = compiler.compile_all(&linker);
    assert!(errors.is_empty(), "per-method failures: {errors:?}");
    multiboot::write_multiboot_header(&linker, "Kernel::Main").unwrap();
    let image = linker.finalize().unwrap();
    let text = image
        .sections
        .iter()
        .find(|s| s.kind == SectionKind::Text)
        .unwrap();
    let symbols = image
        .symbols
        .iter()
        .map(|(s, addr)| (s.name.clone(), *addr))
        .collect();
    (symbols, text.data.clone())
}

#[test]
fn compiles_for_x86() {
    let (symbols, text) = build("i686-unknown-none", Options::default());
    assert!(symbols.iter().any(|(n, _)| n == "Kernel::Main"));
    assert!(symbols.iter().any(|(n, _)| n == "Kernel::Twice"));
    assert!(symbols.iter().any(|(n, _)| n == "Kernel::ticks"));
    // Every method body begins with the frame prologue: push ebp.
    let main = symbols.iter().find(|(n, _)| n == "Kernel::Main").unwrap();
    let offset = (main.1 - 0x0040_0000) as usize;
    assert_eq!(text[offset], 0x55);
}

#[test]
fn compiles_for_x64() {
    let (symbols, text) = build("x86_64-unknown-none", Options::default());
    let main = symbols.iter().find(|(n, _)| n == "Kernel::Main").unwrap();
    let offset = (main.1 - 0x0040_0000) as usize;
    assert_eq!(text[offset], 0x55);
}

#[test]
fn compiles_for_armv8() {
    let (symbols, text) = build("aarch64-unknown-none", Options::default());
    let main = symbols.iter().find(|(n, _)| n == "Kernel::Main").unwrap();
    let offset = (main.1 - 0x0040_0000) as usize;
    // stp x29, x30, [sp, #-16]!.
    let word = u32::from_le_bytes(text[offset..offset + 4].try_into().unwrap());
    assert_eq!(word, 0xa9bf_7bfd);
}

#[test]
fn compiles_for_armv6() {
    let (symbols, text) = build("armv6-unknown-none-eabi", Options::default());
    let main = symbols.iter().find(|(n, _)| n == "Kernel::Main").unwrap();
    let offset = (main.1 - 0x0040_0000) as usize;
    // push {fp, lr}.
    let word = u32::from_le_bytes(text[offset..offset + 4].try_into().unwrap());
    assert_eq!(word, 0xe92d_4800);
}

#[test]
fn optimizations_do_not_change_the_artifact_shape() {
    let (symbols_opt, _) = build("i686-unknown-none", Options::default());
    let (symbols_raw, _) = build("i686-unknown-none", Options::no_opt());
    let names = |v: &Vec<(String, u64)>| {
        let mut names: Vec<String> = v.iter().map(|(n, _)| n.clone()).collect();
        names.sort();
        names
    };
    assert_eq!(names(&symbols_opt), names(&symbols_raw));
}

#[test]
fn multiboot_header_is_in_text() {
    let ts = sample_type_system();
    let compiler = Compiler::new(ts, &"i686-unknown-none".parse().unwrap(), Options::default())
        .unwrap();
    let linker = ObjectLinker::new(0x0040_0000);
    let errors = compiler.compile_all(&linker);
    assert!(errors.is_empty());
    multiboot::write_multiboot_header(&linker, "Kernel::Main").unwrap();
    let header = linker.get_symbol(multiboot::MULTIBOOT_HEADER_SYMBOL).unwrap();
    assert_eq!(header.section, SectionKind::Text);
    assert_eq!(header.size, 64);
}
