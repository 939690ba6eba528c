//! Full-pipeline tests over a hand-marshalled `.pyc` image: header parse,
//! marshal decode, and both front-ends.

use depyc_lib::{decompile_source, disassemble, DisasmOptions, PycModule, PyVersion};

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend(v.to_le_bytes());
}

/// A 3.8-layout marshalled code object for `x = 5` at module scope.
fn marshalled_module() -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'c');
    push_u32(&mut out, 0); // argcount
    push_u32(&mut out, 0); // posonlyargcount
    push_u32(&mut out, 0); // kwonlyargcount
    push_u32(&mut out, 0); // nlocals
    push_u32(&mut out, 1); // stacksize
    push_u32(&mut out, 0x40); // flags (CO_NOFREE)

    // code: LOAD_CONST 0; STORE_NAME 0; LOAD_CONST 1; RETURN_VALUE
    out.push(b's');
    push_u32(&mut out, 8);
    out.extend([100, 0, 90, 0, 100, 1, 83, 0]);

    // consts: (5, None)
    out.push(b')');
    out.push(2);
    out.push(b'i');
    push_u32(&mut out, 5);
    out.push(b'N');

    // names: ('x',)
    out.push(b')');
    out.push(1);
    out.push(b'z');
    out.push(1);
    out.push(b'x');

    // varnames, freevars, cellvars: ()
    for _ in 0..3 {
        out.push(b')');
        out.push(0);
    }

    // filename, name
    out.push(b'z');
    out.push(4);
    out.extend(b"m.py");
    out.push(b'z');
    out.push(8);
    out.extend(b"<module>");

    push_u32(&mut out, 1); // firstlineno
    out.push(b's'); // lnotab
    push_u32(&mut out, 0);
    out
}

fn pyc_image() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(3413u16.to_le_bytes());
    out.extend([0x0D, 0x0A]);
    push_u32(&mut out, 0); // header bit-field
    push_u32(&mut out, 0); // mtime
    push_u32(&mut out, 0); // source size
    out.extend(marshalled_module());
    out
}

#[test]
fn decompile_whole_pyc() {
    let module = PycModule::load(&pyc_image()).expect("load");
    assert_eq!(module.version, PyVersion::new(3, 8));
    assert_eq!(&*module.code.name, "<module>");

    let src = decompile_source(&module, "m.pyc").expect("decompile");
    assert!(src.starts_with("# Source Generated by depyc\n"));
    assert!(src.contains("# File: m.pyc (Python 3.8)\n"));
    assert!(src.contains("x = 5\n"));
}

#[test]
fn raw_marshalled_code_object() {
    let module =
        PycModule::load_marshalled(&marshalled_module(), PyVersion::new(3, 8)).expect("load");
    let src = decompile_source(&module, "m").expect("decompile");
    assert!(src.contains("x = 5"));
}

#[test]
fn disassemble_whole_pyc() {
    let module = PycModule::load(&pyc_image()).expect("load");
    let text = disassemble(&module, "m.pyc", DisasmOptions::default()).expect("disasm");
    assert!(text.contains("m.pyc (Python 3.8)"));
    assert!(text.contains("[Code]"));
    assert!(text.contains("Object Name: <module>"));
    assert!(text.contains("[Names]"));
    assert!(text.contains("'x'"));
    assert!(text.contains("[Constants]"));
    assert!(text.contains("[Disassembly]"));
    assert!(text.contains("LOAD_CONST"));
    assert!(text.contains("STORE_NAME"));
    assert!(text.contains("CO_NOFREE"));
}

#[test]
fn verbose_disassembly_adds_line_table() {
    let module = PycModule::load(&pyc_image()).expect("load");
    let options = DisasmOptions {
        pycode_extra: true,
        show_caches: false,
    };
    let text = disassemble(&module, "m.pyc", options).expect("disasm");
    assert!(text.contains("First Line: 1"));
    assert!(text.contains("[Line Table]"));
}

#[test]
fn truncated_image_fails_with_offset() {
    let mut img = pyc_image();
    img.truncate(20);
    let err = PycModule::load(&img).unwrap_err();
    assert!(matches!(err, depyc_lib::DepycError::Eof { .. }));
}
