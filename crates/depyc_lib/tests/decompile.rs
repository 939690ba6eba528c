//! End-to-end decompilation over hand-assembled bytecode: each case builds
//! a code object the way CPython's compiler would have and checks the
//! reconstructed source.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use depyc_lib::decompile_source;
use depyc_lib::module::PycModule;
use depyc_lib::object::{CodeObject, ObjRef, PyObject, PyString};
use depyc_lib::version::PyVersion;

struct CodeSpec {
    version: PyVersion,
    arg_count: u32,
    consts: Vec<ObjRef>,
    names: Vec<&'static str>,
    var_names: Vec<&'static str>,
    code: Vec<u8>,
}

impl Default for CodeSpec {
    fn default() -> Self {
        Self {
            version: PyVersion::new(3, 8),
            arg_count: 0,
            consts: Vec::new(),
            names: Vec::new(),
            var_names: Vec::new(),
            code: Vec::new(),
        }
    }
}

fn make_code(spec: CodeSpec) -> Rc<CodeObject> {
    Rc::new(CodeObject {
        python: spec.version,
        arg_count: spec.arg_count,
        pos_only_arg_count: 0,
        kw_only_arg_count: 0,
        num_locals: spec.var_names.len() as u32,
        stack_size: 8,
        flags: 0,
        code: spec.code,
        consts: spec.consts,
        names: spec.names.into_iter().map(Rc::from).collect(),
        var_names: spec.var_names.into_iter().map(Rc::from).collect(),
        free_vars: Vec::new(),
        cell_vars: Vec::new(),
        local_kinds: Vec::new(),
        locals_plus: Vec::new(),
        file_name: Rc::from("test.py"),
        name: Rc::from("<module>"),
        qual_name: None,
        first_line: 1,
        line_table: Vec::new(),
        exception_table: Vec::new(),
    })
}

fn int(v: i32) -> ObjRef {
    Rc::new(PyObject::Int(v))
}

fn text(s: &str) -> ObjRef {
    Rc::new(PyObject::Str(PyString::ascii(s)))
}

fn none() -> ObjRef {
    Rc::new(PyObject::None)
}

/// Decompiles and strips the two header lines plus the blank separator.
fn body(spec: CodeSpec) -> String {
    let version = spec.version;
    let module = PycModule {
        version,
        unicode: false,
        header_flags: 0,
        code: make_code(spec),
    };
    let full = decompile_source(&module, "test.pyc").expect("decompile");
    let mut lines = full.lines();
    assert_eq!(lines.next(), Some("# Source Generated by depyc"));
    assert!(lines.next().is_some_and(|l| l.starts_with("# File: test.pyc")));
    assert_eq!(lines.next(), Some(""));
    let rest: Vec<&str> = lines.collect();
    if rest.is_empty() {
        String::new()
    } else {
        rest.join("\n") + "\n"
    }
}

#[test]
fn binary_add_return() {
    // LOAD_CONST 1; LOAD_CONST 2; BINARY_ADD; RETURN_VALUE
    let out = body(CodeSpec {
        consts: vec![int(1), int(2)],
        code: vec![100, 0, 100, 1, 23, 0, 83, 0],
        ..Default::default()
    });
    assert_eq!(out, "return 1 + 2\n");
}

#[test]
fn conditional_return() {
    // if x > 0: return x
    // return 0
    let out = body(CodeSpec {
        consts: vec![int(0)],
        var_names: vec!["x"],
        code: vec![
            124, 0, // LOAD_FAST x
            100, 0, // LOAD_CONST 0
            107, 4, // COMPARE_OP >
            114, 12, // POP_JUMP_IF_FALSE 12
            124, 0, // LOAD_FAST x
            83, 0, // RETURN_VALUE
            100, 0, // LOAD_CONST 0
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "if x > 0:\n    return x\nreturn 0\n");
}

#[test]
fn list_comprehension() {
    // return [x * 2 for x in xs]   (3.9 shape, in-code-object generator)
    let out = body(CodeSpec {
        version: PyVersion::new(3, 9),
        consts: vec![int(2)],
        var_names: vec!["xs", "x"],
        code: vec![
            103, 0, // BUILD_LIST 0
            124, 0, // LOAD_FAST xs
            68, 0, // GET_ITER
            93, 12, // FOR_ITER -> 20
            125, 1, // STORE_FAST x
            124, 1, // LOAD_FAST x
            100, 0, // LOAD_CONST 2
            20, 0, // BINARY_MULTIPLY
            145, 2, // LIST_APPEND 2
            113, 6, // JUMP_ABSOLUTE 6
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "return [x * 2 for x in xs]\n");
}

#[test]
fn fstring() {
    // return f'x={x}'
    let out = body(CodeSpec {
        consts: vec![text("x=")],
        var_names: vec!["x"],
        code: vec![
            100, 0, // LOAD_CONST 'x='
            124, 0, // LOAD_FAST x
            155, 0, // FORMAT_VALUE 0
            157, 2, // BUILD_STRING 2
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "return f'x={x}'\n");
}

#[test]
fn sequence_unpack() {
    // a, b, c = (1, 2, 3)
    let tup = Rc::new(PyObject::Tuple(vec![int(1), int(2), int(3)]));
    let out = body(CodeSpec {
        consts: vec![tup, none()],
        var_names: vec!["a", "b", "c"],
        code: vec![
            100, 0, // LOAD_CONST (1, 2, 3)
            92, 3, // UNPACK_SEQUENCE 3
            125, 0, // STORE_FAST a
            125, 1, // STORE_FAST b
            125, 2, // STORE_FAST c
            100, 1, // LOAD_CONST None
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "a, b, c = (1, 2, 3)\n");
}

#[test]
fn chained_comparison() {
    // return a < b < c
    let out = body(CodeSpec {
        var_names: vec!["a", "b", "c"],
        code: vec![
            124, 0, // LOAD_FAST a
            124, 1, // LOAD_FAST b
            4, 0, // DUP_TOP
            3, 0, // ROT_THREE
            107, 0, // COMPARE_OP <
            111, 18, // JUMP_IF_FALSE_OR_POP 18
            124, 2, // LOAD_FAST c
            107, 0, // COMPARE_OP <
            83, 0, // RETURN_VALUE
            2, 0, // ROT_TWO
            1, 0, // POP_TOP
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "return a < b < c\n");
}

#[test]
fn while_loop() {
    // while x: f()
    let out = body(CodeSpec {
        consts: vec![none()],
        names: vec!["f"],
        var_names: vec!["x"],
        code: vec![
            124, 0, // 0: LOAD_FAST x
            114, 12, // 2: POP_JUMP_IF_FALSE 12
            116, 0, // 4: LOAD_GLOBAL f
            131, 0, // 6: CALL_FUNCTION 0
            1, 0, // 8: POP_TOP
            113, 0, // 10: JUMP_ABSOLUTE 0
            100, 0, // 12: LOAD_CONST None
            83, 0, // 14: RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "while x:\n    f()\n");
}

#[test]
fn for_loop() {
    // for i in xs: f(i)
    let out = body(CodeSpec {
        consts: vec![none()],
        names: vec!["f"],
        var_names: vec!["xs", "i"],
        code: vec![
            124, 0, // 0: LOAD_FAST xs
            68, 0, // 2: GET_ITER
            93, 12, // 4: FOR_ITER -> 18
            125, 1, // 6: STORE_FAST i
            116, 0, // 8: LOAD_GLOBAL f
            124, 1, // 10: LOAD_FAST i
            131, 1, // 12: CALL_FUNCTION 1
            1, 0, // 14: POP_TOP
            113, 4, // 16: JUMP_ABSOLUTE 4
            100, 0, // 18: LOAD_CONST None
            83, 0, // 20: RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "for i in xs:\n    f(i)\n");
}

#[test]
fn ternary_expression() {
    // x = a if c else b
    let out = body(CodeSpec {
        consts: vec![none()],
        var_names: vec!["c", "a", "b", "x"],
        code: vec![
            124, 0, // 0: LOAD_FAST c
            114, 8, // 2: POP_JUMP_IF_FALSE 8
            124, 1, // 4: LOAD_FAST a
            110, 2, // 6: JUMP_FORWARD +2 -> 10
            124, 2, // 8: LOAD_FAST b
            125, 3, // 10: STORE_FAST x
            100, 0, // 12: LOAD_CONST None
            83, 0, // 14: RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "x = a if c else b\n");
}

#[test]
fn short_circuit_and() {
    // return a and b
    let out = body(CodeSpec {
        var_names: vec!["a", "b"],
        code: vec![
            124, 0, // LOAD_FAST a
            111, 6, // JUMP_IF_FALSE_OR_POP 6
            124, 1, // LOAD_FAST b
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "return a and b\n");
}

#[test]
fn chain_store() {
    // a = b = 5
    let out = body(CodeSpec {
        consts: vec![int(5), none()],
        names: vec!["a", "b"],
        code: vec![
            100, 0, // LOAD_CONST 5
            4, 0, // DUP_TOP
            90, 0, // STORE_NAME a
            90, 1, // STORE_NAME b
            100, 1, // LOAD_CONST None
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "a = b = 5\n");
}

#[test]
fn plain_import() {
    // import os
    let out = body(CodeSpec {
        consts: vec![int(0), none()],
        names: vec!["os"],
        code: vec![
            100, 0, // LOAD_CONST 0 (level)
            100, 1, // LOAD_CONST None (fromlist)
            108, 0, // IMPORT_NAME os
            90, 0, // STORE_NAME os
            100, 1, // LOAD_CONST None
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "import os\n");
}

#[test]
fn from_import_with_alias() {
    // from os import path as p
    let fromlist = Rc::new(PyObject::Tuple(vec![text("path")]));
    let out = body(CodeSpec {
        consts: vec![int(0), fromlist, none()],
        names: vec!["os", "path", "p"],
        code: vec![
            100, 0, // LOAD_CONST 0
            100, 1, // LOAD_CONST ('path',)
            108, 0, // IMPORT_NAME os
            109, 1, // IMPORT_FROM path
            90, 2, // STORE_NAME p
            1, 0, // POP_TOP
            100, 2, // LOAD_CONST None
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "from os import path as p\n");
}

#[test]
fn function_definition() {
    // def f(a): return a
    let inner = Rc::new(CodeObject {
        python: PyVersion::new(3, 8),
        arg_count: 1,
        pos_only_arg_count: 0,
        kw_only_arg_count: 0,
        num_locals: 1,
        stack_size: 1,
        flags: 0x43, // OPTIMIZED | NEWLOCALS | NOFREE
        code: vec![124, 0, 83, 0],
        consts: vec![],
        names: vec![],
        var_names: vec![Rc::from("a")],
        free_vars: Vec::new(),
        cell_vars: Vec::new(),
        local_kinds: Vec::new(),
        locals_plus: Vec::new(),
        file_name: Rc::from("test.py"),
        name: Rc::from("f"),
        qual_name: None,
        first_line: 1,
        line_table: Vec::new(),
        exception_table: Vec::new(),
    });
    let out = body(CodeSpec {
        consts: vec![Rc::new(PyObject::Code(inner)), text("f"), none()],
        names: vec!["f"],
        code: vec![
            100, 0, // LOAD_CONST <code f>
            100, 1, // LOAD_CONST 'f'
            132, 0, // MAKE_FUNCTION 0
            90, 0, // STORE_NAME f
            100, 2, // LOAD_CONST None
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "\ndef f(a):\n    return a\n\n");
}

#[test]
fn unknown_opcode_degrades() {
    // An unmapped byte becomes a placeholder, not a failure.
    let out = body(CodeSpec {
        code: vec![
            255, 0, // UNKNOWN
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "return <UNKNOWN_OPCODE_255>\n");
}

#[test]
fn empty_module_body() {
    // LOAD_CONST None; RETURN_VALUE at module scope prints nothing.
    let out = body(CodeSpec {
        consts: vec![none()],
        code: vec![100, 0, 83, 0],
        ..Default::default()
    });
    assert_eq!(out, "");
}

#[test]
fn inplace_operator() {
    // x += 1
    let out = body(CodeSpec {
        consts: vec![int(1), none()],
        var_names: vec!["x"],
        code: vec![
            124, 0, // LOAD_FAST x
            100, 0, // LOAD_CONST 1
            55, 0, // INPLACE_ADD
            125, 0, // STORE_FAST x
            100, 1, // LOAD_CONST None
            83, 0, // RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "x += 1\n");
}

#[test]
fn if_else_statement() {
    // if c: a = 1
    // else: a = 2
    let out = body(CodeSpec {
        consts: vec![int(1), int(2), none()],
        var_names: vec!["c", "a"],
        code: vec![
            124, 0, // 0: LOAD_FAST c
            114, 10, // 2: POP_JUMP_IF_FALSE 10
            100, 0, // 4: LOAD_CONST 1
            125, 1, // 6: STORE_FAST a
            110, 4, // 8: JUMP_FORWARD +4 -> 14
            100, 1, // 10: LOAD_CONST 2
            125, 1, // 12: STORE_FAST a
            100, 2, // 14: LOAD_CONST None
            83, 0, // 16: RETURN_VALUE
        ],
        ..Default::default()
    });
    assert_eq!(out, "if c:\n    a = 1\nelse:\n    a = 2\n");
}
