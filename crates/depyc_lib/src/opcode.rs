//! Version-neutral opcode identification.
//!
//! CPython renumbers its bytecode with nearly every release; `Opcode` is the
//! union of every instruction we understand across 1.0 through 3.13, and
//! `opcode_from_raw` maps a `(version, raw byte)` pair into it. The tables
//! are organized as one base map per bytecode family with small per-minor
//! patch layers in front, mirroring how the instruction sets actually
//! evolved. Unknown bytes map to [`Opcode::UNKNOWN`]; decoding never fails.
//!
//! Operand interpretation (index namespaces, jump flavours, the comparison
//! sub-operand) lives in [`OperandKind`].

use serde::{Deserialize, Serialize};

use crate::version::PyVersion;

macro_rules! define_opcodes {
    ($($op:ident,)*) => {
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Opcode {
            $($op,)*
        }

        impl Opcode {
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$op => stringify!($op),)*
                }
            }
        }
    };
}

define_opcodes! {
    // sentinels
    UNKNOWN, CACHE, NOP, STOP_CODE, EXTENDED_ARG, RESUME, RESERVED,
    INTERPRETER_EXIT, SET_LINENO,
    // stack shuffling
    POP_TOP, ROT_TWO, ROT_THREE, ROT_FOUR, ROT_N, DUP_TOP, DUP_TOP_TWO,
    DUP_TOPX, COPY, SWAP,
    // unary
    UNARY_POSITIVE, UNARY_NEGATIVE, UNARY_NOT, UNARY_CONVERT, UNARY_INVERT,
    UNARY_CALL, TO_BOOL,
    // binary / inplace
    BINARY_POWER, BINARY_MULTIPLY, BINARY_DIVIDE, BINARY_MODULO, BINARY_ADD,
    BINARY_SUBTRACT, BINARY_SUBSCR, BINARY_FLOOR_DIVIDE, BINARY_TRUE_DIVIDE,
    BINARY_LSHIFT, BINARY_RSHIFT, BINARY_AND, BINARY_XOR, BINARY_OR,
    BINARY_MATRIX_MULTIPLY, BINARY_CALL, BINARY_OP, BINARY_SLICE,
    INPLACE_ADD, INPLACE_SUBTRACT, INPLACE_MULTIPLY, INPLACE_DIVIDE,
    INPLACE_MODULO, INPLACE_POWER, INPLACE_LSHIFT, INPLACE_RSHIFT,
    INPLACE_AND, INPLACE_XOR, INPLACE_OR, INPLACE_FLOOR_DIVIDE,
    INPLACE_TRUE_DIVIDE, INPLACE_MATRIX_MULTIPLY,
    // Python 2 slices
    SLICE_0, SLICE_1, SLICE_2, SLICE_3,
    STORE_SLICE_0, STORE_SLICE_1, STORE_SLICE_2, STORE_SLICE_3,
    DELETE_SLICE_0, DELETE_SLICE_1, DELETE_SLICE_2, DELETE_SLICE_3,
    BUILD_SLICE, STORE_SLICE,
    // subscripts
    STORE_SUBSCR, DELETE_SUBSCR, STORE_MAP,
    // iterators / async
    GET_ITER, GET_YIELD_FROM_ITER, GET_AITER, GET_ANEXT, GET_AWAITABLE,
    GET_LEN, END_FOR, END_SEND, SEND, END_ASYNC_FOR,
    // printing (Python 2)
    PRINT_EXPR, PRINT_ITEM, PRINT_NEWLINE, PRINT_ITEM_TO, PRINT_NEWLINE_TO,
    // control
    BREAK_LOOP, CONTINUE_LOOP, RETURN_VALUE, RETURN_CONST, RETURN_GENERATOR,
    YIELD_VALUE, YIELD_FROM, RAISE_VARARGS, RAISE_EXCEPTION, RERAISE,
    JUMP_FORWARD, JUMP_ABSOLUTE, JUMP_BACKWARD, JUMP_BACKWARD_NO_INTERRUPT,
    JUMP_IF_FALSE, JUMP_IF_TRUE, JUMP_IF_FALSE_OR_POP, JUMP_IF_TRUE_OR_POP,
    POP_JUMP_IF_FALSE, POP_JUMP_IF_TRUE, POP_JUMP_IF_NONE,
    POP_JUMP_IF_NOT_NONE, POP_JUMP_BACK_IF_FALSE, POP_JUMP_BACK_IF_TRUE,
    POP_JUMP_BACK_IF_NONE, POP_JUMP_BACK_IF_NOT_NONE, JUMP_IF_NOT_EXC_MATCH,
    FOR_ITER, FOR_LOOP,
    // blocks
    SETUP_LOOP, SETUP_EXCEPT, SETUP_FINALLY, SETUP_WITH, SETUP_ASYNC_WITH,
    POP_BLOCK, POP_EXCEPT, END_FINALLY, BEGIN_FINALLY, CALL_FINALLY,
    POP_FINALLY, WITH_CLEANUP, WITH_CLEANUP_START, WITH_CLEANUP_FINISH,
    WITH_EXCEPT_START, BEFORE_WITH, BEFORE_ASYNC_WITH, PUSH_EXC_INFO,
    CHECK_EXC_MATCH, CHECK_EG_MATCH, PREP_RERAISE_STAR, CLEANUP_THROW,
    ASYNC_GEN_WRAP,
    // names and variables
    STORE_NAME, DELETE_NAME, STORE_ATTR, DELETE_ATTR, STORE_GLOBAL,
    DELETE_GLOBAL, LOAD_CONST, LOAD_NAME, LOAD_ATTR, LOAD_GLOBAL, LOAD_FAST,
    STORE_FAST, DELETE_FAST, LOAD_FAST_CHECK, LOAD_FAST_AND_CLEAR,
    LOAD_FAST_LOAD_FAST, STORE_FAST_STORE_FAST, STORE_FAST_LOAD_FAST,
    LOAD_CLOSURE, LOAD_DEREF, STORE_DEREF, DELETE_DEREF, LOAD_CLASSDEREF,
    LOAD_LOCALS, STORE_LOCALS, LOAD_BUILD_CLASS, LOAD_ASSERTION_ERROR,
    LOAD_METHOD, LOAD_SUPER_ATTR, LOAD_FROM_DICT_OR_GLOBALS,
    LOAD_FROM_DICT_OR_DEREF, MAKE_CELL, COPY_FREE_VARS,
    SETUP_ANNOTATIONS, STORE_ANNOTATION,
    // containers
    BUILD_TUPLE, BUILD_LIST, BUILD_SET, BUILD_MAP, BUILD_CONST_KEY_MAP,
    BUILD_STRING, BUILD_TUPLE_UNPACK, BUILD_LIST_UNPACK, BUILD_SET_UNPACK,
    BUILD_MAP_UNPACK, BUILD_MAP_UNPACK_WITH_CALL,
    BUILD_TUPLE_UNPACK_WITH_CALL, LIST_APPEND, SET_ADD, MAP_ADD, LIST_EXTEND,
    SET_UPDATE, DICT_MERGE, DICT_UPDATE, LIST_TO_TUPLE,
    UNPACK_SEQUENCE, UNPACK_TUPLE, UNPACK_LIST, UNPACK_EX,
    COPY_DICT_WITHOUT_KEYS,
    // comparisons
    COMPARE_OP, IS_OP, CONTAINS_OP,
    // imports
    IMPORT_NAME, IMPORT_FROM, IMPORT_STAR,
    // functions, classes, calls
    MAKE_FUNCTION, MAKE_CLOSURE, BUILD_FUNCTION, SET_FUNCTION_ATTRIBUTE,
    BUILD_CLASS, CALL_FUNCTION, CALL_FUNCTION_VAR, CALL_FUNCTION_KW,
    CALL_FUNCTION_VAR_KW, CALL_FUNCTION_EX, CALL_METHOD, CALL, CALL_KW,
    PRECALL, PUSH_NULL, KW_NAMES, CALL_INTRINSIC_1, CALL_INTRINSIC_2,
    EXIT_INIT_CHECK, GEN_START,
    // statements
    EXEC_STMT,
    // f-strings
    FORMAT_VALUE, CONVERT_VALUE, FORMAT_SIMPLE, FORMAT_WITH_SPEC,
    // pattern matching
    MATCH_MAPPING, MATCH_SEQUENCE, MATCH_KEYS, MATCH_CLASS,
}

/// Operand shape, used for resolution in the disassembly and for jump-target
/// arithmetic in the decompiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    None,
    /// Plain number; one byte per word under wordcode, 16 bits before.
    UInt8,
    UInt16,
    /// Relative jump, forward from the following instruction.
    JRel,
    /// Relative jump, backward from the following instruction.
    JRelBack,
    /// Absolute jump.
    JAbs,
    NameIdx,
    VarIdx,
    ConstIdx,
    FreeIdx,
    CmpOp,
}

/// First raw value carrying an operand, for pre-wordcode streams.
pub const HAVE_ARGUMENT: u8 = 90;

pub fn opcode_from_raw(ver: PyVersion, raw: u8) -> Opcode {
    match ver.major {
        1 => map_py1(ver.minor, raw),
        2 => map_py2(ver.minor, raw),
        3 => match ver.minor {
            0..=5 => map_py30_35(ver.minor, raw),
            6 | 7 => map_py36_37(ver.minor, raw),
            8..=10 => map_py38_310(ver.minor, raw),
            11 => map_py311(raw),
            12 => map_py312(raw),
            _ => map_py313(raw),
        },
        _ => Opcode::UNKNOWN,
    }
}

/// Classic (2.7) numbering; the baseline for both the 1.x and 2.x layers.
fn map_py2(minor: u8, raw: u8) -> Opcode {
    use Opcode::*;
    // Per-minor relocations first; everything else falls through to the
    // 2.7 base table.
    if minor <= 6 {
        match raw {
            18 => return LIST_APPEND,
            94 => return UNKNOWN,
            104 => return BUILD_MAP,
            105 => return LOAD_ATTR,
            106 => return COMPARE_OP,
            107 => return IMPORT_NAME,
            108 => return IMPORT_FROM,
            109 => return UNKNOWN,
            111 => return JUMP_IF_FALSE,
            112 => return JUMP_IF_TRUE,
            114 | 115 => return UNKNOWN,
            143 => return EXTENDED_ARG,
            145..=147 => return UNKNOWN,
            _ => {}
        }
    }
    if minor <= 5 {
        match raw {
            54 => return UNKNOWN,            // STORE_MAP added in 2.6
            _ => {}
        }
    }
    if minor <= 4 {
        match raw {
            81 => return UNKNOWN,            // WITH_CLEANUP added in 2.5
            _ => {}
        }
    }
    if minor <= 2 {
        match raw {
            127 => return SET_LINENO,
            _ => {}
        }
    }
    if minor <= 1 {
        match raw {
            26..=29 => return UNKNOWN,       // floor/true divide added in 2.2
            86 => return UNKNOWN,            // YIELD_VALUE added in 2.2
            _ => {}
        }
    }
    match raw {
        0 => STOP_CODE,
        1 => POP_TOP,
        2 => ROT_TWO,
        3 => ROT_THREE,
        4 => DUP_TOP,
        5 => ROT_FOUR,
        9 => NOP,
        10 => UNARY_POSITIVE,
        11 => UNARY_NEGATIVE,
        12 => UNARY_NOT,
        13 => UNARY_CONVERT,
        15 => UNARY_INVERT,
        19 => BINARY_POWER,
        20 => BINARY_MULTIPLY,
        21 => BINARY_DIVIDE,
        22 => BINARY_MODULO,
        23 => BINARY_ADD,
        24 => BINARY_SUBTRACT,
        25 => BINARY_SUBSCR,
        26 => BINARY_FLOOR_DIVIDE,
        27 => BINARY_TRUE_DIVIDE,
        28 => INPLACE_FLOOR_DIVIDE,
        29 => INPLACE_TRUE_DIVIDE,
        30 => SLICE_0,
        31 => SLICE_1,
        32 => SLICE_2,
        33 => SLICE_3,
        40 => STORE_SLICE_0,
        41 => STORE_SLICE_1,
        42 => STORE_SLICE_2,
        43 => STORE_SLICE_3,
        50 => DELETE_SLICE_0,
        51 => DELETE_SLICE_1,
        52 => DELETE_SLICE_2,
        53 => DELETE_SLICE_3,
        54 => STORE_MAP,
        55 => INPLACE_ADD,
        56 => INPLACE_SUBTRACT,
        57 => INPLACE_MULTIPLY,
        58 => INPLACE_DIVIDE,
        59 => INPLACE_MODULO,
        60 => STORE_SUBSCR,
        61 => DELETE_SUBSCR,
        62 => BINARY_LSHIFT,
        63 => BINARY_RSHIFT,
        64 => BINARY_AND,
        65 => BINARY_XOR,
        66 => BINARY_OR,
        67 => INPLACE_POWER,
        68 => GET_ITER,
        70 => PRINT_EXPR,
        71 => PRINT_ITEM,
        72 => PRINT_NEWLINE,
        73 => PRINT_ITEM_TO,
        74 => PRINT_NEWLINE_TO,
        75 => INPLACE_LSHIFT,
        76 => INPLACE_RSHIFT,
        77 => INPLACE_AND,
        78 => INPLACE_XOR,
        79 => INPLACE_OR,
        80 => BREAK_LOOP,
        81 => WITH_CLEANUP,
        82 => LOAD_LOCALS,
        83 => RETURN_VALUE,
        84 => IMPORT_STAR,
        85 => EXEC_STMT,
        86 => YIELD_VALUE,
        87 => POP_BLOCK,
        88 => END_FINALLY,
        89 => BUILD_CLASS,
        90 => STORE_NAME,
        91 => DELETE_NAME,
        92 => UNPACK_SEQUENCE,
        93 => FOR_ITER,
        94 => LIST_APPEND,
        95 => STORE_ATTR,
        96 => DELETE_ATTR,
        97 => STORE_GLOBAL,
        98 => DELETE_GLOBAL,
        99 => DUP_TOPX,
        100 => LOAD_CONST,
        101 => LOAD_NAME,
        102 => BUILD_TUPLE,
        103 => BUILD_LIST,
        104 => BUILD_SET,
        105 => BUILD_MAP,
        106 => LOAD_ATTR,
        107 => COMPARE_OP,
        108 => IMPORT_NAME,
        109 => IMPORT_FROM,
        110 => JUMP_FORWARD,
        111 => JUMP_IF_FALSE_OR_POP,
        112 => JUMP_IF_TRUE_OR_POP,
        113 => JUMP_ABSOLUTE,
        114 => POP_JUMP_IF_FALSE,
        115 => POP_JUMP_IF_TRUE,
        116 => LOAD_GLOBAL,
        119 => CONTINUE_LOOP,
        120 => SETUP_LOOP,
        121 => SETUP_EXCEPT,
        122 => SETUP_FINALLY,
        124 => LOAD_FAST,
        125 => STORE_FAST,
        126 => DELETE_FAST,
        130 => RAISE_VARARGS,
        131 => CALL_FUNCTION,
        132 => MAKE_FUNCTION,
        133 => BUILD_SLICE,
        134 => MAKE_CLOSURE,
        135 => LOAD_CLOSURE,
        136 => LOAD_DEREF,
        137 => STORE_DEREF,
        140 => CALL_FUNCTION_VAR,
        141 => CALL_FUNCTION_KW,
        142 => CALL_FUNCTION_VAR_KW,
        143 => SETUP_WITH,
        145 => EXTENDED_ARG,
        146 => SET_ADD,
        147 => MAP_ADD,
        _ => UNKNOWN,
    }
}

/// 1.x shares the classic numbering minus later additions; the handful of
/// early-only instructions layer on top. 1.0-1.2 oddities collapse onto the
/// 1.3 layout.
fn map_py1(minor: u8, raw: u8) -> Opcode {
    use Opcode::*;
    match raw {
        14 if minor < 3 => return UNARY_CALL,
        17 if minor < 3 => return BINARY_CALL,
        81 if minor < 3 => return RAISE_EXCEPTION,
        86 if minor < 3 => return BUILD_FUNCTION,
        26..=29 => return UNKNOWN,
        54 => return UNKNOWN,
        68 => return UNKNOWN,
        86 => return UNKNOWN,
        92 => return UNPACK_TUPLE,
        93 => return UNPACK_LIST,
        94 => return UNKNOWN,
        111 => return JUMP_IF_FALSE,
        112 => return JUMP_IF_TRUE,
        114 => return FOR_LOOP,
        115 => return UNKNOWN,
        127 => return SET_LINENO,
        134..=147 => return UNKNOWN,
        _ => {}
    }
    map_py2(0, raw)
}

/// 3.0 through 3.5 keep the classic spine with the Python-2-only statement
/// opcodes dropped and the async/matrix instructions arriving in 3.5.
fn map_py30_35(minor: u8, raw: u8) -> Opcode {
    use Opcode::*;
    if minor >= 5 {
        match raw {
            16 => return BINARY_MATRIX_MULTIPLY,
            17 => return INPLACE_MATRIX_MULTIPLY,
            50 => return GET_AITER,
            51 => return GET_ANEXT,
            52 => return BEFORE_ASYNC_WITH,
            54 => return UNKNOWN, // STORE_MAP removed in 3.5
            69 => return GET_YIELD_FROM_ITER,
            73 => return GET_AWAITABLE,
            81 => return WITH_CLEANUP_START,
            82 => return WITH_CLEANUP_FINISH,
            149 => return BUILD_LIST_UNPACK,
            150 => return BUILD_MAP_UNPACK,
            151 => return BUILD_MAP_UNPACK_WITH_CALL,
            152 => return BUILD_TUPLE_UNPACK,
            153 => return BUILD_SET_UNPACK,
            154 => return SETUP_ASYNC_WITH,
            _ => {}
        }
    }
    if minor == 0 {
        // POP_JUMP / *_OR_POP landed in 3.1; 3.0 still had the plain forms.
        match raw {
            111 => return JUMP_IF_FALSE,
            112 => return JUMP_IF_TRUE,
            114 | 115 => return UNKNOWN,
            _ => {}
        }
    }
    match raw {
        5 => return DUP_TOP_TWO,
        // Python 2 leftovers with no 3.x meaning at these numbers.
        13 | 21 | 30..=33 | 40..=43 | 50..=53 | 58 | 82 | 85 => return UNKNOWN,
        69 => {
            return if minor <= 2 { STORE_LOCALS } else { UNKNOWN };
        }
        71 => return LOAD_BUILD_CLASS,
        72 => {
            return if minor >= 3 { YIELD_FROM } else { UNKNOWN };
        }
        73 | 74 => return UNKNOWN,          // PRINT_ITEM_TO / PRINT_NEWLINE_TO
        81 => return WITH_CLEANUP,
        89 => return POP_EXCEPT,
        94 => return UNPACK_EX,
        99 => {
            return if minor <= 1 { DUP_TOPX } else { UNKNOWN };
        }
        138 => return DELETE_DEREF,
        143 => return SETUP_WITH,
        144 => return EXTENDED_ARG,
        145 => return LIST_APPEND,
        146 => return SET_ADD,
        147 => return MAP_ADD,
        148 => {
            return if minor >= 4 { LOAD_CLASSDEREF } else { UNKNOWN };
        }
        _ => {}
    }
    map_py2(7, raw)
}

fn map_py36_37(minor: u8, raw: u8) -> Opcode {
    use Opcode::*;
    match raw {
        127 if minor == 6 => return STORE_ANNOTATION,
        85 => return SETUP_ANNOTATIONS,
        140 => return UNKNOWN,              // CALL_FUNCTION_VAR is gone
        142 => return CALL_FUNCTION_EX,
        155 => return FORMAT_VALUE,
        156 => return BUILD_CONST_KEY_MAP,
        157 => return BUILD_STRING,
        158 => return BUILD_TUPLE_UNPACK_WITH_CALL,
        160 if minor >= 7 => return LOAD_METHOD,
        161 if minor >= 7 => return CALL_METHOD,
        _ => {}
    }
    map_py30_35(5, raw)
}

fn map_py38_310(minor: u8, raw: u8) -> Opcode {
    use Opcode::*;
    if minor >= 10 {
        match raw {
            30 => return GET_LEN,
            31 => return MATCH_MAPPING,
            32 => return MATCH_SEQUENCE,
            33 => return MATCH_KEYS,
            34 => return COPY_DICT_WITHOUT_KEYS,
            48 => return UNKNOWN,
            99 => return ROT_N,
            119 => return RERAISE,
            129 => return GEN_START,
            152 => return MATCH_CLASS,
            _ => {}
        }
    }
    if minor >= 9 {
        match raw {
            48 => return RERAISE, // moved to 119 in 3.10, handled above
            49 => return WITH_EXCEPT_START,
            53 | 88 => return UNKNOWN, // BEGIN_FINALLY / END_FINALLY are gone
            74 => return LOAD_ASSERTION_ERROR,
            81 => return UNKNOWN,      // WITH_CLEANUP_START is gone
            82 => return LIST_TO_TUPLE,
            117 => return IS_OP,
            118 => return CONTAINS_OP,
            121 => return JUMP_IF_NOT_EXC_MATCH,
            149..=153 => return UNKNOWN, // BUILD_*_UNPACK family gone
            162 => return LIST_EXTEND,
            163 => return SET_UPDATE,
            164 => return DICT_MERGE,
            165 => return DICT_UPDATE,
            _ => {}
        }
    }
    match raw {
        6 => return ROT_FOUR,
        53 => return BEGIN_FINALLY,
        54 => return END_ASYNC_FOR,
        // BREAK_LOOP / CONTINUE_LOOP / SETUP_LOOP / SETUP_EXCEPT are gone
        // from 3.8 on (121 comes back as JUMP_IF_NOT_EXC_MATCH above).
        80 | 119 | 120 | 121 => return UNKNOWN,
        162 => return CALL_FINALLY,
        163 => return POP_FINALLY,
        _ => {}
    }
    map_py36_37(7, raw)
}

fn map_py311(raw: u8) -> Opcode {
    use Opcode::*;
    match raw {
        0 => CACHE,
        1 => POP_TOP,
        2 => PUSH_NULL,
        9 => NOP,
        10 => UNARY_POSITIVE,
        11 => UNARY_NEGATIVE,
        12 => UNARY_NOT,
        15 => UNARY_INVERT,
        25 => BINARY_SUBSCR,
        30 => GET_LEN,
        31 => MATCH_MAPPING,
        32 => MATCH_SEQUENCE,
        33 => MATCH_KEYS,
        35 => PUSH_EXC_INFO,
        36 => CHECK_EXC_MATCH,
        37 => CHECK_EG_MATCH,
        49 => WITH_EXCEPT_START,
        50 => GET_AITER,
        51 => GET_ANEXT,
        52 => BEFORE_ASYNC_WITH,
        53 => BEFORE_WITH,
        54 => END_ASYNC_FOR,
        60 => STORE_SUBSCR,
        61 => DELETE_SUBSCR,
        68 => GET_ITER,
        69 => GET_YIELD_FROM_ITER,
        70 => PRINT_EXPR,
        71 => LOAD_BUILD_CLASS,
        74 => LOAD_ASSERTION_ERROR,
        75 => RETURN_GENERATOR,
        82 => LIST_TO_TUPLE,
        83 => RETURN_VALUE,
        84 => IMPORT_STAR,
        85 => SETUP_ANNOTATIONS,
        86 => YIELD_VALUE,
        87 => ASYNC_GEN_WRAP,
        88 => PREP_RERAISE_STAR,
        89 => POP_EXCEPT,
        90 => STORE_NAME,
        91 => DELETE_NAME,
        92 => UNPACK_SEQUENCE,
        93 => FOR_ITER,
        94 => UNPACK_EX,
        95 => STORE_ATTR,
        96 => DELETE_ATTR,
        97 => STORE_GLOBAL,
        98 => DELETE_GLOBAL,
        99 => SWAP,
        100 => LOAD_CONST,
        101 => LOAD_NAME,
        102 => BUILD_TUPLE,
        103 => BUILD_LIST,
        104 => BUILD_SET,
        105 => BUILD_MAP,
        106 => LOAD_ATTR,
        107 => COMPARE_OP,
        108 => IMPORT_NAME,
        109 => IMPORT_FROM,
        110 => JUMP_FORWARD,
        111 => JUMP_IF_FALSE_OR_POP,
        112 => JUMP_IF_TRUE_OR_POP,
        114 => POP_JUMP_IF_FALSE, // POP_JUMP_FORWARD_IF_FALSE
        115 => POP_JUMP_IF_TRUE,
        116 => LOAD_GLOBAL,
        117 => IS_OP,
        118 => CONTAINS_OP,
        119 => RERAISE,
        120 => COPY,
        122 => BINARY_OP,
        123 => SEND,
        124 => LOAD_FAST,
        125 => STORE_FAST,
        126 => DELETE_FAST,
        128 => POP_JUMP_IF_NOT_NONE, // forward flavour
        129 => POP_JUMP_IF_NONE,
        130 => RAISE_VARARGS,
        131 => GET_AWAITABLE,
        132 => MAKE_FUNCTION,
        133 => BUILD_SLICE,
        134 => JUMP_BACKWARD_NO_INTERRUPT,
        135 => MAKE_CELL,
        136 => LOAD_CLOSURE,
        137 => LOAD_DEREF,
        138 => STORE_DEREF,
        139 => DELETE_DEREF,
        140 => JUMP_BACKWARD,
        142 => CALL_FUNCTION_EX,
        144 => EXTENDED_ARG,
        145 => LIST_APPEND,
        146 => SET_ADD,
        147 => MAP_ADD,
        148 => LOAD_CLASSDEREF,
        149 => COPY_FREE_VARS,
        151 => RESUME,
        152 => MATCH_CLASS,
        155 => FORMAT_VALUE,
        156 => BUILD_CONST_KEY_MAP,
        157 => BUILD_STRING,
        160 => LOAD_METHOD,
        162 => LIST_EXTEND,
        163 => SET_UPDATE,
        164 => DICT_MERGE,
        165 => DICT_UPDATE,
        166 => PRECALL,
        171 => CALL,
        172 => KW_NAMES,
        173 => POP_JUMP_BACK_IF_NOT_NONE,
        174 => POP_JUMP_BACK_IF_NONE,
        175 => POP_JUMP_BACK_IF_FALSE,
        176 => POP_JUMP_BACK_IF_TRUE,
        _ => UNKNOWN,
    }
}

fn map_py312(raw: u8) -> Opcode {
    use Opcode::*;
    match raw {
        0 => CACHE,
        1 => POP_TOP,
        2 => PUSH_NULL,
        3 => INTERPRETER_EXIT,
        4 => END_FOR,
        5 => END_SEND,
        9 => NOP,
        11 => UNARY_NEGATIVE,
        12 => UNARY_NOT,
        15 => UNARY_INVERT,
        17 => RESERVED,
        25 => BINARY_SUBSCR,
        26 => BINARY_SLICE,
        27 => STORE_SLICE,
        30 => GET_LEN,
        31 => MATCH_MAPPING,
        32 => MATCH_SEQUENCE,
        33 => MATCH_KEYS,
        35 => PUSH_EXC_INFO,
        36 => CHECK_EXC_MATCH,
        37 => CHECK_EG_MATCH,
        49 => WITH_EXCEPT_START,
        50 => GET_AITER,
        51 => GET_ANEXT,
        52 => BEFORE_ASYNC_WITH,
        53 => BEFORE_WITH,
        54 => END_ASYNC_FOR,
        55 => CLEANUP_THROW,
        60 => STORE_SUBSCR,
        61 => DELETE_SUBSCR,
        68 => GET_ITER,
        69 => GET_YIELD_FROM_ITER,
        70 => PRINT_EXPR,
        71 => LOAD_BUILD_CLASS,
        74 => LOAD_ASSERTION_ERROR,
        75 => RETURN_GENERATOR,
        82 => LIST_TO_TUPLE,
        83 => RETURN_VALUE,
        84 => IMPORT_STAR,
        85 => SETUP_ANNOTATIONS,
        87 => LOAD_LOCALS,
        89 => POP_EXCEPT,
        90 => STORE_NAME,
        91 => DELETE_NAME,
        92 => UNPACK_SEQUENCE,
        93 => FOR_ITER,
        94 => UNPACK_EX,
        95 => STORE_ATTR,
        96 => DELETE_ATTR,
        97 => STORE_GLOBAL,
        98 => DELETE_GLOBAL,
        99 => SWAP,
        100 => LOAD_CONST,
        101 => LOAD_NAME,
        102 => BUILD_TUPLE,
        103 => BUILD_LIST,
        104 => BUILD_SET,
        105 => BUILD_MAP,
        106 => LOAD_ATTR,
        107 => COMPARE_OP,
        108 => IMPORT_NAME,
        109 => IMPORT_FROM,
        110 => JUMP_FORWARD,
        114 => POP_JUMP_IF_FALSE,
        115 => POP_JUMP_IF_TRUE,
        116 => LOAD_GLOBAL,
        117 => IS_OP,
        118 => CONTAINS_OP,
        119 => RERAISE,
        120 => COPY,
        121 => RETURN_CONST,
        122 => BINARY_OP,
        123 => SEND,
        124 => LOAD_FAST,
        125 => STORE_FAST,
        126 => DELETE_FAST,
        127 => LOAD_FAST_CHECK,
        128 => POP_JUMP_IF_NOT_NONE,
        129 => POP_JUMP_IF_NONE,
        130 => RAISE_VARARGS,
        131 => GET_AWAITABLE,
        132 => MAKE_FUNCTION,
        133 => BUILD_SLICE,
        134 => JUMP_BACKWARD_NO_INTERRUPT,
        135 => MAKE_CELL,
        136 => LOAD_CLOSURE,
        137 => LOAD_DEREF,
        138 => STORE_DEREF,
        139 => DELETE_DEREF,
        140 => JUMP_BACKWARD,
        141 => LOAD_SUPER_ATTR,
        142 => CALL_FUNCTION_EX,
        143 => LOAD_FAST_AND_CLEAR,
        144 => EXTENDED_ARG,
        145 => LIST_APPEND,
        146 => SET_ADD,
        147 => MAP_ADD,
        149 => COPY_FREE_VARS,
        150 => YIELD_VALUE,
        151 => RESUME,
        152 => MATCH_CLASS,
        155 => FORMAT_VALUE,
        156 => BUILD_CONST_KEY_MAP,
        157 => BUILD_STRING,
        162 => LIST_EXTEND,
        163 => SET_UPDATE,
        164 => DICT_MERGE,
        165 => DICT_UPDATE,
        171 => CALL,
        173 => CALL_INTRINSIC_1,
        174 => CALL_INTRINSIC_2,
        175 => LOAD_FROM_DICT_OR_GLOBALS,
        176 => LOAD_FROM_DICT_OR_DEREF,
        _ => UNKNOWN,
    }
}

/// 3.13 renumbered everything: argument-less opcodes first, then the
/// argument-carrying group, both roughly alphabetical.
fn map_py313(raw: u8) -> Opcode {
    use Opcode::*;
    match raw {
        0 => CACHE,
        1 => BEFORE_ASYNC_WITH,
        2 => BEFORE_WITH,
        3 => BINARY_SLICE,
        4 => BINARY_SUBSCR,
        5 => CHECK_EG_MATCH,
        6 => CHECK_EXC_MATCH,
        7 => CLEANUP_THROW,
        8 => DELETE_SUBSCR,
        9 => END_ASYNC_FOR,
        10 => END_FOR,
        11 => END_SEND,
        12 => EXIT_INIT_CHECK,
        13 => FORMAT_SIMPLE,
        14 => FORMAT_WITH_SPEC,
        15 => GET_AITER,
        16 => GET_ANEXT,
        17 => GET_ITER,
        18 => RESERVED,
        19 => GET_LEN,
        20 => GET_YIELD_FROM_ITER,
        21 => INTERPRETER_EXIT,
        22 => LOAD_ASSERTION_ERROR,
        23 => LOAD_BUILD_CLASS,
        24 => LOAD_LOCALS,
        25 => MAKE_FUNCTION,
        26 => MATCH_KEYS,
        27 => MATCH_MAPPING,
        28 => MATCH_SEQUENCE,
        29 => NOP,
        30 => POP_EXCEPT,
        31 => POP_TOP,
        32 => PUSH_EXC_INFO,
        33 => PUSH_NULL,
        34 => RETURN_GENERATOR,
        35 => RETURN_VALUE,
        36 => SETUP_ANNOTATIONS,
        37 => STORE_SLICE,
        38 => STORE_SUBSCR,
        39 => TO_BOOL,
        40 => UNARY_INVERT,
        41 => UNARY_NEGATIVE,
        42 => UNARY_NOT,
        43 => WITH_EXCEPT_START,
        44 => BINARY_OP,
        45 => BUILD_CONST_KEY_MAP,
        46 => BUILD_LIST,
        47 => BUILD_MAP,
        48 => BUILD_SET,
        49 => BUILD_SLICE,
        50 => BUILD_STRING,
        51 => BUILD_TUPLE,
        52 => CALL,
        53 => CALL_FUNCTION_EX,
        54 => CALL_INTRINSIC_1,
        55 => CALL_INTRINSIC_2,
        56 => CALL_KW,
        57 => COMPARE_OP,
        58 => CONTAINS_OP,
        59 => CONVERT_VALUE,
        60 => COPY,
        61 => COPY_FREE_VARS,
        62 => DELETE_ATTR,
        63 => DELETE_DEREF,
        64 => DELETE_FAST,
        65 => DELETE_GLOBAL,
        66 => DELETE_NAME,
        67 => DICT_MERGE,
        68 => DICT_UPDATE,
        70 => EXTENDED_ARG,
        71 => FOR_ITER,
        72 => GET_AWAITABLE,
        73 => IMPORT_FROM,
        74 => IMPORT_NAME,
        75 => IS_OP,
        76 => JUMP_BACKWARD,
        77 => JUMP_BACKWARD_NO_INTERRUPT,
        78 => JUMP_FORWARD,
        79 => LIST_APPEND,
        80 => LIST_EXTEND,
        81 => LOAD_ATTR,
        83 => LOAD_CONST,
        84 => LOAD_DEREF,
        85 => LOAD_FAST,
        86 => LOAD_FAST_AND_CLEAR,
        87 => LOAD_FAST_CHECK,
        88 => LOAD_FAST_LOAD_FAST,
        89 => LOAD_FROM_DICT_OR_DEREF,
        90 => LOAD_FROM_DICT_OR_GLOBALS,
        91 => LOAD_GLOBAL,
        92 => LOAD_NAME,
        93 => LOAD_SUPER_ATTR,
        94 => MAKE_CELL,
        95 => MAP_ADD,
        96 => MATCH_CLASS,
        97 => POP_JUMP_IF_FALSE,
        98 => POP_JUMP_IF_NONE,
        99 => POP_JUMP_IF_NOT_NONE,
        100 => POP_JUMP_IF_TRUE,
        101 => RAISE_VARARGS,
        102 => RERAISE,
        103 => RETURN_CONST,
        104 => SEND,
        105 => SET_ADD,
        106 => SET_FUNCTION_ATTRIBUTE,
        107 => SET_UPDATE,
        108 => STORE_ATTR,
        109 => STORE_DEREF,
        110 => STORE_FAST,
        111 => STORE_FAST_LOAD_FAST,
        112 => STORE_FAST_STORE_FAST,
        113 => STORE_GLOBAL,
        114 => STORE_NAME,
        115 => SWAP,
        116 => UNPACK_EX,
        117 => UNPACK_SEQUENCE,
        118 => YIELD_VALUE,
        149 => RESUME,
        _ => UNKNOWN,
    }
}

/// Operand interpretation for a given release. Jump flavours are the main
/// version-dependent axis: the classic sets mix absolute and relative
/// targets, while 3.11+ is relative-only with explicit backward forms.
pub fn operand_kind(op: Opcode, ver: PyVersion) -> OperandKind {
    use Opcode::*;
    use OperandKind as K;
    let uint = if ver.wordcode() { K::UInt8 } else { K::UInt16 };
    match op {
        LOAD_CONST | RETURN_CONST | KW_NAMES => K::ConstIdx,

        STORE_NAME | DELETE_NAME | STORE_ATTR | DELETE_ATTR | STORE_GLOBAL
        | DELETE_GLOBAL | LOAD_NAME | LOAD_ATTR | LOAD_GLOBAL | IMPORT_NAME
        | IMPORT_FROM | LOAD_METHOD | STORE_ANNOTATION | LOAD_SUPER_ATTR
        | LOAD_FROM_DICT_OR_GLOBALS => K::NameIdx,

        LOAD_FAST | STORE_FAST | DELETE_FAST | LOAD_FAST_CHECK
        | LOAD_FAST_AND_CLEAR | LOAD_FAST_LOAD_FAST | STORE_FAST_STORE_FAST
        | STORE_FAST_LOAD_FAST => K::VarIdx,

        LOAD_CLOSURE | LOAD_DEREF | STORE_DEREF | DELETE_DEREF
        | LOAD_CLASSDEREF | MAKE_CELL | LOAD_FROM_DICT_OR_DEREF => K::FreeIdx,

        COMPARE_OP => K::CmpOp,

        JUMP_FORWARD | FOR_ITER | FOR_LOOP | SETUP_LOOP | SETUP_EXCEPT
        | SETUP_FINALLY | SETUP_WITH | SETUP_ASYNC_WITH | CALL_FINALLY
        | SEND | JUMP_IF_FALSE | JUMP_IF_TRUE => K::JRel,

        JUMP_BACKWARD | JUMP_BACKWARD_NO_INTERRUPT | POP_JUMP_BACK_IF_FALSE
        | POP_JUMP_BACK_IF_TRUE | POP_JUMP_BACK_IF_NONE
        | POP_JUMP_BACK_IF_NOT_NONE => K::JRelBack,

        JUMP_ABSOLUTE | CONTINUE_LOOP | JUMP_IF_NOT_EXC_MATCH => K::JAbs,

        POP_JUMP_IF_FALSE | POP_JUMP_IF_TRUE | POP_JUMP_IF_NONE
        | POP_JUMP_IF_NOT_NONE => {
            if ver.has_absolute_jumps() {
                K::JAbs
            } else {
                K::JRel
            }
        }
        JUMP_IF_FALSE_OR_POP | JUMP_IF_TRUE_OR_POP => {
            if ver.at_least(3, 11) {
                K::JRel
            } else {
                K::JAbs
            }
        }

        UNKNOWN | CACHE | NOP | STOP_CODE | RESUME | RESERVED
        | INTERPRETER_EXIT | POP_TOP | ROT_TWO | ROT_THREE | ROT_FOUR
        | DUP_TOP | DUP_TOP_TWO | UNARY_POSITIVE | UNARY_NEGATIVE
        | UNARY_NOT | UNARY_CONVERT | UNARY_INVERT | UNARY_CALL | TO_BOOL
        | BINARY_POWER | BINARY_MULTIPLY | BINARY_DIVIDE | BINARY_MODULO
        | BINARY_ADD | BINARY_SUBTRACT | BINARY_SUBSCR | BINARY_FLOOR_DIVIDE
        | BINARY_TRUE_DIVIDE | BINARY_LSHIFT | BINARY_RSHIFT | BINARY_AND
        | BINARY_XOR | BINARY_OR | BINARY_MATRIX_MULTIPLY | BINARY_CALL
        | BINARY_SLICE | INPLACE_ADD | INPLACE_SUBTRACT | INPLACE_MULTIPLY
        | INPLACE_DIVIDE | INPLACE_MODULO | INPLACE_POWER | INPLACE_LSHIFT
        | INPLACE_RSHIFT | INPLACE_AND | INPLACE_XOR | INPLACE_OR
        | INPLACE_FLOOR_DIVIDE | INPLACE_TRUE_DIVIDE
        | INPLACE_MATRIX_MULTIPLY | SLICE_0 | SLICE_1 | SLICE_2 | SLICE_3
        | STORE_SLICE_0 | STORE_SLICE_1 | STORE_SLICE_2 | STORE_SLICE_3
        | DELETE_SLICE_0 | DELETE_SLICE_1 | DELETE_SLICE_2 | DELETE_SLICE_3
        | STORE_SLICE | STORE_SUBSCR | DELETE_SUBSCR | STORE_MAP | GET_ITER
        | GET_YIELD_FROM_ITER | GET_AITER | GET_ANEXT | GET_AWAITABLE
        | GET_LEN | END_FOR | END_SEND | END_ASYNC_FOR | PRINT_EXPR
        | PRINT_ITEM | PRINT_NEWLINE | PRINT_ITEM_TO | PRINT_NEWLINE_TO
        | BREAK_LOOP | RETURN_VALUE | RETURN_GENERATOR | YIELD_VALUE
        | YIELD_FROM | RAISE_EXCEPTION | POP_BLOCK | POP_EXCEPT | END_FINALLY
        | BEGIN_FINALLY | WITH_CLEANUP | WITH_CLEANUP_START
        | WITH_CLEANUP_FINISH | WITH_EXCEPT_START | BEFORE_WITH
        | BEFORE_ASYNC_WITH | PUSH_EXC_INFO | CHECK_EXC_MATCH
        | CHECK_EG_MATCH | PREP_RERAISE_STAR | CLEANUP_THROW
        | ASYNC_GEN_WRAP | LOAD_LOCALS | STORE_LOCALS | LOAD_BUILD_CLASS
        | LOAD_ASSERTION_ERROR | SETUP_ANNOTATIONS | LIST_TO_TUPLE
        | UNPACK_TUPLE | UNPACK_LIST | IMPORT_STAR | BUILD_CLASS
        | BUILD_FUNCTION | PUSH_NULL | EXIT_INIT_CHECK | EXEC_STMT
        | CONVERT_VALUE | FORMAT_SIMPLE | FORMAT_WITH_SPEC | MATCH_MAPPING
        | MATCH_SEQUENCE | MATCH_KEYS | SET_LINENO => {
            // SET_LINENO and UNPACK_* in the legacy sets do carry a number;
            // treat them as generic numerics when an argument is present.
            match op {
                SET_LINENO | UNPACK_TUPLE | UNPACK_LIST => uint,
                _ => K::None,
            }
        }

        _ => uint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_38_numbers() {
        let v = PyVersion::new(3, 8);
        assert_eq!(opcode_from_raw(v, 100), Opcode::LOAD_CONST);
        assert_eq!(opcode_from_raw(v, 23), Opcode::BINARY_ADD);
        assert_eq!(opcode_from_raw(v, 83), Opcode::RETURN_VALUE);
        assert_eq!(opcode_from_raw(v, 114), Opcode::POP_JUMP_IF_FALSE);
        assert_eq!(opcode_from_raw(v, 93), Opcode::FOR_ITER);
        assert_eq!(opcode_from_raw(v, 145), Opcode::LIST_APPEND);
        assert_eq!(opcode_from_raw(v, 155), Opcode::FORMAT_VALUE);
        assert_eq!(opcode_from_raw(v, 157), Opcode::BUILD_STRING);
        // SETUP_LOOP is gone from 3.8
        assert_eq!(opcode_from_raw(v, 120), Opcode::UNKNOWN);
    }

    #[test]
    fn python2_versus_3_divergence() {
        let v27 = PyVersion::new(2, 7);
        assert_eq!(opcode_from_raw(v27, 71), Opcode::PRINT_ITEM);
        assert_eq!(opcode_from_raw(v27, 85), Opcode::EXEC_STMT);
        assert_eq!(opcode_from_raw(v27, 89), Opcode::BUILD_CLASS);
        let v26 = PyVersion::new(2, 6);
        assert_eq!(opcode_from_raw(v26, 111), Opcode::JUMP_IF_FALSE);
        assert_eq!(opcode_from_raw(v26, 104), Opcode::BUILD_MAP);
        let v38 = PyVersion::new(3, 8);
        assert_eq!(opcode_from_raw(v38, 71), Opcode::LOAD_BUILD_CLASS);
    }

    #[test]
    fn renumbered_releases() {
        let v311 = PyVersion::new(3, 11);
        assert_eq!(opcode_from_raw(v311, 0), Opcode::CACHE);
        assert_eq!(opcode_from_raw(v311, 171), Opcode::CALL);
        assert_eq!(opcode_from_raw(v311, 172), Opcode::KW_NAMES);
        assert_eq!(opcode_from_raw(v311, 122), Opcode::BINARY_OP);
        let v313 = PyVersion::new(3, 13);
        assert_eq!(opcode_from_raw(v313, 83), Opcode::LOAD_CONST);
        assert_eq!(opcode_from_raw(v313, 35), Opcode::RETURN_VALUE);
        assert_eq!(opcode_from_raw(v313, 149), Opcode::RESUME);
    }

    #[test]
    fn unknown_bytes_degrade() {
        for ver in [PyVersion::new(2, 7), PyVersion::new(3, 8), PyVersion::new(3, 13)] {
            assert_eq!(opcode_from_raw(ver, 255), Opcode::UNKNOWN);
        }
    }

    #[test]
    fn jump_kinds_follow_the_dialect() {
        use OperandKind::*;
        let v38 = PyVersion::new(3, 8);
        let v312 = PyVersion::new(3, 12);
        assert_eq!(operand_kind(Opcode::POP_JUMP_IF_FALSE, v38), JAbs);
        assert_eq!(operand_kind(Opcode::POP_JUMP_IF_FALSE, v312), JRel);
        assert_eq!(operand_kind(Opcode::JUMP_FORWARD, v38), JRel);
        assert_eq!(operand_kind(Opcode::JUMP_BACKWARD, v312), JRelBack);
        assert_eq!(operand_kind(Opcode::LOAD_CONST, v38), ConstIdx);
        assert_eq!(operand_kind(Opcode::BINARY_ADD, v38), None);
    }
}
