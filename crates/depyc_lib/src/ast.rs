//! The reconstructed-syntax tree.
//!
//! Nodes are reference counted (`Rc`) because the stack machine legitimately
//! aliases them: `DUP_TOP` pushes a second handle to the same node, and the
//! chained-store / chained-comparison recoveries depend on pointer identity
//! to detect that aliasing. Parents own children; children never point back.
//!
//! A few variants carry interior mutability (`RefCell`/`Cell`) for fields
//! the builder fills in after construction: tuple elements during sequence
//! unpacking, import store lists, print-statement coalescing, and the
//! one-shot `processed` mark the emitter sets when it commits a node.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::object::ObjRef;
use crate::opcode::Opcode;

pub type NodeRef = Rc<Node>;

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    processed: Cell<bool>,
}

impl Node {
    pub fn new(kind: NodeKind) -> NodeRef {
        Rc::new(Node {
            kind,
            processed: Cell::new(false),
        })
    }

    pub fn name(s: &str) -> NodeRef {
        Node::new(NodeKind::Name(Rc::from(s)))
    }

    pub fn object(obj: ObjRef) -> NodeRef {
        Node::new(NodeKind::Object(obj))
    }

    pub fn processed(&self) -> bool {
        self.processed.get()
    }

    /// One-shot: flips from unprocessed to processed when the emitter
    /// commits this node to output.
    pub fn set_processed(&self) {
        self.processed.set(true);
    }

    pub fn is_none_const(&self) -> bool {
        matches!(&self.kind, NodeKind::Object(o) if o.is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeywordKind {
    Pass,
    Break,
    Continue,
}

impl KeywordKind {
    pub fn word(self) -> &'static str {
        match self {
            KeywordKind::Pass => "pass",
            KeywordKind::Break => "break",
            KeywordKind::Continue => "continue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    Return,
    Yield,
    YieldFrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
pub enum UnaryOp {
    Positive,
    Negative,
    Invert,
    Not,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Positive => "+",
            UnaryOp::Negative => "-",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not ",
        }
    }
}

/// Binary operators, in-place forms ordered after the plain forms so that
/// `is_inplace` is a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
pub enum BinOp {
    Attr,
    Power,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Add,
    Subtract,
    LShift,
    RShift,
    And,
    Xor,
    Or,
    LogAnd,
    LogOr,
    MatMultiply,
    IpAdd,
    IpSubtract,
    IpMultiply,
    IpDivide,
    IpModulo,
    IpPower,
    IpLShift,
    IpRShift,
    IpAnd,
    IpXor,
    IpOr,
    IpFloorDivide,
    IpMatMultiply,
    Invalid,
}

impl BinOp {
    pub fn is_inplace(self) -> bool {
        self >= BinOp::IpAdd && self != BinOp::Invalid
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Attr => ".",
            BinOp::Power => " ** ",
            BinOp::Multiply => " * ",
            BinOp::Divide => " / ",
            BinOp::FloorDivide => " // ",
            BinOp::Modulo => " % ",
            BinOp::Add => " + ",
            BinOp::Subtract => " - ",
            BinOp::LShift => " << ",
            BinOp::RShift => " >> ",
            BinOp::And => " & ",
            BinOp::Xor => " ^ ",
            BinOp::Or => " | ",
            BinOp::LogAnd => " and ",
            BinOp::LogOr => " or ",
            BinOp::MatMultiply => " @ ",
            BinOp::IpAdd => " += ",
            BinOp::IpSubtract => " -= ",
            BinOp::IpMultiply => " *= ",
            BinOp::IpDivide => " /= ",
            BinOp::IpModulo => " %= ",
            BinOp::IpPower => " **= ",
            BinOp::IpLShift => " <<= ",
            BinOp::IpRShift => " >>= ",
            BinOp::IpAnd => " &= ",
            BinOp::IpXor => " ^= ",
            BinOp::IpOr => " |= ",
            BinOp::IpFloorDivide => " //= ",
            BinOp::IpMatMultiply => " @= ",
            BinOp::Invalid => " <INVALID> ",
        }
    }

    pub fn from_opcode(op: Opcode) -> BinOp {
        use Opcode::*;
        match op {
            BINARY_ADD => BinOp::Add,
            BINARY_AND => BinOp::And,
            BINARY_DIVIDE => BinOp::Divide,
            BINARY_FLOOR_DIVIDE => BinOp::FloorDivide,
            BINARY_LSHIFT => BinOp::LShift,
            BINARY_MODULO => BinOp::Modulo,
            BINARY_MULTIPLY => BinOp::Multiply,
            BINARY_OR => BinOp::Or,
            BINARY_POWER => BinOp::Power,
            BINARY_RSHIFT => BinOp::RShift,
            BINARY_SUBTRACT => BinOp::Subtract,
            BINARY_TRUE_DIVIDE => BinOp::Divide,
            BINARY_XOR => BinOp::Xor,
            BINARY_MATRIX_MULTIPLY => BinOp::MatMultiply,
            INPLACE_ADD => BinOp::IpAdd,
            INPLACE_AND => BinOp::IpAnd,
            INPLACE_DIVIDE => BinOp::IpDivide,
            INPLACE_FLOOR_DIVIDE => BinOp::IpFloorDivide,
            INPLACE_LSHIFT => BinOp::IpLShift,
            INPLACE_MODULO => BinOp::IpModulo,
            INPLACE_MULTIPLY => BinOp::IpMultiply,
            INPLACE_OR => BinOp::IpOr,
            INPLACE_POWER => BinOp::IpPower,
            INPLACE_RSHIFT => BinOp::IpRShift,
            INPLACE_SUBTRACT => BinOp::IpSubtract,
            INPLACE_TRUE_DIVIDE => BinOp::IpDivide,
            INPLACE_XOR => BinOp::IpXor,
            INPLACE_MATRIX_MULTIPLY => BinOp::IpMatMultiply,
            _ => BinOp::Invalid,
        }
    }

    /// Operand table for the 3.11+ `BINARY_OP` instruction, following the
    /// official NB_* numbering (operand 17 is the in-place matrix multiply).
    pub fn from_binary_op(operand: u32) -> BinOp {
        match operand {
            0 => BinOp::Add,
            1 => BinOp::And,
            2 => BinOp::FloorDivide,
            3 => BinOp::LShift,
            4 => BinOp::MatMultiply,
            5 => BinOp::Multiply,
            6 => BinOp::Modulo,
            7 => BinOp::Or,
            8 => BinOp::Power,
            9 => BinOp::RShift,
            10 => BinOp::Subtract,
            11 => BinOp::Divide,
            12 => BinOp::Xor,
            13 => BinOp::IpAdd,
            14 => BinOp::IpAnd,
            15 => BinOp::IpFloorDivide,
            16 => BinOp::IpLShift,
            17 => BinOp::IpMatMultiply,
            18 => BinOp::IpMultiply,
            19 => BinOp::IpModulo,
            20 => BinOp::IpOr,
            21 => BinOp::IpPower,
            22 => BinOp::IpRShift,
            23 => BinOp::IpSubtract,
            24 => BinOp::IpDivide,
            25 => BinOp::IpXor,
            _ => BinOp::Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Less,
    LessEqual,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Is,
    IsNot,
    ExceptionMatch,
    Bad,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Less => " < ",
            CmpOp::LessEqual => " <= ",
            CmpOp::Equal => " == ",
            CmpOp::NotEqual => " != ",
            CmpOp::Greater => " > ",
            CmpOp::GreaterEqual => " >= ",
            CmpOp::In => " in ",
            CmpOp::NotIn => " not in ",
            CmpOp::Is => " is ",
            CmpOp::IsNot => " is not ",
            CmpOp::ExceptionMatch => "<EXCEPTION MATCH>",
            CmpOp::Bad => "<BAD>",
        }
    }

    pub fn from_arg(arg: u32) -> CmpOp {
        match arg {
            0 => CmpOp::Less,
            1 => CmpOp::LessEqual,
            2 => CmpOp::Equal,
            3 => CmpOp::NotEqual,
            4 => CmpOp::Greater,
            5 => CmpOp::GreaterEqual,
            6 => CmpOp::In,
            7 => CmpOp::NotIn,
            8 => CmpOp::Is,
            9 => CmpOp::IsNot,
            10 => CmpOp::ExceptionMatch,
            _ => CmpOp::Bad,
        }
    }
}

/// `FORMAT_VALUE` conversion bits. The format-spec bit overlaps the high
/// conversion bit; always go through the mask.
pub const CONVERSION_MASK: u8 = 0x03;
pub const HAVE_FMT_SPEC: u8 = 0x04;

pub fn conversion_char(flags: u8) -> Option<char> {
    match flags & CONVERSION_MASK {
        1 => Some('s'),
        2 => Some('r'),
        3 => Some('a'),
        _ => None,
    }
}

/// One `for`-clause of a comprehension.
#[derive(Debug)]
pub struct Generator {
    pub iter: NodeRef,
    pub index: Option<NodeRef>,
    pub condition: Option<NodeRef>,
    pub neg_condition: bool,
    pub is_async: bool,
}

/// One handler of a try statement.
#[derive(Debug)]
pub struct Handler {
    /// Exception expression; `None` for a bare `except:`.
    pub exc: Option<NodeRef>,
    /// Bound name, for `except E as name:`.
    pub binding: Option<NodeRef>,
    pub body: Vec<NodeRef>,
}

/// A finalized lexical block with its body.
#[derive(Debug)]
pub struct BlockNode {
    pub kind: BlockKind,
    pub end: u32,
    pub nodes: Vec<NodeRef>,
}

#[derive(Debug)]
pub enum BlockKind {
    Main,
    If { cond: NodeRef, negative: bool },
    Else,
    While { cond: Option<NodeRef>, negative: bool },
    For { iter: NodeRef, index: Option<NodeRef>, is_async: bool },
    With { expr: NodeRef, var: Option<NodeRef>, is_async: bool },
}

impl BlockKind {
    pub fn type_str(&self) -> &'static str {
        match self {
            BlockKind::Main => "",
            BlockKind::If { .. } => "if",
            BlockKind::Else => "else",
            BlockKind::While { .. } => "while",
            BlockKind::For { is_async: false, .. } => "for",
            BlockKind::For { is_async: true, .. } => "async for",
            BlockKind::With { is_async: false, .. } => "with",
            BlockKind::With { is_async: true, .. } => "async with",
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Invalid,
    /// Marker pushed by `PUSH_NULL` and friends; never emitted.
    NullMarker,
    /// Placeholder for values the runtime materializes (exception triples).
    ExcPlaceholder,
    Object(ObjRef),
    Name(Rc<str>),
    Keyword(KeywordKind),
    LoadBuildClass,
    Locals,

    Unary { op: UnaryOp, operand: NodeRef },
    Binary { op: BinOp, left: NodeRef, right: NodeRef },
    Compare { op: CmpOp, left: NodeRef, right: NodeRef },
    /// `a < b < c`: operands.len() == ops.len() + 1.
    CompareChain { operands: Vec<NodeRef>, ops: Vec<CmpOp> },
    Slice { lower: Option<NodeRef>, upper: Option<NodeRef>, step: Option<NodeRef> },
    Subscr { value: NodeRef, key: NodeRef },
    Starred(NodeRef),

    Store { src: NodeRef, dest: NodeRef },
    ChainStore { dests: RefCell<Vec<NodeRef>>, src: NodeRef },
    Delete(NodeRef),
    Return { value: NodeRef, kind: ReturnKind },
    Raise(Vec<NodeRef>),
    Annotated { name: NodeRef, annotation: NodeRef },

    Import {
        name: NodeRef,
        fromlist: Option<NodeRef>,
        stores: RefCell<Vec<NodeRef>>,
    },
    /// Value pushed by `IMPORT_FROM`; `module` aliases the `Import` node
    /// still sitting on the stack.
    ImportFrom { module: NodeRef, name: Rc<str> },
    ImportStar(NodeRef),

    Tuple {
        values: RefCell<Vec<NodeRef>>,
        require_parens: Cell<bool>,
    },
    List(Vec<NodeRef>),
    Set(Vec<NodeRef>),
    Map(RefCell<Vec<(NodeRef, NodeRef)>>),
    ConstMap { keys: ObjRef, values: Vec<NodeRef> },
    JoinedStr(Vec<NodeRef>),
    FormattedValue {
        value: NodeRef,
        conversion: u8,
        format_spec: Option<NodeRef>,
    },

    Function {
        code: ObjRef,
        defaults: Vec<NodeRef>,
        kw_defaults: Vec<(Rc<str>, NodeRef)>,
    },
    Class { code: NodeRef, bases: Vec<NodeRef>, name: NodeRef },
    Call {
        func: NodeRef,
        args: Vec<NodeRef>,
        kwargs: Vec<(NodeRef, NodeRef)>,
        star: Option<NodeRef>,
        dstar: Option<NodeRef>,
    },

    Print {
        values: RefCell<Vec<NodeRef>>,
        stream: Option<NodeRef>,
        eol: Cell<bool>,
    },
    Exec {
        stmt: NodeRef,
        globals: Option<NodeRef>,
        locals: Option<NodeRef>,
    },
    Convert(NodeRef),
    Awaitable(NodeRef),
    Ternary {
        cond: NodeRef,
        negative: bool,
        then_expr: NodeRef,
        else_expr: NodeRef,
    },
    Comprehension {
        result: NodeRef,
        /// For dict comprehensions, the value half of `key: value`.
        result_value: Option<NodeRef>,
        kind: ComprehensionKind,
        generators: Vec<Generator>,
    },

    TryStmt {
        body: Vec<NodeRef>,
        handlers: Vec<Handler>,
        orelse: Vec<NodeRef>,
        finalbody: Vec<NodeRef>,
    },

    Block(BlockNode),
    NodeList(Vec<NodeRef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

impl NodeKind {
    /// True for builder-internal markers that must never reach output.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            NodeKind::Invalid | NodeKind::NullMarker | NodeKind::ExcPlaceholder
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inplace_partition() {
        assert!(!BinOp::Add.is_inplace());
        assert!(!BinOp::MatMultiply.is_inplace());
        assert!(BinOp::IpAdd.is_inplace());
        assert!(BinOp::IpMatMultiply.is_inplace());
        assert!(!BinOp::Invalid.is_inplace());
    }

    #[test]
    fn binary_op_table_matches_nb_numbering() {
        assert_eq!(BinOp::from_binary_op(0), BinOp::Add);
        assert_eq!(BinOp::from_binary_op(4), BinOp::MatMultiply);
        assert_eq!(BinOp::from_binary_op(17), BinOp::IpMatMultiply);
        assert_eq!(BinOp::from_binary_op(25), BinOp::IpXor);
        assert_eq!(BinOp::from_binary_op(26), BinOp::Invalid);
    }

    #[test]
    fn conversion_flags_share_the_spec_bit() {
        assert_eq!(conversion_char(0), None);
        assert_eq!(conversion_char(2), Some('r'));
        // HAVE_FMT_SPEC must not leak into the conversion kind.
        assert_eq!(conversion_char(HAVE_FMT_SPEC | 1), Some('s'));
    }

    #[test]
    fn processed_is_one_shot() {
        let n = Node::name("x");
        assert!(!n.processed());
        n.set_processed();
        assert!(n.processed());
    }
}
