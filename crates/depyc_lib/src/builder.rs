//! The decompiler core: symbolic execution of one code object's instruction
//! stream against a stack of AST fragments, with a strict-LIFO block stack
//! recovering the lexical structure from jump targets.
//!
//! One linear pass per code object. Before dispatching an instruction we
//! close every open block whose end offset has been reached; a small
//! pre-scan of backward jumps marks loop headers so `while` bodies can be
//! opened on entry rather than discovered retroactively. Unknown opcodes
//! degrade into `<UNKNOWN_OPCODE_n>` name placeholders; only a genuine
//! stack underflow aborts the current code object.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::ast::{
    BinOp, BlockKind, BlockNode, CmpOp, ComprehensionKind, Generator, Handler, KeywordKind,
    Node, NodeKind, NodeRef, ReturnKind, UnaryOp, HAVE_FMT_SPEC,
};
use crate::error::{DepycError, Result};
use crate::instr::{decode_exception_table, read_instructions, Instruction};
use crate::object::{CodeObject, ObjRef, PyObject};
use crate::opcode::Opcode;
use crate::version::PyVersion;

/// Builds the AST for one code object. Nested code objects are untouched
/// here; the emitter descends into them on demand.
pub fn build_ast(code: &Rc<CodeObject>, version: PyVersion) -> Result<NodeRef> {
    debug!(name = %code.name, "building ast");
    AstBuilder::new(code, version).run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CondState {
    /// Condition still on the stack (Python 2 non-popping jumps).
    Uninited,
    /// Condition consumed by the jump itself.
    Popped,
    /// `JUMP_IF_*_OR_POP`: value conditionally survives; the region folds
    /// into an `and`/`or` expression at close.
    PrePopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryPhase {
    Body,
    Handlers,
    Finally,
}

#[derive(Debug)]
struct CompData {
    kind: ComprehensionKind,
    result: NodeRef,
    result_value: Option<NodeRef>,
}

#[derive(Debug)]
enum OpenKind {
    Main,
    If {
        cond: NodeRef,
        negative: bool,
        state: CondState,
        /// Opened by a Python 2 non-popping jump; the else path re-pops.
        legacy: bool,
    },
    Else {
        pop_pending: bool,
    },
    /// Pending ternary: the `if` branch left a bare expression.
    TernaryElse {
        cond: NodeRef,
        negative: bool,
        then_expr: NodeRef,
    },
    /// `SETUP_LOOP` region (≤3.7); trailing statements become the loop else.
    LoopContainer,
    While {
        cond: Option<NodeRef>,
        negative: bool,
        pop_pending: bool,
    },
    For {
        iter: NodeRef,
        index: Option<NodeRef>,
        start: u32,
        comp: Option<CompData>,
        is_async: bool,
    },
    With {
        expr: NodeRef,
        var: Option<NodeRef>,
        inited: bool,
        is_async: bool,
    },
    TryContainer {
        finally_off: u32,
        phase: TryPhase,
        /// Exception-triple pops seen at a handler head (bare except).
        handler_pops: u8,
        body: Vec<NodeRef>,
        handlers: Vec<Handler>,
        finalbody: Vec<NodeRef>,
    },
    TryBody,
    ExceptHandler {
        exc: Option<NodeRef>,
        binding: Option<NodeRef>,
        prologue: bool,
    },
}

#[derive(Debug)]
struct OpenBlock {
    kind: OpenKind,
    end: u32,
    nodes: Vec<NodeRef>,
    stack_at_open: usize,
}

struct LoopSpan {
    start: u32,
    /// Offset just past the back edge; the loop block closes here.
    end: u32,
}

enum StoreRoute {
    LoopIndex,
    WithVar,
    ExcBinding,
    Normal,
}

pub struct AstBuilder<'a> {
    version: PyVersion,
    code: &'a Rc<CodeObject>,
    stack: Vec<NodeRef>,
    blocks: Vec<OpenBlock>,
    /// Outstanding `UNPACK_SEQUENCE` targets.
    unpack: usize,
    /// Index of the starred target for `UNPACK_EX`.
    unpack_star: Option<usize>,
    /// Keyword names staged by `KW_NAMES` (3.11).
    pending_kw_names: Vec<Rc<str>>,
    skip_until: Option<u32>,
    /// Set after folding an and/or return; absorbs the dead cleanup return.
    dead_return_ok: bool,
    loops: Vec<LoopSpan>,
}

impl<'a> AstBuilder<'a> {
    fn new(code: &'a Rc<CodeObject>, version: PyVersion) -> Self {
        Self {
            version,
            code,
            stack: Vec::new(),
            blocks: vec![OpenBlock {
                kind: OpenKind::Main,
                end: 0,
                nodes: Vec::new(),
                stack_at_open: 0,
            }],
            unpack: 0,
            unpack_star: None,
            pending_kw_names: Vec::new(),
            skip_until: None,
            dead_return_ok: false,
            loops: Vec::new(),
        }
    }

    fn run(mut self) -> Result<NodeRef> {
        let instructions = read_instructions(&self.code.code, self.version, false);
        self.loops = scan_loops(&instructions, self.version);
        let exc_regions = primary_try_regions(&self.code.exception_table);

        for ins in &instructions {
            if let Some(until) = self.skip_until {
                if ins.offset < until {
                    continue;
                }
                self.skip_until = None;
            }

            // Close every block whose fall-through point we have reached.
            while self.blocks.len() > 1 {
                let end = self.cur().end;
                if end != 0 && ins.offset >= end {
                    self.close_block()?;
                } else {
                    break;
                }
            }

            // Loop headers found by the backward-jump scan open `while`
            // blocks up front; `for` loops open in the FOR_ITER handler.
            let span_end = self
                .loops
                .iter()
                .find(|l| l.start == ins.offset)
                .map(|l| l.end);
            if let Some(end) = span_end {
                if !matches!(
                    ins.opcode,
                    Opcode::FOR_ITER | Opcode::FOR_LOOP | Opcode::SEND
                ) && !self.in_open_loop_at(end)
                {
                    self.open(
                        OpenKind::While {
                            cond: None,
                            negative: false,
                            pop_pending: false,
                        },
                        end,
                    );
                }
            }

            // 3.11+ try regions come from the exception table.
            if self.version.has_exception_table() {
                if let Some(&(end, _target)) = exc_regions.get(&ins.offset) {
                    self.open(
                        OpenKind::TryContainer {
                            finally_off: 0,
                            phase: TryPhase::Body,
                            handler_pops: 0,
                            body: Vec::new(),
                            handlers: Vec::new(),
                            finalbody: Vec::new(),
                        },
                        0,
                    );
                    self.open(OpenKind::TryBody, end);
                }
            }

            self.dispatch(ins)?;
        }

        let final_off = instructions
            .last()
            .map_or(0, |i| i.next_offset(self.version));
        while self.blocks.len() > 1 {
            warn!(
                name = %self.code.name,
                "block left open at end of stream; force-closing"
            );
            self.cur_mut().end = final_off;
            self.close_block()?;
        }
        self.drop_placeholders();
        if !self.stack.is_empty() {
            warn!(
                name = %self.code.name,
                depth = self.stack.len(),
                "stack not empty at end of code object"
            );
        }

        let main = self.blocks.pop().expect("main block");
        Ok(Node::new(NodeKind::Block(BlockNode {
            kind: BlockKind::Main,
            end: 0,
            nodes: main.nodes,
        })))
    }

    // ------------------------------------------------------------------
    // small helpers

    fn cur(&self) -> &OpenBlock {
        self.blocks.last().expect("block stack never empty")
    }

    fn cur_mut(&mut self) -> &mut OpenBlock {
        self.blocks.last_mut().expect("block stack never empty")
    }

    fn open(&mut self, kind: OpenKind, end: u32) {
        self.blocks.push(OpenBlock {
            kind,
            end,
            nodes: Vec::new(),
            stack_at_open: self.stack.len(),
        });
    }

    fn push(&mut self, node: NodeRef) {
        self.stack.push(node);
    }

    fn pop_req(&mut self, ins: &Instruction) -> Result<NodeRef> {
        self.stack.pop().ok_or(DepycError::StackUnderflow {
            opcode: ins.opcode.name(),
            offset: ins.offset,
        })
    }

    fn pop_opt(&mut self) -> Option<NodeRef> {
        self.stack.pop()
    }

    fn drop_placeholders(&mut self) {
        while matches!(
            self.stack.last().map(|n| &n.kind),
            Some(NodeKind::ExcPlaceholder) | Some(NodeKind::NullMarker)
        ) {
            self.stack.pop();
        }
    }

    /// Appends a finished statement to the innermost open body.
    fn append(&mut self, node: NodeRef) {
        let blk = self.cur_mut();
        match &mut blk.kind {
            OpenKind::TryContainer { phase, finalbody, body, .. } => match *phase {
                // A statement reaching the container during handler
                // dispatch can only be a finally suite.
                TryPhase::Handlers | TryPhase::Finally => {
                    *phase = TryPhase::Finally;
                    finalbody.push(node);
                }
                TryPhase::Body => body.push(node),
            },
            OpenKind::ExceptHandler { prologue, .. } => {
                *prologue = false;
                blk.nodes.push(node);
            }
            _ => blk.nodes.push(node),
        }
    }

    fn last_node(&self) -> Option<&NodeRef> {
        match &self.cur().kind {
            OpenKind::TryContainer { phase, finalbody, body, .. } => match phase {
                TryPhase::Finally => finalbody.last(),
                _ => body.last(),
            },
            _ => self.cur().nodes.last(),
        }
    }

    fn replace_last_node(&mut self, node: NodeRef) {
        let blk = self.cur_mut();
        let list = match &mut blk.kind {
            OpenKind::TryContainer { phase, finalbody, body, .. } => match phase {
                TryPhase::Finally => finalbody,
                _ => body,
            },
            _ => &mut blk.nodes,
        };
        list.pop();
        list.push(node);
    }

    fn innermost_loop(&self) -> Option<(usize, u32)> {
        for (i, b) in self.blocks.iter().enumerate().rev() {
            if matches!(b.kind, OpenKind::While { .. } | OpenKind::For { .. }) {
                return Some((i, b.end));
            }
        }
        None
    }

    fn in_open_loop_at(&self, end: u32) -> bool {
        self.blocks.iter().any(|b| {
            matches!(b.kind, OpenKind::While { .. } | OpenKind::For { .. }) && b.end == end
        })
    }

    // ------------------------------------------------------------------
    // block closing

    fn close_block(&mut self) -> Result<()> {
        let blk = self.blocks.pop().expect("close on empty block stack");
        match blk.kind {
            OpenKind::Main => unreachable!("main block closed via close_block"),

            OpenKind::If { cond, negative, state, .. } => {
                if state == CondState::PrePopped && blk.nodes.is_empty() {
                    // and/or region: the surviving value is on the stack.
                    match self.pop_opt() {
                        Some(v) => {
                            let folded = make_logical(cond, v, negative);
                            self.push(folded);
                        }
                        None => self.push(cond),
                    }
                    return Ok(());
                }
                let node = Node::new(NodeKind::Block(BlockNode {
                    kind: BlockKind::If { cond, negative },
                    end: blk.end,
                    nodes: blk.nodes,
                }));
                self.append(node);
            }

            OpenKind::Else { .. } => {
                let node = Node::new(NodeKind::Block(BlockNode {
                    kind: BlockKind::Else,
                    end: blk.end,
                    nodes: blk.nodes,
                }));
                self.append(node);
            }

            OpenKind::TernaryElse { cond, negative, then_expr } => {
                if self.stack.len() > blk.stack_at_open {
                    let else_expr = self.pop_opt().expect("checked depth");
                    self.push(Node::new(NodeKind::Ternary {
                        cond,
                        negative,
                        then_expr,
                        else_expr,
                    }));
                } else {
                    // No else expression materialized; degrade to a plain if.
                    let node = Node::new(NodeKind::Block(BlockNode {
                        kind: BlockKind::If { cond, negative },
                        end: blk.end,
                        nodes: vec![then_expr],
                    }));
                    self.append(node);
                }
            }

            OpenKind::While { cond, negative, .. } => {
                let node = Node::new(NodeKind::Block(BlockNode {
                    kind: BlockKind::While { cond, negative },
                    end: blk.end,
                    nodes: blk.nodes,
                }));
                self.append(node);
            }

            OpenKind::For { iter, index, comp, is_async, .. } => {
                if let Some(comp) = comp {
                    self.close_comprehension(blk.nodes, iter, index, comp, is_async);
                } else {
                    let node = Node::new(NodeKind::Block(BlockNode {
                        kind: BlockKind::For { iter, index, is_async },
                        end: blk.end,
                        nodes: blk.nodes,
                    }));
                    self.append(node);
                }
            }

            OpenKind::With { expr, var, is_async, .. } => {
                let node = Node::new(NodeKind::Block(BlockNode {
                    kind: BlockKind::With { expr, var, is_async },
                    end: blk.end,
                    nodes: blk.nodes,
                }));
                self.append(node);
            }

            OpenKind::LoopContainer => {
                // [loop, trailing...] — the trailing statements are the
                // loop's else suite.
                let mut nodes = blk.nodes.into_iter();
                if let Some(first) = nodes.next() {
                    self.append(first);
                    let rest: Vec<NodeRef> = nodes.collect();
                    if !rest.is_empty() {
                        self.append(Node::new(NodeKind::Block(BlockNode {
                            kind: BlockKind::Else,
                            end: blk.end,
                            nodes: rest,
                        })));
                    }
                }
            }

            OpenKind::TryBody => {
                let attach = matches!(self.cur().kind, OpenKind::TryContainer { .. });
                if attach {
                    let mut to_handlers = false;
                    if let OpenKind::TryContainer { phase, body, finally_off, .. } =
                        &mut self.cur_mut().kind
                    {
                        *body = blk.nodes;
                        if *finally_off != 0 {
                            *phase = TryPhase::Finally;
                        } else {
                            *phase = TryPhase::Handlers;
                            to_handlers = true;
                        }
                    }
                    if to_handlers {
                        // The runtime pushes the exception triple at the
                        // handler head.
                        for _ in 0..3 {
                            self.push(Node::new(NodeKind::ExcPlaceholder));
                        }
                    }
                } else {
                    for n in blk.nodes {
                        self.append(n);
                    }
                }
            }

            OpenKind::ExceptHandler { exc, binding, .. } => {
                let attach = matches!(self.cur().kind, OpenKind::TryContainer { .. });
                if attach {
                    if let OpenKind::TryContainer { handlers, .. } = &mut self.cur_mut().kind
                    {
                        handlers.push(Handler {
                            exc,
                            binding,
                            body: blk.nodes,
                        });
                    }
                    // Fresh triple for a possible next handler test.
                    for _ in 0..3 {
                        self.push(Node::new(NodeKind::ExcPlaceholder));
                    }
                } else {
                    for n in blk.nodes {
                        self.append(n);
                    }
                }
            }

            OpenKind::TryContainer { body, handlers, finalbody, .. } => {
                self.drop_placeholders();
                self.append(Node::new(NodeKind::TryStmt {
                    body,
                    handlers,
                    orelse: Vec::new(),
                    finalbody,
                }));
            }
        }
        Ok(())
    }

    /// Pops the enclosing `TryContainer` and commits the statement.
    fn finish_try(&mut self) -> Result<()> {
        if matches!(self.cur().kind, OpenKind::TryContainer { .. }) {
            self.close_block()?;
        }
        Ok(())
    }

    fn close_comprehension(
        &mut self,
        nodes: Vec<NodeRef>,
        iter: NodeRef,
        index: Option<NodeRef>,
        comp: CompData,
        is_async: bool,
    ) {
        // A lone guard block inside the generator is the filter condition.
        let mut condition = None;
        let mut neg = false;
        if let [single] = nodes.as_slice() {
            if let NodeKind::Block(b) = &single.kind {
                if let BlockKind::If { cond, negative } = &b.kind {
                    condition = Some(Rc::clone(cond));
                    neg = *negative;
                }
            }
        }
        let gen = Generator {
            iter,
            index,
            condition,
            neg_condition: neg,
            is_async,
        };

        // Inner comprehension already on the stack: this for-clause wraps it.
        let inner = matches!(
            self.stack.last().map(|n| &n.kind),
            Some(NodeKind::Comprehension { .. })
        );
        if inner {
            let top = self.stack.pop().expect("checked top");
            match Rc::try_unwrap(top) {
                Ok(node) => {
                    if let NodeKind::Comprehension {
                        result,
                        result_value,
                        kind,
                        mut generators,
                    } = node.kind
                    {
                        generators.insert(0, gen);
                        self.push(Node::new(NodeKind::Comprehension {
                            result,
                            result_value,
                            kind,
                            generators,
                        }));
                        return;
                    }
                }
                Err(shared) => {
                    self.push(shared);
                }
            }
        }

        let node = Node::new(NodeKind::Comprehension {
            result: comp.result,
            result_value: comp.result_value,
            kind: comp.kind,
            generators: vec![gen],
        });
        // Replace the empty seed container if it is still on top.
        if let Some(top) = self.stack.last() {
            if matches!(
                top.kind,
                NodeKind::List(_) | NodeKind::Set(_) | NodeKind::Map(_)
            ) {
                self.stack.pop();
            }
        }
        self.push(node);
    }

    // ------------------------------------------------------------------
    // stores

    /// Routes a store destination: loop indices, with-bindings, exception
    /// bindings, unpack collectors, imports, chained stores, plain stores.
    fn do_store(&mut self, dest: NodeRef, ins: &Instruction) -> Result<()> {
        if self.unpack > 0 {
            let tup = self.stack.last().cloned();
            if let Some(tup) = tup {
                if let NodeKind::Tuple { values, .. } = &tup.kind {
                    let idx = values.borrow().len();
                    let dest = if self.unpack_star == Some(idx) {
                        Node::new(NodeKind::Starred(dest))
                    } else {
                        dest
                    };
                    values.borrow_mut().push(dest);
                    self.unpack -= 1;
                    if self.unpack == 0 {
                        self.unpack_star = None;
                        self.stack.pop();
                        return self.finish_store_target(tup, ins);
                    }
                    return Ok(());
                }
            }
            self.unpack = 0;
            self.unpack_star = None;
        }
        self.finish_store_target(dest, ins)
    }

    fn finish_store_target(&mut self, dest: NodeRef, ins: &Instruction) -> Result<()> {
        // Loop index, context-manager, and exception bindings consume no
        // stack value; the runtime produced the stored value itself.
        let route = match &self.cur().kind {
            OpenKind::For { index: None, .. } => StoreRoute::LoopIndex,
            OpenKind::With { inited: false, .. } => StoreRoute::WithVar,
            OpenKind::ExceptHandler { binding: None, prologue: true, .. } => {
                StoreRoute::ExcBinding
            }
            _ => StoreRoute::Normal,
        };
        match route {
            StoreRoute::LoopIndex => {
                if let OpenKind::For { index, .. } = &mut self.cur_mut().kind {
                    *index = Some(dest);
                }
                return Ok(());
            }
            StoreRoute::WithVar => {
                if let OpenKind::With { var, inited, .. } = &mut self.cur_mut().kind {
                    *var = Some(dest);
                    *inited = true;
                }
                return Ok(());
            }
            StoreRoute::ExcBinding => {
                if let OpenKind::ExceptHandler { binding, .. } = &mut self.cur_mut().kind {
                    *binding = Some(dest);
                }
                self.pop_opt();
                return Ok(());
            }
            StoreRoute::Normal => {}
        }

        let value = self.pop_req(ins)?;

        // `from x import a` stores route into the import's store list.
        if let NodeKind::ImportFrom { module, name } = &value.kind {
            if let NodeKind::Import { stores, .. } = &module.kind {
                stores.borrow_mut().push(Node::new(NodeKind::Store {
                    src: Node::name(name),
                    dest,
                }));
                return Ok(());
            }
        }

        // DUP_TOP aliasing turns `a = b = v` into a chain store.
        let chained = match self.last_node().map(|n| &n.kind) {
            Some(NodeKind::ChainStore { dests, src }) if Rc::ptr_eq(src, &value) => {
                dests.borrow_mut().push(dest.clone());
                true
            }
            _ => false,
        };
        if chained {
            return Ok(());
        }
        if self
            .stack
            .last()
            .is_some_and(|top| Rc::ptr_eq(top, &value))
        {
            let chain = Node::new(NodeKind::ChainStore {
                dests: RefCell::new(vec![dest]),
                src: value,
            });
            self.append(chain);
            return Ok(());
        }

        self.append(Node::new(NodeKind::Store { src: value, dest }));
        Ok(())
    }

    // ------------------------------------------------------------------
    // conditional jumps

    fn cond_jump(
        &mut self,
        ins: &Instruction,
        mut cond: NodeRef,
        negative: bool,
        state: CondState,
    ) -> Result<()> {
        let target = ins.jump_target(self.version).unwrap_or(0);
        let legacy = state == CondState::Uninited;

        // Backward conditional jump: a guard over the rest of the loop
        // iteration ("if not cond: continue").
        if target <= ins.offset {
            let end = self
                .innermost_loop()
                .map(|(_, end)| end)
                .unwrap_or_else(|| ins.next_offset(self.version));
            self.open(
                OpenKind::If { cond, negative, state, legacy },
                end,
            );
            return Ok(());
        }

        // While-loop predicate: the exit jump leaves the loop body.
        let cur_end = self.cur().end;
        let cur_empty = self.cur().nodes.is_empty();
        if matches!(self.cur().kind, OpenKind::While { .. }) && target >= cur_end {
            let mut break_guard = None;
            if let OpenKind::While { cond: wcond, negative: wneg, pop_pending } =
                &mut self.cur_mut().kind
            {
                if wcond.is_none() {
                    *wcond = Some(cond);
                    *wneg = negative;
                    if legacy {
                        *pop_pending = true;
                    }
                } else if cur_empty {
                    let prev = wcond.take().expect("condition present");
                    *wcond = Some(make_logical(prev, cond, negative));
                } else {
                    // Mid-body exit test: `if not cond: break`.
                    break_guard = Some((Rc::clone(&cond), !negative));
                }
            }
            if let Some((gcond, gneg)) = break_guard {
                self.append(Node::new(NodeKind::Block(BlockNode {
                    kind: BlockKind::If { cond: gcond, negative: gneg },
                    end: 0,
                    nodes: vec![Node::new(NodeKind::Keyword(KeywordKind::Break))],
                })));
            }
            return Ok(());
        }

        // Merge `a and b` / `a or b` conditions split across two jumps.
        if state == CondState::Popped {
            let parent_splits = match &self.cur().kind {
                OpenKind::If { state: CondState::Popped, negative: pneg, .. } => {
                    let here = self.cur();
                    if here.nodes.is_empty() && self.stack.len() == here.stack_at_open {
                        Some(*pneg)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some(pneg) = parent_splits {
                let do_and = pneg == negative && self.cur().end == target;
                let do_or = pneg != negative;
                if do_and || do_or {
                    let parent = self.blocks.pop().expect("checked if");
                    if let OpenKind::If { cond: pcond, .. } = parent.kind {
                        cond = if do_and {
                            make_logical(pcond, cond, negative)
                        } else {
                            Node::new(NodeKind::Binary {
                                op: BinOp::LogOr,
                                left: pcond,
                                right: cond,
                            })
                        };
                    }
                }
            }
        }

        self.open_cond(cond, negative, state, target);
        Ok(())
    }

    fn open_cond(&mut self, cond: NodeRef, negative: bool, state: CondState, target: u32) {
        // Clip into the parent: a block cannot outlive its container.
        let mut end = target;
        let parent_end = self.cur().end;
        if parent_end != 0 && end > parent_end {
            end = parent_end;
        }
        let legacy = state == CondState::Uninited;
        self.open(OpenKind::If { cond, negative, state, legacy }, end);
    }

    /// Opens an except handler from a recognized match test.
    fn open_except(&mut self, exc: Option<NodeRef>, end: u32) {
        self.open(
            OpenKind::ExceptHandler {
                exc,
                binding: None,
                prologue: true,
            },
            end,
        );
    }

    // ------------------------------------------------------------------
    // calls

    fn build_call(
        &mut self,
        ins: &Instruction,
        args: Vec<NodeRef>,
        kwargs: Vec<(NodeRef, NodeRef)>,
        star: Option<NodeRef>,
        dstar: Option<NodeRef>,
    ) -> Result<()> {
        let func = self.pop_req(ins)?;
        if matches!(self.stack.last().map(|n| &n.kind), Some(NodeKind::NullMarker)) {
            self.stack.pop();
        }

        if matches!(func.kind, NodeKind::LoadBuildClass) {
            let mut it = args.into_iter();
            let body = it.next().unwrap_or_else(|| Node::new(NodeKind::Invalid));
            let name = it.next().unwrap_or_else(|| Node::name("?"));
            let bases: Vec<NodeRef> = it.collect();
            self.push(Node::new(NodeKind::Class {
                code: body,
                bases,
                name,
            }));
            return Ok(());
        }

        self.push(Node::new(NodeKind::Call {
            func,
            args,
            kwargs,
            star,
            dstar,
        }));
        Ok(())
    }

    fn pop_args(&mut self, ins: &Instruction, n: usize) -> Result<Vec<NodeRef>> {
        let mut args = Vec::with_capacity(n);
        for _ in 0..n {
            args.push(self.pop_req(ins)?);
        }
        args.reverse();
        Ok(args)
    }

    fn const_names(&self, node: &NodeRef) -> Vec<Rc<str>> {
        match &node.kind {
            NodeKind::Object(o) => match &**o {
                PyObject::Tuple(items) => items
                    .iter()
                    .filter_map(|i| i.as_string())
                    .map(|s| Rc::from(&*s.as_str()))
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // dispatch

    fn dispatch(&mut self, ins: &Instruction) -> Result<()> {
        use Opcode::*;
        let ver = self.version;
        match ins.opcode {
            NOP | CACHE | RESUME | PRECALL | SETUP_ANNOTATIONS | MAKE_CELL
            | COPY_FREE_VARS | STOP_CODE | SET_LINENO | END_FOR | END_SEND
            | BEGIN_FINALLY | POP_FINALLY | CALL_FINALLY | GEN_START
            | WITH_CLEANUP | WITH_CLEANUP_START | WITH_CLEANUP_FINISH
            | WITH_EXCEPT_START | PREP_RERAISE_STAR | ASYNC_GEN_WRAP
            | CLEANUP_THROW | INTERPRETER_EXIT | EXIT_INIT_CHECK | RESERVED
            | TO_BOOL | EXTENDED_ARG | GET_ITER | GET_YIELD_FROM_ITER
            | GET_AITER | GET_ANEXT | END_ASYNC_FOR | POP_BLOCK => {}

            PUSH_NULL | RETURN_GENERATOR => self.push(Node::new(NodeKind::NullMarker)),

            POP_TOP => self.handle_pop_top(),

            DUP_TOP => {
                if let Some(v) = self.stack.last().cloned() {
                    self.push(v);
                }
            }
            DUP_TOP_TWO => {
                let n = self.stack.len();
                if n >= 2 {
                    let a = Rc::clone(&self.stack[n - 2]);
                    let b = Rc::clone(&self.stack[n - 1]);
                    self.push(a);
                    self.push(b);
                }
            }
            DUP_TOPX => {
                let k = ins.arg() as usize;
                let n = self.stack.len();
                if n >= k {
                    for i in 0..k {
                        let v = Rc::clone(&self.stack[n - k + i]);
                        self.push(v);
                    }
                }
            }
            ROT_TWO => {
                let n = self.stack.len();
                if n >= 2 {
                    self.stack.swap(n - 1, n - 2);
                }
            }
            ROT_THREE => {
                // [a, b, c] -> [c, a, b]
                if self.stack.len() >= 3 {
                    let c = self.stack.pop().expect("len checked");
                    let n = self.stack.len();
                    self.stack.insert(n - 2, c);
                }
            }
            ROT_FOUR => {
                if self.stack.len() >= 4 {
                    let d = self.stack.pop().expect("len checked");
                    let n = self.stack.len();
                    self.stack.insert(n - 3, d);
                }
            }
            ROT_N => {
                let k = ins.arg() as usize;
                if k >= 2 && self.stack.len() >= k {
                    let top = self.stack.pop().expect("len checked");
                    let n = self.stack.len();
                    self.stack.insert(n + 1 - k, top);
                }
            }
            COPY => {
                let i = ins.arg() as usize;
                if i >= 1 && self.stack.len() >= i {
                    let v = Rc::clone(&self.stack[self.stack.len() - i]);
                    self.push(v);
                }
            }
            SWAP => {
                let i = ins.arg() as usize;
                let n = self.stack.len();
                if i >= 2 && n >= i {
                    self.stack.swap(n - 1, n - i);
                }
            }

            // ---------------- loads ----------------
            LOAD_CONST | RETURN_CONST => {
                let obj = self
                    .code
                    .const_at(ins.arg())
                    .cloned()
                    .unwrap_or_else(|| Rc::new(PyObject::None));
                if ins.opcode == RETURN_CONST {
                    self.append(Node::new(NodeKind::Return {
                        value: Node::object(obj),
                        kind: ReturnKind::Return,
                    }));
                } else {
                    self.push(Node::object(obj));
                }
            }
            LOAD_NAME | LOAD_GLOBAL | LOAD_FROM_DICT_OR_GLOBALS => {
                if ins.arg_flag {
                    self.push(Node::new(NodeKind::NullMarker));
                }
                let name = self.lookup_name(ins.arg());
                self.push(name);
            }
            LOAD_FAST | LOAD_FAST_CHECK | LOAD_FAST_AND_CLEAR => {
                let name = self.lookup_var(ins.arg());
                self.push(name);
            }
            LOAD_FAST_LOAD_FAST => {
                let a = self.lookup_var(ins.arg() >> 4);
                let b = self.lookup_var(ins.arg() & 0xF);
                self.push(a);
                self.push(b);
            }
            LOAD_DEREF | LOAD_CLOSURE | LOAD_CLASSDEREF | LOAD_FROM_DICT_OR_DEREF => {
                let name = self.lookup_free(ins.arg());
                self.push(name);
            }
            LOAD_LOCALS => self.push(Node::new(NodeKind::Locals)),
            LOAD_BUILD_CLASS => self.push(Node::new(NodeKind::LoadBuildClass)),
            LOAD_ASSERTION_ERROR => self.push(Node::name("AssertionError")),
            LOAD_ATTR | LOAD_METHOD | LOAD_SUPER_ATTR => {
                let obj = self.pop_req(ins)?;
                let name = self.lookup_name(ins.arg());
                self.push(Node::new(NodeKind::Binary {
                    op: BinOp::Attr,
                    left: obj,
                    right: name,
                }));
            }

            // ---------------- stores ----------------
            STORE_NAME | STORE_GLOBAL => {
                let dest = self.lookup_name(ins.arg());
                self.do_store(dest, ins)?;
            }
            STORE_FAST => {
                let dest = self.lookup_var(ins.arg());
                self.do_store(dest, ins)?;
            }
            STORE_FAST_STORE_FAST => {
                let d1 = self.lookup_var(ins.arg() >> 4);
                let d2 = self.lookup_var(ins.arg() & 0xF);
                self.do_store(d1, ins)?;
                self.do_store(d2, ins)?;
            }
            STORE_FAST_LOAD_FAST => {
                let dest = self.lookup_var(ins.arg() >> 4);
                self.do_store(dest, ins)?;
                let v = self.lookup_var(ins.arg() & 0xF);
                self.push(v);
            }
            STORE_DEREF => {
                let dest = self.lookup_free(ins.arg());
                self.do_store(dest, ins)?;
            }
            STORE_ATTR => {
                let obj = self.pop_req(ins)?;
                let name = self.lookup_name(ins.arg());
                let dest = Node::new(NodeKind::Binary {
                    op: BinOp::Attr,
                    left: obj,
                    right: name,
                });
                self.do_store(dest, ins)?;
            }
            STORE_SUBSCR => {
                let key = self.pop_req(ins)?;
                let obj = self.pop_req(ins)?;
                // Annotation stores compile to __annotations__[name] = type.
                if let NodeKind::Name(n) = &obj.kind {
                    if &**n == "__annotations__" {
                        let ann = self.pop_req(ins)?;
                        self.store_annotation(key, ann);
                        return Ok(());
                    }
                }
                let dest = Node::new(NodeKind::Subscr { value: obj, key });
                self.do_store(dest, ins)?;
            }
            STORE_SLICE => {
                // 3.12 fused form: value, container, lower, upper.
                let upper = self.pop_req(ins)?;
                let lower = self.pop_req(ins)?;
                let obj = self.pop_req(ins)?;
                let dest = Node::new(NodeKind::Subscr {
                    value: obj,
                    key: slice_node(Some(lower), Some(upper), None),
                });
                self.do_store(dest, ins)?;
            }
            STORE_SLICE_0 | STORE_SLICE_1 | STORE_SLICE_2 | STORE_SLICE_3 => {
                let dest = self.py2_slice_target(ins)?;
                self.do_store(dest, ins)?;
            }
            STORE_MAP => {
                let key = self.pop_req(ins)?;
                let value = self.pop_req(ins)?;
                if let Some(NodeKind::Map(items)) = self.stack.last().map(|n| &n.kind) {
                    items.borrow_mut().push((key, value));
                }
            }
            STORE_LOCALS => {
                self.pop_opt();
            }
            STORE_ANNOTATION => {
                let name = self.lookup_name(ins.arg());
                let ann = self.pop_req(ins)?;
                self.store_annotation(name, ann);
            }

            // ---------------- deletes ----------------
            DELETE_NAME | DELETE_GLOBAL => {
                let n = self.lookup_name(ins.arg());
                self.append(Node::new(NodeKind::Delete(n)));
            }
            DELETE_FAST => {
                let n = self.lookup_var(ins.arg());
                self.append(Node::new(NodeKind::Delete(n)));
            }
            DELETE_DEREF => {
                let n = self.lookup_free(ins.arg());
                self.append(Node::new(NodeKind::Delete(n)));
            }
            DELETE_ATTR => {
                let obj = self.pop_req(ins)?;
                let name = self.lookup_name(ins.arg());
                self.append(Node::new(NodeKind::Delete(Node::new(NodeKind::Binary {
                    op: BinOp::Attr,
                    left: obj,
                    right: name,
                }))));
            }
            DELETE_SUBSCR => {
                let key = self.pop_req(ins)?;
                let obj = self.pop_req(ins)?;
                self.append(Node::new(NodeKind::Delete(Node::new(NodeKind::Subscr {
                    value: obj,
                    key,
                }))));
            }
            DELETE_SLICE_0 | DELETE_SLICE_1 | DELETE_SLICE_2 | DELETE_SLICE_3 => {
                let target = self.py2_slice_target(ins)?;
                self.append(Node::new(NodeKind::Delete(target)));
            }

            // ---------------- operators ----------------
            UNARY_POSITIVE | UNARY_NEGATIVE | UNARY_NOT | UNARY_INVERT => {
                let operand = self.pop_req(ins)?;
                let op = match ins.opcode {
                    UNARY_POSITIVE => UnaryOp::Positive,
                    UNARY_NEGATIVE => UnaryOp::Negative,
                    UNARY_NOT => UnaryOp::Not,
                    _ => UnaryOp::Invert,
                };
                self.push(Node::new(NodeKind::Unary { op, operand }));
            }
            UNARY_CONVERT => {
                let operand = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Convert(operand)));
            }

            BINARY_POWER | BINARY_MULTIPLY | BINARY_DIVIDE | BINARY_MODULO
            | BINARY_ADD | BINARY_SUBTRACT | BINARY_FLOOR_DIVIDE
            | BINARY_TRUE_DIVIDE | BINARY_LSHIFT | BINARY_RSHIFT | BINARY_AND
            | BINARY_XOR | BINARY_OR | BINARY_MATRIX_MULTIPLY | INPLACE_ADD
            | INPLACE_SUBTRACT | INPLACE_MULTIPLY | INPLACE_DIVIDE
            | INPLACE_MODULO | INPLACE_POWER | INPLACE_LSHIFT | INPLACE_RSHIFT
            | INPLACE_AND | INPLACE_XOR | INPLACE_OR | INPLACE_FLOOR_DIVIDE
            | INPLACE_TRUE_DIVIDE | INPLACE_MATRIX_MULTIPLY => {
                let right = self.pop_req(ins)?;
                let left = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Binary {
                    op: BinOp::from_opcode(ins.opcode),
                    left,
                    right,
                }));
            }
            BINARY_OP => {
                let right = self.pop_req(ins)?;
                let left = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Binary {
                    op: BinOp::from_binary_op(ins.arg()),
                    left,
                    right,
                }));
            }
            BINARY_SUBSCR => {
                let key = self.pop_req(ins)?;
                let value = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Subscr { value, key }));
            }
            BINARY_SLICE => {
                let upper = self.pop_req(ins)?;
                let lower = self.pop_req(ins)?;
                let value = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Subscr {
                    value,
                    key: slice_node(Some(lower), Some(upper), None),
                }));
            }
            SLICE_0 | SLICE_1 | SLICE_2 | SLICE_3 => {
                let target = self.py2_slice_target(ins)?;
                self.push(target);
            }
            BUILD_SLICE => {
                let step = if ins.arg() == 3 {
                    Some(self.pop_req(ins)?)
                } else {
                    None
                };
                let upper = self.pop_req(ins)?;
                let lower = self.pop_req(ins)?;
                self.push(slice_node(Some(lower), Some(upper), step));
            }

            COMPARE_OP => {
                let right = self.pop_req(ins)?;
                let left = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Compare {
                    op: CmpOp::from_arg(ins.arg()),
                    left,
                    right,
                }));
            }
            IS_OP => {
                let right = self.pop_req(ins)?;
                let left = self.pop_req(ins)?;
                let op = if ins.arg() == 0 { CmpOp::Is } else { CmpOp::IsNot };
                self.push(Node::new(NodeKind::Compare { op, left, right }));
            }
            CONTAINS_OP => {
                let right = self.pop_req(ins)?;
                let left = self.pop_req(ins)?;
                let op = if ins.arg() == 0 { CmpOp::In } else { CmpOp::NotIn };
                self.push(Node::new(NodeKind::Compare { op, left, right }));
            }

            // ---------------- containers ----------------
            BUILD_TUPLE => {
                let values = self.pop_args(ins, ins.arg() as usize)?;
                self.push(Node::new(NodeKind::Tuple {
                    values: RefCell::new(values),
                    require_parens: Cell::new(true),
                }));
            }
            BUILD_LIST => {
                let values = self.pop_args(ins, ins.arg() as usize)?;
                self.push(Node::new(NodeKind::List(values)));
            }
            BUILD_SET => {
                let values = self.pop_args(ins, ins.arg() as usize)?;
                self.push(Node::new(NodeKind::Set(values)));
            }
            BUILD_MAP => {
                let n = ins.arg() as usize;
                // 3.5+ pops key/value pairs; before that the map starts
                // empty and is filled by STORE_MAP.
                let mut items = Vec::new();
                if ver.at_least(3, 5) {
                    for _ in 0..n {
                        let value = self.pop_req(ins)?;
                        let key = self.pop_req(ins)?;
                        items.push((key, value));
                    }
                    items.reverse();
                }
                self.push(Node::new(NodeKind::Map(RefCell::new(items))));
            }
            BUILD_CONST_KEY_MAP => {
                let keys = self.pop_req(ins)?;
                let values = self.pop_args(ins, ins.arg() as usize)?;
                let keys = match &keys.kind {
                    NodeKind::Object(o) => Rc::clone(o),
                    _ => Rc::new(PyObject::None),
                };
                self.push(Node::new(NodeKind::ConstMap { keys, values }));
            }
            BUILD_STRING => {
                let values = self.pop_args(ins, ins.arg() as usize)?;
                self.push(Node::new(NodeKind::JoinedStr(values)));
            }
            BUILD_TUPLE_UNPACK | BUILD_TUPLE_UNPACK_WITH_CALL | BUILD_LIST_UNPACK
            | BUILD_SET_UNPACK | BUILD_MAP_UNPACK | BUILD_MAP_UNPACK_WITH_CALL => {
                let parts = self.pop_args(ins, ins.arg() as usize)?;
                let starred: Vec<NodeRef> = parts
                    .into_iter()
                    .map(|p| Node::new(NodeKind::Starred(p)))
                    .collect();
                self.push(match ins.opcode {
                    BUILD_LIST_UNPACK => Node::new(NodeKind::List(starred)),
                    BUILD_SET_UNPACK => Node::new(NodeKind::Set(starred)),
                    BUILD_MAP_UNPACK | BUILD_MAP_UNPACK_WITH_CALL => {
                        Node::new(NodeKind::Map(RefCell::new(
                            starred
                                .into_iter()
                                .map(|s| (Node::new(NodeKind::Invalid), s))
                                .collect(),
                        )))
                    }
                    _ => Node::new(NodeKind::Tuple {
                        values: RefCell::new(starred),
                        require_parens: Cell::new(true),
                    }),
                });
            }
            LIST_TO_TUPLE => {
                let l = self.pop_req(ins)?;
                let values = list_values(l);
                self.push(Node::new(NodeKind::Tuple {
                    values: RefCell::new(values),
                    require_parens: Cell::new(true),
                }));
            }
            LIST_EXTEND | SET_UPDATE => {
                let seq = self.pop_req(ins)?;
                let extended = self.extend_literal(seq);
                self.push(extended);
            }
            DICT_UPDATE | DICT_MERGE => {
                let src = self.pop_req(ins)?;
                if let Some(NodeKind::Map(items)) = self.stack.last().map(|n| &n.kind) {
                    match &src.kind {
                        NodeKind::Map(other) => {
                            let add: Vec<_> = other.borrow().clone();
                            items.borrow_mut().extend(add);
                        }
                        _ => {
                            items.borrow_mut().push((
                                Node::new(NodeKind::Invalid),
                                Node::new(NodeKind::Starred(src)),
                            ));
                        }
                    }
                }
            }

            UNPACK_SEQUENCE | UNPACK_TUPLE | UNPACK_LIST => {
                self.unpack = ins.arg() as usize;
                self.unpack_star = None;
                self.push(Node::new(NodeKind::Tuple {
                    values: RefCell::new(Vec::new()),
                    require_parens: Cell::new(false),
                }));
            }
            UNPACK_EX => {
                let before = (ins.arg() & 0xFF) as usize;
                let after = (ins.arg() >> 8) as usize;
                self.unpack = before + after + 1;
                self.unpack_star = Some(before);
                self.push(Node::new(NodeKind::Tuple {
                    values: RefCell::new(Vec::new()),
                    require_parens: Cell::new(false),
                }));
            }

            LIST_APPEND | SET_ADD | MAP_ADD => {
                self.handle_comp_append(ins)?;
            }

            // ---------------- iteration ----------------
            FOR_ITER | FOR_LOOP => {
                let iter = self.pop_req(ins)?;
                let mut end = ins.jump_target(self.version).unwrap_or(0);
                // From 3.12 the target points at END_FOR inside the exit.
                if ver.at_least(3, 12) {
                    end += 2;
                }
                self.open(
                    OpenKind::For {
                        iter,
                        index: None,
                        start: ins.offset,
                        comp: None,
                        is_async: false,
                    },
                    end,
                );
            }

            // ---------------- jumps ----------------
            POP_JUMP_IF_FALSE | POP_JUMP_IF_TRUE | POP_JUMP_BACK_IF_FALSE
            | POP_JUMP_BACK_IF_TRUE => {
                let cond = self.pop_req(ins)?;
                if self.try_handler_test(&cond, ins) {
                    return Ok(());
                }
                let negative = matches!(
                    ins.opcode,
                    POP_JUMP_IF_TRUE | POP_JUMP_BACK_IF_TRUE
                );
                self.cond_jump(ins, cond, negative, CondState::Popped)?;
            }
            POP_JUMP_IF_NONE | POP_JUMP_IF_NOT_NONE | POP_JUMP_BACK_IF_NONE
            | POP_JUMP_BACK_IF_NOT_NONE => {
                let value = self.pop_req(ins)?;
                let op = if matches!(
                    ins.opcode,
                    POP_JUMP_IF_NONE | POP_JUMP_BACK_IF_NONE
                ) {
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                };
                let cond = Node::new(NodeKind::Compare {
                    op,
                    left: value,
                    right: Node::object(Rc::new(PyObject::None)),
                });
                self.cond_jump(ins, cond, false, CondState::Popped)?;
            }
            JUMP_IF_FALSE | JUMP_IF_TRUE => {
                let cond = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or(DepycError::StackUnderflow {
                        opcode: ins.opcode.name(),
                        offset: ins.offset,
                    })?;
                if self.try_handler_test(&cond, ins) {
                    self.pop_opt();
                    return Ok(());
                }
                let negative = ins.opcode == JUMP_IF_TRUE;
                self.cond_jump(ins, cond, negative, CondState::Uninited)?;
            }
            JUMP_IF_FALSE_OR_POP | JUMP_IF_TRUE_OR_POP => {
                let cond = self.pop_req(ins)?;
                let negative = ins.opcode == JUMP_IF_TRUE_OR_POP;
                let target = ins.jump_target(self.version).unwrap_or(0);
                self.open(
                    OpenKind::If {
                        cond,
                        negative,
                        state: CondState::PrePopped,
                        legacy: false,
                    },
                    target,
                );
            }
            JUMP_IF_NOT_EXC_MATCH => {
                let right = self.pop_req(ins)?;
                let _exc = self.pop_opt();
                let target = ins.jump_target(self.version).unwrap_or(0);
                self.open_except(Some(right), target);
            }

            JUMP_FORWARD | JUMP_ABSOLUTE | JUMP_BACKWARD
            | JUMP_BACKWARD_NO_INTERRUPT => {
                self.handle_jump(ins)?;
            }
            CONTINUE_LOOP => {
                self.append(Node::new(NodeKind::Keyword(KeywordKind::Continue)));
            }
            BREAK_LOOP => {
                self.append(Node::new(NodeKind::Keyword(KeywordKind::Break)));
            }

            // ---------------- functions & calls ----------------
            MAKE_FUNCTION | MAKE_CLOSURE => self.handle_make_function(ins)?,
            SET_FUNCTION_ATTRIBUTE => self.handle_set_function_attribute(ins)?,

            KW_NAMES => {
                let names = self
                    .code
                    .const_at(ins.arg())
                    .cloned()
                    .unwrap_or_else(|| Rc::new(PyObject::None));
                self.pending_kw_names = self.const_names(&Node::object(names));
            }

            CALL_FUNCTION | CALL_METHOD => {
                let (npos, nkw) = if ver.wordcode() {
                    (ins.arg() as usize, 0)
                } else {
                    ((ins.arg() & 0xFF) as usize, ((ins.arg() >> 8) & 0xFF) as usize)
                };
                let kwargs = self.pop_kw_pairs(ins, nkw)?;
                let args = self.pop_args(ins, npos)?;
                self.build_call(ins, args, kwargs, None, None)?;
            }
            CALL_FUNCTION_VAR | CALL_FUNCTION_VAR_KW => {
                let dstar = if ins.opcode == CALL_FUNCTION_VAR_KW {
                    Some(self.pop_req(ins)?)
                } else {
                    None
                };
                let star = Some(self.pop_req(ins)?);
                let npos = (ins.arg() & 0xFF) as usize;
                let nkw = ((ins.arg() >> 8) & 0xFF) as usize;
                let kwargs = self.pop_kw_pairs(ins, nkw)?;
                let args = self.pop_args(ins, npos)?;
                self.build_call(ins, args, kwargs, star, dstar)?;
            }
            CALL_FUNCTION_KW => {
                let names = self.pop_req(ins)?;
                let keys = self.const_names(&names);
                let mut all = self.pop_args(ins, ins.arg() as usize)?;
                let kw_values = all.split_off(all.len().saturating_sub(keys.len()));
                let kwargs = keys
                    .into_iter()
                    .zip(kw_values)
                    .map(|(k, v)| (Node::name(&k), v))
                    .collect();
                self.build_call(ins, all, kwargs, None, None)?;
            }
            CALL_FUNCTION_EX => {
                let dstar = if ins.arg() & 1 != 0 {
                    Some(self.pop_req(ins)?)
                } else {
                    None
                };
                let star = self.pop_req(ins)?;
                // Literal argument packs unpack back into a plain call.
                let inline_args = match &star.kind {
                    NodeKind::Tuple { values, .. } => Some(values.borrow().clone()),
                    _ => None,
                };
                let (args, star) = match inline_args {
                    Some(a) => (a, None),
                    None => (Vec::new(), Some(star)),
                };
                let inline_kwargs = match dstar.as_ref().map(|d| &d.kind) {
                    Some(NodeKind::Map(items)) => Some(items.borrow().clone()),
                    _ => None,
                };
                let (kwargs, dstar) = match inline_kwargs {
                    Some(k) => (k, None),
                    None => (Vec::new(), dstar),
                };
                self.build_call(ins, args, kwargs, star, dstar)?;
            }
            CALL | CALL_KW => {
                let kw_names: Vec<Rc<str>> = if ins.opcode == CALL_KW {
                    let names = self.pop_req(ins)?;
                    self.const_names(&names)
                } else {
                    std::mem::take(&mut self.pending_kw_names)
                };
                let mut all = self.pop_args(ins, ins.arg() as usize)?;
                let kw_values = all.split_off(all.len().saturating_sub(kw_names.len()));
                let kwargs = kw_names
                    .into_iter()
                    .zip(kw_values)
                    .map(|(k, v)| (Node::name(&k), v))
                    .collect();
                self.build_call(ins, all, kwargs, None, None)?;
            }
            BUILD_CLASS => {
                let methods = self.pop_req(ins)?;
                let bases = self.pop_req(ins)?;
                let name = self.pop_req(ins)?;
                let bases = tuple_values_or_self(bases);
                self.push(Node::new(NodeKind::Class {
                    code: methods,
                    bases,
                    name,
                }));
            }
            UNARY_CALL => {
                self.build_call(ins, Vec::new(), Vec::new(), None, None)?;
            }
            BINARY_CALL => {
                let args = self.pop_req(ins)?;
                let args = tuple_values_or_self(args);
                self.build_call(ins, args, Vec::new(), None, None)?;
            }
            BUILD_FUNCTION => {
                let code = self.pop_code_object(ins)?;
                self.push(Node::new(NodeKind::Function {
                    code,
                    defaults: Vec::new(),
                    kw_defaults: Vec::new(),
                }));
            }
            CALL_INTRINSIC_1 => match ins.arg() {
                2 => {
                    // INTRINSIC_IMPORT_STAR
                    let module = self.pop_req(ins)?;
                    self.append(Node::new(NodeKind::ImportStar(module)));
                }
                5 => {
                    // INTRINSIC_UNARY_POSITIVE
                    let v = self.pop_req(ins)?;
                    self.push(Node::new(NodeKind::Unary {
                        op: UnaryOp::Positive,
                        operand: v,
                    }));
                }
                6 => {
                    // INTRINSIC_LIST_TO_TUPLE
                    let l = self.pop_req(ins)?;
                    let values = list_values(l);
                    self.push(Node::new(NodeKind::Tuple {
                        values: RefCell::new(values),
                        require_parens: Cell::new(true),
                    }));
                }
                _ => {}
            },
            CALL_INTRINSIC_2 => {}

            // ---------------- returns, raises ----------------
            RETURN_VALUE => {
                // A return inside an and/or region folds the short-circuit
                // value first; its cleanup stub then returns on an empty
                // symbolic stack and is dropped.
                if self.stack.is_empty() && self.dead_return_ok {
                    self.dead_return_ok = false;
                    return Ok(());
                }
                let prepopped = matches!(
                    self.cur().kind,
                    OpenKind::If { state: CondState::PrePopped, .. }
                );
                if prepopped && self.cur().nodes.is_empty() && !self.stack.is_empty() {
                    let blk = self.blocks.pop().expect("checked if");
                    if let OpenKind::If { cond, negative, .. } = blk.kind {
                        let v = self.pop_opt().expect("checked non-empty");
                        let folded = make_logical(cond, v, negative);
                        self.append(Node::new(NodeKind::Return {
                            value: folded,
                            kind: ReturnKind::Return,
                        }));
                        self.dead_return_ok = true;
                    }
                    return Ok(());
                }
                let value = self.pop_req(ins)?;
                self.append(Node::new(NodeKind::Return {
                    value,
                    kind: ReturnKind::Return,
                }));
            }
            YIELD_VALUE => {
                let value = self.pop_req(ins)?;
                if matches!(value.kind, NodeKind::Awaitable(_)) {
                    self.push(value);
                } else {
                    self.push(Node::new(NodeKind::Return {
                        value,
                        kind: ReturnKind::Yield,
                    }));
                }
            }
            YIELD_FROM => {
                let _sent = self.pop_opt();
                let value = self.pop_req(ins)?;
                if matches!(value.kind, NodeKind::Awaitable(_)) {
                    self.push(value);
                } else {
                    self.push(Node::new(NodeKind::Return {
                        value,
                        kind: ReturnKind::YieldFrom,
                    }));
                }
            }
            GET_AWAITABLE => {
                let v = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::Awaitable(v)));
            }
            SEND => {
                // The `None` primer sent into the sub-iterator.
                self.pop_opt();
            }
            RAISE_VARARGS | RAISE_EXCEPTION => {
                let params = self.pop_args(ins, ins.arg() as usize)?;
                self.append(Node::new(NodeKind::Raise(params)));
            }
            RERAISE => self.close_open_handler()?,

            // ---------------- imports ----------------
            IMPORT_NAME => {
                let name = self.lookup_name(ins.arg());
                let mut fromlist = None;
                if ver.at_least(2, 0) {
                    let fl = self.pop_req(ins)?;
                    if !fl.is_none_const() {
                        fromlist = Some(fl);
                    }
                }
                if ver.at_least(2, 5) {
                    let _level = self.pop_opt();
                }
                self.push(Node::new(NodeKind::Import {
                    name,
                    fromlist,
                    stores: RefCell::new(Vec::new()),
                }));
            }
            IMPORT_FROM => {
                let module = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or(DepycError::StackUnderflow {
                        opcode: ins.opcode.name(),
                        offset: ins.offset,
                    })?;
                let name = match self.code.name_at(ins.arg()) {
                    Some(n) => Rc::clone(n),
                    None => Rc::from("<invalid>"),
                };
                self.push(Node::new(NodeKind::ImportFrom { module, name }));
            }
            IMPORT_STAR => {
                let module = self.pop_req(ins)?;
                self.append(Node::new(NodeKind::ImportStar(module)));
            }

            // ---------------- python 2 statements ----------------
            PRINT_EXPR => {
                let v = self.pop_req(ins)?;
                self.append(v);
            }
            PRINT_ITEM => {
                let v = self.pop_req(ins)?;
                self.print_item(v, None);
            }
            PRINT_ITEM_TO => {
                let stream = self.pop_req(ins)?;
                let v = self.pop_req(ins)?;
                self.print_item(v, Some(stream));
            }
            PRINT_NEWLINE => self.print_newline(None),
            PRINT_NEWLINE_TO => {
                let stream = self.pop_opt();
                self.print_newline(stream);
            }
            EXEC_STMT => {
                let locals = self.pop_req(ins)?;
                let globals = self.pop_req(ins)?;
                let stmt = self.pop_req(ins)?;
                let globals = (!globals.is_none_const()).then_some(globals);
                let locals = if locals.is_none_const()
                    || globals.as_ref().is_some_and(|g| Rc::ptr_eq(g, &locals))
                {
                    None
                } else {
                    Some(locals)
                };
                self.append(Node::new(NodeKind::Exec {
                    stmt,
                    globals,
                    locals,
                }));
            }

            // ---------------- f-strings ----------------
            FORMAT_VALUE => {
                let flags = ins.arg() as u8;
                let format_spec = if flags & HAVE_FMT_SPEC != 0 {
                    Some(self.pop_req(ins)?)
                } else {
                    None
                };
                let value = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::FormattedValue {
                    value,
                    conversion: flags,
                    format_spec,
                }));
            }
            CONVERT_VALUE => {
                let value = self.pop_req(ins)?;
                self.push(Node::new(NodeKind::FormattedValue {
                    value,
                    conversion: ins.arg() as u8,
                    format_spec: None,
                }));
            }
            FORMAT_SIMPLE => {
                let value = self.pop_req(ins)?;
                if matches!(value.kind, NodeKind::FormattedValue { .. }) {
                    self.push(value);
                } else {
                    self.push(Node::new(NodeKind::FormattedValue {
                        value,
                        conversion: 0,
                        format_spec: None,
                    }));
                }
            }
            FORMAT_WITH_SPEC => {
                let spec = self.pop_req(ins)?;
                let value = self.pop_req(ins)?;
                let (value, conversion) = match &value.kind {
                    NodeKind::FormattedValue { value: v, conversion, .. } => {
                        (Rc::clone(v), *conversion)
                    }
                    _ => (value, 0),
                };
                self.push(Node::new(NodeKind::FormattedValue {
                    value,
                    conversion: conversion | HAVE_FMT_SPEC,
                    format_spec: Some(spec),
                }));
            }

            // ---------------- blocks ----------------
            SETUP_LOOP => {
                let end = ins.jump_target(self.version).unwrap_or(0);
                self.open(OpenKind::LoopContainer, end);
            }
            SETUP_EXCEPT => {
                let target = ins.jump_target(self.version).unwrap_or(0);
                self.open_try_container(0);
                self.open(OpenKind::TryBody, target);
            }
            SETUP_FINALLY => {
                let target = ins.jump_target(self.version).unwrap_or(0);
                // From 3.8, SETUP_FINALLY also guards except suites; the
                // handler shape decides which one it was.
                let finally_off = if ver.at_least(3, 8) { 0 } else { target };
                self.open_try_container(finally_off);
                self.open(OpenKind::TryBody, target);
            }
            END_FINALLY => {
                self.close_open_handler()?;
                self.finish_try()?;
            }
            POP_EXCEPT => {}
            PUSH_EXC_INFO => {
                self.push(Node::new(NodeKind::ExcPlaceholder));
            }
            CHECK_EXC_MATCH => {
                let right = self.pop_req(ins)?;
                let left = self
                    .stack
                    .last()
                    .cloned()
                    .unwrap_or_else(|| Node::new(NodeKind::ExcPlaceholder));
                self.push(Node::new(NodeKind::Compare {
                    op: CmpOp::ExceptionMatch,
                    left,
                    right,
                }));
            }
            CHECK_EG_MATCH => {
                let _pattern = self.pop_opt();
            }

            SETUP_WITH | SETUP_ASYNC_WITH | BEFORE_WITH | BEFORE_ASYNC_WITH => {
                let expr = self.pop_req(ins)?;
                let is_async =
                    matches!(ins.opcode, SETUP_ASYNC_WITH | BEFORE_ASYNC_WITH);
                let end = match ins.jump_target(self.version) {
                    Some(t) => t,
                    None => self.with_end_from_table(ins),
                };
                self.open(
                    OpenKind::With {
                        expr,
                        var: None,
                        inited: false,
                        is_async,
                    },
                    end,
                );
            }

            GET_LEN | MATCH_MAPPING | MATCH_SEQUENCE | MATCH_KEYS | MATCH_CLASS
            | COPY_DICT_WITHOUT_KEYS => {
                // match-statement machinery is not reconstructed
                self.push(Node::name(&format!("<MATCH_{}>", ins.offset)));
            }

            UNKNOWN => {
                warn!(
                    raw = ins.raw,
                    offset = ins.offset,
                    "unknown opcode; emitting placeholder"
                );
                self.push(Node::name(&format!("<UNKNOWN_OPCODE_{}>", ins.raw)));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // dispatch helpers

    fn open_try_container(&mut self, finally_off: u32) {
        self.open(
            OpenKind::TryContainer {
                finally_off,
                phase: TryPhase::Body,
                handler_pops: 0,
                body: Vec::new(),
                handlers: Vec::new(),
                finalbody: Vec::new(),
            },
            0,
        );
    }

    fn pop_kw_pairs(
        &mut self,
        ins: &Instruction,
        nkw: usize,
    ) -> Result<Vec<(NodeRef, NodeRef)>> {
        let mut kwargs = Vec::with_capacity(nkw);
        for _ in 0..nkw {
            let value = self.pop_req(ins)?;
            let key = self.pop_req(ins)?;
            kwargs.push((key, value));
        }
        kwargs.reverse();
        Ok(kwargs)
    }

    fn handle_pop_top(&mut self) {
        let absorb = match &mut self.cur_mut().kind {
            OpenKind::If { state, legacy, .. } if *state == CondState::Uninited => {
                *state = CondState::Popped;
                *legacy = true;
                true
            }
            OpenKind::While { pop_pending, .. } if *pop_pending => {
                *pop_pending = false;
                true
            }
            _ => false,
        };
        if absorb {
            self.pop_opt();
            return;
        }
        // The else path of a legacy (non-popping) conditional re-pops a
        // value our single-pass stack no longer holds.
        let clear_only = match &mut self.cur_mut().kind {
            OpenKind::Else { pop_pending } if *pop_pending => {
                *pop_pending = false;
                true
            }
            _ => false,
        };
        if clear_only {
            return;
        }

        // Bare-except heads drop the exception triple.
        let mut open_bare = false;
        if matches!(
            self.stack.last().map(|n| &n.kind),
            Some(NodeKind::ExcPlaceholder)
        ) {
            if let OpenKind::TryContainer {
                phase: TryPhase::Handlers,
                handler_pops,
                ..
            } = &mut self.cur_mut().kind
            {
                *handler_pops += 1;
                if *handler_pops == 3 {
                    *handler_pops = 0;
                    open_bare = true;
                }
            }
        }
        if open_bare {
            self.pop_opt();
            self.open_except(None, 0);
            return;
        }

        let Some(v) = self.pop_opt() else { return };
        match &v.kind {
            NodeKind::Import { .. } => self.append(v),
            k if k.is_marker() => {}
            NodeKind::Object(o) if o.is_none() => {}
            NodeKind::Name(n) if n.starts_with('<') => {}
            _ => self.append(v),
        }
    }

    fn handle_jump(&mut self, ins: &Instruction) -> Result<()> {
        let target = ins.jump_target(self.version).unwrap_or(0);
        let next = ins.next_offset(self.version);

        // Backward jump: loop back-edge or continue.
        if target <= ins.offset {
            if let Some((idx, loop_end)) = self.innermost_loop() {
                if next >= loop_end || self.blocks.len() == idx + 1 {
                    return Ok(()); // natural back edge
                }
                self.append(Node::new(NodeKind::Keyword(KeywordKind::Continue)));
                return Ok(());
            }
            // No loop in sight; a hand-shaped jump we cannot structure.
            self.append(Node::new(NodeKind::Keyword(KeywordKind::Continue)));
            return Ok(());
        }

        // and/or regions and chained comparisons jump over their
        // short-circuit cleanup; fold now and skip the stub.
        let is_prepopped = matches!(
            self.cur().kind,
            OpenKind::If { state: CondState::PrePopped, .. }
        );
        if is_prepopped && self.cur().nodes.is_empty() && !self.stack.is_empty() {
            let blk = self.blocks.pop().expect("checked if");
            if let OpenKind::If { cond, negative, .. } = blk.kind {
                let v = self.pop_opt().expect("checked non-empty");
                let folded = make_logical(cond, v, negative);
                self.push(folded);
                self.skip_until = Some(target);
            }
            return Ok(());
        }

        // Ternary: the `if` branch produced a bare expression.
        let is_cond = matches!(self.cur().kind, OpenKind::If { .. });
        if is_cond
            && self.cur().nodes.is_empty()
            && self.stack.len() > self.cur().stack_at_open
        {
            let blk = self.blocks.pop().expect("checked if");
            if let OpenKind::If { cond, negative, .. } = blk.kind {
                let then_expr = self.pop_opt().expect("checked depth");
                self.open(
                    OpenKind::TernaryElse {
                        cond,
                        negative,
                        then_expr,
                    },
                    target,
                );
            }
            return Ok(());
        }

        // End of a then-branch: open the sibling else.
        if is_cond && next >= self.cur().end {
            let blk = self.blocks.pop().expect("checked if");
            if let OpenKind::If { cond, negative, legacy, .. } = blk.kind {
                self.append(Node::new(NodeKind::Block(BlockNode {
                    kind: BlockKind::If { cond, negative },
                    end: blk.end,
                    nodes: blk.nodes,
                })));
                if target > blk.end {
                    let mut end = target;
                    let parent_end = self.cur().end;
                    if parent_end != 0 && end > parent_end {
                        end = parent_end;
                    }
                    self.open(OpenKind::Else { pop_pending: legacy }, end);
                }
            }
            return Ok(());
        }

        // Handler epilogue: jump over the remaining handlers.
        if matches!(self.cur().kind, OpenKind::ExceptHandler { .. }) {
            self.close_block()?;
            if matches!(self.cur().kind, OpenKind::TryContainer { .. })
                && self.cur().end == 0
            {
                self.cur_mut().end = target;
            }
            return Ok(());
        }

        // Break out of a loop.
        if let Some((_, loop_end)) = self.innermost_loop() {
            if target >= loop_end {
                self.append(Node::new(NodeKind::Keyword(KeywordKind::Break)));
                return Ok(());
            }
        }

        // Otherwise a trampoline (end-of-try and the like); nothing to keep.
        Ok(())
    }

    fn handle_make_function(&mut self, ins: &Instruction) -> Result<()> {
        let ver = self.version;
        // 3.13 moved every prefix item into SET_FUNCTION_ATTRIBUTE.
        if ver.at_least(3, 13) {
            let code = self.pop_code_object(ins)?;
            self.push(Node::new(NodeKind::Function {
                code,
                defaults: Vec::new(),
                kw_defaults: Vec::new(),
            }));
            return Ok(());
        }

        if ver.at_least(3, 3) && ver.before(3, 11) {
            let _qualname = self.pop_req(ins)?;
        }
        let code = self.pop_code_object(ins)?;

        let mut defaults = Vec::new();
        let mut kw_defaults = Vec::new();

        if ver.at_least(3, 6) {
            let flags = ins.arg();
            if flags & 0x08 != 0 {
                let _closure = self.pop_opt();
            }
            if flags & 0x04 != 0 {
                let _annotations = self.pop_opt();
            }
            if flags & 0x02 != 0 {
                if let Some(m) = self.pop_opt() {
                    kw_defaults = map_pairs(&m);
                }
            }
            if flags & 0x01 != 0 {
                if let Some(t) = self.pop_opt() {
                    defaults = tuple_items(&t);
                }
            }
        } else {
            if ins.opcode == Opcode::MAKE_CLOSURE {
                let _closure = self.pop_opt();
            }
            let ndefs = (ins.arg() & 0xFF) as usize;
            let nkw = ((ins.arg() >> 8) & 0xFF) as usize;
            let nann = (ins.arg() >> 16) as usize;
            for _ in 0..nann {
                self.pop_opt();
            }
            for _ in 0..nkw {
                let value = self.pop_req(ins)?;
                let key = self.pop_req(ins)?;
                let name = node_text(&key);
                kw_defaults.push((name, value));
            }
            kw_defaults.reverse();
            defaults = self.pop_args(ins, ndefs)?;
        }

        self.push(Node::new(NodeKind::Function {
            code,
            defaults,
            kw_defaults,
        }));
        Ok(())
    }

    fn handle_set_function_attribute(&mut self, ins: &Instruction) -> Result<()> {
        let func = self.pop_req(ins)?;
        let value = self.pop_req(ins)?;
        if let NodeKind::Function { code, defaults, kw_defaults } = &func.kind {
            let mut defaults = defaults.clone();
            let mut kw_defaults = kw_defaults.clone();
            match ins.arg() {
                0x01 => defaults = tuple_items(&value),
                0x02 => kw_defaults = map_pairs(&value),
                _ => {}
            }
            self.push(Node::new(NodeKind::Function {
                code: Rc::clone(code),
                defaults,
                kw_defaults,
            }));
        } else {
            self.push(func);
        }
        Ok(())
    }

    fn pop_code_object(&mut self, ins: &Instruction) -> Result<ObjRef> {
        let node = self.pop_req(ins)?;
        Ok(match &node.kind {
            NodeKind::Object(o) => Rc::clone(o),
            _ => Rc::new(PyObject::None),
        })
    }

    fn handle_comp_append(&mut self, ins: &Instruction) -> Result<()> {
        let ver = self.version;
        let (result, result_value, kind) = match ins.opcode {
            Opcode::MAP_ADD => {
                let (key, value) = if ver.at_least(3, 8) {
                    let value = self.pop_req(ins)?;
                    let key = self.pop_req(ins)?;
                    (key, value)
                } else {
                    let key = self.pop_req(ins)?;
                    let value = self.pop_req(ins)?;
                    (key, value)
                };
                (key, Some(value), ComprehensionKind::Dict)
            }
            Opcode::SET_ADD => (self.pop_req(ins)?, None, ComprehensionKind::Set),
            _ => {
                let v = self.pop_req(ins)?;
                if ver.before(2, 7) {
                    // Classic LIST_APPEND also pops the list reference.
                    self.pop_opt();
                }
                (v, None, ComprehensionKind::List)
            }
        };

        // Mark the innermost for-block as a comprehension generator.
        for blk in self.blocks.iter_mut().rev() {
            if let OpenKind::For { comp, .. } = &mut blk.kind {
                *comp = Some(CompData {
                    kind,
                    result,
                    result_value,
                });
                return Ok(());
            }
        }
        // No generator in sight: keep the value as a plain statement.
        self.append(result);
        Ok(())
    }

    fn close_open_handler(&mut self) -> Result<()> {
        if matches!(self.cur().kind, OpenKind::ExceptHandler { .. }) {
            self.close_block()?;
        }
        self.drop_placeholders();
        Ok(())
    }

    /// Recognizes the exception-dispatch test at a handler head and opens
    /// the handler block. Returns true when consumed.
    fn try_handler_test(&mut self, cond: &NodeRef, ins: &Instruction) -> bool {
        let in_handlers = matches!(
            self.cur().kind,
            OpenKind::TryContainer { phase: TryPhase::Handlers, .. }
        );
        if !in_handlers {
            return false;
        }
        if let NodeKind::Compare { op: CmpOp::ExceptionMatch, right, .. } = &cond.kind {
            let end = ins.jump_target(self.version).unwrap_or(0);
            let exc = Some(Rc::clone(right));
            self.open_except(exc, end);
            return true;
        }
        false
    }

    fn store_annotation(&mut self, name_node: NodeRef, annotation: NodeRef) {
        let name = Node::name(&node_text(&name_node));
        let annotated = Node::new(NodeKind::Annotated {
            name: Rc::clone(&name),
            annotation,
        });

        // Merge `x = v` directly before `x: T` into `x: T = v`.
        let merged = match self.last_node().map(|n| &n.kind) {
            Some(NodeKind::Store { src, dest }) if names_equal(dest, &name) => {
                Some(Node::new(NodeKind::Store {
                    src: Rc::clone(src),
                    dest: Rc::clone(&annotated),
                }))
            }
            _ => None,
        };
        match merged {
            Some(m) => self.replace_last_node(m),
            None => self.append(annotated),
        }
    }

    fn print_item(&mut self, value: NodeRef, stream: Option<NodeRef>) {
        let appended = match self.last_node().map(|n| &n.kind) {
            Some(NodeKind::Print { values, eol, .. }) if !eol.get() => {
                values.borrow_mut().push(Rc::clone(&value));
                true
            }
            _ => false,
        };
        if !appended {
            self.append(Node::new(NodeKind::Print {
                values: RefCell::new(vec![value]),
                stream,
                eol: Cell::new(false),
            }));
        }
    }

    fn print_newline(&mut self, stream: Option<NodeRef>) {
        let closed = match self.last_node().map(|n| &n.kind) {
            Some(NodeKind::Print { eol, .. }) if !eol.get() => {
                eol.set(true);
                true
            }
            _ => false,
        };
        if !closed {
            self.append(Node::new(NodeKind::Print {
                values: RefCell::new(Vec::new()),
                stream,
                eol: Cell::new(true),
            }));
        }
    }

    fn py2_slice_target(&mut self, ins: &Instruction) -> Result<NodeRef> {
        let k = match ins.opcode {
            Opcode::SLICE_0 | Opcode::STORE_SLICE_0 | Opcode::DELETE_SLICE_0 => 0,
            Opcode::SLICE_1 | Opcode::STORE_SLICE_1 | Opcode::DELETE_SLICE_1 => 1,
            Opcode::SLICE_2 | Opcode::STORE_SLICE_2 | Opcode::DELETE_SLICE_2 => 2,
            _ => 3,
        };
        let (lower, upper) = match k {
            0 => (None, None),
            1 => (Some(self.pop_req(ins)?), None),
            2 => (None, Some(self.pop_req(ins)?)),
            _ => {
                let upper = self.pop_req(ins)?;
                let lower = self.pop_req(ins)?;
                (Some(lower), Some(upper))
            }
        };
        let obj = self.pop_req(ins)?;
        Ok(Node::new(NodeKind::Subscr {
            value: obj,
            key: slice_node(lower, upper, None),
        }))
    }

    fn extend_literal(&mut self, seq: NodeRef) -> NodeRef {
        let base = self.pop_opt();
        let is_set = matches!(base.as_ref().map(|b| &b.kind), Some(NodeKind::Set(_)));
        let mut values = match base.as_ref().map(|b| &b.kind) {
            Some(NodeKind::List(v)) | Some(NodeKind::Set(v)) => v.clone(),
            _ => Vec::new(),
        };
        let const_items: Option<Vec<NodeRef>> = match &seq.kind {
            NodeKind::Object(o) => match &**o {
                PyObject::Tuple(items)
                | PyObject::List(items)
                | PyObject::FrozenSet(items)
                | PyObject::Set(items) => {
                    Some(items.iter().map(|i| Node::object(Rc::clone(i))).collect())
                }
                _ => None,
            },
            _ => None,
        };
        match const_items {
            Some(items) => values.extend(items),
            None => values.push(Node::new(NodeKind::Starred(seq))),
        }
        if is_set {
            Node::new(NodeKind::Set(values))
        } else {
            Node::new(NodeKind::List(values))
        }
    }

    fn with_end_from_table(&self, ins: &Instruction) -> u32 {
        let entries = decode_exception_table(&self.code.exception_table);
        let next = ins.next_offset(self.version);
        entries
            .iter()
            .find(|e| e.start <= next && next < e.end())
            .map(|e| e.end())
            .unwrap_or(0)
    }

    // name lookups ------------------------------------------------------

    fn lookup_name(&self, idx: u32) -> NodeRef {
        match self.code.name_at(idx) {
            Some(n) => Node::name(n),
            None => Node::name(&format!("<name_{idx}>")),
        }
    }

    fn lookup_var(&self, idx: u32) -> NodeRef {
        match self.code.var_name_at(idx) {
            Some(n) => Node::name(n),
            None => Node::name(&format!("<var_{idx}>")),
        }
    }

    fn lookup_free(&self, idx: u32) -> NodeRef {
        match self.code.free_name_at(idx) {
            Some(n) => Node::name(n),
            None => Node::name(&format!("<free_{idx}>")),
        }
    }
}

// ----------------------------------------------------------------------
// free helpers

fn slice_node(
    lower: Option<NodeRef>,
    upper: Option<NodeRef>,
    step: Option<NodeRef>,
) -> NodeRef {
    let clean = |v: Option<NodeRef>| v.filter(|n| !n.is_none_const());
    Node::new(NodeKind::Slice {
        lower: clean(lower),
        upper: clean(upper),
        step: clean(step),
    })
}

fn list_values(node: NodeRef) -> Vec<NodeRef> {
    let inner = match &node.kind {
        NodeKind::List(v) => Some(v.clone()),
        _ => None,
    };
    inner.unwrap_or_else(|| vec![node])
}

fn tuple_values_or_self(node: NodeRef) -> Vec<NodeRef> {
    let inner = match &node.kind {
        NodeKind::Tuple { values, .. } => Some(values.borrow().clone()),
        _ => None,
    };
    inner.unwrap_or_else(|| vec![node])
}

fn node_text(node: &NodeRef) -> Rc<str> {
    match &node.kind {
        NodeKind::Object(o) => o
            .as_string()
            .map(|s| Rc::from(&*s.as_str()))
            .unwrap_or_else(|| Rc::from("?")),
        NodeKind::Name(n) => Rc::clone(n),
        _ => Rc::from("?"),
    }
}

fn tuple_items(node: &NodeRef) -> Vec<NodeRef> {
    match &node.kind {
        NodeKind::Tuple { values, .. } => values.borrow().clone(),
        NodeKind::Object(o) => match &**o {
            PyObject::Tuple(items) => {
                items.iter().map(|i| Node::object(Rc::clone(i))).collect()
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn map_pairs(node: &NodeRef) -> Vec<(Rc<str>, NodeRef)> {
    match &node.kind {
        NodeKind::Map(items) => items
            .borrow()
            .iter()
            .map(|(k, v)| (node_text(k), Rc::clone(v)))
            .collect(),
        NodeKind::ConstMap { keys, values } => match &**keys {
            PyObject::Tuple(ks) => ks
                .iter()
                .zip(values.iter())
                .map(|(k, v)| {
                    let name: Rc<str> = k
                        .as_string()
                        .map(|s| Rc::from(&*s.as_str()))
                        .unwrap_or_else(|| Rc::from("?"));
                    (name, Rc::clone(v))
                })
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn names_equal(a: &NodeRef, b: &NodeRef) -> bool {
    match (&a.kind, &b.kind) {
        (NodeKind::Name(x), NodeKind::Name(y)) => x == y,
        (NodeKind::Annotated { name, .. }, NodeKind::Name(_)) => names_equal(name, b),
        _ => false,
    }
}

/// Folds `cond <op> value`, recognizing chained comparisons through the
/// pointer identity left behind by DUP_TOP.
fn make_logical(cond: NodeRef, value: NodeRef, is_or: bool) -> NodeRef {
    if !is_or {
        if let (
            NodeKind::Compare { op: op1, left: l1, right: r1 },
            NodeKind::Compare { op: op2, left: l2, right: r2 },
        ) = (&cond.kind, &value.kind)
        {
            if Rc::ptr_eq(r1, l2) {
                return Node::new(NodeKind::CompareChain {
                    operands: vec![Rc::clone(l1), Rc::clone(r1), Rc::clone(r2)],
                    ops: vec![*op1, *op2],
                });
            }
        }
        if let (
            NodeKind::CompareChain { operands, ops },
            NodeKind::Compare { op: op2, left: l2, right: r2 },
        ) = (&cond.kind, &value.kind)
        {
            if operands.last().is_some_and(|last| Rc::ptr_eq(last, l2)) {
                let mut operands = operands.clone();
                let mut ops = ops.clone();
                operands.push(Rc::clone(r2));
                ops.push(*op2);
                return Node::new(NodeKind::CompareChain { operands, ops });
            }
        }
    }
    Node::new(NodeKind::Binary {
        op: if is_or { BinOp::LogOr } else { BinOp::LogAnd },
        left: cond,
        right: value,
    })
}

/// Pre-scan for loop headers: every backward jump marks its target as a
/// loop start; the loop body ends just past the farthest back edge.
fn scan_loops(instructions: &[Instruction], ver: PyVersion) -> Vec<LoopSpan> {
    let mut spans: HashMap<u32, u32> = HashMap::new();
    for ins in instructions {
        if let Some(target) = ins.jump_target(ver) {
            if target <= ins.offset {
                let end = ins.next_offset(ver);
                let e = spans.entry(target).or_insert(end);
                if end > *e {
                    *e = end;
                }
            }
        }
    }
    let mut out: Vec<LoopSpan> = spans
        .into_iter()
        .map(|(start, end)| LoopSpan { start, end })
        .collect();
    out.sort_by_key(|l| l.start);
    out
}

/// 3.11+: the outermost try regions derived from the exception table,
/// keyed by region start; value is `(region_end, handler_target)`.
fn primary_try_regions(table: &[u8]) -> HashMap<u32, (u32, u32)> {
    let entries = decode_exception_table(table);
    let mut out: HashMap<u32, (u32, u32)> = HashMap::new();
    for e in &entries {
        if e.depth == 0 && !e.lasti && e.target >= e.end() {
            out.entry(e.start).or_insert((e.end(), e.target));
        }
    }
    out
}
