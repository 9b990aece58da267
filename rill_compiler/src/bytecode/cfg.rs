//! Control-flow-graph construction and linearization.
//!
//! The AST translator appends instructions to a *current* basic block and
//! attaches successor edges for control flow; blocks live in an arena and
//! refer to each other through [`BlockId`] handles. [`CfgBuilder::finish`]
//! then linearizes the graph: a depth-first walk orders the reachable
//! blocks, assigns code addresses, threads jumps through empty blocks,
//! abstractly interprets the operand-stack depth of every block, patches
//! the fixed-width branch operands, and emits the byte stream together
//! with the delta-encoded PC→line table.

use super::codec::{append_arg, arg_len, BRANCH_ARG_WIDTH};
use super::opcode::Opcode;
use tracing::trace;

/// Handle of a basic block in the builder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockId(u32);

/// One instruction. `line` is 0 when the instruction carries no new
/// source position (the previous non-zero line applies).
#[derive(Debug, Clone, Copy)]
struct Insn {
    op: Opcode,
    arg: u32,
    line: u32,
}

impl Insn {
    /// Net change in operand-stack depth caused by executing this
    /// instruction. For `ITERJMP` the in-block effect is 0; the extra
    /// element pushed on the fall-through edge is accounted for by the
    /// linearizer.
    fn net_stack_effect(&self) -> i32 {
        if let Some((pops, pushes)) = self.op.stack_effect() {
            return i32::from(pushes) - i32::from(pops);
        }
        let arg = self.arg;
        match self.op {
            Opcode::Load => -1,
            Opcode::Call | Opcode::CallVar | Opcode::CallKw | Opcode::CallVarKw => {
                let mut effect = -((2 * (arg & 0xff) + (arg >> 8)) as i32);
                if self.op != Opcode::Call {
                    effect -= 1;
                }
                if self.op == Opcode::CallVarKw {
                    effect -= 1;
                }
                effect
            }
            Opcode::IterJmp => 0,
            Opcode::MakeList | Opcode::MakeTuple => 1 - arg as i32,
            Opcode::Unpack => arg as i32 - 1,
            op => unreachable!("no stack effect for {op}"),
        }
    }
}

/// A basic block under construction.
///
/// The last instruction of a block never falls through to the block
/// itself; self-loops go through a distinct successor. Empty blocks are
/// legal during construction and are eliminated by jump threading at
/// linearization time.
struct Block {
    insns: Vec<Insn>,
    /// Sole successor, or the not-taken edge when `cjmp` is set.
    jmp: Option<BlockId>,
    /// Taken edge of a trailing `CJMP` or `ITERJMP`.
    cjmp: Option<BlockId>,
    /// Handler entered by the `EXCEPTPUSH` in this block.
    except: Option<BlockId>,
    /// Operand-stack depth on entry; -1 until computed.
    initial_stack: i32,
    /// DFS placement order; -1 until visited.
    index: i32,
    /// Code address assigned during the same walk.
    addr: u32,
}

/// The immutable result of linearization.
pub(crate) struct Linearized {
    pub code: Vec<u8>,
    pub pcline: Vec<u16>,
    pub max_stack: u32,
}

/// Builder for one function's control-flow graph.
pub(crate) struct CfgBuilder {
    blocks: Vec<Block>,
    entry: BlockId,
    /// The block instructions are appended to; `None` after an
    /// unconditional branch until the translator selects the next block.
    cur: Option<BlockId>,
    /// Pending source line, consumed by the next emitted instruction.
    line: u32,
}

/// Transient state of the linearization walk.
struct Walk {
    pc: u32,
    order: Vec<BlockId>,
    max_stack: i32,
}

impl CfgBuilder {
    pub fn new() -> Self {
        let entry = Block::new();
        Self {
            blocks: vec![entry],
            entry: BlockId(0),
            cur: Some(BlockId(0)),
            line: 0,
        }
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new());
        id
    }

    /// Select the block subsequent instructions are appended to.
    pub fn set_current(&mut self, b: BlockId) {
        self.cur = Some(b);
    }

    pub fn has_current(&self) -> bool {
        self.cur.is_some()
    }

    /// Record the source line for the next emitted instruction. Call
    /// prior to any operation that can fail dynamically.
    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    fn cur_block(&mut self) -> &mut Block {
        let id = self.cur.expect("no current block");
        &mut self.blocks[id.0 as usize]
    }

    /// Append an argumentless instruction to the current block.
    pub fn emit(&mut self, op: Opcode) {
        assert!(!op.has_arg(), "missing arg: {op}");
        let line = std::mem::take(&mut self.line);
        self.cur_block().insns.push(Insn { op, arg: 0, line });
    }

    /// Append an instruction with an immediate operand to the current block.
    pub fn emit1(&mut self, op: Opcode, arg: u32) {
        assert!(op.has_arg(), "unwanted arg: {op}");
        let line = std::mem::take(&mut self.line);
        self.cur_block().insns.push(Insn { op, arg, line });
    }

    /// Attach an unconditional edge to `b` and unset the current block.
    pub fn jump(&mut self, b: BlockId) {
        assert!(self.cur != Some(b), "self-jump");
        self.cur_block().jmp = Some(b);
        self.cur = None;
    }

    /// Emit a conditional jump (`CJMP` or `ITERJMP`) with the taken edge
    /// to `t` and the fall-through edge to `f`; the branch operand is
    /// patched during linearization. On return the current block is unset.
    pub fn cond_jump(&mut self, op: Opcode, t: BlockId, f: BlockId) {
        assert!(
            op == Opcode::Cjmp || op == Opcode::IterJmp,
            "not a conditional jump: {op}"
        );
        self.emit1(op, 0); // address filled in later
        self.cur_block().cjmp = Some(t);
        self.jump(f);
    }

    /// Whether the current block already protects a region with a handler.
    pub fn current_has_except(&self) -> bool {
        let id = self.cur.expect("no current block");
        self.blocks[id.0 as usize].except.is_some()
    }

    /// Attach the exception-handler edge of the current block.
    pub fn set_except(&mut self, handler: BlockId) {
        self.cur_block().except = Some(handler);
    }

    /// Linearize the graph and emit the byte stream. `name` is used in
    /// internal-error diagnostics only.
    pub fn finish(mut self, name: &str) -> Linearized {
        let mut walk = Walk {
            pc: 0,
            order: Vec::with_capacity(self.blocks.len()),
            max_stack: 0,
        };
        let entry = self.entry;
        self.set_initial_stack(name, entry, 0);
        self.visit(name, entry, &mut walk);

        let linearized = self.generate(name, &walk);
        trace!(
            function = name,
            blocks = walk.order.len(),
            bytes = linearized.code.len(),
            max_stack = linearized.max_stack,
            "linearized function"
        );
        linearized
    }

    fn set_initial_stack(&mut self, name: &str, b: BlockId, depth: i32) {
        let block = &mut self.blocks[b.0 as usize];
        if block.initial_stack == -1 {
            block.initial_stack = depth;
        } else if block.initial_stack != depth {
            panic!(
                "internal error: {name}: stack depth mismatch at block {}: {} vs {}",
                block.index, block.initial_stack, depth
            );
        }
    }

    /// Redirect an edge through empty blocks to the first real successor.
    /// Empty cycles are impossible: the translator never creates them.
    fn thread(&self, mut b: BlockId) -> BlockId {
        while self.blocks[b.0 as usize].insns.is_empty() {
            b = self.blocks[b.0 as usize]
                .jmp
                .expect("empty block with no successor");
        }
        b
    }

    /// Compute order, address, and initial stack depth of each reachable
    /// block, patching branch operands as targets are placed.
    fn visit(&mut self, name: &str, id: BlockId, walk: &mut Walk) {
        let idx = id.0 as usize;
        if self.blocks[idx].index >= 0 {
            return; // already visited
        }
        self.blocks[idx].index = walk.order.len() as i32;
        self.blocks[idx].addr = walk.pc;
        walk.order.push(id);

        let mut stack = self.blocks[idx].initial_stack;
        let mut cjmp_at = None;
        let mut except_at = None;
        let mut isiterjmp = 0i32;
        for k in 0..self.blocks[idx].insns.len() {
            let insn = self.blocks[idx].insns[k];
            walk.pc += 1;

            // Size of the operand: fixed and patchable for branches,
            // natural varint width otherwise.
            if insn.op.has_arg() {
                match insn.op {
                    Opcode::IterJmp => {
                        isiterjmp = 1;
                        cjmp_at = Some(k);
                        walk.pc += BRANCH_ARG_WIDTH as u32;
                    }
                    Opcode::Cjmp => {
                        cjmp_at = Some(k);
                        walk.pc += BRANCH_ARG_WIDTH as u32;
                    }
                    Opcode::ExceptPush => {
                        except_at = Some(k);
                        walk.pc += BRANCH_ARG_WIDTH as u32;
                    }
                    _ => walk.pc += arg_len(insn.arg),
                }
            }

            stack += insn.net_stack_effect();
            if stack < 0 {
                panic!("internal error: {name}: stack underflow after pc {}", walk.pc);
            }
            if stack + isiterjmp > walk.max_stack {
                walk.max_stack = stack + isiterjmp;
            }
        }

        // Place the fall-through successor next. The fall-through edge of
        // an ITERJMP observes the pushed element; the taken edge does not.
        if let Some(j) = self.blocks[idx].jmp {
            let j = self.thread(j);
            self.blocks[idx].jmp = Some(j);
            self.set_initial_stack(name, j, stack + isiterjmp);
            if self.blocks[j.0 as usize].index < 0 {
                self.visit(name, j, walk);
            } else {
                // Successor already placed; an explicit backward jump
                // will be emitted after the last instruction.
                walk.pc += 1 + BRANCH_ARG_WIDTH as u32;
            }
        }

        // Then the taken edge of the conditional branch.
        if let Some(c) = self.blocks[idx].cjmp {
            let c = self.thread(c);
            self.blocks[idx].cjmp = Some(c);
            self.set_initial_stack(name, c, stack);
            self.visit(name, c, walk);
            if let Some(k) = cjmp_at {
                self.blocks[idx].insns[k].arg = self.blocks[c.0 as usize].addr;
            }
        }

        // Then the exception handler.
        if let Some(e) = self.blocks[idx].except {
            let e = self.thread(e);
            self.blocks[idx].except = Some(e);
            self.set_initial_stack(name, e, stack);
            self.visit(name, e, walk);
            if let Some(k) = except_at {
                self.blocks[idx].insns[k].arg = self.blocks[e.0 as usize].addr;
            }
        }
    }

    /// Emit the linear byte stream from the placed blocks and build the
    /// PC→line table. See [`Funcode::position`](super::program::Funcode::position)
    /// for the table encoding.
    fn generate(&self, name: &str, walk: &Walk) -> Linearized {
        let code_len = walk.pc;
        let mut code: Vec<u8> = Vec::with_capacity(code_len as usize);
        let mut pcline: Vec<u16> = Vec::new();
        let mut prev_pc = 0u32;
        let mut prev_line = 0i32;

        for &id in &walk.order {
            let b = &self.blocks[id.0 as usize];
            let mut pc = b.addr;
            for insn in &b.insns {
                if insn.line != 0 {
                    // The instruction has a source position; delta-encode
                    // it, spilling extra records while either delta
                    // saturates.
                    loop {
                        let mut incomplete = 0u16;

                        let mut delta_pc = pc - prev_pc;
                        if delta_pc > 0xff {
                            delta_pc = 0xff;
                            incomplete = 1;
                        }
                        prev_pc += delta_pc;

                        let mut delta_line = insn.line as i32 - prev_line;
                        if delta_line > 0x3f {
                            delta_line = 0x3f;
                            incomplete = 1;
                        } else if delta_line < -0x40 {
                            delta_line = -0x40;
                            incomplete = 1;
                        }
                        prev_line += delta_line;

                        let entry =
                            (delta_pc as u16) << 8 | u16::from((delta_line << 1) as u8) | incomplete;
                        pcline.push(entry);
                        if incomplete == 0 {
                            break;
                        }
                    }
                }

                code.push(insn.op as u8);
                pc += 1;
                if insn.op.has_arg() {
                    let min = match insn.op {
                        Opcode::Cjmp | Opcode::ExceptPush | Opcode::IterJmp => BRANCH_ARG_WIDTH,
                        _ => 0,
                    };
                    append_arg(&mut code, insn.arg, min);
                    pc = code.len() as u32;
                }
            }

            // An explicit jump is needed only when the fall-through
            // successor was not placed immediately after this block.
            if let Some(j) = b.jmp {
                let target = &self.blocks[j.0 as usize];
                if target.index != b.index + 1 {
                    code.push(Opcode::Jmp as u8);
                    append_arg(&mut code, target.addr, BRANCH_ARG_WIDTH);
                }
            }
        }

        if code.len() != code_len as usize {
            panic!(
                "internal error: {name}: wrong code length {}; expected {}",
                code.len(),
                code_len
            );
        }

        Linearized {
            code,
            pcline,
            max_stack: walk.max_stack as u32,
        }
    }
}

impl Block {
    fn new() -> Self {
        Self {
            insns: Vec::new(),
            jmp: None,
            cjmp: None,
            except: None,
            initial_stack: -1,
            index: -1,
            addr: 0,
        }
    }
}
