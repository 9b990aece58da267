//! AST to stack-machine bytecode compiler.
//!
//! The compiler walks a resolved AST and appends instructions to a
//! control-flow graph of basic blocks (see `bytecode::cfg`), which is
//! then linearized into the final byte stream. There are two layers of
//! state:
//!
//! - `ProgramBuilder` owns the program under construction and interns
//!   names, constants, and nested functions into its pools;
//! - `FuncCompiler` holds the per-function state: the CFG under
//!   construction and the scoped loop and exception-handler stacks.
//!
//! Compilation cannot fail with a user error: the resolver has already
//! rejected ill-formed programs, so any inconsistency found here is a
//! compiler bug and panics with a diagnostic.

use crate::ast::{
    Arg, BinOp, CompBody, CompClause, Comprehension, Expr, ExprKind, Function, Ident, Param,
    Scope, Stmt, StmtKind, UnOp,
};
use crate::bytecode::cfg::{BlockId, CfgBuilder};
use crate::bytecode::opcode::Opcode;
use crate::bytecode::program::{Binding, Funcode, Program};

use rill_core::{Constant, Pos};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::trace;

/// Stack-allocated loop context stack for typical nesting depths.
type LoopStack = SmallVec<[LoopContext; 4]>;

/// Parallel stack of active `try` statements; each entry records the
/// loop-stack depth at the time the handler was opened, so break and
/// continue know how many handlers to unwind.
type HandlerStack = SmallVec<[usize; 4]>;

/// Break/continue targets of one active loop.
#[derive(Debug, Clone, Copy)]
struct LoopContext {
    break_: BlockId,
    continue_: BlockId,
}

/// Compile the statements of a module into a program.
///
/// `locals` and `globals` are the frames computed by the resolver for the
/// toplevel function and the module.
#[must_use]
pub fn compile_file(
    filename: &str,
    stmts: &[Stmt],
    locals: &[Ident],
    globals: &[Ident],
) -> Program {
    let mut pcomp = ProgramBuilder::new(filename, globals);

    let pos = stmts.first().map_or_else(Pos::dummy, |s| s.pos);
    let toplevel = pcomp.function("<toplevel>", pos, stmts, locals, &[]);

    pcomp.into_program(toplevel)
}

/// Compile a single expression, wrapped as a return statement, and return
/// the resulting toplevel function.
#[must_use]
pub fn compile_expr(filename: &str, expr: &Expr, locals: &[Ident]) -> Funcode {
    let stmts = [Stmt::new(StmtKind::Return(Some(expr.clone())), expr.pos)];
    compile_file(filename, &stmts, locals, &[]).toplevel
}

/// Convert resolver identifiers to their compiled form.
fn bindings(ids: &[Ident]) -> Vec<Binding> {
    ids.iter()
        .map(|id| Binding {
            name: id.name.clone(),
            pos: id.pos,
        })
        .collect()
}

/// Deduplication key for the constant pool. Floats are keyed by their
/// bit pattern for exact identity.
#[derive(Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Str(Arc<str>),
    Int(i64),
    Float(u64),
    BigInt(Arc<str>),
}

impl ConstKey {
    fn of(c: &Constant) -> Self {
        match c {
            Constant::Str(s) => ConstKey::Str(s.clone()),
            Constant::Int(i) => ConstKey::Int(*i),
            Constant::Float(f) => ConstKey::Float(f.to_bits()),
            Constant::BigInt(s) => ConstKey::BigInt(s.clone()),
        }
    }
}

/// Holds the compiler state for a program: the pools under construction
/// and the interning maps that deduplicate into them. Pools are
/// append-only; indices are stable once returned.
struct ProgramBuilder {
    filename: Arc<str>,
    loads: Vec<Binding>,
    names: Vec<Arc<str>>,
    constants: Vec<Constant>,
    functions: Vec<Funcode>,
    globals: Vec<Binding>,

    name_map: FxHashMap<Arc<str>, u32>,
    constant_map: FxHashMap<ConstKey, u32>,
}

impl ProgramBuilder {
    fn new(filename: &str, globals: &[Ident]) -> Self {
        Self {
            filename: filename.into(),
            loads: Vec::new(),
            names: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            globals: bindings(globals),
            name_map: FxHashMap::default(),
            constant_map: FxHashMap::default(),
        }
    }

    fn into_program(self, toplevel: Funcode) -> Program {
        Program {
            loads: self.loads,
            names: self.names,
            constants: self.constants,
            functions: self.functions,
            globals: self.globals,
            toplevel,
        }
    }

    /// Index of `name` within the name pool, adding it if necessary.
    fn name_index(&mut self, name: &Arc<str>) -> u32 {
        if let Some(&index) = self.name_map.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.name_map.insert(name.clone(), index);
        self.names.push(name.clone());
        index
    }

    /// Index of `c` within the constant pool, adding it if necessary.
    fn constant_index(&mut self, c: &Constant) -> u32 {
        let key = ConstKey::of(c);
        if let Some(&index) = self.constant_map.get(&key) {
            return index;
        }
        let index = self.constants.len() as u32;
        self.constant_map.insert(key, index);
        self.constants.push(c.clone());
        index
    }

    /// Append a nested function to the function pool. Each nested
    /// function is compiled exactly once, so this never deduplicates.
    fn function_index(&mut self, fc: Funcode) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(fc);
        index
    }

    /// Compile one function body to a `Funcode`.
    fn function(
        &mut self,
        name: &str,
        pos: Pos,
        stmts: &[Stmt],
        locals: &[Ident],
        freevars: &[Ident],
    ) -> Funcode {
        trace!(function = name, line = pos.line, "compiling function");

        let mut fcomp = FuncCompiler {
            pcomp: self,
            cfg: CfgBuilder::new(),
            loops: LoopStack::new(),
            exhandlers: HandlerStack::new(),
        };

        fcomp.stmts(stmts);
        if fcomp.cfg.has_current() {
            fcomp.cfg.emit(Opcode::None);
            fcomp.cfg.emit(Opcode::Return);
        }
        let out = fcomp.cfg.finish(name);

        Funcode {
            filename: self.filename.clone(),
            pos,
            name: name.into(),
            code: out.code,
            pcline: out.pcline,
            locals: bindings(locals),
            freevars: bindings(freevars),
            max_stack: out.max_stack,
            num_params: 0,
            has_varargs: false,
            has_kwargs: false,
        }
    }
}

/// One summand of a flattened `+` chain. `plus_pos` is the position of
/// the `+` preceding it (dummy for the first summand).
#[derive(Clone)]
struct Summand<'a> {
    x: Cow<'a, Expr>,
    plus_pos: Pos,
}

/// What kind of literal a summand is, for compile-time folding.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Addable {
    Str,
    List,
    Tuple,
}

/// Holds the compiler state for one function.
struct FuncCompiler<'a> {
    pcomp: &'a mut ProgramBuilder,
    cfg: CfgBuilder,
    loops: LoopStack,
    exhandlers: HandlerStack,
}

impl FuncCompiler<'_> {
    /// Record the source position of the next emitted instruction. Called
    /// prior to any operation that can fail dynamically.
    fn set_pos(&mut self, pos: Pos) {
        self.cfg.set_line(pos.line);
    }

    /// Emit code to push the specified string constant.
    fn string(&mut self, s: Arc<str>) {
        let index = self.pcomp.constant_index(&Constant::Str(s));
        self.cfg.emit1(Opcode::Constant, index);
    }

    /// Emit code to store the top-of-stack value to `id`.
    fn set(&mut self, id: &Ident) {
        match id.scope {
            Scope::Local => self.cfg.emit1(Opcode::SetLocal, id.index),
            Scope::Global => self.cfg.emit1(Opcode::SetGlobal, id.index),
            scope => panic!(
                "{}: set({}): neither global nor local ({scope:?})",
                id.pos, id.name
            ),
        }
    }

    /// Emit code to push the value of `id`. The lookup of locals,
    /// globals, and predeclared names can fail at runtime, so those
    /// record the source position.
    fn lookup(&mut self, id: &Ident) {
        match id.scope {
            Scope::Local => {
                self.set_pos(id.pos);
                self.cfg.emit1(Opcode::Local, id.index);
            }
            Scope::Free => self.cfg.emit1(Opcode::Free, id.index),
            Scope::Global => {
                self.set_pos(id.pos);
                self.cfg.emit1(Opcode::Global, id.index);
            }
            Scope::Predeclared => {
                self.set_pos(id.pos);
                let index = self.pcomp.name_index(&id.name);
                self.cfg.emit1(Opcode::Predeclared, index);
            }
            Scope::Universal => {
                let index = self.pcomp.name_index(&id.name);
                self.cfg.emit1(Opcode::Universal, index);
            }
        }
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                if matches!(e.kind, ExprKind::Literal(_)) {
                    // Don't compile doc comments only to pop them.
                    return;
                }
                self.expr(e);
                self.cfg.emit(Opcode::Pop);
            }

            StmtKind::Pass => {}

            // Resolver invariant: break/continue appear only within loops.
            StmtKind::Break => {
                let inner = self.loops.len();
                let target = self.loops[inner - 1].break_;
                self.unwind_handlers(inner);
                self.cfg.jump(target);
                self.start_dead_block();
            }
            StmtKind::Continue => {
                let inner = self.loops.len();
                let target = self.loops[inner - 1].continue_;
                self.unwind_handlers(inner);
                self.cfg.jump(target);
                self.start_dead_block();
            }

            // Keep consistent with ExprKind::Cond.
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let t = self.cfg.new_block();
                let f = self.cfg.new_block();
                let done = self.cfg.new_block();

                self.ifelse(cond, t, f);

                self.cfg.set_current(t);
                self.stmts(then_body);
                self.cfg.jump(done);

                self.cfg.set_current(f);
                self.stmts(else_body);
                self.cfg.jump(done);

                self.cfg.set_current(done);
            }

            StmtKind::Assign { lhs, rhs } => {
                self.expr(rhs);
                self.assign(stmt.pos, lhs);
            }

            StmtKind::AugAssign { op, lhs, rhs } => self.aug_assign(stmt.pos, *op, lhs, rhs),

            StmtKind::Def { name, function } => {
                self.function(&name.name, function);
                self.set(name);
            }

            // Keep consistent with CompClause::For.
            StmtKind::For { vars, iter, body } => {
                let head = self.cfg.new_block();
                let body_blk = self.cfg.new_block();
                let tail = self.cfg.new_block();

                self.expr(iter);
                self.set_pos(stmt.pos);
                self.cfg.emit(Opcode::IterPush);
                self.cfg.jump(head);

                self.cfg.set_current(head);
                self.cfg.cond_jump(Opcode::IterJmp, tail, body_blk);

                self.cfg.set_current(body_blk);
                self.assign(stmt.pos, vars);
                self.loops.push(LoopContext {
                    break_: tail,
                    continue_: head,
                });
                self.stmts(body);
                self.loops.pop();
                self.cfg.jump(head);

                self.cfg.set_current(tail);
                self.cfg.emit(Opcode::IterPop);
            }

            StmtKind::Try {
                body,
                exc_type,
                exc_name,
                fallback,
            } => self.try_stmt(body, exc_type.as_ref(), exc_name.as_ref(), fallback),

            StmtKind::Return(result) => {
                if let Some(e) = result {
                    self.expr(e);
                } else {
                    self.cfg.emit(Opcode::None);
                }
                self.cfg.emit(Opcode::Return);
                self.start_dead_block();
            }

            StmtKind::Load {
                module,
                module_pos,
                from,
                to,
            } => {
                for name in from {
                    self.string(name.clone());
                }
                self.pcomp.loads.push(Binding {
                    name: module.clone(),
                    pos: *module_pos,
                });
                self.string(module.clone());
                self.set_pos(stmt.pos);
                self.cfg.emit1(Opcode::Load, from.len() as u32);
                // The runtime leaves the loaded values with the first
                // binding on top, so the stores run in reverse.
                for id in to.iter().rev() {
                    self.cfg.emit1(Opcode::SetGlobal, id.index);
                }
            }
        }
    }

    /// Emit an `EXCEPTPOP` for every handler opened inside the loop being
    /// exited, so the runtime handler stack stays balanced.
    fn unwind_handlers(&mut self, inner_loop: usize) {
        for k in 0..self.exhandlers.len() {
            if self.exhandlers[k] >= inner_loop {
                self.cfg.emit(Opcode::ExceptPop);
            }
        }
    }

    /// Statements following an unconditional branch are unreachable;
    /// give them a fresh block that linearization will never place.
    fn start_dead_block(&mut self) {
        let dead = self.cfg.new_block();
        self.cfg.set_current(dead);
    }

    fn try_stmt(
        &mut self,
        body: &[Stmt],
        exc_type: Option<&Ident>,
        exc_name: Option<&Ident>,
        fallback: &[Stmt],
    ) {
        let fallback_blk = self.cfg.new_block();
        let done = self.cfg.new_block();

        // Each protected region needs its own except edge.
        if self.cfg.has_current() && self.cfg.current_has_except() {
            let body_blk = self.cfg.new_block();
            self.cfg.jump(body_blk);
            self.cfg.set_current(body_blk);
        }

        self.exhandlers.push(self.loops.len());
        self.cfg.set_except(fallback_blk);
        self.cfg.emit1(Opcode::ExceptPush, 0); // handler address filled in later
        self.stmts(body);
        self.cfg.emit(Opcode::ExceptPop);
        self.cfg.jump(done);

        if let (Some(ty), Some(name)) = (exc_type, exc_name) {
            // A typed clause: the runtime pops the handler while
            // unwinding, binds the caught value, and scrubs the binding
            // after the clause runs.
            self.cfg.set_current(fallback_blk);
            self.lookup(ty);
            self.cfg.emit(Opcode::Error);
            self.exhandlers.pop();
            self.set(name);
            self.stmts(fallback);
            self.cfg.emit(Opcode::None);
            self.set(name);
            self.cfg.jump(done);
        } else {
            self.cfg.set_current(fallback_blk);
            self.cfg.emit(Opcode::ExceptPop);
            self.exhandlers.pop();
            self.stmts(fallback);
            self.cfg.jump(done);
        }

        self.cfg.set_current(done);
    }

    /// Augmented assignment. The address of the target is evaluated
    /// exactly once to preserve side-effect semantics: the address
    /// components stay on the stack (via `DUP`/`DUP2`) for the store.
    fn aug_assign(&mut self, op_pos: Pos, op: BinOp, lhs: &Expr, rhs: &Expr) {
        match &lhs.kind {
            ExprKind::Ident(id) => {
                self.lookup(id);
                self.expr(rhs);
                self.aug_op(op_pos, op);
                self.set(id);
            }
            ExprKind::Index { x, y } => {
                self.expr(x);
                self.expr(y);
                self.cfg.emit(Opcode::Dup2);
                self.set_pos(lhs.pos);
                self.cfg.emit(Opcode::Index);
                self.expr(rhs);
                self.aug_op(op_pos, op);
                self.set_pos(lhs.pos);
                self.cfg.emit(Opcode::SetIndex);
            }
            ExprKind::Dot { x, name } => {
                self.expr(x);
                self.cfg.emit(Opcode::Dup);
                let index = self.pcomp.name_index(name);
                self.set_pos(lhs.pos);
                self.cfg.emit1(Opcode::Attr, index);
                self.expr(rhs);
                self.aug_op(op_pos, op);
                self.set_pos(lhs.pos);
                self.cfg.emit1(Opcode::SetField, index);
            }
            kind => panic!("augmented assignment to unexpected expression: {kind:?}"),
        }
    }

    fn aug_op(&mut self, pos: Pos, op: BinOp) {
        if op == BinOp::Plus {
            // Let the runtime optimize list += iterable.
            self.set_pos(pos);
            self.cfg.emit(Opcode::InplaceAdd);
        } else {
            self.binop(pos, op);
        }
    }

    /// Implement `lhs = rhs` for arbitrary target expressions; the value
    /// is on top of the stack, consumed.
    fn assign(&mut self, pos: Pos, lhs: &Expr) {
        match &lhs.kind {
            ExprKind::Ident(id) => self.set(id),
            ExprKind::Tuple(elems) | ExprKind::List(elems) => self.assign_sequence(pos, elems),
            ExprKind::Index { x, y } => {
                self.expr(x);
                self.cfg.emit(Opcode::Exch);
                self.expr(y);
                self.cfg.emit(Opcode::Exch);
                self.set_pos(lhs.pos);
                self.cfg.emit(Opcode::SetIndex);
            }
            ExprKind::Dot { x, name } => {
                self.expr(x);
                self.cfg.emit(Opcode::Exch);
                let index = self.pcomp.name_index(name);
                self.set_pos(lhs.pos);
                self.cfg.emit1(Opcode::SetField, index);
            }
            kind => panic!("assignment to unexpected expression: {kind:?}"),
        }
    }

    fn assign_sequence(&mut self, pos: Pos, lhs: &[Expr]) {
        self.set_pos(pos);
        self.cfg.emit1(Opcode::Unpack, lhs.len() as u32);
        for elem in lhs {
            self.assign(pos, elem);
        }
    }

    fn expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Ident(id) => self.lookup(id),

            ExprKind::Literal(c) => {
                let index = self.pcomp.constant_index(c);
                self.cfg.emit1(Opcode::Constant, index);
            }

            ExprKind::List(elems) => {
                for x in elems {
                    self.expr(x);
                }
                self.cfg.emit1(Opcode::MakeList, elems.len() as u32);
            }

            ExprKind::Tuple(elems) => self.tuple(elems),

            // Keep consistent with StmtKind::If.
            ExprKind::Cond { cond, t, f } => {
                let t_blk = self.cfg.new_block();
                let f_blk = self.cfg.new_block();
                let done = self.cfg.new_block();

                self.ifelse(cond, t_blk, f_blk);

                self.cfg.set_current(t_blk);
                self.expr(t);
                self.cfg.jump(done);

                self.cfg.set_current(f_blk);
                self.expr(f);
                self.cfg.jump(done);

                self.cfg.set_current(done);
            }

            ExprKind::Index { x, y } => {
                self.expr(x);
                self.expr(y);
                self.set_pos(e.pos);
                self.cfg.emit(Opcode::Index);
            }

            ExprKind::Slice { x, lo, hi, step } => {
                self.set_pos(e.pos);
                self.expr(x);
                for part in [lo, hi, step] {
                    match part {
                        Some(part) => self.expr(part),
                        None => self.cfg.emit(Opcode::None),
                    }
                }
                self.cfg.emit(Opcode::Slice);
            }

            ExprKind::Comprehension(comp) => {
                if comp.curly {
                    if matches!(comp.body, CompBody::Entry(_)) {
                        self.cfg.emit(Opcode::MakeDict);
                    } else {
                        self.cfg.emit(Opcode::MakeSet);
                    }
                } else {
                    self.cfg.emit1(Opcode::MakeList, 0);
                }
                self.comprehension(comp, 0);
            }

            ExprKind::Dict(entries) => {
                self.cfg.emit(Opcode::MakeDict);
                for entry in entries {
                    self.cfg.emit(Opcode::Dup);
                    self.expr(&entry.key);
                    self.expr(&entry.value);
                    self.set_pos(entry.colon);
                    self.cfg.emit(Opcode::SetDictUniq);
                }
            }

            ExprKind::Unary { op, x } => {
                self.expr(x);
                self.set_pos(e.pos);
                match op {
                    UnOp::Minus => self.cfg.emit(Opcode::UMinus),
                    UnOp::Plus => self.cfg.emit(Opcode::UPlus),
                    UnOp::Not => self.cfg.emit(Opcode::Not),
                    UnOp::Tilde => self.cfg.emit(Opcode::Tilde),
                }
            }

            ExprKind::Binary { op, x, y } => match op {
                // x or y  =>  if x then x else y
                BinOp::Or => {
                    let done = self.cfg.new_block();
                    let y_blk = self.cfg.new_block();

                    self.expr(x);
                    self.cfg.emit(Opcode::Dup);
                    self.cfg.cond_jump(Opcode::Cjmp, done, y_blk);

                    self.cfg.set_current(y_blk);
                    self.cfg.emit(Opcode::Pop); // discard x
                    self.expr(y);
                    self.cfg.jump(done);

                    self.cfg.set_current(done);
                }

                // x and y  =>  if x then y else x
                BinOp::And => {
                    let done = self.cfg.new_block();
                    let y_blk = self.cfg.new_block();

                    self.expr(x);
                    self.cfg.emit(Opcode::Dup);
                    self.cfg.cond_jump(Opcode::Cjmp, y_blk, done);

                    self.cfg.set_current(y_blk);
                    self.cfg.emit(Opcode::Pop); // discard x
                    self.expr(y);
                    self.cfg.jump(done);

                    self.cfg.set_current(done);
                }

                BinOp::Plus => self.plus(e),

                // all other strict binary operators, including comparisons
                _ => {
                    self.expr(x);
                    self.expr(y);
                    self.binop(e.pos, *op);
                }
            },

            ExprKind::Dot { x, name } => {
                self.expr(x);
                let index = self.pcomp.name_index(name);
                self.set_pos(e.pos);
                self.cfg.emit1(Opcode::Attr, index);
            }

            ExprKind::Call { func, args } => self.call(e.pos, func, args),

            ExprKind::Lambda(f) => self.function("lambda", f),
        }
    }

    fn binop(&mut self, pos: Pos, op: BinOp) {
        self.set_pos(pos);
        match op {
            BinOp::Plus => self.cfg.emit(Opcode::Plus),
            BinOp::Minus => self.cfg.emit(Opcode::Minus),
            BinOp::Star => self.cfg.emit(Opcode::Star),
            BinOp::Slash => self.cfg.emit(Opcode::Slash),
            BinOp::SlashSlash => self.cfg.emit(Opcode::SlashSlash),
            BinOp::Percent => self.cfg.emit(Opcode::Percent),
            BinOp::Amp => self.cfg.emit(Opcode::Amp),
            BinOp::Pipe => self.cfg.emit(Opcode::Pipe),
            BinOp::Caret => self.cfg.emit(Opcode::Circumflex),
            BinOp::LtLt => self.cfg.emit(Opcode::LtLt),
            BinOp::GtGt => self.cfg.emit(Opcode::GtGt),
            BinOp::In => self.cfg.emit(Opcode::In),
            BinOp::NotIn => {
                self.cfg.emit(Opcode::In);
                self.cfg.emit(Opcode::Not);
            }

            // comparisons: translate by ordinal offset; the opcode table
            // pins the correspondence with const assertions
            BinOp::Lt | BinOp::Gt | BinOp::Ge | BinOp::Le | BinOp::Eq | BinOp::Ne => {
                let opcode = Opcode::from_u8(Opcode::Lt as u8 + op as u8)
                    .expect("comparison table out of sync");
                self.cfg.emit(opcode);
            }

            BinOp::And | BinOp::Or => {
                unreachable!("short-circuit operators are lowered to control flow")
            }
        }
    }

    /// Emit optimized code for `((a+b)+...)+z`: the left tree of plusses
    /// is flattened into a list of summands and maximal runs of adjacent
    /// literals of the same addable kind are folded at compile time.
    /// Non-foldable chains still emit one `PLUS` per operation so each
    /// gets a distinct source position for error reporting.
    fn plus(&mut self, e: &Expr) {
        // Gather the right operands of the left tree of plusses:
        // (((a+b)+c)+d) becomes [a, +b, +c, +d].
        let mut args: Vec<Summand<'_>> = Vec::with_capacity(2);
        let mut plus = e;
        loop {
            let ExprKind::Binary { op: BinOp::Plus, x, y } = &plus.kind else {
                unreachable!("plus called on a non-plus expression");
            };
            args.push(Summand {
                x: Cow::Borrowed(&**y),
                plus_pos: plus.pos,
            });
            match &x.kind {
                ExprKind::Binary { op: BinOp::Plus, .. } => plus = &**x,
                _ => {
                    args.push(Summand {
                        x: Cow::Borrowed(&**x),
                        plus_pos: Pos::dummy(),
                    });
                    break;
                }
            }
        }
        args.reverse();

        // Fold sums of adjacent literals of the same kind: ""+"", []+[], ()+().
        let mut out: Vec<Summand<'_>> = Vec::with_capacity(args.len());
        let mut i = 0;
        while i < args.len() {
            let mut j = i + 1;
            if let Some(kind) = addable(&args[i].x) {
                while j < args.len() && addable(&args[j].x) == Some(kind) {
                    j += 1;
                }
                if j > i + 1 {
                    out.push(Summand {
                        x: Cow::Owned(fold(kind, &args[i..j])),
                        plus_pos: args[i].plus_pos,
                    });
                    i = j;
                    continue;
                }
            }
            out.push(args[i].clone());
            i = j;
        }

        // Emit the n-ary sum.
        let (first, rest) = out.split_first().expect("empty summand list");
        self.expr(&first.x);
        for summand in rest {
            self.expr(&summand.x);
            self.set_pos(summand.plus_pos);
            self.cfg.emit(Opcode::Plus);
        }
    }

    fn call(&mut self, lparen: Pos, func: &Expr, args: &[Arg]) {
        self.expr(func);
        let (op, arg) = self.args(lparen, args);
        self.set_pos(lparen);
        self.cfg.emit1(op, arg);
    }

    /// Emit the arguments of a call: positional arguments in order, then
    /// alternating name/value pairs for named arguments, then the splats.
    /// Returns the call opcode (selected by splat mode) and its operand
    /// `(positional << 8) | named`.
    fn args(&mut self, lparen: Pos, args: &[Arg]) -> (Opcode, u32) {
        let mut p = 0u32;
        let mut n = 0u32;
        let mut callmode = 0u8;
        let mut varargs = None;
        let mut kwargs = None;
        for arg in args {
            match arg {
                Arg::Positional(_) => p += 1,
                Arg::Named(..) => n += 1,
                Arg::Star(x) => {
                    callmode |= 1;
                    varargs = Some(x);
                }
                Arg::StarStar(x) => {
                    callmode |= 2;
                    kwargs = Some(x);
                }
            }
        }

        for arg in args {
            if let Arg::Positional(x) = arg {
                self.expr(x);
            }
        }
        for arg in args {
            if let Arg::Named(name, x) = arg {
                self.string(name.clone());
                self.expr(x);
            }
        }
        if let Some(x) = varargs {
            self.expr(x);
        }
        if let Some(x) = kwargs {
            self.expr(x);
        }

        if p >= 256 || n >= 256 {
            panic!("{lparen}: compiler error: too many arguments in call");
        }

        let op = Opcode::from_u8(Opcode::Call as u8 + callmode).expect("call mode out of range");
        (op, p << 8 | n)
    }

    fn tuple(&mut self, elems: &[Expr]) {
        for elem in elems {
            self.expr(elem);
        }
        self.cfg.emit1(Opcode::MakeTuple, elems.len() as u32);
    }

    fn comprehension(&mut self, comp: &Comprehension, clause_index: usize) {
        if clause_index == comp.clauses.len() {
            self.cfg.emit(Opcode::Dup); // accumulator
            match &comp.body {
                CompBody::Entry(entry) => {
                    self.expr(&entry.key);
                    self.expr(&entry.value);
                    self.set_pos(entry.colon);
                    self.cfg.emit(Opcode::SetDict);
                }
                CompBody::Elem(e) => {
                    self.expr(e);
                    self.cfg.emit(Opcode::Append);
                }
            }
            return;
        }

        match &comp.clauses[clause_index] {
            CompClause::If(cond) => {
                let t = self.cfg.new_block();
                let done = self.cfg.new_block();
                self.ifelse(cond, t, done);

                self.cfg.set_current(t);
                self.comprehension(comp, clause_index + 1);
                self.cfg.jump(done);

                self.cfg.set_current(done);
            }

            // Keep consistent with StmtKind::For. Comprehensions do not
            // push a loop context: break/continue inside them is a
            // resolver error.
            CompClause::For { vars, iter, pos } => {
                let head = self.cfg.new_block();
                let body = self.cfg.new_block();
                let tail = self.cfg.new_block();

                self.expr(iter);
                self.set_pos(*pos);
                self.cfg.emit(Opcode::IterPush);
                self.cfg.jump(head);

                self.cfg.set_current(head);
                self.cfg.cond_jump(Opcode::IterJmp, tail, body);

                self.cfg.set_current(body);
                self.assign(*pos, vars);
                self.comprehension(comp, clause_index + 1);
                self.cfg.jump(head);

                self.cfg.set_current(tail);
                self.cfg.emit(Opcode::IterPop);
            }
        }
    }

    /// Compile a def or lambda: evaluate the parameter defaults and the
    /// current values of the free variables, materialize both as tuples,
    /// compile the body into its own `Funcode`, and emit `MAKEFUNC`.
    fn function(&mut self, name: &str, f: &Function) {
        // Evaluation of the elements of both tuples may fail.
        self.set_pos(f.pos);

        let mut ndefaults = 0u32;
        for param in &f.params {
            if let Param::Optional(_, dflt) = param {
                self.expr(dflt);
                ndefaults += 1;
            }
        }
        self.cfg.emit1(Opcode::MakeTuple, ndefaults);

        // Capture the free variables from the lexical environment.
        for freevar in &f.freevars {
            self.lookup(freevar);
        }
        self.cfg.emit1(Opcode::MakeTuple, f.freevars.len() as u32);

        let mut funcode = self
            .pcomp
            .function(name, f.pos, &f.body, &f.locals, &f.freevars);
        funcode.num_params = f.params.len() as u32;
        funcode.has_varargs = f.has_varargs;
        funcode.has_kwargs = f.has_kwargs;

        let index = self.pcomp.function_index(funcode);
        self.cfg.emit1(Opcode::MakeFunc, index);
    }

    /// Emit a Boolean control-flow decision: evaluate `cond` and branch
    /// to `t` or `f`. `not` swaps the targets, `and`/`or` lower into
    /// control flow, and `not in` rewrites to `in` with swapped targets,
    /// so no boolean value is materialized for compound conditions.
    /// On return the current block is unset.
    fn ifelse(&mut self, cond: &Expr, t: BlockId, f: BlockId) {
        match &cond.kind {
            ExprKind::Unary { op: UnOp::Not, x } => {
                // if not x then goto t else goto f
                //    =>
                // if x then goto f else goto t
                self.ifelse(x, f, t);
                return;
            }

            ExprKind::Binary { op: BinOp::And, x, y } => {
                // if x and y then goto t else goto f
                //    =>
                // if x then ifelse(y, t, f) else goto f
                self.expr(x);
                let y_blk = self.cfg.new_block();
                self.cfg.cond_jump(Opcode::Cjmp, y_blk, f);

                self.cfg.set_current(y_blk);
                self.ifelse(y, t, f);
                return;
            }

            ExprKind::Binary { op: BinOp::Or, x, y } => {
                // if x or y then goto t else goto f
                //    =>
                // if x then goto t else ifelse(y, t, f)
                self.expr(x);
                let y_blk = self.cfg.new_block();
                self.cfg.cond_jump(Opcode::Cjmp, t, y_blk);

                self.cfg.set_current(y_blk);
                self.ifelse(y, t, f);
                return;
            }

            ExprKind::Binary {
                op: BinOp::NotIn,
                x,
                y,
            } => {
                // if x not in y then goto t else goto f
                //    =>
                // if x in y then goto f else goto t
                self.expr(x);
                self.expr(y);
                self.binop(cond.pos, BinOp::In);
                self.cfg.cond_jump(Opcode::Cjmp, f, t);
                return;
            }

            _ => {}
        }

        // general case
        self.expr(cond);
        self.cfg.cond_jump(Opcode::Cjmp, t, f);
    }
}

/// Report whether `e` is a statically addable literal: a string, list,
/// or tuple.
fn addable(e: &Expr) -> Option<Addable> {
    match &e.kind {
        ExprKind::Literal(Constant::Str(_)) => Some(Addable::Str),
        ExprKind::List(_) => Some(Addable::List),
        ExprKind::Tuple(_) => Some(Addable::Tuple),
        _ => None,
    }
}

/// Build an expression denoting the sum of `run`, which are all addable
/// literals of the kind indicated by `kind`. The resulting syntax is
/// degenerate, lacking positions.
fn fold(kind: Addable, run: &[Summand<'_>]) -> Expr {
    let kind = match kind {
        Addable::Str => {
            let mut buf = String::new();
            for summand in run {
                let ExprKind::Literal(Constant::Str(s)) = &summand.x.kind else {
                    unreachable!("non-string in string run");
                };
                buf.push_str(s);
            }
            ExprKind::Literal(Constant::Str(buf.into()))
        }
        Addable::List => {
            let mut elems = Vec::new();
            for summand in run {
                let ExprKind::List(list) = &summand.x.kind else {
                    unreachable!("non-list in list run");
                };
                elems.extend(list.iter().cloned());
            }
            ExprKind::List(elems)
        }
        Addable::Tuple => {
            let mut elems = Vec::new();
            for summand in run {
                let ExprKind::Tuple(tuple) = &summand.x.kind else {
                    unreachable!("non-tuple in tuple run");
                };
                elems.extend(tuple.iter().cloned());
            }
            ExprKind::Tuple(elems)
        }
    };
    Expr::new(kind, Pos::dummy())
}
