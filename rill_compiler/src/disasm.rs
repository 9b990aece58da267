//! Human-readable bytecode listings.
//!
//! Operands are resolved against the program's pools into trailing
//! comments: the constant's value, the nested function's name, the
//! variable or attribute name, or the call arity.

use crate::bytecode::codec::decode_op;
use crate::bytecode::opcode::Opcode;
use crate::bytecode::program::{Funcode, Program};

use std::fmt::Write as _;

/// Resolve the operand of `op` into a listing comment, if it has one.
#[must_use]
pub fn op_comment(prog: &Program, fc: &Funcode, op: Opcode, arg: u32) -> Option<String> {
    let comment = match op {
        Opcode::Constant => prog.constants[arg as usize].to_string(),
        Opcode::MakeFunc => prog.functions[arg as usize].name.to_string(),
        Opcode::Local | Opcode::SetLocal => fc.locals[arg as usize].name.to_string(),
        Opcode::Global | Opcode::SetGlobal => prog.globals[arg as usize].name.to_string(),
        Opcode::Attr | Opcode::SetField | Opcode::Predeclared | Opcode::Universal => {
            prog.names[arg as usize].to_string()
        }
        Opcode::Free => fc.freevars[arg as usize].name.to_string(),
        Opcode::Call | Opcode::CallVar | Opcode::CallKw | Opcode::CallVarKw => {
            format!("{} pos, {} named", arg >> 8, arg & 0xff)
        }
        // JMP, CJMP, ITERJMP, MAKETUPLE, MAKELIST, LOAD, UNPACK:
        // the operand is just a number.
        _ => return None,
    };
    Some(comment)
}

/// Append one formatted instruction to `out`.
pub fn write_op(out: &mut String, prog: &Program, fc: &Funcode, pc: u32, op: Opcode, arg: u32) {
    if !op.has_arg() {
        let _ = writeln!(out, "\t{pc}\t{op}");
        return;
    }
    let _ = write!(out, "\t{pc}\t{:<10}\t{arg}", op.name());
    if let Some(comment) = op_comment(prog, fc, op, arg) {
        let _ = write!(out, "\t; {comment}");
    }
    out.push('\n');
}

/// Print one instruction to stderr. Provided for debugging.
pub fn print_op(prog: &Program, fc: &Funcode, pc: u32, op: Opcode, arg: u32) {
    let mut buf = String::new();
    write_op(&mut buf, prog, fc, pc, op, arg);
    eprint!("{buf}");
}

/// Disassemble the whole function into a listing, one instruction per
/// line. Stops at the first undecodable instruction.
#[must_use]
pub fn disassemble(prog: &Program, fc: &Funcode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} (max stack {}):", fc.name, fc.max_stack);
    let mut pc = 0u32;
    while (pc as usize) < fc.code.len() {
        let (raw, arg, next_pc, ok) = decode_op(&fc.code, pc);
        let Some(op) = Opcode::from_u8(raw) else {
            let _ = writeln!(out, "\t{pc}\tillegal op ({raw})");
            break;
        };
        if !ok {
            let _ = writeln!(out, "\t{pc}\t{op}\t<truncated>");
            break;
        }
        write_op(&mut out, prog, fc, pc, op, arg);
        pc = next_pc;
    }
    out
}
