//! Bytecode compiler for Rill.
//!
//! This crate translates a *resolved* AST — one in which every identifier
//! carries a scope tag and an index — into executable stack-machine
//! bytecode.
//!
//! # Architecture
//!
//! ```text
//! resolved AST → CFG of basic blocks → linearized byte stream → Program
//! ```
//!
//! The pipeline has three phases:
//!
//! 1. **CFG construction** ([`compiler`]): one recursive emitter for
//!    statements and one for expressions append instructions to a current
//!    basic block, creating blocks and edges for control flow.
//! 2. **Linearization** (`bytecode::cfg`): a depth-first walk orders the
//!    reachable blocks, threads jumps through empty blocks, abstractly
//!    interprets the operand-stack depth per block, and patches
//!    fixed-width branch operands.
//! 3. **Validation** ([`validate`], optional): re-walks the byte stream
//!    and checks every operand against its pool and the dialect gates.
//!
//! # Key Types
//!
//! - [`Program`] - compiled module with shared name/constant/function pools
//! - [`Funcode`] - compiled form of a single function
//! - [`Opcode`] - bytecode operation enumeration
//! - [`ast::Stmt`] / [`ast::Expr`] - the resolved AST consumed here

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod disasm;
pub mod validate;

// Re-export main types
pub use bytecode::codec::{decode_op, decode_op_unchecked};
pub use bytecode::opcode::Opcode;
pub use bytecode::program::{Binding, Funcode, Program, FORMAT_VERSION};
pub use compiler::{compile_expr, compile_file};
pub use disasm::{disassemble, print_op};
pub use validate::ValidateOptions;
