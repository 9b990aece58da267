//! Bytecode definitions: the opcode table, the operand codec, the
//! program/function model, and the control-flow-graph builder.

pub mod codec;
pub mod opcode;
pub mod program;

pub(crate) mod cfg;
