//! Bytecode validation errors.
//!
//! Compilation itself cannot fail with a user error: structural
//! well-formedness is guaranteed by construction, and internal CFG
//! inconsistencies are compiler bugs that panic with a diagnostic.
//! Validation of a function — typically after reloading a serialized
//! program — reports exactly one structured failure.

use thiserror::Error;

/// A bytecode validation failure, carrying the failing program counter,
/// the opcode name, and the reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    /// The byte at `pc` is not a known opcode.
    #[error("illegal opcode {op} at pc {pc}")]
    IllegalOpcode {
        /// Program counter of the offending byte.
        pc: u32,
        /// The unrecognized opcode byte.
        op: u8,
    },

    /// An argumented opcode's operand ran past the end of the code.
    #[error("truncated operand for op {op} at pc {pc}")]
    TruncatedOperand {
        /// Program counter of the instruction.
        pc: u32,
        /// Name of the opcode.
        op: &'static str,
    },

    /// The instruction uses a feature disabled by the active dialect.
    #[error("this dialect does not support {feature}")]
    DisabledFeature {
        /// Program counter of the instruction.
        pc: u32,
        /// Name of the opcode.
        op: &'static str,
        /// The gated language feature.
        feature: &'static str,
    },

    /// An operand does not index an extant entry of its pool.
    #[error("operand {arg} of op {op} at pc {pc} is out of bounds for {pool} of length {len}")]
    OperandOutOfBounds {
        /// Program counter of the instruction.
        pc: u32,
        /// Name of the opcode.
        op: &'static str,
        /// The offending operand.
        arg: u32,
        /// Which pool the operand indexes.
        pool: &'static str,
        /// Length of that pool.
        len: usize,
    },

    /// A branch operand does not land inside the code array.
    #[error("branch target {target} of op {op} at pc {pc} is out of bounds for code of length {len}")]
    BranchOutOfBounds {
        /// Program counter of the instruction.
        pc: u32,
        /// Name of the opcode.
        op: &'static str,
        /// The branch target address.
        target: u32,
        /// Length of the code array.
        len: usize,
    },

    /// A stack-shaped operand exceeds the function's maximum stack depth.
    #[error("operand {arg} of op {op} at pc {pc} exceeds max stack size {max_stack}")]
    StackOutOfBounds {
        /// Program counter of the instruction.
        pc: u32,
        /// Name of the opcode.
        op: &'static str,
        /// The offending operand (for `LOAD`, already incremented by one
        /// to account for the module value).
        arg: u32,
        /// The function's computed maximum stack depth.
        max_stack: u32,
    },

    /// A name-pool operand names an identifier the host does not provide.
    #[error("name {name:?} passed to op {op} at pc {pc} is not {expected}")]
    UnknownName {
        /// Program counter of the instruction.
        pc: u32,
        /// Name of the opcode.
        op: &'static str,
        /// The rejected identifier.
        name: String,
        /// Which predicate rejected it (`predeclared` or `universal`).
        expected: &'static str,
    },
}

impl ValidateError {
    /// The program counter at which validation failed.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        match self {
            ValidateError::IllegalOpcode { pc, .. }
            | ValidateError::TruncatedOperand { pc, .. }
            | ValidateError::DisabledFeature { pc, .. }
            | ValidateError::OperandOutOfBounds { pc, .. }
            | ValidateError::BranchOutOfBounds { pc, .. }
            | ValidateError::StackOutOfBounds { pc, .. }
            | ValidateError::UnknownName { pc, .. } => *pc,
        }
    }
}
