//! Post-compile bytecode validation.
//!
//! A freshly compiled function is well-formed by construction; validation
//! exists for programs reloaded from serialized form, where the pools,
//! the dialect, and the host-provided name sets may no longer match the
//! code. The walk re-decodes every instruction and checks its operand
//! against the corresponding pool or code bounds, and rejects opcodes
//! disabled by the dialect flags.

use crate::ast::Dialect;
use crate::bytecode::codec::decode_op;
use crate::bytecode::opcode::Opcode;
use crate::bytecode::program::{Funcode, Program};

use rill_core::ValidateError;

/// Host environment a function is validated against.
///
/// The predicates default to accepting every name, matching a host that
/// provides an open-ended environment.
#[derive(Default)]
pub struct ValidateOptions<'a> {
    /// Dialect feature gates.
    pub dialect: Dialect,
    /// Accepts the names the embedder predeclares. `None` accepts all.
    pub is_predeclared: Option<&'a dyn Fn(&str) -> bool>,
    /// Accepts the names built into the language. `None` accepts all.
    pub is_universal: Option<&'a dyn Fn(&str) -> bool>,
}

impl Funcode {
    /// Check every instruction of this function against the pools of
    /// `prog` and the host environment in `opts`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidateError`] encountered, carrying the
    /// failing pc, the opcode, and the reason.
    pub fn validate(&self, prog: &Program, opts: &ValidateOptions<'_>) -> Result<(), ValidateError> {
        let code = &self.code;
        let len = code.len();
        let mut pc = 0u32;
        while (pc as usize) < len {
            let (raw, arg, next_pc, ok) = decode_op(code, pc);
            let op = Opcode::from_u8(raw).ok_or(ValidateError::IllegalOpcode { pc, op: raw })?;
            if !ok {
                return Err(ValidateError::TruncatedOperand { pc, op: op.name() });
            }

            let disabled = match op {
                Opcode::Error | Opcode::ExceptPush | Opcode::ExceptPop
                    if !opts.dialect.allow_try_except =>
                {
                    Some("try/except")
                }
                Opcode::Amp
                | Opcode::Pipe
                | Opcode::Circumflex
                | Opcode::Tilde
                | Opcode::LtLt
                | Opcode::GtGt
                    if !opts.dialect.allow_bitwise =>
                {
                    Some("bitwise operations")
                }
                Opcode::MakeSet if !opts.dialect.allow_set => Some("sets"),
                _ => None,
            };
            if let Some(feature) = disabled {
                return Err(ValidateError::DisabledFeature {
                    pc,
                    op: op.name(),
                    feature,
                });
            }

            if op.has_arg() {
                self.check_operand(prog, opts, pc, op, arg)?;
            }
            pc = next_pc;
        }
        Ok(())
    }

    fn check_operand(
        &self,
        prog: &Program,
        opts: &ValidateOptions<'_>,
        pc: u32,
        op: Opcode,
        arg: u32,
    ) -> Result<(), ValidateError> {
        let pool_check = |pool: &'static str, len: usize| -> Result<(), ValidateError> {
            if arg as usize >= len {
                return Err(ValidateError::OperandOutOfBounds {
                    pc,
                    op: op.name(),
                    arg,
                    pool,
                    len,
                });
            }
            Ok(())
        };

        match op {
            Opcode::Local | Opcode::SetLocal => pool_check("locals", self.locals.len()),
            Opcode::Free => pool_check("free vars", self.freevars.len()),
            Opcode::Global | Opcode::SetGlobal => pool_check("globals", prog.globals.len()),
            Opcode::Attr | Opcode::SetField | Opcode::Predeclared | Opcode::Universal => {
                pool_check("names", prog.names.len())?;
                let name = &prog.names[arg as usize];
                match op {
                    Opcode::Predeclared => {
                        if let Some(is_predeclared) = opts.is_predeclared {
                            if !is_predeclared(name) {
                                return Err(ValidateError::UnknownName {
                                    pc,
                                    op: op.name(),
                                    name: name.to_string(),
                                    expected: "predeclared",
                                });
                            }
                        }
                    }
                    Opcode::Universal => {
                        if let Some(is_universal) = opts.is_universal {
                            if !is_universal(name) {
                                return Err(ValidateError::UnknownName {
                                    pc,
                                    op: op.name(),
                                    name: name.to_string(),
                                    expected: "universal",
                                });
                            }
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            Opcode::Constant => pool_check("constants", prog.constants.len()),
            Opcode::MakeFunc => pool_check("functions", prog.functions.len()),
            Opcode::Jmp | Opcode::Cjmp | Opcode::IterJmp | Opcode::ExceptPush => {
                if arg as usize >= self.code.len() {
                    return Err(ValidateError::BranchOutOfBounds {
                        pc,
                        op: op.name(),
                        target: arg,
                        len: self.code.len(),
                    });
                }
                Ok(())
            }
            Opcode::Load | Opcode::MakeList | Opcode::MakeTuple | Opcode::Unpack => {
                // LOAD leaves one extra value (the module) on the stack.
                let depth = if op == Opcode::Load { arg + 1 } else { arg };
                if depth > self.max_stack {
                    return Err(ValidateError::StackOutOfBounds {
                        pc,
                        op: op.name(),
                        arg: depth,
                        max_stack: self.max_stack,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
