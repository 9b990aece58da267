//! Compiled program and function containers.
//!
//! A [`Program`] is one compiled module: a bag of pools shared by every
//! function in the module, plus the `toplevel` function that initializes
//! it. A [`Funcode`] is the compiled form of a single function. Both are
//! immutable once the compiler returns them.

use rill_core::{Constant, Location, Pos};
use std::sync::Arc;

/// Bumped on any wire-incompatible change to opcode ordinals, operand
/// encodings, pool layout, or the line table format.
pub const FORMAT_VERSION: u32 = 1;

/// The name and position of an identifier, kept for diagnostics and
/// tracing only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// The identifier text.
    pub name: Arc<str>,
    /// Where the identifier appeared in the source.
    pub pos: Pos,
}

/// A Rill module in executable form.
#[derive(Debug, Clone)]
pub struct Program {
    /// Module path and position of each load statement, in source order.
    pub loads: Vec<Binding>,
    /// Names referenced by `ATTR`, `SETFIELD`, `PREDECLARED`, `UNIVERSAL`.
    pub names: Vec<Arc<str>>,
    /// The constant pool.
    pub constants: Vec<Constant>,
    /// Nested functions, in order of compilation.
    pub functions: Vec<Funcode>,
    /// The module's global frame, for error messages and tracing.
    pub globals: Vec<Binding>,
    /// The module initialization function.
    pub toplevel: Funcode,
}

/// The compiled code of a single Rill function.
#[derive(Debug, Clone)]
pub struct Funcode {
    /// Name of the source file the function was compiled from.
    pub filename: Arc<str>,
    /// Position of the `def` or `lambda` token.
    pub pos: Pos,
    /// Name of this function (`"<toplevel>"` for the module body).
    pub name: Arc<str>,
    /// The byte code.
    pub code: Vec<u8>,
    /// Delta-encoded mapping from pc to line number; see [`Funcode::position`].
    pub pcline: Vec<u16>,
    /// The local frame, for error messages and tracing.
    pub locals: Vec<Binding>,
    /// The free-variable frame, for tracing.
    pub freevars: Vec<Binding>,
    /// Maximum operand-stack depth the function needs at runtime.
    pub max_stack: u32,
    /// Number of declared parameters.
    pub num_params: u32,
    /// Whether the parameter list ends with `*args`.
    pub has_varargs: bool,
    /// Whether the parameter list ends with `**kwargs`.
    pub has_kwargs: bool,
}

impl Funcode {
    /// Return the source location of the instruction at `pc`:
    /// the record for the largest pc value not greater than the query.
    ///
    /// Conceptually the table contains rows of the form `(pc, line)`.
    /// Since the pc always increases, usually by a small amount, and the
    /// line number typically does too although it may decrease, the rows
    /// are delta-encoded starting from `(pc: 0, line: 0)`. Each entry is
    /// 16 bits: the top 8 are the unsigned Δpc, the next 7 the signed
    /// Δline, and the bottom bit indicates that more rows follow because
    /// one of the deltas was saturated.
    #[must_use]
    pub fn position(&self, pc: u32) -> Location {
        let mut line = 0i32;
        let mut prev_pc = 0u32;
        let mut complete = true;
        for &x in &self.pcline {
            let next_pc = prev_pc + u32::from(x >> 8);
            if complete && next_pc > pc {
                break;
            }
            prev_pc = next_pc;
            line += i32::from((x as u8 as i8) >> 1); // sign extend Δline from 7 bits
            complete = x & 1 == 0;
        }
        Location {
            file: self.filename.clone(),
            line: line as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funcode_with_table(pcline: Vec<u16>) -> Funcode {
        Funcode {
            filename: "t.rill".into(),
            pos: Pos::new(1, 1),
            name: "f".into(),
            code: Vec::new(),
            pcline,
            locals: Vec::new(),
            freevars: Vec::new(),
            max_stack: 0,
            num_params: 0,
            has_varargs: false,
            has_kwargs: false,
        }
    }

    fn entry(delta_pc: u8, delta_line: i8, incomplete: bool) -> u16 {
        u16::from(delta_pc) << 8 | u16::from((delta_line << 1) as u8) | u16::from(incomplete)
    }

    #[test]
    fn test_position_simple_deltas() {
        // pc 0 → line 5, pc 3 → line 7, pc 10 → line 6.
        let fc = funcode_with_table(vec![entry(0, 5, false), entry(3, 2, false), entry(7, -1, false)]);
        assert_eq!(fc.position(0).line, 5);
        assert_eq!(fc.position(2).line, 5);
        assert_eq!(fc.position(3).line, 7);
        assert_eq!(fc.position(9).line, 7);
        assert_eq!(fc.position(10).line, 6);
        assert_eq!(fc.position(100).line, 6);
    }

    #[test]
    fn test_position_incomplete_chain() {
        // One logical row (pc 0, line 100) split because Δline saturates:
        // 63 + 37 = 100, with the incomplete bit on the first record.
        let fc = funcode_with_table(vec![entry(0, 63, true), entry(0, 37, false)]);
        assert_eq!(fc.position(0).line, 100);
    }

    #[test]
    fn test_position_negative_saturation() {
        // Line 100 then line 0 at pc 4: -64 - 36 = -100.
        let fc = funcode_with_table(vec![
            entry(0, 63, true),
            entry(0, 37, false),
            entry(4, -64, true),
            entry(0, -36, false),
        ]);
        assert_eq!(fc.position(0).line, 100);
        assert_eq!(fc.position(4).line, 0);
    }

    #[test]
    fn test_position_carries_filename() {
        let fc = funcode_with_table(Vec::new());
        assert_eq!(&*fc.position(0).file, "t.rill");
    }
}
