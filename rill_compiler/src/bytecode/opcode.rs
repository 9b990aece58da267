//! The opcode table.
//!
//! The virtual machine is a stack machine: each instruction is one opcode
//! byte, optionally followed by a single varint-encoded u32 operand. The
//! ordinal space is partitioned so that every opcode below [`Opcode::ARG_MIN`]
//! takes no operand and every opcode from `ARG_MIN` up takes exactly one.
//!
//! The doc comment of each variant is its "stack picture": the state of
//! the operand stack before and after execution. `OP<index>` marks an
//! immediate operand indexing the named table.

use crate::ast::BinOp;

/// A bytecode operation.
///
/// Reordering variants is a wire-format change: bump
/// [`FORMAT_VERSION`](crate::bytecode::program::FORMAT_VERSION) and keep
/// the comparison/arithmetic families aligned with [`BinOp`] (see the
/// const assertions at the bottom of this module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// `- NOP -`
    Nop = 0,

    // stack operations
    /// `x DUP x x`
    Dup,
    /// `x y DUP2 x y x y`
    Dup2,
    /// `x POP -`
    Pop,
    /// `x y EXCH y x`
    Exch,

    // binary comparisons (order must match BinOp)
    /// `x y LT bool`
    Lt,
    /// `x y GT bool`
    Gt,
    /// `x y GE bool`
    Ge,
    /// `x y LE bool`
    Le,
    /// `x y EQL bool`
    Eql,
    /// `x y NEQ bool`
    Neq,

    // binary arithmetic (order must match BinOp)
    /// `x y PLUS z`
    Plus,
    /// `x y MINUS z`
    Minus,
    /// `x y STAR z`
    Star,
    /// `x y SLASH z`
    Slash,
    /// `x y SLASHSLASH z`
    SlashSlash,
    /// `x y PERCENT z`
    Percent,
    /// `x y AMP z`
    Amp,
    /// `x y PIPE z`
    Pipe,
    /// `x y CIRCUMFLEX z`
    Circumflex,
    /// `x y LTLT z`
    LtLt,
    /// `x y GTGT z`
    GtGt,

    /// `x y IN bool`
    In,

    // unary operators
    /// `x UPLUS x`
    UPlus,
    /// `x UMINUS -x`
    UMinus,
    /// `x TILDE ~x`
    Tilde,

    /// `- NONE None`
    None,
    /// `- TRUE True`
    True,
    /// `- FALSE False`
    False,

    /// `iterable ITERPUSH -` (pushes the iterator stack)
    IterPush,
    /// `- ITERPOP -` (pops the iterator stack)
    IterPop,
    /// `value NOT bool`
    Not,
    /// `value RETURN -`
    Return,
    /// `a i new SETINDEX -`
    SetIndex,
    /// `a i INDEX elem`
    Index,
    /// `dict key value SETDICT -`
    SetDict,
    /// `dict key value SETDICTUNIQ -` (duplicate key is a runtime error)
    SetDictUniq,
    /// `list elem APPEND -`
    Append,
    /// `x lo hi step SLICE slice`
    Slice,
    /// `x y INPLACE_ADD z` where z is x+y or x.extend(y)
    InplaceAdd,
    /// `- MAKEDICT dict`
    MakeDict,
    /// `- MAKESET set` (if sets are enabled)
    MakeSet,

    /// `- EXCEPTPOP -` (pops the exception handler stack)
    ExceptPop,
    /// `extype ERROR err` (pushes the current handled exception)
    Error,

    // --- opcodes with an argument must go below this line ---

    // control flow
    /// `- JMP<addr> -`
    Jmp,
    /// `cond CJMP<addr> -`
    Cjmp,
    /// `- ITERJMP<addr> elem` and fall through, or `- ITERJMP<addr> -`
    /// and jump (acts on the topmost iterator)
    IterJmp,

    /// `- CONSTANT<constant> value`
    Constant,
    /// `x1 ... xn MAKETUPLE<n> tuple`
    MakeTuple,
    /// `x1 ... xn MAKELIST<n> list`
    MakeList,
    /// `defaults freevars MAKEFUNC<func> fn`
    MakeFunc,
    /// `from1 ... fromN module LOAD<n> v1 ... vN`
    Load,
    /// `value SETLOCAL<local> -`
    SetLocal,
    /// `value SETGLOBAL<global> -`
    SetGlobal,
    /// `- LOCAL<local> value`
    Local,
    /// `- FREE<freevar> value`
    Free,
    /// `- GLOBAL<global> value`
    Global,
    /// `- PREDECLARED<name> value`
    Predeclared,
    /// `- UNIVERSAL<name> value`
    Universal,
    /// `x ATTR<name> y` where y = x.name
    Attr,
    /// `x y SETFIELD<name> -` where x.name = y
    SetField,
    /// `iterable UNPACK<n> vn ... v1`
    Unpack,

    /// `- EXCEPTPUSH<addr> -` (pushes the exception handler stack)
    ExceptPush,

    // n>>8 is #positional args and n&0xff is #named args (pairs).
    /// `fn positional named CALL<n> result`
    Call,
    /// `fn positional named *args CALL_VAR<n> result`
    CallVar,
    /// `fn positional named **kwargs CALL_KW<n> result`
    CallKw,
    /// `fn positional named *args **kwargs CALL_VAR_KW<n> result`
    CallVarKw,
}

impl Opcode {
    /// The first opcode that takes an operand.
    pub const ARG_MIN: Opcode = Opcode::Jmp;
    /// The largest opcode.
    pub const MAX: Opcode = Opcode::CallVarKw;

    /// Whether this opcode is followed by an operand.
    #[inline]
    #[must_use]
    pub const fn has_arg(self) -> bool {
        self as u8 >= Self::ARG_MIN as u8
    }

    /// Convert from a raw byte, returning `None` for ordinals past
    /// [`Opcode::MAX`].
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        const TABLE: [Opcode; Opcode::MAX as usize + 1] = [
            Nop, Dup, Dup2, Pop, Exch, Lt, Gt, Ge, Le, Eql, Neq, Plus, Minus, Star, Slash,
            SlashSlash, Percent, Amp, Pipe, Circumflex, LtLt, GtGt, In, UPlus, UMinus, Tilde,
            None, True, False, IterPush, IterPop, Not, Return, SetIndex, Index, SetDict,
            SetDictUniq, Append, Slice, InplaceAdd, MakeDict, MakeSet, ExceptPop, Error, Jmp,
            Cjmp, IterJmp, Constant, MakeTuple, MakeList, MakeFunc, Load, SetLocal, SetGlobal,
            Local, Free, Global, Predeclared, Universal, Attr, SetField, Unpack, ExceptPush,
            Call, CallVar, CallKw, CallVarKw,
        ];
        TABLE.get(value as usize).copied()
    }

    /// The opcode's lower-case mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Dup => "dup",
            Opcode::Dup2 => "dup2",
            Opcode::Pop => "pop",
            Opcode::Exch => "exch",
            Opcode::Lt => "lt",
            Opcode::Gt => "gt",
            Opcode::Ge => "ge",
            Opcode::Le => "le",
            Opcode::Eql => "eql",
            Opcode::Neq => "neq",
            Opcode::Plus => "plus",
            Opcode::Minus => "minus",
            Opcode::Star => "star",
            Opcode::Slash => "slash",
            Opcode::SlashSlash => "slashslash",
            Opcode::Percent => "percent",
            Opcode::Amp => "amp",
            Opcode::Pipe => "pipe",
            Opcode::Circumflex => "circumflex",
            Opcode::LtLt => "ltlt",
            Opcode::GtGt => "gtgt",
            Opcode::In => "in",
            Opcode::UPlus => "uplus",
            Opcode::UMinus => "uminus",
            Opcode::Tilde => "tilde",
            Opcode::None => "none",
            Opcode::True => "true",
            Opcode::False => "false",
            Opcode::IterPush => "iterpush",
            Opcode::IterPop => "iterpop",
            Opcode::Not => "not",
            Opcode::Return => "return",
            Opcode::SetIndex => "setindex",
            Opcode::Index => "index",
            Opcode::SetDict => "setdict",
            Opcode::SetDictUniq => "setdictuniq",
            Opcode::Append => "append",
            Opcode::Slice => "slice",
            Opcode::InplaceAdd => "inplace_add",
            Opcode::MakeDict => "makedict",
            Opcode::MakeSet => "makeset",
            Opcode::ExceptPop => "exceptpop",
            Opcode::Error => "error",
            Opcode::Jmp => "jmp",
            Opcode::Cjmp => "cjmp",
            Opcode::IterJmp => "iterjmp",
            Opcode::Constant => "constant",
            Opcode::MakeTuple => "maketuple",
            Opcode::MakeList => "makelist",
            Opcode::MakeFunc => "makefunc",
            Opcode::Load => "load",
            Opcode::SetLocal => "setlocal",
            Opcode::SetGlobal => "setglobal",
            Opcode::Local => "local",
            Opcode::Free => "free",
            Opcode::Global => "global",
            Opcode::Predeclared => "predeclared",
            Opcode::Universal => "universal",
            Opcode::Attr => "attr",
            Opcode::SetField => "setfield",
            Opcode::Unpack => "unpack",
            Opcode::ExceptPush => "exceptpush",
            Opcode::Call => "call",
            Opcode::CallVar => "call_var",
            Opcode::CallKw => "call_kw",
            Opcode::CallVarKw => "call_var_kw",
        }
    }

    /// The fixed `(pops, pushes)` pair of this opcode, or `None` for the
    /// opcodes whose effect depends on their operand (`CALL*`, `ITERJMP`,
    /// `LOAD`, `MAKELIST`, `MAKETUPLE`, `UNPACK`).
    ///
    /// The match is exhaustive, so a new opcode without a declared effect
    /// fails to compile.
    #[must_use]
    pub const fn stack_effect(self) -> Option<(u8, u8)> {
        let effect = match self {
            Opcode::Nop => (0, 0),
            Opcode::Dup => (1, 2),
            Opcode::Dup2 => (2, 4),
            Opcode::Pop => (1, 0),
            Opcode::Exch => (2, 2),
            Opcode::Lt
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Le
            | Opcode::Eql
            | Opcode::Neq
            | Opcode::Plus
            | Opcode::Minus
            | Opcode::Star
            | Opcode::Slash
            | Opcode::SlashSlash
            | Opcode::Percent
            | Opcode::Amp
            | Opcode::Pipe
            | Opcode::Circumflex
            | Opcode::LtLt
            | Opcode::GtGt
            | Opcode::In
            | Opcode::Index
            | Opcode::InplaceAdd => (2, 1),
            Opcode::UPlus | Opcode::UMinus | Opcode::Tilde | Opcode::Not | Opcode::Error => (1, 1),
            Opcode::None | Opcode::True | Opcode::False => (0, 1),
            Opcode::IterPush => (1, 0),
            Opcode::IterPop => (0, 0),
            Opcode::Return => (1, 0),
            Opcode::SetIndex | Opcode::SetDict | Opcode::SetDictUniq => (3, 0),
            Opcode::Append | Opcode::SetField => (2, 0),
            Opcode::Slice => (4, 1),
            Opcode::MakeDict | Opcode::MakeSet => (0, 1),
            Opcode::ExceptPop | Opcode::ExceptPush | Opcode::Jmp => (0, 0),
            Opcode::Cjmp => (1, 0),
            Opcode::Constant
            | Opcode::Local
            | Opcode::Free
            | Opcode::Global
            | Opcode::Predeclared
            | Opcode::Universal => (0, 1),
            Opcode::MakeFunc => (2, 1),
            Opcode::SetLocal | Opcode::SetGlobal => (1, 0),
            Opcode::Attr => (1, 1),
            Opcode::IterJmp
            | Opcode::Load
            | Opcode::MakeTuple
            | Opcode::MakeList
            | Opcode::Unpack
            | Opcode::Call
            | Opcode::CallVar
            | Opcode::CallKw
            | Opcode::CallVarKw => return Option::None,
        };
        Some(effect)
    }

    /// Whether the stack effect of this opcode depends on its operand.
    #[inline]
    #[must_use]
    pub const fn is_variable_stack_effect(self) -> bool {
        self.stack_effect().is_none()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// The compiler translates operator ordinals onto this table by offset;
// pin the seams of both families so reordering either enum fails to build.
const _: () = {
    assert!(BinOp::Lt as u8 == 0);
    assert!(Opcode::Lt as u8 + BinOp::Ne as u8 == Opcode::Neq as u8);
    assert!(Opcode::Lt as u8 + BinOp::Plus as u8 == Opcode::Plus as u8);
    assert!(Opcode::Lt as u8 + BinOp::Caret as u8 == Opcode::Circumflex as u8);
    assert!(Opcode::Lt as u8 + BinOp::In as u8 == Opcode::In as u8);
    assert!(Opcode::Call as u8 + 1 == Opcode::CallVar as u8);
    assert!(Opcode::Call as u8 + 2 == Opcode::CallKw as u8);
    assert!(Opcode::Call as u8 + 3 == Opcode::CallVarKw as u8);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_ordinal_has_a_name_and_an_effect() {
        for raw in 0..=Opcode::MAX as u8 {
            let op = Opcode::from_u8(raw).expect("ordinal gap in opcode table");
            assert_eq!(op as u8, raw, "from_u8 must be the inverse of the cast");
            assert!(!op.name().is_empty());
            // Either a fixed pair or an acknowledged variable effect.
            let _ = op.stack_effect();
        }
        assert_eq!(Opcode::from_u8(Opcode::MAX as u8 + 1), None);
    }

    #[test]
    fn test_arg_partition() {
        for raw in 0..Opcode::ARG_MIN as u8 {
            assert!(!Opcode::from_u8(raw).unwrap().has_arg());
        }
        for raw in Opcode::ARG_MIN as u8..=Opcode::MAX as u8 {
            assert!(Opcode::from_u8(raw).unwrap().has_arg());
        }
    }

    #[test]
    fn test_variable_effect_set_is_exact() {
        use Opcode::*;
        let variable = [IterJmp, Load, MakeTuple, MakeList, Unpack, Call, CallVar, CallKw, CallVarKw];
        for raw in 0..=Opcode::MAX as u8 {
            let op = Opcode::from_u8(raw).unwrap();
            assert_eq!(
                op.is_variable_stack_effect(),
                variable.contains(&op),
                "variable-effect marker wrong for {op}"
            );
        }
    }
}
