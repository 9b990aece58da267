//! Compiled constant values.
//!
//! The compiler interns every literal into a program-level constant pool;
//! `Constant` is the pool's element type. Integers that fit in 64 bits are
//! stored directly; wider integers keep their decimal text and are
//! materialized by the runtime.

use std::fmt;
use std::sync::Arc;

/// A literal value in a program's constant pool.
#[derive(Clone, PartialEq, Debug)]
pub enum Constant {
    /// A string literal.
    Str(Arc<str>),
    /// An integer that fits in 64 bits.
    Int(i64),
    /// A floating-point literal.
    Float(f64),
    /// An arbitrary-precision integer, carried as its decimal text.
    BigInt(Arc<str>),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Str(s) => write!(f, "{s:?}"),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(x) => write!(f, "{x}"),
            Constant::BigInt(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_strings() {
        assert_eq!(Constant::Str("ab".into()).to_string(), "\"ab\"");
        assert_eq!(Constant::Int(-3).to_string(), "-3");
        assert_eq!(Constant::Float(1.5).to_string(), "1.5");
        assert_eq!(
            Constant::BigInt("123456789012345678901234567890".into()).to_string(),
            "123456789012345678901234567890"
        );
    }
}
