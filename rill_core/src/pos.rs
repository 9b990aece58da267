//! Source position tracking for error reporting.
//!
//! Positions record line and column numbers rather than byte offsets because
//! the compiled PC→line table stores line numbers directly.

use std::fmt;
use std::sync::Arc;

/// A line/column position in a source file.
///
/// Lines are 1-indexed; line 0 means "no position". Columns are 1-indexed
/// and carried for diagnostics only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    /// 1-indexed source line, or 0 if unknown.
    pub line: u32,
    /// 1-indexed source column, or 0 if unknown.
    pub col: u32,
}

impl Pos {
    /// Create a new position.
    #[inline]
    #[must_use]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// A position for generated code with no source counterpart.
    #[inline]
    #[must_use]
    pub const fn dummy() -> Self {
        Self { line: 0, col: 0 }
    }

    /// Check whether this position carries real source information.
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Debug for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos({}:{})", self.line, self.col)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A resolved source location: file name plus line number.
///
/// Returned by PC→line table queries, where column information is not
/// recorded.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Location {
    /// Name of the source file.
    pub file: Arc<str>,
    /// 1-indexed source line, or 0 if unknown.
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pos_validity() {
        assert!(!Pos::dummy().is_valid());
        assert!(Pos::new(1, 1).is_valid());
    }

    #[test]
    fn test_display() {
        assert_eq!(Pos::new(3, 7).to_string(), "3:7");
        let loc = Location {
            file: "m.rill".into(),
            line: 12,
        };
        assert_eq!(loc.to_string(), "m.rill:12");
    }
}
