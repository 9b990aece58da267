//! # Rill Core
//!
//! Foundational types shared across the Rill compiler and tooling:
//!
//! - **Positions**: source locations for diagnostics and the PC→line table
//! - **Constants**: the compiled form of literal values in the constant pool
//! - **Errors**: structured bytecode validation failures

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod error;
pub mod pos;
pub mod value;

pub use error::ValidateError;
pub use pos::{Location, Pos};
pub use value::Constant;
