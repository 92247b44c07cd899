//! JavaScript generation for fun programs
//!
//! [`CodeGenerator`] is the instruction buffer; [`emit_program`] walks a
//! resolved program and writes calls against the `fun.*` runtime.

mod emit;
mod error;
mod generator;

pub use emit::{emit_program, EmitOptions};
pub use error::{CodegenError, CodegenErrorKind};
pub use generator::{cached_value, quote, CodeGenerator, Reference};
