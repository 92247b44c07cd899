//! Name resolution for fun programs
//!
//! Turns a parsed tree into one with no remaining references:
//! 1. Replaces every alias with the value it names
//! 2. Splices in file imports and loads each module once
//! 3. Registers templates and handlers so code generation can emit them first
//! 4. Tags static values with their inferred type

mod error;
mod module;
mod resolve;
mod scope;
mod types;

pub use error::{ResolveError, ResolveErrorKind};
pub use module::{Module, RuntimeAsset, LIBRARY_FILE, RUNTIME_ASSET_FILE, SOURCE_EXTENSION};
pub use resolve::{resolve, resolve_with, Resolution, ResolveOptions, Resolver};
pub use types::Types;
