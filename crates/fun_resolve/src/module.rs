use std::path::PathBuf;

use fun_ast::Node;

/// Extension of fun source files, added to file import paths
pub const SOURCE_EXTENSION: &str = "fun";
/// Source file loaded from a module directory, if present
pub const LIBRARY_FILE: &str = "lib.fun";
/// Runtime script bundled ahead of the program, if present
pub const RUNTIME_ASSET_FILE: &str = "lib.js";

/// A module loaded by `import name`
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    /// Resolved contents of the module's library file
    pub library: Option<Vec<Node>>,
    pub asset: RuntimeAsset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeAsset {
    Script(PathBuf),
    /// Emitted in place of a missing script
    Placeholder(String),
}

impl RuntimeAsset {
    pub fn placeholder(module: &str) -> Self {
        RuntimeAsset::Placeholder(format!("// No JS code for {}", module))
    }
}
