use fun_ast::{LiteralKind, Node, Type};
use tracing::trace;

/// Static type inference used while resolving.
///
/// Only what can be known at compile time gets a type: literals, loop
/// iterators and the lists they come from. Item properties stay untyped.
#[derive(Debug, Default, Clone, Copy)]
pub struct Types;

impl Types {
    pub fn infer_literal(&self, kind: LiteralKind) -> Type {
        match kind {
            LiteralKind::String => Type::Text,
            LiteralKind::Number => Type::Number,
        }
    }

    /// Loop iterators are treated as text until the runtime says otherwise
    pub fn infer_iterator(&self) -> Type {
        Type::Text
    }

    pub fn infer_iterable(&self) -> Type {
        Type::List(Box::new(self.infer_iterator()))
    }

    /// Hook for method-based inference on mutations (`Local.tasks push: x`).
    pub fn infer_by_method(&self, target: &Node, method: &str) {
        trace!(target = target.kind_name(), method, "no inference for mutation");
    }
}
