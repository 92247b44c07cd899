use std::collections::HashMap;

use fun_ast::{ItemKind, Loc, Node, NodeKind};

/// One lexical level of alias bindings.
///
/// Dotted keys like `foo.bar` are stored flat next to `foo` so property
/// lookups stay in the scope that declared the object.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    aliases: HashMap<String, Node>,
    parent: Option<Box<Scope>>,
}

impl Scope {
    /// The outermost scope, which already knows the runtime items
    pub fn root() -> Self {
        let mut scope = Scope::default();
        for item in [ItemKind::Local, ItemKind::Global] {
            scope
                .aliases
                .insert(item.name().to_string(), Node::new(NodeKind::Item { item }, Loc::default()));
        }
        scope
    }

    pub fn with_parent(parent: Scope) -> Self {
        Self {
            aliases: HashMap::new(),
            parent: Some(Box::new(parent)),
        }
    }

    pub fn into_parent(self) -> Option<Scope> {
        self.parent.map(|b| *b)
    }

    /// Whether this level itself (not a parent) binds `key`
    pub fn declares(&self, key: &str) -> bool {
        self.aliases.contains_key(key)
    }

    pub fn insert(&mut self, key: String, value: Node) {
        self.aliases.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.aliases.get(key)
    }

    /// The nearest scope binding `name`, walking outwards
    pub fn owner_of(&self, name: &str) -> Option<&Scope> {
        let mut scope = self;
        loop {
            if scope.aliases.contains_key(name) {
                return Some(scope);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    #[cfg(test)]
    pub fn lookup(&self, name: &str) -> Option<&Node> {
        self.owner_of(name).and_then(|scope| scope.get(name))
    }
}
