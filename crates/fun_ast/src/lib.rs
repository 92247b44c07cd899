use fun_lexer::{FileId, Span, Token};
use serde::Serialize;

/// Where a node came from, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Loc {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
    pub span: Span,
}

impl Loc {
    pub fn of(token: &Token, file: FileId) -> Self {
        Self { file, line: token.line, column: token.column, span: token.span }
    }

    /// Extend this location's span to cover `end`
    pub fn to(self, end: Span) -> Self {
        Self { span: Span::new(self.span.start, end.end.max(self.span.end)), ..self }
    }
}

/// Index into the declaration registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeclId(pub usize);

/// Inferred static type of a value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Type {
    Text,
    Number,
    List(Box<Type>),
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Text => write!(f, "Text"),
            Type::Number => write!(f, "Number"),
            Type::List(of) => write!(f, "List<{}>", of),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiteralKind {
    String,
    Number,
}

/// The runtime stores a program can reach without declaring them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemKind {
    Local,
    Global,
}

impl ItemKind {
    /// Name the item is bound under in the root scope
    pub fn name(self) -> &'static str {
        match self {
            ItemKind::Local => "Local",
            ItemKind::Global => "Global",
        }
    }

    /// Scope kind as the runtime spells it
    pub fn scope_kind(self) -> &'static str {
        match self {
            ItemKind::Local => "LOCAL",
            ItemKind::Global => "GLOBAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
}

impl Comparator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::LtEq),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::GtEq),
            "==" => Some(Comparator::Eq),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::LtEq => "<=",
            Comparator::Gt => ">",
            Comparator::GtEq => ">=",
            Comparator::Eq => "==",
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the program tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(flatten)]
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Literal {
        kind: LiteralKind,
        value: String,
        ty: Option<Type>,
    },
    /// A dotted reference to a declared name: `foo.bar`
    Alias {
        namespace: Vec<String>,
    },
    /// An object literal: `{ bar: 1, cat: "cat" }`
    NestedAlias {
        content: Vec<Property>,
    },
    List {
        content: Vec<Node>,
    },
    Invocation {
        namespace: Vec<String>,
        args: Vec<Node>,
        /// Set by the resolver to the registered template or handler being called
        target: Option<CallTarget>,
    },
    Declaration {
        namespace: Vec<String>,
        value: Box<Node>,
    },
    Xml {
        tag: String,
        attributes: Vec<Attribute>,
        content: Vec<Node>,
        self_closing: bool,
    },
    ForLoop {
        iterator: String,
        iterable: Box<Node>,
        block: Vec<Node>,
    },
    IfStatement {
        condition: Condition,
        if_block: Vec<Node>,
        else_block: Option<Vec<Node>>,
    },
    Handler {
        args: Vec<String>,
        block: Vec<Node>,
        decl: Option<DeclId>,
    },
    Template {
        args: Vec<String>,
        block: Vec<Node>,
        decl: Option<DeclId>,
    },
    Mutation {
        target: Box<Node>,
        method: String,
        args: Vec<Node>,
    },
    ImportModule {
        name: String,
    },
    ImportFile {
        path: String,
    },
    /// A runtime store whose shape is only known at runtime
    Item {
        item: ItemKind,
    },
    /// Dotted access into an item: `Local.tasks`, `task.title`
    ItemProperty {
        item: Box<Node>,
        property: Vec<String>,
        ty: Option<Type>,
    },
    /// The element bound by a `for` loop
    RuntimeIterator {
        name: String,
        iterable: Box<Node>,
        ty: Option<Type>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallableKind {
    Template,
    Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallTarget {
    pub kind: CallableKind,
    pub decl: DeclId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Attribute {
    Assign { name: String, value: Node },
    /// `#{ ... }`: spread the object's properties as attributes
    Expand { value: Node },
}

impl Attribute {
    pub fn value(&self) -> &Node {
        match self {
            Attribute::Assign { value, .. } | Attribute::Expand { value } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub left: Box<Node>,
    pub comparison: Option<Comparison>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub comparator: Comparator,
    pub right: Box<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, loc: Loc) -> Self {
        Self { kind, loc }
    }

    pub fn string(value: impl Into<String>, loc: Loc) -> Self {
        Self::new(NodeKind::Literal { kind: LiteralKind::String, value: value.into(), ty: None }, loc)
    }

    pub fn number(value: impl Into<String>, loc: Loc) -> Self {
        Self::new(NodeKind::Literal { kind: LiteralKind::Number, value: value.into(), ty: None }, loc)
    }

    pub fn alias(namespace: &[&str], loc: Loc) -> Self {
        Self::new(
            NodeKind::Alias { namespace: namespace.iter().map(|s| s.to_string()).collect() },
            loc,
        )
    }

    /// Items and runtime iterators stop compile-time property resolution
    pub fn is_item(&self) -> bool {
        matches!(self.kind, NodeKind::Item { .. } | NodeKind::RuntimeIterator { .. })
    }

    /// Node kind as written in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Literal { .. } => "literal",
            NodeKind::Alias { .. } => "alias",
            NodeKind::NestedAlias { .. } => "object",
            NodeKind::List { .. } => "list",
            NodeKind::Invocation { .. } => "invocation",
            NodeKind::Declaration { .. } => "declaration",
            NodeKind::Xml { .. } => "XML",
            NodeKind::ForLoop { .. } => "for loop",
            NodeKind::IfStatement { .. } => "if statement",
            NodeKind::Handler { .. } => "handler",
            NodeKind::Template { .. } => "template",
            NodeKind::Mutation { .. } => "mutation",
            NodeKind::ImportModule { .. } => "module import",
            NodeKind::ImportFile { .. } => "file import",
            NodeKind::Item { .. } => "item",
            NodeKind::ItemProperty { .. } => "item property",
            NodeKind::RuntimeIterator { .. } => "runtime iterator",
        }
    }

    /// `kind_name` with its indefinite article
    pub fn described(&self) -> String {
        let article = match self.kind {
            NodeKind::Xml { .. } | NodeKind::Item { .. } | NodeKind::ItemProperty { .. } => "an",
            _ => "a",
        };
        format!("{} {}", article, self.kind_name())
    }

    /// Direct child nodes, in source order
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Literal { .. }
            | NodeKind::Alias { .. }
            | NodeKind::Item { .. }
            | NodeKind::ImportModule { .. }
            | NodeKind::ImportFile { .. } => Vec::new(),
            NodeKind::NestedAlias { content } => content.iter().map(|p| &p.value).collect(),
            NodeKind::List { content } => content.iter().collect(),
            NodeKind::Invocation { args, .. } => args.iter().collect(),
            NodeKind::Declaration { value, .. } => vec![&**value],
            NodeKind::Xml { attributes, content, .. } => {
                attributes.iter().map(Attribute::value).chain(content).collect()
            }
            NodeKind::ForLoop { iterable, block, .. } => std::iter::once(&**iterable).chain(block).collect(),
            NodeKind::IfStatement { condition, if_block, else_block } => std::iter::once(&*condition.left)
                .chain(condition.comparison.as_ref().map(|c| &*c.right))
                .chain(if_block)
                .chain(else_block.iter().flatten())
                .collect(),
            NodeKind::Handler { block, .. } | NodeKind::Template { block, .. } => block.iter().collect(),
            NodeKind::Mutation { target, args, .. } => std::iter::once(&**target).chain(args).collect(),
            NodeKind::ItemProperty { item, .. } => vec![&**item],
            NodeKind::RuntimeIterator { iterable, .. } => vec![&**iterable],
        }
    }

    /// Whether any import or alias node remains anywhere below this node
    pub fn has_unresolved(&self) -> bool {
        match &self.kind {
            NodeKind::Alias { .. } | NodeKind::ImportModule { .. } | NodeKind::ImportFile { .. } => true,
            NodeKind::Invocation { target: None, .. } => true,
            _ => self.children().into_iter().any(Node::has_unresolved),
        }
    }
}

// === Pretty printing ===

pub fn pretty_print(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        out.push_str(&node.pretty_print(0));
    }
    out
}

fn print_block(out: &mut String, label: &str, block: &[Node], indent: usize) {
    let ind = "  ".repeat(indent);
    out.push_str(&format!("{}{}:\n", ind, label));
    for node in block {
        out.push_str(&node.pretty_print(indent + 1));
    }
}

fn typed(ty: &Option<Type>) -> String {
    ty.as_ref().map(|t| format!(" : {}", t)).unwrap_or_default()
}

impl Node {
    pub fn pretty_print(&self, indent: usize) -> String {
        let ind = "  ".repeat(indent);
        match &self.kind {
            NodeKind::Literal { kind: LiteralKind::String, value, ty } => {
                format!("{}String {:?}{}\n", ind, value, typed(ty))
            }
            NodeKind::Literal { kind: LiteralKind::Number, value, ty } => {
                format!("{}Number {}{}\n", ind, value, typed(ty))
            }
            NodeKind::Alias { namespace } => format!("{}Alias '{}'\n", ind, namespace.join(".")),
            NodeKind::NestedAlias { content } => {
                let mut out = format!("{}Object\n", ind);
                for prop in content {
                    out.push_str(&format!("{}  {}:\n", ind, prop.name));
                    out.push_str(&prop.value.pretty_print(indent + 2));
                }
                out
            }
            NodeKind::List { content } => {
                let mut out = format!("{}List\n", ind);
                for item in content {
                    out.push_str(&item.pretty_print(indent + 1));
                }
                out
            }
            NodeKind::Invocation { namespace, args, target } => {
                let target = match target {
                    Some(CallTarget { kind: CallableKind::Template, decl }) => format!(" -> template #{}", decl.0),
                    Some(CallTarget { kind: CallableKind::Handler, decl }) => format!(" -> handler #{}", decl.0),
                    None => String::new(),
                };
                let mut out = format!("{}Invocation '{}'{}\n", ind, namespace.join("."), target);
                for arg in args {
                    out.push_str(&arg.pretty_print(indent + 1));
                }
                out
            }
            NodeKind::Declaration { namespace, value } => {
                let mut out = format!("{}Declaration '{}'\n", ind, namespace.join("."));
                out.push_str(&value.pretty_print(indent + 1));
                out
            }
            NodeKind::Xml { tag, attributes, content, self_closing } => {
                let close = if *self_closing { " (self-closing)" } else { "" };
                let mut out = format!("{}Xml <{}>{}\n", ind, tag, close);
                for attr in attributes {
                    match attr {
                        Attribute::Assign { name, value } => {
                            out.push_str(&format!("{}  @{}=\n", ind, name));
                            out.push_str(&value.pretty_print(indent + 2));
                        }
                        Attribute::Expand { value } => {
                            out.push_str(&format!("{}  #expand\n", ind));
                            out.push_str(&value.pretty_print(indent + 2));
                        }
                    }
                }
                for node in content {
                    out.push_str(&node.pretty_print(indent + 1));
                }
                out
            }
            NodeKind::ForLoop { iterator, iterable, block } => {
                let mut out = format!("{}ForLoop '{}' in\n", ind, iterator);
                out.push_str(&iterable.pretty_print(indent + 1));
                print_block(&mut out, "body", block, indent + 1);
                out
            }
            NodeKind::IfStatement { condition, if_block, else_block } => {
                let mut out = format!("{}If\n", ind);
                out.push_str(&condition.left.pretty_print(indent + 1));
                if let Some(cmp) = &condition.comparison {
                    out.push_str(&format!("{}  {}\n", ind, cmp.comparator));
                    out.push_str(&cmp.right.pretty_print(indent + 1));
                }
                print_block(&mut out, "then", if_block, indent + 1);
                if let Some(else_block) = else_block {
                    print_block(&mut out, "else", else_block, indent + 1);
                }
                out
            }
            NodeKind::Handler { args, block, decl } | NodeKind::Template { args, block, decl } => {
                let what = if matches!(self.kind, NodeKind::Handler { .. }) { "Handler" } else { "Template" };
                let id = decl.map(|d| format!(" #{}", d.0)).unwrap_or_default();
                let mut out = format!("{}{}{}({})\n", ind, what, id, args.join(", "));
                for node in block {
                    out.push_str(&node.pretty_print(indent + 1));
                }
                out
            }
            NodeKind::Mutation { target, method, args } => {
                let mut out = format!("{}Mutation '{}'\n", ind, method);
                out.push_str(&target.pretty_print(indent + 1));
                for arg in args {
                    out.push_str(&arg.pretty_print(indent + 1));
                }
                out
            }
            NodeKind::ImportModule { name } => format!("{}ImportModule {}\n", ind, name),
            NodeKind::ImportFile { path } => format!("{}ImportFile {:?}\n", ind, path),
            NodeKind::Item { item } => format!("{}Item {}\n", ind, item.name()),
            NodeKind::ItemProperty { item, property, ty } => {
                let owner = match &item.kind {
                    NodeKind::Item { item } => item.name().to_string(),
                    NodeKind::RuntimeIterator { name, .. } => name.clone(),
                    _ => item.kind_name().to_string(),
                };
                format!("{}ItemProperty {}.{}{}\n", ind, owner, property.join("."), typed(ty))
            }
            NodeKind::RuntimeIterator { name, ty, .. } => {
                format!("{}RuntimeIterator '{}'{}\n", ind, name, typed(ty))
            }
        }
    }
}
