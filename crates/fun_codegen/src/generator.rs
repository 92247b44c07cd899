//! Append-only instruction buffer

use std::collections::HashSet;

use fun_ast::{ItemKind, LiteralKind, Node, NodeKind};

use crate::error::{CodegenError, CodegenErrorKind};

type Result<T> = std::result::Result<T, CodegenError>;

/// JSON-quote a string for use as a JavaScript literal
pub fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// A value the runtime can observe or read back
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Local(String),
    Global(String),
    Number(String),
}

impl Reference {
    /// Convert a resolved node. Only item properties on `Local`/`Global` and
    /// number literals qualify.
    pub fn from_node(node: &Node) -> Result<Self> {
        match &node.kind {
            NodeKind::ItemProperty { item, property, .. } => match item.kind {
                NodeKind::Item { item: ItemKind::Local } => Ok(Reference::Local(property.join("."))),
                NodeKind::Item { item: ItemKind::Global } => Ok(Reference::Global(property.join("."))),
                _ => Err(unknown_reference(node)),
            },
            NodeKind::Literal { kind: LiteralKind::Number, value, .. } => Ok(Reference::Number(value.clone())),
            _ => Err(unknown_reference(node)),
        }
    }

    /// Scope kind and name for references the runtime stores
    pub fn stored(&self) -> Option<(&'static str, &str)> {
        match self {
            Reference::Local(name) => Some((ItemKind::Local.scope_kind(), name)),
            Reference::Global(name) => Some((ItemKind::Global.scope_kind(), name)),
            Reference::Number(_) => None,
        }
    }
}

fn unknown_reference(node: &Node) -> CodegenError {
    CodegenError::new(
        CodegenErrorKind::UnknownReference,
        node.loc,
        format!("{} is not a runtime reference", node.described()),
    )
}

/// Expression reading the current value of `reference`
pub fn cached_value(reference: &Reference) -> String {
    match reference {
        Reference::Local(name) => format!("fun.cachedValue(\"LOCAL\", {})", quote(name)),
        Reference::Global(name) => format!("fun.cachedValue(\"GLOBAL\", {})", quote(name)),
        Reference::Number(value) => value.clone(),
    }
}

/// Builds JavaScript one line at a time.
///
/// Bodies of branches and callbacks are closures writing into the same
/// generator, so indentation always unwinds and declared variables are
/// shared across the whole output.
#[derive(Debug, Default)]
pub struct CodeGenerator {
    code: String,
    indent: usize,
    variables: HashSet<String>,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&mut self, line: &str) -> &mut Self {
        self.add(line)
    }

    pub fn log(&mut self, args: &[&str]) -> &mut Self {
        let args: Vec<String> = args.iter().map(|a| quote(a)).collect();
        self.add(&format!("window.console&&console.log({})", args.join(",")))
    }

    pub fn closure_start(&mut self, params: &[&str]) -> &mut Self {
        self.add(&format!(";(function({}){{", params.join(",")));
        self.indent += 1;
        self
    }

    pub fn closure_end(&mut self, args: &[&str]) -> &mut Self {
        self.dedent();
        self.add(&format!("}})({});", args.join(",")))
    }

    pub fn function_start(&mut self, name: &str, params: &[&str]) -> &mut Self {
        self.add(&format!("function {}({}){{", name, params.join(", ")));
        self.indent += 1;
        self
    }

    pub fn function_end(&mut self) -> &mut Self {
        self.dedent();
        self.add("}")
    }

    pub fn call_function(&mut self, name: &str, args: &[&str]) -> &mut Self {
        self.add(&format!("{}({})", name, args.join(", ")))
    }

    /// The first assignment to a plain name declares it
    pub fn assign(&mut self, name: &str, value: &str) -> &mut Self {
        let declare = !self.variables.contains(name) && !name.contains(['.', '[']);
        let prefix = if declare { "var " } else { "" };
        self.add(&format!("{}{} = {}", prefix, name, value));
        self.variables.insert(name.to_string());
        self
    }

    pub fn return_if_equal(&mut self, left: &str, right: &str) -> &mut Self {
        self.add(&format!("if ({} == {}) {{ return; }}", left, right))
    }

    /// Emit `open`, an indented body, then `close`
    pub fn nest<F>(&mut self, open: &str, close: &str, body: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.add(open);
        self.indent += 1;
        let result = body(self);
        self.dedent();
        self.add(close);
        result.map(|()| self)
    }

    /// Both branches are always written, possibly empty
    pub fn if_else<T, E>(&mut self, condition: &str, then: T, otherwise: E) -> Result<&mut Self>
    where
        T: FnOnce(&mut Self) -> Result<()>,
        E: FnOnce(&mut Self) -> Result<()>,
    {
        self.add(&format!("if ({}) {{", condition));
        self.indent += 1;
        let mut result = then(self);
        self.dedent();
        self.add("} else {");
        self.indent += 1;
        if result.is_ok() {
            result = otherwise(self);
        }
        self.dedent();
        self.add("}");
        result.map(|()| self)
    }

    /// Subscribe `callback` to mutations of `reference`. Numbers never
    /// change, so nothing is written for them.
    pub fn observe<F>(&mut self, reference: &Reference, callback: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let Some((kind, name)) = reference.stored() else {
            return Ok(self);
        };
        let open = format!("fun.observe({}, {}, function(mutation){{", quote(kind), quote(name));
        self.nest(&open, "})", callback)
    }

    /// Keep an input element and a stored value in sync
    pub fn reflect_input(&mut self, hook: &str, reference: &Reference, numeric: bool) -> Option<&mut Self> {
        let (kind, name) = reference.stored()?;
        let data_type = if numeric { "number" } else { "text" };
        Some(self.call_function("fun.reflectInput", &[hook, &quote(kind), &quote(name), &quote(data_type)]))
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn into_code(self) -> String {
        self.code
    }

    fn dedent(&mut self) {
        debug_assert!(self.indent > 0, "unbalanced generator scaffolding");
        self.indent = self.indent.saturating_sub(1);
    }

    fn add(&mut self, line: &str) -> &mut Self {
        for _ in 0..self.indent {
            self.code.push('\t');
        }
        self.code.push_str(line);
        self.code.push('\n');
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fun_ast::Loc;

    fn local(name: &str) -> Reference {
        Reference::Local(name.to_string())
    }

    #[test]
    fn test_assign_declares_once() {
        let mut g = CodeGenerator::new();
        g.assign("a", "1").assign("a", "2").assign("hook.x", "3").assign("list[0]", "4");
        assert_eq!(g.as_str(), "var a = 1\na = 2\nhook.x = 3\nlist[0] = 4\n");
    }

    #[test]
    fn test_closure_and_function_indent() {
        let mut g = CodeGenerator::new();
        g.closure_start(&["hook"]);
        g.function_start("_render_0", &[]);
        g.return_if_equal("a", "b");
        g.function_end();
        g.closure_end(&["\"root\""]);
        assert_eq!(
            g.into_code(),
            ";(function(hook){\n\tfunction _render_0(){\n\t\tif (a == b) { return; }\n\t}\n})(\"root\");\n"
        );
    }

    #[test]
    fn test_if_else_writes_both_branches() {
        let mut g = CodeGenerator::new();
        g.if_else("x", |g| {
            g.code("yes()");
            Ok(())
        }, |_| Ok(()))
        .unwrap();
        assert_eq!(g.as_str(), "if (x) {\n\tyes()\n} else {\n}\n");
    }

    #[test]
    fn test_observe_dispatches_on_reference() {
        let mut g = CodeGenerator::new();
        g.observe(&local("count"), |g| {
            g.call_function("fun.text", &["h", "mutation.value"]);
            Ok(())
        })
        .unwrap();
        g.observe(&Reference::Number("3".to_string()), |_| panic!("numbers are never observed"))
            .unwrap();
        assert_eq!(
            g.as_str(),
            "fun.observe(\"LOCAL\", \"count\", function(mutation){\n\tfun.text(h, mutation.value)\n})\n"
        );
    }

    #[test]
    fn test_failed_body_still_unwinds() {
        let mut g = CodeGenerator::new();
        let err = g
            .observe(&local("x"), |_| {
                Err(CodegenError::new(CodegenErrorKind::Internal, Loc::default(), "boom"))
            })
            .unwrap_err();
        assert_eq!(err.message, "boom");
        g.code("after()");
        assert!(g.as_str().ends_with("})\nafter()\n"));
    }

    #[test]
    fn test_cached_value_and_log() {
        assert_eq!(cached_value(&local("name")), "fun.cachedValue(\"LOCAL\", \"name\")");
        assert_eq!(cached_value(&Reference::Global("n".into())), "fun.cachedValue(\"GLOBAL\", \"n\")");
        assert_eq!(cached_value(&Reference::Number("-2".into())), "-2");

        let mut g = CodeGenerator::new();
        g.log(&["start", "say \"hi\""]);
        assert_eq!(g.as_str(), "window.console&&console.log(\"start\",\"say \\\"hi\\\"\")\n");
    }

    #[test]
    fn test_reflect_input() {
        let mut g = CodeGenerator::new();
        assert!(g.reflect_input("_input_0", &local("age"), true).is_some());
        assert!(g.reflect_input("_input_0", &Reference::Number("1".into()), false).is_none());
        assert_eq!(g.as_str(), "fun.reflectInput(_input_0, \"LOCAL\", \"age\", \"number\")\n");
    }

    #[test]
    fn test_reference_from_node() {
        let loc = Loc::default();
        let prop = Node::new(
            NodeKind::ItemProperty {
                item: Box::new(Node::new(NodeKind::Item { item: ItemKind::Global }, loc)),
                property: vec!["user".into(), "name".into()],
                ty: None,
            },
            loc,
        );
        assert_eq!(Reference::from_node(&prop).unwrap(), Reference::Global("user.name".into()));
        assert_eq!(Reference::from_node(&Node::number("7", loc)).unwrap(), Reference::Number("7".into()));

        let err = Reference::from_node(&Node::string("x", loc)).unwrap_err();
        assert_eq!(err.kind, CodegenErrorKind::UnknownReference);
        assert_eq!(err.message, "a literal is not a runtime reference");

        let element = Node::new(
            NodeKind::RuntimeIterator { name: "t".into(), iterable: Box::new(prop.clone()), ty: None },
            loc,
        );
        let subs = Node::new(
            NodeKind::ItemProperty { item: Box::new(element), property: vec!["subs".into()], ty: None },
            loc,
        );
        let err = Reference::from_node(&subs).unwrap_err();
        assert_eq!(err.message, "an item property is not a runtime reference");
    }
}
