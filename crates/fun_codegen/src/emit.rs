//! Program emission over a resolved tree

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use fun_ast::*;
use fun_resolve::Resolution;
use tracing::debug;

use crate::error::{CodegenError, CodegenErrorKind};
use crate::generator::{cached_value, quote, CodeGenerator, Reference};

type Result<T> = std::result::Result<T, CodegenError>;

/// Hook the program renders into
const ROOT_HOOK: &str = "root";

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Log program start to the browser console
    pub runtime_log: bool,
}

/// Generate the JavaScript for a resolved program.
///
/// Registered handlers and templates come first as plain functions, then
/// module libraries, then the program itself, all inside one closure over
/// the root hook.
pub fn emit_program(resolution: &Resolution, options: &EmitOptions) -> Result<String> {
    let mut g = CodeGenerator::new();
    let loop_bound = resolution
        .declarations
        .iter()
        .enumerate()
        .filter(|(_, node)| uses_unbound_iterator(node, &mut Vec::new()))
        .map(|(index, _)| DeclId(index))
        .collect();
    let emitter = Emitter {
        resolution,
        options,
        next_name: Cell::new(0),
        loop_bound,
        defined: RefCell::new(HashSet::new()),
    };
    emitter.program(&mut g)?;
    Ok(g.into_code())
}

struct Emitter<'a> {
    resolution: &'a Resolution,
    options: &'a EmitOptions,
    next_name: Cell<usize>,
    /// Templates and handlers reading a loop element. They are emitted
    /// where they are defined, inside the loop callback.
    loop_bound: HashSet<DeclId>,
    defined: RefCell<HashSet<DeclId>>,
}

fn callable_name(kind: CallableKind, decl: DeclId) -> String {
    match kind {
        CallableKind::Template => format!("_template_{}", decl.0),
        CallableKind::Handler => format!("_handler_{}", decl.0),
    }
}

/// Item properties on a runtime store, which can change after rendering
fn reactive(node: &Node) -> Option<Reference> {
    match &node.kind {
        NodeKind::ItemProperty { item, .. } if matches!(item.kind, NodeKind::Item { .. }) => {
            Reference::from_node(node).ok()
        }
        _ => None,
    }
}

/// Whether `node` reads a loop element not bound by a loop inside it
fn uses_unbound_iterator(node: &Node, bound: &mut Vec<String>) -> bool {
    match &node.kind {
        NodeKind::RuntimeIterator { name, .. } => !bound.contains(name),
        NodeKind::ForLoop { iterator, iterable, block } => {
            if uses_unbound_iterator(iterable, bound) {
                return true;
            }
            bound.push(iterator.clone());
            let found = block.iter().any(|child| uses_unbound_iterator(child, bound));
            bound.pop();
            found
        }
        _ => node.children().into_iter().any(|child| uses_unbound_iterator(child, bound)),
    }
}

fn iterator_path(name: &str, property: &[String]) -> String {
    let mut path = name.to_string();
    for key in property {
        path.push_str(&format!("[{}]", quote(key)));
    }
    path
}

fn unresolved(node: &Node) -> CodegenError {
    CodegenError::new(
        CodegenErrorKind::Internal,
        node.loc,
        format!("unresolved {} reached code generation", node.kind_name()),
    )
}

fn unsupported(node: &Node, message: String) -> CodegenError {
    CodegenError::new(CodegenErrorKind::Unsupported, node.loc, message)
}

impl Emitter<'_> {
    fn program(&self, g: &mut CodeGenerator) -> Result<()> {
        let resolution = self.resolution;
        g.call_function("fun.setHook", &[&quote(ROOT_HOOK), "document.body"]);
        g.closure_start(&["hook"]);
        if self.options.runtime_log {
            g.log(&["fun: starting program"]);
        }

        for (index, node) in resolution.declarations.iter().enumerate() {
            if !self.loop_bound.contains(&DeclId(index)) {
                self.declaration(g, DeclId(index), node)?;
            }
        }
        for module in &resolution.modules {
            if let Some(library) = &module.library {
                debug!(module = %module.name, "emitting module library");
                self.block(g, library, "hook")?;
            }
        }
        self.block(g, &resolution.ast, "hook")?;

        g.closure_end(&[&quote(ROOT_HOOK)]);
        debug!(names = self.next_name.get(), "emitted program");
        Ok(())
    }

    fn unique(&self, readable: &str) -> String {
        let n = self.next_name.get();
        self.next_name.set(n + 1);
        format!("_{}_{}", readable, n)
    }

    /// Create a child hook of `parent` and return the variable holding its name
    fn hook(&self, g: &mut CodeGenerator, readable: &str, parent: &str, tag: Option<&str>) -> String {
        let hook = self.unique(readable);
        let opts = tag.map(|t| format!(", {{tagName:{}}}", quote(t))).unwrap_or_default();
        g.assign(&hook, &format!("fun.hook(fun.name({}), {}{})", quote(readable), parent, opts));
        hook
    }

    fn declaration(&self, g: &mut CodeGenerator, id: DeclId, node: &Node) -> Result<()> {
        match &node.kind {
            NodeKind::Handler { args, block, .. } => {
                let mut params: Vec<&str> = args.iter().map(String::as_str).collect();
                if params.is_empty() {
                    params.push("event");
                }
                g.function_start(&callable_name(CallableKind::Handler, id), &params);
                self.block(g, block, &quote(ROOT_HOOK))?;
                g.function_end();
            }
            NodeKind::Template { args, block, .. } => {
                let params: Vec<&str> = std::iter::once("hook").chain(args.iter().map(String::as_str)).collect();
                g.function_start(&callable_name(CallableKind::Template, id), &params);
                self.block(g, block, "hook")?;
                g.function_end();
            }
            _ => {
                return Err(CodegenError::new(
                    CodegenErrorKind::Internal,
                    node.loc,
                    format!("declaration #{} is {}, not a template or handler", id.0, node.described()),
                ));
            }
        }
        Ok(())
    }

    /// Emit the loop-bound templates and handlers `node` defines or uses,
    /// ahead of the instruction that needs them
    fn define_loop_bound(&self, g: &mut CodeGenerator, node: &Node) -> Result<()> {
        match &node.kind {
            NodeKind::Handler { decl: Some(id), .. } | NodeKind::Template { decl: Some(id), .. } => {
                if !self.loop_bound.contains(id) {
                    return Ok(());
                }
                let first = self.defined.borrow_mut().insert(*id);
                if first {
                    let declared = self.resolution.declaration(*id).unwrap_or(node);
                    self.declaration(g, *id, declared)?;
                }
                Ok(())
            }
            // Bodies of callables define their own when emitted
            NodeKind::NestedAlias { .. }
            | NodeKind::List { .. }
            | NodeKind::Invocation { .. }
            | NodeKind::Declaration { .. } => {
                for child in node.children() {
                    self.define_loop_bound(g, child)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn block(&self, g: &mut CodeGenerator, nodes: &[Node], parent: &str) -> Result<()> {
        for node in nodes {
            self.statement(g, node, parent)?;
        }
        Ok(())
    }

    fn statement(&self, g: &mut CodeGenerator, node: &Node, parent: &str) -> Result<()> {
        match &node.kind {
            // Declared values are inlined at their uses
            NodeKind::Declaration { value, .. } => self.define_loop_bound(g, value)?,
            NodeKind::Template { args, decl: Some(decl), .. } => {
                if !args.is_empty() {
                    return Err(unsupported(
                        node,
                        format!("a template taking {} argument(s) must be invoked to be rendered", args.len()),
                    ));
                }
                self.define_loop_bound(g, node)?;
                g.call_function(&callable_name(CallableKind::Template, *decl), &[parent]);
            }
            NodeKind::Handler { decl: Some(_), .. } => {
                return Err(unsupported(node, "a handler cannot be rendered, bind it to an on* attribute".to_string()));
            }
            NodeKind::Handler { decl: None, .. } | NodeKind::Template { decl: None, .. } => {
                return Err(unresolved(node));
            }
            NodeKind::Xml { tag, attributes, content, .. } => self.xml(g, tag, attributes, content, parent)?,
            NodeKind::Literal { .. } | NodeKind::RuntimeIterator { .. } => {
                let text = self.expression(node)?;
                g.call_function("fun.text", &[parent, &text]);
            }
            NodeKind::ItemProperty { .. } => self.text(g, node, parent)?,
            NodeKind::ForLoop { iterator, iterable, block } => self.for_loop(g, iterator, iterable, block, parent)?,
            NodeKind::IfStatement { condition, if_block, else_block } => {
                self.if_statement(g, condition, if_block, else_block.as_deref(), parent)?
            }
            NodeKind::Mutation { target, method, args } => self.mutation(g, target, method, args)?,
            NodeKind::Invocation { .. } => {
                self.define_loop_bound(g, node)?;
                let call = self.invocation(node, Some(parent))?;
                g.code(&call);
            }
            NodeKind::NestedAlias { .. } | NodeKind::List { .. } | NodeKind::Item { .. } => {
                return Err(unsupported(node, format!("{} cannot be rendered", node.described())));
            }
            NodeKind::Alias { .. } | NodeKind::ImportModule { .. } | NodeKind::ImportFile { .. } => {
                return Err(unresolved(node));
            }
        }
        Ok(())
    }

    /// A JavaScript expression for the current value of `node`
    fn expression(&self, node: &Node) -> Result<String> {
        match &node.kind {
            NodeKind::Literal { kind: LiteralKind::String, value, .. } => Ok(quote(value)),
            NodeKind::Literal { kind: LiteralKind::Number, value, .. } => Ok(value.clone()),
            NodeKind::ItemProperty { item, property, .. } => match &item.kind {
                NodeKind::RuntimeIterator { name, .. } => Ok(iterator_path(name, property)),
                _ => Ok(cached_value(&Reference::from_node(node)?)),
            },
            NodeKind::RuntimeIterator { name, .. } => Ok(name.clone()),
            NodeKind::NestedAlias { content } => {
                let fields = content
                    .iter()
                    .map(|p| -> Result<String> { Ok(format!("{}:{}", quote(&p.name), self.expression(&p.value)?)) })
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{{{}}}", fields.join(",")))
            }
            NodeKind::List { content } => {
                let items = content.iter().map(|n| self.expression(n)).collect::<Result<Vec<_>>>()?;
                Ok(format!("[{}]", items.join(",")))
            }
            NodeKind::Handler { decl: Some(decl), .. } => Ok(callable_name(CallableKind::Handler, *decl)),
            NodeKind::Template { decl: Some(decl), .. } => Ok(callable_name(CallableKind::Template, *decl)),
            NodeKind::Invocation { target: Some(_), .. } => self.invocation(node, None),
            NodeKind::Alias { .. }
            | NodeKind::ImportModule { .. }
            | NodeKind::ImportFile { .. }
            | NodeKind::Handler { decl: None, .. }
            | NodeKind::Template { decl: None, .. }
            | NodeKind::Invocation { target: None, .. } => Err(unresolved(node)),
            _ => Err(unsupported(node, format!("{} cannot be used as a value", node.described()))),
        }
    }

    /// Templates render into `parent`, so they need one
    fn invocation(&self, node: &Node, parent: Option<&str>) -> Result<String> {
        let NodeKind::Invocation { args, target: Some(target), .. } = &node.kind else {
            return Err(unresolved(node));
        };
        if self.resolution.declaration(target.decl).is_none() {
            return Err(CodegenError::new(
                CodegenErrorKind::Internal,
                node.loc,
                format!("invocation of unregistered declaration #{}", target.decl.0),
            ));
        }

        let mut values = Vec::with_capacity(args.len() + 1);
        if target.kind == CallableKind::Template {
            let Some(parent) = parent else {
                return Err(unsupported(node, "a template invocation cannot be used as a value".to_string()));
            };
            values.push(parent.to_string());
        }
        for arg in args {
            values.push(self.expression(arg)?);
        }
        Ok(format!("{}({})", callable_name(target.kind, target.decl), values.join(", ")))
    }

    fn text(&self, g: &mut CodeGenerator, node: &Node, parent: &str) -> Result<()> {
        let Some(reference) = reactive(node) else {
            let text = self.expression(node)?;
            g.call_function("fun.text", &[parent, &text]);
            return Ok(());
        };
        let hook = self.hook(g, "text", parent, None);
        g.observe(&reference, |g| {
            g.call_function("fun.destroyHook", &[&hook]);
            g.call_function("fun.text", &[&hook, "mutation.value"]);
            Ok(())
        })?;
        Ok(())
    }

    fn xml(
        &self,
        g: &mut CodeGenerator,
        tag: &str,
        attributes: &[Attribute],
        content: &[Node],
        parent: &str,
    ) -> Result<()> {
        let hook = self.hook(g, tag, parent, Some(tag));
        let numeric = tag == "input"
            && attributes.iter().any(|attr| {
                matches!(attr, Attribute::Assign { name, value }
                    if name == "type"
                        && matches!(&value.kind, NodeKind::Literal { value, .. } if value == "number"))
            });

        for attr in attributes {
            match attr {
                Attribute::Assign { name, value } => self.attribute(g, &hook, tag, name, value, numeric)?,
                Attribute::Expand { value } => {
                    let NodeKind::NestedAlias { content } = &value.kind else {
                        return Err(CodegenError::new(
                            CodegenErrorKind::Internal,
                            value.loc,
                            format!("cannot expand {} into attributes", value.described()),
                        ));
                    };
                    for property in content {
                        self.attribute(g, &hook, tag, &property.name, &property.value, numeric)?;
                    }
                }
            }
        }
        self.block(g, content, &hook)
    }

    fn attribute(
        &self,
        g: &mut CodeGenerator,
        hook: &str,
        tag: &str,
        name: &str,
        value: &Node,
        numeric: bool,
    ) -> Result<()> {
        self.define_loop_bound(g, value)?;
        if let NodeKind::Handler { decl, .. } = &value.kind {
            let Some(event) = name.strip_prefix("on").filter(|e| !e.is_empty()) else {
                return Err(unsupported(value, format!("a handler can only be bound to an on* attribute, not \"{}\"", name)));
            };
            let Some(decl) = decl else {
                return Err(unresolved(value));
            };
            g.call_function(
                "fun.on",
                &[
                    &format!("fun.getHook({})", hook),
                    &quote(&event.to_lowercase()),
                    &callable_name(CallableKind::Handler, *decl),
                ],
            );
            return Ok(());
        }

        if name == "style" && matches!(value.kind, NodeKind::NestedAlias { .. }) {
            let style = self.expression(value)?;
            g.call_function("fun.style", &[hook, &style]);
            return Ok(());
        }

        if name == "data" && tag == "input" {
            let reference = Reference::from_node(value)?;
            if g.reflect_input(hook, &reference, numeric).is_none() {
                return Err(unsupported(value, "only a stored value can be bound to an input".to_string()));
            }
            return Ok(());
        }

        let key = quote(name);
        match reactive(value) {
            Some(reference) => {
                g.observe(&reference, |g| {
                    g.call_function("fun.attr", &[hook, &key, "mutation.value"]);
                    Ok(())
                })?;
            }
            None => {
                let value = self.expression(value)?;
                g.call_function("fun.attr", &[hook, &key, &value]);
            }
        }
        Ok(())
    }

    /// Re-render into a dedicated hook whenever the condition's value flips
    fn if_statement(
        &self,
        g: &mut CodeGenerator,
        condition: &Condition,
        if_block: &[Node],
        else_block: Option<&[Node]>,
        parent: &str,
    ) -> Result<()> {
        let hook = self.hook(g, "if", parent, None);
        let render = self.unique("render");
        let last = self.unique("last");
        let value = self.unique("value");

        let mut test = self.expression(&condition.left)?;
        let mut operands = vec![condition.left.as_ref()];
        if let Some(comparison) = &condition.comparison {
            test = format!("{} {} {}", test, comparison.comparator, self.expression(&comparison.right)?);
            operands.push(comparison.right.as_ref());
        }

        g.assign(&last, "null");
        g.function_start(&render, &[]);
        g.assign(&value, &format!("!!({})", test));
        g.return_if_equal(&value, &last);
        g.assign(&last, &value);
        g.call_function("fun.destroyHook", &[&hook]);
        g.if_else(
            &value,
            |g| self.block(g, if_block, &hook),
            |g| match else_block {
                Some(block) => self.block(g, block, &hook),
                None => Ok(()),
            },
        )?;
        g.function_end();

        for operand in operands {
            if let Some(reference) = reactive(operand) {
                g.observe(&reference, |g| {
                    g.call_function(&render, &[]);
                    Ok(())
                })?;
            }
        }
        g.call_function(&render, &[]);
        Ok(())
    }

    fn for_loop(
        &self,
        g: &mut CodeGenerator,
        iterator: &str,
        iterable: &Node,
        block: &[Node],
        parent: &str,
    ) -> Result<()> {
        let reference = Reference::from_node(iterable)?;
        let hook = self.hook(g, "for", parent, None);
        let op = self.unique("op");
        g.observe(&reference, |g| {
            let open = format!("fun.splitListMutation(function({}, {}){{", iterator, op);
            g.nest(&open, "}, mutation)", |g| self.block(g, block, &hook))?;
            Ok(())
        })?;
        Ok(())
    }

    fn mutation(&self, g: &mut CodeGenerator, target: &Node, method: &str, args: &[Node]) -> Result<()> {
        let reference = Reference::from_node(target)?;
        let Some((kind, name)) = reference.stored() else {
            return Err(unsupported(target, "a number cannot be mutated".to_string()));
        };
        for arg in args {
            self.define_loop_bound(g, arg)?;
        }
        let args = args.iter().map(|a| self.expression(a)).collect::<Result<Vec<_>>>()?;
        g.call_function(
            "fun.mutate",
            &[
                &quote(&method.to_uppercase()),
                &quote(kind),
                &quote(name),
                &format!("[{}]", args.join(", ")),
            ],
        );
        Ok(())
    }
}
